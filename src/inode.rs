/*
 * This file is part of blockfs.
 *
 * blockfs is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * blockfs is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * blockfs. If not, see <https://www.gnu.org/licenses/>.
 */

//! An inode represents one file's metadata and block-pointer table.
//!
//! This is a plain value type: it is loaded from and stored back to disk
//! through an inumber, and exposes a narrow interface (`block_for_offset`,
//! `assign_block_for_offset`, `register_indirect`) for translating byte
//! offsets into block numbers. Allocation policy — deciding *which* block
//! to hand an inode — belongs to [`crate::superblock::SuperBlock`], not
//! here; there is no back-pointer from the inode to the superblock.

use crate::codec::{read_i16_be, read_i32_be, write_i16_be, write_i32_be};
use crate::disk::Disk;
use crate::error::{FsError, FsResult};
use crate::layout::{
    inode_block, inode_slot_offset, BLOCK_SIZE, DIRECT_COUNT, DIRECT_RANGE, POINTERS_PER_INDIRECT,
    UNASSIGNED,
};
use log::debug;

/// `flag`: the inode's slot is in use.
///
/// `SuperBlock::format` writes this for *every* inode, including the ones
/// that are not yet attached to a file — a known quirk carried over from
/// the system this crate is modeled on (the field's own doc comment says
/// "0 = unused", and format contradicts it). Preserved here for on-disk
/// compatibility rather than "fixed", per the design notes. No code path
/// ever constructs the complementary "0 = unused" value, so there is no
/// `FLAG_UNUSED` constant to go with it.
pub const FLAG_USED: i16 = 1;

/// A file's metadata plus its direct and indirect block pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    pub length: i32,
    pub count: i16,
    pub flag: i16,
    pub direct: [i16; DIRECT_COUNT],
    pub indirect: i16,
}

impl Inode {
    /// A fresh, unattached inode: zero length, no opens, all pointers
    /// unassigned. `flag` is left at the caller's choice since both format
    /// (quirk: `FLAG_USED`) and hypothetical future callers may differ.
    pub fn fresh(flag: i16) -> Self {
        Self {
            length: 0,
            count: 0,
            flag,
            direct: [UNASSIGNED as i16; DIRECT_COUNT],
            indirect: UNASSIGNED as i16,
        }
    }

    fn decode(buf: &[u8]) -> Self {
        let mut direct = [0i16; DIRECT_COUNT];
        let length = read_i32_be(buf, 0);
        let count = read_i16_be(buf, 4);
        let flag = read_i16_be(buf, 6);
        for (i, slot) in direct.iter_mut().enumerate() {
            *slot = read_i16_be(buf, 8 + i * 2);
        }
        let indirect = read_i16_be(buf, 8 + DIRECT_COUNT * 2);
        Self {
            length,
            count,
            flag,
            direct,
            indirect,
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        write_i32_be(buf, 0, self.length);
        write_i16_be(buf, 4, self.count);
        write_i16_be(buf, 6, self.flag);
        for (i, slot) in self.direct.iter().enumerate() {
            write_i16_be(buf, 8 + i * 2, *slot);
        }
        write_i16_be(buf, 8 + DIRECT_COUNT * 2, self.indirect);
    }

    /// Reads the containing block and decodes the 32-byte slot for
    /// `inumber`.
    pub fn load(disk: &dyn Disk, inumber: u16) -> FsResult<Self> {
        let block = inode_block(inumber);
        let mut buf = [0u8; BLOCK_SIZE];
        disk.read_block(block, &mut buf);
        let off = inode_slot_offset(inumber);
        let inode = Self::decode(&buf[off..off + crate::layout::INODE_SIZE]);
        debug!("inode {inumber} loaded from block {block} (offset {off})");
        Ok(inode)
    }

    /// Read-modify-writes the containing block so the other 15 inodes
    /// sharing it are not clobbered.
    pub fn store(&self, disk: &dyn Disk, inumber: u16) -> FsResult<()> {
        let block = inode_block(inumber);
        let mut buf = [0u8; BLOCK_SIZE];
        disk.read_block(block, &mut buf);
        let off = inode_slot_offset(inumber);
        self.encode(&mut buf[off..off + crate::layout::INODE_SIZE]);
        disk.write_block(block, &buf);
        debug!("inode {inumber} stored to block {block} (offset {off})");
        Ok(())
    }

    /// Maps a byte offset to the block number holding it, or `UNASSIGNED`
    /// if no block has been assigned there yet.
    pub fn block_for_offset(&self, disk: &dyn Disk, off: i64) -> i32 {
        if off < DIRECT_RANGE {
            self.direct[(off / BLOCK_SIZE as i64) as usize] as i32
        } else if self.indirect as i32 != UNASSIGNED {
            let idx = ((off - DIRECT_RANGE) / BLOCK_SIZE as i64) as usize;
            let mut buf = [0u8; BLOCK_SIZE];
            disk.read_block(self.indirect as u32, &mut buf);
            read_i16_be(&buf, idx * 2) as i32
        } else {
            UNASSIGNED
        }
    }

    /// Assigns `block` as the block number responsible for `off`.
    ///
    /// For offsets in the indirect range, the indirect block must already
    /// be registered via [`Self::register_indirect`]; otherwise this
    /// returns [`FsError::IndirectNull`] so the write path can allocate and
    /// register one first.
    pub fn assign_block_for_offset(
        &mut self,
        disk: &dyn Disk,
        off: i64,
        block: i32,
    ) -> FsResult<()> {
        if off < DIRECT_RANGE {
            self.direct[(off / BLOCK_SIZE as i64) as usize] = block as i16;
            return Ok(());
        }
        if self.indirect as i32 == UNASSIGNED {
            return Err(FsError::IndirectNull);
        }
        let idx = ((off - DIRECT_RANGE) / BLOCK_SIZE as i64) as usize;
        let mut buf = [0u8; BLOCK_SIZE];
        disk.read_block(self.indirect as u32, &mut buf);
        write_i16_be(&mut buf, idx * 2, block as i16);
        disk.write_block(self.indirect as u32, &buf);
        Ok(())
    }

    /// Registers `block` as this inode's indirect block. Succeeds only
    /// when every direct slot is already assigned and no indirect block is
    /// registered yet — mirrors invariant I1. Does not initialize the
    /// indirect block's contents; the caller is responsible for that.
    pub fn register_indirect(&mut self, block: i32) -> bool {
        let all_direct_assigned = self.direct.iter().all(|&d| d as i32 != UNASSIGNED);
        if !all_direct_assigned || self.indirect as i32 != UNASSIGNED {
            return false;
        }
        self.indirect = block as i16;
        true
    }

    /// Reads the indirect block's current contents, zeros it on disk,
    /// clears the pointer, and returns the indirect block's own number
    /// alongside its old contents (one entry per pointer slot) so the
    /// caller can reclaim both the pointer targets and the indirect block
    /// itself.
    pub fn unregister_indirect(
        &mut self,
        disk: &dyn Disk,
    ) -> Option<(i32, [i16; POINTERS_PER_INDIRECT])> {
        if self.indirect as i32 == UNASSIGNED {
            return None;
        }
        let block = self.indirect as u32;
        let mut buf = [0u8; BLOCK_SIZE];
        disk.read_block(block, &mut buf);
        let mut old = [0i16; POINTERS_PER_INDIRECT];
        for (i, slot) in old.iter_mut().enumerate() {
            *slot = read_i16_be(&buf, i * 2);
        }
        disk.write_block(block, &[0u8; BLOCK_SIZE]);
        self.indirect = UNASSIGNED as i16;
        Some((block as i32, old))
    }
}
