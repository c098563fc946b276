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

//! Block 0 metadata: device geometry plus the head of the free-block list.
//!
//! The free list is a singly linked list threaded through the data blocks
//! themselves — the first four bytes of each free block hold the next free
//! block's number, and the tail stores [`UNASSIGNED`]. `get_free_block` and
//! `return_block` must run atomically with respect to each other since both
//! mutate `free_list_head` and touch the head block; this is enforced with
//! a single mutex guarding the superblock's state and its on-disk updates.

use crate::codec::{read_i32_be, write_i32_be};
use crate::disk::Disk;
use crate::error::FsResult;
use crate::inode::{Inode, FLAG_USED};
use crate::layout::{
    inode_table_blocks, BLOCK_SIZE, INODE_TABLE_START, SUPERBLOCK_BLOCK, UNASSIGNED,
};
use log::{debug, info};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy)]
struct State {
    total_blocks: u32,
    inode_blocks: u32,
    free_list_head: i32,
}

/// The process-wide superblock singleton.
pub struct SuperBlock {
    disk: Arc<dyn Disk>,
    state: Mutex<State>,
}

impl SuperBlock {
    /// Reads block 0 and accepts it if `total_blocks` matches the disk's
    /// actual size, `inode_blocks > 0`, and `free_list_head` lands past the
    /// inode table (invariant S1). Otherwise formats the device fresh with
    /// `default_inode_blocks` inodes.
    ///
    /// Returns the superblock alongside a flag telling the caller whether
    /// this call performed a fresh format: callers that also maintain
    /// derived state persisted through the file system (such as the root
    /// directory) need to know whether to rebuild that state from scratch
    /// or read it back from disk.
    pub fn new(disk: Arc<dyn Disk>, default_inode_blocks: u32) -> FsResult<(Self, bool)> {
        let mut buf = [0u8; BLOCK_SIZE];
        disk.read_block(SUPERBLOCK_BLOCK, &mut buf);
        let total_blocks = read_i32_be(&buf, 0) as u32;
        let inode_blocks = read_i32_be(&buf, 4) as u32;
        let free_list_head = read_i32_be(&buf, 8);
        let min_head = INODE_TABLE_START as i32 + inode_table_blocks(inode_blocks) as i32;
        let valid = total_blocks == disk.total_blocks()
            && inode_blocks > 0
            && (free_list_head == UNASSIGNED || free_list_head >= min_head);

        let sb = Self {
            state: Mutex::new(State {
                total_blocks: disk.total_blocks(),
                inode_blocks,
                free_list_head,
            }),
            disk,
        };
        let formatted = !valid;
        if valid {
            debug!(
                "superblock accepted: total_blocks={total_blocks} inode_blocks={inode_blocks} \
                 free_list_head={free_list_head}"
            );
        } else {
            info!("superblock invalid or absent, formatting with {default_inode_blocks} inodes");
            sb.format(default_inode_blocks)?;
        }
        Ok((sb, formatted))
    }

    /// Total number of blocks on the device.
    pub fn total_blocks(&self) -> u32 {
        self.state.lock().unwrap().total_blocks
    }

    /// Number of inumbers reserved in the inode table (historically named
    /// `inode_blocks` in the source this is modeled on; it is actually an
    /// inode *count*, not a block count — the number of disk blocks the
    /// inode table occupies is `inode_table_blocks(inode_blocks)`).
    pub fn inode_blocks(&self) -> u32 {
        self.state.lock().unwrap().inode_blocks
    }

    /// Writes the current fields to block 0.
    pub fn sync(&self) -> FsResult<()> {
        let state = self.state.lock().unwrap();
        self.write_locked(&state);
        self.disk.sync();
        Ok(())
    }

    fn write_locked(&self, state: &State) {
        let mut buf = [0u8; BLOCK_SIZE];
        write_i32_be(&mut buf, 0, state.total_blocks as i32);
        write_i32_be(&mut buf, 4, state.inode_blocks as i32);
        write_i32_be(&mut buf, 8, state.free_list_head);
        self.disk.write_block(SUPERBLOCK_BLOCK, &buf);
    }

    /// Formats the device: resets geometry, writes a fresh "unused" inode
    /// into every one of the `num_inodes` reserved slots, and re-threads
    /// the free list through the remaining data blocks.
    pub fn format(&self, num_inodes: u32) -> FsResult<()> {
        let total_blocks = self.disk.total_blocks();
        let free_list_head =
            INODE_TABLE_START as i32 + inode_table_blocks(num_inodes) as i32;
        {
            let mut state = self.state.lock().unwrap();
            state.total_blocks = total_blocks;
            state.inode_blocks = num_inodes;
            state.free_list_head = free_list_head;
            self.write_locked(&state);
        }

        // `flag = FLAG_USED` for every inode here, including unused ones:
        // this mirrors the source system's behavior even though it
        // contradicts the field's own "0 = unused" doc comment. See the
        // design notes for why this quirk is preserved rather than fixed.
        let blank = Inode::fresh(FLAG_USED);
        for inumber in 0..num_inodes {
            blank.store(&*self.disk, inumber as u16)?;
        }

        for block in free_list_head as u32..total_blocks {
            let next = if block + 1 < total_blocks {
                (block + 1) as i32
            } else {
                UNASSIGNED
            };
            let mut buf = [0u8; BLOCK_SIZE];
            write_i32_be(&mut buf, 0, next);
            self.disk.write_block(block, &buf);
        }

        self.disk.sync();
        info!(
            "formatted: total_blocks={total_blocks} inode_blocks={num_inodes} \
             free_list_head={free_list_head}"
        );
        Ok(())
    }

    /// Pops and returns the head of the free list, or `UNASSIGNED` if the
    /// list is empty. Persists the updated head to block 0 before
    /// returning, under the same lock that reads it, so
    /// `get_free_block`/`return_block` are atomic with respect to each
    /// other.
    pub fn get_free_block(&self) -> FsResult<i32> {
        let mut state = self.state.lock().unwrap();
        if state.free_list_head == UNASSIGNED || state.free_list_head as u32 >= state.total_blocks
        {
            return Ok(UNASSIGNED);
        }
        let head = state.free_list_head as u32;
        let mut buf = [0u8; BLOCK_SIZE];
        self.disk.read_block(head, &mut buf);
        let next = read_i32_be(&buf, 0);
        state.free_list_head = next;
        self.write_locked(&state);
        debug!("get_free_block: allocated {head}, new head {next}");
        Ok(head as i32)
    }

    /// Pushes `block` onto the head of the free list. Returns `false` (no
    /// mutation) if `block` is out of `[0, total_blocks)`.
    pub fn return_block(&self, block: i32) -> FsResult<bool> {
        let mut state = self.state.lock().unwrap();
        if block < 0 || block as u32 >= state.total_blocks {
            return Ok(false);
        }
        let mut buf = [0u8; BLOCK_SIZE];
        write_i32_be(&mut buf, 0, state.free_list_head);
        self.disk.write_block(block as u32, &buf);
        state.free_list_head = block;
        self.write_locked(&state);
        debug!("return_block: freed {block}, new head {block}");
        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::disk::MemDisk;

    fn fresh(total_blocks: u32, inode_count: u32) -> SuperBlock {
        let disk: Arc<dyn Disk> = Arc::new(MemDisk::new(total_blocks));
        let (sb, formatted) = SuperBlock::new(disk, inode_count).unwrap();
        assert!(formatted);
        sb
    }

    #[test]
    fn format_computes_expected_geometry() {
        let sb = fresh(1000, 64);
        assert_eq!(sb.total_blocks(), 1000);
        assert_eq!(sb.inode_blocks(), 64);
        assert_eq!(
            sb.state.lock().unwrap().free_list_head,
            1 + inode_table_blocks(64) as i32
        );
        assert_eq!(sb.state.lock().unwrap().free_list_head, 5);
    }

    #[test]
    fn free_list_threads_through_last_blocks() {
        let disk = Arc::new(MemDisk::new(1000));
        let (sb, _) = SuperBlock::new(disk.clone(), 64).unwrap();
        let mut buf = [0u8; BLOCK_SIZE];
        disk.read_block(999, &mut buf);
        assert_eq!(read_i32_be(&buf, 0), UNASSIGNED);
        disk.read_block(5, &mut buf);
        assert_eq!(read_i32_be(&buf, 0), 6);
        let _ = sb;
    }

    #[test]
    fn free_block_count_tracks_allocations_and_returns() {
        let sb = fresh(20, 1);
        let free_start = sb.state.lock().unwrap().free_list_head;
        let mut allocated = Vec::new();
        loop {
            let b = sb.get_free_block().unwrap();
            if b == UNASSIGNED {
                break;
            }
            allocated.push(b);
        }
        assert_eq!(allocated.len(), (20 - free_start) as usize);
        for b in &allocated {
            assert!(sb.return_block(*b).unwrap());
        }
        let mut recovered = 0;
        while sb.get_free_block().unwrap() != UNASSIGNED {
            recovered += 1;
        }
        assert_eq!(recovered, allocated.len());
    }

    #[test]
    fn return_block_rejects_out_of_range() {
        let sb = fresh(20, 1);
        assert!(!sb.return_block(-1).unwrap());
        assert!(!sb.return_block(20).unwrap());
    }
}
