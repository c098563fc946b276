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

//! The flat, root-only directory: a name-to-inumber table.
//!
//! Persisted as the contents of inode 0 (see [`crate::filesystem::FileSystem`]
//! for how it is written through the normal file-write path). In memory it
//! is a singleton guarded by a single mutex so `ialloc`/`ifree`/`namei` run
//! atomically with respect to each other.

use crate::codec::{read_u16_be, read_u32_be, write_u16_be, write_u32_be};
use crate::layout::{MAX_NAME_LEN, NAME_SLOT_BYTES, ROOT_INUMBER};

/// Name-to-inumber table rooted at "/".
///
/// Slot 0 is always reserved for "/"; slots `[1, capacity)` are available
/// to `ialloc`.
#[derive(Debug, Clone)]
pub struct Directory {
    used: Vec<bool>,
    name_len: Vec<u32>,
    names: Vec<[u16; MAX_NAME_LEN]>,
}

impl Directory {
    /// Creates a directory with `capacity` inumber slots. Slot 0 is
    /// initialized to "/"; every other slot starts unused.
    pub fn new(capacity: u32) -> Self {
        let capacity = capacity as usize;
        let mut dir = Self {
            used: vec![false; capacity],
            name_len: vec![0; capacity],
            names: vec![[0u16; MAX_NAME_LEN]; capacity],
        };
        if capacity > 0 {
            dir.write_slot(ROOT_INUMBER as usize, "/");
        }
        dir
    }

    /// Number of inumber slots this directory was built with.
    pub fn capacity(&self) -> u32 {
        self.used.len() as u32
    }

    fn write_slot(&mut self, slot: usize, name: &str) {
        let units: Vec<u16> = name.encode_utf16().take(MAX_NAME_LEN).collect();
        self.used[slot] = true;
        self.name_len[slot] = units.len() as u32;
        let mut fixed = [0u16; MAX_NAME_LEN];
        fixed[..units.len()].copy_from_slice(&units);
        self.names[slot] = fixed;
    }

    fn name_at(&self, slot: usize) -> String {
        let len = self.name_len[slot] as usize;
        String::from_utf16_lossy(&self.names[slot][..len])
    }

    /// Serializes as `capacity` 4-byte sizes followed by `capacity`
    /// fixed-width (2×[`MAX_NAME_LEN`]-byte) names.
    pub fn to_bytes(&self) -> Vec<u8> {
        let capacity = self.used.len();
        let mut buf = vec![0u8; capacity * 4 + capacity * NAME_SLOT_BYTES];
        for i in 0..capacity {
            let size = if self.used[i] { self.name_len[i] } else { 0 };
            write_u32_be(&mut buf, i * 4, size);
        }
        let names_off = capacity * 4;
        for i in 0..capacity {
            let slot_off = names_off + i * NAME_SLOT_BYTES;
            for (j, unit) in self.names[i].iter().enumerate() {
                write_u16_be(&mut buf, slot_off + j * 2, *unit);
            }
        }
        buf
    }

    /// Inverse of [`Self::to_bytes`] for a directory of `capacity` slots.
    pub fn from_bytes(capacity: u32, buf: &[u8]) -> Self {
        let capacity = capacity as usize;
        let mut name_len = vec![0u32; capacity];
        for (i, len) in name_len.iter_mut().enumerate() {
            *len = read_u32_be(buf, i * 4);
        }
        let names_off = capacity * 4;
        let mut names = vec![[0u16; MAX_NAME_LEN]; capacity];
        for (i, slot) in names.iter_mut().enumerate() {
            let slot_off = names_off + i * NAME_SLOT_BYTES;
            for (j, unit) in slot.iter_mut().enumerate() {
                *unit = read_u16_be(buf, slot_off + j * 2);
            }
        }
        let used = name_len.iter().map(|&len| len > 0).collect();
        Self {
            used,
            name_len,
            names,
        }
    }

    /// Allocates the lowest free inumber `>= 1`, truncating `name` to
    /// [`MAX_NAME_LEN`] code units. Returns `-1` if no slot is free.
    pub fn ialloc(&mut self, name: &str) -> i32 {
        let slot = (1..self.used.len()).find(|&i| !self.used[i]);
        match slot {
            Some(slot) => {
                self.write_slot(slot, name);
                slot as i32
            }
            None => -1,
        }
    }

    /// Frees inumber `i`. Returns `false` if `i` is out of range or
    /// already unused.
    pub fn ifree(&mut self, i: i32) -> bool {
        if i < 0 || i as usize >= self.used.len() || !self.used[i as usize] {
            return false;
        }
        let slot = i as usize;
        self.used[slot] = false;
        self.name_len[slot] = 0;
        self.names[slot] = [0u16; MAX_NAME_LEN];
        true
    }

    /// Linear scan by exact-string equality. Returns `-1` if not found.
    pub fn namei(&self, name: &str) -> i32 {
        for i in 0..self.used.len() {
            if self.used[i] && self.name_at(i) == name {
                return i as i32;
            }
        }
        -1
    }

    /// Every currently-used (inumber, name) pair, for listing. Not part of
    /// the core's correctness surface — used only by the ambient shell's
    /// `ls` command.
    pub fn entries(&self) -> Vec<(i32, String)> {
        (0..self.used.len())
            .filter(|&i| self.used[i])
            .map(|i| (i as i32, self.name_at(i)))
            .collect()
    }
}
