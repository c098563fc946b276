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

//! The simulated block device the rest of the crate is built on top of.
//!
//! This is deliberately outside the core's correctness surface (see the
//! spec's PURPOSE & SCOPE): the file system only ever consumes the [`Disk`]
//! trait's blocking raw-read/raw-write primitives, never the storage
//! details behind them.

use crate::layout::BLOCK_SIZE;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Mutex;

/// A fixed-size array of fixed-size blocks with blocking raw read/write.
///
/// Every disk operation is blocking and the disk serializes its own reads
/// and writes one at a time; implementations are expected to uphold that
/// even when shared across threads via `Arc<dyn Disk>`.
pub trait Disk: Send + Sync {
    /// Total number of addressable blocks.
    fn total_blocks(&self) -> u32;

    /// Reads block `block` into `buf`. Panics if `block` is out of range:
    /// the layers above are responsible for only ever addressing blocks
    /// within `[0, total_blocks())`.
    fn read_block(&self, block: u32, buf: &mut [u8; BLOCK_SIZE]);

    /// Writes `buf` to block `block`. Panics if `block` is out of range.
    fn write_block(&self, block: u32, buf: &[u8; BLOCK_SIZE]);

    /// Flushes any buffering down to the backing storage.
    fn sync(&self);
}

/// An in-memory disk, zero-filled on creation. Used by tests and by callers
/// that don't need persistence across process restarts.
pub struct MemDisk {
    blocks: Mutex<Vec<[u8; BLOCK_SIZE]>>,
}

impl MemDisk {
    /// Creates a zero-filled disk of `total_blocks` blocks.
    pub fn new(total_blocks: u32) -> Self {
        Self {
            blocks: Mutex::new(vec![[0u8; BLOCK_SIZE]; total_blocks as usize]),
        }
    }
}

impl Disk for MemDisk {
    fn total_blocks(&self) -> u32 {
        self.blocks.lock().unwrap().len() as u32
    }

    fn read_block(&self, block: u32, buf: &mut [u8; BLOCK_SIZE]) {
        let blocks = self.blocks.lock().unwrap();
        buf.copy_from_slice(&blocks[block as usize]);
    }

    fn write_block(&self, block: u32, buf: &[u8; BLOCK_SIZE]) {
        let mut blocks = self.blocks.lock().unwrap();
        blocks[block as usize].copy_from_slice(buf);
    }

    fn sync(&self) {}
}

/// A disk backed by a regular file, for best-effort persistence across
/// process restarts. The file is a byte-exact image of the simulated
/// device: `total_blocks * BLOCK_SIZE` bytes, no header beyond the in-band
/// superblock the file system itself writes at block 0.
pub struct FileDisk {
    file: Mutex<File>,
    total_blocks: u32,
}

impl FileDisk {
    /// Creates a new backing file at `path`, truncating it if it exists,
    /// and zero-extends it to `total_blocks * BLOCK_SIZE` bytes.
    pub fn create(path: impl AsRef<Path>, total_blocks: u32) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(total_blocks as u64 * BLOCK_SIZE as u64)?;
        Ok(Self {
            file: Mutex::new(file),
            total_blocks,
        })
    }

    /// Opens an existing backing file at `path`. Errors if its size does
    /// not exactly match `total_blocks * BLOCK_SIZE`.
    pub fn open(path: impl AsRef<Path>, total_blocks: u32) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let expected = total_blocks as u64 * BLOCK_SIZE as u64;
        let actual = file.metadata()?.len();
        if actual != expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("disk image is {actual} bytes, expected {expected}"),
            ));
        }
        Ok(Self {
            file: Mutex::new(file),
            total_blocks,
        })
    }
}

impl Disk for FileDisk {
    fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    fn read_block(&self, block: u32, buf: &mut [u8; BLOCK_SIZE]) {
        assert!(block < self.total_blocks, "block {block} out of range");
        let file = self.file.lock().unwrap();
        file.read_exact_at(buf, block as u64 * BLOCK_SIZE as u64)
            .expect("disk read failed");
    }

    fn write_block(&self, block: u32, buf: &[u8; BLOCK_SIZE]) {
        assert!(block < self.total_blocks, "block {block} out of range");
        let file = self.file.lock().unwrap();
        file.write_all_at(buf, block as u64 * BLOCK_SIZE as u64)
            .expect("disk write failed");
    }

    fn sync(&self) {
        let file = self.file.lock().unwrap();
        let _ = file.sync_data();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mem_disk_round_trips() {
        let disk = MemDisk::new(4);
        let mut buf = [0x41u8; BLOCK_SIZE];
        disk.write_block(2, &buf);
        buf = [0u8; BLOCK_SIZE];
        disk.read_block(2, &mut buf);
        assert_eq!(buf, [0x41u8; BLOCK_SIZE]);
    }

    #[test]
    fn file_disk_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        {
            let disk = FileDisk::create(&path, 4).unwrap();
            let buf = [0x7au8; BLOCK_SIZE];
            disk.write_block(1, &buf);
            disk.sync();
        }
        let disk = FileDisk::open(&path, 4).unwrap();
        let mut buf = [0u8; BLOCK_SIZE];
        disk.read_block(1, &mut buf);
        assert_eq!(buf, [0x7au8; BLOCK_SIZE]);
    }

    #[test]
    fn file_disk_rejects_wrong_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        FileDisk::create(&path, 4).unwrap();
        assert!(FileDisk::open(&path, 8).is_err());
    }
}
