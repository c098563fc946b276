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

//! The public facade: `open`/`read`/`write`/`seek`/`close`/`delete`/`format`/
//! `sync`, built on top of the superblock, directory, inode, and file-table
//! layers. This is the only layer that manufactures the sentinel values
//! (`-1`, `false`, `None`) the public API surface promises; everything
//! below it propagates a typed [`FsError`] with `?`.

use crate::directory::Directory;
use crate::disk::Disk;
use crate::error::{FsError, FsResult};
use crate::file_table::{FileTable, FileTableEntry, Mode, DEFAULT_WAIT};
use crate::inode::Inode;
use crate::layout::{
    BLOCK_SIZE, DIRECT_COUNT, DIRECT_RANGE, POINTERS_PER_INDIRECT, ROOT_INUMBER, UNASSIGNED,
};
use crate::superblock::SuperBlock;
use log::info;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// An open-file handle returned by [`FileSystem::open`].
pub type FileHandle = Arc<FileTableEntry>;

/// The three origins `seek` measures its offset from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// SEEK_SET: offset from the start of the file.
    Set = 0,
    /// SEEK_CUR: offset from the current position.
    Cur = 1,
    /// SEEK_END: offset from the end of the file.
    End = 2,
}

impl Whence {
    /// Parses the public `whence` values 0/1/2.
    pub fn from_i32(v: i32) -> FsResult<Self> {
        match v {
            0 => Ok(Whence::Set),
            1 => Ok(Whence::Cur),
            2 => Ok(Whence::End),
            other => Err(FsError::InvalidArgument(format!("unknown whence {other}"))),
        }
    }
}

/// The public facade tying the superblock, directory, and file table
/// together over a [`Disk`].
pub struct FileSystem {
    disk: Arc<dyn Disk>,
    superblock: SuperBlock,
    directory: Mutex<Directory>,
    file_table: FileTable,
    wait_timeout: Duration,
}

impl FileSystem {
    /// Mounts `disk`: validates (or formats, with `default_inode_blocks`
    /// inodes) the superblock, then reconstructs the root directory either
    /// by reading it back from inode 0 or, on a fresh format, by building
    /// an empty one and persisting it.
    pub fn new(disk: Arc<dyn Disk>, default_inode_blocks: u32) -> FsResult<Self> {
        let (superblock, formatted) = SuperBlock::new(disk.clone(), default_inode_blocks)?;
        let capacity = superblock.inode_blocks();
        let directory = if formatted {
            Directory::new(capacity)
        } else {
            let inode = Inode::load(&*disk, ROOT_INUMBER)?;
            let bytes = Self::read_whole(&*disk, &inode)?;
            Directory::from_bytes(capacity, &bytes)
        };
        let fs = Self {
            disk,
            superblock,
            directory: Mutex::new(directory),
            file_table: FileTable::new(),
            wait_timeout: DEFAULT_WAIT,
        };
        if formatted {
            fs.persist_directory()?;
        }
        Ok(fs)
    }

    /// Overrides how long a caller will wait for mode contention or
    /// quiescence before giving up. Mostly useful for tests.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    fn read_whole(disk: &dyn Disk, inode: &Inode) -> FsResult<Vec<u8>> {
        let mut out = vec![0u8; inode.length as usize];
        let mut pos = 0i64;
        while pos < inode.length as i64 {
            let block_num = inode.block_for_offset(disk, pos);
            if block_num == UNASSIGNED {
                break;
            }
            let block_off = (pos % BLOCK_SIZE as i64) as usize;
            let n = (BLOCK_SIZE - block_off).min(out.len() - pos as usize);
            let mut buf = [0u8; BLOCK_SIZE];
            disk.read_block(block_num as u32, &mut buf);
            out[pos as usize..pos as usize + n].copy_from_slice(&buf[block_off..block_off + n]);
            pos += n as i64;
        }
        Ok(out)
    }

    /// Blocks until the file system is quiescent, reformats the device
    /// with `num_files` inumbers, and replaces the in-memory directory and
    /// file table with fresh ones.
    pub fn format(&self, num_files: u32) -> FsResult<()> {
        self.file_table.wait_until_empty_and_reset(self.wait_timeout)?;
        self.superblock.format(num_files)?;
        {
            let mut dir = self.directory.lock().unwrap();
            *dir = Directory::new(num_files);
        }
        self.persist_directory()?;
        info!("format({num_files}) complete");
        Ok(())
    }

    fn persist_directory(&self) -> FsResult<()> {
        let bytes = self.directory.lock().unwrap().to_bytes();
        let entry = self
            .open_mode("/", Mode::Write)?
            .ok_or(FsError::NotFound)?;
        let written = self.write_inner(&entry, &bytes)?;
        if written as usize != bytes.len() {
            return Err(FsError::NoSpace);
        }
        self.close_inner(&entry)?;
        Ok(())
    }

    /// Resolves `name` under `mode` (creating it if the mode permits and
    /// it does not exist) and, for `"w"`, truncates it. Returns `None`
    /// only for a read of a file that does not exist.
    pub fn open(&self, name: &str, mode: &str) -> FsResult<Option<FileHandle>> {
        self.open_mode(name, Mode::parse(mode)?)
    }

    fn open_mode(&self, name: &str, mode: Mode) -> FsResult<Option<FileHandle>> {
        if name.is_empty() {
            return Err(FsError::InvalidArgument("empty name".into()));
        }
        let entry = match self
            .file_table
            .falloc(&self.directory, &*self.disk, name, mode, self.wait_timeout)?
        {
            Some(entry) => entry,
            None => return Ok(None),
        };
        if mode == Mode::Write {
            self.truncate(&entry)?;
        }
        Ok(Some(entry))
    }

    fn truncate(&self, entry: &FileHandle) -> FsResult<()> {
        let mut inner = entry.lock();
        for slot in 0..DIRECT_COUNT {
            let block = inner.inode.direct[slot] as i32;
            if block != UNASSIGNED {
                self.superblock.return_block(block)?;
                inner.inode.direct[slot] = UNASSIGNED as i16;
            }
        }
        if let Some((indirect_block, old)) = inner.inode.unregister_indirect(&*self.disk) {
            for &block in old.iter() {
                if block as i32 != UNASSIGNED {
                    self.superblock.return_block(block as i32)?;
                }
            }
            self.superblock.return_block(indirect_block)?;
        }
        inner.inode.length = 0;
        inner.seek_ptr = 0;
        inner.inode.store(&*self.disk, entry.inumber())?;
        Ok(())
    }

    /// Persists the entry's inode and releases it.
    pub fn close(&self, entry: &FileHandle) -> bool {
        crate::error::bool_or_sentinel(self.close_inner(entry))
    }

    fn close_inner(&self, entry: &FileHandle) -> FsResult<bool> {
        {
            let inner = entry.lock();
            inner.inode.store(&*self.disk, entry.inumber())?;
        }
        self.file_table.ffree(entry, &*self.disk)
    }

    /// The file's current length in bytes.
    pub fn fsize(&self, entry: &FileHandle) -> i32 {
        entry.lock().inode.length
    }

    /// Reads up to `buf.len()` bytes from `entry`'s current position,
    /// stopping early at the first unassigned block (short read) or at
    /// end of file. Returns `-1` if `entry`'s mode does not permit reads.
    pub fn read(&self, entry: &FileHandle, buf: &mut [u8]) -> i32 {
        crate::error::count_or_sentinel(self.read_inner(entry, buf))
    }

    fn read_inner(&self, entry: &FileHandle, buf: &mut [u8]) -> FsResult<i32> {
        if !entry.mode().allows_read() {
            return Err(FsError::InvalidArgument("mode does not allow read".into()));
        }
        let mut inner = entry.lock();
        let length = inner.inode.length as i64;
        let mut total = 0usize;
        let mut pos = inner.seek_ptr;
        while total < buf.len() && pos < length {
            let block_num = inner.inode.block_for_offset(&*self.disk, pos);
            if block_num == UNASSIGNED {
                break;
            }
            let block_off = (pos % BLOCK_SIZE as i64) as usize;
            let n = (BLOCK_SIZE - block_off)
                .min((length - pos) as usize)
                .min(buf.len() - total);
            let mut block_buf = [0u8; BLOCK_SIZE];
            self.disk.read_block(block_num as u32, &mut block_buf);
            buf[total..total + n].copy_from_slice(&block_buf[block_off..block_off + n]);
            total += n;
            pos += n as i64;
        }
        inner.seek_ptr = pos;
        Ok(total as i32)
    }

    /// Writes `buf` to `entry` starting at its current position (or at
    /// end of file, for append mode), allocating blocks as needed and
    /// looping until the buffer is drained or allocation fails. Returns
    /// the number of bytes actually written, or `-1` if nothing could be
    /// written (wrong mode, or allocation exhaustion on the first block).
    pub fn write(&self, entry: &FileHandle, buf: &[u8]) -> i32 {
        crate::error::count_or_sentinel(self.write_inner(entry, buf))
    }

    fn write_inner(&self, entry: &FileHandle, buf: &[u8]) -> FsResult<i32> {
        if !entry.mode().allows_write() {
            return Err(FsError::InvalidArgument("mode does not allow write".into()));
        }
        let mut inner = entry.lock();
        if entry.mode() == Mode::Append {
            inner.seek_ptr = inner.inode.length as i64;
        }
        let mut total = 0usize;
        let mut pos = inner.seek_ptr;
        while total < buf.len() {
            let block_off = (pos % BLOCK_SIZE as i64) as usize;
            let n = (BLOCK_SIZE - block_off).min(buf.len() - total);
            let block_num = match self.ensure_block(&mut inner.inode, pos)? {
                Some(block) => block,
                None => break,
            };
            let mut block_buf = [0u8; BLOCK_SIZE];
            if n < BLOCK_SIZE {
                self.disk.read_block(block_num, &mut block_buf);
            }
            block_buf[block_off..block_off + n].copy_from_slice(&buf[total..total + n]);
            self.disk.write_block(block_num, &block_buf);
            total += n;
            pos += n as i64;
            if pos > inner.inode.length as i64 {
                inner.inode.length = pos as i32;
            }
        }
        inner.seek_ptr = pos;
        inner.inode.store(&*self.disk, entry.inumber())?;
        if total == 0 && !buf.is_empty() {
            return Err(FsError::NoSpace);
        }
        Ok(total as i32)
    }

    /// Returns the block number backing offset `off`, allocating (and, for
    /// the indirect range, registering) one if necessary. `Ok(None)` means
    /// the free list is exhausted.
    fn ensure_block(&self, inode: &mut Inode, off: i64) -> FsResult<Option<u32>> {
        let existing = inode.block_for_offset(&*self.disk, off);
        if existing != UNASSIGNED {
            return Ok(Some(existing as u32));
        }
        if off >= DIRECT_RANGE && inode.indirect as i32 == UNASSIGNED {
            let indirect_block = self.superblock.get_free_block()?;
            if indirect_block == UNASSIGNED {
                return Ok(None);
            }
            if !inode.register_indirect(indirect_block) {
                self.superblock.return_block(indirect_block)?;
                return Err(FsError::IndirectNull);
            }
            // Every slot starts UNASSIGNED (-1), not zero: zero is block 0,
            // a real (super)block number, and would masquerade as "already
            // assigned" to the next read of an unpopulated slot.
            let mut blank = [0u8; BLOCK_SIZE];
            for i in 0..POINTERS_PER_INDIRECT {
                blank[i * 2..i * 2 + 2].copy_from_slice(&(UNASSIGNED as i16).to_be_bytes());
            }
            self.disk.write_block(indirect_block as u32, &blank);
        }
        let new_block = self.superblock.get_free_block()?;
        if new_block == UNASSIGNED {
            return Ok(None);
        }
        match inode.assign_block_for_offset(&*self.disk, off, new_block) {
            Ok(()) => Ok(Some(new_block as u32)),
            Err(e) => {
                self.superblock.return_block(new_block)?;
                Err(e)
            }
        }
    }

    /// Repositions `entry`'s offset, clamped to `[0, length]`. Seeking
    /// cannot extend the file; a subsequent write still proceeds from
    /// wherever it lands.
    pub fn seek(&self, entry: &FileHandle, offset: i64, whence: Whence) -> i64 {
        let mut inner = entry.lock();
        let length = inner.inode.length as i64;
        let raw = match whence {
            Whence::Set => offset,
            Whence::Cur => inner.seek_ptr + offset,
            Whence::End => length + offset,
        };
        let clamped = raw.clamp(0, length);
        inner.seek_ptr = clamped;
        clamped
    }

    /// Removes `name` from the directory. Does **not** reclaim the file's
    /// data blocks back to the free list — a known leak in the system
    /// this crate is modeled on, preserved here rather than silently
    /// fixed (see the design notes).
    pub fn delete(&self, name: &str) -> bool {
        crate::error::bool_or_sentinel(self.delete_inner(name))
    }

    fn delete_inner(&self, name: &str) -> FsResult<bool> {
        if name.is_empty() {
            return Ok(false);
        }
        let mut dir = self.directory.lock().unwrap();
        let inumber = dir.namei(name);
        if inumber < 0 {
            return Ok(false);
        }
        Ok(dir.ifree(inumber))
    }

    /// Lists every currently allocated (inumber, name) pair, including the
    /// root directory's own "/" entry. Used by the ambient shell's `ls`.
    pub fn list(&self) -> Vec<(i32, String)> {
        self.directory.lock().unwrap().entries()
    }

    /// Persists the directory and the superblock to disk.
    pub fn sync(&self) -> bool {
        self.sync_inner().is_ok()
    }

    fn sync_inner(&self) -> FsResult<()> {
        self.persist_directory()?;
        self.superblock.sync()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::disk::MemDisk;

    fn fs(total_blocks: u32, inode_blocks: u32) -> FileSystem {
        let disk: Arc<dyn Disk> = Arc::new(MemDisk::new(total_blocks));
        FileSystem::new(disk, inode_blocks).unwrap()
    }

    /// Scenario 2: write 512 bytes of 0x41, close, reopen for read, read
    /// them back unchanged.
    #[test]
    fn write_then_read_round_trips() {
        let fs = fs(64, 8);
        let entry = fs.open("a.txt", "w").unwrap().unwrap();
        let payload = [0x41u8; 512];
        assert_eq!(fs.write(&entry, &payload), 512);
        assert!(fs.close(&entry));

        let entry = fs.open("a.txt", "r").unwrap().unwrap();
        let mut buf = [0u8; 512];
        assert_eq!(fs.read(&entry, &mut buf), 512);
        assert_eq!(buf, payload);
        assert!(fs.close(&entry));
    }

    /// Scenario 3: a write spanning direct and indirect ranges assigns
    /// both, and the length reflects the whole write.
    #[test]
    fn large_write_spans_indirect_block() {
        let fs = fs(400, 8);
        let entry = fs.open("big", "w").unwrap().unwrap();
        let len = DIRECT_COUNT * BLOCK_SIZE + 1;
        let payload = vec![0x5au8; len];
        assert_eq!(fs.write(&entry, &payload) as usize, len);
        {
            let inner = entry.lock();
            assert!(inner.inode.direct.iter().all(|&d| d as i32 != UNASSIGNED));
            assert_ne!(inner.inode.indirect as i32, UNASSIGNED);
            assert_eq!(inner.inode.length as usize, len);
        }
        assert!(fs.close(&entry));
    }

    /// Scenario 4: reopening a file in "w" mode truncates it back to
    /// zero length and returns its blocks to the free list.
    #[test]
    fn reopening_for_write_truncates() {
        let fs = fs(64, 8);
        let entry = fs.open("x", "w").unwrap().unwrap();
        fs.write(&entry, &[1u8; 100]);
        assert!(fs.close(&entry));

        let entry = fs.open("x", "w").unwrap().unwrap();
        assert_eq!(fs.fsize(&entry), 0);
        {
            let inner = entry.lock();
            assert!(inner.inode.direct.iter().all(|&d| d as i32 == UNASSIGNED));
        }
        assert!(fs.close(&entry));
    }

    /// A file that grew past the direct range registers an indirect
    /// block; reopening for "w" must reclaim that indirect block itself,
    /// not just the 256 pointer slots inside it, or every such cycle
    /// leaks one block.
    #[test]
    fn truncate_after_indirect_write_reclaims_the_indirect_block() {
        let filesystem = fs(400, 8);
        let entry = filesystem.open("big", "w").unwrap().unwrap();
        let len = DIRECT_COUNT * BLOCK_SIZE + 1;
        filesystem.write(&entry, &vec![0x5au8; len]);
        assert!(filesystem.close(&entry));

        let entry = filesystem.open("big", "w").unwrap().unwrap();
        assert_eq!(filesystem.fsize(&entry), 0);
        {
            let inner = entry.lock();
            assert!(inner.inode.direct.iter().all(|&d| d as i32 == UNASSIGNED));
            assert_eq!(inner.inode.indirect as i32, UNASSIGNED);
        }
        assert!(filesystem.close(&entry));

        let mut reclaimed = 0;
        while filesystem.superblock.get_free_block().unwrap() != UNASSIGNED {
            reclaimed += 1;
        }

        let baseline = fs(400, 8);
        let mut expected = 0;
        while baseline.superblock.get_free_block().unwrap() != UNASSIGNED {
            expected += 1;
        }
        assert_eq!(reclaimed, expected);
    }

    /// Scenario 5: deleting a file that does not exist reports failure
    /// and leaves the directory untouched.
    #[test]
    fn delete_nonexistent_file_fails() {
        let fs = fs(64, 8);
        assert!(!fs.delete("ghost"));
    }

    /// Scenario 6: SEEK_SET then a negative SEEK_CUR nets out correctly,
    /// clamped within the file's bounds.
    #[test]
    fn seek_set_then_relative_cur() {
        let fs = fs(64, 8);
        let entry = fs.open("f", "w").unwrap().unwrap();
        fs.write(&entry, &[0u8; 100]);
        assert_eq!(fs.seek(&entry, 10, Whence::Set), 10);
        assert_eq!(fs.seek(&entry, -5, Whence::Cur), 5);
        assert!(fs.close(&entry));
    }

    #[test]
    fn seek_clamps_to_file_bounds() {
        let fs = fs(64, 8);
        let entry = fs.open("f", "w").unwrap().unwrap();
        fs.write(&entry, &[0u8; 10]);
        assert_eq!(fs.seek(&entry, 1000, Whence::Set), 10);
        assert_eq!(fs.seek(&entry, -1000, Whence::Set), 0);
        assert!(fs.close(&entry));
    }

    #[test]
    fn read_rejects_write_only_handle() {
        let fs = fs(64, 8);
        let entry = fs.open("f", "w").unwrap().unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(fs.read(&entry, &mut buf), -1);
        assert!(fs.close(&entry));
    }

    #[test]
    fn write_rejects_read_only_handle() {
        let fs = fs(64, 8);
        let entry = fs.open("f", "w").unwrap().unwrap();
        assert!(fs.close(&entry));
        let entry = fs.open("f", "r").unwrap().unwrap();
        assert_eq!(fs.write(&entry, b"x"), -1);
        assert!(fs.close(&entry));
    }

    #[test]
    fn append_mode_always_writes_past_current_length() {
        let fs = fs(64, 8);
        let entry = fs.open("f", "w").unwrap().unwrap();
        fs.write(&entry, b"hello");
        assert!(fs.close(&entry));

        let entry = fs.open("f", "a").unwrap().unwrap();
        fs.write(&entry, b" world");
        assert!(fs.close(&entry));

        let entry = fs.open("f", "r").unwrap().unwrap();
        let mut buf = [0u8; 11];
        assert_eq!(fs.read(&entry, &mut buf), 11);
        assert_eq!(&buf, b"hello world");
        assert!(fs.close(&entry));
    }

    #[test]
    fn reading_past_eof_is_a_short_read() {
        let fs = fs(64, 8);
        let entry = fs.open("f", "w").unwrap().unwrap();
        fs.write(&entry, b"hi");
        assert!(fs.close(&entry));

        let entry = fs.open("f", "r").unwrap().unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(fs.read(&entry, &mut buf), 2);
        assert!(fs.close(&entry));
    }

    #[test]
    fn directory_survives_a_remount() {
        let disk: Arc<dyn Disk> = Arc::new(MemDisk::new(256));
        {
            let fs = FileSystem::new(disk.clone(), 16).unwrap();
            let entry = fs.open("persisted", "w").unwrap().unwrap();
            fs.write(&entry, b"state");
            assert!(fs.close(&entry));
            assert!(fs.sync());
        }
        let fs = FileSystem::new(disk, 16).unwrap();
        let entry = fs.open("persisted", "r").unwrap().unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(fs.read(&entry, &mut buf), 5);
        assert_eq!(&buf, b"state");
        assert!(fs.close(&entry));
    }

    #[test]
    fn format_resets_existing_content() {
        let fs = fs(64, 8);
        let entry = fs.open("f", "w").unwrap().unwrap();
        fs.write(&entry, b"data");
        assert!(fs.close(&entry));

        fs.format(8).unwrap();
        assert!(fs.open("f", "r").unwrap().is_none());
    }
}
