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

//! In-memory open-file handles and the registry that coordinates them.
//!
//! [`FileTableEntry`] is the per-open handle: inumber, pinned inode,
//! current offset, and access mode. [`FileTable`] is the process-wide
//! singleton that grants and releases them, enforcing that only one
//! writer (or any number of readers) may hold a given inode at a time. A
//! requesting writer waits on [`FileTable`]'s condition variable until no
//! conflicting access remains, up to a bounded timeout.

use crate::directory::Directory;
use crate::disk::Disk;
use crate::error::{FsError, FsResult};
use crate::inode::Inode;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// The access mode a file was opened with, mirroring "r"/"w"/"w+"/"a".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
    ReadWrite,
    Append,
}

impl Mode {
    /// Parses the public mode strings: "r", "w", "w+", "a".
    pub fn parse(s: &str) -> FsResult<Self> {
        match s {
            "r" => Ok(Mode::Read),
            "w" => Ok(Mode::Write),
            "w+" => Ok(Mode::ReadWrite),
            "a" => Ok(Mode::Append),
            other => Err(FsError::InvalidArgument(format!("unknown mode {other:?}"))),
        }
    }

    /// Whether `read()` is permitted in this mode.
    pub fn allows_read(self) -> bool {
        matches!(self, Mode::Read | Mode::ReadWrite)
    }

    /// Whether `write()` is permitted in this mode.
    pub fn allows_write(self) -> bool {
        !matches!(self, Mode::Read)
    }

    /// Whether this mode requires exclusive access to the inode (as
    /// opposed to `Read`, which may be shared among readers).
    pub fn is_writer(self) -> bool {
        matches!(self, Mode::Write | Mode::ReadWrite | Mode::Append)
    }
}

pub(crate) struct EntryInner {
    pub inode: Inode,
    pub seek_ptr: i64,
}

/// A live open-file handle. Its own mutex serializes reads, writes, seeks,
/// and closes against each other; `inumber` and `mode` are fixed for the
/// entry's lifetime and need no locking.
pub struct FileTableEntry {
    inumber: u16,
    mode: Mode,
    inner: Mutex<EntryInner>,
}

impl FileTableEntry {
    pub fn inumber(&self) -> u16 {
        self.inumber
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EntryInner> {
        self.inner.lock().unwrap()
    }
}

#[derive(Default)]
struct InodeAccess {
    readers: u32,
    writer: bool,
}

struct TableState {
    entries: Vec<Arc<FileTableEntry>>,
    access: HashMap<u16, InodeAccess>,
}

/// Default bound on how long `falloc` waits for conflicting access to
/// clear before giving up with [`FsError::Timeout`].
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// The process-wide registry of open files.
pub struct FileTable {
    state: Mutex<TableState>,
    cond: Condvar,
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTable {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TableState {
                entries: Vec::new(),
                access: HashMap::new(),
            }),
            cond: Condvar::new(),
        }
    }

    /// True iff no entries are currently open. `format()` waits on this
    /// before touching the device.
    pub fn fempty(&self) -> bool {
        self.state.lock().unwrap().entries.is_empty()
    }

    /// Blocks until [`Self::fempty`] holds, then clears all bookkeeping so
    /// the table is ready to be reused after a reformat.
    pub fn wait_until_empty_and_reset(&self, timeout: Duration) -> FsResult<()> {
        let state = self.state.lock().unwrap();
        let (mut state, timed_out) = self
            .cond
            .wait_timeout_while(state, timeout, |s| !s.entries.is_empty())
            .unwrap();
        if timed_out.timed_out() && !state.entries.is_empty() {
            return Err(FsError::Timeout);
        }
        state.access.clear();
        Ok(())
    }

    /// Resolves `name` through `directory` (creating it if the mode
    /// permits and it does not yet exist), waits for any conflicting
    /// access to clear, and grants a new entry. Returns `Ok(None)` only
    /// for a read of a file that does not exist.
    pub fn falloc(
        &self,
        directory: &Mutex<Directory>,
        disk: &dyn Disk,
        name: &str,
        mode: Mode,
        timeout: Duration,
    ) -> FsResult<Option<Arc<FileTableEntry>>> {
        let inumber = {
            let mut dir = directory.lock().unwrap();
            let existing = dir.namei(name);
            if existing >= 0 {
                existing
            } else if mode.is_writer() {
                let created = dir.ialloc(name);
                if created < 0 {
                    return Err(FsError::NoSpace);
                }
                created
            } else {
                return Ok(None);
            }
        } as u16;

        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        let mut waited = false;
        loop {
            let conflict = state.access.get(&inumber).is_some_and(|access| {
                if mode.is_writer() {
                    access.writer || access.readers > 0
                } else {
                    access.writer
                }
            });
            if !conflict {
                break;
            }
            waited = true;
            warn!("falloc({name:?}, {mode:?}): waiting on inode {inumber} for exclusive access");
            let now = Instant::now();
            if now >= deadline {
                return Err(FsError::Timeout);
            }
            let (next_state, result) = self
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = next_state;
            if result.timed_out() {
                return Err(FsError::Timeout);
            }
        }

        let mut inode = Inode::load(disk, inumber)?;
        inode.count += 1;
        inode.store(disk, inumber)?;
        let seek_ptr = if mode == Mode::Append {
            inode.length as i64
        } else {
            0
        };
        let entry = Arc::new(FileTableEntry {
            inumber,
            mode,
            inner: Mutex::new(EntryInner { inode, seek_ptr }),
        });

        let access = state.access.entry(inumber).or_default();
        if mode.is_writer() {
            access.writer = true;
        } else {
            access.readers += 1;
        }
        state.entries.push(entry.clone());
        if waited {
            warn!("falloc({name:?}, {mode:?}): granted inumber {inumber} after waiting");
        } else {
            debug!("falloc({name:?}, {mode:?}) granted inumber {inumber}");
        }
        Ok(Some(entry))
    }

    /// Releases `entry`: decrements its inode's reference count, persists
    /// it, and wakes any threads waiting in [`Self::falloc`] or
    /// [`Self::wait_until_empty_and_reset`].
    pub fn ffree(&self, entry: &Arc<FileTableEntry>, disk: &dyn Disk) -> FsResult<bool> {
        let inumber = entry.inumber();
        {
            let mut inner = entry.lock();
            inner.inode.count -= 1;
            inner.inode.store(disk, inumber)?;
        }
        let mut state = self.state.lock().unwrap();
        if let Some(access) = state.access.get_mut(&inumber) {
            if entry.mode().is_writer() {
                access.writer = false;
            } else {
                access.readers = access.readers.saturating_sub(1);
            }
        }
        let before = state.entries.len();
        state.entries.retain(|e| !Arc::ptr_eq(e, entry));
        let removed = state.entries.len() != before;
        drop(state);
        self.cond.notify_all();
        debug!("ffree: released inumber {inumber}");
        Ok(removed)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::disk::MemDisk;
    use crate::superblock::SuperBlock;
    use std::time::Duration;

    fn setup() -> (Arc<dyn Disk>, Mutex<Directory>, SuperBlock) {
        let disk: Arc<dyn Disk> = Arc::new(MemDisk::new(64));
        let (sb, _) = SuperBlock::new(disk.clone(), 8).unwrap();
        (disk, Mutex::new(Directory::new(8)), sb)
    }

    #[test]
    fn write_open_creates_missing_file() {
        let (disk, dir, _sb) = setup();
        let table = FileTable::new();
        let entry = table
            .falloc(&dir, &*disk, "new.txt", Mode::Write, Duration::from_secs(1))
            .unwrap()
            .unwrap();
        assert!(dir.lock().unwrap().namei("new.txt") >= 0);
        assert!(table.ffree(&entry, &*disk).unwrap());
        assert!(table.fempty());
    }

    #[test]
    fn read_of_missing_file_returns_none() {
        let (disk, dir, _sb) = setup();
        let table = FileTable::new();
        let result = table
            .falloc(&dir, &*disk, "ghost", Mode::Read, Duration::from_secs(1))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn concurrent_readers_are_granted_together() {
        let (disk, dir, _sb) = setup();
        dir.lock().unwrap().ialloc("shared.txt");
        let table = FileTable::new();
        let a = table
            .falloc(&dir, &*disk, "shared.txt", Mode::Read, Duration::from_secs(1))
            .unwrap()
            .unwrap();
        let b = table
            .falloc(&dir, &*disk, "shared.txt", Mode::Read, Duration::from_secs(1))
            .unwrap()
            .unwrap();
        assert!(table.ffree(&a, &*disk).unwrap());
        assert!(table.ffree(&b, &*disk).unwrap());
    }

    #[test]
    fn writer_waits_for_reader_to_release() {
        let (disk, dir, _sb) = setup();
        dir.lock().unwrap().ialloc("shared.txt");
        let table = Arc::new(FileTable::new());
        let reader = table
            .falloc(&dir, &*disk, "shared.txt", Mode::Read, Duration::from_secs(1))
            .unwrap()
            .unwrap();
        let err = table
            .falloc(
                &dir,
                &*disk,
                "shared.txt",
                Mode::Write,
                Duration::from_millis(50),
            )
            .unwrap_err();
        assert!(matches!(err, FsError::Timeout));
        assert!(table.ffree(&reader, &*disk).unwrap());
        let writer = table
            .falloc(&dir, &*disk, "shared.txt", Mode::Write, Duration::from_secs(1))
            .unwrap()
            .unwrap();
        assert!(table.ffree(&writer, &*disk).unwrap());
    }
}
