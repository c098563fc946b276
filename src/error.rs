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

//! The error hierarchy shared by every layer of the file system.
//!
//! Internal layers propagate [`FsError`] with `?`; the [`crate::FileSystem`]
//! facade is the only place that flattens it back down to the sentinels
//! (`-1`, `false`, `None`) the public API surface promises.

use std::io;

/// Errors produced while navigating or mutating the file system.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// A caller-supplied argument was out of range or otherwise nonsensical:
    /// a negative/too-large inumber, an out-of-range block number, an empty
    /// name, or a mode that does not permit the requested operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The free-block list or the directory's inumber table is exhausted.
    #[error("no space left on device")]
    NoSpace,

    /// `assign_block_for_offset` was called at an indirect-range offset
    /// before the inode's indirect block was registered.
    #[error("indirect block not registered")]
    IndirectNull,

    /// The name does not resolve to any inumber in the directory.
    #[error("file not found")]
    NotFound,

    /// The disk backing this file system could not be read or written.
    #[error("disk I/O error: {0}")]
    Io(#[from] io::Error),

    /// A bounded mode-contention wait expired before the requested access
    /// could be granted.
    #[error("timed out waiting for exclusive access")]
    Timeout,
}

/// Convenience alias used throughout the crate.
pub type FsResult<T> = Result<T, FsError>;

/// Projects a fallible byte count onto the `-1`-on-error convention the
/// public `read`/`write` API uses.
pub fn count_or_sentinel(result: FsResult<i32>) -> i32 {
    result.unwrap_or(-1)
}

/// Projects a fallible boolean onto the `false`-on-error convention the
/// public `delete`/`close` API uses.
pub fn bool_or_sentinel(result: FsResult<bool>) -> bool {
    result.unwrap_or(false)
}
