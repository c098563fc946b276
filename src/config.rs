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

//! Device geometry configuration: built-in defaults, optionally overridden
//! by a TOML file. The CLI binary layers its own flags on top of this in
//! CLI > file > default precedence.

use crate::error::{FsError, FsResult};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Device geometry and backing-store location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub total_blocks: u32,
    pub inode_blocks: u32,
    pub disk_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            total_blocks: 1024,
            inode_blocks: 64,
            disk_path: None,
        }
    }
}

/// Mirrors [`Config`] but with every field optional, matching the TOML
/// file's "only override what you name" contract.
#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    total_blocks: Option<u32>,
    inode_blocks: Option<u32>,
    disk_path: Option<PathBuf>,
}

impl Config {
    /// Reads a TOML file with optional `total_blocks`, `inode_blocks`, and
    /// `disk_path` keys, falling back to [`Config::default`] for any key
    /// the file omits entirely.
    pub fn from_file(path: impl AsRef<Path>) -> FsResult<Self> {
        let text = fs::read_to_string(path)?;
        let raw: RawConfig = toml::from_str(&text)
            .map_err(|e| FsError::InvalidArgument(format!("invalid config: {e}")))?;
        let defaults = Config::default();
        Ok(Config {
            total_blocks: raw.total_blocks.unwrap_or(defaults.total_blocks),
            inode_blocks: raw.inode_blocks.unwrap_or(defaults.inode_blocks),
            disk_path: raw.disk_path.or(defaults.disk_path),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let config = Config::default();
        assert_eq!(config.total_blocks, 1024);
        assert_eq!(config.inode_blocks, 64);
        assert_eq!(config.disk_path, None);
    }

    /// Scenario 7: a file naming only `inode_blocks` leaves `total_blocks`
    /// at its default.
    #[test]
    fn from_file_fills_in_missing_keys_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blockfs.toml");
        fs::write(&path, "inode_blocks = 128\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.inode_blocks, 128);
        assert_eq!(config.total_blocks, Config::default().total_blocks);
        assert_eq!(config.disk_path, None);
    }

    #[test]
    fn from_file_reads_every_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blockfs.toml");
        fs::write(
            &path,
            "total_blocks = 2048\ninode_blocks = 256\ndisk_path = \"/tmp/blockfs.img\"\n",
        )
        .unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.total_blocks, 2048);
        assert_eq!(config.inode_blocks, 256);
        assert_eq!(config.disk_path, Some(PathBuf::from("/tmp/blockfs.img")));
    }

    #[test]
    fn from_file_rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blockfs.toml");
        fs::write(&path, "not valid toml = = =").unwrap();
        assert!(Config::from_file(&path).is_err());
    }
}
