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

//! `blockfs-shell`: a minimal interactive front-end over [`blockfs::FileSystem`],
//! for exercising the stack end-to-end against a file-backed disk.

use blockfs::{Config, FileDisk, FileHandle, FileSystem, Whence};
use clap::Parser;
use log::error;
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "blockfs-shell", about = "Interactive shell over a blockfs device image")]
struct Args {
    /// Path to the backing disk image. Created if it does not exist.
    #[arg(long)]
    disk: Option<PathBuf>,

    /// Total number of blocks, used only when formatting a new image.
    #[arg(long)]
    total_blocks: Option<u32>,

    /// Number of reserved inumbers, used only when formatting a new image.
    #[arg(long)]
    inode_blocks: Option<u32>,

    /// TOML config file; CLI flags above still take precedence over it.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn resolve_config(args: &Args) -> io::Result<Config> {
    let mut config = match &args.config {
        Some(path) => blockfs::Config::from_file(path).map_err(io::Error::other)?,
        None => Config::default(),
    };
    if let Some(total_blocks) = args.total_blocks {
        config.total_blocks = total_blocks;
    }
    if let Some(inode_blocks) = args.inode_blocks {
        config.inode_blocks = inode_blocks;
    }
    if let Some(disk) = &args.disk {
        config.disk_path = Some(disk.clone());
    }
    Ok(config)
}

fn open_disk(config: &Config) -> io::Result<Arc<dyn blockfs::Disk>> {
    match &config.disk_path {
        Some(path) if path.exists() => {
            Ok(Arc::new(FileDisk::open(path, config.total_blocks)?))
        }
        Some(path) => Ok(Arc::new(FileDisk::create(path, config.total_blocks)?)),
        None => Ok(Arc::new(blockfs::MemDisk::new(config.total_blocks))),
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to resolve configuration: {e}");
            std::process::exit(1);
        }
    };

    let disk = match open_disk(&config) {
        Ok(disk) => disk,
        Err(e) => {
            error!("failed to open disk: {e}");
            std::process::exit(1);
        }
    };

    let fs = match FileSystem::new(disk, config.inode_blocks) {
        Ok(fs) => fs,
        Err(e) => {
            error!("failed to mount file system: {e}");
            std::process::exit(1);
        }
    };

    run(&fs);
}

fn run(fs: &FileSystem) {
    let mut handles: HashMap<String, FileHandle> = HashMap::new();
    let stdin = io::stdin();
    print!("blockfs> ");
    let _ = io::stdout().flush();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            ["quit"] | ["exit"] => break,
            ["format", n] => match n.parse::<u32>() {
                Ok(n) => match fs.format(n) {
                    Ok(()) => {
                        handles.clear();
                        println!("ok");
                    }
                    Err(e) => println!("error: {e}"),
                },
                Err(_) => println!("error: invalid file count"),
            },
            ["open", name, mode] => match fs.open(name, mode) {
                Ok(Some(entry)) => {
                    handles.insert((*name).to_string(), entry);
                    println!("ok");
                }
                Ok(None) => println!("not found"),
                Err(e) => println!("error: {e}"),
            },
            ["read", name, count] => match (handles.get(*name), count.parse::<usize>()) {
                (Some(entry), Ok(count)) => {
                    let mut buf = vec![0u8; count];
                    let n = fs.read(entry, &mut buf);
                    if n < 0 {
                        println!("error: read failed");
                    } else {
                        println!("{}", String::from_utf8_lossy(&buf[..n as usize]));
                    }
                }
                (None, _) => println!("error: {name} is not open"),
                (_, Err(_)) => println!("error: invalid count"),
            },
            ["write", name, rest @ ..] => match handles.get(*name) {
                Some(entry) => {
                    let payload = rest.join(" ");
                    let n = fs.write(entry, payload.as_bytes());
                    if n < 0 {
                        println!("error: write failed");
                    } else {
                        println!("wrote {n}");
                    }
                }
                None => println!("error: {name} is not open"),
            },
            ["seek", name, offset, whence] => {
                match (handles.get(*name), offset.parse::<i64>(), whence.parse::<i32>()) {
                    (Some(entry), Ok(offset), Ok(whence)) => match Whence::from_i32(whence) {
                        Ok(whence) => println!("{}", fs.seek(entry, offset, whence)),
                        Err(e) => println!("error: {e}"),
                    },
                    (None, _, _) => println!("error: {name} is not open"),
                    _ => println!("error: invalid offset or whence"),
                }
            }
            ["close", name] => match handles.remove(*name) {
                Some(entry) => println!("{}", fs.close(&entry)),
                None => println!("error: {name} is not open"),
            },
            ["delete", name] => println!("{}", fs.delete(name)),
            ["ls"] => {
                for (inumber, name) in fs.list() {
                    println!("{inumber}\t{name}");
                }
            }
            ["sync"] => println!("{}", fs.sync()),
            _ => println!("unknown command"),
        }
        print!("blockfs> ");
        let _ = io::stdout().flush();
    }
}
