//! # Volumes
//!
//! A volume is a directory of numbered round files plus the in-memory
//! index from file id to [`File`]. Opening a volume enumerates the
//! directory, maps every round, and replays each round's blocks (in
//! round order, then slot order) into the files map. Because blocks are
//! allocated strictly left to right across rounds, that replay order is
//! global write order, which is what lets the file layer promote the
//! previous write frontier correctly while loading.
//!
//! ## Directory Layout
//!
//! ```text
//! volume_dir/
//! ├── 0        # round 0, (round_size / block_size) * (block_size + 128) bytes
//! ├── 1        # round 1, same size
//! └── …
//! ```
//!
//! Round indices must be exactly `0..n`; a gap means the volume was
//! tampered with and the open fails. Subdirectories are tolerated and
//! ignored; any other stray entry is an error.
//!
//! ## Locking
//!
//! The volume carries two locks: one over the rounds vector (held across
//! block allocation, which may append a round) and one over the files
//! map (lazy file creation). Reads and writes that do not allocate touch
//! neither; they go straight to the owning round.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};
use hashbrown::HashMap;
use log::debug;
use parking_lot::RwLock;

use super::file::File;
use super::round::Round;
use crate::Error;

/// Default block payload size: 1 MiB.
pub const DEFAULT_BLOCK_SIZE: u32 = 1 << 20;

/// Default logical round size: 1 GiB of payload.
pub const DEFAULT_ROUND_SIZE: u64 = 1 << 30;

/// Sizing of a volume's rounds and blocks.
///
/// The same options must be passed every time a volume is re-opened; a
/// mismatch is detected against the round files' sizes on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeOptions {
    /// Payload bytes per block, excluding the 128-byte header.
    pub block_size: u32,
    /// Payload bytes per round; must be a positive multiple of
    /// `block_size`.
    pub round_size: u64,
}

impl Default for VolumeOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            round_size: DEFAULT_ROUND_SIZE,
        }
    }
}

impl VolumeOptions {
    fn validate(&self) -> Result<()> {
        ensure!(self.block_size > 0, "block size must be positive");
        ensure!(
            self.round_size >= u64::from(self.block_size),
            "round size {} < block size {}",
            self.round_size,
            self.block_size
        );
        ensure!(
            self.round_size % u64::from(self.block_size) == 0,
            "round size {} is not a multiple of block size {}",
            self.round_size,
            self.block_size
        );
        Ok(())
    }
}

/// Address of a block: which round, which slot. Files store these
/// instead of pointers into the mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockLoc {
    pub round: u32,
    pub slot: u32,
}

/// Shared core of a volume: the path, sizing, and mapped rounds.
/// Files hold an `Arc` of this so they outlive the `Volume` handle
/// without keeping its topic/file registry alive.
#[derive(Debug)]
pub(crate) struct VolumeCore {
    path: PathBuf,
    opts: VolumeOptions,
    rounds: RwLock<Vec<Arc<Round>>>,
    closed: AtomicBool,
}

impl VolumeCore {
    pub fn round(&self, idx: u32) -> Result<Arc<Round>> {
        let rounds = self.rounds.read();
        rounds.get(idx as usize).cloned().ok_or_else(|| {
            if self.closed.load(Ordering::Acquire) {
                eyre::eyre!("volume '{}' is closed", self.path.display())
            } else {
                eyre::eyre!("round {} is not mapped", idx)
            }
        })
    }

    /// Allocates a block for `(fd, idx)`, appending a new round when the
    /// tail is full. The rounds lock is held across the allocation so
    /// the tail's fullness cannot change underneath it.
    pub fn alloc(&self, fd: u32, idx: i32, cap: u32) -> Result<BlockLoc> {
        assert_eq!(
            cap, self.opts.block_size,
            "alloc cap differs from volume block size"
        );

        let mut rounds = self.rounds.write();
        ensure!(
            !self.closed.load(Ordering::Acquire),
            "volume '{}' is closed",
            self.path.display()
        );

        if rounds.last().map_or(true, |r| r.full()) {
            let (round, loaded) = Round::open(
                &self.path,
                rounds.len(),
                self.opts.round_size,
                self.opts.block_size,
            )?;
            debug_assert!(loaded.is_empty(), "freshly created round holds blocks");
            debug!(
                "volume '{}': created round {}",
                self.path.display(),
                round.idx()
            );
            rounds.push(Arc::new(round));
        }

        let round_no = rounds.len() - 1;
        let slot = rounds[round_no].alloc(fd, idx, cap)?;
        Ok(BlockLoc {
            round: round_no as u32,
            slot,
        })
    }

    fn sync(&self) -> Result<()> {
        for round in self.rounds.read().iter() {
            round.sync()?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        let mut rounds = self.rounds.write();
        for round in rounds.iter() {
            round.sync()?;
        }
        rounds.clear();
        Ok(())
    }
}

/// A directory of rounds and the files assembled from their blocks.
#[derive(Debug)]
pub struct Volume {
    core: Arc<VolumeCore>,
    files: RwLock<HashMap<u32, Arc<File>>>,
}

impl Volume {
    /// Opens an existing volume or creates a new one at `path`.
    pub fn open<P: AsRef<Path>>(path: P, opts: VolumeOptions) -> Result<Volume> {
        let path = path.as_ref().to_path_buf();
        opts.validate()?;

        std::fs::create_dir_all(&path)
            .wrap_err_with(|| format!("failed to create volume directory '{}'", path.display()))?;

        let mut indices = Vec::new();
        let entries = std::fs::read_dir(&path)
            .wrap_err_with(|| format!("failed to read volume directory '{}'", path.display()))?;
        for entry in entries {
            let entry = entry.wrap_err("failed to read volume directory entry")?;
            if entry
                .file_type()
                .wrap_err("failed to stat volume directory entry")?
                .is_dir()
            {
                continue;
            }
            let name = entry.file_name();
            let idx: usize = name
                .to_string_lossy()
                .parse()
                .map_err(|_| {
                    eyre::eyre!(
                        "unexpected entry '{}' in volume '{}'",
                        name.to_string_lossy(),
                        path.display()
                    )
                })?;
            indices.push(idx);
        }
        indices.sort_unstable();

        let mut rounds = Vec::with_capacity(indices.len());
        let mut loads = Vec::with_capacity(indices.len());
        for (pos, &idx) in indices.iter().enumerate() {
            if idx != pos {
                return Err(eyre::Report::new(Error::LoadGap)).wrap_err_with(|| {
                    format!(
                        "volume '{}' has round {} where {} was expected",
                        path.display(),
                        idx,
                        pos
                    )
                });
            }
            let (round, loaded) = Round::open(&path, idx, opts.round_size, opts.block_size)?;
            rounds.push(Arc::new(round));
            loads.push(loaded);
        }

        let core = Arc::new(VolumeCore {
            path,
            opts,
            rounds: RwLock::new(rounds),
            closed: AtomicBool::new(false),
        });

        // Replay in round order, slot order: global write order.
        let mut files: HashMap<u32, Arc<File>> = HashMap::new();
        let mut block_count = 0usize;
        for (round_no, loaded) in loads.into_iter().enumerate() {
            for lb in loaded {
                let file = files
                    .entry(lb.fd)
                    .or_insert_with(|| Arc::new(File::new(core.clone(), lb.fd, opts.block_size)));
                file.add(
                    BlockLoc {
                        round: round_no as u32,
                        slot: lb.slot,
                    },
                    lb.fd,
                    lb.idx,
                )?;
                block_count += 1;
            }
        }

        debug!(
            "volume '{}': loaded {} rounds, {} files, {} blocks",
            core.path.display(),
            core.rounds.read().len(),
            files.len(),
            block_count
        );

        Ok(Volume {
            core,
            files: RwLock::new(files),
        })
    }

    /// Returns the file with this id, registering an empty one if it
    /// does not exist yet.
    pub fn open_file(&self, fd: u32) -> Result<Arc<File>> {
        if let Some(file) = self.files.read().get(&fd) {
            return Ok(file.clone());
        }

        let mut files = self.files.write();
        let file = files
            .entry(fd)
            .or_insert_with(|| Arc::new(File::new(self.core.clone(), fd, self.core.opts.block_size)));
        Ok(file.clone())
    }

    /// Snapshot of all files, ascending by id.
    pub fn files(&self) -> Vec<Arc<File>> {
        let files = self.files.read();
        let mut snapshot: Vec<Arc<File>> = files.values().cloned().collect();
        snapshot.sort_by_key(|f| f.fd());
        snapshot
    }

    /// Flushes every round's mapping to disk.
    pub fn sync(&self) -> Result<()> {
        self.core.sync()
    }

    /// Flushes and unmaps every round. Files obtained from this volume
    /// fail on any further block access.
    pub fn close(&self) -> Result<()> {
        self.core.close()
    }

    pub fn path(&self) -> &Path {
        &self.core.path
    }

    pub fn options(&self) -> VolumeOptions {
        self.core.opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SMALL: VolumeOptions = VolumeOptions {
        block_size: 1 << 10,
        round_size: 10 << 10,
    };

    #[test]
    fn open_creates_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vol");
        let v = Volume::open(&path, SMALL).unwrap();

        assert!(path.is_dir());
        assert_eq!(v.options(), SMALL);
        assert!(v.files().is_empty());
    }

    #[test]
    fn open_rejects_invalid_options() {
        let dir = tempdir().unwrap();
        let bad = VolumeOptions {
            block_size: 1 << 10,
            round_size: 1500,
        };
        assert!(Volume::open(dir.path(), bad).is_err());
    }

    #[test]
    fn open_ignores_subdirectories() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        Volume::open(dir.path(), SMALL).unwrap();
    }

    #[test]
    fn open_rejects_stray_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        assert!(Volume::open(dir.path(), SMALL).is_err());
    }

    #[test]
    fn open_rejects_round_gap() {
        let dir = tempdir().unwrap();
        {
            let v = Volume::open(dir.path(), SMALL).unwrap();
            let f = v.open_file(0).unwrap();
            f.write_at(b"x", 0).unwrap();
            v.close().unwrap();
        }
        std::fs::rename(dir.path().join("0"), dir.path().join("3")).unwrap();

        let err = Volume::open(dir.path(), SMALL).unwrap_err();
        assert!(Error::is(&err, Error::LoadGap));
    }

    #[test]
    fn files_snapshot_is_sorted() {
        let dir = tempdir().unwrap();
        let v = Volume::open(dir.path(), SMALL).unwrap();
        for fd in [9u32, 2, 5] {
            v.open_file(fd).unwrap();
        }

        let fds: Vec<u32> = v.files().iter().map(|f| f.fd()).collect();
        assert_eq!(fds, [2, 5, 9]);
    }

    #[test]
    fn closed_volume_refuses_io() {
        let dir = tempdir().unwrap();
        let v = Volume::open(dir.path(), SMALL).unwrap();
        let f = v.open_file(0).unwrap();
        f.write_at(b"abc", 0).unwrap();
        v.close().unwrap();

        assert!(f.write_at(b"more", 100).is_err());
        let mut buf = [0u8; 3];
        assert!(f.read_at(&mut buf, 0).is_err());
    }
}
