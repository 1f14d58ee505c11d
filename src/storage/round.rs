//! # Round Files
//!
//! A round is one numbered file in a volume (`<volume>/0`, `<volume>/1`,
//! …), memory-mapped read+write shared and carved into equal slots of
//! `block_size + 128` bytes. Slots are allocated left to right, so the
//! valid blocks always form a contiguous prefix and the first slot
//! without a magic number marks the end of the allocated region. That
//! prefix order is also allocation-time order, which the volume relies on
//! when it replays blocks into files after a restart.
//!
//! The mapping itself follows the storage pattern used elsewhere in this
//! crate: create-or-validate the file size, map it once, and let the OS
//! page cache do the buffering. Payload and header access go through the
//! round's `RwLock`: readers of different blocks share the map, any
//! write to the round takes it exclusively.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use eyre::{ensure, Result, WrapErr};
use log::debug;
use memmap2::MmapMut;
use parking_lot::RwLock;

use super::block::{self, real_block_size};
use crate::Error;

/// A block discovered while scanning a round at open time.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoadedBlock {
    pub fd: u32,
    pub idx: i32,
    pub slot: u32,
}

pub(crate) struct Round {
    idx: usize,
    block_size: u32,
    slot_count: u32,
    real_size: u64,
    // Valid-block prefix length. Only mutated under the volume's
    // allocation lock; plain loads elsewhere.
    allocated: AtomicU32,
    mmap: RwLock<MmapMut>,
}

impl std::fmt::Debug for Round {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Round")
            .field("idx", &self.idx)
            .field("block_size", &self.block_size)
            .field("slot_count", &self.slot_count)
            .field("allocated", &self.allocated.load(Ordering::Relaxed))
            .finish()
    }
}

impl Round {
    /// Creates or re-opens `<dir>/<idx>` and scans its allocated prefix.
    ///
    /// A fresh (zero-length) file is truncated to the computed real size;
    /// a pre-existing file of any other size is rejected with
    /// [`Error::SizeMismatch`].
    pub fn open(
        dir: &Path,
        idx: usize,
        round_size: u64,
        block_size: u32,
    ) -> Result<(Round, Vec<LoadedBlock>)> {
        ensure!(block_size > 0, "block size must be positive");
        ensure!(
            round_size >= u64::from(block_size),
            "round size {} < block size {}",
            round_size,
            block_size
        );
        ensure!(
            round_size % u64::from(block_size) == 0,
            "round size {} is not a multiple of block size {}",
            round_size,
            block_size
        );

        let slot_count = round_size / u64::from(block_size);
        let real_size = slot_count * real_block_size(block_size) as u64;
        ensure!(
            u32::try_from(slot_count).is_ok() && usize::try_from(real_size).is_ok(),
            "round geometry {}/{} does not fit the address space",
            round_size,
            block_size
        );
        let slot_count = slot_count as u32;

        let path = dir.join(idx.to_string());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open round file '{}'", path.display()))?;

        let disk_size = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len();

        if disk_size == 0 {
            file.set_len(real_size)
                .wrap_err_with(|| format!("failed to size '{}' to {}", path.display(), real_size))?;
        } else if disk_size != real_size {
            return Err(eyre::Report::new(Error::SizeMismatch)).wrap_err_with(|| {
                format!(
                    "round file '{}' is {} bytes, expected {}",
                    path.display(),
                    disk_size,
                    real_size
                )
            });
        }

        // SAFETY: MmapMut::map_mut is unsafe because the file could be
        // modified externally. This is safe because:
        // 1. The file was just created or size-validated above, so the
        //    mapping covers exactly real_size bytes.
        // 2. Volume files are not meant to be touched by other processes.
        // 3. The map's lifetime is tied to this Round, and all access is
        //    bounds-checked through slot ranges.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        let rbs = real_block_size(block_size);
        let mut loaded = Vec::new();
        for slot in 0..slot_count {
            let off = slot as usize * rbs;
            match block::open(&mmap[off..off + rbs]) {
                Ok(hdr) => {
                    ensure!(
                        hdr.cap() == block_size as i32,
                        "block at slot {} of '{}' has cap {}, volume block size is {}",
                        slot,
                        path.display(),
                        hdr.cap(),
                        block_size
                    );
                    loaded.push(LoadedBlock {
                        fd: hdr.fd(),
                        idx: hdr.idx(),
                        slot,
                    });
                }
                Err(e) if Error::is(&e, Error::NotABlock) => break,
                Err(e) => {
                    return Err(e.wrap_err(format!(
                        "corrupt slot {} in round file '{}'",
                        slot,
                        path.display()
                    )))
                }
            }
        }

        debug!(
            "round {}: opened '{}' with {}/{} blocks",
            idx,
            path.display(),
            loaded.len(),
            slot_count
        );

        let round = Round {
            idx,
            block_size,
            slot_count,
            real_size,
            allocated: AtomicU32::new(loaded.len() as u32),
            mmap: RwLock::new(mmap),
        };
        Ok((round, loaded))
    }

    pub fn idx(&self) -> usize {
        self.idx
    }

    /// True when every slot holds a block.
    pub fn full(&self) -> bool {
        self.allocated.load(Ordering::Acquire) >= self.slot_count
    }

    /// Stamps a block into the next free slot. Must run under the
    /// volume's allocation lock.
    pub fn alloc(&self, fd: u32, idx: i32, cap: u32) -> Result<u32> {
        if self.full() {
            return Err(Error::FullRound.into());
        }
        assert_eq!(cap, self.block_size, "alloc cap differs from round block size");

        let slot = self.allocated.load(Ordering::Acquire);
        let range = self.slot_range(slot);
        block::init(&mut self.mmap.write()[range], fd, idx, cap)?;
        self.allocated.store(slot + 1, Ordering::Release);
        Ok(slot)
    }

    pub fn read_block_at(&self, slot: u32, dst: &mut [u8], off: u32) -> Result<usize> {
        let range = self.slot_range(slot);
        block::read_at(&self.mmap.read()[range], dst, off)
    }

    pub fn write_block_at(&self, slot: u32, src: &[u8], off: u32) -> Result<usize> {
        let range = self.slot_range(slot);
        block::write_at(&mut self.mmap.write()[range], src, off)
    }

    /// Marks the slot's whole payload valid (`size = cap`).
    pub fn promote(&self, slot: u32) -> Result<()> {
        let range = self.slot_range(slot);
        block::promote(&mut self.mmap.write()[range])
    }

    /// Copy of the slot's header, for inspection.
    #[cfg(test)]
    pub fn header_at(&self, slot: u32) -> Result<block::BlockHeader> {
        let range = self.slot_range(slot);
        block::open(&self.mmap.read()[range]).map(|hdr| *hdr)
    }

    /// Flushes the mapping to disk.
    pub fn sync(&self) -> Result<()> {
        self.mmap
            .read()
            .flush()
            .wrap_err_with(|| format!("failed to flush round {}", self.idx))
    }

    fn slot_range(&self, slot: u32) -> std::ops::Range<usize> {
        assert!(slot < self.slot_count, "slot {} out of round bounds", slot);
        let rbs = real_block_size(self.block_size);
        let off = slot as usize * rbs;
        off..off + rbs
    }

    #[cfg(test)]
    pub fn real_size(&self) -> u64 {
        self.real_size
    }
}
