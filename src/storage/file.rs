//! # Files
//!
//! A file is a sparse logical byte stream assembled from the blocks that
//! share its id. Byte offset `off` lives in block `off / block_size` at
//! block-relative offset `off % block_size`. The block sequence may have
//! holes, indices with no allocated block, which read as zeros and are
//! allocated on first write.
//!
//! ## Size Promotion
//!
//! Only the newest block of a file is a partial write frontier. The
//! moment a block stops being last (a later block was appended, or it was
//! itself allocated into an interior hole), its `size`
//! is promoted to the full capacity: the file is logically contiguous
//! through it. This holds both for live writes and for the replay that
//! happens when a volume is re-opened, which is why blocks must be
//! replayed in global write order.
//!
//! ## Concurrency
//!
//! The block table is behind a `RwLock`; lookups take it shared, and the
//! allocation path re-checks under the exclusive lock before asking the
//! volume for a block. A single file is not safe for concurrent writes
//! to overlapping byte ranges: the block `size` field is advanced with
//! a plain max, not a CAS. Non-overlapping ranges in distinct blocks are
//! fine.

use std::sync::Arc;

use eyre::Result;
use parking_lot::RwLock;

use super::volume::{BlockLoc, VolumeCore};

/// A logical byte stream identified by a file id (`fd`) within one
/// volume. Obtained from [`Volume::open_file`](super::Volume::open_file);
/// cheap to clone through its `Arc`.
#[derive(Debug)]
pub struct File {
    core: Arc<VolumeCore>,
    fd: u32,
    block_size: u32,
    blocks: RwLock<Vec<Option<BlockLoc>>>,
}

impl File {
    pub(crate) fn new(core: Arc<VolumeCore>, fd: u32, block_size: u32) -> File {
        File {
            core,
            fd,
            block_size,
            blocks: RwLock::new(Vec::new()),
        }
    }

    /// The file id, unique within its volume. Not an OS descriptor.
    pub fn fd(&self) -> u32 {
        self.fd
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Registers a block of this file, promoting whichever block stops
    /// being the write frontier. Duplicate or foreign blocks are
    /// programming errors (or a corrupt volume) and panic.
    pub(crate) fn add(&self, loc: BlockLoc, fd: u32, idx: i32) -> Result<()> {
        assert_eq!(fd, self.fd, "block of file {} added to file {}", fd, self.fd);
        assert!(idx >= 0, "negative block index {} for file {}", idx, self.fd);

        let mut blocks = self.blocks.write();
        self.install(&mut blocks, loc, idx as usize)
    }

    fn install(&self, blocks: &mut Vec<Option<BlockLoc>>, loc: BlockLoc, idx: usize) -> Result<()> {
        if idx < blocks.len() {
            assert!(
                blocks[idx].is_none(),
                "file {} already has block {}",
                self.fd,
                idx
            );
            // Filling an interior hole: the new block is behind the
            // frontier, so its whole payload is valid.
            self.core.round(loc.round)?.promote(loc.slot)?;
            blocks[idx] = Some(loc);
            return Ok(());
        }

        if let Some(last) = blocks.last().copied().flatten() {
            self.core.round(last.round)?.promote(last.slot)?;
        }

        blocks.resize(idx, None);
        blocks.push(Some(loc));
        Ok(())
    }

    /// Reads into `dst` starting at byte `off`.
    ///
    /// Returns the number of bytes read; a short count means the end of
    /// the file's valid data was reached, `Ok(0)` that `off` is at or
    /// past it. Holes read as zeros.
    pub fn read_at(&self, dst: &mut [u8], off: u64) -> Result<usize> {
        let bs = u64::from(self.block_size);
        let mut n = 0;

        while n < dst.len() {
            let pos = off + n as u64;
            let idx = (pos / bs) as usize;
            let boff = (pos % bs) as u32;

            let loc = {
                let blocks = self.blocks.read();
                if idx >= blocks.len() {
                    break;
                }
                blocks[idx]
            };

            match loc {
                // File hole: zeros up to the block boundary.
                None => {
                    let nn = (dst.len() - n).min((self.block_size - boff) as usize);
                    dst[n..n + nn].fill(0);
                    n += nn;
                }
                Some(loc) => {
                    let round = self.core.round(loc.round)?;
                    let k = round.read_block_at(loc.slot, &mut dst[n..], boff)?;
                    if k == 0 {
                        break;
                    }
                    n += k;
                }
            }
        }

        Ok(n)
    }

    /// Writes all of `src` at byte `off`, allocating blocks as needed.
    pub fn write_at(&self, src: &[u8], off: u64) -> Result<usize> {
        let bs = u64::from(self.block_size);
        let mut n = 0;

        while n < src.len() {
            let pos = off + n as u64;
            let idx = (pos / bs) as usize;
            let boff = (pos % bs) as u32;

            let loc = self.write_block(idx)?;
            let chunk = (src.len() - n).min((self.block_size - boff) as usize);
            let round = self.core.round(loc.round)?;
            let k = round.write_block_at(loc.slot, &src[n..n + chunk], boff)?;
            debug_assert_eq!(k, chunk, "block absorbed less than its free span");
            n += k;
        }

        Ok(n)
    }

    /// Resolves the block covering `idx`, allocating it if absent.
    fn write_block(&self, idx: usize) -> Result<BlockLoc> {
        if let Some(loc) = self.blocks.read().get(idx).copied().flatten() {
            return Ok(loc);
        }

        let mut blocks = self.blocks.write();
        if let Some(loc) = blocks.get(idx).copied().flatten() {
            return Ok(loc);
        }

        let loc = self.core.alloc(self.fd, idx as i32, self.block_size)?;
        self.install(&mut blocks, loc, idx)?;
        Ok(loc)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Volume, VolumeOptions};
    use tempfile::tempdir;

    const SMALL: VolumeOptions = VolumeOptions {
        block_size: 1 << 10,
        round_size: 10 << 10,
    };

    #[test]
    fn read_of_empty_file_is_empty() {
        let dir = tempdir().unwrap();
        let v = Volume::open(dir.path(), SMALL).unwrap();
        let f = v.open_file(0).unwrap();

        let mut buf = [0u8; 10];
        assert_eq!(f.read_at(&mut buf, 0).unwrap(), 0);
    }

    #[test]
    fn write_then_read_within_block() {
        let dir = tempdir().unwrap();
        let v = Volume::open(dir.path(), SMALL).unwrap();
        let f = v.open_file(0).unwrap();

        assert_eq!(f.write_at(b"1234", 0).unwrap(), 4);

        let mut buf = [0u8; 2];
        assert_eq!(f.read_at(&mut buf, 1).unwrap(), 2);
        assert_eq!(&buf, b"23");

        // A 4-byte read at offset 1 runs off the valid data: short count.
        let mut buf = [0u8; 4];
        assert_eq!(f.read_at(&mut buf, 1).unwrap(), 3);
        assert_eq!(&buf, &[b'2', b'3', b'4', 0]);
    }

    #[test]
    fn write_across_block_boundary() {
        let dir = tempdir().unwrap();
        let v = Volume::open(dir.path(), SMALL).unwrap();
        let f = v.open_file(0).unwrap();

        f.write_at(b"1234", 0).unwrap();
        assert_eq!(f.write_at(b"abcd", 1022).unwrap(), 4);

        let mut buf = [0u8; 4];
        assert_eq!(f.read_at(&mut buf, 1022).unwrap(), 4);
        assert_eq!(&buf, b"abcd");

        // Block 0 stopped being the frontier: bytes 4..1022 read as the
        // zeros the mapping was born with.
        let mut buf = [0xFFu8; 4];
        assert_eq!(f.read_at(&mut buf, 234).unwrap(), 4);
        assert_eq!(&buf, &[0, 0, 0, 0]);
    }

    #[test]
    fn hole_reads_zeros_until_filled() {
        let dir = tempdir().unwrap();
        let v = Volume::open(dir.path(), SMALL).unwrap();
        let f = v.open_file(0).unwrap();

        f.write_at(b"1234", 0).unwrap();
        f.write_at(b"abcd", 1022).unwrap();

        // Lands in blocks 4 and 5; blocks 2 and 3 stay holes.
        assert_eq!(f.write_at(b"987654321", 5022).unwrap(), 9);

        let mut buf = [0u8; 9];
        assert_eq!(f.read_at(&mut buf, 5022).unwrap(), 9);
        assert_eq!(&buf, b"987654321");

        let mut buf = [0xFFu8; 9];
        assert_eq!(f.read_at(&mut buf, 4002).unwrap(), 9);
        assert_eq!(&buf, &[0; 9]);

        // Writing into the hole later produces the written bytes.
        f.write_at(b"mid", 2048).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(f.read_at(&mut buf, 2047).unwrap(), 5);
        assert_eq!(&buf, &[0, b'm', b'i', b'd', 0]);
    }

    #[test]
    fn reopened_volume_reads_the_same_bytes() {
        let dir = tempdir().unwrap();
        {
            let v = Volume::open(dir.path(), SMALL).unwrap();
            let f = v.open_file(10).unwrap();
            f.write_at(b"wxyz", 0).unwrap();
            f.write_at(b"qwer", 100).unwrap();
            v.close().unwrap();
        }

        let v = Volume::open(dir.path(), SMALL).unwrap();
        let f = v.open_file(10).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(f.read_at(&mut buf, 0).unwrap(), 4);
        assert_eq!(&buf, b"wxyz");
        assert_eq!(f.read_at(&mut buf, 100).unwrap(), 4);
        assert_eq!(&buf, b"qwer");
    }
}
