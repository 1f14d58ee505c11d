//! # Block Slot Codec
//!
//! A block is the unit of allocation inside a round: a 128-byte header
//! followed by `cap` payload bytes, at a fixed offset in the round's
//! mapping. The header is self-describing: a round can be reloaded by
//! scanning magic numbers alone, with no separate allocation table.
//!
//! ## On-Disk Layout (little-endian)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  --------------------------------------
//! 0       4     magic = "mfsb" (0x6273666D as LE u32)
//! 4       4     size  (i32, valid payload bytes)
//! 8       4     cap   (i32, payload capacity)
//! 12      4     fd    (u32, owning file id)
//! 16      4     idx   (i32, block index within its file)
//! 20      8     flag  (i64, reserved)
//! 28      100   reserved (zero)
//! 128     cap   payload
//! ```
//!
//! Only bytes 0..28 of the header are meaningful; the tail is reserved
//! padding so the header size stays fixed across format revisions.
//!
//! Everything here operates on a raw *slot* slice (`header + payload`),
//! so the same code runs against a round's mmap and against plain heap
//! buffers in tests. The functions are free functions rather than methods
//! on an owning type because the bytes are owned by the round's mapping;
//! a block never exists outside one.

use eyre::{ensure, Result};
use zerocopy::little_endian::{I32, I64, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::Error;

/// Fixed header size; the payload starts at this offset within a slot.
pub const BLOCK_HEADER_SIZE: usize = 128;

/// Stamped into every allocated slot. Reads back as 0x6273666D.
pub const BLOCK_MAGIC: u32 = u32::from_le_bytes(*b"mfsb");

/// On-disk footprint of a block with the given payload capacity.
#[inline]
pub const fn real_block_size(cap: u32) -> usize {
    cap as usize + BLOCK_HEADER_SIZE
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct BlockHeader {
    magic: U32,
    size: I32,
    cap: I32,
    fd: U32,
    idx: I32,
    flag: I64,
    reserved: [u8; 100],
}

const _: () = assert!(std::mem::size_of::<BlockHeader>() == BLOCK_HEADER_SIZE);

impl BlockHeader {
    pub fn size(&self) -> i32 {
        self.size.get()
    }

    pub fn cap(&self) -> i32 {
        self.cap.get()
    }

    pub fn fd(&self) -> u32 {
        self.fd.get()
    }

    pub fn idx(&self) -> i32 {
        self.idx.get()
    }
}

fn header(slot: &[u8]) -> Result<&BlockHeader> {
    BlockHeader::ref_from_bytes(&slot[..BLOCK_HEADER_SIZE])
        .map_err(|e| eyre::eyre!("failed to parse block header: {:?}", e))
}

fn header_mut(slot: &mut [u8]) -> Result<&mut BlockHeader> {
    BlockHeader::mut_from_bytes(&mut slot[..BLOCK_HEADER_SIZE])
        .map_err(|e| eyre::eyre!("failed to parse block header: {:?}", e))
}

/// Stamps a fresh block into `slot`.
///
/// Fails if the slot already carries the magic (double allocation) or if
/// the slot's payload span does not match `cap`.
pub fn init(slot: &mut [u8], fd: u32, idx: i32, cap: u32) -> Result<()> {
    ensure!(
        slot.len() > BLOCK_HEADER_SIZE,
        "slot of {} bytes cannot hold a block",
        slot.len()
    );

    let payload_len = slot.len() - BLOCK_HEADER_SIZE;
    ensure!(
        payload_len == cap as usize,
        "slot payload span {} != cap {}",
        payload_len,
        cap
    );

    let hdr = header_mut(slot)?;
    ensure!(
        hdr.magic.get() != BLOCK_MAGIC,
        "slot already holds a block (fd={}, idx={})",
        hdr.fd.get(),
        hdr.idx.get()
    );

    hdr.magic = U32::new(BLOCK_MAGIC);
    hdr.size = I32::new(0);
    hdr.cap = I32::new(cap as i32);
    hdr.fd = U32::new(fd);
    hdr.idx = I32::new(idx);
    hdr.flag = I64::new(0);
    Ok(())
}

/// Reads the header of an existing block.
///
/// Returns the [`Error::NotABlock`] signal when the magic is absent,
/// which is how a round scan detects the end of its allocated prefix.
pub fn open(slot: &[u8]) -> Result<&BlockHeader> {
    ensure!(
        slot.len() > BLOCK_HEADER_SIZE,
        "slot of {} bytes cannot hold a block",
        slot.len()
    );

    let hdr = header(slot)?;
    if hdr.magic.get() != BLOCK_MAGIC {
        return Err(Error::NotABlock.into());
    }

    let payload_len = slot.len() - BLOCK_HEADER_SIZE;
    ensure!(
        hdr.cap.get() == payload_len as i32,
        "block cap {} != slot payload span {}",
        hdr.cap.get(),
        payload_len
    );
    Ok(hdr)
}

/// Copies valid payload bytes at `off` into `dst`.
///
/// Returns the number of bytes copied; `Ok(0)` means there is no valid
/// data at `off`. A short count means `dst` reached past the block's
/// valid bytes. [`Error::UnexpectedEndOfFile`] is raised only when the
/// header's `size` claims more bytes than the payload span holds.
pub fn read_at(slot: &[u8], dst: &mut [u8], off: u32) -> Result<usize> {
    let hdr = open(slot)?;
    let size = hdr.size().max(0) as usize;
    let off = off as usize;

    if off >= size {
        return Ok(0);
    }

    let payload = &slot[BLOCK_HEADER_SIZE..];
    let avail = size - off;
    // A torn header can claim size beyond the payload span; clamp the
    // readable range and report the shortfall below.
    let end = size.min(payload.len());
    let src = if off < end { &payload[off..end] } else { &[][..] };
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);

    if n < dst.len().min(avail) {
        return Err(Error::UnexpectedEndOfFile.into());
    }
    Ok(n)
}

/// Copies `src` into the payload at `off`, growing `size` to cover it.
///
/// Raises [`Error::ShortWrite`] when `off` is at or past the capacity,
/// or when only a prefix of `src` fits (the prefix is still written).
pub fn write_at(slot: &mut [u8], src: &[u8], off: u32) -> Result<usize> {
    let cap = open(slot)?.cap() as usize;
    let off = off as usize;

    if off >= cap {
        return Err(Error::ShortWrite.into());
    }

    let n = src.len().min(cap - off);
    let payload = &mut slot[BLOCK_HEADER_SIZE..];
    payload[off..off + n].copy_from_slice(&src[..n]);

    let hdr = header_mut(slot)?;
    let end = (off + n) as i32;
    if end > hdr.size.get() {
        hdr.size = I32::new(end);
    }

    if n < src.len() {
        return Err(Error::ShortWrite.into());
    }
    Ok(n)
}

/// Marks the whole payload as valid (`size = cap`).
///
/// Used by the file layer when a block stops being the write frontier:
/// everything before the frontier is logically contiguous.
pub fn promote(slot: &mut [u8]) -> Result<()> {
    let hdr = header_mut(slot)?;
    hdr.size = hdr.cap;
    Ok(())
}
