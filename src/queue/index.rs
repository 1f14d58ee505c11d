//! # Topic Index
//!
//! The first 48 bytes of a topic's file are its index: put/get offsets,
//! flags, and counters, protected by a CRC32 over the payload bytes.
//! Every index update rewrites the whole record at offset 0 in one
//! `write_at`, so after a crash either the pre- or post-image is found
//! there and the CRC catches a torn mix of the two.
//!
//! ## Layout (little-endian, 48 bytes)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----------------------------------
//! 0       4     crc32 (IEEE) over bytes [4..48)
//! 4       4     flag     (i32; bit 0 = closed)
//! 8       8     put_off  (i64, next append offset)
//! 16      8     get_off  (i64, next read offset)
//! 24      8     count    (i64, total puts ever)
//! 32      8     pending  (i64, puts minus drops)
//! 40      8     reserved (i64)
//! ```

use crc::{Crc, CRC_32_ISO_HDLC};
use eyre::Result;
use zerocopy::little_endian::{I32, I64, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::Error;

/// Size of the serialized index; also the initial put/get offset, so a
/// fresh topic's messages start right after its index.
pub const INDEX_SIZE: usize = 48;

/// Bit 0 of `flag`: the topic no longer accepts puts.
pub const FLAG_CLOSED: i32 = 1;

// Same polynomial as the classic IEEE crc32 everyone's table-driven
// implementation uses.
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct TopicIndex {
    crc: U32,
    flag: I32,
    put_off: I64,
    get_off: I64,
    count: I64,
    pending: I64,
    reserved: I64,
}

const _: () = assert!(std::mem::size_of::<TopicIndex>() == INDEX_SIZE);

impl TopicIndex {
    /// Index of a topic that has never seen a message.
    pub fn new() -> Self {
        Self {
            crc: U32::new(0),
            flag: I32::new(0),
            put_off: I64::new(INDEX_SIZE as i64),
            get_off: I64::new(INDEX_SIZE as i64),
            count: I64::new(0),
            pending: I64::new(0),
            reserved: I64::new(0),
        }
    }

    /// Serializes the index with a freshly computed CRC.
    pub fn to_bytes(&self) -> [u8; INDEX_SIZE] {
        let mut out = [0u8; INDEX_SIZE];
        out.copy_from_slice(self.as_bytes());
        let crc = CRC32.checksum(&out[4..]);
        out[..4].copy_from_slice(&crc.to_le_bytes());
        out
    }

    /// Deserializes and verifies an index image.
    ///
    /// A CRC mismatch is [`Error::BrokenIndex`]: the stored image was
    /// torn or corrupted and the topic must not be trusted.
    pub fn parse(raw: &[u8; INDEX_SIZE]) -> Result<TopicIndex> {
        let stored = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        if stored != CRC32.checksum(&raw[4..]) {
            return Err(Error::BrokenIndex.into());
        }
        TopicIndex::read_from_bytes(raw.as_slice())
            .map_err(|e| eyre::eyre!("failed to parse topic index: {:?}", e))
    }

    pub fn flag(&self) -> i32 {
        self.flag.get()
    }

    pub fn is_closed(&self) -> bool {
        self.flag.get() & FLAG_CLOSED != 0
    }

    pub fn set_closed(&mut self) {
        self.flag = I32::new(self.flag.get() | FLAG_CLOSED);
    }

    pub fn put_off(&self) -> i64 {
        self.put_off.get()
    }

    pub fn set_put_off(&mut self, off: i64) {
        self.put_off = I64::new(off);
    }

    pub fn get_off(&self) -> i64 {
        self.get_off.get()
    }

    pub fn set_get_off(&mut self, off: i64) {
        self.get_off = I64::new(off);
    }

    pub fn count(&self) -> i64 {
        self.count.get()
    }

    pub fn set_count(&mut self, count: i64) {
        self.count = I64::new(count);
    }

    pub fn pending(&self) -> i64 {
        self.pending.get()
    }

    pub fn set_pending(&mut self, pending: i64) {
        self.pending = I64::new(pending);
    }
}

impl Default for TopicIndex {
    fn default() -> Self {
        Self::new()
    }
}
