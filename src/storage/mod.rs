//! # Storage Layer
//!
//! A POSIX-like `read_at`/`write_at` file abstraction over a set of
//! fixed-size, memory-mapped round files partitioned into self-describing
//! blocks. This is the foundation the queue layer persists its topics on.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  Volume : directory of rounds, fd -> File   │
//! ├─────────────────────────────────────────────┤
//! │  File   : sparse byte stream over blocks    │
//! ├─────────────────────────────────────────────┤
//! │  Round  : one mmap'd file of block slots    │
//! ├─────────────────────────────────────────────┤
//! │  Block  : 128-byte header + payload         │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Blocks carry their own header (magic, owning file id, index within
//! that file, valid size), so a volume is reloaded purely by scanning
//! its rounds; there is no allocation table to keep consistent. Blocks
//! are allocated sequentially within the current tail round and never
//! moved or freed; a new round is created when the tail fills up.
//!
//! ## Zero-Copy I/O
//!
//! Rounds are mapped with `memmap2` and all block I/O is pointer
//! arithmetic plus `memcpy` against the mapping; the OS page cache does
//! the buffering and a page fault is the only place an operation can
//! block on disk. Durability is whatever the OS gives shared mappings —
//! [`Volume::sync`] flushes explicitly, and close flushes before
//! unmapping.
//!
//! ## Locking
//!
//! Lock order, outermost first: file (block table) → volume (rounds
//! vector, held across allocation) → round (mapping). The volume's
//! files-map lock is independent and never held while a file or round
//! lock is taken. Readers use shared locks throughout and never
//! escalate; lazy creation re-checks under the exclusive lock.

pub(crate) mod block;
pub(crate) mod file;
pub(crate) mod round;
pub(crate) mod volume;

pub use block::{real_block_size, BLOCK_HEADER_SIZE, BLOCK_MAGIC};
pub use file::File;
pub use volume::{Volume, VolumeOptions, DEFAULT_BLOCK_SIZE, DEFAULT_ROUND_SIZE};
