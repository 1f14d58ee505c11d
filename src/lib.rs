//! # mfq - Persistent Message Queues over Memory-Mapped Storage
//!
//! `mfq` layers durable per-topic FIFOs on top of a small block store
//! built from memory-mapped files. The storage side gives a POSIX-like
//! `read_at`/`write_at` file abstraction; the queue side persists each
//! topic's index inside its file so consumption resumes across process
//! restarts.
//!
//! ## Quick Start
//!
//! ```ignore
//! use mfq::Queue;
//!
//! let queue = Queue::open("./mq")?;
//! let topic = queue.get(7)?;
//!
//! topic.put(b"hello")?;
//! assert_eq!(topic.get()?, b"hello");
//! queue.close()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │        Queue (topic registry)        │
//! ├─────────────────────────────────────┤
//! │   Topic (index + message framing)    │
//! ├─────────────────────────────────────┤
//! │  Volume / File (sparse byte stream)  │
//! ├─────────────────────────────────────┤
//! │   Round / Block (mmap'd slot files)  │
//! └─────────────────────────────────────┘
//! ```
//!
//! Storage is append-only at the block level: blocks are never moved or
//! freed, rounds grow one at a time, and everything on disk is
//! self-describing and little-endian. See the [`storage`] and [`queue`]
//! module docs for the formats.
//!
//! ## Module Overview
//!
//! - [`storage`]: volumes, rounds, blocks, and the sparse file layer
//! - [`queue`]: durable topics and their CRC-protected indices
//! - [`Error`]: the typed failure signals callers can match on

mod error;
pub mod queue;
pub mod storage;

pub use error::Error;
pub use queue::{Queue, Topic};
pub use storage::{File, Volume, VolumeOptions};
