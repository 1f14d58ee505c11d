//! # Queue Layer
//!
//! Durable per-topic FIFOs persisted inside a storage volume. Each topic
//! owns the storage file whose id equals the topic id; the file starts
//! with a CRC-protected 48-byte index (put/get offsets, flags, counters)
//! followed by `[u16 len][payload]` message frames.
//!
//! Index state survives process restart: re-opening a [`Queue`] on the
//! same directory restores every topic's offsets and counters and
//! resumes consumption exactly where it stopped. Messages carry no
//! per-frame checksum; a torn append is unreachable garbage past
//! `put_off` and gets overwritten by the next successful put.
//!
//! ## Concurrency
//!
//! Lock order, outermost first: queue (topic map) → topic (index) →
//! file (block table) → volume (block allocation) → round (mapping).
//! Topic operations serialize on the topic's own lock; distinct topics
//! only meet at the volume's allocation lock.

pub(crate) mod index;
pub(crate) mod queue;
pub(crate) mod topic;

pub use index::{TopicIndex, FLAG_CLOSED, INDEX_SIZE};
pub use queue::{Queue, QUEUE_BLOCK_SIZE, QUEUE_ROUND_SIZE};
pub use topic::{Topic, MAX_MESSAGE_SIZE};
