//! # Topics
//!
//! A topic is a durable FIFO on one storage file: messages are appended
//! at `put_off` as `[u16 len][payload]` frames, consumed at `get_off`,
//! and the 48-byte index at offset 0 is rewritten after every mutation.
//! The write order matters: payload first, index second, in-memory state
//! last. A crash between the payload and index writes leaves orphan
//! bytes past `put_off` that no reader can ever reach, because every
//! read is gated on `get_off < put_off`.
//!
//! Closing a topic is one-way. A closed topic refuses puts but keeps
//! serving pending messages until drained; once drained, reads report
//! [`Error::ClosedTopic`] instead of end-of-file.

use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};
use parking_lot::RwLock;
use smallvec::SmallVec;

use super::index::{TopicIndex, INDEX_SIZE};
use crate::storage::{File, Volume};
use crate::Error;

/// Longest message a topic accepts; the frame length field is a u16.
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// A durable per-id FIFO. Obtained from [`Queue::get`](super::Queue::get).
#[derive(Debug)]
pub struct Topic {
    id: u32,
    file: Arc<File>,
    idx: RwLock<TopicIndex>,
}

impl Topic {
    /// Opens the topic stored in the volume's file `id`, rehydrating its
    /// index. A file too short to hold an index is a fresh topic; a
    /// present index must pass its CRC.
    pub(crate) fn open(volume: &Volume, id: u32) -> Result<Topic> {
        let file = volume.open_file(id)?;

        let mut raw = [0u8; INDEX_SIZE];
        let n = file
            .read_at(&mut raw, 0)
            .wrap_err_with(|| format!("failed to read index of topic {}", id))?;

        let idx = if n < INDEX_SIZE {
            TopicIndex::new()
        } else {
            TopicIndex::parse(&raw)
                .wrap_err_with(|| format!("failed to open topic {}", id))?
        };

        // Re-write the index image: initializes a fresh topic's file and
        // refreshes the stored CRC image either way.
        file.write_at(&idx.to_bytes(), 0)
            .wrap_err_with(|| format!("failed to initialize index of topic {}", id))?;

        Ok(Topic {
            id,
            file,
            idx: RwLock::new(idx),
        })
    }

    /// The topic id, which is also the id of its backing file.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Total messages ever put to this topic.
    pub fn count(&self) -> i64 {
        self.idx.read().count()
    }

    /// Messages put but not yet dropped.
    pub fn pending(&self) -> i64 {
        self.idx.read().pending()
    }

    pub fn is_closed(&self) -> bool {
        self.idx.read().is_closed()
    }

    /// Appends a message. Fails with [`Error::ClosedTopic`] once the
    /// topic is closed.
    ///
    /// # Panics
    ///
    /// If the payload exceeds [`MAX_MESSAGE_SIZE`].
    pub fn put(&self, payload: &[u8]) -> Result<()> {
        assert!(
            payload.len() <= MAX_MESSAGE_SIZE,
            "message of {} bytes exceeds the u16 frame limit",
            payload.len()
        );

        let mut idx = self.idx.write();
        if idx.is_closed() {
            return Err(Error::ClosedTopic.into());
        }

        let mut frame: SmallVec<[u8; 256]> = SmallVec::with_capacity(2 + payload.len());
        frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        frame.extend_from_slice(payload);

        self.file
            .write_at(&frame, idx.put_off() as u64)
            .wrap_err_with(|| format!("failed to append to topic {}", self.id))?;

        let mut next = *idx;
        next.set_put_off(idx.put_off() + 2 + payload.len() as i64);
        next.set_count(idx.count() + 1);
        next.set_pending(idx.pending() + 1);
        self.persist(&next)?;
        *idx = next;
        Ok(())
    }

    /// Returns the next message without consuming it.
    pub fn peek(&self) -> Result<Vec<u8>> {
        let idx = self.idx.read();
        self.peek_locked(&idx)
    }

    fn peek_locked(&self, idx: &TopicIndex) -> Result<Vec<u8>> {
        if idx.get_off() >= idx.put_off() {
            return Err(self.drained_error(idx));
        }

        let mut len_raw = [0u8; 2];
        let n = self
            .file
            .read_at(&mut len_raw, idx.get_off() as u64)
            .wrap_err_with(|| format!("failed to read frame length in topic {}", self.id))?;
        ensure!(n == 2, Error::UnexpectedEndOfFile);
        let len = u16::from_le_bytes(len_raw) as usize;

        let mut payload = vec![0u8; len];
        let n = self
            .file
            .read_at(&mut payload, idx.get_off() as u64 + 2)
            .wrap_err_with(|| format!("failed to read frame payload in topic {}", self.id))?;
        ensure!(n == len, Error::UnexpectedEndOfFile);
        Ok(payload)
    }

    /// Consumes a message of the given payload length, as previously
    /// returned by [`peek`](Self::peek).
    pub fn drop_message(&self, len: usize) -> Result<()> {
        let mut idx = self.idx.write();
        self.drop_locked(&mut idx, len)
    }

    fn drop_locked(&self, idx: &mut TopicIndex, len: usize) -> Result<()> {
        if idx.get_off() >= idx.put_off() {
            return Err(self.drained_error(idx));
        }

        let mut next = *idx;
        next.set_get_off(idx.get_off() + 2 + len as i64);
        next.set_pending(idx.pending() - 1);
        self.persist(&next)?;
        *idx = next;
        Ok(())
    }

    /// Returns the next message and consumes it.
    pub fn get(&self) -> Result<Vec<u8>> {
        let mut idx = self.idx.write();
        let payload = self.peek_locked(&idx)?;
        self.drop_locked(&mut idx, payload.len())?;
        Ok(payload)
    }

    /// Marks the topic closed. Idempotent; pending messages stay
    /// readable until drained.
    pub fn close(&self) -> Result<()> {
        let mut idx = self.idx.write();
        if idx.is_closed() {
            return Ok(());
        }

        let mut next = *idx;
        next.set_closed();
        self.persist(&next)?;
        *idx = next;
        Ok(())
    }

    /// Writes an index image at offset 0. The in-memory index is only
    /// replaced once this succeeds.
    fn persist(&self, next: &TopicIndex) -> Result<()> {
        self.file
            .write_at(&next.to_bytes(), 0)
            .wrap_err_with(|| format!("failed to persist index of topic {}", self.id))?;
        Ok(())
    }

    fn drained_error(&self, idx: &TopicIndex) -> eyre::Report {
        if idx.is_closed() {
            Error::ClosedTopic.into()
        } else {
            Error::EndOfFile.into()
        }
    }
}
