//! # Queue
//!
//! The queue owns one storage volume and the map from topic id to
//! [`Topic`]. Opening a queue re-opens the volume and eagerly rehydrates
//! a topic for every file already present, so a damaged index surfaces
//! at startup rather than on first use.

use eyre::{Result, WrapErr};
use hashbrown::HashMap;
use log::debug;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;

use super::topic::Topic;
use crate::storage::{Volume, VolumeOptions};

/// Block payload size used for queue volumes: 512 KiB.
pub const QUEUE_BLOCK_SIZE: u32 = 512 << 10;

/// Round payload size used for queue volumes: 256 MiB.
pub const QUEUE_ROUND_SIZE: u64 = 256 << 20;

/// A set of durable topics persisted in one volume directory.
#[derive(Debug)]
pub struct Queue {
    volume: Volume,
    topics: RwLock<HashMap<u32, Arc<Topic>>>,
}

impl Queue {
    /// Opens the queue at `path`, creating the directory if needed and
    /// rehydrating every topic found in it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Queue> {
        let volume = Volume::open(
            path.as_ref(),
            VolumeOptions {
                block_size: QUEUE_BLOCK_SIZE,
                round_size: QUEUE_ROUND_SIZE,
            },
        )
        .wrap_err_with(|| format!("failed to open queue at '{}'", path.as_ref().display()))?;

        let mut topics = HashMap::new();
        for file in volume.files() {
            let id = file.fd();
            let topic = Topic::open(&volume, id)?;
            topics.insert(id, Arc::new(topic));
        }

        debug!(
            "queue '{}': opened with {} topics",
            path.as_ref().display(),
            topics.len()
        );

        Ok(Queue {
            volume,
            topics: RwLock::new(topics),
        })
    }

    /// Returns the topic with this id, creating it if absent.
    pub fn get(&self, id: u32) -> Result<Arc<Topic>> {
        if let Some(topic) = self.topics.read().get(&id) {
            return Ok(topic.clone());
        }

        let mut topics = self.topics.write();
        if let Some(topic) = topics.get(&id) {
            return Ok(topic.clone());
        }

        let topic = Arc::new(Topic::open(&self.volume, id)?);
        topics.insert(id, topic.clone());
        Ok(topic)
    }

    /// Snapshot of all topics, ascending by id.
    pub fn topics(&self) -> Vec<Arc<Topic>> {
        let topics = self.topics.read();
        let mut snapshot: Vec<Arc<Topic>> = topics.values().cloned().collect();
        snapshot.sort_by_key(|t| t.id());
        snapshot
    }

    /// Flushes the backing volume to disk.
    pub fn sync(&self) -> Result<()> {
        self.volume.sync()
    }

    /// Flushes and unmaps the backing volume. Topics obtained from this
    /// queue fail on any further disk access.
    pub fn close(&self) -> Result<()> {
        self.volume.close()
    }
}
