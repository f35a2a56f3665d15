//! Partitioned per-key delivery
//!
//! A [`PartitionedDriver`] owns N worker tasks, each draining a bounded
//! mailbox into the same sink. Deltas are routed by a stable hash of their
//! key, so every key has exactly one worker and its deltas are applied in the
//! order they were sent.

use crate::source::DeltaSink;
use paneflow_core::{Delta, KeyData, Result, StreamError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const PARTITION_SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Number of worker tasks
    pub partitions: usize,
    /// Bounded mailbox size per worker
    pub mailbox_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            partitions: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            mailbox_size: 1024,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn with_mailbox_size(mut self, mailbox_size: usize) -> Self {
        self.mailbox_size = mailbox_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.partitions == 0 {
            return Err(StreamError::Configuration(
                "driver needs at least one partition".to_string(),
            ));
        }
        if self.mailbox_size == 0 {
            return Err(StreamError::Configuration(
                "driver mailbox size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Key-partitioned worker pool in front of a sink
pub struct PartitionedDriver<K, V> {
    mailboxes: Vec<mpsc::Sender<Delta<K, V>>>,
    workers: Vec<JoinHandle<u64>>,
    hasher: ahash::RandomState,
    failures: Arc<AtomicU64>,
}

impl<K, V> PartitionedDriver<K, V>
where
    K: KeyData,
    V: Send + 'static,
{
    /// Spawn the workers on the current tokio runtime
    pub fn spawn(config: EngineConfig, sink: Arc<dyn DeltaSink<K, V>>) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StreamError::Scheduler(format!("no tokio runtime: {}", e)))?;
        let failures = Arc::new(AtomicU64::new(0));

        let mut mailboxes = Vec::with_capacity(config.partitions);
        let mut workers = Vec::with_capacity(config.partitions);
        for partition in 0..config.partitions {
            let (tx, mut rx) = mpsc::channel::<Delta<K, V>>(config.mailbox_size);
            let sink = sink.clone();
            let failures = failures.clone();
            workers.push(runtime.spawn(async move {
                let mut delivered = 0u64;
                while let Some(delta) = rx.recv().await {
                    if let Err(e) = sink.accept(delta) {
                        warn!("Partition {} failed to deliver a delta: {}", partition, e);
                        failures.fetch_add(1, Ordering::Relaxed);
                    }
                    delivered += 1;
                }
                debug!("Partition {} drained after {} deltas", partition, delivered);
                delivered
            }));
            mailboxes.push(tx);
        }

        info!("Spawned partitioned driver with {} workers", config.partitions);
        Ok(Self {
            mailboxes,
            workers,
            hasher: ahash::RandomState::with_seeds(
                PARTITION_SEEDS[0],
                PARTITION_SEEDS[1],
                PARTITION_SEEDS[2],
                PARTITION_SEEDS[3],
            ),
            failures,
        })
    }

    /// Worker index of `key`; stable across drivers with the same partition count
    pub fn partition_for(&self, key: &K) -> usize {
        (self.hasher.hash_one(key) % self.mailboxes.len() as u64) as usize
    }

    /// Queue a delta on its key's worker, waiting while the mailbox is full
    pub async fn send(&self, delta: Delta<K, V>) -> Result<()> {
        let partition = self.partition_for(delta.key());
        self.mailboxes[partition]
            .send(delta)
            .await
            .map_err(|_| StreamError::StreamClosed(format!("partition {} stopped", partition)))
    }

    pub fn partitions(&self) -> usize {
        self.mailboxes.len()
    }

    /// Deltas the sink rejected so far
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Close the mailboxes and wait for every queued delta to be delivered.
    ///
    /// Returns the number of deltas delivered.
    pub async fn shutdown(self) -> Result<u64> {
        drop(self.mailboxes);
        let mut delivered = 0;
        for worker in self.workers {
            delivered += worker
                .await
                .map_err(|e| StreamError::Scheduler(format!("driver worker failed: {}", e)))?;
        }
        Ok(delivered)
    }
}
