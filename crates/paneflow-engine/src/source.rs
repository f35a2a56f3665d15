//! Stream graph contract
//!
//! Deltas flow from a [`DeltaSource`] to every subscribed [`DeltaSink`]. A
//! [`Junction`] is the fan-out point every publishing component embeds.

use paneflow_core::{Delta, Result, StreamError};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Consumer of keyed deltas
pub trait DeltaSink<K, V>: Send + Sync {
    /// Handle one delta; deltas of a key arrive in order
    fn accept(&self, delta: Delta<K, V>) -> Result<()>;
}

impl<K, V, F> DeltaSink<K, V> for F
where
    F: Fn(Delta<K, V>) -> Result<()> + Send + Sync,
{
    fn accept(&self, delta: Delta<K, V>) -> Result<()> {
        self(delta)
    }
}

/// Producer of keyed deltas
pub trait DeltaSource<K, V>: Send + Sync {
    fn subscribe(&self, sink: Arc<dyn DeltaSink<K, V>>);
}

/// Fan-out publisher
pub struct Junction<K, V> {
    subscribers: RwLock<Vec<Arc<dyn DeltaSink<K, V>>>>,
}

impl<K, V> Default for Junction<K, V> {
    fn default() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }
}

impl<K: Clone, V: Clone> Junction<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver to every subscriber; returns the first failure after all were tried
    pub fn publish(&self, delta: Delta<K, V>) -> Result<()> {
        let subscribers = self.subscribers.read().clone();
        let mut first_error = None;
        for subscriber in subscribers {
            if let Err(err) = subscriber.accept(delta.clone()) {
                warn!("Subscriber rejected delta: {}", err);
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl<K, V> DeltaSource<K, V> for Junction<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn subscribe(&self, sink: Arc<dyn DeltaSink<K, V>>) {
        self.subscribers.write().push(sink);
    }
}

impl<K, V> DeltaSink<K, V> for Junction<K, V>
where
    K: Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn accept(&self, delta: Delta<K, V>) -> Result<()> {
        self.publish(delta)
    }
}

/// Replays a fixed list of deltas
pub struct MemorySource<K, V> {
    deltas: Vec<Delta<K, V>>,
    junction: Junction<K, V>,
}

impl<K: Clone, V: Clone> MemorySource<K, V> {
    pub fn new(deltas: Vec<Delta<K, V>>) -> Self {
        Self {
            deltas,
            junction: Junction::new(),
        }
    }

    /// Publish every delta in order; stops at the first rejected delta
    pub fn replay(&self) -> Result<usize> {
        for delta in &self.deltas {
            self.junction.publish(delta.clone())?;
        }
        Ok(self.deltas.len())
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

impl<K, V> DeltaSource<K, V> for MemorySource<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn subscribe(&self, sink: Arc<dyn DeltaSink<K, V>>) {
        self.junction.subscribe(sink);
    }
}

/// Source fed through a tokio channel
pub struct ChannelSource<K, V> {
    receiver: mpsc::Receiver<Delta<K, V>>,
    junction: Junction<K, V>,
}

impl<K: Clone, V: Clone> ChannelSource<K, V> {
    /// Create a source with the given buffer size; returns (sender, source)
    pub fn new(buffer_size: usize) -> (mpsc::Sender<Delta<K, V>>, Self) {
        let (tx, rx) = mpsc::channel(buffer_size);
        let source = Self {
            receiver: rx,
            junction: Junction::new(),
        };
        (tx, source)
    }

    /// Forward deltas until every sender is dropped; returns how many were
    /// delivered without error
    pub async fn run(mut self) -> usize {
        let mut delivered = 0;
        while let Some(delta) = self.receiver.recv().await {
            if self.junction.publish(delta).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

impl<K, V> DeltaSource<K, V> for ChannelSource<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn subscribe(&self, sink: Arc<dyn DeltaSink<K, V>>) {
        self.junction.subscribe(sink);
    }
}

/// Forwards deltas into an unbounded tokio channel
pub struct ChannelSink<K, V> {
    sender: mpsc::UnboundedSender<Delta<K, V>>,
}

impl<K, V> ChannelSink<K, V> {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delta<K, V>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sender: tx }, rx)
    }
}

impl<K, V> DeltaSink<K, V> for ChannelSink<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn accept(&self, delta: Delta<K, V>) -> Result<()> {
        self.sender
            .send(delta)
            .map_err(|_| StreamError::StreamClosed("channel receiver dropped".to_string()))
    }
}

/// Keeps every delta it receives
pub struct RecordingSink<K, V> {
    deltas: Mutex<Vec<Delta<K, V>>>,
}

impl<K, V> Default for RecordingSink<K, V> {
    fn default() -> Self {
        Self {
            deltas: Mutex::new(Vec::new()),
        }
    }
}

impl<K: Clone, V: Clone> RecordingSink<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deltas(&self) -> Vec<Delta<K, V>> {
        self.deltas.lock().clone()
    }

    /// Values of every update, in arrival order
    pub fn values(&self) -> Vec<V> {
        self.deltas
            .lock()
            .iter()
            .filter_map(|delta| delta.value().cloned())
            .collect()
    }

    /// Remove and return everything recorded so far
    pub fn take(&self) -> Vec<Delta<K, V>> {
        std::mem::take(&mut *self.deltas.lock())
    }

    pub fn len(&self) -> usize {
        self.deltas.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.lock().is_empty()
    }
}

impl<K, V> DeltaSink<K, V> for RecordingSink<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn accept(&self, delta: Delta<K, V>) -> Result<()> {
        self.deltas.lock().push(delta);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_junction_fans_out() {
        let junction = Junction::new();
        let first = Arc::new(RecordingSink::new());
        let second = Arc::new(RecordingSink::new());
        junction.subscribe(first.clone());
        junction.subscribe(second.clone());

        junction.publish(Delta::update("a", 1)).unwrap();
        junction.publish(Delta::remove("a")).unwrap();

        assert_eq!(junction.subscriber_count(), 2);
        assert_eq!(first.deltas(), second.deltas());
        assert_eq!(first.values(), vec![1]);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_junction_reports_failures_after_delivering() {
        let junction = Junction::new();
        let failing = |_: Delta<&str, i32>| -> Result<()> { Err(StreamError::user("nope")) };
        let recording = Arc::new(RecordingSink::new());
        junction.subscribe(Arc::new(failing));
        junction.subscribe(recording.clone());

        assert!(junction.publish(Delta::update("a", 1)).is_err());
        assert_eq!(recording.len(), 1);
    }

    #[test]
    fn test_memory_source_replays_in_order() {
        let source = MemorySource::new(vec![
            Delta::update("a", 1),
            Delta::update("b", 2),
            Delta::remove("a"),
        ]);
        let sink = Arc::new(RecordingSink::new());
        source.subscribe(sink.clone());

        assert_eq!(source.replay().unwrap(), 3);
        assert_eq!(sink.take().len(), 3);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_channel_source_and_sink() {
        let (tx, source) = ChannelSource::new(8);
        let (sink, mut rx) = ChannelSink::new();
        source.subscribe(Arc::new(sink));

        let runner = tokio::spawn(source.run());
        tx.send(Delta::update("k", 7)).await.unwrap();
        drop(tx);

        assert_eq!(runner.await.unwrap(), 1);
        assert_eq!(rx.recv().await, Some(Delta::update("k", 7)));
    }

    #[test]
    fn test_closed_channel_sink_errors() {
        let (sink, rx) = ChannelSink::<&str, i32>::new();
        drop(rx);
        let err = sink.accept(Delta::update("k", 1)).unwrap_err();
        assert!(matches!(err, StreamError::StreamClosed(_)));
    }
}
