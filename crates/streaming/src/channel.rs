//! The audio stream channel
//!
//! Every subscriber owns a bounded queue drained by a dedicated consumer
//! task, so a slow consumer never stalls its siblings. Chunk order is
//! FIFO per subscriber; sequence numbers are strictly increasing within
//! one utterance, with gaps where chunks were dropped.
//!
//! Utterance boundaries (`notify_start` / `notify_end`) are delivered
//! with drop-oldest semantics regardless of the chunk strategy: a stalled
//! queue sheds audio, never the boundary markers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use aituber_core::{AudioChunk, AudioMetadata};

use crate::backpressure::{BackpressureStrategy, PublishResult, SubscriberConfig};
use crate::StreamError;

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

/// Consumer-side callbacks for one utterance.
///
/// Callback errors are isolated per subscriber: they are logged and
/// counted, and never reach the publisher or other subscribers.
#[async_trait]
pub trait AudioSubscriber: Send + Sync {
    async fn on_audio_start(&self, metadata: AudioMetadata) -> Result<(), String>;

    async fn on_audio_chunk(&self, chunk: AudioChunk) -> Result<(), String>;

    async fn on_audio_end(&self, metadata: AudioMetadata) -> Result<(), String>;
}

#[derive(Debug, Clone)]
enum AudioEvent {
    Start(AudioMetadata),
    Chunk(AudioChunk),
    End(AudioMetadata),
}

/// Bounded queue supporting all four backpressure strategies.
struct SubscriberQueue {
    items: Mutex<VecDeque<AudioEvent>>,
    capacity: usize,
    item_added: Notify,
    item_removed: Notify,
    closed: AtomicBool,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            item_added: Notify::new(),
            item_removed: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn try_push(&self, event: AudioEvent) -> bool {
        self.try_push_owned(event).is_ok()
    }

    /// Returns the event on a full queue so blocking pushes can retry.
    fn try_push_owned(&self, event: AudioEvent) -> Result<(), AudioEvent> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(event);
        }
        items.push_back(event);
        drop(items);
        self.item_added.notify_one();
        Ok(())
    }

    /// Evicts the oldest item when full; never fails.
    fn push_evicting(&self, event: AudioEvent) -> bool {
        let mut items = self.items.lock();
        let mut evicted = false;
        if items.len() >= self.capacity {
            items.pop_front();
            evicted = true;
        }
        items.push_back(event);
        drop(items);
        self.item_added.notify_one();
        evicted
    }

    async fn push_blocking(&self, event: AudioEvent) -> Result<(), StreamError> {
        let mut pending = event;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(StreamError::Closed);
            }
            let removed = self.item_removed.notified();
            match self.try_push_owned(pending) {
                Ok(()) => return Ok(()),
                Err(returned) => {
                    pending = returned;
                    removed.await;
                }
            }
        }
    }

    async fn pop(&self) -> Option<AudioEvent> {
        loop {
            let added = self.item_added.notified();
            if let Some(event) = self.items.lock().pop_front() {
                self.item_removed.notify_one();
                return Some(event);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            added.await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.item_added.notify_waiters();
        self.item_removed.notify_waiters();
    }
}

/// Delivery counters for one subscriber (copies on read).
#[derive(Debug, Clone, Default)]
pub struct SubscriberStats {
    pub delivered_count: u64,
    pub drop_count: u64,
    pub error_count: u64,
}

struct SubscriberEntry {
    name: String,
    config: SubscriberConfig,
    queue: Arc<SubscriberQueue>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    delivered_count: Arc<AtomicU64>,
    drop_count: AtomicU64,
    error_count: Arc<AtomicU64>,
    degradation_warned: AtomicBool,
}

/// Fan-out channel from one TTS publisher to many audio consumers.
#[derive(Default)]
pub struct AudioStreamChannel {
    subscribers: DashMap<SubscriptionId, Arc<SubscriberEntry>>,
    closed: AtomicBool,
}

impl AudioStreamChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber and spawns its consumer task.
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        subscriber: Arc<dyn AudioSubscriber>,
        config: SubscriberConfig,
    ) -> SubscriptionId {
        let name = name.into();
        let config = config.normalized();
        let id = SubscriptionId(Uuid::new_v4());
        let queue = Arc::new(SubscriberQueue::new(config.queue_size));

        let entry = Arc::new(SubscriberEntry {
            name: name.clone(),
            config,
            queue: Arc::clone(&queue),
            consumer: Mutex::new(None),
            delivered_count: Arc::new(AtomicU64::new(0)),
            drop_count: AtomicU64::new(0),
            error_count: Arc::new(AtomicU64::new(0)),
            degradation_warned: AtomicBool::new(false),
        });

        let consumer_name = name.clone();
        let delivered = Arc::clone(&entry.delivered_count);
        let errors = Arc::clone(&entry.error_count);
        let handle = tokio::spawn(async move {
            while let Some(event) = queue.pop().await {
                let result = match event {
                    AudioEvent::Start(meta) => subscriber.on_audio_start(meta).await,
                    AudioEvent::Chunk(chunk) => {
                        let r = subscriber.on_audio_chunk(chunk).await;
                        delivered.fetch_add(1, Ordering::SeqCst);
                        r
                    }
                    AudioEvent::End(meta) => subscriber.on_audio_end(meta).await,
                };
                if let Err(message) = result {
                    errors.fetch_add(1, Ordering::SeqCst);
                    error!(
                        subscriber = %consumer_name,
                        error = %message,
                        "audio subscriber callback failed"
                    );
                }
            }
            debug!(subscriber = %consumer_name, "audio consumer task exiting");
        });

        *entry.consumer.lock() = Some(handle);
        self.subscribers.insert(id, entry);
        info!(subscriber = %name, "audio subscriber registered");
        id
    }

    /// Removes a subscriber and stops its consumer.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), StreamError> {
        let (_, entry) = self
            .subscribers
            .remove(&id)
            .ok_or(StreamError::UnknownSubscription)?;
        entry.queue.close();
        if let Some(handle) = entry.consumer.lock().take() {
            handle.abort();
        }
        info!(subscriber = %entry.name, "audio subscriber removed");
        Ok(())
    }

    /// Announces the start of one utterance to every subscriber.
    pub fn notify_start(&self, metadata: AudioMetadata) {
        for entry in self.subscribers.iter() {
            entry.queue.push_evicting(AudioEvent::Start(metadata.clone()));
        }
    }

    /// Announces the end of one utterance to every subscriber.
    pub fn notify_end(&self, metadata: AudioMetadata) {
        for entry in self.subscribers.iter() {
            entry.queue.push_evicting(AudioEvent::End(metadata.clone()));
        }
    }

    /// Distributes one chunk, applying each subscriber's backpressure
    /// strategy independently.
    pub async fn publish(&self, chunk: AudioChunk) -> PublishResult {
        let mut result = PublishResult::default();
        if self.closed.load(Ordering::SeqCst) {
            return result;
        }

        let entries: Vec<Arc<SubscriberEntry>> =
            self.subscribers.iter().map(|e| Arc::clone(&e)).collect();

        for entry in entries {
            let event = AudioEvent::Chunk(chunk.clone());
            match entry.config.backpressure_strategy {
                BackpressureStrategy::Block => match entry.queue.push_blocking(event).await {
                    Ok(()) => result.success_count += 1,
                    Err(_) => {
                        result
                            .errors
                            .insert(entry.name.clone(), "queue closed".to_string());
                    }
                },
                BackpressureStrategy::DropNewest => {
                    if entry.queue.try_push(event) {
                        result.success_count += 1;
                    } else {
                        entry.drop_count.fetch_add(1, Ordering::SeqCst);
                        result.drop_count += 1;
                        self.check_degradation(&entry);
                    }
                }
                BackpressureStrategy::DropOldest => {
                    if entry.queue.push_evicting(event) {
                        entry.drop_count.fetch_add(1, Ordering::SeqCst);
                        result.drop_count += 1;
                        self.check_degradation(&entry);
                    }
                    result.success_count += 1;
                }
                BackpressureStrategy::FailFast => {
                    if entry.queue.try_push(event) {
                        result.success_count += 1;
                    } else {
                        entry.drop_count.fetch_add(1, Ordering::SeqCst);
                        result.drop_count += 1;
                        result.errors.insert(
                            entry.name.clone(),
                            StreamError::QueueFull(entry.name.clone()).to_string(),
                        );
                    }
                }
            }
        }

        result
    }

    fn check_degradation(&self, entry: &SubscriberEntry) {
        let drops = entry.drop_count.load(Ordering::SeqCst);
        let delivered = entry.delivered_count.load(Ordering::SeqCst);
        let total = drops + delivered;
        if total < 10 {
            return;
        }
        let rate = drops as f64 / total as f64;
        if rate > entry.config.degradation_threshold
            && !entry.degradation_warned.swap(true, Ordering::SeqCst)
        {
            warn!(
                subscriber = %entry.name,
                drop_rate = format!("{:.0}%", rate * 100.0),
                "audio subscriber is degraded (drop rate above threshold)"
            );
        }
    }

    /// Per-subscriber counters, keyed by subscriber name.
    pub fn stats(&self) -> Vec<(String, SubscriberStats)> {
        self.subscribers
            .iter()
            .map(|entry| {
                (
                    entry.name.clone(),
                    SubscriberStats {
                        delivered_count: entry.delivered_count.load(Ordering::SeqCst),
                        drop_count: entry.drop_count.load(Ordering::SeqCst),
                        error_count: entry.error_count.load(Ordering::SeqCst),
                    },
                )
            })
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Stops every consumer task and rejects further publishes.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for entry in self.subscribers.iter() {
            entry.queue.close();
        }
        self.subscribers.clear();
        info!("audio stream channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::time::Duration;

    struct Recorder {
        chunks: SyncMutex<Vec<u64>>,
        started: AtomicU64,
        ended: AtomicU64,
        stall: Option<Arc<Notify>>,
    }

    impl Recorder {
        fn new(stall: Option<Arc<Notify>>) -> Self {
            Self {
                chunks: SyncMutex::new(Vec::new()),
                started: AtomicU64::new(0),
                ended: AtomicU64::new(0),
                stall,
            }
        }
    }

    #[async_trait]
    impl AudioSubscriber for Recorder {
        async fn on_audio_start(&self, _metadata: AudioMetadata) -> Result<(), String> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_audio_chunk(&self, chunk: AudioChunk) -> Result<(), String> {
            self.chunks.lock().push(chunk.sequence);
            if let Some(stall) = &self.stall {
                stall.notified().await;
            }
            Ok(())
        }

        async fn on_audio_end(&self, _metadata: AudioMetadata) -> Result<(), String> {
            self.ended.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn chunk(sequence: u64) -> AudioChunk {
        AudioChunk::new(vec![0u8; 32], 16_000, 1, sequence)
    }

    #[tokio::test]
    async fn test_full_utterance_reaches_subscriber() {
        let channel = AudioStreamChannel::new();
        let recorder = Arc::new(Recorder::new(None));
        channel.subscribe("lipsync", recorder.clone(), SubscriberConfig::default());

        let meta = AudioMetadata::new("hello", 16_000, 1);
        channel.notify_start(meta.clone());
        for seq in 1..=3 {
            let result = channel.publish(chunk(seq)).await;
            assert_eq!(result.success_count, 1);
            assert_eq!(result.drop_count, 0);
        }
        channel.notify_end(meta);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(recorder.started.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.ended.load(Ordering::SeqCst), 1);
        assert_eq!(*recorder.chunks.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_drop_newest_backpressure() {
        let channel = AudioStreamChannel::new();
        let stall = Arc::new(Notify::new());
        let recorder = Arc::new(Recorder::new(Some(Arc::clone(&stall))));
        channel.subscribe(
            "slow",
            recorder.clone(),
            SubscriberConfig {
                queue_size: 2,
                backpressure_strategy: BackpressureStrategy::DropNewest,
                ..Default::default()
            },
        );

        // Park the consumer inside a chunk callback.
        channel.publish(chunk(0)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*recorder.chunks.lock(), vec![0]);

        // Queue (cap 2) fills with 1 and 2; 3..5 are dropped.
        let mut dropped = 0;
        for seq in 1..=5 {
            dropped += channel.publish(chunk(seq)).await.drop_count;
        }
        assert_eq!(dropped, 3);

        let stats = channel.stats();
        assert_eq!(stats[0].1.drop_count, 3);

        // Release the consumer; only the queued chunks arrive, in order.
        for _ in 0..8 {
            stall.notify_one();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let seen = recorder.chunks.lock().clone();
        assert_eq!(seen, vec![0, 1, 2]);
        // Strictly increasing with gaps allowed.
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_drop_oldest_keeps_newest() {
        let channel = AudioStreamChannel::new();
        let stall = Arc::new(Notify::new());
        let recorder = Arc::new(Recorder::new(Some(Arc::clone(&stall))));
        channel.subscribe(
            "slow",
            recorder.clone(),
            SubscriberConfig {
                queue_size: 2,
                backpressure_strategy: BackpressureStrategy::DropOldest,
                ..Default::default()
            },
        );

        channel.publish(chunk(0)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        for seq in 1..=5 {
            channel.publish(chunk(seq)).await;
        }

        for _ in 0..8 {
            stall.notify_one();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // The newest two survived the sliding window.
        assert_eq!(recorder.chunks.lock().clone(), vec![0, 4, 5]);
    }

    #[tokio::test]
    async fn test_fail_fast_reports_error_but_spares_others() {
        let channel = AudioStreamChannel::new();
        let stall = Arc::new(Notify::new());
        let slow = Arc::new(Recorder::new(Some(Arc::clone(&stall))));
        let fast = Arc::new(Recorder::new(None));
        channel.subscribe(
            "strict",
            slow,
            SubscriberConfig {
                queue_size: 1,
                backpressure_strategy: BackpressureStrategy::FailFast,
                ..Default::default()
            },
        );
        channel.subscribe("healthy", fast.clone(), SubscriberConfig::default());

        channel.publish(chunk(0)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        channel.publish(chunk(1)).await;
        let result = channel.publish(chunk(2)).await;

        assert!(result.errors.contains_key("strict"));
        // The healthy subscriber got everything.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*fast.chunks.lock(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let channel = AudioStreamChannel::new();
        let recorder = Arc::new(Recorder::new(None));
        let id = channel.subscribe("gone", recorder.clone(), SubscriberConfig::default());
        channel.unsubscribe(id).unwrap();

        let result = channel.publish(chunk(1)).await;
        assert_eq!(result.success_count, 0);
        assert_eq!(channel.subscriber_count(), 0);
        assert!(channel.unsubscribe(id).is_err());
    }
}
