//! In-process durable streamer.
//!
//! Each topic is an append-only log. A durable subscription remembers which
//! sequence numbers were acknowledged; on (re)subscribe it starts from the lowest
//! unacknowledged message, so anything delivered but not acked is delivered again.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::{BoxMessage, Message, Streamer, Subscription, SubscriptionError};

type DurableKey = (String, String);

#[derive(Default)]
struct Durable {
    /// Every sequence below `floor` is acked.
    floor: usize,
    /// Acked sequences at or above `floor`.
    acked: FxHashSet<usize>,
    active: bool,
}

impl Durable {
    fn ack(&mut self, seq: usize) {
        if seq < self.floor {
            return;
        }
        self.acked.insert(seq);
        while self.acked.remove(&self.floor) {
            self.floor += 1;
        }
    }

    fn is_acked(&self, seq: usize) -> bool {
        seq < self.floor || self.acked.contains(&seq)
    }
}

#[derive(Default)]
struct State {
    logs: FxHashMap<String, Vec<Bytes>>,
    durables: FxHashMap<DurableKey, Durable>,
}

struct Shared {
    state: Mutex<State>,
    published: watch::Sender<u64>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, key: &DurableKey) {
        if let Some(d) = self.lock().durables.get_mut(key) {
            d.active = false;
        }
    }
}

/// Cloneable handle; clones share the same topics and durables.
#[derive(Clone)]
pub struct MemStreamer {
    shared: Arc<Shared>,
}

impl Default for MemStreamer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStreamer {
    pub fn new() -> Self {
        let (published, _) = watch::channel(0u64);
        Self { shared: Arc::new(Shared { state: Mutex::new(State::default()), published }) }
    }

    /// Messages published on `topic` so far.
    pub fn published(&self, topic: &str) -> usize {
        self.shared.lock().logs.get(topic).map(|l| l.len()).unwrap_or(0)
    }

    /// Messages on `topic` not yet acknowledged by `durable`.
    pub fn pending(&self, topic: &str, durable: &str) -> usize {
        let state = self.shared.lock();
        let published = state.logs.get(topic).map(|l| l.len()).unwrap_or(0);
        match state.durables.get(&(topic.to_string(), durable.to_string())) {
            Some(d) => published.saturating_sub(d.floor + d.acked.len()),
            None => published,
        }
    }

    /// Poll until `durable` has acknowledged everything on `topic` or `timeout` elapses.
    pub async fn wait_drained(&self, topic: &str, durable: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.pending(topic, durable) == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Streamer for MemStreamer {
    async fn persistent_subscribe(
        &self,
        topic: &str,
        durable_name: &str,
    ) -> Result<Box<dyn Subscription>, SubscriptionError> {
        let key = (topic.to_string(), durable_name.to_string());
        let cursor = {
            let mut state = self.shared.lock();
            state.logs.entry(topic.to_string()).or_default();
            let durable = state.durables.entry(key.clone()).or_default();
            if durable.active {
                return Err(SubscriptionError::AlreadySubscribed {
                    topic: topic.to_string(),
                    durable: durable_name.to_string(),
                });
            }
            durable.active = true;
            durable.floor
        };
        info!(topic = %topic, durable = %durable_name, from = cursor, "durable subscription opened");
        Ok(Box::new(MemSubscription {
            shared: Arc::clone(&self.shared),
            rx: self.shared.published.subscribe(),
            key,
            cursor,
            closed: false,
        }))
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), SubscriptionError> {
        self.shared.lock().logs.entry(topic.to_string()).or_default().push(payload);
        self.shared.published.send_modify(|n| *n += 1);
        counter!("bus_published_total", 1u64);
        Ok(())
    }
}

struct MemSubscription {
    shared: Arc<Shared>,
    rx: watch::Receiver<u64>,
    key: DurableKey,
    cursor: usize,
    closed: bool,
}

impl MemSubscription {
    fn poll_next(&mut self) -> Option<BoxMessage> {
        let state = self.shared.lock();
        let log = state.logs.get(&self.key.0)?;
        let durable = state.durables.get(&self.key)?;
        while self.cursor < log.len() {
            let seq = self.cursor;
            self.cursor += 1;
            if !durable.is_acked(seq) {
                return Some(Box::new(MemMessage {
                    shared: Arc::clone(&self.shared),
                    key: self.key.clone(),
                    seq,
                    payload: log[seq].clone(),
                }));
            }
        }
        None
    }
}

#[async_trait]
impl Subscription for MemSubscription {
    async fn next(&mut self) -> Option<BoxMessage> {
        loop {
            // Mark the current publish count seen before looking, so a publish
            // racing with the scan still wakes `changed()`.
            let _ = *self.rx.borrow_and_update();
            if let Some(msg) = self.poll_next() {
                return Some(msg);
            }
            if self.rx.changed().await.is_err() {
                return None;
            }
        }
    }

    async fn close(mut self: Box<Self>) -> Result<(), SubscriptionError> {
        self.closed = true;
        self.shared.release(&self.key);
        debug!(topic = %self.key.0, durable = %self.key.1, "durable subscription closed");
        Ok(())
    }
}

impl Drop for MemSubscription {
    fn drop(&mut self) {
        if !self.closed {
            self.shared.release(&self.key);
        }
    }
}

struct MemMessage {
    shared: Arc<Shared>,
    key: DurableKey,
    seq: usize,
    payload: Bytes,
}

#[async_trait]
impl Message for MemMessage {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn ack(&self) -> Result<(), SubscriptionError> {
        let mut state = self.shared.lock();
        let durable = state
            .durables
            .get_mut(&self.key)
            .ok_or_else(|| SubscriptionError::Ack(format!("unknown durable {}", self.key.1)))?;
        durable.ack(self.seq);
        counter!("bus_acked_total", 1u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_advances_over_contiguous_acks() {
        let mut d = Durable::default();
        d.ack(1);
        assert_eq!(d.floor, 0);
        assert!(d.is_acked(1));
        d.ack(0);
        assert_eq!(d.floor, 2);
        assert!(d.acked.is_empty());
        d.ack(0);
        assert_eq!(d.floor, 2);
    }
}
