//! Synchronous typed publish/subscribe bus.
//!
//! `publish` calls every subscriber, in registration order, on the
//! publishing thread. The subscriber list is cloned under the lock and the
//! handlers run outside it, so a handler may subscribe or unsubscribe
//! without deadlocking. There is no backpressure: a slow handler delays the
//! publisher, so handlers should be cheap or hand frames to another thread.
//! [`Bus::inbox`] is the stock way of doing that.

use crate::pipeline::value::{ChannelMap, Value};
use crossbeam_channel::{bounded, Receiver, TrySendError};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Category of a bus frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    Vision,
    Audio,
    #[serde(alias = "EEG")]
    Eeg,
    #[default]
    System,
}

impl FrameType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameType::Vision => "vision",
            FrameType::Audio => "audio",
            FrameType::Eeg => "eeg",
            FrameType::System => "system",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vision" => Ok(FrameType::Vision),
            "audio" => Ok(FrameType::Audio),
            "eeg" => Ok(FrameType::Eeg),
            "system" => Ok(FrameType::System),
            other => Err(format!("unknown frame type '{}'", other)),
        }
    }
}

/// Frame contents
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FramePayload {
    #[default]
    Empty,
    Scalar {
        value: f64,
    },
    Series {
        samples: Arc<Vec<f32>>,
    },
    Channels {
        sample_rate_hz: f32,
        channels: Arc<ChannelMap>,
    },
    Text {
        text: String,
    },
    /// A node value published by a sink
    Value {
        value: Value,
    },
}

impl FramePayload {
    pub fn channels(sample_rate_hz: f32, channels: ChannelMap) -> Self {
        FramePayload::Channels {
            sample_rate_hz,
            channels: Arc::new(channels),
        }
    }

    /// Value a bus source emits for this payload
    pub fn to_value(&self) -> Value {
        match self {
            FramePayload::Empty => Value::Empty,
            FramePayload::Scalar { value } => Value::Scalar(*value),
            FramePayload::Series { samples } => Value::Series(Arc::clone(samples)),
            FramePayload::Channels { channels, .. } => Value::Channels(Arc::clone(channels)),
            FramePayload::Text { text } => Value::Text(text.clone()),
            FramePayload::Value { value } => value.clone(),
        }
    }

    /// Payload a sink publishes for a node value
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Empty => FramePayload::Empty,
            Value::Scalar(v) => FramePayload::Scalar { value: *v },
            Value::Series(s) => FramePayload::Series {
                samples: Arc::clone(s),
            },
            Value::Text(t) => FramePayload::Text { text: t.clone() },
            other => FramePayload::Value {
                value: other.clone(),
            },
        }
    }
}

fn clamp_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

fn deserialize_confidence<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
    f32::deserialize(deserializer).map(clamp_confidence)
}

fn default_confidence() -> f32 {
    1.0
}

/// One message on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusFrame {
    /// Milliseconds
    pub timestamp: u64,
    pub source_id: String,
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    pub payload: FramePayload,
    #[serde(
        default = "default_confidence",
        deserialize_with = "deserialize_confidence"
    )]
    confidence: f32,
}

impl BusFrame {
    pub fn new(
        timestamp: u64,
        source_id: impl Into<String>,
        frame_type: FrameType,
        payload: FramePayload,
    ) -> Self {
        Self {
            timestamp,
            source_id: source_id.into(),
            frame_type,
            payload,
            confidence: 1.0,
        }
    }

    /// Set the confidence, clamped to `[0, 1]` (NaN becomes 0)
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = clamp_confidence(confidence);
        self
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }
}

type Handler = Arc<dyn Fn(&BusFrame) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    handlers: Vec<(u64, Handler)>,
}

fn lock(subscribers: &Mutex<Subscribers>) -> MutexGuard<'_, Subscribers> {
    subscribers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared publish/subscribe hub. Clones refer to the same bus.
#[derive(Clone, Default)]
pub struct Bus {
    subscribers: Arc<Mutex<Subscribers>>,
    published: Arc<AtomicU64>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. It receives every frame published after this call
    /// until the returned [`Subscription`] is dropped or unsubscribed.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&BusFrame) + Send + Sync + 'static,
    {
        let mut subscribers = lock(&self.subscribers);
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.handlers.push((id, Arc::new(handler)));
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Deliver `frame` to every current subscriber. Returns the number of
    /// handlers called.
    pub fn publish(&self, frame: BusFrame) -> usize {
        let handlers: Vec<Handler> = lock(&self.subscribers)
            .handlers
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();

        self.published.fetch_add(1, Ordering::Relaxed);
        for handler in &handlers {
            handler(&frame);
        }
        handlers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).handlers.len()
    }

    /// Total frames published on this bus
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Publish-only capability
    pub fn handle(&self) -> BusHandle {
        BusHandle { bus: self.clone() }
    }

    /// Subscribe a bounded queue. Frames arriving while it is full are
    /// dropped and counted.
    pub fn inbox(&self, capacity: usize) -> Inbox {
        let (tx, rx) = bounded(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&dropped);
        let subscription = self.subscribe(move |frame| match tx.try_send(frame.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                counter.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        });
        Inbox {
            rx,
            dropped,
            _subscription: subscription,
        }
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("subscribers", &self.subscriber_count())
            .field("published", &self.published_count())
            .finish()
    }
}

/// Registration of one handler. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    subscribers: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the handler now
    pub fn unsubscribe(self) {
        drop(self);
    }

    fn remove(&self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            lock(&subscribers).handlers.retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Publish-only view of a bus, handed to sink nodes and producers
#[derive(Clone, Debug)]
pub struct BusHandle {
    bus: Bus,
}

impl BusHandle {
    pub fn publish(&self, frame: BusFrame) -> usize {
        self.bus.publish(frame)
    }
}

/// Bounded queue of frames fed by a bus subscription
pub struct Inbox {
    rx: Receiver<BusFrame>,
    dropped: Arc<AtomicU64>,
    _subscription: Subscription,
}

impl Inbox {
    /// Take every queued frame, oldest first
    pub fn drain(&self) -> Vec<BusFrame> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Frames discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
