//! Sliding-window multi-channel buffer with decay-based pruning

use std::collections::{BTreeMap, VecDeque};

/// Ring buffer for one channel
#[derive(Debug, Clone)]
pub struct ChannelBuffer {
    samples: VecDeque<f32>,
    last_seen: u64,
}

impl ChannelBuffer {
    fn new(window_size: usize, now_ms: u64) -> Self {
        Self {
            samples: VecDeque::with_capacity(window_size),
            last_seen: now_ms,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Timestamp (ms) of the last update
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    /// Oldest-first copy of the buffered samples
    pub fn to_vec(&self) -> Vec<f32> {
        self.samples.iter().copied().collect()
    }
}

/// Per-channel windows that feed the coherence pipeline.
///
/// Channels that stop receiving samples for longer than `decay_ms` are
/// removed by [`prune`](Self::prune), so the analyzed channel set follows
/// whichever sources are currently alive.
#[derive(Debug, Clone)]
pub struct ChannelAggregator {
    window_size: usize,
    decay_ms: u64,
    channels: BTreeMap<String, ChannelBuffer>,
}

impl ChannelAggregator {
    pub fn new(window_size: usize, decay_ms: u64) -> Self {
        Self {
            window_size: window_size.max(1),
            decay_ms,
            channels: BTreeMap::new(),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn decay_ms(&self) -> u64 {
        self.decay_ms
    }

    /// Append samples to `name`, keeping only the newest `window_size`.
    pub fn push(&mut self, name: &str, samples: &[f32], now_ms: u64) {
        let window = self.window_size;
        let buffer = self
            .channels
            .entry(name.to_string())
            .or_insert_with(|| ChannelBuffer::new(window, now_ms));

        let tail = samples.len().saturating_sub(window);
        buffer.samples.extend(&samples[tail..]);
        while buffer.samples.len() > window {
            buffer.samples.pop_front();
        }
        buffer.last_seen = now_ms;
    }

    /// Drop channels whose last update is older than `decay_ms`.
    ///
    /// Returns the names that were removed.
    pub fn prune(&mut self, now_ms: u64) -> Vec<String> {
        let decay = self.decay_ms;
        let stale: Vec<String> = self
            .channels
            .iter()
            .filter(|(_, b)| now_ms.saturating_sub(b.last_seen) > decay)
            .map(|(name, _)| name.clone())
            .collect();

        for name in &stale {
            self.channels.remove(name);
            tracing::debug!(channel = %name, "channel decayed");
        }
        stale
    }

    /// Channels holding a full window, ready for coherence analysis
    pub fn ready_channels(&self) -> BTreeMap<String, Vec<f32>> {
        self.channels
            .iter()
            .filter(|(_, b)| b.len() == self.window_size)
            .map(|(name, b)| (name.clone(), b.to_vec()))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&ChannelBuffer> {
        self.channels.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }
}
