//! Synthetic EEG: phase-lagged alpha oscillations plus uniform noise.

use super::{Producer, ProducerError};
use crate::config::SyntheticEegConfig;
use crate::pipeline::{BusFrame, BusHandle, ChannelMap, FramePayload, FrameType};
use crate::types::{Clock, SystemClock};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Generates consecutive blocks of multi-channel samples.
///
/// Channel `k` oscillates at `frequency_hz` with phase `k * phase_lag_rad`.
pub struct EegGenerator {
    config: SyntheticEegConfig,
    rng: StdRng,
    sample_index: u64,
}

impl EegGenerator {
    pub fn new(config: SyntheticEegConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rng,
            sample_index: 0,
        }
    }

    pub fn config(&self) -> &SyntheticEegConfig {
        &self.config
    }

    /// Next `samples_per_frame` samples for every channel
    pub fn next_block(&mut self) -> ChannelMap {
        let n = self.config.samples_per_frame();
        let step = TAU * self.config.frequency_hz / self.config.sample_rate_hz;
        let start = self.sample_index;
        let mut block = ChannelMap::new();

        for (k, name) in self.config.channels.iter().enumerate() {
            let phase = k as f32 * self.config.phase_lag_rad;
            let samples = (0..n as u64)
                .map(|i| {
                    let t = (start + i) as f32;
                    let noise = if self.config.noise > 0.0 {
                        self.rng.gen_range(-self.config.noise..=self.config.noise)
                    } else {
                        0.0
                    };
                    self.config.amplitude * (step * t + phase).sin() + noise
                })
                .collect();
            block.insert(name.clone(), samples);
        }

        self.sample_index += n as u64;
        block
    }
}

/// Publishes one EEG frame per `frame_interval` on its own thread
pub struct SyntheticEegProducer {
    config: SyntheticEegConfig,
    clock: Arc<dyn Clock>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SyntheticEegProducer {
    pub fn new(config: SyntheticEegConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            stop_tx: None,
            handle: None,
        }
    }

    /// Timestamp frames with `clock`
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn validate(&self) -> Result<(), ProducerError> {
        if self.config.channels.is_empty() {
            return Err(ProducerError::Config("no channels configured".into()));
        }
        if !(self.config.sample_rate_hz > 0.0) || self.config.samples_per_frame() == 0 {
            return Err(ProducerError::Config(format!(
                "unusable rates: sample_rate_hz={} frame_rate_hz={}",
                self.config.sample_rate_hz, self.config.frame_rate_hz
            )));
        }
        Ok(())
    }
}

impl Producer for SyntheticEegProducer {
    fn name(&self) -> &str {
        &self.config.source_id
    }

    fn start(&mut self, bus: BusHandle) -> Result<(), ProducerError> {
        if self.is_running() {
            return Err(ProducerError::AlreadyRunning(self.config.source_id.clone()));
        }
        self.validate()?;

        let (ready_tx, ready_rx) = bounded::<()>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let mut generator = EegGenerator::new(self.config.clone());
        let clock = Arc::clone(&self.clock);
        let source_id = self.config.source_id.clone();
        let sample_rate = self.config.sample_rate_hz;
        let interval = self.config.frame_interval();

        let handle = thread::Builder::new()
            .name(format!("producer-{}", source_id))
            .spawn(move || {
                tracing::debug!(producer = %source_id, "synthetic EEG thread started");
                let _ = ready_tx.send(());
                loop {
                    let frame = BusFrame::new(
                        clock.now_ms(),
                        source_id.clone(),
                        FrameType::Eeg,
                        FramePayload::channels(sample_rate, generator.next_block()),
                    );
                    bus.publish(frame);

                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!(producer = %source_id, "synthetic EEG thread exiting");
            })?;

        let timeout = self.config.connect_timeout();
        if ready_rx.recv_timeout(timeout).is_err() {
            drop(stop_tx);
            let _ = handle.join();
            return Err(ProducerError::ConnectTimeout {
                name: self.config.source_id.clone(),
                timeout,
            });
        }

        tracing::info!(
            producer = %self.config.source_id,
            channels = self.config.channels.len(),
            frame_rate_hz = self.config.frame_rate_hz,
            "producer started"
        );
        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(producer = %self.config.source_id, "producer thread panicked");
            } else {
                tracing::info!(producer = %self.config.source_id, "producer stopped");
            }
        }
    }

    fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }
}

impl Drop for SyntheticEegProducer {
    fn drop(&mut self) {
        self.stop();
    }
}
