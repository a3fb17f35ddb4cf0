//! Fake accelerators and producers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use stream_engine::coherence::{
    BackendFactory, CoherenceBackend, ComputeTier, CpuBackend, KernelParams, TierFailure,
};
use stream_engine::pipeline::BusHandle;
use stream_engine::producer::{Producer, ProducerError};

/// Accelerator that reports the GPU tier, computes with the CPU math and
/// fails on its `fail_at`-th call
pub struct ScriptedGpu {
    calls: usize,
    fail_at: Option<usize>,
    cpu: CpuBackend,
}

impl CoherenceBackend for ScriptedGpu {
    fn tier(&self) -> ComputeTier {
        ComputeTier::Gpu
    }

    fn backend_name(&self) -> &'static str {
        "scripted-gpu"
    }

    fn pairwise(
        &mut self,
        channels: &[Vec<f32>],
        params: &KernelParams,
    ) -> Result<Vec<f32>, TierFailure> {
        self.calls += 1;
        if Some(self.calls) == self.fail_at {
            return Err(TierFailure::Runtime("injected device loss".to_string()));
        }
        Ok(self.cpu.compute(channels, params))
    }
}

/// Factory for [`ScriptedGpu`] that counts constructions
pub fn scripted_gpu_factory(fail_at: Option<usize>, constructed: Arc<AtomicUsize>) -> BackendFactory {
    Arc::new(move || {
        constructed.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedGpu {
            calls: 0,
            fail_at,
            cpu: CpuBackend::new(),
        }) as Box<dyn CoherenceBackend>)
    })
}

/// Factory whose construction always fails
pub fn unavailable_gpu_factory(constructed: Arc<AtomicUsize>) -> BackendFactory {
    Arc::new(move || {
        constructed.fetch_add(1, Ordering::SeqCst);
        Err(TierFailure::Init("no adapter".to_string()))
    })
}

/// Producer that records lifecycle calls and never publishes
#[derive(Default)]
pub struct CountingProducer {
    pub starts: Arc<AtomicUsize>,
    pub stops: Arc<AtomicUsize>,
    running: bool,
}

impl Producer for CountingProducer {
    fn name(&self) -> &str {
        "counting"
    }

    fn start(&mut self, _bus: BusHandle) -> Result<(), ProducerError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}
