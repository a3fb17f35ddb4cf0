//! # WGPU Backend
//!
//! GPU coherence tier using wgpu compute shaders (Metal, Vulkan, DX12).
//!
//! Pass 1 (`analytic.wgsl`) builds unit-phasor analytic signals for every
//! channel with a masked DFT; pass 2 (`pairwise.wgsl`) reduces every channel
//! pair to a ciPLV value. Buffers are sized `[channels × window]` per call.
//! Readback is polled against a deadline so a stalled device surfaces as
//! [`TierFailure::Timeout`] instead of blocking the scheduler.

use super::{pair_indices, CoherenceBackend, KernelParams};
use crate::analysis::next_power_of_two;
use crate::coherence::matrix::ComputeTier;
use crate::coherence::tier::TierFailure;
use bytemuck::{Pod, Zeroable};
use std::time::Instant;
use wgpu::util::DeviceExt;

const WORKGROUP_SIZE: u32 = 64;

/// Uniform block shared by both shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct GpuParams {
    channels: u32,
    len: u32,
    size: u32,
    pairs: u32,
    epsilon: f32,
    denom_floor: f32,
    _pad0: u32,
    _pad1: u32,
}

/// wgpu implementation of the coherence passes
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    spectrum_pipeline: wgpu::ComputePipeline,
    analytic_pipeline: wgpu::ComputePipeline,
    pairwise_pipeline: wgpu::ComputePipeline,
    adapter_name: String,
}

impl WgpuBackend {
    /// Acquire an adapter and device and compile both shaders
    pub fn new() -> Result<Self, TierFailure> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| TierFailure::Init("no compatible GPU adapter".to_string()))?;

        let info = adapter.get_info();
        let adapter_name = format!("{} ({:?})", info.name, info.backend);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Coherence Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        ))
        .map_err(|e| TierFailure::Init(format!("failed to create device: {}", e)))?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let analytic = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Analytic Signal Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/analytic.wgsl").into()),
        });
        let pairwise = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Pairwise ciPLV Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/pairwise.wgsl").into()),
        });

        let make_pipeline = |label: &str, module: &wgpu::ShaderModule, entry: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: None,
                module,
                entry_point: entry,
            })
        };
        let spectrum_pipeline = make_pipeline("Masked Spectrum", &analytic, "spectrum_main");
        let analytic_pipeline = make_pipeline("Analytic Phasors", &analytic, "analytic_main");
        let pairwise_pipeline = make_pipeline("Pairwise ciPLV", &pairwise, "main");

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(TierFailure::Init(format!("shader compilation failed: {}", err)));
        }

        tracing::info!(adapter = %adapter_name, "WGPU coherence backend ready");

        Ok(Self {
            device,
            queue,
            spectrum_pipeline,
            analytic_pipeline,
            pairwise_pipeline,
            adapter_name,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn storage(&self, label: &str, size: u64, extra: wgpu::BufferUsages) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE | extra,
            mapped_at_creation: false,
        })
    }

    fn bind(
        &self,
        pipeline: &wgpu::ComputePipeline,
        label: &str,
        entries: &[(u32, &wgpu::Buffer)],
    ) -> wgpu::BindGroup {
        let entries: Vec<wgpu::BindGroupEntry> = entries
            .iter()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &entries,
        })
    }

    fn dispatch(
        &self,
        channels: &[Vec<f32>],
        params: &KernelParams,
    ) -> Result<Vec<f32>, TierFailure> {
        let channel_count = channels.len();
        let len = channels.iter().map(Vec::len).min().unwrap_or(0);
        let pairs = pair_indices(channel_count);
        if pairs.is_empty() || len == 0 {
            return Ok(vec![0.0; pairs.len()]);
        }
        let size = next_power_of_two(len);

        let mut padded = vec![0.0f32; channel_count * size];
        for (c, samples) in channels.iter().enumerate() {
            padded[c * size..c * size + len].copy_from_slice(&samples[..len]);
        }
        let pair_words: Vec<[u32; 2]> = pairs.iter().map(|&(i, j)| [i as u32, j as u32]).collect();

        let uniforms = GpuParams {
            channels: channel_count as u32,
            len: len as u32,
            size: size as u32,
            pairs: pairs.len() as u32,
            epsilon: params.epsilon,
            denom_floor: params.denominator_floor,
            _pad0: 0,
            _pad1: 0,
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let params_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Coherence Params"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let samples_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Channel Samples"),
            contents: bytemuck::cast_slice(&padded),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let pairs_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Pair Indices"),
            contents: bytemuck::cast_slice(&pair_words),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let complex_bytes = 2 * std::mem::size_of::<f32>() as u64;
        let spectrum_buffer = self.storage(
            "Masked Spectrum",
            (channel_count * size) as u64 * complex_bytes,
            wgpu::BufferUsages::empty(),
        );
        let phasor_buffer = self.storage(
            "Unit Phasors",
            (channel_count * len) as u64 * complex_bytes,
            wgpu::BufferUsages::empty(),
        );
        let output_size = (pairs.len() * std::mem::size_of::<f32>()) as u64;
        let output_buffer = self.storage("ciPLV Output", output_size, wgpu::BufferUsages::COPY_SRC);
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ciPLV Staging"),
            size: output_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let spectrum_group = self.bind(
            &self.spectrum_pipeline,
            "Spectrum Bindings",
            &[(0, &params_buffer), (1, &samples_buffer), (2, &spectrum_buffer)],
        );
        let analytic_group = self.bind(
            &self.analytic_pipeline,
            "Analytic Bindings",
            &[(0, &params_buffer), (2, &spectrum_buffer), (3, &phasor_buffer)],
        );
        let pairwise_group = self.bind(
            &self.pairwise_pipeline,
            "Pairwise Bindings",
            &[
                (0, &params_buffer),
                (1, &phasor_buffer),
                (2, &pairs_buffer),
                (3, &output_buffer),
            ],
        );

        let groups = |items: usize| (items as u32).div_ceil(WORKGROUP_SIZE);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Coherence Passes"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Analytic Signal Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.spectrum_pipeline);
            pass.set_bind_group(0, &spectrum_group, &[]);
            pass.dispatch_workgroups(groups(channel_count * size), 1, 1);
            pass.set_pipeline(&self.analytic_pipeline);
            pass.set_bind_group(0, &analytic_group, &[]);
            pass.dispatch_workgroups(groups(channel_count * len), 1, 1);
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Pairwise Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pairwise_pipeline);
            pass.set_bind_group(0, &pairwise_group, &[]);
            pass.dispatch_workgroups(groups(pairs.len()), 1, 1);
        }
        encoder.copy_buffer_to_buffer(&output_buffer, 0, &staging_buffer, 0, output_size);
        self.queue.submit(Some(encoder.finish()));

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(TierFailure::Runtime(err.to_string()));
        }

        let slice = staging_buffer.slice(..);
        let (sender, receiver) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        let deadline = Instant::now() + params.timeout;
        let mapped = loop {
            let _ = self.device.poll(wgpu::Maintain::Poll);
            if let Ok(result) = receiver.try_recv() {
                break result;
            }
            if Instant::now() >= deadline {
                return Err(TierFailure::Timeout(params.timeout));
            }
            std::thread::yield_now();
        };
        mapped.map_err(|e| TierFailure::Runtime(format!("readback failed: {:?}", e)))?;

        let data = slice.get_mapped_range();
        let values: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging_buffer.unmap();

        Ok(values)
    }
}

impl CoherenceBackend for WgpuBackend {
    fn tier(&self) -> ComputeTier {
        ComputeTier::Gpu
    }

    fn backend_name(&self) -> &'static str {
        "wgpu"
    }

    fn pairwise(
        &mut self,
        channels: &[Vec<f32>],
        params: &KernelParams,
    ) -> Result<Vec<f32>, TierFailure> {
        self.dispatch(channels, params)
    }
}
