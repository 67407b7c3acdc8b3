use std::{borrow::Cow, future::Future, num::NonZeroU32, sync::Arc};

use crate::{
    backend::ComputeBackend,
    binding::{ParticleBindings, StagingState},
    error::FrameError,
    gpu::GpuContext,
    kernel::workgroup_count,
    particle::{Boundary, ParticleSet},
};

/// Runs `physics.wgsl` on the device.
pub struct GpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,

    bindings: ParticleBindings,
    pipeline: wgpu::ComputePipeline,

    /// Holds the dispatch until `copy_out` appends to it and submits.
    pending: Option<wgpu::CommandEncoder>,
}

impl GpuBackend {
    pub fn new(gpu: &GpuContext, particle_count: NonZeroU32, boundary: Boundary) -> Self {
        let device = gpu.device.clone();

        let physics_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Physics Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("physics.wgsl"))),
        });

        let bindings = ParticleBindings::new(&device, particle_count, boundary);

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Physics Pipeline Layout"),
            bind_group_layouts: &[&bindings.bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Physics Pipeline"),
            layout: Some(&pipeline_layout),
            module: &physics_shader,
            entry_point: "main",
        });

        Self {
            device,
            queue: gpu.queue.clone(),

            bindings,
            pipeline,

            pending: None,
        }
    }

    #[cfg(test)]
    pub fn staging_state(&self) -> StagingState {
        self.bindings.staging.state()
    }
}

impl ComputeBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn particle_count(&self) -> u32 {
        self.bindings.particle_count()
    }

    fn upload(&mut self, particles: &ParticleSet) -> Result<(), FrameError> {
        self.bindings.upload(&self.queue, particles)
    }

    fn dispatch(&mut self) -> Result<(), FrameError> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Physics Encoder"),
            });

        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Physics Pass"),
                timestamp_writes: None,
            });

            cpass.set_pipeline(&self.pipeline);
            cpass.set_bind_group(0, &self.bindings.bind_group, &[]);
            cpass.dispatch_workgroups(workgroup_count(self.bindings.particle_count()), 1, 1);
        }

        self.pending = Some(encoder);
        Ok(())
    }

    fn copy_out(&mut self) -> Result<(), FrameError> {
        let mut encoder = self.pending.take().ok_or(FrameError::StagingBusy {
            state: self.bindings.staging.state(),
            expected: StagingState::Idle,
        })?;

        self.bindings
            .staging
            .record_copy(&mut encoder, &self.bindings.output_buffer)?;
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn map_wait(&mut self) -> impl Future<Output = Result<(), FrameError>> + Send {
        async move { self.bindings.staging.map(&self.device).await }
    }

    fn read(&self) -> Result<ParticleSet, FrameError> {
        self.bindings.staging.read()
    }

    fn unmap(&mut self) {
        self.bindings.staging.unmap();
    }
}
