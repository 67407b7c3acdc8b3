//! Buffers and bind group the physics kernel runs against.
//!
//! Binding 0 is the input set (read-only), binding 1 the output set
//! (read-write) and binding 2 the boundary uniform. The output buffer is not
//! host readable, so it is copied into a `MAP_READ` staging buffer after
//! every dispatch.

use std::{num::NonZeroU32, time::Duration};

use tokio::sync::oneshot::{self, error::TryRecvError};
use wgpu::util::DeviceExt;

use crate::{
    error::FrameError,
    particle::{Boundary, Particle, ParticleSet},
};

const MAP_POLL_INTERVAL: Duration = Duration::from_micros(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StagingState {
    /// Free to receive a copy.
    Idle,
    /// A copy into the buffer has been recorded.
    Copying,
    /// `map_async` requested, waiting for the device.
    Mapping,
    /// Host-visible. Must be released before the next copy.
    Mapped,
}

/// Legal transitions of a staging allocation: Idle → Copying → Mapping →
/// Mapped → Idle. Shared by the GPU and CPU backends.
#[derive(Debug)]
pub struct StagingLifecycle {
    state: StagingState,
}

impl Default for StagingLifecycle {
    fn default() -> Self {
        Self {
            state: StagingState::Idle,
        }
    }
}

impl StagingLifecycle {
    pub fn state(&self) -> StagingState {
        self.state
    }

    pub fn begin_copy(&mut self) -> Result<(), FrameError> {
        self.transition(StagingState::Idle, StagingState::Copying)
    }

    pub fn begin_map(&mut self) -> Result<(), FrameError> {
        self.transition(StagingState::Copying, StagingState::Mapping)
    }

    pub fn finish_map(&mut self) -> Result<(), FrameError> {
        self.transition(StagingState::Mapping, StagingState::Mapped)
    }

    pub fn expect_mapped(&self) -> Result<(), FrameError> {
        self.expect(StagingState::Mapped)
    }

    /// Returns whether the host still held (or was waiting on) a mapping.
    pub fn release(&mut self) -> bool {
        let held = matches!(self.state, StagingState::Mapping | StagingState::Mapped);
        self.state = StagingState::Idle;
        held
    }

    fn expect(&self, expected: StagingState) -> Result<(), FrameError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(FrameError::StagingBusy {
                state: self.state,
                expected,
            })
        }
    }

    fn transition(&mut self, from: StagingState, to: StagingState) -> Result<(), FrameError> {
        self.expect(from)?;
        self.state = to;
        Ok(())
    }
}

pub struct StagingBuffer {
    buffer: wgpu::Buffer,
    size: u64,
    lifecycle: StagingLifecycle,
}

impl StagingBuffer {
    fn new(device: &wgpu::Device, size: u64) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Particle Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            buffer,
            size,
            lifecycle: StagingLifecycle::default(),
        }
    }

    pub fn state(&self) -> StagingState {
        self.lifecycle.state()
    }

    pub fn record_copy(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        source: &wgpu::Buffer,
    ) -> Result<(), FrameError> {
        self.lifecycle.begin_copy()?;
        encoder.copy_buffer_to_buffer(source, 0, &self.buffer, 0, self.size);
        Ok(())
    }

    /// Requests host visibility and polls the device until it is granted.
    ///
    /// Yields to the runtime between polls instead of blocking the thread.
    pub async fn map(&mut self, device: &wgpu::Device) -> Result<(), FrameError> {
        self.lifecycle.begin_map()?;

        let (tx, mut rx) = oneshot::channel();
        self.buffer
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });

        loop {
            let _ = device.poll(wgpu::Maintain::Poll);
            match rx.try_recv() {
                Ok(Ok(())) => break,
                Ok(Err(err)) => {
                    self.lifecycle.release();
                    return Err(FrameError::MapFailed(err));
                }
                Err(TryRecvError::Empty) => tokio::time::sleep(MAP_POLL_INTERVAL).await,
                Err(TryRecvError::Closed) => {
                    self.lifecycle.release();
                    return Err(FrameError::DeviceLost);
                }
            }
        }

        self.lifecycle.finish_map()
    }

    /// Copies the mapped contents out. The returned set does not borrow the mapping.
    pub fn read(&self) -> Result<ParticleSet, FrameError> {
        self.lifecycle.expect_mapped()?;

        let view = self.buffer.slice(..).get_mapped_range();
        let snapshot = ParticleSet::from_bytes(&view);
        let len = view.len();
        drop(view);

        snapshot.ok_or(FrameError::MalformedReadback(len))
    }

    /// Releases the mapping. Also cancels a map that is still pending.
    pub fn unmap(&mut self) {
        if self.lifecycle.release() {
            self.buffer.unmap();
        }
    }
}

/// Every buffer the kernel touches, sized once from the particle count.
pub struct ParticleBindings {
    particle_count: NonZeroU32,

    pub input_buffer: wgpu::Buffer,
    pub output_buffer: wgpu::Buffer,
    _boundary_buffer: wgpu::Buffer,
    pub staging: StagingBuffer,

    pub bind_group_layout: wgpu::BindGroupLayout,
    pub bind_group: wgpu::BindGroup,
}

impl ParticleBindings {
    pub fn new(device: &wgpu::Device, particle_count: NonZeroU32, boundary: Boundary) -> Self {
        let size = particle_buffer_size(particle_count);

        let input_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Particle Input Buffer"),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let output_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Particle Output Buffer"),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let boundary_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Boundary Uniform Buffer"),
            contents: bytemuck::bytes_of(&boundary),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let staging = StagingBuffer::new(device, size);

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Particle Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(size),
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(size),
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<Boundary>() as u64
                        ),
                    },
                    count: None,
                },
            ],
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Particle Bind Group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: input_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: output_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: boundary_buffer.as_entire_binding(),
                },
            ],
        });

        Self {
            particle_count,

            input_buffer,
            output_buffer,
            _boundary_buffer: boundary_buffer,
            staging,

            bind_group_layout,
            bind_group,
        }
    }

    pub fn particle_count(&self) -> u32 {
        self.particle_count.get()
    }

    /// Queues `particles` into the input buffer. The write lands before the
    /// next submission, so a dispatch submitted afterwards always sees it.
    pub fn upload(&self, queue: &wgpu::Queue, particles: &ParticleSet) -> Result<(), FrameError> {
        check_particle_count(self.particle_count, particles)?;
        queue.write_buffer(&self.input_buffer, 0, particles.as_bytes());
        Ok(())
    }
}

pub fn particle_buffer_size(particle_count: NonZeroU32) -> u64 {
    particle_count.get() as u64 * Particle::SIZE as u64
}

pub fn check_particle_count(
    particle_count: NonZeroU32,
    particles: &ParticleSet,
) -> Result<(), FrameError> {
    let expected = particle_count.get() as usize;
    if particles.len() != expected {
        return Err(FrameError::ParticleCountMismatch {
            expected,
            found: particles.len(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    #[test]
    fn lifecycle_runs_full_cycle() {
        let mut staging = StagingLifecycle::default();
        assert_eq!(staging.state(), StagingState::Idle);

        staging.begin_copy().unwrap();
        staging.begin_map().unwrap();
        assert!(staging.expect_mapped().is_err());
        staging.finish_map().unwrap();
        staging.expect_mapped().unwrap();

        assert!(staging.release());
        assert_eq!(staging.state(), StagingState::Idle);
    }

    #[test]
    fn copy_into_mapped_buffer_is_rejected() {
        let mut staging = StagingLifecycle::default();
        staging.begin_copy().unwrap();
        staging.begin_map().unwrap();
        staging.finish_map().unwrap();

        match staging.begin_copy() {
            Err(FrameError::StagingBusy { state, expected }) => {
                assert_eq!(state, StagingState::Mapped);
                assert_eq!(expected, StagingState::Idle);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn map_without_copy_is_rejected() {
        let mut staging = StagingLifecycle::default();
        assert!(staging.begin_map().is_err());
    }

    #[test]
    fn release_of_idle_reports_nothing_held() {
        let mut staging = StagingLifecycle::default();
        assert!(!staging.release());

        staging.begin_copy().unwrap();
        assert!(!staging.release());
        assert_eq!(staging.state(), StagingState::Idle);
    }

    #[test]
    fn buffer_size_follows_particle_count() {
        let count = NonZeroU32::new(200).unwrap();
        assert_eq!(particle_buffer_size(count), 200 * 24);
    }

    #[test]
    fn upload_rejects_wrong_length() {
        let count = NonZeroU32::new(3).unwrap();
        let set = ParticleSet::from_vec(vec![Particle::new(2.0, Vec2::ZERO, Vec2::ZERO); 2]);

        match check_particle_count(count, &set) {
            Err(FrameError::ParticleCountMismatch { expected, found }) => {
                assert_eq!((expected, found), (3, 2));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
