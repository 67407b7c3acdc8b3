use std::{future::Future, num::NonZeroU32};

use crate::{
    binding::{check_particle_count, StagingLifecycle},
    error::FrameError,
    kernel,
    particle::{Boundary, Particle, ParticleSet},
};

/// The accelerator side of one frame, split at the points where the frame
/// orchestrator needs to observe ordering.
///
/// `upload`, `dispatch` and `copy_out` only record work; ordering between
/// them is the order of calls. `map_wait` is the only suspension point.
pub trait ComputeBackend: Send {
    fn name(&self) -> &'static str;

    fn particle_count(&self) -> u32;

    fn upload(&mut self, particles: &ParticleSet) -> Result<(), FrameError>;

    fn dispatch(&mut self) -> Result<(), FrameError>;

    fn copy_out(&mut self) -> Result<(), FrameError>;

    fn map_wait(&mut self) -> impl Future<Output = Result<(), FrameError>> + Send;

    fn read(&self) -> Result<ParticleSet, FrameError>;

    /// Must be safe to call in any staging state, including a pending map.
    fn unmap(&mut self);
}

/// Runs the kernel on the CPU against the same input/output/staging contract
/// as the GPU backend. Used headless when there is no adapter.
pub struct CpuBackend {
    particle_count: NonZeroU32,
    boundary: Boundary,

    input: Vec<Particle>,
    output: Vec<Particle>,
    staging: Vec<u8>,
    lifecycle: StagingLifecycle,
}

impl CpuBackend {
    pub fn new(particle_count: NonZeroU32, boundary: Boundary) -> Self {
        let count = particle_count.get() as usize;
        let empty = Particle::new(0.0, glam::Vec2::ZERO, glam::Vec2::ZERO);

        Self {
            particle_count,
            boundary,

            input: vec![empty; count],
            output: vec![empty; count],
            staging: vec![0; count * Particle::SIZE],
            lifecycle: StagingLifecycle::default(),
        }
    }

    #[cfg(test)]
    pub fn staging_state(&self) -> crate::binding::StagingState {
        self.lifecycle.state()
    }

    /// Direct view of the output buffer, bypassing the staging copy.
    #[cfg(test)]
    pub fn output_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.output)
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn particle_count(&self) -> u32 {
        self.particle_count.get()
    }

    fn upload(&mut self, particles: &ParticleSet) -> Result<(), FrameError> {
        check_particle_count(self.particle_count, particles)?;
        self.input.copy_from_slice(particles.as_slice());
        Ok(())
    }

    fn dispatch(&mut self) -> Result<(), FrameError> {
        let workgroups = kernel::workgroup_count(self.particle_count.get());
        kernel::dispatch(&self.input, &mut self.output, self.boundary, workgroups);
        Ok(())
    }

    fn copy_out(&mut self) -> Result<(), FrameError> {
        self.lifecycle.begin_copy()?;
        self.staging
            .copy_from_slice(bytemuck::cast_slice(&self.output));
        Ok(())
    }

    fn map_wait(&mut self) -> impl Future<Output = Result<(), FrameError>> + Send {
        let result = self
            .lifecycle
            .begin_map()
            .and_then(|()| self.lifecycle.finish_map());
        std::future::ready(result)
    }

    fn read(&self) -> Result<ParticleSet, FrameError> {
        self.lifecycle.expect_mapped()?;
        ParticleSet::from_bytes(&self.staging)
            .ok_or(FrameError::MalformedReadback(self.staging.len()))
    }

    fn unmap(&mut self) {
        self.lifecycle.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{binding::StagingState, particle::generate_particles};
    use rand::{rngs::StdRng, SeedableRng};

    async fn run_once(backend: &mut CpuBackend, set: &ParticleSet) -> ParticleSet {
        backend.upload(set).unwrap();
        backend.dispatch().unwrap();
        backend.copy_out().unwrap();
        backend.map_wait().await.unwrap();
        let snapshot = backend.read().unwrap();
        backend.unmap();
        snapshot
    }

    #[tokio::test]
    async fn staged_readback_matches_direct_output() {
        let boundary = Boundary::new(640, 480);
        let mut rng = StdRng::seed_from_u64(3);

        for count in [1, 63, 64, 65, 200, 10_000] {
            let set = generate_particles(&mut rng, count, boundary);
            let mut backend = CpuBackend::new(NonZeroU32::new(count).unwrap(), boundary);

            let snapshot = run_once(&mut backend, &set).await;
            assert_eq!(snapshot.as_bytes(), backend.output_bytes());
            assert_eq!(snapshot.len(), count as usize);
        }
    }

    #[tokio::test]
    async fn staging_returns_to_idle() {
        let boundary = Boundary::new(100, 100);
        let set = generate_particles(&mut StdRng::seed_from_u64(1), 8, boundary);
        let mut backend = CpuBackend::new(NonZeroU32::new(8).unwrap(), boundary);

        run_once(&mut backend, &set).await;
        assert_eq!(backend.staging_state(), StagingState::Idle);
        run_once(&mut backend, &set).await;
        assert_eq!(backend.staging_state(), StagingState::Idle);
    }

    #[tokio::test]
    async fn second_copy_before_unmap_is_rejected() {
        let boundary = Boundary::new(100, 100);
        let set = generate_particles(&mut StdRng::seed_from_u64(1), 4, boundary);
        let mut backend = CpuBackend::new(NonZeroU32::new(4).unwrap(), boundary);

        backend.upload(&set).unwrap();
        backend.dispatch().unwrap();
        backend.copy_out().unwrap();
        backend.map_wait().await.unwrap();

        assert!(matches!(
            backend.copy_out(),
            Err(FrameError::StagingBusy { .. })
        ));
    }

    #[test]
    fn read_requires_mapping() {
        let backend = CpuBackend::new(NonZeroU32::new(4).unwrap(), Boundary::new(10, 10));
        assert!(backend.read().is_err());
    }
}
