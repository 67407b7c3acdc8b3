use std::ops::RangeInclusive;

use glam::Vec2;
use rand::Rng;

use crate::error::ConfigError;

pub const PARTICLE_COUNT: u32 = 200;
pub const RADIUS_RANGE: RangeInclusive<f32> = 2.0..=10.0;
pub const VELOCITY_RANGE: RangeInclusive<f32> = -100.0..=100.0;

/// One ball. Six `f32`s, laid out the same way the compute shader reads them.
#[repr(C)]
#[derive(bytemuck::Pod, bytemuck::Zeroable, Clone, Copy, Debug, PartialEq)]
pub struct Particle {
    pub radius: f32,
    pub _pad: f32,
    pub position: Vec2,
    pub velocity: Vec2,
}

impl Particle {
    pub const SIZE: usize = std::mem::size_of::<Particle>();

    pub fn new(radius: f32, position: Vec2, velocity: Vec2) -> Self {
        Self {
            radius,
            _pad: 0.0,
            position,
            velocity,
        }
    }
}

/// The rectangle particles bounce inside. Uploaded as a uniform, so the
/// layout matches the `Boundary` struct in `physics.wgsl`.
#[repr(C)]
#[derive(bytemuck::Pod, bytemuck::Zeroable, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Boundary {
    pub width: i32,
    pub height: i32,
}

impl Boundary {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Boundary from pixel dimensions. Both sides must be positive and fit the `i32` uniform.
    pub fn from_size(width: u32, height: u32) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidBoundary { width, height };

        let w = i32::try_from(width).map_err(|_| invalid())?;
        let h = i32::try_from(height).map_err(|_| invalid())?;
        if w == 0 || h == 0 {
            return Err(invalid());
        }

        Ok(Self::new(w, h))
    }

    pub fn extent(&self) -> Vec2 {
        Vec2::new(self.width as f32, self.height as f32)
    }
}

/// A flat, fixed-length set of particles. A slot index is the particle's identity.
#[derive(Clone, Debug, PartialEq)]
pub struct ParticleSet {
    particles: Vec<Particle>,
}

impl ParticleSet {
    pub fn from_vec(particles: Vec<Particle>) -> Self {
        Self { particles }
    }

    /// Reinterprets a byte snapshot read back from a particle buffer.
    ///
    /// The length must be a whole number of particle records.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % Particle::SIZE != 0 {
            return None;
        }

        // `pod_collect_to_vec` copies, so the source does not need f32 alignment.
        Some(Self {
            particles: bytemuck::pod_collect_to_vec(bytes),
        })
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn as_slice(&self) -> &[Particle] {
        &self.particles
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.particles)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Particle> {
        self.particles.iter()
    }
}

impl std::ops::Index<usize> for ParticleSet {
    type Output = Particle;

    fn index(&self, index: usize) -> &Self::Output {
        &self.particles[index]
    }
}

pub fn generate_particles(rng: &mut impl Rng, num_particles: u32, boundary: Boundary) -> ParticleSet {
    let extent = boundary.extent();

    let particles = (0..num_particles)
        .map(|_| {
            let radius = rng.gen_range(RADIUS_RANGE);
            // Spawn fully inside the boundary when it is large enough to hold the ball.
            let position = Vec2::new(
                spawn_coordinate(rng, radius, extent.x),
                spawn_coordinate(rng, radius, extent.y),
            );
            let velocity = Vec2::new(rng.gen_range(VELOCITY_RANGE), rng.gen_range(VELOCITY_RANGE));

            Particle::new(radius, position, velocity)
        })
        .collect();

    ParticleSet::from_vec(particles)
}

fn spawn_coordinate(rng: &mut impl Rng, radius: f32, extent: f32) -> f32 {
    if extent > 2.0 * radius {
        rng.gen_range(radius..=extent - radius)
    } else {
        extent * 0.5
    }
}
