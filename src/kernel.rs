//! CPU form of the physics kernel in `physics.wgsl`.
//!
//! Each invocation reads one slot of the input set and writes only its own
//! slot of the output set, so the whole step is an unordered parallel map.

use rayon::prelude::*;

use crate::particle::{Boundary, Particle};

/// Fixed timestep, independent of the real frame time.
pub const DT: f32 = 0.016;

/// Must match `@workgroup_size` in `physics.wgsl`.
pub const WORKGROUP_SIZE: u32 = 64;

/// Workgroups needed to cover every particle once.
pub fn workgroup_count(particle_count: u32) -> u32 {
    particle_count.div_ceil(WORKGROUP_SIZE)
}

/// Advances a single particle by one step.
///
/// Reflection flips the velocity component of any axis whose new position
/// is on or past an edge, using the pre-step velocity as the source. The
/// position is not clamped, so a ball can sit outside the boundary until a
/// later step carries it back.
pub fn step_particle(src: &Particle, boundary: Boundary) -> Particle {
    let extent = boundary.extent();
    let position = src.position + src.velocity * DT;

    let mut velocity = src.velocity;
    if position.x >= extent.x || position.x <= 0.0 {
        velocity.x = -src.velocity.x;
    }
    if position.y >= extent.y || position.y <= 0.0 {
        velocity.y = -src.velocity.y;
    }

    Particle {
        radius: src.radius,
        _pad: src._pad,
        position,
        velocity,
    }
}

/// Runs `workgroups * WORKGROUP_SIZE` invocations over `input`.
///
/// Invocations past the particle count do nothing, and any output slots past
/// `input.len()` are left untouched.
pub fn dispatch(input: &[Particle], output: &mut [Particle], boundary: Boundary, workgroups: u32) {
    let invocations = workgroups as usize * WORKGROUP_SIZE as usize;

    output
        .par_iter_mut()
        .zip(input.par_iter())
        .take(invocations)
        .for_each(|(dst, src)| *dst = step_particle(src, boundary));
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    fn boundary() -> Boundary {
        Boundary::new(100, 100)
    }

    #[test]
    fn integrates_inside_boundary() {
        let src = Particle::new(4.0, Vec2::new(50.0, 40.0), Vec2::new(12.5, -30.0));
        let dst = step_particle(&src, boundary());

        assert_eq!(dst.position, src.position + src.velocity * DT);
        assert_eq!(dst.velocity, src.velocity);
        assert_eq!(dst.radius, src.radius);
    }

    #[test]
    fn reflects_at_far_edge() {
        let src = Particle::new(2.0, Vec2::new(101.0, 50.0), Vec2::new(5.0, 3.0));
        let dst = step_particle(&src, boundary());

        assert_eq!(dst.velocity.x, -5.0);
        assert_eq!(dst.velocity.y, 3.0);
    }

    #[test]
    fn reflects_at_near_edge() {
        let src = Particle::new(2.0, Vec2::new(-1.0, 50.0), Vec2::new(-5.0, 3.0));
        let dst = step_particle(&src, boundary());

        assert_eq!(dst.velocity.x, 5.0);
        assert_eq!(dst.velocity.y, 3.0);
    }

    #[test]
    fn reflection_does_not_clamp_position() {
        let src = Particle::new(2.0, Vec2::new(150.0, 150.0), Vec2::new(10.0, 10.0));
        let dst = step_particle(&src, boundary());

        assert!(dst.position.x > 100.0 && dst.position.y > 100.0);
        assert_eq!(dst.velocity, Vec2::new(-10.0, -10.0));
    }

    #[test]
    fn far_overshoot_stays_outside() {
        // Moving back in still lands outside, so the sign flips again.
        let src = Particle::new(2.0, Vec2::new(150.0, 50.0), Vec2::new(-10.0, 0.0));
        let dst = step_particle(&src, boundary());

        assert_eq!(dst.velocity.x, 10.0);
    }

    #[test]
    fn landing_exactly_on_edge_reflects() {
        let src = Particle::new(2.0, Vec2::new(50.0, 0.0), Vec2::new(1.0, 0.0));
        let dst = step_particle(&src, boundary());

        assert_eq!(dst.velocity.y, -0.0);
        assert_eq!(dst.velocity.x, 1.0);
    }

    #[test]
    fn workgroup_count_rounds_up() {
        assert_eq!(workgroup_count(1), 1);
        assert_eq!(workgroup_count(64), 1);
        assert_eq!(workgroup_count(65), 2);
        assert_eq!(workgroup_count(200), 4);
    }

    #[test]
    fn over_dispatch_is_harmless() {
        let input: Vec<Particle> = (0..70)
            .map(|i| Particle::new(3.0, Vec2::new(i as f32 + 10.0, 20.0), Vec2::new(1.0, -2.0)))
            .collect();

        let sentinel = Particle::new(99.0, Vec2::splat(-7.0), Vec2::splat(7.0));
        let mut exact = vec![Particle::new(1.0, Vec2::ZERO, Vec2::ZERO); 70];
        let mut padded = vec![sentinel; 80];

        dispatch(&input, &mut exact, boundary(), workgroup_count(70));
        dispatch(&input, &mut padded, boundary(), 16);

        assert_eq!(&padded[..70], &exact[..]);
        assert!(padded[70..].iter().all(|p| *p == sentinel));
        for (i, p) in exact.iter().enumerate() {
            assert_eq!(p.position, input[i].position + input[i].velocity * DT);
        }
    }

    #[test]
    fn under_dispatch_leaves_uncovered_slots() {
        let input = vec![Particle::new(3.0, Vec2::splat(10.0), Vec2::splat(1.0)); 100];
        let mut output = vec![Particle::new(1.0, Vec2::ZERO, Vec2::ZERO); 100];

        dispatch(&input, &mut output, boundary(), 1);

        assert!(output[..64].iter().all(|p| p.radius == 3.0));
        assert!(output[64..].iter().all(|p| p.radius == 1.0));
    }
}
