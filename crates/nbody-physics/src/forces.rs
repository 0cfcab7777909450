//! Direct-summation gravity
//!
//! NOTE: These are reference implementations for testing.
//! The simulation itself runs the same formulas in WGSL compute shaders.

use glam::Vec2;
use rayon::prelude::*;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::particle::Particle;

/// Parameters of one integration step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepParams {
    pub dt: f32,
    pub gravity: f32,
    pub softening: f32,
    /// Opening angle, ignored by direct summation
    pub theta: f32,
}

impl Default for StepParams {
    fn default() -> Self {
        Self {
            dt: DEFAULT_DT,
            gravity: G,
            softening: SOFTENING,
            theta: THETA,
        }
    }
}

/// Softened acceleration that a source mass induces at `target`
/// a = G * m * d / (|d|² + ε²)^(3/2)
pub fn softened_acceleration(
    target: Vec2,
    source_pos: Vec2,
    source_mass: f32,
    gravity: f32,
    softening_sq: f32,
) -> Vec2 {
    let d = source_pos - target;
    let dist_sq = d.length_squared() + softening_sq;
    if dist_sq <= 0.0 {
        return Vec2::ZERO;
    }
    let inv_dist = dist_sq.sqrt().recip();
    d * (gravity * source_mass * inv_dist * inv_dist * inv_dist)
}

/// Acceleration of every particle from all others, O(n²)
pub fn direct_accelerations(particles: &[Particle], gravity: f32, softening: f32) -> Vec<Vec2> {
    let softening_sq = softening * softening;
    particles
        .par_iter()
        .enumerate()
        .map(|(i, target)| {
            let pos = target.pos();
            particles
                .iter()
                .enumerate()
                .filter(|&(j, source)| j != i && source.mass != 0.0)
                .fold(Vec2::ZERO, |acc, (_, source)| {
                    acc + softened_acceleration(pos, source.pos(), source.mass, gravity, softening_sq)
                })
        })
        .collect()
}

/// Semi-implicit Euler step: velocity first, then position with the new velocity.
/// Zero-mass particles are returned unchanged.
pub fn integrate(particle: &Particle, acceleration: Vec2, dt: f32) -> Particle {
    if particle.is_padding() {
        return *particle;
    }
    let velocity = particle.vel() + acceleration * dt;
    let position = particle.pos() + velocity * dt;
    Particle {
        position: position.to_array(),
        velocity: velocity.to_array(),
        ..*particle
    }
}

/// One direct-summation step from `input` into `output`
pub fn direct_step(
    input: &[Particle],
    output: &mut [Particle],
    params: &StepParams,
) -> Result<()> {
    if input.len() != output.len() {
        return Err(Error::config("particle slots must be equally sized"));
    }
    let accelerations = direct_accelerations(input, params.gravity, params.softening);
    output
        .par_iter_mut()
        .zip(input.par_iter().zip(accelerations.par_iter()))
        .for_each(|(out, (p, &a))| *out = integrate(p, a, params.dt));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn two_body_forces_are_opposite() {
        let configurations = [
            (Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), 1.0, 3.0),
            (Vec2::new(-2.5, 4.0), Vec2::new(3.0, -1.0), 7.0, 0.5),
            (Vec2::new(0.1, 0.1), Vec2::new(0.1, 0.13), 100.0, 2.0),
        ];
        for (pa, pb, ma, mb) in configurations {
            let particles = [
                Particle::new(pa, Vec2::ZERO, ma),
                Particle::new(pb, Vec2::ZERO, mb),
            ];
            let acc = direct_accelerations(&particles, 1.0, 0.01);
            let force_a = acc[0] * ma;
            let force_b = acc[1] * mb;
            assert_relative_eq!(force_a.x, -force_b.x, max_relative = 1e-5);
            assert_relative_eq!(force_a.y, -force_b.y, max_relative = 1e-5);
            assert!(force_a.dot(pb - pa) > 0.0, "gravity must attract");
        }
    }

    #[test]
    fn softening_bounds_close_encounters() {
        let gravity = 2.0;
        let mass = 5.0;
        let softening = 0.05;
        let limit = gravity * mass / (softening * softening);

        let mut separation = 1.0_f32;
        while separation > 1e-12 {
            let a = softened_acceleration(
                Vec2::ZERO,
                Vec2::new(separation, 0.0),
                mass,
                gravity,
                softening * softening,
            );
            assert!(a.is_finite());
            assert!(a.length() <= limit, "{} > {limit}", a.length());
            separation *= 0.5;
        }

        let coincident =
            softened_acceleration(Vec2::ONE, Vec2::ONE, mass, gravity, softening * softening);
        assert_eq!(coincident, Vec2::ZERO);
    }

    #[test]
    fn heavy_partner_barely_moves() {
        let input = [
            Particle::new(Vec2::new(0.0, 0.0), Vec2::ZERO, 10.0),
            Particle::new(Vec2::new(10.0, 0.0), Vec2::ZERO, 1000.0),
        ];
        let mut output = [Particle::padding(); 2];
        let params = StepParams {
            dt: 0.001,
            gravity: 1.0,
            softening: 0.01,
            theta: 0.0,
        };
        direct_step(&input, &mut output, &params).unwrap();

        assert!(output[0].velocity[0] > 0.0);
        assert_relative_eq!(output[0].velocity[1], 0.0);
        assert!(output[0].position[0] > 0.0);

        // Both start at rest, so each displacement is v * dt. The heavy body's
        // shift is below f32 resolution at x = 10, compare velocities instead.
        assert!(output[1].velocity[0] < 0.0);
        assert_relative_eq!(
            -output[1].velocity[0] / output[0].velocity[0],
            0.01,
            max_relative = 1e-3
        );
    }

    #[test]
    fn mismatched_slots_are_rejected() {
        let input = [Particle::new(Vec2::ZERO, Vec2::ZERO, 1.0); 3];
        let mut output = [Particle::padding(); 2];
        let err = direct_step(&input, &mut output, &StepParams::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigurationError);
    }

    #[test]
    fn padding_is_inert() {
        let input = [
            Particle::new(Vec2::ZERO, Vec2::new(1.0, 0.0), 1.0),
            Particle::padding(),
        ];
        let mut output = [Particle::padding(); 2];
        direct_step(&input, &mut output, &StepParams::default()).unwrap();
        assert_eq!(output[1], Particle::padding());
        // A lone particle drifts in a straight line
        assert_relative_eq!(output[0].position[0], DEFAULT_DT);
        assert_relative_eq!(output[0].position[1], 0.0);
    }
}
