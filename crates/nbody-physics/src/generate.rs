//! Initial-condition presets
//!
//! Every preset is deterministic for a given seed.

use std::f32::consts::{PI, TAU};
use std::fmt;
use std::str::FromStr;

use glam::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::constants::G;
use crate::error::{Error, Result};
use crate::particle::Particle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preset {
    /// Uniform disk at rest
    RandomDisk,
    /// Two-armed rotating disk around a heavy core
    #[default]
    SpiralGalaxy,
    /// A large and a small galaxy on a collision course
    GalaxyCollision,
    /// Two mirrored galaxies on a head-on course
    SymmetricCollision,
}

impl Preset {
    pub const ALL: [Preset; 4] = [
        Preset::RandomDisk,
        Preset::SpiralGalaxy,
        Preset::GalaxyCollision,
        Preset::SymmetricCollision,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Preset::RandomDisk => "disk",
            Preset::SpiralGalaxy => "galaxy",
            Preset::GalaxyCollision => "collision",
            Preset::SymmetricCollision => "symmetric",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Preset::ALL
            .into_iter()
            .find(|preset| preset.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown preset `{s}` (expected disk, galaxy, collision or symmetric)"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorParams {
    pub count: u32,
    /// Radius of the populated region
    pub extent: f32,
    pub min_mass: f32,
    pub max_mass: f32,
    /// Gravitational constant used for orbital velocities
    pub gravity: f32,
    pub seed: u64,
}

impl Default for GeneratorParams {
    fn default() -> Self {
        Self {
            count: 10_000,
            extent: 100.0,
            min_mass: 1.0,
            max_mass: 2.0,
            gravity: G,
            seed: 42,
        }
    }
}

impl GeneratorParams {
    pub fn validate(&self) -> Result<()> {
        if self.count == 0 {
            return Err(Error::config("particle count must be positive"));
        }
        if !(self.extent.is_finite() && self.extent > 0.0) {
            return Err(Error::config(format!("extent must be positive, got {}", self.extent)));
        }
        if !(self.min_mass.is_finite() && self.max_mass.is_finite())
            || self.min_mass < 0.0
            || self.max_mass <= 0.0
            || self.min_mass > self.max_mass
        {
            return Err(Error::config(format!(
                "invalid mass range {}..{}",
                self.min_mass, self.max_mass
            )));
        }
        if !(self.gravity.is_finite() && self.gravity > 0.0) {
            return Err(Error::config(format!("gravity must be positive, got {}", self.gravity)));
        }
        Ok(())
    }
}

/// Generate the initial particles of `preset`
pub fn generate(preset: Preset, params: &GeneratorParams) -> Result<Vec<Particle>> {
    params.validate()?;
    let mut rng = StdRng::seed_from_u64(params.seed);
    let count = params.count as usize;

    let particles = match preset {
        Preset::RandomDisk => random_disk(&mut rng, count, params),
        Preset::SpiralGalaxy => galaxy(&mut rng, count, params.extent, params),
        Preset::GalaxyCollision => {
            let major = count - count / 3;
            let minor = count - major;
            let offset = Vec2::new(params.extent * 0.6, params.extent * 0.2);
            let approach = Vec2::new(approach_speed(params, count), 0.0);

            let mut particles = galaxy(&mut rng, major, params.extent * 0.5, params);
            shift(&mut particles, -offset, approach * 0.5);
            let mut satellite = galaxy(&mut rng, minor, params.extent * 0.3, params);
            shift(&mut satellite, offset, -approach);
            particles.append(&mut satellite);
            particles
        }
        Preset::SymmetricCollision => {
            let first = count.div_ceil(2);
            let offset = Vec2::new(params.extent * 0.5, params.extent * 0.15);
            let approach = Vec2::new(approach_speed(params, count) * 0.5, 0.0);

            let mut particles = galaxy(&mut rng, first, params.extent * 0.4, params);
            shift(&mut particles, -offset, approach);
            let mirrored: Vec<Particle> = particles[..count - first]
                .iter()
                .map(|p| Particle::new(-p.pos(), -p.vel(), p.mass))
                .collect();
            particles.extend(mirrored);
            particles
        }
    };

    log::info!("Generated {} particles ({preset})", particles.len());
    Ok(particles)
}

fn sample_mass(rng: &mut StdRng, params: &GeneratorParams) -> f32 {
    rng.random_range(params.min_mass..=params.max_mass)
}

fn random_disk(rng: &mut StdRng, count: usize, params: &GeneratorParams) -> Vec<Particle> {
    (0..count)
        .map(|_| {
            let r = params.extent * rng.random::<f32>().sqrt();
            let angle = rng.random_range(0.0..TAU);
            let position = Vec2::from_angle(angle) * r;
            Particle::new(position, Vec2::ZERO, sample_mass(rng, params))
        })
        .collect()
}

/// Two-armed disk around a core holding half the disk mass, on circular orbits
fn galaxy(rng: &mut StdRng, count: usize, radius: f32, params: &GeneratorParams) -> Vec<Particle> {
    if count == 0 {
        return Vec::new();
    }

    let disk_count = count - 1;
    let mut orbits: Vec<(f32, f32, f32)> = (0..disk_count)
        .map(|i| {
            // Exponential radial falloff, clamped to the disk
            let r = (radius * 0.05 - radius * 0.25 * (1.0 - rng.random::<f32>()).ln()).min(radius);
            let arm = (i % 2) as f32 * PI;
            let angle = arm + 2.5 * (r / radius * 8.0).ln_1p() + rng.random_range(-0.3..0.3);
            (r, angle, sample_mass(rng, params))
        })
        .collect();
    orbits.sort_by(|a, b| a.0.total_cmp(&b.0));

    let disk_mass: f32 = orbits.iter().map(|o| o.2).sum();
    let core_mass = (disk_mass * 0.5).max(params.max_mass);

    let mut particles = Vec::with_capacity(count);
    particles.push(Particle::new(Vec2::ZERO, Vec2::ZERO, core_mass));

    let mut enclosed = core_mass;
    for (r, angle, mass) in orbits {
        let direction = Vec2::from_angle(angle);
        let speed = (params.gravity * enclosed / r).sqrt();
        particles.push(Particle::new(direction * r, direction.perp() * speed, mass));
        enclosed += mass;
    }
    particles
}

/// Relative speed for colliding galaxies: a fraction of the escape speed at `extent`
fn approach_speed(params: &GeneratorParams, count: usize) -> f32 {
    let mean_mass = 0.5 * (params.min_mass + params.max_mass);
    let total = mean_mass * count as f32 * 1.5;
    0.3 * (2.0 * params.gravity * total / params.extent).sqrt()
}

fn shift(particles: &mut [Particle], offset: Vec2, velocity: Vec2) {
    for p in particles {
        *p = Particle::new(p.pos() + offset, p.vel() + velocity, p.mass);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn params(count: u32) -> GeneratorParams {
        GeneratorParams {
            count,
            extent: 50.0,
            seed: 7,
            ..Default::default()
        }
    }

    #[test]
    fn presets_produce_requested_count() {
        for preset in Preset::ALL {
            for count in [1, 2, 3, 1001] {
                let particles = generate(preset, &params(count)).unwrap();
                assert_eq!(particles.len(), count as usize, "{preset}");
                assert!(particles
                    .iter()
                    .all(|p| p.pos().is_finite() && p.vel().is_finite() && p.mass > 0.0));
            }
        }
    }

    #[test]
    fn same_seed_same_particles() {
        for preset in Preset::ALL {
            let a = generate(preset, &params(500)).unwrap();
            let b = generate(preset, &params(500)).unwrap();
            assert_eq!(a, b);

            let other = GeneratorParams {
                seed: 8,
                ..params(500)
            };
            assert_ne!(a, generate(preset, &other).unwrap());
        }
    }

    #[test]
    fn disk_stays_inside_extent() {
        let particles = generate(Preset::RandomDisk, &params(2000)).unwrap();
        for p in &particles {
            assert!(p.pos().length() <= 50.0 + 1e-3);
            assert!((1.0..=2.0).contains(&p.mass));
            assert_eq!(p.vel(), Vec2::ZERO);
        }
    }

    #[test]
    fn symmetric_collision_has_no_net_momentum() {
        let particles = generate(Preset::SymmetricCollision, &params(1000)).unwrap();
        let momentum = particles
            .iter()
            .fold(Vec2::ZERO, |acc, p| acc + p.vel() * p.mass);
        let center = particles.iter().fold(Vec2::ZERO, |acc, p| acc + p.pos());
        assert_abs_diff_eq!(momentum.x, 0.0, epsilon = 1e-1);
        assert_abs_diff_eq!(momentum.y, 0.0, epsilon = 1e-1);
        assert_abs_diff_eq!(center.x, 0.0, epsilon = 1e-1);
        assert_abs_diff_eq!(center.y, 0.0, epsilon = 1e-1);
    }

    #[test]
    fn rejects_invalid_params() {
        let bad = [
            GeneratorParams { count: 0, ..params(1) },
            GeneratorParams { extent: 0.0, ..params(1) },
            GeneratorParams { min_mass: 3.0, ..params(1) },
            GeneratorParams { max_mass: f32::NAN, ..params(1) },
        ];
        for p in bad {
            assert_eq!(generate(Preset::RandomDisk, &p).unwrap_err().code(), 3);
        }
    }

    #[test]
    fn preset_names_parse() {
        for preset in Preset::ALL {
            assert_eq!(preset.name().parse::<Preset>().unwrap(), preset);
        }
        assert!("nebula".parse::<Preset>().is_err());
    }
}
