//! Command line interface

use std::path::PathBuf;

use clap::Parser;
use nbody_physics::io::load_particles;
use nbody_physics::{
    generate, GeneratorParams, Particle, Preset, Result, DEFAULT_DT, G, SOFTENING, THETA,
    TREE_CELLS_PER_PARTICLE,
};
use nbody_simulation::{SimulationConfig, Strategy};

#[derive(Parser, Debug, Clone)]
#[command(name = "nbody", version, about = "Real-time GPU gravitational N-body simulation")]
pub struct Cli {
    /// Force evaluation strategy: direct or barnes-hut
    #[arg(long, default_value = "barnes-hut")]
    pub strategy: Strategy,

    /// Number of generated particles (ignored with --input)
    #[arg(short = 'n', long, default_value_t = 10_000)]
    pub count: u32,

    /// Initial conditions: disk, galaxy, collision or symmetric
    #[arg(long, default_value = "galaxy")]
    pub preset: Preset,

    /// Load initial particles from a file instead of generating them
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Write the final state here (headless mode)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_DT)]
    pub dt: f32,

    #[arg(long, default_value_t = G)]
    pub gravity: f32,

    #[arg(long, default_value_t = SOFTENING)]
    pub softening: f32,

    /// Barnes-Hut opening angle
    #[arg(long, default_value_t = THETA)]
    pub theta: f32,

    /// Steps recorded per submitted batch
    #[arg(long, default_value_t = 1)]
    pub batch: u32,

    /// Batches to run in headless mode
    #[arg(long, default_value_t = 1000)]
    pub steps: u64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Run without a window and exit after --steps batches
    #[arg(long)]
    pub headless: bool,

    /// Radius of the generated system
    #[arg(long, default_value_t = 100.0)]
    pub extent: f32,

    #[arg(long, default_value_t = 1.0)]
    pub min_mass: f32,

    #[arg(long, default_value_t = 2.0)]
    pub max_mass: f32,

    /// Tree cells reserved per particle
    #[arg(long, default_value_t = TREE_CELLS_PER_PARTICLE)]
    pub tree_cells: u32,
}

impl Cli {
    pub fn simulation_config(&self) -> SimulationConfig {
        SimulationConfig {
            dt: self.dt,
            gravity: self.gravity,
            softening: self.softening,
            theta: self.theta,
            strategy: self.strategy,
            batch_steps: self.batch,
            tree_cells_per_particle: self.tree_cells,
        }
    }

    pub fn generator_params(&self) -> GeneratorParams {
        GeneratorParams {
            count: self.count,
            extent: self.extent,
            min_mass: self.min_mass,
            max_mass: self.max_mass,
            gravity: self.gravity,
            seed: self.seed,
        }
    }

    /// Particles from --input, or generated from the preset
    pub fn initial_particles(&self) -> Result<Vec<Particle>> {
        match &self.input {
            Some(path) => load_particles(path),
            None => {
                log::info!(
                    "Generating {} particles ({} preset, seed {})",
                    self.count,
                    self.preset,
                    self.seed
                );
                generate(self.preset, &self.generator_params())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["nbody"]).unwrap();
        assert_eq!(cli.strategy, Strategy::BarnesHut);
        assert_eq!(cli.preset, Preset::SpiralGalaxy);
        assert!(!cli.headless);
        assert_eq!(cli.simulation_config(), SimulationConfig::default());
    }

    #[test]
    fn every_flag_parses() {
        let cli = Cli::try_parse_from([
            "nbody",
            "--strategy",
            "direct",
            "--count",
            "512",
            "--preset",
            "collision",
            "--output",
            "out.txt",
            "--dt",
            "0.01",
            "--gravity",
            "2",
            "--softening",
            "0.1",
            "--theta",
            "0.8",
            "--batch",
            "4",
            "--steps",
            "10",
            "--seed",
            "7",
            "--headless",
            "--extent",
            "50",
            "--min-mass",
            "0.5",
            "--max-mass",
            "3",
        ])
        .unwrap();

        let config = cli.simulation_config();
        assert_eq!(config.strategy, Strategy::Direct);
        assert_eq!(config.batch_steps, 4);
        assert_eq!(config.theta, 0.8);
        assert!(cli.headless);
        assert_eq!(cli.steps, 10);
        assert_eq!(cli.output, Some(PathBuf::from("out.txt")));

        let params = cli.generator_params();
        assert_eq!(params.count, 512);
        assert_eq!(params.seed, 7);
        assert_eq!(params.extent, 50.0);
        assert_eq!(cli.preset, Preset::GalaxyCollision);
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        assert!(Cli::try_parse_from(["nbody", "--strategy", "fmm"]).is_err());
    }

    #[test]
    fn generated_particles_follow_flags() {
        let cli = Cli::try_parse_from(["nbody", "-n", "100", "--preset", "disk"]).unwrap();
        let particles = cli.initial_particles().unwrap();
        assert_eq!(particles.len(), 100);
    }
}
