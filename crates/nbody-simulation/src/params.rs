//! Simulation configuration and the uniform block shared by every kernel

use std::fmt;
use std::str::FromStr;

use bytemuck::{Pod, Zeroable};
use nbody_physics::{
    Error, Result, StepParams, DEFAULT_DT, DIRECT_WORKGROUP_SIZE, G, SOFTENING, THETA,
    TREE_CELLS_PER_PARTICLE,
};

/// Force evaluation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// O(n²) pairwise summation
    Direct,
    /// O(n log n) quadtree approximation
    #[default]
    BarnesHut,
}

impl Strategy {
    /// Particle-count granularity the strategy's kernels require
    pub fn alignment(&self) -> u32 {
        match self {
            Strategy::Direct => DIRECT_WORKGROUP_SIZE,
            Strategy::BarnesHut => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::BarnesHut => "barnes-hut",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(Strategy::Direct),
            "barnes-hut" | "barneshut" | "bh" => Ok(Strategy::BarnesHut),
            other => Err(format!(
                "unknown strategy `{other}` (expected direct or barnes-hut)"
            )),
        }
    }
}

/// Runtime parameters of a simulation
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub dt: f32,
    pub gravity: f32,
    pub softening: f32,
    /// Opening angle, Barnes-Hut only
    pub theta: f32,
    pub strategy: Strategy,
    /// Steps recorded per submission
    pub batch_steps: u32,
    /// Tree cells reserved per particle, Barnes-Hut only
    pub tree_cells_per_particle: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            dt: DEFAULT_DT,
            gravity: G,
            softening: SOFTENING,
            theta: THETA,
            strategy: Strategy::default(),
            batch_steps: 1,
            tree_cells_per_particle: TREE_CELLS_PER_PARTICLE,
        }
    }
}

impl SimulationConfig {
    /// Reject values no kernel can run with
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("dt", self.dt),
            ("gravity", self.gravity),
            ("softening", self.softening),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::config(format!("{name} must be positive, got {value}")));
            }
        }
        if !(self.theta.is_finite() && self.theta >= 0.0) {
            return Err(Error::config(format!(
                "theta must be non-negative, got {}",
                self.theta
            )));
        }
        if self.batch_steps == 0 {
            return Err(Error::config("batch must contain at least one step"));
        }
        if self.tree_cells_per_particle == 0 {
            return Err(Error::config("tree needs at least one cell per particle"));
        }
        Ok(())
    }

    pub fn step_params(&self) -> StepParams {
        StepParams {
            dt: self.dt,
            gravity: self.gravity,
            softening: self.softening,
            theta: self.theta,
        }
    }
}

/// Uniform block read by every compute kernel (matches WGSL `SimParams`)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SimParams {
    pub dt: f32,
    pub gravity: f32,
    pub softening_sq: f32,
    pub theta_sq: f32,
    /// Particles the kernels iterate over (aligned count for direct summation)
    pub particle_count: u32,
    /// Tree cells available to the Barnes-Hut passes
    pub cell_capacity: u32,
    /// Work-groups dispatched by the box pass
    pub box_groups: u32,
    pub _padding: u32,
}

impl SimParams {
    pub fn new(config: &SimulationConfig, particle_count: u32) -> Self {
        Self {
            dt: config.dt,
            gravity: config.gravity,
            softening_sq: config.softening * config.softening,
            theta_sq: config.theta * config.theta,
            particle_count,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_layout() {
        assert_eq!(std::mem::size_of::<SimParams>(), 32);
    }

    #[test]
    fn alignment_per_strategy() {
        assert_eq!(Strategy::Direct.alignment(), 256);
        assert_eq!(Strategy::BarnesHut.alignment(), 1);
    }

    #[test]
    fn strategy_parses() {
        assert_eq!("direct".parse::<Strategy>().unwrap(), Strategy::Direct);
        assert_eq!("Barnes-Hut".parse::<Strategy>().unwrap(), Strategy::BarnesHut);
        assert!("fmm".parse::<Strategy>().is_err());
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(SimulationConfig::default().validate().is_ok());

        let bad = [
            SimulationConfig { dt: 0.0, ..Default::default() },
            SimulationConfig { softening: f32::NAN, ..Default::default() },
            SimulationConfig { gravity: -1.0, ..Default::default() },
            SimulationConfig { theta: -0.1, ..Default::default() },
            SimulationConfig { batch_steps: 0, ..Default::default() },
            SimulationConfig { tree_cells_per_particle: 0, ..Default::default() },
        ];
        for config in bad {
            let err = config.validate().unwrap_err();
            assert_eq!(err.code(), 3, "{config:?}");
        }
    }

    #[test]
    fn params_square_lengths() {
        let config = SimulationConfig {
            softening: 0.5,
            theta: 0.7,
            ..Default::default()
        };
        let params = SimParams::new(&config, 100);
        assert_eq!(params.softening_sq, 0.25);
        assert!((params.theta_sq - 0.49).abs() < 1e-6);
        assert_eq!(params.particle_count, 100);
    }
}
