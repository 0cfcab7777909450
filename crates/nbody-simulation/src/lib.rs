//! # N-body Simulation Engine
//!
//! GPU gravitational N-body integration with two force strategies: direct
//! summation and a Barnes-Hut quadtree rebuilt every step. Particle state lives in
//! three buffers whose roles rotate, and batches are submitted through two command
//! slots so recording overlaps execution.

pub mod barnes_hut;
pub mod context;
pub mod direct;
pub mod driver;
pub mod params;
pub mod scheduler;
pub mod simulation;
pub mod store;

pub use barnes_hut::{BarnesHutDriver, TreeStatus};
pub use context::*;
pub use direct::DirectDriver;
pub use driver::{workgroups, ForceDriver};
pub use params::*;
pub use scheduler::*;
pub use simulation::Simulation;
pub use store::{ParticleStore, RoleMap};
