//! Simulation constants
//!
//! Defaults are in dimensionless simulation units chosen for real-time
//! visualization rather than SI values.

/// Gravitational constant
pub const G: f32 = 1.0;

/// Time step per simulation step
pub const DEFAULT_DT: f32 = 0.001;

/// Softening length ε, added in quadrature to the squared separation
pub const SOFTENING: f32 = 0.01;

/// Barnes-Hut opening angle θ
pub const THETA: f32 = 0.5;

/// Work-group width of the direct-summation kernel.
/// The direct strategy pads the particle count to a multiple of this.
pub const DIRECT_WORKGROUP_SIZE: u32 = 256;

/// Work-group width of every Barnes-Hut pass
pub const TREE_WORKGROUP_SIZE: u32 = 256;

/// Deepest tree level that still subdivides.
/// Particles that collide below this depth are chained into the same leaf.
pub const MAX_TREE_DEPTH: u32 = 24;

/// Default number of tree cells reserved per particle
pub const TREE_CELLS_PER_PARTICLE: u32 = 2;

/// Lower bound on the number of tree cells, so tiny systems still get a usable tree
pub const MIN_TREE_CELLS: u32 = 1024;

/// Child slot holds nothing
pub const EMPTY_SLOT: i32 = -1;

/// Child slot is claimed by an inserting particle
pub const LOCKED_SLOT: i32 = -2;
