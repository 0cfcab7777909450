//! # N-body Physics
//!
//! Device-independent core of the gravity simulator: the particle layout shared with the
//! GPU, the error taxonomy, CPU reference kernels for direct summation and Barnes-Hut,
//! particle files and initial-condition presets.

pub mod barnes_hut;
pub mod constants;
pub mod error;
pub mod forces;
pub mod generate;
pub mod io;
pub mod particle;

pub use constants::*;
pub use error::{Error, ErrorKind, Result};
pub use forces::StepParams;
pub use generate::{generate, GeneratorParams, Preset};
pub use particle::*;
