//! # N-body Renderer
//!
//! Draws the simulation's render-role buffer as instanced point sprites.

pub mod camera;
pub mod renderer;

pub use camera::*;
pub use renderer::*;
