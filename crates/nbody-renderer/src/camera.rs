//! Camera system for 2D visualization

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2};
use nbody_physics::barnes_hut::compute_bounds;
use nbody_physics::Particle;

const MIN_HALF_HEIGHT: f32 = 1e-3;
const MAX_HALF_HEIGHT: f32 = 1e7;

/// Camera uniform for GPU
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    /// Sprite edge length in world units
    pub point_size: f32,
    /// Speed mapped to `fast_color`
    pub max_speed: f32,
    pub _padding: [f32; 2],
    pub slow_color: [f32; 4],
    pub fast_color: [f32; 4],
}

/// Orthographic camera looking at the simulation plane
pub struct Camera2D {
    pub center: Vec2,
    /// Half of the visible height in world units
    pub half_height: f32,
    width: u32,
    height: u32,
}

impl Camera2D {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            center: Vec2::ZERO,
            half_height: 150.0,
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    /// World units covered by one pixel
    pub fn world_per_pixel(&self) -> f32 {
        2.0 * self.half_height / self.height as f32
    }

    /// Move by a drag of `delta` pixels (y down, as reported by the window)
    pub fn pan(&mut self, delta: Vec2) {
        let scale = self.world_per_pixel();
        self.center += Vec2::new(-delta.x, delta.y) * scale;
    }

    /// Scale the view; factors above 1 zoom out
    pub fn zoom(&mut self, factor: f32) {
        if factor.is_finite() && factor > 0.0 {
            self.half_height = (self.half_height * factor).clamp(MIN_HALF_HEIGHT, MAX_HALF_HEIGHT);
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
    }

    /// Frame all particles with a small margin
    pub fn fit(&mut self, particles: &[Particle]) {
        let bounds = compute_bounds(particles);
        if bounds.is_empty() {
            return;
        }
        let extent = bounds.max - bounds.min;
        self.center = bounds.center();
        let half = (extent.y * 0.5).max(extent.x * 0.5 / self.aspect());
        self.half_height = (half * 1.1).clamp(MIN_HALF_HEIGHT, MAX_HALF_HEIGHT);
    }

    pub fn build_view_projection_matrix(&self) -> Mat4 {
        let half_width = self.half_height * self.aspect();
        Mat4::orthographic_rh(
            self.center.x - half_width,
            self.center.x + half_width,
            self.center.y - self.half_height,
            self.center.y + self.half_height,
            -1.0,
            1.0,
        )
    }

    pub fn to_uniform(
        &self,
        point_size_px: f32,
        max_speed: f32,
        slow_color: [f32; 4],
        fast_color: [f32; 4],
    ) -> CameraUniform {
        CameraUniform {
            view_proj: self.build_view_projection_matrix().to_cols_array_2d(),
            point_size: point_size_px * self.world_per_pixel(),
            max_speed: max_speed.max(f32::EPSILON),
            _padding: [0.0; 2],
            slow_color,
            fast_color,
        }
    }
}
