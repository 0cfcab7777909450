//! Particle layout shared by the CPU reference kernels and the GPU buffers

use bytemuck::{Pod, Zeroable};
use glam::Vec2;

/// GPU-compatible point mass
/// Matches the WGSL `Particle` struct (24-byte stride)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Particle {
    /// Position in simulation units
    pub position: [f32; 2],
    /// Velocity in simulation units per time unit
    pub velocity: [f32; 2],
    /// Mass (zero for padding particles)
    pub mass: f32,
    /// Cached `1 / mass`, zero when the mass is zero
    pub inv_mass: f32,
}

impl Particle {
    /// Create a particle, deriving the cached inverse mass
    pub fn new(position: Vec2, velocity: Vec2, mass: f32) -> Self {
        Self {
            position: position.to_array(),
            velocity: velocity.to_array(),
            mass,
            inv_mass: inverse_mass(mass),
        }
    }

    /// Zero-mass filler used to reach the aligned particle count.
    ///
    /// Padding exerts no force (its mass is zero) and the kernels leave it untouched.
    pub fn padding() -> Self {
        Self::zeroed()
    }

    pub fn pos(&self) -> Vec2 {
        Vec2::from_array(self.position)
    }

    pub fn vel(&self) -> Vec2 {
        Vec2::from_array(self.velocity)
    }

    pub fn is_padding(&self) -> bool {
        self.mass == 0.0
    }

    /// Recompute the cached inverse mass after `mass` was edited in place
    pub fn refresh_inv_mass(&mut self) {
        self.inv_mass = inverse_mass(self.mass);
    }
}

fn inverse_mass(mass: f32) -> f32 {
    if mass > 0.0 {
        1.0 / mass
    } else {
        0.0
    }
}

/// Round `count` up to the next multiple of `alignment`
pub fn align_count(count: u32, alignment: u32) -> u32 {
    let alignment = alignment.max(1);
    count.div_ceil(alignment) * alignment
}

/// Copy `particles` into a vector padded with zero-mass particles up to the aligned count
pub fn pad_particles(particles: &[Particle], alignment: u32) -> Vec<Particle> {
    let aligned = align_count(particles.len() as u32, alignment) as usize;
    let mut padded = Vec::with_capacity(aligned);
    padded.extend_from_slice(particles);
    padded.resize(aligned, Particle::padding());
    padded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_wgsl() {
        assert_eq!(std::mem::size_of::<Particle>(), 24);
        assert_eq!(std::mem::align_of::<Particle>(), 4);
    }

    #[test]
    fn inverse_mass_is_derived() {
        let p = Particle::new(Vec2::ZERO, Vec2::ZERO, 4.0);
        assert_eq!(p.inv_mass, 0.25);

        let mut q = Particle::new(Vec2::ZERO, Vec2::ZERO, 0.0);
        assert_eq!(q.inv_mass, 0.0);
        q.mass = 2.0;
        q.refresh_inv_mass();
        assert_eq!(q.inv_mass, 0.5);
    }

    #[test]
    fn alignment_pads_with_zero_mass() {
        assert_eq!(align_count(1, 256), 256);
        assert_eq!(align_count(256, 256), 256);
        assert_eq!(align_count(257, 256), 512);
        assert_eq!(align_count(7, 1), 7);
        assert_eq!(align_count(7, 0), 7);

        let particles = vec![Particle::new(Vec2::ONE, Vec2::ZERO, 1.0); 3];
        let padded = pad_particles(&particles, 4);
        assert_eq!(padded.len(), 4);
        assert!(padded[3].is_padding());
        assert_eq!(&padded[..3], &particles[..]);
    }
}
