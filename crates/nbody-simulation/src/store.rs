//! Particle State Store: three particle buffers and the roles rotating across them
//!
//! The renderer reads the *render* slot, kernels read *compute-input* and write
//! *compute-output*. Roles only ever move by swapping, so at every instant they map
//! onto three distinct slots.

use nbody_physics::{pad_particles, Error, Particle, Result};

/// Assignment of the three logical roles to buffer slots `{0, 1, 2}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleMap {
    render: usize,
    input: usize,
    output: usize,
}

impl Default for RoleMap {
    fn default() -> Self {
        Self::new()
    }
}

impl RoleMap {
    pub const fn new() -> Self {
        Self {
            render: 0,
            input: 1,
            output: 2,
        }
    }

    pub fn render(&self) -> usize {
        self.render
    }

    pub fn compute_input(&self) -> usize {
        self.input
    }

    pub fn compute_output(&self) -> usize {
        self.output
    }

    /// The renderer is done with its slot: it becomes the next compute output
    pub fn rotate_after_render(&mut self) {
        std::mem::swap(&mut self.render, &mut self.output);
    }

    /// A step finished writing the output: it becomes the next input
    pub fn rotate_after_compute(&mut self) {
        std::mem::swap(&mut self.input, &mut self.output);
    }

    /// Roles after `steps` compute rotations followed by one render rotation
    pub fn after_batch(mut self, steps: u32) -> Self {
        for _ in 0..steps {
            self.rotate_after_compute();
        }
        self.rotate_after_render();
        self
    }

    pub fn is_bijection(&self) -> bool {
        let slots = [self.render, self.input, self.output];
        slots.iter().all(|&s| s < 3)
            && self.render != self.input
            && self.render != self.output
            && self.input != self.output
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Index of the ordered (input, output) slot pair among the six possible pairs
fn pair_index(input: usize, output: usize) -> usize {
    debug_assert!(input != output && input < 3 && output < 3);
    input * 2 + if output > input { output - 1 } else { output }
}

/// Owner of the buffer triple
pub struct ParticleStore {
    buffers: [wgpu::Buffer; 3],
    io_layout: wgpu::BindGroupLayout,
    input_layout: wgpu::BindGroupLayout,
    /// Group 0 for kernels that write: binding 0 reads the input slot, binding 1 writes the output slot
    io_bind_groups: Vec<wgpu::BindGroup>,
    /// Group 0 for kernels that only read the input slot
    input_bind_groups: Vec<wgpu::BindGroup>,
    roles: RoleMap,
    particle_count: u32,
    aligned_count: u32,
}

impl ParticleStore {
    /// Upload `particles` into all three slots, padded to `alignment`
    pub fn new(device: &wgpu::Device, particles: &[Particle], alignment: u32) -> Result<Self> {
        use wgpu::util::DeviceExt;

        if particles.is_empty() {
            return Err(Error::config("particle count must be positive"));
        }
        let padded = pad_particles(particles, alignment);
        let particle_count = particles.len() as u32;
        let aligned_count = padded.len() as u32;

        let size = std::mem::size_of_val(padded.as_slice()) as u64;
        let limit = device.limits().max_storage_buffer_binding_size as u64;
        if size > limit {
            return Err(Error::ResourceExhaustion {
                resource: "particle buffer bytes",
                required: size,
                capacity: limit,
            });
        }

        let labels = ["Particle Buffer 0", "Particle Buffer 1", "Particle Buffer 2"];
        let buffers = labels.map(|label| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(&padded),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
            })
        });

        let io_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Particle IO Bind Group Layout"),
            entries: &[storage_entry(0, true), storage_entry(1, false)],
        });
        let input_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Particle Input Bind Group Layout"),
            entries: &[storage_entry(0, true)],
        });

        let mut io_bind_groups = Vec::with_capacity(6);
        for input in 0..3 {
            for output in (0..3).filter(|&o| o != input) {
                debug_assert_eq!(pair_index(input, output), io_bind_groups.len());
                io_bind_groups.push(device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Particle IO Bind Group"),
                    layout: &io_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: buffers[input].as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: buffers[output].as_entire_binding(),
                        },
                    ],
                }));
            }
        }

        let input_bind_groups = buffers
            .iter()
            .map(|buffer| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Particle Input Bind Group"),
                    layout: &input_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: buffer.as_entire_binding(),
                    }],
                })
            })
            .collect();

        log::info!(
            "Particle buffers created: {particle_count} particles, {aligned_count} aligned, {} bytes each",
            size
        );

        Ok(Self {
            buffers,
            io_layout,
            input_layout,
            io_bind_groups,
            input_bind_groups,
            roles: RoleMap::new(),
            particle_count,
            aligned_count,
        })
    }

    pub fn roles(&self) -> RoleMap {
        self.roles
    }

    pub fn rotate_after_render(&mut self) {
        self.roles.rotate_after_render();
    }

    pub fn rotate_after_compute(&mut self) {
        self.roles.rotate_after_compute();
    }

    pub fn buffer(&self, slot: usize) -> &wgpu::Buffer {
        &self.buffers[slot]
    }

    /// Slot the renderer may read right now
    pub fn render_buffer(&self) -> &wgpu::Buffer {
        &self.buffers[self.roles.render()]
    }

    pub fn io_layout(&self) -> &wgpu::BindGroupLayout {
        &self.io_layout
    }

    pub fn input_layout(&self) -> &wgpu::BindGroupLayout {
        &self.input_layout
    }

    /// Read `roles.compute_input`, write `roles.compute_output`
    pub fn io_bind_group(&self, roles: RoleMap) -> &wgpu::BindGroup {
        &self.io_bind_groups[pair_index(roles.compute_input(), roles.compute_output())]
    }

    pub fn input_bind_group(&self, roles: RoleMap) -> &wgpu::BindGroup {
        &self.input_bind_groups[roles.compute_input()]
    }

    /// Particles supplied by the caller, padding excluded
    pub fn particle_count(&self) -> u32 {
        self.particle_count
    }

    pub fn aligned_count(&self) -> u32 {
        self.aligned_count
    }

    pub fn byte_size(&self) -> u64 {
        self.aligned_count as u64 * std::mem::size_of::<Particle>() as u64
    }

    /// Overwrite all three slots. The caller must make sure no submitted work still uses them.
    pub fn upload(&self, queue: &wgpu::Queue, particles: &[Particle]) -> Result<()> {
        if particles.len() as u32 != self.particle_count {
            return Err(Error::config(format!(
                "expected {} particles, got {}",
                self.particle_count,
                particles.len()
            )));
        }
        let padded = pad_particles(particles, self.aligned_count);
        for buffer in &self.buffers {
            queue.write_buffer(buffer, 0, bytemuck::cast_slice(&padded));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_indices_are_distinct() {
        let mut seen = Vec::new();
        for input in 0..3 {
            for output in (0..3).filter(|&o| o != input) {
                seen.push(pair_index(input, output));
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn rotations_keep_a_bijection() {
        // Every sequence of up to 10 rotations, encoded as bits
        for length in 0..=10u32 {
            for pattern in 0..(1u32 << length) {
                let mut roles = RoleMap::new();
                for bit in 0..length {
                    if pattern & (1 << bit) != 0 {
                        roles.rotate_after_render();
                    } else {
                        roles.rotate_after_compute();
                    }
                    assert!(roles.is_bijection(), "{roles:?} after pattern {pattern:b}");
                }
            }
        }
    }

    #[test]
    fn rotations_swap_the_expected_roles() {
        let mut roles = RoleMap::new();
        roles.rotate_after_compute();
        assert_eq!((roles.render(), roles.compute_input(), roles.compute_output()), (0, 2, 1));
        roles.rotate_after_render();
        assert_eq!((roles.render(), roles.compute_input(), roles.compute_output()), (1, 2, 0));
    }

    #[test]
    fn batches_never_write_the_render_slot() {
        let committed = RoleMap::new();
        for steps in 1..6 {
            let mut roles = committed;
            for _ in 0..steps {
                assert_ne!(roles.compute_output(), committed.render());
                roles.rotate_after_compute();
            }
            assert_eq!(committed.after_batch(steps).render(), {
                let mut r = committed;
                for _ in 0..steps {
                    r.rotate_after_compute();
                }
                r.compute_output()
            });
        }
    }

    #[test]
    fn broken_maps_are_detected() {
        let broken = RoleMap {
            render: 1,
            input: 1,
            output: 2,
        };
        assert!(!broken.is_bijection());
        assert!(RoleMap::new().is_bijection());
    }
}
