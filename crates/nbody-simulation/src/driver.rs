//! Seam between the simulation loop and a force evaluation strategy

use nbody_physics::Result;

use crate::params::SimulationConfig;
use crate::store::{ParticleStore, RoleMap};

/// A GPU force-and-integrate method, recorded one step at a time
pub trait ForceDriver {
    fn name(&self) -> &'static str;

    /// Particle-count granularity the kernels require
    fn alignment(&self) -> u32;

    /// Record one step reading `roles.compute_input()` and overwriting `roles.compute_output()`
    fn encode_step(&self, encoder: &mut wgpu::CommandEncoder, store: &ParticleStore, roles: RoleMap);

    /// Record a copy of the driver's status word for command slot `slot`, after the batch
    fn encode_status_copy(&self, _encoder: &mut wgpu::CommandEncoder, _slot: usize) {}

    /// Inspect the status copied for `slot`. Call only after the slot's fence signaled.
    fn check_status(&self, _device: &wgpu::Device, _slot: usize) -> Result<()> {
        Ok(())
    }

    /// Push new parameters. Applies to batches submitted afterwards.
    fn update_params(&self, queue: &wgpu::Queue, config: &SimulationConfig);
}

/// Work-groups needed to cover `count` invocations
pub fn workgroups(count: u32, size: u32) -> u32 {
    count.div_ceil(size).max(1)
}

pub(crate) fn compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
) -> wgpu::ComputePipeline {
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        module,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    })
}

pub(crate) fn uniform_entry(binding: u32, has_dynamic_offset: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn storage_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workgroups_round_up() {
        assert_eq!(workgroups(1, 256), 1);
        assert_eq!(workgroups(256, 256), 1);
        assert_eq!(workgroups(257, 256), 2);
        assert_eq!(workgroups(0, 256), 1);
    }
}
