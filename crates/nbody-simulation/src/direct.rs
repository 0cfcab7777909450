//! Direct-summation driver

use nbody_physics::{Result, DIRECT_WORKGROUP_SIZE};
use wgpu::util::DeviceExt;

use crate::context::validated;
use crate::driver::{compute_pipeline, uniform_entry, ForceDriver};
use crate::params::{SimParams, SimulationConfig, Strategy};
use crate::store::{ParticleStore, RoleMap};

/// Dispatches the O(n²) force-and-integrate kernel, one work-group per 256 particles
pub struct DirectDriver {
    pipeline: wgpu::ComputePipeline,
    params_buffer: wgpu::Buffer,
    params_bind_group: wgpu::BindGroup,
    aligned_count: u32,
}

impl DirectDriver {
    pub fn new(
        device: &wgpu::Device,
        store: &ParticleStore,
        config: &SimulationConfig,
    ) -> Result<Self> {
        log::info!("Initializing direct-summation driver...");
        let aligned_count = store.aligned_count();

        let params = SimParams::new(config, aligned_count);
        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Direct Params Buffer"),
            contents: bytemuck::cast_slice(&[params]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let shader = validated(device, "create direct shader", || {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Direct Force Shader"),
                source: wgpu::ShaderSource::Wgsl(include_str!("shaders/direct.wgsl").into()),
            })
        })?;

        let params_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Direct Params Bind Group Layout"),
            entries: &[uniform_entry(0, false)],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Direct Pipeline Layout"),
            bind_group_layouts: &[store.io_layout(), &params_layout],
            push_constant_ranges: &[],
        });
        let pipeline = validated(device, "create direct pipeline", || {
            compute_pipeline(device, "Direct Force Pipeline", &pipeline_layout, &shader)
        })?;

        let params_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Direct Params Bind Group"),
            layout: &params_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: params_buffer.as_entire_binding(),
            }],
        });

        log::info!("Direct driver ready ({aligned_count} aligned particles)");

        Ok(Self {
            pipeline,
            params_buffer,
            params_bind_group,
            aligned_count,
        })
    }
}

impl ForceDriver for DirectDriver {
    fn name(&self) -> &'static str {
        Strategy::Direct.name()
    }

    fn alignment(&self) -> u32 {
        Strategy::Direct.alignment()
    }

    fn encode_step(&self, encoder: &mut wgpu::CommandEncoder, store: &ParticleStore, roles: RoleMap) {
        let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Direct Force Pass"),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(&self.pipeline);
        compute_pass.set_bind_group(0, store.io_bind_group(roles), &[]);
        compute_pass.set_bind_group(1, &self.params_bind_group, &[]);
        compute_pass.dispatch_workgroups(self.aligned_count / DIRECT_WORKGROUP_SIZE, 1, 1);
    }

    fn update_params(&self, queue: &wgpu::Queue, config: &SimulationConfig) {
        let params = SimParams::new(config, self.aligned_count);
        queue.write_buffer(&self.params_buffer, 0, bytemuck::cast_slice(&[params]));
    }
}
