//! Barnes-Hut driver: five compute passes per step over a quadtree rebuilt from scratch
//!
//! 1. **Box** - bounding box of all bodies, reset of the child slots, root setup
//! 2. **Tree** - lock-free insertion of every body
//! 3. **Center** - cell masses and centroids, one dispatch per depth, deepest first
//! 4. **Sort** - tree-order intervals, one dispatch per depth, root first
//! 5. **Force** - interval walk with the opening test, then integration
//!
//! Bodies occupy node indices `[0, n)` and cells `[n, n + capacity)`; the root is the
//! last cell. A build that runs out of cells leaves the particles untouched and is
//! reported through the status word copied after each batch.

use bytemuck::{Pod, Zeroable};
use nbody_physics::barnes_hut::cell_capacity;
use nbody_physics::{Error, Result, MAX_TREE_DEPTH, TREE_WORKGROUP_SIZE};
use wgpu::util::DeviceExt;

use crate::context::{map_read, validated};
use crate::driver::{compute_pipeline, storage_entry, uniform_entry, workgroups, ForceDriver};
use crate::params::{SimParams, SimulationConfig, Strategy};
use crate::scheduler::SLOT_COUNT;
use crate::store::{ParticleStore, RoleMap};

/// Upper bound on box-pass work-groups; the rest is covered by grid striding
pub const MAX_BOX_GROUPS: u32 = 256;

/// Distance between per-depth uniforms, the guaranteed dynamic offset alignment
const LEVEL_STRIDE: u64 = 256;

/// Bytes of the tree state header ahead of the box partials
const STATE_HEADER_SIZE: u64 = 32;

pub const STATUS_OK: u32 = 0;
pub const STATUS_CAPACITY: u32 = 1;
pub const STATUS_STALLED: u32 = 2;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct LevelParams {
    level: u32,
    _padding: [u32; 3],
}

/// First 16 bytes of the GPU tree state, as copied back after a batch
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct TreeStatus {
    pub groups_done: u32,
    /// Lowest cell index handed out by the last build
    pub bottom: i32,
    pub status: u32,
    pub max_depth: u32,
}

impl TreeStatus {
    /// Cells the last build claimed, root included
    pub fn cells_used(&self, body_count: u32, capacity: u32) -> u64 {
        let root = i64::from(body_count) + i64::from(capacity) - 1;
        (root - i64::from(self.bottom) + 1).max(0) as u64
    }

    /// Turn a non-zero status word into the matching error
    pub fn check(&self, body_count: u32, capacity: u32) -> Result<()> {
        match self.status {
            STATUS_OK => Ok(()),
            STATUS_CAPACITY => Err(Error::ResourceExhaustion {
                resource: "tree cells",
                required: self.cells_used(body_count, capacity),
                capacity: u64::from(capacity),
            }),
            STATUS_STALLED => Err(Error::device(
                "tree build",
                "insertion did not converge",
            )),
            other => Err(Error::device(
                "tree build",
                format!("unknown status {other}"),
            )),
        }
    }
}

pub struct BarnesHutDriver {
    box_pipeline: wgpu::ComputePipeline,
    tree_pipeline: wgpu::ComputePipeline,
    center_pipeline: wgpu::ComputePipeline,
    sort_pipeline: wgpu::ComputePipeline,
    force_pipeline: wgpu::ComputePipeline,

    params_buffer: wgpu::Buffer,
    state_buffer: wgpu::Buffer,
    tree_bind_group: wgpu::BindGroup,
    level_bind_group: wgpu::BindGroup,
    status_staging: Vec<wgpu::Buffer>,

    body_count: u32,
    capacity: u32,
    box_groups: u32,
}

impl BarnesHutDriver {
    pub fn new(
        device: &wgpu::Device,
        store: &ParticleStore,
        config: &SimulationConfig,
    ) -> Result<Self> {
        log::info!("Initializing Barnes-Hut driver...");
        let body_count = store.particle_count();
        let capacity = cell_capacity(body_count, config.tree_cells_per_particle);
        let box_groups = workgroups(body_count, TREE_WORKGROUP_SIZE).min(MAX_BOX_GROUPS);

        let node_count = u64::from(body_count) + u64::from(capacity);
        let children_size = u64::from(capacity) * 4 * 4;
        let limits = device.limits();
        let binding_limit = u64::from(limits.max_storage_buffer_binding_size);
        for (resource, size) in [("tree child slots", children_size), ("tree node ranges", node_count * 16)] {
            if size > binding_limit || size > limits.max_buffer_size {
                return Err(Error::ResourceExhaustion {
                    resource,
                    required: size,
                    capacity: binding_limit.min(limits.max_buffer_size),
                });
            }
        }

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Tree Params Buffer"),
            contents: bytemuck::cast_slice(&[Self::sim_params(config, body_count, capacity, box_groups)]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let storage = |label: &str, size: u64, usage: wgpu::BufferUsages| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::STORAGE | usage,
                mapped_at_creation: false,
            })
        };
        let state_buffer = storage(
            "Tree State Buffer",
            STATE_HEADER_SIZE + u64::from(box_groups) * 16,
            wgpu::BufferUsages::COPY_SRC,
        );
        let children_buffer = storage("Tree Children Buffer", children_size, wgpu::BufferUsages::empty());
        let nodes_buffer = storage("Tree Nodes Buffer", u64::from(capacity) * 16, wgpu::BufferUsages::empty());
        let ranges_buffer = storage("Tree Ranges Buffer", node_count * 16, wgpu::BufferUsages::empty());
        let chain_buffer = storage("Tree Chain Buffer", u64::from(body_count) * 4, wgpu::BufferUsages::empty());
        let sorted_buffer = storage("Tree Sorted Buffer", u64::from(body_count) * 4, wgpu::BufferUsages::empty());

        let mut level_bytes = vec![0u8; LEVEL_STRIDE as usize * (MAX_TREE_DEPTH as usize + 1)];
        for level in 0..=MAX_TREE_DEPTH {
            let start = level as usize * LEVEL_STRIDE as usize;
            let entry = LevelParams {
                level,
                ..Default::default()
            };
            level_bytes[start..start + std::mem::size_of::<LevelParams>()]
                .copy_from_slice(bytemuck::bytes_of(&entry));
        }
        let level_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Tree Level Buffer"),
            contents: &level_bytes,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let status_staging = (0..SLOT_COUNT)
            .map(|slot| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(if slot == 0 {
                        "Tree Status Staging 0"
                    } else {
                        "Tree Status Staging 1"
                    }),
                    size: std::mem::size_of::<TreeStatus>() as u64,
                    usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                    mapped_at_creation: false,
                })
            })
            .collect();

        let tree_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Tree Bind Group Layout"),
            entries: &[
                uniform_entry(0, false),
                storage_entry(1),
                storage_entry(2),
                storage_entry(3),
                storage_entry(4),
                storage_entry(5),
                storage_entry(6),
            ],
        });
        let tree_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Tree Bind Group"),
            layout: &tree_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: state_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: children_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: nodes_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: ranges_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: chain_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: sorted_buffer.as_entire_binding(),
                },
            ],
        });

        let level_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Tree Level Bind Group Layout"),
            entries: &[uniform_entry(0, true)],
        });
        let level_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Tree Level Bind Group"),
            layout: &level_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &level_buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<LevelParams>() as u64),
                }),
            }],
        });

        let build_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Tree Build Pipeline Layout"),
            bind_group_layouts: &[store.input_layout(), &tree_layout],
            push_constant_ranges: &[],
        });
        let level_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Tree Level Pipeline Layout"),
            bind_group_layouts: &[store.input_layout(), &tree_layout, &level_layout],
            push_constant_ranges: &[],
        });
        let force_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Tree Force Pipeline Layout"),
            bind_group_layouts: &[store.io_layout(), &tree_layout],
            push_constant_ranges: &[],
        });

        let pass = |label: &'static str, source: &'static str, layout: &wgpu::PipelineLayout| {
            validated(device, label, || {
                let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::Wgsl(source.into()),
                });
                compute_pipeline(device, label, layout, &module)
            })
        };

        let box_pipeline = pass(
            "Tree Box Pipeline",
            concat!(include_str!("shaders/bh_common.wgsl"), include_str!("shaders/bh_box.wgsl")),
            &build_layout,
        )?;
        let tree_pipeline = pass(
            "Tree Insert Pipeline",
            concat!(include_str!("shaders/bh_common.wgsl"), include_str!("shaders/bh_tree.wgsl")),
            &build_layout,
        )?;
        let center_pipeline = pass(
            "Tree Center Pipeline",
            concat!(include_str!("shaders/bh_common.wgsl"), include_str!("shaders/bh_center.wgsl")),
            &level_pipeline_layout,
        )?;
        let sort_pipeline = pass(
            "Tree Sort Pipeline",
            concat!(include_str!("shaders/bh_common.wgsl"), include_str!("shaders/bh_sort.wgsl")),
            &level_pipeline_layout,
        )?;
        let force_pipeline = pass(
            "Tree Force Pipeline",
            concat!(include_str!("shaders/bh_common.wgsl"), include_str!("shaders/bh_force.wgsl")),
            &force_layout,
        )?;

        log::info!(
            "Barnes-Hut driver ready ({body_count} bodies, {capacity} cells, {box_groups} box groups)"
        );

        Ok(Self {
            box_pipeline,
            tree_pipeline,
            center_pipeline,
            sort_pipeline,
            force_pipeline,
            params_buffer,
            state_buffer,
            tree_bind_group,
            level_bind_group,
            status_staging,
            body_count,
            capacity,
            box_groups,
        })
    }

    fn sim_params(config: &SimulationConfig, body_count: u32, capacity: u32, box_groups: u32) -> SimParams {
        SimParams {
            cell_capacity: capacity,
            box_groups,
            ..SimParams::new(config, body_count)
        }
    }

    pub fn cell_capacity(&self) -> u32 {
        self.capacity
    }

    fn per_level(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        store: &ParticleStore,
        roles: RoleMap,
        label: &str,
        pipeline: &wgpu::ComputePipeline,
        levels: impl Iterator<Item = u32>,
    ) {
        let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(pipeline);
        compute_pass.set_bind_group(0, store.input_bind_group(roles), &[]);
        compute_pass.set_bind_group(1, &self.tree_bind_group, &[]);
        let groups = workgroups(self.capacity, TREE_WORKGROUP_SIZE);
        for level in levels {
            let offset = (u64::from(level) * LEVEL_STRIDE) as u32;
            compute_pass.set_bind_group(2, &self.level_bind_group, &[offset]);
            compute_pass.dispatch_workgroups(groups, 1, 1);
        }
    }
}

impl ForceDriver for BarnesHutDriver {
    fn name(&self) -> &'static str {
        Strategy::BarnesHut.name()
    }

    fn alignment(&self) -> u32 {
        Strategy::BarnesHut.alignment()
    }

    fn encode_step(&self, encoder: &mut wgpu::CommandEncoder, store: &ParticleStore, roles: RoleMap) {
        let body_groups = workgroups(self.body_count, TREE_WORKGROUP_SIZE);

        // Step 1: Bounding box and tree reset
        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Tree Box Pass"),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(&self.box_pipeline);
            compute_pass.set_bind_group(0, store.input_bind_group(roles), &[]);
            compute_pass.set_bind_group(1, &self.tree_bind_group, &[]);
            compute_pass.dispatch_workgroups(self.box_groups, 1, 1);
        }

        // Step 2: Insert bodies
        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Tree Insert Pass"),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(&self.tree_pipeline);
            compute_pass.set_bind_group(0, store.input_bind_group(roles), &[]);
            compute_pass.set_bind_group(1, &self.tree_bind_group, &[]);
            compute_pass.dispatch_workgroups(body_groups, 1, 1);
        }

        // Step 3: Summarize cells bottom-up
        self.per_level(
            encoder,
            store,
            roles,
            "Tree Center Pass",
            &self.center_pipeline,
            (0..=MAX_TREE_DEPTH).rev(),
        );
        // Step 4: Assign tree-order intervals top-down
        self.per_level(
            encoder,
            store,
            roles,
            "Tree Sort Pass",
            &self.sort_pipeline,
            0..=MAX_TREE_DEPTH,
        );

        // Step 5: Forces and integration
        let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Tree Force Pass"),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(&self.force_pipeline);
        compute_pass.set_bind_group(0, store.io_bind_group(roles), &[]);
        compute_pass.set_bind_group(1, &self.tree_bind_group, &[]);
        compute_pass.dispatch_workgroups(body_groups, 1, 1);
    }

    fn encode_status_copy(&self, encoder: &mut wgpu::CommandEncoder, slot: usize) {
        encoder.copy_buffer_to_buffer(
            &self.state_buffer,
            0,
            &self.status_staging[slot],
            0,
            std::mem::size_of::<TreeStatus>() as u64,
        );
    }

    fn check_status(&self, device: &wgpu::Device, slot: usize) -> Result<()> {
        let staging = &self.status_staging[slot];
        let slice = staging.slice(..);
        map_read(device, slice)?;
        let status: TreeStatus = {
            let data = slice.get_mapped_range();
            *bytemuck::from_bytes(&data)
        };
        staging.unmap();

        if status.status != STATUS_OK {
            log::error!(
                "Tree build failed: status {}, {} of {} cells",
                status.status,
                status.cells_used(self.body_count, self.capacity),
                self.capacity
            );
        } else {
            log::trace!(
                "Tree build used {} cells, depth {}",
                status.cells_used(self.body_count, self.capacity),
                status.max_depth
            );
        }
        status.check(self.body_count, self.capacity)
    }

    fn update_params(&self, queue: &wgpu::Queue, config: &SimulationConfig) {
        let params = Self::sim_params(config, self.body_count, self.capacity, self.box_groups);
        queue.write_buffer(&self.params_buffer, 0, bytemuck::cast_slice(&[params]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbody_physics::ErrorKind;

    #[test]
    fn status_layout() {
        assert_eq!(std::mem::size_of::<TreeStatus>(), 16);
        assert_eq!(std::mem::size_of::<LevelParams>(), 16);
    }

    #[test]
    fn ok_status_passes() {
        let status = TreeStatus {
            bottom: 1500,
            ..Default::default()
        };
        assert!(status.check(1000, 1024).is_ok());
        assert_eq!(status.cells_used(1000, 1024), 524);
    }

    #[test]
    fn capacity_status_reports_exhaustion() {
        let status = TreeStatus {
            bottom: 999,
            status: STATUS_CAPACITY,
            ..Default::default()
        };
        let err = status.check(1000, 1024).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhaustion);
        match err {
            Error::ResourceExhaustion { required, capacity, .. } => {
                assert_eq!(capacity, 1024);
                assert!(required > capacity);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn stalled_status_is_a_device_failure() {
        let status = TreeStatus {
            status: STATUS_STALLED,
            ..Default::default()
        };
        assert_eq!(
            status.check(10, 1024).unwrap_err().kind(),
            ErrorKind::DeviceOperationFailure
        );
    }
}
