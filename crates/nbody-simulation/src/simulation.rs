//! GPU-based N-body simulation manager
//!
//! Batches of steps are recorded into one command slot while the previous batch
//! executes from the other. Role rotations of a batch are committed to the store
//! only once its fence has been observed, so the renderer's slot is never written
//! while it may be drawn.

use nbody_physics::{Error, Particle, Result};

use crate::barnes_hut::BarnesHutDriver;
use crate::context::{map_read, GpuContext};
use crate::direct::DirectDriver;
use crate::driver::ForceDriver;
use crate::params::{SimulationConfig, Strategy};
use crate::scheduler::ExecutionScheduler;
use crate::store::{ParticleStore, RoleMap};

/// A submitted batch whose rotations are still pending
#[derive(Debug, Clone, Copy)]
struct Batch {
    slot: usize,
    steps: u32,
}

pub struct Simulation {
    device: wgpu::Device,
    queue: wgpu::Queue,
    store: ParticleStore,
    driver: Box<dyn ForceDriver>,
    scheduler: ExecutionScheduler,
    config: SimulationConfig,
    in_flight: Option<Batch>,
    steps_completed: u64,
}

impl Simulation {
    pub fn new(context: &GpuContext, particles: &[Particle], config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        if particles.is_empty() {
            return Err(Error::config("simulation needs at least one particle"));
        }
        log::info!(
            "Initializing Simulation ({} particles, strategy {})...",
            particles.len(),
            config.strategy
        );

        let device = context.device.clone();
        let queue = context.queue.clone();
        let store = ParticleStore::new(&device, particles, config.strategy.alignment())?;
        let driver: Box<dyn ForceDriver> = match config.strategy {
            Strategy::Direct => Box::new(DirectDriver::new(&device, &store, &config)?),
            Strategy::BarnesHut => Box::new(BarnesHutDriver::new(&device, &store, &config)?),
        };
        let scheduler = ExecutionScheduler::new(device.clone(), queue.clone());

        log::info!(
            "✓ Simulation ready: {} driver, {} particles ({} aligned), {} steps per batch",
            driver.name(),
            store.particle_count(),
            store.aligned_count(),
            config.batch_steps
        );

        Ok(Self {
            device,
            queue,
            store,
            driver,
            scheduler,
            config,
            in_flight: None,
            steps_completed: 0,
        })
    }

    /// Record and submit one batch of `batch_steps` steps
    pub fn step(&mut self) -> Result<()> {
        let steps = self.config.batch_steps;

        // Step 1: roles as they will be once the outstanding batch is committed
        let mut roles = match self.in_flight {
            Some(batch) => self.store.roles().after_batch(batch.steps),
            None => self.store.roles(),
        };

        // Step 2: record while the other slot may still execute
        let slot = self.scheduler.begin_recording()?;
        {
            let encoder = self.scheduler.encoder(slot)?;
            for _ in 0..steps {
                self.driver.encode_step(encoder, &self.store, roles);
                roles.rotate_after_compute();
            }
            self.driver.encode_status_copy(encoder, slot);
        }

        // Step 3: commit the previous batch
        self.retire()?;

        // Step 4: submit; rotations stay pending until the fence is seen
        self.scheduler.submit(slot)?;
        self.in_flight = Some(Batch { slot, steps });
        Ok(())
    }

    /// Wait for the outstanding batch, commit its rotations and check its status
    fn retire(&mut self) -> Result<()> {
        let Some(batch) = self.in_flight.take() else {
            return Ok(());
        };
        self.scheduler.wait(batch.slot)?;
        for _ in 0..batch.steps {
            self.store.rotate_after_compute();
        }
        self.store.rotate_after_render();
        self.steps_completed += u64::from(batch.steps);
        log::debug!(
            "Retired batch in slot {} ({} steps, {} total), roles {:?}",
            batch.slot,
            batch.steps,
            self.steps_completed,
            self.store.roles()
        );
        self.driver.check_status(&self.device, batch.slot)
    }

    /// Block until no batch is outstanding
    pub fn wait_idle(&mut self) -> Result<()> {
        self.retire()?;
        self.scheduler.wait_all()?;
        Ok(())
    }

    /// Buffer the renderer may draw: the committed render role
    pub fn render_buffer(&self) -> &wgpu::Buffer {
        self.store.render_buffer()
    }

    pub fn roles(&self) -> RoleMap {
        self.store.roles()
    }

    pub fn particle_count(&self) -> u32 {
        self.store.particle_count()
    }

    pub fn aligned_count(&self) -> u32 {
        self.store.aligned_count()
    }

    /// Steps whose completion has been observed
    pub fn steps_completed(&self) -> u64 {
        self.steps_completed
    }

    pub fn strategy_name(&self) -> &'static str {
        self.driver.name()
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Copy the newest state back to the host, padding excluded
    pub fn read_particles(&mut self) -> Result<Vec<Particle>> {
        self.wait_idle()?;

        let size = self.store.byte_size();
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Particle Readback Buffer"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        let newest = self.store.roles().compute_input();
        encoder.copy_buffer_to_buffer(self.store.buffer(newest), 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        map_read(&self.device, slice)?;
        let mut particles: Vec<Particle> = {
            let data = slice.get_mapped_range();
            bytemuck::cast_slice(&data).to_vec()
        };
        staging.unmap();

        particles.truncate(self.store.particle_count() as usize);
        Ok(particles)
    }

    /// Replace the state in every slot with `particles` (same count)
    pub fn reset(&mut self, particles: &[Particle]) -> Result<()> {
        self.wait_idle()?;
        self.store.upload(&self.queue, particles)?;
        self.steps_completed = 0;
        log::info!("Simulation reset ({} particles)", particles.len());
        Ok(())
    }

    /// Apply new runtime parameters to subsequent batches
    pub fn update_config(&mut self, config: SimulationConfig) -> Result<()> {
        config.validate()?;
        if config.strategy != self.config.strategy {
            return Err(Error::config(format!(
                "cannot switch strategy from {} to {} on a running simulation",
                self.config.strategy, config.strategy
            )));
        }
        if config.tree_cells_per_particle != self.config.tree_cells_per_particle {
            return Err(Error::config(
                "tree capacity is fixed once the simulation is created",
            ));
        }
        self.driver.update_params(&self.queue, &config);
        self.config = config;
        Ok(())
    }
}
