//! Accelerator-backed tests. Each one returns early when no adapter is available.

use approx::assert_relative_eq;
use glam::Vec2;
use nbody_physics::barnes_hut::{barnes_hut_step, cell_capacity};
use nbody_physics::forces::direct_step;
use nbody_physics::{generate, ErrorKind, GeneratorParams, Particle, Preset, StepParams};
use nbody_simulation::{map_read, GpuContext, Simulation, SimulationConfig, Strategy};

fn gpu() -> Option<GpuContext> {
    let _ = env_logger::builder().is_test(true).try_init();
    match GpuContext::new_headless() {
        Ok(context) => Some(context),
        Err(e) => {
            log::warn!("skipping GPU test: {e}");
            None
        }
    }
}

fn read_buffer(context: &GpuContext, buffer: &wgpu::Buffer, count: usize) -> Vec<Particle> {
    let size = (count * std::mem::size_of::<Particle>()) as u64;
    let staging = context.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Test Readback"),
        size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    let mut encoder = context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
    context.queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    map_read(&context.device, slice).unwrap();
    let particles = bytemuck::cast_slice(&slice.get_mapped_range()).to_vec();
    staging.unmap();
    particles
}

fn config(strategy: Strategy) -> SimulationConfig {
    SimulationConfig {
        strategy,
        ..Default::default()
    }
}

fn cpu_direct(particles: &[Particle], params: &StepParams, steps: u32) -> Vec<Particle> {
    let mut current = particles.to_vec();
    let mut next = current.clone();
    for _ in 0..steps {
        direct_step(&current, &mut next, params).unwrap();
        std::mem::swap(&mut current, &mut next);
    }
    current
}

fn disk(count: u32, seed: u64) -> Vec<Particle> {
    generate(
        Preset::RandomDisk,
        &GeneratorParams {
            count,
            seed,
            ..Default::default()
        },
    )
    .unwrap()
}

#[test]
fn two_body_direct_step() {
    let Some(context) = gpu() else { return };
    let particles = [
        Particle::new(Vec2::ZERO, Vec2::ZERO, 10.0),
        Particle::new(Vec2::new(10.0, 0.0), Vec2::ZERO, 1000.0),
    ];
    let mut sim = Simulation::new(&context, &particles, config(Strategy::Direct)).unwrap();
    assert_eq!(sim.particle_count(), 2);
    assert_eq!(sim.aligned_count(), 256);

    sim.step().unwrap();
    let after = sim.read_particles().unwrap();
    assert_eq!(after.len(), 2);
    assert_eq!(sim.steps_completed(), 1);

    // Particle 0 is pulled toward particle 1
    assert!(after[0].velocity[0] > 0.0);
    assert_relative_eq!(after[0].velocity[1], 0.0);
    assert!(after[0].position[0] > 0.0);

    // Displacement from rest is v·dt, so the velocity ratio is the displacement ratio
    let ratio = -after[1].velocity[0] / after[0].velocity[0];
    assert_relative_eq!(ratio, 0.01, max_relative = 1e-3);
}

#[test]
fn batches_match_cpu_reference() {
    let Some(context) = gpu() else { return };
    let particles = disk(300, 7);
    let config = SimulationConfig {
        batch_steps: 4,
        ..config(Strategy::Direct)
    };
    let mut sim = Simulation::new(&context, &particles, config.clone()).unwrap();
    for _ in 0..3 {
        sim.step().unwrap();
    }
    let gpu = sim.read_particles().unwrap();
    assert_eq!(sim.steps_completed(), 12);

    let cpu = cpu_direct(&particles, &config.step_params(), 12);
    for (g, c) in gpu.iter().zip(&cpu) {
        assert_relative_eq!(g.position[0], c.position[0], epsilon = 1e-3, max_relative = 1e-3);
        assert_relative_eq!(g.position[1], c.position[1], epsilon = 1e-3, max_relative = 1e-3);
        assert_eq!(g.mass, c.mass);
    }
}

#[test]
fn render_role_lags_newest_state() {
    let Some(context) = gpu() else { return };
    let particles = disk(64, 3);
    let mut sim = Simulation::new(&context, &particles, config(Strategy::Direct)).unwrap();

    // Before any batch retires the render slot holds the initial state
    let initial = read_buffer(&context, sim.render_buffer(), particles.len());
    assert_eq!(initial, particles);

    sim.step().unwrap();
    sim.wait_idle().unwrap();
    assert!(sim.roles().is_bijection());

    // One step committed: the render slot shows the state the step read
    let shown = read_buffer(&context, sim.render_buffer(), particles.len());
    assert_eq!(shown, particles);

    let newest = sim.read_particles().unwrap();
    assert_ne!(newest, particles);

    for _ in 0..5 {
        sim.step().unwrap();
    }
    sim.wait_idle().unwrap();
    assert!(sim.roles().is_bijection());
    assert_eq!(sim.steps_completed(), 6);
}

#[test]
fn barnes_hut_without_opening_matches_direct() {
    let Some(context) = gpu() else { return };
    let particles = disk(512, 11);
    let config = SimulationConfig {
        theta: 0.0,
        ..config(Strategy::BarnesHut)
    };
    let mut sim = Simulation::new(&context, &particles, config.clone()).unwrap();
    assert_eq!(sim.aligned_count(), 512);
    sim.step().unwrap();
    let gpu = sim.read_particles().unwrap();

    let cpu = cpu_direct(&particles, &config.step_params(), 1);
    for (g, c) in gpu.iter().zip(&cpu) {
        assert_relative_eq!(g.velocity[0], c.velocity[0], epsilon = 1e-4, max_relative = 1e-3);
        assert_relative_eq!(g.velocity[1], c.velocity[1], epsilon = 1e-4, max_relative = 1e-3);
        assert_relative_eq!(g.position[0], c.position[0], epsilon = 1e-4, max_relative = 1e-3);
        assert_relative_eq!(g.position[1], c.position[1], epsilon = 1e-4, max_relative = 1e-3);
    }
}

#[test]
fn barnes_hut_tracks_cpu_tree() {
    let Some(context) = gpu() else { return };
    let particles = generate(
        Preset::SpiralGalaxy,
        &GeneratorParams {
            count: 2000,
            ..Default::default()
        },
    )
    .unwrap();
    let config = config(Strategy::BarnesHut);
    let mut sim = Simulation::new(&context, &particles, config.clone()).unwrap();
    sim.step().unwrap();
    let gpu = sim.read_particles().unwrap();

    let mut cpu = particles.clone();
    let capacity = cell_capacity(particles.len() as u32, config.tree_cells_per_particle);
    barnes_hut_step(&particles, &mut cpu, &config.step_params(), capacity).unwrap();

    // Same tree shape on both sides; only summation order differs
    for (g, c) in gpu.iter().zip(&cpu) {
        assert_relative_eq!(g.position[0], c.position[0], epsilon = 1e-3, max_relative = 1e-3);
        assert_relative_eq!(g.position[1], c.position[1], epsilon = 1e-3, max_relative = 1e-3);
    }
}

#[test]
fn coincident_bodies_stay_finite() {
    let Some(context) = gpu() else { return };
    let mut particles = vec![Particle::new(Vec2::new(1.0, 1.0), Vec2::ZERO, 1.0); 32];
    particles.push(Particle::new(Vec2::new(-5.0, 3.0), Vec2::ZERO, 2.0));
    particles.push(Particle::new(Vec2::new(4.0, -2.0), Vec2::ZERO, 0.0));

    let mut sim = Simulation::new(&context, &particles, config(Strategy::BarnesHut)).unwrap();
    for _ in 0..3 {
        sim.step().unwrap();
    }
    let after = sim.read_particles().unwrap();
    for p in &after {
        assert!(p.position.iter().chain(&p.velocity).all(|v| v.is_finite()), "{p:?}");
    }
    // Zero-mass bodies are never moved
    assert_eq!(after[33], particles[33]);
}

#[test]
fn tree_capacity_exhaustion_is_reported() {
    let Some(context) = gpu() else { return };
    // Close pairs force a long chain of cells each
    let mut particles = Vec::new();
    for i in 0..200 {
        let x = (i % 20) as f32 * 10.0 - 100.0;
        let y = (i / 20) as f32 * 10.0 - 50.0;
        particles.push(Particle::new(Vec2::new(x, y), Vec2::ZERO, 1.0));
        particles.push(Particle::new(Vec2::new(x + 1e-3, y), Vec2::ZERO, 1.0));
    }
    let config = SimulationConfig {
        tree_cells_per_particle: 1,
        ..config(Strategy::BarnesHut)
    };
    let mut sim = Simulation::new(&context, &particles, config).unwrap();
    sim.step().unwrap();

    let err = sim.wait_idle().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhaustion);
    assert_eq!(err.code(), 1);
}

#[test]
fn config_changes_respect_fixed_resources() {
    let Some(context) = gpu() else { return };
    let particles = disk(100, 1);
    let mut sim = Simulation::new(&context, &particles, config(Strategy::BarnesHut)).unwrap();
    assert_eq!(sim.strategy_name(), "barnes-hut");

    let switched = config(Strategy::Direct);
    assert_eq!(sim.update_config(switched).unwrap_err().code(), 3);

    let tuned = SimulationConfig {
        theta: 0.8,
        dt: 0.002,
        ..config(Strategy::BarnesHut)
    };
    sim.update_config(tuned).unwrap();
    assert_eq!(sim.config().theta, 0.8);
    sim.step().unwrap();
    sim.wait_idle().unwrap();
}

#[test]
fn reset_restores_initial_state() {
    let Some(context) = gpu() else { return };
    let particles = disk(50, 9);
    let mut sim = Simulation::new(&context, &particles, config(Strategy::Direct)).unwrap();
    sim.step().unwrap();
    sim.step().unwrap();
    sim.reset(&particles).unwrap();
    assert_eq!(sim.steps_completed(), 0);
    assert_eq!(sim.read_particles().unwrap(), particles);
}

#[test]
fn empty_input_is_rejected() {
    let Some(context) = gpu() else { return };
    let err = Simulation::new(&context, &[], SimulationConfig::default()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::ConfigurationError);
}
