//! Real-time gravitational N-body simulation
//!
//! Windowed mode draws the committed render buffer every frame and then submits the
//! next batch of steps. Headless mode runs a fixed number of batches and writes the
//! final state to a file.

mod cli;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use glam::Vec2;
use nbody_physics::io::save_particles;
use nbody_physics::Particle;
use nbody_renderer::{Camera2D, ParticleRenderer, RenderSettings};
use nbody_simulation::{
    request_adapter, request_device, GpuContext, Simulation, SimulationConfig, Strategy,
};
use winit::{
    application::ApplicationHandler,
    event::*,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

const THETA_STEP: f32 = 0.1;

struct GpuState {
    surface: wgpu::Surface<'static>,
    context: GpuContext,
    config: wgpu::SurfaceConfiguration,
    simulation: Simulation,
    renderer: ParticleRenderer,
    camera: Camera2D,
    settings: RenderSettings,
    initial: Vec<Particle>,
    paused: bool,

    frame_times: VecDeque<f32>,
    last_frame_time: Instant,
}

impl GpuState {
    async fn new(
        window: Arc<Window>,
        particles: Vec<Particle>,
        sim_config: SimulationConfig,
    ) -> anyhow::Result<Self> {
        let size = window.inner_size();

        // Create wgpu instance
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let surface = instance
            .create_surface(window.clone())
            .context("failed to create surface")?;

        // Request adapter, device and queue
        let adapter = request_adapter(&instance, Some(&surface)).await?;
        let (device, queue) = request_device(&adapter).await?;

        // Configure surface
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .or_else(|| surface_caps.formats.first().copied())
            .context("surface reports no formats")?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoNoVsync,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let context = GpuContext::from_parts(&adapter, device, queue);

        // Create simulation
        let simulation = Simulation::new(&context, &particles, sim_config)?;
        log::info!("✓ Simulation initialized");

        // Create renderer
        let renderer = ParticleRenderer::new(&context.device, &config);
        log::info!("✓ Renderer initialized");

        // Create camera
        let mut camera = Camera2D::new(config.width, config.height);
        camera.fit(&particles);

        Ok(Self {
            surface,
            context,
            config,
            simulation,
            renderer,
            camera,
            settings: RenderSettings::default(),
            initial: particles,
            paused: false,
            frame_times: VecDeque::with_capacity(100),
            last_frame_time: Instant::now(),
        })
    }

    fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.context.device, &self.config);
            self.renderer.resize(&self.config);
            self.camera.resize(new_size.width, new_size.height);
        }
    }

    /// Draw the committed render buffer, then submit the next batch. Returns the frame rate.
    fn render(&mut self) -> anyhow::Result<f32> {
        // Track frame time
        let now = Instant::now();
        let frame_time = (now - self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        if self.frame_times.len() == self.frame_times.capacity() {
            self.frame_times.pop_front();
        }
        self.frame_times.push_back(frame_time);
        let average = self.frame_times.iter().sum::<f32>() / self.frame_times.len() as f32;
        let fps = if average > 0.0 { 1.0 / average } else { 0.0 };

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.context.device, &self.config);
                return Ok(fps);
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("Surface timeout, skipping frame");
                return Ok(fps);
            }
            Err(e) => return Err(e).context("failed to acquire surface texture"),
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        self.renderer.render(
            &self.context.device,
            &self.context.queue,
            &view,
            &self.camera,
            self.simulation.render_buffer(),
            self.simulation.particle_count(),
            &self.settings,
        );
        output.present();

        if !self.paused {
            self.simulation.step()?;
        }
        Ok(fps)
    }

    fn title(&self, fps: f32) -> String {
        format!(
            "N-body [{}] - {} particles - {} steps - {:.0} FPS{}",
            self.simulation.strategy_name(),
            self.simulation.particle_count(),
            self.simulation.steps_completed(),
            fps,
            if self.paused { " (paused)" } else { "" }
        )
    }

    fn adjust_theta(&mut self, delta: f32) -> anyhow::Result<()> {
        if self.simulation.config().strategy != Strategy::BarnesHut {
            return Ok(());
        }
        let mut config = self.simulation.config().clone();
        config.theta = (config.theta + delta).max(0.0);
        log::info!("theta = {:.2}", config.theta);
        self.simulation.update_config(config)?;
        Ok(())
    }

    fn handle_key(&mut self, key: KeyCode) -> anyhow::Result<()> {
        match key {
            KeyCode::Space => {
                self.paused = !self.paused;
                log::info!("Simulation {}", if self.paused { "paused" } else { "resumed" });
            }
            KeyCode::KeyR => self.simulation.reset(&self.initial)?,
            KeyCode::KeyF => {
                let current = self.simulation.read_particles()?;
                self.camera.fit(&current);
            }
            KeyCode::BracketRight => self.adjust_theta(THETA_STEP)?,
            KeyCode::BracketLeft => self.adjust_theta(-THETA_STEP)?,
            _ => {}
        }
        Ok(())
    }
}

struct App {
    window: Option<Arc<Window>>,
    gpu_state: Option<GpuState>,
    particles: Option<Vec<Particle>>,
    sim_config: SimulationConfig,
    mouse_pressed: bool,
    last_mouse_pos: Option<(f64, f64)>,
    error: Option<anyhow::Error>,
}

impl App {
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        self.error = Some(error);
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let Some(particles) = self.particles.take() else {
            return;
        };

        let window_attributes = Window::default_attributes()
            .with_title("N-body Simulation")
            .with_inner_size(winit::dpi::LogicalSize::new(1600, 900));
        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => return self.fail(event_loop, e.into()),
        };
        self.window = Some(window.clone());

        match pollster::block_on(GpuState::new(window, particles, self.sim_config.clone())) {
            Ok(state) => self.gpu_state = Some(state),
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        ..
                    },
                ..
            } => event_loop.exit(),

            WindowEvent::Resized(physical_size) => {
                if let Some(gpu_state) = &mut self.gpu_state {
                    gpu_state.resize(physical_size);
                }
            }

            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key_code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                if let Some(gpu_state) = &mut self.gpu_state {
                    if let Err(e) = gpu_state.handle_key(key_code) {
                        self.fail(event_loop, e);
                    }
                }
            }

            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                self.mouse_pressed = state == ElementState::Pressed;
                if !self.mouse_pressed {
                    self.last_mouse_pos = None;
                }
            }

            WindowEvent::CursorMoved { position, .. } => {
                if self.mouse_pressed {
                    if let (Some(last_pos), Some(gpu_state)) =
                        (self.last_mouse_pos, &mut self.gpu_state)
                    {
                        let delta = Vec2::new(
                            (position.x - last_pos.0) as f32,
                            (position.y - last_pos.1) as f32,
                        );
                        gpu_state.camera.pan(delta);
                    }
                    self.last_mouse_pos = Some((position.x, position.y));
                }
            }

            WindowEvent::MouseWheel { delta, .. } => {
                let scroll = match delta {
                    MouseScrollDelta::LineDelta(_x, y) => y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 * 0.02,
                };
                if let Some(gpu_state) = &mut self.gpu_state {
                    gpu_state.camera.zoom(0.9_f32.powf(scroll));
                }
            }

            WindowEvent::RedrawRequested => {
                if let (Some(window), Some(gpu_state)) = (&self.window, &mut self.gpu_state) {
                    match gpu_state.render() {
                        Ok(fps) => window.set_title(&gpu_state.title(fps)),
                        Err(e) => self.fail(event_loop, e),
                    }
                }
            }

            _ => {}
        }

        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn run_windowed(particles: Vec<Particle>, sim_config: SimulationConfig) -> anyhow::Result<()> {
    let event_loop = EventLoop::new().context("failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App {
        window: None,
        gpu_state: None,
        particles: Some(particles),
        sim_config,
        mouse_pressed: false,
        last_mouse_pos: None,
        error: None,
    };
    event_loop.run_app(&mut app)?;

    // Drain outstanding work before the device goes away
    if let Some(gpu_state) = &mut app.gpu_state {
        gpu_state.simulation.wait_idle()?;
    }
    match app.error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn run_headless(cli: &Cli, particles: &[Particle], sim_config: SimulationConfig) -> anyhow::Result<()> {
    let context = GpuContext::new_headless()?;
    let mut simulation = Simulation::new(&context, particles, sim_config)?;

    let start = Instant::now();
    let report_every = (cli.steps / 10).max(1);
    for batch in 1..=cli.steps {
        simulation.step()?;
        if batch % report_every == 0 {
            log::info!("Batch {batch}/{}", cli.steps);
        }
    }
    let result = simulation.read_particles()?;
    let elapsed = start.elapsed().as_secs_f64();

    let steps = simulation.steps_completed();
    log::info!(
        "✓ {steps} steps of {} particles in {elapsed:.2}s ({:.1} steps/s)",
        result.len(),
        steps as f64 / elapsed.max(f64::EPSILON)
    );

    match &cli.output {
        Some(path) => save_particles(path, &result)?,
        None => log::warn!("No --output given, final state discarded"),
    }
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let particles = cli.initial_particles()?;
    let sim_config = cli.simulation_config();
    sim_config.validate()?;

    if cli.headless {
        run_headless(&cli, &particles, sim_config)
    } else {
        run_windowed(particles, sim_config)
    }
}

fn main() {
    // Initialize logger (RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    log::info!(
        "Starting N-body simulation ({} strategy, {} mode)...",
        cli.strategy,
        if cli.headless { "headless" } else { "windowed" }
    );

    if let Err(e) = run(cli) {
        match e.downcast_ref::<nbody_physics::Error>() {
            Some(error) => log::error!("{:?} (code {}): {e:#}", error.kind(), error.code()),
            None => log::error!("{e:#}"),
        }
        std::process::exit(1);
    }
}
