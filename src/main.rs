mod backend;
mod binding;
mod cli;
mod error;
mod framepace;
mod gpu;
mod gui;
mod kernel;
mod orchestrator;
mod particle;
mod physics;
mod present;
mod render;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop, EventLoopProxy},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::{
    backend::{ComputeBackend, CpuBackend},
    cli::SimulationConfig,
    error::FrameError,
    framepace::{FixedRefresh, RedrawSignal},
    gpu::{GpuContext, WindowSurface},
    gui::EguiCanvas,
    orchestrator::{
        shutdown_channel, DisplayRefresh, FrameOrchestrator, FramePresenter, LoopState, Shutdown,
        ShutdownHandle,
    },
    particle::{generate_particles, Boundary, ParticleSet},
    physics::GpuBackend,
    present::{FrameFeed, HeadlessPresenter, RenderFrame, WindowPresenter},
    render::Renderer,
};

fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    // Collect Arguments
    let args = cli::Args::parse();
    let config = SimulationConfig::from_args(&args)?;

    let tokio_rt = tokio::runtime::Runtime::new()?;
    if config.headless {
        return tokio_rt.block_on(run_headless(config));
    }

    // Setup Winit
    let event_loop = EventLoop::<UserEvent>::with_user_event().build()?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app_state = AppState {
        tokio_rt,
        proxy: event_loop.create_proxy(),
        config,
        gfx: None,
        shutdown: None,
        exit_error: None,
    };

    event_loop.run_app(&mut app_state)?;

    match app_state.exit_error.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn session_particles(config: &SimulationConfig, boundary: Boundary) -> ParticleSet {
    let seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
    info!(
        "Spawning {} particles in {}x{} with seed {seed}",
        config.particles, boundary.width, boundary.height
    );

    generate_particles(&mut StdRng::seed_from_u64(seed), config.particles.get(), boundary)
}

async fn run_headless(config: SimulationConfig) -> anyhow::Result<()> {
    let boundary = config.boundary;
    let state = LoopState::new(session_particles(&config, boundary), config.color_cycle());

    let (handle, shutdown) = shutdown_channel();
    let ctrl_c = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping after the current frame");
            ctrl_c.trigger();
        }
    });

    let presenter = HeadlessPresenter::new(config.width, config.height, config.frames, handle);
    let refresh = FixedRefresh::new(config.refresh_period);

    let end = if config.force_cpu {
        let backend = CpuBackend::new(config.particles, boundary);
        run_loop(backend, &config, state, refresh, presenter, shutdown).await
    } else {
        match GpuContext::headless().await {
            Ok(gpu) => {
                let backend = GpuBackend::new(&gpu, config.particles, boundary);
                run_loop(backend, &config, state, refresh, presenter, shutdown).await
            }
            Err(err) => {
                warn!("{err}, falling back to the CPU backend");
                let backend = CpuBackend::new(config.particles, boundary);
                run_loop(backend, &config, state, refresh, presenter, shutdown).await
            }
        }
    }?;

    info!("Simulated {} frames", end.frame);
    Ok(())
}

async fn run_loop<B, R, P>(
    backend: B,
    config: &SimulationConfig,
    state: LoopState,
    refresh: R,
    presenter: P,
    shutdown: Shutdown,
) -> Result<LoopState, FrameError>
where
    B: ComputeBackend,
    R: DisplayRefresh,
    P: FramePresenter,
{
    FrameOrchestrator::new(backend, config.map_timeout)
        .run(state, refresh, presenter, shutdown)
        .await
}

#[derive(Debug)]
enum UserEvent {
    SimulationEnded(Result<(), FrameError>),
}

struct GfxState {
    window: Arc<Window>,
    gpu: GpuContext,
    surface: WindowSurface,

    canvas: EguiCanvas,
    renderer: Renderer,
    frames: FrameFeed,
    refresh: RedrawSignal,
}

struct AppState {
    tokio_rt: tokio::runtime::Runtime,
    proxy: EventLoopProxy<UserEvent>,
    config: SimulationConfig,

    gfx: Option<GfxState>,
    shutdown: Option<ShutdownHandle>,
    exit_error: Option<anyhow::Error>,
}

impl AppState {
    fn start(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let window = Arc::new(
            event_loop
                .create_window(Window::default_attributes().with_title("Bouncing Balls"))
                .context("Failed to create window")?,
        );
        let window_size = window.inner_size();

        let (gpu, surface) = self
            .tokio_rt
            .block_on(GpuContext::with_window(window.clone()))?;

        // Fixed for the whole session, even if the window is resized later.
        let boundary = Boundary::from_size(window_size.width.max(1), window_size.height.max(1))?;
        let state = LoopState::new(session_particles(&self.config, boundary), self.config.color_cycle());

        let (presenter, frames) = WindowPresenter::new(window.clone());
        let refresh = RedrawSignal::default();
        let (handle, shutdown) = shutdown_channel();

        if self.config.force_cpu {
            let backend = CpuBackend::new(self.config.particles, boundary);
            self.spawn_loop(backend, state, refresh.clone(), presenter, shutdown);
        } else {
            let backend = GpuBackend::new(&gpu, self.config.particles, boundary);
            self.spawn_loop(backend, state, refresh.clone(), presenter, shutdown);
        }

        let canvas = EguiCanvas::new(
            &gpu.device,
            surface.format(),
            window_size.width,
            window_size.height,
        );

        self.gfx = Some(GfxState {
            window,
            gpu,
            surface,

            canvas,
            renderer: Renderer::default(),
            frames,
            refresh,
        });
        self.shutdown = Some(handle);
        Ok(())
    }

    fn spawn_loop<B: ComputeBackend + 'static>(
        &self,
        backend: B,
        state: LoopState,
        refresh: RedrawSignal,
        presenter: WindowPresenter,
        shutdown: Shutdown,
    ) {
        let orchestrator = FrameOrchestrator::new(backend, self.config.map_timeout);
        let proxy = self.proxy.clone();

        self.tokio_rt.spawn(async move {
            let result = orchestrator
                .run(state, refresh, presenter, shutdown)
                .await
                .map(|_| ());
            let _ = proxy.send_event(UserEvent::SimulationEnded(result));
        });
    }

    fn request_shutdown(&mut self, event_loop: &ActiveEventLoop) {
        match &self.shutdown {
            // The loop reports back through `user_event` once it has stopped.
            Some(handle) => handle.trigger(),
            None => event_loop.exit(),
        }
    }

    fn redraw(&mut self) {
        let Some(gfx) = &mut self.gfx else {
            return;
        };
        let Some((frame, fresh)) = gfx.frames.latest() else {
            return;
        };

        gfx.draw(&frame);

        // Only a newly delivered frame releases the loop's PresentWait.
        if fresh {
            gfx.refresh.presented();
        }
    }
}

impl GfxState {
    fn draw(&mut self, frame: &RenderFrame) {
        let texture = match self.surface.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                let size = self.window.inner_size();
                self.surface.resize(&self.gpu.device, size.width, size.height);
                return;
            }
            Err(err) => {
                warn!("Skipping frame {}: {err}", frame.index);
                return;
            }
        };

        let view = texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        self.canvas
            .paint(&self.renderer, &frame.particles, frame.color);

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Canvas Encoder"),
            });
        self.canvas.render(
            &self.gpu.device,
            &self.gpu.queue,
            &mut encoder,
            &view,
            self.renderer.background(),
        );

        self.gpu.queue.submit(Some(encoder.finish()));
        texture.present();
    }
}

impl ApplicationHandler<UserEvent> for AppState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.gfx.is_some() || self.exit_error.is_some() {
            return;
        }

        if let Err(err) = self.start(event_loop) {
            error!("Startup failed: {err:#}");
            self.exit_error = Some(err);
            event_loop.exit();
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
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => self.request_shutdown(event_loop),

            WindowEvent::Resized(new_size) => {
                if let Some(gfx) = &mut self.gfx {
                    gfx.surface
                        .resize(&gfx.gpu.device, new_size.width, new_size.height);
                    gfx.canvas.resize(new_size.width, new_size.height);
                }
            }

            WindowEvent::RedrawRequested => self.redraw(),

            _ => (),
        }
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: UserEvent) {
        match event {
            UserEvent::SimulationEnded(Ok(())) => info!("Simulation stopped"),
            UserEvent::SimulationEnded(Err(err)) => {
                self.exit_error = Some(anyhow::Error::new(err).context("Simulation failed"));
            }
        }

        self.shutdown = None;
        event_loop.exit();
    }
}
