use std::{sync::Arc, time::Duration};

use log::{debug, info};
use tokio::sync::watch;
use winit::window::Window;

use crate::{
    framepace::FrameTimer,
    orchestrator::{FramePresenter, ShutdownHandle},
    particle::ParticleSet,
    render::{Color, DrawSurface, Renderer},
};

/// A finished frame waiting to be drawn.
#[derive(Clone, Debug)]
pub struct RenderFrame {
    pub index: u64,
    pub particles: ParticleSet,
    pub color: Color,
}

/// Window-thread end of the frame hand-off.
pub struct FrameFeed {
    frames: watch::Receiver<Option<Arc<RenderFrame>>>,
}

impl FrameFeed {
    /// Latest frame, and whether it arrived since the previous call. Redraws
    /// the OS asks for repeat the last frame and report `false`.
    pub fn latest(&mut self) -> Option<(Arc<RenderFrame>, bool)> {
        let fresh = self.frames.has_changed().unwrap_or(false);
        let frame = self.frames.borrow_and_update().clone()?;
        Some((frame, fresh))
    }
}

/// Hands frames to the window thread and asks it to redraw.
pub struct WindowPresenter {
    window: Arc<Window>,
    frames: watch::Sender<Option<Arc<RenderFrame>>>,
    timer: FrameTimer,
}

impl WindowPresenter {
    pub fn new(window: Arc<Window>) -> (Self, FrameFeed) {
        let (frames, rx) = watch::channel(None);
        let presenter = Self {
            window,
            frames,
            timer: FrameTimer::new(Duration::from_secs(1)),
        };
        (presenter, FrameFeed { frames: rx })
    }
}

impl FramePresenter for WindowPresenter {
    fn present(&mut self, frame: u64, particles: &ParticleSet, color: Color) {
        self.frames.send_replace(Some(Arc::new(RenderFrame {
            index: frame,
            particles: particles.clone(),
            color,
        })));
        self.window.request_redraw();

        if let Some(stats) = self.timer.tick() {
            debug!(
                "{} frames, {:.2} ms/frame ({:.1} fps)",
                stats.frames,
                stats.mean_frametime.as_secs_f64() * 1000.0,
                stats.framerate()
            );
        }
    }
}

/// Counts what a frame would draw, for runs without a window.
#[derive(Default)]
struct DrawCounter {
    discs: usize,
    wedges: usize,
    outside: usize,
    extent: glam::Vec2,
}

impl DrawSurface for DrawCounter {
    fn size(&self) -> glam::Vec2 {
        self.extent
    }

    fn clear(&mut self, _color: Color) {
        self.discs = 0;
        self.wedges = 0;
        self.outside = 0;
    }

    fn fill_disc(&mut self, center: glam::Vec2, _radius: f32, _color: Color) {
        self.discs += 1;
        if center.cmplt(glam::Vec2::ZERO).any() || center.cmpgt(self.size()).any() {
            self.outside += 1;
        }
    }

    fn fill_wedge(&mut self, _: glam::Vec2, _: f32, _: f32, _: f32, _: Color) {
        self.wedges += 1;
    }
}

/// Renders into a counter and logs progress. Stops the loop after `limit` frames.
pub struct HeadlessPresenter {
    renderer: Renderer,
    surface: DrawCounter,
    timer: FrameTimer,
    limit: Option<u64>,
    shutdown: ShutdownHandle,
}

impl HeadlessPresenter {
    pub fn new(width: u32, height: u32, limit: Option<u64>, shutdown: ShutdownHandle) -> Self {
        Self {
            renderer: Renderer::default(),
            surface: DrawCounter {
                extent: glam::Vec2::new(width as f32, height as f32),
                ..Default::default()
            },
            timer: FrameTimer::new(Duration::from_secs(1)),
            limit,
            shutdown,
        }
    }
}

impl FramePresenter for HeadlessPresenter {
    fn present(&mut self, frame: u64, particles: &ParticleSet, color: Color) {
        self.renderer.draw_frame(&mut self.surface, particles, color);

        if let Some(stats) = self.timer.tick() {
            info!(
                "frame {frame}: {} balls drawn, {} outside the boundary, {:.1} fps",
                self.surface.discs,
                self.surface.outside,
                stats.framerate()
            );
        }

        if self.limit.is_some_and(|limit| frame + 1 >= limit) {
            self.shutdown.trigger();
        }
    }
}
