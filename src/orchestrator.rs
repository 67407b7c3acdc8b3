//! The frame loop.
//!
//! Every frame walks the same stages in order:
//!
//! `Upload → Dispatch → CopyOut → MapWait → Read → Unmap → Swap → PresentWait`
//!
//! Only `MapWait` and `PresentWait` suspend. At most one frame is in flight:
//! a frame cannot start until the previous one reached `PresentWait`, and a
//! failed frame leaves the orchestrator refusing further frames.

use std::{future::Future, sync::Arc, time::Duration};

use log::{error, info, trace};
use tokio::sync::watch;

use crate::{
    backend::ComputeBackend,
    error::FrameError,
    particle::ParticleSet,
    render::{Color, ColorCycle},
};

pub const DEFAULT_MAP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStage {
    Upload,
    Dispatch,
    CopyOut,
    MapWait,
    Read,
    Unmap,
    Swap,
    PresentWait,
}

impl FrameStage {
    pub fn next(self) -> Self {
        match self {
            FrameStage::Upload => FrameStage::Dispatch,
            FrameStage::Dispatch => FrameStage::CopyOut,
            FrameStage::CopyOut => FrameStage::MapWait,
            FrameStage::MapWait => FrameStage::Read,
            FrameStage::Read => FrameStage::Unmap,
            FrameStage::Unmap => FrameStage::Swap,
            FrameStage::Swap => FrameStage::PresentWait,
            FrameStage::PresentWait => FrameStage::Upload,
        }
    }

    fn in_flight(self) -> bool {
        !matches!(self, FrameStage::Swap | FrameStage::PresentWait)
    }
}

/// "Suspend until the next display refresh".
pub trait DisplayRefresh: Send {
    fn next_refresh(&mut self) -> impl Future<Output = ()> + Send;
}

/// Receives every completed frame. Drawing happens wherever the presenter
/// sends it; the frame loop never waits on it.
pub trait FramePresenter: Send {
    fn present(&mut self, frame: u64, particles: &ParticleSet, color: Color);
}

/// Asks a running frame loop to stop at its next `PresentWait`.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested or every handle is dropped.
    pub async fn triggered(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub fn shutdown_channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx: Arc::new(tx) }, Shutdown { rx })
}

/// State carried from one iteration of the loop to the next.
#[derive(Debug)]
pub struct LoopState {
    pub particles: ParticleSet,
    pub color: ColorCycle,
    pub frame: u64,
}

impl LoopState {
    pub fn new(particles: ParticleSet, color: ColorCycle) -> Self {
        Self {
            particles,
            color,
            frame: 0,
        }
    }
}

pub struct FrameOrchestrator<B> {
    backend: B,
    stage: FrameStage,
    map_timeout: Duration,
}

impl<B: ComputeBackend> FrameOrchestrator<B> {
    pub fn new(backend: B, map_timeout: Duration) -> Self {
        Self {
            backend,
            stage: FrameStage::PresentWait,
            map_timeout,
        }
    }

    #[cfg(test)]
    pub fn stage(&self) -> FrameStage {
        self.stage
    }

    #[cfg(test)]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Runs `Upload` through `Swap`, replacing `particles` with the
    /// read-back result. On error `particles` is left as it was.
    pub async fn step(&mut self, particles: &mut ParticleSet) -> Result<(), FrameError> {
        if self.stage.in_flight() {
            return Err(FrameError::FrameInFlight(self.stage));
        }

        self.enter(FrameStage::Upload)?;
        self.backend.upload(particles)?;

        self.enter(FrameStage::Dispatch)?;
        self.backend.dispatch()?;

        self.enter(FrameStage::CopyOut)?;
        self.backend.copy_out()?;

        self.enter(FrameStage::MapWait)?;
        match tokio::time::timeout(self.map_timeout, self.backend.map_wait()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.backend.unmap();
                return Err(err);
            }
            Err(_) => {
                self.backend.unmap();
                return Err(FrameError::MapTimeout(self.map_timeout));
            }
        }

        self.enter(FrameStage::Read)?;
        let snapshot = self.backend.read();

        // Released whether or not the read succeeded.
        self.enter(FrameStage::Unmap)?;
        self.backend.unmap();
        let snapshot = snapshot?;

        self.enter(FrameStage::Swap)?;
        *particles = snapshot;
        Ok(())
    }

    /// Returns `false` when the loop should stop instead of starting another frame.
    pub async fn present_wait<R: DisplayRefresh>(
        &mut self,
        refresh: &mut R,
        shutdown: &mut Shutdown,
    ) -> Result<bool, FrameError> {
        self.enter(FrameStage::PresentWait)?;

        if shutdown.is_triggered() {
            return Ok(false);
        }

        let stopped = tokio::select! {
            biased;
            _ = shutdown.triggered() => true,
            _ = refresh.next_refresh() => false,
        };

        Ok(!stopped && !shutdown.is_triggered())
    }

    /// Runs frames until `shutdown` fires or a frame fails.
    pub async fn run<R, P>(
        mut self,
        mut state: LoopState,
        mut refresh: R,
        mut presenter: P,
        mut shutdown: Shutdown,
    ) -> Result<LoopState, FrameError>
    where
        R: DisplayRefresh,
        P: FramePresenter,
    {
        info!(
            "Frame loop started with {} particles on the {} backend",
            self.backend.particle_count(),
            self.backend.name()
        );

        loop {
            if let Err(err) = self.step(&mut state.particles).await {
                error!("Frame {} failed at {:?}: {err}", state.frame, self.stage);
                return Err(err);
            }

            presenter.present(state.frame, &state.particles, state.color.current());
            state.color.advance();
            state.frame += 1;

            if !self.present_wait(&mut refresh, &mut shutdown).await? {
                break;
            }
        }

        info!("Frame loop stopped after {} frames", state.frame);
        Ok(state)
    }

    fn enter(&mut self, stage: FrameStage) -> Result<(), FrameError> {
        let expected = self.stage.next();
        if stage != expected {
            return Err(FrameError::StageOrder {
                expected,
                found: stage,
            });
        }

        trace!("{:?} -> {:?}", self.stage, stage);
        self.stage = stage;
        Ok(())
    }
}
