use std::time::Duration;

use crate::{binding::StagingState, orchestrator::FrameStage};

/// Failures while acquiring the accelerator. Fatal, the frame loop never starts.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("no compute-capable adapter available")]
    NoAdapter,
    #[error("adapter `{0}` does not support compute shaders")]
    NoCompute(String),
    #[error("device request failed: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("failed to create window surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),
    #[error("window surface is not supported by the adapter")]
    UnsupportedSurface,
}

/// Failures inside one frame. Every variant ends the frame loop.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("staging buffer was not mapped within {0:?}")]
    MapTimeout(Duration),
    #[error("mapping the staging buffer failed: {0}")]
    MapFailed(#[from] wgpu::BufferAsyncError),
    #[error("device lost while waiting for the staging buffer")]
    DeviceLost,
    #[error("staging buffer is {state:?}, expected {expected:?}")]
    StagingBusy {
        state: StagingState,
        expected: StagingState,
    },
    #[error("frame stage {found:?} entered out of order, expected {expected:?}")]
    StageOrder {
        expected: FrameStage,
        found: FrameStage,
    },
    #[error("previous frame is still in flight at {0:?}")]
    FrameInFlight(FrameStage),
    #[error("particle set holds {found} particles but the buffers are sized for {expected}")]
    ParticleCountMismatch { expected: usize, found: usize },
    #[error("read back {0} bytes, which is not a whole number of particles")]
    MalformedReadback(usize),
}

/// Rejected configuration values. Nothing is clamped.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid color `{0}`, expected `#RRGGBB`")]
    InvalidColor(String),
    #[error("particle count must be at least 1")]
    ZeroParticles,
    #[error("boundary {width}x{height} out of range, both sides must be in 1..=2147483647")]
    InvalidBoundary { width: u32, height: u32 },
    #[error("refresh rate {0} Hz out of range, expected 1..=1000000000")]
    InvalidRefreshRate(u32),
    #[error("map timeout must be at least 1 ms")]
    ZeroMapTimeout,
}
