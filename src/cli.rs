use std::{num::NonZeroU32, time::Duration};

use clap::Parser;

use crate::{
    error::ConfigError,
    framepace::refresh_period,
    orchestrator::DEFAULT_MAP_TIMEOUT,
    particle::{Boundary, PARTICLE_COUNT},
    render::{Color, ColorCycle},
};

/// Balls bouncing inside a window, integrated on the GPU
#[derive(Parser, Debug)]
#[command(version)]
pub struct Args {
    /// Number of balls
    #[arg(short, long, default_value_t = PARTICLE_COUNT)]
    pub particles: u32,

    /// Seed for the initial positions and velocities
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Starting color as `#RRGGBB`; green and blue cycle from here
    #[arg(short, long, default_value = "#ff0000")]
    pub color: String,

    /// Run without a window, paced by a timer
    #[arg(long)]
    pub headless: bool,

    /// Stop after this many frames (headless only)
    #[arg(long, requires = "headless")]
    pub frames: Option<u64>,

    /// Boundary width for headless runs
    #[arg(long, default_value_t = 800)]
    pub width: u32,

    /// Boundary height for headless runs
    #[arg(long, default_value_t = 600)]
    pub height: u32,

    /// Refresh rate for headless runs
    #[arg(long, default_value_t = 60)]
    pub refresh_hz: u32,

    /// Integrate on the CPU instead of the GPU
    #[arg(long)]
    pub cpu: bool,

    /// How long to wait for the read-back buffer before giving up
    #[arg(long, default_value_t = DEFAULT_MAP_TIMEOUT.as_millis() as u64)]
    pub map_timeout_ms: u64,
}

/// Validated settings for one session.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    pub particles: NonZeroU32,
    pub seed: Option<u64>,
    pub color: Color,
    pub headless: bool,
    pub frames: Option<u64>,
    pub width: u32,
    pub height: u32,
    pub boundary: Boundary,
    pub refresh_period: Duration,
    pub force_cpu: bool,
    pub map_timeout: Duration,
}

impl SimulationConfig {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let particles = NonZeroU32::new(args.particles).ok_or(ConfigError::ZeroParticles)?;
        let color = args.color.parse()?;

        let boundary = Boundary::from_size(args.width, args.height)?;
        let period = refresh_period(args.refresh_hz)
            .ok_or(ConfigError::InvalidRefreshRate(args.refresh_hz))?;
        if args.map_timeout_ms == 0 {
            return Err(ConfigError::ZeroMapTimeout);
        }

        Ok(Self {
            particles,
            seed: args.seed,
            color,
            headless: args.headless,
            frames: args.frames,
            width: args.width,
            height: args.height,
            boundary,
            refresh_period: period,
            force_cpu: args.cpu,
            map_timeout: Duration::from_millis(args.map_timeout_ms),
        })
    }

    pub fn color_cycle(&self) -> ColorCycle {
        ColorCycle::new(self.color)
    }
}
