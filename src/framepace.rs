use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::Notify;

use crate::orchestrator::DisplayRefresh;

/// Refresh signal driven by the window: the render thread calls
/// [`RedrawSignal::presented`] after every present, and the frame loop waits on it.
#[derive(Clone, Default)]
pub struct RedrawSignal {
    notify: Arc<Notify>,
}

impl RedrawSignal {
    pub fn presented(&self) {
        // Stores a permit if the loop is not waiting yet, so no refresh is lost.
        self.notify.notify_one();
    }
}

impl DisplayRefresh for RedrawSignal {
    fn next_refresh(&mut self) -> impl Future<Output = ()> + Send {
        let notify = self.notify.clone();
        async move { notify.notified().await }
    }
}

/// Interval between refreshes at `refresh_hz`, or `None` when the rate has no
/// representable non-zero period.
pub fn refresh_period(refresh_hz: u32) -> Option<Duration> {
    Duration::from_secs(1)
        .checked_div(refresh_hz)
        .filter(|period| !period.is_zero())
}

/// Timer-driven refresh for runs without a display.
pub struct FixedRefresh {
    interval: tokio::time::Interval,
}

impl FixedRefresh {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        Self { interval }
    }
}

impl DisplayRefresh for FixedRefresh {
    fn next_refresh(&mut self) -> impl Future<Output = ()> + Send {
        async move {
            self.interval.tick().await;
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FrameStats {
    pub frames: u32,
    pub mean_frametime: Duration,
}

impl FrameStats {
    pub fn framerate(&self) -> f32 {
        1.0 / self.mean_frametime.as_secs_f32().max(f32::EPSILON)
    }
}

/// Accumulates frame times and reports them once per `window`.
pub struct FrameTimer {
    window: Duration,
    window_start: Instant,
    frames: u32,
}

impl FrameTimer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            window_start: Instant::now(),
            frames: 0,
        }
    }

    pub fn tick(&mut self) -> Option<FrameStats> {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> Option<FrameStats> {
        self.frames += 1;

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }

        let stats = FrameStats {
            frames: self.frames,
            mean_frametime: elapsed / self.frames,
        };
        self.window_start = now;
        self.frames = 0;

        Some(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_reports_once_per_window() {
        let mut timer = FrameTimer::new(Duration::from_secs(1));
        let start = timer.window_start;

        for i in 1..60 {
            assert!(timer.tick_at(start + Duration::from_millis(i * 16)).is_none());
        }

        let stats = timer.tick_at(start + Duration::from_millis(1200)).unwrap();
        assert_eq!(stats.frames, 60);
        assert_eq!(stats.mean_frametime, Duration::from_millis(20));
        assert!((stats.framerate() - 50.0).abs() < 0.01);

        assert!(timer.tick_at(start + Duration::from_millis(1216)).is_none());
    }

    #[tokio::test]
    async fn redraw_signal_keeps_early_permit() {
        let mut signal = RedrawSignal::default();
        signal.presented();

        tokio::time::timeout(Duration::from_secs(1), signal.next_refresh())
            .await
            .expect("permit stored before waiting should resolve immediately");
    }

    #[tokio::test]
    async fn fixed_refresh_paces_frames() {
        let mut refresh = FixedRefresh::new(refresh_period(100).unwrap());
        let start = Instant::now();
        for _ in 0..4 {
            refresh.next_refresh().await;
        }

        // First tick is immediate, the remaining three are 10ms apart.
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn refresh_period_bounds() {
        assert_eq!(refresh_period(1), Some(Duration::from_secs(1)));
        assert_eq!(refresh_period(60), Some(Duration::from_nanos(16_666_666)));
        assert_eq!(refresh_period(1_000_000_000), Some(Duration::from_nanos(1)));

        assert_eq!(refresh_period(0), None);
        assert_eq!(refresh_period(1_000_000_001), None);
        assert_eq!(refresh_period(4_000_000_000), None);
    }
}
