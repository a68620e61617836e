// Liveness monitoring for the managed server process
// Hysteresis over "healthy" signals: PENDING -> HEALTHY -> DELAYED -> FATAL

pub mod timer;

use crate::config::HealthConfig;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use timer::ElapsedTimer;
use tokio::time::Instant;
use tracing::info;

/// Operator-facing liveness state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LivenessState {
    /// Never observed healthy in this session
    Pending,
    Healthy,
    /// Healthy signal overdue but below the fatal threshold
    Delayed,
    Fatal,
}

impl fmt::Display for LivenessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LivenessState::Pending => write!(f, "PENDING"),
            LivenessState::Healthy => write!(f, "HEALTHY"),
            LivenessState::Delayed => write!(f, "DELAYED"),
            LivenessState::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Point-in-time liveness report. `None` durations mean "never".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LivenessStatus {
    pub state: LivenessState,
    pub secs_since_last_healthy: Option<u64>,
    pub secs_since_first_healthy: Option<u64>,
}

#[derive(Debug, Default)]
struct LivenessInner {
    last_healthy: ElapsedTimer,
    first_healthy_at: Option<Instant>,
}

/// Liveness monitor.
///
/// The state is never stored: every read recomputes it from the seconds
/// since the last healthy signal, so no background ticking is needed to
/// keep it current.
#[derive(Debug)]
pub struct LivenessMonitor {
    delay_threshold_secs: u64,
    fatal_threshold_secs: u64,
    inner: RwLock<LivenessInner>,
}

impl LivenessMonitor {
    pub fn new(delay_threshold_secs: u64, fatal_threshold_secs: u64) -> Self {
        Self {
            delay_threshold_secs,
            fatal_threshold_secs,
            inner: RwLock::new(LivenessInner::default()),
        }
    }

    pub fn from_config(config: &HealthConfig) -> Self {
        Self::new(config.delay_threshold_secs, config.fatal_threshold_secs)
    }

    /// Record a healthy signal from the managed process
    pub fn mark_healthy(&self) {
        let mut inner = self.inner.write();
        inner.last_healthy.restart();

        if inner.first_healthy_at.is_none() {
            inner.first_healthy_at = Some(Instant::now());
            info!("First healthy signal received");
        }
    }

    /// Forget the current session (process restarted)
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.last_healthy.reset();
        inner.first_healthy_at = None;
    }

    pub fn status(&self) -> LivenessStatus {
        let inner = self.inner.read();
        let since_last = inner.last_healthy.elapsed();

        LivenessStatus {
            state: self.classify(since_last),
            secs_since_last_healthy: since_last,
            secs_since_first_healthy: inner.first_healthy_at.map(|at| at.elapsed().as_secs()),
        }
    }

    pub fn state(&self) -> LivenessState {
        self.status().state
    }

    fn classify(&self, since_last: Option<u64>) -> LivenessState {
        match since_last {
            None => LivenessState::Pending,
            Some(secs) if secs >= self.fatal_threshold_secs => LivenessState::Fatal,
            Some(secs) if secs >= self.delay_threshold_secs => LivenessState::Delayed,
            Some(_) => LivenessState::Healthy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_starts_pending() {
        let monitor = LivenessMonitor::new(10, 60);
        let status = monitor.status();

        assert_eq!(status.state, LivenessState::Pending);
        assert_eq!(status.secs_since_last_healthy, None);
        assert_eq!(status.secs_since_first_healthy, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hysteresis_for_threshold_pairs() {
        for (delay, fatal) in [(1, 2), (5, 30), (10, 180), (59, 60)] {
            let monitor = LivenessMonitor::new(delay, fatal);
            monitor.mark_healthy();
            assert_eq!(monitor.state(), LivenessState::Healthy);

            tokio::time::advance(Duration::from_secs(delay)).await;
            assert_eq!(monitor.state(), LivenessState::Delayed, "delay={delay}");

            tokio::time::advance(Duration::from_secs(fatal - delay)).await;
            assert_eq!(monitor.state(), LivenessState::Fatal, "fatal={fatal}");

            // A fresh signal always recovers
            monitor.mark_healthy();
            assert_eq!(monitor.state(), LivenessState::Healthy);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_just_below_delay_is_healthy() {
        let monitor = LivenessMonitor::new(10, 60);
        monitor.mark_healthy();
        tokio::time::advance(Duration::from_millis(9_999)).await;
        assert_eq!(monitor.state(), LivenessState::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_healthy_recorded_once() {
        let monitor = LivenessMonitor::new(10, 60);
        monitor.mark_healthy();
        tokio::time::advance(Duration::from_secs(7)).await;
        monitor.mark_healthy();
        tokio::time::advance(Duration::from_secs(3)).await;

        let status = monitor.status();
        assert_eq!(status.secs_since_first_healthy, Some(10));
        assert_eq!(status.secs_since_last_healthy, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_returns_to_pending() {
        let monitor = LivenessMonitor::new(10, 60);
        monitor.mark_healthy();
        monitor.reset();

        let status = monitor.status();
        assert_eq!(status.state, LivenessState::Pending);
        assert_eq!(status.secs_since_first_healthy, None);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LivenessState::Delayed.to_string(), "DELAYED");
        assert_eq!(
            serde_json::to_string(&LivenessState::Healthy).unwrap(),
            "\"HEALTHY\""
        );
    }
}
