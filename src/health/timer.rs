// Restartable stopwatch with whole-second resolution
// Uses the tokio clock so paused-time tests can drive it

use tokio::time::Instant;

/// Stopwatch reporting floor-rounded elapsed seconds.
///
/// An unstarted timer has no elapsed value; callers treat `None` as an
/// infinitely long time.
#[derive(Debug, Clone)]
pub struct ElapsedTimer {
    started_at: Option<Instant>,
    auto_start: bool,
}

impl ElapsedTimer {
    /// Create a timer. With `auto_start` it starts immediately and `reset`
    /// restarts it instead of clearing it.
    pub fn new(auto_start: bool) -> Self {
        Self {
            started_at: auto_start.then(Instant::now),
            auto_start,
        }
    }

    pub fn restart(&mut self) {
        self.started_at = Some(Instant::now());
    }

    pub fn reset(&mut self) {
        if self.auto_start {
            self.restart();
        } else {
            self.started_at = None;
        }
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    /// Whole seconds since the last start, `None` if never started
    pub fn elapsed(&self) -> Option<u64> {
        // Instant::elapsed saturates at zero, as_secs floors
        self.started_at.map(|start| start.elapsed().as_secs())
    }

    /// True once at least `threshold_secs` have passed; false if unstarted
    pub fn is_over(&self, threshold_secs: u64) -> bool {
        matches!(self.elapsed(), Some(secs) if secs >= threshold_secs)
    }
}

impl Default for ElapsedTimer {
    fn default() -> Self {
        Self::new(false)
    }
}
