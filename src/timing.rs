use std::time::{Duration, Instant};

/// Monotonic time source. Injected so the per-second buffering and the
/// keep-alive cadence can be driven deterministically in tests.
pub trait Clock: Send {
    /// Time elapsed since the clock was created.
    fn now(&self) -> Duration;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Tracks elapsed wall-clock time against a repeating period.
///
/// Used in two places: the per-second column boundary of the timed sample
/// buffer, and the keep-alive heartbeat of the stream loops. Recording only
/// starts on the first explicit call so construction cost is not counted.
pub struct TimeRecorder {
    clock: Box<dyn Clock>,
    period: Duration,
    started_at: Option<Duration>,
    last_period_mark: Duration,
    last_asked: Duration,
}

pub const DEFAULT_KEEPALIVE_PERIOD_SEC: u64 = 5;

impl TimeRecorder {
    pub fn new(period: Duration) -> Self {
        Self::with_clock(Box::new(SystemClock::new()), period)
    }

    pub fn keepalive() -> Self {
        Self::new(Duration::from_secs(DEFAULT_KEEPALIVE_PERIOD_SEC))
    }

    pub fn with_clock(clock: Box<dyn Clock>, period: Duration) -> Self {
        Self {
            clock,
            period,
            started_at: None,
            last_period_mark: Duration::ZERO,
            last_asked: Duration::ZERO,
        }
    }

    pub fn start_if_not_started(&mut self) {
        if self.started_at.is_none() {
            let now = self.clock.now();
            self.started_at = Some(now);
            self.last_period_mark = now;
            self.last_asked = now;
        }
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    /// True once a full period has elapsed since the last mark; advances the
    /// mark so consecutive calls within the same period return false.
    pub fn has_period_passed(&mut self) -> bool {
        self.start_if_not_started();
        let now = self.clock.now();
        if now.saturating_sub(self.last_period_mark) >= self.period {
            self.last_period_mark = now;
            true
        } else {
            false
        }
    }

    /// Milliseconds elapsed since the previous call to this method.
    pub fn elapsed_ms_since_last_asked(&mut self) -> f64 {
        self.start_if_not_started();
        let now = self.clock.now();
        let delta = now.saturating_sub(self.last_asked);
        self.last_asked = now;
        delta.as_secs_f64() * 1000.0
    }

    pub fn elapsed(&self) -> Duration {
        match self.started_at {
            Some(start) => self.clock.now().saturating_sub(start),
            None => Duration::ZERO,
        }
    }

    /// Elapsed time formatted as H:MM:SS for keep-alive log lines.
    pub fn elapsed_str(&self) -> String {
        let total = self.elapsed().as_secs();
        format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
    }
}
