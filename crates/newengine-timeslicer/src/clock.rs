use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic wall clock the scheduler measures its own pass and each tick with.
///
/// Budget decisions compare this clock against `max_execution_time`, so hosts that need
/// reproducible admission (replays, tests) swap in a [`ManualClock`].
pub trait PassClock: Send {
    /// Time since an arbitrary fixed origin. Must never go backwards.
    fn now(&self) -> Duration;
}

/// `Instant`-backed clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    #[inline]
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

impl PassClock for SystemClock {
    #[inline]
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to.
///
/// Clones share the same reading, so a test can keep one clone and hand the other to the
/// scheduler, or advance it from inside a tick callback to simulate an expensive item.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(by, Ordering::Relaxed);
    }

    #[inline]
    pub fn advance_secs(&self, secs: f64) {
        self.advance(Duration::from_secs_f64(secs.max(0.0)));
    }
}

impl PassClock for ManualClock {
    #[inline]
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }
}

/// Start/stop measurement on top of a [`PassClock`] reading.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Stopwatch {
    started: Duration,
}

impl Stopwatch {
    #[inline]
    pub(crate) fn start(clock: &dyn PassClock) -> Self {
        Self {
            started: clock.now(),
        }
    }

    #[inline]
    pub(crate) fn elapsed(&self, clock: &dyn PassClock) -> Duration {
        clock.now().saturating_sub(self.started)
    }

    #[inline]
    pub(crate) fn elapsed_secs(&self, clock: &dyn PassClock) -> f64 {
        self.elapsed(clock).as_secs_f64()
    }
}
