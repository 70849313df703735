use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Capability set of anything the [`TimeSlicer`](crate::TimeSlicer) can schedule.
///
/// `added_at` is written by the scheduler on every registration and `last_tick_duration` after
/// every tick. Everything else is read-only from the scheduler's point of view.
pub trait Timeslice: Send {
    fn added_at(&self) -> f64;
    fn set_added_at(&mut self, at: f64);

    fn last_tick_duration(&self) -> f64;
    fn set_last_tick_duration(&mut self, secs: f64);

    /// Earliest time (in this item's clock domain) the item may run.
    fn min_next_tick_at(&self) -> f64;

    /// Deadline: once reached the item runs regardless of budget.
    fn max_next_tick_at(&self) -> f64;

    fn tick_duration_estimate(&self) -> f64;

    /// Lower runs earlier within a pass.
    fn execution_order(&self) -> i32;

    fn uses_unscaled_time(&self) -> bool;

    /// Invoked exactly once per admission with the pass deltas of both clocks.
    fn tick(&mut self, dt: f64, unscaled_dt: f64) -> anyhow::Result<()>;

    /// Set when the owner is gone but could not unregister; [`sweep_orphans`] drops these.
    ///
    /// [`sweep_orphans`]: crate::TimeSlicer::sweep_orphans
    fn is_orphaned(&self) -> bool {
        false
    }
}

/// Shared handle the scheduler queues hold.
pub type TimesliceRef = Arc<Mutex<dyn Timeslice>>;

/// Wraps a concrete timeslice into a [`TimesliceRef`].
#[inline]
pub fn shared<T: Timeslice + 'static>(slice: T) -> TimesliceRef {
    Arc::new(Mutex::new(slice))
}

/// Identity comparison: two refs are the same item iff they point at the same allocation.
#[inline]
pub fn same_slice(a: &TimesliceRef, b: &TimesliceRef) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Plain timing/priority record backing a timeslice.
///
/// Delays are relative to `added_at`; both are clamped so `min_delay <= max_delay` and neither is
/// negative, which keeps `min_next_tick_at() <= max_next_tick_at()` for any input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimesliceState {
    pub added_at: f64,
    min_delay: f64,
    max_delay: f64,
    pub tick_duration_estimate: f64,
    pub last_tick_duration: f64,
    pub execution_order: i32,
    pub uses_unscaled_time: bool,
}

impl Default for TimesliceState {
    fn default() -> Self {
        Self::new(0)
    }
}

impl TimesliceState {
    /// Weight of the previous estimate in [`Self::blend_estimate`].
    pub const ESTIMATE_HISTORY_WEIGHT: f64 = 3.0;

    #[inline]
    pub fn new(execution_order: i32) -> Self {
        Self {
            added_at: 0.0,
            min_delay: 0.0,
            max_delay: 0.0,
            tick_duration_estimate: 0.0,
            last_tick_duration: 0.0,
            execution_order,
            uses_unscaled_time: false,
        }
    }

    #[inline]
    pub fn with_estimate(mut self, secs: f64) -> Self {
        self.tick_duration_estimate = sanitize(secs);
        self
    }

    #[inline]
    pub fn with_window(mut self, min_delay: f64, max_delay: f64, unscaled: bool) -> Self {
        self.set_window(min_delay, max_delay, unscaled);
        self
    }

    pub fn set_window(&mut self, min_delay: f64, max_delay: f64, unscaled: bool) {
        let min_delay = sanitize(min_delay);
        self.min_delay = min_delay;
        self.max_delay = sanitize(max_delay).max(min_delay);
        self.uses_unscaled_time = unscaled;
    }

    #[inline]
    pub fn min_delay(&self) -> f64 {
        self.min_delay
    }

    #[inline]
    pub fn max_delay(&self) -> f64 {
        self.max_delay
    }

    #[inline]
    pub fn min_next_tick_at(&self) -> f64 {
        self.added_at + self.min_delay
    }

    #[inline]
    pub fn max_next_tick_at(&self) -> f64 {
        self.added_at + self.max_delay
    }

    /// `(3 * old + sample) / 4`: the newest measurement gets a quarter of the weight.
    pub fn blend_estimate(&mut self, sample_secs: f64) {
        let w = Self::ESTIMATE_HISTORY_WEIGHT;
        self.tick_duration_estimate =
            (self.tick_duration_estimate * w + sanitize(sample_secs)) / (w + 1.0);
    }
}

#[inline]
fn sanitize(secs: f64) -> f64 {
    if secs.is_finite() {
        secs.max(0.0)
    } else {
        0.0
    }
}

/// Implements every [`Timeslice`] accessor by delegating to a `TimesliceState` field.
macro_rules! delegate_state {
    ($field:ident) => {
        #[inline]
        fn added_at(&self) -> f64 {
            self.$field.added_at
        }

        #[inline]
        fn set_added_at(&mut self, at: f64) {
            self.$field.added_at = at;
        }

        #[inline]
        fn last_tick_duration(&self) -> f64 {
            self.$field.last_tick_duration
        }

        #[inline]
        fn set_last_tick_duration(&mut self, secs: f64) {
            self.$field.last_tick_duration = secs;
        }

        #[inline]
        fn min_next_tick_at(&self) -> f64 {
            self.$field.min_next_tick_at()
        }

        #[inline]
        fn max_next_tick_at(&self) -> f64 {
            self.$field.max_next_tick_at()
        }

        #[inline]
        fn tick_duration_estimate(&self) -> f64 {
            self.$field.tick_duration_estimate
        }

        #[inline]
        fn execution_order(&self) -> i32 {
            self.$field.execution_order
        }

        #[inline]
        fn uses_unscaled_time(&self) -> bool {
            self.$field.uses_unscaled_time
        }
    };
}

pub(crate) use delegate_state;

type TickFn = Box<dyn FnMut(f64, f64) -> anyhow::Result<()> + Send>;

/// A closure scheduled as a timeslice.
pub struct FnTimeslice {
    pub state: TimesliceState,
    tick: TickFn,
}

impl FnTimeslice {
    pub fn new<F>(state: TimesliceState, tick: F) -> Self
    where
        F: FnMut(f64, f64) -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            state,
            tick: Box::new(tick),
        }
    }
}

impl fmt::Debug for FnTimeslice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTimeslice")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Timeslice for FnTimeslice {
    delegate_state!(state);

    fn tick(&mut self, dt: f64, unscaled_dt: f64) -> anyhow::Result<()> {
        (self.tick)(dt, unscaled_dt)
    }
}
