use crate::clock::{PassClock, Stopwatch, SystemClock};
use crate::error::{TimeSlicerError, TimeSlicerResult};
use crate::slicer::{SharedTimeSlicer, TimeSlicer};
use crate::timeslice::{delegate_state, Timeslice, TimesliceRef, TimesliceState};
use log::{debug, trace};
use parking_lot::Mutex;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

const PENDING: u8 = 0;
const READY: u8 = 1;
const CANCELLED: u8 = 2;

/// Single-resolution signal: moves out of `PENDING` exactly once, to ready or cancelled.
#[derive(Default)]
struct WaitSignal {
    state: AtomicU8,
    waker: Mutex<Option<Waker>>,
}

impl WaitSignal {
    fn settle(&self, to: u8) -> bool {
        let won = self
            .state
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            let waker = self.waker.lock().take();
            if let Some(w) = waker {
                w.wake();
            }
        }
        won
    }

    #[inline]
    fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }
}

/// Suspension point handed out by [`CoroutineTimeslice::end_and_wait`].
///
/// Poll it with [`is_waiting`](Self::is_waiting) from a frame loop, or `.await` it. It resolves
/// once, when the scheduler ticks the owning timeslice.
#[must_use = "a wait token does nothing unless polled"]
pub struct WaitToken {
    signal: Arc<WaitSignal>,
    slicer: Weak<Mutex<TimeSlicer>>,
}

impl WaitToken {
    /// `true` until the timeslice has been ticked (or the wait was cancelled or orphaned).
    #[inline]
    pub fn is_waiting(&self) -> bool {
        self.outcome().is_none()
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.signal.state() == READY
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.signal.state() == CANCELLED
    }

    /// Settles the wait as cancelled. A later tick of the timeslice becomes a no-op for this token.
    /// Returns `false` if the wait had already resolved.
    #[inline]
    pub fn cancel(&self) -> bool {
        self.signal.settle(CANCELLED)
    }

    fn outcome(&self) -> Option<TimeSlicerResult<()>> {
        match self.signal.state() {
            READY => Some(Ok(())),
            CANCELLED => Some(Err(TimeSlicerError::WaitCancelled)),
            _ if self.slicer.strong_count() == 0 => Some(Err(TimeSlicerError::SchedulerDropped)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for WaitToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.signal.state() {
            READY => "ready",
            CANCELLED => "cancelled",
            _ => "pending",
        };
        f.debug_struct("WaitToken").field("state", &state).finish()
    }
}

impl Future for WaitToken {
    type Output = TimeSlicerResult<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(out) = self.outcome() {
            return Poll::Ready(out);
        }
        *self.signal.waker.lock() = Some(cx.waker().clone());
        // Resolution may have raced the waker registration.
        match self.outcome() {
            Some(out) => Poll::Ready(out),
            None => Poll::Pending,
        }
    }
}

/// The schedulable half of a coroutine timeslice. Its tick only resolves the pending wait.
struct CoroutineSlice {
    state: TimesliceState,
    signal: Option<Arc<WaitSignal>>,
    orphaned: bool,
}

impl Timeslice for CoroutineSlice {
    delegate_state!(state);

    fn is_orphaned(&self) -> bool {
        self.orphaned
    }

    fn tick(&mut self, _dt: f64, _unscaled_dt: f64) -> anyhow::Result<()> {
        if let Some(signal) = self.signal.take() {
            signal.settle(READY);
        }
        Ok(())
    }
}

/// Measures a block of caller work and reschedules the caller through a [`TimeSlicer`].
///
/// ```ignore
/// let mut slice = CoroutineTimeslice::new(&slicer, order, 0.02);
/// {
///     let _scope = slice.begin();
///     expensive_step();
/// }
/// let token = slice.end_and_wait(0.5, 1.0, true);
/// // resume once `!token.is_waiting()`
/// ```
///
/// The handle owns its registration: [`dispose`](Self::dispose), or dropping the handle,
/// removes it from the scheduler. Only a weak reference to the scheduler is kept.
pub struct CoroutineTimeslice {
    inner: Arc<Mutex<CoroutineSlice>>,
    slicer: Weak<Mutex<TimeSlicer>>,
    clock: Box<dyn PassClock>,
    measuring: Option<Stopwatch>,
    last_end: Option<Duration>,
    last_wait_time: Option<f64>,
    disposed: bool,
}

impl std::fmt::Debug for CoroutineTimeslice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoroutineTimeslice")
            .field("state", &self.inner.lock().state)
            .field("measuring", &self.measuring.is_some())
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl CoroutineTimeslice {
    pub fn new(slicer: &SharedTimeSlicer, execution_order: i32, initial_estimate: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CoroutineSlice {
                state: TimesliceState::new(execution_order).with_estimate(initial_estimate),
                signal: None,
                orphaned: false,
            })),
            slicer: Arc::downgrade(slicer),
            clock: Box::new(SystemClock::new()),
            measuring: None,
            last_end: None,
            last_wait_time: None,
            disposed: false,
        }
    }

    /// Replaces the wall clock used by [`begin`](Self::begin)/[`end`](Self::end).
    pub fn with_clock(mut self, clock: impl PassClock + 'static) -> Self {
        self.clock = Box::new(clock);
        self.measuring = None;
        self.last_end = None;
        self
    }

    /// Starts measuring, closing any measurement already running. The scope ends it on drop.
    pub fn begin(&mut self) -> MeasureScope<'_> {
        self.end();
        self.measuring = Some(Stopwatch::start(self.clock.as_ref()));
        MeasureScope { handle: self }
    }

    /// Stops measuring and folds the sample into the tick estimate. No-op when idle.
    pub fn end(&mut self) {
        let Some(sw) = self.measuring.take() else {
            return;
        };
        let sample = sw.elapsed_secs(self.clock.as_ref());
        self.inner.lock().state.blend_estimate(sample);
        self.last_end = Some(self.clock.now());
    }

    /// Ends the measurement and schedules this handle to resume between `min_delay` and
    /// `max_delay` seconds from now, on the unscaled clock if `use_unscaled_time`.
    pub fn end_and_wait(
        &mut self,
        min_delay: f64,
        max_delay: f64,
        use_unscaled_time: bool,
    ) -> WaitToken {
        self.end();

        let signal = Arc::new(WaitSignal::default());
        {
            let mut inner = self.inner.lock();
            inner.state.set_window(min_delay, max_delay, use_unscaled_time);
            inner.orphaned = false;
            if let Some(previous) = inner.signal.replace(Arc::clone(&signal)) {
                previous.settle(CANCELLED);
            }
        }

        match self.slicer.upgrade() {
            Some(slicer) => {
                let mut slicer = slicer.lock();
                slicer.add(&self.as_timeslice());
                self.last_wait_time = Some(slicer.current_time());
                self.disposed = false;
            }
            None => trace!("end_and_wait on a handle whose timeslicer is gone"),
        }

        WaitToken {
            signal,
            slicer: Weak::clone(&self.slicer),
        }
    }

    /// Unregisters from the scheduler and cancels any pending wait.
    pub fn dispose(&mut self) {
        self.release(true);
    }

    #[inline]
    pub fn tick_duration_estimate(&self) -> f64 {
        self.inner.lock().state.tick_duration_estimate
    }

    /// Overrides the running estimate, e.g. to seed it from a previous session.
    #[inline]
    pub fn set_tick_duration_estimate(&self, secs: f64) {
        let mut inner = self.inner.lock();
        inner.state = inner.state.with_estimate(secs);
    }

    #[inline]
    pub fn last_tick_duration(&self) -> f64 {
        self.inner.lock().state.last_tick_duration
    }

    #[inline]
    pub fn execution_order(&self) -> i32 {
        self.inner.lock().state.execution_order
    }

    #[inline]
    pub fn is_measuring(&self) -> bool {
        self.measuring.is_some()
    }

    /// Wall time since the last completed measurement, read from the handle's [`PassClock`].
    ///
    /// This is real elapsed time. For game time since the last wait, see
    /// [`delta_time`](Self::delta_time).
    pub fn since_last_end(&self) -> Option<Duration> {
        self.last_end
            .map(|at| self.clock.now().saturating_sub(at))
    }

    /// Scaled time elapsed since the last [`end_and_wait`](Self::end_and_wait), measured on the
    /// scheduler's host clock. `None` before the first wait or once the scheduler is gone.
    ///
    /// Locks the scheduler, so do not call it from inside one of its tick callbacks.
    pub fn delta_time(&self) -> Option<f64> {
        let since = self.last_wait_time?;
        let slicer = self.slicer.upgrade()?;
        let now = slicer.lock().current_time();
        Some(now - since)
    }

    pub fn is_registered(&self) -> bool {
        self.slicer
            .upgrade()
            .is_some_and(|s| s.lock().contains(&self.as_timeslice()))
    }

    #[inline]
    fn as_timeslice(&self) -> TimesliceRef {
        self.inner.clone()
    }

    /// `blocking == false` is the drop path: it must not wait on a scheduler that may be
    /// mid-pass on this thread. Whatever it cannot remove is marked orphaned for `sweep_orphans`.
    fn release(&mut self, blocking: bool) {
        if self.disposed {
            return;
        }
        self.end();

        if let Some(signal) = self.inner.lock().signal.take() {
            signal.settle(CANCELLED);
        }

        let Some(slicer) = self.slicer.upgrade() else {
            self.disposed = true;
            return;
        };

        let guard = if blocking {
            Some(slicer.lock())
        } else {
            slicer.try_lock()
        };
        match guard {
            Some(mut s) => {
                s.remove(&self.as_timeslice());
            }
            None => {
                self.inner.lock().orphaned = true;
                debug!("timeslicer busy while dropping a coroutine timeslice; left for sweep");
            }
        }
        self.disposed = true;
    }
}

impl Drop for CoroutineTimeslice {
    fn drop(&mut self) {
        self.release(false);
    }
}

/// Measurement scope returned by [`CoroutineTimeslice::begin`]; ends the measurement on drop.
pub struct MeasureScope<'a> {
    handle: &'a mut CoroutineTimeslice,
}

impl Deref for MeasureScope<'_> {
    type Target = CoroutineTimeslice;

    fn deref(&self) -> &CoroutineTimeslice {
        &*self.handle
    }
}

impl DerefMut for MeasureScope<'_> {
    fn deref_mut(&mut self) -> &mut CoroutineTimeslice {
        &mut *self.handle
    }
}

impl Drop for MeasureScope<'_> {
    fn drop(&mut self) {
        self.handle.end();
    }
}
