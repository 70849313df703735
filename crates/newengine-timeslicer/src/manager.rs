use crate::config::TimeSlicerConfig;
use crate::coroutine::CoroutineTimeslice;
use crate::error::{TimeSlicerError, TimeSlicerResult};
use crate::slicer::{SharedTimeSlicer, TimeSlicer, TimeSlicerStats};
use crate::timeslice::TimesliceRef;
use log::{info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// Per-frame driver that owns the host's scheduler.
///
/// The host calls [`update`](Self::update) once per frame with its clock readings; gameplay code
/// obtains [`CoroutineTimeslice`] handles from it.
pub struct TimesliceManager {
    slicer: SharedTimeSlicer,
    config: Mutex<TimeSlicerConfig>,
}

impl TimesliceManager {
    pub fn new(config: TimeSlicerConfig, time: f64, unscaled_time: f64) -> Self {
        let slicer = TimeSlicer::from_config(&config, time, unscaled_time);
        Self::with_slicer(config, slicer)
    }

    /// Wraps an already-built scheduler (custom clock, pre-registered work).
    pub fn with_slicer(config: TimeSlicerConfig, slicer: TimeSlicer) -> Self {
        Self {
            slicer: Arc::new(Mutex::new(slicer)),
            config: Mutex::new(config),
        }
    }

    #[inline]
    pub fn slicer(&self) -> &SharedTimeSlicer {
        &self.slicer
    }

    #[inline]
    pub fn config(&self) -> TimeSlicerConfig {
        self.config.lock().clone()
    }

    /// Takes effect on the next [`update`](Self::update).
    pub fn set_budget_ms(&self, budget_ms: f64) {
        self.config.lock().budget_ms = budget_ms;
    }

    /// One frame: apply the configured budget, run a pass, report overdue work.
    pub fn update(&self, time: f64, unscaled_time: f64) -> TimeSlicerResult<TimeSlicerStats> {
        let (budget, warn_on_overdue) = {
            let cfg = self.config.lock();
            (cfg.budget_secs(), cfg.warn_on_overdue)
        };

        let mut slicer = self.slicer.lock();
        slicer.set_max_execution_time(budget);
        let result = slicer.update(time, unscaled_time);
        let stats = slicer.stats();
        drop(slicer);

        if warn_on_overdue && stats.overdue_tick_count > 0 {
            warn!(
                "timeslicer had {} overdue task(s) this frame (budget {:.3} ms)",
                stats.overdue_tick_count,
                budget * 1000.0
            );
        }

        result.map(|()| stats)
    }

    #[inline]
    pub fn add(&self, slice: &TimesliceRef) {
        self.slicer.lock().add(slice);
    }

    #[inline]
    pub fn remove(&self, slice: &TimesliceRef) -> bool {
        self.slicer.lock().remove(slice)
    }

    #[inline]
    pub fn sweep_orphans(&self) -> usize {
        self.slicer.lock().sweep_orphans()
    }

    #[inline]
    pub fn stats(&self) -> TimeSlicerStats {
        self.slicer.lock().stats()
    }

    /// Handle starting from the configured initial estimate.
    pub fn create_coroutine_timeslice(&self, execution_order: i32) -> CoroutineTimeslice {
        let estimate = self.config.lock().initial_tick_estimate_sec;
        CoroutineTimeslice::new(&self.slicer, execution_order, estimate)
    }

    pub fn create_coroutine_timeslice_with_estimate(
        &self,
        execution_order: i32,
        initial_estimate: f64,
    ) -> CoroutineTimeslice {
        CoroutineTimeslice::new(&self.slicer, execution_order, initial_estimate)
    }
}

static GLOBAL: Mutex<Option<Arc<TimesliceManager>>> = parking_lot::const_mutex(None);

/// Installs the process-wide manager. Call once at startup, before the first frame.
pub fn init_global(
    config: TimeSlicerConfig,
    time: f64,
    unscaled_time: f64,
) -> TimeSlicerResult<Arc<TimesliceManager>> {
    let mut slot = GLOBAL.lock();
    if slot.is_some() {
        return Err(TimeSlicerError::AlreadyInitialized);
    }
    info!("timeslice manager up (budget {:.3} ms)", config.budget_ms);
    let manager = Arc::new(TimesliceManager::new(config, time, unscaled_time));
    *slot = Some(Arc::clone(&manager));
    Ok(manager)
}

/// The process-wide manager, if installed.
#[inline]
pub fn global() -> Option<Arc<TimesliceManager>> {
    GLOBAL.lock().clone()
}

/// Tears the process-wide manager down. Outstanding handles and wait tokens observe the
/// scheduler as dropped once the last `Arc` returned by [`init_global`]/[`global`] is released.
pub fn shutdown_global() -> Option<Arc<TimesliceManager>> {
    let taken = GLOBAL.lock().take();
    if taken.is_some() {
        info!("timeslice manager shut down");
    }
    taken
}
