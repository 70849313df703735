use crate::clock::{PassClock, Stopwatch, SystemClock};
use crate::config::TimeSlicerConfig;
use crate::error::{TickFailure, TimeSlicerError, TimeSlicerResult};
use crate::invariants::require;
use crate::list::PreallocList;
use crate::timeslice::{same_slice, TimesliceRef};
use anyhow::anyhow;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Scheduler shared between the host driver and the handles that register with it.
pub type SharedTimeSlicer = Arc<Mutex<TimeSlicer>>;

/// Weight of the newest pass when `smooth_average_update` is on.
const AVERAGE_BLEND: f64 = 0.1;

/// A registered item plus the scheduling keys sampled when it was added.
///
/// Keys are frozen at registration: a queue is sorted once on insert, so re-reading a deadline
/// that moved under it would not reorder anything anyway.
struct Scheduled {
    slice: TimesliceRef,
    ready_at: f64,
    deadline: f64,
    order: i32,
    unscaled: bool,
}

impl Scheduled {
    #[inline]
    fn estimate(&self) -> f64 {
        let e = self.slice.lock().tick_duration_estimate();
        if e.is_finite() {
            e.max(0.0)
        } else {
            0.0
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string payload"
    }
}

#[inline]
fn by_deadline(a: &Scheduled, b: &Scheduled) -> Ordering {
    a.deadline.total_cmp(&b.deadline)
}

/// Items admitted for one execution order during the current pass.
struct Bucket {
    order: i32,
    items: PreallocList<Scheduled>,
}

/// Snapshot of the scheduler's clocks and counters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimeSlicerStats {
    pub current_time: f64,
    pub current_unscaled_time: f64,
    pub max_execution_time: f64,
    /// Items admitted under budget by the last pass.
    pub scheduled_tick_count: u32,
    /// Items force-run past their deadline by the last pass.
    pub overdue_tick_count: u32,
    /// Wall-clock seconds the last pass took.
    pub last_update_duration: f64,
    pub average_update_duration: Option<f64>,
    pub registered: usize,
    pub passes: u64,
    pub total_scheduled_ticks: u64,
    pub total_overdue_ticks: u64,
}

/// Frame-budgeted timeslice scheduler.
///
/// Each [`update`](Self::update) is one synchronous pass: overdue items always run, then ready
/// items are admitted by ascending deadline while the wall-clock budget allows, and the admitted
/// set is ticked grouped by ascending execution order. Scaled and unscaled items live in
/// separate queues and only ever look at their own clock.
///
/// Tick callbacks must not call back into the scheduler that is ticking them.
pub struct TimeSlicer {
    current_time: f64,
    current_unscaled_time: f64,
    max_execution_time: f64,
    smooth_average: bool,

    delayed: PreallocList<Scheduled>,
    active_scaled: PreallocList<Scheduled>,
    active_unscaled: PreallocList<Scheduled>,
    incoming_scaled: PreallocList<Scheduled>,
    incoming_unscaled: PreallocList<Scheduled>,
    buckets: Vec<Bucket>,
    bucket_capacity: usize,

    clock: Box<dyn PassClock>,

    scheduled_tick_count: u32,
    overdue_tick_count: u32,
    last_update_duration: f64,
    average_update_duration: Option<f64>,
    passes: u64,
    total_scheduled_ticks: u64,
    total_overdue_ticks: u64,
}

impl fmt::Debug for TimeSlicer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeSlicer")
            .field("current_time", &self.current_time)
            .field("current_unscaled_time", &self.current_unscaled_time)
            .field("max_execution_time", &self.max_execution_time)
            .field("delayed", &self.delayed.len())
            .field("active_scaled", &self.active_scaled.len())
            .field("active_unscaled", &self.active_unscaled.len())
            .finish_non_exhaustive()
    }
}

impl TimeSlicer {
    /// `max_execution_time` is in seconds.
    pub fn new(time: f64, unscaled_time: f64, max_execution_time: f64) -> Self {
        Self::with_clock(time, unscaled_time, max_execution_time, SystemClock::new())
    }

    pub fn with_clock(
        time: f64,
        unscaled_time: f64,
        max_execution_time: f64,
        clock: impl PassClock + 'static,
    ) -> Self {
        let cfg = TimeSlicerConfig::default();
        Self::build(
            time,
            unscaled_time,
            max_execution_time,
            cfg.list_capacity,
            cfg.smooth_average_update,
            Box::new(clock),
        )
    }

    pub fn from_config(cfg: &TimeSlicerConfig, time: f64, unscaled_time: f64) -> Self {
        Self::from_config_with_clock(cfg, time, unscaled_time, SystemClock::new())
    }

    pub fn from_config_with_clock(
        cfg: &TimeSlicerConfig,
        time: f64,
        unscaled_time: f64,
        clock: impl PassClock + 'static,
    ) -> Self {
        Self::build(
            time,
            unscaled_time,
            cfg.budget_secs(),
            cfg.list_capacity,
            cfg.smooth_average_update,
            Box::new(clock),
        )
    }

    fn build(
        time: f64,
        unscaled_time: f64,
        max_execution_time: f64,
        capacity: usize,
        smooth_average: bool,
        clock: Box<dyn PassClock>,
    ) -> Self {
        let mut s = Self {
            current_time: time,
            current_unscaled_time: unscaled_time,
            max_execution_time: 0.0,
            smooth_average,
            delayed: PreallocList::with_capacity(capacity),
            active_scaled: PreallocList::with_capacity(capacity),
            active_unscaled: PreallocList::with_capacity(capacity),
            incoming_scaled: PreallocList::with_capacity(capacity / 4),
            incoming_unscaled: PreallocList::with_capacity(capacity / 4),
            buckets: Vec::new(),
            bucket_capacity: capacity / 4,
            clock,
            scheduled_tick_count: 0,
            overdue_tick_count: 0,
            last_update_duration: 0.0,
            average_update_duration: None,
            passes: 0,
            total_scheduled_ticks: 0,
            total_overdue_ticks: 0,
        };
        s.set_max_execution_time(max_execution_time);
        s
    }

    #[inline]
    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    #[inline]
    pub fn current_unscaled_time(&self) -> f64 {
        self.current_unscaled_time
    }

    #[inline]
    pub fn max_execution_time(&self) -> f64 {
        self.max_execution_time
    }

    /// Budget for the next pass, in seconds. Negative or non-finite values mean "overdue only".
    #[inline]
    pub fn set_max_execution_time(&mut self, secs: f64) {
        self.max_execution_time = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
    }

    #[inline]
    pub fn scheduled_tick_count(&self) -> u32 {
        self.scheduled_tick_count
    }

    #[inline]
    pub fn overdue_tick_count(&self) -> u32 {
        self.overdue_tick_count
    }

    #[inline]
    pub fn last_update_duration(&self) -> f64 {
        self.last_update_duration
    }

    /// `None` until the first pass completes.
    #[inline]
    pub fn average_update_duration(&self) -> Option<f64> {
        self.average_update_duration
    }

    #[inline]
    pub fn registered_count(&self) -> usize {
        self.delayed.len() + self.active_scaled.len() + self.active_unscaled.len()
    }

    pub fn stats(&self) -> TimeSlicerStats {
        TimeSlicerStats {
            current_time: self.current_time,
            current_unscaled_time: self.current_unscaled_time,
            max_execution_time: self.max_execution_time,
            scheduled_tick_count: self.scheduled_tick_count,
            overdue_tick_count: self.overdue_tick_count,
            last_update_duration: self.last_update_duration,
            average_update_duration: self.average_update_duration,
            registered: self.registered_count(),
            passes: self.passes,
            total_scheduled_ticks: self.total_scheduled_ticks,
            total_overdue_ticks: self.total_overdue_ticks,
        }
    }

    #[inline]
    fn domain_time(&self, unscaled: bool) -> f64 {
        if unscaled {
            self.current_unscaled_time
        } else {
            self.current_time
        }
    }

    /// Registers `slice`, stamping `added_at` with its own clock.
    ///
    /// Ready items go straight into their domain's active queue (sorted by deadline), the rest
    /// wait in the delayed queue. Adding an item that is already registered drops the old
    /// placement first.
    pub fn add(&mut self, slice: &TimesliceRef) {
        self.remove(slice);

        let entry = {
            let mut s = slice.lock();
            let unscaled = s.uses_unscaled_time();
            s.set_added_at(self.domain_time(unscaled));
            Scheduled {
                slice: Arc::clone(slice),
                ready_at: s.min_next_tick_at(),
                deadline: s.max_next_tick_at(),
                order: s.execution_order(),
                unscaled,
            }
        };

        let now = self.domain_time(entry.unscaled);
        trace!(
            "add order={} unscaled={} ready_at={:.4} deadline={:.4} now={:.4}",
            entry.order,
            entry.unscaled,
            entry.ready_at,
            entry.deadline,
            now
        );

        if entry.ready_at <= now {
            let list = if entry.unscaled {
                &mut self.active_unscaled
            } else {
                &mut self.active_scaled
            };
            list.add_sorted_by(entry, by_deadline);
        } else {
            self.delayed.add_last(entry);
        }
    }

    /// Unregisters `slice` from every queue. Returns whether it was registered.
    pub fn remove(&mut self, slice: &TimesliceRef) -> bool {
        let hit = |e: &Scheduled| same_slice(&e.slice, slice);
        let delayed = self.delayed.remove_where(hit).is_some();
        let unscaled = self.active_unscaled.remove_where(hit).is_some();
        let scaled = self.active_scaled.remove_where(hit).is_some();
        delayed || unscaled || scaled
    }

    pub fn contains(&self, slice: &TimesliceRef) -> bool {
        let hit = |e: &Scheduled| same_slice(&e.slice, slice);
        self.delayed.iter().any(hit)
            || self.active_unscaled.iter().any(hit)
            || self.active_scaled.iter().any(hit)
    }

    /// Drops registrations whose owner marked them orphaned.
    ///
    /// A coroutine handle dropped while the scheduler was locked leaves such an entry behind.
    /// Items registered and then let go by the caller are not orphans: they stay until ticked
    /// or removed.
    pub fn sweep_orphans(&mut self) -> usize {
        let before = self.registered_count();
        let live = |e: &Scheduled| !e.slice.lock().is_orphaned();
        self.delayed.retain(live);
        self.active_unscaled.retain(live);
        self.active_scaled.retain(live);

        let swept = before - self.registered_count();
        if swept > 0 {
            debug!("swept {swept} orphaned timeslice(s)");
        }
        swept
    }

    /// Runs one scheduling pass with the host's current scaled and unscaled clock readings.
    ///
    /// Every admitted item is ticked even if some ticks fail; failures come back together as
    /// [`TimeSlicerError::TickFailed`] once the pass and its statistics are complete.
    pub fn update(&mut self, time: f64, unscaled_time: f64) -> TimeSlicerResult<()> {
        let dt = time - self.current_time;
        let unscaled_dt = unscaled_time - self.current_unscaled_time;
        self.current_time = time;
        self.current_unscaled_time = unscaled_time;

        let pass = Stopwatch::start(self.clock.as_ref());
        let mut estimated = 0.0;

        let mut overdue = self.admit_overdue(false, &mut estimated);
        overdue += self.admit_overdue(true, &mut estimated);
        overdue += self.promote_delayed(&pass, &mut estimated);

        self.active_unscaled
            .merge_sorted_from(&mut self.incoming_unscaled, by_deadline);
        self.active_scaled
            .merge_sorted_from(&mut self.incoming_scaled, by_deadline);

        let mut scheduled = self.admit_within_budget(true, &pass, &mut estimated);
        scheduled += self.admit_within_budget(false, &pass, &mut estimated);

        let failures = self.tick_buckets(dt, unscaled_dt);

        self.overdue_tick_count = overdue;
        self.scheduled_tick_count = scheduled;
        self.passes += 1;
        self.total_overdue_ticks += u64::from(overdue);
        self.total_scheduled_ticks += u64::from(scheduled);

        self.last_update_duration = pass.elapsed_secs(self.clock.as_ref());
        self.average_update_duration = Some(match self.average_update_duration {
            Some(avg) if self.smooth_average => {
                self.last_update_duration * AVERAGE_BLEND + avg * (1.0 - AVERAGE_BLEND)
            }
            _ => self.last_update_duration,
        });

        if overdue > 0 || scheduled > 0 {
            trace!(
                "pass time={:.4} unscaled={:.4} overdue={} scheduled={} estimated={:.6}s took={:.6}s",
                self.current_time,
                self.current_unscaled_time,
                overdue,
                scheduled,
                estimated,
                self.last_update_duration
            );
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TimeSlicerError::TickFailed { failures })
        }
    }

    #[inline]
    fn active_mut(&mut self, unscaled: bool) -> &mut PreallocList<Scheduled> {
        if unscaled {
            &mut self.active_unscaled
        } else {
            &mut self.active_scaled
        }
    }

    /// Pops every head whose deadline has been reached, budget or not.
    fn admit_overdue(&mut self, unscaled: bool, estimated: &mut f64) -> u32 {
        let now = self.domain_time(unscaled);
        let mut count = 0;
        loop {
            let list = self.active_mut(unscaled);
            if !list.first().is_some_and(|head| head.deadline <= now) {
                break;
            }
            let Some(entry) = list.remove_first() else {
                break;
            };
            *estimated += entry.estimate();
            self.push_execution(entry);
            count += 1;
        }
        count
    }

    /// Single scan of the delayed queue.
    ///
    /// Items past their deadline run now. Items that became eligible are staged in a per-domain
    /// incoming list while the budget still has room, and merged into the active queue after the
    /// scan. Returns the number of overdue admissions.
    fn promote_delayed(&mut self, pass: &Stopwatch, estimated: &mut f64) -> u32 {
        let mut overdue = 0;
        let mut cur = self.delayed.first_handle();

        while let Some(node) = cur {
            cur = self.delayed.next_handle(node);

            let Some((due, eligible)) = self.delayed.get(node).map(|e| {
                let now = self.domain_time(e.unscaled);
                (e.deadline <= now, e.ready_at <= now)
            }) else {
                break;
            };

            if due {
                if let Some(entry) = self.delayed.remove_node(node) {
                    *estimated += entry.estimate();
                    self.push_execution(entry);
                    overdue += 1;
                }
            } else if eligible
                && pass.elapsed_secs(self.clock.as_ref()) + *estimated < self.max_execution_time
            {
                if let Some(entry) = self.delayed.remove_node(node) {
                    let incoming = if entry.unscaled {
                        &mut self.incoming_unscaled
                    } else {
                        &mut self.incoming_scaled
                    };
                    incoming.add_sorted_by(entry, by_deadline);
                }
            }
        }

        overdue
    }

    /// Pops heads while elapsed time plus the running estimate plus the head's estimate fits.
    fn admit_within_budget(&mut self, unscaled: bool, pass: &Stopwatch, estimated: &mut f64) -> u32 {
        let mut count = 0;
        loop {
            let Some(cost) = self.active_mut(unscaled).first().map(Scheduled::estimate) else {
                break;
            };
            let elapsed = pass.elapsed_secs(self.clock.as_ref());
            if elapsed + *estimated + cost > self.max_execution_time {
                break;
            }
            let Some(entry) = self.active_mut(unscaled).remove_first() else {
                break;
            };
            *estimated += cost;
            self.push_execution(entry);
            count += 1;
        }
        count
    }

    fn push_execution(&mut self, entry: Scheduled) {
        let at = match self.buckets.binary_search_by_key(&entry.order, |b| b.order) {
            Ok(i) => i,
            Err(i) => {
                self.buckets.insert(
                    i,
                    Bucket {
                        order: entry.order,
                        items: PreallocList::with_capacity(self.bucket_capacity),
                    },
                );
                i
            }
        };
        self.buckets[at].items.add_last(entry);
    }

    /// Ticks buckets in ascending order and empties them, keeping their nodes for the next pass.
    ///
    /// A panicking tick is caught and reported like an error so the remaining buckets still run.
    fn tick_buckets(&mut self, dt: f64, unscaled_dt: f64) -> Vec<TickFailure> {
        let clock = self.clock.as_ref();
        let mut failures = Vec::new();

        for bucket in self.buckets.iter_mut() {
            for entry in bucket.items.drain() {
                let started = Stopwatch::start(clock);
                let mut slice = entry.slice.lock();
                let result = panic::catch_unwind(AssertUnwindSafe(|| slice.tick(dt, unscaled_dt)))
                    .unwrap_or_else(|payload| {
                        Err(anyhow!("tick panicked: {}", panic_message(payload.as_ref())))
                    });
                slice.set_last_tick_duration(started.elapsed_secs(clock));
                drop(slice);

                if let Err(error) = result {
                    warn!("timeslice tick failed (order {}): {error:#}", entry.order);
                    failures.push(TickFailure {
                        execution_order: entry.order,
                        uses_unscaled_time: entry.unscaled,
                        error,
                    });
                }
            }
        }

        require(
            self.buckets.iter().all(|b| b.items.is_empty()),
            "execution bucket not empty after pass",
        );
        failures
    }
}
