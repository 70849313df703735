use crate::config::WorkloadConfig;
use newengine_timeslicer::{CoroutineTimeslice, TimesliceManager, WaitToken};
use std::time::{Duration, Instant};

/// One simulated long-running job: runs a step, waits for the timeslicer, repeats.
pub struct Workload {
    name: String,
    handle: CoroutineTimeslice,
    token: Option<WaitToken>,
    cost: Duration,
    min_delay: f64,
    max_delay: f64,
    unscaled: bool,
    steps: u64,
}

impl Workload {
    pub fn spawn(manager: &TimesliceManager, cfg: &WorkloadConfig, index: u32) -> Self {
        let cost = Duration::from_secs_f64((cfg.work_ms / 1000.0).max(0.0));
        Self {
            name: format!("{}#{index}", cfg.name),
            handle: manager.create_coroutine_timeslice(cfg.execution_order),
            token: None,
            cost,
            min_delay: cfg.min_delay,
            max_delay: cfg.max_delay,
            unscaled: cfg.unscaled,
            steps: 0,
        }
    }

    /// Runs a step if the previous wait has resolved. Returns whether a step ran.
    pub fn poll(&mut self) -> bool {
        if self.token.as_ref().is_some_and(WaitToken::is_waiting) {
            return false;
        }
        if self.token.as_ref().is_some_and(WaitToken::is_cancelled) {
            log::debug!("{}: wait cancelled, rescheduling", self.name);
        }

        {
            let _scope = self.handle.begin();
            spin_for(self.cost);
        }
        self.steps += 1;
        self.token = Some(
            self.handle
                .end_and_wait(self.min_delay, self.max_delay, self.unscaled),
        );
        true
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    #[inline]
    pub fn estimate_ms(&self) -> f64 {
        self.handle.tick_duration_estimate() * 1000.0
    }

    pub fn stop(&mut self) {
        self.handle.dispose();
        self.token = None;
    }
}

fn spin_for(d: Duration) {
    let start = Instant::now();
    while start.elapsed() < d {
        std::hint::spin_loop();
    }
}
