use log::{info, warn};
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

/// Exit code used when a second ctrl-c skips the orderly shutdown.
const FORCED_EXIT_CODE: i32 = 130;

/// Decides when the frame loop stops: a frame limit from config, or ctrl-c.
///
/// The first interrupt lets the current frame finish and the workloads shut down; a second one
/// exits the process immediately.
#[derive(Clone)]
pub struct RunControl {
    interrupts: Arc<AtomicU32>,
    frame_limit: Option<u64>,
}

impl RunControl {
    /// `frames == 0` means no limit.
    pub fn new(frames: u64) -> Self {
        Self {
            interrupts: Arc::new(AtomicU32::new(0)),
            frame_limit: (frames > 0).then_some(frames),
        }
    }

    /// Counts an interrupt. Returns how many have been received so far.
    #[inline]
    pub fn interrupt(&self) -> u32 {
        self.interrupts.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.interrupts.load(Ordering::Relaxed) > 0
    }

    /// Whether the loop should run frame `frame_index` (zero-based count of frames done).
    pub fn should_run(&self, frame_index: u64) -> bool {
        if self.is_interrupted() {
            return false;
        }
        self.frame_limit.map_or(true, |limit| frame_index < limit)
    }

    pub fn install_ctrlc_handler(&self) -> anyhow::Result<()> {
        let control = self.clone();
        ctrlc::set_handler(move || match control.interrupt() {
            1 => info!("interrupt received, finishing the current frame"),
            _ => {
                warn!("second interrupt, exiting immediately");
                std::process::exit(FORCED_EXIT_CODE);
            }
        })?;
        Ok(())
    }
}
