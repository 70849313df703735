use std::fmt;
use std::path::PathBuf;

/// A tick callback that returned an error during a scheduling pass.
///
/// The pass keeps walking the remaining buckets; failures are handed back to the host afterwards.
#[derive(Debug)]
pub struct TickFailure {
    pub execution_order: i32,
    pub uses_unscaled_time: bool,
    pub error: anyhow::Error,
}

impl fmt::Display for TickFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "order {}: {:#}", self.execution_order, self.error)
    }
}

/// Timeslicer-wide error.
///
/// Scheduling decisions never fail. Everything here is either a caller-side failure
/// (tick callback, config) or a lifecycle condition of the host wiring.
#[derive(Debug, thiserror::Error)]
pub enum TimeSlicerError {
    #[error("{} tick callback(s) failed: {}", .failures.len(), join_failures(.failures))]
    TickFailed { failures: Vec<TickFailure> },

    #[error("wait cancelled before the timeslice was ticked")]
    WaitCancelled,

    #[error("timeslicer dropped while a timeslice was still registered")]
    SchedulerDropped,

    #[error("global timeslice manager already initialized")]
    AlreadyInitialized,

    #[error("config read failed: {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse failed: {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

fn join_failures(failures: &[TickFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl TimeSlicerError {
    /// Failures collected by a pass, empty for every other variant.
    #[inline]
    pub fn tick_failures(&self) -> &[TickFailure] {
        match self {
            TimeSlicerError::TickFailed { failures } => failures,
            _ => &[],
        }
    }
}

pub type TimeSlicerResult<T> = Result<T, TimeSlicerError>;
