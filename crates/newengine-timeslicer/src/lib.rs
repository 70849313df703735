//! NewEngine timeslicer.
//!
//! Spreads deferrable work across frames under a per-frame wall-clock budget. Work whose deadline
//! has passed always runs; everything else is admitted by ascending deadline while the budget
//! lasts and ticked in ascending execution order.

pub mod clock;
pub mod config;
pub mod coroutine;
pub mod error;
pub mod list;
pub mod manager;
pub mod slicer;
pub mod timeslice;

mod invariants;

pub use clock::{ManualClock, PassClock, SystemClock};
pub use config::TimeSlicerConfig;
pub use coroutine::{CoroutineTimeslice, MeasureScope, WaitToken};
pub use error::{TickFailure, TimeSlicerError, TimeSlicerResult};
pub use list::{NodeHandle, PreallocList};
pub use manager::{global, init_global, shutdown_global, TimesliceManager};
pub use slicer::{SharedTimeSlicer, TimeSlicer, TimeSlicerStats};
pub use timeslice::{same_slice, shared, FnTimeslice, Timeslice, TimesliceRef, TimesliceState};
