/// Runtime checks for timeslicer queue invariants.
///
/// A broken queue link means an item could be lost or ticked twice, so violations are fatal.

#[cold]
#[inline(never)]
fn violation(msg: &'static str) -> ! {
    panic!("TIMESLICER INVARIANT VIOLATION: {msg}");
}

/// Panic if a required invariant is false.
#[inline]
pub(crate) fn require(cond: bool, msg: &'static str) {
    if !cond {
        violation(msg);
    }
}

/// Panic if an impossible queue state is reached.
#[inline]
pub(crate) fn bad_state(msg: &'static str) -> ! {
    violation(msg)
}
