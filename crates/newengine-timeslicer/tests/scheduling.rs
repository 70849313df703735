//! Scheduling behaviour of `TimeSlicer` driven with a manual clock.

use newengine_timeslicer::{
    shared, FnTimeslice, ManualClock, TimeSlicer, TimeSlicerError, TimesliceRef, TimesliceState,
};
use parking_lot::Mutex;
use std::sync::Arc;

type Ticks = Arc<Mutex<Vec<&'static str>>>;

fn recorder(ticks: &Ticks, name: &'static str, state: TimesliceState) -> TimesliceRef {
    let ticks = Arc::clone(ticks);
    shared(FnTimeslice::new(state, move |_, _| {
        ticks.lock().push(name);
        Ok(())
    }))
}

fn window(order: i32, min: f64, max: f64) -> TimesliceState {
    TimesliceState::new(order).with_window(min, max, false)
}

fn unscaled_window(order: i32, min: f64, max: f64) -> TimesliceState {
    TimesliceState::new(order).with_window(min, max, true)
}

fn slicer(budget: f64) -> TimeSlicer {
    TimeSlicer::with_clock(0.0, 0.0, budget, ManualClock::new())
}

#[test]
fn overdue_items_run_even_with_zero_budget() {
    let ticks = Ticks::default();
    let mut ts = slicer(0.0);
    let active = recorder(&ticks, "active", window(0, 0.0, 0.5).with_estimate(0.1));
    let delayed = recorder(&ticks, "delayed", window(0, 0.2, 0.5).with_estimate(0.1));
    let unscaled = recorder(&ticks, "unscaled", unscaled_window(0, 0.0, 0.5).with_estimate(0.1));
    for s in [&active, &delayed, &unscaled] {
        ts.add(s);
    }

    ts.update(0.5, 0.5).unwrap();

    let mut got = ticks.lock().clone();
    got.sort_unstable();
    assert_eq!(got, vec!["active", "delayed", "unscaled"]);
    assert_eq!(ts.overdue_tick_count(), 3);
    assert_eq!(ts.scheduled_tick_count(), 0);
    assert_eq!(ts.registered_count(), 0);
}

#[test]
fn zero_budget_holds_back_work_that_is_not_due() {
    let ticks = Ticks::default();
    let mut ts = slicer(0.0);
    let s = recorder(&ticks, "s", window(0, 0.0, 1.0).with_estimate(0.001));
    ts.add(&s);

    ts.update(0.1, 0.1).unwrap();
    assert!(ticks.lock().is_empty());
    assert_eq!(ts.scheduled_tick_count(), 0);
    assert!(ts.contains(&s));

    ts.update(1.0, 1.0).unwrap();
    assert_eq!(*ticks.lock(), vec!["s"]);
    assert_eq!(ts.overdue_tick_count(), 1);
}

#[test]
fn budget_admits_exactly_what_fits() {
    let ticks = Ticks::default();
    let mut ts = slicer(0.002);
    let a = recorder(&ticks, "a", window(0, 0.0, 1.0).with_estimate(0.001));
    let b = recorder(&ticks, "b", window(0, 0.0, 1.1).with_estimate(0.001));
    let c = recorder(&ticks, "c", window(0, 0.0, 1.2).with_estimate(0.001));
    for s in [&a, &b, &c] {
        ts.add(s);
    }

    ts.update(0.1, 0.1).unwrap();
    assert_eq!(*ticks.lock(), vec!["a", "b"]);
    assert_eq!(ts.scheduled_tick_count(), 2);
    assert_eq!(ts.overdue_tick_count(), 0);
    assert!(ts.contains(&c));

    ts.update(0.2, 0.2).unwrap();
    assert_eq!(*ticks.lock(), vec!["a", "b", "c"]);
    assert_eq!(ts.scheduled_tick_count(), 1);
}

#[test]
fn delayed_item_is_forced_at_its_deadline() {
    let ticks = Ticks::default();
    let mut ts = slicer(0.0);
    let s = recorder(&ticks, "s", window(0, 0.5, 1.0));
    ts.add(&s);

    ts.update(0.4, 0.4).unwrap();
    assert!(ticks.lock().is_empty());
    assert_eq!(ts.overdue_tick_count(), 0);

    ts.update(1.0, 1.0).unwrap();
    assert_eq!(*ticks.lock(), vec!["s"]);
    assert_eq!(ts.overdue_tick_count(), 1);
}

#[test]
fn delayed_item_becomes_eligible_then_runs_under_budget() {
    let ticks = Ticks::default();
    let mut ts = slicer(0.01);
    let s = recorder(&ticks, "s", window(0, 0.5, 1.0).with_estimate(0.001));
    ts.add(&s);

    ts.update(0.6, 0.6).unwrap();
    assert_eq!(*ticks.lock(), vec!["s"]);
    assert_eq!(ts.scheduled_tick_count(), 1);
    assert_eq!(ts.overdue_tick_count(), 0);
}

#[test]
fn lower_execution_order_ticks_first() {
    let ticks = Ticks::default();
    let mut ts = slicer(1.0);
    let five = recorder(&ticks, "order5", window(5, 0.0, 1.0));
    let one = recorder(&ticks, "order1", window(1, 0.0, 2.0));
    ts.add(&five);
    ts.add(&one);

    ts.update(0.1, 0.1).unwrap();
    assert_eq!(*ticks.lock(), vec!["order1", "order5"]);
}

#[test]
fn equal_order_ticks_in_admission_order() {
    let ticks = Ticks::default();
    let mut ts = slicer(1.0);
    let late = recorder(&ticks, "late", window(2, 0.0, 0.9));
    let early = recorder(&ticks, "early", window(2, 0.0, 0.3));
    let first = recorder(&ticks, "first", window(-1, 0.0, 5.0));
    for s in [&late, &early, &first] {
        ts.add(s);
    }

    ts.update(0.1, 0.1).unwrap();
    assert_eq!(*ticks.lock(), vec!["first", "early", "late"]);
}

#[test]
fn equal_deadlines_keep_insertion_order() {
    let ticks = Ticks::default();
    let mut ts = slicer(1.0);
    let names = ["a", "b", "c", "d"];
    // Half go straight to active, half arrive through the delayed queue and the merge.
    let items: Vec<_> = names
        .iter()
        .enumerate()
        .map(|(i, &name)| {
            let min = if i % 2 == 0 { 0.0 } else { 0.5 };
            recorder(&ticks, name, window(0, min, 1.0))
        })
        .collect();
    for s in &items {
        ts.add(s);
    }
    ts.update(0.6, 0.6).unwrap();

    assert_eq!(*ticks.lock(), vec!["a", "c", "b", "d"]);
}

#[test]
fn unscaled_items_ignore_scaled_clock() {
    let ticks = Ticks::default();
    let mut ts = slicer(0.0);
    let u = recorder(&ticks, "u", unscaled_window(0, 0.5, 1.0));
    let s = recorder(&ticks, "s", window(0, 0.5, 1.0));
    ts.add(&u);
    ts.add(&s);

    // Scaled time races ahead: only the scaled item is due.
    ts.update(50.0, 0.4).unwrap();
    assert_eq!(*ticks.lock(), vec!["s"]);

    // Unscaled time reaches the deadline while scaled time stands still.
    ts.update(50.0, 1.0).unwrap();
    assert_eq!(*ticks.lock(), vec!["s", "u"]);
    assert_eq!(ts.overdue_tick_count(), 1);
}

#[test]
fn paused_scaled_clock_holds_scaled_work() {
    let ticks = Ticks::default();
    let mut ts = slicer(0.0);
    let s = recorder(&ticks, "s", window(0, 0.5, 1.0));
    ts.add(&s);

    for frame in 1..=10 {
        ts.update(0.0, frame as f64).unwrap();
    }
    assert!(ticks.lock().is_empty());
    assert!(ts.contains(&s));
}

#[test]
fn removing_unregistered_item_is_a_no_op() {
    let ticks = Ticks::default();
    let mut ts = slicer(1.0);
    let kept = recorder(&ticks, "kept", window(0, 0.5, 1.0));
    let stranger = recorder(&ticks, "stranger", window(0, 0.0, 1.0));
    ts.add(&kept);
    ts.update(0.1, 0.1).unwrap();
    let before = ts.stats();

    assert!(!ts.remove(&stranger));
    assert!(!ts.remove(&stranger));
    assert_eq!(ts.stats(), before);
    assert!(ts.contains(&kept));
}

#[test]
fn removed_active_scaled_item_never_ticks() {
    let ticks = Ticks::default();
    let mut ts = slicer(0.0);
    let s = recorder(&ticks, "s", window(0, 0.0, 1.0));
    ts.add(&s);
    assert!(ts.remove(&s));

    ts.update(2.0, 2.0).unwrap();
    assert!(ticks.lock().is_empty());
}

#[test]
fn second_add_supersedes_first() {
    let ticks = Ticks::default();
    let mut ts = slicer(0.0);
    let s = recorder(&ticks, "s", window(0, 0.0, 1.0).with_estimate(0.001));
    ts.add(&s);

    // Push the window out before anything ticks and register again.
    ts.update(0.5, 0.5).unwrap();
    ts.add(&s);
    assert_eq!(ts.registered_count(), 1);
    assert_eq!(s.lock().added_at(), 0.5);

    // The first registration's deadline (1.0) no longer applies.
    ts.update(1.0, 1.0).unwrap();
    assert!(ticks.lock().is_empty());
    ts.update(1.5, 1.5).unwrap();
    assert_eq!(*ticks.lock(), vec!["s"]);
    assert_eq!(ts.registered_count(), 0);
}

#[test]
fn failing_tick_does_not_stop_the_pass() {
    let ticks = Ticks::default();
    let mut ts = slicer(1.0);
    let before = recorder(&ticks, "before", window(0, 0.0, 1.0));
    let after = recorder(&ticks, "after", window(2, 0.0, 1.0));
    let failing = shared(FnTimeslice::new(window(1, 0.0, 1.0), |_, _| {
        anyhow::bail!("asset not found")
    }));
    for s in [&before, &failing, &after] {
        ts.add(s);
    }

    let err = ts.update(0.1, 0.1).unwrap_err();
    assert_eq!(*ticks.lock(), vec!["before", "after"]);
    let failures = err.tick_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].execution_order, 1);
    assert!(matches!(err, TimeSlicerError::TickFailed { .. }));
    assert_eq!(ts.scheduled_tick_count(), 3);
    assert_eq!(ts.registered_count(), 0);

    // The scheduler is still healthy afterwards.
    ts.add(&before);
    ts.update(0.2, 0.2).unwrap();
    assert_eq!(ticks.lock().len(), 3);
}

#[test]
fn panicking_tick_is_reported_and_the_pass_continues() {
    let ticks = Ticks::default();
    let mut ts = slicer(1.0);
    let bad = shared(FnTimeslice::new(window(0, 0.0, 1.0), |_, _| {
        panic!("corrupt navmesh")
    }));
    let b = recorder(&ticks, "b", window(1, 0.0, 1.0));
    ts.add(&bad);
    ts.add(&b);

    let err = ts.update(0.1, 0.1).unwrap_err();
    assert_eq!(*ticks.lock(), vec!["b"]);
    let failures = err.tick_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].execution_order, 0);
    assert!(failures[0].error.to_string().contains("corrupt navmesh"));
    assert_eq!(ts.stats().passes, 1);
    assert_eq!(ts.scheduled_tick_count(), 2);
    assert_eq!(ts.registered_count(), 0);

    // Nothing is left behind in the execution buckets: one admission, one tick.
    ts.add(&b);
    ts.update(0.2, 0.2).unwrap();
    assert_eq!(*ticks.lock(), vec!["b", "b"]);
    assert_eq!(ts.scheduled_tick_count(), 1);
}

#[test]
fn tick_receives_pass_deltas_and_duration_is_measured() {
    let clock = ManualClock::new();
    let mut ts = TimeSlicer::with_clock(1.0, 10.0, 1.0, clock.clone());
    let seen = Arc::new(Mutex::new(None));
    let seen2 = Arc::clone(&seen);
    let c = clock.clone();
    let s = shared(FnTimeslice::new(
        window(0, 0.0, 5.0).with_estimate(0.004),
        move |dt, udt| {
            *seen2.lock() = Some((dt, udt));
            c.advance_secs(0.003);
            Ok(())
        },
    ));
    ts.add(&s);

    ts.update(1.25, 10.5).unwrap();
    assert_eq!(*seen.lock(), Some((0.25, 0.5)));

    let slice = s.lock();
    assert!((slice.last_tick_duration() - 0.003).abs() < 1e-7);
    // The scheduler measures, but leaves the estimate to the item's owner.
    assert_eq!(slice.tick_duration_estimate(), 0.004);
    drop(slice);
    assert!((ts.last_update_duration() - 0.003).abs() < 1e-7);
}

#[test]
fn stats_accumulate_across_passes() {
    let ticks = Ticks::default();
    let mut ts = slicer(0.0);
    let s = recorder(&ticks, "s", window(0, 0.0, 0.1));
    ts.add(&s);
    ts.update(0.2, 0.2).unwrap();
    ts.add(&s);
    ts.update(0.4, 0.4).unwrap();
    ts.update(0.6, 0.6).unwrap();

    let stats = ts.stats();
    assert_eq!(stats.passes, 3);
    assert_eq!(stats.total_overdue_ticks, 2);
    assert_eq!(stats.total_scheduled_ticks, 0);
    assert_eq!(stats.overdue_tick_count, 0);
    assert_eq!(stats.current_time, 0.6);
}
