//! Property-based invariant tests for the scheduler.
//!
//! 1. Execution order is priority first, then enqueue order.
//! 2. Identical enqueue sequences execute identically (determinism).
//! 3. Cancelled tasks never run; every other task runs exactly once.
//! 4. Tasks enqueued during a flush run in that same flush.
//! 5. A flush never runs more tasks than its budget.
//! 6. Failing and panicking tasks are reported without disturbing the
//!    others, and the scheduler stays usable afterwards.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use trellis_core::{CancellationTokenSource, Clock, ManualClock, ReactiveError};
use trellis_runtime::{Priority, Scheduler, SchedulerConfig};

// ── Strategies ────────────────────────────────────────────────────────────

fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop_oneof![Just(Priority::High), Just(Priority::Normal), Just(Priority::Low)]
}

fn plan_strategy(max_len: usize) -> impl Strategy<Value = Vec<(Priority, bool)>> {
    proptest::collection::vec((priority_strategy(), any::<bool>()), 0..=max_len)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeed,
    Fail,
    Panic,
}

fn outcome_strategy() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        4 => Just(Outcome::Succeed),
        1 => Just(Outcome::Fail),
        1 => Just(Outcome::Panic),
    ]
}

fn scheduler(config: SchedulerConfig) -> Scheduler {
    Scheduler::with_clock(config, Clock::manual(&ManualClock::new()))
}

/// Enqueue `plan` (priority, cancel?) and return the executed indices.
fn run_plan(plan: &[(Priority, bool)]) -> Vec<usize> {
    let scheduler = scheduler(SchedulerConfig::default());
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut sources = Vec::new();
    for (index, (priority, cancel)) in plan.iter().enumerate() {
        let source = CancellationTokenSource::new();
        let log = Rc::clone(&log);
        scheduler.enqueue(
            move || {
                log.borrow_mut().push(index);
                Ok(())
            },
            *priority,
            Some(source.token()),
        );
        if *cancel {
            sources.push(source);
        }
    }
    for source in &sources {
        source.cancel();
    }
    scheduler.when_done().expect("no task fails");
    Rc::try_unwrap(log).map(RefCell::into_inner).unwrap_or_default()
}

fn expected_order(plan: &[(Priority, bool)]) -> Vec<usize> {
    let mut expected = Vec::new();
    for priority in Priority::ALL {
        expected.extend(
            plan.iter()
                .enumerate()
                .filter(|(_, (p, cancel))| *p == priority && !cancel)
                .map(|(i, _)| i),
        );
    }
    expected
}

proptest! {
    #[test]
    fn order_is_priority_then_fifo(plan in plan_strategy(40)) {
        prop_assert_eq!(run_plan(&plan), expected_order(&plan));
    }

    #[test]
    fn identical_sequences_are_deterministic(plan in plan_strategy(40)) {
        prop_assert_eq!(run_plan(&plan), run_plan(&plan));
    }

    #[test]
    fn nested_enqueues_join_current_flush(outer in 1usize..10, inner in 0usize..10) {
        let scheduler = scheduler(SchedulerConfig::default());
        let ran = Rc::new(RefCell::new(0usize));
        for _ in 0..outer {
            let s = scheduler.clone();
            let ran = Rc::clone(&ran);
            scheduler.enqueue(
                move || {
                    *ran.borrow_mut() += 1;
                    for _ in 0..inner {
                        let ran = Rc::clone(&ran);
                        s.enqueue(move || { *ran.borrow_mut() += 1; Ok(()) }, Priority::Low, None);
                    }
                    Ok(())
                },
                Priority::Normal,
                None,
            );
        }
        let report = scheduler.flush();
        prop_assert_eq!(report.executed, outer * (inner + 1));
        prop_assert_eq!(*ran.borrow(), outer * (inner + 1));
        prop_assert!(scheduler.is_idle());
        prop_assert_eq!(scheduler.next_deadline(), None);
    }

    #[test]
    fn flush_respects_budget(tasks in 0usize..50, budget in 1usize..20) {
        let scheduler = scheduler(SchedulerConfig::immediate().with_max_tasks_per_flush(budget));
        for _ in 0..tasks {
            scheduler.enqueue(|| Ok(()), Priority::Normal, None);
        }
        let mut total = 0;
        let mut flushes = 0;
        while scheduler.next_deadline().is_some() {
            let report = scheduler.flush();
            prop_assert!(report.executed <= budget);
            prop_assert_eq!(report.hit_limit(), scheduler.pending() > 0);
            total += report.executed;
            flushes += 1;
        }
        prop_assert_eq!(total, tasks);
        prop_assert_eq!(flushes, tasks.div_ceil(budget));
    }
}

proptest! {
    #[test]
    fn failures_are_isolated(
        plan in proptest::collection::vec((priority_strategy(), outcome_strategy()), 0..20),
    ) {
        let scheduler = scheduler(SchedulerConfig::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        for (index, (priority, outcome)) in plan.iter().copied().enumerate() {
            let log = Rc::clone(&log);
            scheduler.enqueue(
                move || {
                    log.borrow_mut().push(index);
                    match outcome {
                        Outcome::Succeed => Ok(()),
                        Outcome::Fail => Err(ReactiveError::protocol(format!("task {index}"))),
                        Outcome::Panic => panic!("task {index}"),
                    }
                },
                priority,
                None,
            );
        }
        let report = scheduler.flush();
        let order: Vec<(Priority, bool)> = plan.iter().map(|(p, _)| (*p, false)).collect();
        prop_assert_eq!(log.borrow().clone(), expected_order(&order));
        prop_assert_eq!(report.executed, plan.len());

        let failing = plan.iter().filter(|(_, o)| *o != Outcome::Succeed).count();
        let panicked = report
            .errors
            .iter()
            .filter(|e| matches!(e, ReactiveError::TaskPanicked(_)))
            .count();
        prop_assert_eq!(report.errors.len(), failing);
        prop_assert_eq!(panicked, plan.iter().filter(|(_, o)| *o == Outcome::Panic).count());

        prop_assert!(scheduler.is_idle());
        scheduler.enqueue(|| Ok(()), Priority::Low, None);
        prop_assert!(scheduler.next_deadline().is_some());
        prop_assert_eq!(scheduler.flush().executed, 1);
    }
}

#[test]
fn documented_priority_example() {
    let scheduler = scheduler(SchedulerConfig::default());
    let log = Rc::new(RefCell::new(Vec::new()));
    for (value, priority) in [
        (1, Priority::Low),
        (2, Priority::High),
        (3, Priority::Normal),
        (4, Priority::High),
    ] {
        let log = Rc::clone(&log);
        scheduler.enqueue(
            move || {
                log.borrow_mut().push(value);
                Ok(())
            },
            priority,
            None,
        );
    }
    scheduler.when_done().unwrap();
    assert_eq!(*log.borrow(), vec![2, 4, 3, 1]);
}
