use phaseloop_scheduler::{EventLoop, ExecContext, LoopConfig, Phase, StopReason, TraceEvent};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

fn with_startup(ms: u64) -> EventLoop {
    EventLoop::with_config(
        LoopConfig::builder()
            .startup_delay(Duration::from_millis(ms))
            .build()
            .unwrap(),
    )
    .unwrap()
}

#[test]
fn test_empty_loop_exits_immediately() {
    let lp = EventLoop::new();
    let summary = lp.run().unwrap();

    assert_eq!(summary.iterations, 0);
    assert_eq!(summary.reason, StopReason::Drained);
    assert!(lp.output().is_empty());
}

#[test]
fn test_nested_ticks_drain_in_same_pass() {
    let lp = EventLoop::new();
    lp.run_main(|lp| {
        lp.next_tick(|lp| {
            lp.log("t1");
            lp.next_tick(|lp| {
                lp.log("t2");
                lp.next_tick(|lp| lp.log("t3"));
            });
        });
        lp.queue_microtask(|lp| lp.log("m"));
    })
    .unwrap();

    // Everything ran before run_main returned.
    assert_eq!(lp.output(), vec!["t1", "t2", "t3", "m"]);
}

#[test]
fn test_contexts_are_reported() {
    let lp = with_startup(5);
    let seen = Rc::new(RefCell::new(Vec::new()));

    {
        let seen = seen.clone();
        lp.run_main(move |lp| {
            seen.borrow_mut().push(lp.context());
            let s = seen.clone();
            lp.next_tick(move |lp| s.borrow_mut().push(lp.context()));
            let s = seen.clone();
            lp.queue_microtask(move |lp| s.borrow_mut().push(lp.context()));
            let s = seen.clone();
            lp.set_timeout(Duration::ZERO, move |lp| s.borrow_mut().push(lp.context()));
            let s = seen.clone();
            lp.set_immediate(move |lp| s.borrow_mut().push(lp.context()));
        })
        .unwrap();
    }
    lp.run().unwrap();

    assert_eq!(
        *seen.borrow(),
        vec![
            ExecContext::Main,
            ExecContext::Tick,
            ExecContext::Microtask,
            ExecContext::Phase(Phase::Timers),
            ExecContext::Phase(Phase::Check),
        ]
    );
}

#[test]
fn test_blocking_main_delays_everything() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml");
    let lp = EventLoop::new();
    lp.run_main(|lp| {
        lp.log("A");
        lp.set_timeout(Duration::ZERO, |lp| lp.log("B"));
        lp.set_immediate(|lp| lp.log("C"));
        lp.read_file(path, |lp, _| lp.log("D"));
        lp.busy(Duration::from_millis(1500));
        lp.log("E");
    })
    .unwrap();
    lp.run().unwrap();

    assert_eq!(lp.output(), vec!["A", "E", "B", "C", "D"]);

    let trace = lp.trace();
    for event in trace.events() {
        if let TraceEvent::Output { at, line, .. } = event {
            if line != "A" {
                assert!(*at >= Duration::from_millis(1500), "{line} ran at {at:?}");
            }
        }
    }
}

#[test]
fn test_busy_callback_holds_back_the_next_one() {
    let lp = with_startup(0);
    lp.run_main(|lp| {
        lp.set_immediate(|lp| lp.busy(Duration::from_millis(50)));
        lp.set_immediate(|lp| lp.log(format!("{:?}", lp.now())));
    })
    .unwrap();
    lp.run().unwrap();

    assert_eq!(lp.output(), vec!["50ms"]);
}

#[test]
fn test_stop_ends_run_after_iteration() {
    let lp = with_startup(0);
    let ticks = Rc::new(Cell::new(0));

    {
        let ticks = ticks.clone();
        lp.set_interval(Duration::from_millis(5), move |lp| {
            ticks.set(ticks.get() + 1);
            if ticks.get() == 3 {
                lp.stop();
            }
        });
    }
    let summary = lp.run().unwrap();

    assert_eq!(summary.reason, StopReason::Stopped);
    assert_eq!(ticks.get(), 3);
    assert_eq!(lp.pending_timers(), 1);
}

#[test]
fn test_iteration_limit() {
    let lp = EventLoop::with_config(
        LoopConfig::builder()
            .startup_delay(Duration::ZERO)
            .max_iterations(4)
            .build()
            .unwrap(),
    )
    .unwrap();
    lp.set_interval(Duration::from_millis(1), |_| ());

    let summary = lp.run().unwrap();
    assert_eq!(summary.reason, StopReason::IterationLimit);
    assert_eq!(summary.iterations, 4);
}

#[test]
fn test_fairness_budget_defers_extra_callbacks() {
    let lp = EventLoop::with_config(
        LoopConfig::builder()
            .startup_delay(Duration::ZERO)
            .max_callbacks_per_phase(2)
            .build()
            .unwrap(),
    )
    .unwrap();
    lp.run_main(|lp| {
        for i in 0..5 {
            lp.set_immediate(move |lp| lp.log(format!("immediate {i}")));
        }
    })
    .unwrap();
    lp.run().unwrap();

    let expected: Vec<String> = (0..5).map(|i| format!("immediate {i}")).collect();
    assert_eq!(lp.output(), expected);

    let trace = lp.trace();
    let per_iteration: Vec<(u64, usize)> = trace
        .events()
        .iter()
        .filter_map(|event| match event {
            TraceEvent::PhaseCompleted {
                iteration,
                phase: Phase::Check,
                callbacks,
                ..
            } => Some((*iteration, *callbacks)),
            _ => None,
        })
        .collect();
    assert_eq!(per_iteration, vec![(0, 2), (1, 2), (2, 1)]);

    let deferred: Vec<usize> = trace
        .events()
        .iter()
        .filter_map(|event| match event {
            TraceEvent::BudgetExhausted { deferred, .. } => Some(*deferred),
            _ => None,
        })
        .collect();
    assert_eq!(deferred, vec![3, 1]);
}

#[test]
fn test_listeners_see_events_live() {
    let lines = Rc::new(RefCell::new(Vec::new()));
    let lp = {
        let lines = lines.clone();
        EventLoop::builder()
            .on_event(move |event| {
                if let TraceEvent::Output { line, .. } = event {
                    lines.borrow_mut().push(line.clone());
                }
            })
            .build()
            .unwrap()
    };

    lp.run_main(|lp| lp.log("first")).unwrap();
    assert_eq!(*lines.borrow(), vec!["first"]);

    lp.set_immediate(|lp| lp.log("second"));
    lp.run().unwrap();
    assert_eq!(*lines.borrow(), vec!["first", "second"]);
}

#[test]
fn test_summary_counts_callbacks_per_phase() {
    let lp = with_startup(5);
    lp.run_main(|lp| {
        lp.set_timeout(Duration::ZERO, |_| ());
        lp.set_timeout(Duration::ZERO, |_| ());
        lp.set_immediate(|lp| lp.queue_microtask(|_| ()));
    })
    .unwrap();
    let summary = lp.run().unwrap();

    assert_eq!(summary.callbacks.get(&Phase::Timers), Some(&2));
    assert_eq!(summary.callbacks.get(&Phase::Check), Some(&1));
    assert_eq!(summary.microtasks, 1);
    assert_eq!(summary.elapsed, Duration::from_millis(5));
}

#[test]
fn test_trace_exports_json() {
    let lp = with_startup(0);
    lp.run_main(|lp| {
        lp.log("hello");
        lp.set_immediate(|lp| lp.log("world"));
    })
    .unwrap();
    lp.run().unwrap();

    let json = lp.trace().to_json().unwrap();
    let events: serde_json::Value = serde_json::from_str(&json).unwrap();
    let events = events.as_array().unwrap();

    assert_eq!(events[0]["kind"], "output");
    assert_eq!(events[0]["line"], "hello");
    assert_eq!(events[0]["context"], "main");
    assert!(events.iter().any(|e| e["kind"] == "loop_finished"));
}

#[test]
fn test_busy_saturates_virtual_clock() {
    let lp = EventLoop::new();
    lp.run_main(|lp| {
        lp.busy(Duration::from_millis(3));
        lp.busy(Duration::MAX);
        lp.busy(Duration::MAX);
    })
    .unwrap();

    assert_eq!(lp.now(), Duration::MAX);
}

#[test]
fn test_summary_covers_only_its_own_run() {
    let lp = with_startup(2);
    lp.run_main(|lp| {
        lp.queue_microtask(|_| ());
        lp.set_immediate(|lp| lp.queue_microtask(|_| ()));
    })
    .unwrap();

    let first = lp.run().unwrap();
    assert_eq!(first.microtasks, 1);
    assert_eq!(first.callbacks.get(&Phase::Check), Some(&1));
    assert_eq!(first.elapsed, Duration::from_millis(2));

    lp.set_timeout(Duration::from_millis(10), |lp| lp.queue_microtask(|_| ()));
    let second = lp.run().unwrap();
    assert_eq!(second.iterations, 2);
    assert_eq!(second.microtasks, 1);
    assert_eq!(second.callbacks.get(&Phase::Timers), Some(&1));
    assert_eq!(second.callbacks.get(&Phase::Check), None);
    assert_eq!(second.elapsed, Duration::from_millis(10));

    let idle = lp.run().unwrap();
    assert_eq!(idle.iterations, 0);
    assert_eq!(idle.microtasks, 0);
    assert!(idle.callbacks.is_empty());
    assert_eq!(idle.elapsed, Duration::ZERO);
}
