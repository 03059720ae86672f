use phaseloop_scheduler::{
    EventLoop, ExecContext, ExecutionMode, JobError, JobId, LoopConfig, Phase, StopReason,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

fn virtual_pool(size: usize) -> EventLoop {
    EventLoop::with_config(
        LoopConfig::builder()
            .pool_size(size)
            .startup_delay(Duration::ZERO)
            .build()
            .unwrap(),
    )
    .unwrap()
}

#[test]
fn test_pool_runs_at_most_k_jobs_at_once() {
    let lp = virtual_pool(4);
    let cost = Duration::from_millis(10);
    lp.run_main(|lp| {
        for i in 0..10u64 {
            lp.submit_job(cost, move || Ok(i * i), |lp, result: Result<u64, JobError>| {
                lp.log(format!("square {}", result.unwrap()));
            });
        }
    })
    .unwrap();
    lp.run().unwrap();

    assert_eq!(lp.output().len(), 10);

    let stats = lp.pool_stats();
    assert_eq!(stats.completed, 10);
    assert_eq!(stats.max_concurrent, 4);
    assert_eq!(stats.running, 0);
    assert_eq!(stats.queued, 0);

    let jobs = lp.trace().jobs();
    for ms in [0u64, 5, 10, 15, 20, 25] {
        let t = Duration::from_millis(ms);
        let running = jobs
            .iter()
            .filter(|job| job.started_at <= t && t < job.finished_at)
            .count();
        assert!(running <= 4, "{running} jobs running at {t:?}");
    }
}

#[test]
fn test_queued_jobs_start_in_submission_order() {
    let lp = virtual_pool(4);
    lp.run_main(|lp| {
        for _ in 0..10 {
            lp.submit_job(Duration::from_millis(10), || Ok(()), |_, _: Result<(), JobError>| ());
        }
    })
    .unwrap();
    lp.run().unwrap();

    let mut jobs = lp.trace().jobs();
    jobs.sort_by_key(|job| job.job);
    let starts: Vec<u64> = jobs
        .iter()
        .map(|job| job.started_at.as_millis() as u64)
        .collect();
    assert_eq!(starts, vec![0, 0, 0, 0, 10, 10, 10, 10, 20, 20]);
    assert!(starts.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(jobs.iter().all(|job| job.ok));
}

#[test]
fn test_completions_run_in_poll_phase() {
    let lp = virtual_pool(2);
    let contexts = Rc::new(RefCell::new(Vec::new()));

    {
        let contexts = contexts.clone();
        lp.run_main(move |lp| {
            for _ in 0..3 {
                let contexts = contexts.clone();
                lp.submit_job(Duration::from_millis(3), || Ok(()), move |lp, _: Result<(), JobError>| {
                    contexts.borrow_mut().push(lp.context());
                });
            }
        })
        .unwrap();
    }
    lp.run().unwrap();

    assert_eq!(
        *contexts.borrow(),
        vec![ExecContext::Phase(Phase::Poll); 3]
    );
}

#[test]
fn test_job_ids_are_sequential() {
    let lp = virtual_pool(1);
    let a = lp.submit_job(Duration::ZERO, || Ok(()), |_, _: Result<(), JobError>| ());
    let b = lp.submit_job(Duration::ZERO, || Ok(()), |_, _: Result<(), JobError>| ());

    assert_eq!(a, JobId(1));
    assert_eq!(b, JobId(2));
    assert_eq!(b.to_string(), "job-2");
}

#[test]
fn test_job_failure_is_delivered_to_completion() {
    let lp = virtual_pool(1);
    let seen = Rc::new(RefCell::new(None));

    {
        let seen = seen.clone();
        lp.submit_job(
            Duration::from_millis(1),
            || -> Result<u32, JobError> { Err(JobError::failed("disk on fire")) },
            move |_, result: Result<u32, JobError>| {
                *seen.borrow_mut() = Some(result);
            },
        );
    }
    let summary = lp.run().unwrap();

    assert_eq!(summary.reason, StopReason::Drained);
    let seen = seen.borrow();
    match seen.as_ref() {
        Some(Err(JobError::Failed(message))) => assert_eq!(message, "disk on fire"),
        other => panic!("unexpected completion: {other:?}"),
    }
    assert!(!lp.trace().jobs()[0].ok);
}

#[test]
fn test_job_panic_is_contained() {
    let lp = virtual_pool(1);
    lp.run_main(|lp| {
        lp.submit_job(
            Duration::from_millis(1),
            || -> Result<(), JobError> { panic!("worker exploded") },
            |lp, result: Result<(), JobError>| match result {
                Err(JobError::Panicked(message)) => lp.log(message),
                other => lp.log(format!("unexpected {other:?}")),
            },
        );
        lp.submit_job(Duration::from_millis(1), || Ok(7u8), |lp, result: Result<u8, JobError>| {
            lp.log(format!("next job got {}", result.unwrap()));
        });
    })
    .unwrap();
    lp.run().unwrap();

    assert_eq!(lp.output(), vec!["worker exploded", "next job got 7"]);
}

#[test]
fn test_pending_job_keeps_loop_alive() {
    let lp = virtual_pool(1);
    lp.submit_job(Duration::from_secs(3), || Ok(()), |lp, _: Result<(), JobError>| {
        lp.log(format!("done at {:?}", lp.now()));
    });
    lp.run().unwrap();

    assert_eq!(lp.output(), vec!["done at 3s"]);
}

#[test]
fn test_read_file_returns_contents() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml");
    let expected = std::fs::read(path).unwrap();
    let lp = virtual_pool(4);
    let got = Rc::new(RefCell::new(None));

    {
        let got = got.clone();
        lp.read_file(path, move |_, result| {
            *got.borrow_mut() = Some(result);
        });
    }
    lp.run().unwrap();

    let got = got.borrow_mut().take().unwrap().unwrap();
    assert_eq!(got, expected);
    // open, stat, read, close
    assert_eq!(lp.pool_stats().completed, 4);
}

#[test]
fn test_read_missing_file_reports_error() {
    let lp = virtual_pool(4);
    lp.read_file("/definitely/not/here.txt", |lp, result| match result {
        Ok(_) => lp.log("found"),
        Err(JobError::Io(_)) => lp.log("missing"),
        Err(other) => lp.log(format!("other: {other}")),
    });
    lp.run().unwrap();

    assert_eq!(lp.output(), vec!["missing"]);
    assert_eq!(lp.pool_stats().completed, 1);
}

#[test]
fn test_threaded_pool_runs_jobs() {
    let lp = EventLoop::with_config(
        LoopConfig::builder()
            .mode(ExecutionMode::Threaded)
            .pool_size(2)
            .thread_name_prefix("pool-test")
            .build()
            .unwrap(),
    )
    .unwrap();

    lp.run_main(|lp| {
        for i in 0..6u32 {
            lp.submit_job(
                Duration::ZERO,
                move || {
                    std::thread::sleep(Duration::from_millis(20));
                    let name = std::thread::current().name().unwrap_or("").to_string();
                    Ok((i, name))
                },
                |lp, result: Result<(u32, String), JobError>| {
                    let (i, name) = result.unwrap();
                    assert!(name.starts_with("pool-test-"), "ran on {name}");
                    assert_eq!(lp.context(), ExecContext::Phase(Phase::Poll));
                    lp.log(format!("job {i}"));
                },
            );
        }
    })
    .unwrap();
    lp.run().unwrap();

    let mut out = lp.output();
    out.sort();
    let expected: Vec<String> = (0..6).map(|i| format!("job {i}")).collect();
    assert_eq!(out, expected);

    let stats = lp.pool_stats();
    assert_eq!(stats.completed, 6);
    assert!(stats.max_concurrent <= 2);
    // Two workers, three rounds of 20ms each.
    assert!(lp.now() >= Duration::from_millis(60));
}

#[test]
fn test_huge_job_cost_saturates_virtual_time() {
    let lp = virtual_pool(1);
    lp.run_main(|lp| {
        lp.busy(Duration::from_millis(5));
        lp.submit_job(Duration::MAX, || Ok(()), |lp, result: Result<(), JobError>| {
            assert!(result.is_ok());
            lp.log("finished");
        });
    })
    .unwrap();
    lp.run().unwrap();

    assert_eq!(lp.output(), vec!["finished"]);
    let jobs = lp.trace().jobs();
    assert_eq!(jobs[0].started_at, Duration::from_millis(5));
    assert_eq!(jobs[0].finished_at, Duration::MAX);
}
