use super::{DemoOptions, run_script};
use anyhow::Result;
use clap::Args;
use phaseloop_scheduler::config::{DEFAULT_POOL_SIZE, THREADPOOL_SIZE_ENV, cpu_count};
use phaseloop_scheduler::{EventLoop, ExecutionMode, JobError, TaskResult};
use sha2::Sha512;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

const KEY_LEN: usize = 64;
pub const DEFAULT_JOBS: usize = 128;

#[derive(Args, Debug, Clone)]
pub struct ThreadpoolArgs {
    /// Number of jobs to submit
    #[arg(long, default_value_t = DEFAULT_JOBS)]
    pub jobs: usize,

    /// PBKDF2 rounds per job
    #[arg(long, default_value_t = 200_000)]
    pub iterations: u32,

    /// Running time of one job on the virtual clock
    #[arg(long, default_value_t = 250)]
    pub job_cost_ms: u64,

    /// Use real worker threads and the wall clock
    #[arg(long)]
    pub threads: bool,
}

impl Default for ThreadpoolArgs {
    fn default() -> Self {
        Self {
            jobs: DEFAULT_JOBS,
            iterations: 200_000,
            job_cost_ms: 250,
            threads: false,
        }
    }
}

fn derive_key(rounds: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha512>(b"password", b"salt", rounds, &mut key);
    key
}

/// Submits `args.jobs` key derivations and reports each one as it lands.
/// A long heartbeat interval holds the loop open until the last job is in.
pub fn script(lp: &EventLoop, args: &ThreadpoolArgs) -> phaseloop_scheduler::Result<()> {
    lp.run_main(|lp| {
        let configured = std::env::var(THREADPOOL_SIZE_ENV).ok();
        lp.log(format!("PID = {}", std::process::id()));
        lp.log(format!(
            "{THREADPOOL_SIZE_ENV} = {} (default {DEFAULT_POOL_SIZE}, pool of {})",
            configured.as_deref().unwrap_or("unset"),
            lp.pool_stats().size
        ));
        lp.log(format!("Logical CPUs = {}", cpu_count()));
        lp.log(format!("Starting {} pbkdf2 jobs...", args.jobs));

        if args.jobs == 0 {
            return;
        }

        let start = lp.now();
        let total = args.jobs;
        let done = Rc::new(Cell::new(0usize));
        let heartbeat = lp.set_interval(Duration::from_secs(10), |_| ());

        for i in 1..=total {
            let done = done.clone();
            let rounds = args.iterations;
            lp.submit_job(
                Duration::from_millis(args.job_cost_ms),
                move || Ok(derive_key(rounds)),
                move |lp: &EventLoop, key: Result<[u8; KEY_LEN], JobError>| -> TaskResult {
                    key?;
                    let elapsed = (lp.now() - start).as_secs_f64();
                    lp.log(format!("job-{i} done at +{elapsed:.2}s"));

                    done.set(done.get() + 1);
                    if done.get() == total {
                        lp.clear_timer(heartbeat);
                        lp.log("All jobs done. Exiting.");
                    }
                    Ok(())
                },
            );
        }
    })
}

pub fn run(opts: &DemoOptions, args: &ThreadpoolArgs) -> Result<()> {
    let mut config = opts.config();
    if args.threads {
        config = config.mode(ExecutionMode::Threaded);
    }
    run_script(opts, "thread pool", config.build()?, |lp| script(lp, args))
}
