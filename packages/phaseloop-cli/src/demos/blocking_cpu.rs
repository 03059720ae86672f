use super::{DemoOptions, run_script};
use anyhow::Result;
use phaseloop_scheduler::EventLoop;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BUSY_MS: u64 = 1500;

/// Nothing queued can run while the main context is spinning.
pub fn script(lp: &EventLoop, path: PathBuf, busy: Duration) -> phaseloop_scheduler::Result<()> {
    lp.run_main(|lp| {
        lp.log("A) start (call stack)");
        lp.set_timeout(Duration::ZERO, |lp| {
            lp.log("B) set_timeout 0ms (timers phase)")
        });
        lp.set_immediate(|lp| lp.log("C) set_immediate (check phase)"));
        lp.read_file(path, |lp, _| lp.log("D) I/O callback (poll phase)"));

        let t0 = lp.now();
        lp.busy(busy);
        let dt = (lp.now() - t0).as_millis();
        lp.log(format!("E) finished busy loop (~{dt} ms), still on the call stack"));
    })
}

pub fn run(opts: &DemoOptions, busy_ms: u64) -> Result<()> {
    let path = std::env::current_exe()?;
    let busy = Duration::from_millis(busy_ms);
    run_script(opts, "blocking CPU", opts.config().build()?, |lp| {
        script(lp, path, busy)
    })
}
