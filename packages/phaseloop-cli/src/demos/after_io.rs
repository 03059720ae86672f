use super::{DemoOptions, run_script};
use anyhow::Result;
use phaseloop_scheduler::EventLoop;
use std::path::PathBuf;
use std::time::Duration;

/// Once the loop is in the poll phase, check comes before the next timers
/// phase, so the immediate always wins.
pub fn script(lp: &EventLoop, path: PathBuf) -> phaseloop_scheduler::Result<()> {
    lp.run_main(|lp| {
        lp.read_file(path, |lp, contents| {
            let size = contents.map(|bytes| bytes.len()).unwrap_or(0);
            lp.log(format!("A) I/O callback (poll phase, {size} bytes)"));
            lp.set_timeout(Duration::ZERO, |lp| {
                lp.log("B) set_timeout 0ms (timers phase)")
            });
            lp.set_immediate(|lp| lp.log("C) set_immediate (check phase)"));
        });
    })
}

pub fn run(opts: &DemoOptions) -> Result<()> {
    let path = std::env::current_exe()?;
    run_script(opts, "after I/O", opts.config().build()?, |lp| {
        script(lp, path)
    })
}
