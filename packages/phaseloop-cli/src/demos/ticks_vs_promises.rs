use super::{DemoOptions, run_script};
use anyhow::Result;
use phaseloop_scheduler::EventLoop;
use std::time::Duration;

pub fn script(lp: &EventLoop) -> phaseloop_scheduler::Result<()> {
    lp.run_main(|lp| {
        lp.log("A) start (call stack)");
        lp.queue_microtask(|lp| {
            lp.log("C) microtask 1");
            lp.queue_microtask(|lp| lp.log("E) microtask 2 (nested)"));
        });
        lp.next_tick(|lp| {
            lp.log("B) next_tick (highest priority)");
            lp.next_tick(|lp| lp.log("D) next_tick (nested)"));
        });
        lp.set_timeout(Duration::ZERO, |lp| {
            lp.log("F) set_timeout 0ms (timers phase)")
        });
    })
}

pub fn run(opts: &DemoOptions) -> Result<()> {
    run_script(opts, "ticks vs promises", opts.config().build()?, script)
}
