use super::{DemoOptions, run_script};
use anyhow::Result;
use phaseloop_scheduler::EventLoop;
use std::time::Duration;

/// Call stack first, then ticks, then microtasks. The zero timer and the
/// immediate race: which one wins depends on how long start-up took.
pub fn script(lp: &EventLoop) -> phaseloop_scheduler::Result<()> {
    lp.run_main(|lp| {
        lp.log("A) start (call stack)");
        lp.next_tick(|lp| lp.log("B) next_tick (tick queue, highest priority)"));
        lp.queue_microtask(|lp| lp.log("C) queue_microtask (microtask queue)"));
        lp.set_timeout(Duration::ZERO, |lp| {
            lp.log("D) set_timeout 0ms (timers phase)")
        });
        lp.set_immediate(|lp| lp.log("E) set_immediate (check phase)"));
        lp.log("F) end (call stack)");
    })
}

pub fn run(opts: &DemoOptions) -> Result<()> {
    run_script(opts, "basic order", opts.config().build()?, script)
}
