//! The ordering demos, one module each.
//!
//! Every demo is split into a `script` that schedules work on a loop it is
//! given and a `run` that builds the loop from the command line options,
//! prints as events arrive and dumps the trace when asked.

pub mod after_io;
pub mod basic_order;
pub mod blocking_cpu;
pub mod threadpool;
pub mod ticks_vs_promises;

use anyhow::Result;
use phaseloop_scheduler::{EventLoop, LoopConfig, LoopConfigBuilder, TraceEvent};
use std::time::Duration;

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct DemoOptions {
    pub seed: u64,
    pub startup_delay_ms: Option<u64>,
    pub pool_size: Option<usize>,
    pub json: bool,
    pub timestamps: bool,
}

impl DemoOptions {
    /// Loop settings from the flags, falling back to `UV_THREADPOOL_SIZE`.
    pub fn config(&self) -> LoopConfigBuilder {
        let pool_size = self
            .pool_size
            .unwrap_or_else(|| LoopConfig::from_env().pool_size);
        let builder = LoopConfig::builder().seed(self.seed).pool_size(pool_size);
        match self.startup_delay_ms {
            Some(ms) => builder.startup_delay(Duration::from_millis(ms)),
            None => builder,
        }
    }

    fn event_loop(&self, config: LoopConfig) -> Result<EventLoop> {
        let mut builder = EventLoop::builder().config(config);
        if !self.json {
            let timestamps = self.timestamps;
            builder = builder.on_event(move |event| print_event(event, timestamps));
        }
        Ok(builder.build()?)
    }
}

fn print_event(event: &TraceEvent, timestamps: bool) {
    let TraceEvent::Output { at, context, line } = event else {
        return;
    };
    if timestamps {
        let context = context.to_string();
        println!("[{:>10.3}ms | {context:<22}] {line}", at.as_secs_f64() * 1000.0);
    } else {
        println!("{line}");
    }
}

/// Builds a loop, runs `script` on it and drives it to completion.
pub(crate) fn run_script<F>(
    opts: &DemoOptions,
    title: &str,
    config: LoopConfig,
    script: F,
) -> Result<()>
where
    F: FnOnce(&EventLoop) -> phaseloop_scheduler::Result<()>,
{
    if !opts.json {
        println!("== {title} ==");
    }
    let lp = opts.event_loop(config)?;
    script(&lp)?;
    let summary = lp.run()?;
    tracing::info!(
        demo = title,
        iterations = summary.iterations,
        elapsed = ?summary.elapsed,
        "demo finished"
    );

    if opts.json {
        println!("{}", lp.trace().to_json()?);
    } else {
        println!();
    }
    Ok(())
}

pub fn run_all(opts: &DemoOptions) -> Result<()> {
    basic_order::run(opts)?;
    after_io::run(opts)?;
    ticks_vs_promises::run(opts)?;
    blocking_cpu::run(opts, blocking_cpu::DEFAULT_BUSY_MS)?;
    threadpool::run(opts, &threadpool::ThreadpoolArgs::default())
}

#[cfg(test)]
pub(crate) fn test_loop(startup_ms: u64) -> EventLoop {
    let config = LoopConfig::builder()
        .startup_delay(Duration::from_millis(startup_ms))
        .build()
        .unwrap();
    EventLoop::with_config(config).unwrap()
}

/// Leading label of each output line, e.g. `"A"` for `"A) start"`.
#[cfg(test)]
pub(crate) fn labels(lp: &EventLoop) -> Vec<String> {
    lp.output()
        .iter()
        .map(|line| line.split(')').next().unwrap_or_default().to_string())
        .collect()
}
