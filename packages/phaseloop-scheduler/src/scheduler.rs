use crate::clock::{Clock, SystemClock, VirtualClock};
use crate::config::{ExecutionMode, LoopConfig};
use crate::error::{JobError, LoopError, Result, TaskError};
use crate::microtask::MicrotaskQueues;
use crate::phase::Phase;
use crate::pool::{
    Completer, JobId, JobOutput, PoolStats, ReadyJob, ThreadWorkers, VirtualWorkers, Work,
    WorkerBackend, WorkerPool,
};
use crate::queue::TaskQueue;
use crate::task::{Callback, ExecContext, IntoTaskResult, RepeatingCallback, Task, TaskResult};
use crate::timers::{MIN_DELAY, TIMEOUT_MAX, TimerCallback, TimerId, TimerList};
use crate::trace::{StopReason, Trace, TraceEvent, TraceListener};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::cell::{Cell, Ref, RefCell};
use std::time::Duration;

type JobOutcome = std::result::Result<JobOutput, JobError>;

pub type UncaughtHandler = Box<dyn FnMut(ExecContext, &TaskError)>;

/// What one call to `EventLoop::run` did. Every count covers that call only;
/// work done by `run_main` or by earlier runs is not included.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub iterations: u64,
    /// Loop time spent inside this run, start-up delay included.
    pub elapsed: Duration,
    pub callbacks: FxHashMap<Phase, u64>,
    pub microtasks: u64,
    pub reason: StopReason,
}

/// Single-threaded event loop: call stack, two microtask queues, six
/// macrotask phases and a worker pool.
///
/// All state sits behind `Cell`/`RefCell` so callbacks can schedule more work
/// through the `&EventLoop` they receive. No borrow is held while a callback
/// runs.
pub struct EventLoop {
    config: LoopConfig,
    clock: Box<dyn Clock>,
    seq: Cell<u64>,
    context: Cell<ExecContext>,
    microtasks: MicrotaskQueues,
    timers: RefCell<TimerList>,
    pending: TaskQueue,
    prepare: TaskQueue,
    poll: TaskQueue,
    immediates: TaskQueue,
    closing: TaskQueue,
    pool: RefCell<WorkerPool>,
    trace: RefCell<Trace>,
    listeners: RefCell<Vec<TraceListener>>,
    uncaught: RefCell<Option<UncaughtHandler>>,
    rng: RefCell<StdRng>,
    started: Cell<bool>,
    stopped: Cell<bool>,
    iteration: Cell<u64>,
    callbacks: RefCell<FxHashMap<Phase, u64>>,
    microtasks_run: Cell<u64>,
}

impl EventLoop {
    /// A deterministic loop with default settings.
    pub fn new() -> Self {
        let config = LoopConfig::default();
        let workers = Box::new(VirtualWorkers::new(config.pool_size));
        Self::from_parts(config, Box::new(VirtualClock::new()), workers)
    }

    pub fn with_config(config: LoopConfig) -> Result<Self> {
        EventLoopBuilder::new().config(config).build()
    }

    pub fn builder() -> EventLoopBuilder {
        EventLoopBuilder::new()
    }

    fn from_parts(
        config: LoopConfig,
        clock: Box<dyn Clock>,
        workers: Box<dyn WorkerBackend>,
    ) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            clock,
            seq: Cell::new(0),
            context: Cell::new(ExecContext::Main),
            microtasks: MicrotaskQueues::new(),
            timers: RefCell::new(TimerList::new()),
            pending: TaskQueue::new(),
            prepare: TaskQueue::new(),
            poll: TaskQueue::new(),
            immediates: TaskQueue::new(),
            closing: TaskQueue::new(),
            pool: RefCell::new(WorkerPool::new(workers)),
            trace: RefCell::new(Trace::new()),
            listeners: RefCell::new(Vec::new()),
            uncaught: RefCell::new(None),
            rng: RefCell::new(rng),
            started: Cell::new(false),
            stopped: Cell::new(false),
            iteration: Cell::new(0),
            callbacks: RefCell::new(FxHashMap::default()),
            microtasks_run: Cell::new(0),
        }
    }

    // ---- observation ----

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Current loop time.
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn context(&self) -> ExecContext {
        self.context.get()
    }

    pub fn iteration(&self) -> u64 {
        self.iteration.get()
    }

    pub fn trace(&self) -> Ref<'_, Trace> {
        self.trace.borrow()
    }

    pub fn output(&self) -> Vec<String> {
        self.trace.borrow().output()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.borrow().stats()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Records an output line stamped with loop time and the running context.
    pub fn log(&self, line: impl Into<String>) {
        self.record(TraceEvent::Output {
            at: self.clock.now(),
            context: self.context.get(),
            line: line.into(),
        });
    }

    fn record(&self, event: TraceEvent) {
        let mut trace = self.trace.borrow_mut();
        trace.push(event);
        if let Some(event) = trace.last() {
            for listener in self.listeners.borrow_mut().iter_mut() {
                listener(event);
            }
        }
    }

    fn next_seq(&self) -> u64 {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        seq
    }

    // ---- scheduling ----

    /// Queues a high-priority microtask.
    pub fn next_tick<F, R>(&self, f: F)
    where
        F: FnOnce(&EventLoop) -> R + 'static,
        R: IntoTaskResult,
    {
        self.microtasks.push_tick(Task::new(self.next_seq(), f));
    }

    /// Queues a normal microtask; runs after every queued tick.
    pub fn queue_microtask<F, R>(&self, f: F)
    where
        F: FnOnce(&EventLoop) -> R + 'static,
        R: IntoTaskResult,
    {
        self.microtasks.push_microtask(Task::new(self.next_seq(), f));
    }

    pub fn set_timeout<F, R>(&self, delay: Duration, f: F) -> TimerId
    where
        F: FnOnce(&EventLoop) -> R + 'static,
        R: IntoTaskResult,
    {
        let delay = self.clamp_delay(delay);
        let callback: Callback = Box::new(move |lp: &EventLoop| f(lp).into_task_result());
        self.timers.borrow_mut().insert(
            self.clock.now().saturating_add(delay),
            self.next_seq(),
            None,
            TimerCallback::Once(callback),
        )
    }

    pub fn set_interval<F, R>(&self, interval: Duration, mut f: F) -> TimerId
    where
        F: FnMut(&EventLoop) -> R + 'static,
        R: IntoTaskResult,
    {
        let interval = self.clamp_delay(interval);
        let callback: RepeatingCallback = Box::new(move |lp: &EventLoop| f(lp).into_task_result());
        self.timers.borrow_mut().insert(
            self.clock.now().saturating_add(interval),
            self.next_seq(),
            Some(interval),
            TimerCallback::Every(callback),
        )
    }

    /// Cancels a timer. Returns false if it already fired or was cleared.
    pub fn clear_timer(&self, id: TimerId) -> bool {
        self.timers.borrow_mut().clear(id)
    }

    /// Keeps the timer armed but stops it from keeping the loop alive.
    pub fn unref_timer(&self, id: TimerId) -> bool {
        self.timers.borrow_mut().unref(id)
    }

    /// Queues a callback for the next check phase.
    pub fn set_immediate<F, R>(&self, f: F)
    where
        F: FnOnce(&EventLoop) -> R + 'static,
        R: IntoTaskResult,
    {
        self.immediates.push(Task::new(self.next_seq(), f));
    }

    /// Queues a callback on one of the queue-driven phases. Posting to `Poll`
    /// stands for an I/O event becoming ready.
    pub fn post<F, R>(&self, phase: Phase, f: F) -> Result<()>
    where
        F: FnOnce(&EventLoop) -> R + 'static,
        R: IntoTaskResult,
    {
        let queue = match phase {
            Phase::PendingCallbacks => &self.pending,
            Phase::IdlePrepare => &self.prepare,
            Phase::Poll => &self.poll,
            Phase::CloseCallbacks => &self.closing,
            Phase::Timers | Phase::Check => return Err(LoopError::UnsupportedPhase(phase)),
        };
        queue.push(Task::new(self.next_seq(), f));
        Ok(())
    }

    /// Hands `work` to the worker pool. `done` runs in a later poll phase
    /// with the job's result; `work` never sees the loop.
    pub fn submit_job<T, W, D, R>(&self, cost: Duration, work: W, done: D) -> JobId
    where
        T: Send + 'static,
        W: FnOnce() -> std::result::Result<T, JobError> + Send + 'static,
        D: FnOnce(&EventLoop, std::result::Result<T, JobError>) -> R + 'static,
        R: IntoTaskResult,
    {
        let work: Work = Box::new(move || work().map(|value| Box::new(value) as JobOutput));
        let complete: Completer = Box::new(move |lp: &EventLoop, outcome: JobOutcome| {
            let outcome = outcome.and_then(|output: JobOutput| {
                output
                    .downcast::<T>()
                    .map(|value| *value)
                    .map_err(|_| JobError::OutputMismatch)
            });
            done(lp, outcome).into_task_result()
        });

        let now = self.clock.now();
        let id = self.pool.borrow_mut().submit(cost, work, complete, now);
        self.record(TraceEvent::JobQueued { job: id, at: now });
        id
    }

    /// Blocks the main context for `duration`. Nothing else runs meanwhile.
    pub fn busy(&self, duration: Duration) {
        self.clock.spin(duration);
    }

    /// Asks `run` to return after the current iteration.
    pub fn stop(&self) {
        self.stopped.set(true);
    }

    fn clamp_delay(&self, delay: Duration) -> Duration {
        if delay > TIMEOUT_MAX {
            tracing::warn!(?delay, "timeout does not fit, using 1ms");
            self.record(TraceEvent::TimeoutOverflow { requested: delay });
            MIN_DELAY
        } else {
            delay.max(MIN_DELAY)
        }
    }

    // ---- execution ----

    fn enter<T>(&self, context: ExecContext, f: impl FnOnce() -> T) -> T {
        let previous = self.context.replace(context);
        let result = f();
        self.context.set(previous);
        result
    }

    /// Runs top-level synchronous code, then drains both microtask queues.
    pub fn run_main<F, R>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&EventLoop) -> R,
        R: IntoTaskResult,
    {
        if let Err(error) = self.enter(ExecContext::Main, || f(self).into_task_result()) {
            self.raise(ExecContext::Main, error)?;
        }
        self.drain_microtasks();
        Ok(())
    }

    fn drain_microtasks(&self) {
        let ran = self.microtasks.drain(|context, task| {
            if let Err(error) = self.enter(context, || task.run(self)) {
                tracing::warn!(%context, %error, "unhandled rejection");
                self.record(TraceEvent::UnhandledRejection {
                    context,
                    message: error.to_string(),
                });
            }
        });
        self.microtasks_run
            .set(self.microtasks_run.get() + ran as u64);
    }

    /// Routes a failed callback to the uncaught handler, or fails the run.
    fn raise(&self, context: ExecContext, error: TaskError) -> Result<()> {
        let mut handler = self.uncaught.borrow_mut();
        let handled = handler.is_some();
        if let Some(handler) = handler.as_mut() {
            handler(context, &error);
        }
        drop(handler);

        self.record(TraceEvent::UncaughtException {
            context,
            message: error.to_string(),
            handled,
        });
        if handled {
            Ok(())
        } else {
            tracing::error!(%context, %error, "uncaught error");
            Err(LoopError::Uncaught {
                context,
                source: error,
            })
        }
    }

    /// Runs one macrotask callback and the microtasks it leaves behind.
    /// Returns false when the callback failed and the phase must stop.
    fn dispatch(&self, phase: Phase, run: impl FnOnce() -> TaskResult) -> Result<bool> {
        let context = ExecContext::Phase(phase);
        let outcome = self.enter(context, run);
        *self.callbacks.borrow_mut().entry(phase).or_insert(0) += 1;
        let keep_going = match outcome {
            Ok(()) => true,
            Err(error) => {
                self.raise(context, error)?;
                false
            }
        };
        self.drain_microtasks();
        Ok(keep_going)
    }

    fn budget(&self, phase: Phase, due: usize) -> usize {
        let cap = self.config.max_callbacks_per_phase;
        if due > cap {
            tracing::warn!(%phase, due, cap, "phase budget exhausted");
            self.record(TraceEvent::BudgetExhausted {
                iteration: self.iteration.get(),
                phase,
                deferred: due - cap,
            });
        }
        due.min(cap)
    }

    fn finish_phase(&self, phase: Phase, callbacks: usize) {
        if callbacks == 0 {
            return;
        }
        tracing::debug!(%phase, callbacks, iteration = self.iteration.get(), "phase done");
        self.record(TraceEvent::PhaseCompleted {
            iteration: self.iteration.get(),
            phase,
            callbacks,
            at: self.clock.now(),
        });
    }

    /// Runs the callbacks queued before the phase began, up to the budget.
    fn run_queue(&self, phase: Phase, queue: &TaskQueue) -> Result<()> {
        let limit = self.budget(phase, queue.len());
        let mut ran = 0;
        while ran < limit {
            let Some(task) = queue.pop() else {
                break;
            };
            ran += 1;
            if !self.dispatch(phase, || task.run(self))? {
                break;
            }
        }
        self.finish_phase(phase, ran);
        Ok(())
    }

    fn run_timers(&self, now: Duration) -> Result<()> {
        let limit = self.budget(Phase::Timers, self.timers.borrow().due_count(now));
        let mut ran = 0;
        while ran < limit {
            let due = self.timers.borrow_mut().pop_due(now);
            let Some((id, callback)) = due else {
                break;
            };
            ran += 1;
            let keep_going = match callback {
                TimerCallback::Once(callback) => {
                    self.dispatch(Phase::Timers, || callback(self))?
                }
                TimerCallback::Every(mut callback) => {
                    let keep_going = self.dispatch(Phase::Timers, || callback(self));
                    let seq = self.next_seq();
                    self.timers.borrow_mut().rearm(id, callback, now, seq);
                    keep_going?
                }
            };
            if !keep_going {
                break;
            }
        }
        self.finish_phase(Phase::Timers, ran);
        Ok(())
    }

    fn run_poll(&self) -> Result<()> {
        let ready = self.pool.borrow_mut().collect(self.clock.now());
        self.enqueue_ready(ready);

        if self.poll.is_empty() && self.may_block() {
            let deadline = self.timers.borrow().next_deadline();
            let from = self.clock.now();
            let in_flight = self.pool.borrow().in_flight() > 0;
            if in_flight {
                let ready = self.pool.borrow_mut().wait(&*self.clock, deadline);
                self.enqueue_ready(ready);
            } else if let Some(deadline) = deadline {
                self.clock.sleep_until(deadline);
            }
            let until = self.clock.now();
            if until > from {
                self.record(TraceEvent::LoopBlocked { from, until });
            }
        }

        self.run_queue(Phase::Poll, &self.poll)
    }

    /// Polling may only block when no other phase has work waiting.
    fn may_block(&self) -> bool {
        !self.stopped.get()
            && self.immediates.is_empty()
            && self.pending.is_empty()
            && self.prepare.is_empty()
            && self.closing.is_empty()
    }

    fn enqueue_ready(&self, ready: Vec<ReadyJob>) {
        for job in ready {
            self.record(TraceEvent::JobCompleted {
                job: job.id,
                slot: job.slot,
                started_at: job.started_at,
                finished_at: job.finished_at,
                ok: job.outcome.is_ok(),
            });
            let ReadyJob {
                outcome, complete, ..
            } = job;
            self.poll.push(Task::from_callback(
                self.next_seq(),
                Box::new(move |lp: &EventLoop| complete(lp, outcome)),
            ));
        }
    }

    fn is_alive(&self) -> bool {
        self.timers.borrow().has_refed()
            || !self.pending.is_empty()
            || !self.prepare.is_empty()
            || !self.poll.is_empty()
            || !self.immediates.is_empty()
            || !self.closing.is_empty()
            || self.pool.borrow().has_work()
    }

    fn startup(&self) {
        if self.started.replace(true) {
            return;
        }
        let delay = if self.clock.is_virtual() {
            let delay = self.config.startup_delay.unwrap_or_else(|| {
                let max = self.config.startup_jitter.as_micros() as u64;
                Duration::from_micros(self.rng.borrow_mut().gen_range(0..=max))
            });
            self.clock.spin(delay);
            delay
        } else {
            Duration::ZERO
        };
        tracing::info!(startup_delay = ?delay, pool_size = self.pool.borrow().size(), "event loop started");
        self.record(TraceEvent::LoopStarted {
            at: self.clock.now(),
            startup_delay: delay,
        });
    }

    fn run_iteration(&self) -> Result<()> {
        let now = self.clock.now();
        self.run_timers(now)?;
        self.run_queue(Phase::PendingCallbacks, &self.pending)?;
        self.run_queue(Phase::IdlePrepare, &self.prepare)?;
        self.run_poll()?;
        self.run_queue(Phase::Check, &self.immediates)?;
        self.run_queue(Phase::CloseCallbacks, &self.closing)?;
        Ok(())
    }

    /// Cycles through the phases until nothing keeps the loop alive, `stop`
    /// is called, or `max_iterations` is reached.
    pub fn run(&self) -> Result<RunSummary> {
        let started_at = self.clock.now();
        let microtasks_before = self.microtasks_run.get();
        let callbacks_before = self.callbacks.borrow().clone();

        self.startup();
        self.drain_microtasks();
        let first_iteration = self.iteration.get();

        let reason = loop {
            if self.stopped.replace(false) {
                break StopReason::Stopped;
            }
            if !self.is_alive() {
                break StopReason::Drained;
            }
            if let Some(max) = self.config.max_iterations {
                if self.iteration.get() - first_iteration >= max {
                    break StopReason::IterationLimit;
                }
            }
            self.run_iteration()?;
            self.iteration.set(self.iteration.get() + 1);
        };

        let callbacks = self
            .callbacks
            .borrow()
            .iter()
            .filter_map(|(&phase, &total)| {
                let ran = total - callbacks_before.get(&phase).copied().unwrap_or(0);
                (ran > 0).then_some((phase, ran))
            })
            .collect();
        let finished_at = self.clock.now();
        let summary = RunSummary {
            iterations: self.iteration.get() - first_iteration,
            elapsed: finished_at.saturating_sub(started_at),
            callbacks,
            microtasks: self.microtasks_run.get() - microtasks_before,
            reason,
        };
        tracing::info!(iterations = summary.iterations, ?reason, "event loop finished");
        self.record(TraceEvent::LoopFinished {
            at: finished_at,
            iterations: summary.iterations,
            reason,
        });
        Ok(summary)
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// Assembles an `EventLoop` from a config plus optional injected parts.
#[derive(Default)]
pub struct EventLoopBuilder {
    config: LoopConfig,
    clock: Option<Box<dyn Clock>>,
    workers: Option<Box<dyn WorkerBackend>>,
    listeners: Vec<TraceListener>,
    uncaught: Option<UncaughtHandler>,
}

impl EventLoopBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn workers(mut self, workers: Box<dyn WorkerBackend>) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Observes every trace event as it is recorded.
    pub fn on_event(mut self, listener: impl FnMut(&TraceEvent) + 'static) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }

    /// Catches errors from main code and macrotask callbacks instead of
    /// failing the run.
    pub fn on_uncaught(mut self, handler: impl FnMut(ExecContext, &TaskError) + 'static) -> Self {
        self.uncaught = Some(Box::new(handler));
        self
    }

    pub fn build(self) -> Result<EventLoop> {
        self.config.validate()?;

        let (clock, workers): (Box<dyn Clock>, Box<dyn WorkerBackend>) = match self.config.mode {
            ExecutionMode::Virtual => {
                let clock = self.clock.unwrap_or_else(|| Box::new(VirtualClock::new()));
                let workers = self
                    .workers
                    .unwrap_or_else(|| Box::new(VirtualWorkers::new(self.config.pool_size)));
                (clock, workers)
            }
            ExecutionMode::Threaded => {
                let system = SystemClock::new();
                let workers = match self.workers {
                    Some(workers) => workers,
                    None => Box::new(ThreadWorkers::spawn(
                        self.config.pool_size,
                        &self.config.thread_name_prefix,
                        system.origin(),
                    )?),
                };
                let clock = self.clock.unwrap_or_else(|| Box::new(system));
                (clock, workers)
            }
        };

        let lp = EventLoop::from_parts(self.config, clock, workers);
        *lp.listeners.borrow_mut() = self.listeners;
        *lp.uncaught.borrow_mut() = self.uncaught;
        Ok(lp)
    }
}
