use crate::error::{LoopError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable that sizes the worker pool.
pub const THREADPOOL_SIZE_ENV: &str = "UV_THREADPOOL_SIZE";
pub const DEFAULT_POOL_SIZE: usize = 4;
pub const MAX_POOL_SIZE: usize = 1024;

/// How the loop measures time and runs pool jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Virtual clock and simulated workers. Fully deterministic.
    #[default]
    Virtual,
    /// Wall clock and real worker threads.
    Threaded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub mode: ExecutionMode,
    pub pool_size: usize,
    /// Fairness cap: callbacks one phase may run per iteration.
    pub max_callbacks_per_phase: usize,
    /// Fixed start-up delay. When unset, it is drawn from `0..=startup_jitter`.
    pub startup_delay: Option<Duration>,
    pub startup_jitter: Duration,
    pub seed: u64,
    /// Cost of one file-system round trip on the pool.
    pub fs_op_cost: Duration,
    pub max_iterations: Option<u64>,
    pub thread_name_prefix: String,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Virtual,
            pool_size: DEFAULT_POOL_SIZE,
            max_callbacks_per_phase: 1024,
            startup_delay: None,
            startup_jitter: Duration::from_millis(2),
            seed: 0,
            fs_op_cost: Duration::from_millis(1),
            max_iterations: None,
            thread_name_prefix: "phaseloop-worker".to_string(),
        }
    }
}

impl LoopConfig {
    pub fn builder() -> LoopConfigBuilder {
        LoopConfigBuilder::new()
    }

    /// Defaults, with the pool size taken from `UV_THREADPOOL_SIZE` when set.
    pub fn from_env() -> Self {
        let value = std::env::var(THREADPOOL_SIZE_ENV).ok();
        Self {
            pool_size: pool_size_from(value.as_deref()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(LoopError::config("pool_size must be > 0"));
        }
        if self.pool_size > MAX_POOL_SIZE {
            return Err(LoopError::config(format!(
                "pool_size too large (max {MAX_POOL_SIZE})"
            )));
        }
        if self.max_callbacks_per_phase == 0 {
            return Err(LoopError::config("max_callbacks_per_phase must be > 0"));
        }
        if self.max_iterations == Some(0) {
            return Err(LoopError::config("max_iterations must be > 0 when set"));
        }
        Ok(())
    }
}

/// Interprets a `UV_THREADPOOL_SIZE` value. Unset means the default;
/// anything unparsable or below one becomes one; large values are capped.
pub fn pool_size_from(value: Option<&str>) -> usize {
    let Some(raw) = value else {
        return DEFAULT_POOL_SIZE;
    };
    match raw.trim().parse::<i64>() {
        Ok(n) if n < 1 => 1,
        Ok(n) => (n as u64).min(MAX_POOL_SIZE as u64) as usize,
        Err(_) => {
            tracing::warn!("ignoring non-numeric {}={:?}", THREADPOOL_SIZE_ENV, raw);
            1
        }
    }
}

/// Logical CPUs on this machine.
pub fn cpu_count() -> usize {
    num_cpus::get()
}

#[derive(Debug, Default)]
pub struct LoopConfigBuilder {
    config: LoopConfig,
}

impl LoopConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: LoopConfig::default(),
        }
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn pool_size(mut self, n: usize) -> Self {
        self.config.pool_size = n;
        self
    }

    pub fn max_callbacks_per_phase(mut self, n: usize) -> Self {
        self.config.max_callbacks_per_phase = n;
        self
    }

    pub fn startup_delay(mut self, delay: Duration) -> Self {
        self.config.startup_delay = Some(delay);
        self
    }

    pub fn startup_jitter(mut self, jitter: Duration) -> Self {
        self.config.startup_jitter = jitter;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn fs_op_cost(mut self, cost: Duration) -> Self {
        self.config.fs_op_cost = cost;
        self
    }

    pub fn max_iterations(mut self, n: u64) -> Self {
        self.config.max_iterations = Some(n);
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn build(self) -> Result<LoopConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
