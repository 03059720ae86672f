use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod demos;

use demos::DemoOptions;

#[derive(Parser)]
#[command(name = "phaseloop")]
#[command(about = "Walk through event loop ordering demos", long_about = None)]
struct Cli {
    #[command(flatten)]
    options: GlobalArgs,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Seed for the start-up jitter
    #[arg(long, default_value_t = 0, global = true)]
    seed: u64,

    /// Fixed start-up delay in milliseconds instead of a random one
    #[arg(long, global = true)]
    startup_delay_ms: Option<u64>,

    /// Worker pool size (defaults to UV_THREADPOOL_SIZE or 4)
    #[arg(long, global = true)]
    pool_size: Option<usize>,

    /// Print the full trace as JSON instead of live output
    #[arg(long, global = true)]
    json: bool,

    /// Prefix each line with loop time and context
    #[arg(long, global = true)]
    timestamps: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Call stack, ticks, microtasks, then the timer/immediate race
    BasicOrder,
    /// Immediate beats a zero timer inside an I/O callback
    AfterIo,
    /// Nested ticks run before nested microtasks
    TicksVsPromises,
    /// A busy main context holds back timers, immediates and I/O
    BlockingCpu {
        /// How long to block, in milliseconds
        #[arg(long, default_value_t = 1500)]
        busy_ms: u64,
    },
    /// CPU-heavy jobs sharing a fixed worker pool
    Threadpool {
        #[command(flatten)]
        args: demos::threadpool::ThreadpoolArgs,
    },
    /// Run every demo in order
    All,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let opts = DemoOptions {
        seed: cli.options.seed,
        startup_delay_ms: cli.options.startup_delay_ms,
        pool_size: cli.options.pool_size,
        json: cli.options.json,
        timestamps: cli.options.timestamps,
    };

    match &cli.command {
        Commands::BasicOrder => demos::basic_order::run(&opts)?,
        Commands::AfterIo => demos::after_io::run(&opts)?,
        Commands::TicksVsPromises => demos::ticks_vs_promises::run(&opts)?,
        Commands::BlockingCpu { busy_ms } => demos::blocking_cpu::run(&opts, *busy_ms)?,
        Commands::Threadpool { args } => demos::threadpool::run(&opts, args)?,
        Commands::All => demos::run_all(&opts)?,
    }

    Ok(())
}
