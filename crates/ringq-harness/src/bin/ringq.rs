//! CLI entrypoint for the ringq oracle harness.

use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use ringq_harness::report::Reporter;
use ringq_harness::runner::{CommandRunner, RunnerConfig};

/// Correctness-oracle harness for the ringq queue engine.
#[derive(Debug, Parser)]
#[command(name = "ringq")]
#[command(about = "Run queue-engine command scripts under fault injection")]
struct Cli {
    /// Read commands from this script instead of stdin.
    #[arg(short = 'f', long)]
    file: Option<PathBuf>,
    /// Verbosity level (1 = errors only, 5 = everything).
    #[arg(short = 'v', long, default_value_t = 3)]
    verbosity: u8,
    /// Write a JSONL artifact log to this path.
    #[arg(short = 'l', long)]
    log: Option<PathBuf>,
    /// Seed for the run RNG and the injector's probabilistic path.
    #[arg(long, default_value_t = 0x5EED)]
    seed: u64,
    /// Watchdog budget per operation, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    time_limit_ms: u64,
    /// Queue size above which teardown runs with cautious diagnostics off.
    #[arg(long, default_value_t = 30)]
    big_queue: usize,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let script = match &cli.file {
        Some(path) => match fs::read_to_string(path) {
            Ok(s) => s,
            Err(err) => {
                eprintln!("cannot read {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => {
            let mut s = String::new();
            if let Err(err) = std::io::stdin().read_to_string(&mut s) {
                eprintln!("cannot read stdin: {err}");
                return ExitCode::FAILURE;
            }
            s
        }
    };

    let mut reporter = Reporter::new(cli.verbosity);
    if let Some(path) = &cli.log {
        match fs::File::create(path) {
            Ok(f) => reporter = reporter.with_artifact(Box::new(f)),
            Err(err) => {
                eprintln!("cannot create {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        }
    }

    let config = RunnerConfig {
        seed: cli.seed,
        time_limit: Duration::from_millis(cli.time_limit_ms),
        big_queue: cli.big_queue,
        ..RunnerConfig::default()
    };
    let mut runner = CommandRunner::new(config, reporter);
    let completed = runner.run_script(&script);
    let clean = runner.finish();

    let score = runner.scorecard();
    println!(
        "{}: {} checks passed, {} failed",
        if completed && clean { "PASS" } else { "FAIL" },
        score.passed,
        score.failed,
    );

    if completed && clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
