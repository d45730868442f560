use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use mppj_bench::domain::driver::phase_driver::RunOutcome;
use mppj_bench::{experiment_plan, load_environment, logger, run_benchmark};

/// Runs a grid of MPPJ experiments on docker hosts and prints one JSON record per experiment.
#[derive(Parser, Debug)]
#[command(name = "mppj-bench", version)]
struct Cli {
    /// Experiment grid to run (built-in: light, full, genmpc_comp)
    grid: String,

    /// 1-based number of the first experiment to run
    #[arg(value_name = "SKIP_TO")]
    skip_to: Option<usize>,

    /// Environment file (JSON); single-machine defaults without it
    #[arg(long, value_name = "FILE")]
    env: Option<PathBuf>,

    /// File the records are appended to, in addition to stdout
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
        Err(e) => e.exit(),
    };

    logger::init();

    let env = match load_environment(cli.env.as_deref()) {
        Ok(env) => env,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let points = match experiment_plan(&env, &cli.grid, cli.skip_to.unwrap_or(0)) {
        Ok(points) => points,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match run_benchmark(env, points, cli.output.as_deref()).await {
        Ok(RunOutcome::Finished(summary)) => {
            if !summary.abandoned.is_empty() {
                log::warn!("Abandoned experiments: {:?}", summary.abandoned);
            }
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::Interrupted(kind)) => {
            log::info!("Stopped by {:?} interrupt.", kind);
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Run aborted: {}", e);
            ExitCode::FAILURE
        }
    }
}
