use std::path::Path;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::environment_dto::EnvironmentDto;
use crate::domain::driver::grid::{ExperimentPoint, experiment_points, resume_from};
use crate::domain::driver::interrupt;
use crate::domain::driver::phase_driver::{PhaseDriver, RunOutcome};
use crate::domain::driver::record_writer::RecordWriter;
use crate::domain::environment::Environment;
use crate::domain::fabric::fabric::ExecutionFabric;
use crate::error::{Error, Result};
use crate::loader::parser::parse_json_file;

pub mod api;
pub mod domain;
pub mod error;
pub mod loader;
pub mod logger;

/// Loads and validates the environment file, or the single-machine defaults without one.
pub fn load_environment(file_path: Option<&Path>) -> Result<Environment> {
    let dto = match file_path {
        Some(path) => {
            let dto: EnvironmentDto = parse_json_file(path)?;
            log::info!("Environment loaded from '{}'.", path.display());
            dto
        }
        None => EnvironmentDto::default(),
    };
    Environment::try_from(dto)
}

/// The points of grid `grid_name` still to run when resuming at the 1-based `skip_to`.
pub fn experiment_plan(env: &Environment, grid_name: &str, skip_to: usize) -> Result<Vec<ExperimentPoint>> {
    let grid = env
        .grid(grid_name)
        .ok_or_else(|| Error::ConfigError(format!("unknown experiment grid '{}', available grids: {:?}", grid_name, env.grid_names())))?;
    Ok(resume_from(experiment_points(&grid)?, skip_to))
}

/// Connects to every host of the environment and runs `points`, writing one record per
/// completed point to stdout and, if given, to `output`. Returns early on an interrupt signal.
pub async fn run_benchmark(env: Environment, points: Vec<ExperimentPoint>, output: Option<&Path>) -> Result<RunOutcome> {
    let fabric = ExecutionFabric::connect(&env.all_hosts(), env.tls.as_ref()).await?;
    log::info!("Connected to {} container hosts.", fabric.hosts().count());

    let mut writer = RecordWriter::stdout_and_file(output)?;
    let driver = PhaseDriver::new(env, fabric);

    let (tx, mut rx) = mpsc::channel(4);
    let shutdown = CancellationToken::new();
    let listener = tokio::spawn(interrupt::listen(tx, shutdown.clone()));

    let outcome = driver.run_until_interrupted(&points, &mut writer, &mut rx).await;

    shutdown.cancel();
    match listener.await {
        Ok(Err(e)) => log::warn!("Interrupt listener failed: {}", e),
        Err(e) => log::warn!("Interrupt listener panicked: {}", e),
        Ok(Ok(())) => {}
    }
    outcome
}
