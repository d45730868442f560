use std::collections::BTreeMap;
use std::time::Instant;

use futures::StreamExt;
use futures::future::try_join_all;
use tokio::sync::mpsc;

use crate::api::result_dto::ResultRecord;
use crate::domain::driver::grid::ExperimentPoint;
use crate::domain::driver::interrupt::InterruptKind;
use crate::domain::driver::record_writer::RecordWriter;
use crate::domain::driver::stats::{collect_stats, parse_receiver_output};
use crate::domain::environment::Environment;
use crate::domain::fabric::execution_host::{LogSelect, UnitHandle};
use crate::domain::fabric::fabric::ExecutionFabric;
use crate::domain::lifecycle::UnitLifecycleManager;
use crate::domain::oracle::verifier::{expected_result, verify};
use crate::domain::topology::{Role, Topology};
use crate::domain::unit_flags::UnitFlags;
use crate::domain::utils::id::RoleId;
use crate::error::{Error, Result};

/// Target the helper's live output is logged under.
pub const HELPER_LOG_TARGET: &str = "helper";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridSummary {
    pub completed: usize,
    /// 1-based numbers of the abandoned points.
    pub abandoned: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Finished(GridSummary),
    Interrupted(InterruptKind),
}

/// Drives experiment points through their phases on one execution fabric.
#[derive(Debug)]
pub struct PhaseDriver {
    env: Environment,
    fabric: ExecutionFabric,
}

impl PhaseDriver {
    pub fn new(env: Environment, fabric: ExecutionFabric) -> Self {
        PhaseDriver { env, fabric }
    }

    fn manager(&self, n_sources: usize) -> Result<UnitLifecycleManager> {
        let topology = Topology::resolve(n_sources, &self.env.source_hosts, &self.env.helper_host, &self.env.receiver_host)?;
        Ok(UnitLifecycleManager::new(topology, self.fabric.clone(), self.env.image.clone(), &self.env.container_label, self.env.unit_shell.clone()))
    }

    /// Runs one point: clean, prepare images, generate data and checkpoint it, run the protocol,
    /// check the receiver output against the oracle, collect statistics.
    pub async fn run_point(&self, point: &ExperimentPoint) -> Result<ResultRecord> {
        let manager = self.manager(point.n_sources)?;
        let sources = manager.topology().sources();
        let source_ids = manager.topology().source_ids();
        let commands = &self.env.commands;

        manager.clean_all().await?;
        manager.prepare_images().await?;
        tokio::time::sleep(self.env.cleanup_delay).await;

        log::info!("Generating test data...");
        let generators = manager.run_all(&render_command(&commands.generate, &source_ids, point), &sources, &UnitFlags::new()).await?;
        manager.commit(&generators).await?;
        log::info!("Data generated");

        log::info!("Starting helper...");
        let helper_flags = UnitFlags::new().sources(source_ids.clone())?.n_rows(point.set_size);
        let helper = manager.run_role(Role::Helper, &render_command(&commands.helper, &source_ids, point), &helper_flags).await?;
        tokio::time::sleep(self.env.helper_startup_delay).await;

        log::info!("Running receiver and sources");
        let started = Instant::now();
        let receiver_flags = UnitFlags::new().helper_address(self.env.helper_address.clone()).sources(source_ids.clone())?;
        let receiver = manager.run_role(Role::Receiver, &render_command(&commands.receiver, &source_ids, point), &receiver_flags).await?;

        let source_flags = UnitFlags::new().helper_address(self.env.helper_address.clone()).n_cpu(self.env.n_cpu_per_source);
        let source_units = manager.run_all(&render_command(&commands.source, &source_ids, point), &sources, &source_flags).await?;

        echo_helper_output(&manager, &helper).await;
        let helper_status = manager.wait(&helper).await?;
        if helper_status != 0 {
            log::warn!("Helper exited with status {}", helper_status);
        }
        manager.ensure_success(&receiver).await?;
        log::info!("Done in {:.3} seconds, checking results...", started.elapsed().as_secs_f64());

        try_join_all(source_units.iter().map(|unit| manager.ensure_success(unit))).await?;

        let observed = parse_receiver_output(&manager.logs(&receiver, LogSelect::Stdout).await?)?;
        let expected = expected_result(&source_ids, point.set_size, point.join_size, point.seed())?;
        if let Err(e) = verify(expected, observed) {
            if let Error::ResultMismatchError { expected, observed } = &e {
                log::error!("Expected: {:?}", expected);
                log::error!("Got: {:?}", observed);
            }
            return Err(e);
        }
        log::info!("Result OK");

        let mut reporting: Vec<&UnitHandle> = source_units.first().into_iter().collect();
        reporting.extend([&helper, &receiver]);
        let nodes_stats = self.collect_unit_stats(&manager, &reporting).await;

        // units of a finished point are not needed for inspection
        if let Err(e) = manager.clean_all().await {
            log::warn!("Could not remove the units of point {}: {}", point.number(), e);
        }

        Ok(ResultRecord { n_sources: point.n_sources, set_size: point.set_size, join_size: point.join_size, rep: point.rep, nodes_stats })
    }

    async fn collect_unit_stats(&self, manager: &UnitLifecycleManager, units: &[&UnitHandle]) -> BTreeMap<String, Option<serde_json::Value>> {
        let mut nodes_stats = BTreeMap::new();
        for unit in units {
            let stats = match manager.logs(unit, LogSelect::Stderr).await {
                Ok(stderr) => collect_stats(unit.role.as_str(), &stderr),
                Err(e) => {
                    log::warn!("Could not read the logs of {}: {}", unit, e);
                    None
                }
            };
            nodes_stats.insert(unit.role.to_string(), stats);
        }
        nodes_stats
    }

    /// Runs the points in order. A point-scoped failure abandons that point only; any other
    /// error ends the grid.
    pub async fn run_grid(&self, points: &[ExperimentPoint], writer: &mut RecordWriter) -> Result<GridSummary> {
        log::info!("{} experiments to run", points.len());

        let mut summary = GridSummary::default();
        for point in points {
            log::info!("======= starting experiment #{} {} =======", point.number(), point);

            match self.run_point(point).await {
                Ok(record) => {
                    log::info!("Stats of experiment #{}: {:?}", point.number(), record.nodes_stats);
                    writer.write(&record)?;
                    summary.completed += 1;
                }
                Err(e) if e.is_point_scoped() => {
                    log::error!("Experiment #{} abandoned: {}", point.number(), e);
                    summary.abandoned.push(point.number());
                }
                Err(e) => return Err(e),
            }
        }

        log::info!("Grid finished, {} records written, {} points abandoned", summary.completed, summary.abandoned.len());
        Ok(summary)
    }

    /// Force-removes every labelled unit on every host of the fabric.
    pub async fn clean_all(&self) -> Result<usize> {
        self.fabric.clean_all(&self.env.container_label).await
    }

    /// Runs the grid until it finishes or an interrupt arrives on `interrupts`. A cleanup
    /// interrupt removes all labelled units before returning.
    pub async fn run_until_interrupted(
        &self,
        points: &[ExperimentPoint],
        writer: &mut RecordWriter,
        interrupts: &mut mpsc::Receiver<InterruptKind>,
    ) -> Result<RunOutcome> {
        let kind = tokio::select! {
            biased;
            Some(kind) = interrupts.recv() => kind,
            summary = self.run_grid(points, writer) => return summary.map(RunOutcome::Finished),
        };

        match kind {
            InterruptKind::Cleanup => {
                log::warn!("Caught interrupt, cleaning and exiting...");
                let removed = self.clean_all().await?;
                log::info!("Removed {} units", removed);
            }
            InterruptKind::Immediate => log::warn!("Caught suspend, exiting without cleaning..."),
        }
        Ok(RunOutcome::Interrupted(kind))
    }
}

/// Drains the helper's combined output into the log until the helper exits.
async fn echo_helper_output(manager: &UnitLifecycleManager, helper: &UnitHandle) {
    let mut stream = match manager.follow_logs(helper) {
        Ok(stream) => stream,
        Err(e) => {
            log::warn!("Cannot follow helper output: {}", e);
            return;
        }
    };

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(text) => {
                for line in text.lines() {
                    log::info!(target: HELPER_LOG_TARGET, "{}", line);
                }
            }
            Err(e) => {
                log::warn!("Helper output stream ended early: {}", e);
                break;
            }
        }
    }
}

/// Fills the `{sources}`, `{set_size}`, `{join_size}` and `{seed}` placeholders of a command
/// template.
pub fn render_command(template: &str, source_ids: &[RoleId], point: &ExperimentPoint) -> String {
    let sources: Vec<&str> = source_ids.iter().map(RoleId::as_str).collect();
    template
        .replace("{sources}", &sources.join(","))
        .replace("{set_size}", &point.set_size.to_string())
        .replace("{join_size}", &point.join_size.to_string())
        .replace("{seed}", &point.seed().to_string())
}
