use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::try_join_all;

use crate::domain::environment::ImageConfig;
use crate::domain::fabric::execution_host::{ExecutionHost, ImageRef, LogSelect, LogStream, NetworkMode, RunSpec, UnitHandle};
use crate::domain::fabric::fabric::ExecutionFabric;
use crate::domain::topology::{Role, Topology};
use crate::domain::unit_flags::UnitFlags;
use crate::error::{Error, Result};

const STALE_SUFFIX: &str = "-old";

/// Lifecycle of one role within an experiment point:
/// `NoImage -> BaseImage -> (Running -> Exited -> Committed)*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitState {
    NoImage,
    BaseImage,
    /// A launch request is in flight.
    Launching,
    Running(UnitHandle),
    Exited { unit: UnitHandle, status: i64 },
    Committed,
}

impl UnitState {
    fn can_launch(&self) -> bool {
        matches!(self, UnitState::BaseImage | UnitState::Committed)
    }
}

/// Starts, commits and removes the execution units of one topology. Every role has exactly one
/// current checkpoint image (`<repository>:<role>`) from which its next unit is launched.
#[derive(Debug)]
pub struct UnitLifecycleManager {
    topology: Topology,
    fabric: ExecutionFabric,
    image: ImageConfig,
    label: String,
    shell: Vec<String>,
    states: Mutex<HashMap<Role, UnitState>>,
}

impl UnitLifecycleManager {
    pub fn new(topology: Topology, fabric: ExecutionFabric, image: ImageConfig, label: impl Into<String>, shell: Vec<String>) -> Self {
        let states = topology.roles().into_iter().map(|role| (role, UnitState::NoImage)).collect();
        UnitLifecycleManager { topology, fabric, image, label: label.into(), shell, states: Mutex::new(states) }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn states(&self) -> MutexGuard<'_, HashMap<Role, UnitState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self, role: Role) -> UnitState {
        self.states().get(&role).cloned().unwrap_or(UnitState::NoImage)
    }

    fn set_state(&self, role: Role, state: UnitState) {
        self.states().insert(role, state);
    }

    pub fn checkpoint_image(&self, role: Role) -> ImageRef {
        ImageRef::new(&self.image.repository, role.id().as_str())
    }

    fn stale_image(&self, role: Role) -> ImageRef {
        ImageRef::new(&self.image.repository, format!("{}{}", role.id(), STALE_SUFFIX))
    }

    fn host_for(&self, role: Role) -> Result<&Arc<dyn ExecutionHost>> {
        self.fabric.host(self.topology.host_of(role)?)
    }

    fn role_of(&self, unit: &UnitHandle) -> Result<Role> {
        self.topology
            .role(&unit.role)
            .ok_or_else(|| Error::LifecycleError { role: unit.role.to_string(), reason: "unit does not belong to this topology".to_string() })
    }

    /// Force-removes every labelled unit on every host of the fabric. Must run before images are
    /// prepared, so no stale unit from an earlier (possibly crashed) run blocks a unit name.
    pub async fn clean_all(&self) -> Result<usize> {
        let removed = self.fabric.clean_all(&self.label).await?;
        for state in self.states().values_mut() {
            *state = UnitState::NoImage;
        }
        Ok(removed)
    }

    /// Resets every role to the shared base image: drops the current checkpoint (and a stale
    /// `-old` tag left by an interrupted commit), then re-tags the base image under the role tag.
    pub async fn prepare_images(&self) -> Result<()> {
        let base = self.image.base();

        for role in self.topology.roles() {
            if matches!(self.state(role), UnitState::Launching | UnitState::Running(_)) {
                return Err(Error::LifecycleError { role: role.to_string(), reason: "cannot reset the image of a running unit".to_string() });
            }

            let host = self.host_for(role)?;
            let checkpoint = self.checkpoint_image(role);
            host.remove_image(&checkpoint).await?;
            host.remove_image(&self.stale_image(role)).await?;
            host.tag_image(&base, &checkpoint).await?;

            self.set_state(role, UnitState::BaseImage);
            log::debug!("Created {} on {}", checkpoint, host.id());
        }
        Ok(())
    }

    /// Launches `role` from its current checkpoint image. The role identity is always passed as
    /// `-id`; the unit shares the host network and carries the experiment label.
    pub async fn run_role(&self, role: Role, command: &str, flags: &UnitFlags) -> Result<UnitHandle> {
        let rendered = format!("{} {}", command, flags.render(&role.id())?);
        let host = self.host_for(role)?;

        let previous = {
            let mut states = self.states();
            let current = states.get(&role).cloned().unwrap_or(UnitState::NoImage);
            if !current.can_launch() {
                return Err(Error::LifecycleError { role: role.to_string(), reason: format!("cannot launch a unit while in state {:?}", current) });
            }
            states.insert(role, UnitState::Launching);
            current
        };

        let mut command = self.shell.clone();
        command.push(rendered);
        let spec = RunSpec {
            image: self.checkpoint_image(role),
            name: role.id().into(),
            command,
            network_mode: NetworkMode::Host,
            labels: BTreeMap::from([(self.label.clone(), String::new())]),
            detach: true,
        };

        log::debug!("Running on {}: {:?}", host.id(), spec.command);
        match host.run(spec).await {
            Ok(unit) => {
                self.set_state(role, UnitState::Running(unit.clone()));
                Ok(unit)
            }
            Err(e) => {
                // nothing was started, the checkpoint is untouched
                self.set_state(role, previous);
                Err(e)
            }
        }
    }

    /// Launches the same command for every role concurrently. Handles come back in the order of
    /// `roles`.
    pub async fn run_all(&self, command: &str, roles: &[Role], flags: &UnitFlags) -> Result<Vec<UnitHandle>> {
        try_join_all(roles.iter().map(|role| self.run_role(*role, command, flags))).await
    }

    /// Waits for the unit to exit and records its status.
    pub async fn wait(&self, unit: &UnitHandle) -> Result<i64> {
        let role = self.role_of(unit)?;
        let status = self.fabric.host(&unit.host)?.wait(unit).await?;

        if matches!(self.state(role), UnitState::Running(ref running) if running == unit) {
            self.set_state(role, UnitState::Exited { unit: unit.clone(), status });
        }
        Ok(status)
    }

    /// Waits for every unit concurrently, statuses in input order.
    pub async fn wait_all(&self, units: &[UnitHandle]) -> Result<Vec<i64>> {
        try_join_all(units.iter().map(|unit| self.wait(unit))).await
    }

    /// Waits for the unit and turns a non-zero exit into `Error::UnitRunError` carrying the
    /// unit's output.
    pub async fn ensure_success(&self, unit: &UnitHandle) -> Result<()> {
        let status = self.wait(unit).await?;
        if status != 0 {
            let logs = self.logs(unit, LogSelect::Both).await.unwrap_or_else(|e| format!("<logs unavailable: {}>", e));
            return Err(Error::UnitRunError { role: unit.role.to_string(), status, logs });
        }
        Ok(())
    }

    pub async fn logs(&self, unit: &UnitHandle, select: LogSelect) -> Result<String> {
        self.fabric.host(&unit.host)?.logs(unit, select).await
    }

    pub fn follow_logs(&self, unit: &UnitHandle) -> Result<LogStream> {
        Ok(self.fabric.host(&unit.host)?.follow_logs(unit))
    }

    /// Turns each exited unit into its role's new checkpoint image, concurrently. A unit that
    /// exited non-zero fails the whole call before any image of that role is touched.
    pub async fn commit(&self, units: &[UnitHandle]) -> Result<()> {
        try_join_all(units.iter().map(|unit| self.commit_unit(unit))).await?;
        Ok(())
    }

    async fn commit_unit(&self, unit: &UnitHandle) -> Result<()> {
        let role = self.role_of(unit)?;
        self.ensure_success(unit).await?;

        let host = self.fabric.host(&unit.host)?;
        let checkpoint = self.checkpoint_image(role);
        let stale = self.stale_image(role);

        // Keep the previous checkpoint reachable until the new one exists. If this sequence is
        // interrupted, the next prepare_images() drops the dangling `-old` tag.
        host.tag_image(&checkpoint, &stale).await?;
        host.commit(unit, &checkpoint).await?;
        host.remove(&unit.unit_id, false).await?;
        host.remove_image(&stale).await?;

        self.set_state(role, UnitState::Committed);
        log::debug!("Committed {} into {}", unit, checkpoint);
        Ok(())
    }
}
