use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::stream;

use crate::domain::fabric::execution_host::{ExecutionHost, ImageRef, LogSelect, LogStream, RunSpec, UnitHandle, UnitRef};
use crate::domain::utils::id::{HostId, RoleId};
use crate::error::{Error, Result};

/// What a mock unit does once launched: it "exits" immediately with this status and output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockOutcome {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl MockOutcome {
    pub fn success() -> Self {
        MockOutcome::default()
    }

    pub fn exit(exit_code: i64) -> Self {
        MockOutcome { exit_code, ..Default::default() }
    }
}

pub type MockBehavior = Arc<dyn Fn(&RunSpec) -> MockOutcome + Send + Sync>;

#[derive(Debug, Clone)]
struct MockUnit {
    name: String,
    labels: BTreeMap<String, String>,
    outcome: MockOutcome,
}

#[derive(Debug, Default)]
struct MockState {
    images: BTreeMap<ImageRef, u64>,
    units: BTreeMap<String, MockUnit>,
    launched: Vec<RunSpec>,
    next_id: u64,
    /// Number of launches after which the host stops answering.
    reachable_runs: Option<usize>,
}

impl MockState {
    fn fresh_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory container host. Keeps images as `tag -> image id` and units as exited
/// containers, which is all the lifecycle manager can observe through `ExecutionHost`.
#[derive(Clone)]
pub struct MockHost {
    id: HostId,
    state: Arc<Mutex<MockState>>,
    behavior: MockBehavior,
}

impl std::fmt::Debug for MockHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHost").field("id", &self.id).field("state", &self.state).finish()
    }
}

impl MockHost {
    /// A host whose units all succeed silently.
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_behavior(id, Arc::new(|_: &RunSpec| MockOutcome::success()))
    }

    pub fn with_behavior(id: impl Into<String>, behavior: MockBehavior) -> Self {
        MockHost { id: HostId::new(id), state: Arc::new(Mutex::new(MockState::default())), behavior }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_reachable(&self, state: &MockState) -> Result<()> {
        match state.reachable_runs {
            Some(limit) if state.launched.len() >= limit => {
                Err(Error::ConnectionError { host: self.id.to_string(), reason: "connection refused".to_string() })
            }
            _ => Ok(()),
        }
    }

    fn missing_unit(&self, operation: &'static str, unit_id: &str) -> Error {
        Error::runtime(self.id.as_str(), operation, format!("no such container: {}", unit_id))
    }

    /// Registers an image, e.g. the shared base image.
    pub fn add_image(&self, image: ImageRef) {
        let mut state = self.state();
        let image_id = state.fresh_id();
        state.images.insert(image, image_id);
    }

    pub fn image_id(&self, image: &ImageRef) -> Option<u64> {
        self.state().images.get(image).copied()
    }

    pub fn image_tags(&self) -> Vec<String> {
        self.state().images.keys().map(ImageRef::to_string).collect()
    }

    /// Names of every unit that has not been removed, running or exited.
    pub fn unit_names(&self) -> BTreeSet<String> {
        self.state().units.values().map(|unit| unit.name.clone()).collect()
    }

    /// Every run request received so far, in arrival order.
    pub fn launched(&self) -> Vec<RunSpec> {
        self.state().launched.clone()
    }

    /// Makes the host unreachable once it has launched `runs` units: listing and launching
    /// units then fail with `Error::ConnectionError`.
    pub fn go_down_after_runs(&self, runs: usize) {
        self.state().reachable_runs = Some(runs);
    }

    /// Leaves a unit behind as a crashed earlier run would.
    pub fn add_stale_unit(&self, name: &str, label: &str) {
        let mut state = self.state();
        let unit_id = format!("{}-stale-{}", self.id, state.fresh_id());
        let labels = BTreeMap::from([(label.to_string(), String::new())]);
        state.units.insert(unit_id, MockUnit { name: name.to_string(), labels, outcome: MockOutcome::success() });
    }
}

#[async_trait]
impl ExecutionHost for MockHost {
    fn id(&self) -> &HostId {
        &self.id
    }

    async fn list_units(&self, label: &str) -> Result<Vec<UnitRef>> {
        let state = self.state();
        self.ensure_reachable(&state)?;
        let units = state
            .units
            .iter()
            .filter(|(_, unit)| unit.labels.contains_key(label))
            .map(|(unit_id, unit)| UnitRef { unit_id: unit_id.clone(), name: unit.name.clone() })
            .collect();
        Ok(units)
    }

    async fn run(&self, spec: RunSpec) -> Result<UnitHandle> {
        let outcome = (self.behavior)(&spec);
        let mut state = self.state();
        self.ensure_reachable(&state)?;

        if !state.images.contains_key(&spec.image) {
            return Err(Error::runtime(self.id.as_str(), "create container", format!("no such image: {}", spec.image)));
        }
        if state.units.values().any(|unit| unit.name == spec.name) {
            return Err(Error::runtime(self.id.as_str(), "create container", format!("container name '{}' is already in use", spec.name)));
        }

        let unit_id = format!("{}-unit-{}", self.id, state.fresh_id());
        state.units.insert(unit_id.clone(), MockUnit { name: spec.name.clone(), labels: spec.labels.clone(), outcome });
        state.launched.push(spec.clone());

        Ok(UnitHandle { host: self.id.clone(), unit_id, role: RoleId::new(spec.name) })
    }

    async fn wait(&self, unit: &UnitHandle) -> Result<i64> {
        let state = self.state();
        let found = state.units.get(&unit.unit_id).ok_or_else(|| self.missing_unit("wait container", &unit.unit_id))?;
        Ok(found.outcome.exit_code)
    }

    async fn logs(&self, unit: &UnitHandle, select: LogSelect) -> Result<String> {
        let state = self.state();
        let found = state.units.get(&unit.unit_id).ok_or_else(|| self.missing_unit("read logs", &unit.unit_id))?;

        let mut output = String::new();
        if select.stdout() {
            output.push_str(&found.outcome.stdout);
        }
        if select.stderr() {
            output.push_str(&found.outcome.stderr);
        }
        Ok(output)
    }

    fn follow_logs(&self, unit: &UnitHandle) -> LogStream {
        let state = self.state();
        let chunks: Vec<Result<String>> = match state.units.get(&unit.unit_id) {
            Some(found) => {
                let combined = format!("{}{}", found.outcome.stdout, found.outcome.stderr);
                combined.lines().map(|line| Ok(format!("{}\n", line))).collect()
            }
            None => vec![Err(self.missing_unit("follow logs", &unit.unit_id))],
        };
        Box::pin(stream::iter(chunks))
    }

    async fn remove(&self, unit_id: &str, _force: bool) -> Result<()> {
        self.state().units.remove(unit_id);
        Ok(())
    }

    async fn tag_image(&self, source: &ImageRef, target: &ImageRef) -> Result<()> {
        let mut state = self.state();
        let image_id =
            *state.images.get(source).ok_or_else(|| Error::runtime(self.id.as_str(), "tag image", format!("no such image: {}", source)))?;
        state.images.insert(target.clone(), image_id);
        Ok(())
    }

    async fn remove_image(&self, image: &ImageRef) -> Result<()> {
        self.state().images.remove(image);
        Ok(())
    }

    async fn commit(&self, unit: &UnitHandle, target: &ImageRef) -> Result<()> {
        let mut state = self.state();
        if !state.units.contains_key(&unit.unit_id) {
            return Err(self.missing_unit("commit container", &unit.unit_id));
        }
        let image_id = state.fresh_id();
        state.images.insert(target.clone(), image_id);
        Ok(())
    }
}
