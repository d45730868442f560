use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;

use crate::domain::utils::id::{HostId, RoleId};
use crate::error::Result;

/// A stream of output chunks of a running unit. Ends when the unit exits.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// `repository:tag` reference of a runtime image.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        ImageRef { repository: repository.into(), tag: tag.into() }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    /// Share the network namespace of the host, so a port bound by one unit is reachable by
    /// every other unit on that host.
    Host,
}

impl NetworkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkMode::Host => "host",
        }
    }
}

/// Everything needed to launch one execution unit.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSpec {
    pub image: ImageRef,
    pub name: String,
    pub command: Vec<String>,
    pub network_mode: NetworkMode,
    pub labels: BTreeMap<String, String>,
    pub detach: bool,
}

/// Opaque, loggable reference to a launched unit. Carries no runtime-client state, so it can be
/// passed between tasks freely.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct UnitHandle {
    pub host: HostId,
    pub unit_id: String,
    pub role: RoleId,
}

impl fmt::Display for UnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short_id: String = self.unit_id.chars().take(12).collect();
        write!(f, "{}@{} ({})", self.role, self.host, short_id)
    }
}

/// A unit as reported by a label-filtered listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRef {
    pub unit_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSelect {
    Stdout,
    Stderr,
    Both,
}

impl LogSelect {
    pub fn stdout(&self) -> bool {
        matches!(self, LogSelect::Stdout | LogSelect::Both)
    }

    pub fn stderr(&self) -> bool {
        matches!(self, LogSelect::Stderr | LogSelect::Both)
    }
}

/// The capability set the orchestrator needs from one container-runtime endpoint. All
/// operations are scoped to this host; coordination across hosts happens above this trait.
#[async_trait]
pub trait ExecutionHost: fmt::Debug + Send + Sync {
    fn id(&self) -> &HostId;

    async fn list_units(&self, label: &str) -> Result<Vec<UnitRef>>;

    async fn run(&self, spec: RunSpec) -> Result<UnitHandle>;

    /// Blocks until the unit has exited and returns its exit status.
    async fn wait(&self, unit: &UnitHandle) -> Result<i64>;

    /// Captured output of a unit, running or exited.
    async fn logs(&self, unit: &UnitHandle, select: LogSelect) -> Result<String>;

    /// Combined stdout/stderr, followed until the unit exits.
    fn follow_logs(&self, unit: &UnitHandle) -> LogStream;

    async fn remove(&self, unit_id: &str, force: bool) -> Result<()>;

    async fn tag_image(&self, source: &ImageRef, target: &ImageRef) -> Result<()>;

    /// Removing an image that does not exist succeeds.
    async fn remove_image(&self, image: &ImageRef) -> Result<()>;

    async fn commit(&self, unit: &UnitHandle, target: &ImageRef) -> Result<()>;
}
