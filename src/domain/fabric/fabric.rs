use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::try_join_all;

use crate::domain::environment::TlsConfig;
use crate::domain::fabric::docker_host::DockerHost;
use crate::domain::fabric::execution_host::ExecutionHost;
use crate::domain::utils::id::HostId;
use crate::error::{Error, Result};

/// The set of container hosts of one run, deduplicated by address. Connections are opened once
/// and shared by every experiment point.
#[derive(Debug, Clone)]
pub struct ExecutionFabric {
    hosts: BTreeMap<HostId, Arc<dyn ExecutionHost>>,
}

impl ExecutionFabric {
    /// Connects to the docker daemon of every host. The first unreachable host aborts the whole
    /// run, since every point scheduled on it would fail.
    pub async fn connect(hosts: &[HostId], tls: Option<&TlsConfig>) -> Result<Self> {
        let mut connected: BTreeMap<HostId, Arc<dyn ExecutionHost>> = BTreeMap::new();
        for host in hosts {
            if connected.contains_key(host) {
                continue;
            }
            let docker = DockerHost::connect(host.clone(), tls).await?;
            connected.insert(host.clone(), Arc::new(docker));
        }
        Ok(ExecutionFabric { hosts: connected })
    }

    /// Builds a fabric from already connected hosts; a later host with the same id replaces an
    /// earlier one.
    pub fn from_hosts(hosts: Vec<Arc<dyn ExecutionHost>>) -> Self {
        ExecutionFabric { hosts: hosts.into_iter().map(|host| (host.id().clone(), host)).collect() }
    }

    pub fn host(&self, id: &HostId) -> Result<&Arc<dyn ExecutionHost>> {
        self.hosts.get(id).ok_or_else(|| Error::ConfigError(format!("host '{}' is not part of the execution fabric", id)))
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Arc<dyn ExecutionHost>> {
        self.hosts.values()
    }

    /// Force-removes every unit carrying `label` on every host. Returns the number of removed
    /// units.
    pub async fn clean_all(&self, label: &str) -> Result<usize> {
        let per_host = self.hosts().map(|host| async move {
            let units = host.list_units(label).await?;
            for unit in &units {
                host.remove(&unit.unit_id, true).await?;
                log::debug!("Removed unit {} ({}) on {}", unit.name, unit.unit_id, host.id());
            }
            Ok::<usize, Error>(units.len())
        });

        let removed: usize = try_join_all(per_host).await?.into_iter().sum();
        if removed > 0 {
            log::info!("Removed {} stale unit(s) labelled '{}'", removed, label);
        }
        Ok(removed)
    }
}
