use std::collections::HashMap;

use async_trait::async_trait;
use bollard::{
    API_DEFAULT_VERSION, Docker,
    errors::Error as DockerError,
    models::{ContainerConfig, ContainerCreateBody, HostConfig},
    query_parameters::{
        CommitContainerOptionsBuilder, CreateContainerOptionsBuilder, ListContainersOptionsBuilder, LogsOptionsBuilder,
        RemoveContainerOptionsBuilder, RemoveImageOptionsBuilder, StartContainerOptions, TagImageOptionsBuilder, WaitContainerOptions,
    },
};
use futures::StreamExt;

use crate::domain::environment::{LOCALHOST, TlsConfig};
use crate::domain::fabric::execution_host::{ExecutionHost, ImageRef, LogSelect, LogStream, RunSpec, UnitHandle, UnitRef};
use crate::domain::utils::id::{HostId, RoleId};
use crate::error::{Error, Result};

const REMOTE_DOCKER_PORT: u16 = 2376;
const CONNECT_TIMEOUT_S: u64 = 120;

/// URL of the docker daemon of `host`: the local socket for `localhost`, TLS over TCP otherwise.
pub fn docker_url(host: &HostId) -> String {
    if host.as_str() == LOCALHOST { "unix:///var/run/docker.sock".to_string() } else { format!("tcp://{}:{}", host, REMOTE_DOCKER_PORT) }
}

fn is_not_found(error: &DockerError) -> bool {
    matches!(error, DockerError::DockerResponseServerError { status_code: 404, .. })
}

/// Failures of the transport to the daemon rather than answers from it.
fn is_connection_failure(error: &DockerError) -> bool {
    matches!(
        error,
        DockerError::HyperLegacyError { .. }
            | DockerError::HyperResponseError { .. }
            | DockerError::IOError { .. }
            | DockerError::RequestTimeoutError
            | DockerError::SocketNotFoundError(_)
    )
}

/// Maps a bollard failure of `operation` on `host`. A lost daemon ends the run, an error
/// response only fails the operation.
fn host_error(host: &HostId, operation: &'static str, error: DockerError) -> Error {
    if is_connection_failure(&error) {
        Error::ConnectionError { host: host.to_string(), reason: format!("{} failed: {}", operation, error) }
    } else {
        Error::runtime(host.as_str(), operation, error)
    }
}

/// A docker daemon reached through bollard.
#[derive(Debug, Clone)]
pub struct DockerHost {
    id: HostId,
    docker: Docker,
}

impl DockerHost {
    /// Opens a client for `host` and pings the daemon. Any failure is reported as
    /// `Error::ConnectionError`.
    pub async fn connect(id: HostId, tls: Option<&TlsConfig>) -> Result<Self> {
        let connection_error = |reason: String| Error::ConnectionError { host: id.to_string(), reason };

        let docker = if id.as_str() == LOCALHOST {
            Docker::connect_with_local_defaults()
        } else {
            let tls = tls.ok_or_else(|| connection_error("remote hosts require a TLS configuration".to_string()))?;
            Docker::connect_with_ssl(&docker_url(&id), &tls.client_key, &tls.client_cert, &tls.ca_cert, CONNECT_TIMEOUT_S, API_DEFAULT_VERSION)
        }
        .map_err(|e| connection_error(e.to_string()))?;

        docker.ping().await.map_err(|e| connection_error(e.to_string()))?;
        log::info!("Connected to container runtime of host {} at {}", id, docker_url(&id));

        Ok(DockerHost { id, docker })
    }

    fn op_error(&self, operation: &'static str, error: DockerError) -> Error {
        host_error(&self.id, operation, error)
    }
}

#[async_trait]
impl ExecutionHost for DockerHost {
    fn id(&self) -> &HostId {
        &self.id
    }

    async fn list_units(&self, label: &str) -> Result<Vec<UnitRef>> {
        let mut filters = HashMap::new();
        filters.insert("label", vec![label]);
        let options = ListContainersOptionsBuilder::default().all(true).filters(&filters).build();

        let containers = self.docker.list_containers(Some(options)).await.map_err(|e| self.op_error("list containers", e))?;

        Ok(containers
            .into_iter()
            .filter_map(|summary| {
                let unit_id = summary.id?;
                let name = summary.names.and_then(|names| names.into_iter().next()).unwrap_or_default();
                Some(UnitRef { unit_id, name: name.trim_start_matches('/').to_string() })
            })
            .collect())
    }

    async fn run(&self, spec: RunSpec) -> Result<UnitHandle> {
        let options = CreateContainerOptionsBuilder::default().name(&spec.name).build();
        let host_config = HostConfig { network_mode: Some(spec.network_mode.as_str().to_string()), ..Default::default() };
        let body = ContainerCreateBody {
            image: Some(spec.image.to_string()),
            hostname: Some(spec.name.clone()),
            cmd: Some(spec.command.clone()),
            labels: Some(spec.labels.clone().into_iter().collect()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let unit_id = self.docker.create_container(Some(options), body).await.map_err(|e| self.op_error("create container", e))?.id;
        self.docker.start_container(&unit_id, None::<StartContainerOptions>).await.map_err(|e| self.op_error("start container", e))?;

        let handle = UnitHandle { host: self.id.clone(), unit_id, role: RoleId::new(spec.name) };
        log::debug!("Started unit {} from image {}", handle, spec.image);

        if !spec.detach {
            self.wait(&handle).await?;
        }
        Ok(handle)
    }

    async fn wait(&self, unit: &UnitHandle) -> Result<i64> {
        let mut responses = Box::pin(self.docker.wait_container(&unit.unit_id, None::<WaitContainerOptions>));

        match responses.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error carrying the exit code
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(self.op_error("wait container", e)),
            None => Err(Error::runtime(self.id.as_str(), "wait container", "wait stream ended without an exit status")),
        }
    }

    async fn logs(&self, unit: &UnitHandle, select: LogSelect) -> Result<String> {
        let options = LogsOptionsBuilder::default().stdout(select.stdout()).stderr(select.stderr()).build();
        let mut chunks = Box::pin(self.docker.logs(&unit.unit_id, Some(options)));

        let mut output = String::new();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| self.op_error("read logs", e))?;
            output.push_str(&String::from_utf8_lossy(&chunk.into_bytes()));
        }
        Ok(output)
    }

    fn follow_logs(&self, unit: &UnitHandle) -> LogStream {
        let options = LogsOptionsBuilder::default().follow(true).stdout(true).stderr(true).build();
        let host = self.id.clone();

        Box::pin(self.docker.logs(&unit.unit_id, Some(options)).map(move |chunk| match chunk {
            Ok(output) => Ok(String::from_utf8_lossy(&output.into_bytes()).into_owned()),
            Err(e) => Err(host_error(&host, "follow logs", e)),
        }))
    }

    async fn remove(&self, unit_id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptionsBuilder::default().force(force).build();
        match self.docker.remove_container(unit_id, Some(options)).await {
            Ok(()) => Ok(()),
            // already gone, e.g. removed by a concurrent cleanup
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(self.op_error("remove container", e)),
        }
    }

    async fn tag_image(&self, source: &ImageRef, target: &ImageRef) -> Result<()> {
        let options = TagImageOptionsBuilder::default().repo(&target.repository).tag(&target.tag).build();
        self.docker.tag_image(&source.to_string(), Some(options)).await.map_err(|e| self.op_error("tag image", e))
    }

    async fn remove_image(&self, image: &ImageRef) -> Result<()> {
        let options = RemoveImageOptionsBuilder::default().force(true).build();
        match self.docker.remove_image(&image.to_string(), Some(options), None).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(self.op_error("remove image", e)),
        }
    }

    async fn commit(&self, unit: &UnitHandle, target: &ImageRef) -> Result<()> {
        let options = CommitContainerOptionsBuilder::default().container(&unit.unit_id).repo(&target.repository).tag(&target.tag).build();
        self.docker.commit_container(options, ContainerConfig::default()).await.map_err(|e| self.op_error("commit container", e))?;
        Ok(())
    }
}
