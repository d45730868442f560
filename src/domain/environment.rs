use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::api::environment_dto::{CommandsDto, EnvironmentDto, TlsDto};
use crate::api::grid_dto::ExperimentGridDto;
use crate::domain::fabric::execution_host::ImageRef;
use crate::domain::unit_flags::HelperAddress;
use crate::domain::utils::id::HostId;
use crate::error::{Error, Result};

pub const LOCALHOST: &str = "localhost";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
    pub ca_cert: PathBuf,
}

impl From<TlsDto> for TlsConfig {
    fn from(dto: TlsDto) -> Self {
        TlsConfig { client_cert: dto.client_cert.into(), client_key: dto.client_key.into(), ca_cert: dto.ca_cert.into() }
    }
}

/// Repository and shared base tag of the unit image. Checkpoints live in the same repository,
/// tagged with the role identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageConfig {
    pub repository: String,
    pub base_tag: String,
}

impl ImageConfig {
    pub fn base(&self) -> ImageRef {
        ImageRef::new(&self.repository, &self.base_tag)
    }
}

/// Validated environment the driver runs against.
#[derive(Debug, Clone)]
pub struct Environment {
    pub source_hosts: Vec<HostId>,
    pub helper_host: HostId,
    pub receiver_host: HostId,
    pub helper_address: HelperAddress,
    pub tls: Option<TlsConfig>,
    pub n_cpu_per_source: u32,
    pub image: ImageConfig,
    pub container_label: String,
    pub unit_shell: Vec<String>,
    pub commands: CommandsDto,
    pub cleanup_delay: Duration,
    pub helper_startup_delay: Duration,
    pub grids: HashMap<String, ExperimentGridDto>,
}

impl Environment {
    /// Every distinct host any role may be placed on.
    pub fn all_hosts(&self) -> Vec<HostId> {
        let mut hosts: Vec<HostId> = self.source_hosts.iter().chain([&self.helper_host, &self.receiver_host]).cloned().collect();
        hosts.sort();
        hosts.dedup();
        hosts
    }

    /// Looks up a grid, environment-defined grids shadow the built-in ones.
    pub fn grid(&self, name: &str) -> Option<ExperimentGridDto> {
        self.grids.get(name).cloned().or_else(|| ExperimentGridDto::builtin(name))
    }

    pub fn grid_names(&self) -> Vec<String> {
        let mut names: Vec<String> = ExperimentGridDto::builtin_names().iter().map(|name| name.to_string()).collect();
        names.extend(self.grids.keys().filter(|name| ExperimentGridDto::builtin(name).is_none()).cloned());
        names
    }
}

impl TryFrom<EnvironmentDto> for Environment {
    type Error = Error;

    fn try_from(dto: EnvironmentDto) -> Result<Self> {
        if dto.source_hosts.is_empty() {
            return Err(Error::ConfigError("at least one source host is required".to_string()));
        }
        if dto.container_label.trim().is_empty() {
            return Err(Error::ConfigError("the container label must not be empty".to_string()));
        }
        if dto.image.repository.trim().is_empty() || dto.image.base_tag.trim().is_empty() {
            return Err(Error::ConfigError("image repository and base tag must not be empty".to_string()));
        }
        if dto.unit_shell.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(Error::ConfigError("the unit shell must name a program, e.g. [\"sh\", \"-c\"]".to_string()));
        }

        let helper_address = match &dto.helper_address {
            Some(address) => HelperAddress::parse(address)?,
            None => HelperAddress::parse(&format!("{}:{}", dto.helper_host, dto.helper_port))?,
        };

        let needs_tls = dto.source_hosts.iter().chain([&dto.helper_host, &dto.receiver_host]).any(|host| host != LOCALHOST);
        let tls = match dto.tls {
            Some(tls) => Some(TlsConfig::from(tls)),
            None if needs_tls => Some(TlsConfig::from(TlsDto::default())),
            None => None,
        };

        Ok(Environment {
            source_hosts: dto.source_hosts.into_iter().map(HostId::new).collect(),
            helper_host: HostId::new(dto.helper_host),
            receiver_host: HostId::new(dto.receiver_host),
            helper_address,
            tls,
            n_cpu_per_source: dto.n_cpu_per_source,
            image: ImageConfig { repository: dto.image.repository, base_tag: dto.image.base_tag },
            container_label: dto.container_label,
            unit_shell: dto.unit_shell,
            commands: dto.commands,
            cleanup_delay: Duration::from_millis(dto.cleanup_delay_ms),
            helper_startup_delay: Duration::from_millis(dto.helper_startup_delay_ms),
            grids: dto.grids,
        })
    }
}
