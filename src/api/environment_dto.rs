use std::collections::HashMap;

use serde::Deserialize;

use crate::api::grid_dto::ExperimentGridDto;

pub const DEFAULT_HELPER_PORT: u16 = 40000;

/// Static description of the benchmark environment: where the units run, how to reach the
/// container runtimes and which commands each phase executes. Every field falls back to the
/// values of a single-machine setup.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct EnvironmentDto {
    pub source_hosts: Vec<String>,
    pub helper_host: String,
    pub receiver_host: String,
    pub helper_port: u16,
    /// Address the sources and the receiver dial, defaults to `helperHost:helperPort`.
    pub helper_address: Option<String>,
    pub tls: Option<TlsDto>,
    /// 0 lets a source use every available CPU.
    pub n_cpu_per_source: u32,
    pub image: ImageDto,
    pub container_label: String,
    pub unit_shell: Vec<String>,
    pub commands: CommandsDto,
    pub cleanup_delay_ms: u64,
    pub helper_startup_delay_ms: u64,
    pub grids: HashMap<String, ExperimentGridDto>,
}

impl Default for EnvironmentDto {
    fn default() -> Self {
        EnvironmentDto {
            source_hosts: vec!["localhost".to_string()],
            helper_host: "localhost".to_string(),
            receiver_host: "localhost".to_string(),
            helper_port: DEFAULT_HELPER_PORT,
            helper_address: None,
            tls: None,
            n_cpu_per_source: 4,
            image: ImageDto::default(),
            container_label: "mppj-exp".to_string(),
            unit_shell: vec!["sh".to_string(), "-c".to_string()],
            commands: CommandsDto::default(),
            cleanup_delay_ms: 1000,
            helper_startup_delay_ms: 3000,
            grids: HashMap::new(),
        }
    }
}

/// Client certificate material for remote (`tcp://<host>:2376`) container runtimes.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TlsDto {
    pub client_cert: String,
    pub client_key: String,
    pub ca_cert: String,
}

impl Default for TlsDto {
    fn default() -> Self {
        TlsDto {
            client_cert: ".certs/client-cert.pem".to_string(),
            client_key: ".certs/client-key.pem".to_string(),
            ca_cert: ".certs/ca.pem".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ImageDto {
    pub repository: String,
    pub base_tag: String,
}

impl Default for ImageDto {
    fn default() -> Self {
        ImageDto { repository: "mppj".to_string(), base_tag: "base".to_string() }
    }
}

/// Command templates per phase. `{sources}`, `{set_size}`, `{join_size}` and `{seed}` are
/// substituted before launch; role flags are appended afterwards.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct CommandsDto {
    pub generate: String,
    pub helper: String,
    pub receiver: String,
    pub source: String,
}

impl Default for CommandsDto {
    fn default() -> Self {
        CommandsDto {
            generate: "gen-data -source_ids {sources} -generate {set_size} -joinsize {join_size} -seed {seed} >> data.csv".to_string(),
            helper: "helper".to_string(),
            receiver: "receiver".to_string(),
            source: "cat data.csv | source".to_string(),
        }
    }
}
