use std::collections::BTreeSet;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("File not found or could not be read: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("Failed to read CSV data: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Could not connect to container host '{host}': {reason}. Have the certificates been created for remote hosts?")]
    ConnectionError { host: String, reason: String },

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Runtime operation '{operation}' failed on host '{host}': {reason}")]
    RuntimeError { host: String, operation: &'static str, reason: String },

    #[error("Illegal lifecycle transition for unit '{role}': {reason}")]
    LifecycleError { role: String, reason: String },

    #[error("Unit '{role}' exited with status {status}, logs:\n{logs}")]
    UnitRunError { role: String, status: i64, logs: String },

    #[error("Result does not match expected result ({})", mismatch_summary(.expected, .observed))]
    ResultMismatchError { expected: BTreeSet<String>, observed: BTreeSet<String> },

    #[error("Malformed statistics line: {0}")]
    StatsParseError(String),
}

impl Error {
    /// Errors that only invalidate the current experiment point. The grid loop logs them and
    /// moves on; every other error terminates the run.
    pub fn is_point_scoped(&self) -> bool {
        match self {
            Error::ConfigError(_)
            | Error::RuntimeError { .. }
            | Error::LifecycleError { .. }
            | Error::UnitRunError { .. }
            | Error::ResultMismatchError { .. }
            | Error::StatsParseError(_)
            | Error::CsvError(_) => true,
            Error::IoError(_) | Error::DeserializationError(_) | Error::ConnectionError { .. } => false,
        }
    }

    pub(crate) fn runtime(host: impl Into<String>, operation: &'static str, reason: impl ToString) -> Self {
        Error::RuntimeError { host: host.into(), operation, reason: reason.to_string() }
    }
}

fn mismatch_summary(expected: &BTreeSet<String>, observed: &BTreeSet<String>) -> String {
    format!(
        "{} expected rows, {} observed rows, {} missing, {} unexpected",
        expected.len(),
        observed.len(),
        expected.difference(observed).count(),
        observed.difference(expected).count()
    )
}

pub type Result<T> = std::result::Result<T, Error>;
