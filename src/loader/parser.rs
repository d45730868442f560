use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Parses a JSON file into a given type `T`.
///
/// This function reads a file from `file_path`, attempts to parse it
/// as JSON, and returns an instance of `T`.
///
/// Errors are automatically converted into `crate::error::Error` variants:
/// - `Error::IoError` if the file cannot be read.
/// - `Error::DeserializationError` if the JSON is malformed.
pub fn parse_json_file<T: DeserializeOwned>(file_path: impl AsRef<Path>) -> Result<T> {
    let data = fs::read_to_string(file_path).map_err(Error::IoError)?;

    let parsed_data: T = serde_json::from_str(&data).map_err(Error::DeserializationError)?;

    Ok(parsed_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::environment_dto::EnvironmentDto;
    use std::io::Write;

    #[test]
    fn test_parse_environment_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "sourceHosts": ["node-0", "node-1"], "helperPort": 41000 }}"#).unwrap();

        let dto: EnvironmentDto = parse_json_file(file.path()).unwrap();
        assert_eq!(dto.source_hosts, vec!["node-0", "node-1"]);
        assert_eq!(dto.helper_port, 41000);
        assert_eq!(dto.helper_host, "localhost");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result: Result<EnvironmentDto> = parse_json_file("/definitely/not/here.json");
        assert!(matches!(result, Err(Error::IoError(_))));
    }

    #[test]
    fn test_malformed_file_is_deserialization_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let result: Result<EnvironmentDto> = parse_json_file(file.path());
        assert!(matches!(result, Err(Error::DeserializationError(_))));
    }
}
