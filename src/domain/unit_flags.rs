use std::fmt;

use crate::domain::utils::id::RoleId;
use crate::error::{Error, Result};

const FLAG_NODE_ID: &str = "id";
const FLAG_HELPER_ADDRESS: &str = "helper_address";
const FLAG_SOURCES: &str = "sources";
const FLAG_N_ROWS: &str = "n_rows";
const FLAG_N_CPU: &str = "n_cpu";

/// `host:port` the sources and the receiver use to reach the helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperAddress {
    pub host: String,
    pub port: u16,
}

impl HelperAddress {
    pub fn parse(address: &str) -> Result<Self> {
        let (host, port) =
            address.rsplit_once(':').ok_or_else(|| Error::ConfigError(format!("helper address '{}' is not of the form host:port", address)))?;
        let port = port.parse::<u16>().map_err(|_| Error::ConfigError(format!("helper address '{}' has an invalid port", address)))?;

        if host.is_empty() || host.chars().any(char::is_whitespace) {
            return Err(Error::ConfigError(format!("helper address '{}' has an invalid host", address)));
        }
        Ok(HelperAddress { host: host.to_string(), port })
    }
}

impl fmt::Display for HelperAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The flags a unit may receive besides its identity. Each field is one known flag of the
/// protocol binaries; there is no way to pass anything else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitFlags {
    helper_address: Option<HelperAddress>,
    sources: Option<Vec<RoleId>>,
    n_rows: Option<usize>,
    n_cpu: Option<u32>,
}

impl UnitFlags {
    pub fn new() -> Self {
        UnitFlags::default()
    }

    pub fn helper_address(mut self, address: HelperAddress) -> Self {
        self.helper_address = Some(address);
        self
    }

    pub fn sources(mut self, sources: Vec<RoleId>) -> Result<Self> {
        if sources.is_empty() {
            return Err(Error::ConfigError("the -sources flag needs at least one source id".to_string()));
        }
        if let Some(bad) = sources.iter().find(|id| id.as_str().is_empty() || id.as_str().contains([',', ' '])) {
            return Err(Error::ConfigError(format!("source id '{}' cannot be passed in a comma-separated list", bad)));
        }
        self.sources = Some(sources);
        Ok(self)
    }

    pub fn n_rows(mut self, n_rows: usize) -> Self {
        self.n_rows = Some(n_rows);
        self
    }

    /// 0 leaves the choice to the unit (all CPUs).
    pub fn n_cpu(mut self, n_cpu: u32) -> Self {
        self.n_cpu = Some(n_cpu);
        self
    }

    /// Renders the command-line flags for `role`; the identity flag always comes first.
    pub fn render(&self, role: &RoleId) -> Result<String> {
        if role.as_str().is_empty() || role.as_str().chars().any(char::is_whitespace) {
            return Err(Error::ConfigError(format!("role identity '{}' cannot be passed as a flag", role)));
        }

        let mut flags = vec![format!("-{} {}", FLAG_NODE_ID, role)];
        if let Some(address) = &self.helper_address {
            flags.push(format!("-{} {}", FLAG_HELPER_ADDRESS, address));
        }
        if let Some(sources) = &self.sources {
            let joined: Vec<&str> = sources.iter().map(RoleId::as_str).collect();
            flags.push(format!("-{} {}", FLAG_SOURCES, joined.join(",")));
        }
        if let Some(n_rows) = self.n_rows {
            flags.push(format!("-{} {}", FLAG_N_ROWS, n_rows));
        }
        if let Some(n_cpu) = self.n_cpu {
            flags.push(format!("-{} {}", FLAG_N_CPU, n_cpu));
        }
        Ok(flags.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_only() {
        assert_eq!(UnitFlags::new().render(&RoleId::new("source_0")).unwrap(), "-id source_0");
    }

    #[test]
    fn test_all_flags_in_fixed_order() {
        let flags = UnitFlags::new()
            .n_cpu(4)
            .n_rows(10)
            .sources(vec![RoleId::new("source_0"), RoleId::new("source_1")])
            .unwrap()
            .helper_address(HelperAddress::parse("cloud:40000").unwrap());

        assert_eq!(flags.render(&RoleId::new("receiver")).unwrap(), "-id receiver -helper_address cloud:40000 -sources source_0,source_1 -n_rows 10 -n_cpu 4");
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(UnitFlags::new().sources(vec![]).is_err());
        assert!(UnitFlags::new().sources(vec![RoleId::new("a,b")]).is_err());
        assert!(UnitFlags::new().render(&RoleId::new("two words")).is_err());
        assert!(HelperAddress::parse("cloud").is_err());
        assert!(HelperAddress::parse("cloud:http").is_err());
        assert!(HelperAddress::parse(":40000").is_err());
    }

    #[test]
    fn test_helper_address_round_trip() {
        let address = HelperAddress::parse("10.0.0.7:40000").unwrap();
        assert_eq!(address.host, "10.0.0.7");
        assert_eq!(address.port, 40000);
        assert_eq!(address.to_string(), "10.0.0.7:40000");
    }
}
