use std::fmt;

use crate::domain::utils::id::{HostId, RoleId};
use crate::error::{Error, Result};

pub const HELPER_ID: &str = "helper";
pub const RECEIVER_ID: &str = "receiver";
const SOURCE_PREFIX: &str = "source_";

/// Logical participant of the protocol, independent of where it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Source(usize),
    Helper,
    Receiver,
}

impl Role {
    pub fn id(&self) -> RoleId {
        match self {
            Role::Source(index) => RoleId::new(format!("{}{}", SOURCE_PREFIX, index)),
            Role::Helper => RoleId::new(HELPER_ID),
            Role::Receiver => RoleId::new(RECEIVER_ID),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Immutable role -> host assignment of one experiment point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    source_hosts: Vec<HostId>,
    helper_host: HostId,
    receiver_host: HostId,
}

impl Topology {
    /// Places `n_parties` sources round robin over `source_hosts`, source `i` on
    /// `source_hosts[i % len]`.
    pub fn resolve(n_parties: usize, source_hosts: &[HostId], helper_host: &HostId, receiver_host: &HostId) -> Result<Self> {
        if source_hosts.is_empty() {
            return Err(Error::ConfigError("cannot place sources: the source host list is empty".to_string()));
        }
        if n_parties == 0 {
            return Err(Error::ConfigError("an experiment needs at least one source party".to_string()));
        }

        let assigned = (0..n_parties).map(|i| source_hosts[i % source_hosts.len()].clone()).collect();

        Ok(Topology { source_hosts: assigned, helper_host: helper_host.clone(), receiver_host: receiver_host.clone() })
    }

    pub fn n_sources(&self) -> usize {
        self.source_hosts.len()
    }

    pub fn sources(&self) -> Vec<Role> {
        (0..self.n_sources()).map(Role::Source).collect()
    }

    pub fn source_ids(&self) -> Vec<RoleId> {
        self.sources().iter().map(Role::id).collect()
    }

    /// Sources first, then helper and receiver.
    pub fn roles(&self) -> Vec<Role> {
        let mut roles = self.sources();
        roles.push(Role::Helper);
        roles.push(Role::Receiver);
        roles
    }

    pub fn host_of(&self, role: Role) -> Result<&HostId> {
        match role {
            Role::Source(index) => {
                self.source_hosts.get(index).ok_or_else(|| Error::ConfigError(format!("{} is not part of this topology", role)))
            }
            Role::Helper => Ok(&self.helper_host),
            Role::Receiver => Ok(&self.receiver_host),
        }
    }

    /// Looks a role up by its identity string.
    pub fn role(&self, id: &RoleId) -> Option<Role> {
        self.roles().into_iter().find(|role| role.id() == *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(names: &[&str]) -> Vec<HostId> {
        names.iter().map(|name| HostId::new(*name)).collect()
    }

    #[test]
    fn test_round_robin_assignment() {
        let topology = Topology::resolve(5, &hosts(&["h0", "h1"]), &HostId::new("cloud"), &HostId::new("rec")).unwrap();

        let placement: Vec<&str> = topology.sources().into_iter().map(|role| topology.host_of(role).unwrap().as_str()).collect();
        assert_eq!(placement, vec!["h0", "h1", "h0", "h1", "h0"]);
        assert_eq!(topology.host_of(Role::Helper).unwrap().as_str(), "cloud");
        assert_eq!(topology.host_of(Role::Receiver).unwrap().as_str(), "rec");
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let pool = hosts(&["a", "b", "c"]);
        let first = Topology::resolve(7, &pool, &HostId::new("a"), &HostId::new("b")).unwrap();
        let second = Topology::resolve(7, &pool, &HostId::new("a"), &HostId::new("b")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_host_pool_is_config_error() {
        let result = Topology::resolve(3, &[], &HostId::new("a"), &HostId::new("b"));
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_role_ids() {
        let topology = Topology::resolve(2, &hosts(&["h0"]), &HostId::new("h0"), &HostId::new("h0")).unwrap();
        let ids: Vec<String> = topology.roles().iter().map(|role| role.id().into()).collect();
        assert_eq!(ids, vec!["source_0", "source_1", "helper", "receiver"]);
        assert_eq!(topology.role(&RoleId::new("source_1")), Some(Role::Source(1)));
        assert_eq!(topology.role(&RoleId::new("source_2")), None);
        assert!(topology.host_of(Role::Source(2)).is_err());
    }
}
