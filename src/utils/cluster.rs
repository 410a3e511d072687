//! Cluster configuration file: replica membership and quorum parameters.

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;

use crate::protocols::RegProtocol;
use crate::server::ReplicaId;
use crate::utils::ReplikvError;

use serde::{Deserialize, Serialize};

/// One replica server's entry in the cluster configuration.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Replica ID; must be unique within the cluster.
    pub id: ReplicaId,

    /// Hostname or IP address.
    pub host: String,

    /// Client-facing API port.
    pub port: u16,
}

impl ServerInfo {
    /// Resolves this entry into a socket address.
    pub fn addr(&self) -> Result<SocketAddr, ReplikvError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                ReplikvError(format!(
                    "address '{}:{}' did not resolve",
                    self.host, self.port
                ))
            })
    }
}

/// Cluster configuration: the fixed replica set and quorum parameters,
/// loaded from a TOML file shared by servers and clients.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Ordered list of replica servers.
    pub servers: Vec<ServerInfo>,

    /// Which register protocol the cluster runs.
    pub protocol: RegProtocol,

    /// Read quorum size R.
    pub read_quorum: u8,

    /// Write quorum size W.
    pub write_quorum: u8,

    /// Advisory replica count; warned about if it disagrees with the
    /// length of `servers`.
    #[serde(default)]
    pub num_replicas: u8,
}

impl ClusterConfig {
    /// Loads and validates a cluster configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReplikvError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ClusterConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates quorum parameters against the server list. Inconsistent
    /// but workable settings produce warnings; unusable settings an error.
    pub fn validate(&self) -> Result<(), ReplikvError> {
        if self.servers.is_empty() {
            return logged_err!("config"; "no servers configured");
        }
        let population = self.servers.len() as u8;

        let mut ids = std::collections::HashSet::new();
        for server in &self.servers {
            if !ids.insert(server.id) {
                return logged_err!(
                    "config";
                    "duplicate server ID {} in config",
                    server.id
                );
            }
        }

        if self.read_quorum == 0 || self.write_quorum == 0 {
            return logged_err!(
                "config";
                "invalid quorum sizes R={} W={}",
                self.read_quorum,
                self.write_quorum
            );
        }
        if self.read_quorum > population || self.write_quorum > population {
            return logged_err!(
                "config";
                "quorum sizes R={} W={} exceed population {}",
                self.read_quorum,
                self.write_quorum,
                population
            );
        }

        if self.num_replicas > 0 && self.num_replicas != population {
            pf_warn!(
                "config";
                "num_replicas {} does not match number of servers {}",
                self.num_replicas,
                population
            );
        }

        // R + W > N is the intersection condition for linearizability
        if self.read_quorum as u16 + self.write_quorum as u16
            <= population as u16
        {
            pf_warn!(
                "config";
                "quorum sizes R={} W={} may not guarantee consistency with {} servers",
                self.read_quorum,
                self.write_quorum,
                population
            );
        }

        Ok(())
    }

    /// Number of replicas in the cluster.
    pub fn population(&self) -> u8 {
        self.servers.len() as u8
    }

    /// Looks up the config entry for a given replica ID.
    pub fn server(&self, id: ReplicaId) -> Option<&ServerInfo> {
        self.servers.iter().find(|s| s.id == id)
    }

    /// Resolves the full replica ID -> socket address map.
    pub fn addr_map(
        &self,
    ) -> Result<HashMap<ReplicaId, SocketAddr>, ReplikvError> {
        self.servers
            .iter()
            .map(|s| Ok((s.id, s.addr()?)))
            .collect()
    }
}

#[cfg(test)]
mod cluster_tests {
    use super::*;

    fn three_servers() -> Vec<ServerInfo> {
        (0..3)
            .map(|id| ServerInfo {
                id,
                host: "127.0.0.1".into(),
                port: 52700 + id as u16,
            })
            .collect()
    }

    #[test]
    fn parse_toml_config() -> Result<(), ReplikvError> {
        let content = r#"
            protocol = "abd"
            read_quorum = 2
            write_quorum = 2
            num_replicas = 3

            [[servers]]
            id = 0
            host = "127.0.0.1"
            port = 52700

            [[servers]]
            id = 1
            host = "127.0.0.1"
            port = 52701

            [[servers]]
            id = 2
            host = "127.0.0.1"
            port = 52702
        "#;
        let config: ClusterConfig =
            toml::from_str(content).map_err(ReplikvError::from)?;
        assert_eq!(config.protocol, RegProtocol::Abd);
        assert_eq!(config.population(), 3);
        assert_eq!(config.server(1).map(|s| s.port), Some(52701));
        config.validate()
    }

    #[test]
    fn validate_empty_servers() {
        let config = ClusterConfig {
            servers: vec![],
            protocol: RegProtocol::Abd,
            read_quorum: 1,
            write_quorum: 1,
            num_replicas: 0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_zero_quorum() {
        let config = ClusterConfig {
            servers: three_servers(),
            protocol: RegProtocol::Blocking,
            read_quorum: 0,
            write_quorum: 2,
            num_replicas: 3,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_oversized_quorum() {
        let config = ClusterConfig {
            servers: three_servers(),
            protocol: RegProtocol::Abd,
            read_quorum: 4,
            write_quorum: 2,
            num_replicas: 3,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_duplicate_ids() {
        let mut servers = three_servers();
        servers[2].id = 0;
        let config = ClusterConfig {
            servers,
            protocol: RegProtocol::Abd,
            read_quorum: 2,
            write_quorum: 2,
            num_replicas: 3,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn weak_quorums_warn_but_pass() -> Result<(), ReplikvError> {
        // R + W <= N does not guarantee consistency, but loads fine
        let config = ClusterConfig {
            servers: three_servers(),
            protocol: RegProtocol::Abd,
            read_quorum: 1,
            write_quorum: 1,
            num_replicas: 3,
        };
        config.validate()
    }

    #[test]
    fn addr_resolution() -> Result<(), ReplikvError> {
        let config = ClusterConfig {
            servers: three_servers(),
            protocol: RegProtocol::Abd,
            read_quorum: 2,
            write_quorum: 2,
            num_replicas: 3,
        };
        let addrs = config.addr_map()?;
        assert_eq!(addrs.len(), 3);
        assert_eq!(addrs[&0], "127.0.0.1:52700".parse()?);
        Ok(())
    }
}
