//! The two register protocol implementations.

mod abd;
mod blocking;

use std::fmt;
use std::net::SocketAddr;

use crate::client::{ClientId, GenericEndpoint};
use crate::server::{GenericReplica, ReplicaId};
use crate::utils::{ClusterConfig, ReplikvError};

use abd::{AbdClient, AbdReplica};
use blocking::{BlockingClient, BlockingReplica};

pub use abd::{ClientConfigAbd, ReplicaConfigAbd};
pub use blocking::{ClientConfigBlocking, ReplicaConfigBlocking};

use serde::{Deserialize, Serialize};

/// Helper macro for saving boiler-plate `Box<dyn ..>` mapping.
macro_rules! box_if_ok {
    ($r:expr) => {
        $r.map(|o| Box::new(o) as _) // explicitly coerce to unsized Box<dyn ..>
    };
}

/// Enum of supported register protocol types. The lowercase names are what
/// the cluster configuration file's `protocol` field uses.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegProtocol {
    Abd,
    Blocking,
}

impl fmt::Display for RegProtocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegProtocol::Abd => write!(f, "abd"),
            RegProtocol::Blocking => write!(f, "blocking"),
        }
    }
}

impl RegProtocol {
    /// Creates a server replica module instance of this protocol on heap.
    pub async fn new_server_replica(
        &self,
        id: ReplicaId,
        api_addr: SocketAddr,
        config_str: Option<&str>,
    ) -> Result<Box<dyn GenericReplica + Send>, ReplikvError> {
        match self {
            Self::Abd => {
                box_if_ok!(AbdReplica::new_and_setup(id, api_addr, config_str).await)
            }
            Self::Blocking => {
                box_if_ok!(
                    BlockingReplica::new_and_setup(id, api_addr, config_str)
                        .await
                )
            }
        }
    }

    /// Creates a client endpoint instance of this protocol on heap.
    pub async fn new_client_endpoint(
        &self,
        id: ClientId,
        cluster: ClusterConfig,
        config_str: Option<&str>,
    ) -> Result<Box<dyn GenericEndpoint + Send>, ReplikvError> {
        match self {
            Self::Abd => {
                box_if_ok!(AbdClient::new_and_setup(id, cluster, config_str).await)
            }
            Self::Blocking => {
                box_if_ok!(
                    BlockingClient::new_and_setup(id, cluster, config_str).await
                )
            }
        }
    }
}

#[cfg(test)]
mod protocols_tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        protocol: RegProtocol,
    }

    #[test]
    fn config_file_names() {
        let parsed: TestConfig = toml::from_str("protocol = \"abd\"").unwrap();
        assert_eq!(parsed.protocol, RegProtocol::Abd);
        let parsed: TestConfig =
            toml::from_str("protocol = \"blocking\"").unwrap();
        assert_eq!(parsed.protocol, RegProtocol::Blocking);
        assert!(toml::from_str::<TestConfig>("protocol = \"paxos\"").is_err());
    }

    #[test]
    fn display_matches_config_names() {
        for protocol in [RegProtocol::Abd, RegProtocol::Blocking] {
            let shown = format!("protocol = \"{}\"", protocol);
            let parsed: TestConfig = toml::from_str(&shown).unwrap();
            assert_eq!(parsed.protocol, protocol);
        }
    }
}
