use serde::{Deserialize, Serialize};

use crate::constants::PBFT_MINIMUM_REPLICA_COUNT;
use crate::error::ProtocolError;

/// Consensus protocol a cluster runs while executing a request.
///
/// The node only forms the replica set and validates its size; the
/// consensus algorithms themselves run elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusType {
    #[default]
    #[serde(alias = "")]
    None,
    Raft,
    Pbft,
}

impl ConsensusType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Raft => "raft",
            Self::Pbft => "pbft",
        }
    }

    /// Whether requests with this consensus need a formed cluster.
    pub fn is_required(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Smallest replica set this protocol accepts, if it has one.
    pub fn minimum_replicas(&self) -> Option<usize> {
        match self {
            Self::Pbft => Some(PBFT_MINIMUM_REPLICA_COUNT),
            Self::None | Self::Raft => None,
        }
    }

    /// Number of execution results the head waits for from a cluster of
    /// `cluster_size` peers. Raft replies through its leader.
    pub fn expected_results(&self, cluster_size: usize) -> usize {
        match self {
            Self::Raft => cluster_size.min(1),
            Self::None | Self::Pbft => cluster_size,
        }
    }
}

impl std::str::FromStr for ConsensusType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "raft" => Ok(Self::Raft),
            "pbft" => Ok(Self::Pbft),
            other => Err(ProtocolError::UnknownConsensus(other.to_string())),
        }
    }
}

impl std::fmt::Display for ConsensusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
