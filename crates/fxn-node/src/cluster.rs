//! Peer sets tracked per request.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fxn_protocol::{ConsensusType, PeerId};
use parking_lot::RwLock;

use crate::error::NodeError;

/// Peers selected to serve one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    /// Request the cluster serves.
    pub request_id: String,
    /// Peers in the cluster, in roll call order.
    pub peers: Vec<PeerId>,
    /// Protocol the peers run, `None` for plain fan out.
    pub consensus: ConsensusType,
    /// When the cluster was admitted. Bounded tables evict the oldest first.
    pub formed_at: DateTime<Utc>,
}

impl Cluster {
    pub fn new(request_id: impl Into<String>, peers: Vec<PeerId>, consensus: ConsensusType) -> Self {
        Self {
            request_id: request_id.into(),
            peers,
            consensus,
            formed_at: Utc::now(),
        }
    }
}

/// Request ID to peer set, behind a single read/write lock.
#[derive(Default)]
pub struct ClusterTable {
    clusters: RwLock<HashMap<String, Cluster>>,
    /// Zero means unbounded.
    capacity: usize,
}

impl ClusterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table holding at most `capacity` clusters. Inserting into a full
    /// table drops the longest-standing cluster.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            clusters: RwLock::default(),
            capacity,
        }
    }

    /// Insert a cluster if `admit` accepts it. `admit` runs under the write
    /// lock, so the check and the insert are atomic.
    pub fn admit<F>(&self, cluster: Cluster, admit: F) -> Result<(), NodeError>
    where
        F: FnOnce(&HashMap<String, Cluster>) -> Result<(), NodeError>,
    {
        let mut clusters = self.clusters.write();
        admit(&clusters)?;
        clusters.insert(cluster.request_id.clone(), cluster);
        Ok(())
    }

    pub fn insert(&self, cluster: Cluster) {
        let mut clusters = self.clusters.write();
        if self.capacity > 0 && !clusters.contains_key(&cluster.request_id) {
            while clusters.len() >= self.capacity {
                let Some(oldest) = clusters
                    .values()
                    .min_by_key(|c| c.formed_at)
                    .map(|c| c.request_id.clone())
                else {
                    break;
                };
                tracing::debug!(request_id = %oldest, "Cluster table full, dropping oldest");
                clusters.remove(&oldest);
            }
        }
        clusters.insert(cluster.request_id.clone(), cluster);
    }

    pub fn remove(&self, request_id: &str) -> Option<Cluster> {
        self.clusters.write().remove(request_id)
    }

    pub fn get(&self, request_id: &str) -> Option<Cluster> {
        self.clusters.read().get(request_id).cloned()
    }

    pub fn peers(&self, request_id: &str) -> Option<Vec<PeerId>> {
        self.clusters
            .read()
            .get(request_id)
            .map(|cluster| cluster.peers.clone())
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.clusters.read().contains_key(request_id)
    }

    /// Whether any tracked cluster runs the given consensus.
    pub fn any_with(&self, consensus: ConsensusType) -> bool {
        self.clusters
            .read()
            .values()
            .any(|cluster| cluster.consensus == consensus)
    }

    pub fn len(&self) -> usize {
        self.clusters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
