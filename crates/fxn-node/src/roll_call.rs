//! Roll call bookkeeping.
//!
//! A head registers an entry right before publishing a roll call and drops it
//! the moment it stops listening. Responses are queued per request ID on an
//! unbounded channel so the receive loop never blocks on a slow orchestrator.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fxn_protocol::{Attributes, Code, ConsensusType, PeerId, ANY_NODE_COUNT};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::NodeError;

/// A roll call answer as seen by the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollCallReply {
    /// Transport-level sender, not a claim made in the payload.
    pub from: PeerId,
    /// Function the peer says it can run.
    pub function_id: String,
    /// `Accepted` when the peer volunteers.
    pub code: Code,
}

/// How many peers a roll call is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCount {
    /// Everyone who answers before the window closes.
    Any,
    Exactly(usize),
}

impl NodeCount {
    pub fn is_satisfied_by(&self, peers: usize) -> bool {
        match self {
            Self::Any => false,
            Self::Exactly(n) => peers >= *n,
        }
    }
}

impl From<i32> for NodeCount {
    fn from(count: i32) -> Self {
        if count == ANY_NODE_COUNT {
            Self::Any
        } else {
            Self::Exactly(usize::try_from(count).unwrap_or(1).max(1))
        }
    }
}

impl std::fmt::Display for NodeCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Exactly(n) => write!(f, "{n}"),
        }
    }
}

struct Entry {
    function_id: String,
    consensus: ConsensusType,
    attributes: Option<Attributes>,
    created_at: DateTime<Utc>,
    tx: mpsc::UnboundedSender<RollCallReply>,
    rx: Option<mpsc::UnboundedReceiver<RollCallReply>>,
}

/// Active roll calls keyed by request ID.
#[derive(Default)]
pub struct RollCallCollector {
    entries: Mutex<HashMap<String, Entry>>,
}

impl RollCallCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a roll call. Fails if one is active for the same request.
    ///
    /// The returned guard removes the entry when dropped.
    pub fn create(
        &self,
        request_id: &str,
        function_id: &str,
        consensus: ConsensusType,
        attributes: Option<Attributes>,
    ) -> Result<RollCallGuard<'_>, NodeError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(request_id) {
            return Err(NodeError::RollCallExists(request_id.to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        entries.insert(
            request_id.to_string(),
            Entry {
                function_id: function_id.to_string(),
                consensus,
                attributes,
                created_at: Utc::now(),
                tx,
                rx: Some(rx),
            },
        );
        Ok(RollCallGuard {
            collector: self,
            request_id: request_id.to_string(),
        })
    }

    /// Remove an entry, closing its channel. Safe to call repeatedly.
    pub fn remove(&self, request_id: &str) {
        if let Some(entry) = self.entries.lock().remove(request_id) {
            let open_for = Utc::now() - entry.created_at;
            tracing::debug!(
                request_id,
                open_ms = open_for.num_milliseconds(),
                "Roll call closed"
            );
        }
    }

    /// Queue a reply. Returns false, dropping the reply, if no roll call is
    /// active for the request.
    pub fn add(&self, request_id: &str, reply: RollCallReply) -> bool {
        let entries = self.entries.lock();
        match entries.get(request_id) {
            Some(entry) => entry.tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// Take the reply stream for a request. Only the first caller gets it.
    pub fn responses(&self, request_id: &str) -> Option<mpsc::UnboundedReceiver<RollCallReply>> {
        self.entries
            .lock()
            .get_mut(request_id)
            .and_then(|entry| entry.rx.take())
    }

    pub fn exists(&self, request_id: &str) -> bool {
        self.entries.lock().contains_key(request_id)
    }

    pub fn function_id(&self, request_id: &str) -> Option<String> {
        self.entries
            .lock()
            .get(request_id)
            .map(|entry| entry.function_id.clone())
    }

    pub fn consensus(&self, request_id: &str) -> Option<ConsensusType> {
        self.entries.lock().get(request_id).map(|entry| entry.consensus)
    }

    /// Attribute constraints the roll call was published with.
    pub fn attributes(&self, request_id: &str) -> Option<Attributes> {
        self.entries
            .lock()
            .get(request_id)
            .and_then(|entry| entry.attributes.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes its roll call entry on drop.
pub struct RollCallGuard<'a> {
    collector: &'a RollCallCollector,
    request_id: String,
}

impl RollCallGuard<'_> {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl Drop for RollCallGuard<'_> {
    fn drop(&mut self) {
        self.collector.remove(&self.request_id);
    }
}
