use fxn_protocol::{PeerId, ProtocolError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Encoding error: {0}")]
    Encoding(#[from] ProtocolError),

    #[error("Send to {peer} failed: {reason}")]
    Send { peer: PeerId, reason: String },

    #[error("Topic error: {0}")]
    Topic(String),

    #[error("{0}")]
    PartialSend(SendFailures),

    #[error("all sends failed: {0}")]
    AllSendsFailed(SendFailures),

    #[error("Network closed")]
    Closed,
}

impl NetworkError {
    pub fn is_send_failure(&self) -> bool {
        matches!(
            self,
            Self::Send { .. } | Self::PartialSend(_) | Self::AllSendsFailed(_)
        )
    }

    /// Peers that could not be reached, for send errors.
    pub fn failed_peers(&self) -> Vec<PeerId> {
        match self {
            Self::Send { peer, .. } => vec![peer.clone()],
            Self::PartialSend(f) | Self::AllSendsFailed(f) => {
                f.failures.iter().map(|(peer, _)| peer.clone()).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Per-peer failures collected by a fan-out send.
#[derive(Debug, Clone, Default)]
pub struct SendFailures {
    /// Number of peers the send was attempted to.
    pub total: usize,
    /// Each failed peer with its error text.
    pub failures: Vec<(PeerId, String)>,
}

impl std::fmt::Display for SendFailures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} of {} sends failed", self.failures.len(), self.total)?;
        for (peer, reason) in &self.failures {
            write!(f, "; peer {peer}: {reason}")?;
        }
        Ok(())
    }
}
