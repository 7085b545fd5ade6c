use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Message has no type tag")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Unknown consensus type: {0}")]
    UnknownConsensus(String),

    #[error("Unknown execution control action: {0}")]
    UnknownAction(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ProtocolError {
    /// True for errors caused by a malformed or unrecognised envelope, as
    /// opposed to a well-formed request with invalid contents.
    pub fn is_envelope(&self) -> bool {
        matches!(
            self,
            Self::Serialization(_) | Self::MissingType | Self::UnknownMessageType(_)
        )
    }
}
