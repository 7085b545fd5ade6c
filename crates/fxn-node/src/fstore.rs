//! Function artifact store interface.

use std::path::PathBuf;

use futures::future::BoxFuture;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Function not installed: {0}")]
    NotFound(String),

    #[error("Install of {cid} from {uri} failed: {reason}")]
    InstallFailed {
        cid: String,
        uri: String,
        reason: String,
    },

    #[error("Unsupported manifest location: {0}")]
    UnsupportedUri(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// An installed function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionArtifact {
    /// Content ID of the function.
    pub cid: String,
    /// Location the function was installed from.
    pub manifest_url: String,
    /// Directory holding the function's files.
    pub path: PathBuf,
}

pub trait FunctionStore: Send + Sync {
    fn get<'a>(&'a self, cid: &'a str) -> BoxFuture<'a, Result<FunctionArtifact, StoreError>>;

    /// Fetch and install a function. Installing an installed function is a no-op.
    fn install<'a>(
        &'a self,
        manifest_url: &'a str,
        cid: &'a str,
    ) -> BoxFuture<'a, Result<FunctionArtifact, StoreError>>;

    fn is_installed<'a>(&'a self, cid: &'a str) -> BoxFuture<'a, Result<bool, StoreError>>;
}
