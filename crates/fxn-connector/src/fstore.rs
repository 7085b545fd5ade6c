//! Function store keeping each installed function in `<root>/<cid>/`.
//!
//! Only `file://` manifest locations are supported. The location may name
//! a single file or a directory whose regular files are copied.

use std::io;
use std::path::{Component, Path, PathBuf};

use futures::future::BoxFuture;
use fxn_node::{FunctionArtifact, FunctionStore, StoreError};

const MANIFEST_FILE: &str = ".manifest";
const FILE_SCHEME: &str = "file://";

pub struct DirFunctionStore {
    root: PathBuf,
}

impl DirFunctionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn function_dir(&self, cid: &str) -> Option<PathBuf> {
        is_plain_name(cid).then(|| self.root.join(cid))
    }

    async fn installed_dir(&self, cid: &str) -> Result<Option<PathBuf>, StoreError> {
        let Some(dir) = self.function_dir(cid) else {
            return Ok(None);
        };
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(Some(dir)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self, cid: &str) -> Result<FunctionArtifact, StoreError> {
        let dir = self
            .installed_dir(cid)
            .await?
            .ok_or_else(|| StoreError::NotFound(cid.to_string()))?;
        let manifest_url = tokio::fs::read_to_string(dir.join(MANIFEST_FILE))
            .await
            .unwrap_or_default();
        Ok(FunctionArtifact {
            cid: cid.to_string(),
            manifest_url: manifest_url.trim().to_string(),
            path: dir,
        })
    }

    async fn fetch(&self, manifest_url: &str, cid: &str) -> Result<FunctionArtifact, StoreError> {
        let source = manifest_url
            .strip_prefix(FILE_SCHEME)
            .map(PathBuf::from)
            .ok_or_else(|| StoreError::UnsupportedUri(manifest_url.to_string()))?;
        let target = self.function_dir(cid).ok_or_else(|| StoreError::InstallFailed {
            cid: cid.to_string(),
            uri: manifest_url.to_string(),
            reason: "invalid function id".into(),
        })?;
        let failed = |e: io::Error| StoreError::InstallFailed {
            cid: cid.to_string(),
            uri: manifest_url.to_string(),
            reason: e.to_string(),
        };

        // Staged under the root, then renamed into place.
        let staging = self.root.join(format!(".{cid}.partial"));
        if tokio::fs::metadata(&staging).await.is_ok() {
            tokio::fs::remove_dir_all(&staging).await.map_err(failed)?;
        }
        tokio::fs::create_dir_all(&staging).await.map_err(failed)?;

        let copied = copy_source(&source, &staging).await;
        if let Err(e) = copied {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(failed(e));
        }
        tokio::fs::write(staging.join(MANIFEST_FILE), manifest_url)
            .await
            .map_err(failed)?;
        tokio::fs::rename(&staging, &target).await.map_err(failed)?;

        tracing::info!(cid, manifest_url, path = %target.display(), "Function installed");
        Ok(FunctionArtifact {
            cid: cid.to_string(),
            manifest_url: manifest_url.to_string(),
            path: target,
        })
    }
}

impl FunctionStore for DirFunctionStore {
    fn get<'a>(&'a self, cid: &'a str) -> BoxFuture<'a, Result<FunctionArtifact, StoreError>> {
        Box::pin(self.load(cid))
    }

    fn install<'a>(
        &'a self,
        manifest_url: &'a str,
        cid: &'a str,
    ) -> BoxFuture<'a, Result<FunctionArtifact, StoreError>> {
        Box::pin(async move {
            if self.installed_dir(cid).await?.is_some() {
                tracing::debug!(cid, "Function already installed");
                return self.load(cid).await;
            }
            self.fetch(manifest_url, cid).await
        })
    }

    fn is_installed<'a>(&'a self, cid: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move { Ok(self.installed_dir(cid).await?.is_some()) })
    }
}

/// Relative path made only of normal components.
pub(crate) fn is_plain_name(name: &str) -> bool {
    let path = Path::new(name);
    !name.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

async fn copy_source(source: &Path, target: &Path) -> io::Result<()> {
    let meta = tokio::fs::metadata(source).await?;
    if meta.is_file() {
        let name = source
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "source has no file name"))?;
        tokio::fs::copy(source, target.join(name)).await?;
        return Ok(());
    }

    let mut entries = tokio::fs::read_dir(source).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            tokio::fs::copy(entry.path(), target.join(entry.file_name())).await?;
        }
    }
    Ok(())
}
