//! The `local_file` provider: manages one file per resource.
//!
//! Attributes:
//! - `path` (required): where the file lives; changing it forces replacement
//! - `content`: a string written verbatim, or any other value written as
//!   pretty-printed JSON; defaults to empty
//!
//! The identity is the path. Outputs are `path` and `sha256` of the content.

use std::io::ErrorKind;
use std::path::PathBuf;

use reconcile_core::provider::{Applied, ProviderSchema, ResourceProvider, ResourceRequest};
use reconcile_types::error::ProviderError;

use crate::fs::atomic_write;
use crate::hash::sha256_hex;

pub struct LocalFileProvider;

impl LocalFileProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalFileProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// A file's desired path and bytes, taken from a request.
struct DesiredFile {
    path: PathBuf,
    content: Vec<u8>,
}

impl DesiredFile {
    fn from_request(request: &ResourceRequest) -> Result<Self, ProviderError> {
        let path = request.str_attr("path").ok_or_else(|| {
            ProviderError::terminal(format!("{}: attribute 'path' is required", request.node_id))
        })?;

        let content = match request.attributes.get("content") {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => serde_json::to_string_pretty(other)
                .map_err(|e| ProviderError::terminal(format!("unencodable content: {e}")))?,
        };

        Ok(Self {
            path: PathBuf::from(path),
            content: content.into_bytes(),
        })
    }

    fn applied(&self) -> Applied {
        let path = self.path.display().to_string();
        Applied::new(path.clone())
            .with_output("path", serde_json::Value::String(path))
            .with_output("sha256", serde_json::Value::String(sha256_hex(&self.content)))
    }

    async fn write(self) -> Result<Applied, ProviderError> {
        let applied = self.applied();
        tokio::task::spawn_blocking(move || atomic_write(&self.path, &self.content))
            .await
            .map_err(|e| ProviderError::retryable(format!("write task failed: {e}")))?
            .map_err(io_error)?;
        Ok(applied)
    }
}

fn io_error(e: std::io::Error) -> ProviderError {
    match e.kind() {
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut => {
            ProviderError::retryable(e.to_string())
        }
        _ => ProviderError::terminal(e.to_string()),
    }
}

impl ResourceProvider for LocalFileProvider {
    fn name(&self) -> &str {
        "local_file"
    }

    fn schema(&self) -> ProviderSchema {
        ProviderSchema::forcing(["path"])
    }

    async fn create(&self, request: &ResourceRequest) -> Result<Applied, ProviderError> {
        DesiredFile::from_request(request)?.write().await
    }

    async fn update(&self, _identity: &str, request: &ResourceRequest) -> Result<Applied, ProviderError> {
        DesiredFile::from_request(request)?.write().await
    }

    async fn delete(&self, identity: &str) -> Result<(), ProviderError> {
        match tokio::fs::remove_file(identity).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(e)),
        }
    }

    async fn exists(&self, identity: &str) -> Result<bool, ProviderError> {
        tokio::fs::try_exists(identity).await.map_err(io_error)
    }

    /// Adopt the file only if it already holds the desired content.
    async fn lookup(&self, request: &ResourceRequest) -> Result<Option<Applied>, ProviderError> {
        let desired = DesiredFile::from_request(request)?;
        match tokio::fs::read(&desired.path).await {
            Ok(actual) if actual == desired.content => Ok(Some(desired.applied())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use serde_json::json;

    fn request(path: &std::path::Path, content: serde_json::Value) -> ResourceRequest {
        ResourceRequest::new(
            "motd",
            BTreeMap::from([
                ("path".to_string(), json!(path.display().to_string())),
                ("content".to_string(), content),
            ]),
        )
    }

    #[tokio::test]
    async fn test_create_update_delete_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc/motd");
        let provider = LocalFileProvider::new();

        let created = provider.create(&request(&path, json!("hello\n"))).await.unwrap();
        assert_eq!(created.identity, path.display().to_string());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
        assert_eq!(created.outputs["sha256"], json!(sha256_hex(b"hello\n")));
        assert!(provider.exists(&created.identity).await.unwrap());

        provider
            .update(&created.identity, &request(&path, json!({"port": 80})))
            .await
            .unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("\"port\": 80"));

        provider.delete(&created.identity).await.unwrap();
        assert!(!path.exists());
        provider.delete(&created.identity).await.unwrap();
        assert!(!provider.exists(&created.identity).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_path_is_terminal() {
        let provider = LocalFileProvider::new();
        let err = provider
            .create(&ResourceRequest::new("motd", BTreeMap::new()))
            .await
            .unwrap_err();
        assert!(!err.retryable);
        assert!(err.message.contains("'path' is required"));
    }

    #[tokio::test]
    async fn test_lookup_adopts_only_matching_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("motd");
        let provider = LocalFileProvider::new();

        assert!(provider.lookup(&request(&path, json!("a"))).await.unwrap().is_none());

        std::fs::write(&path, "a").unwrap();
        let found = provider.lookup(&request(&path, json!("a"))).await.unwrap();
        assert_eq!(found.unwrap().identity, path.display().to_string());
        assert!(provider.lookup(&request(&path, json!("b"))).await.unwrap().is_none());
    }
}
