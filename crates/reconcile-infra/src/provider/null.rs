//! The `null` provider: resources that exist only in state.
//!
//! Every attribute is echoed back as an output so other nodes can reference
//! it, and the identity is a fresh UUID. Changing `triggers` forces a
//! replacement (new identity), mirroring the classic `null_resource`.

use reconcile_core::provider::{Applied, ProviderSchema, ResourceProvider, ResourceRequest};
use reconcile_types::error::ProviderError;
use uuid::Uuid;

pub struct NullProvider;

impl NullProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn applied(identity: String, request: &ResourceRequest) -> Applied {
    Applied {
        identity,
        outputs: request.attributes.clone(),
    }
}

impl ResourceProvider for NullProvider {
    fn name(&self) -> &str {
        "null"
    }

    fn schema(&self) -> ProviderSchema {
        ProviderSchema::forcing(["triggers"])
    }

    async fn create(&self, request: &ResourceRequest) -> Result<Applied, ProviderError> {
        Ok(applied(Uuid::now_v7().to_string(), request))
    }

    async fn update(&self, identity: &str, request: &ResourceRequest) -> Result<Applied, ProviderError> {
        Ok(applied(identity.to_string(), request))
    }

    async fn delete(&self, _identity: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn exists(&self, _identity: &str) -> Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use serde_json::json;

    fn request() -> ResourceRequest {
        ResourceRequest::new(
            "marker",
            BTreeMap::from([("name".to_string(), json!("default"))]),
        )
    }

    #[tokio::test]
    async fn test_create_echoes_attributes_with_fresh_identity() {
        let provider = NullProvider::new();
        let first = provider.create(&request()).await.unwrap();
        let second = provider.create(&request()).await.unwrap();

        assert_ne!(first.identity, second.identity);
        assert!(Uuid::parse_str(&first.identity).is_ok());
        assert_eq!(first.outputs["name"], json!("default"));
    }

    #[tokio::test]
    async fn test_update_keeps_identity() {
        let provider = NullProvider::new();
        let updated = provider.update("fixed", &request()).await.unwrap();
        assert_eq!(updated.identity, "fixed");
        assert!(provider.schema().forces_replacement("triggers"));
    }
}
