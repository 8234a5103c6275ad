//! catalog
//! -------
//! Thin client for the upstream catalog API. Resources are described by a
//! JSON:API envelope; the fields this engine cares about live under
//! `data.attributes`.

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceMeta {
    pub download_url: Option<String>,
    pub format: Option<String>,
    pub media_type: Option<String>,
    pub file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    data: Option<EnvelopeData>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    attributes: Option<ResourceMeta>,
}

#[derive(Debug, Clone)]
pub struct CatalogClient {
    base: String,
    client: Client,
}

impl CatalogClient {
    pub fn new(base: impl Into<String>, client: Client) -> Self {
        Self { base: base.into().trim_end_matches('/').to_string(), client }
    }

    pub async fn lookup_resource(&self, resource_id: u64) -> EngineResult<ResourceMeta> {
        let url = format!("{}/resources/{}", self.base, resource_id);
        debug!(target: "tabq::catalog", resource_id, %url, "resource lookup");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::transport(resource_id, e.to_string()))?;
        if !resp.status().is_success() {
            return Err(EngineError::transport(
                resource_id,
                format!("catalog returned HTTP {} for {}", resp.status(), url),
            ));
        }
        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| EngineError::transport(resource_id, e.to_string()))?;
        envelope
            .data
            .and_then(|d| d.attributes)
            .ok_or_else(|| {
                EngineError::transport(resource_id, "catalog response has no attributes".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_stripped() {
        let c = CatalogClient::new("https://example.test/", Client::new());
        assert_eq!(c.base, "https://example.test");
    }

    #[test]
    fn envelope_deserializes_attributes() {
        let body = r#"{"data": {"id": "100", "attributes": {
            "download_url": "https://example.test/f.csv",
            "format": "csv",
            "media_type": "file",
            "file_size": 12345
        }}}"#;
        let env: Envelope = serde_json::from_str(body).unwrap();
        let attrs = env.data.unwrap().attributes.unwrap();
        assert_eq!(attrs.format.as_deref(), Some("csv"));
        assert_eq!(attrs.media_type.as_deref(), Some("file"));
        assert_eq!(attrs.file_size, Some(12345));
    }

    #[test]
    fn missing_attributes_tolerated_by_shape() {
        let env: Envelope = serde_json::from_str(r#"{"data": null}"#).unwrap();
        assert!(env.data.is_none());
    }
}
