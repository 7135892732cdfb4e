use anyhow::{anyhow, Context, Result};
use std::time::Duration;

use super::{ObjectStore, StoreRequest};

#[derive(Clone, Debug)]
pub struct HttpObjectStoreConfig {
    /// Base URL, e.g. `https://objects.example.com`.
    pub endpoint: String,
    pub bucket: String,
    /// Sent as `Authorization: Bearer ...` when present.
    pub token: Option<String>,
    pub timeout: Duration,
}

/// Uploads snapshots with `PUT {endpoint}/{bucket}/{key}`.
pub struct HttpObjectStore {
    config: HttpObjectStoreConfig,
    agent: ureq::Agent,
}

impl HttpObjectStore {
    pub fn new(config: HttpObjectStoreConfig) -> Result<Self> {
        let url = url::Url::parse(&config.endpoint)
            .with_context(|| format!("parse storage endpoint {}", config.endpoint))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "storage endpoint must be http(s), got {}",
                config.endpoint
            ));
        }
        if config.bucket.is_empty() || config.bucket.contains('/') {
            return Err(anyhow!("invalid storage bucket '{}'", config.bucket));
        }
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self { config, agent })
    }

    pub fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.bucket,
            key
        )
    }
}

impl ObjectStore for HttpObjectStore {
    fn name(&self) -> &'static str {
        "http"
    }

    fn store(&self, request: &StoreRequest<'_>) -> Result<String> {
        let key = request.storage_key();
        let url = self.object_url(&key);
        let mut put = self.agent.put(&url).set("Content-Type", "image/jpeg");
        if let Some(token) = &self.config.token {
            put = put.set("Authorization", &format!("Bearer {}", token));
        }
        put.send_bytes(request.jpeg)
            .with_context(|| format!("upload snapshot to {}", url))?;
        Ok(key)
    }
}
