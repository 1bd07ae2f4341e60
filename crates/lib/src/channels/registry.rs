//! Send adapter registry: provider adapters and per-device credentials.

use crate::channels::inbound::Provider;
use crate::config::DeviceConfig;
use crate::reply::PartKind;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Credentials a provider adapter needs to send on behalf of one device.
#[derive(Debug, Clone, Default)]
pub struct DeviceCredentials {
    pub device_id: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// WAHA session name.
    pub session: Option<String>,
}

impl DeviceCredentials {
    /// Base URL with any trailing slash removed, or the adapter's default.
    pub fn base_url_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.base_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .filter(|u| !u.is_empty())
            .unwrap_or(default)
    }
}

impl From<&DeviceConfig> for DeviceCredentials {
    fn from(d: &DeviceConfig) -> Self {
        Self {
            device_id: d.id.clone(),
            api_key: d.api_key.clone(),
            base_url: d.base_url.clone(),
            session: d.session.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("send request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider api error: {0}")]
    Api(String),
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
    #[error("{0} cannot be sent as media")]
    UnsupportedKind(&'static str),
}

/// Outbound half of a provider integration.
#[async_trait]
pub trait SendAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    async fn send_text(
        &self,
        device: &DeviceCredentials,
        to: &str,
        text: &str,
    ) -> Result<(), SendError>;

    async fn send_image(
        &self,
        device: &DeviceCredentials,
        to: &str,
        url: &str,
        caption: Option<&str>,
    ) -> Result<(), SendError>;

    /// Audio and video attachments.
    async fn send_media(
        &self,
        device: &DeviceCredentials,
        to: &str,
        kind: PartKind,
        url: &str,
    ) -> Result<(), SendError>;
}

/// Adapters by provider plus device credentials by device id. Shared across workers.
pub struct AdapterRegistry {
    adapters: Arc<RwLock<HashMap<Provider, Arc<dyn SendAdapter>>>>,
    devices: Arc<RwLock<HashMap<String, DeviceCredentials>>>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: Arc::new(RwLock::new(HashMap::new())),
            devices: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register an adapter under its provider, replacing any previous one.
    pub async fn register(&self, adapter: Arc<dyn SendAdapter>) {
        let provider = adapter.provider();
        if self.adapters.write().await.insert(provider, adapter).is_some() {
            log::debug!("registry: replaced {} adapter", provider);
        }
    }

    pub async fn get(&self, provider: Provider) -> Option<Arc<dyn SendAdapter>> {
        self.adapters.read().await.get(&provider).cloned()
    }

    pub async fn register_device(&self, credentials: DeviceCredentials) {
        self.devices
            .write()
            .await
            .insert(credentials.device_id.clone(), credentials);
    }

    pub async fn device(&self, device_id: &str) -> Option<DeviceCredentials> {
        self.devices.read().await.get(device_id).cloned()
    }
}

/// Map a non-2xx provider answer to [`SendError::Api`].
pub(crate) async fn ensure_success(res: reqwest::Response) -> Result<(), SendError> {
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        return Err(SendError::Api(format!("{} {}", status, body)));
    }
    Ok(())
}
