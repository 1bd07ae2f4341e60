//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.warelay/config.json`) and environment.

use crate::channels::Provider;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Webhook server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Work queue, worker pool and send pacing.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Devices the gateway may reply through.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    /// Default AI engine settings.
    #[serde(default)]
    pub agents: AgentsConfig,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for the webhook endpoints (default 15152).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    15152
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchConfig {
    /// Messages waiting for a worker before webhooks are answered `busy` (default 64).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Concurrent processing tasks (default 4).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Pause before every outbound message, in milliseconds (default 1000).
    #[serde(default = "default_send_delay_ms")]
    pub send_delay_ms: u64,
}

fn default_queue_capacity() -> usize {
    64
}

fn default_workers() -> usize {
    4
}

fn default_send_delay_ms() -> u64 {
    1000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
            send_delay_ms: default_send_delay_ms(),
        }
    }
}

impl DispatchConfig {
    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }
}

/// One WhatsApp device and the credentials its provider needs for sending.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    /// Device id as it appears in the webhook path.
    pub id: String,
    pub provider: Provider,
    /// Wablas token, Whacenter device key, or WAHA `X-Api-Key`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Provider API base URL; each adapter has a default.
    #[serde(default)]
    pub base_url: Option<String>,
    /// WAHA session name (default "default").
    #[serde(default)]
    pub session: Option<String>,
}

/// AI engine defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsConfig {
    /// Ollama base URL. Overridden by WARELAY_OLLAMA_URL env when set.
    pub ollama_base_url: Option<String>,
    /// Ollama model name as shown by `ollama list`. When unset the first installed model is used.
    pub default_model: Option<String>,
    /// Persona prepended to every AI turn.
    pub system_prompt: Option<String>,
}

/// Resolve the Ollama base URL: env WARELAY_OLLAMA_URL overrides config.
pub fn resolve_ollama_url(config: &Config) -> Option<String> {
    std::env::var("WARELAY_OLLAMA_URL")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            config
                .agents
                .ollama_base_url
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("WARELAY_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".warelay").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or WARELAY_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    validate(&config)?;
    Ok((config, path))
}

fn validate(config: &Config) -> Result<()> {
    if config.dispatch.queue_capacity == 0 {
        anyhow::bail!("dispatch.queueCapacity must be at least 1");
    }
    if config.dispatch.workers == 0 {
        anyhow::bail!("dispatch.workers must be at least 1");
    }
    let mut seen = std::collections::HashSet::new();
    for d in &config.devices {
        if d.id.trim().is_empty() {
            anyhow::bail!("devices: every device needs a non-empty id");
        }
        if !seen.insert(d.id.as_str()) {
            anyhow::bail!("devices: duplicate device id {:?}", d.id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.gateway.port, 15152);
        assert_eq!(c.gateway.bind, "127.0.0.1");
        assert_eq!(c.dispatch.queue_capacity, 64);
        assert_eq!(c.dispatch.workers, 4);
        assert_eq!(c.dispatch.send_delay(), Duration::from_secs(1));
    }

    #[test]
    fn empty_object_parses_to_defaults() {
        let c: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(c.dispatch.send_delay_ms, 1000);
        assert!(c.devices.is_empty());
    }

    #[test]
    fn devices_parse_camel_case() {
        let c: Config = serde_json::from_str(
            r#"{"dispatch":{"sendDelayMs":250},
                "devices":[{"id":"shop-1","provider":"waha","apiKey":"k","baseUrl":"http://waha:3000","session":"shop"}]}"#,
        )
        .unwrap();
        assert_eq!(c.dispatch.send_delay_ms, 250);
        assert_eq!(c.dispatch.workers, 4);
        let d = &c.devices[0];
        assert_eq!(d.provider, Provider::Waha);
        assert_eq!(d.api_key.as_deref(), Some("k"));
        assert_eq!(d.session.as_deref(), Some("shop"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join(format!("warelay-missing-{}.json", uuid::Uuid::new_v4()));
        let (c, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert_eq!(c.gateway.port, 15152);
    }

    #[test]
    fn duplicate_devices_are_rejected() {
        let c: Config = serde_json::from_str(
            r#"{"devices":[{"id":"a","provider":"wablas"},{"id":"a","provider":"whacenter"}]}"#,
        )
        .unwrap();
        assert!(validate(&c).is_err());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut c = Config::default();
        c.dispatch.workers = 0;
        assert!(validate(&c).is_err());
    }
}
