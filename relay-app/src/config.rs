//! Relaybot configuration loader.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    pub general: GeneralConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Fixed system instructions prepended to every prompt.
    pub system_prompt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
        }
    }
}

fn default_base_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".relaybot").join("data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Argv of the harness command that submits a prompt (prompt on stdin).
    #[serde(default)]
    pub submit_command: Vec<String>,
    /// Argv of the harness command that prints the rendered reply.
    #[serde(default)]
    pub observe_command: Vec<String>,
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default = "default_stability_count")]
    pub stability_count: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Fairness delay between queue items inside one dispatch cycle.
    #[serde(default = "default_idle_delay_ms")]
    pub idle_delay_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            submit_command: Vec::new(),
            observe_command: Vec::new(),
            check_interval_ms: default_check_interval_ms(),
            stability_count: default_stability_count(),
            timeout_secs: default_timeout_secs(),
            idle_delay_ms: default_idle_delay_ms(),
        }
    }
}

fn default_check_interval_ms() -> u64 {
    2_000
}

fn default_stability_count() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    90
}

fn default_idle_delay_ms() -> u64 {
    200
}

impl ProviderConfig {
    pub fn response_policy(&self) -> relay_provider::ResponsePolicy {
        relay_provider::ResponsePolicy {
            check_interval: Duration::from_millis(self.check_interval_ms),
            stability_count: self.stability_count,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub phone_number_id: String,
    /// Token echoed back during the webhook subscription handshake.
    #[serde(default)]
    pub verify_token: String,
    #[serde(default = "default_webhook_port")]
    pub webhook_port: u16,
}

fn default_webhook_port() -> u16 {
    8433
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BroadcastConfig {
    /// Static recipient list for the one-time advertising broadcast.
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub message: String,
}

impl RelayConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;

        let mut cfg: RelayConfig = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WHATSAPP_ACCESS_TOKEN") {
            if !v.trim().is_empty() {
                self.whatsapp.access_token = v;
            }
        }
        if let Ok(v) = std::env::var("WHATSAPP_PHONE_NUMBER_ID") {
            if !v.trim().is_empty() {
                self.whatsapp.phone_number_id = v;
            }
        }
        if let Ok(v) = std::env::var("WHATSAPP_VERIFY_TOKEN") {
            if !v.trim().is_empty() {
                self.whatsapp.verify_token = v;
            }
        }
        if let Ok(v) = std::env::var("RELAYBOT_BASE_DIR") {
            if !v.trim().is_empty() {
                self.storage.base_dir = PathBuf::from(v);
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.general.system_prompt.trim().is_empty() {
            return Err(anyhow::anyhow!("general.system_prompt is required"));
        }
        if self.provider.check_interval_ms == 0 {
            return Err(anyhow::anyhow!("provider.check_interval_ms must be > 0"));
        }
        if self.provider.stability_count == 0 {
            return Err(anyhow::anyhow!("provider.stability_count must be >= 1"));
        }
        if Duration::from_secs(self.provider.timeout_secs)
            < Duration::from_millis(self.provider.check_interval_ms)
        {
            return Err(anyhow::anyhow!(
                "provider.timeout_secs must cover at least one check interval"
            ));
        }
        if self.whatsapp.webhook_port == 0 {
            return Err(anyhow::anyhow!("whatsapp.webhook_port must be > 0"));
        }
        if !self.broadcast.recipients.is_empty() && self.broadcast.message.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "broadcast.message is required when broadcast.recipients is set"
            ));
        }
        Ok(())
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".relaybot").join("config.toml")
}
