//! Configuration types for the bridge.
//!
//! Two layers:
//! - [`ModuleConfig`] is the record the console hands to `init` /
//!   `config_updated` (JSON, owned by the console).
//! - [`BridgeSettings`] holds process-level tunables loaded from TOML.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Connection settings supplied by the console.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Auto-discovered engine address in `host:port` form. Wins over
    /// `host`/`port` when present.
    pub bonjour_host: Option<String>,
    /// Explicit engine host name or address.
    pub host: String,
    /// Explicit engine WebSocket port.
    pub port: Option<u16>,
    /// Set after a transport error cleared the connection fields; tells the
    /// operator a new address is required.
    pub need_new_config: bool,
}

impl ModuleConfig {
    /// WebSocket URL to connect to, or `None` when no address is resolvable.
    #[must_use]
    pub fn resolve_endpoint(&self) -> Option<String> {
        if let Some(bonjour) = self.bonjour_host.as_deref().map(str::trim)
            && !bonjour.is_empty()
        {
            return Some(format!("ws://{bonjour}"));
        }

        let host = self.host.trim();
        match self.port {
            Some(port) if !host.is_empty() && port > 0 => Some(format!("ws://{host}:{port}")),
            _ => None,
        }
    }

    /// Clear the address fields and flag that new configuration is needed.
    pub fn clear_connection(&mut self) {
        self.host.clear();
        self.port = None;
        self.need_new_config = true;
    }
}

/// Process-level tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Interval of the reconnection watchdog in milliseconds.
    pub reconnect_interval_ms: u64,
    /// Interval of the cache-miss rebuild checker in milliseconds.
    pub rebuild_interval_ms: u64,
    /// Quiet period before a registry change triggers a full refresh.
    pub refresh_debounce_ms: u64,
    /// Client identity announced in the connection handshake.
    pub client_id: String,
    /// Namespace passed to `getImageSet`.
    pub image_namespace: String,
    /// Whether image set entries should carry a `data:` MIME prefix.
    pub include_mime_prefix: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: 5_000,
            rebuild_interval_ms: 500,
            refresh_debounce_ms: 1_000,
            client_id: format!("companion-titler-{}", uuid::Uuid::new_v4().simple()),
            image_namespace: "companion".to_owned(),
            include_mime_prefix: false,
        }
    }
}

impl BridgeSettings {
    #[must_use]
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms.max(1))
    }

    #[must_use]
    pub fn rebuild_interval(&self) -> Duration {
        Duration::from_millis(self.rebuild_interval_ms.max(1))
    }

    #[must_use]
    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.refresh_debounce_ms)
    }

    /// Load settings from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::BridgeError::Config(e.to_string()))
    }

    /// Save settings to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the settings cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::BridgeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default settings path: `~/.config/titler-bridge/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config)
                .join("titler-bridge")
                .join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("titler-bridge")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/titler-bridge/config.toml")
        }
    }
}
