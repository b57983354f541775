use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "localshare";
const APP_NAME: &str = "localshare";
const CONFIG_FILE: &str = "config.json";
const CONFIG_DIR_ENV: &str = "LOCALSHARE_CONFIG_DIR";

/// Well-known port of the data channel (one connection per file)
pub const DEFAULT_DATA_PORT: u16 = 8008;
/// Well-known port of the handshake control channel
pub const DEFAULT_CONTROL_PORT: u16 = 8009;
/// UDP port used by the LAN event source for announcements
pub const DEFAULT_DISCOVERY_PORT: u16 = 8010;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage_root: PathBuf,
    pub control_port: u16,
    pub data_port: u16,
    pub discovery_port: u16,
    pub connect_timeout_secs: u64,
    pub warmup_delay_ms: u64,
    pub device_name: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        // ~/localshare on every platform
        let storage_root = directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
            .join("localshare");

        Self {
            storage_root,
            control_port: DEFAULT_CONTROL_PORT,
            data_port: DEFAULT_DATA_PORT,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            connect_timeout_secs: 15,
            warmup_delay_ms: 3000,
            device_name: None,
        }
    }
}

impl AppConfig {
    fn get_config_path() -> Option<PathBuf> {
        get_config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    /// Load config from disk or return default
    pub fn load() -> Self {
        let path = match Self::get_config_path() {
            Some(p) => p,
            None => return Self::default(),
        };

        match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed config {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save config to disk
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::get_config_path()
            .ok_or_else(|| anyhow::anyhow!("No config directory available"))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Name shown to peers; falls back to the host name.
    pub fn device_name(&self) -> String {
        self.device_name.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|s| s.into_string().ok())
                .unwrap_or_else(|| "Unknown-Device".to_string())
        })
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            storage_root: self.storage_root.clone(),
            control_port: self.control_port,
            data_port: self.data_port,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            warmup_delay: Duration::from_millis(self.warmup_delay_ms),
        }
    }
}

/// Runtime knobs for the handshake and the transfer engine.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub storage_root: PathBuf,
    pub control_port: u16,
    pub data_port: u16,
    pub connect_timeout: Duration,
    /// Sender waits this long so a slower receiver can open its data socket
    pub warmup_delay: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        AppConfig::default().transfer_settings()
    }
}

/// Get the config directory path for this app
pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return Some(PathBuf::from(dir));
    }
    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_well_known_ports() {
        let config = AppConfig::default();
        assert_eq!(config.control_port, 8009);
        assert_eq!(config.data_port, 8008);
        assert_ne!(config.control_port, config.data_port);

        let settings = config.transfer_settings();
        assert_eq!(settings.connect_timeout, Duration::from_secs(15));
        assert_eq!(settings.warmup_delay, Duration::from_secs(3));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"data_port": 9100, "device_name": "tablet"}"#)
                .expect("Should deserialize");

        assert_eq!(config.data_port, 9100);
        assert_eq!(config.control_port, DEFAULT_CONTROL_PORT);
        assert_eq!(config.device_name(), "tablet");
    }
}
