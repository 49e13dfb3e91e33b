use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::relay::codec::{WireFraming, DEFAULT_MAX_FRAME_LEN};
use crate::relay::reply::HandlePolicy;
use crate::relay::session::DEFAULT_READ_BUFFER_SIZE;
use crate::transport::ServiceRecord;

/// Which channel the relay listens on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Bluetooth RFCOMM through BlueZ
    Rfcomm,
    /// TCP socket (development)
    Tcp,
    /// Unix domain socket (development)
    Unix,
}

impl Default for TransportKind {
    fn default() -> Self {
        if cfg!(feature = "rfcomm") {
            TransportKind::Rfcomm
        } else {
            TransportKind::Tcp
        }
    }
}

/// Transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,
    /// Listen address for `tcp`
    #[serde(default = "default_tcp_addr")]
    pub tcp_addr: String,
    /// Socket path for `unix`
    #[serde(default = "default_unix_path")]
    pub unix_path: PathBuf,
    /// Fixed RFCOMM channel (BlueZ assigns one when unset)
    #[serde(default)]
    pub rfcomm_channel: Option<u16>,
    /// Answer of the permission gate for non-Bluetooth transports
    #[serde(default = "default_permission_granted")]
    pub permission_granted: bool,
}

fn default_tcp_addr() -> String {
    "127.0.0.1:7878".to_string()
}

fn default_unix_path() -> PathBuf {
    std::env::temp_dir().join("notification-relay-peer.sock")
}

fn default_permission_granted() -> bool {
    true
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            tcp_addr: default_tcp_addr(),
            unix_path: default_unix_path(),
            rfcomm_channel: None,
            permission_granted: default_permission_granted(),
        }
    }
}

/// Relay core tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// How messages are delimited on the channel
    #[serde(default)]
    pub framing: WireFraming,
    /// Largest accepted frame in bytes; bigger frames close the session
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    /// Size of a single channel read
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// When reply handles are forgotten
    #[serde(default)]
    pub handle_policy: HandlePolicy,
    /// Packages whose reply actions are registered (empty = all)
    #[serde(default = "default_reply_apps")]
    pub reply_apps: Vec<String>,
    /// Body used when a notification carries no text
    #[serde(default = "default_content")]
    pub default_content: String,
    /// Delay before re-activating a closed session (0 disables supervision)
    #[serde(default = "default_reactivate_delay")]
    pub reactivate_delay_secs: u64,
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

fn default_reply_apps() -> Vec<String> {
    vec!["com.whatsapp".to_string(), "org.telegram.messenger".to_string()]
}

fn default_content() -> String {
    "No content".to_string()
}

fn default_reactivate_delay() -> u64 {
    2
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            framing: WireFraming::default(),
            max_frame_len: default_max_frame_len(),
            read_buffer_size: default_read_buffer_size(),
            handle_policy: HandlePolicy::default(),
            reply_apps: default_reply_apps(),
            default_content: default_content(),
            reactivate_delay_secs: default_reactivate_delay(),
        }
    }
}

impl RelayConfig {
    /// Whether reply actions from `package` should be registered
    pub fn accepts_replies_from(&self, package: &str) -> bool {
        self.reply_apps.is_empty() || self.reply_apps.iter().any(|app| app == package)
    }
}

/// Local socket where the notification hook delivers events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    #[serde(default = "default_hook_socket")]
    pub socket_path: PathBuf,
}

fn default_hook_socket() -> PathBuf {
    std::env::temp_dir().join("notification-relay.sock")
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            socket_path: default_hook_socket(),
        }
    }
}

/// How desktop replies are handed back to the notifying app
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyConfig {
    /// Program and arguments; the reply handle and text are appended.
    /// Replies are only logged when empty.
    #[serde(default)]
    pub command: Vec<String>,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log filter used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Write logs to this file instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub service: ServiceRecord,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub hook: HookConfig,
    #[serde(default)]
    pub reply: ReplyConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
            service: ServiceRecord::default(),
            transport: TransportConfig::default(),
            relay: RelayConfig::default(),
            hook: HookConfig::default(),
            reply: ReplyConfig::default(),
        }
    }
}

impl Config {
    /// Load from the default location, writing the defaults there on first run
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            if let Err(e) = config.save() {
                tracing::warn!("Failed to save default config: {}", e);
            }
            Ok(config)
        }
    }

    /// Load from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// ~/.config/notification-relay/config.toml
    pub fn config_path() -> Result<PathBuf> {
        let base_dirs = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))?;
        Ok(base_dirs.home_dir().join(".config/notification-relay/config.toml"))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DEFAULT_SERVICE_UUID;
    use tempfile::tempdir;

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
log_level = "debug"

[transport]
kind = "unix"

[relay]
framing = "json"
reply_apps = ["com.whatsapp"]
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.transport.kind, TransportKind::Unix);
        assert_eq!(config.transport.tcp_addr, "127.0.0.1:7878");
        assert_eq!(config.relay.framing, WireFraming::Json);
        assert_eq!(config.relay.max_frame_len, DEFAULT_MAX_FRAME_LEN);
        assert_eq!(config.relay.default_content, "No content");
        assert_eq!(config.service.uuid, DEFAULT_SERVICE_UUID);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.relay.handle_policy = HandlePolicy::OnFirstUse;
        config.reply.command = vec!["reply-helper".to_string(), "--quiet".to_string()];
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.relay.handle_policy, HandlePolicy::OnFirstUse);
        assert_eq!(loaded.reply.command, config.reply.command);
        assert_eq!(loaded.service, config.service);
    }

    #[test]
    fn test_invalid_config_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "relay = 5").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_reply_allow_list() {
        let mut relay = RelayConfig::default();
        assert!(relay.accepts_replies_from("com.whatsapp"));
        assert!(relay.accepts_replies_from("org.telegram.messenger"));
        assert!(!relay.accepts_replies_from("org.thoughtcrime.securesms"));

        relay.reply_apps = vec!["com.whatsapp".to_string()];
        assert!(relay.accepts_replies_from("com.whatsapp"));
        assert!(!relay.accepts_replies_from("org.telegram.messenger"));

        relay.reply_apps.clear();
        assert!(relay.accepts_replies_from("org.thoughtcrime.securesms"));
    }
}
