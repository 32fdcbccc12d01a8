use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use zsocket::SessionConfig;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub server: ServerSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub limits: LimitsSettings,
    #[serde(default)]
    pub heartbeat: HeartbeatSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    pub listen_addr: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SecuritySettings {
    /// Shared password; empty or missing disables the check-code step
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsSettings {
    /// Maximum concurrent connections
    #[serde(default = "default_max_conns")]
    pub max_conns: usize,
    /// Maximum payload size per frame in bytes
    #[serde(default = "default_max_frame")]
    pub max_frame_bytes: usize,
    /// Deadline for each handshake step in seconds
    #[serde(default = "default_wait_connect")]
    pub wait_connect_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeartbeatSettings {
    /// Interval between heartbeats in seconds
    #[serde(default = "default_heartbeat_send")]
    pub send_secs: u64,
    /// Silence tolerated before a client is dropped, in seconds
    #[serde(default = "default_heartbeat_check")]
    pub check_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Output logs as JSON
    #[serde(default)]
    pub json_logs: bool,
}

fn default_listen_port() -> u16 {
    7777
}

fn default_max_conns() -> usize {
    100
}

fn default_max_frame() -> usize {
    zsocket::constants::DATA_MAX_SIZE
}

fn default_wait_connect() -> u64 {
    zsocket::constants::WAIT_CONNECT_TIME.as_secs()
}

fn default_heartbeat_send() -> u64 {
    zsocket::constants::SEND_HEART_BEAT_TIME.as_secs()
}

fn default_heartbeat_check() -> u64 {
    zsocket::constants::CHECK_HEART_BEAT_TIME.as_secs()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LimitsSettings {
    fn default() -> Self {
        Self {
            max_conns: default_max_conns(),
            max_frame_bytes: default_max_frame(),
            wait_connect_secs: default_wait_connect(),
        }
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            send_secs: default_heartbeat_send(),
            check_secs: default_heartbeat_check(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

/// Searched in order: production, development, current directory
pub const CONFIG_PATHS: [&str; 3] = [
    "/etc/zsocket/server.toml",
    "configs/server.toml",
    "server.toml",
];

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// The first file in `paths` that loads, together with its path.
    pub fn find<'a>(paths: &[&'a str]) -> Option<(Self, &'a str)> {
        paths
            .iter()
            .find_map(|path| Self::from_file(path).ok().map(|config| (config, *path)))
    }

    pub fn default_config() -> Self {
        Self {
            server: ServerSettings {
                listen_addr: "0.0.0.0".to_string(),
                listen_port: default_listen_port(),
            },
            security: SecuritySettings {
                password: Some("123".to_string()),
            },
            limits: LimitsSettings::default(),
            heartbeat: HeartbeatSettings::default(),
            logging: LoggingSettings::default(),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.listen_addr, self.server.listen_port)
    }

    /// Settings applied to every accepted session
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            password: self.security.password.clone(),
            wait_connect_time: Duration::from_secs(self.limits.wait_connect_secs),
            send_heart_beat_time: Duration::from_secs(self.heartbeat.send_secs),
            check_heart_beat_time: Duration::from_secs(self.heartbeat.check_secs),
            data_max_size: self.limits.max_frame_bytes,
            ..SessionConfig::default()
        }
    }
}
