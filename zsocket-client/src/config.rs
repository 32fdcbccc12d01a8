use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use zsocket::SessionConfig;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    pub client: ClientSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub heartbeat: HeartbeatSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientSettings {
    pub server_addr: String,
    pub server_port: u16,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SecuritySettings {
    /// Shared password; must match the server's
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_wait_connect")]
    pub wait_connect_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeartbeatSettings {
    #[serde(default = "default_heartbeat_send")]
    pub send_secs: u64,
    #[serde(default = "default_heartbeat_check")]
    pub check_secs: u64,
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

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
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

/// Searched in order: production, development, current directory
pub const CONFIG_PATHS: [&str; 3] = [
    "/etc/zsocket/client.toml",
    "configs/client.toml",
    "client.toml",
];

impl ClientConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&contents)?;
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
            client: ClientSettings {
                server_addr: "localhost".to_string(),
                server_port: 7777,
            },
            security: SecuritySettings {
                password: Some("123".to_string()),
            },
            timeouts: TimeoutSettings::default(),
            heartbeat: HeartbeatSettings::default(),
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.client.server_addr, self.client.server_port)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            password: self.security.password.clone(),
            wait_connect_time: Duration::from_secs(self.timeouts.wait_connect_secs),
            send_heart_beat_time: Duration::from_secs(self.heartbeat.send_secs),
            check_heart_beat_time: Duration::from_secs(self.heartbeat.check_secs),
            ..SessionConfig::default()
        }
    }
}
