use crate::constants::{
    BUFFER_MAX_SIZE, CHECK_HEART_BEAT_TIME, DATA_MAX_SIZE, SEND_HEART_BEAT_TIME, WAIT_CONNECT_TIME,
};
use crate::{ProtocolError, Result};
use std::time::Duration;

/// Settings shared by every session created from it.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Shared secret; enables the check-code step when set.
    pub password: Option<String>,
    /// Deadline for connecting and for each handshake read.
    pub wait_connect_time: Duration,
    /// Interval between outgoing heartbeats.
    pub send_heart_beat_time: Duration,
    /// Silence after which the peer is declared dead.
    pub check_heart_beat_time: Duration,
    /// Largest payload per frame, both directions.
    pub data_max_size: usize,
    /// Largest amount of received, undispatched data.
    pub buffer_max_size: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            password: None,
            wait_connect_time: WAIT_CONNECT_TIME,
            send_heart_beat_time: SEND_HEART_BEAT_TIME,
            check_heart_beat_time: CHECK_HEART_BEAT_TIME,
            data_max_size: DATA_MAX_SIZE,
            buffer_max_size: BUFFER_MAX_SIZE,
        }
    }
}

impl SessionConfig {
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_wait_connect_time(mut self, wait: Duration) -> Self {
        self.wait_connect_time = wait;
        self
    }

    pub fn with_heartbeat(mut self, send_every: Duration, timeout_after: Duration) -> Self {
        self.send_heart_beat_time = send_every;
        self.check_heart_beat_time = timeout_after;
        self
    }

    pub fn with_data_max_size(mut self, max: usize) -> Self {
        self.data_max_size = max;
        self
    }

    /// The password, treating an empty string as unset.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        if self.wait_connect_time.is_zero() {
            return Err(ProtocolError::InvalidConfig(
                "wait_connect_time must be non-zero".to_string(),
            ));
        }

        if self.send_heart_beat_time.is_zero() {
            return Err(ProtocolError::InvalidConfig(
                "send_heart_beat_time must be non-zero".to_string(),
            ));
        }

        if self.check_heart_beat_time <= self.send_heart_beat_time {
            return Err(ProtocolError::InvalidConfig(format!(
                "check_heart_beat_time ({:?}) must exceed send_heart_beat_time ({:?})",
                self.check_heart_beat_time, self.send_heart_beat_time
            )));
        }

        if self.data_max_size as u64 > u32::MAX as u64 {
            return Err(ProtocolError::InvalidConfig(format!(
                "data_max_size {} does not fit the length field",
                self.data_max_size
            )));
        }

        if self.data_max_size as u64 > self.buffer_max_size {
            return Err(ProtocolError::InvalidConfig(format!(
                "data_max_size {} exceeds buffer_max_size {}",
                self.data_max_size, self.buffer_max_size
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.password().is_none());
        assert_eq!(config.data_max_size, DATA_MAX_SIZE);
    }

    #[test]
    fn test_heartbeat_timeout_must_exceed_interval() {
        let config = SessionConfig::default()
            .with_heartbeat(Duration::from_secs(10), Duration::from_secs(10));
        assert!(matches!(config.validate(), Err(ProtocolError::InvalidConfig(_))));
    }

    #[test]
    fn test_empty_password_is_unset() {
        let config = SessionConfig::default().with_password("");
        assert!(config.password().is_none());

        let config = SessionConfig::default().with_password("123");
        assert_eq!(config.password(), Some("123"));
    }

    #[test]
    fn test_zero_wait_rejected() {
        let config = SessionConfig::default().with_wait_connect_time(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
