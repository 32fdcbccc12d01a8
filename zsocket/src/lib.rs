pub mod client;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod framing;
pub mod handshake;
pub mod heartbeat;
pub mod registry;
pub mod server;
pub mod session;
pub mod state;

pub use client::connect;
pub use config::SessionConfig;
pub use framing::{Frame, FrameCodec, FrameTag};
pub use handshake::Handshake;
pub use registry::SessionRegistry;
pub use server::Server;
pub use session::{Session, SessionHandler};
pub use state::{CloseReason, ConnectionState, Role};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),

    #[error("Receive buffer overflow: {0} bytes (max: {1})")]
    BufferOverflow(u64, u64),

    #[error("Unknown frame tag: {0:#04x}")]
    UnknownFrameTag(u8),

    #[error("Invalid UTF-8 in text frame: {0}")]
    InvalidText(#[from] std::string::FromUtf8Error),

    #[error("Handshake failed: {0}")]
    Handshake(CloseReason),

    #[error("Session is not connected (state: {0})")]
    NotConnected(ConnectionState),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ProtocolError {
    /// The reason recorded when this error terminates a session.
    pub fn close_reason(&self) -> CloseReason {
        match self {
            ProtocolError::Io(_) | ProtocolError::NotConnected(_) | ProtocolError::InvalidConfig(_) => {
                CloseReason::Closed
            }
            ProtocolError::Json(_) | ProtocolError::InvalidText(_) => CloseReason::WrongFrameData,
            ProtocolError::FrameTooLarge(_, _) | ProtocolError::BufferOverflow(_, _) => {
                CloseReason::WrongFrameSize
            }
            ProtocolError::UnknownFrameTag(_) => CloseReason::WrongFrameTag,
            ProtocolError::Handshake(reason) => *reason,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_close_reasons() {
        assert_eq!(
            ProtocolError::UnknownFrameTag(0x7f).close_reason(),
            CloseReason::WrongFrameTag
        );
        assert_eq!(
            ProtocolError::FrameTooLarge(10, 5).close_reason(),
            CloseReason::WrongFrameSize
        );
        assert_eq!(
            ProtocolError::BufferOverflow(10, 5).close_reason(),
            CloseReason::WrongFrameSize
        );
        assert_eq!(
            ProtocolError::Handshake(CloseReason::WrongHelloMessage).close_reason(),
            CloseReason::WrongHelloMessage
        );
        let bad_text = String::from_utf8(vec![0xff, 0xfe]).unwrap_err();
        assert_eq!(
            ProtocolError::InvalidText(bad_text).close_reason(),
            CloseReason::WrongFrameData
        );
        let bad_pack = serde_json::from_slice::<serde_json::Value>(b"{\"a").unwrap_err();
        assert_eq!(
            ProtocolError::Json(bad_pack).close_reason(),
            CloseReason::WrongFrameData
        );
        let eof = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        assert_eq!(ProtocolError::Io(eof).close_reason(), CloseReason::Closed);
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::UnknownFrameTag(0x7f);
        assert_eq!(err.to_string(), "Unknown frame tag: 0x7f");
    }
}
