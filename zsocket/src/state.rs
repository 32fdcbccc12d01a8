use crate::constants::{CLIENT_HELLO_MSG, SERVER_HELLO_MSG};
use std::fmt;

/// Lifecycle of a session.
///
/// ```text
/// Closed -> WaitingConnect -> WaitingHelloMessage -> WaitingCheckCode -> Connected
///    ^            |                   |                     |               |
///    +------------+-------------------+---------------------+---------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ConnectionState {
    #[default]
    Closed = 0,
    WaitingConnect = 1,
    WaitingHelloMessage = 2,
    WaitingCheckCode = 3,
    Connected = 4,
}

impl ConnectionState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Closed),
            1 => Some(Self::WaitingConnect),
            2 => Some(Self::WaitingHelloMessage),
            3 => Some(Self::WaitingCheckCode),
            4 => Some(Self::Connected),
            _ => None,
        }
    }

    /// Legal moves are one step forward, or straight to `Closed`.
    pub fn can_advance_to(self, next: ConnectionState) -> bool {
        next == Self::Closed || next as u8 == self as u8 + 1
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Why a session ended. Every closed session carries exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    Closed,
    CannotConnect,
    CannotGetHelloMessage,
    CannotGetCheckCode,
    CannotGetRemoteAddress,
    WrongHelloMessage,
    WrongCheckCode,
    WrongFrameTag,
    WrongFrameSize,
    WrongFrameData,
    HeartbeatTimeout,
}

impl CloseReason {
    pub fn description(self) -> &'static str {
        match self {
            Self::Closed => "connection closed",
            Self::CannotConnect => "cannot connect to remote host",
            Self::CannotGetHelloMessage => "no hello message received from peer",
            Self::CannotGetCheckCode => "no check code received from peer",
            Self::CannotGetRemoteAddress => "cannot get remote address",
            Self::WrongHelloMessage => "peer sent an unexpected hello message",
            Self::WrongCheckCode => "check code verification failed",
            Self::WrongFrameTag => "received frame with unknown tag",
            Self::WrongFrameSize => "received frame exceeds size limit",
            Self::WrongFrameData => "received frame payload is malformed",
            Self::HeartbeatTimeout => "peer stopped sending heartbeats",
        }
    }

    pub fn is_graceful(self) -> bool {
        self == Self::Closed
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Which end of the connection a session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Accepting side; issues the check-code challenge.
    Server,
    /// Connecting side; answers the challenge.
    Client,
}

impl Role {
    pub fn hello_msg(self) -> &'static [u8] {
        match self {
            Self::Server => SERVER_HELLO_MSG,
            Self::Client => CLIENT_HELLO_MSG,
        }
    }

    pub fn peer_hello_msg(self) -> &'static [u8] {
        match self {
            Self::Server => CLIENT_HELLO_MSG,
            Self::Client => SERVER_HELLO_MSG,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Client => f.write_str("client"),
        }
    }
}
