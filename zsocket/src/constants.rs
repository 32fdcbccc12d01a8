//! Protocol constants shared by both ends of a connection.
//!
//! The handshake and the framing layer share one byte stream, so every
//! marker byte below must be distinct from every other one.

use std::time::Duration;

/// Hello string sent by the accepting side.
pub const SERVER_HELLO_MSG: &[u8] = b"zsocket_server";

/// Hello string sent by the connecting side.
///
/// The spelling differs from [`SERVER_HELLO_MSG`] on purpose: existing peers
/// send exactly these bytes, so treat both strings as opaque.
pub const CLIENT_HELLO_MSG: &[u8] = b"zoscket_client";

/// Marker byte that opens the check-code exchange and accepts the proof.
pub const CHECK_CODE: u8 = 0xAF;

/// Verdict byte sent by the accepting side when the proof does not verify.
pub const CHECK_CODE_REJECTED: u8 = 0xA0;

/// Phase byte sent by the accepting side in place of [`CHECK_CODE`] when it
/// has no password configured.
pub const NO_CHECK_CODE: u8 = 0xA1;

/// Frame tag: zero-length keep-alive.
pub const TAG_HEARTBEAT: u8 = 0x01;

/// Frame tag: opaque bytes.
pub const TAG_BYTES: u8 = 0x02;

/// Frame tag: UTF-8 text.
pub const TAG_TEXT: u8 = 0x03;

/// Frame tag: structured value (JSON).
pub const TAG_PACK: u8 = 0x04;

/// Deadline for each blocking step of connection establishment.
pub const WAIT_CONNECT_TIME: Duration = Duration::from_secs(5);

/// Interval between outgoing heartbeats.
pub const SEND_HEART_BEAT_TIME: Duration = Duration::from_secs(30);

/// Silence after which a peer is considered dead.
pub const CHECK_HEART_BEAT_TIME: Duration = Duration::from_secs(45);

/// Largest payload a single frame may carry (4 MiB).
pub const DATA_MAX_SIZE: usize = 4 * 1024 * 1024;

/// Largest amount of received data that may sit undispatched (4 GiB).
pub const BUFFER_MAX_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Tag byte plus a big-endian u32 length.
pub const FRAME_HEADER_LEN: usize = 5;

/// Size of the random challenge sent with the check code.
pub const CHECK_NONCE_LEN: usize = 16;

/// Size of the HMAC-SHA256 proof returned by the connecting side.
pub const CHECK_MAC_LEN: usize = 32;

/// Every byte with a meaning on the wire outside of payloads.
pub const MARKER_BYTES: [u8; 7] = [
    TAG_HEARTBEAT,
    TAG_BYTES,
    TAG_TEXT,
    TAG_PACK,
    CHECK_CODE,
    CHECK_CODE_REJECTED,
    NO_CHECK_CODE,
];

const fn markers_distinct() -> bool {
    let mut i = 0;
    while i < MARKER_BYTES.len() {
        let mut j = i + 1;
        while j < MARKER_BYTES.len() {
            if MARKER_BYTES[i] == MARKER_BYTES[j] {
                return false;
            }
            j += 1;
        }
        i += 1;
    }
    true
}

const _: () = assert!(markers_distinct(), "marker bytes must be pairwise distinct");
const _: () = assert!(
    CHECK_HEART_BEAT_TIME.as_millis() > SEND_HEART_BEAT_TIME.as_millis(),
    "heartbeat timeout must exceed the send interval"
);
const _: () = assert!(DATA_MAX_SIZE as u64 <= u32::MAX as u64);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_marker_bytes_distinct() {
        let unique: HashSet<u8> = MARKER_BYTES.iter().copied().collect();
        assert_eq!(unique.len(), MARKER_BYTES.len());
        assert!(MARKER_BYTES.contains(&NO_CHECK_CODE));
    }

    #[test]
    fn test_hello_messages_are_distinct() {
        assert_ne!(SERVER_HELLO_MSG, CLIENT_HELLO_MSG);
        assert_eq!(CLIENT_HELLO_MSG, b"zoscket_client");
    }

    #[test]
    fn test_heartbeat_allows_one_miss() {
        assert!(CHECK_HEART_BEAT_TIME > SEND_HEART_BEAT_TIME);
        assert_eq!(WAIT_CONNECT_TIME, Duration::from_secs(5));
    }
}
