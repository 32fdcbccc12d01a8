//! Connection establishment: hello exchange, then optional check code.
//!
//! Hello phase: each side writes its role hello string and reads the
//! counterpart's. Incoming bytes are compared as they arrive, so a peer
//! speaking another protocol is rejected on its first differing byte.
//!
//! Check-code phase: the accepting side always announces whether it
//! requires a password, so a mismatch is caught before either side is
//! connected.
//!
//! ```text
//! server -> client   NO_CHECK_CODE                   (no password, done)
//!                    CHECK_CODE | nonce[16]
//! client -> server   CHECK_CODE | HMAC-SHA256(password, nonce)[32]
//! server -> client   CHECK_CODE            (accepted)
//!                    CHECK_CODE_REJECTED   (rejected)
//! ```

use crate::constants::{
    CHECK_CODE, CHECK_CODE_REJECTED, CHECK_MAC_LEN, CHECK_NONCE_LEN, NO_CHECK_CODE,
};
use crate::state::{CloseReason, ConnectionState, Role};
use crate::{crypto, ProtocolError, Result};
use std::future::Future;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

pub struct Handshake<'a> {
    role: Role,
    password: Option<&'a str>,
    wait: Duration,
}

impl<'a> Handshake<'a> {
    pub fn new(role: Role, password: Option<&'a str>, wait: Duration) -> Self {
        Self {
            role,
            password,
            wait,
        }
    }

    /// Drives the stream from `WaitingHelloMessage` up to (not including)
    /// `Connected`, reporting each state entered through `advance`.
    ///
    /// Failures carry the [`CloseReason`] in `ProtocolError::Handshake`.
    pub async fn run<S, F>(&self, stream: &mut S, mut advance: F) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        F: FnMut(ConnectionState),
    {
        advance(ConnectionState::WaitingHelloMessage);
        self.exchange_hello(stream).await?;

        advance(ConnectionState::WaitingCheckCode);
        match (self.role, self.password) {
            (Role::Server, Some(password)) => self.issue_check_code(stream, password).await?,
            (Role::Server, None) => self.waive_check_code(stream).await?,
            (Role::Client, password) => self.answer_check_code(stream, password).await?,
        }

        Ok(())
    }

    async fn exchange_hello<S>(&self, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let expected = self.role.peer_hello_msg();

        self.within(CloseReason::CannotGetHelloMessage, async {
            stream.write_all(self.role.hello_msg()).await?;
            stream.flush().await?;
            debug!("Sent {} hello", self.role);

            let mut received = vec![0u8; expected.len()];
            let mut filled = 0;

            while filled < expected.len() {
                // Never read past the hello; whatever follows belongs to the next phase.
                let n = stream.read(&mut received[filled..]).await?;
                if n == 0 {
                    return Err(ProtocolError::Handshake(CloseReason::CannotGetHelloMessage));
                }

                if received[filled..filled + n] != expected[filled..filled + n] {
                    warn!(
                        "Wrong hello message from peer: {:?}",
                        String::from_utf8_lossy(&received[..filled + n])
                    );
                    return Err(ProtocolError::Handshake(CloseReason::WrongHelloMessage));
                }

                filled += n;
            }

            debug!("Received valid hello from peer");
            Ok::<(), ProtocolError>(())
        })
        .await
    }

    async fn issue_check_code<S>(&self, stream: &mut S, password: &str) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let nonce = crypto::generate_nonce();

        let mut challenge = [0u8; 1 + CHECK_NONCE_LEN];
        challenge[0] = CHECK_CODE;
        challenge[1..].copy_from_slice(&nonce);

        let mut answer = [0u8; 1 + CHECK_MAC_LEN];

        self.within(CloseReason::CannotGetCheckCode, async {
            stream.write_all(&challenge).await?;
            stream.flush().await?;
            debug!("Sent check code challenge {}", hex::encode(nonce));

            stream.read_exact(&mut answer).await?;
            Ok::<(), ProtocolError>(())
        })
        .await?;

        let verified = answer[0] == CHECK_CODE
            && crypto::verify_check_mac(password, &nonce, &answer[1..]);

        let verdict = if verified { CHECK_CODE } else { CHECK_CODE_REJECTED };

        // The verdict is best effort; a peer that already left changes nothing.
        let sent = self
            .within(CloseReason::CannotGetCheckCode, async {
                stream.write_all(&[verdict]).await?;
                stream.flush().await?;
                Ok::<(), ProtocolError>(())
            })
            .await;

        if !verified {
            warn!("Check code verification failed");
            return Err(ProtocolError::Handshake(CloseReason::WrongCheckCode));
        }

        sent?;
        debug!("Check code accepted");
        Ok(())
    }

    async fn waive_check_code<S>(&self, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.within(CloseReason::CannotGetCheckCode, async {
            stream.write_all(&[NO_CHECK_CODE]).await?;
            stream.flush().await?;
            Ok::<(), ProtocolError>(())
        })
        .await?;

        debug!("No password configured, check code waived");
        Ok(())
    }

    async fn answer_check_code<S>(&self, stream: &mut S, password: Option<&str>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let phase = self
            .within(CloseReason::CannotGetCheckCode, async {
                Ok::<u8, ProtocolError>(stream.read_u8().await?)
            })
            .await?;

        let password = match (phase, password) {
            (NO_CHECK_CODE, None) => {
                debug!("Peer waived the check code");
                return Ok(());
            }
            (CHECK_CODE, Some(password)) => password,
            (NO_CHECK_CODE, Some(_)) => {
                warn!("Password configured but peer does not require a check code");
                return Err(ProtocolError::Handshake(CloseReason::WrongCheckCode));
            }
            (CHECK_CODE, None) => {
                warn!("Peer requires a check code but no password is configured");
                return Err(ProtocolError::Handshake(CloseReason::WrongCheckCode));
            }
            (other, _) => {
                warn!("Expected check code, got {:#04x}", other);
                return Err(ProtocolError::Handshake(CloseReason::WrongCheckCode));
            }
        };

        let mut nonce = [0u8; CHECK_NONCE_LEN];

        self.within(CloseReason::CannotGetCheckCode, async {
            stream.read_exact(&mut nonce).await?;
            Ok::<(), ProtocolError>(())
        })
        .await?;

        debug!("Received check code challenge {}", hex::encode(nonce));

        let mut answer = [0u8; 1 + CHECK_MAC_LEN];
        answer[0] = CHECK_CODE;
        answer[1..].copy_from_slice(&crypto::compute_check_mac(password, &nonce));

        let verdict = self
            .within(CloseReason::CannotGetCheckCode, async {
                stream.write_all(&answer).await?;
                stream.flush().await?;
                Ok::<u8, ProtocolError>(stream.read_u8().await?)
            })
            .await?;

        match verdict {
            CHECK_CODE => {
                debug!("Check code accepted by peer");
                Ok(())
            }
            CHECK_CODE_REJECTED => {
                warn!("Peer rejected check code");
                Err(ProtocolError::Handshake(CloseReason::WrongCheckCode))
            }
            other => {
                warn!("Unexpected check code verdict {:#04x}", other);
                Err(ProtocolError::Handshake(CloseReason::WrongCheckCode))
            }
        }
    }

    /// Runs one handshake step under the deadline. Timeouts and I/O
    /// failures both become `Handshake(reason)`.
    async fn within<T, Fut>(&self, reason: CloseReason, step: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match timeout(self.wait, step).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(ProtocolError::Io(e))) => {
                debug!("Handshake I/O failure ({}): {}", reason, e);
                Err(ProtocolError::Handshake(reason))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!("Handshake timed out after {:?}: {}", self.wait, reason);
                Err(ProtocolError::Handshake(reason))
            }
        }
    }
}
