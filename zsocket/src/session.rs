use crate::config::SessionConfig;
use crate::framing::{self, Frame, FrameCodec, FrameTag};
use crate::handshake::Handshake;
use crate::heartbeat::{self, Liveness};
use crate::state::{CloseReason, ConnectionState, Role};
use crate::{ProtocolError, Result};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Callbacks invoked by a session. All methods default to no-ops.
///
/// Callbacks run on the session's own task and must not block. To reply
/// from a callback, clone the session and spawn the send.
pub trait SessionHandler: Send + Sync + 'static {
    /// The handshake completed; fires at most once per session.
    fn on_connect(&self, _session: &Session) {}

    /// The session ended; fires exactly once per session.
    fn on_close(&self, _session: &Session, _reason: CloseReason) {}

    fn on_data(&self, _session: &Session, _data: Bytes) {}

    fn on_text(&self, _session: &Session, _text: String) {}

    fn on_pack(&self, _session: &Session, _pack: serde_json::Value) {}
}

/// One end of a zsocket connection.
///
/// Cloning is cheap; all clones refer to the same connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    id: u64,
    role: Role,
    config: Arc<SessionConfig>,
    handler: Arc<dyn SessionHandler>,
    state: AtomicU8,
    close_reason: OnceLock<CloseReason>,
    remote_addr: OnceLock<SocketAddr>,
    local_addr: OnceLock<SocketAddr>,
    connected_at: OnceLock<DateTime<Utc>>,
    /// Outbound lock shared by callers and the heartbeat sender.
    writer: Mutex<Option<OwnedWriteHalf>>,
    liveness: Liveness,
    /// Stops the read loop, heartbeat tasks and pending writes.
    cancel: CancellationToken,
    /// Fires once `on_close` has returned.
    finished: CancellationToken,
}

impl Session {
    pub(crate) fn new(
        role: Role,
        config: Arc<SessionConfig>,
        handler: Arc<dyn SessionHandler>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                role,
                config,
                handler,
                state: AtomicU8::new(ConnectionState::Closed as u8),
                close_reason: OnceLock::new(),
                remote_addr: OnceLock::new(),
                local_addr: OnceLock::new(),
                connected_at: OnceLock::new(),
                writer: Mutex::new(None),
                liveness: Liveness::new(),
                cancel: CancellationToken::new(),
                finished: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::Acquire))
            .unwrap_or(ConnectionState::Closed)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// `None` until the session has closed.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.close_reason.get().copied()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr.get().copied()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get().copied()
    }

    /// Wall-clock time the session reached `Connected`.
    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.inner.connected_at.get().copied()
    }

    pub(crate) fn liveness(&self) -> &Liveness {
        &self.inner.liveness
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Moves to `next` if the transition is legal and the session has not
    /// been closed. Returns whether the state changed.
    pub(crate) fn advance(&self, next: ConnectionState) -> bool {
        if self.inner.close_reason.get().is_some() {
            return false;
        }

        let result = self
            .inner
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let current = ConnectionState::from_u8(current)?;
                current.can_advance_to(next).then_some(next as u8)
            });

        match result {
            Ok(previous) => {
                trace!(
                    "Session {} state {:?} -> {}",
                    self.inner.id,
                    ConnectionState::from_u8(previous),
                    next
                );
                true
            }
            Err(current) => {
                warn!(
                    "Session {} rejected transition {:?} -> {}",
                    self.inner.id,
                    ConnectionState::from_u8(current),
                    next
                );
                false
            }
        }
    }

    /// Runs the handshake over a freshly connected stream and, on success,
    /// starts the heartbeat monitor and the read loop.
    pub(crate) async fn establish(&self, stream: TcpStream) {
        if let Some(reader) = self.handshake(stream).await {
            self.start(reader);
        }
    }

    /// Drives the handshake up to `Connected`. The returned read half is
    /// handed to [`Session::start`]; `None` means the session is closed.
    pub(crate) async fn handshake(&self, mut stream: TcpStream) -> Option<OwnedReadHalf> {
        let remote_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Session {} cannot get remote address: {}", self.inner.id, e);
                self.close_with(CloseReason::CannotGetRemoteAddress).await;
                return None;
            }
        };
        let _ = self.inner.remote_addr.set(remote_addr);

        if let Ok(local_addr) = stream.local_addr() {
            let _ = self.inner.local_addr.set(local_addr);
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for session {}: {}", self.inner.id, e);
        }

        let config = &self.inner.config;
        let handshake = Handshake::new(self.inner.role, config.password(), config.wait_connect_time);

        let result = tokio::select! {
            _ = self.inner.cancel.cancelled() => return None,
            result = handshake.run(&mut stream, |state| {
                self.advance(state);
            }) => result,
        };

        if let Err(e) = result {
            warn!("Session {} handshake with {} failed: {}", self.inner.id, remote_addr, e);
            self.close_with(e.close_reason()).await;
            return None;
        }

        let (reader, writer) = stream.into_split();
        *self.inner.writer.lock().await = Some(writer);
        self.inner.liveness.touch();

        if !self.advance(ConnectionState::Connected) || self.inner.cancel.is_cancelled() {
            // Closed while the writer was being installed.
            self.inner.writer.lock().await.take();
            return None;
        }
        let _ = self.inner.connected_at.set(Utc::now());

        info!(
            "Session {} ({}) connected to {}",
            self.inner.id, self.inner.role, remote_addr
        );

        Some(reader)
    }

    /// Starts the heartbeat monitor and the read loop, then fires `on_connect`.
    /// Does nothing if the session closed after its handshake.
    pub(crate) fn start(&self, reader: OwnedReadHalf) {
        if self.inner.cancel.is_cancelled() {
            return;
        }

        heartbeat::spawn(self.clone());
        self.inner.handler.on_connect(self);
        tokio::spawn(self.clone().read_loop(reader));
    }

    /// Sends opaque bytes.
    pub async fn send(&self, data: impl AsRef<[u8]>) -> Result<()> {
        self.send_frame(FrameTag::Bytes, data.as_ref()).await
    }

    /// Sends UTF-8 text.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send_frame(FrameTag::Text, text.as_bytes()).await
    }

    /// Sends a structured value, encoded as JSON.
    pub async fn send_pack<T>(&self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(value)?;
        self.send_frame(FrameTag::Pack, &payload).await
    }

    pub(crate) async fn send_heartbeat(&self) -> Result<()> {
        self.send_frame(FrameTag::Heartbeat, &[]).await
    }

    async fn send_frame(&self, tag: FrameTag, payload: &[u8]) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(ProtocolError::NotConnected(state));
        }

        let frame = framing::encode(tag, payload, self.inner.config.data_max_size)?;

        let result = {
            let mut guard = self.inner.writer.lock().await;
            let Some(writer) = guard.as_mut() else {
                return Err(ProtocolError::NotConnected(self.state()));
            };

            tokio::select! {
                _ = self.inner.cancel.cancelled() => {
                    Err(ProtocolError::NotConnected(ConnectionState::Closed))
                }
                written = writer.write_all(&frame) => written.map_err(ProtocolError::from),
            }
        };

        if let Err(ProtocolError::Io(e)) = &result {
            warn!("Session {} write failed: {}", self.inner.id, e);
            self.close_with(CloseReason::Closed).await;
        }

        result
    }

    /// Closes the session gracefully.
    pub async fn close(&self) {
        self.close_with(CloseReason::Closed).await;
    }

    /// Resolves once the session has closed and `on_close` has returned.
    pub async fn closed(&self) {
        self.inner.finished.cancelled().await;
    }

    /// Terminates the session. Only the first call has any effect.
    pub(crate) async fn close_with(&self, reason: CloseReason) {
        if self.inner.close_reason.set(reason).is_err() {
            return;
        }

        self.inner
            .state
            .store(ConnectionState::Closed as u8, Ordering::Release);
        self.inner.cancel.cancel();

        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        if reason.is_graceful() {
            info!("Session {} closed", self.inner.id);
        } else {
            warn!("Session {} closed: {}", self.inner.id, reason);
        }

        self.inner.handler.on_close(self, reason);
        self.inner.finished.cancel();
    }

    async fn read_loop(self, mut reader: OwnedReadHalf) {
        let mut codec = FrameCodec::from_config(&self.inner.config);
        let mut buf = BytesMut::with_capacity(8 * 1024);

        let reason = loop {
            if let Err(e) = self.drain(&mut codec, &mut buf) {
                warn!("Session {} protocol violation: {}", self.inner.id, e);
                break e.close_reason();
            }

            if self.inner.cancel.is_cancelled() {
                return;
            }

            let read = tokio::select! {
                _ = self.inner.cancel.cancelled() => return,
                read = reader.read_buf(&mut buf) => read,
            };

            match read {
                Ok(0) => {
                    debug!("Session {} closed by peer", self.inner.id);
                    break CloseReason::Closed;
                }
                Ok(n) => trace!("Session {} read {} bytes", self.inner.id, n),
                Err(e) => {
                    debug!("Session {} read failed: {}", self.inner.id, e);
                    break CloseReason::Closed;
                }
            }
        };

        self.close_with(reason).await;
    }

    /// Dispatches every complete frame in `buf`, in arrival order.
    fn drain(&self, codec: &mut FrameCodec, buf: &mut BytesMut) -> Result<()> {
        while let Some(frame) = codec.decode(buf)? {
            self.inner.liveness.touch();
            self.dispatch(frame)?;

            if self.inner.cancel.is_cancelled() {
                break;
            }
        }
        Ok(())
    }

    fn dispatch(&self, frame: Frame) -> Result<()> {
        let handler = &self.inner.handler;

        match frame.tag {
            FrameTag::Heartbeat => trace!("Heartbeat from session {}", self.inner.id),
            FrameTag::Bytes => handler.on_data(self, frame.payload),
            FrameTag::Text => {
                let text = String::from_utf8(frame.payload.to_vec())?;
                handler.on_text(self, text);
            }
            FrameTag::Pack => {
                let pack: serde_json::Value = serde_json::from_slice(&frame.payload)?;
                handler.on_pack(self, pack);
            }
        }

        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .field("remote_addr", &self.remote_addr())
            .field("close_reason", &self.close_reason())
            .finish()
    }
}
