use crate::config::SessionConfig;
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionHandler};
use crate::state::{ConnectionState, Role};
use crate::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Listening side: accepts connections and runs one session per client.
pub struct Server {
    listener: TcpListener,
    config: Arc<SessionConfig>,
    handler: Arc<dyn SessionHandler>,
    registry: SessionRegistry,
    connection_limit: Arc<Semaphore>,
    max_conns: usize,
    shutdown: CancellationToken,
}

impl Server {
    pub async fn bind<A>(
        addr: A,
        config: SessionConfig,
        handler: Arc<dyn SessionHandler>,
    ) -> Result<Self>
    where
        A: ToSocketAddrs,
    {
        config.validate()?;
        let listener = TcpListener::bind(addr).await?;

        Ok(Self {
            listener,
            config: Arc::new(config),
            handler,
            registry: SessionRegistry::new(),
            connection_limit: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
            max_conns: Semaphore::MAX_PERMITS,
            shutdown: CancellationToken::new(),
        })
    }

    /// Caps the number of concurrent connections, handshakes included.
    pub fn with_max_connections(mut self, max_conns: usize) -> Self {
        let max_conns = max_conns.clamp(1, Semaphore::MAX_PERMITS);
        self.connection_limit = Arc::new(Semaphore::new(max_conns));
        self.max_conns = max_conns;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Sessions that completed the handshake and are still open.
    pub fn registry(&self) -> SessionRegistry {
        self.registry.clone()
    }

    /// Cancel to stop accepting and close every connected session.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accepts connections until the shutdown token is cancelled.
    pub async fn run(self) -> Result<()> {
        info!("Listening on {}", self.listener.local_addr()?);
        info!("Maximum concurrent connections: {}", self.max_conns);

        loop {
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = self.connection_limit.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, remote_addr) = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let session = Session::new(Role::Server, self.config.clone(), self.handler.clone());
            session.advance(ConnectionState::WaitingConnect);
            debug!("Session {} accepted from {}", session.id(), remote_addr);

            let registry = self.registry.clone();
            tokio::spawn(close_on_shutdown(session.clone(), self.shutdown.clone()));

            tokio::spawn(async move {
                if let Some(reader) = session.handshake(stream).await {
                    // Registered before on_connect fires.
                    registry.insert(session.clone()).await;
                    session.start(reader);
                    session.closed().await;
                    registry.remove(session.id()).await;
                }

                drop(permit);
            });
        }

        info!("Server shutting down");
        self.registry.close_all().await;
        Ok(())
    }
}

/// Closes `session` when the server shuts down, whatever phase it is in.
async fn close_on_shutdown(session: Session, shutdown: CancellationToken) {
    tokio::select! {
        _ = shutdown.cancelled() => session.close().await,
        _ = session.closed() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::connect;
    use crate::constants::{CLIENT_HELLO_MSG, NO_CHECK_CODE, SERVER_HELLO_MSG, TAG_PACK, TAG_TEXT};
    use crate::state::CloseReason;
    use crate::ProtocolError;
    use bytes::Bytes;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Connected(u64),
        Closed(u64, CloseReason),
        Data(Bytes),
        Text(String),
        Pack(serde_json::Value),
    }

    struct Recorder {
        tx: mpsc::UnboundedSender<Event>,
    }

    impl SessionHandler for Recorder {
        fn on_connect(&self, session: &Session) {
            let _ = self.tx.send(Event::Connected(session.id()));
        }

        fn on_close(&self, session: &Session, reason: CloseReason) {
            let _ = self.tx.send(Event::Closed(session.id(), reason));
        }

        fn on_data(&self, _session: &Session, data: Bytes) {
            let _ = self.tx.send(Event::Data(data));
        }

        fn on_text(&self, _session: &Session, text: String) {
            let _ = self.tx.send(Event::Text(text));
        }

        fn on_pack(&self, _session: &Session, pack: serde_json::Value) {
            let _ = self.tx.send(Event::Pack(pack));
        }
    }

    fn recorder() -> (Arc<dyn SessionHandler>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Recorder { tx }), rx)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Asserts nothing arrives for `window`.
    async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Event>, window: Duration) {
        if let Ok(Some(event)) = timeout(window, rx.recv()).await {
            panic!("unexpected event: {event:?}");
        }
    }

    async fn start_server(config: SessionConfig) -> (SocketAddr, SessionRegistry, CancellationToken, mpsc::UnboundedReceiver<Event>) {
        let (handler, rx) = recorder();
        let server = Server::bind("127.0.0.1:0", config, handler).await.unwrap();
        let addr = server.local_addr().unwrap();
        let registry = server.registry();
        let shutdown = server.shutdown_token();
        tokio::spawn(server.run());
        (addr, registry, shutdown, rx)
    }

    /// Completes a password-less handshake by hand and returns the raw stream.
    async fn raw_client(addr: SocketAddr) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(CLIENT_HELLO_MSG).await.unwrap();

        let mut hello = vec![0u8; SERVER_HELLO_MSG.len()];
        stream.read_exact(&mut hello).await.unwrap();
        assert_eq!(hello, SERVER_HELLO_MSG);
        assert_eq!(stream.read_u8().await.unwrap(), NO_CHECK_CODE);

        stream
    }

    fn fast_heartbeat() -> SessionConfig {
        SessionConfig::default()
            .with_wait_connect_time(Duration::from_secs(2))
            .with_heartbeat(Duration::from_millis(50), Duration::from_millis(300))
    }

    #[tokio::test]
    async fn test_text_delivered_with_matching_password() {
        let (addr, _registry, _shutdown, mut server_rx) =
            start_server(SessionConfig::default().with_password("123")).await;

        let (handler, mut client_rx) = recorder();
        let client = connect(addr, SessionConfig::default().with_password("123"), handler)
            .await
            .unwrap();

        assert!(client.is_connected());
        assert!(client.connected_at().is_some());
        assert_eq!(client.remote_addr(), Some(addr));
        assert_eq!(next_event(&mut client_rx).await, Event::Connected(client.id()));
        assert!(matches!(next_event(&mut server_rx).await, Event::Connected(_)));

        client.send_text("hello").await.unwrap();
        assert_eq!(next_event(&mut server_rx).await, Event::Text("hello".to_string()));

        // on_connect fired exactly once on each side.
        assert_quiet(&mut client_rx, Duration::from_millis(100)).await;
        assert_quiet(&mut server_rx, Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_wrong_password_closes_both_sides() {
        let (addr, registry, _shutdown, mut server_rx) =
            start_server(SessionConfig::default().with_password("123")).await;

        let (handler, mut client_rx) = recorder();
        let client = connect(addr, SessionConfig::default().with_password("456"), handler)
            .await
            .unwrap();

        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(client.close_reason(), Some(CloseReason::WrongCheckCode));
        assert_eq!(
            next_event(&mut client_rx).await,
            Event::Closed(client.id(), CloseReason::WrongCheckCode)
        );
        assert!(matches!(
            next_event(&mut server_rx).await,
            Event::Closed(_, CloseReason::WrongCheckCode)
        ));

        assert!(matches!(
            client.send_text("hello").await,
            Err(ProtocolError::NotConnected(ConnectionState::Closed))
        ));
        assert_quiet(&mut server_rx, Duration::from_millis(100)).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_all_payload_kinds_round_trip() {
        let (addr, _registry, _shutdown, mut server_rx) = start_server(SessionConfig::default()).await;

        let (handler, _client_rx) = recorder();
        let client = connect(addr, SessionConfig::default(), handler).await.unwrap();
        assert!(matches!(next_event(&mut server_rx).await, Event::Connected(_)));

        client.send(b"\x00\x01raw").await.unwrap();
        client.send_text("héllo").await.unwrap();
        client.send_pack(&json!({"cmd": "ping", "seq": 7})).await.unwrap();
        client.send(b"").await.unwrap();

        assert_eq!(next_event(&mut server_rx).await, Event::Data(Bytes::from_static(b"\x00\x01raw")));
        assert_eq!(next_event(&mut server_rx).await, Event::Text("héllo".to_string()));
        assert_eq!(
            next_event(&mut server_rx).await,
            Event::Pack(json!({"cmd": "ping", "seq": 7}))
        );
        assert_eq!(next_event(&mut server_rx).await, Event::Data(Bytes::new()));
    }

    #[tokio::test]
    async fn test_password_on_server_only_never_connects_client() {
        let (addr, registry, _shutdown, mut server_rx) =
            start_server(SessionConfig::default().with_password("123")).await;

        let (handler, mut client_rx) = recorder();
        let client = connect(addr, SessionConfig::default(), handler).await.unwrap();

        assert_eq!(client.close_reason(), Some(CloseReason::WrongCheckCode));
        assert!(client.connected_at().is_none());
        assert_eq!(
            next_event(&mut client_rx).await,
            Event::Closed(client.id(), CloseReason::WrongCheckCode)
        );
        assert!(matches!(
            next_event(&mut server_rx).await,
            Event::Closed(_, CloseReason::CannotGetCheckCode)
        ));

        assert_quiet(&mut client_rx, Duration::from_millis(100)).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_oversized_send_fails_locally() {
        let (addr, _registry, _shutdown, mut server_rx) =
            start_server(SessionConfig::default().with_data_max_size(16)).await;

        let (handler, _client_rx) = recorder();
        let client = connect(addr, SessionConfig::default().with_data_max_size(16), handler)
            .await
            .unwrap();
        assert!(matches!(next_event(&mut server_rx).await, Event::Connected(_)));

        let result = client.send(vec![0u8; 17]).await;
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge(17, 16))));
        assert!(client.is_connected());

        client.send(vec![1u8; 16]).await.unwrap();
        assert_eq!(next_event(&mut server_rx).await, Event::Data(Bytes::from(vec![1u8; 16])));
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_receiver() {
        let (addr, _registry, _shutdown, mut server_rx) =
            start_server(SessionConfig::default().with_data_max_size(16)).await;

        // The client allows larger frames than the server accepts.
        let (handler, mut client_rx) = recorder();
        let client = connect(addr, SessionConfig::default(), handler).await.unwrap();
        assert!(matches!(next_event(&mut server_rx).await, Event::Connected(_)));
        assert!(matches!(next_event(&mut client_rx).await, Event::Connected(_)));

        client.send(vec![0u8; 64]).await.unwrap();

        assert!(matches!(
            next_event(&mut server_rx).await,
            Event::Closed(_, CloseReason::WrongFrameSize)
        ));
        assert_eq!(
            next_event(&mut client_rx).await,
            Event::Closed(client.id(), CloseReason::Closed)
        );
    }

    #[tokio::test]
    async fn test_foreign_hello_rejected() {
        let (addr, registry, _shutdown, mut server_rx) = start_server(SessionConfig::default()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        assert!(matches!(
            next_event(&mut server_rx).await,
            Event::Closed(_, CloseReason::WrongHelloMessage)
        ));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_client_rejects_foreign_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = stream.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await;
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink).await;
        });

        let (handler, mut client_rx) = recorder();
        let client = connect(addr, SessionConfig::default(), handler).await.unwrap();

        assert_eq!(client.close_reason(), Some(CloseReason::WrongHelloMessage));
        assert_eq!(
            next_event(&mut client_rx).await,
            Event::Closed(client.id(), CloseReason::WrongHelloMessage)
        );
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (handler, mut client_rx) = recorder();
        let client = connect(addr, SessionConfig::default(), handler).await.unwrap();

        assert_eq!(client.close_reason(), Some(CloseReason::CannotConnect));
        assert_eq!(
            next_event(&mut client_rx).await,
            Event::Closed(client.id(), CloseReason::CannotConnect)
        );
        assert_quiet(&mut client_rx, Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let (handler, _rx) = recorder();
        let config = SessionConfig::default()
            .with_heartbeat(Duration::from_secs(5), Duration::from_secs(1));

        let result = connect("127.0.0.1:1", config.clone(), handler.clone()).await;
        assert!(matches!(result, Err(ProtocolError::InvalidConfig(_))));

        let result = Server::bind("127.0.0.1:0", config, handler).await;
        assert!(matches!(result, Err(ProtocolError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_heartbeats_keep_idle_session_alive() {
        let (addr, _registry, _shutdown, mut server_rx) = start_server(fast_heartbeat()).await;

        let (handler, mut client_rx) = recorder();
        let client = connect(addr, fast_heartbeat(), handler).await.unwrap();
        assert!(matches!(next_event(&mut server_rx).await, Event::Connected(_)));
        assert!(matches!(next_event(&mut client_rx).await, Event::Connected(_)));

        // Several timeout windows with no application traffic.
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert!(client.is_connected());
        assert_quiet(&mut server_rx, Duration::from_millis(10)).await;
        assert_quiet(&mut client_rx, Duration::from_millis(10)).await;

        client.send_text("still here").await.unwrap();
        assert_eq!(next_event(&mut server_rx).await, Event::Text("still here".to_string()));
    }

    #[tokio::test]
    async fn test_silent_peer_is_closed() {
        let (addr, _registry, _shutdown, mut server_rx) = start_server(fast_heartbeat()).await;

        // Never sends another byte after the handshake.
        let _stream = raw_client(addr).await;

        assert!(matches!(next_event(&mut server_rx).await, Event::Connected(_)));
        let started = tokio::time::Instant::now();

        assert!(matches!(
            next_event(&mut server_rx).await,
            Event::Closed(_, CloseReason::HeartbeatTimeout)
        ));
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_invalid_utf8_text_closes_with_wrong_frame_data() {
        let (addr, _registry, _shutdown, mut server_rx) = start_server(SessionConfig::default()).await;

        let mut stream = raw_client(addr).await;
        assert!(matches!(next_event(&mut server_rx).await, Event::Connected(_)));

        stream.write_all(&[TAG_TEXT, 0, 0, 0, 2, 0xff, 0xfe]).await.unwrap();

        assert!(matches!(
            next_event(&mut server_rx).await,
            Event::Closed(_, CloseReason::WrongFrameData)
        ));
    }

    #[tokio::test]
    async fn test_invalid_json_pack_closes_with_wrong_frame_data() {
        let (addr, _registry, _shutdown, mut server_rx) = start_server(SessionConfig::default()).await;

        let mut stream = raw_client(addr).await;
        assert!(matches!(next_event(&mut server_rx).await, Event::Connected(_)));

        stream.write_all(&[TAG_PACK, 0, 0, 0, 3, b'{', b'"', b'a']).await.unwrap();

        assert!(matches!(
            next_event(&mut server_rx).await,
            Event::Closed(_, CloseReason::WrongFrameData)
        ));
    }

    #[tokio::test]
    async fn test_unknown_tag_closes_with_wrong_frame_tag() {
        let (addr, _registry, _shutdown, mut server_rx) = start_server(SessionConfig::default()).await;

        let mut stream = raw_client(addr).await;
        assert!(matches!(next_event(&mut server_rx).await, Event::Connected(_)));

        stream.write_all(&[0x7f, 0, 0, 0, 0]).await.unwrap();

        assert!(matches!(
            next_event(&mut server_rx).await,
            Event::Closed(_, CloseReason::WrongFrameTag)
        ));

        // The server hangs up after the violation.
        let mut rest = Vec::new();
        timeout(Duration::from_secs(2), stream.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_registry_tracks_connected_sessions() {
        let (addr, registry, _shutdown, mut server_rx) = start_server(SessionConfig::default()).await;

        let (handler, _client_rx) = recorder();
        let client = connect(addr, SessionConfig::default(), handler).await.unwrap();

        let server_id = match next_event(&mut server_rx).await {
            Event::Connected(id) => id,
            other => panic!("unexpected event: {other:?}"),
        };

        // Registered before on_connect fired.
        assert!(registry.get(server_id).await.is_some());

        client.close().await;
        assert!(matches!(
            next_event(&mut server_rx).await,
            Event::Closed(id, CloseReason::Closed) if id == server_id
        ));

        timeout(Duration::from_secs(2), async {
            while !registry.is_empty().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_sessions() {
        let (addr, registry, shutdown, mut server_rx) = start_server(SessionConfig::default()).await;

        let (handler, mut client_rx) = recorder();
        let client = connect(addr, SessionConfig::default(), handler).await.unwrap();
        assert!(matches!(next_event(&mut server_rx).await, Event::Connected(_)));
        assert!(matches!(next_event(&mut client_rx).await, Event::Connected(_)));

        timeout(Duration::from_secs(2), async {
            while registry.is_empty().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();

        assert!(matches!(
            next_event(&mut server_rx).await,
            Event::Closed(_, CloseReason::Closed)
        ));
        assert_eq!(
            next_event(&mut client_rx).await,
            Event::Closed(client.id(), CloseReason::Closed)
        );
    }

    #[tokio::test]
    async fn test_shutdown_closes_session_mid_handshake() {
        let (addr, registry, shutdown, mut server_rx) = start_server(fast_heartbeat()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut hello = vec![0u8; SERVER_HELLO_MSG.len()];
        stream.read_exact(&mut hello).await.unwrap();

        shutdown.cancel();
        assert!(matches!(
            next_event(&mut server_rx).await,
            Event::Closed(_, CloseReason::Closed)
        ));

        // Finishing the handshake afterwards gets nowhere.
        let _ = stream.write_all(CLIENT_HELLO_MSG).await;
        let mut rest = Vec::new();
        let _ = timeout(Duration::from_secs(2), stream.read_to_end(&mut rest))
            .await
            .unwrap();
        assert!(rest.is_empty());

        assert_quiet(&mut server_rx, Duration::from_millis(500)).await;
        assert!(registry.is_empty().await);
    }
}
