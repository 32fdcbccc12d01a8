use crate::config::SessionConfig;
use crate::session::{Session, SessionHandler};
use crate::state::{CloseReason, ConnectionState, Role};
use crate::Result;
use std::sync::Arc;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;
use tracing::{info, warn};

/// Connects to a zsocket server and runs the handshake.
///
/// Returns `Err` only for an invalid configuration. Connection and
/// handshake failures are reported through `on_close` and the returned
/// session's [`Session::close_reason`].
pub async fn connect<A>(
    addr: A,
    config: SessionConfig,
    handler: Arc<dyn SessionHandler>,
) -> Result<Session>
where
    A: ToSocketAddrs,
{
    config.validate()?;

    let wait = config.wait_connect_time;
    let session = Session::new(Role::Client, Arc::new(config), handler);
    session.advance(ConnectionState::WaitingConnect);

    match timeout(wait, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            info!("Session {} opened TCP connection", session.id());
            session.establish(stream).await;
        }
        Ok(Err(e)) => {
            warn!("Failed to connect: {}", e);
            session.close_with(CloseReason::CannotConnect).await;
        }
        Err(_) => {
            warn!("Connection timeout after {:?}", wait);
            session.close_with(CloseReason::CannotConnect).await;
        }
    }

    Ok(session)
}
