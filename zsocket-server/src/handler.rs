use crate::commands::{self, CommandContext};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, warn};
use zsocket::{CloseReason, Session, SessionHandler};

/// Echoes everything back to the sender; command packs get a report instead.
pub struct EchoHandler {
    command_context: Arc<CommandContext>,
}

impl EchoHandler {
    pub fn new(command_context: Arc<CommandContext>) -> Self {
        Self { command_context }
    }
}

impl SessionHandler for EchoHandler {
    fn on_connect(&self, session: &Session) {
        info!(
            "Client {} connected from {}",
            session.id(),
            session
                .remote_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );
    }

    fn on_close(&self, session: &Session, reason: CloseReason) {
        match session.connected_at() {
            Some(connected_at) => info!(
                "Client {} disconnected ({}), connected since {}",
                session.id(),
                reason,
                connected_at.to_rfc3339()
            ),
            None => info!("Client {} rejected: {}", session.id(), reason),
        }
    }

    fn on_data(&self, session: &Session, data: Bytes) {
        debug!("Client {} sent {} bytes", session.id(), data.len());

        let session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = session.send(&data).await {
                warn!("Echo to client {} failed: {}", session.id(), e);
            }
        });
    }

    fn on_text(&self, session: &Session, text: String) {
        info!("Client {} says: {}", session.id(), text);

        let session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = session.send_text(&text).await {
                warn!("Echo to client {} failed: {}", session.id(), e);
            }
        });
    }

    fn on_pack(&self, session: &Session, pack: serde_json::Value) {
        debug!("Client {} sent pack: {}", session.id(), pack);

        let ctx = self.command_context.clone();
        let session = session.clone();
        tokio::spawn(async move {
            let reply = commands::respond(pack, &session, &ctx).await;
            if let Err(e) = session.send_pack(&reply).await {
                warn!("Reply to client {} failed: {}", session.id(), e);
            }
        });
    }
}
