//! Control packs understood by the demo server.
//!
//! A pack whose `cmd` field names a [`Command`] is answered with a report
//! about the server or its sessions; any other pack is echoed back.

use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::Instant;
use zsocket::{Session, SessionRegistry};

/// Server state the commands report on
pub struct CommandContext {
    pub started: Instant,
    pub version: String,
    registry: OnceLock<SessionRegistry>,
}

impl CommandContext {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            started: Instant::now(),
            version: version.into(),
            registry: OnceLock::new(),
        }
    }

    /// Hooks up the server's registry once the listener is bound.
    pub fn attach(&self, registry: SessionRegistry) {
        let _ = self.registry.set(registry);
    }

    async fn sessions(&self) -> Vec<Session> {
        match self.registry.get() {
            Some(registry) => registry.sessions().await,
            None => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Version, uptime and number of connected sessions.
    Status,
    /// The requesting session's own id, address and connect time.
    WhoAmI,
    /// Every connected session.
    Sessions,
}

impl Command {
    /// `None` when the pack is not a command.
    pub fn from_pack(pack: &Value) -> Option<Self> {
        let cmd = pack.get("cmd")?.as_str()?;

        match cmd.to_ascii_uppercase().as_str() {
            "STATUS" => Some(Self::Status),
            "WHOAMI" => Some(Self::WhoAmI),
            "SESSIONS" => Some(Self::Sessions),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Status => "STATUS",
            Self::WhoAmI => "WHOAMI",
            Self::Sessions => "SESSIONS",
        }
    }
}

/// Builds the reply pack for `pack` received on `session`.
pub async fn respond(pack: Value, session: &Session, ctx: &CommandContext) -> Value {
    let Some(command) = Command::from_pack(&pack) else {
        return pack;
    };

    let result = match command {
        Command::Status => status(ctx).await,
        Command::WhoAmI => describe(session),
        Command::Sessions => {
            let sessions = ctx.sessions().await;
            json!({ "sessions": sessions.iter().map(describe).collect::<Vec<_>>() })
        }
    };

    json!({
        "status": "success",
        "cmd": command.name(),
        "result": result,
    })
}

async fn status(ctx: &CommandContext) -> Value {
    json!({
        "version": ctx.version,
        "uptime_secs": ctx.started.elapsed().as_secs(),
        "server_time": chrono::Utc::now().to_rfc3339(),
        "connected": ctx.sessions().await.len(),
    })
}

fn describe(session: &Session) -> Value {
    json!({
        "id": session.id(),
        "state": session.state().to_string(),
        "remote_addr": session.remote_addr().map(|addr| addr.to_string()),
        "connected_at": session.connected_at().map(|at| at.to_rfc3339()),
    })
}
