//! Keep-alive sender and dead-peer detection.
//!
//! Both loops are tied to the session's cancellation token and stop as soon
//! as the session closes, whatever the reason.

use crate::session::Session;
use crate::state::CloseReason;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// When the last frame arrived, readable from any task.
#[derive(Debug)]
pub struct Liveness {
    origin: Instant,
    /// Milliseconds after `origin`.
    last_seen: AtomicU64,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_seen: AtomicU64::new(0),
        }
    }

    /// Records that a frame has just been received.
    pub fn touch(&self) {
        let elapsed = self.origin.elapsed().as_millis() as u64;
        self.last_seen.store(elapsed, Ordering::Release);
    }

    pub fn last_seen(&self) -> Instant {
        self.origin + Duration::from_millis(self.last_seen.load(Ordering::Acquire))
    }

    /// Time since the last frame arrived.
    pub fn idle(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_seen())
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Starts the sender and checker for a connected session.
pub(crate) fn spawn(session: Session) {
    let token = session.cancel_token();

    tokio::spawn(send_loop(session.clone(), token.clone()));
    tokio::spawn(check_loop(session, token));
}

async fn send_loop(session: Session, token: CancellationToken) {
    let every = session.config().send_heart_beat_time;
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = session.send_heartbeat().await {
                    debug!("Heartbeat send failed for session {}: {}", session.id(), e);
                    break;
                }
                trace!("Sent heartbeat on session {}", session.id());
            }
        }
    }

    trace!("Heartbeat sender stopped for session {}", session.id());
}

async fn check_loop(session: Session, token: CancellationToken) {
    let timeout = session.config().check_heart_beat_time;

    loop {
        let deadline = session.liveness().last_seen() + timeout;

        tokio::select! {
            _ = token.cancelled() => break,
            _ = sleep_until(deadline) => {
                let idle = session.liveness().idle();
                if idle >= timeout {
                    warn!(
                        "Session {} silent for {:?} (limit {:?})",
                        session.id(),
                        idle,
                        timeout
                    );
                    session.close_with(CloseReason::HeartbeatTimeout).await;
                    break;
                }
            }
        }
    }

    trace!("Heartbeat checker stopped for session {}", session.id());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_liveness_tracks_idle_time() {
        let liveness = Liveness::new();
        liveness.touch();
        assert!(liveness.idle() < Duration::from_millis(50));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(liveness.idle() >= Duration::from_millis(25));

        liveness.touch();
        assert!(liveness.idle() < Duration::from_millis(25));
    }

    #[test]
    fn test_last_seen_moves_forward() {
        let liveness = Liveness::new();
        let before = liveness.last_seen();

        std::thread::sleep(Duration::from_millis(5));
        liveness.touch();

        assert!(liveness.last_seen() > before);
    }
}
