use log::{debug, info, warn};
use std::net::SocketAddr;

use crate::proxy::session::{SessionReport, SessionStatus};

/// Receives session lifecycle events from the accept loop.
pub trait SessionObserver: Send + Sync {
    fn session_opened(&self, _peer: SocketAddr) {}

    fn session_closed(&self, report: &SessionReport);
}

/// Writes session events to the `log` facade.
pub struct LogObserver;

impl SessionObserver for LogObserver {
    fn session_opened(&self, peer: SocketAddr) {
        debug!("Accepted connection from {}", peer);
    }

    fn session_closed(&self, report: &SessionReport) {
        let route = report
            .route
            .map(|r| r.to_string())
            .unwrap_or_else(|| "undetected".to_string());

        match &report.result {
            Ok(stats) => info!(
                "Session {} [{}] closed: {} bytes up, {} bytes down",
                report.peer, route, stats.a_to_b, stats.b_to_a
            ),
            Err(e) => match report.status() {
                SessionStatus::AuthFailure | SessionStatus::UpstreamFailure => {
                    warn!("Session {} [{}] failed: {}", report.peer, route, e)
                }
                status => debug!(
                    "Session {} [{}] ended with {:?}: {}",
                    report.peer, route, status, e
                ),
            },
        }
    }
}
