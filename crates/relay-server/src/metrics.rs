//! Minimal Prometheus text-exposition metrics for `/metrics` (§4.I).
//!
//! No metrics crate appears anywhere in the reference pack, so this is a
//! deliberately small hand-rolled exception: atomic counters rendered as
//! the plain-text exposition format, nothing more.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters, cheap to update from any session task.
#[derive(Default)]
pub struct Metrics {
    connections_total: AtomicU64,
    connections_current: AtomicU64,
    frames_dispatched_total: AtomicU64,
}

impl Metrics {
    /// Build a fresh, zeroed set of counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection establishing its session.
    pub fn record_connected(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_current.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection's session ending.
    pub fn record_disconnected(&self) {
        self.connections_current.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record one dispatched signal frame.
    pub fn record_dispatch(&self) {
        self.frames_dispatched_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Render current counters in Prometheus text exposition format.
    pub fn render(&self) -> String {
        format!(
            "# HELP relay_connections_total Total WebSocket connections accepted.\n\
             # TYPE relay_connections_total counter\n\
             relay_connections_total {}\n\
             # HELP relay_connections_current Currently open WebSocket connections.\n\
             # TYPE relay_connections_current gauge\n\
             relay_connections_current {}\n\
             # HELP relay_frames_dispatched_total Signal frames dispatched.\n\
             # TYPE relay_frames_dispatched_total counter\n\
             relay_frames_dispatched_total {}\n",
            self.connections_total.load(Ordering::Relaxed),
            self.connections_current.load(Ordering::Relaxed),
            self.frames_dispatched_total.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_zeroed_counters() {
        let metrics = Metrics::new();
        let rendered = metrics.render();
        assert!(rendered.contains("relay_connections_total 0"));
    }

    #[test]
    fn tracks_connect_disconnect() {
        let metrics = Metrics::new();
        metrics.record_connected();
        metrics.record_connected();
        metrics.record_disconnected();
        let rendered = metrics.render();
        assert!(rendered.contains("relay_connections_total 2"));
        assert!(rendered.contains("relay_connections_current 1"));
    }
}
