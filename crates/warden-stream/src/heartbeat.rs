// ABOUTME: Heartbeat monitor answering server pings.
// ABOUTME: Keeps the last-alive timestamp for diagnostics when a connection drops.

use std::time::Duration;

use tokio::time::Instant;

use crate::protocol::ClientFrame;

/// Liveness bookkeeping. There is no client-initiated ping; the transport's
/// own close event is what ends a dead connection.
#[derive(Debug, Clone, Default)]
pub struct Heartbeat {
    last_alive: Option<Instant>,
    pings: u64,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer a server ping.
    pub fn on_ping(&mut self) -> ClientFrame {
        self.pings += 1;
        self.touch();
        ClientFrame::pong()
    }

    /// Any inbound traffic proves the peer is alive.
    pub fn touch(&mut self) {
        self.last_alive = Some(Instant::now());
    }

    pub fn last_alive(&self) -> Option<Instant> {
        self.last_alive
    }

    /// Time since the peer was last heard from.
    pub fn silence(&self) -> Option<Duration> {
        self.last_alive.map(|at| at.elapsed())
    }

    pub fn pings(&self) -> u64 {
        self.pings
    }

    pub fn reset(&mut self) {
        self.last_alive = None;
        self.pings = 0;
    }
}
