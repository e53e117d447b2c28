// ABOUTME: Session handshake sent on every transport open.
// ABOUTME: Tracks whether the server has bound the socket to the session yet.

use std::time::Duration;

use tokio::time::Instant;

use crate::protocol::ClientFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    Idle,
    Sent(Instant),
    Validated,
}

/// Handshake bookkeeping for the current connection.
#[derive(Debug, Clone)]
pub struct Handshake {
    state: HandshakeState,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Idle,
        }
    }

    /// Frame to send as soon as the transport opens.
    pub fn opening_frame(&mut self, session_id: &str) -> ClientFrame {
        self.state = HandshakeState::Sent(Instant::now());
        tracing::debug!(session_id = %session_id, "Sending session handshake");
        ClientFrame::handshake(session_id)
    }

    /// Record the server acknowledgment. Returns how long validation took the
    /// first time; repeated acknowledgments return `None`.
    pub fn acknowledge(&mut self) -> Option<Duration> {
        match self.state {
            HandshakeState::Sent(at) => {
                self.state = HandshakeState::Validated;
                Some(at.elapsed())
            }
            HandshakeState::Idle => {
                self.state = HandshakeState::Validated;
                None
            }
            HandshakeState::Validated => None,
        }
    }

    /// Forget validation when the transport goes away.
    pub fn reset(&mut self) {
        self.state = HandshakeState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_acknowledge_reports_validation_time_once() {
        let mut handshake = Handshake::new();
        let frame = handshake.opening_frame("s-1");
        assert_eq!(frame, ClientFrame::handshake("s-1"));

        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(handshake.acknowledge(), Some(Duration::from_millis(250)));
        assert_eq!(handshake.acknowledge(), None);
    }

    #[test]
    fn test_acknowledge_without_handshake_has_no_timing() {
        let mut handshake = Handshake::new();
        assert_eq!(handshake.acknowledge(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_starts_over() {
        let mut handshake = Handshake::new();
        handshake.opening_frame("s-1");
        handshake.acknowledge();
        handshake.reset();

        handshake.opening_frame("s-1");
        tokio::time::advance(Duration::from_millis(40)).await;
        assert_eq!(handshake.acknowledge(), Some(Duration::from_millis(40)));
    }
}
