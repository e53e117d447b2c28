// ABOUTME: Reconnection policy with bounded attempts and exponential backoff.
// ABOUTME: Decides from close events whether and when to reopen the transport.

use std::time::Duration;

use serde::Deserialize;

use crate::transport::CloseReason;

/// Maximum reconnect attempts before the connection is declared failed.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub growth_factor: f64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            growth_factor: 2.0,
            max_delay_ms: 30_000,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ReconnectConfig {
    /// `min(base * factor^attempts, cap)`
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * self.growth_factor.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// What to do after a close event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Deliberate close; stay disconnected.
    Stay,
    /// Reopen after `delay`. `attempt` is 1-based.
    Retry { attempt: u32, delay: Duration },
    /// Attempts exhausted; needs a manual reload.
    GiveUp { attempts: u32 },
}

impl ReconnectDecision {
    /// Human-readable status line for the UI.
    pub fn describe(&self) -> Option<String> {
        match self {
            ReconnectDecision::Stay => None,
            ReconnectDecision::Retry { delay, .. } => {
                Some(format!("Connection lost. Reconnecting in {}s...", delay.as_secs().max(1)))
            }
            ReconnectDecision::GiveUp { .. } => Some(
                "Unable to reconnect to the assistant. Please reload the page.".to_string(),
            ),
        }
    }
}

/// Tracks reconnect attempts for one controller.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// A successful open resets the attempt counter.
    pub fn on_open(&mut self) {
        if self.attempts > 0 {
            tracing::info!(attempts = self.attempts, "Reconnected");
        }
        self.attempts = 0;
    }

    pub fn on_close(&mut self, reason: &CloseReason) -> ReconnectDecision {
        if reason.is_normal() {
            return ReconnectDecision::Stay;
        }
        if self.attempts >= self.config.max_attempts {
            tracing::error!(
                attempts = self.attempts,
                code = reason.code,
                "Reconnect attempts exhausted"
            );
            return ReconnectDecision::GiveUp {
                attempts: self.attempts,
            };
        }

        let delay = self.config.delay_for(self.attempts);
        self.attempts += 1;
        tracing::warn!(
            attempt = self.attempts,
            max_attempts = self.config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            code = reason.code,
            reason = %reason.reason,
            "Connection closed abnormally, scheduling reconnect"
        );
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }
}
