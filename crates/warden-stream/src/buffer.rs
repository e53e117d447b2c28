// ABOUTME: Token buffer that coalesces streamed fragments before they become visible.
// ABOUTME: Keeps the authoritative accumulated text separately from the not-yet-flushed tail.

use std::time::Duration;

use serde::Deserialize;

/// Timing and size limits for token coalescing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Short periodic flush that keeps the transcript responsive
    pub flush_interval_ms: u64,
    /// Backstop forced flush so text is never stuck invisible
    pub forced_flush_interval_ms: u64,
    /// Pending bytes beyond which an unforced flush ignores word boundaries
    pub max_held_bytes: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 100,
            forced_flush_interval_ms: 1000,
            max_held_bytes: 256,
        }
    }
}

impl BufferConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn forced_flush_interval(&self) -> Duration {
        Duration::from_millis(self.forced_flush_interval_ms)
    }
}

/// Accumulates fragments for one response.
///
/// `append` order is arrival order; flushing only changes when text becomes
/// visible, never its order.
#[derive(Debug, Clone, Default)]
pub struct TokenBuffer {
    pending: String,
    document: String,
    max_held_bytes: usize,
}

impl TokenBuffer {
    pub fn new(max_held_bytes: usize) -> Self {
        Self {
            pending: String::new(),
            document: String::new(),
            max_held_bytes,
        }
    }

    pub fn append(&mut self, fragment: &str) {
        self.pending.push_str(fragment);
        self.document.push_str(fragment);
    }

    /// Take text that should become visible now.
    ///
    /// A forced flush takes everything. An unforced flush stops at the last
    /// whitespace so half words are not painted, unless the tail has grown
    /// past `max_held_bytes`.
    pub fn flush(&mut self, force: bool) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }

        let cut = if force || self.pending.len() >= self.max_held_bytes {
            self.pending.len()
        } else {
            let (idx, ch) = self
                .pending
                .char_indices()
                .rev()
                .find(|(_, c)| c.is_whitespace())?;
            idx + ch.len_utf8()
        };

        let rest = self.pending.split_off(cut);
        Some(std::mem::replace(&mut self.pending, rest))
    }

    /// Start a new response, dropping anything left from the previous one.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.document.clear();
    }

    /// Drop unflushed text without making it visible.
    pub fn discard_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Everything appended since the last reset, flushed or not.
    pub fn document(&self) -> &str {
        &self.document
    }
}
