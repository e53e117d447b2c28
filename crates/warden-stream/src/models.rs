// ABOUTME: Data models for warden-stream
// ABOUTME: Message, ProgressState, PendingQuestion, ConnectionStatus and Notice

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::str::FromStr;

/// One transcript entry (user utterance or assistant output)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: String,
    /// Text the user sent (empty for assistant entries)
    pub query: String,
    /// Accumulated assistant text; frozen once `is_streaming_completed` is set
    pub response: String,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
    pub is_loading: bool,
    pub is_streaming: bool,
    pub is_streaming_completed: bool,
    pub is_question: bool,
    pub is_document: bool,
    pub is_error: bool,
    pub query_id: Option<String>,
}

impl Message {
    fn blank(id: String) -> Self {
        Self {
            id,
            query: String::new(),
            response: String::new(),
            is_user: false,
            timestamp: Utc::now(),
            is_loading: false,
            is_streaming: false,
            is_streaming_completed: false,
            is_question: false,
            is_document: false,
            is_error: false,
            query_id: None,
        }
    }

    pub fn user(id: String, query: String, query_id: String) -> Self {
        Self {
            query,
            is_user: true,
            query_id: Some(query_id),
            ..Self::blank(id)
        }
    }

    /// Transient assistant entry shown while waiting for the first token
    pub fn placeholder(id: String) -> Self {
        Self {
            is_loading: true,
            ..Self::blank(id)
        }
    }

    /// Complete assistant entry that will not stream
    pub fn assistant(id: String, response: String) -> Self {
        Self {
            response,
            is_streaming_completed: true,
            ..Self::blank(id)
        }
    }

    pub fn question(id: String, question: String) -> Self {
        Self {
            is_question: true,
            ..Self::assistant(id, question)
        }
    }

    pub fn error(id: String, response: String) -> Self {
        Self {
            is_error: true,
            ..Self::assistant(id, response)
        }
    }

    /// Move a fresh or placeholder entry into the streaming phase.
    pub fn begin_streaming(&mut self) {
        self.is_loading = false;
        self.is_streaming = true;
        self.is_streaming_completed = false;
    }

    /// Append visible text. Ignored once the entry is frozen.
    pub fn push_visible(&mut self, text: &str) {
        if self.is_streaming_completed {
            return;
        }
        self.response.push_str(text);
    }

    /// Freeze the entry.
    pub fn finalize(&mut self) {
        self.is_loading = false;
        self.is_streaming = false;
        self.is_streaming_completed = true;
    }
}

/// Lifecycle status carried alongside the progress percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    #[default]
    Idle,
    Processing,
    Streaming,
    Completed,
    Stopped,
    Error,
}

impl FromStr for ProgressStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(Self::Idle),
            "processing" | "pending" | "running" => Ok(Self::Processing),
            "streaming" => Ok(Self::Streaming),
            "completed" | "complete" | "done" => Ok(Self::Completed),
            "stopped" | "cancelled" => Ok(Self::Stopped),
            "error" | "failed" => Ok(Self::Error),
            other => Err(format!("unknown progress status '{}'", other)),
        }
    }
}

/// Ceiling for progress while tokens are still arriving
pub const STREAMING_PROGRESS_CAP: f64 = 98.0;

/// Heuristic increment applied per received token
pub const TOKEN_PROGRESS_STEP: f64 = 0.2;

/// Progress indicator for the current request cycle
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ProgressState {
    /// Percentage in `[0, 100]`
    pub value: f64,
    pub status: ProgressStatus,
    pub is_streaming: bool,
}

impl ProgressState {
    pub fn new(value: f64, status: ProgressStatus, is_streaming: bool) -> Self {
        Self {
            value: value.clamp(0.0, 100.0),
            status,
            is_streaming,
        }
    }

    /// Per-token bump, never reaching 100 on its own.
    pub fn advance_token(&mut self) {
        let next = (self.value + TOKEN_PROGRESS_STEP).min(STREAMING_PROGRESS_CAP);
        self.value = next.max(self.value);
    }
}

/// Clarifying question the next submission must answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingQuestion {
    pub question: String,
    pub original_query: String,
    pub original_query_id: String,
}

/// Connection status exposed to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionStatus {
    pub fn is_open(self) -> bool {
        self == ConnectionStatus::Connected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// User-visible signal that is not part of the transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            text: text.into(),
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            text: text.into(),
        }
    }
}
