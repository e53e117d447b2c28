// ABOUTME: JSON wire frames exchanged with the streaming backend.
// ABOUTME: Parses inbound server events and serializes outbound control and query frames.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::StreamError;
use crate::models::ProgressStatus;

/// Literal the backend recognises as "skip the pending question"
pub const SKIP_SENTINEL: &str = "SKIP";

/// Status message that acknowledges the handshake
pub const SESSION_VALIDATED: &str = "session_validated";

/// A typed event received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Ping,
    SessionValidated,
    Status {
        message: String,
        progress: Option<f64>,
    },
    Question {
        question: String,
        original_query: String,
        query_id: String,
    },
    Info {
        message: String,
    },
    Token {
        text: String,
        category: Option<String>,
    },
    Done,
    Progress {
        value: f64,
        status: Option<ProgressStatus>,
    },
    /// Error reported by the backend itself
    Error {
        message: String,
    },
}

impl ServerEvent {
    /// Parse one text frame.
    ///
    /// Frames are discriminated by `type` where present, otherwise by the
    /// presence of a `token` or `status` field. Anything else is an error.
    pub fn parse(raw: &str) -> Result<Self, StreamError> {
        let value: Value = serde_json::from_str(raw)?;
        let obj = value
            .as_object()
            .ok_or_else(|| StreamError::Protocol("frame is not a JSON object".into()))?;

        match obj.get("type").and_then(Value::as_str) {
            Some("ping") => Ok(Self::Ping),
            Some("done") => Ok(Self::Done),
            Some("status") => Ok(Self::status_from(obj)),
            Some("question") => Ok(Self::Question {
                question: required_str(obj, "question")?,
                original_query: string_like(obj.get("original_query")).unwrap_or_default(),
                query_id: string_like(obj.get("query_id")).unwrap_or_default(),
            }),
            Some("info") => Ok(Self::Info {
                message: required_str(obj, "message")?,
            }),
            Some("token") => Self::token_from(obj),
            Some("progress") => Ok(Self::Progress {
                value: obj
                    .get("progress")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| StreamError::Protocol("progress frame without value".into()))?,
                status: obj
                    .get("status")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok()),
            }),
            Some("error") => Ok(Self::Error {
                message: obj
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("The assistant reported an error")
                    .to_string(),
            }),
            Some(other) => Err(StreamError::Protocol(format!(
                "unknown frame type '{}'",
                other
            ))),
            None if obj.contains_key("token") => Self::token_from(obj),
            None if obj.contains_key("status") => Ok(Self::status_from(obj)),
            None => Err(StreamError::Protocol("unrecognised frame".into())),
        }
    }

    fn status_from(obj: &Map<String, Value>) -> Self {
        let message = obj
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if message == SESSION_VALIDATED {
            return Self::SessionValidated;
        }
        Self::Status {
            message,
            progress: obj.get("progress").and_then(Value::as_f64),
        }
    }

    fn token_from(obj: &Map<String, Value>) -> Result<Self, StreamError> {
        Ok(Self::Token {
            text: required_str(obj, "token")?,
            category: obj
                .get("response_category")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::SessionValidated => "session_validated",
            Self::Status { .. } => "status",
            Self::Question { .. } => "question",
            Self::Info { .. } => "info",
            Self::Token { .. } => "token",
            Self::Done => "done",
            Self::Progress { .. } => "progress",
            Self::Error { .. } => "error",
        }
    }
}

fn required_str(obj: &Map<String, Value>, key: &str) -> Result<String, StreamError> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| StreamError::Protocol(format!("missing string field '{}'", key)))
}

/// Accept ids sent either as strings or numbers.
fn string_like(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    Pong,
    StopGeneration,
}

/// A user submission as sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryPayload {
    pub session_id: String,
    pub user_query: String,
    pub query_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_query: Option<String>,
}

/// A frame sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ClientFrame {
    Handshake {
        session_id: String,
    },
    Control {
        #[serde(rename = "type")]
        kind: ControlKind,
    },
    Query(QueryPayload),
}

impl ClientFrame {
    pub fn handshake(session_id: impl Into<String>) -> Self {
        Self::Handshake {
            session_id: session_id.into(),
        }
    }

    pub fn pong() -> Self {
        Self::Control {
            kind: ControlKind::Pong,
        }
    }

    pub fn stop_generation() -> Self {
        Self::Control {
            kind: ControlKind::StopGeneration,
        }
    }

    pub fn to_text(&self) -> Result<String, StreamError> {
        Ok(serde_json::to_string(self)?)
    }
}
