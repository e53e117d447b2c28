// ABOUTME: Session state owned by the controller and mutated only by the reducer.
// ABOUTME: Also defines the immutable snapshot published to the rendering layer.

use serde::Serialize;

use crate::buffer::TokenBuffer;
use crate::models::{ConnectionStatus, Message, Notice, PendingQuestion, ProgressState};

/// Phase of the current request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    /// No request has been made in this session yet
    #[default]
    Idle,
    /// Submitted; nothing but status updates so far
    AwaitingResponse,
    /// Tokens are arriving
    Streaming,
    /// The server asked a clarifying question
    Question,
    /// The server answered with an info message
    Informed,
    Completed,
    Stopped,
    /// Malformed frame, server error or connection loss
    Failed,
}

impl CyclePhase {
    /// Phases in which new tokens belong to the current cycle.
    pub fn accepts_tokens(self) -> bool {
        matches!(
            self,
            CyclePhase::AwaitingResponse | CyclePhase::Streaming | CyclePhase::Informed
        )
    }

    /// Phases the user can cancel with stop.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            CyclePhase::AwaitingResponse
                | CyclePhase::Streaming
                | CyclePhase::Question
                | CyclePhase::Informed
        )
    }

    /// Phases after which late cycle events are ignored.
    pub fn is_closed(self) -> bool {
        matches!(
            self,
            CyclePhase::Idle | CyclePhase::Completed | CyclePhase::Stopped | CyclePhase::Failed
        )
    }
}

/// Everything the controller knows about one session.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub(crate) session_id: String,
    pub(crate) messages: Vec<Message>,
    pub(crate) loading: bool,
    pub(crate) progress: ProgressState,
    pub(crate) pending_question: Option<PendingQuestion>,
    pub(crate) status_line: Option<String>,
    pub(crate) connection: ConnectionStatus,
    pub(crate) validated: bool,
    pub(crate) notice: Option<Notice>,
    pub(crate) final_document: Option<String>,
    pub(crate) receiving_tokens: bool,
    pub(crate) phase: CyclePhase,
    /// Whether the current cycle produced any answer (token, question or info)
    pub(crate) responded: bool,
    pub(crate) buffer: TokenBuffer,
    pub(crate) streaming_id: Option<String>,
    /// `(text, query_id)` of the submission that opened the current cycle
    pub(crate) current_query: Option<(String, String)>,
    next_id: u64,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, max_held_bytes: usize) -> Self {
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            loading: false,
            progress: ProgressState::default(),
            pending_question: None,
            status_line: None,
            connection: ConnectionStatus::Disconnected,
            validated: false,
            notice: None,
            final_document: None,
            receiving_tokens: false,
            phase: CyclePhase::Idle,
            responded: false,
            buffer: TokenBuffer::new(max_held_bytes),
            streaming_id: None,
            current_query: None,
            next_id: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    pub fn progress(&self) -> ProgressState {
        self.progress
    }

    pub fn pending_question(&self) -> Option<&PendingQuestion> {
        self.pending_question.as_ref()
    }

    pub fn connection(&self) -> ConnectionStatus {
        self.connection
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn final_document(&self) -> Option<&str> {
        self.final_document.as_deref()
    }

    pub(crate) fn next_message_id(&mut self) -> String {
        self.next_id += 1;
        format!("msg-{}", self.next_id)
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub(crate) fn streaming_message_mut(&mut self) -> Option<&mut Message> {
        let id = self.streaming_id.as_deref()?;
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Move buffered text into the streaming entry.
    pub(crate) fn flush_visible(&mut self, force: bool) {
        let Some(text) = self.buffer.flush(force) else {
            return;
        };
        match self.streaming_id.as_deref() {
            Some(id) => {
                if let Some(msg) = self.messages.iter_mut().find(|m| m.id == id) {
                    msg.push_visible(&text);
                }
            }
            None => tracing::debug!(bytes = text.len(), "Flushed text with no streaming entry"),
        }
    }

    /// Force-flush and freeze the streaming entry, if any.
    pub(crate) fn finish_streaming(&mut self) {
        self.flush_visible(true);
        if let Some(msg) = self.streaming_message_mut() {
            msg.finalize();
        }
        self.streaming_id = None;
        self.receiving_tokens = false;
    }

    /// Drop transient loading entries.
    pub(crate) fn remove_placeholders(&mut self) {
        self.messages.retain(|m| !m.is_loading);
    }

    pub(crate) fn placeholder_index(&self) -> Option<usize> {
        self.messages.iter().rposition(|m| m.is_loading)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            messages: self.messages.clone(),
            loading: self.loading,
            progress: self.progress,
            pending_question: self.pending_question.clone(),
            status_line: self.status_line.clone(),
            connection: self.connection,
            validated: self.validated,
            notice: self.notice.clone(),
            final_document: self.final_document.clone(),
            receiving_tokens: self.receiving_tokens,
            phase: self.phase,
        }
    }
}

/// Read-only view of the session for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub messages: Vec<Message>,
    pub loading: bool,
    pub progress: ProgressState,
    pub pending_question: Option<PendingQuestion>,
    pub status_line: Option<String>,
    pub connection: ConnectionStatus,
    pub validated: bool,
    pub notice: Option<Notice>,
    pub final_document: Option<String>,
    pub receiving_tokens: bool,
    pub phase: CyclePhase,
}

impl SessionSnapshot {
    pub fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_streaming).count()
    }

    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| !m.is_user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_empty() {
        let state = SessionState::new("s-1", 256);
        assert_eq!(state.session_id(), "s-1");
        assert!(state.messages().is_empty());
        assert!(!state.loading());
        assert_eq!(state.phase(), CyclePhase::Idle);
        assert_eq!(state.connection(), ConnectionStatus::Disconnected);
        assert!(state.pending_question().is_none());
    }

    #[test]
    fn test_message_ids_are_unique() {
        let mut state = SessionState::new("s-1", 256);
        let a = state.next_message_id();
        let b = state.next_message_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_finish_streaming_flushes_and_freezes() {
        let mut state = SessionState::new("s-1", 256);
        let id = state.next_message_id();
        let mut msg = Message::placeholder(id.clone());
        msg.begin_streaming();
        state.push(msg);
        state.streaming_id = Some(id);
        state.buffer.append("held back");

        state.finish_streaming();

        let msg = &state.messages()[0];
        assert_eq!(msg.response, "held back");
        assert!(msg.is_streaming_completed);
        assert!(!msg.is_streaming);
        assert!(state.streaming_id.is_none());
    }

    #[test]
    fn test_phase_predicates() {
        assert!(CyclePhase::Streaming.accepts_tokens());
        assert!(!CyclePhase::Stopped.accepts_tokens());
        assert!(CyclePhase::Question.is_active());
        assert!(!CyclePhase::Completed.is_active());
        assert!(CyclePhase::Failed.is_closed());
    }
}
