// ABOUTME: Event reducer turning server events and user intents into session state.
// ABOUTME: Pure apart from id generation; side effects are returned as Effect values.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Rejection;
use crate::models::{ConnectionStatus, Message, Notice, PendingQuestion, ProgressState, ProgressStatus, STREAMING_PROGRESS_CAP};
use crate::profile::{AssistantProfile, Submission};
use crate::protocol::{ClientFrame, ServerEvent, SKIP_SENTINEL};
use crate::state::{CyclePhase, SessionState};

pub const STOPPED_TEXT: &str = "Generation stopped.";
pub const NO_RESPONSE_TEXT: &str = "No response was received. Please try again.";
pub const PROCESSING_ERROR_TEXT: &str = "Something went wrong while processing the response.";
pub const BUSY_TEXT: &str = "Please wait for the current response to finish.";
pub const RECONNECTING_TEXT: &str = "Connection lost. Reconnecting...";
pub const VALIDATING_TEXT: &str = "Still validating your session. Please try again in a moment.";
pub const INTERRUPTED_TEXT: &str = "Connection lost while receiving a response.";

/// Everything the reducer consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Server(ServerEvent),
    /// A frame that could not be parsed
    Malformed { reason: String },
    Connection(ConnectionStatus),
    Submit(String),
    Skip,
    Stop,
    Flush { force: bool },
}

/// Side effects the controller must carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send(ClientFrame),
    StartFlushTimers,
    StopFlushTimers,
    Reconnect,
    Reject(Rejection),
}

/// Apply one input. Transitions run to completion; nothing here can fail.
pub fn reduce(
    state: &mut SessionState,
    input: Input,
    profile: &dyn AssistantProfile,
) -> Vec<Effect> {
    match input {
        Input::Server(event) => on_server_event(state, event, profile),
        Input::Malformed { reason } => fail_cycle(state, &reason, None),
        Input::Connection(status) => on_connection(state, status),
        Input::Submit(text) => on_submit(state, text, profile),
        Input::Skip => on_submit(state, SKIP_SENTINEL.to_string(), profile),
        Input::Stop => on_stop(state),
        Input::Flush { force } => {
            if state.phase == CyclePhase::Streaming {
                state.flush_visible(force);
            }
            Vec::new()
        }
    }
}

fn on_server_event(
    state: &mut SessionState,
    event: ServerEvent,
    profile: &dyn AssistantProfile,
) -> Vec<Effect> {
    match event {
        // Answered by the heartbeat monitor before the reducer sees it.
        ServerEvent::Ping => Vec::new(),
        ServerEvent::SessionValidated => {
            state.validated = true;
            if state
                .notice
                .as_ref()
                .is_some_and(|n| n.text == VALIDATING_TEXT)
            {
                state.notice = None;
            }
            Vec::new()
        }
        ServerEvent::Status { message, progress } => {
            on_status(state, message, progress);
            Vec::new()
        }
        ServerEvent::Question {
            question,
            original_query,
            query_id,
        } => on_question(state, question, original_query, query_id),
        ServerEvent::Info { message } => on_info(state, message),
        ServerEvent::Token { text, category } => on_token(state, &text, category.as_deref(), profile),
        ServerEvent::Done => on_done(state),
        ServerEvent::Progress { value, status } => {
            on_progress(state, value, status);
            Vec::new()
        }
        ServerEvent::Error { message } => fail_cycle(state, &message, Some(message.clone())),
    }
}

fn on_status(state: &mut SessionState, message: String, progress: Option<f64>) {
    if state.phase != CyclePhase::AwaitingResponse {
        debug!(message = %message, phase = ?state.phase, "Ignoring status outside awaiting phase");
        return;
    }
    if !message.is_empty() {
        state.status_line = Some(message);
    }
    if let Some(value) = progress {
        state.progress.value = value.clamp(0.0, 100.0);
    }
}

fn on_question(
    state: &mut SessionState,
    question: String,
    original_query: String,
    query_id: String,
) -> Vec<Effect> {
    if state.phase == CyclePhase::Stopped {
        debug!("Ignoring question after stop");
        return Vec::new();
    }
    state.finish_streaming();
    state.remove_placeholders();

    let id = state.next_message_id();
    state.push(Message::question(id, question.clone()));

    // Fall back to the submission that opened this cycle when the server
    // leaves the correlation fields out.
    let (fallback_query, fallback_id) = state.current_query.clone().unwrap_or_default();
    state.pending_question = Some(PendingQuestion {
        question,
        original_query: if original_query.is_empty() {
            fallback_query
        } else {
            original_query
        },
        original_query_id: if query_id.is_empty() {
            fallback_id
        } else {
            query_id
        },
    });

    state.status_line = None;
    state.loading = false;
    state.responded = true;
    state.progress.is_streaming = false;
    state.phase = CyclePhase::Question;
    vec![Effect::StopFlushTimers]
}

fn on_info(state: &mut SessionState, message: String) -> Vec<Effect> {
    if state.phase == CyclePhase::Stopped {
        debug!("Ignoring info after stop");
        return Vec::new();
    }
    state.finish_streaming();
    state.remove_placeholders();

    let id = state.next_message_id();
    state.push(Message::assistant(id, message));

    state.status_line = None;
    state.loading = false;
    state.progress.is_streaming = false;
    if state.phase.accepts_tokens() {
        state.responded = true;
        state.phase = CyclePhase::Informed;
    }
    vec![Effect::StopFlushTimers]
}

fn on_token(
    state: &mut SessionState,
    text: &str,
    category: Option<&str>,
    profile: &dyn AssistantProfile,
) -> Vec<Effect> {
    if !state.phase.accepts_tokens() {
        debug!(phase = ?state.phase, "Ignoring token outside an active response");
        return Vec::new();
    }

    let mut effects = Vec::new();
    if state.phase != CyclePhase::Streaming {
        state.buffer.reset();
        let id = match state.placeholder_index() {
            Some(idx) => {
                state.messages[idx].begin_streaming();
                state.messages[idx].id.clone()
            }
            None => {
                let id = state.next_message_id();
                let mut msg = Message::placeholder(id.clone());
                msg.begin_streaming();
                state.push(msg);
                id
            }
        };
        state.streaming_id = Some(id);
        state.receiving_tokens = true;
        state.responded = true;
        state.loading = true;
        state.status_line = None;
        state.phase = CyclePhase::Streaming;
        state.progress.is_streaming = true;
        state.progress.status = ProgressStatus::Streaming;
        effects.push(Effect::StartFlushTimers);
    }

    state.buffer.append(text);
    state.progress.advance_token();
    if profile.is_document(category) {
        if let Some(msg) = state.streaming_message_mut() {
            msg.is_document = true;
        }
    }
    effects
}

fn on_done(state: &mut SessionState) -> Vec<Effect> {
    if state.phase.is_closed() {
        debug!(phase = ?state.phase, "Ignoring done for a closed cycle");
        return Vec::new();
    }

    let streamed = state.phase == CyclePhase::Streaming;
    state.finish_streaming();
    state.remove_placeholders();

    if streamed {
        state.final_document = Some(state.buffer.document().to_string());
    }

    if state.responded {
        state.progress = ProgressState::new(100.0, ProgressStatus::Completed, false);
    } else {
        let id = state.next_message_id();
        state.push(Message::error(id, NO_RESPONSE_TEXT.to_string()));
        state.progress = ProgressState::new(0.0, ProgressStatus::Error, false);
    }

    state.pending_question = None;
    state.status_line = None;
    state.loading = false;
    state.phase = CyclePhase::Completed;
    vec![Effect::StopFlushTimers]
}

fn on_progress(state: &mut SessionState, value: f64, status: Option<ProgressStatus>) {
    if state.phase.is_closed() {
        debug!(value, phase = ?state.phase, "Ignoring progress for a closed cycle");
        return;
    }
    let status = status.unwrap_or(state.progress.status);
    let mut value = value.clamp(0.0, 100.0);
    // While streaming, progress never moves backwards and only a completion
    // may reach 100.
    if state.progress.is_streaming && status != ProgressStatus::Completed {
        value = value.min(STREAMING_PROGRESS_CAP).max(state.progress.value);
    }
    state.progress.value = value;
    state.progress.status = status;
}

/// Malformed frames and server-reported errors. `message` is added to the
/// transcript when present.
fn fail_cycle(state: &mut SessionState, reason: &str, message: Option<String>) -> Vec<Effect> {
    if state.phase == CyclePhase::Stopped {
        debug!(reason = %reason, "Ignoring failure after stop");
        return Vec::new();
    }
    warn!(reason = %reason, phase = ?state.phase, "Failed to process server event");

    state.finish_streaming();
    state.remove_placeholders();
    if let Some(text) = message {
        let id = state.next_message_id();
        state.push(Message::error(id, text.clone()));
        state.notice = Some(Notice::error(text));
    } else {
        state.notice = Some(Notice::error(PROCESSING_ERROR_TEXT));
    }

    state.loading = false;
    state.status_line = None;
    state.progress.status = ProgressStatus::Error;
    state.progress.is_streaming = false;
    if state.phase.accepts_tokens() {
        state.phase = CyclePhase::Failed;
    }
    vec![Effect::StopFlushTimers]
}

fn on_connection(state: &mut SessionState, status: ConnectionStatus) -> Vec<Effect> {
    state.connection = status;
    if status.is_open() {
        return Vec::new();
    }
    state.validated = false;

    if !state.phase.accepts_tokens() {
        return Vec::new();
    }

    // The in-flight cycle is over from the client's side; unflushed text is
    // discarded rather than carried into whatever comes next.
    let dropped = state.buffer.discard_pending();
    if let Some(msg) = state.streaming_message_mut() {
        msg.finalize();
    }
    state.streaming_id = None;
    state.remove_placeholders();
    state.receiving_tokens = false;
    state.loading = false;
    state.status_line = None;
    state.progress.status = ProgressStatus::Error;
    state.progress.is_streaming = false;
    state.phase = CyclePhase::Failed;
    state.notice = Some(Notice::warning(INTERRUPTED_TEXT));
    debug!(dropped_bytes = dropped, "Cancelled in-flight cycle on connection loss");
    vec![Effect::StopFlushTimers]
}

fn on_submit(state: &mut SessionState, text: String, profile: &dyn AssistantProfile) -> Vec<Effect> {
    let text = text.trim().to_string();
    if text.is_empty() {
        return vec![Effect::Reject(Rejection::Empty)];
    }
    if state.loading {
        state.notice = Some(Notice::warning(BUSY_TEXT));
        return vec![Effect::Reject(Rejection::Busy)];
    }
    if !state.connection.is_open() {
        state.notice = Some(Notice::warning(RECONNECTING_TEXT));
        return vec![Effect::Reconnect, Effect::Reject(Rejection::NotConnected)];
    }
    if !state.validated {
        state.notice = Some(Notice::info(VALIDATING_TEXT));
        return vec![Effect::Reject(Rejection::Validating)];
    }

    let submission = match state.pending_question.take() {
        Some(question) => Submission::Answer {
            answer: text.clone(),
            question,
        },
        None => Submission::Query {
            text: text.clone(),
            query_id: Uuid::new_v4().to_string(),
        },
    };
    let query_id = submission.query_id().to_string();

    state.buffer.reset();
    state.progress = ProgressState::new(0.0, ProgressStatus::Processing, false);
    state.loading = true;
    state.receiving_tokens = false;
    state.status_line = None;
    state.notice = None;
    state.streaming_id = None;
    state.responded = false;
    state.phase = CyclePhase::AwaitingResponse;
    state.current_query = Some(match &submission {
        Submission::Query { text, query_id } => (text.clone(), query_id.clone()),
        Submission::Answer { question, .. } => (
            question.original_query.clone(),
            question.original_query_id.clone(),
        ),
    });

    let user_id = state.next_message_id();
    state.push(Message::user(user_id, text, query_id));
    let placeholder_id = state.next_message_id();
    state.push(Message::placeholder(placeholder_id));

    debug!(profile = profile.name(), query_id = %submission.query_id(), "Submitting query");
    let payload = profile.query_payload(&state.session_id, &submission);
    vec![Effect::Send(ClientFrame::Query(payload))]
}

fn on_stop(state: &mut SessionState) -> Vec<Effect> {
    if !state.phase.is_active() {
        debug!(phase = ?state.phase, "Stop with nothing to stop");
        return Vec::new();
    }

    state.finish_streaming();
    state.remove_placeholders();
    let id = state.next_message_id();
    state.push(Message::assistant(id, STOPPED_TEXT.to_string()));

    state.progress = ProgressState::new(0.0, ProgressStatus::Stopped, false);
    state.pending_question = None;
    state.loading = false;
    state.status_line = None;
    state.phase = CyclePhase::Stopped;
    vec![
        Effect::StopFlushTimers,
        Effect::Send(ClientFrame::stop_generation()),
    ]
}
