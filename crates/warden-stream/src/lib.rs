// ABOUTME: Reconnecting token-streaming session controller for the warden assistants.
// ABOUTME: Provides transport, handshake, heartbeat, reconnect policy, token buffering and the event reducer.

pub mod buffer;
pub mod config;
pub mod controller;
pub mod error;
pub mod handshake;
pub mod heartbeat;
pub mod models;
pub mod profile;
pub mod protocol;
pub mod reconnect;
pub mod reducer;
pub mod session;
pub mod state;
pub mod transport;

// Controller
pub use controller::{SessionController, SessionHandle, DEFAULT_COMMAND_BUFFER};

// Configuration
pub use buffer::{BufferConfig, TokenBuffer};
pub use config::{ControllerConfig, ProfileConfig};
pub use reconnect::{ReconnectConfig, ReconnectDecision, ReconnectPolicy, MAX_RECONNECT_ATTEMPTS};

// Error types
pub use error::{Rejection, Result, StreamError};

// Domain types
pub use models::{
    ConnectionStatus, Message, Notice, NoticeLevel, PendingQuestion, ProgressState,
    ProgressStatus, STREAMING_PROGRESS_CAP,
};
pub use state::{CyclePhase, SessionSnapshot, SessionState};

// Assistant profiles
pub use profile::{AssistantProfile, PageHelp, PolicyAssistant, Submission};

// Wire protocol
pub use protocol::{ClientFrame, QueryPayload, ServerEvent, SKIP_SENTINEL};

// Reducer
pub use reducer::{reduce, Effect, Input};

// Sessions
pub use session::{
    connection_url, HttpSessionIssuer, SessionIssuer, StaticSessionIssuer, StaticToken,
    TokenSupplier,
};

// Transport
pub use transport::{
    CloseReason, OutboundFrame, Transport, TransportEvent, TransportLink, WebSocketTransport,
    ABNORMAL_CLOSURE, NORMAL_CLOSURE,
};
