// ABOUTME: Session controller actor composing transport, handshake, heartbeat, reconnect and reducer.
// ABOUTME: SessionHandle is the UI-facing surface; state is published as snapshots on a watch channel.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::buffer::BufferConfig;
use crate::config::ControllerConfig;
use crate::error::{Rejection, Result, StreamError};
use crate::handshake::Handshake;
use crate::heartbeat::Heartbeat;
use crate::models::{ConnectionStatus, Notice};
use crate::profile::AssistantProfile;
use crate::protocol::{ClientFrame, ServerEvent};
use crate::reconnect::{ReconnectDecision, ReconnectPolicy};
use crate::reducer::{reduce, Effect, Input};
use crate::session::{connection_url, SessionIssuer, StaticSessionIssuer, StaticToken, TokenSupplier};
use crate::state::{SessionSnapshot, SessionState};
use crate::transport::{CloseReason, Transport, TransportEvent, TransportLink, WebSocketTransport};

/// Default buffer size for the command channel.
pub const DEFAULT_COMMAND_BUFFER: usize = 32;

enum Command {
    Connect {
        reply: oneshot::Sender<Result<()>>,
    },
    Submit {
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Skip {
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    NewSession {
        reply: oneshot::Sender<Result<String>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Wiring for one session controller. Call [`SessionController::spawn`] to
/// start it.
pub struct SessionController {
    endpoint: Url,
    config: ControllerConfig,
    profile: Arc<dyn AssistantProfile>,
    transport: Arc<dyn Transport>,
    issuer: Arc<dyn SessionIssuer>,
    tokens: Arc<dyn TokenSupplier>,
}

impl SessionController {
    /// Controller for the configured endpoint and profile, using the
    /// WebSocket transport and locally minted session ids.
    pub fn new(config: ControllerConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = config.endpoint_url()?;
        let profile = config.profile.build();
        Ok(Self {
            endpoint,
            config,
            profile,
            transport: Arc::new(WebSocketTransport::default()),
            issuer: Arc::new(StaticSessionIssuer),
            tokens: Arc::new(StaticToken::default()),
        })
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_issuer(mut self, issuer: Arc<dyn SessionIssuer>) -> Self {
        self.issuer = issuer;
        self
    }

    pub fn with_tokens(mut self, tokens: Arc<dyn TokenSupplier>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_profile(mut self, profile: Arc<dyn AssistantProfile>) -> Self {
        self.profile = profile;
        self
    }

    /// Start the controller task for `session_id`. Nothing is opened until
    /// [`SessionHandle::connect`] is called.
    pub fn spawn(self, session_id: impl Into<String>) -> SessionHandle {
        let state = SessionState::new(session_id, self.config.buffer.max_held_bytes);
        let (snapshots, snapshot_rx) = watch::channel(state.snapshot());
        let (commands_tx, commands) = mpsc::channel(DEFAULT_COMMAND_BUFFER);

        let task = SessionTask {
            endpoint: self.endpoint,
            buffer: self.config.buffer.clone(),
            reconnect: ReconnectPolicy::new(self.config.reconnect.clone()),
            profile: self.profile,
            transport: self.transport,
            issuer: self.issuer,
            tokens: self.tokens,
            state,
            link: None,
            handshake: Handshake::new(),
            heartbeat: Heartbeat::new(),
            reconnect_at: None,
            flush_timer: None,
            forced_flush_timer: None,
            snapshots,
            commands,
        };
        tokio::spawn(task.run());

        SessionHandle {
            commands: commands_tx,
            snapshots: snapshot_rx,
        }
    }
}

/// Cloneable handle to a running controller.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Connect { .. } => "Connect",
            Command::Submit { .. } => "Submit",
            Command::Skip { .. } => "Skip",
            Command::Stop { .. } => "Stop",
            Command::NewSession { .. } => "NewSession",
            Command::Shutdown { .. } => "Shutdown",
        };
        f.write_str(name)
    }
}

impl SessionHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| StreamError::ControllerClosed)?;
        rx.await.map_err(|_| StreamError::ControllerClosed)
    }

    /// Open the connection. A no-op while a connection is open or opening.
    pub async fn connect(&self) -> Result<()> {
        self.request(|reply| Command::Connect { reply }).await?
    }

    /// Send user text, as an answer when a question is pending. A rejected
    /// submission returns [`StreamError::Rejected`] and the caller keeps the
    /// text.
    pub async fn submit(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.request(|reply| Command::Submit { text, reply }).await?
    }

    /// Answer the pending question with the skip sentinel.
    pub async fn skip(&self) -> Result<()> {
        self.request(|reply| Command::Skip { reply }).await?
    }

    /// Stop the current generation. Safe to call at any time.
    pub async fn stop(&self) -> Result<()> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Replace the session with a freshly issued one and reconnect.
    pub async fn new_session(&self) -> Result<String> {
        self.request(|reply| Command::NewSession { reply }).await?
    }

    /// Close the connection and stop every timer. The controller task ends.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until a published snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Result<SessionSnapshot> {
        let mut rx = self.snapshots.clone();
        let snapshot = rx
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| StreamError::ControllerClosed)?;
        Ok(snapshot.clone())
    }
}

struct SessionTask {
    endpoint: Url,
    buffer: BufferConfig,
    reconnect: ReconnectPolicy,
    profile: Arc<dyn AssistantProfile>,
    transport: Arc<dyn Transport>,
    issuer: Arc<dyn SessionIssuer>,
    tokens: Arc<dyn TokenSupplier>,
    state: SessionState,
    link: Option<TransportLink>,
    handshake: Handshake,
    heartbeat: Heartbeat,
    reconnect_at: Option<Instant>,
    flush_timer: Option<Interval>,
    forced_flush_timer: Option<Interval>,
    snapshots: watch::Sender<SessionSnapshot>,
    commands: mpsc::Receiver<Command>,
}

async fn next_event(link: &mut Option<TransportLink>) -> TransportEvent {
    match link {
        Some(link) => match link.next_event().await {
            Some(event) => event,
            None => TransportEvent::Closed(CloseReason::abnormal("transport ended")),
        },
        None => pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

async fn tick_opt(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => pending().await,
    }
}

fn flush_interval(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

impl SessionTask {
    async fn run(mut self) {
        info!(session_id = %self.state.session_id(), profile = self.profile.name(), "Session controller started");
        loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(Command::Shutdown { reply }) => {
                        self.teardown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.on_command(cmd).await,
                    None => {
                        self.teardown();
                        break;
                    }
                },
                _ = tick_opt(&mut self.forced_flush_timer) => self.apply(Input::Flush { force: true }),
                event = next_event(&mut self.link) => self.on_transport_event(event),
                _ = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.open_connection();
                }
                _ = tick_opt(&mut self.flush_timer) => self.apply(Input::Flush { force: false }),
            }
        }
        info!(session_id = %self.state.session_id(), "Session controller stopped");
    }

    async fn on_command(&mut self, cmd: Command) {
        debug!(command = ?cmd, "Handling command");
        match cmd {
            Command::Connect { reply } => {
                self.connect();
                let _ = reply.send(Ok(()));
            }
            Command::Submit { text, reply } => {
                let result = self.apply_checked(Input::Submit(text));
                let _ = reply.send(result);
            }
            Command::Skip { reply } => {
                let result = self.apply_checked(Input::Skip);
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                self.apply(Input::Stop);
                let _ = reply.send(());
            }
            Command::NewSession { reply } => {
                let result = self.new_session().await;
                let _ = reply.send(result);
            }
            // Handled by the run loop
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn connect(&mut self) {
        if self.link.is_some() {
            debug!("Connect requested while a connection is open or opening");
            return;
        }
        // An explicit connect is user-initiated recovery, so it starts a fresh
        // backoff sequence.
        self.reconnect.reset();
        self.reconnect_at = None;
        self.open_connection();
    }

    /// Open a new link, closing any existing one with the normal code first.
    fn open_connection(&mut self) {
        if let Some(old) = self.link.take() {
            old.close(CloseReason::normal("replaced"));
        }
        self.handshake.reset();
        self.heartbeat.reset();

        let url = connection_url(&self.endpoint, self.tokens.as_ref());
        info!(
            host = ?self.endpoint.host_str(),
            session_id = %self.state.session_id(),
            attempt = self.reconnect.attempts(),
            "Opening connection"
        );
        self.link = Some(self.transport.open(&url));

        let status = if self.reconnect.attempts() > 0 {
            ConnectionStatus::Reconnecting
        } else {
            ConnectionStatus::Connecting
        };
        self.apply(Input::Connection(status));
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.on_opened(),
            TransportEvent::Message(text) => self.on_message(&text),
            TransportEvent::Error(e) => {
                warn!(error = %e, "Transport error");
            }
            TransportEvent::Closed(reason) => self.on_closed(reason),
        }
    }

    fn on_opened(&mut self) {
        let frame = self.handshake.opening_frame(self.state.session_id());
        if let Some(link) = self.link.as_mut() {
            link.mark_open();
        }
        self.reconnect.on_open();
        self.heartbeat.touch();
        info!(session_id = %self.state.session_id(), "Connection open");

        self.apply(Input::Connection(ConnectionStatus::Connected));
        if let Err(e) = self.send_frame(&frame) {
            warn!(error = %e, "Handshake could not be sent");
        }
    }

    fn on_message(&mut self, text: &str) {
        self.heartbeat.touch();
        let event = match ServerEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, bytes = text.len(), "Unparseable server frame");
                self.apply(Input::Malformed {
                    reason: e.to_string(),
                });
                return;
            }
        };
        debug!(kind = event.kind(), "Server event");

        match &event {
            ServerEvent::Ping => {
                let pong = self.heartbeat.on_ping();
                if let Err(e) = self.send_frame(&pong) {
                    debug!(error = %e, "Pong dropped");
                }
            }
            ServerEvent::SessionValidated => {
                if let Some(elapsed) = self.handshake.acknowledge() {
                    info!(
                        session_id = %self.state.session_id(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Session validated"
                    );
                }
            }
            _ => {}
        }
        self.apply(Input::Server(event));
    }

    fn on_closed(&mut self, reason: CloseReason) {
        self.link = None;
        self.handshake.reset();
        if let Some(silence) = self.heartbeat.silence() {
            debug!(
                silence_ms = silence.as_millis() as u64,
                pings = self.heartbeat.pings(),
                "Peer last heard from"
            );
        }

        match self.reconnect.on_close(&reason) {
            ReconnectDecision::Stay => {
                info!(code = reason.code, "Connection closed normally");
                self.reconnect_at = None;
                self.apply(Input::Connection(ConnectionStatus::Disconnected));
            }
            decision @ ReconnectDecision::Retry { delay, .. } => {
                self.reconnect_at = Some(Instant::now() + delay);
                self.apply(Input::Connection(ConnectionStatus::Reconnecting));
                if let Some(text) = decision.describe() {
                    self.set_notice(Notice::warning(text));
                }
            }
            decision @ ReconnectDecision::GiveUp { .. } => {
                self.reconnect_at = None;
                self.apply(Input::Connection(ConnectionStatus::Error));
                if let Some(text) = decision.describe() {
                    self.set_notice(Notice::error(text));
                }
            }
        }
    }

    async fn new_session(&mut self) -> Result<String> {
        if let Some(link) = self.link.take() {
            link.close(CloseReason::normal("new session"));
        }
        self.reconnect_at = None;
        self.handshake.reset();
        self.heartbeat.reset();
        self.apply(Input::Connection(ConnectionStatus::Disconnected));

        match self.issuer.create_session().await {
            Ok(session_id) => {
                info!(
                    previous = %self.state.session_id(),
                    session_id = %session_id,
                    "Starting new session"
                );
                self.stop_flush_timers();
                self.state = SessionState::new(session_id.clone(), self.buffer.max_held_bytes);
                self.reconnect.reset();
                self.open_connection();
                Ok(session_id)
            }
            Err(e) => {
                error!(error = %e, "Failed to issue new session, reconnecting current one");
                self.set_notice(Notice::error(format!("Could not start a new session: {}", e)));
                self.reconnect.reset();
                self.open_connection();
                Err(e)
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(link) = self.link.take() {
            link.close(CloseReason::normal("controller shut down"));
        }
        self.reconnect_at = None;
        self.stop_flush_timers();
        self.handshake.reset();
        self.apply(Input::Connection(ConnectionStatus::Disconnected));
    }

    fn apply(&mut self, input: Input) {
        let _ = self.apply_checked(input);
    }

    /// Reduce one input, run its effects and publish the result. Returns the
    /// rejection, if the reducer refused the input or its query never reached
    /// the socket.
    fn apply_checked(&mut self, input: Input) -> Result<()> {
        let mut before = matches!(input, Input::Submit(_) | Input::Skip).then(|| self.state.clone());
        let effects = reduce(&mut self.state, input, self.profile.as_ref());
        let mut outcome = Ok(());
        for effect in effects {
            match effect {
                Effect::Send(frame) => {
                    let sent = self.send_frame(&frame);
                    if let (ClientFrame::Query(_), Err(e)) = (&frame, sent) {
                        warn!(error = %e, "Query could not be sent, treating connection as lost");
                        if let Some(before) = before.take() {
                            self.state = before;
                        }
                        self.drop_link(e);
                        outcome = Err(StreamError::Rejected(Rejection::NotConnected));
                    }
                }
                Effect::StartFlushTimers => self.start_flush_timers(),
                Effect::StopFlushTimers => self.stop_flush_timers(),
                Effect::Reconnect => self.reconnect_now(),
                Effect::Reject(rejection) => {
                    debug!(rejection = ?rejection, "Submission rejected");
                    outcome = Err(StreamError::Rejected(rejection));
                }
            }
        }
        self.publish();
        outcome
    }

    fn send_frame(&self, frame: &ClientFrame) -> Result<()> {
        let text = frame.to_text().inspect_err(|e| {
            error!(error = %e, "Failed to encode client frame");
        })?;
        match self.link.as_ref() {
            Some(link) => link.send_text(text),
            None => Err(StreamError::Connection("no connection".into())),
        }
    }

    /// Abandon a link whose socket can no longer take frames.
    fn drop_link(&mut self, cause: StreamError) {
        if let Some(link) = self.link.take() {
            link.close(CloseReason::abnormal("send failed"));
        }
        self.on_closed(CloseReason::abnormal(cause.to_string()));
    }

    /// Reconnect right away after a rejected send, unless a retry is already
    /// pending or the attempts are exhausted.
    fn reconnect_now(&mut self) {
        if self.link.is_some() || self.reconnect_at.is_some() {
            return;
        }
        if self.state.connection() == ConnectionStatus::Error {
            debug!("Not reconnecting after exhausted attempts");
            return;
        }
        self.open_connection();
    }

    fn start_flush_timers(&mut self) {
        if self.flush_timer.is_none() {
            self.flush_timer = Some(flush_interval(self.buffer.flush_interval()));
        }
        if self.forced_flush_timer.is_none() {
            self.forced_flush_timer = Some(flush_interval(self.buffer.forced_flush_interval()));
        }
    }

    fn stop_flush_timers(&mut self) {
        self.flush_timer = None;
        self.forced_flush_timer = None;
    }

    fn set_notice(&mut self, notice: Notice) {
        self.state.notice = Some(notice);
        self.publish();
    }

    fn publish(&self) {
        let snapshot = self.state.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
