//! Connection actor.
//!
//! A single task owns the socket and every timer. Public handles talk to it
//! over a command channel, so all state transitions happen on this task.

use std::future::pending;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::CredentialStore;
use crate::chat::RoomId;
use crate::error::TransportError;
use crate::metrics::{ConnectionMetrics, FrameMetrics, RecoveryMetrics};
use crate::websocket::{close_code, room_url, ClientFrame, ServerFrame, Socket, SocketEvent, Transport};

use super::backoff::ReconnectBackoff;
use super::heartbeat::Heartbeat;
use super::registry::EventHandlers;
use super::types::{ConnectionState, Disconnected, ManagerConfig, SessionSnapshot};

pub(crate) enum Command {
    Connect(RoomId),
    Disconnect,
    Send {
        content: String,
        reply: oneshot::Sender<bool>,
    },
    Reconnect {
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

struct OpenOutcome {
    generation: u64,
    result: Result<Socket, TransportError>,
}

enum Wake {
    Command(Option<Command>),
    Opened(OpenOutcome),
    Socket(SocketEvent),
    Draining(SocketEvent),
    PingDue,
    LivenessExpired,
    ReconnectDue,
    CloseTimeout,
}

pub(crate) struct Session {
    config: ManagerConfig,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    handlers: Arc<EventHandlers>,
    snapshot: watch::Sender<SessionSnapshot>,
    commands: mpsc::UnboundedReceiver<Command>,
    opened_tx: mpsc::UnboundedSender<OpenOutcome>,
    opened_rx: mpsc::UnboundedReceiver<OpenOutcome>,

    room_id: Option<RoomId>,
    manual_disconnect: bool,
    state: ConnectionState,
    /// Bumped for every open attempt and every teardown; open results carrying
    /// an older generation are discarded.
    generation: u64,
    connection_id: Option<Uuid>,
    socket: Option<Socket>,
    pending_open: Option<JoinHandle<()>>,
    /// Locally closed socket waiting for the peer's close frame
    draining: Option<Socket>,
    drain_deadline: Option<Instant>,
    heartbeat: Heartbeat,
    backoff: ReconnectBackoff,
    reconnect_at: Option<Instant>,
}

impl Session {
    pub(crate) fn new(
        config: ManagerConfig,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
        handlers: Arc<EventHandlers>,
        snapshot: watch::Sender<SessionSnapshot>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        let heartbeat = Heartbeat::new(config.ping_interval, config.liveness_timeout);
        let backoff = ReconnectBackoff::new(config.backoff.clone());

        Self {
            config,
            transport,
            credentials,
            handlers,
            snapshot,
            commands,
            opened_tx,
            opened_rx,
            room_id: None,
            manual_disconnect: false,
            state: ConnectionState::Closed,
            generation: 0,
            connection_id: None,
            socket: None,
            pending_open: None,
            draining: None,
            drain_deadline: None,
            heartbeat,
            backoff,
            reconnect_at: None,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("Connection manager started");

        loop {
            let keep_running = match self.next_wake().await {
                Wake::Command(Some(command)) => self.handle_command(command),
                Wake::Command(None) => false,
                Wake::Opened(outcome) => {
                    self.handle_open(outcome);
                    true
                }
                Wake::Socket(event) => {
                    self.handle_socket_event(event);
                    true
                }
                Wake::Draining(event) => {
                    if matches!(event, SocketEvent::Closed { .. }) {
                        self.finish_draining();
                    }
                    true
                }
                Wake::PingDue => {
                    self.send_ping();
                    true
                }
                Wake::LivenessExpired => {
                    warn!(room_id = ?self.room_id, "No response from server, connection may be dead");
                    self.forced_reconnect("Connection timeout");
                    true
                }
                Wake::ReconnectDue => {
                    self.reconnect_due();
                    true
                }
                Wake::CloseTimeout => {
                    debug!("Peer did not acknowledge close, dropping socket");
                    self.finish_draining();
                    true
                }
            };
            self.publish();

            if !keep_running {
                break;
            }
        }

        self.shutdown();
        debug!("Connection manager stopped");
    }

    async fn next_wake(&mut self) -> Wake {
        let ping_at = self.heartbeat.next_ping();
        let liveness_at = self.heartbeat.liveness_deadline();
        let reconnect_at = self.reconnect_at;
        let drain_at = self.drain_deadline;

        tokio::select! {
            biased;

            command = self.commands.recv() => Wake::Command(command),
            Some(outcome) = self.opened_rx.recv() => Wake::Opened(outcome),
            event = next_event(&mut self.socket) => Wake::Socket(event),
            event = next_event(&mut self.draining) => Wake::Draining(event),
            _ = sleep_until_opt(liveness_at) => Wake::LivenessExpired,
            _ = sleep_until_opt(ping_at) => Wake::PingDue,
            _ = sleep_until_opt(reconnect_at) => Wake::ReconnectDue,
            _ = sleep_until_opt(drain_at) => Wake::CloseTimeout,
        }
    }

    /// Returns `false` when the actor should stop
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect(room_id) => self.connect(room_id),
            Command::Disconnect => self.disconnect(),
            Command::Send { content, reply } => {
                let sent = self.send_chat(content);
                let _ = reply.send(sent);
            }
            Command::Reconnect { reply } => {
                let accepted = self.reconnect_now();
                let _ = reply.send(accepted);
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn connect(&mut self, room_id: RoomId) {
        let Some(token) = self.credentials.token() else {
            error!(room_id, "No credential available, cannot open chat connection");
            return;
        };
        self.manual_disconnect = false;

        if self.room_id == Some(room_id)
            && matches!(self.state, ConnectionState::Connecting | ConnectionState::Open)
        {
            debug!(room_id, state = %self.state, "Already connected to room");
            return;
        }

        if self.room_id != Some(room_id) {
            if let Some(previous) = self.room_id {
                info!(from = previous, to = room_id, "Switching chat room");
                self.release_connection(close_code::NORMAL, "Switching rooms");
            }
            self.backoff.reset();
        }

        self.room_id = Some(room_id);
        self.cancel_reconnect();
        self.open(room_id, &token);
    }

    fn open(&mut self, room_id: RoomId, token: &str) {
        let url = match room_url(&self.config.ws_url, room_id, token) {
            Ok(url) => url,
            Err(e) => {
                error!(room_id, error = %e, "Cannot build chat endpoint URL");
                self.emit_error(&e);
                self.clear_session();
                return;
            }
        };

        self.generation += 1;
        let generation = self.generation;
        let connection_id = Uuid::new_v4();
        self.connection_id = Some(connection_id);
        self.set_state(ConnectionState::Connecting);

        info!(
            room_id,
            connection_id = %connection_id,
            attempt = self.backoff.attempt(),
            "Opening chat connection"
        );

        let transport = self.transport.clone();
        let opened = self.opened_tx.clone();
        let connect_timeout = self.config.connect_timeout;
        self.pending_open = Some(tokio::spawn(async move {
            let result = match timeout(connect_timeout, transport.open(&url)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Connect("connection timed out".to_string())),
            };
            let _ = opened.send(OpenOutcome { generation, result });
        }));
    }

    fn handle_open(&mut self, outcome: OpenOutcome) {
        if outcome.generation != self.generation {
            if let Ok(socket) = outcome.result {
                debug!(generation = outcome.generation, "Discarding superseded connection");
                socket.close(close_code::NORMAL, "Superseded");
            }
            return;
        }
        self.pending_open = None;

        match outcome.result {
            Ok(socket) => {
                self.socket = Some(socket);
                self.backoff.reset();
                self.set_state(ConnectionState::Open);
                ConnectionMetrics::record_opened();

                info!(
                    room_id = ?self.room_id,
                    connection_id = ?self.connection_id,
                    "Chat connection established"
                );

                if let Some(room_id) = self.room_id {
                    self.publish();
                    self.handlers.connect.emit(&room_id);
                }
                self.heartbeat.start(Instant::now());
            }
            Err(e) => {
                warn!(room_id = ?self.room_id, error = %e, "Chat connection failed to open");
                ConnectionMetrics::record_open_failed();
                self.set_state(ConnectionState::Closed);
                self.emit_error(&e);
                self.after_close(close_code::ABNORMAL);
            }
        }
    }

    fn handle_socket_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Text(text) => self.handle_frame(&text),
            SocketEvent::Error(detail) => {
                warn!(room_id = ?self.room_id, error = %detail, "Chat socket error");
                self.emit_error(&TransportError::Socket(detail));
            }
            SocketEvent::Closed { code, reason } => self.handle_close(code, reason),
        }
    }

    fn handle_frame(&mut self, text: &str) {
        let frame = match ServerFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                FrameMetrics::record_malformed();
                return;
            }
        };

        self.heartbeat.re_arm(Instant::now());
        self.backoff.reset();

        match &frame {
            ServerFrame::Pong => {
                debug!("Received pong");
                FrameMetrics::record_pong();
            }
            ServerFrame::Delivered { message_id } => {
                debug!(?message_id, "Message delivery confirmed");
                FrameMetrics::record_message();
                self.emit_message(&frame);
            }
            _ => {
                FrameMetrics::record_message();
                self.emit_message(&frame);
            }
        }
    }

    fn handle_close(&mut self, code: u16, reason: String) {
        info!(room_id = ?self.room_id, code, reason = %reason, "Chat connection closed");

        self.socket = None;
        self.heartbeat.stop();
        ConnectionMetrics::record_closed();
        self.set_state(ConnectionState::Closed);
        self.emit_disconnect(code, reason);
        self.after_close(code);
    }

    fn after_close(&mut self, code: u16) {
        if !self.manual_disconnect && close_code::should_reconnect(code) && self.room_id.is_some() {
            self.schedule_reconnect();
        } else {
            self.clear_session();
        }
    }

    fn schedule_reconnect(&mut self) {
        self.cancel_reconnect();

        match self.backoff.next_delay() {
            Some(delay) => {
                self.reconnect_at = Some(Instant::now() + delay);
                RecoveryMetrics::record_scheduled();
                info!(
                    room_id = ?self.room_id,
                    attempt = self.backoff.attempt(),
                    max_attempts = self.backoff.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect"
                );
            }
            None => {
                error!(
                    room_id = ?self.room_id,
                    max_attempts = self.backoff.max_attempts(),
                    "Max reconnect attempts reached, giving up"
                );
                RecoveryMetrics::record_exhausted();
                self.clear_session();
            }
        }
    }

    fn reconnect_due(&mut self) {
        self.reconnect_at = None;
        if let Some(room_id) = self.room_id {
            info!(room_id, attempt = self.backoff.attempt(), "Reconnecting");
            self.connect(room_id);
        }
    }

    fn send_ping(&mut self) {
        self.heartbeat.ping_sent(Instant::now());

        let result = match &self.socket {
            Some(socket) if self.state == ConnectionState::Open => encode(ClientFrame::ping())
                .and_then(|text| socket.send_text(text)),
            _ => {
                self.heartbeat.stop();
                return;
            }
        };

        match result {
            Ok(()) => {
                debug!("Sent ping");
                FrameMetrics::record_ping_sent();
            }
            Err(e) => {
                warn!(error = %e, "Failed to send ping");
                self.forced_reconnect("Keepalive ping failed");
            }
        }
    }

    fn send_chat(&mut self, content: String) -> bool {
        if self.state == ConnectionState::Open {
            if let Some(socket) = &self.socket {
                self.heartbeat.re_arm(Instant::now());
                let result = encode(ClientFrame::chat(content)).and_then(|text| socket.send_text(text));

                return match result {
                    Ok(()) => {
                        FrameMetrics::record_chat_sent();
                        true
                    }
                    Err(e) => {
                        error!(room_id = ?self.room_id, error = %e, "Failed to send chat message");
                        self.forced_reconnect("Send failed");
                        false
                    }
                };
            }
        }

        warn!(room_id = ?self.room_id, state = %self.state, "Chat connection is not open, message not sent");
        if let Some(room_id) = self.room_id {
            if !self.manual_disconnect {
                self.connect(room_id);
            }
        }
        false
    }

    fn reconnect_now(&mut self) -> bool {
        match self.room_id {
            Some(room_id) => {
                info!(room_id, "Reconnect requested");
                self.forced_reconnect("Reconnect requested");
                true
            }
            None => false,
        }
    }

    /// Tear down the current connection with the timeout code and open a new
    /// one right away. Does not consume a backoff attempt.
    fn forced_reconnect(&mut self, reason: &str) {
        warn!(room_id = ?self.room_id, reason, "Forcing reconnection");
        RecoveryMetrics::record_forced();

        self.release_connection(close_code::CONNECTION_TIMEOUT, reason);
        self.cancel_reconnect();
        if let Some(room_id) = self.room_id {
            self.connect(room_id);
        }
    }

    fn disconnect(&mut self) {
        self.manual_disconnect = true;
        self.cancel_reconnect();
        self.heartbeat.stop();

        if matches!(self.state, ConnectionState::Open | ConnectionState::Connecting) {
            self.release_connection(close_code::NORMAL, "Disconnected by client");
        }
        if let Some(room_id) = self.room_id.take() {
            info!(room_id, "Disconnected from chat room");
        }
    }

    /// Close the live socket (or abandon the pending open) without scheduling
    /// anything. Disconnect handlers run only if the socket had been open.
    fn release_connection(&mut self, code: u16, reason: &str) {
        self.heartbeat.stop();
        if let Some(task) = self.pending_open.take() {
            task.abort();
        }
        self.generation += 1;

        match self.socket.take() {
            Some(socket) => {
                socket.close(code, reason);
                self.draining = Some(socket);
                self.drain_deadline = Some(Instant::now() + self.config.close_timeout);
                ConnectionMetrics::record_closed();
                self.set_state(ConnectionState::Closing);
                self.emit_disconnect(code, reason.to_string());
            }
            None => self.set_state(ConnectionState::Closed),
        }
    }

    fn finish_draining(&mut self) {
        self.draining = None;
        self.drain_deadline = None;
        if self.state == ConnectionState::Closing {
            self.set_state(ConnectionState::Closed);
        }
    }

    fn cancel_reconnect(&mut self) {
        self.reconnect_at = None;
    }

    fn clear_session(&mut self) {
        self.cancel_reconnect();
        self.heartbeat.stop();
        self.socket = None;
        self.room_id = None;
        self.connection_id = None;
    }

    fn shutdown(&mut self) {
        self.disconnect();
        self.draining = None;
        self.drain_deadline = None;
        self.set_state(ConnectionState::Closed);
        self.publish();
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Connection state changed");
            self.state = state;
        }
    }

    fn publish(&self) {
        let snapshot = SessionSnapshot {
            state: self.state,
            room_id: self.room_id,
            reconnect_attempts: self.backoff.attempt(),
            reconnect_scheduled: self.reconnect_at.is_some(),
        };
        self.snapshot.send_if_modified(|current| {
            if *current != snapshot {
                *current = snapshot;
                true
            } else {
                false
            }
        });
    }

    fn emit_message(&self, frame: &ServerFrame) {
        self.publish();
        self.handlers.message.emit(frame);
    }

    fn emit_disconnect(&self, code: u16, reason: String) {
        self.publish();
        self.handlers.disconnect.emit(&Disconnected {
            room_id: self.room_id,
            code,
            reason,
        });
    }

    fn emit_error(&self, error: &TransportError) {
        self.publish();
        self.handlers.error.emit(error);
    }
}

fn encode(frame: ClientFrame) -> Result<String, TransportError> {
    frame.to_json().map_err(|e| TransportError::Send(e.to_string()))
}

async fn next_event(socket: &mut Option<Socket>) -> SocketEvent {
    match socket {
        Some(socket) => socket.next_event().await,
        None => pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
