//! Streaming connection manager.
//!
//! [`ConnectionManager`] keeps one WebSocket connection to a chat room alive
//! and fans inbound frames out to registered handlers. A quiet server gets a
//! forced reconnect; unexpected closes are retried with exponential backoff.

mod backoff;
mod heartbeat;
mod registry;
mod session;
mod types;

pub use backoff::{BackoffConfig, ReconnectBackoff};
pub use heartbeat::Heartbeat;
pub use registry::{EventHandlers, HandlerRegistry, Subscription};
pub use types::{ConnectionState, Disconnected, ManagerConfig, SessionSnapshot};

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::auth::CredentialStore;
use crate::chat::RoomId;
use crate::error::TransportError;
use crate::websocket::{ServerFrame, Transport};

use session::{Command, Session};

/// Cloneable handle to the connection actor.
///
/// Handlers run on the actor task. They must not block, and must not wait
/// for the result of another manager call.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    handlers: Arc<EventHandlers>,
    snapshot: watch::Receiver<SessionSnapshot>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ConnectionManager {
    /// Spawn the connection actor. Must be called within a Tokio runtime.
    pub fn start(
        config: ManagerConfig,
        transport: impl Transport,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let handlers = Arc::new(EventHandlers::default());

        let session = Session::new(
            config,
            Arc::new(transport),
            credentials,
            handlers.clone(),
            snapshot_tx,
            commands_rx,
        );
        let task = tokio::spawn(session.run());

        Self {
            commands: commands_tx,
            handlers,
            snapshot: snapshot_rx,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Open (or switch to) the stream for `room_id`.
    ///
    /// No-op when already connecting or connected to the same room.
    pub fn connect(&self, room_id: RoomId) {
        self.dispatch(Command::Connect(room_id));
    }

    /// Close the stream and stop all reconnect activity
    pub fn disconnect(&self) {
        self.dispatch(Command::Disconnect);
    }

    /// Send a chat message over the open stream.
    ///
    /// Returns `false` when the stream is not open; nothing is queued. A
    /// targeted room that is not connected gets a connection attempt.
    pub async fn send_message(&self, content: impl Into<String>) -> bool {
        let (reply, response) = oneshot::channel();
        let command = Command::Send {
            content: content.into(),
            reply,
        };
        if self.commands.send(command).is_err() {
            return false;
        }
        response.await.unwrap_or(false)
    }

    /// Drop the current connection and reconnect to the same room
    /// immediately. Returns `false` when no room is targeted.
    pub async fn reconnect(&self) -> bool {
        let (reply, response) = oneshot::channel();
        if self.commands.send(Command::Reconnect { reply }).is_err() {
            return false;
        }
        response.await.unwrap_or(false)
    }

    pub fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ServerFrame) + Send + Sync + 'static,
    {
        self.handlers.message.subscribe(handler)
    }

    pub fn on_connect<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&RoomId) + Send + Sync + 'static,
    {
        self.handlers.connect.subscribe(handler)
    }

    pub fn on_disconnect<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Disconnected) + Send + Sync + 'static,
    {
        self.handlers.disconnect.subscribe(handler)
    }

    pub fn on_error<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        self.handlers.error.subscribe(handler)
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Room the manager is connected or reconnecting to
    pub fn current_room(&self) -> Option<RoomId> {
        self.snapshot.borrow().room_id
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.snapshot.borrow().reconnect_attempts
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every session change
    pub fn state_changes(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Disconnect and wait for the actor to exit
    pub async fn stop(&self) {
        let _ = self.commands.send(Command::Shutdown);

        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Connection manager task ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    fn dispatch(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Connection manager has stopped, command ignored");
        }
    }
}
