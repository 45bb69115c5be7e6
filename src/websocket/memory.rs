//! In-memory transport.
//!
//! [`MemoryTransport`] hands every opened socket to a [`MemoryServer`], which
//! plays the remote end. Nothing touches the network, so connection-manager
//! behaviour can be driven step by step under a paused tokio clock.

use std::future::pending;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::chat::RoomId;
use crate::error::TransportError;

use super::message::ControlFrame;
use super::transport::{Outgoing, Socket, SocketEvent, Transport};

struct Shared {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refusals: AtomicUsize,
    stalls: AtomicUsize,
    attempts: AtomicUsize,
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Client side of the in-memory transport
#[derive(Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

/// Server side of the in-memory transport
pub struct MemoryServer {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
    shared: Arc<Shared>,
}

impl MemoryTransport {
    /// Create a connected transport/server pair
    pub fn pair() -> (Self, MemoryServer) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            peers: peers_tx,
            refusals: AtomicUsize::new(0),
            stalls: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        });
        (
            Self {
                shared: shared.clone(),
            },
            MemoryServer {
                peers: peers_rx,
                shared,
            },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, url: &Url) -> Result<Socket, TransportError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);

        if take_one(&self.shared.stalls) {
            // Handshake never completes
            return pending().await;
        }
        if take_one(&self.shared.refusals) {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            url: url.clone(),
            to_client: in_tx,
            from_client: out_rx,
        };

        self.shared
            .peers
            .send(peer)
            .map_err(|_| TransportError::Connect("server is not listening".to_string()))?;

        Ok(Socket::new(out_tx, in_rx))
    }
}

impl MemoryServer {
    /// Wait for the next accepted connection
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    /// Take an already accepted connection, if any
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.peers.try_recv().ok()
    }

    /// Fail the next `count` connection attempts
    pub fn refuse_next(&self, count: usize) {
        self.shared.refusals.store(count, Ordering::SeqCst);
    }

    /// Leave the next `count` connection attempts hanging forever
    pub fn stall_next(&self, count: usize) {
        self.shared.stalls.store(count, Ordering::SeqCst);
    }

    /// Total number of `open` calls, refused ones included
    pub fn open_attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

/// One accepted connection, seen from the server
pub struct MemoryPeer {
    url: Url,
    to_client: mpsc::UnboundedSender<SocketEvent>,
    from_client: mpsc::UnboundedReceiver<Outgoing>,
}

impl MemoryPeer {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Room id taken from the `/ws/chat/{room_id}` path
    pub fn room_id(&self) -> Option<RoomId> {
        self.url
            .path_segments()
            .and_then(|segments| segments.last())
            .and_then(|last| last.parse().ok())
    }

    pub fn token(&self) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
    }

    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.to_client.send(SocketEvent::Text(text.into()));
    }

    pub fn send_json(&self, value: &serde_json::Value) {
        self.send_text(value.to_string());
    }

    pub fn pong(&self) {
        if let Ok(text) = serde_json::to_string(&ControlFrame::Pong) {
            self.send_text(text);
        }
    }

    pub fn error(&self, detail: impl Into<String>) {
        let _ = self.to_client.send(SocketEvent::Error(detail.into()));
    }

    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.to_client.send(SocketEvent::Closed {
            code,
            reason: reason.into(),
        });
    }

    /// Stop accepting frames from the client; its next send fails
    pub fn stop_reading(&mut self) {
        self.from_client.close();
    }

    /// Next frame written by the client
    pub async fn recv(&mut self) -> Option<Outgoing> {
        self.from_client.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Outgoing> {
        self.from_client.try_recv().ok()
    }

    /// All frames written by the client so far
    pub fn drain(&mut self) -> Vec<Outgoing> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Whether the client still holds this connection
    pub fn is_client_attached(&self) -> bool {
        !self.to_client.is_closed()
    }
}
