//! Socket abstraction used by the connection manager.
//!
//! A [`Transport`] opens a [`Socket`]: a pair of channels carrying outbound
//! frames to a writer and inbound events from a reader. The manager only ever
//! talks to these channels, so the production WebSocket client and the
//! in-memory transport used by tests are interchangeable.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::chat::RoomId;
use crate::error::TransportError;

use super::message::close_code;

/// Event emitted by an open socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A text frame (binary frames are forwarded when they are valid UTF-8)
    Text(String),
    /// A transport-level error; a `Closed` event is expected to follow
    Error(String),
    /// The connection is closed; no further events follow
    Closed { code: u16, reason: String },
}

/// Frame handed to a socket's writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),
    Close { code: u16, reason: String },
}

/// Live connection handle
#[derive(Debug)]
pub struct Socket {
    outgoing: mpsc::UnboundedSender<Outgoing>,
    incoming: mpsc::UnboundedReceiver<SocketEvent>,
}

impl Socket {
    pub fn new(
        outgoing: mpsc::UnboundedSender<Outgoing>,
        incoming: mpsc::UnboundedReceiver<SocketEvent>,
    ) -> Self {
        Self { outgoing, incoming }
    }

    /// Queue a text frame. Fails once the writer side is gone.
    pub fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.outgoing
            .send(Outgoing::Text(text))
            .map_err(|_| TransportError::Send("socket writer has shut down".to_string()))
    }

    /// Request a close handshake. Best effort: a dead writer is already closed.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.outgoing.send(Outgoing::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Next inbound event. A reader that vanished without reporting a close
    /// is reported as an abnormal closure.
    pub async fn next_event(&mut self) -> SocketEvent {
        match self.incoming.recv().await {
            Some(event) => event,
            None => SocketEvent::Closed {
                code: close_code::ABNORMAL,
                reason: "connection lost".to_string(),
            },
        }
    }
}

/// Opens sockets to the chat endpoint
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, url: &Url) -> Result<Socket, TransportError>;
}

/// Builds `<ws-scheme>://<host>/ws/chat/{room_id}?token={token}`.
///
/// `http`/`https` bases are mapped to `ws`/`wss`.
pub fn room_url(base: &str, room_id: RoomId, token: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(base).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme '{other}'"
            )))
        }
    };
    if url.scheme() != scheme && url.set_scheme(scheme).is_err() {
        return Err(TransportError::InvalidUrl(format!("cannot use scheme '{scheme}'")));
    }

    let room = room_id.to_string();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| TransportError::InvalidUrl(base.to_string()))?;
        segments
            .pop_if_empty()
            .extend(["ws", "chat", room.as_str()]);
    }
    url.set_query(None);
    url.query_pairs_mut().append_pair("token", token);

    Ok(url)
}

/// WebSocket client transport backed by `tokio-tungstenite`
#[derive(Debug, Default, Clone)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn open(&self, url: &Url) -> Result<Socket, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (mut ws_sender, mut ws_receiver) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<SocketEvent>();

        // Task for writing queued frames to the WebSocket
        let writer_events = in_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let result = match frame {
                    Outgoing::Text(text) => ws_sender.send(Message::Text(text.into())).await,
                    Outgoing::Close { code, reason } => {
                        let close = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        let result = ws_sender.send(Message::Close(Some(close))).await;
                        if result.is_ok() {
                            break;
                        }
                        result
                    }
                };

                if let Err(e) = result {
                    tracing::debug!(error = %e, "WebSocket write failed");
                    let _ = writer_events.send(SocketEvent::Error(e.to_string()));
                    break;
                }
            }
        });

        // Task for reading frames from the WebSocket
        tokio::spawn(async move {
            while let Some(result) = ws_receiver.next().await {
                let event = match result {
                    Ok(Message::Text(text)) => SocketEvent::Text(text.as_str().to_string()),
                    Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => SocketEvent::Text(text),
                        Err(_) => {
                            tracing::debug!(bytes = data.len(), "Ignoring non UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = match frame {
                            Some(f) => (u16::from(f.code), f.reason.as_str().to_string()),
                            None => (close_code::NORMAL, String::new()),
                        };
                        let _ = in_tx.send(SocketEvent::Closed { code, reason });
                        return;
                    }
                    // Protocol-level pings are answered by tungstenite itself
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                    Err(e) => {
                        let _ = in_tx.send(SocketEvent::Error(e.to_string()));
                        let _ = in_tx.send(SocketEvent::Closed {
                            code: close_code::ABNORMAL,
                            reason: e.to_string(),
                        });
                        return;
                    }
                };

                if in_tx.send(event).is_err() {
                    // Manager dropped the socket
                    return;
                }
            }

            let _ = in_tx.send(SocketEvent::Closed {
                code: close_code::ABNORMAL,
                reason: "stream ended".to_string(),
            });
        });

        Ok(Socket::new(out_tx, in_rx))
    }
}
