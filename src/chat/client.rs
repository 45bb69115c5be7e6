use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

use crate::api::ChatApi;
use crate::connection_manager::ConnectionManager;
use crate::error::{ChatError, Result};
use crate::metrics::FallbackMetrics;

use super::types::{ChatMessage, ChatRoom, MessagePage, RoomId};

/// How a message reached the server
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Written to the open stream; the broadcast echo carries the stored record
    Streamed,
    /// Persisted over the request/response API
    Stored(ChatMessage),
}

/// Room-level chat client.
///
/// Prefers the stream and falls back to the request/response API whenever
/// the stream is down or rejects a send.
pub struct ChatClient {
    manager: ConnectionManager,
    api: Arc<dyn ChatApi>,
    history_limit: u32,
    selected_room: Mutex<Option<RoomId>>,
}

impl ChatClient {
    pub fn new(manager: ConnectionManager, api: Arc<dyn ChatApi>, history_limit: u32) -> Self {
        Self {
            manager,
            api,
            history_limit,
            selected_room: Mutex::new(None),
        }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn selected_room(&self) -> Option<RoomId> {
        *self.selected_room.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Select a room: load its recent history, then open the stream.
    ///
    /// The stream is opened even if history fails to load.
    pub async fn open_room(&self, room_id: RoomId) -> Result<Vec<ChatMessage>> {
        *self.selected_room.lock().unwrap_or_else(PoisonError::into_inner) = Some(room_id);

        let history = self
            .api
            .get_messages(room_id, MessagePage::new(self.history_limit, 0))
            .await;
        self.manager.connect(room_id);

        let history = history?;
        info!(room_id, messages = history.len(), "Opened chat room");
        Ok(history)
    }

    /// Older messages for the selected room
    pub async fn history(&self, page: MessagePage) -> Result<Vec<ChatMessage>> {
        let room_id = self.selected_room().ok_or(ChatError::NoRoom)?;
        Ok(self.api.get_messages(room_id, page).await?)
    }

    pub async fn send(&self, content: &str) -> Result<Delivery> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let room_id = self.selected_room().ok_or(ChatError::NoRoom)?;

        if self.manager.is_connected() && self.manager.send_message(content).await {
            return Ok(Delivery::Streamed);
        }

        warn!(room_id, "Stream unavailable, sending message over HTTP");
        match self.api.send_message(room_id, content).await {
            Ok(message) => {
                FallbackMetrics::record_stored();
                Ok(Delivery::Stored(message))
            }
            Err(e) => {
                FallbackMetrics::record_failed();
                Err(e.into())
            }
        }
    }

    /// Reconnect the stream for the selected room, starting a fresh session
    /// if the previous one gave up.
    pub async fn reconnect(&self) -> Result<()> {
        let room_id = self.selected_room().ok_or(ChatError::NoRoom)?;
        if !self.manager.reconnect().await {
            self.manager.connect(room_id);
        }
        Ok(())
    }

    pub async fn rooms(&self) -> Result<Vec<ChatRoom>> {
        Ok(self.api.list_rooms().await?)
    }

    pub async fn start_room_with(&self, teacher_id: i64) -> Result<ChatRoom> {
        Ok(self.api.create_room(teacher_id).await?)
    }

    /// Deselect the room and close the stream
    pub fn leave(&self) {
        *self.selected_room.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.manager.disconnect();
    }
}
