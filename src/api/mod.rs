//! Request/response chat API.
//!
//! Used to load history, manage rooms, and persist messages when the stream
//! is unavailable.

mod http;

pub use http::HttpChatApi;

use async_trait::async_trait;

use crate::chat::{ChatMessage, ChatRoom, MessagePage, RoomId};
use crate::error::ApiError;

#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Persist a message and return the stored record
    async fn send_message(&self, room_id: RoomId, content: &str) -> Result<ChatMessage, ApiError>;

    async fn get_messages(&self, room_id: RoomId, page: MessagePage) -> Result<Vec<ChatMessage>, ApiError>;

    /// Rooms the current user belongs to
    async fn list_rooms(&self) -> Result<Vec<ChatRoom>, ApiError>;

    /// Open a room with a teacher; returns the existing room if there is one
    async fn create_room(&self, teacher_id: i64) -> Result<ChatRoom, ApiError>;
}
