//! Chat records and the room-level client

mod client;
mod types;

pub use client::{ChatClient, Delivery};
pub use types::{ChatMessage, ChatRoom, MessagePage, RoomId};
