mod memory;
mod message;
mod transport;

pub use memory::{MemoryPeer, MemoryServer, MemoryTransport};
pub use message::{close_code, ClientFrame, ControlFrame, ServerFrame};
pub use transport::{room_url, Outgoing, Socket, SocketEvent, Transport, TungsteniteTransport};
