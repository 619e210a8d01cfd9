//! Real-time subsystem.
//!
//! # Data Flow
//! ```text
//! WebSocket upgrade (http/websocket.rs)
//!     → manager.rs connect (validate credential, join room, welcome)
//!     → inbound frames → manager.rs handle_inbound → broadcast
//!     → connection.rs bounded queue → writer task → socket
//! ```

pub mod connection;
pub mod manager;
pub mod messages;

pub use connection::{Connection, ConnectionId, ConnectionState};
pub use manager::{BroadcastReport, CloseReason, ConnectionManager, RealtimeError, RoomSnapshot};
pub use messages::{ClientMessage, PresenceEvent, ServerMessage};
