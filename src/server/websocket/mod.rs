//! WebSocket edge: session handling and message envelopes.

mod handler;
mod messages;

pub use handler::ws_handler;
pub use messages::{msg_types, ClientMessage, ServerMessage};
