//! Session transport to the realtime speech endpoint
//!
//! One bidirectional JSON text channel per session:
//! - outbound: `session.init`, `input_audio_buffer.append`,
//!   `conversation.item.create`, `response.create`
//! - inbound: `session.ready`, audio and transcript deltas, `response.done`,
//!   `error`

pub mod channel;
pub mod memory;
pub mod messages;
pub mod websocket;

pub use channel::{Channel, ChannelEvent, Connector, OUTBOUND_CAPACITY};
pub use memory::{MemoryConnector, OpenBehavior, RemotePeer};
pub use messages::{ClientMessage, ConversationItem, ContentPart, RemoteErrorPayload, ServerMessage};
pub use websocket::WebSocketConnector;
