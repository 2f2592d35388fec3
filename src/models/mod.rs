pub mod chat;
pub mod protocol;

pub use chat::{ChatMessage, ModelId, Role, SessionId, UserId};
pub use protocol::{ClientMessage, ServerEvent};
