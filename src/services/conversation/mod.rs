//! Turn pipeline: memory reconstruction, context assembly, prompt shaping,
//! and the detached per-turn execution task.

pub mod context;
pub mod generator;
pub mod memory;
pub mod prompt;
pub mod turn;

pub use context::{assemble_context, NO_CONTEXT_SENTINEL};
pub use memory::ConversationMemory;
pub use prompt::PromptBuilder;
pub use turn::{MessageStore, TurnRequest, TurnRunner};
