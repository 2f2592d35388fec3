pub mod conversation;
pub mod embedding;
pub mod event_bus;
pub mod llm;
pub mod retriever;
