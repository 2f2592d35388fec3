//! Streaming RAG chat backend: per-session WebSocket connections, pgvector
//! retrieval, prompt assembly with reconstructed conversation memory, and
//! token-streamed generation against an Ollama or OpenAI-compatible model
//! server.

pub mod auth;
pub mod config;
pub mod database;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod services;
pub mod utils;
