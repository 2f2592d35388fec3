use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::models::chat::{ModelId, SessionId, UserId};

/// A durable conversation container. `selected_model` and `use_persona` are
/// stored as written but become immutable once the session has at least one
/// persisted message.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChatSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub title: String,
    pub selected_model: Option<String>,
    pub use_persona: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    /// Stored model name resolved against the allowed set. A stale value that
    /// is no longer in the set reads as "no selection".
    pub fn model(&self) -> Option<ModelId> {
        self.selected_model.as_deref().and_then(ModelId::parse)
    }
}

/// One persisted message. Messages within a session are read back ordered by
/// `(timestamp, id)`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StoredMessage {
    pub id: i64,
    pub session_id: SessionId,
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A chunk of source-document text returned by vector search, ordered by
/// descending similarity. Transient; lives only for the duration of one turn.
#[derive(Debug, Clone, FromRow, Serialize, PartialEq)]
pub struct RetrievedFragment {
    pub content: String,
    pub document_id: i64,
    pub chunk_index: i32,
    pub similarity: f32,
}
