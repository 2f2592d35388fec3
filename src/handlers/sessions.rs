use axum::{
    extract::{Extension, Path},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::auth::middleware::AuthUser;
use crate::database::{ChatSession, Repository, StoredMessage};
use crate::models::chat::SessionId;
use crate::utils::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub title: Option<String>,
}

/// Create a chat session. Untitled sessions get a short random handle so the
/// sidebar has something to show.
pub async fn create_session(
    user: AuthUser,
    Extension(repository): Extension<Arc<Repository>>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<Json<ChatSession>, ApiError> {
    let title = match payload.title.filter(|t| !t.trim().is_empty()) {
        Some(title) => title,
        None => format!("Chat {}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
    };

    let session = repository
        .create_session(user.user_id, &title)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    info!(
        "Created session {} for user {}",
        session.id, user.user_id
    );

    Ok(Json(session))
}

/// List the caller's sessions, most recently active first.
pub async fn list_sessions(
    user: AuthUser,
    Extension(repository): Extension<Arc<Repository>>,
) -> Result<Json<Vec<ChatSession>>, ApiError> {
    let sessions = repository
        .list_sessions(user.user_id)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    Ok(Json(sessions))
}

/// Full message history of one owned session, oldest first.
pub async fn list_messages(
    user: AuthUser,
    Path(session_id): Path<SessionId>,
    Extension(repository): Extension<Arc<Repository>>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    // Ownership is checked first so an alien session id reads as "not found"
    // rather than as an empty history.
    let session = repository
        .get_session(session_id, user.user_id)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    if session.is_none() {
        return Err(ApiError::NotFound(format!(
            "Session {} not found",
            session_id
        )));
    }

    let messages = repository
        .list_messages(session_id, user.user_id)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    Ok(Json(messages))
}
