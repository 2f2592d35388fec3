//! Per-session chat WebSocket.
//!
//! One socket serves exactly one session. The connection authenticates from a
//! query-string token before upgrading, replays nothing (history travels over
//! REST), and drives a small state machine: config ops are allowed until the
//! first message is persisted, after which the session is locked and only chat
//! messages remain meaningful. Generation runs in a detached task so a client
//! that disconnects mid-stream does not cancel the turn.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Path, Query,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::jwt::JwtManager;
use crate::database::{ChatSession, Repository};
use crate::logging::{ActivityLog, ActivityLogger, ActivityStatus, ActivityType};
use crate::models::chat::{ModelId, Role, SessionId, UserId};
use crate::models::protocol::{ClientMessage, ServerEvent};
use crate::services::conversation::{ConversationMemory, TurnRequest, TurnRunner};
use crate::services::event_bus::EventBus;
use crate::utils::error::ApiError;

const MODEL_LOCKED_ERROR: &str = "Cannot change model after messages exist";
const PERSONA_LOCKED_ERROR: &str = "Cannot change persona setting after messages exist";

/// Session configuration seam for the connection state machine: the lock
/// check and the two config writes the idle ops need.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn message_count(&self, session_id: SessionId) -> anyhow::Result<i64>;

    async fn set_selected_model(
        &self,
        session_id: SessionId,
        user_id: UserId,
        model: ModelId,
    ) -> anyhow::Result<()>;

    async fn set_use_persona(
        &self,
        session_id: SessionId,
        user_id: UserId,
        use_persona: bool,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: String,
}

/// Snapshot of the session's current configuration, with the lock flags
/// derived from whether any message has been persisted yet.
fn session_info_event(session: &ChatSession, locked: bool) -> ServerEvent {
    ServerEvent::SessionInfo {
        use_persona: session.use_persona,
        disable_toggle: locked,
        disable_model_select: locked,
        session_id: session.id,
        selected_model: session.model().map(|m| m.as_str().to_string()),
    }
}

/// Upgrade handler. Token and ownership are both checked before the upgrade
/// completes, so a bad connection costs one HTTP response, not a socket.
pub async fn chat_socket(
    Path(session_id): Path<SessionId>,
    Query(query): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
    Extension(jwt): Extension<Arc<JwtManager>>,
    Extension(repository): Extension<Arc<Repository>>,
    Extension(events): Extension<Arc<EventBus>>,
    Extension(runner): Extension<Arc<TurnRunner>>,
    Extension(activity): Extension<ActivityLogger>,
) -> Result<Response, ApiError> {
    let claims = jwt
        .validate_token(&query.token)
        .map_err(|e| ApiError::Unauthorized(format!("Invalid token: {}", e)))?;
    let user_id = claims.user_id;

    let session = repository
        .get_session(session_id, user_id)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("Session {} not found", session_id)))?;

    Ok(ws.on_upgrade(move |socket| {
        handle_socket(socket, session, user_id, repository, events, runner, activity)
    }))
}

async fn handle_socket(
    socket: WebSocket,
    mut session: ChatSession,
    user_id: UserId,
    repository: Arc<Repository>,
    events: Arc<EventBus>,
    runner: Arc<TurnRunner>,
    activity: ActivityLogger,
) {
    let session_id = session.id;
    info!("WebSocket connected: session={} user={}", session_id, user_id);

    activity.log(
        ActivityLog::builder(session_id, user_id, ActivityType::SessionConnected)
            .status(ActivityStatus::Info)
            .build(),
    );

    // Memory is rebuilt from the persisted log on every connect, so a
    // reconnect resumes the conversation exactly where the log left it.
    let history = match repository.list_messages(session_id, user_id).await {
        Ok(history) => history,
        Err(e) => {
            warn!("Failed to load history for session {}: {}", session_id, e);
            return;
        }
    };
    let message_count = history.len();
    let memory = Arc::new(Mutex::new(ConversationMemory::reconstruct(&history)));

    let (sink, mut stream) = socket.split();

    // Writer task: single owner of the sink. Everything outbound goes through
    // this channel, whether it originated here or on the broadcast bus.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let writer = tokio::spawn(async move {
        let mut sink = sink;
        while let Some(event) = out_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Forward task: bus events for this session only.
    let forward = {
        let out_tx = out_tx.clone();
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) if ev.session_id == session_id => {
                        if out_tx.send(ev.event).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event subscriber lagged by {} events", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    };

    let _ = out_tx.send(session_info_event(&session, message_count > 0));

    let mut active_turn: Option<JoinHandle<()>> = None;

    while let Some(Ok(message)) = stream.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            // Pings are answered at the protocol layer.
            _ => continue,
        };

        let parsed: ClientMessage = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Unparseable client frame: {}", e);
                let _ = out_tx.send(ServerEvent::Error {
                    message: "Invalid message format".to_string(),
                });
                continue;
            }
        };

        // One turn at a time per connection. Waiting here sequences ops
        // strictly after the in-flight turn; its events keep flowing through
        // the forward task in the meantime.
        if let Some(handle) = active_turn.take() {
            let _ = handle.await;
        }

        match parsed {
            ClientMessage::SelectModel { model, .. } => {
                handle_select_model(
                    repository.as_ref(),
                    &activity,
                    &mut session,
                    user_id,
                    &model,
                    &out_tx,
                )
                .await;
            }
            ClientMessage::SetPersona { use_persona, .. } => {
                handle_set_persona(
                    repository.as_ref(),
                    &activity,
                    &mut session,
                    user_id,
                    use_persona,
                    &out_tx,
                )
                .await;
            }
            ClientMessage::Chat { message, .. } => {
                active_turn = handle_chat(
                    &repository,
                    &runner,
                    &activity,
                    &session,
                    user_id,
                    message,
                    Arc::clone(&memory),
                    &out_tx,
                )
                .await;
            }
        }
    }

    // The socket is gone; an in-flight turn keeps running detached and its
    // output lands in the persisted log.
    forward.abort();
    writer.abort();

    activity.log(
        ActivityLog::builder(session_id, user_id, ActivityType::SessionClosed)
            .status(ActivityStatus::Info)
            .build(),
    );
    info!("WebSocket closed: session={} user={}", session_id, user_id);
}

async fn session_is_locked(store: &dyn SessionStore, session_id: SessionId) -> bool {
    // The persisted log is the source of truth for the lock; in-process state
    // could miss messages written by a previous connection.
    match store.message_count(session_id).await {
        Ok(count) => count > 0,
        Err(e) => {
            warn!("Lock check failed for session {}: {}", session_id, e);
            true
        }
    }
}

async fn handle_select_model(
    store: &dyn SessionStore,
    activity: &ActivityLogger,
    session: &mut ChatSession,
    user_id: UserId,
    model: &str,
    out_tx: &mpsc::UnboundedSender<ServerEvent>,
) {
    if session_is_locked(store, session.id).await {
        activity.log(
            ActivityLog::builder(session.id, user_id, ActivityType::ConfigRejected)
                .status(ActivityStatus::Warning)
                .error(MODEL_LOCKED_ERROR)
                .build(),
        );
        let _ = out_tx.send(ServerEvent::Error {
            message: MODEL_LOCKED_ERROR.to_string(),
        });
        return;
    }

    let Some(model) = ModelId::parse(model) else {
        let _ = out_tx.send(ServerEvent::Error {
            message: format!("Invalid model: {}", model),
        });
        return;
    };

    if let Err(e) = store.set_selected_model(session.id, user_id, model).await {
        warn!("Failed to persist model selection: {}", e);
        let _ = out_tx.send(ServerEvent::Error {
            message: "Failed to save model selection".to_string(),
        });
        return;
    }

    session.selected_model = Some(model.as_str().to_string());
    activity.log(
        ActivityLog::builder(session.id, user_id, ActivityType::ConfigChanged)
            .status(ActivityStatus::Success)
            .message(model.as_str())
            .build(),
    );
    let _ = out_tx.send(ServerEvent::ModelSelected {
        model: model.as_str().to_string(),
    });
}

async fn handle_set_persona(
    store: &dyn SessionStore,
    activity: &ActivityLogger,
    session: &mut ChatSession,
    user_id: UserId,
    use_persona: bool,
    out_tx: &mpsc::UnboundedSender<ServerEvent>,
) {
    if session_is_locked(store, session.id).await {
        activity.log(
            ActivityLog::builder(session.id, user_id, ActivityType::ConfigRejected)
                .status(ActivityStatus::Warning)
                .error(PERSONA_LOCKED_ERROR)
                .build(),
        );
        let _ = out_tx.send(ServerEvent::Error {
            message: PERSONA_LOCKED_ERROR.to_string(),
        });
        return;
    }

    if let Err(e) = store.set_use_persona(session.id, user_id, use_persona).await {
        warn!("Failed to persist persona toggle: {}", e);
        let _ = out_tx.send(ServerEvent::Error {
            message: "Failed to save persona setting".to_string(),
        });
        return;
    }

    session.use_persona = Some(use_persona);
    activity.log(
        ActivityLog::builder(session.id, user_id, ActivityType::ConfigChanged)
            .status(ActivityStatus::Success)
            .message(&format!("use_persona={}", use_persona))
            .build(),
    );
    let _ = out_tx.send(session_info_event(session, false));
}

#[allow(clippy::too_many_arguments)]
async fn handle_chat(
    repository: &Arc<Repository>,
    runner: &Arc<TurnRunner>,
    activity: &ActivityLogger,
    session: &ChatSession,
    user_id: UserId,
    message: String,
    memory: Arc<Mutex<ConversationMemory>>,
    out_tx: &mpsc::UnboundedSender<ServerEvent>,
) -> Option<JoinHandle<()>> {
    let query = message.trim().to_string();
    if query.is_empty() {
        debug!("Ignoring empty chat message on session {}", session.id);
        return None;
    }

    // Persist the user message before anything else. From here on the session
    // is locked and a crash mid-turn still leaves the question on record.
    if let Err(e) = repository
        .create_message(session.id, user_id, Role::User, &query)
        .await
    {
        warn!("Failed to persist user message: {}", e);
        let _ = out_tx.send(ServerEvent::Error {
            message: "Failed to save message".to_string(),
        });
        return None;
    }

    activity.log(
        ActivityLog::builder(session.id, user_id, ActivityType::RequestReceived)
            .status(ActivityStatus::Info)
            .message(&query)
            .build(),
    );

    let persona = if session.use_persona == Some(true) {
        match repository.get_persona_for_user(user_id).await {
            Ok(persona) => persona,
            Err(e) => {
                warn!("Persona lookup failed for user {}: {}", user_id, e);
                None
            }
        }
    } else {
        None
    };

    let request = TurnRequest {
        session_id: session.id,
        user_id,
        model: session.model().unwrap_or_default(),
        persona,
        query,
        memory,
        use_persona: session.use_persona,
        selected_model: session.model(),
    };

    let runner = Arc::clone(runner);
    Some(tokio::spawn(async move {
        runner.run(request).await;
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mockall::predicate::eq;

    fn session(selected_model: Option<&str>, use_persona: Option<bool>) -> ChatSession {
        ChatSession {
            id: 5,
            user_id: 9,
            title: "Chat abc123".to_string(),
            selected_model: selected_model.map(str::to_string),
            use_persona,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn fresh_session_info_leaves_controls_enabled() {
        let event = session_info_event(&session(None, None), false);
        assert_eq!(
            event,
            ServerEvent::SessionInfo {
                use_persona: None,
                disable_toggle: false,
                disable_model_select: false,
                session_id: 5,
                selected_model: None,
            }
        );
    }

    #[test]
    fn locked_session_info_disables_both_controls() {
        let event = session_info_event(&session(Some("gemma3:1b"), Some(true)), true);
        match event {
            ServerEvent::SessionInfo {
                disable_toggle,
                disable_model_select,
                selected_model,
                use_persona,
                ..
            } => {
                assert!(disable_toggle);
                assert!(disable_model_select);
                assert_eq!(selected_model.as_deref(), Some("gemma3:1b"));
                assert_eq!(use_persona, Some(true));
            }
            other => panic!("expected session_info, got {:?}", other),
        }
    }

    #[test]
    fn stale_model_name_reads_as_no_selection() {
        let event = session_info_event(&session(Some("retired-model:9b"), None), false);
        match event {
            ServerEvent::SessionInfo { selected_model, .. } => {
                assert_eq!(selected_model, None);
            }
            other => panic!("expected session_info, got {:?}", other),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn fresh_session_model_selection_persists_and_echoes() {
        let mut store = MockSessionStore::new();
        store.expect_message_count().returning(|_| Ok(0));
        store
            .expect_set_selected_model()
            .with(eq(5i64), eq(9i64), eq(ModelId::Gemma3_1b))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = session(None, None);

        handle_select_model(&store, &ActivityLogger::noop(), &mut session, 9, "gemma3:1b", &tx)
            .await;

        assert_eq!(
            drain(&mut rx),
            vec![ServerEvent::ModelSelected {
                model: "gemma3:1b".to_string()
            }]
        );
        assert_eq!(session.selected_model.as_deref(), Some("gemma3:1b"));
    }

    #[tokio::test]
    async fn model_selection_rejected_once_messages_exist() {
        let mut store = MockSessionStore::new();
        store.expect_message_count().returning(|_| Ok(1));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = session(None, None);

        handle_select_model(&store, &ActivityLogger::noop(), &mut session, 9, "gemma3:1b", &tx)
            .await;

        assert_eq!(
            drain(&mut rx),
            vec![ServerEvent::Error {
                message: "Cannot change model after messages exist".to_string()
            }]
        );
        // No write reached the store and local state is untouched.
        assert_eq!(session.selected_model, None);
    }

    #[tokio::test]
    async fn unknown_model_name_is_rejected_without_a_write() {
        let mut store = MockSessionStore::new();
        store.expect_message_count().returning(|_| Ok(0));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = session(None, None);

        handle_select_model(&store, &ActivityLogger::noop(), &mut session, 9, "gpt-4", &tx).await;

        assert_eq!(
            drain(&mut rx),
            vec![ServerEvent::Error {
                message: "Invalid model: gpt-4".to_string()
            }]
        );
        assert_eq!(session.selected_model, None);
    }

    #[tokio::test]
    async fn persona_toggle_rejected_once_messages_exist() {
        let mut store = MockSessionStore::new();
        store.expect_message_count().returning(|_| Ok(1));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = session(None, None);

        handle_set_persona(&store, &ActivityLogger::noop(), &mut session, 9, true, &tx).await;

        assert_eq!(
            drain(&mut rx),
            vec![ServerEvent::Error {
                message: "Cannot change persona setting after messages exist".to_string()
            }]
        );
        assert_eq!(session.use_persona, None);
    }

    #[tokio::test]
    async fn fresh_session_persona_toggle_persists_and_reemits_session_info() {
        let mut store = MockSessionStore::new();
        store.expect_message_count().returning(|_| Ok(0));
        store
            .expect_set_use_persona()
            .with(eq(5i64), eq(9i64), eq(true))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = session(None, None);

        handle_set_persona(&store, &ActivityLogger::noop(), &mut session, 9, true, &tx).await;

        assert_eq!(
            drain(&mut rx),
            vec![ServerEvent::SessionInfo {
                use_persona: Some(true),
                disable_toggle: false,
                disable_model_select: false,
                session_id: 5,
                selected_model: None,
            }]
        );
    }

    #[tokio::test]
    async fn unavailable_lock_check_fails_closed() {
        let mut store = MockSessionStore::new();
        store
            .expect_message_count()
            .returning(|_| Err(anyhow::anyhow!("db down")));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = session(None, None);

        handle_select_model(&store, &ActivityLogger::noop(), &mut session, 9, "gemma3:1b", &tx)
            .await;

        assert_eq!(
            drain(&mut rx),
            vec![ServerEvent::Error {
                message: "Cannot change model after messages exist".to_string()
            }]
        );
    }
}
