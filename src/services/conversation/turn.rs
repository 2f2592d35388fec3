use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::error;

use super::context::assemble_context;
use super::generator::generate_streamed;
use super::memory::ConversationMemory;
use super::prompt::PromptBuilder;
use crate::database::RetrievedFragment;
use crate::logging::{ActivityLog, ActivityLogger, ActivityStatus, ActivityType};
use crate::models::chat::{ModelId, Role, SessionId, UserId};
use crate::models::protocol::ServerEvent;
use crate::services::event_bus::EventBus;
use crate::services::llm::LlmProvider;
use crate::services::retriever::Retriever;

/// Persistence seam the turn task writes through.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append_message(
        &self,
        session_id: SessionId,
        user_id: UserId,
        role: Role,
        content: String,
    ) -> Result<()>;
}

/// Everything one turn task needs. `memory` is shared with the owning
/// connection; the completed pair is appended here so the next turn sees it.
pub struct TurnRequest {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub model: ModelId,
    /// Resolved persona text; None means generic instruction.
    pub persona: Option<String>,
    pub query: String,
    pub memory: Arc<Mutex<ConversationMemory>>,
    // Config snapshot re-emitted after the turn (locked from now on).
    pub use_persona: Option<bool>,
    pub selected_model: Option<ModelId>,
}

/// Per-turn accumulator. Exists only for the duration of one turn task.
pub struct TurnState {
    pub query: String,
    pub fragments: Vec<RetrievedFragment>,
    pub context: String,
    pub response: String,
}

/// Executes one turn: retrieval, context assembly, prompt build, streamed
/// generation, persistence, memory update. Spawned detached per turn; a
/// disconnecting client does not cancel it.
pub struct TurnRunner {
    retriever: Retriever,
    prompt_builder: PromptBuilder,
    llm: Arc<dyn LlmProvider>,
    store: Arc<dyn MessageStore>,
    events: Arc<EventBus>,
    activity: ActivityLogger,
}

impl TurnRunner {
    pub fn new(
        retriever: Retriever,
        prompt_builder: PromptBuilder,
        llm: Arc<dyn LlmProvider>,
        store: Arc<dyn MessageStore>,
        events: Arc<EventBus>,
        activity: ActivityLogger,
    ) -> Self {
        Self {
            retriever,
            prompt_builder,
            llm,
            store,
            events,
            activity,
        }
    }

    /// Run the turn to completion. Infallible from the caller's point of
    /// view: any pipeline failure is converted into a persisted error reply
    /// and a well-formed chunk/end event sequence, so the session always
    /// comes back to idle.
    pub async fn run(&self, req: TurnRequest) {
        let start = Instant::now();

        self.events
            .publish(req.session_id, ServerEvent::AssistantResponseStart);

        match self.execute(&req).await {
            Ok(state) => {
                self.events
                    .publish(req.session_id, ServerEvent::AssistantResponseEnd);

                req.memory
                    .lock()
                    .await
                    .push_turn(req.query.clone(), state.response.clone());

                self.activity.log(
                    ActivityLog::builder(req.session_id, req.user_id, ActivityType::MessageSent)
                        .status(ActivityStatus::Success)
                        .message(&req.query)
                        .response(&state.response)
                        .fragment_count(state.fragments.len() as i32)
                        .processing_time(start.elapsed().as_millis() as i32)
                        .build(),
                );
            }
            Err(e) => {
                let error_text = format!("An error occurred: {}", e);

                // The user message is already persisted; pair it with the
                // error reply so the conversation log stays coherent.
                if let Err(persist_err) = self
                    .store
                    .append_message(
                        req.session_id,
                        req.user_id,
                        Role::Assistant,
                        error_text.clone(),
                    )
                    .await
                {
                    error!("Failed to persist error reply: {}", persist_err);
                }

                self.events.publish(
                    req.session_id,
                    ServerEvent::AssistantResponseChunk {
                        message: error_text.clone(),
                    },
                );
                self.events
                    .publish(req.session_id, ServerEvent::AssistantResponseEnd);

                self.activity.log(
                    ActivityLog::builder(req.session_id, req.user_id, ActivityType::LlmError)
                        .status(ActivityStatus::Error)
                        .message(&req.query)
                        .error(&error_text)
                        .processing_time(start.elapsed().as_millis() as i32)
                        .build(),
                );
            }
        }

        // The first turn locks the configuration; tell every subscriber.
        self.events
            .publish(req.session_id, self.config_snapshot(&req));
    }

    async fn execute(&self, req: &TurnRequest) -> Result<TurnState> {
        let retrieval_start = Instant::now();
        let fragments = self.retriever.retrieve(&req.query).await;
        let context = assemble_context(&fragments);

        self.activity.log(
            ActivityLog::builder(req.session_id, req.user_id, ActivityType::RetrievalExecuted)
                .fragment_count(fragments.len() as i32)
                .retrieval_duration(retrieval_start.elapsed().as_millis() as i32)
                .build(),
        );

        let memory_snapshot = req.memory.lock().await.clone();
        let prompt = self.prompt_builder.build(
            req.persona.as_deref(),
            &context,
            &memory_snapshot,
            &req.query,
        );

        let events = Arc::clone(&self.events);
        let session_id = req.session_id;
        let response = generate_streamed(self.llm.as_ref(), req.model, prompt, |token| {
            events.publish(
                session_id,
                ServerEvent::AssistantResponseChunk {
                    message: token.to_string(),
                },
            );
        })
        .await?;

        self.store
            .append_message(req.session_id, req.user_id, Role::Assistant, response.clone())
            .await?;

        Ok(TurnState {
            query: req.query.clone(),
            fragments,
            context,
            response,
        })
    }

    fn config_snapshot(&self, req: &TurnRequest) -> ServerEvent {
        ServerEvent::SessionInfo {
            use_persona: req.use_persona,
            disable_toggle: true,
            disable_model_select: true,
            session_id: req.session_id,
            selected_model: req.selected_model.map(|m| m.as_str().to_string()),
        }
    }
}
