use anyhow::Result;
use pgvector::Vector;
use tracing::debug;

use super::models::{ChatSession, RetrievedFragment, StoredMessage};
use super::DbPool;
use crate::models::chat::{ModelId, Role, SessionId, UserId};

pub struct Repository {
    pub pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Bootstrap schema on startup. Table creation is idempotent; the vector
    /// extension must already be installable by the connecting role.
    pub async fn ensure_schema(&self) -> Result<()> {
        let pool = self.pool.get_pool();

        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(pool)
            .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS chat_sessions (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL,
                title TEXT NOT NULL,
                selected_model TEXT,
                use_persona BOOLEAN,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS chat_messages (
                id BIGSERIAL PRIMARY KEY,
                session_id BIGINT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
                role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL DEFAULT now()
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_session_ts \
             ON chat_messages (session_id, timestamp, id)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS personas (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                guide_prompt TEXT
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS user_profiles (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL UNIQUE,
                persona_id BIGINT REFERENCES personas(id) ON DELETE SET NULL
            )"#,
        )
        .execute(pool)
        .await?;

        // Populated by the external ingestion pipeline; created here so a
        // fresh deployment can serve ungrounded chat before any ingestion ran.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS document_chunks (
                id BIGSERIAL PRIMARY KEY,
                document_id BIGINT NOT NULL,
                chunk_index INT NOT NULL,
                content TEXT NOT NULL,
                embedding vector(768)
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS chat_activity_logs (
                id BIGSERIAL PRIMARY KEY,
                session_id BIGINT NOT NULL,
                user_id BIGINT NOT NULL,
                activity_type TEXT NOT NULL,
                activity_status TEXT NOT NULL,
                message_content TEXT,
                response_content TEXT,
                fragment_count INT,
                processing_time_ms INT,
                llm_duration_ms INT,
                retrieval_duration_ms INT,
                error_message TEXT,
                created_at TIMESTAMPTZ NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    // ===== Sessions =====

    pub async fn create_session(&self, user_id: UserId, title: &str) -> Result<ChatSession> {
        let session = sqlx::query_as::<_, ChatSession>(
            r#"INSERT INTO chat_sessions (user_id, title)
               VALUES ($1, $2)
               RETURNING id, user_id, title, selected_model, use_persona, created_at, updated_at"#,
        )
        .bind(user_id)
        .bind(title)
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(session)
    }

    /// Owner-scoped load. Returns None both for a missing session and for a
    /// session owned by someone else; callers cannot distinguish the two.
    pub async fn get_session(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<Option<ChatSession>> {
        let session = sqlx::query_as::<_, ChatSession>(
            r#"SELECT id, user_id, title, selected_model, use_persona, created_at, updated_at
               FROM chat_sessions
               WHERE id = $1 AND user_id = $2"#,
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(session)
    }

    pub async fn list_sessions(&self, user_id: UserId) -> Result<Vec<ChatSession>> {
        let sessions = sqlx::query_as::<_, ChatSession>(
            r#"SELECT id, user_id, title, selected_model, use_persona, created_at, updated_at
               FROM chat_sessions
               WHERE user_id = $1
               ORDER BY updated_at DESC"#,
        )
        .bind(user_id)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(sessions)
    }

    /// Persist a config choice. The "no messages yet" lock check lives in the
    /// connection state machine; the WHERE clause re-asserts ownership only.
    pub async fn set_selected_model(
        &self,
        session_id: SessionId,
        user_id: UserId,
        model: ModelId,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE chat_sessions SET selected_model = $3, updated_at = now() \
             WHERE id = $1 AND user_id = $2",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(model.as_str())
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }

    pub async fn set_use_persona(
        &self,
        session_id: SessionId,
        user_id: UserId,
        use_persona: bool,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE chat_sessions SET use_persona = $3, updated_at = now() \
             WHERE id = $1 AND user_id = $2",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(use_persona)
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }

    // ===== Messages =====

    pub async fn list_messages(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<Vec<StoredMessage>> {
        let messages = sqlx::query_as::<_, StoredMessage>(
            r#"SELECT m.id, m.session_id, m.role, m.content, m.timestamp
               FROM chat_messages m
               JOIN chat_sessions s ON s.id = m.session_id
               WHERE m.session_id = $1 AND s.user_id = $2
               ORDER BY m.timestamp, m.id"#,
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(messages)
    }

    pub async fn count_messages(&self, session_id: SessionId) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM chat_messages WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(count)
    }

    /// Insert a message and touch the parent session, in one transaction. The
    /// ownership guard in the INSERT makes the write a no-op for sessions the
    /// user does not own.
    pub async fn create_message(
        &self,
        session_id: SessionId,
        user_id: UserId,
        role: Role,
        content: &str,
    ) -> Result<StoredMessage> {
        let mut tx = self.pool.get_pool().begin().await?;

        let message = sqlx::query_as::<_, StoredMessage>(
            r#"INSERT INTO chat_messages (session_id, role, content)
               SELECT s.id, $3, $4
               FROM chat_sessions s
               WHERE s.id = $1 AND s.user_id = $2
               RETURNING id, session_id, role, content, timestamp"#,
        )
        .bind(session_id)
        .bind(user_id)
        .bind(role.as_str())
        .bind(content)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(message) = message else {
            tx.rollback().await.ok();
            anyhow::bail!("Session {} not found for user {}", session_id, user_id);
        };

        sqlx::query("UPDATE chat_sessions SET updated_at = now() WHERE id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(message)
    }

    // ===== Persona =====

    /// Persona text for a user, via their profile. Missing profile or persona
    /// is not an error.
    pub async fn get_persona_for_user(&self, user_id: UserId) -> Result<Option<String>> {
        let description = sqlx::query_scalar::<_, String>(
            r#"SELECT p.description
               FROM user_profiles up
               JOIN personas p ON p.id = up.persona_id
               WHERE up.user_id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(description)
    }

    // ===== Vector search =====

    /// Nearest fragments by cosine distance, descending similarity.
    pub async fn search_chunks(
        &self,
        query_embedding: Vector,
        limit: i32,
    ) -> Result<Vec<RetrievedFragment>> {
        let fragments = sqlx::query_as::<_, RetrievedFragment>(
            r#"SELECT
                content,
                document_id,
                chunk_index,
                (1 - (embedding <=> $1))::float4 AS similarity
               FROM document_chunks
               WHERE embedding IS NOT NULL
               ORDER BY embedding <=> $1
               LIMIT $2"#,
        )
        .bind(query_embedding)
        .bind(limit)
        .fetch_all(self.pool.get_pool())
        .await?;

        debug!("Vector search returned {} fragments", fragments.len());

        Ok(fragments)
    }
}

#[async_trait::async_trait]
impl crate::handlers::ws::SessionStore for Repository {
    async fn message_count(&self, session_id: SessionId) -> Result<i64> {
        self.count_messages(session_id).await
    }

    async fn set_selected_model(
        &self,
        session_id: SessionId,
        user_id: UserId,
        model: ModelId,
    ) -> Result<()> {
        Repository::set_selected_model(self, session_id, user_id, model).await
    }

    async fn set_use_persona(
        &self,
        session_id: SessionId,
        user_id: UserId,
        use_persona: bool,
    ) -> Result<()> {
        Repository::set_use_persona(self, session_id, user_id, use_persona).await
    }
}

#[async_trait::async_trait]
impl crate::services::conversation::MessageStore for Repository {
    async fn append_message(
        &self,
        session_id: SessionId,
        user_id: UserId,
        role: Role,
        content: String,
    ) -> Result<()> {
        self.create_message(session_id, user_id, role, &content)
            .await?;
        Ok(())
    }
}
