use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::chat::{SessionId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    SessionConnected,
    SessionClosed,
    RequestReceived,
    MessageSent,
    RetrievalExecuted,
    ConfigChanged,
    ConfigRejected,
    LlmError,
}

impl ActivityType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::SessionConnected => "session_connected",
            Self::SessionClosed => "session_closed",
            Self::RequestReceived => "request_received",
            Self::MessageSent => "message_sent",
            Self::RetrievalExecuted => "retrieval_executed",
            Self::ConfigChanged => "config_changed",
            Self::ConfigRejected => "config_rejected",
            Self::LlmError => "llm_error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Success,
    Error,
    Warning,
    Info,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

/// One activity log row, written asynchronously in batches.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub activity_type: ActivityType,
    pub activity_status: ActivityStatus,
    pub message_content: Option<String>,
    pub response_content: Option<String>,
    pub fragment_count: Option<i32>,
    pub processing_time_ms: Option<i32>,
    pub llm_duration_ms: Option<i32>,
    pub retrieval_duration_ms: Option<i32>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ActivityLog {
    pub fn builder(
        session_id: SessionId,
        user_id: UserId,
        activity_type: ActivityType,
    ) -> ActivityLogBuilder {
        ActivityLogBuilder {
            log: ActivityLog {
                session_id,
                user_id,
                activity_type,
                activity_status: ActivityStatus::Info,
                message_content: None,
                response_content: None,
                fragment_count: None,
                processing_time_ms: None,
                llm_duration_ms: None,
                retrieval_duration_ms: None,
                error_message: None,
                created_at: Utc::now(),
            },
        }
    }
}

pub struct ActivityLogBuilder {
    log: ActivityLog,
}

impl ActivityLogBuilder {
    pub fn status(mut self, status: ActivityStatus) -> Self {
        self.log.activity_status = status;
        self
    }

    pub fn message(mut self, content: &str) -> Self {
        self.log.message_content = Some(content.to_string());
        self
    }

    pub fn response(mut self, content: &str) -> Self {
        self.log.response_content = Some(content.to_string());
        self
    }

    pub fn fragment_count(mut self, count: i32) -> Self {
        self.log.fragment_count = Some(count);
        self
    }

    pub fn processing_time(mut self, ms: i32) -> Self {
        self.log.processing_time_ms = Some(ms);
        self
    }

    pub fn llm_duration(mut self, ms: i32) -> Self {
        self.log.llm_duration_ms = Some(ms);
        self
    }

    pub fn retrieval_duration(mut self, ms: i32) -> Self {
        self.log.retrieval_duration_ms = Some(ms);
        self
    }

    pub fn error(mut self, message: &str) -> Self {
        self.log.error_message = Some(message.to_string());
        self
    }

    pub fn build(self) -> ActivityLog {
        self.log
    }
}
