use serde::{Deserialize, Serialize};

pub type SessionId = i64;
pub type UserId = i64;

/// Models the generation backend is allowed to serve. Sessions can pin one of
/// these before their first message; anything else is rejected at the
/// protocol boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelId {
    #[serde(rename = "gemma3:1b")]
    Gemma3_1b,
    #[serde(rename = "qwen2.5-coder:0.5b")]
    Qwen25Coder0_5b,
}

impl ModelId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemma3_1b => "gemma3:1b",
            Self::Qwen25Coder0_5b => "qwen2.5-coder:0.5b",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gemma3:1b" => Some(Self::Gemma3_1b),
            "qwen2.5-coder:0.5b" => Some(Self::Qwen25Coder0_5b),
            _ => None,
        }
    }
}

impl Default for ModelId {
    fn default() -> Self {
        Self::Gemma3_1b
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message role as stored in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// One entry of a structured LLM prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}
