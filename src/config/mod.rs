pub mod settings;

pub use settings::{
    AuthConfig, DatabaseConfig, EmbeddingConfig, LlmConfig, PromptsConfig, RagConfig,
    ServerConfig, Settings,
};
