use async_trait::async_trait;

use crate::error::ServiceError;

pub mod gemini;

pub use gemini::GeminiClient;

/// Conversational AI collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Assistant: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError>;
}
