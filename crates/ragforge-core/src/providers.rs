use async_trait::async_trait;
use std::sync::Arc;

use crate::types::{ChatMessage, ChatOptions, ChatResponse};

/// Transport-level failure from an [`LlmProvider`] or [`EmbeddingProvider`]
/// call. `status` is populated when the transport is HTTP-shaped, so
/// [`crate::retry`] can classify 408/429/5xx as transient; providers with no
/// notion of status codes should leave it `None` and the call is treated as
/// non-retryable.
#[derive(Debug, Clone)]
pub struct ProviderCallError {
    pub message: String,
    pub status: Option<u16>,
}

impl ProviderCallError {
    pub fn new(message: impl Into<String>) -> Self {
        ProviderCallError { message: message.into(), status: None }
    }

    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        ProviderCallError { message: message.into(), status: Some(status) }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.status, Some(408) | Some(429) | Some(500..=599))
    }
}

impl std::fmt::Display for ProviderCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderCallError {}

/// The single capability the core needs from a completion service.
/// Errors are opaque to callers; the core only cares whether the call
/// succeeded.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        options: Option<ChatOptions>,
    ) -> Result<ChatResponse, ProviderCallError>;
}

#[async_trait]
impl<T: LlmProvider + ?Sized> LlmProvider for Arc<T> {
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        options: Option<ChatOptions>,
    ) -> Result<ChatResponse, ProviderCallError> {
        (**self).chat_completion(messages, options).await
    }
}

/// The single capability the core needs from an embedding service. The
/// returned vector's length is enforced to equal `D` by the engine's
/// startup probe and by every repository write path, not by this trait.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn create_embedding(&self, text: &str) -> Result<Vec<f32>, ProviderCallError>;
}

#[async_trait]
impl<T: EmbeddingProvider + ?Sized> EmbeddingProvider for Arc<T> {
    async fn create_embedding(&self, text: &str) -> Result<Vec<f32>, ProviderCallError> {
        (**self).create_embedding(text).await
    }
}
