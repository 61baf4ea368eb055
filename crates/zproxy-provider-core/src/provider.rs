use async_trait::async_trait;
use serde_json::Value;
use zproxy_protocol::openai::request::CreateChatCompletionRequest;

#[derive(Debug, Clone)]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BackendError {}

/// Fully prepared upstream call: where to send it, with what headers,
/// carrying what body.
#[derive(Debug, Clone)]
pub struct PreparedCall {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

/// Per-backend request construction. The engine stays generic: it asks
/// the backend to prepare a call, then owns transport, retries, and the
/// stream transform.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &str;

    fn supported_models(&self) -> Vec<String>;

    fn prepare(
        &self,
        request: &CreateChatCompletionRequest,
        token: &str,
    ) -> Result<PreparedCall, BackendError>;

    /// Ephemeral token for anonymous operation; never enters the pool.
    async fn guest_token(&self) -> Result<String, BackendError>;
}
