use serde::{Deserialize, Serialize};

/// Semantic role the upstream assigns to a streamed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Thinking,
    Answer,
    ToolCall,
    Other,
    Done,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamUsage {
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default, alias = "message")]
    pub detail: Option<String>,
}

/// Payload of one `chat:completion` frame from the upstream stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamData {
    #[serde(default)]
    pub phase: Option<Phase>,
    #[serde(default)]
    pub delta_content: Option<String>,
    #[serde(default)]
    pub edit_content: Option<String>,
    /// Monotonic position marker; used for de-duplication downstream.
    #[serde(default)]
    pub edit_index: Option<i64>,
    #[serde(default)]
    pub usage: Option<UpstreamUsage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<UpstreamError>,
    /// Some upstreams nest a second error envelope one level down.
    #[serde(default, rename = "data")]
    pub inner: Option<Box<UpstreamData>>,
}

impl UpstreamData {
    /// Some upstreams wrap the real payload one level down; callers should
    /// dispatch on the innermost envelope.
    pub fn effective(&self) -> &UpstreamData {
        self.inner.as_deref().unwrap_or(self)
    }

    pub fn error(&self) -> Option<&UpstreamError> {
        self.error
            .as_ref()
            .or_else(|| self.inner.as_ref().and_then(|inner| inner.error.as_ref()))
    }
}

/// One decoded frame of the upstream SSE stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamChunk {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Option<UpstreamData>,
    #[serde(default)]
    pub error: Option<UpstreamError>,
}

impl UpstreamChunk {
    pub const CHAT_COMPLETION: &'static str = "chat:completion";

    pub fn is_chat_completion(&self) -> bool {
        self.kind == Self::CHAT_COMPLETION
    }

    pub fn error(&self) -> Option<&UpstreamError> {
        self.error
            .as_ref()
            .or_else(|| self.data.as_ref().and_then(UpstreamData::error))
    }
}
