use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use uuid::Uuid;
use zproxy_protocol::openai::error::ErrorFrame;
use zproxy_protocol::openai::request::CreateChatCompletionRequest;
use zproxy_protocol::openai::response::CreateChatCompletionResponse;
use zproxy_protocol::upstream::UpstreamChunk;
use zproxy_provider_core::{ChatBackend, CredentialPool};
use zproxy_storage::CredentialStorage;
use zproxy_transform::aggregate::ResponseAggregator;
use zproxy_transform::stream::{PhaseStreamState, StreamItem};

use crate::error::EngineError;
use crate::upstream_client::{UpstreamBody, WreqUpstreamClient};
use crate::wire::{self, StreamDecoder};

const ERROR_BODY_SNIPPET: usize = 512;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upstream connection attempts per request, credential rotation
    /// included.
    pub max_attempts: u32,
    /// Linear backoff unit; attempt `n` waits `n * retry_backoff`.
    pub retry_backoff: Duration,
    /// Skip the pool and fetch a guest token per request.
    pub anonymous: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_secs(1),
            anonymous: false,
        }
    }
}

/// Drives one chat completion end to end: lease a credential, call the
/// backend-prepared upstream request, then pump the upstream stream
/// through the phase transform.
///
/// Failures before the first response byte surface as [`EngineError`]
/// so the router can answer with a proper status; failures after that
/// become an error frame followed by the stream terminator.
pub struct ChatEngine {
    backend: Arc<dyn ChatBackend>,
    pool: Arc<CredentialPool>,
    /// Optional persistence mirror for per-credential outcomes.
    store: Option<CredentialStorage>,
    client: WreqUpstreamClient,
    config: EngineConfig,
}

impl ChatEngine {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        pool: Arc<CredentialPool>,
        store: Option<CredentialStorage>,
        client: WreqUpstreamClient,
        config: EngineConfig,
    ) -> Self {
        Self {
            backend,
            pool,
            store,
            client,
            config,
        }
    }

    pub fn backend(&self) -> &Arc<dyn ChatBackend> {
        &self.backend
    }

    /// Opens a streamed completion. The receiver yields ready-to-send
    /// SSE frames, ending with the `[DONE]` terminator.
    pub async fn stream_chat(
        &self,
        request: CreateChatCompletionRequest,
    ) -> Result<mpsc::Receiver<Bytes>, EngineError> {
        let body = self.connect(&request).await?;
        let state = PhaseStreamState::new(
            completion_id(),
            request.model.clone(),
            OffsetDateTime::now_utc().unix_timestamp(),
        );
        let (tx, rx) = mpsc::channel::<Bytes>(16);
        tokio::spawn(pump(body, state, tx));
        Ok(rx)
    }

    /// Non-stream completion: the upstream still streams, the engine
    /// folds the chunks into a single response.
    pub async fn complete_chat(
        &self,
        request: CreateChatCompletionRequest,
    ) -> Result<CreateChatCompletionResponse, EngineError> {
        let mut body = self.connect(&request).await?;
        let id = completion_id();
        let created = OffsetDateTime::now_utc().unix_timestamp();
        let mut decoder = StreamDecoder::new();
        let mut state = PhaseStreamState::new(&id, &request.model, created);
        let mut aggregator = ResponseAggregator::new();

        'read: while let Some(chunk) = body.recv().await {
            for frame in decoder.push_bytes(&chunk) {
                if let Some(error) = frame.error() {
                    return Err(EngineError::UpstreamReported {
                        code: error.code,
                        message: error
                            .detail
                            .clone()
                            .unwrap_or_else(|| "unspecified upstream error".to_string()),
                    });
                }
                absorb_frame(&frame, &mut state, &mut aggregator);
                if state.is_finished() {
                    break 'read;
                }
            }
        }
        for frame in decoder.finish() {
            absorb_frame(&frame, &mut state, &mut aggregator);
        }
        if !state.is_finished() {
            for item in state.finalize() {
                if let StreamItem::Chunk(chunk) = item {
                    aggregator.absorb(&chunk);
                }
            }
        }
        Ok(aggregator.into_response(id, request.model, created))
    }

    /// Attempt loop with credential rotation and linear backoff.
    /// Returns the body channel of the first accepted response.
    async fn connect(
        &self,
        request: &CreateChatCompletionRequest,
    ) -> Result<mpsc::Receiver<Bytes>, EngineError> {
        let mut last_error: Option<EngineError> = None;

        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_backoff * attempt).await;
            }

            let (token, tracked) = self.acquire_token().await?;
            let call = self.backend.prepare(request, &token)?;
            tracing::info!(
                event = "upstream_request",
                backend = self.backend.name(),
                model = %request.model,
                attempt,
                anonymous = self.config.anonymous
            );

            match self.client.send(&call).await {
                Ok(response) if response.is_success() => {
                    self.note_success(&token, tracked);
                    if let UpstreamBody::Stream(rx) = response.body {
                        return Ok(rx);
                    }
                    // a success without a streamed body never happens;
                    // treat it as one more failed attempt
                    last_error = Some(EngineError::UpstreamUnavailable {
                        attempts: attempt + 1,
                        message: "upstream returned no body".to_string(),
                    });
                }
                Ok(response) => {
                    let status = response.status;
                    let message = snippet(&response.text().await);
                    tracing::warn!(
                        event = "upstream_response",
                        status,
                        attempt,
                        message = %message
                    );
                    self.note_failure(&token, tracked);
                    match status {
                        // request-shape rejections often recover on a
                        // different credential
                        400 => {
                            last_error = Some(EngineError::UpstreamRejected { status, message });
                        }
                        500..=599 => {
                            last_error = Some(EngineError::UpstreamUnavailable {
                                attempts: attempt + 1,
                                message,
                            });
                        }
                        _ => return Err(EngineError::UpstreamRejected { status, message }),
                    }
                }
                Err(err) => {
                    tracing::warn!(event = "upstream_response", attempt, error = %err);
                    self.note_failure(&token, tracked);
                    last_error = Some(err);
                }
            }
        }

        let attempts = self.config.max_attempts;
        Err(match last_error {
            None => EngineError::NoCredential,
            Some(err @ EngineError::UpstreamRejected { .. }) => err,
            Some(EngineError::UpstreamUnavailable { message, .. })
            | Some(EngineError::Transport { message, .. }) => {
                EngineError::UpstreamUnavailable { attempts, message }
            }
            Some(err) => err,
        })
    }

    /// Outcome reporting fans out to the pool and, when configured, the
    /// store. Guest tokens are never tracked.
    fn note_success(&self, token: &str, tracked: bool) {
        if !tracked {
            return;
        }
        self.pool.report_success(token);
        if let Some(store) = self.store.clone() {
            let token = token.to_string();
            tokio::spawn(async move {
                if let Err(err) = store.record_success(&token).await {
                    tracing::warn!(event = "credential_store_update_failed", error = %err);
                }
            });
        }
    }

    fn note_failure(&self, token: &str, tracked: bool) {
        if !tracked {
            return;
        }
        self.pool.report_failure(token);
        if let Some(store) = self.store.clone() {
            let token = token.to_string();
            tokio::spawn(async move {
                if let Err(err) = store.record_failure(&token).await {
                    tracing::warn!(event = "credential_store_update_failed", error = %err);
                }
            });
        }
    }

    async fn acquire_token(&self) -> Result<(String, bool), EngineError> {
        if self.config.anonymous {
            let token = self.backend.guest_token().await?;
            Ok((token, false))
        } else {
            let secret = self.pool.select().ok_or(EngineError::NoCredential)?;
            Ok((secret, true))
        }
    }
}

fn absorb_frame(
    frame: &UpstreamChunk,
    state: &mut PhaseStreamState,
    aggregator: &mut ResponseAggregator,
) {
    if !frame.is_chat_completion() {
        return;
    }
    let Some(data) = &frame.data else {
        return;
    };
    for item in state.transform_event(data) {
        if let StreamItem::Chunk(chunk) = item {
            aggregator.absorb(&chunk);
        }
    }
}

/// Reads the upstream body, transforms it, and forwards encoded frames
/// until the terminal event or the client hangs up.
async fn pump(mut body: mpsc::Receiver<Bytes>, mut state: PhaseStreamState, tx: mpsc::Sender<Bytes>) {
    let mut decoder = StreamDecoder::new();

    while let Some(chunk) = body.recv().await {
        for frame in decoder.push_bytes(&chunk) {
            if forward_frame(&frame, &mut state, &tx).await.is_err() {
                return;
            }
            if state.is_finished() {
                return;
            }
        }
    }

    for frame in decoder.finish() {
        if forward_frame(&frame, &mut state, &tx).await.is_err() {
            return;
        }
        if state.is_finished() {
            return;
        }
    }

    // the upstream went away without a terminal event; close out the
    // turn so the client still gets a finish chunk and the terminator
    for item in state.finalize() {
        if send_item(item, &tx).await.is_err() {
            return;
        }
    }
}

async fn forward_frame(
    frame: &UpstreamChunk,
    state: &mut PhaseStreamState,
    tx: &mpsc::Sender<Bytes>,
) -> Result<(), ()> {
    if let Some(error) = frame.error() {
        let message = error
            .detail
            .clone()
            .unwrap_or_else(|| "unspecified upstream error".to_string());
        tracing::warn!(event = "upstream_stream_error", code = ?error.code, message = %message);
        let frame = ErrorFrame::new(message, "upstream_error", error.code);
        tx.send(wire::encode_error_frame(&frame))
            .await
            .map_err(|_| ())?;
        tx.send(wire::done_frame()).await.map_err(|_| ())?;
        // swallow the rest of the stream
        state.finalize();
        return Err(());
    }
    if !frame.is_chat_completion() {
        return Ok(());
    }
    let Some(data) = &frame.data else {
        return Ok(());
    };
    for item in state.transform_event(data) {
        send_item(item, tx).await?;
    }
    Ok(())
}

async fn send_item(item: StreamItem, tx: &mpsc::Sender<Bytes>) -> Result<(), ()> {
    let frame = match item {
        StreamItem::Chunk(chunk) => wire::encode_chunk(&chunk),
        StreamItem::Done => wire::done_frame(),
    };
    tx.send(frame).await.map_err(|_| ())
}

fn completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4().simple())
}

fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= ERROR_BODY_SNIPPET {
        return trimmed.to_string();
    }
    let mut end = ERROR_BODY_SNIPPET;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse(frames: &[&str]) -> Vec<Bytes> {
        frames
            .iter()
            .map(|frame| Bytes::from(format!("data: {frame}\n\n")))
            .collect()
    }

    async fn run_pump(frames: Vec<Bytes>) -> Vec<String> {
        let (body_tx, body_rx) = mpsc::channel(16);
        let (tx, mut rx) = mpsc::channel(16);
        let state = PhaseStreamState::new("chatcmpl-test", "glm-4.5", 1);
        let handle = tokio::spawn(pump(body_rx, state, tx));
        for frame in frames {
            body_tx.send(frame).await.unwrap();
        }
        drop(body_tx);
        let mut out = Vec::new();
        while let Some(frame) = rx.recv().await {
            out.push(String::from_utf8(frame.to_vec()).unwrap());
        }
        handle.await.unwrap();
        out
    }

    #[tokio::test]
    async fn upstream_frames_become_openai_sse() {
        let out = run_pump(sse(&[
            r#"{"type":"chat:completion","data":{"phase":"answer","delta_content":"hi","edit_index":0}}"#,
            r#"{"type":"chat:completion","data":{"phase":"answer","usage":{"total_tokens":5},"edit_index":1}}"#,
        ]))
        .await;
        assert!(out[0].contains("chat.completion.chunk"));
        assert!(out[0].contains("\"content\":\"hi\""));
        assert_eq!(out.last().unwrap(), "data: [DONE]\n\n");
        let finish = &out[out.len() - 2];
        assert!(finish.contains("\"finish_reason\":\"stop\""));
    }

    #[tokio::test]
    async fn stream_errors_surface_as_error_frame_then_terminator() {
        let out = run_pump(sse(&[
            r#"{"type":"chat:completion","data":{"phase":"answer","delta_content":"par","edit_index":0}}"#,
            r#"{"type":"chat:completion","error":{"code":429,"detail":"slow down"}}"#,
        ]))
        .await;
        assert_eq!(out.len(), 3);
        assert!(out[1].contains("\"type\":\"upstream_error\""));
        assert!(out[1].contains("slow down"));
        assert_eq!(out[2], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn truncated_stream_still_finishes_the_turn() {
        let out = run_pump(sse(&[
            r#"{"type":"chat:completion","data":{"phase":"answer","delta_content":"partial","edit_index":0}}"#,
        ]))
        .await;
        assert_eq!(out.last().unwrap(), "data: [DONE]\n\n");
        let finish = &out[out.len() - 2];
        assert!(finish.contains("finish_reason"));
    }

    #[test]
    fn snippets_are_bounded_and_respect_char_boundaries() {
        let long = "é".repeat(600);
        let cut = snippet(&long);
        assert!(cut.len() <= ERROR_BODY_SNIPPET);
        assert!(cut.chars().all(|c| c == 'é'));
    }

    #[test]
    fn completion_ids_carry_the_prefix() {
        let id = completion_id();
        assert!(id.starts_with("chatcmpl-"));
        assert!(id.len() > "chatcmpl-".len());
    }
}
