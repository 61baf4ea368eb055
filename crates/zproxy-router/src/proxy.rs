use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use time::OffsetDateTime;
use tokio_stream::wrappers::ReceiverStream;

use zproxy_core::{ChatEngine, EngineError};
use zproxy_protocol::openai::error::ErrorFrame;
use zproxy_protocol::openai::models::ModelList;
use zproxy_protocol::openai::request::CreateChatCompletionRequest;
use zproxy_provider_core::{CredentialPool, CredentialValidator};
use zproxy_storage::CredentialStorage;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ChatEngine>,
    pub pool: Arc<CredentialPool>,
    /// Absent when the gateway was started without a database.
    pub storage: Option<CredentialStorage>,
    pub backend_name: String,
    pub validator: Arc<dyn CredentialValidator>,
}

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(models_list))
        .with_state(state)
}

async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<CreateChatCompletionRequest>,
) -> Response {
    if request.messages.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            ErrorFrame::new(
                "messages must not be empty",
                "invalid_request_error",
                Some(400),
            ),
        );
    }

    if request.stream {
        match state.engine.stream_chat(request).await {
            Ok(rx) => sse_response(rx),
            Err(err) => engine_error_response(&err),
        }
    } else {
        match state.engine.complete_chat(request).await {
            Ok(response) => (StatusCode::OK, Json(response)).into_response(),
            Err(err) => engine_error_response(&err),
        }
    }
}

fn sse_response(rx: tokio::sync::mpsc::Receiver<bytes::Bytes>) -> Response {
    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    match Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(stream))
    {
        Ok(response) => response,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn models_list(State(state): State<AppState>) -> Json<ModelList> {
    let created = OffsetDateTime::now_utc().unix_timestamp();
    Json(ModelList::new(
        state.engine.backend().supported_models(),
        "z.ai",
        created,
    ))
}

fn engine_error_response(err: &EngineError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_response(status, err.to_frame())
}

fn error_response(status: StatusCode, frame: ErrorFrame) -> Response {
    (status, Json(frame)).into_response()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use zproxy_core::{EngineConfig, UpstreamClientConfig, WreqUpstreamClient};
    use zproxy_provider_core::{
        BackendError, ChatBackend, CredentialKind, PoolConfig, PreparedCall, ProbeError,
    };

    pub struct StubBackend;

    #[async_trait]
    impl ChatBackend for StubBackend {
        fn name(&self) -> &str {
            "stub"
        }

        fn supported_models(&self) -> Vec<String> {
            vec!["stub-1".to_string(), "stub-2".to_string()]
        }

        fn prepare(
            &self,
            _request: &CreateChatCompletionRequest,
            token: &str,
        ) -> Result<PreparedCall, BackendError> {
            Ok(PreparedCall {
                url: "http://127.0.0.1:1/none".to_string(),
                headers: vec![("Authorization".to_string(), format!("Bearer {token}"))],
                body: Value::Null,
            })
        }

        async fn guest_token(&self) -> Result<String, BackendError> {
            Ok("guest".to_string())
        }
    }

    pub struct StubValidator;

    #[async_trait]
    impl CredentialValidator for StubValidator {
        async fn classify(&self, _secret: &str) -> Result<CredentialKind, ProbeError> {
            Ok(CredentialKind::User)
        }
    }

    pub fn state() -> AppState {
        let pool = Arc::new(CredentialPool::new(PoolConfig::default()));
        pool.insert("token-a", CredentialKind::User);
        let client = WreqUpstreamClient::new(UpstreamClientConfig::default()).unwrap();
        let engine = Arc::new(ChatEngine::new(
            Arc::new(StubBackend),
            pool.clone(),
            None,
            client,
            EngineConfig::default(),
        ));
        AppState {
            engine,
            pool,
            storage: None,
            backend_name: "stub".to_string(),
            validator: Arc::new(StubValidator),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn models_endpoint_lists_backend_models() {
        let Json(list) = models_list(State(test_support::state())).await;
        assert_eq!(list.object, "list");
        let ids: Vec<&str> = list.data.iter().map(|model| model.id.as_str()).collect();
        assert_eq!(ids, ["stub-1", "stub-2"]);
        assert!(list.data.iter().all(|model| model.object == "model"));
    }

    #[test]
    fn engine_errors_map_to_http_status() {
        let response = engine_error_response(&EngineError::NoCredential);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = engine_error_response(&EngineError::UpstreamRejected {
            status: 422,
            message: "nope".to_string(),
        });
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
