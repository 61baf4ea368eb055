use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::macros::format_description;
use uuid::Uuid;
use zproxy_protocol::openai::request::CreateChatCompletionRequest;
use zproxy_provider_core::{BackendError, ChatBackend, PreparedCall};

use crate::headers::browser_headers;

const MODEL_GLM_45: &str = "0727-360B-API";
const MODEL_GLM_45_AIR: &str = "0727-106B-API";
const MODEL_GLM_46: &str = "GLM-4-6-API-V1";

pub struct ZaiBackend {
    base_url: String,
    client: wreq::Client,
}

impl ZaiBackend {
    pub const DEFAULT_BASE_URL: &'static str = "https://chat.z.ai";

    pub fn new(base_url: impl Into<String>) -> Result<Self, BackendError> {
        let client = wreq::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| BackendError::new(err.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    fn chat_endpoint(&self) -> String {
        format!("{}/api/chat/completions", self.base_url)
    }

    fn auth_endpoint(&self) -> String {
        format!("{}/api/v1/auths/", self.base_url)
    }

    fn upstream_model_id(model: &str) -> &'static str {
        let model = model.to_ascii_lowercase();
        if model.starts_with("glm-4.6") {
            MODEL_GLM_46
        } else if model.contains("-air") {
            MODEL_GLM_45_AIR
        } else {
            MODEL_GLM_45
        }
    }
}

#[async_trait]
impl ChatBackend for ZaiBackend {
    fn name(&self) -> &str {
        "zai"
    }

    fn supported_models(&self) -> Vec<String> {
        [
            "glm-4.5",
            "glm-4.5-thinking",
            "glm-4.5-search",
            "glm-4.5-air",
            "glm-4.6",
            "glm-4.6-thinking",
            "glm-4.6-search",
        ]
        .iter()
        .map(|model| model.to_string())
        .collect()
    }

    fn prepare(
        &self,
        request: &CreateChatCompletionRequest,
        token: &str,
    ) -> Result<PreparedCall, BackendError> {
        let model = request.model.to_ascii_lowercase();
        let is_thinking = model.contains("-thinking");
        let is_search = model.contains("-search");
        let upstream_model = Self::upstream_model_id(&model);

        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|message| {
                json!({
                    "role": message.role,
                    "content": message
                        .content
                        .as_ref()
                        .map(|content| content.as_text())
                        .unwrap_or_default(),
                })
            })
            .collect();

        let mut mcp_servers: Vec<&str> = Vec::new();
        if is_search && model.contains("-4.5") {
            mcp_servers.push("deep-web-search");
        }

        let chat_id = Uuid::new_v4().to_string();
        let now = OffsetDateTime::now_utc();
        let datetime_format =
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        let date_format = format_description!("[year]-[month]-[day]");

        let mut params = serde_json::Map::new();
        if let Some(temperature) = request.temperature {
            params.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(top_p) = request.top_p {
            params.insert("top_p".to_string(), json!(top_p));
        }
        if let Some(max_tokens) = request.max_tokens {
            params.insert("max_tokens".to_string(), json!(max_tokens));
        }

        let mut body = json!({
            "stream": true,
            "model": upstream_model,
            "messages": messages,
            "params": params,
            "features": {
                "image_generation": false,
                "web_search": is_search,
                "auto_web_search": is_search,
                "preview_mode": false,
                "flags": [],
                "enable_thinking": is_thinking,
            },
            "background_tasks": {
                "title_generation": false,
                "tags_generation": false,
            },
            "mcp_servers": mcp_servers,
            "variables": {
                "{{USER_NAME}}": "Guest",
                "{{USER_LOCATION}}": "Unknown",
                "{{CURRENT_DATETIME}}": now
                    .format(&datetime_format)
                    .map_err(|err| BackendError::new(err.to_string()))?,
                "{{CURRENT_DATE}}": now
                    .format(&date_format)
                    .map_err(|err| BackendError::new(err.to_string()))?,
            },
            "model_item": {
                "id": upstream_model,
                "name": request.model,
                "owned_by": "z.ai",
            },
            "chat_id": chat_id,
            "id": Uuid::new_v4().to_string(),
        });

        // the thinking variants reject tool definitions
        if !is_thinking {
            if let Some(tools) = &request.tools {
                body["tools"] = serde_json::to_value(tools)
                    .map_err(|err| BackendError::new(err.to_string()))?;
            }
        }

        let mut headers = browser_headers(&self.base_url, &chat_id);
        if !token.is_empty() {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }

        Ok(PreparedCall {
            url: self.chat_endpoint(),
            headers,
            body,
        })
    }

    async fn guest_token(&self) -> Result<String, BackendError> {
        let mut call = self.client.get(self.auth_endpoint());
        for (name, value) in browser_headers(&self.base_url, "") {
            call = call.header(name, value);
        }
        let response = call
            .send()
            .await
            .map_err(|err| BackendError::new(err.to_string()))?;
        if !response.status().is_success() {
            return Err(BackendError::new(format!(
                "guest token endpoint returned {}",
                response.status()
            )));
        }
        let data: Value = response
            .json()
            .await
            .map_err(|err| BackendError::new(err.to_string()))?;
        match data.get("token").and_then(Value::as_str) {
            Some(token) if !token.is_empty() => {
                tracing::debug!(event = "guest_token_issued");
                Ok(token.to_string())
            }
            _ => Err(BackendError::new("guest token response had no token")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(model: &str) -> CreateChatCompletionRequest {
        serde_json::from_value(json!({
            "model": model,
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
            "temperature": 0.3,
            "tools": [{"type": "function", "function": {"name": "web_fetch"}}]
        }))
        .unwrap()
    }

    #[test]
    fn models_map_to_upstream_ids() {
        assert_eq!(ZaiBackend::upstream_model_id("glm-4.5"), MODEL_GLM_45);
        assert_eq!(
            ZaiBackend::upstream_model_id("glm-4.5-thinking"),
            MODEL_GLM_45
        );
        assert_eq!(
            ZaiBackend::upstream_model_id("glm-4.5-air"),
            MODEL_GLM_45_AIR
        );
        assert_eq!(ZaiBackend::upstream_model_id("glm-4.6"), MODEL_GLM_46);
        assert_eq!(
            ZaiBackend::upstream_model_id("glm-4.6-search"),
            MODEL_GLM_46
        );
        assert_eq!(ZaiBackend::upstream_model_id("anything-else"), MODEL_GLM_45);
    }

    #[test]
    fn thinking_model_enables_thinking_and_drops_tools() {
        let backend = ZaiBackend::new(ZaiBackend::DEFAULT_BASE_URL).unwrap();
        let call = backend.prepare(&request("glm-4.5-thinking"), "tok").unwrap();
        assert_eq!(call.body["features"]["enable_thinking"], json!(true));
        assert!(call.body.get("tools").is_none());
        assert_eq!(call.body["stream"], json!(true));
        assert_eq!(call.body["params"]["temperature"], json!(0.3));
    }

    #[test]
    fn search_model_adds_deep_web_search_server() {
        let backend = ZaiBackend::new(ZaiBackend::DEFAULT_BASE_URL).unwrap();
        let call = backend.prepare(&request("glm-4.5-search"), "tok").unwrap();
        assert_eq!(call.body["mcp_servers"], json!(["deep-web-search"]));
        assert_eq!(call.body["features"]["web_search"], json!(true));
        // 4.6 search rides on the model itself, no mcp server
        let call = backend.prepare(&request("glm-4.6-search"), "tok").unwrap();
        assert_eq!(call.body["mcp_servers"], json!([]));
    }

    #[test]
    fn bearer_header_is_present_only_with_a_token() {
        let backend = ZaiBackend::new(ZaiBackend::DEFAULT_BASE_URL).unwrap();
        let with_token = backend.prepare(&request("glm-4.5"), "tok-a").unwrap();
        assert!(
            with_token
                .headers
                .iter()
                .any(|(name, value)| name == "Authorization" && value == "Bearer tok-a")
        );
        let without = backend.prepare(&request("glm-4.5"), "").unwrap();
        assert!(
            !without
                .headers
                .iter()
                .any(|(name, _)| name == "Authorization")
        );
    }
}
