//! Folds a chunk stream into a single non-stream chat completion.

use std::collections::BTreeMap;

use zproxy_protocol::openai::response::{
    ChatCompletionChoice, ChatCompletionObjectType, ChatCompletionResponseMessage,
    CreateChatCompletionResponse,
};
use zproxy_protocol::openai::stream::CreateChatCompletionStreamResponse;
use zproxy_protocol::openai::types::{
    ChatCompletionFinishReason, ChatCompletionMessageToolCall, ChatCompletionRole,
    CompletionUsage, ToolCallFunction, ToolCallType,
};

#[derive(Debug, Clone, Default)]
struct ToolCallDraft {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseAggregator {
    content: String,
    reasoning: String,
    tool_calls: BTreeMap<i64, ToolCallDraft>,
    finish_reason: Option<ChatCompletionFinishReason>,
    usage: Option<CompletionUsage>,
}

impl ResponseAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&mut self, chunk: &CreateChatCompletionStreamResponse) {
        for choice in &chunk.choices {
            if let Some(content) = &choice.delta.content {
                self.content.push_str(content);
            }
            if let Some(reasoning) = &choice.delta.reasoning_content {
                self.reasoning.push_str(reasoning);
            }
            if let Some(calls) = &choice.delta.tool_calls {
                for call in calls {
                    let draft = self.tool_calls.entry(call.index).or_default();
                    if let Some(id) = &call.id {
                        draft.id.get_or_insert_with(|| id.clone());
                    }
                    if let Some(function) = &call.function {
                        if let Some(name) = &function.name {
                            draft.name.get_or_insert_with(|| name.clone());
                        }
                        if let Some(arguments) = &function.arguments {
                            draft.arguments.push_str(arguments);
                        }
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
        }
        if let Some(usage) = &chunk.usage {
            self.usage = Some(*usage);
        }
    }

    pub fn into_response(
        self,
        id: impl Into<String>,
        model: impl Into<String>,
        created: i64,
    ) -> CreateChatCompletionResponse {
        let tool_calls: Vec<ChatCompletionMessageToolCall> = self
            .tool_calls
            .into_values()
            .filter_map(|draft| {
                Some(ChatCompletionMessageToolCall {
                    id: draft.id?,
                    r#type: ToolCallType::Function,
                    function: ToolCallFunction {
                        name: draft.name.unwrap_or_default(),
                        arguments: if draft.arguments.is_empty() {
                            "{}".to_string()
                        } else {
                            draft.arguments
                        },
                    },
                })
            })
            .collect();

        let content = if self.content.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(self.content)
        };
        CreateChatCompletionResponse {
            id: id.into(),
            object: ChatCompletionObjectType::ChatCompletion,
            created,
            model: model.into(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatCompletionResponseMessage {
                    role: ChatCompletionRole::Assistant,
                    content,
                    reasoning_content: if self.reasoning.is_empty() {
                        None
                    } else {
                        Some(self.reasoning)
                    },
                    tool_calls: if tool_calls.is_empty() {
                        None
                    } else {
                        Some(tool_calls)
                    },
                },
                finish_reason: self
                    .finish_reason
                    .unwrap_or(ChatCompletionFinishReason::Stop),
            }],
            usage: self.usage,
        }
    }
}
