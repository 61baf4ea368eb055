//! Phase-tagged upstream events in, OpenAI stream chunks out.

use time::OffsetDateTime;
use zproxy_protocol::openai::stream::{
    ChatCompletionChunkObjectType, ChatCompletionStreamChoice, CreateChatCompletionStreamResponse,
};
use zproxy_protocol::openai::types::{
    ChatCompletionFinishReason, ChatCompletionMessageToolCallChunk, ChatCompletionRole,
    ChatCompletionStreamResponseDelta, CompletionUsage, ThinkingDelta, ToolCallChunkFunction,
    ToolCallType,
};
use zproxy_protocol::upstream::{Phase, UpstreamData, UpstreamUsage};

use crate::tool_call::{ToolCallAssembler, ToolCallEvent};

/// End of the reasoning wrapper the upstream prepends to the first
/// thinking delta.
pub const THINKING_WRAPPER_END: &str = "</summary>\n>";
/// Marker inside an answer-phase edit that closes the reasoning block.
pub const ANSWER_EDIT_MARKER: &str = "</details>\n";
/// Prefix of the other-phase edit that ends a tool-call turn.
pub const TOOL_END_SENTINEL: &str = "null,";

/// One unit of downstream output.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Chunk(CreateChatCompletionStreamResponse),
    /// Maps to the literal `data: [DONE]` frame; emitted exactly once.
    Done,
}

#[derive(Debug, Clone)]
pub struct PhaseStreamState {
    id: String,
    model: String,
    created: i64,
    role_sent: bool,
    last_edit_index: i64,
    tools: ToolCallAssembler,
    usage: Option<CompletionUsage>,
    finished: bool,
}

impl PhaseStreamState {
    pub fn new(id: impl Into<String>, model: impl Into<String>, created: i64) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            created,
            role_sent: false,
            // below any valid index, so the first event always passes
            last_edit_index: -1,
            tools: ToolCallAssembler::new(),
            usage: None,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Tool calls completed so far, for non-stream aggregation.
    pub fn completed_tool_calls(
        &self,
    ) -> &[zproxy_protocol::openai::types::ChatCompletionMessageToolCall] {
        self.tools.completed()
    }

    pub fn transform_event(&mut self, event: &UpstreamData) -> Vec<StreamItem> {
        if self.finished {
            return Vec::new();
        }
        let data = event.effective().clone();
        if let Some(index) = data.edit_index {
            if index <= self.last_edit_index {
                return Vec::new();
            }
            self.last_edit_index = index;
        }
        if let Some(usage) = &data.usage {
            self.usage = Some(map_usage(usage));
        }

        let mut out = Vec::new();
        match data.phase {
            Some(Phase::Thinking) => self.handle_thinking(&data, &mut out),
            Some(Phase::Answer) => self.handle_answer(&data, &mut out),
            Some(Phase::ToolCall) => self.handle_tool_call(&data, &mut out),
            Some(Phase::Other) => self.handle_other(&data, &mut out),
            Some(Phase::Done) => self.finish(&mut out),
            Some(Phase::Unknown) | None => {}
        }
        if data.done && !self.finished {
            self.finish(&mut out);
        }
        out
    }

    /// Flush path for streams that end without a terminal event.
    pub fn finalize(&mut self) -> Vec<StreamItem> {
        let mut out = Vec::new();
        self.finish(&mut out);
        out
    }

    fn handle_thinking(&mut self, data: &UpstreamData, out: &mut Vec<StreamItem>) {
        let Some(content) = data.delta_content.as_deref() else {
            return;
        };
        let text = match content.find(THINKING_WRAPPER_END) {
            Some(pos) => &content[pos + THINKING_WRAPPER_END.len()..],
            None => content,
        };
        if text.is_empty() {
            return;
        }
        let role = self.take_role();
        out.push(self.chunk(ChatCompletionStreamResponseDelta {
            role,
            reasoning_content: Some(text.to_string()),
            ..Default::default()
        }));
    }

    fn handle_answer(&mut self, data: &UpstreamData, out: &mut Vec<StreamItem>) {
        let marker = data
            .edit_content
            .as_deref()
            .and_then(|edit| edit.find(ANSWER_EDIT_MARKER).map(|pos| (edit, pos)));
        if let Some((edit, pos)) = marker {
            let role = self.take_role();
            out.push(self.chunk(ChatCompletionStreamResponseDelta {
                role,
                thinking: Some(ThinkingDelta {
                    content: String::new(),
                    signature: epoch_millis().to_string(),
                }),
                ..Default::default()
            }));
            let trailing = &edit[pos + ANSWER_EDIT_MARKER.len()..];
            if !trailing.is_empty() {
                out.push(self.chunk(ChatCompletionStreamResponseDelta {
                    content: Some(trailing.to_string()),
                    ..Default::default()
                }));
            }
        } else if let Some(content) = data.delta_content.as_deref() {
            if !content.is_empty() {
                let role = self.take_role();
                out.push(self.chunk(ChatCompletionStreamResponseDelta {
                    role,
                    content: Some(content.to_string()),
                    ..Default::default()
                }));
            }
        }
        if data.usage.is_some() {
            self.finish(out);
        }
    }

    fn handle_tool_call(&mut self, data: &UpstreamData, out: &mut Vec<StreamItem>) {
        let Some(text) = data
            .edit_content
            .as_deref()
            .or(data.delta_content.as_deref())
        else {
            return;
        };
        let events = self.tools.ingest(text);
        self.push_tool_events(events, out);
    }

    fn handle_other(&mut self, data: &UpstreamData, out: &mut Vec<StreamItem>) {
        let Some(edit) = data.edit_content.as_deref() else {
            return;
        };
        if edit.starts_with(TOOL_END_SENTINEL) {
            let events = self.tools.flush();
            self.push_tool_events(events, out);
            self.finish(out);
        }
    }

    fn finish(&mut self, out: &mut Vec<StreamItem>) {
        if self.finished {
            return;
        }
        self.finished = true;
        let events = self.tools.flush();
        self.push_tool_events(events, out);

        let finish_reason = if self.tools.has_completed() {
            ChatCompletionFinishReason::ToolCalls
        } else {
            ChatCompletionFinishReason::Stop
        };
        let role = self.take_role();
        out.push(StreamItem::Chunk(CreateChatCompletionStreamResponse {
            id: self.id.clone(),
            object: ChatCompletionChunkObjectType::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatCompletionStreamChoice {
                index: 0,
                delta: ChatCompletionStreamResponseDelta {
                    role,
                    ..Default::default()
                },
                finish_reason: Some(finish_reason),
            }],
            usage: self.usage,
        }));
        out.push(StreamItem::Done);
    }

    fn push_tool_events(&mut self, events: Vec<ToolCallEvent>, out: &mut Vec<StreamItem>) {
        for event in events {
            let call = match event {
                ToolCallEvent::Started { index, id, name } => ChatCompletionMessageToolCallChunk {
                    index,
                    id: Some(id),
                    r#type: Some(ToolCallType::Function),
                    function: Some(ToolCallChunkFunction {
                        name: Some(name),
                        arguments: Some(String::new()),
                    }),
                },
                ToolCallEvent::Arguments { index, arguments } => {
                    ChatCompletionMessageToolCallChunk {
                        index,
                        id: None,
                        r#type: None,
                        function: Some(ToolCallChunkFunction {
                            name: None,
                            arguments: Some(arguments),
                        }),
                    }
                }
            };
            let role = self.take_role();
            out.push(self.chunk(ChatCompletionStreamResponseDelta {
                role,
                tool_calls: Some(vec![call]),
                ..Default::default()
            }));
        }
    }

    fn chunk(&self, delta: ChatCompletionStreamResponseDelta) -> StreamItem {
        StreamItem::Chunk(CreateChatCompletionStreamResponse {
            id: self.id.clone(),
            object: ChatCompletionChunkObjectType::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatCompletionStreamChoice {
                index: 0,
                delta,
                finish_reason: None,
            }],
            usage: None,
        })
    }

    fn take_role(&mut self) -> Option<ChatCompletionRole> {
        if self.role_sent {
            None
        } else {
            self.role_sent = true;
            Some(ChatCompletionRole::Assistant)
        }
    }
}

fn map_usage(usage: &UpstreamUsage) -> CompletionUsage {
    CompletionUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}

fn epoch_millis() -> i128 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000
}
