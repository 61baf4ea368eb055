//! Reassembly of tool invocations whose metadata arrives inside an
//! inline block marker, split at arbitrary byte offsets across events.

use serde_json::Value;
use zproxy_protocol::openai::types::{
    ChatCompletionMessageToolCall, ToolCallFunction, ToolCallType,
};

use crate::partial_json::{self, JsonAssessment};

pub const TOOL_BLOCK_OPEN: &str = "<glm_block ";
pub const TOOL_BLOCK_CLOSE: &str = "</glm_block>";

/// What the assembler learned from one batch of input.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallEvent {
    Started {
        index: i64,
        id: String,
        name: String,
    },
    Arguments {
        index: i64,
        arguments: String,
    },
}

#[derive(Debug, Clone)]
struct OpenInvocation {
    index: i64,
    id: String,
    name: String,
    buffer: String,
    parsed: Option<Value>,
    announced: bool,
}

#[derive(Debug, Clone)]
struct BlockMetadata {
    id: String,
    name: String,
    arguments: String,
    /// Whether the block body parsed strictly. A prefix parse may still
    /// hold a truncated trailing field, so only complete metadata is
    /// announced to the client.
    complete: bool,
}

/// Accumulates the raw tool-phase text and derives invocations from the
/// block markers found in it. At most one invocation is open at a time;
/// a marker carrying a different id closes the previous invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolCallAssembler {
    raw: String,
    sealed: usize,
    open: Option<OpenInvocation>,
    finished: Vec<ChatCompletionMessageToolCall>,
    next_index: i64,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one event's worth of text and returns what became known.
    pub fn ingest(&mut self, text: &str) -> Vec<ToolCallEvent> {
        self.raw.push_str(text);
        self.resync()
    }

    /// Force-closes the open invocation, substituting `{}` when its
    /// argument buffer never became valid JSON. A dropped call is worse
    /// for the client than an empty-argument call.
    pub fn flush(&mut self) -> Vec<ToolCallEvent> {
        let out = self.close_open();
        self.raw.clear();
        self.sealed = 0;
        out
    }

    pub fn has_completed(&self) -> bool {
        !self.finished.is_empty()
    }

    pub fn completed(&self) -> &[ChatCompletionMessageToolCall] {
        &self.finished
    }

    fn resync(&mut self) -> Vec<ToolCallEvent> {
        let mut metas = Vec::new();
        let blocks: Vec<&str> = self.raw.split(TOOL_BLOCK_OPEN).skip(1).collect();
        for block in blocks.iter().skip(self.sealed) {
            match extract_metadata(block_body(block)) {
                Some(meta) => metas.push(meta),
                // not enough bytes yet, or junk between blocks
                None => tracing::trace!(event = "tool_block_pending", length = block.len()),
            }
        }
        // every block but the last can no longer grow
        self.sealed = blocks.len().saturating_sub(1);

        let mut out = Vec::new();
        for meta in metas {
            self.apply_metadata(meta, &mut out);
        }
        out
    }

    fn apply_metadata(&mut self, meta: BlockMetadata, out: &mut Vec<ToolCallEvent>) {
        let complete = meta.complete;
        match self.open.as_mut() {
            Some(open) if open.id == meta.id => {
                if !open.announced && !meta.name.is_empty() {
                    open.name = meta.name;
                }
                open.buffer = seed_buffer(&meta.arguments);
                open.parsed = None;
                probe(open);
            }
            _ => {
                out.extend(self.close_open());
                let index = self.next_index;
                self.next_index += 1;
                let mut open = OpenInvocation {
                    index,
                    id: meta.id,
                    name: meta.name,
                    buffer: seed_buffer(&meta.arguments),
                    parsed: None,
                    announced: false,
                };
                probe(&mut open);
                self.open = Some(open);
            }
        }
        if let Some(open) = self.open.as_mut() {
            if !open.announced && complete {
                open.announced = true;
                out.push(ToolCallEvent::Started {
                    index: open.index,
                    id: open.id.clone(),
                    name: open.name.clone(),
                });
            }
        }
    }

    fn close_open(&mut self) -> Vec<ToolCallEvent> {
        let Some(open) = self.open.take() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        if !open.announced {
            out.push(ToolCallEvent::Started {
                index: open.index,
                id: open.id.clone(),
                name: open.name.clone(),
            });
        }
        let value = open
            .parsed
            .or_else(|| partial_json::repair_object(&open.buffer))
            .unwrap_or_else(|| Value::Object(Default::default()));
        let arguments = value.to_string();
        self.finished.push(ChatCompletionMessageToolCall {
            id: open.id,
            r#type: ToolCallType::Function,
            function: ToolCallFunction {
                name: open.name,
                arguments: arguments.clone(),
            },
        });
        out.push(ToolCallEvent::Arguments {
            index: open.index,
            arguments,
        });
        out
    }
}

/// Text between the tag's closing `>` and the block's end marker.
fn block_body(segment: &str) -> &str {
    let body = match segment.find('>') {
        Some(pos) => &segment[pos + 1..],
        None => segment,
    };
    match body.find(TOOL_BLOCK_CLOSE) {
        Some(end) => &body[..end],
        None => body,
    }
}

/// Pulls `data.metadata.{id,name,arguments}` out of a block body. All
/// three keys must be present before the metadata is acted on, so a cut
/// inside the id or name never produces a truncated invocation.
fn extract_metadata(body: &str) -> Option<BlockMetadata> {
    let (value, complete) = match serde_json::from_str::<Value>(body) {
        Ok(value) => (value, true),
        Err(_) => (partial_json::parse_prefix(body)?, false),
    };
    let metadata = value.pointer("/data/metadata")?;
    let id = metadata.get("id")?.as_str()?;
    let name = metadata.get("name")?.as_str()?;
    let arguments = metadata.get("arguments")?.as_str()?;
    if id.is_empty() {
        return None;
    }
    Some(BlockMetadata {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
        complete,
    })
}

/// The last brace may still be followed by more fragments, so the seed
/// drops it and the probe re-adds one.
fn seed_buffer(arguments: &str) -> String {
    arguments.strip_suffix('}').unwrap_or(arguments).to_string()
}

fn probe(open: &mut OpenInvocation) {
    match partial_json::assess(&open.buffer) {
        JsonAssessment::Complete(value) if value.is_object() => {
            open.parsed = Some(value);
            return;
        }
        JsonAssessment::Complete(_) => return,
        JsonAssessment::Incomplete | JsonAssessment::Invalid => {}
    }
    let closed = format!("{}}}", open.buffer);
    if let Ok(value) = serde_json::from_str::<Value>(&closed) {
        if matches!(value, Value::Object(_)) {
            open.parsed = Some(value);
            return;
        }
    }
    let fixed = partial_json::fix_terminator_escapes(&open.buffer);
    if let Some(value) = partial_json::balanced_object(&fixed) {
        open.parsed = Some(value);
    }
}
