//! Stream-shape translation: upstream phase events in, OpenAI chunks out.

pub mod aggregate;
pub mod partial_json;
pub mod stream;
pub mod tool_call;
