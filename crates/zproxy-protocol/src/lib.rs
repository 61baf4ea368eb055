//! Wire types for zproxy.
//!
//! This crate carries no IO: the SSE reader consumes byte chunks handed to
//! it, and the OpenAI/upstream types are plain serde structs validated at
//! the parse boundary.

pub mod openai;
pub mod sse;
pub mod upstream;
