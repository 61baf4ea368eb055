//! The request engine: credential leasing, upstream transport with
//! retries, and the streaming pump that turns upstream frames into
//! OpenAI-shaped SSE output.

pub mod engine;
pub mod error;
pub mod upstream_client;
pub mod wire;

pub use engine::{ChatEngine, EngineConfig};
pub use error::{EngineError, TransportErrorKind};
pub use upstream_client::{UpstreamBody, UpstreamClientConfig, UpstreamResponse, WreqUpstreamClient};
