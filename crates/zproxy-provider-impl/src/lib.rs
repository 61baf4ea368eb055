//! Z.AI backend: request construction, guest tokens, and the identity
//! probe that classifies pool credentials.

pub mod backend;
pub mod headers;
pub mod validator;

pub use backend::ZaiBackend;
pub use validator::ZaiValidator;
