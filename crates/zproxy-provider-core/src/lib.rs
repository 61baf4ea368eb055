//! Backend-agnostic building blocks: the credential pool, the validator
//! seam, and the outbound-call contract a backend implements.

pub mod credential;
pub mod pool;
pub mod provider;
pub mod validator;

pub use credential::{Credential, CredentialKind, CredentialSeed};
pub use pool::{CredentialPool, HealthCheckOutcome, PoolConfig, PoolSnapshot};
pub use provider::{BackendError, ChatBackend, PreparedCall};
pub use validator::{CredentialValidator, ProbeError};
