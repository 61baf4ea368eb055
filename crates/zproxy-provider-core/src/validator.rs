use async_trait::async_trait;

use crate::credential::CredentialKind;

/// Error from a single identity probe.
#[derive(Debug, Clone)]
pub struct ProbeError(pub String);

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ProbeError {}

/// Classifies a secret by asking the upstream identity endpoint who it
/// belongs to.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn classify(&self, secret: &str) -> Result<CredentialKind, ProbeError>;
}
