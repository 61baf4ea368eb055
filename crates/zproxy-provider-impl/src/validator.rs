use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use zproxy_provider_core::{CredentialKind, CredentialValidator, ProbeError};

use crate::headers::browser_headers;

/// Probes the upstream identity endpoint and classifies the account
/// role behind a token.
pub struct ZaiValidator {
    base_url: String,
    client: wreq::Client,
}

impl ZaiValidator {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ProbeError> {
        let client = wreq::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| ProbeError(err.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    fn auth_endpoint(&self) -> String {
        format!("{}/api/v1/auths/", self.base_url)
    }
}

#[async_trait]
impl CredentialValidator for ZaiValidator {
    async fn classify(&self, secret: &str) -> Result<CredentialKind, ProbeError> {
        let mut call = self.client.get(self.auth_endpoint());
        for (name, value) in browser_headers(&self.base_url, "") {
            call = call.header(name, value);
        }
        let response = call
            .header("Authorization", format!("Bearer {secret}"))
            .send()
            .await
            .map_err(|err| ProbeError(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ProbeError(format!(
                "identity endpoint returned {}",
                response.status()
            )));
        }
        let data: Value = response
            .json()
            .await
            .map_err(|err| ProbeError(err.to_string()))?;
        Ok(classify_role(data.get("role").and_then(Value::as_str)))
    }
}

fn classify_role(role: Option<&str>) -> CredentialKind {
    match role {
        Some("user") => CredentialKind::User,
        Some("guest") => CredentialKind::Guest,
        _ => CredentialKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_map_to_credential_kinds() {
        assert_eq!(classify_role(Some("user")), CredentialKind::User);
        assert_eq!(classify_role(Some("guest")), CredentialKind::Guest);
        assert_eq!(classify_role(Some("admin")), CredentialKind::Unknown);
        assert_eq!(classify_role(None), CredentialKind::Unknown);
    }
}
