use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// How the upstream classified the account behind a secret. Only `user`
/// credentials may be dispatched; the others are tracked but idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    User,
    Guest,
    Unknown,
}

/// Seed row for pool construction and store reloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSeed {
    pub secret: String,
    pub kind: CredentialKind,
}

#[derive(Debug, Clone)]
pub struct Credential {
    pub secret: String,
    pub kind: CredentialKind,
    pub available: bool,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<OffsetDateTime>,
    pub last_success_at: Option<OffsetDateTime>,
    pub total_requests: u64,
    pub successful_requests: u64,
}

impl Credential {
    pub fn new(secret: impl Into<String>, kind: CredentialKind) -> Self {
        Self {
            secret: secret.into(),
            kind,
            available: true,
            consecutive_failures: 0,
            last_failure_at: None,
            last_success_at: None,
            total_requests: 0,
            successful_requests: 0,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    /// Fresh credentials get no slack: any failure in the first few
    /// requests marks them unhealthy. Established ones are judged by
    /// overall success rate.
    pub fn is_healthy(&self) -> bool {
        if self.kind != CredentialKind::User || !self.available {
            return false;
        }
        if self.total_requests <= 3 {
            self.consecutive_failures == 0
        } else {
            self.success_rate() >= 0.5
        }
    }

    pub fn record_success(&mut self, at: OffsetDateTime) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.consecutive_failures = 0;
        self.available = true;
        self.last_success_at = Some(at);
    }

    pub fn record_failure(&mut self, at: OffsetDateTime, failure_threshold: u32) {
        self.total_requests += 1;
        self.consecutive_failures += 1;
        self.last_failure_at = Some(at);
        if self.consecutive_failures >= failure_threshold {
            self.available = false;
        }
    }

    /// Secret with the middle elided, safe for logs and snapshots.
    pub fn masked_secret(&self) -> String {
        let chars: Vec<char> = self.secret.chars().collect();
        if chars.len() <= 8 {
            "***".to_string()
        } else {
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{head}***{tail}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_credential_is_healthy_until_first_failure() {
        let mut cred = Credential::new("sk-fresh-credential", CredentialKind::User);
        assert!(cred.is_healthy());
        cred.record_failure(OffsetDateTime::now_utc(), 3);
        assert!(!cred.is_healthy());
    }

    #[test]
    fn established_credential_is_judged_by_success_rate() {
        let mut cred = Credential::new("sk-established-cred", CredentialKind::User);
        let now = OffsetDateTime::now_utc();
        for _ in 0..5 {
            cred.record_success(now);
        }
        for _ in 0..2 {
            cred.record_failure(now, 10);
        }
        // 5/7 successes
        assert!(cred.is_healthy());
        for _ in 0..4 {
            cred.record_failure(now, 10);
        }
        // 5/11 successes
        assert!(!cred.is_healthy());
    }

    #[test]
    fn guest_and_unknown_are_never_healthy() {
        let mut guest = Credential::new("guest-token-abcdef", CredentialKind::Guest);
        guest.record_success(OffsetDateTime::now_utc());
        assert!(!guest.is_healthy());
        assert!(!Credential::new("mystery-token-xyz", CredentialKind::Unknown).is_healthy());
    }

    #[test]
    fn threshold_failures_disable_availability() {
        let mut cred = Credential::new("sk-threshold-check", CredentialKind::User);
        let now = OffsetDateTime::now_utc();
        cred.record_failure(now, 3);
        cred.record_failure(now, 3);
        assert!(cred.available);
        cred.record_failure(now, 3);
        assert!(!cred.available);
        cred.record_success(now);
        assert!(cred.available);
    }

    #[test]
    fn masked_secret_hides_the_middle() {
        let cred = Credential::new("sk-1234567890abcdef", CredentialKind::User);
        assert_eq!(cred.masked_secret(), "sk-1***cdef");
        assert_eq!(
            Credential::new("short", CredentialKind::User).masked_secret(),
            "***"
        );
    }
}
