use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::MissedTickBehavior;

use crate::credential::{Credential, CredentialKind, CredentialSeed};
use crate::validator::CredentialValidator;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Consecutive failures before a credential is taken out of rotation.
    pub failure_threshold: u32,
    /// How long a disabled credential sits out before it may be retried.
    pub recovery_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(1800),
        }
    }
}

#[derive(Debug, Default)]
struct PoolInner {
    credentials: Vec<Credential>,
    cursor: usize,
}

/// Shared credential pool. One lock guards all in-memory state; it is
/// never held across I/O. Probes run as separate tasks and report back
/// through `report_success`/`report_failure`.
#[derive(Debug)]
pub struct CredentialPool {
    inner: Mutex<PoolInner>,
    config: PoolConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialSummary {
    pub secret: String,
    pub kind: CredentialKind,
    pub available: bool,
    pub healthy: bool,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub consecutive_failures: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_success_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_failure_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub total: usize,
    pub available: usize,
    pub healthy: usize,
    pub user: usize,
    pub guest: usize,
    pub unknown: usize,
    pub credentials: Vec<CredentialSummary>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HealthCheckOutcome {
    pub probed: usize,
    pub user: usize,
    pub guest: usize,
    pub unknown: usize,
    pub failures: usize,
}

impl CredentialPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Mutex::new(PoolInner::default()),
            config,
        }
    }

    pub fn with_seeds(config: PoolConfig, seeds: Vec<CredentialSeed>) -> Self {
        let pool = Self::new(config);
        for seed in seeds {
            pool.insert(seed.secret, seed.kind);
        }
        pool
    }

    /// Adds a credential; duplicates by secret are rejected.
    pub fn insert(&self, secret: impl Into<String>, kind: CredentialKind) -> bool {
        let secret = secret.into();
        let mut inner = self.lock();
        if inner.credentials.iter().any(|cred| cred.secret == secret) {
            return false;
        }
        inner.credentials.push(Credential::new(secret, kind));
        true
    }

    /// Strict round-robin over the current eligible set. When the set is
    /// empty, credentials whose recovery timeout has elapsed are flipped
    /// back first. Returns the selected secret.
    pub fn select(&self) -> Option<String> {
        let now = OffsetDateTime::now_utc();
        let mut inner = self.lock();

        let mut eligible = eligible_indexes(&inner.credentials);
        if eligible.is_empty() {
            let recovery = self.config.recovery_timeout;
            let mut recovered = 0usize;
            for cred in inner.credentials.iter_mut().filter(|cred| !cred.available) {
                let expired = match cred.last_failure_at {
                    Some(at) => now - at > recovery,
                    None => true,
                };
                if expired {
                    cred.available = true;
                    cred.consecutive_failures = 0;
                    recovered += 1;
                }
            }
            if recovered > 0 {
                tracing::info!(event = "credential_recovery", recovered);
            }
            eligible = eligible_indexes(&inner.credentials);
        }
        if eligible.is_empty() {
            return None;
        }

        // the cursor survives membership changes; wrap via modulo keeps
        // fairness approximate when the set shrinks
        let pick = eligible[inner.cursor % eligible.len()];
        inner.cursor = inner.cursor.wrapping_add(1);
        Some(inner.credentials[pick].secret.clone())
    }

    pub fn report_success(&self, secret: &str) {
        let now = OffsetDateTime::now_utc();
        let mut inner = self.lock();
        if let Some(cred) = inner
            .credentials
            .iter_mut()
            .find(|cred| cred.secret == secret)
        {
            cred.record_success(now);
        }
    }

    pub fn report_failure(&self, secret: &str) {
        let now = OffsetDateTime::now_utc();
        let threshold = self.config.failure_threshold;
        let mut inner = self.lock();
        if let Some(cred) = inner
            .credentials
            .iter_mut()
            .find(|cred| cred.secret == secret)
        {
            cred.record_failure(now, threshold);
            if !cred.available {
                tracing::warn!(
                    event = "credential_disabled",
                    credential = cred.masked_secret(),
                    consecutive_failures = cred.consecutive_failures
                );
            }
        }
    }

    pub fn set_kind(&self, secret: &str, kind: CredentialKind) {
        let mut inner = self.lock();
        if let Some(cred) = inner
            .credentials
            .iter_mut()
            .find(|cred| cred.secret == secret)
        {
            cred.kind = kind;
        }
    }

    /// Replaces the membership from the backing store while keeping the
    /// runtime counters of credentials that survive the reload.
    pub fn reload(&self, seeds: Vec<CredentialSeed>) {
        let mut inner = self.lock();
        let mut next: Vec<Credential> = Vec::with_capacity(seeds.len());
        for seed in seeds {
            if next.iter().any(|cred| cred.secret == seed.secret) {
                continue;
            }
            match inner
                .credentials
                .iter()
                .find(|cred| cred.secret == seed.secret)
            {
                Some(existing) => {
                    let mut kept = existing.clone();
                    kept.kind = seed.kind;
                    next.push(kept);
                }
                None => next.push(Credential::new(seed.secret, seed.kind)),
            }
        }
        inner.credentials = next;
    }

    /// Read-only aggregate; never mutates pool state.
    pub fn snapshot(&self) -> PoolSnapshot {
        let inner = self.lock();
        let credentials: Vec<CredentialSummary> = inner
            .credentials
            .iter()
            .map(|cred| CredentialSummary {
                secret: cred.masked_secret(),
                kind: cred.kind,
                available: cred.available,
                healthy: cred.is_healthy(),
                total_requests: cred.total_requests,
                successful_requests: cred.successful_requests,
                consecutive_failures: cred.consecutive_failures,
                last_success_at: cred.last_success_at,
                last_failure_at: cred.last_failure_at,
            })
            .collect();
        PoolSnapshot {
            total: credentials.len(),
            available: credentials.iter().filter(|cred| cred.available).count(),
            healthy: credentials.iter().filter(|cred| cred.healthy).count(),
            user: count_kind(&credentials, CredentialKind::User),
            guest: count_kind(&credentials, CredentialKind::Guest),
            unknown: count_kind(&credentials, CredentialKind::Unknown),
            credentials,
        }
    }

    /// Probes every credential concurrently, one task each, and joins
    /// them all. Classification feeds the normal reporting path.
    pub async fn health_check_all(
        &self,
        validator: Arc<dyn CredentialValidator>,
    ) -> HealthCheckOutcome {
        let secrets: Vec<String> = {
            let inner = self.lock();
            inner
                .credentials
                .iter()
                .map(|cred| cred.secret.clone())
                .collect()
        };

        let mut handles = Vec::with_capacity(secrets.len());
        for secret in secrets {
            let validator = validator.clone();
            handles.push(tokio::spawn(async move {
                let verdict = validator.classify(&secret).await;
                (secret, verdict)
            }));
        }

        let mut outcome = HealthCheckOutcome::default();
        for handle in handles {
            let Ok((secret, verdict)) = handle.await else {
                continue;
            };
            outcome.probed += 1;
            match verdict {
                Ok(kind) => {
                    self.set_kind(&secret, kind);
                    self.report_success(&secret);
                    match kind {
                        CredentialKind::User => outcome.user += 1,
                        CredentialKind::Guest => outcome.guest += 1,
                        CredentialKind::Unknown => outcome.unknown += 1,
                    }
                }
                Err(err) => {
                    outcome.failures += 1;
                    tracing::warn!(event = "credential_probe_failed", error = %err);
                    self.report_failure(&secret);
                }
            }
        }
        outcome
    }

    pub fn spawn_health_loop(
        self: &Arc<Self>,
        validator: Arc<dyn CredentialValidator>,
        every: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let outcome = pool.health_check_all(validator.clone()).await;
                tracing::info!(
                    event = "credential_health_check",
                    probed = outcome.probed,
                    user = outcome.user,
                    guest = outcome.guest,
                    unknown = outcome.unknown,
                    failures = outcome.failures
                );
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            // state stays consistent; every mutation completes in place
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn eligible_indexes(credentials: &[Credential]) -> Vec<usize> {
    credentials
        .iter()
        .enumerate()
        .filter(|(_, cred)| cred.kind == CredentialKind::User && cred.available)
        .map(|(index, _)| index)
        .collect()
}

fn count_kind(credentials: &[CredentialSummary], kind: CredentialKind) -> usize {
    credentials.iter().filter(|cred| cred.kind == kind).count()
}
