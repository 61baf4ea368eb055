use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use zproxy_provider_core::{
    CredentialKind, CredentialPool, CredentialSeed, CredentialValidator, PoolConfig, ProbeError,
};

fn pool_with(secrets: &[&str]) -> CredentialPool {
    CredentialPool::with_seeds(
        PoolConfig::default(),
        secrets
            .iter()
            .map(|secret| CredentialSeed {
                secret: secret.to_string(),
                kind: CredentialKind::User,
            })
            .collect(),
    )
}

#[test]
fn round_robin_is_fair_over_sequential_selections() {
    let pool = pool_with(&["tok-a", "tok-b", "tok-c"]);
    let selections = 10;
    let mut counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..selections {
        let secret = pool.select().expect("eligible credential");
        *counts.entry(secret).or_default() += 1;
    }
    for secret in ["tok-a", "tok-b", "tok-c"] {
        let count = counts.get(secret).copied().unwrap_or(0);
        assert!(
            count == selections / 3 || count == selections / 3 + 1,
            "{secret} selected {count} times"
        );
    }
}

#[test]
fn threshold_failures_remove_credential_from_rotation() {
    let pool = pool_with(&["tok-a", "tok-b", "tok-c"]);
    for _ in 0..3 {
        pool.report_failure("tok-b");
    }
    for _ in 0..12 {
        let secret = pool.select().expect("two credentials remain");
        assert_ne!(secret, "tok-b");
    }
    let snapshot = pool.snapshot();
    assert_eq!(snapshot.total, 3);
    assert_eq!(snapshot.available, 2);
}

#[test]
fn exhausted_pool_recovers_expired_credentials() {
    let pool = CredentialPool::with_seeds(
        PoolConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(50),
        },
        vec![CredentialSeed {
            secret: "tok-solo".to_string(),
            kind: CredentialKind::User,
        }],
    );
    pool.report_failure("tok-solo");
    assert_eq!(pool.select(), None);

    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(pool.select().as_deref(), Some("tok-solo"));
    let snapshot = pool.snapshot();
    assert_eq!(snapshot.available, 1);
}

#[test]
fn guest_and_unknown_credentials_are_never_selected() {
    let pool = CredentialPool::with_seeds(
        PoolConfig::default(),
        vec![
            CredentialSeed {
                secret: "tok-user".to_string(),
                kind: CredentialKind::User,
            },
            CredentialSeed {
                secret: "tok-guest".to_string(),
                kind: CredentialKind::Guest,
            },
            CredentialSeed {
                secret: "tok-unknown".to_string(),
                kind: CredentialKind::Unknown,
            },
        ],
    );
    for _ in 0..6 {
        assert_eq!(pool.select().as_deref(), Some("tok-user"));
    }
}

#[test]
fn reload_keeps_counters_of_surviving_credentials() {
    let pool = pool_with(&["tok-a", "tok-b"]);
    pool.report_success("tok-a");
    pool.report_success("tok-a");
    pool.reload(vec![
        CredentialSeed {
            secret: "tok-a".to_string(),
            kind: CredentialKind::User,
        },
        CredentialSeed {
            secret: "tok-new".to_string(),
            kind: CredentialKind::User,
        },
    ]);
    let snapshot = pool.snapshot();
    assert_eq!(snapshot.total, 2);
    let kept = snapshot
        .credentials
        .iter()
        .find(|cred| cred.total_requests == 2)
        .expect("tok-a counters kept");
    assert_eq!(kept.successful_requests, 2);
}

#[test]
fn duplicate_insert_is_rejected() {
    let pool = pool_with(&["tok-a"]);
    assert!(!pool.insert("tok-a", CredentialKind::User));
    assert!(pool.insert("tok-b", CredentialKind::User));
}

struct RoleTable {
    roles: HashMap<String, CredentialKind>,
}

#[async_trait]
impl CredentialValidator for RoleTable {
    async fn classify(&self, secret: &str) -> Result<CredentialKind, ProbeError> {
        self.roles
            .get(secret)
            .copied()
            .ok_or_else(|| ProbeError("identity endpoint unreachable".to_string()))
    }
}

#[tokio::test]
async fn health_check_reclassifies_and_reports() {
    let pool = pool_with(&["tok-a", "tok-b", "tok-c"]);
    let validator = Arc::new(RoleTable {
        roles: HashMap::from([
            ("tok-a".to_string(), CredentialKind::User),
            ("tok-b".to_string(), CredentialKind::Guest),
        ]),
    });
    let outcome = pool.health_check_all(validator).await;
    assert_eq!(outcome.probed, 3);
    assert_eq!(outcome.user, 1);
    assert_eq!(outcome.guest, 1);
    assert_eq!(outcome.failures, 1);

    // tok-b was demoted to guest; tok-c failed once but stays available
    for _ in 0..4 {
        assert_ne!(pool.select().as_deref(), Some("tok-b"));
    }
    let snapshot = pool.snapshot();
    assert_eq!(snapshot.user, 2);
    assert_eq!(snapshot.guest, 1);
}

#[test]
fn snapshot_masks_secrets() {
    let pool = pool_with(&["sk-1234567890abcdef"]);
    let snapshot = pool.snapshot();
    assert_eq!(snapshot.credentials[0].secret, "sk-1***cdef");
}
