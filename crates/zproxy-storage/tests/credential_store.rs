use zproxy_provider_core::CredentialKind;
use zproxy_storage::CredentialStorage;

async fn store() -> CredentialStorage {
    let storage = CredentialStorage::connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    storage.sync().await.expect("schema sync");
    storage
}

#[tokio::test]
async fn upsert_is_idempotent_by_token() {
    let storage = store().await;
    storage
        .upsert_credential("zai", "tok-1", CredentialKind::Unknown, true)
        .await
        .unwrap();
    storage
        .upsert_credential("zai", "tok-1", CredentialKind::User, true)
        .await
        .unwrap();

    let rows = storage.list_by_backend("zai").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].kind, "user");
}

#[tokio::test]
async fn seeds_skip_disabled_rows() {
    let storage = store().await;
    storage
        .upsert_credential("zai", "tok-a", CredentialKind::User, true)
        .await
        .unwrap();
    storage
        .upsert_credential("zai", "tok-b", CredentialKind::User, true)
        .await
        .unwrap();
    storage.set_enabled("tok-b", false).await.unwrap();

    let seeds = storage.seeds_for_backend("zai").await.unwrap();
    assert_eq!(seeds.len(), 1);
    assert_eq!(seeds[0].secret, "tok-a");
    assert_eq!(seeds[0].kind, CredentialKind::User);
}

#[tokio::test]
async fn seeds_are_scoped_to_the_backend() {
    let storage = store().await;
    storage
        .upsert_credential("zai", "tok-a", CredentialKind::User, true)
        .await
        .unwrap();
    storage
        .upsert_credential("other", "tok-b", CredentialKind::User, true)
        .await
        .unwrap();

    let seeds = storage.seeds_for_backend("zai").await.unwrap();
    assert_eq!(seeds.len(), 1);
    assert_eq!(seeds[0].secret, "tok-a");
}

#[tokio::test]
async fn outcome_counters_accumulate() {
    let storage = store().await;
    storage
        .upsert_credential("zai", "tok-1", CredentialKind::User, true)
        .await
        .unwrap();

    storage.record_success("tok-1").await.unwrap();
    storage.record_success("tok-1").await.unwrap();
    storage.record_failure("tok-1").await.unwrap();

    let rows = storage.list_by_backend("zai").await.unwrap();
    let row = &rows[0];
    assert_eq!(row.total_requests, 3);
    assert_eq!(row.successful_requests, 2);
    assert_eq!(row.consecutive_failures, 1);
    assert!(row.last_failure_at.is_some());

    // a success clears the failure streak
    storage.record_success("tok-1").await.unwrap();
    let rows = storage.list_by_backend("zai").await.unwrap();
    assert_eq!(rows[0].consecutive_failures, 0);
    assert!(rows[0].last_success_at.is_some());
}
