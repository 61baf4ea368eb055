use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use zproxy_provider_core::{HealthCheckOutcome, PoolSnapshot};

use crate::proxy::AppState;

pub fn admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/pool", get(pool_snapshot))
        .route("/admin/pool/reload", post(pool_reload))
        .route("/admin/pool/health-check", post(pool_health_check))
        .with_state(state)
}

async fn pool_snapshot(State(state): State<AppState>) -> Json<PoolSnapshot> {
    Json(state.pool.snapshot())
}

/// Re-reads the membership from the store; runtime counters of
/// surviving credentials are kept.
async fn pool_reload(State(state): State<AppState>) -> Response {
    let Some(storage) = &state.storage else {
        return (
            StatusCode::CONFLICT,
            Json(json!({"ok": false, "error": "no credential store configured"})),
        )
            .into_response();
    };
    match storage.seeds_for_backend(&state.backend_name).await {
        Ok(seeds) => {
            let credentials = seeds.len();
            state.pool.reload(seeds);
            tracing::info!(event = "pool_reload", credentials);
            (
                StatusCode::OK,
                Json(json!({"ok": true, "credentials": credentials})),
            )
                .into_response()
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"ok": false, "error": err.to_string()})),
        )
            .into_response(),
    }
}

async fn pool_health_check(State(state): State<AppState>) -> Json<HealthCheckOutcome> {
    let outcome = state.pool.health_check_all(state.validator.clone()).await;
    Json(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::test_support;

    #[tokio::test]
    async fn snapshot_reports_pool_counts() {
        let Json(snapshot) = pool_snapshot(State(test_support::state())).await;
        assert_eq!(snapshot.total, 1);
        assert_eq!(snapshot.user, 1);
        assert!(snapshot.credentials[0].secret.contains("***"));
    }

    #[tokio::test]
    async fn reload_without_a_store_is_rejected() {
        let response = pool_reload(State(test_support::state())).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn manual_health_check_reclassifies_credentials() {
        let state = test_support::state();
        let Json(outcome) = pool_health_check(State(state.clone())).await;
        assert_eq!(outcome.probed, 1);
        assert_eq!(outcome.user, 1);
        assert_eq!(outcome.failures, 0);
    }
}
