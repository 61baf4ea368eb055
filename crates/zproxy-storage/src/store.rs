use sea_orm::entity::prelude::*;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue, ColumnTrait, Database, DatabaseConnection, DbErr, EntityTrait, ExprTrait,
    QueryFilter, Schema,
};
use time::OffsetDateTime;
use zproxy_provider_core::{CredentialKind, CredentialSeed};

use crate::entities;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] DbErr),
}

#[derive(Clone)]
pub struct CredentialStorage {
    db: DatabaseConnection,
}

impl CredentialStorage {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let db = Database::connect(database_url).await?;
        Ok(Self { db })
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn sync(&self) -> Result<(), StorageError> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Credentials)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    pub async fn list_by_backend(
        &self,
        backend: &str,
    ) -> Result<Vec<entities::credentials::Model>, StorageError> {
        use entities::credentials::Column;
        Ok(entities::Credentials::find()
            .filter(Column::Backend.eq(backend))
            .all(&self.db)
            .await?)
    }

    /// Pool seeds: enabled rows only, with their last-known kind.
    pub async fn seeds_for_backend(&self, backend: &str) -> Result<Vec<CredentialSeed>, StorageError> {
        let rows = self.list_by_backend(backend).await?;
        Ok(rows
            .into_iter()
            .filter(|row| row.enabled)
            .map(|row| CredentialSeed {
                secret: row.token,
                kind: kind_from_str(&row.kind),
            })
            .collect())
    }

    pub async fn upsert_credential(
        &self,
        backend: &str,
        token: &str,
        kind: CredentialKind,
        enabled: bool,
    ) -> Result<(), StorageError> {
        use entities::credentials::Column;
        let now = OffsetDateTime::now_utc();
        let active = entities::credentials::ActiveModel {
            id: ActiveValue::NotSet,
            backend: ActiveValue::Set(backend.to_string()),
            token: ActiveValue::Set(token.to_string()),
            kind: ActiveValue::Set(kind_to_str(kind).to_string()),
            enabled: ActiveValue::Set(enabled),
            total_requests: ActiveValue::Set(0),
            successful_requests: ActiveValue::Set(0),
            consecutive_failures: ActiveValue::Set(0),
            last_success_at: ActiveValue::Set(None),
            last_failure_at: ActiveValue::Set(None),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };

        entities::Credentials::insert(active)
            .on_conflict(
                OnConflict::column(Column::Token)
                    .update_columns([Column::Kind, Column::Enabled, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn set_enabled(&self, token: &str, enabled: bool) -> Result<(), StorageError> {
        use entities::credentials::Column;
        entities::Credentials::update_many()
            .col_expr(Column::Enabled, Expr::value(enabled))
            .col_expr(Column::UpdatedAt, Expr::value(OffsetDateTime::now_utc()))
            .filter(Column::Token.eq(token))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn record_success(&self, token: &str) -> Result<(), StorageError> {
        use entities::credentials::Column;
        let now = OffsetDateTime::now_utc();
        entities::Credentials::update_many()
            .col_expr(
                Column::TotalRequests,
                Expr::col(Column::TotalRequests).add(1),
            )
            .col_expr(
                Column::SuccessfulRequests,
                Expr::col(Column::SuccessfulRequests).add(1),
            )
            .col_expr(Column::ConsecutiveFailures, Expr::value(0))
            .col_expr(Column::LastSuccessAt, Expr::value(Some(now)))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Token.eq(token))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn record_failure(&self, token: &str) -> Result<(), StorageError> {
        use entities::credentials::Column;
        let now = OffsetDateTime::now_utc();
        entities::Credentials::update_many()
            .col_expr(
                Column::TotalRequests,
                Expr::col(Column::TotalRequests).add(1),
            )
            .col_expr(
                Column::ConsecutiveFailures,
                Expr::col(Column::ConsecutiveFailures).add(1),
            )
            .col_expr(Column::LastFailureAt, Expr::value(Some(now)))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Token.eq(token))
            .exec(&self.db)
            .await?;
        Ok(())
    }

}

pub fn kind_from_str(kind: &str) -> CredentialKind {
    match kind {
        "user" => CredentialKind::User,
        "guest" => CredentialKind::Guest,
        _ => CredentialKind::Unknown,
    }
}

pub fn kind_to_str(kind: CredentialKind) -> &'static str {
    match kind {
        CredentialKind::User => "user",
        CredentialKind::Guest => "guest",
        CredentialKind::Unknown => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_strings() {
        for kind in [
            CredentialKind::User,
            CredentialKind::Guest,
            CredentialKind::Unknown,
        ] {
            assert_eq!(kind_from_str(kind_to_str(kind)), kind);
        }
        assert_eq!(kind_from_str("administrator"), CredentialKind::Unknown);
    }
}
