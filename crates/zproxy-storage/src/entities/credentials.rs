use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "credentials")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub backend: String,
    #[sea_orm(unique)]
    pub token: String,
    /// `user`, `guest`, or `unknown`; re-written by health probes.
    pub kind: String,
    pub enabled: bool,
    pub total_requests: i64,
    pub successful_requests: i64,
    pub consecutive_failures: i32,
    pub last_success_at: Option<OffsetDateTime>,
    pub last_failure_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
