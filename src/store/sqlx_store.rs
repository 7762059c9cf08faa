//! Postgres-backed `Store`, grounded on `db/pool.rs` and
//! `db/provider_accounts.rs`'s repository-per-entity, `FromRow`-row style.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::FromRow;

use crate::error::StoreError;
use crate::model::dimension::{Dimension, DimensionSource};
use crate::model::reservation::ReservationStatus;
use crate::model::{Account, AccountCredentials, Provider, QuotaInfo, Reservation};

use super::pool::DbPool;
use super::Store;

pub struct SqlxStore {
    pool: DbPool,
}

impl SqlxStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = super::pool::init_pool(database_url).await?;
        super::pool::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[derive(FromRow)]
struct AccountRow {
    id: String,
    provider: String,
    sub_tag: Option<String>,
    tier: String,
    enabled: bool,
    priority: i32,
    concurrency_limit: i32,
    input_cost: f64,
    output_cost: f64,
    credentials_ref: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            id: row.id,
            provider: row.provider.parse().unwrap_or(Provider::Other),
            sub_tag: row.sub_tag,
            tier: row.tier,
            enabled: row.enabled,
            priority: row.priority,
            concurrency_limit: row.concurrency_limit.max(0) as u32,
            input_cost: row.input_cost,
            output_cost: row.output_cost,
            credentials_ref: row.credentials_ref,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct QuotaRow {
    account_id: String,
    provider: String,
    tier: String,
    dimensions: JsonValue,
    source: String,
    confidence: f64,
    collected_at: DateTime<Utc>,
    is_throttled: bool,
    is_shadow_banned: bool,
    virtual_used_percent: f64,
}

fn parse_source(s: &str) -> DimensionSource {
    match s {
        "polling" | "POLLING" => DimensionSource::Polling,
        "estimated" | "ESTIMATED" => DimensionSource::Estimated,
        "cached" | "CACHED" => DimensionSource::Cached,
        _ => DimensionSource::Headers,
    }
}

impl TryFrom<QuotaRow> for QuotaInfo {
    type Error = StoreError;

    fn try_from(row: QuotaRow) -> Result<Self, Self::Error> {
        let dims: Vec<Dimension> = serde_json::from_value(row.dimensions)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let mut info = QuotaInfo::new(
            row.provider.parse().unwrap_or(Provider::Other),
            row.account_id,
            row.tier,
            dims,
            parse_source(&row.source),
            row.confidence,
        );
        info.collected_at = row.collected_at;
        info.is_throttled = row.is_throttled;
        info.is_shadow_banned = row.is_shadow_banned;
        info.virtual_used_percent = row.virtual_used_percent;
        Ok(info)
    }
}

#[derive(FromRow)]
struct ReservationRow {
    id: String,
    account_id: String,
    estimated_cost_percent: f64,
    status: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    released_at: Option<DateTime<Utc>>,
    correlation_id: String,
    actual_cost_percent: Option<f64>,
}

fn parse_status(s: &str) -> ReservationStatus {
    match s {
        "active" => ReservationStatus::Active,
        "released" => ReservationStatus::Released,
        "expired" => ReservationStatus::Expired,
        "cancelled" => ReservationStatus::Cancelled,
        _ => ReservationStatus::Pending,
    }
}

fn status_str(status: ReservationStatus) -> &'static str {
    match status {
        ReservationStatus::Pending => "pending",
        ReservationStatus::Active => "active",
        ReservationStatus::Released => "released",
        ReservationStatus::Expired => "expired",
        ReservationStatus::Cancelled => "cancelled",
    }
}

impl From<ReservationRow> for Reservation {
    fn from(row: ReservationRow) -> Self {
        Reservation {
            id: row.id,
            account_id: row.account_id,
            estimated_cost_percent: row.estimated_cost_percent,
            status: parse_status(&row.status),
            created_at: row.created_at,
            expires_at: row.expires_at,
            released_at: row.released_at,
            correlation_id: row.correlation_id,
            actual_cost_percent: row.actual_cost_percent,
        }
    }
}

#[async_trait]
impl Store for SqlxStore {
    async fn get_account(&self, id: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Account::from))
    }

    async fn list_enabled_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE enabled = TRUE")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Account::from).collect())
    }

    async fn set_account(&self, account: Account) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, provider, sub_tag, tier, enabled, priority, concurrency_limit, input_cost, output_cost, credentials_ref, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                provider = EXCLUDED.provider,
                sub_tag = EXCLUDED.sub_tag,
                tier = EXCLUDED.tier,
                enabled = EXCLUDED.enabled,
                priority = EXCLUDED.priority,
                concurrency_limit = EXCLUDED.concurrency_limit,
                input_cost = EXCLUDED.input_cost,
                output_cost = EXCLUDED.output_cost,
                credentials_ref = EXCLUDED.credentials_ref,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&account.id)
        .bind(account.provider.as_str())
        .bind(&account.sub_tag)
        .bind(&account.tier)
        .bind(account.enabled)
        .bind(account.priority)
        .bind(account.concurrency_limit as i32)
        .bind(account.input_cost)
        .bind(account.output_cost)
        .bind(&account.credentials_ref)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_account(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_quota(&self, account_id: &str) -> Result<Option<QuotaInfo>, StoreError> {
        let row = sqlx::query_as::<_, QuotaRow>("SELECT * FROM quota_info WHERE account_id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(QuotaInfo::try_from).transpose()
    }

    async fn set_quota(&self, quota: QuotaInfo) -> Result<(), StoreError> {
        let dims = serde_json::to_value(quota.dimensions())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let source = format!("{:?}", quota.source).to_uppercase();
        sqlx::query(
            r#"
            INSERT INTO quota_info (account_id, provider, tier, dimensions, source, confidence, collected_at, is_throttled, is_shadow_banned, virtual_used_percent)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (account_id) DO UPDATE SET
                provider = EXCLUDED.provider,
                tier = EXCLUDED.tier,
                dimensions = EXCLUDED.dimensions,
                source = EXCLUDED.source,
                confidence = EXCLUDED.confidence,
                collected_at = EXCLUDED.collected_at,
                is_throttled = EXCLUDED.is_throttled,
                is_shadow_banned = EXCLUDED.is_shadow_banned,
                virtual_used_percent = EXCLUDED.virtual_used_percent
            WHERE quota_info.collected_at <= EXCLUDED.collected_at
            "#,
        )
        .bind(&quota.account_id)
        .bind(quota.provider.as_str())
        .bind(&quota.tier)
        .bind(dims)
        .bind(source)
        .bind(quota.confidence)
        .bind(quota.collected_at)
        .bind(quota.is_throttled)
        .bind(quota.is_shadow_banned)
        .bind(quota.virtual_used_percent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_quotas(&self) -> Result<Vec<QuotaInfo>, StoreError> {
        let rows = sqlx::query_as::<_, QuotaRow>("SELECT * FROM quota_info")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(QuotaInfo::try_from).collect()
    }

    async fn delete_quota(&self, account_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM quota_info WHERE account_id = $1")
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_reservation(&self, id: &str) -> Result<Option<Reservation>, StoreError> {
        let row = sqlx::query_as::<_, ReservationRow>("SELECT * FROM reservations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Reservation::from))
    }

    async fn set_reservation(&self, reservation: Reservation) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO reservations (id, account_id, estimated_cost_percent, status, created_at, expires_at, released_at, correlation_id, actual_cost_percent)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                released_at = EXCLUDED.released_at,
                actual_cost_percent = EXCLUDED.actual_cost_percent
            "#,
        )
        .bind(&reservation.id)
        .bind(&reservation.account_id)
        .bind(reservation.estimated_cost_percent)
        .bind(status_str(reservation.status))
        .bind(reservation.created_at)
        .bind(reservation.expires_at)
        .bind(reservation.released_at)
        .bind(&reservation.correlation_id)
        .bind(reservation.actual_cost_percent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_reservations_for_account(
        &self,
        account_id: &str,
    ) -> Result<Vec<Reservation>, StoreError> {
        let rows = sqlx::query_as::<_, ReservationRow>(
            "SELECT * FROM reservations WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Reservation::from).collect())
    }

    async fn list_open_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        let rows = sqlx::query_as::<_, ReservationRow>(
            "SELECT * FROM reservations WHERE status IN ('pending', 'active')",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Reservation::from).collect())
    }

    async fn get_credentials(&self, account_id: &str) -> Result<Option<AccountCredentials>, StoreError> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT account_id, secret FROM credentials WHERE account_id = $1")
                .bind(account_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(account_id, secret)| AccountCredentials { account_id, secret }))
    }

    async fn set_credentials(&self, credentials: AccountCredentials) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO credentials (account_id, secret) VALUES ($1, $2)
            ON CONFLICT (account_id) DO UPDATE SET secret = EXCLUDED.secret
            "#,
        )
        .bind(&credentials.account_id)
        .bind(&credentials.secret)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
