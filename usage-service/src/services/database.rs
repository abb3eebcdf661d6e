//! Database service for usage-service.

use crate::models::{
    AccessGrant, CreateAccess, CreatePlan, CycleLookup, FeatureKey, Plan, UpsertCycleRecord,
    UsageRecord, UserAccess, FREE_PLAN_ID,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::UsageStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

/// Flat row for `user_access JOIN plans`.
#[derive(FromRow)]
struct AccessRow {
    access_id: Uuid,
    user_id: Uuid,
    plan_id: String,
    external_subscription_id: Option<String>,
    created_utc: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    daily_quota_credits: Option<i64>,
    monthly_quota_credits: Option<i64>,
    storage_quota_mb: Option<i64>,
    plan_created_utc: DateTime<Utc>,
}

impl From<AccessRow> for AccessGrant {
    fn from(row: AccessRow) -> Self {
        AccessGrant {
            plan: Plan {
                plan_id: row.plan_id.clone(),
                daily_quota_credits: row.daily_quota_credits,
                monthly_quota_credits: row.monthly_quota_credits,
                storage_quota_mb: row.storage_quota_mb,
                created_utc: row.plan_created_utc,
            },
            access: UserAccess {
                access_id: row.access_id,
                user_id: row.user_id,
                plan_id: row.plan_id,
                external_subscription_id: row.external_subscription_id,
                created_utc: row.created_utc,
                expires_at: row.expires_at,
            },
        }
    }
}

const ACCESS_COLUMNS: &str = r#"
    a.access_id, a.user_id, a.plan_id, a.external_subscription_id, a.created_utc, a.expires_at,
    p.daily_quota_credits, p.monthly_quota_credits, p.storage_quota_mb, p.created_utc AS plan_created_utc
"#;

const RECORD_COLUMNS: &str =
    "record_id, user_id, feature_key, used_amount, cycle_started_at, cycle_ends_at, created_utc, updated_utc";

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "usage-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // =========================================================================
    // Reference data (owned by the subscription module; used for seeding)
    // =========================================================================

    /// Create a plan.
    #[instrument(skip(self, input), fields(plan_id = %input.plan_id))]
    pub async fn create_plan(&self, input: &CreatePlan) -> Result<Plan, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, Plan>(
            r#"
            INSERT INTO plans (plan_id, daily_quota_credits, monthly_quota_credits, storage_quota_mb)
            VALUES ($1, $2, $3, $4)
            RETURNING plan_id, daily_quota_credits, monthly_quota_credits, storage_quota_mb, created_utc
            "#,
        )
        .bind(&input.plan_id)
        .bind(input.daily_quota_credits)
        .bind(input.monthly_quota_credits)
        .bind(input.storage_quota_mb)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("Plan {} already exists", input.plan_id))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create plan: {}", e)),
        })?;

        timer.observe_duration();
        info!(plan_id = %plan.plan_id, "Plan created");

        Ok(plan)
    }

    /// Create a user access.
    #[instrument(skip(self, input), fields(user_id = %input.user_id, plan_id = %input.plan_id))]
    pub async fn create_access(&self, input: &CreateAccess) -> Result<UserAccess, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_access"])
            .start_timer();

        let access = sqlx::query_as::<_, UserAccess>(
            r#"
            INSERT INTO user_access (access_id, user_id, plan_id, external_subscription_id, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING access_id, user_id, plan_id, external_subscription_id, created_utc, expires_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.user_id)
        .bind(&input.plan_id)
        .bind(&input.external_subscription_id)
        .bind(input.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create access: {}", e)))?;

        timer.observe_duration();

        Ok(access)
    }
}

#[async_trait]
impl UsageStore for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn find_access(&self, user_id: Uuid) -> Result<Option<AccessGrant>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_access"])
            .start_timer();

        let row = sqlx::query_as::<_, AccessRow>(&format!(
            r#"
            SELECT {ACCESS_COLUMNS}
            FROM user_access a
            JOIN plans p ON p.plan_id = a.plan_id
            WHERE a.user_id = $1
            ORDER BY a.created_utc DESC
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find access: {}", e)))?;

        timer.observe_duration();

        Ok(row.map(AccessGrant::from))
    }

    #[instrument(skip(self))]
    async fn list_active_accesses(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<AccessGrant>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_active_accesses"])
            .start_timer();

        let rows = sqlx::query_as::<_, AccessRow>(&format!(
            r#"
            SELECT {ACCESS_COLUMNS}
            FROM (
                SELECT DISTINCT ON (user_id) *
                FROM user_access
                ORDER BY user_id, created_utc DESC
            ) a
            JOIN plans p ON p.plan_id = a.plan_id
            WHERE a.expires_at > $1
              AND p.plan_id <> $2
              AND (p.monthly_quota_credits IS NOT NULL OR p.storage_quota_mb IS NOT NULL)
            ORDER BY a.user_id
            "#
        ))
        .bind(now)
        .bind(FREE_PLAN_ID)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list active accesses: {}", e))
        })?;

        timer.observe_duration();

        Ok(rows.into_iter().map(AccessGrant::from).collect())
    }

    #[instrument(skip(self), fields(user_id = %user_id, feature = %feature))]
    async fn find_usage_record(
        &self,
        user_id: Uuid,
        feature: FeatureKey,
        lookup: CycleLookup,
    ) -> Result<Option<UsageRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_usage_record"])
            .start_timer();

        let query = match lookup {
            CycleLookup::StartingAt(_) => format!(
                r#"
                SELECT {RECORD_COLUMNS}
                FROM usage_records
                WHERE user_id = $1 AND feature_key = $2 AND cycle_started_at = $3
                "#
            ),
            CycleLookup::LatestStartedBy(_) => format!(
                r#"
                SELECT {RECORD_COLUMNS}
                FROM usage_records
                WHERE user_id = $1 AND feature_key = $2 AND cycle_started_at <= $3
                ORDER BY cycle_started_at DESC
                LIMIT 1
                "#
            ),
        };
        let at = match lookup {
            CycleLookup::StartingAt(ts) | CycleLookup::LatestStartedBy(ts) => ts,
        };

        let record = sqlx::query_as::<_, UsageRecord>(&query)
            .bind(user_id)
            .bind(feature.as_str())
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to find usage record: {}", e))
            })?;

        timer.observe_duration();

        Ok(record)
    }

    #[instrument(skip(self), fields(record_id = %record_id, cost = cost))]
    async fn increment_usage(
        &self,
        record_id: Uuid,
        cost: i64,
        quota: Option<i64>,
    ) -> Result<Option<i64>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["increment_usage"])
            .start_timer();

        // Admission is decided by the WHERE clause; no separate read.
        let used_amount = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE usage_records
            SET used_amount = used_amount + $2,
                updated_utc = NOW()
            WHERE record_id = $1
              AND ($3::BIGINT IS NULL OR used_amount <= $3::BIGINT - $2)
            RETURNING used_amount
            "#,
        )
        .bind(record_id)
        .bind(cost)
        .bind(quota)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to increment usage: {}", e)))?;

        timer.observe_duration();

        Ok(used_amount)
    }

    #[instrument(skip(self, input), fields(user_id = %input.user_id, feature = %input.feature))]
    async fn upsert_cycle_record(
        &self,
        input: &UpsertCycleRecord,
    ) -> Result<UsageRecord, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_cycle_record"])
            .start_timer();

        let record = sqlx::query_as::<_, UsageRecord>(&format!(
            r#"
            INSERT INTO usage_records (record_id, user_id, feature_key, used_amount, cycle_started_at, cycle_ends_at)
            VALUES ($1, $2, $3, 0, $4, $5)
            ON CONFLICT (user_id, feature_key, cycle_started_at)
            DO UPDATE SET cycle_ends_at = EXCLUDED.cycle_ends_at,
                          updated_utc = NOW()
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(input.user_id)
        .bind(input.feature.as_str())
        .bind(input.cycle_started_at)
        .bind(input.cycle_ends_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to upsert cycle record: {}", e))
        })?;

        timer.observe_duration();

        Ok(record)
    }
}
