use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use thiserror::Error;

use super::store_types::{datetime_to_millis, generate_id, millis_to_datetime};
use super::{
    Amount, BucketIncrement, BucketKey, DurationKey, FinanceError, FinanceStore, FinancialRecord,
    RecordQuery,
};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Rollup rows in a shared Postgres table, for deployments running more than
/// one server process.
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

#[derive(Debug, Error)]
pub enum PostgresStoreError {
    #[error("postgres error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("{0} does not fit in a postgres BIGINT")]
    Overflow(&'static str),
}

impl From<PostgresStoreError> for FinanceError {
    fn from(err: PostgresStoreError) -> Self {
        FinanceError::store("postgres", err)
    }
}

impl From<sqlx::Error> for FinanceError {
    fn from(err: sqlx::Error) -> Self {
        PostgresStoreError::from(err).into()
    }
}

impl PostgresStore {
    pub async fn connect(
        url: &str,
        max_connections: Option<u32>,
    ) -> Result<Self, PostgresStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init(&self) -> Result<(), PostgresStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS financial_records (
                id TEXT PRIMARY KEY,
                consultation_type TEXT NOT NULL,
                duration TEXT NOT NULL,
                task_count BIGINT NOT NULL DEFAULT 0,
                patient_count BIGINT NOT NULL DEFAULT 0,
                total_revenue_cents BIGINT NOT NULL DEFAULT 0,
                updated_at_ms BIGINT NOT NULL,
                UNIQUE (consultation_type, duration)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_financial_records_duration
             ON financial_records (duration)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl FinanceStore for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn find_bucket(&self, key: &BucketKey) -> Result<Option<FinancialRecord>, FinanceError> {
        let row = sqlx::query(
            r#"
            SELECT id, consultation_type, duration, task_count, patient_count,
                   total_revenue_cents, updated_at_ms
            FROM financial_records
            WHERE consultation_type = $1 AND duration = $2
            "#,
        )
        .bind(&key.consultation_type)
        .bind(key.duration.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(read_record).transpose()?)
    }

    async fn upsert_buckets(&self, increments: &[BucketIncrement]) -> Result<(), FinanceError> {
        let mut tx = self.pool.begin().await?;
        for increment in increments {
            sqlx::query(
                r#"
                INSERT INTO financial_records
                    (id, consultation_type, duration, task_count, patient_count,
                     total_revenue_cents, updated_at_ms)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (consultation_type, duration) DO UPDATE SET
                    task_count = financial_records.task_count + EXCLUDED.task_count,
                    patient_count = financial_records.patient_count + EXCLUDED.patient_count,
                    total_revenue_cents =
                        financial_records.total_revenue_cents + EXCLUDED.total_revenue_cents,
                    updated_at_ms = EXCLUDED.updated_at_ms
                "#,
            )
            .bind(generate_id())
            .bind(&increment.key.consultation_type)
            .bind(increment.key.duration.as_str())
            .bind(u64_to_i64(increment.tasks, "taskCount")?)
            .bind(u64_to_i64(increment.patients, "patientCount")?)
            .bind(u64_to_i64(increment.revenue.cents(), "totalRevenue")?)
            .bind(datetime_to_millis(increment.at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_records(
        &self,
        query: &RecordQuery,
    ) -> Result<Vec<FinancialRecord>, FinanceError> {
        let rows = sqlx::query(
            r#"
            SELECT id, consultation_type, duration, task_count, patient_count,
                   total_revenue_cents, updated_at_ms
            FROM financial_records
            WHERE ($1::TEXT IS NULL OR duration = $1)
              AND ($2::TEXT IS NULL OR consultation_type = $2)
            ORDER BY consultation_type, duration
            "#,
        )
        .bind(query.duration.as_ref().map(DurationKey::as_str))
        .bind(query.consultation_type.as_deref())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(read_record)
            .collect::<Result<Vec<_>, _>>()?)
    }
}

fn read_record(row: &PgRow) -> Result<FinancialRecord, PostgresStoreError> {
    let duration: String = row.try_get("duration")?;
    let duration = DurationKey::parse(&duration)
        .map_err(|_| PostgresStoreError::Corrupt(format!("bad duration key {duration:?}")))?;
    Ok(FinancialRecord {
        id: row.try_get("id")?,
        consultation_type: row.try_get("consultation_type")?,
        duration,
        task_count: i64_to_u64(row.try_get("task_count")?),
        patient_count: i64_to_u64(row.try_get("patient_count")?),
        total_revenue: Amount::from_cents(i64_to_u64(row.try_get("total_revenue_cents")?)),
        updated_at: millis_to_datetime(row.try_get("updated_at_ms")?),
    })
}

fn u64_to_i64(value: u64, field: &'static str) -> Result<i64, PostgresStoreError> {
    i64::try_from(value).map_err(|_| PostgresStoreError::Overflow(field))
}

fn i64_to_u64(value: i64) -> u64 {
    if value <= 0 { 0 } else { value as u64 }
}
