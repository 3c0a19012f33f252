//! Financial rollups: every billable event is folded into a monthly and a
//! daily bucket per consultation type, atomically, through a [`FinanceStore`].

pub mod amount;
pub mod memory_store;
pub mod period;
pub mod report;
pub mod store_types;

#[cfg(feature = "store-postgres")]
pub mod postgres_store;
#[cfg(feature = "store-redis")]
pub mod redis_store;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing::{debug, instrument};

pub use amount::{Amount, AmountError};
pub use memory_store::MemoryFinanceStore;
pub use period::{DurationKey, Period};
pub use report::{ReportService, ReportSummary};
pub use store_types::{BucketIncrement, BucketKey, FinancialRecord, RecordQuery};

#[cfg(feature = "store-postgres")]
pub use postgres_store::{PostgresStore, PostgresStoreError};
#[cfg(feature = "store-redis")]
pub use redis_store::{RedisStore, RedisStoreError};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum FinanceError {
    #[error("invalid duration format: {duration:?} (use MM-YYYY or DD-MM-YYYY)")]
    InvalidDuration { duration: String },
    #[error("invalid billable event: {reason}")]
    InvalidEvent { reason: String },
    #[error("{backend} store error: {source}")]
    Store {
        backend: &'static str,
        #[source]
        source: BoxError,
    },
}

impl FinanceError {
    pub fn store(backend: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Store {
            backend,
            source: source.into(),
        }
    }

    fn invalid_event(reason: impl Into<String>) -> Self {
        Self::InvalidEvent {
            reason: reason.into(),
        }
    }
}

/// A priced occurrence (a created task) that drives revenue aggregation.
#[derive(Clone, Debug, PartialEq)]
pub struct BillableEvent {
    pub consultation_type: String,
    pub price: Amount,
    pub occurred_at: OffsetDateTime,
    pub patient_id: Option<String>,
    pub task_id: Option<String>,
}

/// Wire shape of a billable event: `{consultationType, price, timestamp}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBillableEvent {
    #[serde(default)]
    pub consultation_type: Option<String>,
    #[serde(default)]
    pub price: Option<serde_json::Value>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl BillableEvent {
    pub fn new(
        consultation_type: impl Into<String>,
        price: Amount,
        occurred_at: OffsetDateTime,
    ) -> Self {
        Self {
            consultation_type: consultation_type.into(),
            price,
            occurred_at,
            patient_id: None,
            task_id: None,
        }
    }

    pub fn with_patient_id(mut self, patient_id: impl Into<String>) -> Self {
        self.patient_id = Some(patient_id.into());
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn from_payload(raw: RawBillableEvent) -> Result<Self, FinanceError> {
        let consultation_type = raw
            .consultation_type
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| FinanceError::invalid_event("consultationType is required"))?
            .to_string();

        let price = raw
            .price
            .ok_or_else(|| FinanceError::invalid_event("price is required"))?;
        let price: Amount = serde_json::from_value(price)
            .map_err(|err| FinanceError::invalid_event(format!("price: {err}")))?;

        let timestamp = raw
            .timestamp
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| FinanceError::invalid_event("timestamp is required"))?;
        let occurred_at = parse_timestamp(timestamp)?;

        Ok(Self {
            consultation_type,
            price,
            occurred_at,
            patient_id: raw.patient_id,
            task_id: raw.task_id,
        })
    }

    pub fn to_payload(&self) -> RawBillableEvent {
        RawBillableEvent {
            consultation_type: Some(self.consultation_type.clone()),
            price: Some(serde_json::json!(self.price.as_f64())),
            timestamp: self.occurred_at.format(&Rfc3339).ok(),
            patient_id: self.patient_id.clone(),
            task_id: self.task_id.clone(),
        }
    }
}

/// RFC 3339 date-time, or a bare `YYYY-MM-DD` taken as midnight UTC.
pub fn parse_timestamp(raw: &str) -> Result<OffsetDateTime, FinanceError> {
    if let Ok(at) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(at);
    }
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .map(|date| date.midnight().assume_utc())
        .map_err(|_| FinanceError::invalid_event(format!("timestamp is not ISO-8601: {raw}")))
}

/// Persistence port for rollup rows.
///
/// `upsert_buckets` must apply every increment in one atomic unit and add the
/// counters inside the store, so concurrent callers never lose an update.
#[async_trait]
pub trait FinanceStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn find_bucket(&self, key: &BucketKey) -> Result<Option<FinancialRecord>, FinanceError>;

    async fn upsert_buckets(&self, increments: &[BucketIncrement]) -> Result<(), FinanceError>;

    async fn list_records(&self, query: &RecordQuery)
    -> Result<Vec<FinancialRecord>, FinanceError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupOutcome {
    pub consultation_type: String,
    pub monthly: DurationKey,
    pub daily: DurationKey,
}

#[derive(Clone)]
pub struct RollupEngine {
    store: Arc<dyn FinanceStore>,
}

impl std::fmt::Debug for RollupEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollupEngine")
            .field("backend", &self.store.backend())
            .finish()
    }
}

impl RollupEngine {
    pub fn new(store: Arc<dyn FinanceStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn FinanceStore> {
        &self.store
    }

    /// The monthly and daily increments one event contributes: one task, one
    /// patient visit and its price.
    pub fn increments_for(event: &BillableEvent) -> [BucketIncrement; 2] {
        let (monthly, daily) = DurationKey::for_timestamp(event.occurred_at);
        let at = OffsetDateTime::now_utc();
        let increment = |duration: DurationKey| BucketIncrement {
            key: BucketKey::new(event.consultation_type.clone(), duration),
            tasks: 1,
            patients: 1,
            revenue: event.price,
            at,
        };
        [increment(monthly), increment(daily)]
    }

    #[instrument(
        skip(self, event),
        fields(
            backend = self.store.backend(),
            consultation_type = %event.consultation_type,
            price = %event.price,
        )
    )]
    pub async fn record(&self, event: &BillableEvent) -> Result<RollupOutcome, FinanceError> {
        if event.consultation_type.trim().is_empty() {
            return Err(FinanceError::invalid_event("consultationType is required"));
        }

        let increments = Self::increments_for(event);
        self.store.upsert_buckets(&increments).await?;

        let [monthly, daily] = increments;
        debug!(
            monthly = %monthly.key.duration,
            daily = %daily.key.duration,
            "rollup applied"
        );
        Ok(RollupOutcome {
            consultation_type: event.consultation_type.clone(),
            monthly: monthly.key.duration,
            daily: daily.key.duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn raw(consultation_type: &str, price: serde_json::Value, ts: &str) -> RawBillableEvent {
        RawBillableEvent {
            consultation_type: Some(consultation_type.to_string()),
            price: Some(price),
            timestamp: Some(ts.to_string()),
            ..RawBillableEvent::default()
        }
    }

    #[test]
    fn payload_parses_into_event() {
        let event = BillableEvent::from_payload(raw(
            "X-Ray",
            serde_json::json!(100),
            "2024-12-21T10:00:00Z",
        ))
        .unwrap();
        assert_eq!(event.consultation_type, "X-Ray");
        assert_eq!(event.price, Amount::from_cents(10_000));
        assert_eq!(event.occurred_at, datetime!(2024-12-21 10:00 UTC));
    }

    #[test]
    fn payload_accepts_zero_price_and_bare_dates() {
        let event =
            BillableEvent::from_payload(raw("MRI", serde_json::json!(0), "2024-12-22")).unwrap();
        assert_eq!(event.price, Amount::ZERO);
        assert_eq!(event.occurred_at, datetime!(2024-12-22 0:00 UTC));
    }

    #[test]
    fn payload_rejects_missing_or_invalid_fields() {
        let cases = [
            raw("", serde_json::json!(1), "2024-12-21T10:00:00Z"),
            raw("MRI", serde_json::json!(-1), "2024-12-21T10:00:00Z"),
            raw("MRI", serde_json::json!("abc"), "2024-12-21T10:00:00Z"),
            raw("MRI", serde_json::json!(1), "yesterday"),
            RawBillableEvent {
                consultation_type: Some("MRI".to_string()),
                ..RawBillableEvent::default()
            },
        ];
        for case in cases {
            assert!(matches!(
                BillableEvent::from_payload(case),
                Err(FinanceError::InvalidEvent { .. })
            ));
        }
    }

    #[test]
    fn increments_cover_month_and_day() {
        let event = BillableEvent::new(
            "X",
            Amount::from_cents(5_000),
            datetime!(2024-12-22 09:00 UTC),
        );
        let [monthly, daily] = RollupEngine::increments_for(&event);
        assert_eq!(monthly.key.duration.as_str(), "12-2024");
        assert_eq!(daily.key.duration.as_str(), "22-12-2024");
        for increment in [monthly, daily] {
            assert_eq!(increment.tasks, 1);
            assert_eq!(increment.patients, 1);
            assert_eq!(increment.revenue, Amount::from_cents(5_000));
        }
    }
}
