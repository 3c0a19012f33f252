use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use thiserror::Error;

use super::store_types::{datetime_to_millis, generate_id, millis_to_datetime};
use super::{
    Amount, BucketIncrement, BucketKey, DurationKey, FinanceError, FinanceStore, FinancialRecord,
    RecordQuery,
};

/// Rollup rows as Redis hashes, one per bucket, with set indexes by duration.
#[derive(Clone, Debug)]
pub struct RedisStore {
    client: redis::Client,
    prefix: String,
}

#[derive(Debug, Error)]
pub enum RedisStoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl From<RedisStoreError> for FinanceError {
    fn from(err: RedisStoreError) -> Self {
        FinanceError::store("redis", err)
    }
}

impl From<redis::RedisError> for FinanceError {
    fn from(err: redis::RedisError) -> Self {
        RedisStoreError::from(err).into()
    }
}

impl RedisStore {
    pub fn new(url: impl AsRef<str>) -> Result<Self, RedisStoreError> {
        Ok(Self {
            client: redis::Client::open(url.as_ref())?,
            prefix: "ims".to_string(),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    pub async fn ping(&self) -> Result<(), RedisStoreError> {
        let mut conn = self.connection().await?;
        let _: Option<String> = conn.get(format!("{}:__ping__", self.prefix)).await?;
        Ok(())
    }

    fn key_durations(&self) -> String {
        format!("{}:finance:durations", self.prefix)
    }

    fn key_duration_index(&self, duration: &str) -> String {
        format!("{}:finance:by_duration:{duration}", self.prefix)
    }

    fn key_bucket(&self, duration: &str, consultation_type: &str) -> String {
        format!("{}:finance:bucket:{duration}:{consultation_type}", self.prefix)
    }
}

#[async_trait]
impl FinanceStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn find_bucket(&self, key: &BucketKey) -> Result<Option<FinancialRecord>, FinanceError> {
        let mut conn = self.connection().await?;
        let raw: HashMap<String, String> = conn
            .hgetall(self.key_bucket(key.duration.as_str(), &key.consultation_type))
            .await?;
        Ok(record_from_hash(key, &raw))
    }

    async fn upsert_buckets(&self, increments: &[BucketIncrement]) -> Result<(), FinanceError> {
        if increments.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;

        // A script runs without interleaving, so both buckets move together.
        let script = redis::Script::new(
            r#"
local durations_key = KEYS[1]
local count = (#KEYS - 1) / 2

for i = 0, count - 1 do
  local index_key = KEYS[2 * i + 2]
  local bucket_key = KEYS[2 * i + 3]
  local base = i * 7 + 1

  local duration = ARGV[base]
  local consultation_type = ARGV[base + 1]

  redis.call("HSETNX", bucket_key, "id", ARGV[base + 2])
  redis.call("HSETNX", bucket_key, "consultation_type", consultation_type)
  redis.call("HSETNX", bucket_key, "duration", duration)
  redis.call("HINCRBY", bucket_key, "task_count", ARGV[base + 3])
  redis.call("HINCRBY", bucket_key, "patient_count", ARGV[base + 4])
  redis.call("HINCRBY", bucket_key, "total_revenue_cents", ARGV[base + 5])
  redis.call("HSET", bucket_key, "updated_at_ms", ARGV[base + 6])

  redis.call("SADD", index_key, consultation_type)
  redis.call("SADD", durations_key, duration)
end
return "OK"
"#,
        );

        let mut invocation = script.prepare_invoke();
        invocation.key(self.key_durations());
        for increment in increments {
            let duration = increment.key.duration.as_str();
            invocation
                .key(self.key_duration_index(duration))
                .key(self.key_bucket(duration, &increment.key.consultation_type));
        }
        for increment in increments {
            invocation
                .arg(increment.key.duration.as_str())
                .arg(&increment.key.consultation_type)
                .arg(generate_id())
                .arg(increment.tasks)
                .arg(increment.patients)
                .arg(increment.revenue.cents())
                .arg(datetime_to_millis(increment.at));
        }

        let _: String = invocation.invoke_async(&mut conn).await?;
        Ok(())
    }

    async fn list_records(
        &self,
        query: &RecordQuery,
    ) -> Result<Vec<FinancialRecord>, FinanceError> {
        let mut conn = self.connection().await?;

        let durations: Vec<String> = match query.duration.as_ref() {
            Some(duration) => vec![duration.as_str().to_string()],
            None => conn.smembers(self.key_durations()).await?,
        };

        let mut out = Vec::new();
        for raw_duration in durations {
            let Ok(duration) = DurationKey::parse(&raw_duration) else {
                continue;
            };
            let kinds: Vec<String> = match query.consultation_type.as_ref() {
                Some(kind) => vec![kind.clone()],
                None => conn.smembers(self.key_duration_index(&raw_duration)).await?,
            };
            for kind in kinds {
                let raw: HashMap<String, String> =
                    conn.hgetall(self.key_bucket(&raw_duration, &kind)).await?;
                let key = BucketKey::new(kind, duration.clone());
                if let Some(record) = record_from_hash(&key, &raw) {
                    out.push(record);
                }
            }
        }
        out.sort_by(|a, b| {
            (a.consultation_type.as_str(), &a.duration)
                .cmp(&(b.consultation_type.as_str(), &b.duration))
        });
        Ok(out)
    }
}

fn record_from_hash(key: &BucketKey, raw: &HashMap<String, String>) -> Option<FinancialRecord> {
    let id = raw.get("id")?.clone();
    let number = |field: &str| {
        raw.get(field)
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0)
    };
    let updated_at_ms = raw
        .get("updated_at_ms")
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(0);
    Some(FinancialRecord {
        id,
        consultation_type: key.consultation_type.clone(),
        duration: key.duration.clone(),
        task_count: number("task_count"),
        patient_count: number("patient_count"),
        total_revenue: Amount::from_cents(number("total_revenue_cents")),
        updated_at: millis_to_datetime(updated_at_ms),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use time::macros::datetime;

    use super::*;
    use crate::finance::store_types::now_millis;
    use crate::finance::{BillableEvent, RollupEngine};

    static PREFIX_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn env_nonempty(key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }

    fn test_store() -> Option<RedisStore> {
        let url = env_nonempty("IMS_REDIS_URL").or_else(|| env_nonempty("REDIS_URL"))?;
        let prefix = format!(
            "ims_test:{}:{}",
            now_millis(),
            PREFIX_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        Some(RedisStore::new(url).expect("store").with_prefix(prefix))
    }

    #[tokio::test]
    async fn redis_store_rolls_up_and_lists_by_duration() {
        let Some(store) = test_store() else {
            return;
        };
        store.ping().await.expect("ping");
        let store = Arc::new(store);
        let engine = RollupEngine::new(store.clone());

        for (kind, cents, at) in [
            ("X-Ray", 10_000, datetime!(2024-12-21 10:00 UTC)),
            ("MRI", 20_000, datetime!(2024-12-21 11:00 UTC)),
            ("X-Ray", 5_000, datetime!(2024-12-22 09:00 UTC)),
        ] {
            engine
                .record(&BillableEvent::new(kind, Amount::from_cents(cents), at))
                .await
                .expect("record");
        }

        let december = store
            .list_records(&RecordQuery::for_duration(
                DurationKey::parse("12-2024").expect("duration"),
            ))
            .await
            .expect("list");
        assert_eq!(december.len(), 2);
        assert_eq!(december[0].consultation_type, "MRI");
        assert_eq!(december[1].consultation_type, "X-Ray");
        assert_eq!(december[1].task_count, 2);
        assert_eq!(december[1].total_revenue, Amount::from_cents(15_000));

        let day = store
            .find_bucket(&BucketKey::new(
                "X-Ray",
                DurationKey::parse("21-12-2024").expect("duration"),
            ))
            .await
            .expect("find")
            .expect("row");
        assert_eq!(day.task_count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn redis_store_concurrent_rollups_lose_no_updates() {
        let Some(store) = test_store() else {
            return;
        };
        let store = Arc::new(store);
        let engine = RollupEngine::new(store.clone());

        let mut handles = Vec::new();
        for _ in 0..25 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .record(&BillableEvent::new(
                        "CT",
                        Amount::from_cents(400),
                        datetime!(2024-03-01 12:00 UTC),
                    ))
                    .await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("record");
        }

        let monthly = store
            .find_bucket(&BucketKey::new(
                "CT",
                DurationKey::parse("03-2024").expect("duration"),
            ))
            .await
            .expect("find")
            .expect("row");
        assert_eq!(monthly.task_count, 25);
        assert_eq!(monthly.total_revenue, Amount::from_cents(10_000));
    }
}
