use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::store_types::generate_id;
use super::{BucketIncrement, BucketKey, FinanceError, FinanceStore, FinancialRecord, RecordQuery};

/// Process-local rollup store. One lock acquisition covers a whole
/// `upsert_buckets` call, which makes the call atomic.
#[derive(Debug, Default)]
pub struct MemoryFinanceStore {
    records: Mutex<BTreeMap<BucketKey, FinancialRecord>>,
}

impl MemoryFinanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FinanceStore for MemoryFinanceStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn find_bucket(&self, key: &BucketKey) -> Result<Option<FinancialRecord>, FinanceError> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn upsert_buckets(&self, increments: &[BucketIncrement]) -> Result<(), FinanceError> {
        let mut records = self.records.lock().await;

        // Stage every row first so an overflow leaves the map untouched.
        let mut staged: Vec<(BucketKey, FinancialRecord)> = Vec::with_capacity(increments.len());
        for increment in increments {
            let current = staged
                .iter()
                .rev()
                .find(|(key, _)| *key == increment.key)
                .map(|(_, record)| record.clone())
                .or_else(|| records.get(&increment.key).cloned());

            let next = match current {
                Some(mut record) => {
                    record.task_count = record
                        .task_count
                        .checked_add(increment.tasks)
                        .ok_or_else(|| overflow(&increment.key, "taskCount"))?;
                    record.patient_count = record
                        .patient_count
                        .checked_add(increment.patients)
                        .ok_or_else(|| overflow(&increment.key, "patientCount"))?;
                    record.total_revenue = record
                        .total_revenue
                        .checked_add(increment.revenue)
                        .ok_or_else(|| overflow(&increment.key, "totalRevenue"))?;
                    record.updated_at = increment.at;
                    record
                }
                None => FinancialRecord {
                    id: generate_id(),
                    consultation_type: increment.key.consultation_type.clone(),
                    duration: increment.key.duration.clone(),
                    task_count: increment.tasks,
                    patient_count: increment.patients,
                    total_revenue: increment.revenue,
                    updated_at: increment.at,
                },
            };
            staged.push((increment.key.clone(), next));
        }

        for (key, record) in staged {
            records.insert(key, record);
        }
        Ok(())
    }

    async fn list_records(
        &self,
        query: &RecordQuery,
    ) -> Result<Vec<FinancialRecord>, FinanceError> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|record| query.matches(record))
            .cloned()
            .collect())
    }
}

fn overflow(key: &BucketKey, field: &str) -> FinanceError {
    FinanceError::store(
        "memory",
        format!(
            "{field} overflow for {}/{}",
            key.consultation_type, key.duration
        ),
    )
}
