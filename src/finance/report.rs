use std::sync::Arc;

use serde::Serialize;
use tracing::instrument;

use super::{Amount, DurationKey, FinanceError, FinanceStore, FinancialRecord, Period, RecordQuery};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub duration: DurationKey,
    pub period: Period,
    pub total_tasks: u64,
    pub total_patients: u64,
    pub total_revenue: Amount,
    pub records: Vec<FinancialRecord>,
}

/// Read side of the rollups. Duration keys are validated before the store
/// is touched.
#[derive(Clone)]
pub struct ReportService {
    store: Arc<dyn FinanceStore>,
}

impl ReportService {
    pub fn new(store: Arc<dyn FinanceStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(backend = self.store.backend()))]
    pub async fn records(
        &self,
        duration: &str,
        consultation_type: Option<&str>,
    ) -> Result<Vec<FinancialRecord>, FinanceError> {
        let duration = DurationKey::parse(duration)?;
        let mut query = RecordQuery::for_duration(duration);
        if let Some(kind) = consultation_type
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            query = query.with_consultation_type(kind);
        }
        self.store.list_records(&query).await
    }

    pub async fn summary(
        &self,
        duration: &str,
        consultation_type: Option<&str>,
    ) -> Result<ReportSummary, FinanceError> {
        let key = DurationKey::parse(duration)?;
        let records = self.records(duration, consultation_type).await?;

        let mut total_tasks = 0u64;
        let mut total_patients = 0u64;
        let mut total_revenue = Amount::ZERO;
        for record in &records {
            total_tasks = total_tasks.saturating_add(record.task_count);
            total_patients = total_patients.saturating_add(record.patient_count);
            total_revenue = total_revenue.saturating_add(record.total_revenue);
        }

        Ok(ReportSummary {
            period: key.period(),
            duration: key,
            total_tasks,
            total_patients,
            total_revenue,
            records,
        })
    }
}
