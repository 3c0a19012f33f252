use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{Amount, DurationKey};

/// One rollup row: the aggregate of every billable event of a consultation
/// type that fell in `duration`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialRecord {
    pub id: String,
    pub consultation_type: String,
    pub duration: DurationKey,
    pub task_count: u64,
    pub patient_count: u64,
    pub total_revenue: Amount,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub consultation_type: String,
    pub duration: DurationKey,
}

impl BucketKey {
    pub fn new(consultation_type: impl Into<String>, duration: DurationKey) -> Self {
        Self {
            consultation_type: consultation_type.into(),
            duration,
        }
    }
}

/// Additive change to one bucket. Counts and revenue are summed into the row;
/// `at` replaces the row's `updated_at`.
#[derive(Clone, Debug, PartialEq)]
pub struct BucketIncrement {
    pub key: BucketKey,
    pub tasks: u64,
    pub patients: u64,
    pub revenue: Amount,
    pub at: OffsetDateTime,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordQuery {
    pub duration: Option<DurationKey>,
    pub consultation_type: Option<String>,
}

impl RecordQuery {
    pub fn for_duration(duration: DurationKey) -> Self {
        Self {
            duration: Some(duration),
            consultation_type: None,
        }
    }

    pub fn with_consultation_type(mut self, consultation_type: impl Into<String>) -> Self {
        self.consultation_type = Some(consultation_type.into());
        self
    }

    pub fn matches(&self, record: &FinancialRecord) -> bool {
        self.duration
            .as_ref()
            .is_none_or(|duration| *duration == record.duration)
            && self
                .consultation_type
                .as_deref()
                .is_none_or(|kind| kind == record.consultation_type)
    }
}

pub(crate) fn now_millis() -> i64 {
    let now = OffsetDateTime::now_utc();
    (now.unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn millis_to_datetime(ms: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

pub(crate) fn datetime_to_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

/// UUID-v4 formatted identifier from OS randomness.
pub fn generate_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static ID_SEQ: AtomicU64 = AtomicU64::new(0);

    let mut bytes = [0u8; 16];
    if getrandom::fill(&mut bytes).is_err() {
        let seq = ID_SEQ.fetch_add(1, Ordering::Relaxed);
        bytes[..8].copy_from_slice(&now_millis().to_be_bytes());
        bytes[8..].copy_from_slice(&seq.to_be_bytes());
    }
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let hex = hex_encode(&bytes);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}
