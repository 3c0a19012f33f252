use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::{Date, Month, OffsetDateTime, UtcOffset};

use super::FinanceError;

static MONTHLY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{2})-(\d{4})$").expect("static monthly pattern"));
static DAILY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{2})-(\d{2})-(\d{4})$").expect("static daily pattern"));

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Monthly,
    Daily,
}

/// Bucket key of a rollup row: `MM-YYYY` for a month, `DD-MM-YYYY` for a day.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DurationKey {
    raw: String,
    period: Period,
}

impl DurationKey {
    /// Accepts only well-formed keys naming a real calendar month or day.
    pub fn parse(raw: &str) -> Result<Self, FinanceError> {
        let invalid = || FinanceError::InvalidDuration {
            duration: raw.to_string(),
        };

        if let Some(caps) = MONTHLY_PATTERN.captures(raw) {
            let month: u8 = caps[1].parse().map_err(|_| invalid())?;
            Month::try_from(month).map_err(|_| invalid())?;
            return Ok(Self {
                raw: raw.to_string(),
                period: Period::Monthly,
            });
        }

        if let Some(caps) = DAILY_PATTERN.captures(raw) {
            let day: u8 = caps[1].parse().map_err(|_| invalid())?;
            let month: u8 = caps[2].parse().map_err(|_| invalid())?;
            let year: i32 = caps[3].parse().map_err(|_| invalid())?;
            let month = Month::try_from(month).map_err(|_| invalid())?;
            Date::from_calendar_date(year, month, day).map_err(|_| invalid())?;
            return Ok(Self {
                raw: raw.to_string(),
                period: Period::Daily,
            });
        }

        Err(invalid())
    }

    pub fn monthly(date: Date) -> Self {
        Self {
            raw: format!("{:02}-{:04}", u8::from(date.month()), date.year()),
            period: Period::Monthly,
        }
    }

    pub fn daily(date: Date) -> Self {
        Self {
            raw: format!(
                "{:02}-{:02}-{:04}",
                date.day(),
                u8::from(date.month()),
                date.year()
            ),
            period: Period::Daily,
        }
    }

    /// Monthly and daily keys for an instant, taken on the UTC calendar.
    pub fn for_timestamp(at: OffsetDateTime) -> (Self, Self) {
        let date = at.to_offset(UtcOffset::UTC).date();
        (Self::monthly(date), Self::daily(date))
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for DurationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for DurationKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for DurationKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn accepts_monthly_and_daily_keys() {
        let monthly = DurationKey::parse("12-2024").unwrap();
        assert_eq!(monthly.period(), Period::Monthly);
        let daily = DurationKey::parse("29-02-2024").unwrap();
        assert_eq!(daily.period(), Period::Daily);
        assert_eq!(daily.as_str(), "29-02-2024");
    }

    #[test]
    fn rejects_malformed_keys() {
        for raw in [
            "2024-12",
            "13-2024",
            "00-2024",
            "1-2024",
            "12-24",
            "32-01-2024",
            "29-02-2023",
            "2024-12-21",
            " 12-2024",
            "",
        ] {
            assert!(
                matches!(
                    DurationKey::parse(raw),
                    Err(FinanceError::InvalidDuration { .. })
                ),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn derives_keys_from_utc_calendar_date() {
        let (monthly, daily) = DurationKey::for_timestamp(datetime!(2024-12-21 10:00 UTC));
        assert_eq!(monthly.as_str(), "12-2024");
        assert_eq!(daily.as_str(), "21-12-2024");

        // 23:30 at -05:00 is already the next day in UTC.
        let (monthly, daily) = DurationKey::for_timestamp(datetime!(2024-12-31 23:30 -5));
        assert_eq!(monthly.as_str(), "01-2025");
        assert_eq!(daily.as_str(), "01-01-2025");
    }

    #[test]
    fn keys_sort_by_raw_text_then_period() {
        let mut keys = std::collections::BTreeSet::new();
        keys.insert(DurationKey::parse("21-12-2024").unwrap());
        keys.insert(DurationKey::parse("12-2024").unwrap());
        keys.insert(DurationKey::parse("12-2024").unwrap());
        let sorted: Vec<_> = keys.iter().map(DurationKey::as_str).collect();
        assert_eq!(sorted, ["12-2024", "21-12-2024"]);
        assert!(Period::Monthly < Period::Daily);
    }
}
