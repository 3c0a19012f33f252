use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Non-negative money value held in cents.
///
/// Prices arrive as JSON numbers (`100`, `49.99`) or decimal strings and are
/// rounded to the nearest cent. Serialization emits a JSON number so stored
/// rows keep the `totalRevenue: number` shape.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount must not be negative: {0}")]
    Negative(String),
    #[error("amount is not a finite number: {0}")]
    NotFinite(String),
    #[error("amount is too large: {0}")]
    Overflow(String),
    #[error("invalid amount: {0}")]
    Invalid(String),
}

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> u64 {
        self.0
    }

    pub fn from_f64(value: f64) -> Result<Self, AmountError> {
        if !value.is_finite() {
            return Err(AmountError::NotFinite(value.to_string()));
        }
        if value < 0.0 {
            return Err(AmountError::Negative(value.to_string()));
        }
        let cents = (value * 100.0).round();
        if cents > u64::MAX as f64 {
            return Err(AmountError::Overflow(value.to_string()));
        }
        Ok(Self(cents as u64))
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.starts_with('-') {
            return Err(AmountError::Negative(trimmed.to_string()));
        }

        let (whole, frac) = trimmed.split_once('.').unwrap_or((trimmed, ""));
        let digits_only = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if whole.is_empty() && frac.is_empty()
            || !digits_only(whole)
            || !digits_only(frac)
        {
            return Err(AmountError::Invalid(trimmed.to_string()));
        }

        // Exact for up to two fractional digits; longer fractions go through f64
        // so rounding matches the numeric path.
        if frac.len() > 2 {
            let value: f64 = trimmed
                .parse()
                .map_err(|_| AmountError::Invalid(trimmed.to_string()))?;
            return Self::from_f64(value);
        }

        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| AmountError::Overflow(trimmed.to_string()))?
        };
        let frac_cents: u64 = match frac.len() {
            0 => 0,
            1 => u64::from(frac.as_bytes()[0] - b'0') * 10,
            _ => frac
                .parse()
                .map_err(|_| AmountError::Invalid(trimmed.to_string()))?,
        };

        whole
            .checked_mul(100)
            .and_then(|cents| cents.checked_add(frac_cents))
            .map(Amount)
            .ok_or_else(|| AmountError::Overflow(trimmed.to_string()))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Unsigned(u64),
            Signed(i64),
            Float(f64),
            Text(String),
        }

        let parsed = match Raw::deserialize(deserializer)? {
            Raw::Unsigned(value) => value
                .checked_mul(100)
                .map(Amount)
                .ok_or_else(|| AmountError::Overflow(value.to_string())),
            Raw::Signed(value) => Err(AmountError::Negative(value.to_string())),
            Raw::Float(value) => Amount::from_f64(value),
            Raw::Text(value) => value.parse(),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_strings_exactly() {
        assert_eq!("150".parse::<Amount>().unwrap().cents(), 15_000);
        assert_eq!("49.9".parse::<Amount>().unwrap().cents(), 4_990);
        assert_eq!("49.99".parse::<Amount>().unwrap().cents(), 4_999);
        assert_eq!(".5".parse::<Amount>().unwrap().cents(), 50);
        assert_eq!("0.125".parse::<Amount>().unwrap().cents(), 13);
    }

    #[test]
    fn rejects_negative_and_garbage() {
        assert!(matches!(
            "-1".parse::<Amount>(),
            Err(AmountError::Negative(_))
        ));
        assert!(matches!(
            "1e3x".parse::<Amount>(),
            Err(AmountError::Invalid(_))
        ));
        assert!(matches!(".".parse::<Amount>(), Err(AmountError::Invalid(_))));
        assert!(Amount::from_f64(f64::NAN).is_err());
        assert!(Amount::from_f64(-0.01).is_err());
    }

    #[test]
    fn deserializes_json_numbers_and_strings() {
        let amount: Amount = serde_json::from_str("100").unwrap();
        assert_eq!(amount.cents(), 10_000);
        let amount: Amount = serde_json::from_str("12.345").unwrap();
        assert_eq!(amount.cents(), 1_235);
        let amount: Amount = serde_json::from_str("\"7.10\"").unwrap();
        assert_eq!(amount.cents(), 710);
        assert!(serde_json::from_str::<Amount>("-3").is_err());
    }

    #[test]
    fn displays_two_fraction_digits() {
        assert_eq!(Amount::from_cents(15_000).to_string(), "150.00");
        assert_eq!(Amount::from_cents(5).to_string(), "0.05");
        assert_eq!(serde_json::to_string(&Amount::from_cents(4_999)).unwrap(), "49.99");
    }
}
