//! Minor-unit amount formatting and parsing.
//!
//! All amounts are `i64` hundredths of a Tanzanian shilling.

use crate::error::PledgeError;
use serde::{Deserialize, Deserializer};

pub const CURRENCY: &str = "TSH";

/// `123456` -> `"1,234.56"`.
pub fn format_amount(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    format!("{sign}{}.{:02}", group_thousands(abs / 100), abs % 100)
}

/// Like [`format_amount`] but drops `.00` on whole amounts.
pub fn format_amount_compact(minor: i64) -> String {
    if minor % 100 == 0 {
        let sign = if minor < 0 { "-" } else { "" };
        format!("{sign}{}", group_thousands(minor.unsigned_abs() / 100))
    } else {
        format_amount(minor)
    }
}

/// `123456` -> `"TSH 1,234.56"`.
pub fn format_tsh(minor: i64) -> String {
    format!("{CURRENCY} {}", format_amount(minor))
}

/// Parse a decimal string with at most two fractional digits into minor units.
///
/// Accepts thousands separators (`"1,000.5"`).
pub fn parse_amount(input: &str) -> Result<i64, PledgeError> {
    let cleaned: String = input.trim().chars().filter(|c| *c != ',').collect();
    let invalid = || PledgeError::validation("amount", format!("'{input}' is not a valid amount"));

    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.as_str()),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if fraction.len() > 2
        || !whole.chars().all(|c| c.is_ascii_digit())
        || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }

    let whole: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let fraction: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().map_err(|_| invalid())? * 10,
        _ => fraction.parse().map_err(|_| invalid())?,
    };

    let minor = whole
        .checked_mul(100)
        .and_then(|v| v.checked_add(fraction))
        .ok_or_else(invalid)?;
    Ok(if negative { -minor } else { minor })
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Amount as it arrives in a request body: an integer is already in minor
/// units, a string is a decimal shilling amount.
#[derive(Deserialize)]
#[serde(untagged)]
enum AmountInput {
    Minor(i64),
    Decimal(String),
}

impl AmountInput {
    fn into_minor(self) -> Result<i64, PledgeError> {
        match self {
            Self::Minor(minor) => Ok(minor),
            Self::Decimal(text) => parse_amount(&text),
        }
    }
}

/// `deserialize_with` helper for amount fields.
pub fn deserialize_amount<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    AmountInput::deserialize(deserializer)?
        .into_minor()
        .map_err(serde::de::Error::custom)
}

/// [`deserialize_amount`] for optional fields; pair it with `#[serde(default)]`.
pub fn deserialize_optional_amount<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<AmountInput>::deserialize(deserializer)?
        .map(AmountInput::into_minor)
        .transpose()
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_grouping() {
        assert_eq!(format_amount(0), "0.00");
        assert_eq!(format_amount(5), "0.05");
        assert_eq!(format_amount(123_456), "1,234.56");
        assert_eq!(format_amount(10_000_000_00), "10,000,000.00");
        assert_eq!(format_amount(-150), "-1.50");
        assert_eq!(format_tsh(10_000_000), "TSH 100,000.00");
    }

    #[test]
    fn compact_format_drops_whole_decimals() {
        assert_eq!(format_amount_compact(123_400), "1,234");
        assert_eq!(format_amount_compact(123_456), "1,234.56");
    }

    #[test]
    fn parses_decimal_strings() {
        assert_eq!(parse_amount("1234.56").unwrap(), 123_456);
        assert_eq!(parse_amount("1,000.5").unwrap(), 100_050);
        assert_eq!(parse_amount(" 50 ").unwrap(), 5_000);
        assert_eq!(parse_amount(".5").unwrap(), 50);
        assert_eq!(parse_amount("-2").unwrap(), -200);
    }

    #[test]
    fn rejects_malformed_amounts() {
        for bad in ["", ".", "1.234", "abc", "1.2.3", "12a"] {
            assert!(parse_amount(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn request_amounts_accept_minor_units_or_decimal_text() {
        use crate::types::{NewTransaction, PledgeUpdate};

        let minor: NewTransaction =
            serde_json::from_str(r#"{"pledge_id": 1, "amount": 5000, "method": "cash"}"#).unwrap();
        assert_eq!(minor.amount, 5_000);

        let decimal: NewTransaction =
            serde_json::from_str(r#"{"pledge_id": 1, "amount": "250.50", "method": "mpesa"}"#)
                .unwrap();
        assert_eq!(decimal.amount, 25_050);

        let bad = serde_json::from_str::<NewTransaction>(
            r#"{"pledge_id": 1, "amount": "12.345", "method": "cash"}"#,
        );
        assert!(bad.is_err());

        let untouched: PledgeUpdate = serde_json::from_str(r#"{"name": "Juma"}"#).unwrap();
        assert_eq!(untouched.pledge_amount, None);
        let raised: PledgeUpdate =
            serde_json::from_str(r#"{"pledge_amount": "1,000"}"#).unwrap();
        assert_eq!(raised.pledge_amount, Some(100_000));
    }
}
