use crate::error::{PledgeError, PledgeResult};
use crate::types::PaymentMethod;
use regex::Regex;
use std::sync::LazyLock;
use uuid::Uuid;

/// Tanzanian mobile numbers: `+2557XXXXXXXX`, `2556XXXXXXXX`, `07XXXXXXXX`, ...
static TZ_MOBILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?255[67]\d{8}$|^\+?0[67]\d{8}$").expect("mobile number regex is valid")
});

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex is valid")
});

pub const CASH_PREFIX: &str = "CASH-";
pub const MIN_PASSWORD_LEN: usize = 8;

pub fn mobile_number(value: &str) -> PledgeResult<String> {
    let value = value.trim();
    if TZ_MOBILE.is_match(value) {
        Ok(value.to_string())
    } else {
        Err(PledgeError::validation(
            "mobile_number",
            "must be a valid Tanzanian number (e.g. +255712345678 or 0712345678)",
        ))
    }
}

/// Validate and normalize an email address (domain part lowercased).
pub fn email(value: &str) -> PledgeResult<String> {
    let value = value.trim();
    if !EMAIL.is_match(value) {
        return Err(PledgeError::validation("email", "enter a valid email address"));
    }
    Ok(normalize_email(value))
}

pub fn normalize_email(value: &str) -> String {
    match value.trim().rsplit_once('@') {
        Some((local, domain)) => format!("{local}@{}", domain.to_ascii_lowercase()),
        None => value.trim().to_string(),
    }
}

pub fn required(field: &'static str, value: &str, max_len: usize) -> PledgeResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(PledgeError::validation(field, "this field is required"));
    }
    if value.chars().count() > max_len {
        return Err(PledgeError::validation(
            field,
            format!("must be at most {max_len} characters"),
        ));
    }
    Ok(value.to_string())
}

pub fn non_negative(field: &'static str, amount: i64) -> PledgeResult<i64> {
    if amount < 0 {
        return Err(PledgeError::validation(field, "must not be negative"));
    }
    Ok(amount)
}

pub fn password(value: &str) -> PledgeResult<()> {
    if value.chars().count() < MIN_PASSWORD_LEN {
        return Err(PledgeError::validation(
            "password",
            format!("must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }
    Ok(())
}

/// Resolve the external reference for a payment.
///
/// Cash payments get a generated `CASH-XXXXXXXX` reference unless one with the
/// prefix was supplied; every other method must carry its own reference.
pub fn transaction_reference(
    method: PaymentMethod,
    supplied: Option<&str>,
) -> PledgeResult<String> {
    let supplied = supplied.map(str::trim).filter(|value| !value.is_empty());
    match (method, supplied) {
        (PaymentMethod::Cash, Some(reference)) if reference.starts_with(CASH_PREFIX) => {
            Ok(reference.to_string())
        }
        (PaymentMethod::Cash, _) => Ok(generate_cash_reference()),
        (_, Some(reference)) => required("transaction_id", reference, 100),
        (_, None) => Err(PledgeError::validation(
            "transaction_id",
            "a transaction ID is required for this payment method",
        )),
    }
}

fn generate_cash_reference() -> String {
    let short: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("{CASH_PREFIX}{}", short.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_tanzanian_numbers() {
        for ok in ["+255712345678", "255612345678", "0712345678", "+0612345678"] {
            assert!(mobile_number(ok).is_ok(), "{ok} should pass");
        }
        for bad in ["+254712345678", "0812345678", "07123456", "phone"] {
            assert!(mobile_number(bad).is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn email_domain_is_lowercased() {
        assert_eq!(email("Host@Example.COM").unwrap(), "Host@example.com");
        assert!(email("not-an-email").is_err());
    }

    #[test]
    fn cash_reference_is_generated_when_missing_or_unprefixed() {
        let generated = transaction_reference(PaymentMethod::Cash, None).unwrap();
        assert!(generated.starts_with("CASH-"));
        assert_eq!(generated.len(), CASH_PREFIX.len() + 8);
        assert_eq!(generated, generated.to_ascii_uppercase());

        let replaced = transaction_reference(PaymentMethod::Cash, Some("R-1")).unwrap();
        assert_ne!(replaced, "R-1");

        let kept = transaction_reference(PaymentMethod::Cash, Some("CASH-ABCD1234")).unwrap();
        assert_eq!(kept, "CASH-ABCD1234");
    }

    #[test]
    fn non_cash_requires_reference() {
        assert!(transaction_reference(PaymentMethod::Mpesa, None).is_err());
        assert!(transaction_reference(PaymentMethod::Mpesa, Some("  ")).is_err());
        assert_eq!(
            transaction_reference(PaymentMethod::Mpesa, Some("QK71XY")).unwrap(),
            "QK71XY"
        );
    }
}
