//! Pledge balance and status bookkeeping.
//!
//! Invariants maintained on every transaction insert:
//! - `amount_paid` equals the sum of the pledge's transaction amounts.
//! - `completed` iff paid >= pledged, `partial` iff 0 < paid < pledged,
//!   otherwise the current status is kept.

use crate::error::{PledgeError, PledgeResult};
use crate::types::{Pledge, PledgeStatus, Transaction};
use chrono::{DateTime, Utc};

/// Status a pledge takes after its payments total `paid`.
pub fn derive_status(current: PledgeStatus, paid: i64, pledged: i64) -> PledgeStatus {
    if paid >= pledged {
        PledgeStatus::Completed
    } else if paid > 0 {
        PledgeStatus::Partial
    } else {
        current
    }
}

/// Sum of payment amounts. Fails instead of wrapping when the total leaves `i64`.
pub fn total_paid<'a>(
    transactions: impl IntoIterator<Item = &'a Transaction>,
) -> PledgeResult<i64> {
    transactions
        .into_iter()
        .try_fold(0i64, |total, tx| add_payment(total, tx.amount))
}

/// Running total after one more payment.
pub fn add_payment(total: i64, amount: i64) -> PledgeResult<i64> {
    total.checked_add(amount).ok_or_else(|| {
        PledgeError::validation("amount", "payment total exceeds the supported range")
    })
}

/// Re-derive `amount_paid` and `status` from the full payment total.
pub fn settle(pledge: &mut Pledge, paid: i64, now: DateTime<Utc>) {
    pledge.amount_paid = paid;
    pledge.status = derive_status(pledge.status, paid, pledge.pledge_amount);
    pledge.updated_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventId, PaymentMethod, PledgeId, TransactionKey};

    fn pledge(amount: i64, status: PledgeStatus) -> Pledge {
        let now = Utc::now();
        Pledge {
            id: PledgeId(7),
            event_id: EventId(1),
            name: "Juma Ally".to_string(),
            mobile_number: "0712345678".to_string(),
            pledge_amount: amount,
            amount_paid: 0,
            status,
            whatsapp: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn tx(key: i64, amount: i64) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: TransactionKey(key),
            pledge_id: PledgeId(7),
            amount,
            method: PaymentMethod::Mpesa,
            transaction_id: format!("MP-{key}"),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn partial_then_completed() {
        let mut p = pledge(100_000, PledgeStatus::Pending);
        let mut payments = vec![tx(1, 40_000)];

        settle(&mut p, total_paid(&payments).unwrap(), Utc::now());
        assert_eq!(p.amount_paid, 40_000);
        assert_eq!(p.status, PledgeStatus::Partial);

        payments.push(tx(2, 60_000));
        settle(&mut p, total_paid(&payments).unwrap(), Utc::now());
        assert_eq!(p.amount_paid, 100_000);
        assert_eq!(p.status, PledgeStatus::Completed);
        assert_eq!(p.balance(), 0);
    }

    #[test]
    fn overpayment_completes() {
        assert_eq!(
            derive_status(PledgeStatus::New, 150, 100),
            PledgeStatus::Completed
        );
    }

    #[test]
    fn zero_total_keeps_existing_status() {
        for status in PledgeStatus::ALL {
            assert_eq!(derive_status(status, 0, 100), status);
        }
        // A new pledge with only a zero payment stays `new`.
        let mut p = pledge(5_000, PledgeStatus::New);
        settle(&mut p, total_paid(&[tx(1, 0)]).unwrap(), Utc::now());
        assert_eq!(p.status, PledgeStatus::New);
    }

    #[test]
    fn zero_amount_pledge_counts_as_completed() {
        assert_eq!(
            derive_status(PledgeStatus::New, 0, 0),
            PledgeStatus::Completed
        );
    }

    #[test]
    fn overflowing_total_is_rejected() {
        let half = i64::MAX / 2 + 1;
        assert!(matches!(
            total_paid(&[tx(1, half), tx(2, half)]),
            Err(PledgeError::Validation { field: "amount", .. })
        ));
        assert_eq!(add_payment(40, 60).unwrap(), 100);
    }
}
