//! Event summaries and global dashboard figures.

use crate::error::PledgeResult;
use crate::store::{MessageStore, PledgeRecordStore, PledgeStore, TransactionStore};
use crate::types::{
    Event, Pledge, PledgeFilter, PledgeStatus, Transaction, TransactionFilter,
};
use serde::Serialize;
use std::sync::Arc;

const RECENT_LIMIT: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct EventSummary {
    pub event: Event,
    pub total_pledges: usize,
    pub total_pledged: i128,
    pub total_paid: i128,
    /// Pledges that are `new`, `pending` or `partial`.
    pub open_pledges: usize,
    pub recent_pledges: Vec<Pledge>,
    pub recent_transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_pledges: usize,
    pub total_pledged: i128,
    pub total_paid: i128,
    pub open_pledges: usize,
    pub completed_pledges: usize,
    pub cancelled_pledges: usize,
    pub total_transactions: usize,
    pub total_messages: usize,
    pub active_events: usize,
    pub verified_users: usize,
    /// Paid over pledged, in percent with two decimals.
    pub completion_percentage: f64,
}

#[derive(Clone)]
pub struct StatsService {
    store: Arc<dyn PledgeStore>,
}

impl StatsService {
    pub fn new(store: Arc<dyn PledgeStore>) -> Self {
        Self { store }
    }

    pub async fn event_summary(&self, event: Event) -> PledgeResult<EventSummary> {
        let pledges = self
            .store
            .list_pledges(&PledgeFilter {
                event_id: Some(event.id),
                ..PledgeFilter::default()
            })
            .await?;
        let mut recent_transactions = self
            .store
            .list_transactions(&TransactionFilter {
                event_id: Some(event.id),
                ..TransactionFilter::default()
            })
            .await?;
        recent_transactions.truncate(RECENT_LIMIT);

        Ok(EventSummary {
            total_pledges: pledges.len(),
            total_pledged: sum_amounts(pledges.iter().map(|p| p.pledge_amount)),
            total_paid: sum_amounts(pledges.iter().map(|p| p.amount_paid)),
            open_pledges: pledges.iter().filter(|p| p.status.is_open()).count(),
            recent_pledges: pledges.into_iter().take(RECENT_LIMIT).collect(),
            recent_transactions,
            event,
        })
    }

    pub async fn dashboard_stats(&self) -> PledgeResult<DashboardStats> {
        let pledges = self.store.list_pledges(&PledgeFilter::default()).await?;
        let total_transactions = self
            .store
            .list_transactions(&TransactionFilter::default())
            .await?
            .len();
        let total_messages: usize = self.store.message_counts(None).await?.values().sum();

        let total_pledged = sum_amounts(pledges.iter().map(|p| p.pledge_amount));
        let total_paid = sum_amounts(pledges.iter().map(|p| p.amount_paid));
        let count = |status: PledgeStatus| pledges.iter().filter(|p| p.status == status).count();

        Ok(DashboardStats {
            total_pledges: pledges.len(),
            total_pledged,
            total_paid,
            open_pledges: pledges.iter().filter(|p| p.status.is_open()).count(),
            completed_pledges: count(PledgeStatus::Completed),
            cancelled_pledges: count(PledgeStatus::Cancelled),
            total_transactions,
            total_messages,
            active_events: self.store.count_active_events().await?,
            verified_users: self.store.count_verified_users().await?,
            completion_percentage: completion_percentage(total_paid, total_pledged),
        })
    }
}

/// Totals across many pledges are widened so they cannot overflow.
fn sum_amounts(amounts: impl Iterator<Item = i64>) -> i128 {
    amounts.map(i128::from).sum()
}

pub fn completion_percentage(paid: i128, pledged: i128) -> f64 {
    if pledged <= 0 {
        return 0.0;
    }
    (paid as f64 / pledged as f64 * 10_000.0).round() / 100.0
}
