//! Pledge and payment records.

use crate::error::{PledgeError, PledgeResult};
use crate::store::{
    EventStore, MessageStore, PledgeRecordStore, PledgeStore, TransactionStore,
};
use crate::types::{
    Message, MessageFilter, NewPledge, NewTransaction, Page, Pledge, PledgeFilter, PledgeId,
    PledgeStatus, PledgeUpdate, Transaction, TransactionFilter, TransactionKey,
};
use crate::validation;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

const NAME_MAX: usize = 200;

/// Pledge CRUD plus the payment ledger.
#[derive(Clone)]
pub struct PledgeService {
    store: Arc<dyn PledgeStore>,
}

impl PledgeService {
    pub fn new(store: Arc<dyn PledgeStore>) -> Self {
        Self { store }
    }

    pub async fn create_pledge(&self, input: NewPledge) -> PledgeResult<Pledge> {
        let input = NewPledge {
            event_id: input.event_id,
            name: validation::required("name", &input.name, NAME_MAX)?,
            mobile_number: validation::mobile_number(&input.mobile_number)?,
            pledge_amount: validation::non_negative("pledge_amount", input.pledge_amount)?,
            whatsapp: input.whatsapp,
        };
        self.store
            .get_event(input.event_id)
            .await?
            .ok_or_else(|| PledgeError::not_found("event", input.event_id))?;

        let pledge = self.store.insert_pledge(&input, Utc::now()).await?;
        info!(pledge_id = %pledge.id, event_id = %pledge.event_id, amount = pledge.pledge_amount, "Pledge created");
        Ok(pledge)
    }

    pub async fn get_pledge(&self, id: PledgeId) -> PledgeResult<Pledge> {
        self.store
            .get_pledge(id)
            .await?
            .ok_or_else(|| PledgeError::not_found("pledge", id))
    }

    /// Edit name, mobile, amount or WhatsApp flag.
    ///
    /// Status is not re-derived here; it only follows payments.
    pub async fn update_pledge(&self, id: PledgeId, update: PledgeUpdate) -> PledgeResult<Pledge> {
        let mut pledge = self.get_pledge(id).await?;
        if let Some(name) = update.name {
            pledge.name = validation::required("name", &name, NAME_MAX)?;
        }
        if let Some(mobile) = update.mobile_number {
            pledge.mobile_number = validation::mobile_number(&mobile)?;
        }
        if let Some(amount) = update.pledge_amount {
            pledge.pledge_amount = validation::non_negative("pledge_amount", amount)?;
        }
        if let Some(whatsapp) = update.whatsapp {
            pledge.whatsapp = whatsapp;
        }
        pledge.updated_at = Utc::now();
        self.store.save_pledge(&pledge).await?;
        Ok(pledge)
    }

    pub async fn delete_pledge(&self, id: PledgeId) -> PledgeResult<()> {
        if !self.store.delete_pledge(id).await? {
            return Err(PledgeError::not_found("pledge", id));
        }
        info!(pledge_id = %id, "Pledge deleted");
        Ok(())
    }

    /// Manual status override; any status is allowed.
    pub async fn set_status(&self, id: PledgeId, status: PledgeStatus) -> PledgeResult<Pledge> {
        let mut pledge = self.get_pledge(id).await?;
        let previous = pledge.status;
        pledge.status = status;
        pledge.updated_at = Utc::now();
        self.store.save_pledge(&pledge).await?;
        info!(
            pledge_id = %id,
            from = previous.as_str(),
            to = status.as_str(),
            "Pledge status changed"
        );
        Ok(pledge)
    }

    pub async fn set_whatsapp(&self, id: PledgeId, enabled: bool) -> PledgeResult<Pledge> {
        let mut pledge = self.get_pledge(id).await?;
        pledge.whatsapp = enabled;
        pledge.updated_at = Utc::now();
        self.store.save_pledge(&pledge).await?;
        Ok(pledge)
    }

    pub async fn list_pledges(
        &self,
        filter: &PledgeFilter,
        page: usize,
        per_page: usize,
    ) -> PledgeResult<Page<Pledge>> {
        let filter = PledgeFilter {
            search: filter
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            ..filter.clone()
        };
        let pledges = self.store.list_pledges(&filter).await?;
        Ok(Page::from_vec(pledges, page, per_page))
    }

    /// Record a payment and settle the pledge in one unit of work.
    pub async fn record_transaction(
        &self,
        input: NewTransaction,
    ) -> PledgeResult<(Transaction, Pledge)> {
        let amount = validation::non_negative("amount", input.amount)?;
        let reference =
            validation::transaction_reference(input.method, input.transaction_id.as_deref())?;

        let (transaction, pledge) = self
            .store
            .insert_transaction_and_settle(input.pledge_id, amount, input.method, &reference, Utc::now())
            .await?;
        info!(
            pledge_id = %pledge.id,
            transaction_id = %transaction.transaction_id,
            method = transaction.method.as_str(),
            amount,
            amount_paid = pledge.amount_paid,
            status = pledge.status.as_str(),
            "Payment recorded"
        );
        Ok((transaction, pledge))
    }

    pub async fn get_transaction(&self, id: TransactionKey) -> PledgeResult<Transaction> {
        self.store
            .get_transaction(id)
            .await?
            .ok_or_else(|| PledgeError::not_found("transaction", id))
    }

    pub async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: usize,
        per_page: usize,
    ) -> PledgeResult<Page<Transaction>> {
        let transactions = self.store.list_transactions(filter).await?;
        Ok(Page::from_vec(transactions, page, per_page))
    }

    /// Every payment of one pledge, newest first.
    pub async fn pledge_transactions(&self, id: PledgeId) -> PledgeResult<Vec<Transaction>> {
        self.get_pledge(id).await?;
        self.store
            .list_transactions(&TransactionFilter {
                pledge_id: Some(id),
                ..TransactionFilter::default()
            })
            .await
    }

    /// Every message of one pledge, newest first.
    pub async fn pledge_messages(&self, id: PledgeId) -> PledgeResult<Vec<Message>> {
        self.get_pledge(id).await?;
        self.store
            .list_messages(&MessageFilter {
                pledge_id: Some(id),
                ..MessageFilter::default()
            })
            .await
    }
}
