//! In-memory reference implementation of the storage traits.
//!
//! All records live behind a single lock, so every multi-record operation
//! (payment settlement, registration completion, cascades) is atomic.

use super::traits::{
    EventStore, MessageStore, PledgeRecordStore, PledgeStore, RegistrationStore, TemplateStore,
    TransactionStore, UserStore,
};
use crate::error::{PledgeError, PledgeResult};
use crate::ledger;
use crate::types::{
    Event, EventId, EventUser, Message, MessageFilter, MessageId, MessageMethod, MessageStatus,
    MessageTemplate, NewEvent, NewPledge, NewTemplate, PaymentMethod, Pledge, PledgeFilter,
    PledgeId, PledgeStatus, RegistrationDraft, RegistrationId, RegistrationRequest,
    TemplateFilter, TemplateId, Transaction, TransactionFilter, TransactionKey, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct MemoryState {
    last_id: i64,
    users: BTreeMap<UserId, EventUser>,
    events: BTreeMap<EventId, Event>,
    pledges: BTreeMap<PledgeId, Pledge>,
    transactions: BTreeMap<TransactionKey, Transaction>,
    messages: BTreeMap<MessageId, Message>,
    templates: BTreeMap<TemplateId, MessageTemplate>,
    registrations: BTreeMap<RegistrationId, RegistrationRequest>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn remove_pledge_cascade(&mut self, id: PledgeId) -> bool {
        self.transactions.retain(|_, tx| tx.pledge_id != id);
        self.messages.retain(|_, message| message.pledge_id != id);
        self.pledges.remove(&id).is_some()
    }

    fn pledge_event(&self, id: PledgeId) -> Option<EventId> {
        self.pledges.get(&id).map(|pledge| pledge.event_id)
    }
}

/// In-memory pledge store.
#[derive(Debug, Default)]
pub struct InMemoryPledgeStore {
    state: RwLock<MemoryState>,
}

impl InMemoryPledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> PledgeResult<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| PledgeError::lock_poisoned("memory store"))
    }

    fn write(&self) -> PledgeResult<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| PledgeError::lock_poisoned("memory store"))
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[async_trait]
impl UserStore for InMemoryPledgeStore {
    async fn get_user(&self, id: UserId) -> PledgeResult<Option<EventUser>> {
        Ok(self.read()?.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> PledgeResult<Option<EventUser>> {
        Ok(self
            .read()?
            .users
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn delete_user(&self, id: UserId) -> PledgeResult<bool> {
        let mut state = self.write()?;
        if state.users.remove(&id).is_none() {
            return Ok(false);
        }

        let owned_events: Vec<EventId> = state
            .events
            .values()
            .filter(|event| event.created_by == id)
            .map(|event| event.id)
            .collect();
        let owned_pledges: Vec<PledgeId> = state
            .pledges
            .values()
            .filter(|pledge| owned_events.contains(&pledge.event_id))
            .map(|pledge| pledge.id)
            .collect();

        for pledge_id in owned_pledges {
            state.remove_pledge_cascade(pledge_id);
        }
        state
            .templates
            .retain(|_, template| !matches!(template.event_id, Some(e) if owned_events.contains(&e)));
        for event_id in owned_events {
            state.events.remove(&event_id);
        }
        Ok(true)
    }

    async fn count_verified_users(&self) -> PledgeResult<usize> {
        Ok(self
            .read()?
            .users
            .values()
            .filter(|user| user.is_verified)
            .count())
    }
}

#[async_trait]
impl RegistrationStore for InMemoryPledgeStore {
    async fn insert_registration(
        &self,
        draft: RegistrationDraft,
    ) -> PledgeResult<RegistrationRequest> {
        let mut state = self.write()?;
        if state
            .registrations
            .values()
            .any(|r| r.verification_token == draft.verification_token)
        {
            return Err(PledgeError::Conflict(
                "verification token already issued".to_string(),
            ));
        }

        let request = RegistrationRequest {
            id: RegistrationId(state.next_id()),
            full_name: draft.full_name,
            email: draft.email,
            password_hash: draft.password_hash,
            mobile_number: draft.mobile_number,
            event_name: draft.event_name,
            event_date: draft.event_date,
            verification_token: draft.verification_token,
            is_verified: false,
            privacy_agreement_accepted: draft.privacy_agreement_accepted,
            marketing_consent: draft.marketing_consent,
            created_at: draft.created_at,
            expires_at: draft.expires_at,
        };
        state.registrations.insert(request.id, request.clone());
        Ok(request)
    }

    async fn find_pending_registration(
        &self,
        token: &str,
    ) -> PledgeResult<Option<RegistrationRequest>> {
        Ok(self
            .read()?
            .registrations
            .values()
            .find(|r| !r.is_verified && r.verification_token == token)
            .cloned())
    }

    async fn find_pending_registration_by_email(
        &self,
        email: &str,
    ) -> PledgeResult<Option<RegistrationRequest>> {
        Ok(self
            .read()?
            .registrations
            .values()
            .filter(|r| !r.is_verified && r.email == email)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn replace_registration_token(
        &self,
        id: RegistrationId,
        token: &str,
    ) -> PledgeResult<RegistrationRequest> {
        let mut state = self.write()?;
        if state
            .registrations
            .values()
            .any(|r| r.id != id && r.verification_token == token)
        {
            return Err(PledgeError::Conflict(
                "verification token already issued".to_string(),
            ));
        }
        let request = state
            .registrations
            .get_mut(&id)
            .ok_or_else(|| PledgeError::not_found("registration", id))?;
        request.verification_token = token.to_string();
        Ok(request.clone())
    }

    async fn complete_registration(
        &self,
        id: RegistrationId,
        now: DateTime<Utc>,
    ) -> PledgeResult<(EventUser, Event)> {
        let mut state = self.write()?;
        let request = state
            .registrations
            .get(&id)
            .filter(|r| !r.is_verified)
            .cloned()
            .ok_or_else(|| PledgeError::not_found("registration", id))?;

        if state.users.values().any(|u| u.email == request.email) {
            return Err(PledgeError::Conflict(format!(
                "an account for {} already exists",
                request.email
            )));
        }

        let user = EventUser {
            id: UserId(state.next_id()),
            email: request.email.clone(),
            full_name: request.full_name.clone(),
            mobile_number: request.mobile_number.clone(),
            password_hash: request.password_hash.clone(),
            is_verified: true,
            is_active: true,
            is_staff: false,
            privacy_agreement_accepted: request.privacy_agreement_accepted,
            marketing_consent: request.marketing_consent,
            privacy_accepted_at: request.privacy_agreement_accepted.then_some(now),
            date_joined: now,
        };
        let event = Event {
            id: EventId(state.next_id()),
            name: request.event_name.clone(),
            date: request.event_date,
            description: String::new(),
            location: String::new(),
            created_by: user.id,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        state.users.insert(user.id, user.clone());
        state.events.insert(event.id, event.clone());
        if let Some(stored) = state.registrations.get_mut(&id) {
            stored.is_verified = true;
        }
        Ok((user, event))
    }
}

#[async_trait]
impl EventStore for InMemoryPledgeStore {
    async fn insert_event(
        &self,
        owner: UserId,
        event: &NewEvent,
        now: DateTime<Utc>,
    ) -> PledgeResult<Event> {
        let mut state = self.write()?;
        if !state.users.contains_key(&owner) {
            return Err(PledgeError::not_found("user", owner));
        }
        let event = Event {
            id: EventId(state.next_id()),
            name: event.name.clone(),
            date: event.date,
            description: event.description.clone(),
            location: event.location.clone(),
            created_by: owner,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.events.insert(event.id, event.clone());
        Ok(event)
    }

    async fn get_event(&self, id: EventId) -> PledgeResult<Option<Event>> {
        Ok(self.read()?.events.get(&id).cloned())
    }

    async fn save_event(&self, event: &Event) -> PledgeResult<()> {
        let mut state = self.write()?;
        let stored = state
            .events
            .get_mut(&event.id)
            .ok_or_else(|| PledgeError::not_found("event", event.id))?;
        *stored = event.clone();
        Ok(())
    }

    async fn list_events_for_user(&self, owner: UserId) -> PledgeResult<Vec<Event>> {
        let mut events: Vec<Event> = self
            .read()?
            .events
            .values()
            .filter(|event| event.created_by == owner)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.name.cmp(&b.name)));
        Ok(events)
    }

    async fn count_active_events(&self) -> PledgeResult<usize> {
        Ok(self
            .read()?
            .events
            .values()
            .filter(|event| event.is_active)
            .count())
    }
}

#[async_trait]
impl PledgeRecordStore for InMemoryPledgeStore {
    async fn insert_pledge(&self, pledge: &NewPledge, now: DateTime<Utc>) -> PledgeResult<Pledge> {
        let mut state = self.write()?;
        if !state.events.contains_key(&pledge.event_id) {
            return Err(PledgeError::not_found("event", pledge.event_id));
        }
        let pledge = Pledge {
            id: PledgeId(state.next_id()),
            event_id: pledge.event_id,
            name: pledge.name.clone(),
            mobile_number: pledge.mobile_number.clone(),
            pledge_amount: pledge.pledge_amount,
            amount_paid: 0,
            status: PledgeStatus::New,
            whatsapp: pledge.whatsapp,
            created_at: now,
            updated_at: now,
        };
        state.pledges.insert(pledge.id, pledge.clone());
        Ok(pledge)
    }

    async fn get_pledge(&self, id: PledgeId) -> PledgeResult<Option<Pledge>> {
        Ok(self.read()?.pledges.get(&id).cloned())
    }

    async fn save_pledge(&self, pledge: &Pledge) -> PledgeResult<()> {
        let mut state = self.write()?;
        let stored = state
            .pledges
            .get_mut(&pledge.id)
            .ok_or_else(|| PledgeError::not_found("pledge", pledge.id))?;
        *stored = pledge.clone();
        Ok(())
    }

    async fn delete_pledge(&self, id: PledgeId) -> PledgeResult<bool> {
        Ok(self.write()?.remove_pledge_cascade(id))
    }

    async fn list_pledges(&self, filter: &PledgeFilter) -> PledgeResult<Vec<Pledge>> {
        let state = self.read()?;
        let mut pledges: Vec<Pledge> = state
            .pledges
            .values()
            .filter(|p| filter.event_id.map_or(true, |e| p.event_id == e))
            .filter(|p| filter.status.map_or(true, |s| p.status == s))
            .filter(|p| {
                filter
                    .search
                    .as_deref()
                    .map_or(true, |needle| contains_ci(&p.name, needle))
            })
            .cloned()
            .collect();
        pledges.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(pledges)
    }
}

#[async_trait]
impl TransactionStore for InMemoryPledgeStore {
    async fn insert_transaction_and_settle(
        &self,
        pledge_id: PledgeId,
        amount: i64,
        method: PaymentMethod,
        reference: &str,
        now: DateTime<Utc>,
    ) -> PledgeResult<(Transaction, Pledge)> {
        let mut state = self.write()?;
        if !state.pledges.contains_key(&pledge_id) {
            return Err(PledgeError::not_found("pledge", pledge_id));
        }
        if state
            .transactions
            .values()
            .any(|tx| tx.transaction_id == reference)
        {
            return Err(PledgeError::Conflict(format!(
                "transaction ID {reference} already recorded"
            )));
        }

        let paid = ledger::total_paid(
            state
                .transactions
                .values()
                .filter(|tx| tx.pledge_id == pledge_id),
        )?;
        let paid = ledger::add_payment(paid, amount)?;

        let transaction = Transaction {
            id: TransactionKey(state.next_id()),
            pledge_id,
            amount,
            method,
            transaction_id: reference.to_string(),
            created_at: now,
            updated_at: now,
        };
        state.transactions.insert(transaction.id, transaction.clone());

        let pledge = state
            .pledges
            .get_mut(&pledge_id)
            .ok_or_else(|| PledgeError::not_found("pledge", pledge_id))?;
        ledger::settle(pledge, paid, now);
        Ok((transaction, pledge.clone()))
    }

    async fn get_transaction(&self, id: TransactionKey) -> PledgeResult<Option<Transaction>> {
        Ok(self.read()?.transactions.get(&id).cloned())
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> PledgeResult<Vec<Transaction>> {
        let state = self.read()?;
        let mut transactions: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|tx| filter.pledge_id.map_or(true, |p| tx.pledge_id == p))
            .filter(|tx| {
                filter
                    .event_id
                    .map_or(true, |e| state.pledge_event(tx.pledge_id) == Some(e))
            })
            .filter(|tx| filter.method.map_or(true, |m| tx.method == m))
            .filter(|tx| {
                filter
                    .search
                    .as_deref()
                    .map_or(true, |needle| contains_ci(&tx.transaction_id, needle))
            })
            .cloned()
            .collect();
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(transactions)
    }
}

#[async_trait]
impl MessageStore for InMemoryPledgeStore {
    async fn insert_message(
        &self,
        pledge_id: PledgeId,
        body: &str,
        method: MessageMethod,
        status: MessageStatus,
        now: DateTime<Utc>,
    ) -> PledgeResult<Message> {
        let mut state = self.write()?;
        if !state.pledges.contains_key(&pledge_id) {
            return Err(PledgeError::not_found("pledge", pledge_id));
        }
        let message = Message {
            id: MessageId(state.next_id()),
            pledge_id,
            body: body.to_string(),
            method,
            status,
            attempts: 0,
            created_at: now,
            updated_at: now,
        };
        state.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn get_message(&self, id: MessageId) -> PledgeResult<Option<Message>> {
        Ok(self.read()?.messages.get(&id).cloned())
    }

    async fn save_message(&self, message: &Message) -> PledgeResult<()> {
        let mut state = self.write()?;
        let stored = state
            .messages
            .get_mut(&message.id)
            .ok_or_else(|| PledgeError::not_found("message", message.id))?;
        *stored = message.clone();
        Ok(())
    }

    async fn list_messages(&self, filter: &MessageFilter) -> PledgeResult<Vec<Message>> {
        let state = self.read()?;
        let mut messages: Vec<Message> = state
            .messages
            .values()
            .filter(|m| filter.pledge_id.map_or(true, |p| m.pledge_id == p))
            .filter(|m| {
                filter
                    .event_id
                    .map_or(true, |e| state.pledge_event(m.pledge_id) == Some(e))
            })
            .filter(|m| filter.status.map_or(true, |s| m.status == s))
            .filter(|m| filter.method.map_or(true, |method| m.method == method))
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(messages)
    }

    async fn oldest_messages_with_status(
        &self,
        status: MessageStatus,
        limit: usize,
    ) -> PledgeResult<Vec<Message>> {
        let state = self.read()?;
        let mut messages: Vec<Message> = state
            .messages
            .values()
            .filter(|m| m.status == status)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        messages.truncate(limit);
        Ok(messages)
    }

    async fn message_counts(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> PledgeResult<BTreeMap<MessageStatus, usize>> {
        let state = self.read()?;
        let mut counts = BTreeMap::new();
        for message in state
            .messages
            .values()
            .filter(|m| since.map_or(true, |since| m.created_at >= since))
        {
            *counts.entry(message.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[async_trait]
impl TemplateStore for InMemoryPledgeStore {
    async fn insert_template(
        &self,
        template: &NewTemplate,
        name: &str,
        now: DateTime<Utc>,
    ) -> PledgeResult<MessageTemplate> {
        let mut state = self.write()?;
        if let Some(event_id) = template.event_id {
            if !state.events.contains_key(&event_id) {
                return Err(PledgeError::not_found("event", event_id));
            }
        }
        let template = MessageTemplate {
            id: TemplateId(state.next_id()),
            event_id: template.event_id,
            body: template.body.clone(),
            kind: template.kind,
            name: name.to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.templates.insert(template.id, template.clone());
        Ok(template)
    }

    async fn get_template(&self, id: TemplateId) -> PledgeResult<Option<MessageTemplate>> {
        Ok(self.read()?.templates.get(&id).cloned())
    }

    async fn save_template(&self, template: &MessageTemplate) -> PledgeResult<()> {
        let mut state = self.write()?;
        let stored = state
            .templates
            .get_mut(&template.id)
            .ok_or_else(|| PledgeError::not_found("template", template.id))?;
        *stored = template.clone();
        Ok(())
    }

    async fn delete_template(&self, id: TemplateId) -> PledgeResult<bool> {
        Ok(self.write()?.templates.remove(&id).is_some())
    }

    async fn list_templates(&self, filter: &TemplateFilter) -> PledgeResult<Vec<MessageTemplate>> {
        let state = self.read()?;
        let mut templates: Vec<MessageTemplate> = state
            .templates
            .values()
            .filter(|t| filter.event_id.map_or(true, |e| t.event_id == Some(e)))
            .filter(|t| filter.kind.map_or(true, |k| t.kind == k))
            .filter(|t| filter.active.map_or(true, |a| t.is_active == a))
            .cloned()
            .collect();
        templates.sort_by(|a, b| {
            a.event_id
                .cmp(&b.event_id)
                .then(a.kind.cmp(&b.kind))
                .then_with(|| a.name.cmp(&b.name))
                .then(a.id.cmp(&b.id))
        });
        Ok(templates)
    }
}

impl PledgeStore for InMemoryPledgeStore {
    fn backend_label(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn seeded() -> (InMemoryPledgeStore, Event) {
        let store = InMemoryPledgeStore::new();
        let now = Utc::now();
        let registration = store
            .insert_registration(RegistrationDraft {
                full_name: "Neema Kweka".to_string(),
                email: "neema@example.com".to_string(),
                password_hash: "hash".to_string(),
                mobile_number: "0712345678".to_string(),
                event_name: "Harusi ya Neema".to_string(),
                event_date: now + Duration::days(30),
                verification_token: "token-1".to_string(),
                privacy_agreement_accepted: true,
                marketing_consent: false,
                created_at: now,
                expires_at: now + Duration::hours(24),
            })
            .await
            .unwrap();
        let (_, event) = store
            .complete_registration(registration.id, now)
            .await
            .unwrap();
        (store, event)
    }

    fn new_pledge(event_id: EventId, name: &str, amount: i64) -> NewPledge {
        NewPledge {
            event_id,
            name: name.to_string(),
            mobile_number: "+255712345678".to_string(),
            pledge_amount: amount,
            whatsapp: false,
        }
    }

    #[tokio::test]
    async fn settlement_tracks_sum_of_payments() {
        let (store, event) = seeded().await;
        let pledge = store
            .insert_pledge(&new_pledge(event.id, "Baraka", 100_000), Utc::now())
            .await
            .unwrap();

        let (_, after_first) = store
            .insert_transaction_and_settle(pledge.id, 30_000, PaymentMethod::Mpesa, "MP1", Utc::now())
            .await
            .unwrap();
        assert_eq!(after_first.amount_paid, 30_000);
        assert_eq!(after_first.status, PledgeStatus::Partial);

        let (_, after_second) = store
            .insert_transaction_and_settle(pledge.id, 70_000, PaymentMethod::Cash, "CASH-1", Utc::now())
            .await
            .unwrap();
        assert_eq!(after_second.amount_paid, 100_000);
        assert_eq!(after_second.status, PledgeStatus::Completed);

        let stored = store.get_pledge(pledge.id).await.unwrap().unwrap();
        assert_eq!(stored.amount_paid, 100_000);
    }

    #[tokio::test]
    async fn duplicate_reference_is_a_conflict_and_leaves_pledge_untouched() {
        let (store, event) = seeded().await;
        let pledge = store
            .insert_pledge(&new_pledge(event.id, "Baraka", 100_000), Utc::now())
            .await
            .unwrap();
        store
            .insert_transaction_and_settle(pledge.id, 10_000, PaymentMethod::Mpesa, "MP1", Utc::now())
            .await
            .unwrap();

        let err = store
            .insert_transaction_and_settle(pledge.id, 10_000, PaymentMethod::Mpesa, "MP1", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, PledgeError::Conflict(_)));

        let stored = store.get_pledge(pledge.id).await.unwrap().unwrap();
        assert_eq!(stored.amount_paid, 10_000);
    }

    #[tokio::test]
    async fn deleting_a_pledge_cascades() {
        let (store, event) = seeded().await;
        let pledge = store
            .insert_pledge(&new_pledge(event.id, "Baraka", 100_000), Utc::now())
            .await
            .unwrap();
        store
            .insert_transaction_and_settle(pledge.id, 10_000, PaymentMethod::Mpesa, "MP1", Utc::now())
            .await
            .unwrap();
        store
            .insert_message(pledge.id, "hello", MessageMethod::Sms, MessageStatus::Queued, Utc::now())
            .await
            .unwrap();

        assert!(store.delete_pledge(pledge.id).await.unwrap());
        assert!(store
            .list_transactions(&TransactionFilter::default())
            .await
            .unwrap()
            .is_empty());
        assert!(store
            .list_messages(&MessageFilter::default())
            .await
            .unwrap()
            .is_empty());
        assert!(!store.delete_pledge(pledge.id).await.unwrap());
    }

    #[tokio::test]
    async fn deleting_a_user_removes_their_events_and_pledges() {
        let (store, event) = seeded().await;
        store
            .insert_pledge(&new_pledge(event.id, "Baraka", 100_000), Utc::now())
            .await
            .unwrap();

        assert!(store.delete_user(event.created_by).await.unwrap());
        assert!(store.get_event(event.id).await.unwrap().is_none());
        assert!(store
            .list_pledges(&PledgeFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn pledge_search_is_case_insensitive_and_newest_first() {
        let (store, event) = seeded().await;
        let base = Utc::now();
        store
            .insert_pledge(&new_pledge(event.id, "Mama Halima", 1_000), base)
            .await
            .unwrap();
        store
            .insert_pledge(
                &new_pledge(event.id, "Halima Said", 2_000),
                base + Duration::seconds(5),
            )
            .await
            .unwrap();
        store
            .insert_pledge(&new_pledge(event.id, "Joseph", 3_000), base)
            .await
            .unwrap();

        let found = store
            .list_pledges(&PledgeFilter {
                event_id: Some(event.id),
                search: Some("HALIMA".to_string()),
                status: None,
            })
            .await
            .unwrap();
        let names: Vec<&str> = found.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Halima Said", "Mama Halima"]);
    }

    #[tokio::test]
    async fn completed_registration_cannot_be_completed_twice() {
        let store = InMemoryPledgeStore::new();
        let now = Utc::now();
        let request = store
            .insert_registration(RegistrationDraft {
                full_name: "A".to_string(),
                email: "a@example.com".to_string(),
                password_hash: "h".to_string(),
                mobile_number: "0712345678".to_string(),
                event_name: "E".to_string(),
                event_date: now,
                verification_token: "t".to_string(),
                privacy_agreement_accepted: true,
                marketing_consent: true,
                created_at: now,
                expires_at: now + Duration::hours(24),
            })
            .await
            .unwrap();

        let (user, event) = store.complete_registration(request.id, now).await.unwrap();
        assert!(user.is_verified && user.is_active);
        assert_eq!(user.privacy_accepted_at, Some(now));
        assert_eq!(event.created_by, user.id);
        assert!(store.find_pending_registration("t").await.unwrap().is_none());
        assert!(matches!(
            store.complete_registration(request.id, now).await,
            Err(PledgeError::NotFound { .. })
        ));
    }
}
