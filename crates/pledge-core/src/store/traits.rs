use crate::error::PledgeResult;
use crate::types::{
    Event, EventId, EventUser, Message, MessageFilter, MessageId, MessageMethod, MessageStatus,
    MessageTemplate, NewEvent, NewPledge, NewTemplate, PaymentMethod, Pledge, PledgeFilter,
    PledgeId, RegistrationDraft, RegistrationId, RegistrationRequest, TemplateFilter, TemplateId,
    Transaction, TransactionFilter, TransactionKey, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Storage interface for accounts.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, id: UserId) -> PledgeResult<Option<EventUser>>;

    /// Lookup by normalized email.
    async fn find_user_by_email(&self, email: &str) -> PledgeResult<Option<EventUser>>;

    /// Delete a user with their events, pledges, transactions and messages.
    ///
    /// Returns `false` when the user did not exist.
    async fn delete_user(&self, id: UserId) -> PledgeResult<bool>;

    async fn count_verified_users(&self) -> PledgeResult<usize>;
}

/// Storage interface for provisional sign-ups.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    async fn insert_registration(
        &self,
        draft: RegistrationDraft,
    ) -> PledgeResult<RegistrationRequest>;

    /// Unverified request holding `token`.
    async fn find_pending_registration(
        &self,
        token: &str,
    ) -> PledgeResult<Option<RegistrationRequest>>;

    /// Most recent unverified request for `email`.
    async fn find_pending_registration_by_email(
        &self,
        email: &str,
    ) -> PledgeResult<Option<RegistrationRequest>>;

    async fn replace_registration_token(
        &self,
        id: RegistrationId,
        token: &str,
    ) -> PledgeResult<RegistrationRequest>;

    /// Atomically create the verified user and their first event from a
    /// pending request, then mark the request verified.
    async fn complete_registration(
        &self,
        id: RegistrationId,
        now: DateTime<Utc>,
    ) -> PledgeResult<(EventUser, Event)>;
}

/// Storage interface for events.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_event(
        &self,
        owner: UserId,
        event: &NewEvent,
        now: DateTime<Utc>,
    ) -> PledgeResult<Event>;

    async fn get_event(&self, id: EventId) -> PledgeResult<Option<Event>>;

    async fn save_event(&self, event: &Event) -> PledgeResult<()>;

    /// All events owned by `owner`, latest date first, then by name.
    async fn list_events_for_user(&self, owner: UserId) -> PledgeResult<Vec<Event>>;

    async fn count_active_events(&self) -> PledgeResult<usize>;
}

/// Storage interface for pledges.
#[async_trait]
pub trait PledgeRecordStore: Send + Sync {
    async fn insert_pledge(&self, pledge: &NewPledge, now: DateTime<Utc>) -> PledgeResult<Pledge>;

    async fn get_pledge(&self, id: PledgeId) -> PledgeResult<Option<Pledge>>;

    async fn save_pledge(&self, pledge: &Pledge) -> PledgeResult<()>;

    /// Delete a pledge with its transactions and messages.
    async fn delete_pledge(&self, id: PledgeId) -> PledgeResult<bool>;

    /// Newest first.
    async fn list_pledges(&self, filter: &PledgeFilter) -> PledgeResult<Vec<Pledge>>;
}

/// Storage interface for payments.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a payment and, in the same unit of work, re-derive the pledge's
    /// `amount_paid` and status from all of its payments.
    async fn insert_transaction_and_settle(
        &self,
        pledge_id: PledgeId,
        amount: i64,
        method: PaymentMethod,
        reference: &str,
        now: DateTime<Utc>,
    ) -> PledgeResult<(Transaction, Pledge)>;

    async fn get_transaction(&self, id: TransactionKey) -> PledgeResult<Option<Transaction>>;

    /// Newest first.
    async fn list_transactions(&self, filter: &TransactionFilter)
        -> PledgeResult<Vec<Transaction>>;
}

/// Storage interface for outbound messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message(
        &self,
        pledge_id: PledgeId,
        body: &str,
        method: MessageMethod,
        status: MessageStatus,
        now: DateTime<Utc>,
    ) -> PledgeResult<Message>;

    async fn get_message(&self, id: MessageId) -> PledgeResult<Option<Message>>;

    async fn save_message(&self, message: &Message) -> PledgeResult<()>;

    /// Newest first.
    async fn list_messages(&self, filter: &MessageFilter) -> PledgeResult<Vec<Message>>;

    /// Oldest first, at most `limit`.
    async fn oldest_messages_with_status(
        &self,
        status: MessageStatus,
        limit: usize,
    ) -> PledgeResult<Vec<Message>>;

    /// Message count per status, optionally only those created at or after `since`.
    async fn message_counts(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> PledgeResult<BTreeMap<MessageStatus, usize>>;
}

/// Storage interface for message templates.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn insert_template(
        &self,
        template: &NewTemplate,
        name: &str,
        now: DateTime<Utc>,
    ) -> PledgeResult<MessageTemplate>;

    async fn get_template(&self, id: TemplateId) -> PledgeResult<Option<MessageTemplate>>;

    async fn save_template(&self, template: &MessageTemplate) -> PledgeResult<()>;

    async fn delete_template(&self, id: TemplateId) -> PledgeResult<bool>;

    /// Ordered by event (defaults first), kind, then name.
    async fn list_templates(&self, filter: &TemplateFilter) -> PledgeResult<Vec<MessageTemplate>>;
}

/// Unified storage bundle used by the engine.
pub trait PledgeStore:
    UserStore
    + RegistrationStore
    + EventStore
    + PledgeRecordStore
    + TransactionStore
    + MessageStore
    + TemplateStore
    + Send
    + Sync
{
    fn backend_label(&self) -> &'static str;
}
