//! Pledge tracking and donor messaging.
//!
//! Event organisers record pledges, log payments against them and keep donors
//! informed through SMS, WhatsApp or email. Every pledge's paid amount and
//! status are derived from its payments; messages move through a queue with
//! explicit delivery status.

#![deny(unsafe_code)]

pub mod accounts;
pub mod channels;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod money;
pub mod pledges;
pub mod reminders;
pub mod stats;
pub mod store;
pub mod template;
pub mod templates;
pub mod types;
pub mod validation;

#[cfg(test)]
mod testing;

pub use accounts::{
    RegistrationConfig, RegistrationOutcome, RegistrationService, RegistrationSubmission,
    VerificationMailer, VerifiedAccount,
};
pub use channels::{ChannelReceipt, ChannelRegistry, MessageChannel};
pub use dispatch::{
    BulkSendReport, DispatchConfig, MessageDispatcher, ProcessReport, QueueStats, SendOutcome,
};
pub use engine::{PledgeEngine, PledgeEngineConfig};
pub use error::{PledgeError, PledgeResult};
pub use events::EventService;
pub use pledges::PledgeService;
pub use reminders::{ReminderOverview, ReminderRun, ReminderService};
pub use stats::{DashboardStats, EventSummary, StatsService};
pub use store::{open_store, InMemoryPledgeStore, PledgeStore, StorageConfig};
pub use template::{TemplateValues, PLACEHOLDERS};
pub use templates::{TemplatePreview, TemplateService};
pub use types::{
    Event, EventId, EventUpdate, EventUser, Message, MessageFilter, MessageId, MessageMethod,
    MessageStatus, MessageTemplate, NewEvent, NewPledge, NewTemplate, NewTransaction, Page,
    PaymentMethod, Pledge, PledgeFilter, PledgeId, PledgeStatus, PledgeUpdate, RegistrationId,
    RegistrationRequest, TemplateFilter, TemplateId, TemplateKind, TemplateUpdate, Transaction,
    TransactionFilter, TransactionKey, UserId, DEFAULT_PER_PAGE,
};
