use crate::error::PledgeError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

record_id!(
    /// Primary key of an [`EventUser`].
    UserId
);
record_id!(
    /// Primary key of an [`Event`].
    EventId
);
record_id!(
    /// Primary key of a [`Pledge`].
    PledgeId
);
record_id!(
    /// Primary key of a [`Transaction`] row (not the external transaction reference).
    TransactionKey
);
record_id!(
    /// Primary key of a [`Message`].
    MessageId
);
record_id!(
    /// Primary key of a [`MessageTemplate`].
    TemplateId
);
record_id!(
    /// Primary key of a [`RegistrationRequest`].
    RegistrationId
);

/// Lifecycle of a pledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PledgeStatus {
    #[default]
    New,
    Pending,
    Partial,
    Completed,
    Cancelled,
}

impl PledgeStatus {
    pub const ALL: [PledgeStatus; 5] = [
        PledgeStatus::New,
        PledgeStatus::Pending,
        PledgeStatus::Partial,
        PledgeStatus::Completed,
        PledgeStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Pending => "pending",
            Self::Partial => "partial",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Pending => "Pending",
            Self::Partial => "Partial Payment",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Statuses that still expect money to come in.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::New | Self::Pending | Self::Partial)
    }
}

impl FromStr for PledgeStatus {
    type Err = PledgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| PledgeError::validation("status", format!("unknown status '{value}'")))
    }
}

/// How a payment was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Mpesa,
    #[serde(rename = "tigopesa")]
    TigoPesa,
    #[serde(rename = "airtelmoney")]
    AirtelMoney,
    BankTransfer,
    Card,
    Cheque,
    Other,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 8] = [
        PaymentMethod::Cash,
        PaymentMethod::Mpesa,
        PaymentMethod::TigoPesa,
        PaymentMethod::AirtelMoney,
        PaymentMethod::BankTransfer,
        PaymentMethod::Card,
        PaymentMethod::Cheque,
        PaymentMethod::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Mpesa => "mpesa",
            Self::TigoPesa => "tigopesa",
            Self::AirtelMoney => "airtelmoney",
            Self::BankTransfer => "bank_transfer",
            Self::Card => "card",
            Self::Cheque => "cheque",
            Self::Other => "other",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Cash => "Cash",
            Self::Mpesa => "M-Pesa",
            Self::TigoPesa => "Tigo Pesa",
            Self::AirtelMoney => "Airtel Money",
            Self::BankTransfer => "Bank Transfer",
            Self::Card => "Card Payment",
            Self::Cheque => "Cheque",
            Self::Other => "Other",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = PledgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|method| method.as_str() == value)
            .ok_or_else(|| {
                PledgeError::validation("method", format!("unknown payment method '{value}'"))
            })
    }
}

/// Outbound communication channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageMethod {
    Sms,
    Whatsapp,
    Email,
    VoiceCall,
    InPerson,
}

impl MessageMethod {
    pub const ALL: [MessageMethod; 5] = [
        MessageMethod::Sms,
        MessageMethod::Whatsapp,
        MessageMethod::Email,
        MessageMethod::VoiceCall,
        MessageMethod::InPerson,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Whatsapp => "whatsapp",
            Self::Email => "email",
            Self::VoiceCall => "voice_call",
            Self::InPerson => "in_person",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Sms => "SMS",
            Self::Whatsapp => "WhatsApp",
            Self::Email => "Email",
            Self::VoiceCall => "Voice Call",
            Self::InPerson => "In Person",
        }
    }

    /// Channel used for automated sends to a pledger.
    pub fn preferred_for(pledge: &Pledge) -> Self {
        if pledge.whatsapp {
            Self::Whatsapp
        } else {
            Self::Sms
        }
    }
}

impl FromStr for MessageMethod {
    type Err = PledgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|method| method.as_str() == value)
            .ok_or_else(|| {
                PledgeError::validation("method", format!("unknown message method '{value}'"))
            })
    }
}

/// Delivery lifecycle of a message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    #[default]
    Pending,
    Sent,
    Delivered,
    Failed,
    Read,
}

impl MessageStatus {
    pub const ALL: [MessageStatus; 6] = [
        MessageStatus::Queued,
        MessageStatus::Pending,
        MessageStatus::Sent,
        MessageStatus::Delivered,
        MessageStatus::Failed,
        MessageStatus::Read,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Read => "read",
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered | Self::Read)
    }
}

impl FromStr for MessageStatus {
    type Err = PledgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| {
                PledgeError::validation("status", format!("unknown message status '{value}'"))
            })
    }
}

/// Category of a message template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Reminder,
    NewPledge,
    PledgeCompleted,
    Card,
    Thanks,
}

impl TemplateKind {
    pub const ALL: [TemplateKind; 5] = [
        TemplateKind::Reminder,
        TemplateKind::NewPledge,
        TemplateKind::PledgeCompleted,
        TemplateKind::Card,
        TemplateKind::Thanks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reminder => "reminder",
            Self::NewPledge => "new_pledge",
            Self::PledgeCompleted => "pledge_completed",
            Self::Card => "card",
            Self::Thanks => "thanks",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Reminder => "Reminder",
            Self::NewPledge => "New Pledge",
            Self::PledgeCompleted => "Pledge Completed",
            Self::Card => "Card",
            Self::Thanks => "Thanks",
        }
    }
}

impl FromStr for TemplateKind {
    type Err = PledgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| {
                PledgeError::validation("kind", format!("unknown template kind '{value}'"))
            })
    }
}

/// Account that owns events. Email is the login identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventUser {
    pub id: UserId,
    pub email: String,
    pub full_name: String,
    pub mobile_number: String,
    #[serde(default, skip_serializing)]
    pub password_hash: String,
    pub is_verified: bool,
    pub is_active: bool,
    pub is_staff: bool,
    pub privacy_agreement_accepted: bool,
    pub marketing_consent: bool,
    pub privacy_accepted_at: Option<DateTime<Utc>>,
    pub date_joined: DateTime<Utc>,
}

impl EventUser {
    pub fn display_name(&self) -> &str {
        if self.full_name.trim().is_empty() {
            &self.email
        } else {
            &self.full_name
        }
    }

    pub fn short_name(&self) -> &str {
        self.full_name
            .split_whitespace()
            .next()
            .unwrap_or(&self.email)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub name: String,
    pub date: DateTime<Utc>,
    pub description: String,
    pub location: String,
    pub created_by: UserId,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A commitment by a named person to pay toward an event.
///
/// Amounts are minor units (1/100 TSH).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pledge {
    pub id: PledgeId,
    pub event_id: EventId,
    pub name: String,
    pub mobile_number: String,
    pub pledge_amount: i64,
    pub amount_paid: i64,
    pub status: PledgeStatus,
    pub whatsapp: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pledge {
    /// Outstanding amount, never negative.
    pub fn balance(&self) -> i64 {
        (self.pledge_amount - self.amount_paid).max(0)
    }

    pub fn payment_percentage(&self) -> f64 {
        if self.pledge_amount <= 0 {
            return 0.0;
        }
        (self.amount_paid as f64 / self.pledge_amount as f64 * 100.0).min(100.0)
    }

    pub fn is_fully_paid(&self) -> bool {
        self.amount_paid >= self.pledge_amount
    }

    pub fn is_overdue(&self, days: i64, now: DateTime<Utc>) -> bool {
        self.created_at < now - Duration::days(days) && self.balance() > 0
    }
}

/// One recorded payment against a pledge. There is no edit path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionKey,
    pub pledge_id: PledgeId,
    pub amount: i64,
    pub method: PaymentMethod,
    pub transaction_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub pledge_id: PledgeId,
    pub body: String,
    pub method: MessageMethod,
    pub status: MessageStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reusable message body with `{field}` placeholders.
///
/// Templates without an event are defaults shared by every event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub id: TemplateId,
    pub event_id: Option<EventId>,
    pub body: String,
    pub kind: TemplateKind,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Provisional sign-up awaiting email verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub id: RegistrationId,
    pub full_name: String,
    pub email: String,
    #[serde(default, skip_serializing)]
    pub password_hash: String,
    pub mobile_number: String,
    pub event_name: String,
    pub event_date: DateTime<Utc>,
    #[serde(default, skip_serializing)]
    pub verification_token: String,
    pub is_verified: bool,
    pub privacy_agreement_accepted: bool,
    pub marketing_consent: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RegistrationRequest {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPledge {
    pub event_id: EventId,
    pub name: String,
    pub mobile_number: String,
    #[serde(deserialize_with = "crate::money::deserialize_amount")]
    pub pledge_amount: i64,
    #[serde(default)]
    pub whatsapp: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PledgeUpdate {
    pub name: Option<String>,
    pub mobile_number: Option<String>,
    #[serde(default, deserialize_with = "crate::money::deserialize_optional_amount")]
    pub pledge_amount: Option<i64>,
    pub whatsapp: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    pub pledge_id: PledgeId,
    #[serde(deserialize_with = "crate::money::deserialize_amount")]
    pub amount: i64,
    pub method: PaymentMethod,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub name: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventUpdate {
    pub name: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTemplate {
    #[serde(default)]
    pub event_id: Option<EventId>,
    pub kind: TemplateKind,
    pub body: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateUpdate {
    pub kind: Option<TemplateKind>,
    pub body: Option<String>,
}

/// Filters for pledge listings.
#[derive(Debug, Clone, Default)]
pub struct PledgeFilter {
    pub event_id: Option<EventId>,
    /// Case-insensitive substring of the pledger's name.
    pub search: Option<String>,
    pub status: Option<PledgeStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub event_id: Option<EventId>,
    pub pledge_id: Option<PledgeId>,
    /// Case-insensitive substring of the external transaction reference.
    pub search: Option<String>,
    pub method: Option<PaymentMethod>,
}

#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub event_id: Option<EventId>,
    pub pledge_id: Option<PledgeId>,
    pub status: Option<MessageStatus>,
    pub method: Option<MessageMethod>,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateFilter {
    pub event_id: Option<EventId>,
    pub kind: Option<TemplateKind>,
    pub active: Option<bool>,
}

/// Validated sign-up data ready to be stored as a [`RegistrationRequest`].
#[derive(Debug, Clone)]
pub struct RegistrationDraft {
    pub full_name: String,
    pub email: String,
    pub password_hash: String,
    pub mobile_number: String,
    pub event_name: String,
    pub event_date: DateTime<Utc>,
    pub verification_token: String,
    pub privacy_agreement_accepted: bool,
    pub marketing_consent: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Rows per page in every listing.
pub const DEFAULT_PER_PAGE: usize = 25;

/// One page of a listing plus the unpaged total.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    /// Slice a newest-first vector into page `page` (1-based; out-of-range pages clamp).
    pub fn from_vec(items: Vec<T>, page: usize, per_page: usize) -> Self {
        let per_page = per_page.max(1);
        let total = items.len();
        let last_page = total.div_ceil(per_page).max(1);
        let page = page.clamp(1, last_page);
        let items = items
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .collect();
        Self {
            page,
            per_page,
            total,
            items,
        }
    }

    pub fn num_pages(&self) -> usize {
        self.total.div_ceil(self.per_page).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pledge(amount: i64, paid: i64) -> Pledge {
        let now = Utc::now();
        Pledge {
            id: PledgeId(1),
            event_id: EventId(1),
            name: "Asha Mushi".to_string(),
            mobile_number: "+255712345678".to_string(),
            pledge_amount: amount,
            amount_paid: paid,
            status: PledgeStatus::New,
            whatsapp: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn balance_never_goes_negative() {
        assert_eq!(pledge(10_000, 2_500).balance(), 7_500);
        assert_eq!(pledge(10_000, 12_000).balance(), 0);
    }

    #[test]
    fn payment_percentage_is_capped() {
        assert_eq!(pledge(0, 500).payment_percentage(), 0.0);
        assert_eq!(pledge(10_000, 2_500).payment_percentage(), 25.0);
        assert_eq!(pledge(10_000, 30_000).payment_percentage(), 100.0);
    }

    #[test]
    fn overdue_requires_age_and_balance() {
        let now = Utc::now();
        let mut old = pledge(10_000, 0);
        old.created_at = now - Duration::days(45);
        assert!(old.is_overdue(30, now));

        old.amount_paid = 10_000;
        assert!(!old.is_overdue(30, now));
        assert!(!pledge(10_000, 0).is_overdue(30, now));
    }

    #[test]
    fn enums_parse_their_wire_names() {
        for status in PledgeStatus::ALL {
            assert_eq!(status.as_str().parse::<PledgeStatus>().unwrap(), status);
        }
        assert_eq!(
            "bank_transfer".parse::<PaymentMethod>().unwrap(),
            PaymentMethod::BankTransfer
        );
        assert!("carrier_pigeon".parse::<MessageMethod>().is_err());
        assert_eq!(
            serde_json::to_string(&PaymentMethod::TigoPesa).unwrap(),
            "\"tigopesa\""
        );
    }

    #[test]
    fn page_clamps_out_of_range_pages() {
        let page = Page::from_vec((1..=30).collect::<Vec<_>>(), 9, 25);
        assert_eq!(page.page, 2);
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.num_pages(), 2);

        let empty = Page::<u8>::from_vec(Vec::new(), 1, 25);
        assert_eq!(empty.page, 1);
        assert!(empty.items.is_empty());
    }

    #[test]
    fn short_name_falls_back_to_email() {
        let user = EventUser {
            id: UserId(1),
            email: "host@example.com".to_string(),
            full_name: String::new(),
            mobile_number: "0712345678".to_string(),
            password_hash: String::new(),
            is_verified: true,
            is_active: true,
            is_staff: false,
            privacy_agreement_accepted: true,
            marketing_consent: false,
            privacy_accepted_at: None,
            date_joined: Utc::now(),
        };
        assert_eq!(user.short_name(), "host@example.com");
        assert_eq!(user.display_name(), "host@example.com");
    }
}
