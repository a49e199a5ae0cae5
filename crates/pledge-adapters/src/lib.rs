//! Message channel and mailer adapters for the pledge engine.
//!
//! The shipped channels simulate delivery: they log the outgoing message and
//! hand back a receipt without contacting a provider.

#![deny(unsafe_code)]

use async_trait::async_trait;
use chrono::Utc;
use pledge_core::channels::{ChannelReceipt, ChannelRegistry, MessageChannel};
use pledge_core::error::{PledgeError, PledgeResult};
use pledge_core::types::{Message, MessageMethod, Pledge, RegistrationRequest};
use pledge_core::VerificationMailer;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub const DEFAULT_EMAIL_DOMAIN: &str = "email.com";

fn receipt(channel: &str, prefix: &str, recipient: String, message: &Message) -> ChannelReceipt {
    let short_id: String = Uuid::new_v4().simple().to_string().chars().take(12).collect();
    let mut metadata = BTreeMap::new();
    metadata.insert("message_id".to_string(), message.id.to_string());
    metadata.insert("pledge_id".to_string(), message.pledge_id.to_string());
    ChannelReceipt {
        channel: channel.to_string(),
        provider_message_id: format!("{prefix}-{short_id}"),
        recipient,
        sent_at: Utc::now(),
        metadata,
    }
}

/// Simulated SMS gateway.
#[derive(Debug, Clone, Default)]
pub struct SimulatedSmsChannel;

#[async_trait]
impl MessageChannel for SimulatedSmsChannel {
    fn method(&self) -> MessageMethod {
        MessageMethod::Sms
    }

    fn name(&self) -> &'static str {
        "simulated-sms"
    }

    async fn send(&self, message: &Message, pledge: &Pledge) -> PledgeResult<ChannelReceipt> {
        info!(
            message_id = %message.id,
            to = %pledge.mobile_number,
            body = %message.body,
            "Simulated SMS sent"
        );
        Ok(receipt(self.name(), "sms", pledge.mobile_number.clone(), message))
    }
}

/// Simulated WhatsApp business API.
#[derive(Debug, Clone, Default)]
pub struct SimulatedWhatsAppChannel;

#[async_trait]
impl MessageChannel for SimulatedWhatsAppChannel {
    fn method(&self) -> MessageMethod {
        MessageMethod::Whatsapp
    }

    fn name(&self) -> &'static str {
        "simulated-whatsapp"
    }

    async fn send(&self, message: &Message, pledge: &Pledge) -> PledgeResult<ChannelReceipt> {
        let to = format!("whatsapp:{}", pledge.mobile_number);
        info!(
            message_id = %message.id,
            to = %to,
            body = %message.body,
            "Simulated WhatsApp message sent"
        );
        Ok(receipt(self.name(), "wa", to, message))
    }
}

/// Simulated email delivery. Pledges carry no email address, so the
/// recipient is derived from the mobile number.
#[derive(Debug, Clone)]
pub struct SimulatedEmailChannel {
    domain: String,
}

impl SimulatedEmailChannel {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
        }
    }

    pub fn recipient_for(&self, pledge: &Pledge) -> String {
        let local: String = pledge
            .mobile_number
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        format!("{local}@{}", self.domain)
    }
}

impl Default for SimulatedEmailChannel {
    fn default() -> Self {
        Self::new(DEFAULT_EMAIL_DOMAIN)
    }
}

#[async_trait]
impl MessageChannel for SimulatedEmailChannel {
    fn method(&self) -> MessageMethod {
        MessageMethod::Email
    }

    fn name(&self) -> &'static str {
        "simulated-email"
    }

    async fn send(&self, message: &Message, pledge: &Pledge) -> PledgeResult<ChannelReceipt> {
        let to = self.recipient_for(pledge);
        info!(message_id = %message.id, to = %to, "Simulated email sent");
        Ok(receipt(self.name(), "mail", to, message))
    }
}

/// Deterministic failing channel for exercising failure and retry paths.
#[derive(Debug, Clone)]
pub struct AlwaysFailChannel {
    method: MessageMethod,
    reason: String,
}

impl AlwaysFailChannel {
    pub fn new(method: MessageMethod, reason: impl Into<String>) -> Self {
        Self {
            method,
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl MessageChannel for AlwaysFailChannel {
    fn method(&self) -> MessageMethod {
        self.method
    }

    fn name(&self) -> &'static str {
        "always-fail"
    }

    async fn send(&self, _message: &Message, _pledge: &Pledge) -> PledgeResult<ChannelReceipt> {
        Err(PledgeError::ChannelFailure {
            channel: self.name().to_string(),
            message: self.reason.clone(),
        })
    }
}

/// Mailer that logs the verification link instead of sending it.
#[derive(Debug, Clone, Default)]
pub struct LogVerificationMailer;

#[async_trait]
impl VerificationMailer for LogVerificationMailer {
    async fn send_verification(
        &self,
        request: &RegistrationRequest,
        link: &str,
    ) -> PledgeResult<()> {
        info!(
            email = %request.email,
            event = %request.event_name,
            link = %link,
            "Verification email"
        );
        Ok(())
    }
}

/// Registry with the three simulated channels.
pub fn simulated_registry(email_domain: &str) -> ChannelRegistry {
    let mut registry = ChannelRegistry::new();
    registry.register(Arc::new(SimulatedSmsChannel));
    registry.register(Arc::new(SimulatedWhatsAppChannel));
    registry.register(Arc::new(SimulatedEmailChannel::new(email_domain)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pledge_core::types::{
        EventId, MessageId, MessageStatus, PledgeId, PledgeStatus, RegistrationId,
    };

    fn pledge() -> Pledge {
        let now = Utc::now();
        Pledge {
            id: PledgeId(7),
            event_id: EventId(1),
            name: "Baraka".to_string(),
            mobile_number: "+255 712 345 678".to_string(),
            pledge_amount: 10_000,
            amount_paid: 0,
            status: PledgeStatus::New,
            whatsapp: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn message(method: MessageMethod) -> Message {
        let now = Utc::now();
        Message {
            id: MessageId(3),
            pledge_id: PledgeId(7),
            body: "Asante Baraka".to_string(),
            method,
            status: MessageStatus::Pending,
            attempts: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn simulated_channels_return_receipts() {
        let registry = simulated_registry("pledges.test");
        assert_eq!(
            registry.methods(),
            vec![MessageMethod::Email, MessageMethod::Sms, MessageMethod::Whatsapp]
        );

        let sms = registry
            .get(MessageMethod::Sms)
            .unwrap()
            .send(&message(MessageMethod::Sms), &pledge())
            .await
            .unwrap();
        assert_eq!(sms.recipient, "+255 712 345 678");
        assert!(sms.provider_message_id.starts_with("sms-"));
        assert_eq!(sms.metadata.get("message_id").map(String::as_str), Some("3"));

        let wa = registry
            .get(MessageMethod::Whatsapp)
            .unwrap()
            .send(&message(MessageMethod::Whatsapp), &pledge())
            .await
            .unwrap();
        assert_eq!(wa.recipient, "whatsapp:+255 712 345 678");

        let mail = registry
            .get(MessageMethod::Email)
            .unwrap()
            .send(&message(MessageMethod::Email), &pledge())
            .await
            .unwrap();
        assert_eq!(mail.recipient, "255712345678@pledges.test");
        assert_eq!(mail.channel, "simulated-email");
    }

    #[tokio::test]
    async fn failing_channel_reports_reason() {
        let channel = AlwaysFailChannel::new(MessageMethod::Sms, "gateway down");
        let err = channel
            .send(&message(MessageMethod::Sms), &pledge())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PledgeError::ChannelFailure { ref message, .. } if message == "gateway down"
        ));
    }

    #[tokio::test]
    async fn log_mailer_accepts_links() {
        let now = Utc::now();
        let request = RegistrationRequest {
            id: RegistrationId(1),
            full_name: "Neema".to_string(),
            email: "neema@example.com".to_string(),
            password_hash: String::new(),
            mobile_number: "0712345678".to_string(),
            event_name: "Kitchen Party".to_string(),
            event_date: now + Duration::days(30),
            verification_token: "abc".to_string(),
            is_verified: false,
            privacy_agreement_accepted: true,
            marketing_consent: false,
            created_at: now,
            expires_at: now + Duration::hours(24),
        };
        assert!(LogVerificationMailer
            .send_verification(&request, "http://localhost/verify/abc")
            .await
            .is_ok());
    }
}
