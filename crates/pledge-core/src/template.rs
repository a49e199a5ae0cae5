//! `{placeholder}` substitution for message templates.
//!
//! Substitution is plain text replacement: pledge fields first, then any
//! extra values in order. Tokens without a value are left untouched.

use crate::money::format_tsh;
use crate::types::{Pledge, TemplateKind};

/// Placeholders filled from a pledge, with a short description of each.
pub const PLACEHOLDERS: [(&str, &str); 7] = [
    ("name", "Pledger's name"),
    ("pledge_amount", "Total pledged amount"),
    ("amount_paid", "Amount paid so far"),
    ("balance", "Outstanding balance"),
    ("event_id", "Event name"),
    ("mobile", "Pledger's mobile number"),
    ("status", "Pledge status"),
];

/// Values substituted into a template body.
#[derive(Debug, Clone, Default)]
pub struct TemplateValues {
    values: Vec<(String, String)>,
}

impl TemplateValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values for every pledge placeholder.
    pub fn for_pledge(pledge: &Pledge, event_name: &str) -> Self {
        Self::new()
            .with("name", &pledge.name)
            .with("pledge_amount", format_tsh(pledge.pledge_amount))
            .with("amount_paid", format_tsh(pledge.amount_paid))
            .with("balance", format_tsh(pledge.balance()))
            .with("event_id", event_name)
            .with("mobile", &pledge.mobile_number)
            .with("status", pledge.status.label())
    }

    /// Fixed sample values used when no pledge is available.
    pub fn sample() -> Self {
        Self::new()
            .with("name", "John Doe")
            .with("pledge_amount", "TSH 100,000.00")
            .with("amount_paid", "TSH 50,000.00")
            .with("balance", "TSH 50,000.00")
            .with("event_id", "EVENT2025")
            .with("mobile", "+255123456789")
            .with("status", "Partial Payment")
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.push((key.into(), value.into()));
        self
    }

    pub fn render(&self, body: &str) -> String {
        let mut out = body.to_string();
        for (key, value) in &self.values {
            out = out.replace(&format!("{{{key}}}"), value);
        }
        out
    }
}

/// Render `body` for a pledge of the named event.
pub fn render(body: &str, pledge: &Pledge, event_name: &str) -> String {
    TemplateValues::for_pledge(pledge, event_name).render(body)
}

/// Render with the pledge when given, otherwise with sample values.
pub fn preview(body: &str, pledge: Option<(&Pledge, &str)>) -> String {
    match pledge {
        Some((pledge, event_name)) => render(body, pledge, event_name),
        None => TemplateValues::sample().render(body),
    }
}

/// Name given to templates of `kind`.
pub fn default_name(kind: TemplateKind) -> String {
    kind.label().to_string()
}

/// Text shown in the reminder overview when no active template of `kind` exists.
pub fn fallback_body(kind: TemplateKind) -> Option<&'static str> {
    match kind {
        TemplateKind::NewPledge => Some(
            "Welcome! Thank you for your pledge of {pledge_amount}. \
             We appreciate your commitment to {event_id}.",
        ),
        TemplateKind::Reminder => Some(
            "Hello {name}, this is a reminder about your pending pledge balance of {balance} \
             for {event_id}. Please complete your payment when convenient.",
        ),
        TemplateKind::PledgeCompleted => Some(
            "Congratulations {name}! Your pledge of {pledge_amount} for {event_id} has been \
             completed. Thank you for your commitment!",
        ),
        TemplateKind::Card | TemplateKind::Thanks => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventId, PledgeId, PledgeStatus};
    use chrono::Utc;

    fn pledge() -> Pledge {
        let now = Utc::now();
        Pledge {
            id: PledgeId(1),
            event_id: EventId(2),
            name: "Mary Mrema".to_string(),
            mobile_number: "+255754000111".to_string(),
            pledge_amount: 20_000_000,
            amount_paid: 5_000_050,
            status: PledgeStatus::Partial,
            whatsapp: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn renders_pledge_fields() {
        let out = render(
            "Dear {name}, you paid {amount_paid} of {pledge_amount} for {event_id}. \
             Balance {balance} ({status}) {mobile}",
            &pledge(),
            "Harusi ya Juma",
        );
        assert_eq!(
            out,
            "Dear Mary Mrema, you paid TSH 50,000.50 of TSH 200,000.00 for Harusi ya Juma. \
             Balance TSH 149,999.50 (Partial Payment) +255754000111"
        );
    }

    #[test]
    fn unknown_tokens_survive() {
        assert_eq!(
            render("Hi {name}, see {link}", &pledge(), "E"),
            "Hi Mary Mrema, see {link}"
        );
    }

    #[test]
    fn extra_values_apply_after_pledge_fields() {
        let out = TemplateValues::for_pledge(&pledge(), "E")
            .with("link", "https://pay.example/1")
            .render("{name}: {link}");
        assert_eq!(out, "Mary Mrema: https://pay.example/1");
    }

    #[test]
    fn preview_without_pledge_uses_sample_data() {
        assert_eq!(
            preview("{name} owes {balance} for {event_id}", None),
            "John Doe owes TSH 50,000.00 for EVENT2025"
        );
    }

    #[test]
    fn fallbacks_exist_for_automated_kinds() {
        assert!(fallback_body(TemplateKind::Reminder).is_some());
        assert!(fallback_body(TemplateKind::NewPledge).is_some());
        assert!(fallback_body(TemplateKind::PledgeCompleted).is_some());
        assert!(fallback_body(TemplateKind::Card).is_none());
    }
}
