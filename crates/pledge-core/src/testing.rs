//! Fixtures shared by the unit tests.

use crate::channels::{ChannelReceipt, MessageChannel};
use crate::error::{PledgeError, PledgeResult};
use crate::store::{InMemoryPledgeStore, PledgeRecordStore, RegistrationStore};
use crate::types::{
    Event, EventUser, Message, MessageMethod, NewPledge, Pledge, RegistrationDraft,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Memory store holding one verified user with one event.
pub(crate) async fn seeded_store() -> (Arc<InMemoryPledgeStore>, EventUser, Event) {
    let store = Arc::new(InMemoryPledgeStore::new());
    let (user, event) = register(&store, "host@example.com", "Harusi ya Amani").await;
    (store, user, event)
}

pub(crate) async fn register(
    store: &InMemoryPledgeStore,
    email: &str,
    event_name: &str,
) -> (EventUser, Event) {
    let now = Utc::now();
    let request = store
        .insert_registration(RegistrationDraft {
            full_name: "Amani Host".to_string(),
            email: email.to_string(),
            password_hash: "sha256$1$salt$digest".to_string(),
            mobile_number: "0712345678".to_string(),
            event_name: event_name.to_string(),
            event_date: now + Duration::days(30),
            verification_token: format!("token-{email}"),
            privacy_agreement_accepted: true,
            marketing_consent: false,
            created_at: now,
            expires_at: now + Duration::hours(24),
        })
        .await
        .unwrap();
    store.complete_registration(request.id, now).await.unwrap()
}

pub(crate) async fn add_pledge(
    store: &InMemoryPledgeStore,
    event: &Event,
    name: &str,
    amount: i64,
    whatsapp: bool,
) -> Pledge {
    store
        .insert_pledge(
            &NewPledge {
                event_id: event.id,
                name: name.to_string(),
                mobile_number: "+255712345678".to_string(),
                pledge_amount: amount,
                whatsapp,
            },
            Utc::now(),
        )
        .await
        .unwrap()
}

/// Channel that records every send and succeeds.
pub(crate) struct RecordingChannel {
    method: MessageMethod,
    pub(crate) sent: Mutex<Vec<String>>,
}

impl RecordingChannel {
    pub(crate) fn new(method: MessageMethod) -> Arc<Self> {
        Arc::new(Self {
            method,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn bodies(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageChannel for RecordingChannel {
    fn method(&self) -> MessageMethod {
        self.method
    }

    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, message: &Message, pledge: &Pledge) -> PledgeResult<ChannelReceipt> {
        self.sent.lock().unwrap().push(message.body.clone());
        Ok(ChannelReceipt {
            channel: self.name().to_string(),
            provider_message_id: format!("rec-{}", message.id),
            recipient: pledge.mobile_number.clone(),
            sent_at: Utc::now(),
            metadata: BTreeMap::new(),
        })
    }
}

/// Channel that rejects every send.
pub(crate) struct RejectingChannel(pub(crate) MessageMethod);

#[async_trait]
impl MessageChannel for RejectingChannel {
    fn method(&self) -> MessageMethod {
        self.0
    }

    fn name(&self) -> &'static str {
        "rejecting"
    }

    async fn send(&self, _message: &Message, _pledge: &Pledge) -> PledgeResult<ChannelReceipt> {
        Err(PledgeError::ChannelFailure {
            channel: self.name().to_string(),
            message: "provider unavailable".to_string(),
        })
    }
}
