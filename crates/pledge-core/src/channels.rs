use crate::error::PledgeResult;
use crate::types::{Message, MessageMethod, Pledge};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Proof that a provider accepted a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelReceipt {
    pub channel: String,
    pub provider_message_id: String,
    pub recipient: String,
    pub sent_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

/// Pluggable delivery channel.
///
/// One channel serves one [`MessageMethod`]. Failures are reported as
/// [`crate::PledgeError::ChannelFailure`].
#[async_trait]
pub trait MessageChannel: Send + Sync {
    fn method(&self) -> MessageMethod;

    /// Provider name used in logs and receipts.
    fn name(&self) -> &'static str;

    async fn send(&self, message: &Message, pledge: &Pledge) -> PledgeResult<ChannelReceipt>;
}

/// Registry of channels keyed by method.
#[derive(Default, Clone)]
pub struct ChannelRegistry {
    channels: HashMap<MessageMethod, Arc<dyn MessageChannel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Register `channel`, replacing any channel for the same method.
    pub fn register(&mut self, channel: Arc<dyn MessageChannel>) {
        self.channels.insert(channel.method(), channel);
    }

    pub fn get(&self, method: MessageMethod) -> Option<Arc<dyn MessageChannel>> {
        self.channels.get(&method).cloned()
    }

    pub fn has(&self, method: MessageMethod) -> bool {
        self.channels.contains_key(&method)
    }

    pub fn methods(&self) -> Vec<MessageMethod> {
        let mut methods: Vec<_> = self.channels.keys().copied().collect();
        methods.sort_by_key(|m| m.as_str());
        methods
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("methods", &self.methods())
            .finish()
    }
}
