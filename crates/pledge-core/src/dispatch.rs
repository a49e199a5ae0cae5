//! Outbound message queue and delivery.
//!
//! Messages are created `queued`, move to `pending` while a channel handles
//! them and end `sent` or `failed`. Bulk sends run sequentially with a pause
//! between messages and may be moved onto a background task.

use crate::channels::{ChannelReceipt, ChannelRegistry};
use crate::error::{PledgeError, PledgeResult};
use crate::store::{MessageStore, PledgeRecordStore, PledgeStore};
use crate::types::{
    Message, MessageFilter, MessageId, MessageMethod, MessageStatus, Page, Pledge,
};
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const PREVIEW_CHARS: usize = 100;

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Pause between consecutive messages of a bulk send.
    pub send_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_delay: Duration::from_millis(500),
        }
    }
}

/// Result of a single delivery attempt.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Sent(ChannelReceipt),
    Failed(String),
    NotFound,
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkSendReport {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Every status is present, zero when no message has it.
    pub counts: BTreeMap<MessageStatus, usize>,
    pub total: usize,
    pub last_24h: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
    pub retried: usize,
}

/// Queues messages and drives them through the registered channels.
#[derive(Clone)]
pub struct MessageDispatcher {
    store: Arc<dyn PledgeStore>,
    channels: Arc<ChannelRegistry>,
    config: DispatchConfig,
}

impl MessageDispatcher {
    pub fn new(
        store: Arc<dyn PledgeStore>,
        channels: Arc<ChannelRegistry>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            channels,
            config,
        }
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Create a `queued` message for `pledge`.
    pub async fn queue_message(
        &self,
        pledge: &Pledge,
        body: &str,
        method: MessageMethod,
    ) -> PledgeResult<Message> {
        let message = self
            .store
            .insert_message(pledge.id, body, method, MessageStatus::Queued, Utc::now())
            .await
            .inspect_err(|err| {
                error!(pledge_id = %pledge.id, error = %err, "Failed to queue message");
            })?;
        info!(
            message_id = %message.id,
            pledger = %pledge.name,
            mobile = %pledge.mobile_number,
            method = method.as_str(),
            "Message queued"
        );
        debug!(message_id = %message.id, preview = %body_preview(body), "Queued message content");
        Ok(message)
    }

    /// Deliver one message through the channel for its method.
    ///
    /// Never returns an error: failures are recorded on the message (best
    /// effort) and reported in the outcome.
    pub async fn send_message(&self, id: MessageId) -> SendOutcome {
        let mut message = match self.store.get_message(id).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                error!(message_id = %id, "Message not found");
                return SendOutcome::NotFound;
            }
            Err(err) => {
                error!(message_id = %id, error = %err, "Failed to load message");
                return SendOutcome::Failed(err.to_string());
            }
        };

        match self.deliver(&mut message).await {
            Ok(receipt) => {
                info!(
                    message_id = %id,
                    channel = %receipt.channel,
                    recipient = %receipt.recipient,
                    "Message sent"
                );
                SendOutcome::Sent(receipt)
            }
            Err(err) => {
                error!(
                    message_id = %id,
                    method = message.method.as_str(),
                    error = %err,
                    "Message send failed"
                );
                message.status = MessageStatus::Failed;
                message.updated_at = Utc::now();
                if let Err(save_err) = self.store.save_message(&message).await {
                    error!(message_id = %id, error = %save_err, "Failed to mark message as failed");
                }
                SendOutcome::Failed(err.to_string())
            }
        }
    }

    async fn deliver(&self, message: &mut Message) -> PledgeResult<ChannelReceipt> {
        let pledge = self
            .store
            .get_pledge(message.pledge_id)
            .await?
            .ok_or_else(|| PledgeError::not_found("pledge", message.pledge_id))?;

        message.status = MessageStatus::Pending;
        message.attempts = message.attempts.saturating_add(1);
        message.updated_at = Utc::now();
        self.store.save_message(message).await?;
        debug!(message_id = %message.id, attempt = message.attempts, "Message marked pending");

        let channel = self
            .channels
            .get(message.method)
            .ok_or_else(|| PledgeError::ChannelNotFound(message.method.as_str().to_string()))?;
        debug!(
            message_id = %message.id,
            channel = channel.name(),
            preview = %body_preview(&message.body),
            "Handing message to channel"
        );
        let receipt = channel.send(message, &pledge).await?;

        message.status = MessageStatus::Sent;
        message.updated_at = Utc::now();
        self.store.save_message(message).await?;
        Ok(receipt)
    }

    /// Send `ids` one after another, skipping any that are no longer queued.
    pub async fn send_bulk(&self, ids: &[MessageId]) -> BulkSendReport {
        let mut report = BulkSendReport {
            total: ids.len(),
            ..BulkSendReport::default()
        };
        info!(count = ids.len(), "Starting bulk send");
        self.log_queue_stats().await;

        for (index, id) in ids.iter().enumerate() {
            let position = index + 1;
            match self.store.get_message(*id).await {
                Ok(Some(message)) if message.status != MessageStatus::Queued => {
                    warn!(
                        message_id = %id,
                        status = message.status.as_str(),
                        "Message is no longer queued, skipping"
                    );
                    report.skipped += 1;
                }
                Ok(Some(_)) => {
                    if self.send_message(*id).await.is_sent() {
                        report.sent += 1;
                        info!(position, total = ids.len(), message_id = %id, "Bulk progress: sent");
                    } else {
                        report.failed += 1;
                        warn!(position, total = ids.len(), message_id = %id, "Bulk progress: failed");
                    }
                }
                Ok(None) => {
                    error!(message_id = %id, "Message not found during bulk send");
                    report.failed += 1;
                }
                Err(err) => {
                    error!(message_id = %id, error = %err, "Failed to load message during bulk send");
                    report.failed += 1;
                }
            }

            if position < ids.len() && !self.config.send_delay.is_zero() {
                tokio::time::sleep(self.config.send_delay).await;
            }
        }

        info!(
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            total = report.total,
            "Bulk send completed"
        );
        self.log_queue_stats().await;
        report
    }

    /// Run [`Self::send_bulk`] on a background task.
    pub fn spawn_bulk(&self, ids: Vec<MessageId>) -> JoinHandle<BulkSendReport> {
        let dispatcher = self.clone();
        info!(count = ids.len(), "Spawning background bulk send");
        tokio::spawn(async move { dispatcher.send_bulk(&ids).await })
    }

    /// Queue a message and send it right away.
    pub async fn create_and_send(
        &self,
        pledge: &Pledge,
        body: &str,
        method: MessageMethod,
    ) -> PledgeResult<(Message, SendOutcome)> {
        let queued = self.queue_message(pledge, body, method).await?;
        let outcome = self.send_message(queued.id).await;
        let message = self.store.get_message(queued.id).await?.unwrap_or(queued);
        Ok((message, outcome))
    }

    pub async fn queue_stats(&self) -> PledgeResult<QueueStats> {
        let by_status = self.store.message_counts(None).await?;
        let recent = self
            .store
            .message_counts(Some(Utc::now() - ChronoDuration::hours(24)))
            .await?;

        let counts: BTreeMap<MessageStatus, usize> = MessageStatus::ALL
            .into_iter()
            .map(|status| (status, by_status.get(&status).copied().unwrap_or(0)))
            .collect();
        Ok(QueueStats {
            total: counts.values().sum(),
            last_24h: recent.values().sum(),
            counts,
        })
    }

    async fn log_queue_stats(&self) {
        match self.queue_stats().await {
            Ok(stats) => {
                for (status, count) in stats.counts.iter().filter(|(_, count)| **count > 0) {
                    info!(status = status.as_str(), count, "Message queue");
                }
                info!(total = stats.total, "Message queue total");
            }
            Err(err) => error!(error = %err, "Failed to read message queue statistics"),
        }
    }

    /// Send up to `batch_size` queued messages, oldest first, then re-queue up
    /// to `batch_size` failed messages that have been tried fewer than
    /// `max_retries` times.
    pub async fn process_queue(
        &self,
        batch_size: usize,
        max_retries: u32,
    ) -> PledgeResult<ProcessReport> {
        let mut report = ProcessReport::default();

        let queued = self
            .store
            .oldest_messages_with_status(MessageStatus::Queued, batch_size)
            .await?;
        if queued.is_empty() {
            info!("No queued messages found");
        }
        for message in &queued {
            report.processed += 1;
            if self.send_message(message.id).await.is_sent() {
                report.sent += 1;
            } else {
                report.failed += 1;
            }
        }

        let failed = self
            .store
            .oldest_messages_with_status(MessageStatus::Failed, usize::MAX)
            .await?;
        for mut message in failed
            .into_iter()
            .filter(|m| m.attempts < max_retries)
            .take(batch_size)
        {
            message.status = MessageStatus::Queued;
            message.updated_at = Utc::now();
            match self.store.save_message(&message).await {
                Ok(()) => {
                    report.retried += 1;
                    debug!(message_id = %message.id, attempts = message.attempts, "Message re-queued for retry");
                }
                Err(err) => error!(message_id = %message.id, error = %err, "Failed to re-queue message"),
            }
        }

        info!(
            processed = report.processed,
            sent = report.sent,
            failed = report.failed,
            retried = report.retried,
            "Queue processing finished"
        );
        Ok(report)
    }

    pub async fn get_message(&self, id: MessageId) -> PledgeResult<Message> {
        self.store
            .get_message(id)
            .await?
            .ok_or_else(|| PledgeError::not_found("message", id))
    }

    pub async fn list_messages(
        &self,
        filter: &MessageFilter,
        page: usize,
        per_page: usize,
    ) -> PledgeResult<Page<Message>> {
        let messages = self.store.list_messages(filter).await?;
        Ok(Page::from_vec(messages, page, per_page))
    }

    /// Manual status override.
    pub async fn set_status(&self, id: MessageId, status: MessageStatus) -> PledgeResult<Message> {
        let mut message = self.get_message(id).await?;
        message.status = status;
        message.updated_at = Utc::now();
        self.store.save_message(&message).await?;
        info!(message_id = %id, status = status.as_str(), "Message status updated");
        Ok(message)
    }
}

fn body_preview(body: &str) -> String {
    if body.chars().count() > PREVIEW_CHARS {
        let head: String = body.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{add_pledge, seeded_store, RecordingChannel, RejectingChannel};

    fn dispatcher(
        store: Arc<dyn PledgeStore>,
        registry: ChannelRegistry,
    ) -> MessageDispatcher {
        MessageDispatcher::new(
            store,
            Arc::new(registry),
            DispatchConfig {
                send_delay: Duration::ZERO,
            },
        )
    }

    #[tokio::test]
    async fn queued_message_is_sent_through_its_channel() {
        let (store, _, event) = seeded_store().await;
        let pledge = add_pledge(&store, &event, "Juma", 50_000, false).await;
        let sms = RecordingChannel::new(MessageMethod::Sms);
        let mut registry = ChannelRegistry::new();
        registry.register(sms.clone());
        let dispatcher = dispatcher(store.clone(), registry);

        let message = dispatcher
            .queue_message(&pledge, "Asante Juma", MessageMethod::Sms)
            .await
            .unwrap();
        assert_eq!(message.status, MessageStatus::Queued);

        let outcome = dispatcher.send_message(message.id).await;
        assert!(outcome.is_sent());
        assert_eq!(sms.bodies(), vec!["Asante Juma".to_string()]);

        let stored = store.get_message(message.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Sent);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn method_without_channel_fails() {
        let (store, _, event) = seeded_store().await;
        let pledge = add_pledge(&store, &event, "Juma", 50_000, false).await;
        let dispatcher = dispatcher(store.clone(), ChannelRegistry::new());

        let (message, outcome) = dispatcher
            .create_and_send(&pledge, "Karibu", MessageMethod::VoiceCall)
            .await
            .unwrap();
        assert!(matches!(outcome, SendOutcome::Failed(_)));
        assert_eq!(message.status, MessageStatus::Failed);
        assert_eq!(message.attempts, 1);
    }

    #[tokio::test]
    async fn missing_message_is_reported() {
        let (store, _, _) = seeded_store().await;
        let dispatcher = dispatcher(store, ChannelRegistry::new());
        assert!(matches!(
            dispatcher.send_message(MessageId(9_999)).await,
            SendOutcome::NotFound
        ));
    }

    #[tokio::test]
    async fn bulk_send_counts_and_skips_non_queued() {
        let (store, _, event) = seeded_store().await;
        let pledge = add_pledge(&store, &event, "Juma", 50_000, false).await;
        let mut registry = ChannelRegistry::new();
        registry.register(RecordingChannel::new(MessageMethod::Sms));
        registry.register(Arc::new(RejectingChannel(MessageMethod::Whatsapp)));
        let dispatcher = dispatcher(store.clone(), registry);

        let ok = dispatcher
            .queue_message(&pledge, "one", MessageMethod::Sms)
            .await
            .unwrap();
        let bad = dispatcher
            .queue_message(&pledge, "two", MessageMethod::Whatsapp)
            .await
            .unwrap();
        let done = dispatcher
            .queue_message(&pledge, "three", MessageMethod::Sms)
            .await
            .unwrap();
        dispatcher
            .set_status(done.id, MessageStatus::Sent)
            .await
            .unwrap();

        let report = dispatcher
            .spawn_bulk(vec![ok.id, bad.id, done.id, MessageId(424_242)])
            .await
            .unwrap();
        assert_eq!(
            report,
            BulkSendReport {
                total: 4,
                sent: 1,
                failed: 2,
                skipped: 1,
            }
        );
    }

    #[tokio::test]
    async fn queue_stats_include_every_status() {
        let (store, _, event) = seeded_store().await;
        let pledge = add_pledge(&store, &event, "Juma", 50_000, false).await;
        let dispatcher = dispatcher(store, ChannelRegistry::new());
        dispatcher
            .queue_message(&pledge, "hi", MessageMethod::Sms)
            .await
            .unwrap();

        let stats = dispatcher.queue_stats().await.unwrap();
        assert_eq!(stats.counts.len(), MessageStatus::ALL.len());
        assert_eq!(stats.counts[&MessageStatus::Queued], 1);
        assert_eq!(stats.counts[&MessageStatus::Sent], 0);
        assert_eq!(stats.total, 1);
        assert_eq!(stats.last_24h, 1);
    }

    #[tokio::test]
    async fn process_queue_retries_until_attempts_run_out() {
        let (store, _, event) = seeded_store().await;
        let pledge = add_pledge(&store, &event, "Juma", 50_000, false).await;
        let mut registry = ChannelRegistry::new();
        registry.register(Arc::new(RejectingChannel(MessageMethod::Sms)));
        let dispatcher = dispatcher(store.clone(), registry);
        let message = dispatcher
            .queue_message(&pledge, "hi", MessageMethod::Sms)
            .await
            .unwrap();

        let first = dispatcher.process_queue(10, 2).await.unwrap();
        assert_eq!((first.processed, first.failed, first.retried), (1, 1, 1));

        let second = dispatcher.process_queue(10, 2).await.unwrap();
        assert_eq!((second.processed, second.failed, second.retried), (1, 1, 0));

        let stored = store.get_message(message.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Failed);
        assert_eq!(stored.attempts, 2);
    }

    #[test]
    fn preview_truncates_long_bodies() {
        let long = "x".repeat(150);
        assert_eq!(body_preview(&long).len(), PREVIEW_CHARS + 3);
        assert_eq!(body_preview("short"), "short");
    }
}
