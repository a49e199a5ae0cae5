//! Automated reminder runs over an event's pledges.

use crate::dispatch::{BulkSendReport, MessageDispatcher};
use crate::error::{PledgeError, PledgeResult};
use crate::store::{EventStore, PledgeRecordStore, PledgeStore};
use crate::template::{self, TemplateValues};
use crate::templates::TemplateService;
use crate::types::{
    EventId, MessageId, MessageMethod, MessageTemplate, Pledge, PledgeFilter, PledgeId,
    PledgeStatus, TemplateKind,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Open pledges older than this with money still owed count as overdue.
pub const OVERDUE_DAYS: i64 = 30;

/// What a reminder run queued and changed.
#[derive(Debug, Default, Serialize)]
pub struct ReminderRun {
    pub queued: usize,
    pub completed: usize,
    pub promoted: usize,
    pub message_ids: Vec<MessageId>,
    #[serde(skip)]
    pub send_task: Option<JoinHandle<BulkSendReport>>,
}

impl ReminderRun {
    /// Human-readable summary of the run.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if self.queued > 0 {
            parts.push(format!("{} messages queued for sending", self.queued));
        }
        if self.completed > 0 {
            parts.push(format!("{} pledges marked as completed", self.completed));
        }
        if self.promoted > 0 {
            parts.push(format!(
                "{} new pledges updated to pending status",
                self.promoted
            ));
        }
        if parts.is_empty() {
            "No pledges found that need processing.".to_string()
        } else {
            format!("{}.", parts.join(". "))
        }
    }
}

/// Pledge counts and sample texts shown before a run.
#[derive(Debug, Clone, Serialize)]
pub struct ReminderOverview {
    pub new_count: usize,
    pub pending_count: usize,
    pub pending_zero_balance: usize,
    pub pending_with_balance: usize,
    /// New, pending or partial pledges past [`OVERDUE_DAYS`] with a balance.
    pub overdue_count: usize,
    pub new_sample: String,
    pub reminder_sample: String,
    pub completed_sample: String,
}

#[derive(Clone)]
pub struct ReminderService {
    store: Arc<dyn PledgeStore>,
    templates: TemplateService,
    dispatcher: MessageDispatcher,
}

impl ReminderService {
    pub fn new(
        store: Arc<dyn PledgeStore>,
        templates: TemplateService,
        dispatcher: MessageDispatcher,
    ) -> Self {
        Self {
            store,
            templates,
            dispatcher,
        }
    }

    /// Welcome new pledges, thank finished ones and remind the rest, then
    /// send everything queued on a background task.
    pub async fn auto_process(&self, event_id: EventId) -> PledgeResult<ReminderRun> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or_else(|| PledgeError::not_found("event", event_id))?;
        let new_pledges = self.pledges_with_status(event_id, PledgeStatus::New).await?;
        let pending_pledges = self
            .pledges_with_status(event_id, PledgeStatus::Pending)
            .await?;

        let mut run = ReminderRun::default();
        let mut promoted: HashSet<PledgeId> = HashSet::new();

        if let Some(welcome) = self
            .templates
            .find_for_send(event_id, TemplateKind::NewPledge)
            .await?
        {
            for mut pledge in new_pledges {
                self.queue(&mut run, &welcome, &pledge, &event.name).await?;
                pledge.status = PledgeStatus::Pending;
                pledge.updated_at = Utc::now();
                self.store.save_pledge(&pledge).await?;
                promoted.insert(pledge.id);
                run.promoted += 1;
            }
        }

        let completed_template = self
            .templates
            .find_for_send(event_id, TemplateKind::PledgeCompleted)
            .await?;
        let reminder_template = self
            .templates
            .find_for_send(event_id, TemplateKind::Reminder)
            .await?;

        for mut pledge in pending_pledges
            .into_iter()
            .filter(|p| !promoted.contains(&p.id))
        {
            if pledge.balance() == 0 {
                if let Some(done) = &completed_template {
                    self.queue(&mut run, done, &pledge, &event.name).await?;
                }
                pledge.status = PledgeStatus::Completed;
                pledge.updated_at = Utc::now();
                self.store.save_pledge(&pledge).await?;
                run.completed += 1;
            } else if let Some(reminder) = &reminder_template {
                self.queue(&mut run, reminder, &pledge, &event.name).await?;
            }
        }

        if !run.message_ids.is_empty() {
            run.send_task = Some(self.dispatcher.spawn_bulk(run.message_ids.clone()));
        }
        info!(
            event_id = %event_id,
            queued = run.queued,
            completed = run.completed,
            promoted = run.promoted,
            "Reminder run finished"
        );
        Ok(run)
    }

    /// Queue `body` as an SMS to each listed pledge and send in the background.
    ///
    /// Unknown pledge ids are skipped.
    pub async fn send_custom(&self, pledge_ids: &[PledgeId], body: &str) -> PledgeResult<ReminderRun> {
        let body = body.trim();
        if body.is_empty() {
            return Err(PledgeError::validation("message", "message text is required"));
        }
        if pledge_ids.is_empty() {
            return Err(PledgeError::validation("pledge_ids", "select at least one pledge"));
        }

        let mut run = ReminderRun::default();
        for id in pledge_ids {
            let Some(pledge) = self.store.get_pledge(*id).await? else {
                warn!(pledge_id = %id, "Skipping unknown pledge");
                continue;
            };
            let message = self
                .dispatcher
                .queue_message(&pledge, body, MessageMethod::Sms)
                .await?;
            run.message_ids.push(message.id);
            run.queued += 1;
        }

        if !run.message_ids.is_empty() {
            run.send_task = Some(self.dispatcher.spawn_bulk(run.message_ids.clone()));
        }
        Ok(run)
    }

    pub async fn overview(&self, event_id: EventId) -> PledgeResult<ReminderOverview> {
        let new = self.pledges_with_status(event_id, PledgeStatus::New).await?;
        let pending = self
            .pledges_with_status(event_id, PledgeStatus::Pending)
            .await?;
        let partial = self
            .pledges_with_status(event_id, PledgeStatus::Partial)
            .await?;
        let pending_zero_balance = pending.iter().filter(|p| p.is_fully_paid()).count();
        let now = Utc::now();
        let overdue_count = new
            .iter()
            .chain(&pending)
            .chain(&partial)
            .filter(|p| p.is_overdue(OVERDUE_DAYS, now))
            .count();

        Ok(ReminderOverview {
            new_count: new.len(),
            pending_count: pending.len(),
            pending_zero_balance,
            pending_with_balance: pending.len() - pending_zero_balance,
            overdue_count,
            new_sample: self.sample_text(event_id, TemplateKind::NewPledge).await?,
            reminder_sample: self.sample_text(event_id, TemplateKind::Reminder).await?,
            completed_sample: self
                .sample_text(event_id, TemplateKind::PledgeCompleted)
                .await?,
        })
    }

    async fn sample_text(&self, event_id: EventId, kind: TemplateKind) -> PledgeResult<String> {
        let found = self.templates.find_for_send(event_id, kind).await?;
        Ok(match found {
            Some(t) => TemplateValues::sample().render(&t.body),
            None => template::fallback_body(kind).unwrap_or_default().to_string(),
        })
    }

    async fn pledges_with_status(
        &self,
        event_id: EventId,
        status: PledgeStatus,
    ) -> PledgeResult<Vec<Pledge>> {
        self.store
            .list_pledges(&PledgeFilter {
                event_id: Some(event_id),
                search: None,
                status: Some(status),
            })
            .await
    }

    async fn queue(
        &self,
        run: &mut ReminderRun,
        with: &MessageTemplate,
        pledge: &Pledge,
        event_name: &str,
    ) -> PledgeResult<()> {
        let body = template::render(&with.body, pledge, event_name);
        let message = self
            .dispatcher
            .queue_message(pledge, &body, MessageMethod::preferred_for(pledge))
            .await?;
        run.message_ids.push(message.id);
        run.queued += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelRegistry;
    use crate::dispatch::DispatchConfig;
    use crate::store::{MessageStore, TransactionStore};
    use crate::testing::{add_pledge, seeded_store, RecordingChannel};
    use crate::types::{MessageFilter, MessageStatus, NewTemplate, PaymentMethod};
    use std::time::Duration;

    async fn setup() -> (
        Arc<crate::store::InMemoryPledgeStore>,
        crate::types::Event,
        ReminderService,
        Arc<RecordingChannel>,
        Arc<RecordingChannel>,
    ) {
        let (store, _, event) = seeded_store().await;
        let sms = RecordingChannel::new(MessageMethod::Sms);
        let whatsapp = RecordingChannel::new(MessageMethod::Whatsapp);
        let mut registry = ChannelRegistry::new();
        registry.register(sms.clone());
        registry.register(whatsapp.clone());
        let dispatcher = MessageDispatcher::new(
            store.clone(),
            Arc::new(registry),
            DispatchConfig {
                send_delay: Duration::ZERO,
            },
        );
        let templates = TemplateService::new(store.clone());
        let service = ReminderService::new(store.clone(), templates, dispatcher);
        (store, event, service, sms, whatsapp)
    }

    async fn template(service: &ReminderService, kind: TemplateKind, body: &str) {
        service
            .templates
            .create(NewTemplate {
                event_id: None,
                kind,
                body: body.to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn auto_process_walks_new_and_pending_pledges() {
        let (store, event, service, sms, whatsapp) = setup().await;
        template(&service, TemplateKind::NewPledge, "Karibu {name}").await;
        template(&service, TemplateKind::Reminder, "Salio {balance}").await;
        template(&service, TemplateKind::PledgeCompleted, "Asante {name}").await;

        let fresh = add_pledge(&store, &event, "Fresh", 10_000, true).await;
        let owing = add_pledge(&store, &event, "Owing", 10_000, false).await;
        let paid = add_pledge(&store, &event, "Paid", 10_000, false).await;
        for p in [&owing, &paid] {
            let mut p = p.clone();
            p.status = PledgeStatus::Pending;
            store.save_pledge(&p).await.unwrap();
        }
        store
            .insert_transaction_and_settle(paid.id, 10_000, PaymentMethod::Mpesa, "MP-PAID", Utc::now())
            .await
            .unwrap();
        // settlement marks it completed; put it back to pending with zero balance
        let mut paid_now = store.get_pledge(paid.id).await.unwrap().unwrap();
        paid_now.status = PledgeStatus::Pending;
        store.save_pledge(&paid_now).await.unwrap();

        let mut run = service.auto_process(event.id).await.unwrap();
        assert_eq!((run.queued, run.completed, run.promoted), (3, 1, 1));
        let report = run.send_task.take().unwrap().await.unwrap();
        assert_eq!(report.sent, 3);

        assert_eq!(whatsapp.bodies(), vec!["Karibu Fresh".to_string()]);
        let mut sms_bodies = sms.bodies();
        sms_bodies.sort();
        assert_eq!(
            sms_bodies,
            vec!["Asante Paid".to_string(), "Salio TSH 100.00".to_string()]
        );

        let fresh = store.get_pledge(fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, PledgeStatus::Pending);
        let paid = store.get_pledge(paid.id).await.unwrap().unwrap();
        assert_eq!(paid.status, PledgeStatus::Completed);
    }

    #[tokio::test]
    async fn without_templates_only_zero_balance_pledges_change() {
        let (store, event, service, _, _) = setup().await;
        let fresh = add_pledge(&store, &event, "Fresh", 10_000, false).await;
        let mut free = add_pledge(&store, &event, "Free", 0, false).await;
        free.status = PledgeStatus::Pending;
        store.save_pledge(&free).await.unwrap();

        let run = service.auto_process(event.id).await.unwrap();
        assert_eq!((run.queued, run.completed, run.promoted), (0, 1, 0));
        assert!(run.send_task.is_none());
        assert_eq!(
            store.get_pledge(fresh.id).await.unwrap().unwrap().status,
            PledgeStatus::New
        );
    }

    #[tokio::test]
    async fn custom_reminders_skip_unknown_pledges() {
        let (store, event, service, sms, _) = setup().await;
        let pledge = add_pledge(&store, &event, "Juma", 10_000, true).await;

        let mut run = service
            .send_custom(&[pledge.id, PledgeId(999)], "Kumbusho")
            .await
            .unwrap();
        assert_eq!(run.queued, 1);
        run.send_task.take().unwrap().await.unwrap();
        assert_eq!(sms.bodies(), vec!["Kumbusho".to_string()]);

        let messages = store
            .list_messages(&MessageFilter::default())
            .await
            .unwrap();
        assert_eq!(messages[0].method, MessageMethod::Sms);
        assert_eq!(messages[0].status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn overview_counts_and_falls_back() {
        let (store, event, service, _, _) = setup().await;
        template(&service, TemplateKind::Reminder, "Hi {name}").await;
        add_pledge(&store, &event, "New", 1_000, false).await;
        let mut zero = add_pledge(&store, &event, "Zero", 0, false).await;
        zero.status = PledgeStatus::Pending;
        store.save_pledge(&zero).await.unwrap();
        let mut owing = add_pledge(&store, &event, "Owing", 5_000, false).await;
        owing.status = PledgeStatus::Pending;
        owing.created_at = Utc::now() - chrono::Duration::days(OVERDUE_DAYS + 15);
        store.save_pledge(&owing).await.unwrap();

        let overview = service.overview(event.id).await.unwrap();
        assert_eq!(overview.new_count, 1);
        assert_eq!(overview.pending_count, 2);
        assert_eq!(overview.pending_zero_balance, 1);
        assert_eq!(overview.pending_with_balance, 1);
        assert_eq!(overview.overdue_count, 1);
        assert_eq!(overview.reminder_sample, "Hi John Doe");
        assert!(overview.new_sample.starts_with("Welcome!"));
    }

    #[test]
    fn summary_mentions_each_change() {
        let run = ReminderRun {
            queued: 2,
            completed: 1,
            ..ReminderRun::default()
        };
        assert_eq!(
            run.summary(),
            "2 messages queued for sending. 1 pledges marked as completed."
        );
        assert_eq!(
            ReminderRun::default().summary(),
            "No pledges found that need processing."
        );
    }
}
