//! Message template management.

use crate::error::{PledgeError, PledgeResult};
use crate::store::{EventStore, PledgeRecordStore, PledgeStore, TemplateStore};
use crate::template;
use crate::types::{
    EventId, MessageTemplate, NewTemplate, PledgeFilter, TemplateFilter, TemplateId,
    TemplateKind, TemplateUpdate,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// A template plus its body rendered against a sample pledge.
#[derive(Debug, Clone, Serialize)]
pub struct TemplatePreview {
    pub template: MessageTemplate,
    pub preview: String,
    pub sample_pledge: Option<String>,
}

#[derive(Clone)]
pub struct TemplateService {
    store: Arc<dyn PledgeStore>,
}

impl TemplateService {
    pub fn new(store: Arc<dyn PledgeStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, input: NewTemplate) -> PledgeResult<MessageTemplate> {
        let input = NewTemplate {
            body: non_empty_body(&input.body)?,
            ..input
        };
        if let Some(event_id) = input.event_id {
            self.require_event(event_id).await?;
        }
        let name = template::default_name(input.kind);
        let created = self
            .store
            .insert_template(&input, &name, Utc::now())
            .await?;
        info!(template_id = %created.id, kind = created.kind.as_str(), "Template created");
        Ok(created)
    }

    /// Replace kind and body. The name follows the kind; activity is kept.
    pub async fn update(&self, id: TemplateId, update: TemplateUpdate) -> PledgeResult<MessageTemplate> {
        let mut existing = self.get(id).await?;
        if let Some(kind) = update.kind {
            existing.kind = kind;
        }
        if let Some(body) = update.body {
            existing.body = non_empty_body(&body)?;
        }
        existing.name = template::default_name(existing.kind);
        existing.updated_at = Utc::now();
        self.store.save_template(&existing).await?;
        Ok(existing)
    }

    pub async fn delete(&self, id: TemplateId) -> PledgeResult<()> {
        if !self.store.delete_template(id).await? {
            return Err(PledgeError::not_found("template", id));
        }
        info!(template_id = %id, "Template deleted");
        Ok(())
    }

    pub async fn toggle(&self, id: TemplateId) -> PledgeResult<MessageTemplate> {
        let mut existing = self.get(id).await?;
        existing.is_active = !existing.is_active;
        existing.updated_at = Utc::now();
        self.store.save_template(&existing).await?;
        info!(template_id = %id, active = existing.is_active, "Template toggled");
        Ok(existing)
    }

    pub async fn get(&self, id: TemplateId) -> PledgeResult<MessageTemplate> {
        self.store
            .get_template(id)
            .await?
            .ok_or_else(|| PledgeError::not_found("template", id))
    }

    /// Template rendered against a pledge of its event, else any pledge,
    /// else the built-in sample values.
    pub async fn get_with_preview(&self, id: TemplateId) -> PledgeResult<TemplatePreview> {
        let found = self.get(id).await?;

        let mut sample = None;
        if let Some(event_id) = found.event_id {
            sample = self
                .store
                .list_pledges(&PledgeFilter {
                    event_id: Some(event_id),
                    ..PledgeFilter::default()
                })
                .await?
                .into_iter()
                .next();
        }
        if sample.is_none() {
            sample = self
                .store
                .list_pledges(&PledgeFilter::default())
                .await?
                .into_iter()
                .next();
        }

        let (preview, sample_pledge) = match sample {
            Some(pledge) => {
                let event_name = self
                    .store
                    .get_event(pledge.event_id)
                    .await?
                    .map(|e| e.name)
                    .unwrap_or_default();
                (
                    template::preview(&found.body, Some((&pledge, &event_name))),
                    Some(pledge.name),
                )
            }
            None => (template::preview(&found.body, None), None),
        };
        Ok(TemplatePreview {
            template: found,
            preview,
            sample_pledge,
        })
    }

    pub async fn list(&self, filter: &TemplateFilter) -> PledgeResult<Vec<MessageTemplate>> {
        self.store.list_templates(filter).await
    }

    /// First active template of `kind`, preferring one bound to `event_id`
    /// over the defaults.
    pub async fn find_for_send(
        &self,
        event_id: EventId,
        kind: TemplateKind,
    ) -> PledgeResult<Option<MessageTemplate>> {
        let active = self
            .store
            .list_templates(&TemplateFilter {
                event_id: None,
                kind: Some(kind),
                active: Some(true),
            })
            .await?;
        let bound = active.iter().find(|t| t.event_id == Some(event_id)).cloned();
        Ok(bound.or_else(|| active.into_iter().find(|t| t.event_id.is_none())))
    }

    async fn require_event(&self, id: EventId) -> PledgeResult<()> {
        self.store
            .get_event(id)
            .await?
            .map(|_| ())
            .ok_or_else(|| PledgeError::not_found("event", id))
    }
}

fn non_empty_body(body: &str) -> PledgeResult<String> {
    let body = body.trim();
    if body.is_empty() {
        return Err(PledgeError::validation("body", "message text is required"));
    }
    Ok(body.to_string())
}
