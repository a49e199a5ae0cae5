//! Events owned by a user and the "selected event" used to scope every view.

use crate::error::{PledgeError, PledgeResult};
use crate::store::{EventStore, PledgeStore, UserStore};
use crate::types::{Event, EventId, EventUpdate, NewEvent, UserId};
use crate::validation;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

const NAME_MAX: usize = 200;
const LOCATION_MAX: usize = 200;

#[derive(Clone)]
pub struct EventService {
    store: Arc<dyn PledgeStore>,
}

impl EventService {
    pub fn new(store: Arc<dyn PledgeStore>) -> Self {
        Self { store }
    }

    pub async fn create_event(&self, owner: UserId, input: NewEvent) -> PledgeResult<Event> {
        self.store
            .get_user(owner)
            .await?
            .ok_or_else(|| PledgeError::not_found("user", owner))?;
        let input = NewEvent {
            name: validation::required("name", &input.name, NAME_MAX)?,
            location: optional_text("location", &input.location, LOCATION_MAX)?,
            description: input.description.trim().to_string(),
            date: input.date,
        };
        let event = self.store.insert_event(owner, &input, Utc::now()).await?;
        info!(event_id = %event.id, owner = %owner, name = %event.name, "Event created");
        Ok(event)
    }

    /// Owner-only edit.
    pub async fn update_event(
        &self,
        owner: UserId,
        id: EventId,
        update: EventUpdate,
    ) -> PledgeResult<Event> {
        let mut event = self.owned_event(owner, id).await?;
        if let Some(name) = update.name {
            event.name = validation::required("name", &name, NAME_MAX)?;
        }
        if let Some(date) = update.date {
            event.date = date;
        }
        if let Some(description) = update.description {
            event.description = description.trim().to_string();
        }
        if let Some(location) = update.location {
            event.location = optional_text("location", &location, LOCATION_MAX)?;
        }
        if let Some(active) = update.is_active {
            event.is_active = active;
        }
        event.updated_at = Utc::now();
        self.store.save_event(&event).await?;
        Ok(event)
    }

    /// An active event of `owner`.
    pub async fn get_event(&self, owner: UserId, id: EventId) -> PledgeResult<Event> {
        let event = self.owned_event(owner, id).await?;
        if !event.is_active {
            return Err(PledgeError::not_found("event", id));
        }
        Ok(event)
    }

    /// The owner's active events, latest date first.
    pub async fn list_events(&self, owner: UserId) -> PledgeResult<Vec<Event>> {
        Ok(self
            .store
            .list_events_for_user(owner)
            .await?
            .into_iter()
            .filter(|e| e.is_active)
            .collect())
    }

    /// The requested event when it is the user's and active, otherwise the
    /// user's first event. `None` when the user has no events.
    pub async fn select_event(
        &self,
        owner: UserId,
        requested: Option<EventId>,
    ) -> PledgeResult<Option<Event>> {
        let events = self.list_events(owner).await?;
        let chosen = requested
            .and_then(|id| events.iter().find(|e| e.id == id).cloned())
            .or_else(|| events.into_iter().next());
        Ok(chosen)
    }

    async fn owned_event(&self, owner: UserId, id: EventId) -> PledgeResult<Event> {
        let event = self
            .store
            .get_event(id)
            .await?
            .ok_or_else(|| PledgeError::not_found("event", id))?;
        if event.created_by != owner {
            return Err(PledgeError::not_found("event", id));
        }
        Ok(event)
    }
}

fn optional_text(field: &'static str, value: &str, max_len: usize) -> PledgeResult<String> {
    let value = value.trim();
    if value.chars().count() > max_len {
        return Err(PledgeError::validation(
            field,
            format!("must be at most {max_len} characters"),
        ));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{register, seeded_store};
    use chrono::Duration;

    fn new_event(name: &str, days: i64) -> NewEvent {
        NewEvent {
            name: name.to_string(),
            date: Utc::now() + Duration::days(days),
            description: String::new(),
            location: "Arusha".to_string(),
        }
    }

    #[tokio::test]
    async fn list_orders_by_date_then_name() {
        let (store, user, first) = seeded_store().await;
        let service = EventService::new(store);
        let later = service
            .create_event(user.id, new_event("Send-off", 90))
            .await
            .unwrap();

        let events = service.list_events(user.id).await.unwrap();
        let ids: Vec<EventId> = events.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![later.id, first.id]);
    }

    #[tokio::test]
    async fn selection_falls_back_to_first_event() {
        let (store, user, first) = seeded_store().await;
        let (_, stranger_event) = register(&store, "other@example.com", "Kitchen Party").await;
        let service = EventService::new(store);
        let second = service
            .create_event(user.id, new_event("Send-off", 1))
            .await
            .unwrap();

        let picked = service
            .select_event(user.id, Some(second.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(picked.id, second.id);

        let fallback = service
            .select_event(user.id, Some(stranger_event.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fallback.id, first.id);

        service
            .update_event(
                user.id,
                first.id,
                EventUpdate {
                    is_active: Some(false),
                    ..EventUpdate::default()
                },
            )
            .await
            .unwrap();
        let after = service.select_event(user.id, None).await.unwrap().unwrap();
        assert_eq!(after.id, second.id);
    }

    #[tokio::test]
    async fn only_owner_may_touch_an_event() {
        let (store, _, event) = seeded_store().await;
        let (stranger, _) = register(&store, "other@example.com", "Kitchen Party").await;
        let service = EventService::new(store);

        assert!(matches!(
            service.get_event(stranger.id, event.id).await,
            Err(PledgeError::NotFound { .. })
        ));
        assert!(service
            .update_event(stranger.id, event.id, EventUpdate::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn user_without_events_selects_nothing() {
        let (store, user, event) = seeded_store().await;
        let service = EventService::new(store);
        service
            .update_event(
                user.id,
                event.id,
                EventUpdate {
                    is_active: Some(false),
                    ..EventUpdate::default()
                },
            )
            .await
            .unwrap();
        assert!(service.select_event(user.id, None).await.unwrap().is_none());
    }
}
