//! Request handlers. Bodies and responses are JSON; ids travel in the path.

use crate::{ApiError, ServiceState};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use pledge_core::channels::ChannelReceipt;
use pledge_core::dispatch::{ProcessReport, QueueStats, SendOutcome};
use pledge_core::money::{format_amount_compact, CURRENCY};
use pledge_core::store::EventStore;
use pledge_core::{
    DashboardStats, Event, EventId, EventSummary, EventUpdate, EventUser, Message, MessageFilter,
    MessageId, MessageMethod, MessageStatus, MessageTemplate, NewEvent, NewPledge, NewTemplate,
    NewTransaction, Page, PaymentMethod, Pledge, PledgeFilter, PledgeId, PledgeStatus,
    PledgeUpdate, RegistrationOutcome, RegistrationSubmission, ReminderOverview, ReminderRun,
    TemplateFilter, TemplateId, TemplateKind, TemplatePreview, TemplateUpdate, Transaction,
    TransactionFilter, TransactionKey, UserId, VerifiedAccount, PLACEHOLDERS,
};
use serde::{Deserialize, Serialize};

const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_MAX_RETRIES: u32 = 3;

type ApiResult<T> = Result<Json<T>, ApiError>;
type Created<T> = Result<(StatusCode, Json<T>), ApiError>;

fn created<T>(value: T) -> Created<T> {
    Ok((StatusCode::CREATED, Json(value)))
}

/// A pledge together with its derived figures.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct PledgeView {
    #[serde(flatten)]
    pledge: Pledge,
    balance: i64,
    /// `TSH 1,234` style, decimals only when there are cents.
    balance_display: String,
    payment_percentage: f64,
    status_label: &'static str,
}

impl From<Pledge> for PledgeView {
    fn from(pledge: Pledge) -> Self {
        Self {
            balance: pledge.balance(),
            balance_display: format!("{CURRENCY} {}", format_amount_compact(pledge.balance())),
            payment_percentage: (pledge.payment_percentage() * 100.0).round() / 100.0,
            status_label: pledge.status.label(),
            pledge,
        }
    }
}

fn pledge_page(page: Page<Pledge>) -> Page<PledgeView> {
    Page {
        page: page.page,
        per_page: page.per_page,
        total: page.total,
        items: page.items.into_iter().map(PledgeView::from).collect(),
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    service: &'static str,
    storage_backend: &'static str,
    channels: Vec<MessageMethod>,
}

pub(crate) async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "pledge-service",
        storage_backend: state.engine.store().backend_label(),
        channels: state.engine.dispatcher().channels().methods(),
    })
}

#[derive(Debug, Serialize)]
pub(crate) struct Placeholder {
    placeholder: &'static str,
    description: &'static str,
}

pub(crate) async fn placeholders() -> Json<Vec<Placeholder>> {
    Json(
        PLACEHOLDERS
            .iter()
            .map(|&(placeholder, description)| Placeholder {
                placeholder,
                description,
            })
            .collect(),
    )
}

// Accounts

#[derive(Debug, Deserialize)]
pub(crate) struct EmailBody {
    email: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Credentials {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PasswordBody {
    password: String,
}

pub(crate) async fn submit_registration(
    State(state): State<ServiceState>,
    Json(submission): Json<RegistrationSubmission>,
) -> Created<RegistrationOutcome> {
    created(state.engine.accounts().submit(submission).await?)
}

pub(crate) async fn resend_verification(
    State(state): State<ServiceState>,
    Json(body): Json<EmailBody>,
) -> ApiResult<RegistrationOutcome> {
    Ok(Json(state.engine.accounts().resend(&body.email).await?))
}

pub(crate) async fn verify_registration(
    State(state): State<ServiceState>,
    Path(token): Path<String>,
) -> ApiResult<VerifiedAccount> {
    Ok(Json(state.engine.accounts().verify(&token).await?))
}

pub(crate) async fn login(
    State(state): State<ServiceState>,
    Json(body): Json<Credentials>,
) -> ApiResult<EventUser> {
    Ok(Json(
        state
            .engine
            .accounts()
            .authenticate(&body.email, &body.password)
            .await?,
    ))
}

pub(crate) async fn delete_account(
    State(state): State<ServiceState>,
    Path(user_id): Path<UserId>,
    Json(body): Json<PasswordBody>,
) -> Result<StatusCode, ApiError> {
    state
        .engine
        .accounts()
        .delete_account(user_id, &body.password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// Events

#[derive(Debug, Deserialize)]
pub(crate) struct SelectQuery {
    event_id: Option<EventId>,
}

pub(crate) async fn list_events(
    State(state): State<ServiceState>,
    Path(user_id): Path<UserId>,
) -> ApiResult<Vec<Event>> {
    Ok(Json(state.engine.events().list_events(user_id).await?))
}

pub(crate) async fn create_event(
    State(state): State<ServiceState>,
    Path(user_id): Path<UserId>,
    Json(input): Json<NewEvent>,
) -> Created<Event> {
    created(state.engine.events().create_event(user_id, input).await?)
}

pub(crate) async fn get_event(
    State(state): State<ServiceState>,
    Path((user_id, event_id)): Path<(UserId, EventId)>,
) -> ApiResult<Event> {
    Ok(Json(state.engine.events().get_event(user_id, event_id).await?))
}

pub(crate) async fn update_event(
    State(state): State<ServiceState>,
    Path((user_id, event_id)): Path<(UserId, EventId)>,
    Json(update): Json<EventUpdate>,
) -> ApiResult<Event> {
    Ok(Json(
        state
            .engine
            .events()
            .update_event(user_id, event_id, update)
            .await?,
    ))
}

pub(crate) async fn selected_event(
    State(state): State<ServiceState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<SelectQuery>,
) -> ApiResult<Event> {
    state
        .engine
        .events()
        .select_event(user_id, query.event_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("user {user_id} has no active events")))
}

async fn load_event(state: &ServiceState, id: EventId) -> Result<Event, ApiError> {
    state
        .engine
        .store()
        .get_event(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("event {id} not found")))
}

pub(crate) async fn event_summary(
    State(state): State<ServiceState>,
    Path(event_id): Path<EventId>,
) -> ApiResult<EventSummary> {
    let event = load_event(&state, event_id).await?;
    Ok(Json(state.engine.stats().event_summary(event).await?))
}

#[derive(Debug, Deserialize)]
pub(crate) struct PledgeQuery {
    search: Option<String>,
    status: Option<PledgeStatus>,
    page: Option<usize>,
}

pub(crate) async fn list_event_pledges(
    State(state): State<ServiceState>,
    Path(event_id): Path<EventId>,
    Query(query): Query<PledgeQuery>,
) -> ApiResult<Page<PledgeView>> {
    let filter = PledgeFilter {
        event_id: Some(event_id),
        search: query.search,
        status: query.status,
    };
    let page = state
        .engine
        .pledges()
        .list_pledges(&filter, query.page.unwrap_or(1), state.engine.per_page())
        .await?;
    Ok(Json(pledge_page(page)))
}

// Reminders

#[derive(Debug, Serialize)]
pub(crate) struct ReminderRunView {
    queued: usize,
    completed: usize,
    promoted: usize,
    message_ids: Vec<MessageId>,
    summary: String,
}

impl From<ReminderRun> for ReminderRunView {
    fn from(run: ReminderRun) -> Self {
        // The bulk send keeps running detached once the handle is dropped.
        Self {
            summary: run.summary(),
            queued: run.queued,
            completed: run.completed,
            promoted: run.promoted,
            message_ids: run.message_ids,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CustomReminder {
    pledge_ids: Vec<PledgeId>,
    body: String,
}

pub(crate) async fn auto_reminders(
    State(state): State<ServiceState>,
    Path(event_id): Path<EventId>,
) -> ApiResult<ReminderRunView> {
    let run = state.engine.reminders().auto_process(event_id).await?;
    Ok(Json(run.into()))
}

pub(crate) async fn reminder_overview(
    State(state): State<ServiceState>,
    Path(event_id): Path<EventId>,
) -> ApiResult<ReminderOverview> {
    Ok(Json(state.engine.reminders().overview(event_id).await?))
}

pub(crate) async fn custom_reminders(
    State(state): State<ServiceState>,
    Json(body): Json<CustomReminder>,
) -> ApiResult<ReminderRunView> {
    let run = state
        .engine
        .reminders()
        .send_custom(&body.pledge_ids, &body.body)
        .await?;
    Ok(Json(run.into()))
}

// Pledges

#[derive(Debug, Deserialize)]
pub(crate) struct StatusBody<S> {
    status: S,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WhatsappBody {
    enabled: bool,
}

pub(crate) async fn create_pledge(
    State(state): State<ServiceState>,
    Json(input): Json<NewPledge>,
) -> Created<PledgeView> {
    created(state.engine.pledges().create_pledge(input).await?.into())
}

pub(crate) async fn get_pledge(
    State(state): State<ServiceState>,
    Path(pledge_id): Path<PledgeId>,
) -> ApiResult<PledgeView> {
    Ok(Json(state.engine.pledges().get_pledge(pledge_id).await?.into()))
}

pub(crate) async fn update_pledge(
    State(state): State<ServiceState>,
    Path(pledge_id): Path<PledgeId>,
    Json(update): Json<PledgeUpdate>,
) -> ApiResult<PledgeView> {
    Ok(Json(
        state
            .engine
            .pledges()
            .update_pledge(pledge_id, update)
            .await?
            .into(),
    ))
}

pub(crate) async fn delete_pledge(
    State(state): State<ServiceState>,
    Path(pledge_id): Path<PledgeId>,
) -> Result<StatusCode, ApiError> {
    state.engine.pledges().delete_pledge(pledge_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn set_pledge_status(
    State(state): State<ServiceState>,
    Path(pledge_id): Path<PledgeId>,
    Json(body): Json<StatusBody<PledgeStatus>>,
) -> ApiResult<PledgeView> {
    Ok(Json(
        state
            .engine
            .pledges()
            .set_status(pledge_id, body.status)
            .await?
            .into(),
    ))
}

pub(crate) async fn set_pledge_whatsapp(
    State(state): State<ServiceState>,
    Path(pledge_id): Path<PledgeId>,
    Json(body): Json<WhatsappBody>,
) -> ApiResult<PledgeView> {
    Ok(Json(
        state
            .engine
            .pledges()
            .set_whatsapp(pledge_id, body.enabled)
            .await?
            .into(),
    ))
}

pub(crate) async fn pledge_transactions(
    State(state): State<ServiceState>,
    Path(pledge_id): Path<PledgeId>,
) -> ApiResult<Vec<Transaction>> {
    Ok(Json(state.engine.pledges().pledge_transactions(pledge_id).await?))
}

pub(crate) async fn pledge_messages(
    State(state): State<ServiceState>,
    Path(pledge_id): Path<PledgeId>,
) -> ApiResult<Vec<Message>> {
    Ok(Json(state.engine.pledges().pledge_messages(pledge_id).await?))
}

#[derive(Debug, Deserialize)]
pub(crate) struct ComposeBody {
    body: String,
    method: Option<MessageMethod>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SendView {
    message: Message,
    sent: bool,
    receipt: Option<ChannelReceipt>,
    error: Option<String>,
}

impl SendView {
    fn new(message: Message, outcome: SendOutcome) -> Self {
        let (receipt, error) = match outcome {
            SendOutcome::Sent(receipt) => (Some(receipt), None),
            SendOutcome::Failed(reason) => (None, Some(reason)),
            SendOutcome::NotFound => (None, Some("message not found".to_string())),
        };
        Self {
            sent: receipt.is_some(),
            message,
            receipt,
            error,
        }
    }
}

/// Compose and immediately send a message to one pledge.
pub(crate) async fn message_pledge(
    State(state): State<ServiceState>,
    Path(pledge_id): Path<PledgeId>,
    Json(body): Json<ComposeBody>,
) -> ApiResult<SendView> {
    let pledge = state.engine.pledges().get_pledge(pledge_id).await?;
    let method = body
        .method
        .unwrap_or_else(|| MessageMethod::preferred_for(&pledge));
    let (message, outcome) = state
        .engine
        .dispatcher()
        .create_and_send(&pledge, &body.body, method)
        .await?;
    Ok(Json(SendView::new(message, outcome)))
}

// Transactions

#[derive(Debug, Deserialize)]
pub(crate) struct TransactionQuery {
    event_id: Option<EventId>,
    pledge_id: Option<PledgeId>,
    search: Option<String>,
    method: Option<PaymentMethod>,
    page: Option<usize>,
}

#[derive(Debug, Serialize)]
pub(crate) struct RecordedPayment {
    transaction: Transaction,
    pledge: PledgeView,
}

pub(crate) async fn list_transactions(
    State(state): State<ServiceState>,
    Query(query): Query<TransactionQuery>,
) -> ApiResult<Page<Transaction>> {
    let filter = TransactionFilter {
        event_id: query.event_id,
        pledge_id: query.pledge_id,
        search: query.search,
        method: query.method,
    };
    Ok(Json(
        state
            .engine
            .pledges()
            .list_transactions(&filter, query.page.unwrap_or(1), state.engine.per_page())
            .await?,
    ))
}

pub(crate) async fn record_transaction(
    State(state): State<ServiceState>,
    Json(input): Json<NewTransaction>,
) -> Created<RecordedPayment> {
    let (transaction, pledge) = state.engine.pledges().record_transaction(input).await?;
    created(RecordedPayment {
        transaction,
        pledge: pledge.into(),
    })
}

pub(crate) async fn get_transaction(
    State(state): State<ServiceState>,
    Path(id): Path<TransactionKey>,
) -> ApiResult<Transaction> {
    Ok(Json(state.engine.pledges().get_transaction(id).await?))
}

// Messages

#[derive(Debug, Deserialize)]
pub(crate) struct MessageQuery {
    event_id: Option<EventId>,
    pledge_id: Option<PledgeId>,
    status: Option<MessageStatus>,
    method: Option<MessageMethod>,
    page: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct QueueBody {
    pledge_id: PledgeId,
    body: String,
    method: Option<MessageMethod>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProcessQuery {
    batch_size: Option<usize>,
    max_retries: Option<u32>,
}

pub(crate) async fn list_messages(
    State(state): State<ServiceState>,
    Query(query): Query<MessageQuery>,
) -> ApiResult<Page<Message>> {
    let filter = MessageFilter {
        event_id: query.event_id,
        pledge_id: query.pledge_id,
        status: query.status,
        method: query.method,
    };
    Ok(Json(
        state
            .engine
            .dispatcher()
            .list_messages(&filter, query.page.unwrap_or(1), state.engine.per_page())
            .await?,
    ))
}

pub(crate) async fn queue_message(
    State(state): State<ServiceState>,
    Json(body): Json<QueueBody>,
) -> Created<Message> {
    let pledge = state.engine.pledges().get_pledge(body.pledge_id).await?;
    let method = body
        .method
        .unwrap_or_else(|| MessageMethod::preferred_for(&pledge));
    created(
        state
            .engine
            .dispatcher()
            .queue_message(&pledge, &body.body, method)
            .await?,
    )
}

pub(crate) async fn get_message(
    State(state): State<ServiceState>,
    Path(id): Path<MessageId>,
) -> ApiResult<Message> {
    Ok(Json(state.engine.dispatcher().get_message(id).await?))
}

pub(crate) async fn set_message_status(
    State(state): State<ServiceState>,
    Path(id): Path<MessageId>,
    Json(body): Json<StatusBody<MessageStatus>>,
) -> ApiResult<Message> {
    Ok(Json(
        state.engine.dispatcher().set_status(id, body.status).await?,
    ))
}

pub(crate) async fn send_message(
    State(state): State<ServiceState>,
    Path(id): Path<MessageId>,
) -> ApiResult<SendView> {
    let dispatcher = state.engine.dispatcher();
    // Fails with 404 before any delivery attempt when the id is unknown.
    dispatcher.get_message(id).await?;
    let outcome = dispatcher.send_message(id).await;
    let message = dispatcher.get_message(id).await?;
    Ok(Json(SendView::new(message, outcome)))
}

pub(crate) async fn queue_status(State(state): State<ServiceState>) -> ApiResult<QueueStats> {
    Ok(Json(state.engine.dispatcher().queue_stats().await?))
}

pub(crate) async fn process_queue(
    State(state): State<ServiceState>,
    Query(query): Query<ProcessQuery>,
) -> ApiResult<ProcessReport> {
    let batch_size = query.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
    if batch_size == 0 {
        return Err(ApiError::bad_request("batch_size must be at least 1"));
    }
    Ok(Json(
        state
            .engine
            .dispatcher()
            .process_queue(batch_size, query.max_retries.unwrap_or(DEFAULT_MAX_RETRIES))
            .await?,
    ))
}

// Templates

#[derive(Debug, Deserialize)]
pub(crate) struct TemplateQuery {
    event_id: Option<EventId>,
    kind: Option<TemplateKind>,
    active: Option<bool>,
}

pub(crate) async fn list_templates(
    State(state): State<ServiceState>,
    Query(query): Query<TemplateQuery>,
) -> ApiResult<Vec<MessageTemplate>> {
    let filter = TemplateFilter {
        event_id: query.event_id,
        kind: query.kind,
        active: query.active,
    };
    Ok(Json(state.engine.templates().list(&filter).await?))
}

pub(crate) async fn create_template(
    State(state): State<ServiceState>,
    Json(input): Json<NewTemplate>,
) -> Created<MessageTemplate> {
    created(state.engine.templates().create(input).await?)
}

pub(crate) async fn get_template(
    State(state): State<ServiceState>,
    Path(id): Path<TemplateId>,
) -> ApiResult<TemplatePreview> {
    Ok(Json(state.engine.templates().get_with_preview(id).await?))
}

pub(crate) async fn update_template(
    State(state): State<ServiceState>,
    Path(id): Path<TemplateId>,
    Json(update): Json<TemplateUpdate>,
) -> ApiResult<MessageTemplate> {
    Ok(Json(state.engine.templates().update(id, update).await?))
}

pub(crate) async fn delete_template(
    State(state): State<ServiceState>,
    Path(id): Path<TemplateId>,
) -> Result<StatusCode, ApiError> {
    state.engine.templates().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn toggle_template(
    State(state): State<ServiceState>,
    Path(id): Path<TemplateId>,
) -> ApiResult<MessageTemplate> {
    Ok(Json(state.engine.templates().toggle(id).await?))
}

pub(crate) async fn dashboard_stats(State(state): State<ServiceState>) -> ApiResult<DashboardStats> {
    Ok(Json(state.engine.stats().dashboard_stats().await?))
}
