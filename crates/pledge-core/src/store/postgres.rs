//! PostgreSQL backend.
//!
//! Foreign keys carry `ON DELETE CASCADE`, so user and pledge deletes clean up
//! dependent rows in the database. Enumerations are stored as their wire names.

use super::traits::{
    EventStore, MessageStore, PledgeRecordStore, PledgeStore, RegistrationStore, TemplateStore,
    TransactionStore, UserStore,
};
use crate::error::{PledgeError, PledgeResult};
use crate::ledger;
use crate::types::{
    Event, EventId, EventUser, Message, MessageFilter, MessageId, MessageMethod, MessageStatus,
    MessageTemplate, NewEvent, NewPledge, NewTemplate, PaymentMethod, Pledge, PledgeFilter,
    PledgeId, PledgeStatus, RegistrationDraft, RegistrationId, RegistrationRequest,
    TemplateFilter, TemplateId, TemplateKind, Transaction, TransactionFilter, TransactionKey,
    UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row};
use std::collections::BTreeMap;
use std::str::FromStr;

const CONNECT_TIMEOUT_SECS: u64 = 5;

const USER_COLUMNS: &str = "id, email, full_name, mobile_number, password_hash, is_verified, \
     is_active, is_staff, privacy_agreement_accepted, marketing_consent, privacy_accepted_at, \
     date_joined";
const EVENT_COLUMNS: &str =
    "id, name, date, description, location, created_by, is_active, created_at, updated_at";
const PLEDGE_COLUMNS: &str = "id, event_id, name, mobile_number, pledge_amount, amount_paid, \
     status, whatsapp, created_at, updated_at";
const TRANSACTION_COLUMNS: &str =
    "id, pledge_id, amount, method, transaction_id, created_at, updated_at";
const MESSAGE_COLUMNS: &str =
    "id, pledge_id, body, method, status, attempts, created_at, updated_at";
const TEMPLATE_COLUMNS: &str =
    "id, event_id, body, kind, name, is_active, created_at, updated_at";
const REGISTRATION_COLUMNS: &str = "id, full_name, email, password_hash, mobile_number, \
     event_name, event_date, verification_token, is_verified, privacy_agreement_accepted, \
     marketing_consent, created_at, expires_at";

/// PostgreSQL-backed pledge store.
#[derive(Clone)]
pub struct PostgresPledgeStore {
    pool: PgPool,
}

impl PostgresPledgeStore {
    /// Connect and create the schema if it does not exist yet.
    pub async fn connect(database_url: &str, max_connections: u32) -> PledgeResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .connect(database_url)
            .await
            .map_err(|e| PledgeError::Storage(format!("failed to connect postgres: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn from_pool(pool: PgPool) -> PledgeResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> PledgeResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS pledge_users (
                id BIGSERIAL PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                full_name TEXT NOT NULL,
                mobile_number TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                is_verified BOOLEAN NOT NULL DEFAULT FALSE,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                is_staff BOOLEAN NOT NULL DEFAULT FALSE,
                privacy_agreement_accepted BOOLEAN NOT NULL DEFAULT FALSE,
                marketing_consent BOOLEAN NOT NULL DEFAULT FALSE,
                privacy_accepted_at TIMESTAMPTZ,
                date_joined TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS pledge_events (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                date TIMESTAMPTZ NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                location TEXT NOT NULL DEFAULT '',
                created_by BIGINT NOT NULL REFERENCES pledge_users(id) ON DELETE CASCADE,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS pledge_pledges (
                id BIGSERIAL PRIMARY KEY,
                event_id BIGINT NOT NULL REFERENCES pledge_events(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                mobile_number TEXT NOT NULL,
                pledge_amount BIGINT NOT NULL,
                amount_paid BIGINT NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'new',
                whatsapp BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS pledge_transactions (
                id BIGSERIAL PRIMARY KEY,
                pledge_id BIGINT NOT NULL REFERENCES pledge_pledges(id) ON DELETE CASCADE,
                amount BIGINT NOT NULL,
                method TEXT NOT NULL,
                transaction_id TEXT NOT NULL UNIQUE,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS pledge_messages (
                id BIGSERIAL PRIMARY KEY,
                pledge_id BIGINT NOT NULL REFERENCES pledge_pledges(id) ON DELETE CASCADE,
                body TEXT NOT NULL,
                method TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS pledge_templates (
                id BIGSERIAL PRIMARY KEY,
                event_id BIGINT REFERENCES pledge_events(id) ON DELETE CASCADE,
                body TEXT NOT NULL,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS pledge_registrations (
                id BIGSERIAL PRIMARY KEY,
                full_name TEXT NOT NULL,
                email TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                mobile_number TEXT NOT NULL,
                event_name TEXT NOT NULL,
                event_date TIMESTAMPTZ NOT NULL,
                verification_token TEXT NOT NULL UNIQUE,
                is_verified BOOLEAN NOT NULL DEFAULT FALSE,
                privacy_agreement_accepted BOOLEAN NOT NULL DEFAULT FALSE,
                marketing_consent BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS pledge_events_owner_idx ON pledge_events (created_by, date DESC)",
            "CREATE INDEX IF NOT EXISTS pledge_pledges_event_idx ON pledge_pledges (event_id, status)",
            "CREATE INDEX IF NOT EXISTS pledge_pledges_created_idx ON pledge_pledges (created_at DESC)",
            "CREATE INDEX IF NOT EXISTS pledge_transactions_pledge_idx ON pledge_transactions (pledge_id)",
            "CREATE INDEX IF NOT EXISTS pledge_transactions_method_idx ON pledge_transactions (method, created_at DESC)",
            "CREATE INDEX IF NOT EXISTS pledge_messages_status_idx ON pledge_messages (status, created_at)",
            "CREATE INDEX IF NOT EXISTS pledge_messages_pledge_idx ON pledge_messages (pledge_id)",
            "CREATE INDEX IF NOT EXISTS pledge_templates_kind_idx ON pledge_templates (event_id, kind)",
            "CREATE INDEX IF NOT EXISTS pledge_registrations_email_idx ON pledge_registrations (email)",
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| PledgeError::Storage(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }

    async fn fetch_pledge(&self, id: PledgeId) -> PledgeResult<Option<Pledge>> {
        let row = sqlx::query(&format!(
            "SELECT {PLEDGE_COLUMNS} FROM pledge_pledges WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.as_ref().map(pledge_from_row).transpose()
    }
}

#[async_trait]
impl UserStore for PostgresPledgeStore {
    async fn get_user(&self, id: UserId) -> PledgeResult<Option<EventUser>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM pledge_users WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> PledgeResult<Option<EventUser>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM pledge_users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn delete_user(&self, id: UserId) -> PledgeResult<bool> {
        let result = sqlx::query("DELETE FROM pledge_users WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_verified_users(&self) -> PledgeResult<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM pledge_users WHERE is_verified")
                .fetch_one(&self.pool)
                .await
                .map_err(backend)?;
        to_usize(count)
    }
}

#[async_trait]
impl RegistrationStore for PostgresPledgeStore {
    async fn insert_registration(
        &self,
        draft: RegistrationDraft,
    ) -> PledgeResult<RegistrationRequest> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO pledge_registrations
                (full_name, email, password_hash, mobile_number, event_name, event_date,
                 verification_token, is_verified, privacy_agreement_accepted, marketing_consent,
                 created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, $8, $9, $10, $11)
            RETURNING {REGISTRATION_COLUMNS}
            "#
        ))
        .bind(&draft.full_name)
        .bind(&draft.email)
        .bind(&draft.password_hash)
        .bind(&draft.mobile_number)
        .bind(&draft.event_name)
        .bind(draft.event_date)
        .bind(&draft.verification_token)
        .bind(draft.privacy_agreement_accepted)
        .bind(draft.marketing_consent)
        .bind(draft.created_at)
        .bind(draft.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;
        registration_from_row(&row)
    }

    async fn find_pending_registration(
        &self,
        token: &str,
    ) -> PledgeResult<Option<RegistrationRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM pledge_registrations \
             WHERE verification_token = $1 AND NOT is_verified"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.as_ref().map(registration_from_row).transpose()
    }

    async fn find_pending_registration_by_email(
        &self,
        email: &str,
    ) -> PledgeResult<Option<RegistrationRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM pledge_registrations \
             WHERE email = $1 AND NOT is_verified \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.as_ref().map(registration_from_row).transpose()
    }

    async fn replace_registration_token(
        &self,
        id: RegistrationId,
        token: &str,
    ) -> PledgeResult<RegistrationRequest> {
        let row = sqlx::query(&format!(
            "UPDATE pledge_registrations SET verification_token = $1 WHERE id = $2 \
             RETURNING {REGISTRATION_COLUMNS}"
        ))
        .bind(token)
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?
        .ok_or_else(|| PledgeError::not_found("registration", id))?;
        registration_from_row(&row)
    }

    async fn complete_registration(
        &self,
        id: RegistrationId,
        now: DateTime<Utc>,
    ) -> PledgeResult<(EventUser, Event)> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let row = sqlx::query(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM pledge_registrations \
             WHERE id = $1 AND NOT is_verified FOR UPDATE"
        ))
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?
        .ok_or_else(|| PledgeError::not_found("registration", id))?;
        let request = registration_from_row(&row)?;

        let taken: Option<i64> = sqlx::query_scalar("SELECT id FROM pledge_users WHERE email = $1")
            .bind(&request.email)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;
        if taken.is_some() {
            return Err(PledgeError::Conflict(format!(
                "an account for {} already exists",
                request.email
            )));
        }

        let user_row = sqlx::query(&format!(
            r#"
            INSERT INTO pledge_users
                (email, full_name, mobile_number, password_hash, is_verified, is_active, is_staff,
                 privacy_agreement_accepted, marketing_consent, privacy_accepted_at, date_joined)
            VALUES ($1, $2, $3, $4, TRUE, TRUE, FALSE, $5, $6, $7, $8)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&request.email)
        .bind(&request.full_name)
        .bind(&request.mobile_number)
        .bind(&request.password_hash)
        .bind(request.privacy_agreement_accepted)
        .bind(request.marketing_consent)
        .bind(request.privacy_agreement_accepted.then_some(now))
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_conflict)?;
        let user = user_from_row(&user_row)?;

        let event_row = sqlx::query(&format!(
            r#"
            INSERT INTO pledge_events
                (name, date, description, location, created_by, is_active, created_at, updated_at)
            VALUES ($1, $2, '', '', $3, TRUE, $4, $4)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(&request.event_name)
        .bind(request.event_date)
        .bind(user.id.0)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;
        let event = event_from_row(&event_row)?;

        sqlx::query("UPDATE pledge_registrations SET is_verified = TRUE WHERE id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok((user, event))
    }
}

#[async_trait]
impl EventStore for PostgresPledgeStore {
    async fn insert_event(
        &self,
        owner: UserId,
        event: &NewEvent,
        now: DateTime<Utc>,
    ) -> PledgeResult<Event> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO pledge_events
                (name, date, description, location, created_by, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, TRUE, $6, $6)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(&event.name)
        .bind(event.date)
        .bind(&event.description)
        .bind(&event.location)
        .bind(owner.0)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_foreign_key(e, "user", owner))?;
        event_from_row(&row)
    }

    async fn get_event(&self, id: EventId) -> PledgeResult<Option<Event>> {
        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM pledge_events WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn save_event(&self, event: &Event) -> PledgeResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE pledge_events
               SET name = $1, date = $2, description = $3, location = $4,
                   is_active = $5, updated_at = $6
             WHERE id = $7
            "#,
        )
        .bind(&event.name)
        .bind(event.date)
        .bind(&event.description)
        .bind(&event.location)
        .bind(event.is_active)
        .bind(event.updated_at)
        .bind(event.id.0)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        ensure_updated(result.rows_affected(), "event", event.id)
    }

    async fn list_events_for_user(&self, owner: UserId) -> PledgeResult<Vec<Event>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM pledge_events WHERE created_by = $1 \
             ORDER BY date DESC, name ASC"
        ))
        .bind(owner.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(event_from_row).collect()
    }

    async fn count_active_events(&self) -> PledgeResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pledge_events WHERE is_active")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        to_usize(count)
    }
}

#[async_trait]
impl PledgeRecordStore for PostgresPledgeStore {
    async fn insert_pledge(&self, pledge: &NewPledge, now: DateTime<Utc>) -> PledgeResult<Pledge> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO pledge_pledges
                (event_id, name, mobile_number, pledge_amount, amount_paid, status, whatsapp,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, 0, $5, $6, $7, $7)
            RETURNING {PLEDGE_COLUMNS}
            "#
        ))
        .bind(pledge.event_id.0)
        .bind(&pledge.name)
        .bind(&pledge.mobile_number)
        .bind(pledge.pledge_amount)
        .bind(PledgeStatus::New.as_str())
        .bind(pledge.whatsapp)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_foreign_key(e, "event", pledge.event_id))?;
        pledge_from_row(&row)
    }

    async fn get_pledge(&self, id: PledgeId) -> PledgeResult<Option<Pledge>> {
        self.fetch_pledge(id).await
    }

    async fn save_pledge(&self, pledge: &Pledge) -> PledgeResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE pledge_pledges
               SET name = $1, mobile_number = $2, pledge_amount = $3, amount_paid = $4,
                   status = $5, whatsapp = $6, updated_at = $7
             WHERE id = $8
            "#,
        )
        .bind(&pledge.name)
        .bind(&pledge.mobile_number)
        .bind(pledge.pledge_amount)
        .bind(pledge.amount_paid)
        .bind(pledge.status.as_str())
        .bind(pledge.whatsapp)
        .bind(pledge.updated_at)
        .bind(pledge.id.0)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        ensure_updated(result.rows_affected(), "pledge", pledge.id)
    }

    async fn delete_pledge(&self, id: PledgeId) -> PledgeResult<bool> {
        let result = sqlx::query("DELETE FROM pledge_pledges WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_pledges(&self, filter: &PledgeFilter) -> PledgeResult<Vec<Pledge>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PLEDGE_COLUMNS} FROM pledge_pledges
             WHERE ($1::BIGINT IS NULL OR event_id = $1)
               AND ($2::TEXT IS NULL OR status = $2)
               AND ($3::TEXT IS NULL OR name ILIKE $3)
             ORDER BY created_at DESC, name ASC, id DESC
            "#
        ))
        .bind(filter.event_id.map(|id| id.0))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.search.as_deref().map(like_pattern))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(pledge_from_row).collect()
    }
}

#[async_trait]
impl TransactionStore for PostgresPledgeStore {
    async fn insert_transaction_and_settle(
        &self,
        pledge_id: PledgeId,
        amount: i64,
        method: PaymentMethod,
        reference: &str,
        now: DateTime<Utc>,
    ) -> PledgeResult<(Transaction, Pledge)> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let row = sqlx::query(&format!(
            "SELECT {PLEDGE_COLUMNS} FROM pledge_pledges WHERE id = $1 FOR UPDATE"
        ))
        .bind(pledge_id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?
        .ok_or_else(|| PledgeError::not_found("pledge", pledge_id))?;
        let mut pledge = pledge_from_row(&row)?;
        ledger::add_payment(pledge.amount_paid, amount)?;

        let tx_row = sqlx::query(&format!(
            r#"
            INSERT INTO pledge_transactions
                (pledge_id, amount, method, transaction_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(pledge_id.0)
        .bind(amount)
        .bind(method.as_str())
        .bind(reference)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_conflict)?;
        let transaction = transaction_from_row(&tx_row)?;

        let paid: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM pledge_transactions WHERE pledge_id = $1",
        )
        .bind(pledge_id.0)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;
        ledger::settle(&mut pledge, paid, now);

        sqlx::query(
            "UPDATE pledge_pledges SET amount_paid = $1, status = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(pledge.amount_paid)
        .bind(pledge.status.as_str())
        .bind(pledge.updated_at)
        .bind(pledge_id.0)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok((transaction, pledge))
    }

    async fn get_transaction(&self, id: TransactionKey) -> PledgeResult<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM pledge_transactions WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> PledgeResult<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.pledge_id, t.amount, t.method, t.transaction_id, t.created_at, t.updated_at
              FROM pledge_transactions t
              JOIN pledge_pledges p ON p.id = t.pledge_id
             WHERE ($1::BIGINT IS NULL OR p.event_id = $1)
               AND ($2::BIGINT IS NULL OR t.pledge_id = $2)
               AND ($3::TEXT IS NULL OR t.method = $3)
               AND ($4::TEXT IS NULL OR t.transaction_id ILIKE $4)
             ORDER BY t.created_at DESC, t.id DESC
            "#,
        )
        .bind(filter.event_id.map(|id| id.0))
        .bind(filter.pledge_id.map(|id| id.0))
        .bind(filter.method.map(|m| m.as_str()))
        .bind(filter.search.as_deref().map(like_pattern))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(transaction_from_row).collect()
    }
}

#[async_trait]
impl MessageStore for PostgresPledgeStore {
    async fn insert_message(
        &self,
        pledge_id: PledgeId,
        body: &str,
        method: MessageMethod,
        status: MessageStatus,
        now: DateTime<Utc>,
    ) -> PledgeResult<Message> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO pledge_messages
                (pledge_id, body, method, status, attempts, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 0, $5, $5)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(pledge_id.0)
        .bind(body)
        .bind(method.as_str())
        .bind(status.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_foreign_key(e, "pledge", pledge_id))?;
        message_from_row(&row)
    }

    async fn get_message(&self, id: MessageId) -> PledgeResult<Option<Message>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM pledge_messages WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn save_message(&self, message: &Message) -> PledgeResult<()> {
        let attempts = i32::try_from(message.attempts)
            .map_err(|_| PledgeError::Storage("message attempts out of range".to_string()))?;
        let result = sqlx::query(
            r#"
            UPDATE pledge_messages
               SET body = $1, method = $2, status = $3, attempts = $4, updated_at = $5
             WHERE id = $6
            "#,
        )
        .bind(&message.body)
        .bind(message.method.as_str())
        .bind(message.status.as_str())
        .bind(attempts)
        .bind(message.updated_at)
        .bind(message.id.0)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        ensure_updated(result.rows_affected(), "message", message.id)
    }

    async fn list_messages(&self, filter: &MessageFilter) -> PledgeResult<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT m.id, m.pledge_id, m.body, m.method, m.status, m.attempts, m.created_at, m.updated_at
              FROM pledge_messages m
              JOIN pledge_pledges p ON p.id = m.pledge_id
             WHERE ($1::BIGINT IS NULL OR p.event_id = $1)
               AND ($2::BIGINT IS NULL OR m.pledge_id = $2)
               AND ($3::TEXT IS NULL OR m.status = $3)
               AND ($4::TEXT IS NULL OR m.method = $4)
             ORDER BY m.created_at DESC, m.id DESC
            "#,
        )
        .bind(filter.event_id.map(|id| id.0))
        .bind(filter.pledge_id.map(|id| id.0))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.method.map(|m| m.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(message_from_row).collect()
    }

    async fn oldest_messages_with_status(
        &self,
        status: MessageStatus,
        limit: usize,
    ) -> PledgeResult<Vec<Message>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM pledge_messages WHERE status = $1 \
             ORDER BY created_at ASC, id ASC LIMIT $2"
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(message_from_row).collect()
    }

    async fn message_counts(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> PledgeResult<BTreeMap<MessageStatus, usize>> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS total FROM pledge_messages
             WHERE ($1::TIMESTAMPTZ IS NULL OR created_at >= $1)
             GROUP BY status
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut counts = BTreeMap::new();
        for row in &rows {
            let status: MessageStatus = parse_column(row, "status")?;
            let total: i64 = column(row, "total")?;
            counts.insert(status, to_usize(total)?);
        }
        Ok(counts)
    }
}

#[async_trait]
impl TemplateStore for PostgresPledgeStore {
    async fn insert_template(
        &self,
        template: &NewTemplate,
        name: &str,
        now: DateTime<Utc>,
    ) -> PledgeResult<MessageTemplate> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO pledge_templates
                (event_id, body, kind, name, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, TRUE, $5, $5)
            RETURNING {TEMPLATE_COLUMNS}
            "#
        ))
        .bind(template.event_id.map(|id| id.0))
        .bind(&template.body)
        .bind(template.kind.as_str())
        .bind(name)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            let event = template
                .event_id
                .map(|id| id.to_string())
                .unwrap_or_default();
            map_foreign_key(e, "event", event)
        })?;
        template_from_row(&row)
    }

    async fn get_template(&self, id: TemplateId) -> PledgeResult<Option<MessageTemplate>> {
        let row = sqlx::query(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM pledge_templates WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.as_ref().map(template_from_row).transpose()
    }

    async fn save_template(&self, template: &MessageTemplate) -> PledgeResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE pledge_templates
               SET event_id = $1, body = $2, kind = $3, name = $4, is_active = $5, updated_at = $6
             WHERE id = $7
            "#,
        )
        .bind(template.event_id.map(|id| id.0))
        .bind(&template.body)
        .bind(template.kind.as_str())
        .bind(&template.name)
        .bind(template.is_active)
        .bind(template.updated_at)
        .bind(template.id.0)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        ensure_updated(result.rows_affected(), "template", template.id)
    }

    async fn delete_template(&self, id: TemplateId) -> PledgeResult<bool> {
        let result = sqlx::query("DELETE FROM pledge_templates WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_templates(&self, filter: &TemplateFilter) -> PledgeResult<Vec<MessageTemplate>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TEMPLATE_COLUMNS} FROM pledge_templates
             WHERE ($1::BIGINT IS NULL OR event_id = $1)
               AND ($2::TEXT IS NULL OR kind = $2)
               AND ($3::BOOLEAN IS NULL OR is_active = $3)
             ORDER BY event_id ASC NULLS FIRST, name ASC, id ASC
            "#
        ))
        .bind(filter.event_id.map(|id| id.0))
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(filter.active)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        let mut templates = rows
            .iter()
            .map(template_from_row)
            .collect::<PledgeResult<Vec<_>>>()?;
        // Kind order is the enum's declaration order, not its wire name.
        templates.sort_by(|a, b| {
            a.event_id
                .cmp(&b.event_id)
                .then(a.kind.cmp(&b.kind))
                .then_with(|| a.name.cmp(&b.name))
                .then(a.id.cmp(&b.id))
        });
        Ok(templates)
    }
}

impl PledgeStore for PostgresPledgeStore {
    fn backend_label(&self) -> &'static str {
        "postgres"
    }
}

fn backend(err: sqlx::Error) -> PledgeError {
    PledgeError::Storage(err.to_string())
}

fn map_sqlx_conflict(err: sqlx::Error) -> PledgeError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return PledgeError::Conflict(db_err.message().to_string());
        }
    }
    backend(err)
}

/// `23503` means the referenced parent row is missing.
fn map_foreign_key(err: sqlx::Error, entity: &'static str, id: impl ToString) -> PledgeError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23503") {
            return PledgeError::not_found(entity, id);
        }
    }
    map_sqlx_conflict(err)
}

fn ensure_updated(rows: u64, entity: &'static str, id: impl ToString) -> PledgeResult<()> {
    if rows == 0 {
        return Err(PledgeError::not_found(entity, id));
    }
    Ok(())
}

fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn to_usize(value: i64) -> PledgeResult<usize> {
    usize::try_from(value).map_err(|_| PledgeError::Storage(format!("invalid count {value}")))
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> PledgeResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name).map_err(backend)
}

fn parse_column<T>(row: &PgRow, name: &str) -> PledgeResult<T>
where
    T: FromStr<Err = PledgeError>,
{
    let raw: String = column(row, name)?;
    raw.parse()
        .map_err(|e: PledgeError| PledgeError::Storage(format!("column {name}: {e}")))
}

fn user_from_row(row: &PgRow) -> PledgeResult<EventUser> {
    Ok(EventUser {
        id: UserId(column(row, "id")?),
        email: column(row, "email")?,
        full_name: column(row, "full_name")?,
        mobile_number: column(row, "mobile_number")?,
        password_hash: column(row, "password_hash")?,
        is_verified: column(row, "is_verified")?,
        is_active: column(row, "is_active")?,
        is_staff: column(row, "is_staff")?,
        privacy_agreement_accepted: column(row, "privacy_agreement_accepted")?,
        marketing_consent: column(row, "marketing_consent")?,
        privacy_accepted_at: column(row, "privacy_accepted_at")?,
        date_joined: column(row, "date_joined")?,
    })
}

fn event_from_row(row: &PgRow) -> PledgeResult<Event> {
    Ok(Event {
        id: EventId(column(row, "id")?),
        name: column(row, "name")?,
        date: column(row, "date")?,
        description: column(row, "description")?,
        location: column(row, "location")?,
        created_by: UserId(column(row, "created_by")?),
        is_active: column(row, "is_active")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn pledge_from_row(row: &PgRow) -> PledgeResult<Pledge> {
    Ok(Pledge {
        id: PledgeId(column(row, "id")?),
        event_id: EventId(column(row, "event_id")?),
        name: column(row, "name")?,
        mobile_number: column(row, "mobile_number")?,
        pledge_amount: column(row, "pledge_amount")?,
        amount_paid: column(row, "amount_paid")?,
        status: parse_column(row, "status")?,
        whatsapp: column(row, "whatsapp")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> PledgeResult<Transaction> {
    Ok(Transaction {
        id: TransactionKey(column(row, "id")?),
        pledge_id: PledgeId(column(row, "pledge_id")?),
        amount: column(row, "amount")?,
        method: parse_column::<PaymentMethod>(row, "method")?,
        transaction_id: column(row, "transaction_id")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn message_from_row(row: &PgRow) -> PledgeResult<Message> {
    let attempts: i32 = column(row, "attempts")?;
    Ok(Message {
        id: MessageId(column(row, "id")?),
        pledge_id: PledgeId(column(row, "pledge_id")?),
        body: column(row, "body")?,
        method: parse_column::<MessageMethod>(row, "method")?,
        status: parse_column::<MessageStatus>(row, "status")?,
        attempts: u32::try_from(attempts)
            .map_err(|_| PledgeError::Storage(format!("negative attempts {attempts}")))?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn template_from_row(row: &PgRow) -> PledgeResult<MessageTemplate> {
    let event_id: Option<i64> = column(row, "event_id")?;
    Ok(MessageTemplate {
        id: TemplateId(column(row, "id")?),
        event_id: event_id.map(EventId),
        body: column(row, "body")?,
        kind: parse_column::<TemplateKind>(row, "kind")?,
        name: column(row, "name")?,
        is_active: column(row, "is_active")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn registration_from_row(row: &PgRow) -> PledgeResult<RegistrationRequest> {
    Ok(RegistrationRequest {
        id: RegistrationId(column(row, "id")?),
        full_name: column(row, "full_name")?,
        email: column(row, "email")?,
        password_hash: column(row, "password_hash")?,
        mobile_number: column(row, "mobile_number")?,
        event_name: column(row, "event_name")?,
        event_date: column(row, "event_date")?,
        verification_token: column(row, "verification_token")?,
        is_verified: column(row, "is_verified")?,
        privacy_agreement_accepted: column(row, "privacy_agreement_accepted")?,
        marketing_consent: column(row, "marketing_consent")?,
        created_at: column(row, "created_at")?,
        expires_at: column(row, "expires_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("juma"), "%juma%");
    }

    #[test]
    fn zero_rows_is_not_found() {
        assert!(matches!(
            ensure_updated(0, "pledge", PledgeId(3)),
            Err(PledgeError::NotFound { entity: "pledge", .. })
        ));
        assert!(ensure_updated(1, "pledge", PledgeId(3)).is_ok());
    }
}
