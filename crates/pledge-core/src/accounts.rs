//! Sign-up with email verification, login and account removal.

use crate::error::{PledgeError, PledgeResult};
use crate::store::{PledgeStore, RegistrationStore, UserStore};
use crate::types::{Event, EventUser, RegistrationDraft, RegistrationRequest, UserId};
use crate::validation;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

const HASH_SCHEME: &str = "sha256";
const SALT_BYTES: usize = 16;

/// Delivers verification links. Delivery mechanics live in adapters.
#[async_trait]
pub trait VerificationMailer: Send + Sync {
    async fn send_verification(&self, request: &RegistrationRequest, link: &str)
        -> PledgeResult<()>;
}

#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    /// Verification links are `<verify_base_url>/<token>`.
    pub verify_base_url: String,
    pub token_ttl: Duration,
    /// Offset from sign-up used when no event date is given.
    pub default_event_offset: Duration,
    pub password_rounds: u32,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            verify_base_url: "http://localhost:8080/v1/registrations/verify".to_string(),
            token_ttl: Duration::hours(24),
            default_event_offset: Duration::days(30),
            password_rounds: 50_000,
        }
    }
}

/// Sign-up form input.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationSubmission {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub mobile_number: String,
    pub event_name: String,
    #[serde(default)]
    pub event_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub privacy_agreement_accepted: bool,
    #[serde(default)]
    pub marketing_consent: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationOutcome {
    pub request: RegistrationRequest,
    pub email_sent: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifiedAccount {
    pub user: EventUser,
    pub event: Event,
}

#[derive(Clone)]
pub struct RegistrationService {
    store: Arc<dyn PledgeStore>,
    mailer: Arc<dyn VerificationMailer>,
    config: RegistrationConfig,
}

impl RegistrationService {
    pub fn new(
        store: Arc<dyn PledgeStore>,
        mailer: Arc<dyn VerificationMailer>,
        config: RegistrationConfig,
    ) -> Self {
        Self {
            store,
            mailer,
            config,
        }
    }

    pub fn verification_link(&self, token: &str) -> String {
        format!("{}/{token}", self.config.verify_base_url.trim_end_matches('/'))
    }

    /// Store a provisional sign-up and mail its verification link.
    ///
    /// A mailer failure is logged and reported; the request is kept so the
    /// link can be resent.
    pub async fn submit(&self, input: RegistrationSubmission) -> PledgeResult<RegistrationOutcome> {
        let full_name = validation::required("full_name", &input.full_name, 200)?;
        let email = validation::email(&input.email)?;
        validation::password(&input.password)?;
        let mobile_number = validation::mobile_number(&input.mobile_number)?;
        let event_name = validation::required("event_name", &input.event_name, 200)?;
        if !input.privacy_agreement_accepted {
            return Err(PledgeError::validation(
                "privacy_agreement_accepted",
                "you must accept the privacy policy to register",
            ));
        }
        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(PledgeError::Conflict(format!(
                "an account with email {email} already exists"
            )));
        }

        let now = Utc::now();
        let request = self
            .store
            .insert_registration(RegistrationDraft {
                full_name,
                email,
                password_hash: hash_password_blocking(
                    input.password.clone(),
                    self.config.password_rounds,
                )
                .await?,
                mobile_number,
                event_name,
                event_date: input
                    .event_date
                    .unwrap_or(now + self.config.default_event_offset),
                verification_token: Uuid::new_v4().to_string(),
                privacy_agreement_accepted: true,
                marketing_consent: input.marketing_consent,
                created_at: now,
                expires_at: now + self.config.token_ttl,
            })
            .await?;
        info!(
            registration_id = %request.id,
            email = %request.email,
            event = %request.event_name,
            "Registration saved"
        );

        let email_sent = self.mail(&request).await;
        Ok(RegistrationOutcome {
            request,
            email_sent,
        })
    }

    /// Turn a pending request into a verified user with their first event.
    pub async fn verify(&self, token: &str) -> PledgeResult<VerifiedAccount> {
        let request = self
            .store
            .find_pending_registration(token)
            .await?
            .ok_or_else(|| PledgeError::not_found("registration", token))?;
        if request.is_expired(Utc::now()) {
            warn!(registration_id = %request.id, "Verification link expired");
            return Err(PledgeError::Expired(
                "verification link has expired, please register again".to_string(),
            ));
        }

        let (user, event) = self
            .store
            .complete_registration(request.id, Utc::now())
            .await?;
        info!(user_id = %user.id, event_id = %event.id, email = %user.email, "Account verified");
        Ok(VerifiedAccount { user, event })
    }

    /// Issue a fresh token for a pending request and mail it again.
    pub async fn resend(&self, email: &str) -> PledgeResult<RegistrationOutcome> {
        let email = validation::normalize_email(email);
        let request = self
            .store
            .find_pending_registration_by_email(&email)
            .await?
            .ok_or_else(|| PledgeError::not_found("pending registration", &email))?;
        if request.is_expired(Utc::now()) {
            return Err(PledgeError::Expired(
                "registration has expired, please register again".to_string(),
            ));
        }

        let request = self
            .store
            .replace_registration_token(request.id, &Uuid::new_v4().to_string())
            .await?;
        let email_sent = self.mail(&request).await;
        Ok(RegistrationOutcome {
            request,
            email_sent,
        })
    }

    pub async fn authenticate(&self, email: &str, password: &str) -> PledgeResult<EventUser> {
        let email = validation::normalize_email(email);
        let user = self
            .store
            .find_user_by_email(&email)
            .await?
            .filter(|user| user.is_active)
            .ok_or(PledgeError::InvalidCredentials)?;
        if !verify_password_blocking(password, &user.password_hash).await? {
            return Err(PledgeError::InvalidCredentials);
        }
        if !user.is_verified {
            return Err(PledgeError::Unverified(user.email));
        }
        Ok(user)
    }

    /// Delete the account and everything it owns after re-checking the password.
    pub async fn delete_account(&self, user_id: UserId, password: &str) -> PledgeResult<()> {
        if password.trim().is_empty() {
            return Err(PledgeError::validation(
                "password",
                "password is required to confirm account deletion",
            ));
        }
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| PledgeError::not_found("user", user_id))?;
        if !verify_password_blocking(password, &user.password_hash).await? {
            return Err(PledgeError::InvalidCredentials);
        }
        self.store.delete_user(user_id).await?;
        info!(user_id = %user_id, email = %user.email, "Account deleted");
        Ok(())
    }

    async fn mail(&self, request: &RegistrationRequest) -> bool {
        let link = self.verification_link(&request.verification_token);
        match self.mailer.send_verification(request, &link).await {
            Ok(()) => {
                info!(registration_id = %request.id, email = %request.email, "Verification email sent");
                true
            }
            Err(err) => {
                error!(
                    registration_id = %request.id,
                    email = %request.email,
                    error = %err,
                    "Verification email failed"
                );
                false
            }
        }
    }
}

/// `sha256$<rounds>$<salt hex>$<digest hex>`.
pub fn hash_password(password: &str, rounds: u32) -> String {
    let mut salt = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = hex::encode(salt);
    let digest = derive(password, &salt, rounds.max(1));
    format!("{HASH_SCHEME}${}${salt}${}", rounds.max(1), hex::encode(digest))
}

pub fn verify_password(password: &str, encoded: &str) -> bool {
    let mut parts = encoded.split('$');
    let (Some(HASH_SCHEME), Some(rounds), Some(salt), Some(expected), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    let Ok(rounds) = rounds.parse::<u32>() else {
        return false;
    };
    let actual = hex::encode(derive(password, salt, rounds.max(1)));
    constant_time_eq(actual.as_bytes(), expected.as_bytes())
}

fn derive(password: &str, salt: &str, rounds: u32) -> [u8; 32] {
    let mut digest = [0u8; 32];
    digest.copy_from_slice(
        &Sha256::new()
            .chain_update(salt.as_bytes())
            .chain_update(password.as_bytes())
            .finalize(),
    );
    for _ in 1..rounds {
        let next = Sha256::new()
            .chain_update(digest)
            .chain_update(password.as_bytes())
            .finalize();
        digest.copy_from_slice(&next);
    }
    digest
}

/// [`hash_password`] on the blocking pool.
async fn hash_password_blocking(password: String, rounds: u32) -> PledgeResult<String> {
    tokio::task::spawn_blocking(move || hash_password(&password, rounds))
        .await
        .map_err(|err| PledgeError::Internal(format!("password hashing task failed: {err}")))
}

/// [`verify_password`] on the blocking pool.
async fn verify_password_blocking(password: &str, encoded: &str) -> PledgeResult<bool> {
    let (password, encoded) = (password.to_string(), encoded.to_string());
    tokio::task::spawn_blocking(move || verify_password(&password, &encoded))
        .await
        .map_err(|err| PledgeError::Internal(format!("password check task failed: {err}")))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
