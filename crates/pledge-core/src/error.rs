use thiserror::Error;

/// Pledge domain errors.
#[derive(Debug, Error)]
pub enum PledgeError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("Expired: {0}")]
    Expired(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email address {0} has not been verified")]
    Unverified(String),

    #[error("No channel registered for method '{0}'")]
    ChannelNotFound(String),

    #[error("Channel '{channel}' failed: {message}")]
    ChannelFailure { channel: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PledgeError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn lock_poisoned(what: &str) -> Self {
        Self::Storage(format!("{what} lock poisoned"))
    }
}

pub type PledgeResult<T> = Result<T, PledgeError>;
