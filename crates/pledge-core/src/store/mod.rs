//! Storage contract and backends.
//!
//! The in-memory backend is what tests run against. The PostgreSQL backend
//! sits behind the default `postgres` feature and creates its schema on
//! connect.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod traits;

pub use memory::InMemoryPledgeStore;
pub use traits::{
    EventStore, MessageStore, PledgeRecordStore, PledgeStore, RegistrationStore, TemplateStore,
    TransactionStore, UserStore,
};

use crate::error::PledgeResult;
use std::sync::Arc;

/// Persistence backend configuration.
#[derive(Debug, Clone, Default)]
pub enum StorageConfig {
    /// Keep every record in process memory only.
    #[default]
    Memory,
    /// Persist records in PostgreSQL.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

/// Open the configured backend.
pub async fn open_store(config: &StorageConfig) -> PledgeResult<Arc<dyn PledgeStore>> {
    match config {
        StorageConfig::Memory => Ok(Arc::new(InMemoryPledgeStore::new())),
        #[cfg(feature = "postgres")]
        StorageConfig::Postgres {
            database_url,
            max_connections,
        } => {
            let store =
                postgres::PostgresPledgeStore::connect(database_url, *max_connections).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        StorageConfig::Postgres { .. } => Err(crate::error::PledgeError::Storage(
            "postgres storage requested but pledge-core was built without the `postgres` feature"
                .to_string(),
        )),
    }
}
