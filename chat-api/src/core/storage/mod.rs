//! Storage abstractions for the chat API
//!
//! Chat state is split between two stores: a relational record store
//! (users, chats, conversations, messages) and a document content store
//! (question/response turns and branch topology). A third store backs the
//! response cache.
//!
//! ## Available Backends
//!
//! - `memory`: In-memory storage using HashMap/DashMap (default)
//! - `external`: PostgreSQL records, Neo4j content, in-memory cache

mod error;
mod memory;
pub mod neo4j;
pub mod postgres;
mod traits;

pub use error::*;
pub use memory::*;
pub use neo4j::{Neo4jConfig, Neo4jContentStore};
pub use postgres::{PostgresConfig, PostgresRecordStore};
pub use traits::*;

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::core::config::{Settings, StorageBackend};
use crate::core::retry::{RetryConfig, RetryPolicy};

/// The stores a running server is wired to
#[derive(Clone)]
pub struct Stores {
    pub records: Arc<dyn RecordStore>,
    pub contents: Arc<dyn ContentStore>,
    pub cache: Arc<dyn CacheStore>,
}

impl Stores {
    pub fn in_memory(cache_config: InMemoryCacheConfig) -> Self {
        Self {
            records: Arc::new(InMemoryRecordStore::new()),
            contents: Arc::new(InMemoryContentStore::new()),
            cache: Arc::new(InMemoryCacheStore::new(cache_config)),
        }
    }

    /// Build the stores named by `storage.backend`, retrying external
    /// connections with backoff.
    pub async fn from_settings(settings: &Settings) -> StoreResult<Self> {
        let cache_config = InMemoryCacheConfig {
            max_entries: settings.cache.max_entries,
        };

        match settings.storage.backend {
            StorageBackend::Memory => {
                info!("Using in-memory storage");
                Ok(Self::in_memory(cache_config))
            },
            StorageBackend::External => {
                let call_timeout = Duration::from_millis(settings.storage.call_timeout_ms);
                let retry = RetryPolicy::new(RetryConfig::default());

                let pg_config = PostgresConfig {
                    url: settings.database.url.clone(),
                    max_connections: settings.database.max_connections,
                    call_timeout,
                };
                let records = retry
                    .execute("postgres connect", || PostgresRecordStore::connect(&pg_config))
                    .await?;

                let neo4j_config = Neo4jConfig {
                    uri: settings.neo4j.uri.clone(),
                    user: settings.neo4j.user.clone(),
                    password: settings.neo4j.password.clone(),
                    call_timeout,
                };
                let contents = retry
                    .execute("neo4j connect", || Neo4jContentStore::connect(&neo4j_config))
                    .await?;

                info!("Using PostgreSQL records and Neo4j content");
                Ok(Self {
                    records: Arc::new(records),
                    contents: Arc::new(contents),
                    cache: Arc::new(InMemoryCacheStore::new(cache_config)),
                })
            },
        }
    }
}
