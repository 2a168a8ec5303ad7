use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::cli::config::PersistenceSettings;
use crate::error::ServiceError;

#[cfg(feature = "postgres")]
pub mod postgres;
pub mod supabase;

pub use supabase::SupabaseClient;

/// Remote record store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersistenceService: Send + Sync {
    /// Insert one record into `table`
    async fn insert(&self, table: &str, record: serde_json::Value) -> Result<(), ServiceError>;
}

/// Builds the configured persistence backend
pub struct PersistenceFactory;

impl PersistenceFactory {
    /// `None` when remote persistence is turned off
    pub async fn create(settings: &PersistenceSettings) -> Result<Option<Arc<dyn PersistenceService>>> {
        let service: Arc<dyn PersistenceService> = match settings.backend.as_str() {
            "none" => return Ok(None),
            "supabase" => Arc::new(SupabaseClient::new(settings)?),
            #[cfg(feature = "postgres")]
            "postgresql" => Arc::new(postgres::PostgresStore::new(settings)?),
            #[cfg(not(feature = "postgres"))]
            "postgresql" => {
                anyhow::bail!("PostgreSQL persistence requires the 'postgres' feature");
            }
            other => {
                anyhow::bail!("Unsupported persistence backend: {}", other);
            }
        };

        info!("Using {} persistence", settings.backend);
        Ok(Some(service))
    }
}
