//! Connection factory for the orchestrator's collaborators.

use std::sync::Arc;

use brainns_db::DbPool;

use crate::queue::{JobQueue, MemoryJobQueue, PgJobQueue};
use crate::store::{MemoryStore, PgSegmentationStore, SegmentationStore};

/// Queue and store sharing one backend.
#[derive(Clone)]
pub struct Backends {
    pub queue: Arc<dyn JobQueue>,
    pub store: Arc<dyn SegmentationStore>,
    /// Set for Postgres backends; used for health checks.
    pub pool: Option<DbPool>,
}

impl Backends {
    /// Connect to Postgres and apply pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = brainns_db::create_pool(database_url).await?;
        tracing::info!("Database connection pool created");

        brainns_db::run_migrations(&pool)
            .await
            .map_err(|e| sqlx::Error::Migrate(Box::new(e)))?;
        tracing::info!("Database migrations applied");

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: DbPool) -> Self {
        Self {
            queue: Arc::new(PgJobQueue::new(pool.clone())),
            store: Arc::new(PgSegmentationStore::new(pool.clone())),
            pool: Some(pool),
        }
    }

    /// Process-local backends for tests and single-process development.
    pub fn in_memory() -> Self {
        Self {
            queue: Arc::new(MemoryJobQueue::new()),
            store: Arc::new(MemoryStore::new()),
            pool: None,
        }
    }

    /// Verify the backing database answers, when there is one.
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        match &self.pool {
            Some(pool) => brainns_db::health_check(pool).await,
            None => Ok(()),
        }
    }
}
