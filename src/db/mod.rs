//! Database connection pool and store selection.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::store::{ContentRepository, FindingStore, MemoryStore, PgStore};

/// `DATABASE_URL` prefix selecting the in-process store.
pub const MEMORY_URL_PREFIX: &str = "memory:";

/// Create a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Finding store and content repository backed by the same storage.
pub struct Stores {
    pub findings: Arc<dyn FindingStore>,
    pub content: Arc<dyn ContentRepository>,
}

impl Stores {
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            findings: store.clone(),
            content: store,
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self {
            findings: store.clone(),
            content: store,
        }
    }
}

/// Open the configured backend, running migrations for Postgres.
pub async fn open_stores(config: &AppConfig) -> Result<Stores, anyhow::Error> {
    if config.database_url.starts_with(MEMORY_URL_PREFIX) {
        tracing::warn!("Using in-memory store; findings are lost on exit");
        return Ok(Stores::memory());
    }

    let pool = create_pool(&config.database_url, config.database_max_connections).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");
    Ok(Stores::postgres(pool))
}
