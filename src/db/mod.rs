use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tokio::sync::OnceCell;

pub mod alert_store;
pub mod queries;
pub mod schema;
pub mod telemetry_store;

pub type DbPool = Pool<Postgres>;

static POOL: OnceCell<DbPool> = OnceCell::const_new();

pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Process-wide pool, connected on first use and reused afterwards.
pub async fn shared_pool(database_url: &str, max_connections: u32) -> Result<DbPool> {
    let pool = POOL
        .get_or_try_init(|| init_pool(database_url, max_connections))
        .await?;
    Ok(pool.clone())
}
