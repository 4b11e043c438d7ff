use diesel::pg::PgConnection;
use diesel::r2d2::{self, ConnectionManager};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use thiserror::Error;

pub type DbPool = r2d2::Pool<ConnectionManager<PgConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Debug, Error)]
pub enum DbInitError {
    #[error("failed to create database pool: {0}")]
    Pool(#[from] r2d2::PoolError),
    #[error("failed to run database migrations: {0}")]
    Migrations(String),
}

pub fn init_pool(database_url: &str, max_size: u32) -> Result<DbPool, DbInitError> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().max_size(max_size).build(manager)?;

    // Run pending migrations automatically
    let mut conn = pool.get()?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| DbInitError::Migrations(e.to_string()))?;

    log::info!("Database migrations completed successfully");

    Ok(pool)
}
