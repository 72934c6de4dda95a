use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::Result;

fn connect_options(config: &DatabaseConfig) -> Result<SqliteConnectOptions> {
    // Introspection never writes; the handle is opened read-only and must
    // point at an existing database.
    let options = SqliteConnectOptions::from_str(&config.url)?
        .read_only(true)
        .create_if_missing(false);
    Ok(options)
}

fn pool_options(config: &DatabaseConfig) -> SqlitePoolOptions {
    SqlitePoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(30))
}

/// Open the introspection pool and establish the first connection.
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let pool = pool_options(config)
        .connect_with(connect_options(config)?)
        .await?;
    Ok(pool)
}

/// Build the pool without connecting; the first query opens a connection.
pub fn connect_lazy(config: &DatabaseConfig) -> Result<SqlitePool> {
    Ok(pool_options(config).connect_lazy_with(connect_options(config)?))
}
