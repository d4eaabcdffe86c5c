//! Postgres client owning the connection pool.
//!
//! # Design
//! `PgClient::connect` fails fast: an unreachable database or a missing
//! required table is a startup error, never something the handlers see.
//! The server only needs `DatabaseClient::shutdown`, so it depends on the
//! trait rather than on `PgClient`.

use async_trait::async_trait;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool,
};
use tracing::{debug, info};

use crate::{config::DatabaseConfig, error::ClientError};

pub const TODO_TABLE: &str = "todo";

const CREATE_TODO_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS todo (
        id BIGSERIAL PRIMARY KEY,
        todo TEXT NOT NULL,
        created_on TIMESTAMPTZ NOT NULL
    )
"#;

/// Closable handle to the database, as seen by the server lifecycle.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Closes every pooled connection. Closing twice is an error.
    async fn shutdown(&self) -> Result<(), ClientError>;
}

#[derive(Clone, Debug)]
pub struct PgClient {
    pool: PgPool,
}

impl PgClient {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, ClientError> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.db_name);

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect_with(options)
            .await
            .map_err(ClientError::Connect)?;

        let client = Self { pool };
        if config.create_table {
            client.create_todo_table().await?;
        }
        client.check_tables(config).await?;

        info!(host = %config.host, db_name = %config.db_name, "connected to postgres");
        Ok(client)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Idempotent.
    pub async fn create_todo_table(&self) -> Result<(), ClientError> {
        sqlx::query(CREATE_TODO_TABLE)
            .execute(&self.pool)
            .await
            .map_err(ClientError::CreateTable)?;
        debug!(table = TODO_TABLE, "todo table ensured");
        Ok(())
    }

    async fn check_tables(&self, config: &DatabaseConfig) -> Result<(), ClientError> {
        for table in &config.tables {
            let found: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
                .bind(table)
                .fetch_one(&self.pool)
                .await
                .map_err(|source| ClientError::TableCheck {
                    table: table.clone(),
                    source,
                })?;

            if found.is_none() {
                return Err(ClientError::MissingTable {
                    table: table.clone(),
                    host: config.host.clone(),
                    db_name: config.db_name.clone(),
                });
            }
            debug!(table = %table, "required table found");
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseClient for PgClient {
    async fn shutdown(&self) -> Result<(), ClientError> {
        if self.pool.is_closed() {
            return Err(ClientError::AlreadyClosed);
        }
        self.pool.close().await;
        Ok(())
    }
}
