use anyhow::{Result, Context};
use async_trait::async_trait;
use sqlx::{Pool, Postgres, postgres::PgPoolOptions};
use sqlx::types::Json;
use tracing::debug;

use crate::cli::config::PersistenceSettings;
use crate::error::ServiceError;
use crate::persistence::PersistenceService;

/// PostgreSQL implementation of the remote record store
pub struct PostgresStore {
    /// PostgreSQL connection pool
    pool: Pool<Postgres>,

    /// Schema name
    schema: String,
}

impl PostgresStore {
    /// Connections are opened on first insert
    pub fn new(settings: &PersistenceSettings) -> Result<Self> {
        if !is_identifier(&settings.schema_name) {
            anyhow::bail!("Invalid schema name: {}", settings.schema_name);
        }

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(&settings.url)
            .context("Invalid PostgreSQL connection URL")?;

        debug!("Configured PostgreSQL pool for schema {}", settings.schema_name);

        Ok(Self {
            pool,
            schema: settings.schema_name.clone(),
        })
    }
}

#[async_trait]
impl PersistenceService for PostgresStore {
    async fn insert(&self, table: &str, record: serde_json::Value) -> Result<(), ServiceError> {
        let query = insert_query(&self.schema, table, &record)
            .map_err(|message| ServiceError::Persistence { table: table.to_string(), message })?;

        sqlx::query(&query)
            .bind(Json(&record))
            .execute(&self.pool)
            .await
            .map_err(|e| ServiceError::Persistence {
                table: table.to_string(),
                message: e.to_string(),
            })?;

        debug!("Inserted record into {}.{}", self.schema, table);
        Ok(())
    }
}

/// Safe to splice into SQL as an unquoted identifier
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Insert statement that maps the record's keys onto table columns
///
/// Columns the record omits keep their defaults.
fn insert_query(schema: &str, table: &str, record: &serde_json::Value) -> Result<String, String> {
    if !is_identifier(table) {
        return Err(format!("Invalid table name: {}", table));
    }

    let object = record.as_object()
        .ok_or_else(|| "Record must be a JSON object".to_string())?;
    if object.is_empty() {
        return Err("Record has no columns".to_string());
    }

    let mut columns = Vec::with_capacity(object.len());
    for key in object.keys() {
        if !is_identifier(key) {
            return Err(format!("Invalid column name: {}", key));
        }
        columns.push(key.as_str());
    }
    // Map iteration order depends on serde_json features
    columns.sort_unstable();
    let columns = columns.join(", ");

    Ok(format!(
        "INSERT INTO {schema}.{table} ({columns}) \
         SELECT {columns} FROM jsonb_populate_record(NULL::{schema}.{table}, $1)",
    ))
}
