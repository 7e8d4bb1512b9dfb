//! Postgres record store
//!
//! Holds one `PgConnection` for the whole run. The advisory lock is session
//! scoped, so it must be taken and released on this same connection, and it
//! disappears with the session if the process is killed.

use crate::backend::{validate_table_name, MigrationStore};
use crate::db::PgSettings;
use crate::errors::{connection_error, record_table_error, ApplyFailure, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use folio_core::errors::{ExError, ExErrorKind};
use folio_core::{MigrationRecord, MigrationUnit};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::{Connection, Executor};

pub struct PostgresStore {
    conn: PgConnection,
    table: String,
}

type RecordRow = (String, DateTime<Utc>, Option<String>);

impl PostgresStore {
    /// Connect with discrete settings (host, port, database, user, password, TLS)
    pub async fn connect(settings: &PgSettings, table: &str) -> Result<Self> {
        validate_table_name(table)?;

        let mut options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .database(&settings.database)
            .username(&settings.user)
            .application_name("folio-migrate")
            .ssl_mode(if settings.ssl {
                PgSslMode::Require
            } else {
                PgSslMode::Prefer
            });
        if let Some(password) = &settings.password {
            options = options.password(password.expose());
        }

        Self::connect_with(&options, table).await
    }

    /// Connect from a `postgres://` URL
    pub async fn connect_url(url: &str, table: &str) -> Result<Self> {
        validate_table_name(table)?;
        let options: PgConnectOptions = url
            .parse()
            .map_err(|e| connection_error("postgres", format!("invalid url: {}", e)))?;
        Self::connect_with(&options, table).await
    }

    async fn connect_with(options: &PgConnectOptions, table: &str) -> Result<Self> {
        let conn = PgConnection::connect_with(options)
            .await
            .map_err(|e| connection_error("postgres", e))?;
        Ok(Self {
            conn,
            table: table.to_string(),
        })
    }

    /// Close the session gracefully, releasing any session-scoped lock
    pub async fn close(self) -> Result<()> {
        self.conn
            .close()
            .await
            .map_err(|e| connection_error("postgres", e))
    }
}

#[async_trait]
impl MigrationStore for PostgresStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    fn table(&self) -> &str {
        &self.table
    }

    async fn record_table_exists(&mut self) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )",
        )
        .bind(&self.table)
        .fetch_one(&mut self.conn)
        .await
        .map_err(|e| record_table_error(&self.table, e))
    }

    async fn ensure_record_table(&mut self) -> Result<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id SERIAL PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                checksum TEXT
            );
            ALTER TABLE {table} ADD COLUMN IF NOT EXISTS checksum TEXT;",
            table = self.table
        );
        self.conn
            .execute(ddl.as_str())
            .await
            .map_err(|e| record_table_error(&self.table, e))?;
        Ok(())
    }

    async fn find_record(&mut self, name: &str) -> Result<Option<MigrationRecord>> {
        let sql = format!(
            "SELECT name, applied_at, checksum FROM {} WHERE name = $1",
            self.table
        );
        let row: Option<RecordRow> = sqlx::query_as(&sql)
            .bind(name)
            .fetch_optional(&mut self.conn)
            .await
            .map_err(|e| record_table_error(&self.table, e))?;

        Ok(row.map(|(name, applied_at, checksum)| MigrationRecord {
            name,
            applied_at,
            checksum,
        }))
    }

    async fn list_records(&mut self) -> Result<Vec<MigrationRecord>> {
        let sql = format!(
            "SELECT name, applied_at, checksum FROM {} ORDER BY applied_at, id",
            self.table
        );
        let rows: Vec<RecordRow> = sqlx::query_as(&sql)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| record_table_error(&self.table, e))?;

        Ok(rows
            .into_iter()
            .map(|(name, applied_at, checksum)| MigrationRecord {
                name,
                applied_at,
                checksum,
            })
            .collect())
    }

    async fn apply_unit(
        &mut self,
        unit: &MigrationUnit,
        applied_at: DateTime<Utc>,
    ) -> std::result::Result<(), ApplyFailure> {
        let insert = format!(
            "INSERT INTO {} (name, applied_at, checksum) VALUES ($1, $2, $3)",
            self.table
        );

        if !unit.is_transactional() {
            self.conn
                .execute(unit.content())
                .await
                .map_err(|e| ApplyFailure::Execute(e.to_string()))?;
            sqlx::query(&insert)
                .bind(unit.name())
                .bind(applied_at)
                .bind(unit.checksum())
                .execute(&mut self.conn)
                .await
                .map_err(|e| ApplyFailure::Record {
                    message: e.to_string(),
                    rolled_back: false,
                })?;
            return Ok(());
        }

        let mut tx = self
            .conn
            .begin()
            .await
            .map_err(|e| ApplyFailure::Execute(e.to_string()))?;

        // No bind parameters: sent as a simple query, so multi-statement batches work
        let executed = (&mut *tx).execute(unit.content()).await;
        if let Err(e) = executed {
            tx.rollback().await.ok();
            return Err(ApplyFailure::Execute(e.to_string()));
        }

        let recorded = sqlx::query(&insert)
            .bind(unit.name())
            .bind(applied_at)
            .bind(unit.checksum())
            .execute(&mut *tx)
            .await;
        if let Err(e) = recorded {
            tx.rollback().await.ok();
            return Err(ApplyFailure::Record {
                message: e.to_string(),
                rolled_back: true,
            });
        }

        tx.commit()
            .await
            .map_err(|e| ApplyFailure::Execute(format!("commit failed: {}", e)))
    }

    async fn try_lock(&mut self, key: i64) -> Result<bool> {
        sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut self.conn)
            .await
            .map_err(|e| {
                ExError::new(ExErrorKind::Concurrency)
                    .with_op("acquire_lock")
                    .with_message(e.to_string())
            })
    }

    async fn unlock(&mut self, key: i64) -> Result<()> {
        let released = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(key)
            .fetch_one(&mut self.conn)
            .await
            .map_err(|e| {
                ExError::new(ExErrorKind::Concurrency)
                    .with_op("release_lock")
                    .with_message(e.to_string())
            })?;
        if !released {
            tracing::warn!(
                backend = "postgres",
                key,
                "advisory lock was not held at release"
            );
        }
        Ok(())
    }
}
