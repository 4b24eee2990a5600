//! Store gateway for `sensorflow-telemetry`.
//!
//! The only module that talks SQL. It owns the connection pool, hands out
//! one scoped [`Session`] per pipeline invocation, and provisions the
//! readings table lazily:
//!
//! ```text
//! NonExistent --CREATE TABLE--> Created --CREATE TRIGGER--> TrackingEnabled
//! ```
//!
//! Table creation and change-tracking enablement are committed as two
//! separate transactions. Change tracking is a statement-level trigger that
//! publishes on a `NOTIFY` channel, which the aggregator side subscribes to
//! through [`Store::listen`].
//!
//! Identifiers (table, trigger, function, channel) are interpolated into
//! SQL text. They come from operator configuration and are validated by
//! [`crate::config::validate_identifier`]; reading values are always bound.

use std::fmt;

use serde::Serialize;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgListener, PgPool, PgPoolOptions};
use sqlx::{Connection, Postgres, Transaction};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{Config, Metric, MetricStats, Reading};

// ---

/// Store failures, split along the pipeline's error taxonomy.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or a connection/transaction failed.
    #[error("store connection failed: {0}")]
    Connect(#[source] sqlx::Error),

    /// DDL failed for a reason other than the object already existing.
    #[error("provisioning {object} failed: {source}")]
    Schema { object: String, source: sqlx::Error },

    /// A read or write statement failed.
    #[error("query on {table} failed: {source}")]
    Query { table: String, source: sqlx::Error },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Observable lifecycle of the readings table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableState {
    NonExistent,
    Created,
    TrackingEnabled,
}

impl fmt::Display for TableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TableState::NonExistent => "non-existent",
            TableState::Created => "created",
            TableState::TrackingEnabled => "tracking-enabled",
        };
        f.write_str(s)
    }
}

/// Outcome of [`Session::ensure_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioning {
    /// The table was already there (possibly created by a concurrent invocation).
    Existing,
    /// This call created the table.
    Created,
}

/// Names of every database object belonging to one readings table.
#[derive(Debug, Clone)]
pub struct TableNames {
    // ---
    pub table: String,
    pub notify_fn: String,
    pub trigger: String,
    pub channel: String,
}

impl TableNames {
    // ---
    pub fn new(table: &str, channel: &str) -> Self {
        TableNames {
            table: table.to_string(),
            notify_fn: format!("{}_notify_change", table),
            trigger: format!("{}_change_tracking", table),
            channel: channel.to_string(),
        }
    }
}

/// SQLSTATE codes meaning "the object is already there".
///
/// `23505` shows up when two sessions race to insert the same catalog row
/// (e.g. concurrent `CREATE TABLE` colliding on `pg_type`).
pub fn is_already_exists_code(code: &str) -> bool {
    matches!(code, "42P07" | "42710" | "42723" | "23505")
}

fn is_already_exists(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .is_some_and(|code| is_already_exists_code(&code))
}

/// Shared handle to the readings store.
#[derive(Debug, Clone)]
pub struct Store {
    // ---
    pool: PgPool,
    names: TableNames,
}

impl Store {
    // ---
    /// Build the connection pool described by `cfg`.
    pub async fn connect(cfg: &Config) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.db_pool_max)
            .connect(&cfg.db_url)
            .await
            .map_err(StoreError::Connect)?;

        Ok(Self::with_pool(pool, cfg))
    }

    pub fn with_pool(pool: PgPool, cfg: &Config) -> Self {
        Store {
            pool,
            names: TableNames::new(&cfg.table_name, &cfg.change_channel),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn names(&self) -> &TableNames {
        &self.names
    }

    /// Name of the database the pool is connected to.
    pub async fn current_database(&self) -> StoreResult<String> {
        sqlx::query_scalar("SELECT current_database()")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::Connect)
    }

    /// Acquire a connection for the duration of one invocation.
    ///
    /// The connection returns to the pool when the session is dropped,
    /// whichever way the invocation exits.
    pub async fn session(&self) -> StoreResult<Session<'_>> {
        let conn = self.pool.acquire().await.map_err(StoreError::Connect)?;
        Ok(Session {
            conn,
            names: &self.names,
        })
    }

    /// Subscribe to change notifications for the readings table.
    ///
    /// Works before the table exists; notifications start flowing once
    /// change tracking is enabled.
    pub async fn listen(&self) -> StoreResult<PgListener> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(StoreError::Connect)?;
        listener
            .listen(&self.names.channel)
            .await
            .map_err(StoreError::Connect)?;

        info!("Listening for changes on channel {}", self.names.channel);
        Ok(listener)
    }
}

/// One pooled connection scoped to a single pipeline invocation.
pub struct Session<'a> {
    // ---
    conn: PoolConnection<Postgres>,
    names: &'a TableNames,
}

impl Session<'_> {
    // ---
    /// Metadata lookup; never creates anything.
    pub async fn table_exists(&mut self) -> StoreResult<bool> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema()
                  AND table_name::text = $1
                  AND table_type = 'BASE TABLE'
            )
            "#,
        )
        .bind(&self.names.table)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| self.query_err(e))
    }

    /// Whether the change-tracking trigger is installed on the table.
    pub async fn tracking_enabled(&mut self) -> StoreResult<bool> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM pg_trigger t
                JOIN pg_class c ON c.oid = t.tgrelid
                JOIN pg_namespace n ON n.oid = c.relnamespace
                WHERE n.nspname::text = current_schema()
                  AND c.relname::text = $1
                  AND t.tgname::text = $2
            )
            "#,
        )
        .bind(&self.names.table)
        .bind(&self.names.trigger)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| self.query_err(e))
    }

    pub async fn table_state(&mut self) -> StoreResult<TableState> {
        // ---
        if !self.table_exists().await? {
            return Ok(TableState::NonExistent);
        }
        if self.tracking_enabled().await? {
            Ok(TableState::TrackingEnabled)
        } else {
            Ok(TableState::Created)
        }
    }

    /// Bring the table to [`TableState::TrackingEnabled`] (idempotent).
    ///
    /// Creation and tracking enablement commit separately. A table left
    /// without tracking by an earlier interrupted invocation gets tracking
    /// here. Losing a creation race to a concurrent invocation is not an
    /// error.
    pub async fn ensure_table(&mut self) -> StoreResult<Provisioning> {
        // ---
        let provisioning = if self.table_exists().await? {
            info!("Table {} exists.", self.names.table);
            Provisioning::Existing
        } else {
            info!("Creating table {}.", self.names.table);
            self.create_table().await?
        };

        if !self.tracking_enabled().await? {
            self.enable_tracking().await?;
            info!("Change tracking enabled on {}.", self.names.table);
        }

        Ok(provisioning)
    }

    async fn create_table(&mut self) -> StoreResult<Provisioning> {
        // ---
        let sql = format!(
            r#"
            CREATE TABLE "{}" (
                id           SERIAL  PRIMARY KEY,
                sensor_id    INTEGER NOT NULL,
                temp         INTEGER NOT NULL,
                wind_speed   INTEGER NOT NULL,
                rel_humidity INTEGER NOT NULL,
                co2          INTEGER NOT NULL
            )
            "#,
            self.names.table
        );

        let mut tx = self.conn.begin().await.map_err(StoreError::Connect)?;
        let result = sqlx::query(&sql).execute(&mut *tx).await;
        let result = match result {
            Ok(_) => tx.commit().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => Ok(Provisioning::Created),
            Err(e) if is_already_exists(&e) => {
                warn!(
                    "Table {} was created concurrently, continuing: {}",
                    self.names.table, e
                );
                Ok(Provisioning::Existing)
            }
            Err(source) => Err(StoreError::Schema {
                object: format!("table {}", self.names.table),
                source,
            }),
        }
    }

    /// Install the notify function and trigger in their own transaction.
    async fn enable_tracking(&mut self) -> StoreResult<()> {
        // ---
        let create_fn = format!(
            r#"
            CREATE OR REPLACE FUNCTION "{}"() RETURNS trigger
            LANGUAGE plpgsql AS $$
            BEGIN
                PERFORM pg_notify('{}', TG_TABLE_NAME);
                RETURN NULL;
            END;
            $$
            "#,
            self.names.notify_fn, self.names.channel
        );
        let create_trigger = format!(
            r#"
            CREATE TRIGGER "{}"
            AFTER INSERT OR UPDATE OR DELETE ON "{}"
            FOR EACH STATEMENT EXECUTE FUNCTION "{}"()
            "#,
            self.names.trigger, self.names.table, self.names.notify_fn
        );

        let mut tx = self.conn.begin().await.map_err(StoreError::Connect)?;
        let result = async {
            sqlx::query(&create_fn).execute(&mut *tx).await?;
            sqlx::query(&create_trigger).execute(&mut *tx).await?;
            tx.commit().await
        }
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if is_already_exists(&e) => {
                warn!(
                    "Change tracking on {} was enabled concurrently, continuing: {}",
                    self.names.table, e
                );
                Ok(())
            }
            Err(source) => Err(StoreError::Schema {
                object: format!("trigger {}", self.names.trigger),
                source,
            }),
        }
    }

    /// Insert a batch with one commit at the end.
    ///
    /// Nothing from the batch is visible if any insert fails.
    pub async fn insert_readings(&mut self, batch: &[Reading]) -> StoreResult<u64> {
        // ---
        let sql = format!(
            r#"
            INSERT INTO "{}" (sensor_id, temp, wind_speed, rel_humidity, co2)
            VALUES ($1, $2, $3, $4, $5)
            "#,
            self.names.table
        );

        let mut tx = self.conn.begin().await.map_err(StoreError::Connect)?;
        let mut inserted = 0;
        for r in batch {
            inserted += sqlx::query(&sql)
                .bind(r.sensor_id)
                .bind(r.temp)
                .bind(r.wind_speed)
                .bind(r.rel_humidity)
                .bind(r.co2)
                .execute(&mut *tx)
                .await
                .map_err(|e| query_err(self.names, e))?
                .rows_affected();
        }
        tx.commit().await.map_err(|e| query_err(self.names, e))?;

        debug!("Committed {} readings into {}", inserted, self.names.table);
        Ok(inserted)
    }

    pub async fn count_readings(&mut self) -> StoreResult<i64> {
        let sql = format!(r#"SELECT COUNT(*) FROM "{}""#, self.names.table);
        sqlx::query_scalar(&sql)
            .fetch_one(&mut *self.conn)
            .await
            .map_err(|e| self.query_err(e))
    }

    pub async fn sensor_ids(&mut self) -> StoreResult<Vec<i32>> {
        fetch_sensor_ids(&mut self.conn, self.names).await
    }

    pub async fn query_aggregate(
        &mut self,
        sensor_id: i32,
        metric: Metric,
    ) -> StoreResult<Option<MetricStats>> {
        fetch_aggregate(&mut self.conn, self.names, sensor_id, metric).await
    }

    /// Open a read-only `REPEATABLE READ` transaction so a series of reads
    /// all see the same table contents.
    pub async fn snapshot(&mut self) -> StoreResult<Snapshot<'_>> {
        // ---
        let mut tx = self.conn.begin().await.map_err(StoreError::Connect)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Connect)?;

        Ok(Snapshot {
            tx,
            names: self.names,
        })
    }

    fn query_err(&self, source: sqlx::Error) -> StoreError {
        query_err(self.names, source)
    }
}

/// Consistent read view over the readings table.
pub struct Snapshot<'s> {
    // ---
    tx: Transaction<'s, Postgres>,
    names: &'s TableNames,
}

impl Snapshot<'_> {
    // ---
    pub async fn sensor_ids(&mut self) -> StoreResult<Vec<i32>> {
        fetch_sensor_ids(&mut self.tx, self.names).await
    }

    pub async fn query_aggregate(
        &mut self,
        sensor_id: i32,
        metric: Metric,
    ) -> StoreResult<Option<MetricStats>> {
        fetch_aggregate(&mut self.tx, self.names, sensor_id, metric).await
    }

    pub async fn finish(self) -> StoreResult<()> {
        self.tx.commit().await.map_err(StoreError::Connect)
    }
}

fn query_err(names: &TableNames, source: sqlx::Error) -> StoreError {
    StoreError::Query {
        table: names.table.clone(),
        source,
    }
}

/// Distinct sensor ids with at least one reading, ascending.
async fn fetch_sensor_ids(conn: &mut PgConnection, names: &TableNames) -> StoreResult<Vec<i32>> {
    // ---
    let sql = format!(
        r#"SELECT DISTINCT sensor_id FROM "{}" ORDER BY sensor_id ASC"#,
        names.table
    );
    sqlx::query_scalar(&sql)
        .fetch_all(conn)
        .await
        .map_err(|e| query_err(names, e))
}

/// Min, max and average of one metric for one sensor, evaluated by the store.
///
/// The average follows integer-column semantics: `AVG` truncated toward
/// zero. `None` when the sensor has no readings.
async fn fetch_aggregate(
    conn: &mut PgConnection,
    names: &TableNames,
    sensor_id: i32,
    metric: Metric,
) -> StoreResult<Option<MetricStats>> {
    // ---
    let col = metric.column();
    let sql = format!(
        r#"
        SELECT MIN("{col}"), MAX("{col}"), TRUNC(AVG("{col}"))::BIGINT
        FROM "{table}"
        WHERE sensor_id = $1
        "#,
        col = col,
        table = names.table
    );

    let row: (Option<i32>, Option<i32>, Option<i64>) = sqlx::query_as(&sql)
        .bind(sensor_id)
        .fetch_one(conn)
        .await
        .map_err(|e| query_err(names, e))?;

    Ok(match row {
        (Some(min), Some(max), Some(average)) => Some(MetricStats { min, max, average }),
        _ => None,
    })
}
