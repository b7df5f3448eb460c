//! PostgreSQL staging, bulk copy, deduplication, indexing, and the swap
//!
//! All staging work happens against the `_new` tables and is committed
//! before the swap transaction begins, so concurrent readers only ever see
//! the complete previous pair or the complete new pair.

use crate::config::LoaderConfig;
use crate::error::{LoaderError, Result};
use crate::models::{PersonRecord, ResultRecord};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Null token rendered into COPY text streams.
pub const COPY_NULL_TOKEN: &str = "\\N";

/// Live relation names.
pub const RESULTS_TABLE: &str = "results";
pub const PERSONS_TABLE: &str = "persons";

/// Staging relation names, promoted by the swap.
pub const RESULTS_STAGING: &str = "results_new";
pub const PERSONS_STAGING: &str = "persons_new";

/// Lookup index names (staging and live).
pub const RESULTS_INDEX: &str = "idx_results_person";
pub const RESULTS_STAGING_INDEX: &str = "idx_results_person_new";

/// Open a connection pool, retrying while the store is still coming up.
///
/// Only connectivity-class failures are retried, with a fixed delay and a
/// bounded attempt count; anything else (bad credentials, missing
/// database) is returned immediately.
pub async fn connect_with_retry(config: &LoaderConfig) -> Result<PgPool> {
    let url = config.database.connection_url();
    let mut attempt = 1;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&url)
            .await
        {
            Ok(pool) => {
                info!(attempt, "Connected to database");
                return Ok(pool);
            },
            Err(err) if is_connectivity_error(&err) => {
                if attempt >= config.connect_attempts {
                    return Err(LoaderError::Connectivity {
                        attempts: attempt,
                        source: err,
                    });
                }
                warn!(
                    attempt,
                    max_attempts = config.connect_attempts,
                    delay_secs = config.connect_retry_delay_secs,
                    error = %err,
                    "Database not ready, retrying"
                );
                tokio::time::sleep(Duration::from_secs(config.connect_retry_delay_secs)).await;
                attempt += 1;
            },
            Err(err) => return Err(err.into()),
        }
    }
}

fn is_connectivity_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => true,
        // The server accepts TCP connections before it is ready to serve
        // them; 57P03 is "the database system is starting up".
        sqlx::Error::Database(db) => db.code().as_deref() == Some("57P03"),
        _ => false,
    }
}

/// Serializes a relation into a COPY text-format byte stream: tab
/// delimited, no header row, a configurable null token, fields escaped per
/// the COPY text rules.
struct CopyBuffer {
    buf: String,
    columns: usize,
    null_token: &'static str,
}

impl CopyBuffer {
    fn new(columns: usize, null_token: &'static str) -> Self {
        CopyBuffer {
            buf: String::new(),
            columns,
            null_token,
        }
    }

    fn push_row<'a, I>(&mut self, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        let mark = self.buf.len();
        let mut written = 0;
        for (index, value) in fields.into_iter().enumerate() {
            if index > 0 {
                self.buf.push('\t');
            }
            match value {
                Some(text) => escape_into(text, &mut self.buf),
                None => self.buf.push_str(self.null_token),
            }
            written += 1;
        }

        if written != self.columns {
            self.buf.truncate(mark);
            return Err(LoaderError::Ingestion(format!(
                "row has {written} fields, destination expects {}",
                self.columns
            )));
        }

        self.buf.push('\n');
        Ok(())
    }
}

/// Escape a field for the COPY text format.
fn escape_into(field: &str, out: &mut String) {
    for ch in field.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
}

/// All database-side operations of the pipeline.
pub struct ResultsStore {
    pool: PgPool,
}

impl ResultsStore {
    pub fn new(pool: PgPool) -> Self {
        ResultsStore { pool }
    }

    /// Whether a table exists in the public schema.
    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT FROM information_schema.tables
                 WHERE table_schema = 'public'
                 AND table_name = $1
             )",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    /// Drop any leftover staging pair and create it fresh.
    pub async fn init_staging(&self) -> Result<()> {
        info!("Initializing staging tables");

        sqlx::query("DROP TABLE IF EXISTS results_new CASCADE")
            .execute(&self.pool)
            .await?;
        sqlx::query("DROP TABLE IF EXISTS persons_new CASCADE")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE results_new (
                 person_id VARCHAR(10),
                 event_id VARCHAR(50),
                 competition_date DATE,
                 value INTEGER
             )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE persons_new (
                 person_id VARCHAR(10),
                 name VARCHAR(255)
             )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Stream persons into the staging table via COPY.
    pub async fn load_persons(&self, persons: &[PersonRecord]) -> Result<u64> {
        let mut buffer = CopyBuffer::new(2, COPY_NULL_TOKEN);
        for person in persons {
            buffer.push_row([Some(person.person_id.as_str()), person.name.as_deref()])?;
        }

        let rows = self
            .copy_rows(PERSONS_STAGING, &["person_id", "name"], buffer)
            .await?;
        info!(rows, "Persons staged");
        Ok(rows)
    }

    /// Stream joined results into the staging table via COPY.
    pub async fn load_results(&self, results: &[ResultRecord]) -> Result<u64> {
        let mut buffer = CopyBuffer::new(4, COPY_NULL_TOKEN);
        for result in results {
            let date = result.competition_date.map(|d| d.to_string());
            let value = result.value.map(|v| v.to_string());
            buffer.push_row([
                Some(result.person_id.as_str()),
                Some(result.event_id.as_str()),
                date.as_deref(),
                value.as_deref(),
            ])?;
        }

        let rows = self
            .copy_rows(
                RESULTS_STAGING,
                &["person_id", "event_id", "competition_date", "value"],
                buffer,
            )
            .await?;
        info!(rows, "Results staged");
        Ok(rows)
    }

    /// Bulk-copy a serialized relation into a staging table. Uses the
    /// store's COPY protocol rather than per-row inserts; a rejected
    /// statement or stream means the relation does not match the
    /// destination column list.
    async fn copy_rows(&self, table: &str, columns: &[&str], buffer: CopyBuffer) -> Result<u64> {
        let statement = format!("COPY {} ({}) FROM STDIN", table, columns.join(", "));
        debug!(table, bytes = buffer.buf.len(), "Starting bulk copy");

        let mut tx = self.pool.begin().await?;

        let mut copy = tx
            .copy_in_raw(&statement)
            .await
            .map_err(|e| LoaderError::Ingestion(format!("COPY into {table} rejected: {e}")))?;
        copy.send(buffer.buf.as_bytes())
            .await
            .map_err(|e| LoaderError::Ingestion(format!("COPY stream into {table} failed: {e}")))?;
        let rows = copy
            .finish()
            .await
            .map_err(|e| LoaderError::Ingestion(format!("COPY into {table} not accepted: {e}")))?;

        tx.commit().await?;
        Ok(rows)
    }

    /// Remove duplicate person rows and declare the identifier unique.
    ///
    /// The first row in load order survives: COPY into a fresh table
    /// assigns ascending ctids, so the lowest ctid is the earliest source
    /// row.
    pub async fn dedup_persons(&self) -> Result<u64> {
        info!("Deduplicating persons in staging");

        let removed = sqlx::query(
            "DELETE FROM persons_new a USING persons_new b
             WHERE a.ctid > b.ctid
             AND a.person_id = b.person_id",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        sqlx::query("ALTER TABLE persons_new ADD PRIMARY KEY (person_id)")
            .execute(&self.pool)
            .await?;

        debug!(removed, "Duplicate person rows removed");
        Ok(removed)
    }

    /// Build the composite lookup index on staged results, ordered for
    /// "latest result for a person and event" scans.
    pub async fn build_results_index(&self) -> Result<()> {
        info!("Building index on staged results");

        sqlx::query(
            "CREATE INDEX idx_results_person_new
             ON results_new (person_id, event_id, competition_date DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Atomically promote the staging pair to live. Either every step
    /// commits or the transaction rolls back and the previous live pair is
    /// untouched; readers never observe a partial state.
    pub async fn swap_tables(&self) -> Result<()> {
        info!("Swapping staging tables into place");

        const STEPS: [&str; 5] = [
            "DROP TABLE IF EXISTS results CASCADE",
            "DROP TABLE IF EXISTS persons CASCADE",
            "ALTER TABLE results_new RENAME TO results",
            "ALTER TABLE persons_new RENAME TO persons",
            "ALTER INDEX idx_results_person_new RENAME TO idx_results_person",
        ];

        let mut tx = self.pool.begin().await.map_err(LoaderError::Swap)?;

        for step in STEPS {
            if let Err(err) = sqlx::query(step).execute(&mut *tx).await {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback after failed swap also failed");
                }
                return Err(LoaderError::Swap(err));
            }
        }

        tx.commit().await.map_err(LoaderError::Swap)?;
        info!("Swap successful, live tables updated");
        Ok(())
    }
}
