//! `PostgreSQL` implementation of the admission ledger.
//!
//! Stores the spot counter, the waitlist, the reservation registry, and the
//! attendee records in ordinary tables and layers the ledger's optimistic concurrency protocol on
//! top of a `ledger_versions` table holding one version row per logical
//! document.
//!
//! # Commit protocol
//!
//! 1. Ensure a version row exists for every key in the read set and every
//!    key the writes touch.
//! 2. Lock those rows with `SELECT ... FOR UPDATE`, in byte order of the key,
//!    so two commits never wait on each other in opposite orders.
//! 3. Compare against the read set. Any mismatch aborts with
//!    [`LedgerError::ConcurrencyConflict`].
//! 4. Apply the writes and bump the touched versions, then commit.
//!
//! Serialization failures and deadlocks reported by the server are mapped to
//! [`LedgerError::ConcurrencyConflict`] too, so the caller's retry loop covers
//! them.
//!
//! # Example
//!
//! ```no_run
//! use admission_postgres::PostgresLedger;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = PostgresLedger::connect("postgres://localhost/admission", 10).await?;
//! ledger.migrate().await?;
//! # Ok(())
//! # }
//! ```

mod rows;

use admission_core::ledger::{
    AdmissionLedger, DocumentKey, LedgerError, LedgerSnapshot, LedgerWrite, ReadSet, Version,
};
use admission_core::types::{SPOT_COUNTER_KEY, SpotCounter, SpotReservation, UserId};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::{PgPool, Row};
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

/// SQLSTATE for `serialization_failure`.
const SERIALIZATION_FAILURE: &str = "40001";
/// SQLSTATE for `deadlock_detected`.
const DEADLOCK_DETECTED: &str = "40P01";

/// `PostgreSQL`-backed [`AdmissionLedger`].
#[derive(Clone, Debug)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with at most `max_connections` pooled connections.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Unavailable`] if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| LedgerError::Unavailable(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    async fn load_snapshot(&self, subject: UserId) -> Result<LedgerSnapshot, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("Failed to begin snapshot", e))?;

        // One consistent view across every query below.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("Failed to set isolation", e))?;

        let observed_at: DateTime<Utc> = sqlx::query_scalar("SELECT now()")
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("Failed to read clock", e))?;

        let mut snapshot = LedgerSnapshot::empty(subject.clone(), observed_at);

        let count: Option<i32> = sqlx::query_scalar("SELECT count FROM spot_counter WHERE id = $1")
            .bind(SPOT_COUNTER_KEY)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("Failed to read counter", e))?;
        if let Some(count) = count {
            snapshot.counter = SpotCounter::new(rows::to_u32(count)?);
        }

        snapshot.waitlist_entry =
            sqlx::query("SELECT id, user_id, joined_at FROM waitlist WHERE user_id = $1")
                .bind(subject.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("Failed to read waitlist entry", e))?
                .map(|row| rows::waitlist_entry(&row))
                .transpose()?;

        snapshot.reservations = sqlx::query(
            r"
            SELECT id, user_id, granted_at, expires_at
            FROM spots
            WHERE user_id = $1
            ORDER BY expires_at DESC
            ",
        )
        .bind(subject.as_str())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("Failed to read reservations", e))?
        .iter()
        .map(rows::reservation)
        .collect::<Result<_, _>>()?;

        snapshot.waitlist_head = sqlx::query(
            "SELECT id, user_id, joined_at FROM waitlist ORDER BY joined_at, seq LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("Failed to read waitlist head", e))?
        .map(|row| rows::waitlist_entry(&row))
        .transpose()?;

        snapshot.attendee =
            sqlx::query("SELECT user_id, confirmed_at FROM attendees WHERE user_id = $1")
                .bind(subject.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("Failed to read attendee record", e))?
                .map(|row| rows::attendee(&row))
                .transpose()?;

        let keys = [
            DocumentKey::SpotCounter,
            DocumentKey::WaitlistOf(subject.clone()),
            DocumentKey::ReservationsOf(subject.clone()),
            DocumentKey::WaitlistHead,
            DocumentKey::AttendeeOf(subject),
        ];
        let names: Vec<String> = keys.iter().map(ToString::to_string).collect();
        let versions = fetch_versions(&mut *tx, &names, false).await?;
        for (key, name) in keys.into_iter().zip(&names) {
            let version = versions.get(name).copied().unwrap_or_default();
            snapshot.read_set.record(key, version);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("Failed to close snapshot", e))?;
        Ok(snapshot)
    }

    async fn commit_writes(
        &self,
        read_set: ReadSet,
        writes: Vec<LedgerWrite>,
    ) -> Result<(), LedgerError> {
        let started = Instant::now();

        let touched: Vec<String> = writes
            .iter()
            .flat_map(LedgerWrite::touched_keys)
            .map(|key| key.to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let lock_order: Vec<String> = read_set
            .iter()
            .map(|(key, _)| key.to_string())
            .chain(touched.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("Failed to begin commit", e))?;

        sqlx::query(
            r"
            INSERT INTO ledger_versions (doc_key, version)
            SELECT key, 0 FROM unnest($1::text[]) AS key
            ON CONFLICT (doc_key) DO NOTHING
            ",
        )
        .bind(&lock_order)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("Failed to create version rows", e))?;

        let current = fetch_versions(&mut *tx, &lock_order, true).await?;
        for (key, read_version) in read_set.iter() {
            let name = key.to_string();
            if current.get(&name).copied().unwrap_or_default() != *read_version {
                tracing::debug!(key = %name, "Read set changed before commit");
                return Err(LedgerError::ConcurrencyConflict { key: name });
            }
        }

        for write in writes {
            apply_write(&mut *tx, write).await?;
        }

        sqlx::query("UPDATE ledger_versions SET version = version + 1 WHERE doc_key = ANY($1)")
            .bind(&touched)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("Failed to bump versions", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("Failed to commit", e))?;

        metrics::histogram!("admission_ledger_commit_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        Ok(())
    }
}

/// Read version rows for `keys`, optionally locking them in key order.
async fn fetch_versions(
    conn: &mut PgConnection,
    keys: &[String],
    lock: bool,
) -> Result<HashMap<String, Version>, LedgerError> {
    let sql = if lock {
        r#"
        SELECT doc_key, version FROM ledger_versions
        WHERE doc_key = ANY($1)
        ORDER BY doc_key COLLATE "C"
        FOR UPDATE
        "#
    } else {
        "SELECT doc_key, version FROM ledger_versions WHERE doc_key = ANY($1)"
    };

    let rows = sqlx::query(sql)
        .bind(keys)
        .fetch_all(conn)
        .await
        .map_err(|e| map_sqlx_error("Failed to read versions", e))?;

    rows.iter()
        .map(|row| {
            let key: String = row
                .try_get("doc_key")
                .map_err(|e| map_sqlx_error("Bad version row", e))?;
            let version: i64 = row
                .try_get("version")
                .map_err(|e| map_sqlx_error("Bad version row", e))?;
            Ok((key, rows::to_version(version)?))
        })
        .collect()
}

async fn apply_write(conn: &mut PgConnection, write: LedgerWrite) -> Result<(), LedgerError> {
    match write {
        LedgerWrite::PutCounter(counter) => {
            sqlx::query(
                r"
                INSERT INTO spot_counter (id, count, updated_at)
                VALUES ($1, $2, now())
                ON CONFLICT (id) DO UPDATE SET count = EXCLUDED.count, updated_at = now()
                ",
            )
            .bind(SPOT_COUNTER_KEY)
            .bind(rows::to_i32(counter.count())?)
            .execute(conn)
            .await
            .map_err(|e| map_sqlx_error("Failed to write counter", e))?;
        },
        LedgerWrite::InsertWaitlistEntry(entry) => {
            sqlx::query("INSERT INTO waitlist (id, user_id, joined_at) VALUES ($1, $2, $3)")
                .bind(entry.id.as_uuid())
                .bind(entry.user_id.as_str())
                .bind(entry.joined_at)
                .execute(conn)
                .await
                .map_err(|e| {
                    if let sqlx::Error::Database(db_err) = &e {
                        if db_err.is_unique_violation() {
                            return LedgerError::Duplicate {
                                user_id: entry.user_id.clone(),
                            };
                        }
                    }
                    map_sqlx_error("Failed to insert waitlist entry", e)
                })?;
        },
        LedgerWrite::RemoveWaitlistEntry { user_id } => {
            sqlx::query("DELETE FROM waitlist WHERE user_id = $1")
                .bind(user_id.as_str())
                .execute(conn)
                .await
                .map_err(|e| map_sqlx_error("Failed to remove waitlist entry", e))?;
        },
        LedgerWrite::InsertReservation(reservation) => {
            sqlx::query(
                "INSERT INTO spots (id, user_id, granted_at, expires_at) VALUES ($1, $2, $3, $4)",
            )
            .bind(reservation.id.as_uuid())
            .bind(reservation.user_id.as_str())
            .bind(reservation.granted_at)
            .bind(reservation.expires_at)
            .execute(conn)
            .await
            .map_err(|e| map_sqlx_error("Failed to insert reservation", e))?;
        },
        LedgerWrite::DeleteReservation { id, .. } => {
            sqlx::query("DELETE FROM spots WHERE id = $1")
                .bind(id.as_uuid())
                .execute(conn)
                .await
                .map_err(|e| map_sqlx_error("Failed to delete reservation", e))?;
        },
        LedgerWrite::PutAttendee(attendee) => {
            sqlx::query(
                r"
                INSERT INTO attendees (user_id, confirmed_at) VALUES ($1, $2)
                ON CONFLICT (user_id) DO UPDATE SET confirmed_at = EXCLUDED.confirmed_at
                ",
            )
            .bind(attendee.user_id.as_str())
            .bind(attendee.confirmed_at)
            .execute(conn)
            .await
            .map_err(|e| map_sqlx_error("Failed to write attendee record", e))?;
        },
        LedgerWrite::RemoveAttendee { user_id } => {
            sqlx::query("DELETE FROM attendees WHERE user_id = $1")
                .bind(user_id.as_str())
                .execute(conn)
                .await
                .map_err(|e| map_sqlx_error("Failed to remove attendee record", e))?;
        },
    }
    Ok(())
}

/// Classify a driver error.
fn map_sqlx_error(context: &str, error: sqlx::Error) -> LedgerError {
    match &error {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED) => LedgerError::ConcurrencyConflict {
                key: "transaction".to_string(),
            },
            _ => LedgerError::Database(format!("{context}: {error}")),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            LedgerError::Unavailable(format!("{context}: {error}"))
        },
        _ => LedgerError::Database(format!("{context}: {error}")),
    }
}

impl AdmissionLedger for PostgresLedger {
    fn snapshot(&self, subject: &UserId) -> BoxFuture<'_, Result<LedgerSnapshot, LedgerError>> {
        let subject = subject.clone();
        Box::pin(async move { self.load_snapshot(subject).await })
    }

    fn commit(
        &self,
        read_set: ReadSet,
        writes: Vec<LedgerWrite>,
    ) -> BoxFuture<'_, Result<(), LedgerError>> {
        Box::pin(async move { self.commit_writes(read_set, writes).await })
    }

    fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<SpotReservation>, LedgerError>> {
        Box::pin(async move {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            sqlx::query(
                r"
                SELECT id, user_id, granted_at, expires_at
                FROM spots
                WHERE expires_at < $1
                ORDER BY expires_at
                LIMIT $2
                ",
            )
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to query expired reservations", e))?
            .iter()
            .map(rows::reservation)
            .collect()
        })
    }

    fn waitlist_position(
        &self,
        user_id: &UserId,
    ) -> BoxFuture<'_, Result<Option<u64>, LedgerError>> {
        let user_id = user_id.clone();
        Box::pin(async move {
            let ahead: i64 = sqlx::query_scalar(
                r"
                SELECT COUNT(*)
                FROM waitlist w, (SELECT joined_at, seq FROM waitlist WHERE user_id = $1) me
                WHERE (w.joined_at, w.seq) <= (me.joined_at, me.seq)
                ",
            )
            .bind(user_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to compute waitlist position", e))?;

            Ok(u64::try_from(ahead).ok().filter(|position| *position > 0))
        })
    }

    fn seed_counter(&self, count: u32) -> BoxFuture<'_, Result<bool, LedgerError>> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| map_sqlx_error("Failed to begin seed", e))?;

            let inserted = sqlx::query(
                r"
                INSERT INTO spot_counter (id, count)
                VALUES ($1, $2)
                ON CONFLICT (id) DO NOTHING
                ",
            )
            .bind(SPOT_COUNTER_KEY)
            .bind(rows::to_i32(count)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("Failed to seed counter", e))?
            .rows_affected()
                == 1;

            if inserted {
                // Snapshots that saw no counter must not commit against it.
                sqlx::query(
                    r"
                    INSERT INTO ledger_versions (doc_key, version) VALUES ($1, 1)
                    ON CONFLICT (doc_key) DO UPDATE SET version = ledger_versions.version + 1
                    ",
                )
                .bind(DocumentKey::SpotCounter.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("Failed to bump counter version", e))?;
            }

            tx.commit()
                .await
                .map_err(|e| map_sqlx_error("Failed to commit seed", e))?;

            if inserted {
                tracing::info!(spots = count, "Seeded spot counter");
            }
            Ok(inserted)
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), LedgerError>> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_are_unavailable() {
        let error = map_sqlx_error("ctx", sqlx::Error::PoolTimedOut);
        assert!(matches!(error, LedgerError::Unavailable(_)));
    }

    #[test]
    fn decode_errors_are_database_errors() {
        let error = map_sqlx_error("ctx", sqlx::Error::RowNotFound);
        assert!(matches!(error, LedgerError::Database(msg) if msg.starts_with("ctx")));
    }
}
