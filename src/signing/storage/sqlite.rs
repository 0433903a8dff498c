//! SQLite storage backend implementation.
//!
//! Persists signing keys in a single `signing_key` table. Suited to
//! single-instance deployments that need keys to survive restarts.

use super::{KeyStorage, StorageStats};
use crate::signing::error::{ExpiryReason, SigningError};
use crate::signing::query::KeyFilter;
use crate::signing::rate_limit::RateLimiter;
use crate::signing::record::{Scope, SigningKey};
use async_trait::async_trait;
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, Row, TransactionBehavior, params, params_from_iter};
use std::sync::{Arc, Mutex, MutexGuard};

const SELECT_COLUMNS: &str = "SELECT signature, scope, email, active, rotated, timestamp, \
     expiration, expiration_interval, previous_key, request_count, last_request_time \
     FROM signing_key";

/// SQLite-based storage backend for signing keys.
///
/// `signature` is the table's primary key, so a duplicate insert fails
/// inside SQLite and surfaces as [`SigningError::SignatureCollision`].
/// The scope set is stored as a JSON list in a text column.
///
/// Lifecycle changes are conditional `UPDATE`s on the columns they own,
/// judged by the affected row count; the rate limit step runs in an
/// `IMMEDIATE` transaction so other processes sharing the file cannot
/// interleave with it.
///
/// # Example
///
/// ```rust
/// use signing_keys::storage::SqliteStorage;
/// use std::sync::Arc;
///
/// # fn example() -> Result<(), signing_keys::SigningError> {
/// // File-based storage
/// let storage = Arc::new(SqliteStorage::new("signing_keys.db")?);
///
/// // Or in-memory SQLite (for testing)
/// let memory_storage = Arc::new(SqliteStorage::new(":memory:")?);
/// # Ok(())
/// # }
/// ```
pub struct SqliteStorage {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Opens (or creates) the database at `db_path`; `":memory:"` gives a
    /// private in-memory database.
    ///
    /// The schema is created by [`KeyStorage::init`], which the engine
    /// builder calls.
    pub fn new(db_path: &str) -> Result<Self, SigningError> {
        let connection = if db_path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(db_path)
        };

        let connection = connection.map_err(SigningError::from_storage_error)?;

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, SigningError> {
        self.connection.lock().map_err(|e| {
            SigningError::from_storage_message(format!("SQLite connection lock poisoned: {e}"))
        })
    }

    /// Create the database schema if it doesn't exist.
    fn init_schema(&self) -> Result<(), SigningError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS signing_key (
                signature TEXT PRIMARY KEY NOT NULL,
                scope TEXT NOT NULL,
                email TEXT,
                active INTEGER NOT NULL,
                rotated INTEGER NOT NULL DEFAULT 0,
                timestamp INTEGER NOT NULL,
                expiration INTEGER NOT NULL,
                expiration_interval INTEGER NOT NULL,
                previous_key TEXT,
                request_count INTEGER NOT NULL DEFAULT 0,
                last_request_time INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_signing_key_expiration
                ON signing_key (active, expiration);
            CREATE INDEX IF NOT EXISTS idx_signing_key_previous ON signing_key (previous_key);
            CREATE INDEX IF NOT EXISTS idx_signing_key_email ON signing_key (email);
            "#,
        )
        .map_err(SigningError::from_storage_error)?;

        Ok(())
    }

    fn row_to_key(row: &Row<'_>) -> rusqlite::Result<SigningKey> {
        let scope_json: String = row.get(1)?;
        let scope: Scope = serde_json::from_str(&scope_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

        Ok(SigningKey {
            signature: row.get(0)?,
            scope,
            email: row.get(2)?,
            active: row.get(3)?,
            rotated: row.get(4)?,
            timestamp: row.get(5)?,
            expiration: row.get(6)?,
            expiration_interval: row.get(7)?,
            previous_key: row.get(8)?,
            request_count: row.get(9)?,
            last_request_time: row.get(10)?,
        })
    }

    fn select_key(
        conn: &Connection,
        signature: &str,
    ) -> Result<Option<SigningKey>, SigningError> {
        let mut stmt = conn
            .prepare_cached(&format!("{SELECT_COLUMNS} WHERE signature = ?1"))
            .map_err(SigningError::from_storage_error)?;

        match stmt.query_row(params![signature], Self::row_to_key) {
            Ok(key) => Ok(Some(key)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SigningError::from_storage_error(e)),
        }
    }

    fn row_exists(conn: &Connection, signature: &str) -> Result<bool, SigningError> {
        let mut stmt = conn
            .prepare_cached("SELECT 1 FROM signing_key WHERE signature = ?1")
            .map_err(SigningError::from_storage_error)?;

        stmt.exists(params![signature])
            .map_err(SigningError::from_storage_error)
    }

    /// Translates the scalar parts of a filter into a WHERE clause. Scope
    /// containment is checked afterwards on the decoded rows.
    fn where_clause(filter: &KeyFilter) -> (String, Vec<Value>) {
        let mut conditions = Vec::new();
        let mut values = Vec::new();

        if let Some(active) = filter.active_value() {
            values.push(Value::Integer(i64::from(active)));
            conditions.push(format!("active = ?{}", values.len()));
        }
        if let Some(email) = filter.email_value() {
            values.push(Value::Text(email.to_string()));
            conditions.push(format!("email = ?{}", values.len()));
        }
        if let Some(previous_key) = filter.previous_key_value() {
            values.push(Value::Text(previous_key.to_string()));
            conditions.push(format!("previous_key = ?{}", values.len()));
        }
        if let Some(after) = filter.expires_after_value() {
            values.push(Value::Integer(after));
            conditions.push(format!("expiration > ?{}", values.len()));
        }
        if let Some(before) = filter.expires_before_value() {
            values.push(Value::Integer(before));
            conditions.push(format!("expiration <= ?{}", values.len()));
        }

        if conditions.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", conditions.join(" AND ")), values)
        }
    }
}

fn encode_scope(scope: &Scope) -> Result<String, SigningError> {
    Ok(serde_json::to_string(scope)?)
}

#[async_trait]
impl KeyStorage for SqliteStorage {
    async fn init(&self) -> Result<(), SigningError> {
        self.init_schema()
    }

    async fn get(&self, signature: &str) -> Result<Option<SigningKey>, SigningError> {
        let conn = self.conn()?;
        Self::select_key(&conn, signature)
    }

    async fn exists(&self, signature: &str) -> Result<bool, SigningError> {
        let conn = self.conn()?;
        Self::row_exists(&conn, signature)
    }

    async fn insert(&self, key: &SigningKey) -> Result<(), SigningError> {
        let scope = encode_scope(&key.scope)?;
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO signing_key (signature, scope, email, active, rotated, timestamp, \
             expiration, expiration_interval, previous_key, request_count, last_request_time) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                key.signature,
                scope,
                key.email,
                key.active,
                key.rotated,
                key.timestamp,
                key.expiration,
                key.expiration_interval,
                key.previous_key,
                key.request_count,
                key.last_request_time,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(sqlite_err, _)
                if sqlite_err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                SigningError::SignatureCollision
            }
            _ => SigningError::from_storage_error(e),
        })?;

        Ok(())
    }

    async fn deactivate(&self, signature: &str) -> Result<bool, SigningError> {
        let conn = self.conn()?;

        let changes = conn
            .execute(
                "UPDATE signing_key SET active = 0 WHERE signature = ?1 AND active = 1",
                params![signature],
            )
            .map_err(SigningError::from_storage_error)?;

        if changes == 0 && !Self::row_exists(&conn, signature)? {
            return Err(SigningError::KeyDoesNotExist);
        }
        Ok(changes > 0)
    }

    async fn claim_rotation(
        &self,
        signature: &str,
        guarded: bool,
    ) -> Result<SigningKey, SigningError> {
        let conn = self.conn()?;

        let sql = if guarded {
            "UPDATE signing_key SET active = 0, rotated = 1 \
             WHERE signature = ?1 AND active = 1 AND rotated = 0"
        } else {
            "UPDATE signing_key SET active = 0, rotated = 1 WHERE signature = ?1"
        };
        let changes = conn
            .execute(sql, params![signature])
            .map_err(SigningError::from_storage_error)?;

        let key = Self::select_key(&conn, signature)?.ok_or(SigningError::KeyDoesNotExist)?;
        if changes == 0 {
            return Err(if key.rotated {
                SigningError::AlreadyRotated
            } else {
                SigningError::KeyExpired(ExpiryReason::Inactive)
            });
        }
        Ok(key)
    }

    async fn record_request(
        &self,
        signature: &str,
        limiter: &RateLimiter,
        now: i64,
    ) -> Result<bool, SigningError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(SigningError::from_storage_error)?;

        let mut key = Self::select_key(&tx, signature)?.ok_or(SigningError::KeyDoesNotExist)?;
        let counted = limiter.check(&mut key, now).is_ok();

        tx.execute(
            "UPDATE signing_key SET request_count = ?2, last_request_time = ?3 \
             WHERE signature = ?1",
            params![signature, key.request_count, key.last_request_time],
        )
        .map_err(SigningError::from_storage_error)?;
        tx.commit().map_err(SigningError::from_storage_error)?;

        Ok(counted)
    }

    async fn query(&self, filter: &KeyFilter) -> Result<Vec<SigningKey>, SigningError> {
        let (where_clause, values) = Self::where_clause(filter);
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(&format!("{SELECT_COLUMNS}{where_clause}"))
            .map_err(SigningError::from_storage_error)?;

        let rows = stmt
            .query_map(params_from_iter(values.iter()), Self::row_to_key)
            .map_err(SigningError::from_storage_error)?;

        let mut keys = Vec::new();
        for row in rows {
            let key = row.map_err(SigningError::from_storage_error)?;
            if filter.matches(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn deactivate_expired(&self, now: i64) -> Result<usize, SigningError> {
        let conn = self.conn()?;

        conn.execute(
            "UPDATE signing_key SET active = 0 WHERE active = 1 AND expiration <= ?1",
            params![now],
        )
        .map_err(SigningError::from_storage_error)
    }

    async fn get_stats(&self) -> Result<StorageStats, SigningError> {
        let conn = self.conn()?;

        let (total_records, active_records): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(active), 0) FROM signing_key",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(SigningError::from_storage_error)?;

        // Get additional SQLite-specific stats
        let page_count: i64 = conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))
            .unwrap_or(0);

        let page_size: i64 = conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .unwrap_or(4096);

        Ok(StorageStats {
            total_records: total_records as usize,
            active_records: active_records as usize,
            backend_info: format!(
                "SQLite storage ({} bytes, {} pages)",
                page_count * page_size,
                page_count
            ),
        })
    }
}
