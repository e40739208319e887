use std::time::Duration;

use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Connection, Executor, PgPool, Row};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::model::{Transaction, TransactionType};

/// Pool bounds, so reconnect storms cannot grow resources without limit.
/// Idle connections are kept around up to the pool cap.
const MAX_OPEN_CONNECTIONS: u32 = 25;
const CONNECTION_MAX_LIFETIME: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database connection string is not configured")]
    Config,
    #[error("failed to open database pool: {0}")]
    Open(#[source] sqlx::Error),
    #[error("failed to ping database: {0}")]
    Ping(#[source] sqlx::Error),
    #[error("failed to prepare statement: {0}")]
    Prepare(#[source] sqlx::Error),
    #[error("failed to insert transaction: {0}")]
    Write(String),
    #[error("failed to query transactions: {0}")]
    Query(String),
    #[error("store is already closed")]
    AlreadyClosed,
}

/// Optional filters for the transaction listing. An absent filter is bound
/// as a SQL NULL, which the statement's null-or-equality predicate accepts
/// for every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionFilter {
    pub user_id: Option<i64>,
    pub transaction_type: Option<TransactionType>,
    pub limit: Option<i64>,
}

/// A bounded connection pool plus the two statements used by this service,
/// rendered once against the configured schema.
///
/// Pool and statements live together in a slot that `close` empties, so the
/// statements cannot outlive the pool and a re-open rebuilds both. As with
/// the broker wrapper, only the first close performs real work.
#[derive(Debug)]
pub struct Store {
    state: Mutex<Option<StorePool>>,
}

#[derive(Debug)]
struct StorePool {
    pool: PgPool,
    insert_sql: String,
    select_sql: String,
}

fn insert_statement(schema: &str) -> String {
    format!(
        "INSERT INTO {schema}.transactions (user_id, transaction_type, amount, timestamp) \
         VALUES ($1, $2, $3, $4)"
    )
}

// One fixed statement serves all four filter shapes (none, user, type,
// both). Bound parameters only, never string concatenation.
fn select_statement(schema: &str) -> String {
    format!(
        "SELECT user_id, transaction_type, amount, timestamp \
         FROM {schema}.transactions \
         WHERE ($1::BIGINT IS NULL OR user_id = $1) \
         AND ($2::TEXT IS NULL OR transaction_type = $2) \
         ORDER BY timestamp DESC \
         LIMIT $3"
    )
}

impl Store {
    /// Opens the pool, verifies liveness with a ping and prepares both
    /// statements against `schema`, so connectivity failures and
    /// SQL-compatibility failures (unknown schema or table) stay
    /// distinguishable for the caller.
    pub async fn open(connection_string: &str, schema: &str) -> Result<Store, StoreError> {
        if connection_string.is_empty() {
            return Err(StoreError::Config);
        }

        let pool = PgPoolOptions::new()
            .max_connections(MAX_OPEN_CONNECTIONS)
            .max_lifetime(CONNECTION_MAX_LIFETIME)
            .idle_timeout(None)
            .connect(connection_string)
            .await
            .map_err(StoreError::Open)?;

        let mut conn = pool.acquire().await.map_err(StoreError::Open)?;
        conn.ping().await.map_err(StoreError::Ping)?;

        let insert_sql = insert_statement(schema);
        let select_sql = select_statement(schema);
        (&mut *conn)
            .prepare(&insert_sql)
            .await
            .map_err(StoreError::Prepare)?;
        (&mut *conn)
            .prepare(&select_sql)
            .await
            .map_err(StoreError::Prepare)?;
        drop(conn);

        Ok(Store {
            state: Mutex::new(Some(StorePool {
                pool,
                insert_sql,
                select_sql,
            })),
        })
    }

    /// Executes the prepared insert for one transaction. Constraint
    /// violations (e.g. a transaction type the schema rejects) surface as
    /// `Write` errors.
    pub async fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        let (pool, sql) = {
            let state = self.state.lock().await;
            match state.as_ref() {
                Some(state) => (state.pool.clone(), state.insert_sql.clone()),
                None => {
                    return Err(StoreError::Write(
                        "statement is no longer usable: store is closed".to_string(),
                    ))
                }
            }
        };

        sqlx::query(&sql)
            .bind(transaction.user_id)
            .bind(transaction.transaction_type.as_str())
            .bind(transaction.amount)
            .bind(transaction.timestamp)
            .execute(&pool)
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;

        Ok(())
    }

    /// Runs the prepared filtered select. Results come back newest first,
    /// capped at the filter's limit (effectively unbounded when absent).
    pub async fn get_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError> {
        let (pool, sql) = {
            let state = self.state.lock().await;
            match state.as_ref() {
                Some(state) => (state.pool.clone(), state.select_sql.clone()),
                None => {
                    return Err(StoreError::Query(
                        "statement is no longer usable: store is closed".to_string(),
                    ))
                }
            }
        };

        let rows = sqlx::query(&sql)
            .bind(filter.user_id)
            .bind(filter.transaction_type.map(|t| t.as_str()))
            .bind(filter.limit.unwrap_or(i64::MAX))
            .fetch_all(&pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.into_iter().map(decode_row).collect()
    }

    /// Drops the statements together with their pool and empties the slot;
    /// a later `open` re-creates both. Reports `AlreadyClosed` on a second
    /// call.
    pub async fn close(&self) -> Result<(), StoreError> {
        let state = match self.state.lock().await.take() {
            Some(state) => state,
            None => return Err(StoreError::AlreadyClosed),
        };

        state.pool.close().await;
        Ok(())
    }

    #[cfg(test)]
    fn closed() -> Store {
        Store {
            state: Mutex::new(None),
        }
    }
}

fn decode_row(row: PgRow) -> Result<Transaction, StoreError> {
    let type_text: String = row
        .try_get("transaction_type")
        .map_err(|e| StoreError::Query(e.to_string()))?;
    // A stored value outside the enum is a decode failure, never a silent
    // acceptance.
    let transaction_type = type_text
        .parse::<TransactionType>()
        .map_err(|e| StoreError::Query(e.to_string()))?;

    Ok(Transaction {
        user_id: row
            .try_get("user_id")
            .map_err(|e| StoreError::Query(e.to_string()))?,
        transaction_type,
        amount: row
            .try_get("amount")
            .map_err(|e| StoreError::Query(e.to_string()))?,
        timestamp: row
            .try_get("timestamp")
            .map_err(|e| StoreError::Query(e.to_string()))?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[tokio::test]
    async fn open_rejects_an_empty_connection_string() {
        let err = Store::open("", "public").await.unwrap_err();

        assert!(matches!(err, StoreError::Config));
    }

    #[tokio::test]
    async fn query_after_close_reports_an_unusable_statement() {
        let store = Store::closed();

        let err = store
            .get_transactions(&TransactionFilter::default())
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Query(_)));
        assert!(err.to_string().contains("statement is no longer usable"));
    }

    #[tokio::test]
    async fn insert_after_close_reports_an_unusable_statement() {
        let store = Store::closed();
        let transaction = Transaction {
            user_id: 3,
            transaction_type: TransactionType::Bet,
            amount: 12.50,
            timestamp: Utc::now(),
        };

        let err = store.insert_transaction(&transaction).await.unwrap_err();

        assert!(matches!(err, StoreError::Write(_)));
        assert!(err.to_string().contains("statement is no longer usable"));
    }

    #[tokio::test]
    async fn close_on_a_closed_store_reports_already_closed() {
        let store = Store::closed();

        assert!(matches!(
            store.close().await.unwrap_err(),
            StoreError::AlreadyClosed
        ));
    }

    #[test]
    fn statements_are_rendered_against_the_given_schema() {
        let insert = insert_statement("casino");
        let select = select_statement("casino");

        assert!(insert.starts_with("INSERT INTO casino.transactions"));
        assert!(select.contains("FROM casino.transactions"));
        assert!(select.contains("$1::BIGINT IS NULL OR user_id = $1"));
        assert!(select.contains("$2::TEXT IS NULL OR transaction_type = $2"));
        assert!(select.contains("ORDER BY timestamp DESC"));
    }
}
