use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgConnection, PgQueryResult, PgRow};
use sqlx::{Connection, Executor, FromRow};
use tokio::sync::OwnedMutexGuard;
use tokio::time::{error::Elapsed, timeout};
use tracing::{info, warn};

use super::advisory::LockSession;
use super::keyed::KeyedMutex;
use super::{DbError, Statement};
use crate::config::Config;
use crate::services::metrics::{DB_HANDLES_GAUGE, DB_HANDLES_DISCARDED_COUNTER};

/// The cached connection for one database. `None` until first use and after
/// the handle has been discarded.
#[derive(Default)]
pub struct Slot {
    conn: Option<PgConnection>,
}

/// Owns one live connection per physical database name.
///
/// Connections run in autocommit mode: nothing here ever opens a transaction,
/// so every statement commits or fails on its own.
pub struct ConnectionRegistry {
    options: PgConnectOptions,
    statement_timeout: Duration,
    connect_timeout: Duration,
    slots: KeyedMutex<Slot>,
}

impl ConnectionRegistry {
    pub fn new(config: &Config) -> Self {
        let mut options = PgConnectOptions::new()
            .host(&config.database_host)
            .port(config.database_port)
            .username(&config.database_user)
            .application_name("dbmanager")
            .options([(
                "statement_timeout",
                format!("{}ms", config.statement_timeout.as_millis()),
            )]);
        if let Some(password) = &config.database_password {
            options = options.password(password);
        }

        Self {
            options,
            statement_timeout: config.statement_timeout,
            connect_timeout: config.connect_timeout,
            slots: KeyedMutex::new(),
        }
    }

    /// Exclusive access to the connection for `database`.
    ///
    /// A cached handle is probed with `SELECT 1` first; if the probe fails the
    /// handle is dropped and exactly one reconnect is attempted.
    pub async fn acquire(&self, database: &str) -> Result<Lease, DbError> {
        let slot = self.slots.lock(database).await;
        let mut lease = Lease {
            database: database.to_string(),
            slot,
            statement_timeout: self.statement_timeout,
            in_flight: false,
        };

        if lease.is_open() {
            if let Err(e) = lease.execute("SELECT 1").await {
                warn!("Liveness probe failed on database {database}: {e}");
                lease.discard("probe_failed");
            }
        }

        if !lease.is_open() {
            let conn = self.connect(database).await?;
            lease.slot.conn = Some(conn);
            DB_HANDLES_GAUGE.inc();
        }

        Ok(lease)
    }

    /// A dedicated session for advisory locks on `database`. It is never
    /// cached: closing or dropping it releases every lock it still holds.
    pub async fn lock_session(&self, database: &str) -> Result<LockSession, DbError> {
        let conn = self.connect(database).await?;
        Ok(LockSession::new(database, conn, self.statement_timeout))
    }

    async fn connect(&self, database: &str) -> Result<PgConnection, DbError> {
        let options = self.options.clone().database(database);
        match timeout(self.connect_timeout, PgConnection::connect_with(&options)).await {
            Ok(Ok(conn)) => {
                info!("Opened connection to database {database}");
                Ok(conn)
            }
            Ok(Err(source)) => Err(DbError::Connection {
                database: database.to_string(),
                source,
            }),
            Err(_) => Err(DbError::Timeout {
                database: database.to_string(),
                after: self.connect_timeout,
            }),
        }
    }
}

/// Exclusive use of one database's connection. Statements issued through a
/// lease never interleave with those of another lease on the same database.
pub struct Lease {
    database: String,
    slot: OwnedMutexGuard<Slot>,
    statement_timeout: Duration,
    in_flight: bool,
}

impl Lease {
    fn is_open(&self) -> bool {
        self.slot.conn.is_some()
    }

    /// Runs `sql` through the simple query protocol. Required for statements
    /// such as `CREATE DATABASE` that refuse to run inside a transaction block.
    pub async fn execute(&mut self, sql: &str) -> Result<(), DbError> {
        let deadline = self.statement_timeout;
        let sql = sql.to_string();
        let conn = self.begin()?;
        let statement: Statement<'_, PgQueryResult> =
            Box::pin(async move { Executor::execute(conn, sqlx::raw_sql(&sql)).await });
        let result = timeout(deadline, statement).await;
        self.finish(result).map(|_| ())
    }

    /// Single text column query with no parameters.
    pub async fn fetch_strings(&mut self, sql: &str) -> Result<Vec<String>, DbError> {
        let deadline = self.statement_timeout;
        let sql = sql.to_string();
        let conn = self.begin()?;
        let statement: Statement<'_, Vec<String>> = Box::pin(async move {
            sqlx::query_scalar::<_, String>(&sql).fetch_all(conn).await
        });
        let result = timeout(deadline, statement).await;
        self.finish(result)
    }

    /// Query taking a single `text[]` parameter as `$1`.
    pub async fn fetch_rows<T>(&mut self, sql: &str, values: &[String]) -> Result<Vec<T>, DbError>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let deadline = self.statement_timeout;
        let sql = sql.to_string();
        let values = values.to_vec();
        let conn = self.begin()?;
        let statement: Statement<'_, Vec<T>> = Box::pin(async move {
            sqlx::query_as::<_, T>(&sql).bind(values).fetch_all(conn).await
        });
        let result = timeout(deadline, statement).await;
        self.finish(result)
    }

    fn begin(&mut self) -> Result<&mut PgConnection, DbError> {
        match self.slot.conn.as_mut() {
            Some(conn) => {
                self.in_flight = true;
                Ok(conn)
            }
            None => Err(DbError::Closed {
                database: self.database.clone(),
            }),
        }
    }

    fn finish<T>(&mut self, result: Result<Result<T, sqlx::Error>, Elapsed>) -> Result<T, DbError> {
        self.in_flight = false;
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                if is_connection_failure(&err) {
                    self.discard("broken");
                }
                Err(DbError::Query(err))
            }
            Err(_) => {
                self.discard("timeout");
                Err(DbError::Timeout {
                    database: self.database.clone(),
                    after: self.statement_timeout,
                })
            }
        }
    }

    fn discard(&mut self, reason: &str) {
        if self.slot.conn.take().is_some() {
            warn!("Discarded connection to database {} ({reason})", self.database);
            DB_HANDLES_GAUGE.dec();
            DB_HANDLES_DISCARDED_COUNTER.with_label_values(&[reason]).inc();
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        // Dropped mid-statement: the protocol stream is in an unknown state.
        if self.in_flight {
            self.discard("cancelled");
        }
    }
}

fn is_connection_failure(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::WorkerCrashed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> Config {
        Config {
            database_host: "127.0.0.1".into(),
            // Nothing listens on the tcpmux port in a test environment.
            database_port: 1,
            connect_timeout: Duration::from_secs(2),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn acquire_propagates_connection_errors() {
        let registry = ConnectionRegistry::new(&unreachable_config());
        let err = registry.acquire("postgres").await.err().unwrap();
        assert!(matches!(
            err,
            DbError::Connection { ref database, .. } | DbError::Timeout { ref database, .. }
                if database == "postgres"
        ));
    }

    #[tokio::test]
    async fn failed_acquire_does_not_poison_the_slot() {
        let registry = ConnectionRegistry::new(&unreachable_config());
        assert!(registry.acquire("customer_1").await.is_err());
        // The slot lock was released with the failed lease.
        let second = timeout(Duration::from_secs(5), registry.acquire("customer_1")).await;
        assert!(matches!(second, Ok(Err(_))));
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn statement_futures_are_send() {
        let registry = ConnectionRegistry::new(&unreachable_config());
        // Never polled: only the auto traits of the future matter here.
        let statements = async {
            let mut lease = registry.acquire("postgres").await?;
            lease.execute("SELECT 1").await?;
            lease.fetch_strings("SELECT 'ok'::TEXT").await?;
            lease.fetch_rows::<(String,)>("SELECT unnest($1)", &[]).await?;
            let mut locks = registry.lock_session("postgres").await?;
            locks.lock(crate::db::LockClass::Customer, "42").await?;
            locks.close().await;
            Ok::<_, DbError>(())
        };
        assert_send(&statements);
    }

    #[test]
    fn io_errors_break_the_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(is_connection_failure(&sqlx::Error::Io(io)));
        assert!(!is_connection_failure(&sqlx::Error::RowNotFound));
    }
}
