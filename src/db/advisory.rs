use std::time::Duration;

use sqlx::postgres::{PgConnection, PgQueryResult};
use sqlx::Connection;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{DbError, Statement};

const LOCK_SQL: &str = "SELECT pg_advisory_lock($1, hashtext($2))";
const UNLOCK_SQL: &str = "SELECT pg_advisory_unlock($1, hashtext($2))";

/// First half of the two-key advisory lock id. Keeps entity keys from ever
/// colliding with schema keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockClass {
    Customer = 1,
    Service = 2,
    /// A service schema inside one database, keyed `<database>.<schema>`.
    Schema = 3,
}

/// A server session used only for session-level advisory locks, so that
/// creation sequences are serialized across every process sharing the server,
/// not just within this one.
pub struct LockSession {
    database: String,
    conn: PgConnection,
    statement_timeout: Duration,
}

impl LockSession {
    pub(super) fn new(database: &str, conn: PgConnection, statement_timeout: Duration) -> Self {
        Self {
            database: database.to_string(),
            conn,
            statement_timeout,
        }
    }

    /// Blocks until the lock is granted, bounded by the statement deadline.
    pub async fn lock(&mut self, class: LockClass, key: &str) -> Result<(), DbError> {
        debug!("Waiting for advisory lock {class:?} {key}");
        self.run(LOCK_SQL, class, key).await
    }

    pub async fn unlock(&mut self, class: LockClass, key: &str) -> Result<(), DbError> {
        self.run(UNLOCK_SQL, class, key).await
    }

    /// Ends the session, releasing anything still held.
    pub async fn close(self) {
        if let Err(e) = self.conn.close().await {
            warn!("Closing lock session on database {} failed: {e}", self.database);
        }
    }

    async fn run(&mut self, sql: &'static str, class: LockClass, key: &str) -> Result<(), DbError> {
        let deadline = self.statement_timeout;
        let key = key.to_string();
        let conn = &mut self.conn;
        let statement: Statement<'_, PgQueryResult> = Box::pin(async move {
            sqlx::query(sql).bind(class as i32).bind(key).execute(conn).await
        });
        match timeout(deadline, statement).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(DbError::Query(err)),
            Err(_) => Err(DbError::Timeout {
                database: self.database.clone(),
                after: deadline,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_are_distinct_lock_spaces() {
        assert_eq!(LockClass::Customer as i32, 1);
        assert_eq!(LockClass::Service as i32, 2);
        assert_eq!(LockClass::Schema as i32, 3);
    }
}
