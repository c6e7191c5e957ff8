pub mod advisory;
pub mod classify;
pub mod keyed;
pub mod registry;
pub mod sql;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

pub use advisory::{LockClass, LockSession};
pub use registry::{ConnectionRegistry, Lease};

/// One in-flight statement. Boxed so the future stays `Send` over the
/// borrowed connection when wrapped in a deadline.
type Statement<'c, T> = Pin<Box<dyn Future<Output = Result<T, sqlx::Error>> + Send + 'c>>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("could not connect to database {database}: {source}")]
    Connection {
        database: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("operation on database {database} did not finish within {after:?}")]
    Timeout { database: String, after: Duration },
    #[error("connection to database {database} was discarded")]
    Closed { database: String },
    #[error(transparent)]
    Query(#[from] sqlx::Error),
}
