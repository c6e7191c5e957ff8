use super::DbError;

/// SQLSTATE codes reported when a creation target is already present.
pub mod sqlstate {
    pub const DUPLICATE_DATABASE: &str = "42P04";
    pub const DUPLICATE_SCHEMA: &str = "42P06";
    /// Raised for roles (and other global objects) that already exist.
    pub const DUPLICATE_OBJECT: &str = "42710";
    /// Two sessions racing to insert the same catalog row.
    pub const UNIQUE_VIOLATION: &str = "23505";
}

/// Outcome of one idempotent "ensure present" statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Applied,
    AlreadyPresent,
}

impl Step {
    pub fn changed(self) -> bool {
        matches!(self, Step::Applied)
    }
}

/// SQLSTATE of a server-reported error, if that is what `err` is.
pub fn error_code(err: &DbError) -> Option<String> {
    match err {
        DbError::Query(sqlx::Error::Database(db_err)) => db_err.code().map(|c| c.into_owned()),
        _ => None,
    }
}

/// Maps a statement result onto a [`Step`]. Errors whose SQLSTATE is listed in
/// `tolerated` become [`Step::AlreadyPresent`]; everything else is fatal.
pub fn classify<T>(result: Result<T, DbError>, tolerated: &[&str]) -> Result<Step, DbError> {
    match result {
        Ok(_) => Ok(Step::Applied),
        Err(err) if is_tolerated(error_code(&err).as_deref(), tolerated) => {
            Ok(Step::AlreadyPresent)
        }
        Err(err) => Err(err),
    }
}

fn is_tolerated(code: Option<&str>, tolerated: &[&str]) -> bool {
    code.is_some_and(|code| tolerated.contains(&code))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::sqlstate::*;
    use super::*;

    #[test]
    fn success_is_applied() {
        let step = classify(Ok::<(), DbError>(()), &[DUPLICATE_DATABASE]).unwrap();
        assert_eq!(step, Step::Applied);
        assert!(step.changed());
        assert!(!Step::AlreadyPresent.changed());
    }

    #[test]
    fn only_listed_codes_are_tolerated() {
        assert!(is_tolerated(Some("42P04"), &[DUPLICATE_DATABASE, UNIQUE_VIOLATION]));
        assert!(is_tolerated(Some("23505"), &[DUPLICATE_DATABASE, UNIQUE_VIOLATION]));
        // insufficient_privilege
        assert!(!is_tolerated(Some("42501"), &[DUPLICATE_DATABASE, UNIQUE_VIOLATION]));
        assert!(!is_tolerated(Some("42P06"), &[DUPLICATE_DATABASE]));
        assert!(!is_tolerated(None, &[DUPLICATE_DATABASE]));
        assert!(!is_tolerated(Some("42P04"), &[]));
    }

    #[test]
    fn non_server_errors_are_fatal() {
        let err = classify(
            Err::<(), _>(DbError::Query(sqlx::Error::RowNotFound)),
            &[DUPLICATE_OBJECT],
        );
        assert!(matches!(err, Err(DbError::Query(sqlx::Error::RowNotFound))));

        let err = classify(
            Err::<(), _>(DbError::Timeout {
                database: "postgres".into(),
                after: Duration::from_secs(1),
            }),
            &[DUPLICATE_OBJECT],
        );
        assert!(matches!(err, Err(DbError::Timeout { .. })));
    }
}
