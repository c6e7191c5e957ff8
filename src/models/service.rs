use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One role row from the role catalog. `password` is the stored hash, never
/// the plaintext generated at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ServiceUser {
    pub user: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUsers {
    pub owner: ServiceUser,
    pub oltp: ServiceUser,
}

/// Body of `GET /services/{id}` and `PUT /services/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDetail {
    pub schema: String,
    pub users: ServiceUsers,
}
