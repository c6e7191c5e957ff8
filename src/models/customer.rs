use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Body of `GET /customers/{id}` and `PUT /customers/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetail {
    pub services: BTreeSet<String>,
    pub database: String,
}
