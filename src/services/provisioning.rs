//! Tenant/service provisioning.
//!
//! Every creation is an idempotent "ensure present" step: objects that already
//! exist are classified as no-ops by SQLSTATE, anything else aborts the
//! remaining steps of that sequence. Steps commit independently, so a failed
//! sequence leaves earlier steps applied and is completed by simply retrying.

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::Config;
use crate::db::classify::{classify, sqlstate, Step};
use crate::db::keyed::KeyedMutex;
use crate::db::sql::{quote_ident, quote_literal};
use crate::db::{ConnectionRegistry, DbError, LockClass, LockSession};
use crate::models::customer::CustomerDetail;
use crate::models::service::{ServiceDetail, ServiceUser, ServiceUsers};
use crate::services::metrics;
use crate::services::password::generate_password;

/// NAMEDATALEN - 1. Longer identifiers are silently truncated by the server.
const MAX_IDENTIFIER_LEN: usize = 63;

const LIST_DATABASES_SQL: &str = "SELECT datname::TEXT FROM pg_database WHERE NOT datistemplate";
const LIST_SCHEMAS_SQL: &str = "SELECT nspname::TEXT FROM pg_namespace";
const SERVICE_USERS_SQL: &str = r#"SELECT rolname::TEXT AS "user", rolpassword AS password
     FROM pg_authid
     WHERE rolname::TEXT = ANY($1)
     ORDER BY rolname"#;

const DATABASE_EXISTS: &[&str] = &[sqlstate::DUPLICATE_DATABASE, sqlstate::UNIQUE_VIOLATION];
const SCHEMA_EXISTS: &[&str] = &[sqlstate::DUPLICATE_SCHEMA, sqlstate::UNIQUE_VIOLATION];
const ROLE_EXISTS: &[&str] = &[sqlstate::DUPLICATE_OBJECT, sqlstate::UNIQUE_VIOLATION];
const GRANT_EXISTS: &[&str] = &[sqlstate::DUPLICATE_OBJECT];

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("invalid {kind} identifier {id:?}: {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        id: String,
        reason: String,
    },
    #[error("role {0} is missing from the role catalog")]
    MissingRole(String),
    #[error(transparent)]
    Database(#[from] DbError),
}

/// Derives physical object names from tenant and service ids.
#[derive(Debug, Clone)]
pub struct Naming {
    customer_prefix: String,
    service_prefix: String,
}

impl Naming {
    pub fn new(customer_prefix: impl Into<String>, service_prefix: impl Into<String>) -> Self {
        Self {
            customer_prefix: customer_prefix.into(),
            service_prefix: service_prefix.into(),
        }
    }

    pub fn customer_database(&self, customer: &str) -> String {
        format!("{}{}", self.customer_prefix, customer)
    }

    pub fn service_schema(&self, service: &str) -> String {
        format!("{}{}", self.service_prefix, service)
    }

    pub fn owner_role(service: &str) -> String {
        format!("{service}_owner")
    }

    pub fn oltp_role(service: &str) -> String {
        format!("{service}_oltp")
    }

    /// Tenant ids from a list of database names.
    pub fn customer_ids(&self, databases: impl IntoIterator<Item = String>) -> BTreeSet<String> {
        strip_prefixed(databases, &self.customer_prefix)
    }

    /// Service ids from a list of schema names.
    pub fn service_ids(&self, schemas: impl IntoIterator<Item = String>) -> BTreeSet<String> {
        strip_prefixed(schemas, &self.service_prefix)
    }

    pub fn validate_customer(&self, customer: &str) -> Result<(), ProvisionError> {
        validate("customer", customer, &[self.customer_database(customer)])
    }

    pub fn validate_service(&self, service: &str) -> Result<(), ProvisionError> {
        validate(
            "service",
            service,
            &[
                self.service_schema(service),
                Self::owner_role(service),
                Self::oltp_role(service),
            ],
        )
    }
}

fn strip_prefixed(names: impl IntoIterator<Item = String>, prefix: &str) -> BTreeSet<String> {
    names
        .into_iter()
        .filter_map(|name| {
            name.strip_prefix(prefix)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        })
        .collect()
}

fn validate(kind: &'static str, id: &str, derived: &[String]) -> Result<(), ProvisionError> {
    let invalid = |reason: String| ProvisionError::InvalidIdentifier {
        kind,
        id: id.to_string(),
        reason,
    };

    if id.is_empty() {
        return Err(invalid("identifier is empty".into()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(invalid("only ASCII letters, digits, '_' and '-' are allowed".into()));
    }
    if let Some(name) = derived.iter().find(|name| name.len() > MAX_IDENTIFIER_LEN) {
        return Err(invalid(format!(
            "{name} exceeds {MAX_IDENTIFIER_LEN} bytes"
        )));
    }
    Ok(())
}

fn create_database_sql(database: &str, encoding: &str) -> String {
    format!(
        "CREATE DATABASE {} ENCODING {}",
        quote_ident(database),
        quote_literal(encoding)
    )
}

fn create_schema_sql(schema: &str, owner: &str) -> String {
    format!(
        "CREATE SCHEMA {} AUTHORIZATION {}",
        quote_ident(schema),
        quote_ident(owner)
    )
}

fn grant_schema_usage_sql(schema: &str, grantee: &str) -> String {
    format!(
        "GRANT USAGE ON SCHEMA {} TO {}",
        quote_ident(schema),
        quote_ident(grantee)
    )
}

fn default_privileges_sql(schema: &str, owner: &str, grantee: &str) -> String {
    format!(
        "ALTER DEFAULT PRIVILEGES FOR ROLE {} IN SCHEMA {} GRANT ALL ON TABLES TO {}",
        quote_ident(owner),
        quote_ident(schema),
        quote_ident(grantee)
    )
}

fn create_user_sql(role: &str, password: &str) -> String {
    format!(
        "CREATE USER {} WITH PASSWORD {}",
        quote_ident(role),
        quote_literal(password)
    )
}

fn grant_role_sql(role: &str, member: &str) -> String {
    format!("GRANT {} TO {}", quote_ident(role), quote_ident(member))
}

fn log_step(step: Step, what: &str) {
    match step {
        Step::Applied => info!("Created {what}"),
        Step::AlreadyPresent => debug!("{what} already exists"),
    }
}

/// The provisioning engine. Talks to the server only through the
/// [`ConnectionRegistry`] and never holds more than one lease at a time.
///
/// Creation sequences are serialized per entity twice: by an in-process lock,
/// and by session-level advisory locks on the admin database for other
/// processes (the `provision` CLI, other server instances).
pub struct ProvisioningService {
    registry: Arc<ConnectionRegistry>,
    naming: Naming,
    admin_database: String,
    admin_user: String,
    encoding: String,
    password_length: usize,
    /// Serializes whole creation sequences per entity within this process.
    entity_locks: KeyedMutex<()>,
}

impl ProvisioningService {
    pub fn new(config: &Config, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            naming: Naming::new(&config.customer_prefix, &config.service_prefix),
            admin_database: config.database_name.clone(),
            admin_user: config.database_user.clone(),
            encoding: config.database_encoding.clone(),
            password_length: config.password_length,
            entity_locks: KeyedMutex::new(),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn admin_database(&self) -> &str {
        &self.admin_database
    }

    fn target_database(&self, customer: Option<&str>) -> String {
        match customer {
            Some(customer) => self.naming.customer_database(customer),
            None => self.admin_database.clone(),
        }
    }

    // ─── Reads ───────────────────────────────────────────────────────────────

    pub async fn list_customers(&self) -> Result<BTreeSet<String>, ProvisionError> {
        let mut lease = self.registry.acquire(&self.admin_database).await?;
        let databases = lease.fetch_strings(LIST_DATABASES_SQL).await?;
        Ok(self.naming.customer_ids(databases))
    }

    /// Services present in the shared database (`None`) or in a tenant database.
    pub async fn list_services(
        &self,
        customer: Option<&str>,
    ) -> Result<BTreeSet<String>, ProvisionError> {
        let database = self.target_database(customer);
        let mut lease = self.registry.acquire(&database).await?;
        let schemas = lease.fetch_strings(LIST_SCHEMAS_SQL).await?;
        Ok(self.naming.service_ids(schemas))
    }

    /// Owner and oltp role rows for `service`, with stored password hashes.
    pub async fn get_service_users(
        &self,
        service: &str,
    ) -> Result<Vec<ServiceUser>, ProvisionError> {
        let roles = [Naming::owner_role(service), Naming::oltp_role(service)];
        let mut lease = self.registry.acquire(&self.admin_database).await?;
        Ok(lease.fetch_rows(SERVICE_USERS_SQL, &roles).await?)
    }

    pub async fn describe_customer(
        &self,
        customer: &str,
    ) -> Result<CustomerDetail, ProvisionError> {
        if !self.list_customers().await?.contains(customer) {
            return Err(ProvisionError::NotFound {
                kind: "customer",
                id: customer.to_string(),
            });
        }
        Ok(CustomerDetail {
            services: self.list_services(Some(customer)).await?,
            database: self.naming.customer_database(customer),
        })
    }

    pub async fn describe_service(&self, service: &str) -> Result<ServiceDetail, ProvisionError> {
        if !self.list_services(None).await?.contains(service) {
            return Err(ProvisionError::NotFound {
                kind: "service",
                id: service.to_string(),
            });
        }

        let mut users = self.get_service_users(service).await?;
        let mut take = |role: String| {
            users
                .iter()
                .position(|u| u.user == role)
                .map(|i| users.swap_remove(i))
                .ok_or(ProvisionError::MissingRole(role))
        };
        let owner = take(Naming::owner_role(service))?;
        let oltp = take(Naming::oltp_role(service))?;

        Ok(ServiceDetail {
            schema: self.naming.service_schema(service),
            users: ServiceUsers { owner, oltp },
        })
    }

    // ─── Creation ────────────────────────────────────────────────────────────

    /// Ensures the tenant database exists. `Ok(false)` if it already did.
    pub async fn create_customer_database(&self, customer: &str) -> Result<bool, ProvisionError> {
        self.naming.validate_customer(customer)?;
        let key = format!("customer:{customer}");
        let _guard = self.entity_locks.lock(&key).await;

        let mut locks = self.lock_session().await?;
        let result = match locks.lock(LockClass::Customer, customer).await {
            Ok(()) => self.ensure_customer_database(customer).await,
            Err(e) => Err(e.into()),
        };
        locks.close().await;
        result
    }

    /// Ensures the tenant database exists and holds every known service schema.
    pub async fn create_customer(&self, customer: &str) -> Result<bool, ProvisionError> {
        let result = self.create_customer_steps(customer).await;
        metrics::record("create_customer", &result);
        result
    }

    async fn create_customer_steps(&self, customer: &str) -> Result<bool, ProvisionError> {
        self.naming.validate_customer(customer)?;
        let key = format!("customer:{customer}");
        let _guard = self.entity_locks.lock(&key).await;

        let mut locks = self.lock_session().await?;
        let result = self.create_customer_locked(&mut locks, customer).await;
        locks.close().await;
        result
    }

    async fn create_customer_locked(
        &self,
        locks: &mut LockSession,
        customer: &str,
    ) -> Result<bool, ProvisionError> {
        locks.lock(LockClass::Customer, customer).await?;

        let mut changed = self.ensure_customer_database(customer).await?;
        for service in self.list_services(None).await? {
            changed |= self.ensure_service_schema(locks, &service, Some(customer)).await?;
        }
        Ok(changed)
    }

    /// Ensures the service schema exists in the shared database (`None`) or in
    /// a tenant database, owned by the owner role and usable by the oltp role.
    pub async fn create_service_schema(
        &self,
        service: &str,
        customer: Option<&str>,
    ) -> Result<bool, ProvisionError> {
        self.naming.validate_service(service)?;
        if let Some(customer) = customer {
            self.naming.validate_customer(customer)?;
        }

        let mut locks = self.lock_session().await?;
        let result = self.ensure_service_schema(&mut locks, service, customer).await;
        locks.close().await;
        result
    }

    /// Ensures both service roles exist and the admin user is a member of the
    /// owner role.
    pub async fn create_service_users(&self, service: &str) -> Result<bool, ProvisionError> {
        self.naming.validate_service(service)?;
        let key = format!("service:{service}");
        let _guard = self.entity_locks.lock(&key).await;

        let mut locks = self.lock_session().await?;
        let result = match locks.lock(LockClass::Service, service).await {
            Ok(()) => self.ensure_service_users(service).await,
            Err(e) => Err(e.into()),
        };
        locks.close().await;
        result
    }

    /// Ensures the service roles, its shared schema and its schema in every
    /// tenant database.
    pub async fn create_service(&self, service: &str) -> Result<bool, ProvisionError> {
        let result = self.create_service_steps(service).await;
        metrics::record("create_service", &result);
        result
    }

    async fn create_service_steps(&self, service: &str) -> Result<bool, ProvisionError> {
        self.naming.validate_service(service)?;
        let key = format!("service:{service}");
        let _guard = self.entity_locks.lock(&key).await;

        let mut locks = self.lock_session().await?;
        let result = self.create_service_locked(&mut locks, service).await;
        locks.close().await;
        result
    }

    async fn create_service_locked(
        &self,
        locks: &mut LockSession,
        service: &str,
    ) -> Result<bool, ProvisionError> {
        locks.lock(LockClass::Service, service).await?;

        let mut changed = self.ensure_service_users(service).await?;
        changed |= self.ensure_service_schema(locks, service, None).await?;
        for customer in self.list_customers().await? {
            changed |= self.ensure_service_schema(locks, service, Some(&customer)).await?;
        }
        Ok(changed)
    }

    /// Re-materializes every shared service schema into every tenant database.
    pub async fn reconcile(&self) -> Result<bool, ProvisionError> {
        let result = self.reconcile_steps().await;
        metrics::record("reconcile", &result);
        result
    }

    async fn reconcile_steps(&self) -> Result<bool, ProvisionError> {
        let services = self.list_services(None).await?;
        let customers = self.list_customers().await?;

        let mut locks = self.lock_session().await?;
        let result = self
            .reconcile_locked(&mut locks, &customers, &services)
            .await;
        locks.close().await;

        let changed = result?;
        info!(
            "Reconciled {} service(s) across {} customer(s), changed={changed}",
            services.len(),
            customers.len()
        );
        Ok(changed)
    }

    async fn reconcile_locked(
        &self,
        locks: &mut LockSession,
        customers: &BTreeSet<String>,
        services: &BTreeSet<String>,
    ) -> Result<bool, ProvisionError> {
        let mut changed = false;
        for customer in customers {
            for service in services {
                changed |= self
                    .ensure_service_schema(locks, service, Some(customer))
                    .await?;
            }
        }
        Ok(changed)
    }

    /// Advisory locks live on the admin database, the one every process shares.
    async fn lock_session(&self) -> Result<LockSession, ProvisionError> {
        Ok(self.registry.lock_session(&self.admin_database).await?)
    }

    async fn ensure_customer_database(&self, customer: &str) -> Result<bool, ProvisionError> {
        let database = self.naming.customer_database(customer);
        let mut lease = self.registry.acquire(&self.admin_database).await?;

        let step = classify(
            lease
                .execute(&create_database_sql(&database, &self.encoding))
                .await,
            DATABASE_EXISTS,
        )?;
        log_step(step, &format!("database {database}"));
        Ok(step.changed())
    }

    /// Creates and grants one service schema while holding its schema lock, so
    /// racing sequences never run the grant statements side by side.
    async fn ensure_service_schema(
        &self,
        locks: &mut LockSession,
        service: &str,
        customer: Option<&str>,
    ) -> Result<bool, ProvisionError> {
        let database = self.target_database(customer);
        let schema = self.naming.service_schema(service);
        let key = format!("{database}.{schema}");

        locks.lock(LockClass::Schema, &key).await?;
        let result = self.ensure_service_schema_steps(service, &database, &schema).await;
        let unlocked = locks.unlock(LockClass::Schema, &key).await;

        let changed = result?;
        unlocked?;
        Ok(changed)
    }

    async fn ensure_service_schema_steps(
        &self,
        service: &str,
        database: &str,
        schema: &str,
    ) -> Result<bool, ProvisionError> {
        let owner = Naming::owner_role(service);
        let oltp = Naming::oltp_role(service);

        let mut lease = self.registry.acquire(database).await?;

        let step = classify(
            lease.execute(&create_schema_sql(schema, &owner)).await,
            SCHEMA_EXISTS,
        )?;
        log_step(step, &format!("schema {schema} in database {database}"));

        // A schema without its grants is a security gap, so these never get
        // swallowed beyond the duplicate case.
        classify(
            lease.execute(&grant_schema_usage_sql(schema, &oltp)).await,
            GRANT_EXISTS,
        )?;
        classify(
            lease
                .execute(&default_privileges_sql(schema, &owner, &oltp))
                .await,
            GRANT_EXISTS,
        )?;

        Ok(step.changed())
    }

    async fn ensure_service_users(&self, service: &str) -> Result<bool, ProvisionError> {
        let owner = Naming::owner_role(service);
        let oltp = Naming::oltp_role(service);

        let mut lease = self.registry.acquire(&self.admin_database).await?;

        let owner_step = classify(
            lease
                .execute(&create_user_sql(&owner, &generate_password(self.password_length)))
                .await,
            ROLE_EXISTS,
        )?;
        log_step(owner_step, &format!("role {owner}"));

        classify(
            lease.execute(&grant_role_sql(&owner, &self.admin_user)).await,
            GRANT_EXISTS,
        )?;

        let oltp_step = classify(
            lease
                .execute(&create_user_sql(&oltp, &generate_password(self.password_length)))
                .await,
            ROLE_EXISTS,
        )?;
        log_step(oltp_step, &format!("role {oltp}"));

        Ok(owner_step.changed() || oltp_step.changed())
    }
}
