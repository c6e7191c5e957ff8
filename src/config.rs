use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_host: String,
    pub database_port: u16,
    /// Shared/administrative database. Service schemas live here too.
    pub database_name: String,
    pub database_user: String,
    pub database_password: Option<String>,
    pub database_encoding: String,
    pub listen_host: String,
    pub listen_port: u16,
    pub customer_prefix: String,
    pub service_prefix: String,
    pub password_length: usize,
    pub statement_timeout: Duration,
    pub connect_timeout: Duration,
    pub admin_key: Option<String>,
    pub reconcile_on_startup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_host: "localhost".into(),
            database_port: 5432,
            database_name: "postgres".into(),
            database_user: "postgres".into(),
            database_password: None,
            database_encoding: "UTF-8".into(),
            listen_host: "0.0.0.0".into(),
            listen_port: 8888,
            customer_prefix: "customer_".into(),
            service_prefix: "service_".into(),
            password_length: 40,
            statement_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            admin_key: None,
            reconcile_on_startup: false,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|s| !s.is_empty());

        let config = Self {
            database_host: get("DATABASE_HOST").unwrap_or(defaults.database_host),
            database_port: parsed(&get, "DATABASE_PORT", defaults.database_port)?,
            database_name: get("DATABASE_NAME").unwrap_or(defaults.database_name),
            database_user: get("DATABASE_USER").unwrap_or(defaults.database_user),
            database_password: get("DATABASE_PASSWORD"),
            database_encoding: get("DATABASE_ENCODING").unwrap_or(defaults.database_encoding),
            listen_host: get("LISTEN_HOST").unwrap_or(defaults.listen_host),
            listen_port: parsed(&get, "LISTEN_PORT", defaults.listen_port)?,
            customer_prefix: get("CUSTOMER_PREFIX").unwrap_or(defaults.customer_prefix),
            service_prefix: get("SERVICE_PREFIX").unwrap_or(defaults.service_prefix),
            password_length: parsed(&get, "PASSWORD_LENGTH", defaults.password_length)?,
            statement_timeout: Duration::from_secs(parsed(
                &get,
                "STATEMENT_TIMEOUT_SECS",
                defaults.statement_timeout.as_secs(),
            )?),
            connect_timeout: Duration::from_secs(parsed(
                &get,
                "CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout.as_secs(),
            )?),
            admin_key: get("ADMIN_KEY"),
            reconcile_on_startup: parsed(
                &get,
                "RECONCILE_ON_STARTUP",
                defaults.reconcile_on_startup,
            )?,
        };

        if config.password_length == 0 {
            anyhow::bail!("PASSWORD_LENGTH must be greater than zero");
        }
        if config.statement_timeout.is_zero() || config.connect_timeout.is_zero() {
            anyhow::bail!(
                "STATEMENT_TIMEOUT_SECS and CONNECT_TIMEOUT_SECS must be greater than zero"
            );
        }

        Ok(config)
    }
}

fn parsed<T, G>(get: &G, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {} ({})", key, raw, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.database_host, "localhost");
        assert_eq!(config.database_name, "postgres");
        assert_eq!(config.database_user, "postgres");
        assert_eq!(config.database_encoding, "UTF-8");
        assert_eq!(config.listen_port, 8888);
        assert_eq!(config.customer_prefix, "customer_");
        assert_eq!(config.service_prefix, "service_");
        assert_eq!(config.password_length, 40);
        assert!(config.database_password.is_none());
        assert!(config.admin_key.is_none());
        assert!(!config.reconcile_on_startup);
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("DATABASE_HOST", "db.internal"),
            ("LISTEN_PORT", "9000"),
            ("CUSTOMER_PREFIX", "tenant_"),
            ("STATEMENT_TIMEOUT_SECS", "5"),
            ("RECONCILE_ON_STARTUP", "true"),
            ("ADMIN_KEY", "s3cret"),
        ])
        .unwrap();
        assert_eq!(config.database_host, "db.internal");
        assert_eq!(config.listen_port, 9000);
        assert_eq!(config.customer_prefix, "tenant_");
        assert_eq!(config.statement_timeout, Duration::from_secs(5));
        assert!(config.reconcile_on_startup);
        assert_eq!(config.admin_key.as_deref(), Some("s3cret"));
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let config = config_from(&[("DATABASE_PASSWORD", ""), ("SERVICE_PREFIX", "")]).unwrap();
        assert!(config.database_password.is_none());
        assert_eq!(config.service_prefix, "service_");
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        assert!(config_from(&[("LISTEN_PORT", "eighty")]).is_err());
        assert!(config_from(&[("RECONCILE_ON_STARTUP", "yes")]).is_err());
        assert!(config_from(&[("PASSWORD_LENGTH", "0")]).is_err());
        assert!(config_from(&[("STATEMENT_TIMEOUT_SECS", "0")]).is_err());
    }
}
