// Library exports for binaries and tests
pub mod config;
pub mod db;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use config::Config;
use db::ConnectionRegistry;
use services::provisioning::ProvisioningService;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub provisioning: Arc<ProvisioningService>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wires the registry and engine. No connection is opened until first use.
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(&config));
        let provisioning = Arc::new(ProvisioningService::new(&config, registry));
        Self {
            provisioning,
            config: Arc::new(config),
        }
    }
}
