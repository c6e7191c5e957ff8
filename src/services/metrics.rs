use std::sync::Arc;

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_int_gauge, CounterVec, IntGauge};
use tracing::{info, warn};

use crate::services::provisioning::ProvisioningService;

lazy_static! {
    // ── Provisioning events ─────────────────────────────────────────────────
    pub static ref PROVISION_COUNTER: CounterVec = register_counter_vec!(
        "dbmanager_provision_total",
        "Provisioning calls by operation and outcome (created, unchanged, error)",
        &["operation", "outcome"]
    ).unwrap();

    // ── Connection registry ─────────────────────────────────────────────────
    pub static ref DB_HANDLES_GAUGE: IntGauge = register_int_gauge!(
        "dbmanager_db_handles",
        "Open per-database connections held by the registry"
    ).unwrap();

    pub static ref DB_HANDLES_DISCARDED_COUNTER: CounterVec = register_counter_vec!(
        "dbmanager_db_handles_discarded_total",
        "Connections dropped by the registry, by reason",
        &["reason"]
    ).unwrap();

    // ── Catalog snapshot ────────────────────────────────────────────────────
    pub static ref CUSTOMERS_GAUGE: IntGauge = register_int_gauge!(
        "dbmanager_customers",
        "Tenant databases found in the server catalog"
    ).unwrap();

    pub static ref SERVICES_GAUGE: IntGauge = register_int_gauge!(
        "dbmanager_services",
        "Service schemas found in the shared database"
    ).unwrap();
}

/// Records the outcome of one provisioning call.
pub fn record<E>(operation: &str, result: &Result<bool, E>) {
    let outcome = match result {
        Ok(true) => "created",
        Ok(false) => "unchanged",
        Err(_) => "error",
    };
    PROVISION_COUNTER.with_label_values(&[operation, outcome]).inc();
}

/// Spawn the background catalog collector (refreshes every 5 minutes).
pub fn start(provisioning: Arc<ProvisioningService>) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = collect(&provisioning).await {
                warn!("Metrics: collection failed: {}", e);
            }
            tokio::time::sleep(tokio::time::Duration::from_secs(300)).await;
        }
    });
}

async fn collect(provisioning: &ProvisioningService) -> anyhow::Result<()> {
    let customers = provisioning.list_customers().await?;
    let services = provisioning.list_services(None).await?;

    CUSTOMERS_GAUGE.set(customers.len() as i64);
    SERVICES_GAUGE.set(services.len() as i64);

    info!(
        "Metrics: {} customer(s), {} service(s)",
        customers.len(),
        services.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_labels_outcomes() {
        let before = PROVISION_COUNTER
            .with_label_values(&["test_op", "created"])
            .get();
        record::<()>("test_op", &Ok(true));
        record::<()>("test_op", &Ok(false));
        record("test_op", &Err(()));

        assert_eq!(
            PROVISION_COUNTER.with_label_values(&["test_op", "created"]).get(),
            before + 1.0
        );
        assert!(PROVISION_COUNTER.with_label_values(&["test_op", "unchanged"]).get() >= 1.0);
        assert!(PROVISION_COUNTER.with_label_values(&["test_op", "error"]).get() >= 1.0);
    }
}
