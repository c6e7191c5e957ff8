pub mod metrics;
pub mod password;
pub mod provisioning;
