//! Run provisioning operations without the HTTP facade.
//!
//! Usage:
//!   provision customer ID
//!   provision service ID
//!   provision list customers
//!   provision list services [--customer ID]
//!   provision reconcile

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

use dbmanager_api::{config::Config, services, AppState};

#[derive(Parser)]
#[command(name = "provision", about = "Provision tenant databases and service schemas")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ensure a customer database with every service schema
    Customer { id: String },
    /// Ensure a service's roles and its schema in every database
    Service { id: String },
    /// List customers or services
    List {
        #[arg(value_enum)]
        what: Listing,
        /// List the services present in this customer's database
        #[arg(long)]
        customer: Option<String>,
    },
    /// Materialize every service schema into every customer database
    Reconcile,
}

#[derive(Clone, Copy, ValueEnum)]
enum Listing {
    Customers,
    Services,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;
    services::password::check_entropy_source()?;

    let state = AppState::new(config);
    let engine = &state.provisioning;

    let output = match args.command {
        Command::Customer { id } => {
            let changed = engine.create_customer(&id).await?;
            let detail = engine.describe_customer(&id).await?;
            json!({ "changed": changed, "customer": detail })
        }
        Command::Service { id } => {
            let changed = engine.create_service(&id).await?;
            let detail = engine.describe_service(&id).await?;
            json!({ "changed": changed, "service": detail })
        }
        Command::List { what: Listing::Customers, .. } => {
            json!(engine.list_customers().await?)
        }
        Command::List { what: Listing::Services, customer } => {
            json!(engine.list_services(customer.as_deref()).await?)
        }
        Command::Reconcile => {
            let changed = engine.reconcile().await?;
            json!({ "changed": changed })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
