//! Command-line front end for the customer store.
//!
//! # Responsibility
//! - Load `appsettings.json`, open the stage database and run one operation.
//! - Print results as pretty JSON and map failures to stable exit codes.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use serde::Serialize;
use sqlitedemo_core::{
    init_logging, AppSettings, Customer, CustomerFilter, CustomerPatch, CustomerService, Database,
    EntityLockTable, ErrorKind, LogFacadeRecorder, OperationError, SqliteCustomerRepository,
    TransactionCoordinator,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Customer CRUD over a SQLite database.
#[derive(Parser, Debug)]
#[command(name = "sqlitedemo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file selecting the stage database
    #[arg(long, global = true, default_value = "appsettings.json")]
    settings: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List customers, optionally filtered
    List(ListArgs),
    /// Show one customer
    Get {
        customer_id: String,
    },
    /// Create a customer from a JSON document
    Add {
        /// e.g. '{"CustomerID":"ALFKI","CompanyName":"Alfreds Futterkiste"}'
        json: String,
    },
    /// Replace every non-key field of a customer from a JSON document
    Update {
        customer_id: String,
        /// e.g. '{"CompanyName":"Alfreds","City":"Berlin"}'
        json: String,
    },
    /// Delete a customer
    Delete {
        customer_id: String,
    },
    /// Print the core version
    Version,
}

#[derive(Args, Debug, Default)]
struct ListArgs {
    /// Exact customer id
    #[arg(long)]
    customer_id: Option<String>,
    /// Substring of the company name
    #[arg(long)]
    company_name: Option<String>,
    #[arg(long)]
    region: Option<String>,
    #[arg(long)]
    postal_code: Option<String>,
}

impl From<ListArgs> for CustomerFilter {
    fn from(value: ListArgs) -> Self {
        Self {
            customer_id: value.customer_id,
            company_name: value.company_name,
            region: value.region,
            postal_code: value.postal_code,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Command::Version = cli.command {
        println!("sqlitedemo {}", sqlitedemo_core::core_version());
        return Ok(());
    }

    let settings = AppSettings::load(&cli.settings)
        .with_context(|| format!("loading settings from {}", cli.settings.display()))?;
    if let Some(logging) = &settings.logging {
        init_logging(logging).context("initializing logging")?;
    }
    info!(
        "event=cli_run module=cli status=start stage={} settings={}",
        settings.stage,
        cli.settings.display()
    );

    let db_path = settings.database_path()?;
    let db = Database::open(&db_path, settings.default_timeout())
        .with_context(|| format!("opening database {}", db_path.display()))?;
    let service = CustomerService::new(
        SqliteCustomerRepository::new(db.clone()),
        Arc::new(EntityLockTable::new()),
        TransactionCoordinator::new(db, settings.default_timeout()),
        Arc::new(LogFacadeRecorder),
    );

    match cli.command {
        Command::List(args) => print_json(&service.get_customers(&args.into()).await?),
        Command::Get { customer_id } => match service.get_customer(&customer_id).await? {
            Some(customer) => print_json(&customer),
            None => Err(OperationError::NotFound { key: customer_id }.into()),
        },
        Command::Add { json } => {
            let customer: Customer =
                serde_json::from_str(&json).context("parsing customer JSON")?;
            print_json(&service.create_customer(&customer).await?)
        }
        Command::Update { customer_id, json } => {
            let patch: CustomerPatch =
                serde_json::from_str(&json).context("parsing customer JSON")?;
            print_json(&service.update_customer(&customer_id, &patch).await?)
        }
        Command::Delete { customer_id } => {
            print_json(&service.delete_customer(&customer_id).await?)
        }
        Command::Version => Ok(()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<OperationError>().map(OperationError::kind) {
        Some(ErrorKind::Validation) => 2,
        Some(ErrorKind::NotFound) => 3,
        Some(ErrorKind::AmbiguousState) => 4,
        Some(ErrorKind::Conflict) => 5,
        Some(ErrorKind::LockConflict) => 6,
        Some(ErrorKind::Storage) => 7,
        Some(ErrorKind::Unclassified) | None => 1,
    }
}
