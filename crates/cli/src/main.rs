//! Mercato CLI - Database migrations and payment reconciliation tools.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! mercato migrate
//!
//! # Settle stale pending payments now
//! mercato payments recover
//!
//! # Reconcile one order's payment regardless of its age
//! mercato payments recover --order-id 42
//!
//! # Archive terminal payments past the retention window
//! mercato payments archive
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `payments recover` - Run the recovery sweep, or recover one payment
//! - `payments archive` - Run the archival sweep

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use mercato_core::OrderId;

mod commands;

#[derive(Parser)]
#[command(name = "mercato")]
#[command(author, version, about = "Mercato CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Payment reconciliation
    Payments {
        #[command(subcommand)]
        action: PaymentAction,
    },
}

#[derive(Subcommand)]
enum PaymentAction {
    /// Query the gateway for pending payments and settle them
    Recover {
        /// Recover only this order's payment
        #[arg(short, long)]
        order_id: Option<i64>,
    },
    /// Archive terminal payments past the retention window
    Archive,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Payments { action } => match action {
            PaymentAction::Recover { order_id } => {
                commands::payments::recover(order_id.map(OrderId::new)).await?;
            }
            PaymentAction::Archive => commands::payments::archive().await?,
        },
    }
    Ok(())
}
