use anyhow::Result;
use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand};
use kapital::core::log::init_logging;
use rust_decimal::Decimal;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum AssetCommands {
    /// Record the current amount held in a currency and category
    Add {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        currency: String,
        #[arg(long)]
        category: String,
        #[arg(long, allow_negative_numbers = true)]
        amount: Decimal,
    },
    /// Delete a recorded entry
    Remove {
        #[arg(long)]
        user: i64,
        #[arg(long = "entry")]
        entry_ref: u64,
    },
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Convert an amount between two currencies, coins or tickers
    Convert {
        #[arg(allow_negative_numbers = true)]
        amount: f64,
        from: String,
        to: String,
    },
    /// Show total capital, now or as of a date
    Capital {
        #[arg(long)]
        user: i64,
        /// Date (YYYY-MM-DD); defaults to live valuation
        #[arg(long)]
        as_of: Option<NaiveDate>,
        /// Report currency, repeatable; defaults to the configured list
        #[arg(long = "currency")]
        currencies: Vec<String>,
    },
    /// Show USD capital growth between two dates
    Growth {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
    /// Store a capital snapshot for one user or for everyone
    Snapshot {
        #[arg(long, conflicts_with = "all", required_unless_present = "all")]
        user: Option<i64>,
        #[arg(long)]
        all: bool,
        /// Snapshot date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// List stored snapshots, newest first
    Snapshots {
        #[arg(long)]
        user: i64,
        #[arg(long, default_value_t = 12)]
        limit: usize,
    },
    /// Record or delete asset entries
    #[command(subcommand)]
    Asset(AssetCommands),
    /// List the latest value of every asset
    Assets {
        #[arg(long)]
        user: i64,
    },
}

impl From<Commands> for kapital::AppCommand {
    fn from(cmd: Commands) -> kapital::AppCommand {
        match cmd {
            Commands::Convert { amount, from, to } => {
                kapital::AppCommand::Convert { amount, from, to }
            }
            Commands::Capital {
                user,
                as_of,
                currencies,
            } => kapital::AppCommand::Capital {
                user,
                as_of,
                currencies,
            },
            Commands::Growth { user, from, to } => kapital::AppCommand::Growth { user, from, to },
            Commands::Snapshot { user, date, .. } => kapital::AppCommand::Snapshot { user, date },
            Commands::Snapshots { user, limit } => kapital::AppCommand::Snapshots { user, limit },
            Commands::Asset(AssetCommands::Add {
                user,
                currency,
                category,
                amount,
            }) => kapital::AppCommand::AssetAdd {
                user,
                currency,
                category,
                amount,
            },
            Commands::Asset(AssetCommands::Remove { user, entry_ref }) => {
                kapital::AppCommand::AssetRemove { user, entry_ref }
            }
            Commands::Assets { user } => kapital::AppCommand::Assets { user },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => kapital::cli::setup::setup(),
        Some(cmd) => kapital::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
