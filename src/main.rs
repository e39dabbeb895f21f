use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use usage_ledger::config::{LedgerConfig, LoggingConfig};
use usage_ledger::keys::Owner;
use usage_ledger::services::Services;
use usage_ledger::usage::CalendarWindow;

/// Inspect and drive usage counters, credit packs and monthly quotas.
#[derive(Debug, Parser)]
#[command(name = "usage-ledger", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Snapshot file backing the store (overrides `store.data_path`)
    #[arg(short, long, global = true)]
    data: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Usage counters
    #[command(subcommand)]
    Counter(CounterCommand),
    /// Credit pack ledger
    #[command(subcommand)]
    Credits(CreditsCommand),
    /// Monthly quota ledger
    #[command(subcommand)]
    Quota(QuotaCommand),
}

#[derive(Debug, Args)]
struct OwnerArgs {
    /// Owner kind, e.g. `user` or `ip`
    #[arg(long, default_value = "user")]
    owner_type: String,
    /// Owner identifier
    #[arg(long)]
    owner_id: String,
}

impl OwnerArgs {
    fn owner(&self) -> Owner {
        Owner::new(&self.owner_type, &self.owner_id)
    }
}

#[derive(Debug, Subcommand)]
enum CounterCommand {
    /// Count one attempt against the current UTC day
    Daily {
        #[command(flatten)]
        owner: OwnerArgs,
        #[arg(long)]
        limit: u64,
    },
    /// Count one attempt against the current UTC month
    Monthly {
        #[command(flatten)]
        owner: OwnerArgs,
        #[arg(long)]
        limit: u64,
    },
    /// Count one attempt against a window anchored to the first attempt
    Rolling {
        #[command(flatten)]
        owner: OwnerArgs,
        #[arg(long)]
        limit: u64,
        /// Window length; defaults to `counters.rolling_window_secs`
        #[arg(long)]
        window_secs: Option<u64>,
    },
    /// Count one attempt against a legacy monthly counter without expiry
    Legacy {
        #[command(flatten)]
        owner: OwnerArgs,
        #[arg(long)]
        limit: u64,
        /// Key prefix of the legacy counter
        #[arg(long)]
        prefix: String,
    },
    /// Show a counter without counting
    Peek {
        #[command(flatten)]
        owner: OwnerArgs,
        /// Which counter to show
        #[arg(long, value_enum, default_value_t = PeekWindow::Day)]
        window: PeekWindow,
    },
    /// Drop a rolling window
    Reset {
        #[command(flatten)]
        owner: OwnerArgs,
    },
}

/// Counter shown by `counter peek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PeekWindow {
    Day,
    Month,
    Rolling,
}

#[derive(Debug, Subcommand)]
enum CreditsCommand {
    /// Grant a credit pack (no-op if the pack id exists)
    Add {
        #[arg(long)]
        user: String,
        #[arg(long)]
        pack: String,
        /// Tenths of a credit
        #[arg(long)]
        units: u64,
        /// Grant time in unix milliseconds; defaults to now
        #[arg(long)]
        created_at: Option<i64>,
    },
    /// List packs
    List {
        #[arg(long)]
        user: String,
        /// Include spent and expired packs
        #[arg(long)]
        all: bool,
    },
    /// Show the spendable balance in tenths
    Balance {
        #[arg(long)]
        user: String,
    },
    /// Debit tenths for a job, oldest packs first
    Consume {
        #[arg(long)]
        user: String,
        /// Tenths of a credit
        #[arg(long)]
        amount: u64,
        #[arg(long)]
        job: String,
    },
    /// Show the stored receipt of a job
    Receipt {
        #[arg(long)]
        user: String,
        #[arg(long)]
        job: String,
    },
}

#[derive(Debug, Subcommand)]
enum QuotaCommand {
    /// Show tenths left in a period
    Remaining {
        #[arg(long)]
        user: String,
        #[arg(long)]
        limit: u64,
        /// `YYYYMM`; defaults to the current month
        #[arg(long)]
        period: Option<String>,
    },
    /// Record usage for a transaction
    Consume {
        #[arg(long)]
        user: String,
        #[arg(long)]
        limit: u64,
        #[arg(long)]
        amount: u64,
        #[arg(long)]
        tx: String,
        /// `YYYYMM`; defaults to the current month
        #[arg(long)]
        period: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = LedgerConfig::load(cli.config.as_deref())?;
    if let Some(data) = cli.data.clone() {
        config.store.data_path = Some(data);
    }

    init_tracing(&config.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting usage-ledger");
    debug!(config = ?config, "Configuration loaded");

    let services = Services::from_config(&config).await?;
    run(cli.command, &services).await
}

/// Initialize tracing, honouring `RUST_LOG` over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(command: Command, services: &Services) -> anyhow::Result<()> {
    match command {
        Command::Counter(cmd) => run_counter(cmd, services).await,
        Command::Credits(cmd) => run_credits(cmd, services).await,
        Command::Quota(cmd) => run_quota(cmd, services).await,
    }
}

async fn run_counter(command: CounterCommand, services: &Services) -> anyhow::Result<()> {
    let limiter = &services.limiter;
    match command {
        CounterCommand::Daily { owner, limit } => {
            print_json(&limiter.increment_daily(&owner.owner(), limit).await?)
        }
        CounterCommand::Monthly { owner, limit } => {
            print_json(&limiter.increment_monthly(&owner.owner(), limit).await?)
        }
        CounterCommand::Rolling {
            owner,
            limit,
            window_secs,
        } => {
            let window = window_secs.unwrap_or(limiter.config().rolling_window_secs);
            print_json(
                &limiter
                    .increment_daily_rolling(&owner.owner(), limit, window)
                    .await?,
            )
        }
        CounterCommand::Legacy {
            owner,
            limit,
            prefix,
        } => print_json(
            &limiter
                .increment_monthly_no_ttl(&prefix, &owner.owner(), limit)
                .await?,
        ),
        CounterCommand::Peek { owner, window } => {
            let owner = owner.owner();
            let counter = match window {
                PeekWindow::Day => limiter.peek_calendar(CalendarWindow::Day, &owner).await?,
                PeekWindow::Month => limiter.peek_calendar(CalendarWindow::Month, &owner).await?,
                PeekWindow::Rolling => limiter.peek_rolling(&owner).await?,
            };
            print_json(&counter)
        }
        CounterCommand::Reset { owner } => {
            limiter.reset_rolling(&owner.owner()).await?;
            Ok(())
        }
    }
}

async fn run_credits(command: CreditsCommand, services: &Services) -> anyhow::Result<()> {
    let credits = &services.credits;
    match command {
        CreditsCommand::Add {
            user,
            pack,
            units,
            created_at,
        } => print_json(&credits.add_credit_pack(&user, &pack, units, created_at).await?),
        CreditsCommand::List { user, all } => {
            let packs = if all {
                credits.list_packs(&user).await?
            } else {
                credits.list_active_packs(&user, None).await?
            };
            print_json(&packs)
        }
        CreditsCommand::Balance { user } => {
            let balance = credits.get_balance(&user, None).await?;
            print_json(&serde_json::json!({ "user": user, "balanceTenths": balance }))
        }
        CreditsCommand::Consume { user, amount, job } => {
            print_json(&credits.consume(&user, amount, &job, None).await?)
        }
        CreditsCommand::Receipt { user, job } => {
            print_json(&credits.get_consumption(&user, &job).await?)
        }
    }
}

async fn run_quota(command: QuotaCommand, services: &Services) -> anyhow::Result<()> {
    let quota = &services.quota;
    match command {
        QuotaCommand::Remaining {
            user,
            limit,
            period,
        } => {
            let period = period.unwrap_or_else(|| quota.current_period());
            let remaining = quota.get_remaining(&user, limit, &period).await?;
            print_json(&serde_json::json!({
                "user": user,
                "period": period,
                "remainingTenths": remaining,
            }))
        }
        QuotaCommand::Consume {
            user,
            limit,
            amount,
            tx,
            period,
        } => {
            let period = period.unwrap_or_else(|| quota.current_period());
            quota.consume(&user, limit, amount, &period, &tx).await?;
            let remaining = quota.get_remaining(&user, limit, &period).await?;
            print_json(&serde_json::json!({
                "user": user,
                "period": period,
                "remainingTenths": remaining,
            }))
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
