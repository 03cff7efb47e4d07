use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use crate::application::{HistoryQuery, LedgerConfig, LedgerService};
use crate::domain::{
    Account, IntegrityReport, NewAccount, format_cents, format_wide_cents, parse_cents,
};

/// Bankroll - a small money-transfer ledger
#[derive(Parser)]
#[command(name = "bankroll")]
#[command(about = "Register accounts, move money between them atomically, and read their history")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "BANKROLL_DATABASE", default_value = "bankroll.db")]
    pub database: String,

    /// Balance granted to newly registered accounts
    #[arg(long, env = "BANKROLL_OPENING_BALANCE", default_value = "1000.00")]
    pub opening_balance: String,

    /// Log debug output to stderr (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Register a new account with the opening balance
    Register {
        /// Email address (must be unique)
        email: String,

        #[arg(long)]
        first_name: String,

        #[arg(long)]
        last_name: String,
    },

    /// Show one account
    Account {
        /// Account email
        email: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List all accounts
    Accounts,

    /// Send money from one account to another
    Transfer {
        /// Amount to transfer (e.g., "40.00" or "40")
        amount: String,

        /// Sending account email (stands in for the authenticated caller)
        #[arg(long)]
        from: String,

        /// Recipient account email
        #[arg(long)]
        to: String,

        /// Description of the transfer
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Show an account's transactions, newest first
    History {
        /// Account email
        email: String,

        /// Maximum number of records to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only show records older than this sequence number
        #[arg(long)]
        before: Option<i64>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify that funds are conserved and every transfer is paired
    Check,
}

/// Install the stderr log subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "bankroll=debug" } else { "bankroll=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    if let Err(e) = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("tracing init failed: {e}");
    }
}

impl Cli {
    pub fn config(&self) -> Result<LedgerConfig> {
        let opening_balance = parse_cents(&self.opening_balance).with_context(|| {
            format!("Invalid opening balance '{}'", self.opening_balance)
        })?;
        if opening_balance < 0 {
            bail!("Opening balance cannot be negative");
        }
        Ok(LedgerConfig::default().with_opening_balance(opening_balance))
    }

    pub async fn run(self) -> Result<()> {
        let config = self.config()?;

        match self.command {
            Commands::Init => {
                LedgerService::init(&self.database, config).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::Register {
                email,
                first_name,
                last_name,
            } => {
                let service = LedgerService::connect(&self.database, config).await?;
                let account = service
                    .register_account(NewAccount {
                        first_name,
                        last_name,
                        email,
                    })
                    .await?;
                println!(
                    "Registered {} <{}> with balance {}",
                    account.full_name(),
                    account.email,
                    format_cents(account.balance_cents)
                );
            }

            Commands::Account { email, json } => {
                let service = LedgerService::connect(&self.database, config).await?;
                let account = service.get_account_by_email(&email).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&account)?);
                } else {
                    print_account(&account);
                }
            }

            Commands::Accounts => {
                let service = LedgerService::connect(&self.database, config).await?;
                let accounts = service.list_accounts().await?;
                if accounts.is_empty() {
                    println!("No accounts found.");
                } else {
                    println!("{:<32} {:<24} {:>14}", "EMAIL", "NAME", "BALANCE");
                    println!("{}", "-".repeat(72));
                    for account in accounts {
                        println!(
                            "{:<32} {:<24} {:>14}",
                            account.email,
                            account.full_name(),
                            format_cents(account.balance_cents)
                        );
                    }
                }
            }

            Commands::Transfer {
                amount,
                from,
                to,
                description,
            } => {
                let service = LedgerService::connect(&self.database, config).await?;
                let amount_cents =
                    parse_cents(&amount).context("Invalid amount format. Use '40.00' or '40'")?;
                let sender = service.get_account_by_email(&from).await?;

                let receipt = service
                    .transfer(sender.id, &to, amount_cents, description.as_deref())
                    .await?;

                println!(
                    "Sent {} to {} ({})",
                    format_cents(receipt.amount_cents),
                    receipt.recipient_email,
                    receipt.description
                );
                println!("  Transfer ID: {}", receipt.transfer_id);
                println!(
                    "  Completed:   {}",
                    receipt.completed_at.format("%Y-%m-%d %H:%M:%S")
                );
            }

            Commands::History {
                email,
                limit,
                before,
                json,
            } => {
                let service = LedgerService::connect(&self.database, config).await?;
                let account = service.get_account_by_email(&email).await?;
                let records = service
                    .history_page(account.id, HistoryQuery { limit, before })
                    .await?;

                if json {
                    println!("{}", serde_json::to_string_pretty(&records)?);
                } else if records.is_empty() {
                    println!("No transactions found.");
                } else {
                    println!(
                        "{:>6} {:<20} {:<9} {:>12} {:<28} DESCRIPTION",
                        "SEQ", "DATE", "DIRECTION", "AMOUNT", "COUNTERPARTY"
                    );
                    println!("{}", "-".repeat(100));
                    for record in &records {
                        println!(
                            "{:>6} {:<20} {:<9} {:>12} {:<28} {}",
                            record.sequence,
                            record.created_at.format("%Y-%m-%d %H:%M:%S"),
                            record.direction,
                            format_cents(record.signed_amount()),
                            record.counterparty_email.as_deref().unwrap_or("-"),
                            record.description
                        );
                    }
                    if let Some(oldest) = records.last() {
                        println!();
                        println!("Older records: --before {}", oldest.sequence);
                    }
                }
            }

            Commands::Check => {
                let service = LedgerService::connect(&self.database, config).await?;
                let report = service.audit().await?;
                print_report(&report);
                if !report.is_healthy() {
                    bail!("Ledger integrity check failed");
                }
            }
        }

        Ok(())
    }
}

fn print_account(account: &Account) {
    println!("Account: {}", account.full_name());
    println!("  ID:       {}", account.id);
    println!("  Email:    {}", account.email);
    println!("  Balance:  {}", format_cents(account.balance_cents));
    println!("  Opened:   {}", account.created_at.format("%Y-%m-%d %H:%M:%S"));
}

fn print_report(report: &IntegrityReport) {
    println!("Accounts:       {}", report.account_count);
    println!("Records:        {}", report.record_count);
    println!("Total balance:  {}", format_wide_cents(report.total_balance));
    println!("Expected total: {}", format_wide_cents(report.expected_total));

    for id in &report.negative_balances {
        println!("  NEGATIVE  account {}", id);
    }
    for drift in &report.drifted_balances {
        println!(
            "  DRIFT     {}: stored {}, replayed {}",
            drift.email,
            format_cents(drift.stored),
            format_wide_cents(drift.replayed)
        );
    }
    for transfer in &report.unpaired_transfers {
        println!("  UNPAIRED  transfer {}", transfer);
    }
    if report.orphan_records > 0 {
        println!("  ORPHANS   {} record(s) without an account", report.orphan_records);
    }

    if report.is_healthy() {
        println!("OK: ledger is consistent");
    }
}
