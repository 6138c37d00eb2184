//! flowtx CLI - Flow transaction lifecycle driver
//!
//! Runs the lifecycle core against an in-process simulated network and
//! manages the configuration file.

#![allow(clippy::print_stdout)] // CLI program intentionally uses stdout

mod sim;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use flowtx::cadence::UFix64;
use flowtx::config::{
    AppConfig, IssueLevel, config_path as default_config_path, init_config, load_config_from,
};
use flowtx::error::DisplayError;
use flowtx::events::{EventBus, LifecycleEvent};
use flowtx::lifecycle::{LifecycleState, Outcome};
use flowtx::memory::MemoryAuthProvider;
use flowtx::network::Network;
use flowtx::session::Session;
use flowtx::status::TxId;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{Level, warn};
use tracing_subscriber::EnvFilter;

use crate::sim::{Scenario, SimulatedNetwork};

/// flowtx - Follow a Flow transaction from wallet prompt to seal
#[derive(Parser)]
#[command(name = "flowtx")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, env = "FLOWTX_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect a simulated wallet, check the balance and send a transfer
    Demo(DemoArgs),

    /// Manage configuration
    Config(ConfigArgs),

    /// Print the explorer URL for a transaction
    Explorer(ExplorerArgs),
}

/// Arguments for the demo command
#[derive(Args)]
struct DemoArgs {
    /// Recipient address
    #[arg(short, long, default_value = "0x01cf0e2f2f715450")]
    recipient: String,

    /// Amount of FLOW to send
    #[arg(short, long, default_value = "1.0")]
    amount: String,

    /// Reject the transaction in the wallet
    #[arg(long, conflicts_with_all = ["expire", "revert"])]
    cancel: bool,

    /// Let the transaction expire
    #[arg(long, conflicts_with = "revert")]
    expire: bool,

    /// Seal the transaction with an execution error
    #[arg(long)]
    revert: bool,

    /// Disconnect the wallet after N tracking updates
    #[arg(long, value_name = "N")]
    disconnect_after: Option<usize>,

    /// Milliseconds between simulated status changes
    #[arg(long, default_value_t = 400)]
    step_ms: u64,

    /// Give up after this many seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

impl DemoArgs {
    const fn scenario(&self) -> Scenario {
        if self.cancel {
            Scenario::Cancel
        } else if self.expire {
            Scenario::Expire
        } else if self.revert {
            Scenario::Revert
        } else {
            Scenario::Seal
        }
    }
}

/// Arguments for the config command
#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
    /// Write the default configuration
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
    /// Validate configuration
    Validate,
}

/// Arguments for the explorer command
#[derive(Args)]
struct ExplorerArgs {
    /// Transaction id
    tx_id: String,

    /// Network (overrides config)
    #[arg(short, long)]
    network: Option<Network>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");

    match rt.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging with the given verbosity level.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("flowtx={level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let path = cli.config.unwrap_or_else(default_config_path);
    match cli.command {
        Commands::Demo(args) => cmd_demo(args, &path).await,
        Commands::Config(args) => cmd_config(args, &path).await,
        Commands::Explorer(args) => cmd_explorer(args, &path).await,
    }
}

async fn load(path: &Path) -> Result<AppConfig> {
    let config = load_config_from(path)
        .await
        .with_context(|| format!("failed to load {}", path.display()))?;
    config.ensure_valid()?;
    Ok(config)
}

/// Run the simulated wallet flow.
async fn cmd_demo(args: DemoArgs, path: &Path) -> Result<()> {
    let config = load(path).await?;
    let network = Arc::new(SimulatedNetwork::new(
        args.scenario(),
        Duration::from_millis(args.step_ms),
        UFix64::from_units(1_000 * UFix64::SCALE),
    ));
    let bus = EventBus::new();
    let events = bus.subscribe();

    let session = Session::builder()
        .auth(Arc::new(MemoryAuthProvider::new()))
        .status_stream(network.clone())
        .listener(Arc::new(bus.clone()))
        .config(&config)
        .build()?;
    session.start();

    println!("Network: {}", config.network);
    let state = session.connect().await?;
    println!(
        "Connected: {}",
        state.address.as_deref().unwrap_or("(no address)")
    );

    let balance = session.balance(network.as_ref()).await?;
    println!("Balance: {balance} FLOW");
    if let Some(faucet) = config.network.faucet() {
        println!("Faucet:  {faucet}");
    }

    println!("Sending {} FLOW to {}", args.amount, args.recipient);
    let tx_id = match session
        .transfer(network.as_ref(), &args.amount, &args.recipient)
        .await
    {
        Ok(id) => id,
        Err(e) if !e.is_user_visible() => {
            println!("Transaction cancelled in wallet.");
            session.shutdown();
            return Ok(());
        }
        Err(e) => {
            session.shutdown();
            return Err(anyhow!("{}", DisplayError(&e)));
        }
    };
    println!("Submitted: {}", config.network.explorer_tx_url(&tx_id));

    let followed = tokio::time::timeout(
        Duration::from_secs(args.timeout),
        follow(&session, events, args.disconnect_after),
    )
    .await;

    let result = match followed {
        Ok(Ok(Some(outcome))) => {
            session.acknowledge();
            report(&tx_id, &outcome);
            Ok(())
        }
        Ok(Ok(None)) => {
            println!("Session reset before {tx_id} finished; no longer tracking.");
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(anyhow!(
            "no terminal status for {tx_id} after {}s",
            args.timeout
        )),
    };
    session.shutdown();
    result
}

/// Print lifecycle events until the transaction ends or the session resets.
async fn follow(
    session: &Session,
    mut events: broadcast::Receiver<LifecycleEvent>,
    disconnect_after: Option<usize>,
) -> Result<Option<Outcome>> {
    let mut updates = 0;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event consumer lagged");
                continue;
            }
            Err(RecvError::Closed) => return Ok(None),
        };
        print_event(&event);

        match event {
            LifecycleEvent::StateChanged {
                state: LifecycleState::Tracking { .. },
            } => {
                updates += 1;
                if disconnect_after == Some(updates) {
                    println!("Disconnecting wallet...");
                    session.disconnect().await?;
                }
            }
            LifecycleEvent::StateChanged {
                state: LifecycleState::Idle,
            } => return Ok(None),
            LifecycleEvent::Terminal { outcome, .. } => return Ok(Some(outcome)),
            _ => {}
        }
    }
}

fn print_event(event: &LifecycleEvent) {
    match event {
        LifecycleEvent::StateChanged { state } => match state {
            LifecycleState::Idle => println!("  [idle]"),
            LifecycleState::Submitting => println!("  [submitting] waiting for wallet signature"),
            LifecycleState::Tracking { status, .. } => println!("  [tracking] {status}"),
            LifecycleState::Terminal { .. } => {}
        },
        LifecycleEvent::Terminal { tx_id, outcome } => println!("  [terminal] {tx_id}: {outcome}"),
        LifecycleEvent::Error { message, .. } => println!("  [error] {message}"),
        LifecycleEvent::AuthChanged {
            logged_in: true,
            address,
        } => println!("  [wallet] connected {}", address.as_deref().unwrap_or("")),
        LifecycleEvent::AuthChanged { .. } => println!("  [wallet] disconnected"),
    }
}

fn report(tx_id: &TxId, outcome: &Outcome) {
    match outcome {
        Outcome::Sealed => println!("Transaction {tx_id} sealed."),
        Outcome::Expired => println!("Transaction {tx_id} expired before it was finalized."),
        Outcome::Failed(reason) => println!("Transaction {tx_id} failed: {reason}"),
    }
}

/// Manage the configuration file.
async fn cmd_config(args: ConfigArgs, path: &Path) -> Result<()> {
    match args.command {
        ConfigCommands::Path => {
            println!("{}", path.display());
        }
        ConfigCommands::Show => {
            let config = load_config_from(path).await?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommands::Init { force } => {
            if init_config(path, force).await? {
                println!("Configuration created: {}", path.display());
            } else {
                println!("Configuration already exists at: {}", path.display());
                println!("Use --force to overwrite.");
            }
        }
        ConfigCommands::Validate => {
            let config = load_config_from(path).await?;
            let issues = config.validate();
            let errors = issues
                .iter()
                .filter(|i| i.level == IssueLevel::Error)
                .count();
            for issue in &issues {
                let level = match issue.level {
                    IssueLevel::Warning => "warning",
                    IssueLevel::Error => "error",
                };
                println!("{level}: {}: {}", issue.field, issue.message);
            }
            if errors > 0 {
                bail!("configuration has {errors} error(s)");
            }
            println!("Configuration is valid");
        }
    }
    Ok(())
}

/// Print the explorer URL for a transaction.
async fn cmd_explorer(args: ExplorerArgs, path: &Path) -> Result<()> {
    let network = match args.network {
        Some(network) => network,
        None => load(path).await?.network,
    };
    println!("{}", network.explorer_tx_url(&TxId::new(args.tx_id)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_demo_flags() {
        let cli = Cli::try_parse_from([
            "flowtx",
            "-vv",
            "demo",
            "--expire",
            "--disconnect-after",
            "2",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Demo(args) = cli.command else {
            panic!("expected demo");
        };
        assert_eq!(args.scenario(), Scenario::Expire);
        assert_eq!(args.disconnect_after, Some(2));
    }

    #[test]
    fn test_cancel_conflicts_with_expire() {
        assert!(Cli::try_parse_from(["flowtx", "demo", "--cancel", "--expire"]).is_err());
    }

    #[test]
    fn test_explorer_network_override() {
        let cli =
            Cli::try_parse_from(["flowtx", "explorer", "abc", "--network", "mainnet"]).unwrap();
        let Commands::Explorer(args) = cli.command else {
            panic!("expected explorer");
        };
        assert_eq!(args.network, Some(Network::Mainnet));
    }
}
