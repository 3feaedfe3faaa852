use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info, warn};
use tokio::task::JoinSet;
use tokio::time::sleep;

use twopc::network::{MonitorState, ParticipantClient, StatusMonitor};
use twopc::{
    participant, Config, Coordinator, FaultKind, Participant, ParticipantConfig, ParticipantServer,
    PeerConfig, TransactionRequest,
};

/// Logs go to stderr, or are appended to the file named by `TWOPC_LOG_FILE`.
fn init_logging() {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    let log_file = std::env::var("TWOPC_LOG_FILE").ok();
    let mut open_error = None;
    if let Some(path) = &log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => open_error = Some(e),
        }
    }

    builder.init();

    if let (Some(path), Some(e)) = (log_file, open_error) {
        warn!("Cannot open log file {path}: {e}, logging to stderr");
    }
}

#[derive(Parser)]
#[command(name = "twopc")]
#[command(about = "Two-phase commit coordinator and fault-injectable participants")]
struct Cli {
    /// JSON configuration file; flags override its values
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Clone)]
struct FaultTuning {
    /// How long PREPARE stalls while the timeout fault is active
    #[arg(long)]
    fault_delay_ms: Option<u64>,

    /// How long the network fault lasts before clearing itself
    #[arg(long)]
    network_recovery_ms: Option<u64>,

    /// Keep the network fault until it is cleared in-process
    #[arg(long, default_value_t = false)]
    sticky_network_fault: bool,
}

impl FaultTuning {
    fn apply(&self, mut config: ParticipantConfig) -> ParticipantConfig {
        if let Some(ms) = self.fault_delay_ms {
            config.fault_delay_ms = ms;
        }
        if let Some(ms) = self.network_recovery_ms {
            config.network_recovery_ms = Some(ms);
        }
        if self.sticky_network_fault {
            config.network_recovery_ms = None;
        }
        config
    }
}

#[derive(Subcommand)]
enum Command {
    /// Start one participant
    Participant {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:5000")]
        address: String,

        #[command(flatten)]
        tuning: FaultTuning,
    },

    /// Start several participants in this process on consecutive ports
    Cluster {
        /// Number of participants
        #[arg(short = 'n', long, default_value_t = 6)]
        count: usize,

        /// Port of participant 0
        #[arg(short, long, default_value_t = 5000)]
        base_port: u16,

        #[command(flatten)]
        tuning: FaultTuning,
    },

    /// Run one two-phase commit and print the outcome
    Transaction {
        /// Value to commit
        #[arg(short, long)]
        value: i64,

        /// Chance (0-100) that each participant votes OK
        #[arg(short = 'p', long, default_value_t = 100)]
        success_percentage: i64,

        /// Comma-separated participant addresses
        #[arg(long)]
        participants: Option<String>,

        /// Per-participant PREPARE timeout
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Print the result as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Query one participant's status
    Status {
        #[arg(short, long)]
        address: String,

        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
    },

    /// Raise or clear an injected fault on one participant
    Fault {
        #[arg(short, long)]
        address: String,

        #[arg(value_enum)]
        kind: FaultArg,

        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
    },

    /// Poll every participant's status until interrupted
    Watch {
        /// Comma-separated participant addresses
        #[arg(long)]
        participants: Option<String>,

        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FaultArg {
    Timeout,
    Network,
    Data,
    Clear,
}

fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path).with_context(|| format!("loading config from {path}")),
        None => Ok(Config::default()),
    }
}

fn resolve_peers(config: &Config, participants: Option<String>) -> Vec<PeerConfig> {
    match participants {
        Some(list) => PeerConfig::parse_list(&list),
        None => config.participants.clone(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Participant { address, tuning } => {
            let participant_config = tuning.apply(config.participant.clone());
            let node = Arc::new(Participant::new(address.as_str(), participant_config));
            let server = ParticipantServer::bind(&address, node).await?;

            tokio::select! {
                res = server.run() => res?,
                _ = tokio::signal::ctrl_c() => info!("Shutting down participant {address}"),
            }
        }
        Command::Cluster {
            count,
            base_port,
            tuning,
        } => {
            let participant_config = tuning.apply(config.participant.clone());
            let mut servers = JoinSet::new();
            let mut aborts = Vec::with_capacity(count);
            for peer in PeerConfig::local_range(base_port, count) {
                let (addr, _, handle) =
                    participant::spawn(&peer.address, participant_config.clone()).await?;
                info!("Participant {} listening on {addr}", peer.id);
                aborts.push(handle.abort_handle());
                servers.spawn(async move { (peer.id, handle.await) });
            }

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    Some(joined) = servers.join_next() => match joined {
                        Ok((id, Ok(Ok(())))) => warn!("Participant {id} stopped"),
                        Ok((id, Ok(Err(e)))) => error!("Participant {id} failed: {e}"),
                        Ok((id, Err(e))) => error!("Participant {id} task aborted: {e}"),
                        Err(e) => error!("Participant watcher failed: {e}"),
                    },
                }
            }
            info!("Shutting down {count} participants");
            for server in aborts {
                server.abort();
            }
            servers.shutdown().await;
        }
        Command::Transaction {
            value,
            success_percentage,
            participants,
            timeout_ms,
            json,
        } => {
            let request = TransactionRequest::new(value, success_percentage)?;
            let mut coordinator_config = config.coordinator.clone();
            if let Some(ms) = timeout_ms {
                coordinator_config.prepare_timeout_ms = ms;
            }
            let peers = resolve_peers(&config, participants);
            let coordinator = Coordinator::new(coordinator_config, peers)?;
            info!(
                "Coordinating {} participants with {} workers",
                coordinator.participants().len(),
                coordinator.worker_pool_size()
            );

            let result = coordinator.run_transaction(request).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                for record in result.participants.values() {
                    let vote = match record.vote {
                        Some(true) => "OK",
                        Some(false) => "NO",
                        None => "-",
                    };
                    let note = if !record.reachable {
                        " (unreachable)"
                    } else if !record.decision_delivered {
                        " (decision not delivered)"
                    } else {
                        ""
                    };
                    println!(
                        "Participant {} ({}): vote={vote} status={}{note}",
                        record.id, record.address, record.status
                    );
                }
                let verdict = if result.committed { "COMMITTED" } else { "ROLLED BACK" };
                println!("Transaction {verdict}");
            }
        }
        Command::Status {
            address,
            timeout_ms,
        } => {
            let client = ParticipantClient::new(&address, Duration::from_millis(timeout_ms));
            let report = client.get_status().await?;
            println!("{}", report.encode());
        }
        Command::Fault {
            address,
            kind,
            timeout_ms,
        } => {
            let client = ParticipantClient::new(&address, Duration::from_millis(timeout_ms));
            match kind {
                FaultArg::Timeout => client.set_fault(FaultKind::Timeout).await?,
                FaultArg::Network => client.set_fault(FaultKind::Network).await?,
                FaultArg::Data => client.set_fault(FaultKind::Data).await?,
                FaultArg::Clear => client.clear_faults().await?,
            }
            println!("OK");
        }
        Command::Watch {
            participants,
            interval_ms,
        } => {
            let interval = Duration::from_millis(interval_ms);
            let timeout = config.coordinator.prepare_timeout().min(interval.max(Duration::from_millis(100)));
            let peers = resolve_peers(&config, participants);

            let mut states = Vec::with_capacity(peers.len());
            for peer in &peers {
                let monitor = StatusMonitor::new(ParticipantClient::new(&peer.address, timeout), interval);
                states.push((peer.clone(), monitor.state()));
                tokio::spawn(monitor.run());
            }

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = sleep(interval) => {}
                }
                for (peer, state) in &states {
                    let line = match *state.read().await {
                        MonitorState::Unknown => "...".to_string(),
                        MonitorState::Offline => "OFFLINE".to_string(),
                        MonitorState::Online(report) => report.encode(),
                    };
                    println!("[{}] {}: {line}", peer.id, peer.address);
                }
                if states.is_empty() {
                    warn!("No participants configured");
                    break;
                }
            }
        }
    }

    Ok(())
}
