//! Relay Party CLI
//!
//! Runs a whole relay group on an in-memory chain and broadcast hub through
//! DKG result finalization:
//! - result signing and signature collection
//! - staggered result publication
//! - conflict resolution when members disagree

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures_util::future::join_all;
use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use relay_dkg_core::chain::{Chain, LocalChain};
use relay_dkg_core::crypto;
use relay_dkg_core::net::MemoryBroadcastHub;
use relay_dkg_core::state::SigningStateMachine;
use relay_dkg_core::{
    DkgResult, DkgResultHash, GroupRegistry, MemberIndex, ProtocolConfig, RequestId, Resolution,
    SigningMember,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

/// Relay Party - DKG result finalization
#[derive(Parser)]
#[command(name = "relay-party")]
#[command(about = "Threshold relay group DKG result finalization")]
#[command(version)]
struct Cli {
    /// JSON protocol configuration file
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, env = "RELAY_JSON_LOGS")]
    json_logs: bool,

    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Commands,
}

/// Protocol parameters overriding the configuration file
#[derive(Args)]
struct ConfigOverrides {
    /// Number of members in the group
    #[arg(short = 'n', long, env = "GROUP_SIZE")]
    group_size: Option<usize>,

    /// Minimum supporting signatures for a submission
    #[arg(long, env = "HONEST_THRESHOLD")]
    honest_threshold: Option<usize>,

    /// Assumed upper bound on malicious members
    #[arg(short = 'm', long, env = "DISHONEST_THRESHOLD")]
    dishonest_threshold: Option<usize>,

    /// Blocks between consecutive members' submission turns
    #[arg(long, env = "BLOCK_STEP")]
    block_step: Option<u64>,

    /// Blocks allotted to conflict resolution
    #[arg(long, env = "CONFLICT_DURATION")]
    conflict_duration: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every member of a group through result finalization
    Simulate {
        /// DKG execution identifier
        #[arg(short, long, default_value_t = 1)]
        request_id: RequestId,

        /// Milliseconds per simulated block
        #[arg(short, long, env = "BLOCK_TIME_MS", default_value_t = 100)]
        block_time_ms: u64,

        /// Members (highest indices) holding a different result
        #[arg(short, long, default_value_t = 0)]
        divergent: usize,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into());
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Simulate {
            request_id,
            block_time_ms,
            divergent,
        } => {
            simulate(config, request_id, Duration::from_millis(block_time_ms), divergent).await?;
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<ProtocolConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("could not read config {}", path.display()))?;
            serde_json::from_str(&json)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => ProtocolConfig::default(),
    };

    let overrides = &cli.overrides;
    if let Some(group_size) = overrides.group_size {
        config.group_size = group_size;
    }
    if let Some(dishonest_threshold) = overrides.dishonest_threshold {
        config.dishonest_threshold = dishonest_threshold;
    }
    match overrides.honest_threshold {
        Some(honest_threshold) => config.honest_threshold = honest_threshold,
        None if overrides.group_size.is_some() || overrides.dishonest_threshold.is_some() => {
            config.honest_threshold = config.group_size.saturating_sub(config.dishonest_threshold);
        }
        None => {}
    }
    if let Some(block_step) = overrides.block_step {
        config.block_step = block_step;
    }
    if let Some(conflict_duration) = overrides.conflict_duration {
        config.conflict_duration = conflict_duration;
    }

    config.validate()?;
    Ok(config)
}

fn random_result(group_size: usize) -> DkgResult {
    let group_key = SigningKey::random(&mut OsRng);
    DkgResult {
        success: true,
        group_public_key: crypto::public_key_bytes(&group_key),
        disqualified: vec![false; group_size],
        inactive: vec![false; group_size],
    }
}

async fn simulate(
    config: ProtocolConfig,
    request_id: RequestId,
    block_time: Duration,
    divergent: usize,
) -> Result<()> {
    if divergent > config.group_size {
        bail!(
            "divergent members ({}) exceed group size ({})",
            divergent,
            config.group_size
        );
    }

    info!(
        group_size = config.group_size,
        honest_threshold = config.honest_threshold,
        dishonest_threshold = config.dishonest_threshold,
        divergent,
        request_id,
        "Starting simulation"
    );

    let chain = LocalChain::connect(config.honest_threshold, block_time);
    let hub = MemoryBroadcastHub::new();
    let registry = GroupRegistry::new();

    let agreed_result = random_result(config.group_size);
    let divergent_result = random_result(config.group_size);

    let keys: Vec<SigningKey> = (0..config.group_size)
        .map(|_| SigningKey::random(&mut OsRng))
        .collect();
    let public_keys: HashMap<MemberIndex, Vec<u8>> = keys
        .iter()
        .enumerate()
        .map(|(i, key)| (i + 1, crypto::public_key_bytes(key)))
        .collect();

    let first_divergent = config.group_size - divergent;
    let mut machines = Vec::with_capacity(config.group_size);
    for (i, key) in keys.into_iter().enumerate() {
        let result = if i < first_divergent {
            agreed_result.clone()
        } else {
            divergent_result.clone()
        };
        let member = SigningMember::new(i + 1, key, public_keys.clone());
        machines.push(SigningStateMachine::new(
            config.clone(),
            request_id,
            member,
            result,
            chain.clone(),
            hub.channel(&format!("relay-group-{}", request_id)),
        )?);
    }

    let handles: Vec<_> = machines
        .into_iter()
        .map(|machine| tokio::spawn(machine.run()))
        .collect();
    let mut outcomes = Vec::with_capacity(handles.len());
    for outcome in join_all(handles).await {
        outcomes.push(outcome?);
    }

    println!("Request {}:", request_id);
    for (i, outcome) in outcomes.iter().enumerate() {
        let member = i + 1;
        match outcome {
            Ok(Resolution::Agreed {
                block_height,
                result_hash,
            }) => {
                println!("  member {:>3}: agreed on {} at block {}", member, result_hash, block_height);
            }
            Ok(Resolution::Unresolved {
                block_height,
                elapsed_blocks,
                votes,
            }) => {
                println!(
                    "  member {:>3}: unresolved at block {} after {} blocks, {} candidate results",
                    member,
                    block_height,
                    elapsed_blocks,
                    votes.len()
                );
            }
            Err(e) => {
                warn!(member, error = %e, "Member failed");
                println!("  member {:>3}: failed: {}", member, e);
            }
        }
    }

    let Some(result_hash) = agreed_result_hash(&outcomes) else {
        println!("No agreed result, group not registered");
        return Ok(());
    };
    let Some((result, signatures)) = chain.submission(request_id, &result_hash) else {
        bail!("agreed result {} was never submitted", result_hash);
    };

    let current_block = chain.block_counter().current_block()?;
    if !result.success {
        println!("Agreed result {} reports a failed key generation", result_hash);
    } else if registry.register_group(&result.group_public_key, current_block) {
        println!(
            "Group {} registered at block {} with {} supporting signatures",
            hex::encode(&result.group_public_key),
            current_block,
            signatures.len()
        );
    }

    Ok(())
}

/// Result hash every agreeing member settled on. `None` when no member
/// agreed or agreeing members disagree with each other.
fn agreed_result_hash(outcomes: &[relay_dkg_core::Result<Resolution>]) -> Option<DkgResultHash> {
    let mut agreed = outcomes.iter().filter_map(|outcome| match outcome {
        Ok(resolution) => resolution.agreed_hash(),
        Err(_) => None,
    });

    let first = agreed.next()?;
    agreed.all(|hash| hash == first).then_some(first)
}
