//! Position sentinel.
//!
//! Mirrors borrower positions of Aave-style lending pools on every configured
//! network, audits the mirror against the chain and evaluates liquidations.
//! Each network gets a single-writer runner fed by a log poller, or by
//! `<network>\t<block json>` lines on stdin when `SENTINEL_INGEST=stdin`.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sentinel_chain::{
    create_gas_strategy, ChainClient, HttpChainClient, LocalKeySigner, LogPoller, MulticallBatcher,
    NonceManager, RelayRoute, TransactionExecutor,
};
use sentinel_core::{
    EnvSecretStore, InMemoryStore, LogNotifier, NetworkConfig, NetworkRunner, PositionStore,
    RunnerDeps, RunnerRegistry, RuntimeVariables, SentinelConfig,
};

const DEFAULT_LOG_FILTER: &str = "info,sentinel_core=debug,sentinel_chain=debug";
const INGEST_ENV: &str = "SENTINEL_INGEST";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    // SENTINEL_CONFIG names a TOML file; otherwise SENTINEL_PROFILE picks a profile
    let config = SentinelConfig::load().context("loading configuration")?;
    config.log_config();
    if config.networks.is_empty() {
        bail!("no networks configured");
    }

    let runtime = Arc::new(RuntimeVariables::from_config(&config));
    let store: Arc<dyn PositionStore> = Arc::new(InMemoryStore::new());
    let nonces = Arc::new(NonceManager::new());
    let from_stdin = std::env::var(INGEST_ENV).is_ok_and(|mode| mode.eq_ignore_ascii_case("stdin"));

    let mut registry = RunnerRegistry::new();
    let mut pollers = JoinSet::new();
    let mut runners = JoinSet::new();
    for network in &config.networks {
        let (runner, poller) = build_runner(network, &config, runtime.clone(), store.clone(), nonces.clone())
            .await
            .with_context(|| format!("starting network {}", network.name))?;
        runner
            .bootstrap(&network.seed_users)
            .await
            .with_context(|| format!("bootstrapping network {}", network.name))?;

        let (tx, rx) = mpsc::channel(config.sync.block_channel_capacity);
        if from_stdin {
            registry.register(network.name.clone(), tx);
        } else {
            let start = network.start_block;
            pollers.spawn(async move { poller.run(start, tx).await });
        }
        runners.spawn(async move { runner.run(rx).await });
    }
    if from_stdin {
        pollers.spawn(ingest_stdin(registry));
    }
    info!(networks = config.networks.len(), "Sentinel running");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
        Some(result) = runners.join_next() => {
            if let Err(err) = result {
                error!(error = %err, "Runner task failed");
            }
        }
    }

    // Stopping the feeders closes every block channel; runners flush and exit.
    pollers.shutdown().await;
    while let Some(result) = runners.join_next().await {
        if let Err(err) = result {
            error!(error = %err, "Runner task failed during shutdown");
        }
    }
    info!("Sentinel stopped");
    Ok(())
}

/// Route `<network>\t<block json>` lines to their runners until stdin closes.
async fn ingest_stdin(registry: RunnerRegistry) {
    let networks: Vec<&str> = registry.networks().collect();
    info!(?networks, "Reading block payloads from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                error!(error = %err, "stdin read failed");
                break;
            }
        };
        let Some((network, payload)) = line.split_once('\t') else {
            if !line.trim().is_empty() {
                warn!("Ignoring line without a network prefix");
            }
            continue;
        };
        if let Err(err) = registry.ingest_json(network.trim(), payload).await {
            warn!(network = network.trim(), error = %err, "Block payload rejected");
        }
    }
    info!("stdin closed");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn build_runner(
    network: &NetworkConfig,
    config: &SentinelConfig,
    runtime: Arc<RuntimeVariables>,
    store: Arc<dyn PositionStore>,
    nonces: Arc<NonceManager>,
) -> Result<(NetworkRunner, Arc<LogPoller>)> {
    let client: Arc<dyn ChainClient> = Arc::new(
        HttpChainClient::connect(&network.rpc_url, network.chain_id, config.sync.retry_policy())
            .await
            .context("connecting to RPC")?,
    );
    info!(network = %network.name, chain_id = network.chain_id, "RPC connected");

    let batcher = Arc::new(
        MulticallBatcher::new(client.clone(), network.multicall)
            .with_chunk_size(config.sync.multicall_chunk_size),
    );
    let poller = Arc::new(
        LogPoller::new(client.clone(), vec![network.pool])
            .with_interval(config.sync.poll_interval())
            .with_max_block_range(config.sync.max_block_range),
    );
    let executor = build_executor(network, config, client.clone(), nonces).await;

    let deps = RunnerDeps {
        client,
        batcher,
        store,
        notifier: Arc::new(LogNotifier),
        gas: create_gas_strategy(&network.gas),
        executor,
    };
    let runner = NetworkRunner::new(Arc::new(network.context()), deps, runtime, config)
        .with_poller(poller.clone());
    Ok((runner, poller))
}

/// Executor for networks that can execute; `None` leaves the network in
/// report-only mode.
async fn build_executor(
    network: &NetworkConfig,
    config: &SentinelConfig,
    client: Arc<dyn ChainClient>,
    nonces: Arc<NonceManager>,
) -> Option<Arc<TransactionExecutor>> {
    network.liquidation_executor?;

    let route = match RelayRoute::for_network(
        network.native_private_relay,
        &network.rpc_url,
        network.protect_relay_url.as_deref(),
    ) {
        Ok(route) => route,
        Err(err) => {
            warn!(network = %network.name, error = %err, "No private relay, report-only");
            return None;
        }
    };
    let signer = match LocalKeySigner::from_secret_store(&EnvSecretStore, &network.signer_secret).await {
        Ok(signer) => signer,
        Err(err) => {
            warn!(network = %network.name, error = %err, "Signer unavailable, report-only");
            return None;
        }
    };

    let executor = TransactionExecutor::new(
        client,
        Arc::new(signer),
        nonces,
        create_gas_strategy(&network.gas),
        route.into_relay(),
    )
    .with_broadcast_timeout(config.liquidation.broadcast_timeout());
    info!(
        network = %network.name,
        signer = %executor.signer_address(),
        relay = executor.relay_name(),
        "Liquidation executor ready"
    );
    Some(Arc::new(executor))
}
