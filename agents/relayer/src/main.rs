//! A bidirectional relayer between a poly settlement chain and an EVM chain.
//!
//! Five long-running tasks share one persistent store: both chain monitors,
//! the two relay workers and the deposit checker. See the per-module docs.

#![forbid(unsafe_code)]
#![warn(unused_extern_crates)]

mod eth_monitor;
mod poly_monitor;
mod proof_relay;
mod relay;
mod settings;

use std::sync::Arc;

use clap::Parser;
use ethers::providers::Middleware;
use ethers::types::Address;
use eyre::{eyre, Result, WrapErr};
use futures_util::future::select_all;
use prometheus::Registry;
use tokio::task::JoinHandle;
use tracing::{info, info_span, instrument::Instrumented, Instrument};

use relayer_base::db::RelayerDB;
use relayer_base::settings::{Level, TracingConfig};
use relayer_base::{cancel_task, CoreMetrics, Settings};
use relayer_ethereum::{load_accounts, EthProvider, EthSenderPool};
use relayer_poly::{BridgeFeeClient, PolyRpcClient, PolySigner};

use crate::eth_monitor::EthMonitor;
use crate::poly_monitor::PolyMonitor;
use crate::proof_relay::ProofRelay;
use crate::relay::BridgeRelay;
use crate::settings::Opts;

fn main() -> Result<()> {
    color_eyre::install()?;

    let opts = Opts::parse();
    TracingConfig {
        level: Level::from_verbosity(opts.loglevel),
        log_dir: opts.logdir.clone(),
    }
    .try_init_tracing()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build the runtime")
        .block_on(_main(opts))
}

async fn _main(opts: Opts) -> Result<()> {
    let settings = Arc::new(Settings::load(&opts.cliconfig)?);
    info!(version = env!("CARGO_PKG_VERSION"), "relayer starting");

    let db = RelayerDB::open(&settings.bolt_db_path)?;

    let provider = Arc::new(
        EthProvider::try_from(settings.heco_config.rest_url.as_str())
            .wrap_err("bad evm node url")?,
    );
    let chain_id = provider
        .get_chainid()
        .await
        .wrap_err("cannot dial the evm node")?
        .as_u64();
    let eccd_address: Address = settings
        .heco_config
        .eccd_contract_address
        .parse()
        .wrap_err("bad ECCD contract address")?;
    let eccm_address: Address = settings
        .heco_config
        .eccm_contract_address
        .parse()
        .wrap_err("bad ECCM contract address")?;

    let poly = Arc::new(PolyRpcClient::new(&settings.poly_config.rest_url));
    let poly_signer = Arc::new(
        PolySigner::from_keystore(
            &settings.poly_config.wallet_file,
            &settings.poly_config.wallet_pwd,
        )
        .wrap_err("failed to open the poly wallet")?,
    );

    let wallets = load_accounts(
        &settings.heco_config.key_store_path,
        &settings.heco_config.key_store_pwd_set,
    )?;
    let senders = Arc::new(EthSenderPool::new(
        wallets,
        provider.clone(),
        chain_id,
        eccd_address,
        eccm_address,
        settings.routine_num,
    )?);

    let bridge_url = settings
        .bridge_url
        .first()
        .and_then(|urls| urls.first())
        .ok_or_else(|| eyre!("no bridge fee service url configured"))?;
    let bridge_fee = BridgeFeeClient::new(bridge_url);

    let metrics = Arc::new(CoreMetrics::new(Arc::new(Registry::new()))?);

    let poly_monitor = PolyMonitor::new(
        settings.clone(),
        poly.clone(),
        db.clone(),
        provider.clone(),
        eccd_address,
        senders.clone(),
        metrics.clone(),
        opts.polystart,
    )
    .await?;
    let eth_monitor = EthMonitor::new(
        settings.clone(),
        provider.clone(),
        eccm_address,
        poly.clone(),
        poly_signer.clone(),
        db.clone(),
        metrics.clone(),
        opts.hecostart,
        opts.hecostartforce,
    )
    .await?;
    let bridge_relay = BridgeRelay::new(
        db.clone(),
        bridge_fee,
        senders,
        metrics.clone(),
        settings.heco_config.monitor_interval,
    );
    let proof_relay = Arc::new(ProofRelay::new(
        settings,
        provider,
        eccd_address,
        poly,
        poly_signer,
        db,
        metrics,
    ));

    let tasks = vec![
        poly_monitor.spawn(),
        eth_monitor.spawn(),
        bridge_relay.spawn(),
        proof_relay.clone().spawn_retry(),
        proof_relay.spawn_check(),
        spawn_shutdown_watcher(),
    ];
    run_all(tasks).await
}

/// Resolves when the process receives SIGINT, SIGTERM or SIGHUP.
fn spawn_shutdown_watcher() -> Instrumented<JoinHandle<Result<()>>> {
    let span = info_span!("shutdown");
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut hangup = signal(SignalKind::hangup())?;
        tokio::select! {
            _ = interrupt.recv() => info!("received SIGINT"),
            _ = terminate.recv() => info!("received SIGTERM"),
            _ = hangup.recv() => info!("received SIGHUP"),
        }
        Ok(())
    })
    .instrument(span)
}

/// Run every task and shut down as soon as any one of them ends; the
/// shutdown watcher makes signals one of those endings.
async fn run_all(tasks: Vec<Instrumented<JoinHandle<Result<()>>>>) -> Result<()> {
    let (res, _, remaining) = select_all(tasks).await;
    info!("shutting down");
    for task in remaining {
        cancel_task!(task);
    }
    res?
}
