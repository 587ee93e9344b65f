use std::sync::Arc;
use std::time::Duration;

use ethers::providers::Middleware;
use ethers::types::{Address, U256};
use eyre::{bail, Result, WrapErr};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tracing::{debug, error, info, info_span, instrument::Instrumented, warn, Instrument};

use relayer_base::db::RelayerDB;
use relayer_base::{CoreMetrics, Settings};
use relayer_core::{method_allowed, CrossTransfer, Decode, MakeTxParam};
use relayer_ethereum::contracts::EthCrossChainManager;
use relayer_ethereum::EthProvider;
use relayer_poly::{PolyRpcClient, PolySigner};

const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Tails the EVM chain: batches headers for the poly header-sync contract
/// (with fork rollback) and persists outbound cross-chain events for proof
/// relay.
pub struct EthMonitor {
    settings: Arc<Settings>,
    provider: Arc<EthProvider>,
    eccm: EthCrossChainManager<EthProvider>,
    poly: Arc<PolyRpcClient>,
    signer: Arc<PolySigner>,
    db: RelayerDB,
    metrics: Arc<CoreMetrics>,
    current_height: u64,
    header4sync: Vec<Vec<u8>>,
    skipped_senders: Vec<Address>,
}

impl EthMonitor {
    /// Resolve the starting height and build the monitor. Fails when the
    /// side chain was never registered with the header-sync contract.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        settings: Arc<Settings>,
        provider: Arc<EthProvider>,
        eccm_address: Address,
        poly: Arc<PolyRpcClient>,
        signer: Arc<PolySigner>,
        db: RelayerDB,
        metrics: Arc<CoreMetrics>,
        start_height: u64,
        force_height: u64,
    ) -> Result<Self> {
        let side_chain_id = settings.heco_config.side_chain_id;
        let synced = poly
            .synced_side_chain_height(side_chain_id)
            .await
            .wrap_err("failed to read synced side chain height")?;
        if synced == 0 {
            bail!("the genesis block has not been synced to poly yet");
        }

        let current_height = if force_height > 0 && force_height < synced {
            force_height
        } else if start_height > 0 {
            start_height
        } else {
            synced.saturating_sub(settings.heco_config.block_config).max(1)
        };

        let skipped_senders = settings
            .heco_config
            .skipped_senders
            .iter()
            .map(|s| {
                s.parse::<Address>()
                    .wrap_err_with(|| format!("bad skipped sender address {}", s))
            })
            .collect::<Result<Vec<_>>>()?;
        for sender in &skipped_senders {
            info!(sender = ?sender, "skipping outbound events from sender");
        }

        info!(height = current_height, "evm monitor starting");
        Ok(Self {
            settings,
            provider: provider.clone(),
            eccm: EthCrossChainManager::new(eccm_address, provider),
            poly,
            signer,
            db,
            metrics,
            current_height,
            header4sync: vec![],
            skipped_senders,
        })
    }

    /// Run the monitor until cancelled.
    pub fn spawn(mut self) -> Instrumented<JoinHandle<Result<()>>> {
        let span = info_span!("EthMonitor");
        let interval_secs = self.settings.heco_config.monitor_interval.max(1);
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(interval_secs));
            loop {
                ticker.tick().await;
                self.tick().await;
            }
        })
        .instrument(span)
    }

    async fn tick(&mut self) {
        let block_config = self.settings.heco_config.block_config;
        let latest = match self.provider.get_block_number().await {
            Ok(height) => height.as_u64(),
            Err(e) => {
                warn!(error = %e, "cannot get evm node height");
                return;
            }
        };
        if latest.saturating_sub(self.current_height) <= block_config {
            return;
        }
        debug!(latest, "scanning evm chain");

        let mut ok = true;
        while self.current_height < latest - block_config {
            if self.current_height % 10 == 0 {
                info!(height = self.current_height, "handling evm block");
            }
            if !self.handle_new_block(self.current_height + 1).await {
                ok = false;
                break;
            }
            self.current_height += 1;

            if self.header4sync.len() >= self.settings.heco_config.headers_per_batch {
                if let Err(e) = self.commit_headers_to_poly().await {
                    error!(error = %e, "failed to commit header batch");
                    ok = false;
                    break;
                }
            }
        }
        if ok && !self.header4sync.is_empty() {
            if let Err(e) = self.commit_headers_to_poly().await {
                error!(error = %e, "failed to flush header batch");
            }
        }
        self.metrics.set_chain_height("heco", self.current_height);
    }

    /// Capture the header and events of one block. The header must land
    /// before the height advances; events are retried in place since a gap
    /// would lose transfers for good.
    async fn handle_new_block(&mut self, height: u64) -> bool {
        if !self.handle_block_header(height).await {
            warn!(height, "failed to handle block header, retrying next tick");
            return false;
        }
        while !self.fetch_lock_deposit_events(height).await {
            error!(height, "failed to fetch deposit events, retrying");
            sleep(RETRY_BACKOFF).await;
        }
        true
    }

    async fn handle_block_header(&mut self, height: u64) -> bool {
        let block = match self.provider.get_block(height).await {
            Ok(Some(block)) => block,
            _ => {
                warn!(height, "failed to fetch evm header");
                return false;
            }
        };
        let raw = match serde_json::to_vec(&block) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(height, error = %e, "failed to encode evm header");
                return false;
            }
        };
        let synced_hash = self
            .poly
            .synced_header_hash(self.settings.heco_config.side_chain_id, height)
            .await
            .unwrap_or_default();
        let hash = block.hash.unwrap_or_default();
        if synced_hash.is_empty() || synced_hash != hash.as_bytes() {
            self.header4sync.push(raw);
        }
        true
    }

    async fn fetch_lock_deposit_events(&self, height: u64) -> bool {
        let side_chain_id = self.settings.heco_config.side_chain_id;
        let events = match self
            .eccm
            .cross_chain_event_filter()
            .from_block(height)
            .to_block(height)
            .query_with_meta()
            .await
        {
            Ok(events) => events,
            Err(e) => {
                error!(height, error = %e, "CrossChainEvent filter error");
                return false;
            }
        };

        for (event, meta) in events {
            if !self
                .settings
                .target_contracts
                .is_outbound_target(&event.proxy_or_asset_contract, event.to_chain_id)
            {
                continue;
            }
            if self.skipped_senders.contains(&event.sender) {
                info!(sender = ?event.sender, "skipped cross chain sender");
                continue;
            }
            let mut rawdata: &[u8] = event.rawdata.as_ref();
            let param = match MakeTxParam::read_from(&mut rawdata) {
                Ok(param) => param,
                Err(e) => {
                    warn!(error = %e, "failed to deserialize MakeTxParam");
                    continue;
                }
            };
            if !method_allowed(&param.method) {
                warn!(
                    method = %param.method,
                    tx = ?meta.transaction_hash,
                    "invalid target contract method"
                );
                continue;
            }
            match self
                .poly
                .transfer_done(side_chain_id, &param.cross_chain_id)
                .await
            {
                Ok(true) => {
                    debug!(
                        ccid = %hex::encode(&param.cross_chain_id),
                        tx = ?meta.transaction_hash,
                        "cross chain tx already on poly"
                    );
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    // an unreadable done-marker is treated as not-done; the
                    // poly node rejects duplicates anyway
                    warn!(error = %e, "failed to check done state");
                }
            }

            let index = U256::from_big_endian(&event.tx_id);
            let transfer = CrossTransfer {
                tx_index: format!("{:x}", index),
                tx_id: meta.transaction_hash.as_bytes().to_vec(),
                value: event.rawdata.to_vec(),
                to_chain: event.to_chain_id as u32,
                height,
            };
            if let Err(e) = self.db.store_retry(&transfer) {
                error!(error = %e, "failed to persist cross transfer");
                continue;
            }
            info!(tx = ?meta.transaction_hash, height, "found cross chain tx");
            self.metrics.event_stored("heco");
        }
        true
    }

    /// Submit the pending header batch. A fork-shaped rejection triggers the
    /// rollback walk and clears the batch; success waits for on-chain
    /// confirmation before clearing.
    async fn commit_headers_to_poly(&mut self) -> Result<()> {
        let side_chain_id = self.settings.heco_config.side_chain_id;
        let tx_hash = match self
            .poly
            .sync_block_header(&self.signer, side_chain_id, &self.header4sync)
            .await
        {
            Ok(tx_hash) => tx_hash,
            Err(e) if e.is_fork() => {
                warn!(error = %e, "header batch rejected, rolling back");
                self.roll_back_to_common_ancestor().await;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        loop {
            let landed = self
                .poly
                .get_block_height_by_tx_hash(&tx_hash)
                .await
                .unwrap_or(0);
            let current = self.poly.get_current_block_height().await.unwrap_or(0);
            if landed > 0 && current > landed {
                break;
            }
            debug!(tx = %tx_hash, "waiting for header sync confirmation");
            sleep(RETRY_BACKOFF).await;
        }
        info!(
            tx = %tx_hash,
            batch = self.header4sync.len(),
            "synced header batch to poly"
        );
        self.metrics.transaction_relayed("poly");
        self.header4sync.clear();
        Ok(())
    }

    /// Walk backwards to the most recent height where the local chain and
    /// the poly light client agree, then resume from there.
    async fn roll_back_to_common_ancestor(&mut self) {
        let side_chain_id = self.settings.heco_config.side_chain_id;
        let mut height = self.current_height;
        loop {
            height = height.saturating_sub(1);
            if height == 0 {
                break;
            }
            let synced = match self.poly.synced_header_hash(side_chain_id, height).await {
                Ok(raw) if !raw.is_empty() => raw,
                _ => continue,
            };
            let block = loop {
                match self.provider.get_block(height).await {
                    Ok(Some(block)) => break block,
                    _ => {
                        error!(height, "failed to get header during rollback, retrying");
                        sleep(RETRY_BACKOFF).await;
                    }
                }
            };
            let hash = block.hash.unwrap_or_default();
            if hash.as_bytes() == synced.as_slice() {
                info!(height, hash = ?hash, "found the common ancestor");
                self.current_height = height;
                break;
            }
        }
        self.header4sync.clear();
    }
}
