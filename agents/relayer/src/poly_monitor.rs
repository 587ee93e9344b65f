use std::sync::Arc;
use std::time::Duration;

use ethers::types::Address;
use eyre::Result;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, info_span, instrument::Instrumented, warn, Instrument};

use relayer_base::db::RelayerDB;
use relayer_base::settings::{
    POLY_BATCH_PER_TICK, POLY_MONITOR_INTERVAL_SECS, POLY_USEFUL_BLOCK_NUM,
};
use relayer_base::{CoreMetrics, Settings};
use relayer_core::{
    epoch_change, method_allowed, parse_audit_path_value, BridgeTransaction, Decode, FeeState,
    PolyHeader, ToMerkleValue, ADDRESS_EMPTY,
};
use relayer_ethereum::contracts::EthCrossChainData;
use relayer_ethereum::{bytes_to_address, EthProvider, EthSenderPool};
use relayer_poly::PolyRpcClient;

/// Tails the poly chain: persists cross-chain deposits as bridge
/// transactions and pushes epoch transitions to the EVM light client.
pub struct PolyMonitor {
    settings: Arc<Settings>,
    poly: Arc<PolyRpcClient>,
    db: RelayerDB,
    eccd: EthCrossChainData<EthProvider>,
    senders: Arc<EthSenderPool>,
    metrics: Arc<CoreMetrics>,
    current_height: u32,
}

impl PolyMonitor {
    /// Resolve the starting height and build the monitor.
    ///
    /// The scan resumes from whichever is highest: the CLI override, the
    /// persisted cursor, or the epoch start height the EVM light client
    /// reports.
    pub async fn new(
        settings: Arc<Settings>,
        poly: Arc<PolyRpcClient>,
        db: RelayerDB,
        provider: Arc<EthProvider>,
        eccd_address: Address,
        senders: Arc<EthSenderPool>,
        metrics: Arc<CoreMetrics>,
        start_height: u32,
    ) -> Result<Self> {
        let eccd = EthCrossChainData::new(eccd_address, provider);
        let mut monitor = Self {
            settings,
            poly,
            db,
            eccd,
            senders,
            metrics,
            current_height: start_height,
        };

        if let Some(persisted) = monitor.db.retrieve_poly_height()? {
            monitor.current_height = monitor.current_height.max(persisted);
        }
        let epoch_start = monitor.find_epoch_start_height().await;
        monitor.current_height = monitor.current_height.max(epoch_start);
        info!(height = monitor.current_height, "poly monitor starting");
        Ok(monitor)
    }

    /// Run the monitor until cancelled.
    pub fn spawn(mut self) -> Instrumented<JoinHandle<Result<()>>> {
        let span = info_span!("PolyMonitor");
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(POLY_MONITOR_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                self.tick().await;
            }
        })
        .instrument(span)
    }

    async fn tick(&mut self) {
        let latest = match self.poly.get_current_block_height().await {
            Ok(height) => height.saturating_sub(1),
            Err(e) => {
                error!(error = %e, "failed to get poly chain height");
                return;
            }
        };
        if latest.saturating_sub(self.current_height) < POLY_USEFUL_BLOCK_NUM {
            return;
        }
        debug!(latest, "scanning poly chain");

        while self.current_height <= latest - POLY_USEFUL_BLOCK_NUM {
            if self.current_height % 10 == 0 {
                info!(height = self.current_height, "handling poly block");
            }
            if !self.handle_deposit_events(self.current_height).await {
                break;
            }
            self.current_height += 1;
            // bound the store flush latency under long catch-ups
            if self.current_height % POLY_BATCH_PER_TICK == 0 {
                break;
            }
        }
        let handled = self.current_height.saturating_sub(1);
        if let Err(e) = self.db.update_poly_height(handled) {
            error!(error = %e, "failed to save poly height");
        }
        self.metrics.set_chain_height("poly", handled as u64);
    }

    /// Latest epoch start height per the EVM light client; zero when
    /// unavailable.
    async fn find_epoch_start_height(&self) -> u32 {
        match self.eccd.get_cur_epoch_start_height().call().await {
            Ok(height) => height as u32,
            Err(e) => {
                error!(error = %e, "failed to get epoch start height from eccd");
                0
            }
        }
    }

    /// Epoch check for a header: `Some(pubkList)` when the header rotates
    /// the bookkeeper set away from what ECCD currently records.
    async fn check_epoch(&self, header: &PolyHeader) -> Result<Option<Vec<u8>>> {
        if header.next_bookkeeper == ADDRESS_EMPTY {
            return Ok(None);
        }
        if header.block_info()?.new_chain_config.is_none() {
            return Ok(None);
        }
        let raw_keepers = self.eccd.get_cur_epoch_con_pub_key_bytes().call().await?;
        Ok(epoch_change(header, &raw_keepers)?)
    }

    /// Handle one poly height. Returns false when advancement must halt for
    /// this tick.
    async fn handle_deposit_events(&self, height: u32) -> bool {
        let last_epoch = self.find_epoch_start_height().await;
        let hdr = match self.poly.get_header_by_height(height + 1).await {
            Ok(hdr) => hdr,
            Err(e) => {
                error!(height, error = %e, "failed to get poly header");
                return false;
            }
        };
        let is_curr = last_epoch < height + 1;
        let epoch_keys = match self.check_epoch(&hdr).await {
            Ok(keys) => keys,
            Err(e) => {
                error!(height, error = %e, "failed to check for epoch change");
                return false;
            }
        };
        let is_epoch = epoch_keys.is_some();

        // a header outside the current epoch, or one rotating the keepers,
        // must itself be proven against an anchor the light client accepts
        let (anchor_header, header_proof) = if !is_curr {
            (
                self.poly.get_header_by_height(last_epoch + 1).await.ok(),
                self.audit_path(height + 1, last_epoch + 1).await,
            )
        } else if is_epoch {
            (
                self.poly.get_header_by_height(height + 2).await.ok(),
                self.audit_path(height + 1, height + 2).await,
            )
        } else {
            (None, String::new())
        };

        let events = match self.poly.get_smart_contract_event_by_block(height).await {
            Ok(events) => events,
            Err(e) => {
                error!(height, error = %e, "failed to get poly block events");
                return false;
            }
        };

        let mut cnt = 0usize;
        for event in &events {
            for notify in &event.notify {
                if notify.contract_address != self.settings.poly_config.entrance_contract_address {
                    continue;
                }
                let states = match notify.states.as_array() {
                    Some(states) => states,
                    None => continue,
                };
                if states.first().and_then(|v| v.as_str()) != Some("makeProof") {
                    continue;
                }
                if states.get(2).and_then(|v| v.as_u64())
                    != Some(self.settings.heco_config.side_chain_id)
                {
                    continue;
                }
                let key = match states.get(5).and_then(|v| v.as_str()) {
                    Some(key) => key,
                    None => continue,
                };
                let proof = match self.poly.get_cross_states_proof(hdr.height - 1, key).await {
                    Ok(proof) => proof,
                    Err(e) => {
                        warn!(key, error = %e, "failed to get cross states proof");
                        continue;
                    }
                };
                let audit_path = match hex::decode(&proof.audit_path) {
                    Ok(path) => path,
                    Err(e) => {
                        warn!(error = %e, "audit path not hex");
                        continue;
                    }
                };
                let value = match parse_audit_path_value(&audit_path) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(error = %e, "malformed audit path");
                        continue;
                    }
                };
                let param = match ToMerkleValue::read_from(&mut value.as_slice()) {
                    Ok(param) => param,
                    Err(e) => {
                        warn!(error = %e, "failed to deserialize merkle value");
                        continue;
                    }
                };
                if !method_allowed(&param.make_tx_param.method) {
                    warn!(
                        method = %param.make_tx_param.method,
                        tx = %event.tx_hash,
                        "invalid target contract method"
                    );
                    continue;
                }
                let to_contract = bytes_to_address(&param.make_tx_param.to_contract_address);
                if !self
                    .settings
                    .target_contracts
                    .is_inbound_target(&to_contract, param.from_chain_id)
                {
                    continue;
                }

                cnt += 1;
                let bridge_tx = BridgeTransaction {
                    header: hdr.clone(),
                    param,
                    header_proof: header_proof.clone(),
                    anchor_header: anchor_header.clone(),
                    poly_tx_hash: event.tx_hash.clone(),
                    raw_audit_path: audit_path,
                    has_pay: FeeState::NoCheck,
                    fee: String::new(),
                };
                if let Err(e) = self.db.store_bridge_transaction(&bridge_tx.key(), &bridge_tx) {
                    error!(error = %e, "failed to persist bridge transaction");
                    return false;
                }
                self.metrics.event_stored("poly");
            }
        }

        if cnt == 0
            && is_epoch
            && is_curr
            && self.settings.heco_config.enable_change_book_keeper
        {
            let pubk_list = epoch_keys.expect("is_epoch checked");
            let sender = self.senders.select().await;
            info!(
                height,
                sender = ?sender.address(),
                "committing bookkeeper change"
            );
            return match sender.commit_header(&hdr, &pubk_list).await {
                Ok(done) => done,
                Err(e) => {
                    error!(height, error = %e, "failed to commit epoch header");
                    false
                }
            };
        }
        true
    }

    async fn audit_path(&self, height: u32, root_height: u32) -> String {
        self.poly
            .get_merkle_proof(height, root_height)
            .await
            .map(|proof| proof.audit_path)
            .unwrap_or_default()
    }
}
