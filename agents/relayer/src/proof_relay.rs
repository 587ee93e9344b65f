use std::sync::Arc;
use std::time::Duration;

use ethers::providers::Middleware;
use ethers::types::Address;
use eyre::Result;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, info_span, instrument::Instrumented, warn, Instrument};

use relayer_base::db::RelayerDB;
use relayer_base::{CoreMetrics, Settings};
use relayer_ethereum::{get_storage_proof, mapping_key_at, EthProvider};
use relayer_poly::{PolyErrorKind, PolyRpcClient, PolySigner};

/// The reserved storage slot of the ECCD cross-chain transaction index map.
const ECCD_TX_INDEX_SLOT: &str = "01";

/// Replays captured EVM -> poly transfers: fetches storage proofs and
/// imports them on poly, then verifies execution through the check bucket.
pub struct ProofRelay {
    settings: Arc<Settings>,
    provider: Arc<EthProvider>,
    eccd_address: Address,
    poly: Arc<PolyRpcClient>,
    signer: Arc<PolySigner>,
    db: RelayerDB,
    metrics: Arc<CoreMetrics>,
}

impl ProofRelay {
    /// Build the proof relay worker
    pub fn new(
        settings: Arc<Settings>,
        provider: Arc<EthProvider>,
        eccd_address: Address,
        poly: Arc<PolyRpcClient>,
        signer: Arc<PolySigner>,
        db: RelayerDB,
        metrics: Arc<CoreMetrics>,
    ) -> Self {
        Self {
            settings,
            provider,
            eccd_address,
            poly,
            signer,
            db,
            metrics,
        }
    }

    /// Run the retry scanner until cancelled.
    pub fn spawn_retry(self: Arc<Self>) -> Instrumented<JoinHandle<Result<()>>> {
        let span = info_span!("ProofRelay");
        let interval_secs = self.settings.heco_config.monitor_interval.max(1);
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(interval_secs));
            loop {
                ticker.tick().await;
                if let Err(e) = self.handle_retries().await {
                    error!(error = %e, "proof relay tick failed");
                }
            }
        })
        .instrument(span)
    }

    /// Run the check-bucket scanner until cancelled.
    pub fn spawn_check(self: Arc<Self>) -> Instrumented<JoinHandle<Result<()>>> {
        let span = info_span!("CheckDeposit");
        let interval_secs = self.settings.heco_config.monitor_interval.max(1);
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(interval_secs));
            loop {
                ticker.tick().await;
                if let Err(e) = self.handle_checks().await {
                    error!(error = %e, "deposit check tick failed");
                }
            }
        })
        .instrument(span)
    }

    async fn handle_retries(&self) -> Result<()> {
        let side_chain_id = self.settings.heco_config.side_chain_id;
        let lookback = self.settings.heco_config.commit_proof_block_config;

        let latest = self.provider.get_block_number().await?.as_u64();
        // proofs must be taken at a height the poly light client has synced
        let synced = self.poly.synced_side_chain_height(side_chain_id).await?;
        if latest < synced {
            warn!(
                latest,
                synced, "evm node is behind the poly synced height, retrying later"
            );
            return Ok(());
        }

        for (raw, transfer) in self.db.retries() {
            let proof_height = match proof_height(synced, transfer.height, lookback) {
                Some(height) => height,
                None => continue,
            };
            let slot = match mapping_key_at(&transfer.tx_index, ECCD_TX_INDEX_SLOT) {
                Ok(slot) => slot,
                Err(e) => {
                    error!(tx_index = %transfer.tx_index, error = %e, "bad storage key");
                    continue;
                }
            };
            let proof = match get_storage_proof(&self.provider, self.eccd_address, slot, proof_height)
                .await
            {
                Ok(proof) => proof,
                Err(e) => {
                    error!(
                        tx_height = transfer.height,
                        proof_height,
                        error = %e,
                        "failed to fetch storage proof"
                    );
                    continue;
                }
            };

            match self
                .poly
                .import_outer_transfer(
                    &self.signer,
                    side_chain_id,
                    &transfer.value,
                    proof_height as u32,
                    &proof,
                )
                .await
            {
                Err(e) => match e.classify() {
                    PolyErrorKind::UtxoNotEnough => {
                        info!(error = %e, "utxo not ready, keeping retry item");
                    }
                    PolyErrorKind::TxAlreadyDone => {
                        debug!(
                            tx = %hex::encode(&transfer.tx_id),
                            "transfer already on poly, dropping retry item"
                        );
                        if let Err(e) = self.db.delete_retry(&raw) {
                            error!(error = %e, "failed to delete retry entry");
                        }
                    }
                    PolyErrorKind::Other => {
                        error!(
                            tx = %hex::encode(&transfer.tx_id),
                            error = %e,
                            "failed to commit proof to poly"
                        );
                    }
                },
                Ok(tx_hash) => {
                    if let Err(e) = self.db.store_check(&tx_hash, &raw) {
                        error!(error = %e, "failed to store check entry");
                    }
                    if let Err(e) = self.db.delete_retry(&raw) {
                        error!(error = %e, "failed to delete retry entry");
                    }
                    info!(poly_tx = %tx_hash, "committed transfer proof to poly");
                    self.metrics.transaction_relayed("poly");
                }
            }
        }
        Ok(())
    }

    /// Verify parked submissions: a failed execution goes back to retry, and
    /// either way the check entry is dropped once a receipt exists.
    async fn handle_checks(&self) -> Result<()> {
        for (poly_tx_hash, raw) in self.db.checks() {
            let event = match self.poly.get_smart_contract_event(&poly_tx_hash).await {
                Ok(event) => event,
                Err(e) => {
                    error!(poly_tx = %poly_tx_hash, error = %e, "failed to fetch event");
                    continue;
                }
            };
            let event = match event {
                Some(event) => event,
                None => continue,
            };
            if event.state != 1 {
                info!(poly_tx = %poly_tx_hash, "poly execution failed, re-queueing transfer");
                if let Err(e) = self.db.store_retry_raw(&raw) {
                    error!(error = %e, "failed to re-queue transfer");
                }
            }
            if let Err(e) = self.db.delete_check(&poly_tx_hash) {
                error!(error = %e, "failed to delete check entry");
            }
        }
        Ok(())
    }
}

/// Height to prove at, if the item is deep enough below the reference
/// height.
fn proof_height(ref_height: u64, item_height: u64, lookback: u64) -> Option<u64> {
    if ref_height <= item_height + lookback {
        return None;
    }
    Some(ref_height - lookback)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn proof_height_boundary() {
        // item at 100, lookback 21: eligible only once the reference passes 121
        assert_eq!(proof_height(121, 100, 21), None);
        assert_eq!(proof_height(122, 100, 21), Some(101));
        assert_eq!(proof_height(200, 100, 21), Some(179));
        assert_eq!(proof_height(100, 100, 21), None);
    }
}
