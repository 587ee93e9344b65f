use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ethers::providers::{Middleware, ProviderError};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, Bytes, TransactionRequest, U256};
use eyre::{bail, eyre, Result};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, info_span, warn, Instrument};

use relayer_core::{BridgeTransaction, PolyHeader};

use crate::contracts::{EthCrossChainData, EthCrossChainManager};
use crate::{wait_transaction_confirm, EthProvider};

/// Gas estimates above this are treated as malformed calls and skipped for
/// good.
pub const GAS_LIMIT_CEILING: u64 = 300_000;

/// Refuse to pay for a suspiciously expensive call.
pub fn check_gas_limit(poly_tx_hash: &str, gas_limit: u64) -> Result<()> {
    if gas_limit > GAS_LIMIT_CEILING {
        bail!(
            "skipping poly tx {} for gas limit too high {}",
            poly_tx_hash,
            gas_limit
        );
    }
    Ok(())
}

/// Normalize a raw poly signature into the 65-byte r||s||v form the EVM
/// contracts recover: a missing recovery byte is appended, a 0/1 recovery id
/// is shifted to 27/28.
pub fn convert_to_eth_sig(sig: &[u8]) -> Result<Vec<u8>> {
    let mut out = match sig.len() {
        64 => {
            let mut out = sig.to_vec();
            out.push(0);
            out
        }
        65 => sig.to_vec(),
        n => bail!("unexpected signature length {}", n),
    };
    if out[64] < 27 {
        out[64] += 27;
    }
    Ok(out)
}

/// One job on a submission route
#[derive(Debug, Clone)]
pub struct EthTxInfo {
    tx_data: Bytes,
    gas_limit: U256,
    gas_price: U256,
    contract_addr: Address,
    poly_tx_hash: String,
}

#[derive(Debug, Default)]
struct NonceState {
    next: Option<u64>,
    returned: BinaryHeap<Reverse<u64>>,
}

/// Per-account nonce bookkeeping. The chain is consulted once for the pending
/// nonce; afterwards nonces are handed out locally and may be returned on
/// sign failure.
#[derive(Debug)]
pub struct NonceManager {
    provider: Arc<EthProvider>,
    address: Address,
    state: tokio::sync::Mutex<NonceState>,
}

impl NonceManager {
    /// New manager for `address`
    pub fn new(provider: Arc<EthProvider>, address: Address) -> Self {
        Self {
            provider,
            address,
            state: tokio::sync::Mutex::new(NonceState::default()),
        }
    }

    /// Take the next nonce, preferring returned ones
    pub async fn next_nonce(&self) -> Result<u64, ProviderError> {
        let mut state = self.state.lock().await;
        if let Some(Reverse(nonce)) = state.returned.pop() {
            return Ok(nonce);
        }
        let next = match state.next {
            Some(next) => next,
            None => {
                self.provider
                    .get_transaction_count(self.address, Some(BlockNumber::Pending.into()))
                    .await?
                    .as_u64()
            }
        };
        state.next = Some(next + 1);
        Ok(next)
    }

    /// Hand a nonce back after a failed signing attempt
    pub async fn return_nonce(&self, nonce: u64) {
        self.state.lock().await.returned.push(Reverse(nonce));
    }
}

/// A nonce-managed EVM account with per-route serialized submission.
#[derive(Debug)]
pub struct EthSender {
    wallet: LocalWallet,
    address: Address,
    provider: Arc<EthProvider>,
    chain_id: u64,
    eccd: EthCrossChainData<EthProvider>,
    eccm: EthCrossChainManager<EthProvider>,
    eccm_address: Address,
    nonce_manager: NonceManager,
    routes: Mutex<HashMap<u64, mpsc::Sender<EthTxInfo>>>,
    routine_num: u64,
}

impl EthSender {
    /// Build a sender around an unlocked wallet
    pub fn new(
        wallet: LocalWallet,
        provider: Arc<EthProvider>,
        chain_id: u64,
        eccd_address: Address,
        eccm_address: Address,
        routine_num: u64,
    ) -> Self {
        let address = wallet.address();
        Self {
            wallet: wallet.with_chain_id(chain_id),
            address,
            provider: provider.clone(),
            chain_id,
            eccd: EthCrossChainData::new(eccd_address, provider.clone()),
            eccm: EthCrossChainManager::new(eccm_address, provider.clone()),
            eccm_address,
            nonce_manager: NonceManager::new(provider, address),
            routes: Mutex::new(HashMap::new()),
            routine_num: routine_num.max(1),
        }
    }

    /// The account address
    pub fn address(&self) -> Address {
        self.address
    }

    /// Current account balance
    pub async fn balance(&self) -> Result<U256, ProviderError> {
        self.provider.get_balance(self.address, None).await
    }

    /// Relay a queued bridge transaction through `verifyHeaderAndExecuteTx`.
    ///
    /// `Ok(true)` means the work item is finished with (enqueued, already
    /// relayed, or refused for good) and may be deleted from the store.
    pub async fn commit_deposit_events_with_header(
        self: Arc<Self>,
        bridge_tx: &BridgeTransaction,
    ) -> Result<bool> {
        let raw_sigs = match &bridge_tx.anchor_header {
            Some(anchor) if !bridge_tx.header_proof.is_empty() => &anchor.sig_data,
            _ => &bridge_tx.header.sig_data,
        };
        let mut sigs = vec![];
        for sig in raw_sigs {
            sigs.extend(convert_to_eth_sig(sig)?);
        }

        let param = &bridge_tx.param;
        let mut from_tx = [0u8; 32];
        let len = param.tx_hash.len().min(32);
        from_tx[..len].copy_from_slice(&param.tx_hash[..len]);
        let already = self
            .eccd
            .check_if_from_chain_tx_exist(param.from_chain_id, from_tx)
            .call()
            .await
            .unwrap_or(false);
        if already {
            debug!(
                from_chain_id = param.from_chain_id,
                from_tx = %hex::encode(&param.tx_hash),
                "cross-chain tx already relayed"
            );
            return Ok(true);
        }

        let raw_proof = hex::decode(&bridge_tx.header_proof)?;
        let raw_anchor = bridge_tx
            .anchor_header
            .as_ref()
            .map(PolyHeader::message)
            .unwrap_or_default();
        let tx_data = self
            .eccm
            .verify_header_and_execute_tx(
                bridge_tx.raw_audit_path.clone().into(),
                bridge_tx.header.message().into(),
                raw_proof.into(),
                raw_anchor.into(),
                sigs.into(),
            )
            .calldata()
            .ok_or_else(|| eyre!("failed to encode verifyHeaderAndExecuteTx"))?;

        let gas_price = self.provider.get_gas_price().await?;
        let call: TypedTransaction = TransactionRequest::new()
            .from(self.address)
            .to(self.eccm_address)
            .gas_price(gas_price)
            .data(tx_data.clone())
            .into();
        let estimate = self.provider.estimate_gas(&call, None).await?;
        let gas_limit = estimate.as_u64().saturating_mul(11).div_ceil(10);
        if let Err(e) = check_gas_limit(&bridge_tx.poly_tx_hash, gas_limit) {
            warn!(error = %e, "refusing overpriced call, dropping item");
            return Ok(true);
        }

        Self::enqueue(
            &self,
            EthTxInfo {
                tx_data,
                gas_limit: gas_limit.into(),
                gas_price,
                contract_addr: self.eccm_address,
                poly_tx_hash: bridge_tx.poly_tx_hash.clone(),
            },
        )
        .await?;
        Ok(true)
    }

    /// Commit an epoch transition through `changeBookKeeper`. Submitted
    /// inline; epoch events are rare.
    pub async fn commit_header(&self, header: &PolyHeader, pubk_list: &[u8]) -> Result<bool> {
        let mut sigs = vec![];
        for sig in &header.sig_data {
            sigs.extend(convert_to_eth_sig(sig)?);
        }
        let tx_data = self
            .eccm
            .change_book_keeper(
                header.message().into(),
                pubk_list.to_vec().into(),
                sigs.into(),
            )
            .calldata()
            .ok_or_else(|| eyre!("failed to encode changeBookKeeper"))?;

        let gas_price = self.provider.get_gas_price().await?;
        let mut call = TransactionRequest::new()
            .from(self.address)
            .to(self.eccm_address)
            .gas_price(gas_price)
            .data(tx_data);
        let typed: TypedTransaction = call.clone().into();
        let gas_limit = self.provider.estimate_gas(&typed, None).await?;
        call = call.gas(gas_limit).chain_id(self.chain_id);

        let nonce = self.nonce_manager.next_nonce().await?;
        let typed: TypedTransaction = call.nonce(nonce).into();
        let signature = match self.wallet.sign_transaction(&typed).await {
            Ok(signature) => signature,
            Err(e) => {
                self.nonce_manager.return_nonce(nonce).await;
                bail!("failed to sign changeBookKeeper tx: {}", e);
            }
        };
        let pending = self
            .provider
            .send_raw_transaction(typed.rlp_signed(&signature))
            .await?;
        let tx_hash = pending.tx_hash();

        let confirmed = wait_transaction_confirm(
            &self.provider,
            &format!("header: {}", header.height),
            tx_hash,
        )
        .await;
        if confirmed {
            info!(
                height = header.height,
                tx = ?tx_hash,
                nonce,
                "relayed poly epoch header"
            );
        } else {
            error!(
                height = header.height,
                tx = ?tx_hash,
                nonce,
                "failed to relay poly epoch header"
            );
        }
        Ok(true)
    }

    async fn enqueue(this: &Arc<Self>, job: EthTxInfo) -> Result<()> {
        let route = rand::thread_rng().gen_range(0..this.routine_num);
        let tx = {
            let mut routes = this.routes.lock().expect("route map poisoned");
            routes
                .entry(route)
                .or_insert_with(|| {
                    let (tx, rx) = mpsc::channel(1);
                    this.clone().spawn_route_consumer(route, rx);
                    tx
                })
                .clone()
        };
        tx.send(job).await.map_err(|_| eyre!("route {} consumer gone", route))
    }

    fn spawn_route_consumer(self: Arc<Self>, route: u64, mut rx: mpsc::Receiver<EthTxInfo>) {
        let span = info_span!("route_consumer", sender = ?self.address, route);
        tokio::spawn(
            async move {
                while let Some(job) = rx.recv().await {
                    if let Err(e) = self.send_tx_to_eth(&job).await {
                        error!(
                            error = %e,
                            poly_tx = %job.poly_tx_hash,
                            "failed to send tx to the evm chain"
                        );
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Sign, broadcast and await one job. Exactly one transaction of this
    /// route is in flight at any time.
    async fn send_tx_to_eth(&self, info: &EthTxInfo) -> Result<()> {
        let nonce = self.nonce_manager.next_nonce().await?;
        let typed: TypedTransaction = TransactionRequest::new()
            .from(self.address)
            .to(info.contract_addr)
            .value(0)
            .gas(info.gas_limit)
            .gas_price(info.gas_price)
            .data(info.tx_data.clone())
            .nonce(nonce)
            .chain_id(self.chain_id)
            .into();
        let signature = match self.wallet.sign_transaction(&typed).await {
            Ok(signature) => signature,
            Err(e) => {
                self.nonce_manager.return_nonce(nonce).await;
                bail!("sign raw tx error, returned nonce {}: {}", nonce, e);
            }
        };
        let raw = typed.rlp_signed(&signature);

        let tx_hash = loop {
            match self.provider.send_raw_transaction(raw.clone()).await {
                Ok(pending) => break pending.tx_hash(),
                Err(e) => {
                    error!(error = %e, nonce, "send transaction error, retrying");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        };

        if wait_transaction_confirm(&self.provider, &info.poly_tx_hash, tx_hash).await {
            info!(
                tx = ?tx_hash,
                nonce,
                poly_tx = %info.poly_tx_hash,
                "relayed tx to the evm chain"
            );
        } else {
            error!(
                tx = ?tx_hash,
                nonce,
                poly_tx = %info.poly_tx_hash,
                "relay tx not confirmed"
            );
        }
        Ok(())
    }
}

/// The sender accounts, selected per submission by on-chain balance.
#[derive(Debug)]
pub struct EthSenderPool {
    senders: Vec<Arc<EthSender>>,
}

impl EthSenderPool {
    /// Build one sender per unlocked wallet
    pub fn new(
        wallets: Vec<LocalWallet>,
        provider: Arc<EthProvider>,
        chain_id: u64,
        eccd_address: Address,
        eccm_address: Address,
        routine_num: u64,
    ) -> Result<Self> {
        if wallets.is_empty() {
            bail!("no sender accounts in the keystore");
        }
        let senders = wallets
            .into_iter()
            .map(|wallet| {
                Arc::new(EthSender::new(
                    wallet,
                    provider.clone(),
                    chain_id,
                    eccd_address,
                    eccm_address,
                    routine_num,
                ))
            })
            .collect();
        Ok(Self { senders })
    }

    /// Weighted-random selection by balance: concatenated prefix sums form
    /// intervals and a uniform sample picks the interval it falls in. Balance
    /// fetches are retried forever; the surrounding task is the exit hook.
    pub async fn select(&self) -> Arc<EthSender> {
        let mut prefix_sums = Vec::with_capacity(self.senders.len());
        let mut total = U256::zero();
        for sender in &self.senders {
            let balance = loop {
                match sender.balance().await {
                    Ok(balance) => break balance,
                    Err(e) => {
                        error!(
                            sender = ?sender.address(),
                            error = %e,
                            "failed to fetch sender balance, retrying"
                        );
                        sleep(Duration::from_secs(1)).await;
                    }
                }
            };
            total = total.saturating_add(balance);
            prefix_sums.push(total);
        }
        if total.is_zero() {
            return self.senders[0].clone();
        }
        let bound = total.min(U256::from(u128::MAX)).low_u128();
        let sample = U256::from(rand::thread_rng().gen_range(0..bound));
        for (i, prefix) in prefix_sums.iter().enumerate() {
            if *prefix >= sample {
                return self.senders[i].clone();
            }
        }
        self.senders[0].clone()
    }
}

/// Unlock every keystore file under `key_store_path` with the password
/// configured for its (lowercased) address.
pub fn load_accounts(
    key_store_path: &str,
    passwords: &HashMap<String, String>,
) -> Result<Vec<LocalWallet>> {
    let mut wallets = vec![];
    for entry in fs::read_dir(key_store_path)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let address = keystore_address(&path)?;
        let password = passwords
            .get(&address)
            .ok_or_else(|| eyre!("no password configured for keystore account {}", address))?;
        let wallet = LocalWallet::decrypt_keystore(&path, password)
            .map_err(|e| eyre!("failed to unlock keystore {:?}: {}", path, e))?;
        info!(address = %address, "unlocked sender account");
        wallets.push(wallet);
    }
    Ok(wallets)
}

fn keystore_address(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path)?;
    let json: serde_json::Value = serde_json::from_str(&raw)?;
    let address = json
        .get("address")
        .and_then(|v| v.as_str())
        .ok_or_else(|| eyre!("keystore {:?} has no address field", path))?;
    Ok(format!(
        "0x{}",
        address.trim_start_matches("0x").to_lowercase()
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn gas_guard_boundary() {
        assert!(check_gas_limit("ab", GAS_LIMIT_CEILING).is_ok());
        assert!(check_gas_limit("ab", GAS_LIMIT_CEILING + 1).is_err());
        // the guard sees the already-inflated estimate
        let inflated = (400_000u64 / 11 * 10).saturating_mul(11).div_ceil(10);
        assert!(check_gas_limit("ab", inflated).is_err());
    }

    #[test]
    fn signature_normalization() {
        let sixty_four = vec![7u8; 64];
        let out = convert_to_eth_sig(&sixty_four).unwrap();
        assert_eq!(out.len(), 65);
        assert_eq!(out[64], 27);

        let mut sixty_five = vec![7u8; 65];
        sixty_five[64] = 1;
        assert_eq!(convert_to_eth_sig(&sixty_five).unwrap()[64], 28);

        sixty_five[64] = 28;
        assert_eq!(convert_to_eth_sig(&sixty_five).unwrap()[64], 28);

        assert!(convert_to_eth_sig(&[0u8; 10]).is_err());
    }

    #[tokio::test]
    async fn nonce_manager_prefers_returned() {
        let provider = Arc::new(
            EthProvider::try_from("http://localhost:8545").unwrap(),
        );
        let manager = NonceManager::new(provider, Address::zero());
        // seed without touching the chain
        manager.state.lock().await.next = Some(5);

        assert_eq!(manager.next_nonce().await.unwrap(), 5);
        assert_eq!(manager.next_nonce().await.unwrap(), 6);
        manager.return_nonce(5).await;
        assert_eq!(manager.next_nonce().await.unwrap(), 5);
        assert_eq!(manager.next_nonce().await.unwrap(), 7);
    }
}
