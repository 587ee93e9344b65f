//! Settings and configuration for the relayer.
//!
//! Everything is read from the JSON file handed over on the command line
//! (`--cliconfig`), with `RELAYER_`-prefixed environment variables layered on
//! top. The key casing mirrors the deployed config files (`PolyConfig`,
//! `RestURL`, ...).

use std::collections::HashMap;

use config::{Config, Environment, File, FileFormat};
use ethers::types::Address;
use ethers::utils::to_checksum;
use eyre::{eyre, WrapErr};
use serde::Deserialize;

mod trace;
pub use trace::*;

/// Poly-side tick interval
pub const POLY_MONITOR_INTERVAL_SECS: u64 = 1;
/// Poly blocks held back from the scan tip
pub const POLY_USEFUL_BLOCK_NUM: u32 = 1;
/// Heights handled per poly tick before the cursor is flushed
pub const POLY_BATCH_PER_TICK: u32 = 1000;

/// Top-level service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Settings {
    /// Poly chain connection and wallet
    pub poly_config: PolyConfig,
    /// EVM chain connection, contracts and accounts
    pub heco_config: HecoConfig,
    /// Bridge fee service URLs; `[0][0]` is used
    pub bridge_url: Vec<Vec<String>>,
    /// Path of the persistent store
    #[serde(default)]
    pub bolt_db_path: String,
    /// Submission routes per sender account
    pub routine_num: u64,
    /// Optional per-contract inbound/outbound chain-id allow lists
    #[serde(default)]
    pub target_contracts: TargetContracts,
}

/// Poly chain configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolyConfig {
    /// JSON-RPC endpoint
    #[serde(rename = "RestURL")]
    pub rest_url: String,
    /// Contract whose `makeProof` notifications are relayed
    pub entrance_contract_address: String,
    /// Keystore file of the poly signer
    pub wallet_file: String,
    /// Password for the keystore file
    pub wallet_pwd: String,
}

/// EVM chain configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HecoConfig {
    /// Side chain id registered on poly
    pub side_chain_id: u64,
    /// JSON-RPC endpoint
    #[serde(rename = "RestURL")]
    pub rest_url: String,
    /// Cross-chain manager contract
    #[serde(rename = "ECCMContractAddress")]
    pub eccm_contract_address: String,
    /// Cross-chain data contract
    #[serde(rename = "ECCDContractAddress")]
    pub eccd_contract_address: String,
    /// Directory of sender keystore files
    pub key_store_path: String,
    /// Keystore passwords, keyed by lowercased address
    #[serde(default)]
    pub key_store_pwd_set: HashMap<String, String>,
    /// Confirmations before a block is scanned
    pub block_config: u64,
    /// Proof-lookback depth, at least 21 on this chain
    pub commit_proof_block_config: u64,
    /// Header batch size for poly sync
    pub headers_per_batch: usize,
    /// Tick interval in seconds
    pub monitor_interval: u64,
    /// Whether epoch transitions are committed to the EVM side
    #[serde(default)]
    pub enable_change_book_keeper: bool,
    /// Addresses whose outbound events are ignored
    #[serde(default)]
    pub skipped_senders: Vec<String>,
}

/// Per-contract `{"inbound"|"outbound" -> [chainId]}` filters. An empty
/// filter list allows everything; an empty direction list allows every chain.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct TargetContracts(pub Vec<HashMap<String, HashMap<String, Vec<u64>>>>);

impl TargetContracts {
    fn is_target(&self, direction: &str, contract: &Address, chain_id: u64) -> bool {
        if self.0.is_empty() {
            return true;
        }
        let contract = to_checksum(contract, None);
        for entry in &self.0 {
            if let Some(directions) = entry.get(&contract) {
                let ids = directions.get(direction).map(Vec::as_slice).unwrap_or(&[]);
                if ids.is_empty() || ids.contains(&chain_id) {
                    return true;
                }
            }
        }
        false
    }

    /// Whether a poly -> EVM message to `contract` from `from_chain_id` passes
    pub fn is_inbound_target(&self, contract: &Address, from_chain_id: u64) -> bool {
        self.is_target("inbound", contract, from_chain_id)
    }

    /// Whether an EVM -> poly message via `contract` to `to_chain_id` passes
    pub fn is_outbound_target(&self, contract: &Address, to_chain_id: u64) -> bool {
        self.is_target("outbound", contract, to_chain_id)
    }
}

impl Settings {
    /// Read settings from the config file, then the environment
    pub fn load(path: &str) -> eyre::Result<Self> {
        let mut settings: Settings = Config::builder()
            .add_source(File::new(path, FileFormat::Json))
            .add_source(Environment::with_prefix("RELAYER"))
            .build()
            .wrap_err_with(|| format!("failed to read config file {}", path))?
            .try_deserialize()
            .wrap_err("malformed service config")?;

        settings.heco_config.key_store_pwd_set = settings
            .heco_config
            .key_store_pwd_set
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();

        if settings.bolt_db_path.is_empty() {
            settings.bolt_db_path = "boltdb".to_owned();
        }
        if settings.heco_config.commit_proof_block_config < 21 {
            return Err(eyre!(
                "CommitProofBlockConfig must be at least 21, got {}",
                settings.heco_config.commit_proof_block_config
            ));
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn filters(contract: &str, direction: &str, ids: Vec<u64>) -> TargetContracts {
        let mut directions = HashMap::new();
        directions.insert(direction.to_owned(), ids);
        let mut entry = HashMap::new();
        entry.insert(contract.to_owned(), directions);
        TargetContracts(vec![entry])
    }

    #[test]
    fn empty_filter_allows_all() {
        let tc = TargetContracts::default();
        assert!(tc.is_inbound_target(&Address::zero(), 1));
        assert!(tc.is_outbound_target(&Address::zero(), 9));
    }

    #[test]
    fn listed_contract_with_empty_direction_allows_all_chains() {
        let addr = Address::repeat_byte(0x11);
        let tc = filters(&to_checksum(&addr, None), "inbound", vec![]);
        assert!(tc.is_inbound_target(&addr, 42));
        // outbound direction missing entirely also allows everything
        assert!(tc.is_outbound_target(&addr, 42));
    }

    #[test]
    fn listed_contract_restricts_chain_ids() {
        let addr = Address::repeat_byte(0x22);
        let tc = filters(&to_checksum(&addr, None), "inbound", vec![2, 8]);
        assert!(tc.is_inbound_target(&addr, 2));
        assert!(!tc.is_inbound_target(&addr, 3));
    }

    #[test]
    fn unlisted_contract_is_rejected() {
        let listed = Address::repeat_byte(0x33);
        let tc = filters(&to_checksum(&listed, None), "outbound", vec![]);
        assert!(!tc.is_outbound_target(&Address::repeat_byte(0x44), 2));
    }
}
