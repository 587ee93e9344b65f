use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use relayer_core::{Decode, PolyHeader};

use crate::native::{
    self, CROSS_CHAIN_MANAGER_CONTRACT_ADDRESS, HEADER_SYNC_CONTRACT_ADDRESS, NativeTransaction,
};
use crate::{PolyError, PolySigner};

type Result<T> = std::result::Result<T, PolyError>;

/// JSON-RPC client for a poly node
#[derive(Debug, Clone)]
pub struct PolyRpcClient {
    url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    error: i64,
    #[serde(default)]
    desc: String,
    #[serde(default)]
    result: Value,
}

/// A notification entry of a smart contract event
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyEntry {
    /// Contract that emitted the notification
    #[serde(rename = "ContractAddress", default)]
    pub contract_address: String,
    /// Notification payload; an array for `makeProof` events
    #[serde(rename = "States", default)]
    pub states: Value,
}

/// A smart contract event as returned by the node
#[derive(Debug, Clone, Deserialize)]
pub struct SmartContractEvent {
    /// Hash of the poly transaction
    #[serde(rename = "TxHash", default)]
    pub tx_hash: String,
    /// Execution state; 1 is success
    #[serde(rename = "State", default)]
    pub state: u8,
    /// Notifications raised during execution
    #[serde(rename = "Notify", default)]
    pub notify: Vec<NotifyEntry>,
}

/// An audit path response (`getmerkleproof` / `getcrossstatesproof`)
#[derive(Debug, Clone, Deserialize)]
pub struct MerkleProof {
    /// Hex-encoded audit path
    #[serde(rename = "AuditPath", default)]
    pub audit_path: String,
}

impl PolyRpcClient {
    /// New client against `url`
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            client: reqwest::Client::new(),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        debug!(method, "poly rpc call");
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });
        let rsp: RpcResponse = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        if rsp.error != 0 {
            return Err(PolyError::Rpc {
                code: rsp.error,
                message: rsp.desc,
            });
        }
        Ok(rsp.result)
    }

    /// Height of the latest poly block
    pub async fn get_current_block_height(&self) -> Result<u32> {
        let count = self.call("getblockcount", json!([])).await?;
        Ok(count.as_u64().unwrap_or(0).saturating_sub(1) as u32)
    }

    /// Fetch and decode the header at `height`
    pub async fn get_header_by_height(&self, height: u32) -> Result<PolyHeader> {
        let raw = self.call("getheader", json!([height])).await?;
        let bytes = hex::decode(raw.as_str().unwrap_or_default()).map_err(|e| {
            PolyError::Protocol(e.into())
        })?;
        Ok(PolyHeader::read_from(&mut bytes.as_slice())?)
    }

    /// All smart contract events of the block at `height`
    pub async fn get_smart_contract_event_by_block(
        &self,
        height: u32,
    ) -> Result<Vec<SmartContractEvent>> {
        let result = self.call("getsmartcodeevent", json!([height])).await?;
        if result.is_null() {
            return Ok(vec![]);
        }
        Ok(serde_json::from_value(result).map_err(relayer_core::ProtocolError::from)?)
    }

    /// The smart contract event of a single transaction, if executed
    pub async fn get_smart_contract_event(
        &self,
        tx_hash: &str,
    ) -> Result<Option<SmartContractEvent>> {
        let result = self.call("getsmartcodeevent", json!([tx_hash])).await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(
            serde_json::from_value(result).map_err(relayer_core::ProtocolError::from)?,
        ))
    }

    /// Merkle proof of the block at `height` against the root at `root_height`
    pub async fn get_merkle_proof(&self, height: u32, root_height: u32) -> Result<MerkleProof> {
        let result = self
            .call("getmerkleproof", json!([height, root_height]))
            .await?;
        Ok(serde_json::from_value(result).map_err(relayer_core::ProtocolError::from)?)
    }

    /// Cross-state inclusion proof for `key` against the cross-state root at
    /// `height`
    pub async fn get_cross_states_proof(&self, height: u32, key: &str) -> Result<MerkleProof> {
        let result = self
            .call("getcrossstatesproof", json!([height, key]))
            .await?;
        Ok(serde_json::from_value(result).map_err(relayer_core::ProtocolError::from)?)
    }

    /// Raw storage of a native contract; empty when the key is unset
    pub async fn get_storage(&self, contract: &str, key: &[u8]) -> Result<Vec<u8>> {
        let result = self
            .call("getstorage", json!([contract, hex::encode(key)]))
            .await?;
        match result.as_str() {
            None | Some("") => Ok(vec![]),
            Some(raw) => Ok(hex::decode(raw).map_err(relayer_core::ProtocolError::from)?),
        }
    }

    /// Block height a transaction landed at; zero while unconfirmed
    pub async fn get_block_height_by_tx_hash(&self, tx_hash: &str) -> Result<u32> {
        let result = self.call("getblockheightbytxhash", json!([tx_hash])).await?;
        Ok(result.as_u64().unwrap_or(0) as u32)
    }

    /// Broadcast a raw transaction, returning its hash
    pub async fn send_raw_transaction(&self, raw_hex: &str) -> Result<String> {
        let result = self.call("sendrawtransaction", json!([raw_hex])).await?;
        Ok(result.as_str().unwrap_or_default().to_owned())
    }

    /// The latest height of `side_chain_id` synced into the header-sync
    /// contract; zero when the genesis header was never registered
    pub async fn synced_side_chain_height(&self, side_chain_id: u64) -> Result<u64> {
        let raw = self
            .get_storage(
                &native::contract_hex(&HEADER_SYNC_CONTRACT_ADDRESS),
                &native::current_header_height_key(side_chain_id),
            )
            .await?;
        if raw.len() < 8 {
            return Ok(0);
        }
        Ok(u64::from_le_bytes(raw[..8].try_into().expect("checked len")))
    }

    /// The side-chain header hash recorded at `height`, empty when unknown
    pub async fn synced_header_hash(&self, side_chain_id: u64, height: u64) -> Result<Vec<u8>> {
        self.get_storage(
            &native::contract_hex(&HEADER_SYNC_CONTRACT_ADDRESS),
            &native::main_chain_key(side_chain_id, height),
        )
        .await
    }

    /// Whether a cross-chain id was already imported
    pub async fn transfer_done(&self, side_chain_id: u64, cross_chain_id: &[u8]) -> Result<bool> {
        let raw = self
            .get_storage(
                &native::contract_hex(&CROSS_CHAIN_MANAGER_CONTRACT_ADDRESS),
                &native::done_tx_key(side_chain_id, cross_chain_id),
            )
            .await?;
        Ok(!raw.is_empty())
    }

    /// Submit a batch of side-chain headers to the header-sync contract
    #[instrument(err, skip(self, signer, headers), fields(batch = headers.len()))]
    pub async fn sync_block_header(
        &self,
        signer: &PolySigner,
        side_chain_id: u64,
        headers: &[Vec<u8>],
    ) -> Result<String> {
        let args = native::sync_block_header_args(side_chain_id, &signer.address(), headers);
        self.invoke_native(signer, HEADER_SYNC_CONTRACT_ADDRESS, "syncBlockHeader", args)
            .await
    }

    /// Import a proven cross-chain transfer into the cross-chain manager
    #[instrument(err, skip(self, signer, value, proof), fields(height = height))]
    pub async fn import_outer_transfer(
        &self,
        signer: &PolySigner,
        side_chain_id: u64,
        value: &[u8],
        height: u32,
        proof: &[u8],
    ) -> Result<String> {
        let args = native::import_outer_transfer_args(
            side_chain_id,
            value,
            height,
            proof,
            &signer.address(),
        );
        self.invoke_native(
            signer,
            CROSS_CHAIN_MANAGER_CONTRACT_ADDRESS,
            "importOuterTransfer",
            args,
        )
        .await
    }

    async fn invoke_native(
        &self,
        signer: &PolySigner,
        contract: [u8; 20],
        method: &str,
        args: Vec<u8>,
    ) -> Result<String> {
        let tx = NativeTransaction::invoke(contract, method, args, signer.address(), rand::random());
        let signature = signer.sign(tx.hash())?;
        let signed = tx.into_signed(signer.public_key(), signature);
        self.send_raw_transaction(&signed.to_hex()).await
    }
}
