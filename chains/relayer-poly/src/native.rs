//! Native contract addresses, storage keys and transaction building for the
//! poly chain.

use ethers::types::H256;
use sha2::{Digest, Sha256};

use relayer_core::traits::{write_str, write_var_bytes, write_var_uint, Encode};

/// The native header-sync contract
pub const HEADER_SYNC_CONTRACT_ADDRESS: [u8; 20] = native_contract(0x04);
/// The native cross-chain manager contract
pub const CROSS_CHAIN_MANAGER_CONTRACT_ADDRESS: [u8; 20] = native_contract(0x05);

/// Header-sync storage: synced main-chain header hashes by height
pub const MAIN_CHAIN: &[u8] = b"mainChain";
/// Header-sync storage: latest synced height per side chain
pub const CURRENT_HEADER_HEIGHT: &[u8] = b"currentHeight";
/// Cross-chain manager storage: completed transfer ids
pub const DONE_TX: &[u8] = b"doneTx";

const fn native_contract(index: u8) -> [u8; 20] {
    let mut address = [0u8; 20];
    address[19] = index;
    address
}

/// Hex form of a native contract address, as `getstorage` wants it
pub fn contract_hex(address: &[u8; 20]) -> String {
    hex::encode(address)
}

/// Storage key of the synced header hash of `height` on `side_chain_id`
pub fn main_chain_key(side_chain_id: u64, height: u64) -> Vec<u8> {
    let mut key = MAIN_CHAIN.to_vec();
    key.extend_from_slice(&side_chain_id.to_le_bytes());
    key.extend_from_slice(&height.to_le_bytes());
    key
}

/// Storage key of the latest synced height of `side_chain_id`
pub fn current_header_height_key(side_chain_id: u64) -> Vec<u8> {
    let mut key = CURRENT_HEADER_HEIGHT.to_vec();
    key.extend_from_slice(&side_chain_id.to_le_bytes());
    key
}

/// Storage key marking a cross-chain id as imported
pub fn done_tx_key(side_chain_id: u64, cross_chain_id: &[u8]) -> Vec<u8> {
    let mut key = DONE_TX.to_vec();
    key.extend_from_slice(&side_chain_id.to_le_bytes());
    key.extend_from_slice(cross_chain_id);
    key
}

/// Argument blob for the header-sync `syncBlockHeader` method
pub fn sync_block_header_args(
    side_chain_id: u64,
    address: &[u8; 20],
    headers: &[Vec<u8>],
) -> Vec<u8> {
    let mut args = vec![];
    side_chain_id.write_to(&mut args).expect("!alloc");
    write_var_bytes(&mut args, address).expect("!alloc");
    write_var_uint(&mut args, headers.len() as u64).expect("!alloc");
    for header in headers {
        write_var_bytes(&mut args, header).expect("!alloc");
    }
    args
}

/// Argument blob for the cross-chain manager `importOuterTransfer` method
pub fn import_outer_transfer_args(
    source_chain_id: u64,
    value: &[u8],
    height: u32,
    proof: &[u8],
    relayer_address: &[u8],
) -> Vec<u8> {
    let mut args = vec![];
    source_chain_id.write_to(&mut args).expect("!alloc");
    write_var_bytes(&mut args, value).expect("!alloc");
    height.write_to(&mut args).expect("!alloc");
    write_var_bytes(&mut args, proof).expect("!alloc");
    write_var_bytes(&mut args, relayer_address).expect("!alloc");
    // no extra header payload for an EVM source chain
    write_var_bytes(&mut args, &[]).expect("!alloc");
    args
}

const TX_VERSION: u8 = 0;
const TX_TYPE_INVOKE_NATIVE: u8 = 0xd1;
const DEFAULT_GAS_LIMIT: u64 = 200_000;

/// An unsigned native contract invocation
#[derive(Debug, Clone)]
pub struct NativeTransaction {
    nonce: u32,
    gas_price: u64,
    gas_limit: u64,
    payer: [u8; 20],
    code: Vec<u8>,
}

impl NativeTransaction {
    /// Build an invocation of `method` on a native contract
    pub fn invoke(contract: [u8; 20], method: &str, args: Vec<u8>, payer: [u8; 20], nonce: u32) -> Self {
        let mut code = vec![];
        write_var_bytes(&mut code, &args).expect("!alloc");
        write_str(&mut code, method).expect("!alloc");
        code.extend_from_slice(&contract);
        Self {
            nonce,
            gas_price: 0,
            gas_limit: DEFAULT_GAS_LIMIT,
            payer,
            code,
        }
    }

    fn unsigned(&self) -> Vec<u8> {
        let mut buf = vec![TX_VERSION, TX_TYPE_INVOKE_NATIVE];
        self.nonce.write_to(&mut buf).expect("!alloc");
        self.gas_price.write_to(&mut buf).expect("!alloc");
        self.gas_limit.write_to(&mut buf).expect("!alloc");
        buf.extend_from_slice(&self.payer);
        write_var_bytes(&mut buf, &self.code).expect("!alloc");
        // attribute count, always zero on poly
        buf.push(0);
        buf
    }

    /// Double-SHA256 of the unsigned serialization; what gets signed.
    pub fn hash(&self) -> H256 {
        let inner = Sha256::digest(self.unsigned());
        H256::from_slice(&Sha256::digest(inner))
    }

    /// Attach a signature
    pub fn into_signed(self, public_key: Vec<u8>, signature: Vec<u8>) -> SignedNativeTransaction {
        SignedNativeTransaction {
            tx: self,
            public_key,
            signature,
        }
    }
}

/// A signed native contract invocation, ready for `sendrawtransaction`
#[derive(Debug, Clone)]
pub struct SignedNativeTransaction {
    tx: NativeTransaction,
    public_key: Vec<u8>,
    signature: Vec<u8>,
}

impl SignedNativeTransaction {
    /// Hex serialization for `sendrawtransaction`
    pub fn to_hex(&self) -> String {
        let mut buf = self.tx.unsigned();
        // one signature block: a single public key, threshold one
        write_var_uint(&mut buf, 1).expect("!alloc");
        write_var_uint(&mut buf, 1).expect("!alloc");
        write_var_bytes(&mut buf, &self.public_key).expect("!alloc");
        write_var_uint(&mut buf, 1).expect("!alloc");
        write_var_uint(&mut buf, 1).expect("!alloc");
        write_var_bytes(&mut buf, &self.signature).expect("!alloc");
        hex::encode(buf)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn storage_keys_embed_little_endian_ids() {
        let key = main_chain_key(128, 0x0102);
        assert!(key.starts_with(MAIN_CHAIN));
        assert_eq!(&key[MAIN_CHAIN.len()..MAIN_CHAIN.len() + 8], &128u64.to_le_bytes());
        assert_eq!(&key[MAIN_CHAIN.len() + 8..], &0x0102u64.to_le_bytes());

        let key = done_tx_key(128, &[0xaa, 0xbb]);
        assert_eq!(&key[DONE_TX.len() + 8..], &[0xaa, 0xbb]);
    }

    #[test]
    fn native_contracts_differ() {
        assert_ne!(
            HEADER_SYNC_CONTRACT_ADDRESS,
            CROSS_CHAIN_MANAGER_CONTRACT_ADDRESS
        );
        assert_eq!(contract_hex(&HEADER_SYNC_CONTRACT_ADDRESS).len(), 40);
    }

    #[test]
    fn tx_hash_commits_to_code() {
        let a = NativeTransaction::invoke([1; 20], "syncBlockHeader", vec![1, 2], [9; 20], 7);
        let mut b = a.clone();
        b.code.push(0);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn signed_tx_roundtrips_to_hex() {
        let tx = NativeTransaction::invoke([1; 20], "importOuterTransfer", vec![3; 10], [9; 20], 7);
        let unsigned_len = tx.unsigned().len();
        let signed = tx.into_signed(vec![2; 33], vec![5; 65]);
        let raw = hex::decode(signed.to_hex()).unwrap();
        assert!(raw.len() > unsigned_len + 33 + 65);
    }
}
