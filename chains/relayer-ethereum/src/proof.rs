use ethers::providers::Middleware;
use ethers::types::{Address, BlockId, H256, U64};
use ethers::utils::keccak256;
use eyre::Result;

use crate::EthProvider;

/// Storage slot of a mapping entry: `keccak256(leftpad32(key) ++
/// leftpad32(slot))`, both positions given as hex strings.
pub fn mapping_key_at(position1: &str, position2: &str) -> Result<H256> {
    let p1 = hex::decode(pad_even(position1))?;
    let p2 = hex::decode(pad_even(position2))?;
    let mut buf = [0u8; 64];
    buf[32 - p1.len().min(32)..32].copy_from_slice(&p1[p1.len().saturating_sub(32)..]);
    buf[64 - p2.len().min(32)..].copy_from_slice(&p2[p2.len().saturating_sub(32)..]);
    Ok(H256::from(keccak256(buf)))
}

fn pad_even(s: &str) -> String {
    if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s.to_owned()
    }
}

/// Fetch an `eth_getProof` storage proof for one slot of `contract` at
/// `height`, serialized back to the JSON bytes the poly side verifies.
pub async fn get_storage_proof(
    provider: &EthProvider,
    contract: Address,
    key: H256,
    height: u64,
) -> Result<Vec<u8>> {
    let proof = provider
        .get_proof(
            contract,
            vec![key],
            Some(BlockId::Number(U64::from(height).into())),
        )
        .await?;
    Ok(serde_json::to_vec(&proof)?)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mapping_key_is_padded_keccak() {
        let key = mapping_key_at("1f4", "01").unwrap();
        let mut expected = [0u8; 64];
        expected[30..32].copy_from_slice(&[0x01, 0xf4]);
        expected[63] = 0x01;
        assert_eq!(key, H256::from(keccak256(expected)));
    }

    #[test]
    fn mapping_key_differs_by_slot() {
        assert_ne!(
            mapping_key_at("01", "01").unwrap(),
            mapping_key_at("01", "02").unwrap()
        );
    }

    #[test]
    fn bad_hex_rejected() {
        assert!(mapping_key_at("zz", "01").is_err());
    }
}
