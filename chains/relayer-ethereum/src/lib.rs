//! EVM chain client: the cross-chain contract bindings, storage-proof
//! helpers and the nonce-managed sender pool.

#![forbid(unsafe_code)]
#![warn(unused_extern_crates)]

pub mod contracts;
mod proof;
mod sender;
mod tx;

pub use proof::*;
pub use sender::*;
pub use tx::*;

use ethers::providers::{Http, Provider};
use ethers::types::Address;

/// The provider every EVM-side component shares
pub type EthProvider = Provider<Http>;

/// Right-aligned conversion of arbitrary bytes into an address: shorter
/// inputs are left-padded, longer ones keep their trailing 20 bytes.
pub fn bytes_to_address(bytes: &[u8]) -> Address {
    let mut out = [0u8; 20];
    if bytes.len() >= 20 {
        out.copy_from_slice(&bytes[bytes.len() - 20..]);
    } else {
        out[20 - bytes.len()..].copy_from_slice(bytes);
    }
    Address::from(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bytes_to_address_alignment() {
        assert_eq!(bytes_to_address(&[1u8; 20]), Address::from([1u8; 20]));
        assert_eq!(
            bytes_to_address(&[0xab]),
            "0x00000000000000000000000000000000000000ab"
                .parse()
                .unwrap()
        );
        let mut long = vec![0xff; 12];
        long.extend_from_slice(&[2u8; 20]);
        assert_eq!(bytes_to_address(&long), Address::from([2u8; 20]));
    }
}

