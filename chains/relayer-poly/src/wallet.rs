use std::path::Path;

use ethers::signers::{LocalWallet, WalletError};
use ethers::types::H256;
use ethers::utils::keccak256;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use tracing::info;

use crate::PolyError;

/// The poly-side relayer account: a keystore-backed secp256k1 key signing
/// native transactions over their double-SHA256 hash.
#[derive(Debug, Clone)]
pub struct PolySigner {
    wallet: LocalWallet,
    address: [u8; 20],
    public_key: Vec<u8>,
}

impl PolySigner {
    /// Decrypt the wallet keystore file
    pub fn from_keystore(path: impl AsRef<Path>, password: &str) -> Result<Self, WalletError> {
        let wallet = LocalWallet::decrypt_keystore(path, password)?;
        let point = wallet.signer().verifying_key().to_encoded_point(false);
        let digest = keccak256(&point.as_bytes()[1..]);
        let mut address = [0u8; 20];
        address.copy_from_slice(&digest[12..]);

        let public_key = wallet
            .signer()
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec();

        info!(address = %hex::encode(address), "unlocked poly wallet");
        Ok(Self {
            wallet,
            address,
            public_key,
        })
    }

    /// The 20-byte account address
    pub fn address(&self) -> [u8; 20] {
        self.address
    }

    /// Compressed SEC1 public key carried in the signature block
    pub fn public_key(&self) -> Vec<u8> {
        self.public_key.clone()
    }

    /// Sign a native transaction hash; 65-byte compact signature
    pub fn sign(&self, hash: H256) -> Result<Vec<u8>, PolyError> {
        let signature = self
            .wallet
            .sign_hash(hash)
            .map_err(|e| PolyError::Signing(e.to_string()))?;
        Ok(signature.to_vec())
    }
}
