/// Error types for the relayer wire protocol
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// IO error from Read/Write usage
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    /// Hex decoding failure
    #[error(transparent)]
    HexError(#[from] hex::FromHexError),
    /// Consensus payload did not parse as block info JSON
    #[error("invalid consensus payload: {0}")]
    ConsensusPayload(#[from] serde_json::Error),
    /// A peer public key could not be decoded
    #[error("invalid bookkeeper public key")]
    InvalidPublicKey,
    /// An enum discriminant outside its defined range
    #[error("invalid {0} discriminant ({1})")]
    InvalidDiscriminant(&'static str, u8),
}
