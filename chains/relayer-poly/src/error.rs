use relayer_core::ProtocolError;

/// Errors talking to the poly chain
#[derive(Debug, thiserror::Error)]
pub enum PolyError {
    /// HTTP transport failure
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    /// The node answered with an error envelope
    #[error("poly rpc error {code}: {message}")]
    Rpc {
        /// Node error code
        code: i64,
        /// Human-readable node error text
        message: String,
    },
    /// A result payload did not decode
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Signing failure while building a native transaction
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Coarse classification of poly submission errors.
///
/// The node reports these conditions only as human-readable text, so the
/// relayer string-matches; all matches live here and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolyErrorKind {
    /// Node-side utxo shortage; worth retrying next tick
    UtxoNotEnough,
    /// The cross-chain transfer was already imported
    TxAlreadyDone,
    /// Anything else
    Other,
}

impl PolyError {
    /// Classify a submission error by its node-reported text.
    pub fn classify(&self) -> PolyErrorKind {
        let text = match self {
            PolyError::Rpc { message, .. } => message.as_str(),
            _ => return PolyErrorKind::Other,
        };
        if text.contains("current utxo is not enough") {
            PolyErrorKind::UtxoNotEnough
        } else if text.contains("tx already done") {
            PolyErrorKind::TxAlreadyDone
        } else {
            PolyErrorKind::Other
        }
    }

    /// Whether the node text marks a destination-chain fork during header
    /// sync.
    pub fn is_fork(&self) -> bool {
        match self {
            PolyError::Rpc { message, .. } => {
                message.contains("parent header not exist")
                    || message.contains("missing required field")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn rpc(message: &str) -> PolyError {
        PolyError::Rpc {
            code: 42,
            message: message.into(),
        }
    }

    #[test]
    fn classification() {
        assert_eq!(
            rpc("chooseUtxos, current utxo is not enough").classify(),
            PolyErrorKind::UtxoNotEnough
        );
        assert_eq!(
            rpc("VerifyFromEthTx, tx already done").classify(),
            PolyErrorKind::TxAlreadyDone
        );
        assert_eq!(rpc("deadline exceeded").classify(), PolyErrorKind::Other);
        assert_eq!(
            PolyError::Signing("nope".into()).classify(),
            PolyErrorKind::Other
        );
    }

    #[test]
    fn fork_detection() {
        assert!(rpc("SyncBlockHeader, parent header not exist").is_fork());
        assert!(rpc("block decode: missing required field").is_fork());
        assert!(!rpc("tx already done").is_fork());
    }
}
