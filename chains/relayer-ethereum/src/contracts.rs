//! Bindings for the cross-chain data (ECCD) and cross-chain manager (ECCM)
//! contracts.

#![allow(missing_docs)]
#![allow(clippy::too_many_arguments)]

use ethers::contract::abigen;

abigen!(
    EthCrossChainData,
    "$CARGO_MANIFEST_DIR/abis/EthCrossChainData.json"
);

abigen!(
    EthCrossChainManager,
    "$CARGO_MANIFEST_DIR/abis/EthCrossChainManager.json"
);
