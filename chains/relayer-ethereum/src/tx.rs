use std::time::{Duration, Instant};

use ethers::providers::Middleware;
use ethers::types::{H256, U64};
use tokio::time::sleep;
use tracing::debug;

use crate::EthProvider;

const CONFIRM_CEILING: Duration = Duration::from_secs(300);
const CONFIRM_POLL: Duration = Duration::from_secs(1);

/// Poll a dispatched transaction until it leaves the mempool, then read its
/// receipt. Gives up after five minutes.
pub async fn wait_transaction_confirm(
    provider: &EthProvider,
    poly_tx_hash: &str,
    hash: H256,
) -> bool {
    let start = Instant::now();
    loop {
        if start.elapsed() > CONFIRM_CEILING {
            return false;
        }
        sleep(CONFIRM_POLL).await;

        let tx = match provider.get_transaction(hash).await {
            Ok(Some(tx)) => tx,
            _ => continue,
        };
        let pending = tx.block_number.is_none();
        debug!(tx = ?hash, poly_tx = poly_tx_hash, pending, "polled transaction");
        if pending {
            continue;
        }
        match provider.get_transaction_receipt(hash).await {
            Ok(Some(receipt)) => return receipt.status == Some(U64::one()),
            _ => continue,
        }
    }
}
