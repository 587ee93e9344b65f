use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, info_span, instrument::Instrumented, Instrument};

use relayer_base::db::RelayerDB;
use relayer_base::CoreMetrics;
use relayer_core::{BridgeTransaction, FeeState};
use relayer_ethereum::EthSenderPool;
use relayer_poly::{BridgeFeeClient, CheckFeeReq, CheckFeeRsp, PayState};

/// Drains the bridge-transactions bucket: annotates fee states, drops unpaid
/// items and submits the single highest-fee item per tick.
pub struct BridgeRelay {
    db: RelayerDB,
    bridge_fee: BridgeFeeClient,
    senders: Arc<EthSenderPool>,
    metrics: Arc<CoreMetrics>,
    interval_secs: u64,
}

impl BridgeRelay {
    /// Build the relay worker
    pub fn new(
        db: RelayerDB,
        bridge_fee: BridgeFeeClient,
        senders: Arc<EthSenderPool>,
        metrics: Arc<CoreMetrics>,
        interval_secs: u64,
    ) -> Self {
        Self {
            db,
            bridge_fee,
            senders,
            metrics,
            interval_secs,
        }
    }

    /// Run the worker until cancelled.
    pub fn spawn(self) -> Instrumented<JoinHandle<Result<()>>> {
        let span = info_span!("BridgeRelay");
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(self.interval_secs.max(1)));
            loop {
                ticker.tick().await;
                if let Err(e) = self.handle_bridge_transactions().await {
                    error!(error = %e, "bridge relay tick failed");
                }
            }
        })
        .instrument(span)
    }

    async fn handle_bridge_transactions(&self) -> Result<()> {
        let mut txs: HashMap<String, BridgeTransaction> =
            self.db.bridge_transactions().into_iter().collect();
        if txs.is_empty() {
            return Ok(());
        }

        let checks: Vec<CheckFeeReq> = txs
            .iter()
            .filter(|(_, tx)| tx.has_pay == FeeState::NoCheck)
            .map(|(key, tx)| CheckFeeReq {
                chain_id: tx.param.from_chain_id,
                hash: key.clone(),
            })
            .collect();
        if !checks.is_empty() {
            match self.bridge_fee.check_fee(&checks).await {
                Ok(responses) => apply_fee_states(&mut txs, &responses),
                Err(e) => error!(error = %e, "bridge fee check failed"),
            }
        }

        let unpaid: Vec<String> = txs
            .iter()
            .filter(|(_, tx)| tx.has_pay == FeeState::NotPay)
            .map(|(key, _)| key.clone())
            .collect();
        for key in unpaid {
            let tx = &txs[&key];
            info!(
                from_chain_id = tx.param.from_chain_id,
                src_tx = %key,
                poly_tx = %tx.poly_tx_hash,
                "proxy fee not paid, dropping item"
            );
            self.db.delete_bridge_transaction(&key)?;
            txs.remove(&key);
        }

        if let Some(key) = select_max_fee(&txs) {
            let sender = self.senders.select().await;
            info!(
                sender = ?sender.address(),
                poly_tx = %txs[&key].poly_tx_hash,
                fee = %txs[&key].fee,
                "submitting highest-fee bridge tx"
            );
            let done = match sender
                .clone()
                .commit_deposit_events_with_header(&txs[&key])
                .await
            {
                Ok(done) => done,
                Err(e) => {
                    error!(error = %e, poly_tx = %txs[&key].poly_tx_hash, "submission failed");
                    false
                }
            };
            if done {
                self.db.delete_bridge_transaction(&key)?;
                txs.remove(&key);
                self.metrics.transaction_relayed("heco");
            }
        }

        // fee annotations must survive restarts
        for (key, tx) in &txs {
            self.db.store_bridge_transaction(key, tx)?;
        }
        Ok(())
    }
}

/// Fold fee service responses into the in-memory work set.
fn apply_fee_states(txs: &mut HashMap<String, BridgeTransaction>, responses: &[CheckFeeRsp]) {
    for response in responses {
        if !response.error.is_empty() {
            error!(hash = %response.hash, error = %response.error, "fee check entry failed");
            continue;
        }
        let tx = match txs.get_mut(&response.hash) {
            Some(tx) => tx,
            None => continue,
        };
        match response.pay_state() {
            PayState::HasPay => {
                info!(chain_id = response.chain_id, hash = %response.hash, "tx has paid its fee");
                tx.has_pay = FeeState::HasPay;
                tx.fee = response.amount.clone();
            }
            PayState::NotPay => {
                info!(chain_id = response.chain_id, hash = %response.hash, "tx has not paid its fee");
                tx.has_pay = FeeState::NotPay;
            }
            PayState::NotPolyProxy => {
                info!(chain_id = response.chain_id, hash = %response.hash, "tx is not a poly proxy transfer");
                tx.has_pay = FeeState::NotPay;
            }
            PayState::Unknown => {
                error!(chain_id = response.chain_id, hash = %response.hash, "fee check returned unknown state");
            }
        }
    }
}

/// Key of the item with the largest parseable fee; later entries win ties.
fn select_max_fee(txs: &HashMap<String, BridgeTransaction>) -> Option<String> {
    let mut best: Option<(String, f64)> = None;
    for (key, tx) in txs {
        let fee = match tx.parsed_fee() {
            Some(fee) => fee,
            None => continue,
        };
        match &best {
            Some((_, max)) if fee < *max => {}
            _ => best = Some((key.clone(), fee)),
        }
    }
    best.map(|(key, _)| key)
}

#[cfg(test)]
mod test {
    use super::*;
    use relayer_core::{MakeTxParam, ToMerkleValue};

    fn tx(seed: u8, state: FeeState, fee: &str) -> (String, BridgeTransaction) {
        let tx = BridgeTransaction {
            param: ToMerkleValue {
                from_chain_id: 2,
                make_tx_param: MakeTxParam {
                    tx_hash: vec![seed; 32],
                    ..Default::default()
                },
                ..Default::default()
            },
            has_pay: state,
            fee: fee.into(),
            ..Default::default()
        };
        (tx.key(), tx)
    }

    #[test]
    fn highest_fee_wins() {
        let txs: HashMap<_, _> = vec![
            tx(1, FeeState::HasPay, "0.5"),
            tx(2, FeeState::HasPay, "2.25"),
            tx(3, FeeState::HasPay, "1.0"),
        ]
        .into_iter()
        .collect();
        assert_eq!(select_max_fee(&txs), Some(tx(2, FeeState::HasPay, "").0));
    }

    #[test]
    fn unparseable_fees_never_win() {
        let txs: HashMap<_, _> = vec![
            tx(1, FeeState::NoCheck, ""),
            tx(2, FeeState::NoCheck, "n/a"),
        ]
        .into_iter()
        .collect();
        assert_eq!(select_max_fee(&txs), None);
    }

    #[test]
    fn fee_states_are_applied() {
        let mut txs: HashMap<_, _> = vec![
            tx(1, FeeState::NoCheck, ""),
            tx(2, FeeState::NoCheck, ""),
            tx(3, FeeState::NoCheck, ""),
            tx(4, FeeState::NoCheck, ""),
        ]
        .into_iter()
        .collect();
        let rsp = |seed: u8, pay_state: i32, amount: &str, error: &str| CheckFeeRsp {
            chain_id: 2,
            hash: hex::encode([seed; 32]),
            pay_state,
            amount: amount.into(),
            error: error.into(),
        };
        apply_fee_states(
            &mut txs,
            &[
                rsp(1, 1, "1.5", ""),
                rsp(2, 0, "", ""),
                rsp(3, -1, "", ""),
                rsp(4, 1, "9.9", "upstream timeout"),
            ],
        );

        let get = |seed: u8| &txs[&hex::encode([seed; 32])];
        assert_eq!(get(1).has_pay, FeeState::HasPay);
        assert_eq!(get(1).fee, "1.5");
        assert_eq!(get(2).has_pay, FeeState::NotPay);
        assert_eq!(get(3).has_pay, FeeState::NotPay);
        // errored entries stay untouched
        assert_eq!(get(4).has_pay, FeeState::NoCheck);
        assert_eq!(get(4).fee, "");
    }
}
