use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::PolyError;

/// A fee lookup for one queued bridge transaction
#[derive(Debug, Clone, Serialize)]
pub struct CheckFeeReq {
    /// Chain the message originated from
    #[serde(rename = "ChainId")]
    pub chain_id: u64,
    /// Hex source tx hash, the bridge transaction store key
    #[serde(rename = "Hash")]
    pub hash: String,
}

/// Fee service verdict for one transaction
#[derive(Debug, Clone, Deserialize)]
pub struct CheckFeeRsp {
    /// Chain id echoed back
    #[serde(rename = "ChainId", default)]
    pub chain_id: u64,
    /// Hash echoed back
    #[serde(rename = "Hash", default)]
    pub hash: String,
    /// Raw pay state discriminant
    #[serde(rename = "PayState", default)]
    pub pay_state: i32,
    /// Decimal fee amount, set when paid
    #[serde(rename = "Amount", default)]
    pub amount: String,
    /// Per-entry error text, empty on success
    #[serde(rename = "Error", default)]
    pub error: String,
}

/// Decoded pay state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayState {
    /// Fee was paid; amount available
    HasPay,
    /// Fee was not paid
    NotPay,
    /// The message does not go through a poly proxy at all
    NotPolyProxy,
    /// Anything the service may add later
    Unknown,
}

impl CheckFeeRsp {
    /// Decode the raw pay state
    pub fn pay_state(&self) -> PayState {
        match self.pay_state {
            1 => PayState::HasPay,
            0 => PayState::NotPay,
            -1 => PayState::NotPolyProxy,
            _ => PayState::Unknown,
        }
    }
}

/// Client for the bridge fee service
#[derive(Debug, Clone)]
pub struct BridgeFeeClient {
    url: String,
    client: reqwest::Client,
}

impl BridgeFeeClient {
    /// New client against the service base url
    pub fn new(url: &str) -> Self {
        Self {
            url: format!("{}/checkfee", url.trim_end_matches('/')),
            client: reqwest::Client::new(),
        }
    }

    /// Look up fee states for a batch of queued transactions
    pub async fn check_fee(&self, checks: &[CheckFeeReq]) -> Result<Vec<CheckFeeRsp>, PolyError> {
        debug!(count = checks.len(), "querying bridge fee service");
        Ok(self
            .client
            .post(&self.url)
            .json(checks)
            .send()
            .await?
            .json()
            .await?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pay_state_decoding() {
        let rsp = |pay_state| CheckFeeRsp {
            chain_id: 2,
            hash: "ab".into(),
            pay_state,
            amount: String::new(),
            error: String::new(),
        };
        assert_eq!(rsp(1).pay_state(), PayState::HasPay);
        assert_eq!(rsp(0).pay_state(), PayState::NotPay);
        assert_eq!(rsp(-1).pay_state(), PayState::NotPolyProxy);
        assert_eq!(rsp(7).pay_state(), PayState::Unknown);
    }

    #[test]
    fn checkfee_url() {
        assert_eq!(
            BridgeFeeClient::new("http://bridge.example/v1/").url,
            "http://bridge.example/v1/checkfee"
        );
    }
}
