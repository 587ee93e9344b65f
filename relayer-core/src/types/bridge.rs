use std::io::{Read, Write};

use crate::traits::{read_str, read_var_bytes, write_str, write_var_bytes, Decode, Encode};
use crate::types::{PolyHeader, ToMerkleValue};
use crate::ProtocolError;

/// Fee status of a queued poly -> EVM work item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FeeState {
    /// Fee service not consulted yet
    NoCheck = 0,
    /// Fee paid; `fee` holds the amount
    HasPay = 1,
    /// Fee not paid; the item is dropped
    NotPay = 2,
}

impl Encode for FeeState {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: Write,
    {
        (*self as u8).write_to(writer)
    }
}

impl Decode for FeeState {
    fn read_from<R>(reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: Read,
    {
        match u8::read_from(reader)? {
            0 => Ok(FeeState::NoCheck),
            1 => Ok(FeeState::HasPay),
            2 => Ok(FeeState::NotPay),
            b => Err(ProtocolError::InvalidDiscriminant("FeeState", b)),
        }
    }
}

impl Default for FeeState {
    fn default() -> Self {
        FeeState::NoCheck
    }
}

/// A poly -> EVM work item: everything needed to call
/// `verifyHeaderAndExecuteTx` on the destination chain.
///
/// The `(header_proof, anchor_header)` pair is present only when the proven
/// header is not in the current epoch and must itself be proven against an
/// anchor; a single presence byte gates both fields on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeTransaction {
    /// Header whose cross-state root covers the message
    pub header: PolyHeader,
    /// The proven cross-chain payload
    pub param: ToMerkleValue,
    /// Hex merkle proof of `header` against the anchor, empty when current
    pub header_proof: String,
    /// Anchor header carrying the signatures to verify against
    pub anchor_header: Option<PolyHeader>,
    /// Hex hash of the poly transaction that emitted the event
    pub poly_tx_hash: String,
    /// Raw audit path proving `param`
    pub raw_audit_path: Vec<u8>,
    /// Fee status
    pub has_pay: FeeState,
    /// Decimal fee amount reported by the fee service
    pub fee: String,
}

impl BridgeTransaction {
    /// Store key: hex of the source-chain tx hash inside the payload.
    pub fn key(&self) -> String {
        hex::encode(&self.param.make_tx_param.tx_hash)
    }

    /// Fee as a float, if the fee service reported a parseable amount.
    pub fn parsed_fee(&self) -> Option<f64> {
        self.fee.parse().ok()
    }
}

impl Encode for BridgeTransaction {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: Write,
    {
        let mut written = 0;
        written += self.header.write_to(writer)?;
        written += self.param.write_to(writer)?;
        match &self.anchor_header {
            Some(anchor) if !self.header_proof.is_empty() => {
                written += 1u8.write_to(writer)?;
                written += write_str(writer, &self.header_proof)?;
                written += anchor.write_to(writer)?;
            }
            _ => {
                written += 0u8.write_to(writer)?;
            }
        }
        written += write_str(writer, &self.poly_tx_hash)?;
        written += write_var_bytes(writer, &self.raw_audit_path)?;
        written += self.has_pay.write_to(writer)?;
        written += write_str(writer, &self.fee)?;
        Ok(written)
    }
}

impl Decode for BridgeTransaction {
    fn read_from<R>(reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: Read,
    {
        let header = PolyHeader::read_from(reader)?;
        let param = ToMerkleValue::read_from(reader)?;
        let (header_proof, anchor_header) = match u8::read_from(reader)? {
            0 => (String::new(), None),
            1 => (read_str(reader)?, Some(PolyHeader::read_from(reader)?)),
            b => return Err(ProtocolError::InvalidDiscriminant("anchor presence", b)),
        };
        Ok(Self {
            header,
            param,
            header_proof,
            anchor_header,
            poly_tx_hash: read_str(reader)?,
            raw_audit_path: read_var_bytes(reader)?,
            has_pay: FeeState::read_from(reader)?,
            fee: read_str(reader)?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::MakeTxParam;

    fn sample(anchored: bool) -> BridgeTransaction {
        BridgeTransaction {
            header: PolyHeader {
                height: 100,
                consensus_payload: b"{}".to_vec(),
                sig_data: vec![vec![5u8; 65]],
                ..Default::default()
            },
            param: ToMerkleValue {
                tx_hash: vec![0xaa; 32],
                from_chain_id: 2,
                make_tx_param: MakeTxParam {
                    tx_hash: vec![0xbb; 32],
                    method: "unlock".into(),
                    to_chain_id: 128,
                    ..Default::default()
                },
            },
            header_proof: if anchored { "deadbeef".into() } else { String::new() },
            anchor_header: anchored.then(|| PolyHeader {
                height: 102,
                ..Default::default()
            }),
            poly_tx_hash: "ab".repeat(32),
            raw_audit_path: vec![0xcd; 60],
            has_pay: FeeState::NoCheck,
            fee: String::new(),
        }
    }

    #[test]
    fn roundtrip_without_anchor() {
        let bt = sample(false);
        let decoded = BridgeTransaction::read_from(&mut bt.to_vec().as_slice()).unwrap();
        assert_eq!(bt, decoded);
    }

    #[test]
    fn roundtrip_with_anchor() {
        let mut bt = sample(true);
        bt.has_pay = FeeState::HasPay;
        bt.fee = "1.5".into();
        let decoded = BridgeTransaction::read_from(&mut bt.to_vec().as_slice()).unwrap();
        assert_eq!(bt, decoded);
        assert_eq!(decoded.parsed_fee(), Some(1.5));
    }

    #[test]
    fn anchor_without_proof_is_elided() {
        let mut bt = sample(true);
        bt.header_proof = String::new();
        let decoded = BridgeTransaction::read_from(&mut bt.to_vec().as_slice()).unwrap();
        assert!(decoded.anchor_header.is_none());
        assert!(decoded.header_proof.is_empty());
    }

    #[test]
    fn key_is_source_tx_hash_hex() {
        assert_eq!(sample(false).key(), "bb".repeat(32));
    }

    #[test]
    fn bad_discriminant_rejected() {
        let mut raw = sample(false).to_vec();
        // locate the presence byte right after header + param
        let offset = sample(false).header.to_vec().len() + sample(false).param.to_vec().len();
        raw[offset] = 9;
        assert!(BridgeTransaction::read_from(&mut raw.as_slice()).is_err());
    }
}
