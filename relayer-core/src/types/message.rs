use std::io::{Read, Write};

use crate::traits::{read_str, read_var_bytes, write_str, write_var_bytes, Decode, Encode};
use crate::ProtocolError;

/// Contract methods a relayed cross-chain message may invoke. Anything else
/// is dropped at ingestion.
pub const ALLOWED_METHODS: [&str; 8] = [
    "add",
    "remove",
    "swap",
    "unlock",
    "addExtension",
    "removeExtension",
    "registerAsset",
    "onCrossTransfer",
];

/// Whether `method` is in the allowed method set.
pub fn method_allowed(method: &str) -> bool {
    ALLOWED_METHODS.contains(&method)
}

/// The inner cross-chain call description
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MakeTxParam {
    /// Source-chain transaction hash
    pub tx_hash: Vec<u8>,
    /// Globally unique id of the cross-chain message
    pub cross_chain_id: Vec<u8>,
    /// Originating contract
    pub from_contract_address: Vec<u8>,
    /// Destination chain id
    pub to_chain_id: u64,
    /// Destination contract
    pub to_contract_address: Vec<u8>,
    /// Destination method name
    pub method: String,
    /// ABI-encoded call arguments
    pub args: Vec<u8>,
}

impl Encode for MakeTxParam {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: Write,
    {
        let mut written = 0;
        written += write_var_bytes(writer, &self.tx_hash)?;
        written += write_var_bytes(writer, &self.cross_chain_id)?;
        written += write_var_bytes(writer, &self.from_contract_address)?;
        written += self.to_chain_id.write_to(writer)?;
        written += write_var_bytes(writer, &self.to_contract_address)?;
        written += write_str(writer, &self.method)?;
        written += write_var_bytes(writer, &self.args)?;
        Ok(written)
    }
}

impl Decode for MakeTxParam {
    fn read_from<R>(reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: Read,
    {
        Ok(Self {
            tx_hash: read_var_bytes(reader)?,
            cross_chain_id: read_var_bytes(reader)?,
            from_contract_address: read_var_bytes(reader)?,
            to_chain_id: u64::read_from(reader)?,
            to_contract_address: read_var_bytes(reader)?,
            method: read_str(reader)?,
            args: read_var_bytes(reader)?,
        })
    }
}

/// A cross-chain state entry as proven against the poly cross-state root
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToMerkleValue {
    /// Poly-side transaction hash
    pub tx_hash: Vec<u8>,
    /// Chain the message originated from
    pub from_chain_id: u64,
    /// The call description
    pub make_tx_param: MakeTxParam,
}

impl Encode for ToMerkleValue {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: Write,
    {
        let mut written = 0;
        written += write_var_bytes(writer, &self.tx_hash)?;
        written += self.from_chain_id.write_to(writer)?;
        written += self.make_tx_param.write_to(writer)?;
        Ok(written)
    }
}

impl Decode for ToMerkleValue {
    fn read_from<R>(reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: Read,
    {
        Ok(Self {
            tx_hash: read_var_bytes(reader)?,
            from_chain_id: u64::read_from(reader)?,
            make_tx_param: MakeTxParam::read_from(reader)?,
        })
    }
}

/// Extract the proven value from a raw audit path: the leaf is the first
/// varbytes entry, the remaining bytes are the inclusion path nodes.
pub fn parse_audit_path_value(raw: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut reader = raw;
    read_var_bytes(&mut reader)
}

#[cfg(test)]
mod test {
    use super::*;

    pub(crate) fn sample_merkle_value() -> ToMerkleValue {
        ToMerkleValue {
            tx_hash: vec![0xaa; 32],
            from_chain_id: 2,
            make_tx_param: MakeTxParam {
                tx_hash: vec![0xbb; 32],
                cross_chain_id: vec![1, 2, 3, 4],
                from_contract_address: vec![0x11; 20],
                to_chain_id: 128,
                to_contract_address: vec![0x22; 20],
                method: "unlock".into(),
                args: vec![0xcc; 40],
            },
        }
    }

    #[test]
    fn merkle_value_roundtrip() {
        let value = sample_merkle_value();
        let decoded = ToMerkleValue::read_from(&mut value.to_vec().as_slice()).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn audit_path_value_is_first_varbytes() {
        let value = sample_merkle_value().to_vec();
        let mut path = vec![];
        write_var_bytes(&mut path, &value).unwrap();
        // trailing sibling nodes must not disturb the leaf
        path.extend_from_slice(&[0u8; 33]);
        assert_eq!(parse_audit_path_value(&path).unwrap(), value);
    }

    #[test]
    fn method_set() {
        assert!(method_allowed("unlock"));
        assert!(method_allowed("onCrossTransfer"));
        assert!(!method_allowed("mint"));
        assert!(!method_allowed(""));
    }
}
