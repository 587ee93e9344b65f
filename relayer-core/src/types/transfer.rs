use std::io::{Read, Write};

use crate::traits::{read_str, read_var_bytes, write_str, write_var_bytes, Decode, Encode};
use crate::ProtocolError;

/// An EVM -> poly work item captured from a `CrossChainEvent` log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrossTransfer {
    /// Hex of the big-endian magnitude of the contract-emitted tx index;
    /// feeds the storage-slot derivation for `eth_getProof`
    pub tx_index: String,
    /// Hash of the EVM transaction that emitted the event
    pub tx_id: Vec<u8>,
    /// Raw event payload (the serialized call description)
    pub value: Vec<u8>,
    /// Destination chain id
    pub to_chain: u32,
    /// Block the event was emitted at
    pub height: u64,
}

impl Encode for CrossTransfer {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: Write,
    {
        let mut written = 0;
        written += write_str(writer, &self.tx_index)?;
        written += write_var_bytes(writer, &self.tx_id)?;
        written += write_var_bytes(writer, &self.value)?;
        written += self.to_chain.write_to(writer)?;
        written += self.height.write_to(writer)?;
        Ok(written)
    }
}

impl Decode for CrossTransfer {
    fn read_from<R>(reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: Read,
    {
        Ok(Self {
            tx_index: read_str(reader)?,
            tx_id: read_var_bytes(reader)?,
            value: read_var_bytes(reader)?,
            to_chain: u32::read_from(reader)?,
            height: u64::read_from(reader)?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip() {
        let ct = CrossTransfer {
            tx_index: "1f4".into(),
            tx_id: vec![0xab; 32],
            value: vec![1, 2, 3, 4, 5],
            to_chain: 7,
            height: 1_234_567,
        };
        let decoded = CrossTransfer::read_from(&mut ct.to_vec().as_slice()).unwrap();
        assert_eq!(ct, decoded);
    }

    #[test]
    fn truncated_rejected() {
        let ct = CrossTransfer {
            tx_index: "1".into(),
            height: 10,
            ..Default::default()
        };
        let mut raw = ct.to_vec();
        raw.truncate(raw.len() - 1);
        assert!(CrossTransfer::read_from(&mut raw.as_slice()).is_err());
    }
}
