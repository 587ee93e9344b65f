use std::io::{Read, Write};

use ethers::types::H256;
use ethers::utils::keccak256;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::traits::{
    read_address, read_var_bytes, read_var_uint, write_address, write_var_bytes, write_var_uint,
    Decode, Encode,
};
use crate::ProtocolError;

/// The empty-address sentinel: a header whose `next_bookkeeper` equals this
/// carries no validator-set transition.
pub const ADDRESS_EMPTY: [u8; 20] = [0u8; 20];

/// A signed poly block header.
///
/// The unsigned prefix (everything through `next_bookkeeper`) is what the
/// on-chain light client verifies; `message()` returns exactly those bytes and
/// `hash()` is their double-SHA256.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct PolyHeader {
    pub version: u32,
    pub chain_id: u64,
    pub prev_block_hash: H256,
    pub transactions_root: H256,
    pub cross_state_root: H256,
    pub block_root: H256,
    pub timestamp: u32,
    pub height: u32,
    pub consensus_data: u64,
    /// Opaque consensus payload, JSON block info for vbft headers
    pub consensus_payload: Vec<u8>,
    /// Address of the incoming bookkeeper set, all-zero when unchanged
    pub next_bookkeeper: [u8; 20],
    /// Serialized public keys of the signing bookkeepers
    pub bookkeepers: Vec<Vec<u8>>,
    /// Raw signatures over `hash()`, one per bookkeeper
    pub sig_data: Vec<Vec<u8>>,
}

impl PolyHeader {
    /// The canonical unsigned serialization submitted alongside proofs.
    pub fn message(&self) -> Vec<u8> {
        let mut buf = vec![];
        self.write_unsigned(&mut buf).expect("!alloc");
        buf
    }

    /// Double-SHA256 of the unsigned serialization.
    pub fn hash(&self) -> H256 {
        let inner = Sha256::digest(self.message());
        H256::from_slice(&Sha256::digest(inner))
    }

    /// Decode the consensus payload as block info.
    pub fn block_info(&self) -> Result<VbftBlockInfo, ProtocolError> {
        Ok(serde_json::from_slice(&self.consensus_payload)?)
    }

    fn write_unsigned<W: Write>(&self, writer: &mut W) -> std::io::Result<usize> {
        let mut written = 0;
        written += self.version.write_to(writer)?;
        written += self.chain_id.write_to(writer)?;
        written += self.prev_block_hash.write_to(writer)?;
        written += self.transactions_root.write_to(writer)?;
        written += self.cross_state_root.write_to(writer)?;
        written += self.block_root.write_to(writer)?;
        written += self.timestamp.write_to(writer)?;
        written += self.height.write_to(writer)?;
        written += self.consensus_data.write_to(writer)?;
        written += write_var_bytes(writer, &self.consensus_payload)?;
        written += write_address(writer, &self.next_bookkeeper)?;
        Ok(written)
    }
}

impl Encode for PolyHeader {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: Write,
    {
        let mut written = self.write_unsigned(writer)?;
        written += write_var_uint(writer, self.bookkeepers.len() as u64)?;
        for bookkeeper in &self.bookkeepers {
            written += write_var_bytes(writer, bookkeeper)?;
        }
        written += write_var_uint(writer, self.sig_data.len() as u64)?;
        for sig in &self.sig_data {
            written += write_var_bytes(writer, sig)?;
        }
        Ok(written)
    }
}

impl Decode for PolyHeader {
    fn read_from<R>(reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: Read,
    {
        let version = u32::read_from(reader)?;
        let chain_id = u64::read_from(reader)?;
        let prev_block_hash = H256::read_from(reader)?;
        let transactions_root = H256::read_from(reader)?;
        let cross_state_root = H256::read_from(reader)?;
        let block_root = H256::read_from(reader)?;
        let timestamp = u32::read_from(reader)?;
        let height = u32::read_from(reader)?;
        let consensus_data = u64::read_from(reader)?;
        let consensus_payload = read_var_bytes(reader)?;
        let next_bookkeeper = read_address(reader)?;

        let n = read_var_uint(reader)?;
        let mut bookkeepers = Vec::with_capacity(n as usize);
        for _ in 0..n {
            bookkeepers.push(read_var_bytes(reader)?);
        }
        let n = read_var_uint(reader)?;
        let mut sig_data = Vec::with_capacity(n as usize);
        for _ in 0..n {
            sig_data.push(read_var_bytes(reader)?);
        }

        Ok(Self {
            version,
            chain_id,
            prev_block_hash,
            transactions_root,
            cross_state_root,
            block_root,
            timestamp,
            height,
            consensus_data,
            consensus_payload,
            next_bookkeeper,
            bookkeepers,
            sig_data,
        })
    }
}

/// Block info carried in the consensus payload
#[derive(Debug, Clone, Deserialize)]
pub struct VbftBlockInfo {
    /// Present only on epoch-transition headers
    #[serde(rename = "new_chain_config")]
    pub new_chain_config: Option<ChainConfig>,
}

/// The incoming validator set
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Peers of the incoming set
    #[serde(rename = "peers")]
    pub peers: Vec<PeerConfig>,
}

/// A single peer of the incoming validator set
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    /// Consensus index of the peer
    #[serde(rename = "index")]
    pub index: u32,
    /// Hex-encoded compressed public key (optionally with the 2-byte
    /// ontology curve prefix)
    #[serde(rename = "id")]
    pub id: String,
}

/// The sorted validator set derived from a `new_chain_config`.
#[derive(Debug, Clone)]
pub struct KeeperSet {
    /// Uncompressed SEC1 points (65 bytes each), sorted by their compressed
    /// encoding
    keys: Vec<[u8; 65]>,
}

impl KeeperSet {
    /// Build from the peers of a chain config.
    pub fn from_peers(peers: &[PeerConfig]) -> Result<Self, ProtocolError> {
        let mut compressed: Vec<[u8; 33]> = Vec::with_capacity(peers.len());
        for peer in peers {
            let raw = hex::decode(&peer.id)?;
            let sec1 = match raw.len() {
                // ontology-serialized keys lead with a 2-byte curve label
                35 => &raw[2..],
                33 => &raw[..],
                _ => return Err(ProtocolError::InvalidPublicKey),
            };
            compressed.push(sec1.try_into().map_err(|_| ProtocolError::InvalidPublicKey)?);
        }
        compressed.sort();

        let mut keys = Vec::with_capacity(compressed.len());
        for sec1 in &compressed {
            let key = k256::PublicKey::from_sec1_bytes(sec1)
                .map_err(|_| ProtocolError::InvalidPublicKey)?;
            let point = key.to_encoded_point(false);
            keys.push(
                point
                    .as_bytes()
                    .try_into()
                    .map_err(|_| ProtocolError::InvalidPublicKey)?,
            );
        }
        Ok(Self { keys })
    }

    /// Flat concatenation of the uncompressed keys, each without its leading
    /// `0x04` byte. This is the `pubkList` argument of `changeBookKeeper`.
    pub fn public_keys(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.keys.len() * 64);
        for key in &self.keys {
            out.extend_from_slice(&key[1..]);
        }
        out
    }

    /// Canonical wire form recorded by ECCD: `varuint(n)` followed by one
    /// varbytes per keeper holding the trailing 20 bytes of
    /// `keccak256(uncompressed_key[1..])`.
    pub fn wire_form(&self) -> Vec<u8> {
        let mut out = vec![];
        write_var_uint(&mut out, self.keys.len() as u64).expect("!alloc");
        for key in &self.keys {
            let digest = keccak256(&key[1..]);
            write_var_bytes(&mut out, &digest[12..]).expect("!alloc");
        }
        out
    }
}

/// Decide whether `header` carries a validator-set transition that ECCD does
/// not know about yet.
///
/// Returns `None` when the header carries no transition or when the derived
/// keeper set matches `cur_epoch_keepers` (the raw ECCD
/// `getCurEpochConPubKeyBytes` value). Otherwise returns the `pubkList` bytes
/// for `changeBookKeeper`.
pub fn epoch_change(
    header: &PolyHeader,
    cur_epoch_keepers: &[u8],
) -> Result<Option<Vec<u8>>, ProtocolError> {
    if header.next_bookkeeper == ADDRESS_EMPTY {
        return Ok(None);
    }
    let config = match header.block_info()?.new_chain_config {
        Some(config) => config,
        None => return Ok(None),
    };
    let keepers = KeeperSet::from_peers(&config.peers)?;
    if keepers.wire_form() == cur_epoch_keepers {
        return Ok(None);
    }
    Ok(Some(keepers.public_keys()))
}

#[cfg(test)]
mod test {
    use super::*;
    use k256::SecretKey;

    fn test_peer(seed: u8) -> PeerConfig {
        let mut scalar = [0u8; 32];
        scalar[31] = seed;
        let key = SecretKey::from_slice(&scalar).unwrap();
        let compressed = key.public_key().to_encoded_point(true);
        PeerConfig {
            index: seed as u32,
            id: hex::encode(compressed.as_bytes()),
        }
    }

    fn epoch_header(peers: &[PeerConfig]) -> PolyHeader {
        let ids: Vec<serde_json::Value> = peers
            .iter()
            .map(|p| serde_json::json!({ "index": p.index, "id": p.id }))
            .collect();
        let payload = serde_json::json!({ "new_chain_config": { "peers": ids } });
        PolyHeader {
            height: 200,
            consensus_payload: serde_json::to_vec(&payload).unwrap(),
            next_bookkeeper: [7u8; 20],
            ..Default::default()
        }
    }

    #[test]
    fn header_roundtrip() {
        let hdr = PolyHeader {
            version: 1,
            chain_id: 2,
            timestamp: 1_600_000_000,
            height: 12345,
            consensus_data: 99,
            consensus_payload: b"{}".to_vec(),
            next_bookkeeper: [3u8; 20],
            bookkeepers: vec![vec![1, 2, 3]],
            sig_data: vec![vec![9u8; 65], vec![8u8; 65]],
            ..Default::default()
        };
        let decoded = PolyHeader::read_from(&mut hdr.to_vec().as_slice()).unwrap();
        assert_eq!(hdr, decoded);
    }

    #[test]
    fn message_excludes_signatures() {
        let mut hdr = PolyHeader::default();
        let unsigned = hdr.message();
        hdr.sig_data.push(vec![1u8; 65]);
        assert_eq!(hdr.message(), unsigned);
        // full serialization does change
        assert_ne!(hdr.to_vec().len(), unsigned.len());
    }

    #[test]
    fn no_transition_without_bookkeeper() {
        let mut hdr = epoch_header(&[test_peer(1), test_peer(2)]);
        hdr.next_bookkeeper = ADDRESS_EMPTY;
        assert!(epoch_change(&hdr, &[]).unwrap().is_none());
    }

    #[test]
    fn matching_keepers_is_not_an_epoch() {
        let peers = vec![test_peer(1), test_peer(2), test_peer(3)];
        let hdr = epoch_header(&peers);
        let current = KeeperSet::from_peers(&peers).unwrap().wire_form();
        assert!(epoch_change(&hdr, &current).unwrap().is_none());
    }

    #[test]
    fn changed_keepers_yield_public_keys() {
        let peers = vec![test_peer(1), test_peer(2), test_peer(3)];
        let hdr = epoch_header(&peers);
        let stale = KeeperSet::from_peers(&[test_peer(4)]).unwrap().wire_form();
        let pubk_list = epoch_change(&hdr, &stale).unwrap().expect("new epoch");
        // 64 bytes per keeper, 0x04 prefix stripped
        assert_eq!(pubk_list.len(), peers.len() * 64);
    }

    #[test]
    fn keeper_set_order_is_canonical() {
        let forward = KeeperSet::from_peers(&[test_peer(1), test_peer(2)]).unwrap();
        let reverse = KeeperSet::from_peers(&[test_peer(2), test_peer(1)]).unwrap();
        assert_eq!(forward.wire_form(), reverse.wire_form());
        assert_eq!(forward.public_keys(), reverse.public_keys());
    }
}
