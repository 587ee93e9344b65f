//! The persistent work queues.
//!
//! One rocksdb handle holds four buckets, each a key prefix:
//! `bridge_transactions` (poly -> EVM items keyed by the hex source tx
//! hash), `retry` (EVM -> poly items keyed by their own serialized bytes),
//! `check` (submitted retry items keyed by the poly tx hash awaiting
//! confirmation) and the poly height cursor. Components never share
//! in-memory queues; every hand-off goes through a bucket, which is what
//! makes restarts lossless.

use std::path::Path;
use std::sync::Arc;

use eyre::WrapErr;
use rocksdb::{Direction, IteratorMode, Options, DB as Rocks};
use tracing::{debug, info, warn};

use relayer_core::{BridgeTransaction, CrossTransfer, Decode, Encode, ProtocolError};

static BRIDGE_TRANSACTIONS: &str = "bridge_transactions_";
static RETRY: &str = "retry_";
static CHECK: &str = "check_";
static POLY_HEIGHT: &str = "poly_height";

/// DB Error type
#[derive(thiserror::Error, Debug)]
pub enum DbError {
    /// Store access failure
    #[error("{0}")]
    Store(#[from] rocksdb::Error),
    /// A stored value no longer decodes
    #[error("corrupt {bucket} entry: {source}")]
    Corrupt {
        /// Bucket the entry was read from
        bucket: &'static str,
        /// The decode failure
        #[source]
        source: ProtocolError,
    },
}

type Result<T> = std::result::Result<T, DbError>;

/// Handle on the relayer work queues.
///
/// Cheap to clone; every task holds one. Each operation is a single atomic
/// rocksdb op, so cross-task access needs no further coordination.
#[derive(Debug, Clone)]
pub struct RelayerDB(Arc<Rocks>);

impl RelayerDB {
    /// Open the store at `db_path`, creating it if missing.
    pub fn open(db_path: &str) -> eyre::Result<Self> {
        match Path::new(db_path).is_dir() {
            true => info!(path = db_path, "opening existing store"),
            false => info!(path = db_path, "creating store"),
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);

        let rocks = Rocks::open(&opts, db_path)
            .wrap_err_with(|| format!("failed to open store at {}", db_path))?;
        Ok(Self(Arc::new(rocks)))
    }

    /// Store a bridge transaction under its key
    pub fn store_bridge_transaction(&self, key: &str, tx: &BridgeTransaction) -> Result<()> {
        debug!(key, height = tx.header.height, "storing bridge transaction");
        self.put(BRIDGE_TRANSACTIONS, key, tx.to_vec())
    }

    /// All queued bridge transactions
    pub fn bridge_transactions(&self) -> Vec<(String, BridgeTransaction)> {
        self.scan_decodable(BRIDGE_TRANSACTIONS)
            .into_iter()
            .map(|(key, tx)| (String::from_utf8_lossy(&key).into_owned(), tx))
            .collect()
    }

    /// Delete a bridge transaction
    pub fn delete_bridge_transaction(&self, key: &str) -> Result<()> {
        self.delete(BRIDGE_TRANSACTIONS, key)
    }

    /// Queue a cross transfer for proof relay. Content-keyed, so re-inserting
    /// the same item is a no-op.
    pub fn store_retry(&self, transfer: &CrossTransfer) -> Result<()> {
        let raw = transfer.to_vec();
        self.put(RETRY, &raw, &raw)
    }

    /// Re-queue a raw retry value (as moved back from the check bucket)
    pub fn store_retry_raw(&self, raw: &[u8]) -> Result<()> {
        self.put(RETRY, raw, raw)
    }

    /// All queued cross transfers with their raw store values
    pub fn retries(&self) -> Vec<(Vec<u8>, CrossTransfer)> {
        self.scan_decodable(RETRY)
    }

    /// Delete a retry entry by its raw value
    pub fn delete_retry(&self, raw: &[u8]) -> Result<()> {
        self.delete(RETRY, raw)
    }

    /// Park a submitted retry value under the poly tx hash to verify later
    pub fn store_check(&self, poly_tx_hash: &str, raw: &[u8]) -> Result<()> {
        self.put(CHECK, poly_tx_hash, raw)
    }

    /// All parked check entries
    pub fn checks(&self) -> Vec<(String, Vec<u8>)> {
        self.scan(CHECK)
            .into_iter()
            .map(|(key, value)| (String::from_utf8_lossy(&key).into_owned(), value))
            .collect()
    }

    /// Delete a check entry
    pub fn delete_check(&self, poly_tx_hash: &str) -> Result<()> {
        self.delete(CHECK, poly_tx_hash)
    }

    /// Advance the persisted poly height cursor. Never moves backwards.
    pub fn update_poly_height(&self, height: u32) -> Result<()> {
        if let Some(current) = self.retrieve_poly_height()? {
            if height <= current {
                return Ok(());
            }
        }
        Ok(self.0.put(POLY_HEIGHT, height.to_vec())?)
    }

    /// The persisted poly height cursor
    pub fn retrieve_poly_height(&self) -> Result<Option<u32>> {
        let raw = match self.0.get(POLY_HEIGHT)? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        u32::read_from(&mut raw.as_slice())
            .map(Some)
            .map_err(|source| DbError::Corrupt {
                bucket: POLY_HEIGHT,
                source,
            })
    }

    fn bucket_key(bucket: &str, key: impl AsRef<[u8]>) -> Vec<u8> {
        let key = key.as_ref();
        let mut buf = Vec::with_capacity(bucket.len() + key.len());
        buf.extend_from_slice(bucket.as_bytes());
        buf.extend_from_slice(key);
        buf
    }

    fn put(
        &self,
        bucket: &str,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<()> {
        Ok(self.0.put(Self::bucket_key(bucket, key), value)?)
    }

    fn delete(&self, bucket: &str, key: impl AsRef<[u8]>) -> Result<()> {
        Ok(self.0.delete(Self::bucket_key(bucket, key))?)
    }

    /// Raw `(key, value)` pairs of one bucket, prefix stripped.
    fn scan(&self, bucket: &str) -> Vec<(Vec<u8>, Vec<u8>)> {
        let prefix = bucket.as_bytes();
        self.0
            .iterator(IteratorMode::From(prefix, Direction::Forward))
            .filter_map(|entry| entry.ok())
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key[prefix.len()..].to_vec(), value.to_vec()))
            .collect()
    }

    /// Decoded entries of one bucket. Entries that no longer decode are
    /// skipped with a warning rather than wedging the queue.
    fn scan_decodable<V: Decode>(&self, bucket: &'static str) -> Vec<(Vec<u8>, V)> {
        self.scan(bucket)
            .into_iter()
            .filter_map(|(key, value)| match V::read_from(&mut value.as_slice()) {
                Ok(decoded) => Some((key, decoded)),
                Err(e) => {
                    warn!(bucket, error = %e, "skipping undecodable store entry");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use relayer_core::{FeeState, MakeTxParam, PolyHeader, ToMerkleValue};

    fn test_db() -> (tempfile::TempDir, RelayerDB) {
        let dir = tempfile::tempdir().unwrap();
        let db = RelayerDB::open(dir.path().to_str().unwrap()).unwrap();
        (dir, db)
    }

    fn bridge_tx(seed: u8, fee: &str) -> BridgeTransaction {
        BridgeTransaction {
            header: PolyHeader {
                height: seed as u32,
                consensus_payload: b"{}".to_vec(),
                ..Default::default()
            },
            param: ToMerkleValue {
                tx_hash: vec![seed; 32],
                from_chain_id: 2,
                make_tx_param: MakeTxParam {
                    tx_hash: vec![seed; 32],
                    method: "unlock".into(),
                    ..Default::default()
                },
            },
            poly_tx_hash: hex::encode([seed; 32]),
            has_pay: FeeState::NoCheck,
            fee: fee.into(),
            ..Default::default()
        }
    }

    #[test]
    fn bridge_transaction_bucket() {
        let (_dir, db) = test_db();
        let one = bridge_tx(1, "");
        let two = bridge_tx(2, "1.5");
        db.store_bridge_transaction(&one.key(), &one).unwrap();
        db.store_bridge_transaction(&two.key(), &two).unwrap();

        let mut all = db.bridge_transactions();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].1, one);
        assert_eq!(all[1].1, two);

        db.delete_bridge_transaction(&one.key()).unwrap();
        assert_eq!(db.bridge_transactions().len(), 1);
    }

    #[test]
    fn retry_bucket_is_content_keyed() {
        let (_dir, db) = test_db();
        let ct = CrossTransfer {
            tx_index: "a1".into(),
            tx_id: vec![9; 32],
            value: vec![1, 2, 3],
            to_chain: 7,
            height: 55,
        };
        db.store_retry(&ct).unwrap();
        db.store_retry(&ct).unwrap();
        let retries = db.retries();
        assert_eq!(retries.len(), 1);
        assert_eq!(retries[0].1, ct);

        db.delete_retry(&retries[0].0).unwrap();
        assert!(db.retries().is_empty());
    }

    #[test]
    fn check_bucket_roundtrip() {
        let (_dir, db) = test_db();
        let raw = vec![4u8; 10];
        db.store_check("aabb", &raw).unwrap();
        let checks = db.checks();
        assert_eq!(checks, vec![("aabb".to_owned(), raw.clone())]);

        // failed check entries go back to retry as-is
        db.store_retry_raw(&checks[0].1).unwrap();
        db.delete_check("aabb").unwrap();
        assert!(db.checks().is_empty());
    }

    #[test]
    fn poly_height_is_monotonic() {
        let (_dir, db) = test_db();
        assert_eq!(db.retrieve_poly_height().unwrap(), None);
        db.update_poly_height(10).unwrap();
        db.update_poly_height(5).unwrap();
        assert_eq!(db.retrieve_poly_height().unwrap(), Some(10));
        db.update_poly_height(11).unwrap();
        assert_eq!(db.retrieve_poly_height().unwrap(), Some(11));
    }

    #[test]
    fn undecodable_entries_are_skipped() {
        let (_dir, db) = test_db();
        let ct = CrossTransfer::default();
        db.store_retry(&ct).unwrap();
        db.put(RETRY, b"junkkey", b"junk").unwrap();
        assert_eq!(db.retries().len(), 1);
    }

    #[test]
    fn buckets_do_not_bleed_into_each_other() {
        let (_dir, db) = test_db();
        db.store_check("ff", &[1u8]).unwrap();
        db.store_retry_raw(&[2u8; 4]).unwrap();
        db.update_poly_height(3).unwrap();
        assert!(db.bridge_transactions().is_empty());
        assert_eq!(db.checks().len(), 1);
        assert_eq!(db.retries().len(), 1);
    }
}
