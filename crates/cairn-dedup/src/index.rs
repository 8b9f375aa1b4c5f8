//! Block Location Index: an append-only RocksDB store of block positions.
//!
//! Key layout (all values are empty unless noted):
//! ```text
//! b<block checksum><blob checksum><offset u64 BE>   one row per block location
//! r<rolling value u64 BE>                          one row per rolling value seen
//! m:block_size                                     value: block size u64 BE
//! ```
//! Keys are unique by construction, so re-adding an identical location or
//! rolling value overwrites an identical row instead of duplicating it.
//!
//! Additions are buffered in a `WriteBatch` between `begin()` and `commit()`
//! and written atomically, so readers never observe half a batch.

use cairn_chunks::{is_checksum, split_blocks, CHECKSUM_LEN};
use cairn_core::{CairnError, CairnResult};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

const BLOCK_PREFIX: u8 = b'b';
const ROLLING_PREFIX: u8 = b'r';
const META_BLOCK_SIZE: &[u8] = b"m:block_size";

const BLOCK_KEY_LEN: usize = 1 + 2 * CHECKSUM_LEN + 8;

/// Where one block occurs: a blob and the byte offset of the block inside it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockLocation {
    pub blob: String,
    pub offset: u64,
}

pub struct BlockLocationIndex {
    db: DB,
    path: PathBuf,
    block_size: u64,
    batch: Option<WriteBatch>,
}

impl BlockLocationIndex {
    /// Open or create an index at `path` for blocks of `block_size` bytes.
    ///
    /// The block size is recorded on first open; reopening with another size
    /// is rejected since every stored location would be meaningless.
    pub fn open(path: &Path, block_size: u64) -> CairnResult<Self> {
        if block_size == 0 {
            return Err(CairnError::input("block size must be positive"));
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path).map_err(index_err)?;

        match db.get(META_BLOCK_SIZE).map_err(index_err)? {
            Some(raw) => {
                let stored = decode_u64(&raw)
                    .ok_or_else(|| CairnError::soft("block index has a mangled block size"))?;
                if stored != block_size {
                    return Err(CairnError::input(format!(
                        "block index at {} uses block size {stored}, not {block_size}",
                        path.display()
                    )));
                }
            }
            None => {
                db.put(META_BLOCK_SIZE, block_size.to_be_bytes())
                    .map_err(index_err)?;
            }
        }

        debug!(path = %path.display(), block_size, "opened block index");
        Ok(BlockLocationIndex {
            db,
            path: path.to_path_buf(),
            block_size,
            batch: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn in_transaction(&self) -> bool {
        self.batch.is_some()
    }

    /// Start collecting additions into one atomic batch.
    pub fn begin(&mut self) -> CairnResult<()> {
        if self.batch.is_some() {
            return Err(CairnError::misuse("block index transaction already open"));
        }
        self.batch = Some(WriteBatch::default());
        Ok(())
    }

    /// Write the pending batch. Nothing added since `begin()` is visible before this.
    pub fn commit(&mut self) -> CairnResult<()> {
        let batch = self
            .batch
            .take()
            .ok_or_else(|| CairnError::misuse("commit without an open block index transaction"))?;
        let rows = batch.len();
        self.db.write(batch).map_err(index_err)?;
        debug!(rows, "block index batch committed");
        Ok(())
    }

    /// Drop the pending batch without writing anything.
    pub fn rollback(&mut self) {
        self.batch = None;
    }

    /// Record that `block_checksum` occurs in `blob` at byte `offset`.
    pub fn add_block(&mut self, blob: &str, offset: u64, block_checksum: &str) -> CairnResult<()> {
        check_id("blob", blob)?;
        check_id("block", block_checksum)?;
        let key = block_key(block_checksum, blob, offset);
        self.pending()?.put(key, b"");
        Ok(())
    }

    /// Record a rolling checksum value as seen.
    pub fn add_rolling(&mut self, value: u64) -> CairnResult<()> {
        let key = rolling_key(value);
        self.pending()?.put(key, b"");
        Ok(())
    }

    /// Split `data` into aligned blocks and record every block of `blob`.
    ///
    /// Returns the number of blocks recorded. Must run inside a transaction.
    pub fn index_blob(&mut self, blob: &str, data: &[u8]) -> CairnResult<usize> {
        let blocks = split_blocks(data, self.block_size as usize);
        for block in &blocks {
            self.add_block(blob, block.offset, &block.checksum)?;
            self.add_rolling(block.rolling)?;
        }
        debug!(blob, blocks = blocks.len(), "indexed blob");
        Ok(blocks.len())
    }

    /// Lazily iterate the known locations of a block, in no particular order.
    ///
    /// `limit` caps how many locations are produced; `None` means all of them.
    /// A malformed checksum is an input error rather than a prefix scan.
    pub fn get_block_locations(
        &self,
        block_checksum: &str,
        limit: Option<usize>,
    ) -> CairnResult<BlockLocations<'_>> {
        check_id("block", block_checksum)?;
        let mut prefix = Vec::with_capacity(1 + CHECKSUM_LEN);
        prefix.push(BLOCK_PREFIX);
        prefix.extend_from_slice(block_checksum.as_bytes());
        let inner = self
            .db
            .iterator(IteratorMode::From(&prefix, Direction::Forward));
        Ok(BlockLocations {
            inner,
            prefix,
            remaining: limit,
            done: false,
        })
    }

    pub fn has_block(&self, block_checksum: &str) -> CairnResult<bool> {
        Ok(self
            .get_block_locations(block_checksum, Some(1))?
            .next()
            .transpose()?
            .is_some())
    }

    pub fn has_rolling(&self, value: u64) -> CairnResult<bool> {
        Ok(self.db.get(rolling_key(value)).map_err(index_err)?.is_some())
    }

    /// Every rolling value ever committed.
    pub fn get_all_rolling(&self) -> CairnResult<HashSet<u64>> {
        let mut values = HashSet::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(&[ROLLING_PREFIX], Direction::Forward));
        for item in iter {
            let (key, _) = item.map_err(index_err)?;
            if key.first() != Some(&ROLLING_PREFIX) {
                break;
            }
            let value = decode_u64(&key[1..])
                .ok_or_else(|| CairnError::soft("block index has a mangled rolling key"))?;
            values.insert(value);
        }
        Ok(values)
    }

    fn pending(&mut self) -> CairnResult<&mut WriteBatch> {
        self.batch
            .as_mut()
            .ok_or_else(|| CairnError::misuse("block index additions require begin()"))
    }
}

/// Iterator over the locations of one block checksum.
pub struct BlockLocations<'a> {
    inner: rocksdb::DBIterator<'a>,
    prefix: Vec<u8>,
    remaining: Option<usize>,
    done: bool,
}

impl Iterator for BlockLocations<'_> {
    type Item = CairnResult<BlockLocation>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.remaining == Some(0) {
            return None;
        }
        let item = match self.inner.next() {
            None => {
                self.done = true;
                return None;
            }
            Some(Err(e)) => {
                self.done = true;
                return Some(Err(index_err(e)));
            }
            Some(Ok((key, _))) => key,
        };
        if !item.starts_with(&self.prefix) {
            self.done = true;
            return None;
        }
        if let Some(n) = self.remaining.as_mut() {
            *n -= 1;
        }
        Some(parse_block_key(&item))
    }
}

fn block_key(block_checksum: &str, blob: &str, offset: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(BLOCK_KEY_LEN);
    key.push(BLOCK_PREFIX);
    key.extend_from_slice(block_checksum.as_bytes());
    key.extend_from_slice(blob.as_bytes());
    key.extend_from_slice(&offset.to_be_bytes());
    key
}

fn parse_block_key(key: &[u8]) -> CairnResult<BlockLocation> {
    if key.len() != BLOCK_KEY_LEN {
        return Err(CairnError::soft(format!(
            "block index key has length {}, expected {BLOCK_KEY_LEN}",
            key.len()
        )));
    }
    let blob_start = 1 + CHECKSUM_LEN;
    let blob_end = blob_start + CHECKSUM_LEN;
    let blob = std::str::from_utf8(&key[blob_start..blob_end])
        .map_err(|_| CairnError::soft("block index key holds a non-utf8 blob id"))?;
    let offset = decode_u64(&key[blob_end..])
        .ok_or_else(|| CairnError::soft("block index key holds a mangled offset"))?;
    Ok(BlockLocation {
        blob: blob.to_string(),
        offset,
    })
}

fn rolling_key(value: u64) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[0] = ROLLING_PREFIX;
    key[1..].copy_from_slice(&value.to_be_bytes());
    key
}

fn decode_u64(raw: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = raw.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

pub(crate) fn check_id(what: &str, id: &str) -> CairnResult<()> {
    if is_checksum(id) {
        Ok(())
    } else {
        Err(CairnError::input(format!("invalid {what} checksum '{id}'")))
    }
}

fn index_err(e: rocksdb::Error) -> CairnError {
    CairnError::Index(e.to_string())
}
