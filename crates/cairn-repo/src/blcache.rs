//! Bloblist cache: resolved session bloblists kept in RocksDB.
//!
//! Every distinct (filename, checksum, size, mtime, ctime) row ever cached gets
//! a stable numeric id; a session is stored as a zstd-compressed `RowSet` of
//! the row ids making up its resolved bloblist.
//!
//! ```text
//! row:<id u64 BE>        → row JSON
//! idx:<row JSON>         → id u64 BE
//! rev:<session u64 BE>   → zstd(RowSet bytes)
//! meta:next_row          → u64 BE
//! ```
//!
//! Repositories without a stable identifier get the `Noop` variant, which
//! always resolves directly. Either way callers see the same rows.

use std::path::{Path, PathBuf};

use cairn_core::{BlobInfo, CairnError, CairnResult, SessionId};
use rocksdb::{Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bitset::RowSet;
use crate::repository::Repository;
use crate::session::fingerprint;

const ROW_PREFIX: &[u8] = b"row:";
const IDX_PREFIX: &[u8] = b"idx:";
const REV_PREFIX: &[u8] = b"rev:";
const META_NEXT_ROW: &[u8] = b"meta:next_row";
const ZSTD_LEVEL: i32 = 3;

/// The cached part of a bloblist entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Row {
    filename: String,
    checksum: String,
    size: u64,
    mtime: i64,
    ctime: i64,
}

impl Row {
    fn from_info(info: &BlobInfo) -> Self {
        Row {
            filename: info.filename.clone(),
            checksum: info.checksum.clone(),
            size: info.size,
            mtime: info.mtime,
            ctime: info.ctime,
        }
    }

    fn into_info(self) -> BlobInfo {
        BlobInfo::new(self.filename, self.checksum, self.size).with_times(self.mtime, self.ctime)
    }
}

/// Dispatch enum over the cache backends.
pub enum BloblistCache {
    Noop,
    Rocks(RocksBloblistCache),
}

impl BloblistCache {
    /// Pick a backend for `repo` based on its identifier and configuration.
    pub fn open(repo: &Repository) -> CairnResult<Self> {
        let cache = &repo.config().cache;
        match repo.repo_id() {
            Some(id) if cache.enabled => {
                let path = cache.resolved_dir().join(format!("bloblist-cache-{id}"));
                Ok(BloblistCache::Rocks(RocksBloblistCache::open(&path)?))
            }
            Some(_) => {
                debug!("bloblist cache disabled by config");
                Ok(BloblistCache::Noop)
            }
            None => {
                debug!("repository has no stable id, bloblist cache disabled");
                Ok(BloblistCache::Noop)
            }
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, BloblistCache::Noop)
    }

    /// Resolved bloblist of session `id`, ordered by filename.
    ///
    /// Rows carry only filename, checksum, size, mtime and ctime; read the
    /// session itself for extension keys. Unless `skip_verify` is set, cached
    /// rows are checked against the session fingerprint first.
    pub fn get_bloblist(&mut self, repo: &Repository, id: SessionId, skip_verify: bool) -> CairnResult<Vec<BlobInfo>> {
        match self {
            BloblistCache::Noop => Ok(strip(repo.session(id)?.bloblist())),
            BloblistCache::Rocks(cache) => cache.get_bloblist(repo, id, skip_verify),
        }
    }
}

fn strip(bloblist: Vec<BlobInfo>) -> Vec<BlobInfo> {
    bloblist
        .iter()
        .map(|info| Row::from_info(info).into_info())
        .collect()
}

pub struct RocksBloblistCache {
    db: DB,
    path: PathBuf,
    next_row: u64,
}

impl RocksBloblistCache {
    pub fn open(path: &Path) -> CairnResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path).map_err(cache_err)?;
        let next_row = match db.get(META_NEXT_ROW).map_err(cache_err)? {
            Some(raw) => decode_u64(&raw)
                .ok_or_else(|| CairnError::soft("bloblist cache has a mangled row counter"))?,
            None => 0,
        };
        debug!(path = %path.display(), next_row, "opened bloblist cache");
        Ok(RocksBloblistCache {
            db,
            path: path.to_path_buf(),
            next_row,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_bloblist(&mut self, repo: &Repository, id: SessionId, skip_verify: bool) -> CairnResult<Vec<BlobInfo>> {
        match self.load(id) {
            Ok(Some(rows)) => {
                if skip_verify {
                    debug!(session = id, "bloblist cache hit (unverified)");
                    return Ok(rows);
                }
                let stored = repo.session_fingerprint(id)?;
                let computed = fingerprint(
                    rows.iter()
                        .map(|b| (b.filename.as_str(), b.checksum.as_str())),
                );
                if computed == stored {
                    debug!(session = id, rows = rows.len(), "bloblist cache hit");
                    return Ok(rows);
                }
                let err = CairnError::soft(format!(
                    "cached bloblist for session {id} has fingerprint {computed}, session has {stored}"
                ));
                warn!(session = id, "{err}; rebuilding");
            }
            Ok(None) => debug!(session = id, "bloblist cache miss"),
            Err(e) if e.is_corruption() => {
                warn!(session = id, "unreadable cached bloblist: {e}; rebuilding");
            }
            Err(e) => return Err(e),
        }

        let bloblist = strip(repo.session(id)?.bloblist());
        self.store(id, &bloblist)?;
        Ok(bloblist)
    }

    /// Cached rows for a session, ordered by filename.
    pub fn load(&self, id: SessionId) -> CairnResult<Option<Vec<BlobInfo>>> {
        let Some(packed) = self.db.get(prefixed(REV_PREFIX, &id.to_be_bytes())).map_err(cache_err)? else {
            return Ok(None);
        };
        let raw = zstd::decode_all(packed.as_slice())
            .map_err(|e| CairnError::soft(format!("cached row set for session {id}: {e}")))?;
        let set = RowSet::from_bytes(&raw)?;

        let mut rows = Vec::with_capacity(set.len());
        for row_id in set.iter() {
            let bytes = self
                .db
                .get(prefixed(ROW_PREFIX, &row_id.to_be_bytes()))
                .map_err(cache_err)?
                .ok_or_else(|| CairnError::soft(format!("bloblist cache lost row {row_id}")))?;
            let row: Row = serde_json::from_slice(&bytes)
                .map_err(|e| CairnError::soft(format!("bloblist cache row {row_id}: {e}")))?;
            rows.push(row.into_info());
        }
        rows.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(Some(rows))
    }

    /// Cache `bloblist` as the resolved bloblist of session `id`.
    pub fn store(&mut self, id: SessionId, bloblist: &[BlobInfo]) -> CairnResult<()> {
        let mut batch = WriteBatch::default();
        let mut set = RowSet::new();
        let mut next_row = self.next_row;

        for info in bloblist {
            let row = serde_json::to_vec(&Row::from_info(info))
                .map_err(|e| CairnError::Other(anyhow::anyhow!("serializing cache row: {e}")))?;
            let idx_key = prefixed(IDX_PREFIX, &row);
            let row_id = match self.db.get(&idx_key).map_err(cache_err)? {
                Some(raw) => decode_u64(&raw)
                    .ok_or_else(|| CairnError::soft("bloblist cache has a mangled row id"))?,
                None => {
                    let row_id = next_row;
                    next_row += 1;
                    batch.put(&idx_key, row_id.to_be_bytes());
                    batch.put(prefixed(ROW_PREFIX, &row_id.to_be_bytes()), &row);
                    row_id
                }
            };
            set.insert(row_id);
        }

        let packed = zstd::encode_all(set.to_bytes().as_slice(), ZSTD_LEVEL)?;
        batch.put(prefixed(REV_PREFIX, &id.to_be_bytes()), packed);
        batch.put(META_NEXT_ROW, next_row.to_be_bytes());
        self.db.write(batch).map_err(cache_err)?;
        self.next_row = next_row;
        debug!(session = id, rows = set.len(), "cached bloblist");
        Ok(())
    }
}

fn prefixed(prefix: &[u8], rest: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + rest.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(rest);
    key
}

fn decode_u64(raw: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = raw.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

fn cache_err(e: rocksdb::Error) -> CairnError {
    CairnError::Index(format!("bloblist cache: {e}"))
}
