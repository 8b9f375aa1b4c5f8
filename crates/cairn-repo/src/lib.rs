//! cairn-repo: the on-disk repository
//!
//! # Overview
//! - `repository`: blob pool, recipes, and the staging → queue → session commit protocol
//! - `recipe`: random-access reads over blobs stitched together from other blobs
//! - `session`: writing and reading immutable, numbered snapshots
//! - `blcache`: optional RocksDB cache of resolved session bloblists
//! - `bitset`: growable row-id bitset used by the cache

pub mod bitset;
pub mod blcache;
pub mod recipe;
pub mod repository;
pub mod session;

pub use bitset::RowSet;
pub use blcache::{BloblistCache, RocksBloblistCache};
pub use recipe::RecipeReader;
pub use repository::{BlobReader, Repository, VerifyReport};
pub use session::{fingerprint, normalize_filename, SessionMeta, SessionReader, SessionWriter};
