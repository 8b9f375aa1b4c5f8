//! cairn-chunks: content hashing, rolling checksums, and fixed-size blocks
//!
//! # Overview
//! - `blake3`: blob and block identity (64-char lowercase hex digests)
//! - `rollsum`: rsync-style rolling checksum, a cheap pre-filter before exact lookups
//! - `blocks`: block-aligned splitting used when indexing a blob

pub mod blake3;
pub mod blocks;
pub mod rollsum;

pub use crate::blake3::{
    hash_bytes, hash_file, hash_from_hex, hash_reader, hash_to_hex, hex_digest, is_checksum,
    Hash, CHECKSUM_LEN,
};
pub use blocks::{split_blocks, Block};
pub use rollsum::{rolling_checksum, RollingChecksum};
