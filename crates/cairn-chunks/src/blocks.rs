//! Fixed-size, block-aligned splitting
//!
//! Block `i` of a blob covers `[i * block_size, (i + 1) * block_size)`. Only
//! full blocks are produced; a trailing partial block is never indexed, since
//! a match against it could not be extended to a full block anyway.

/// One full-size block of a blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Byte offset within the source blob (a multiple of the block size)
    pub offset: u64,
    /// BLAKE3 hex checksum of the block bytes
    pub checksum: String,
    /// Rolling checksum of the block bytes
    pub rolling: u64,
}

/// Split `data` into full blocks of `block_size` bytes.
///
/// Returns an empty list when `data` is shorter than one block.
pub fn split_blocks(data: &[u8], block_size: usize) -> Vec<Block> {
    let block_size = block_size.max(1);
    data.chunks_exact(block_size)
        .enumerate()
        .map(|(i, block)| Block {
            offset: (i * block_size) as u64,
            checksum: crate::blake3::hex_digest(block),
            rolling: crate::rollsum::rolling_checksum(block),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn short_data_has_no_blocks() {
        assert!(split_blocks(b"ab", 3).is_empty());
        assert!(split_blocks(&[], 3).is_empty());
    }

    #[test]
    fn trailing_partial_block_is_dropped() {
        let blocks = split_blocks(b"aaabbbcc", 3);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].offset, 0);
        assert_eq!(blocks[1].offset, 3);
        assert_eq!(blocks[1].checksum, crate::blake3::hex_digest(b"bbb"));
    }

    #[test]
    fn identical_blocks_share_checksums() {
        let blocks = split_blocks(b"aaaaaa", 3);
        assert_eq!(blocks[0].checksum, blocks[1].checksum);
        assert_eq!(blocks[0].rolling, blocks[1].rolling);
        assert_ne!(blocks[0].offset, blocks[1].offset);
    }

    proptest! {
        #[test]
        fn blocks_are_aligned_and_full(
            data in proptest::collection::vec(any::<u8>(), 0..=4096),
            block_size in 1usize..=128,
        ) {
            let blocks = split_blocks(&data, block_size);
            prop_assert_eq!(blocks.len(), data.len() / block_size);
            for (i, b) in blocks.iter().enumerate() {
                prop_assert_eq!(b.offset, (i * block_size) as u64);
                let start = b.offset as usize;
                let bytes = &data[start..start + block_size];
                prop_assert_eq!(&b.checksum, &crate::blake3::hex_digest(bytes));
            }
        }
    }
}
