//! Block Sequence Finder
//!
//! Feeds a stream of block checksums and tracks every place in the repository
//! where the blocks seen so far occur back to back. Each candidate is a
//! `(blob, end_offset)` pair: the blob matches the stream from
//! `end_offset - blocks_fed * block_size` up to `end_offset`, and the next
//! block must sit at `end_offset` for the candidate to survive.
//!
//! Callers ask `can_add` before each feed and stop (emit the match, reseed a
//! fresh finder) once it says no. Feeding a block `can_add` rejected is a
//! misuse and leaves the finder untouched.

use std::collections::BTreeSet;

use cairn_core::{CairnError, CairnResult};

use crate::index::{check_id, BlockLocationIndex};

/// A run of existing content matching everything fed so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMatch {
    pub blob: String,
    pub offset: u64,
    pub size: u64,
}

pub struct BlockSequenceFinder<'a> {
    index: &'a BlockLocationIndex,
    block_size: u64,
    /// Ordered so matches come out sorted by (blob, end offset)
    candidates: BTreeSet<(String, u64)>,
    blocks_fed: u64,
    first_block: bool,
}

impl<'a> BlockSequenceFinder<'a> {
    pub fn new(index: &'a BlockLocationIndex) -> Self {
        BlockSequenceFinder {
            index,
            block_size: index.block_size(),
            candidates: BTreeSet::new(),
            blocks_fed: 0,
            first_block: true,
        }
    }

    pub fn blocks_fed(&self) -> u64 {
        self.blocks_fed
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// True if feeding `block_checksum` next would keep at least one candidate.
    ///
    /// Always true before the first block. Does not change any state.
    pub fn can_add(&self, block_checksum: &str) -> CairnResult<bool> {
        check_id("block", block_checksum)?;
        if self.first_block {
            return Ok(true);
        }
        Ok(!self.extend_candidates(block_checksum)?.is_empty())
    }

    pub fn add_block(&mut self, block_checksum: &str) -> CairnResult<()> {
        let next = if self.first_block {
            let mut seeded = BTreeSet::new();
            for loc in self.index.get_block_locations(block_checksum, None)? {
                let loc = loc?;
                seeded.insert((loc.blob, loc.offset + self.block_size));
            }
            if seeded.is_empty() {
                return Err(CairnError::misuse(format!(
                    "first block {block_checksum} has no known location"
                )));
            }
            seeded
        } else {
            let survivors = self.extend_candidates(block_checksum)?;
            if survivors.is_empty() {
                return Err(CairnError::misuse(format!(
                    "block {block_checksum} does not extend any candidate; check can_add first"
                )));
            }
            survivors
        };

        self.candidates = next;
        self.first_block = false;
        self.blocks_fed += 1;
        Ok(())
    }

    /// Every surviving match, sorted by (blob, offset).
    pub fn get_matches(&self) -> Vec<BlockMatch> {
        let size = self.blocks_fed * self.block_size;
        self.candidates
            .iter()
            .map(|(blob, end)| BlockMatch {
                blob: blob.clone(),
                offset: end - size,
                size,
            })
            .collect()
    }

    fn extend_candidates(&self, block_checksum: &str) -> CairnResult<BTreeSet<(String, u64)>> {
        let mut survivors = BTreeSet::new();
        for loc in self.index.get_block_locations(block_checksum, None)? {
            let loc = loc?;
            let key = (loc.blob, loc.offset);
            if self.candidates.contains(&key) {
                survivors.insert((key.0, key.1 + self.block_size));
            }
        }
        Ok(survivors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_chunks::hex_digest;

    fn index_with(dir: &tempfile::TempDir, block_size: u64, blobs: &[&[u8]]) -> BlockLocationIndex {
        let mut index = BlockLocationIndex::open(&dir.path().join("blocks.db"), block_size).unwrap();
        index.begin().unwrap();
        for data in blobs {
            index.index_blob(&hex_digest(data), data).unwrap();
        }
        index.commit().unwrap();
        index
    }

    #[test]
    fn repeated_block_extends_within_one_blob() {
        let dir = tempfile::tempdir().unwrap();
        let blob_a: &[u8] = b"aaaaaa";
        let index = index_with(&dir, 3, &[blob_a]);
        let aaa = hex_digest(b"aaa");

        let mut finder = BlockSequenceFinder::new(&index);
        finder.add_block(&aaa).unwrap();
        assert!(finder.can_add(&aaa).unwrap());
        finder.add_block(&aaa).unwrap();

        assert_eq!(
            finder.get_matches(),
            vec![BlockMatch {
                blob: hex_digest(blob_a),
                offset: 0,
                size: 6
            }]
        );
    }

    #[test]
    fn short_blob_cannot_be_extended() {
        let dir = tempfile::tempdir().unwrap();
        let index = index_with(&dir, 3, &[b"aaa"]);
        let aaa = hex_digest(b"aaa");

        let mut finder = BlockSequenceFinder::new(&index);
        finder.add_block(&aaa).unwrap();
        assert!(!finder.can_add(&aaa).unwrap());
        let err = finder.add_block(&aaa).unwrap_err();
        assert!(matches!(err, CairnError::Misuse(_)));
        // the rejected feed left the match intact
        assert_eq!(finder.blocks_fed(), 1);
        assert_eq!(finder.get_matches().len(), 1);
    }

    #[test]
    fn contiguous_run_reports_single_match() {
        let dir = tempfile::tempdir().unwrap();
        let source: &[u8] = b"xxxabcdefghiyyy";
        let index = index_with(&dir, 3, &[source]);

        let mut finder = BlockSequenceFinder::new(&index);
        for block in [b"abc", b"def", b"ghi"] {
            let sum = hex_digest(block);
            assert!(finder.can_add(&sum).unwrap());
            finder.add_block(&sum).unwrap();
        }
        assert_eq!(
            finder.get_matches(),
            vec![BlockMatch {
                blob: hex_digest(source),
                offset: 3,
                size: 9
            }]
        );
    }

    #[test]
    fn matches_are_sorted_and_narrowed() {
        let dir = tempfile::tempdir().unwrap();
        let one: &[u8] = b"abcdef";
        let two: &[u8] = b"abcxyz";
        let index = index_with(&dir, 3, &[one, two]);
        let abc = hex_digest(b"abc");

        let mut finder = BlockSequenceFinder::new(&index);
        finder.add_block(&abc).unwrap();
        let mut expected: Vec<String> = vec![hex_digest(one), hex_digest(two)];
        expected.sort();
        let blobs: Vec<String> = finder.get_matches().into_iter().map(|m| m.blob).collect();
        assert_eq!(blobs, expected);

        finder.add_block(&hex_digest(b"def")).unwrap();
        let matches = finder.get_matches();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].blob, hex_digest(one));
    }

    #[test]
    fn unknown_first_block_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let index = index_with(&dir, 3, &[b"aaa"]);
        let mut finder = BlockSequenceFinder::new(&index);
        let unknown = hex_digest(b"zzz");

        assert!(finder.can_add(&unknown).unwrap());
        assert!(finder.add_block(&unknown).is_err());
        assert!(finder.is_empty());
        assert_eq!(finder.blocks_fed(), 0);
        // still seedable afterwards
        finder.add_block(&hex_digest(b"aaa")).unwrap();
        assert!(!finder.is_empty());
    }

    #[test]
    fn partial_checksums_never_extend_a_run() {
        let dir = tempfile::tempdir().unwrap();
        let index = index_with(&dir, 3, &[b"abcdef"]);
        let mut finder = BlockSequenceFinder::new(&index);
        let abc = hex_digest(b"abc");
        finder.add_block(&abc).unwrap();

        for bad in ["", &abc[..4]] {
            assert!(finder.can_add(bad).unwrap_err().is_input());
            assert!(finder.add_block(bad).unwrap_err().is_input());
        }
        assert_eq!(finder.blocks_fed(), 1);
        assert_eq!(finder.get_matches()[0].size, 3);
    }
}
