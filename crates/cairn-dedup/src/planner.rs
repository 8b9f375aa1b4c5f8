//! Dedup planning: describe a new blob as slices of existing blobs.
//!
//! Walks the block-aligned blocks of the new content. Blocks whose rolling
//! value was never seen skip the exact lookup entirely. Known blocks seed a
//! `BlockSequenceFinder`, which is fed until `can_add` fails; the run becomes
//! a `Match` piece when it is at least `min_match_blocks` long, otherwise its
//! bytes stay `Original`. Ties between equally long candidates go to the
//! first match in the finder's (blob, offset) order.
//!
//! Original bytes are meant to be stored as one "residue" blob, so a plan
//! converts directly into a concat recipe over existing blobs plus the residue.

use cairn_chunks::split_blocks;
use cairn_core::config::DedupConfig;
use cairn_core::{CairnError, CairnResult, Piece, Recipe};
use tracing::debug;

use crate::finder::BlockSequenceFinder;
use crate::index::BlockLocationIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupPolicy {
    pub min_match_blocks: u64,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self { min_match_blocks: 1 }
    }
}

impl From<&DedupConfig> for DedupPolicy {
    fn from(config: &DedupConfig) -> Self {
        Self {
            min_match_blocks: config.min_match_blocks.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanPiece {
    /// Bytes already stored in `blob` at `offset`
    Match { blob: String, offset: u64, size: u64 },
    /// Bytes of the new content at `offset` with no usable match
    Original { offset: u64, size: u64 },
}

impl PlanPiece {
    pub fn size(&self) -> u64 {
        match self {
            PlanPiece::Match { size, .. } | PlanPiece::Original { size, .. } => *size,
        }
    }
}

/// Ordered pieces covering the planned content exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupPlan {
    pub pieces: Vec<PlanPiece>,
}

impl DedupPlan {
    pub fn size(&self) -> u64 {
        self.pieces.iter().map(PlanPiece::size).sum()
    }

    pub fn matched_bytes(&self) -> u64 {
        self.pieces
            .iter()
            .filter(|p| matches!(p, PlanPiece::Match { .. }))
            .map(PlanPiece::size)
            .sum()
    }

    pub fn has_matches(&self) -> bool {
        self.matched_bytes() > 0
    }

    /// Concatenation of every original slice of `data`, in plan order.
    pub fn residue(&self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for piece in &self.pieces {
            if let PlanPiece::Original { offset, size } = piece {
                let start = *offset as usize;
                out.extend_from_slice(&data[start..start + *size as usize]);
            }
        }
        out
    }

    /// Build a concat recipe for the planned content.
    ///
    /// `residue_checksum` names the blob holding `residue(data)`; it is only
    /// required when the plan has original pieces.
    pub fn to_recipe(&self, checksum: &str, residue_checksum: Option<&str>) -> CairnResult<Recipe> {
        let mut pieces = Vec::with_capacity(self.pieces.len());
        let mut residue_offset = 0u64;
        for piece in &self.pieces {
            match piece {
                PlanPiece::Match { blob, offset, size } => {
                    pieces.push(Piece::new(blob.clone(), *offset, *size));
                }
                PlanPiece::Original { size, .. } => {
                    let residue = residue_checksum.ok_or_else(|| {
                        CairnError::misuse("plan has original bytes but no residue blob")
                    })?;
                    pieces.push(Piece::new(residue, residue_offset, *size));
                    residue_offset += size;
                }
            }
        }
        Ok(Recipe::concat(checksum, self.size(), pieces))
    }

    fn push_original(&mut self, offset: u64, size: u64) {
        if size == 0 {
            return;
        }
        if let Some(PlanPiece::Original { offset: prev, size: prev_size }) = self.pieces.last_mut() {
            if *prev + *prev_size == offset {
                *prev_size += size;
                return;
            }
        }
        self.pieces.push(PlanPiece::Original { offset, size });
    }
}

/// Plan how `data` can be expressed through blocks already in `index`.
pub fn plan(index: &BlockLocationIndex, data: &[u8], policy: DedupPolicy) -> CairnResult<DedupPlan> {
    let block_size = index.block_size();
    let blocks = split_blocks(data, block_size as usize);
    let rolling = index.get_all_rolling()?;
    let mut plan = DedupPlan::default();

    let mut i = 0;
    while i < blocks.len() {
        let first = &blocks[i];
        if !rolling.contains(&first.rolling) || !index.has_block(&first.checksum)? {
            plan.push_original(first.offset, block_size);
            i += 1;
            continue;
        }

        let mut finder = BlockSequenceFinder::new(index);
        finder.add_block(&first.checksum)?;
        let mut end = i + 1;
        while end < blocks.len() && finder.can_add(&blocks[end].checksum)? {
            finder.add_block(&blocks[end].checksum)?;
            end += 1;
        }

        let run = (end - i) as u64;
        let best = finder.get_matches().into_iter().next();
        match best {
            Some(m) if run >= policy.min_match_blocks => plan.pieces.push(PlanPiece::Match {
                blob: m.blob,
                offset: m.offset,
                size: m.size,
            }),
            _ => plan.push_original(first.offset, run * block_size),
        }
        i = end;
    }

    let covered = blocks.len() as u64 * block_size;
    plan.push_original(covered, data.len() as u64 - covered);

    debug!(
        size = data.len(),
        matched = plan.matched_bytes(),
        pieces = plan.pieces.len(),
        "dedup plan"
    );
    Ok(plan)
}
