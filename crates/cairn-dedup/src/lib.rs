//! cairn-dedup: finding content that already exists in the repository
//!
//! - `index`: durable block checksum → (blob, offset) map plus the set of seen rolling values
//! - `finder`: streaming matcher that extends runs of known blocks
//! - `planner`: turns a new blob into matched slices and leftover original bytes

pub mod finder;
pub mod index;
pub mod planner;

pub use finder::{BlockMatch, BlockSequenceFinder};
pub use index::{BlockLocation, BlockLocationIndex, BlockLocations};
pub use planner::{plan, DedupPlan, DedupPolicy, PlanPiece};
