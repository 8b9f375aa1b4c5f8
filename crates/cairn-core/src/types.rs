use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Session ids are dense and start at 1.
pub type SessionId = u64;

/// Free-form client data stored alongside a session.
pub type SessionInfo = BTreeMap<String, serde_json::Value>;

/// Metadata for one file in a session.
///
/// Keys the repository does not know about are kept in `extra` and written
/// back verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobInfo {
    /// Relative unix path, unique within a session
    pub filename: String,
    /// BLAKE3 hex digest of the content
    pub checksum: String,
    pub size: u64,
    /// Modification time, unix seconds
    pub mtime: i64,
    /// Change time, unix seconds
    pub ctime: i64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl BlobInfo {
    pub fn new(filename: impl Into<String>, checksum: impl Into<String>, size: u64) -> Self {
        BlobInfo {
            filename: filename.into(),
            checksum: checksum.into(),
            size,
            mtime: 0,
            ctime: 0,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_times(mut self, mtime: i64, ctime: i64) -> Self {
        self.mtime = mtime;
        self.ctime = ctime;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Remove,
}

/// Bloblist entry that suppresses a file inherited from the base session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemovalMarker {
    pub filename: String,
    pub action: Action,
}

/// One row of a session's own bloblist document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BloblistEntry {
    Removed(RemovalMarker),
    Present(BlobInfo),
}

impl BloblistEntry {
    pub fn removal(filename: impl Into<String>) -> Self {
        BloblistEntry::Removed(RemovalMarker {
            filename: filename.into(),
            action: Action::Remove,
        })
    }

    pub fn filename(&self) -> &str {
        match self {
            BloblistEntry::Removed(m) => &m.filename,
            BloblistEntry::Present(b) => &b.filename,
        }
    }

    pub fn is_removal(&self) -> bool {
        matches!(self, BloblistEntry::Removed(_))
    }
}

/// A plan for reconstructing a blob from slices of other blobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub method: String,
    pub checksum: String,
    pub size: u64,
    pub pieces: Vec<Piece>,
}

impl Recipe {
    /// The only reconstruction method understood by the reader.
    pub const CONCAT: &'static str = "concat";

    pub fn concat(checksum: impl Into<String>, size: u64, pieces: Vec<Piece>) -> Self {
        Recipe {
            method: Self::CONCAT.to_string(),
            checksum: checksum.into(),
            size,
            pieces,
        }
    }

    /// Sum of all piece sizes, repeats included. `None` if it overflows a u64.
    pub fn pieces_size(&self) -> Option<u64> {
        self.pieces
            .iter()
            .try_fold(0u64, |total, p| total.checked_add(p.size.checked_mul(p.repeat)?))
    }
}

/// One slice of a source blob inside a recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piece {
    /// Checksum of the raw source blob
    pub source: String,
    pub offset: u64,
    pub size: u64,
    #[serde(default = "default_repeat")]
    pub repeat: u64,
}

fn default_repeat() -> u64 {
    1
}

impl Piece {
    pub fn new(source: impl Into<String>, offset: u64, size: u64) -> Self {
        Piece {
            source: source.into(),
            offset,
            size,
            repeat: 1,
        }
    }

    pub fn repeated(mut self, repeat: u64) -> Self {
        self.repeat = repeat;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bloblist_entry_parses_both_shapes() {
        let json = r#"[
            {"filename": "a.txt", "checksum": "00", "size": 3, "mtime": 10, "ctime": 11, "owner": "mats"},
            {"filename": "b.txt", "action": "remove"}
        ]"#;
        let entries: Vec<BloblistEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries.len(), 2);

        match &entries[0] {
            BloblistEntry::Present(info) => {
                assert_eq!(info.filename, "a.txt");
                assert_eq!(info.size, 3);
                assert_eq!(info.extra.get("owner").unwrap(), "mats");
            }
            other => panic!("expected blob entry, got {other:?}"),
        }
        assert!(entries[1].is_removal());
        assert_eq!(entries[1].filename(), "b.txt");
    }

    #[test]
    fn extension_keys_survive_a_rewrite() {
        let mut info = BlobInfo::new("x/y.bin", "ab", 9).with_times(1, 2);
        info.extra.insert("tag".into(), serde_json::json!({"k": [1, 2]}));
        let text = serde_json::to_string(&BloblistEntry::Present(info.clone())).unwrap();
        let back: BloblistEntry = serde_json::from_str(&text).unwrap();
        assert_eq!(back, BloblistEntry::Present(info));
    }

    #[test]
    fn removal_serializes_with_action() {
        let text = serde_json::to_string(&BloblistEntry::removal("gone.txt")).unwrap();
        assert_eq!(text, r#"{"filename":"gone.txt","action":"remove"}"#);
    }

    #[test]
    fn recipe_document_shape() {
        let json = r#"{"method": "concat", "checksum": "cc", "size": 8,
                       "pieces": [{"source": "aa", "offset": 0, "size": 2, "repeat": 3},
                                  {"source": "bb", "offset": 4, "size": 2}]}"#;
        let recipe: Recipe = serde_json::from_str(json).unwrap();
        assert_eq!(recipe.pieces[1].repeat, 1);
        assert_eq!(recipe.pieces_size(), Some(8));
    }

    #[test]
    fn overflowing_piece_sizes_have_no_total() {
        let recipe = Recipe::concat(
            "cc",
            u64::MAX,
            vec![Piece::new("aa", 0, 2).repeated(u64::MAX / 2 + 1)],
        );
        assert_eq!(recipe.pieces_size(), None);

        let recipe = Recipe::concat(
            "cc",
            u64::MAX,
            vec![Piece::new("aa", 0, u64::MAX), Piece::new("bb", 0, 1)],
        );
        assert_eq!(recipe.pieces_size(), None);
    }

    #[test]
    fn negative_recipe_size_is_rejected() {
        let json = r#"{"method": "concat", "checksum": "cc", "size": -1, "pieces": []}"#;
        assert!(serde_json::from_str::<Recipe>(json).is_err());
    }
}
