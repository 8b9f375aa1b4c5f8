pub mod config;
pub mod error;
pub mod types;

pub use config::CairnConfig;
pub use error::{CairnError, CairnResult, Severity};
pub use types::{Action, BlobInfo, BloblistEntry, Piece, Recipe, RemovalMarker, SessionId, SessionInfo};
