//! Random-access reads over a recipe.
//!
//! A recipe describes a blob as the concatenation of slices of raw blobs. A
//! piece with a `repeat` count stands for that many back-to-back occurrences;
//! the reader tags each piece with where its first occurrence starts inside
//! the reconstructed blob and derives the occurrence under the cursor from
//! that, so repeat counts cost nothing up front. Reads are served from a
//! window `[offset, offset + size)` without materializing the blob.
//!
//! Pieces are searched forward from the last one read, so sequential reads
//! are amortized O(1). At most one source file is open at a time.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use cairn_chunks::is_checksum;
use cairn_core::{CairnError, CairnResult, Recipe};

use crate::repository::{check_window, Repository};

#[derive(Debug, Clone)]
struct ExpandedPiece {
    source: String,
    offset: u64,
    size: u64,
    repeat: u64,
    /// Start of the first occurrence inside the reconstructed blob
    position_in_recipe: u64,
}

impl ExpandedPiece {
    /// End of the last occurrence. Cannot overflow once the total is checked.
    fn end(&self) -> u64 {
        self.position_in_recipe + self.size * self.repeat
    }
}

pub struct RecipeReader {
    checksum: String,
    size: u64,
    pieces: Vec<ExpandedPiece>,
    sources: HashMap<String, PathBuf>,
    /// Absolute position inside the reconstructed blob
    pos: u64,
    end: u64,
    start: u64,
    current: usize,
    open: Option<(String, File)>,
}

impl RecipeReader {
    /// Validate `recipe` and prepare to read `size` bytes starting at `offset`.
    ///
    /// Source blobs are looked up in `local` first, then in the repository
    /// pool, so a recipe can be read before its sources are consolidated.
    pub fn new(
        recipe: &Recipe,
        repo: &Repository,
        local: Option<&Path>,
        offset: u64,
        size: Option<u64>,
    ) -> CairnResult<Self> {
        if recipe.method != Recipe::CONCAT {
            return Err(CairnError::input(format!(
                "unsupported recipe method '{}'",
                recipe.method
            )));
        }
        if !is_checksum(&recipe.checksum) {
            return Err(CairnError::input(format!(
                "recipe declares invalid checksum '{}'",
                recipe.checksum
            )));
        }
        if let Some(bad) = recipe.pieces.iter().find(|p| !is_checksum(&p.source)) {
            return Err(CairnError::input(format!(
                "recipe {} has a piece with invalid source '{}'",
                recipe.checksum, bad.source
            )));
        }
        let total = recipe.pieces_size().ok_or_else(|| {
            CairnError::hard(format!(
                "recipe {} has piece sizes that overflow",
                recipe.checksum
            ))
        })?;
        if total != recipe.size {
            return Err(CairnError::hard(format!(
                "recipe {} declares {} bytes but its pieces add up to {total}",
                recipe.checksum, recipe.size
            )));
        }

        let mut sources = HashMap::new();
        for piece in &recipe.pieces {
            if !sources.contains_key(&piece.source) {
                let path = locate_source(&piece.source, repo, local).ok_or_else(|| {
                    CairnError::hard(format!(
                        "recipe {} needs missing blob {}",
                        recipe.checksum, piece.source
                    ))
                })?;
                sources.insert(piece.source.clone(), path);
            }
            let len = std::fs::metadata(&sources[&piece.source])?.len();
            if piece.offset.checked_add(piece.size).is_none_or(|end| end > len) {
                return Err(CairnError::hard(format!(
                    "recipe {} reads {}+{} past the end of {} ({len} bytes)",
                    recipe.checksum, piece.offset, piece.size, piece.source
                )));
            }
        }

        let mut pieces = Vec::new();
        let mut position = 0u64;
        for piece in recipe.pieces.iter().filter(|p| p.size > 0 && p.repeat > 0) {
            let expanded = ExpandedPiece {
                source: piece.source.clone(),
                offset: piece.offset,
                size: piece.size,
                repeat: piece.repeat,
                position_in_recipe: position,
            };
            position = expanded.end();
            pieces.push(expanded);
        }

        let size = check_window(offset, size, recipe.size)?;
        Ok(RecipeReader {
            checksum: recipe.checksum.clone(),
            size: recipe.size,
            pieces,
            sources,
            pos: offset,
            end: offset + size,
            start: offset,
            current: 0,
            open: None,
        })
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Size of the whole reconstructed blob, not just the window.
    pub fn blob_size(&self) -> u64 {
        self.size
    }

    /// Bytes read so far within the window.
    pub fn position(&self) -> u64 {
        self.pos - self.start
    }

    pub fn remaining(&self) -> u64 {
        self.end - self.pos
    }

    /// Read up to `n` bytes, or everything left in the window for `None`.
    ///
    /// Returns fewer bytes only at the end of the window.
    pub fn read_bytes(&mut self, n: Option<usize>) -> CairnResult<Vec<u8>> {
        let want = n.map_or(self.remaining(), |n| (n as u64).min(self.remaining())) as usize;
        let mut out = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            let got = self.read_piece(&mut out[filled..])?;
            if got == 0 {
                break;
            }
            filled += got;
        }
        out.truncate(filled);
        Ok(out)
    }

    /// Copy bytes from the piece under the cursor. Never crosses a piece boundary.
    fn read_piece(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.end || buf.is_empty() {
            return Ok(0);
        }
        while self.current < self.pieces.len() {
            let p = &self.pieces[self.current];
            if self.pos < p.end() {
                break;
            }
            self.current += 1;
        }
        let piece = self.pieces.get(self.current).ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "recipe cursor past the last piece")
        })?;

        let within = (self.pos - piece.position_in_recipe) % piece.size;
        let n = (piece.size - within)
            .min(self.end - self.pos)
            .min(buf.len() as u64) as usize;

        let reopen = match &self.open {
            Some((source, _)) => *source != piece.source,
            None => true,
        };
        if reopen {
            // dropping the previous handle closes it
            let file = File::open(&self.sources[&piece.source])?;
            self.open = Some((piece.source.clone(), file));
        }
        if let Some((_, file)) = self.open.as_mut() {
            file.seek(SeekFrom::Start(piece.offset + within))?;
            file.read_exact(&mut buf[..n])?;
        }
        self.pos += n as u64;
        Ok(n)
    }
}

impl Read for RecipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_piece(buf)
    }
}

fn locate_source(checksum: &str, repo: &Repository, local: Option<&Path>) -> Option<PathBuf> {
    if let Some(dir) = local {
        let staged = dir.join(checksum);
        if staged.is_file() {
            return Some(staged);
        }
    }
    let pooled = repo.raw_blob_path(checksum);
    pooled.is_file().then_some(pooled)
}
