//! Repository store and commit protocol.
//!
//! On-disk layout:
//! ```text
//! <root>/
//!   repo_uuid                      stable repository identifier
//!   recovery.txt                   plain-text description of this layout
//!   cairn.toml                     optional configuration
//!   blobs/<aa>/<checksum>          raw blobs, sharded by the first two hex chars
//!   recipes/<aa>/<checksum>.recipe blobs reconstructed from slices of raw blobs
//!   sessions/<id>/                 one directory per consolidated session
//!   queue/queued_session/          the single queue slot
//!   tmp/tmp_<uuid>/                private staging directories
//!   derived/blocks/                block location index (rebuildable)
//! ```
//!
//! A commit is staged in a private tmp directory, then renamed into the queue
//! slot. That rename is the commit point. `process_queue` verifies the slot,
//! moves its blobs and recipes into the pool and renames the slot to
//! `sessions/<next id>`. Opening a repository always finishes a queued commit.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::Context;
use cairn_chunks::{hash_file, hash_reader, hash_to_hex, is_checksum};
use cairn_core::{BloblistEntry, CairnConfig, CairnError, CairnResult, Recipe, SessionId};
use cairn_dedup::{BlockLocationIndex, DedupPolicy};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::recipe::RecipeReader;
use crate::session::{self, SessionReader, SessionWriter};

const BLOBS_DIR: &str = "blobs";
const RECIPES_DIR: &str = "recipes";
const SESSIONS_DIR: &str = "sessions";
const QUEUE_DIR: &str = "queue";
const TMP_DIR: &str = "tmp";
const DERIVED_DIR: &str = "derived";
const QUEUE_SLOT: &str = "queued_session";
const REPO_UUID_FILE: &str = "repo_uuid";
const RECOVERY_FILE: &str = "recovery.txt";
const CONFIG_FILE: &str = "cairn.toml";
pub(crate) const RECIPE_SUFFIX: &str = ".recipe";

const REQUIRED_DIRS: [&str; 5] = [BLOBS_DIR, RECIPES_DIR, SESSIONS_DIR, QUEUE_DIR, TMP_DIR];

const RECOVERY_TEXT: &str = "\
This directory is a cairn repository.

Every stored file is a blob named by the BLAKE3 checksum (64 lowercase hex
characters) of its contents:

  blobs/<first two chars>/<checksum>

Some blobs are stored as recipes instead, JSON documents of the form

  {\"method\": \"concat\", \"checksum\": ..., \"size\": ...,
   \"pieces\": [{\"source\": ..., \"offset\": ..., \"size\": ..., \"repeat\": ...}]}

  recipes/<first two chars>/<checksum>.recipe

To rebuild such a blob, append `size` bytes read from blob `source` at byte
`offset`, `repeat` times, for every piece in order.

Snapshots live in sessions/<number>/. bloblist.json lists the files added or
removed by that session; session.json names the session it builds on
(base_session). To list a session's files, start from the oldest base and
apply each later bloblist in order: entries replace files with the same
filename, entries with \"action\": \"remove\" delete them.

queue/ and tmp/ hold commits in progress and may be ignored.
";

/// Handle on a repository directory.
#[derive(Debug)]
pub struct Repository {
    root: PathBuf,
    config: CairnConfig,
    repo_id: Option<String>,
}

/// Counts of everything `verify_all` checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub sessions: usize,
    pub raw_blobs: usize,
    pub recipes: usize,
}

impl Repository {
    /// Create an empty repository at `path` and open it.
    ///
    /// `path` may be missing or an empty directory.
    pub fn create(path: &Path) -> CairnResult<Self> {
        if path.exists() {
            let mut entries = fs::read_dir(path)?;
            if entries.next().is_some() {
                return Err(CairnError::input(format!(
                    "cannot create repository: {} is not empty",
                    path.display()
                )));
            }
        }
        fs::create_dir_all(path)?;
        for dir in REQUIRED_DIRS {
            fs::create_dir(path.join(dir))?;
        }
        fs::write(path.join(RECOVERY_FILE), RECOVERY_TEXT)?;
        fs::write(path.join(REPO_UUID_FILE), uuid::Uuid::new_v4().to_string())?;
        info!(path = %path.display(), "created repository");
        Self::open(path)
    }

    /// Open an existing repository, finishing any queued commit first.
    pub fn open(path: &Path) -> CairnResult<Self> {
        for dir in REQUIRED_DIRS {
            if !path.join(dir).is_dir() {
                return Err(CairnError::input(format!(
                    "{} is not a repository (missing {dir}/)",
                    path.display()
                )));
            }
        }
        let config = CairnConfig::load_or_default(&path.join(CONFIG_FILE))?;
        let repo_id = match fs::read_to_string(path.join(REPO_UUID_FILE)) {
            Ok(text) => Some(text.trim().to_string()).filter(|s| !s.is_empty()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let repo = Repository {
            root: path.to_path_buf(),
            config,
            repo_id,
        };
        repo.process_queue()?;
        debug!(path = %path.display(), repo_id = ?repo.repo_id, "opened repository");
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &CairnConfig {
        &self.config
    }

    /// Stable identifier, `None` for repositories without a `repo_uuid` file.
    pub fn repo_id(&self) -> Option<&str> {
        self.repo_id.as_deref()
    }

    pub fn dedup_policy(&self) -> DedupPolicy {
        DedupPolicy::from(&self.config.dedup)
    }

    // ── paths ────────────────────────────────────────────────────────────────

    pub(crate) fn raw_blob_path(&self, checksum: &str) -> PathBuf {
        self.root
            .join(BLOBS_DIR)
            .join(&checksum[..2])
            .join(checksum)
    }

    pub(crate) fn recipe_path(&self, checksum: &str) -> PathBuf {
        self.root
            .join(RECIPES_DIR)
            .join(&checksum[..2])
            .join(format!("{checksum}{RECIPE_SUFFIX}"))
    }

    pub(crate) fn session_dir(&self, id: SessionId) -> PathBuf {
        self.root.join(SESSIONS_DIR).join(id.to_string())
    }

    pub(crate) fn queue_slot(&self) -> PathBuf {
        self.root.join(QUEUE_DIR).join(QUEUE_SLOT)
    }

    pub(crate) fn new_staging_dir(&self) -> CairnResult<PathBuf> {
        let dir = self
            .root
            .join(TMP_DIR)
            .join(format!("tmp_{}", uuid::Uuid::new_v4()));
        fs::create_dir(&dir)?;
        Ok(dir)
    }

    // ── blobs ────────────────────────────────────────────────────────────────

    pub fn has_raw_blob(&self, checksum: &str) -> bool {
        is_checksum(checksum) && self.raw_blob_path(checksum).is_file()
    }

    pub fn has_recipe(&self, checksum: &str) -> bool {
        is_checksum(checksum) && self.recipe_path(checksum).is_file()
    }

    /// True if the blob is stored raw or as a recipe.
    pub fn has_blob(&self, checksum: &str) -> bool {
        self.has_raw_blob(checksum) || self.has_recipe(checksum)
    }

    pub fn get_recipe(&self, checksum: &str) -> CairnResult<Option<Recipe>> {
        check_checksum(checksum)?;
        let path = self.recipe_path(checksum);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(parse_recipe(&bytes, &path)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_blob_size(&self, checksum: &str) -> CairnResult<u64> {
        check_checksum(checksum)?;
        let raw = self.raw_blob_path(checksum);
        if raw.is_file() {
            return Ok(fs::metadata(raw)?.len());
        }
        match self.get_recipe(checksum)? {
            Some(recipe) => Ok(recipe.size),
            None => Err(no_such_blob(checksum)),
        }
    }

    /// Reader over `size` bytes of a blob starting at `offset`.
    ///
    /// `size: None` reads to the end of the blob.
    pub fn get_blob_reader(&self, checksum: &str, offset: u64, size: Option<u64>) -> CairnResult<BlobReader> {
        check_checksum(checksum)?;
        let raw = self.raw_blob_path(checksum);
        if raw.is_file() {
            let mut file = File::open(&raw)?;
            let len = file.metadata()?.len();
            let size = check_window(offset, size, len)?;
            file.seek(SeekFrom::Start(offset))?;
            return Ok(BlobReader::Raw(file.take(size)));
        }
        match self.get_recipe(checksum)? {
            Some(recipe) => Ok(BlobReader::Recipe(RecipeReader::new(
                &recipe, self, None, offset, size,
            )?)),
            None => Err(no_such_blob(checksum)),
        }
    }

    pub fn read_blob(&self, checksum: &str) -> CairnResult<Vec<u8>> {
        let mut reader = self.get_blob_reader(checksum, 0, None)?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Every raw blob in the pool, sorted.
    pub fn raw_blob_ids(&self) -> CairnResult<Vec<String>> {
        self.list_pool(BLOBS_DIR, "")
    }

    /// Every stored recipe, sorted.
    pub fn recipe_ids(&self) -> CairnResult<Vec<String>> {
        self.list_pool(RECIPES_DIR, RECIPE_SUFFIX)
    }

    fn list_pool(&self, dir: &str, suffix: &str) -> CairnResult<Vec<String>> {
        let mut ids = Vec::new();
        for shard in fs::read_dir(self.root.join(dir))? {
            let shard = shard?;
            let prefix = shard.file_name().to_string_lossy().into_owned();
            for entry in fs::read_dir(shard.path())? {
                let name = entry?.file_name().to_string_lossy().into_owned();
                let id = name.strip_suffix(suffix).unwrap_or(&name);
                if !is_checksum(id) || !id.starts_with(&prefix) || !name.ends_with(suffix) {
                    return Err(CairnError::hard(format!("unexpected file {dir}/{prefix}/{name}")));
                }
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    // ── sessions ─────────────────────────────────────────────────────────────

    /// Ids of all consolidated sessions, ascending.
    pub fn session_ids(&self) -> CairnResult<Vec<SessionId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join(SESSIONS_DIR))? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            let id = name
                .parse::<SessionId>()
                .map_err(|_| CairnError::hard(format!("unexpected entry sessions/{name}")))?;
            ids.push(id);
        }
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn next_session_id(&self) -> CairnResult<SessionId> {
        Ok(self.session_ids()?.last().map_or(1, |id| id + 1))
    }

    pub fn has_session(&self, id: SessionId) -> bool {
        self.session_dir(id).is_dir()
    }

    /// Load and verify a session.
    pub fn session(&self, id: SessionId) -> CairnResult<SessionReader> {
        SessionReader::load(self, id)
    }

    /// Start a new session, optionally as a delta against `base`.
    pub fn create_session(&self, base: Option<SessionId>) -> CairnResult<SessionWriter<'_>> {
        SessionWriter::new(self, base)
    }

    /// Stored fingerprint of a session, read from its metadata only.
    pub fn session_fingerprint(&self, id: SessionId) -> CairnResult<String> {
        let dir = self.session_dir(id);
        if !dir.is_dir() {
            return Err(CairnError::SessionNotFound(id));
        }
        Ok(session::read_meta(&dir)?.fingerprint)
    }

    // ── commit protocol ──────────────────────────────────────────────────────

    /// Consolidate the queued commit, if any, into a new session.
    ///
    /// Returns the id of the consolidated session. Any integrity failure is
    /// hard corruption and leaves the queue slot untouched.
    pub fn process_queue(&self) -> CairnResult<Option<SessionId>> {
        let slot = self.queue_slot();
        if !slot.is_dir() {
            return Ok(None);
        }
        debug!(slot = %slot.display(), "processing queued session");

        let mut blobs = Vec::new();
        let mut recipes = Vec::new();
        let mut names = BTreeSet::new();
        for entry in fs::read_dir(&slot)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if is_checksum(&name) {
                blobs.push(name);
            } else if let Some(sum) = name.strip_suffix(RECIPE_SUFFIX).filter(|s| is_checksum(s)) {
                recipes.push(sum.to_string());
            } else {
                names.insert(name);
            }
        }

        for sum in &blobs {
            let actual = hash_to_hex(&hash_file(&slot.join(sum))?);
            if &actual != sum {
                return Err(CairnError::hard(format!(
                    "queued blob {sum} has checksum {actual}"
                )));
            }
        }

        for sum in &recipes {
            let path = slot.join(format!("{sum}{RECIPE_SUFFIX}"));
            let recipe = parse_recipe(&fs::read(&path)?, &path)?;
            if &recipe.checksum != sum {
                return Err(CairnError::hard(format!(
                    "queued recipe {sum} declares checksum {}",
                    recipe.checksum
                )));
            }
            self.verify_recipe_content(&recipe, Some(&slot))?;
        }

        let meta = session::check_session_dir(&slot, &names)?;
        let own = session::read_bloblist(&slot)?;
        for entry in own.iter().filter_map(|e| match e {
            BloblistEntry::Present(info) => Some(info),
            BloblistEntry::Removed(_) => None,
        }) {
            let sum = &entry.checksum;
            let staged = blobs.contains(sum) || recipes.contains(sum);
            if !staged && !self.has_blob(sum) {
                return Err(CairnError::hard(format!(
                    "queued session lists {} with missing blob {sum}",
                    entry.filename
                )));
            }
        }

        for sum in &blobs {
            self.promote(&slot.join(sum), &self.raw_blob_path(sum))?;
        }
        for sum in &recipes {
            let staged = slot.join(format!("{sum}{RECIPE_SUFFIX}"));
            self.promote(&staged, &self.recipe_path(sum))?;
        }

        let id = self.next_session_id()?;
        fs::rename(&slot, self.session_dir(id))?;
        info!(
            session = id,
            base = ?meta.base_session,
            blobs = blobs.len(),
            recipes = recipes.len(),
            "consolidated session"
        );
        Ok(Some(id))
    }

    /// Move a staged file into the pool, dropping it if the pool already has it.
    fn promote(&self, staged: &Path, target: &Path) -> CairnResult<()> {
        if target.exists() {
            fs::remove_file(staged)?;
            return Ok(());
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(staged, target)
            .with_context(|| format!("promoting {} to {}", staged.display(), target.display()))?;
        Ok(())
    }

    // ── verification ─────────────────────────────────────────────────────────

    /// Re-hash one blob, raw or recipe.
    pub fn verify_blob(&self, checksum: &str) -> CairnResult<()> {
        check_checksum(checksum)?;
        if self.raw_blob_path(checksum).is_file() {
            return self.verify_raw_blob(checksum);
        }
        match self.get_recipe(checksum)? {
            Some(recipe) => self.verify_recipe_content(&recipe, None),
            None => Err(no_such_blob(checksum)),
        }
    }

    /// Check every session, raw blob and recipe in the repository.
    pub fn verify_all(&self) -> CairnResult<VerifyReport> {
        let ids = self.session_ids()?;
        for (expected, id) in (1..).zip(&ids) {
            if *id != expected {
                return Err(CairnError::hard(format!(
                    "session ids are not dense: found {id} where {expected} was expected"
                )));
            }
        }
        for &id in &ids {
            let session = self.session(id)?;
            for entry in session.bloblist() {
                if !self.has_blob(&entry.checksum) {
                    return Err(CairnError::hard(format!(
                        "session {id} lists {} with missing blob {}",
                        entry.filename, entry.checksum
                    )));
                }
            }
        }

        let raw = self.raw_blob_ids()?;
        raw.par_iter().try_for_each(|sum| self.verify_raw_blob(sum))?;

        let recipes = self.recipe_ids()?;
        for sum in &recipes {
            self.verify_blob(sum)?;
        }

        let report = VerifyReport {
            sessions: ids.len(),
            raw_blobs: raw.len(),
            recipes: recipes.len(),
        };
        info!(?report, "repository verified");
        Ok(report)
    }

    fn verify_raw_blob(&self, checksum: &str) -> CairnResult<()> {
        let actual = hash_to_hex(&hash_file(&self.raw_blob_path(checksum))?);
        if actual != checksum {
            return Err(CairnError::hard(format!(
                "blob {checksum} has checksum {actual}"
            )));
        }
        Ok(())
    }

    pub(crate) fn verify_recipe_content(&self, recipe: &Recipe, local: Option<&Path>) -> CairnResult<()> {
        let reader = RecipeReader::new(recipe, self, local, 0, None)?;
        let actual = hash_to_hex(&hash_reader(reader)?);
        if actual != recipe.checksum {
            return Err(CairnError::hard(format!(
                "recipe {} reconstructs to checksum {actual}",
                recipe.checksum
            )));
        }
        Ok(())
    }

    // ── maintenance ──────────────────────────────────────────────────────────

    /// Raw blobs referenced by no session and no recipe, sorted.
    pub fn find_orphan_blobs(&self) -> CairnResult<Vec<String>> {
        let mut referenced = BTreeSet::new();
        for id in self.session_ids()? {
            for entry in self.session(id)?.own_entries() {
                if let BloblistEntry::Present(info) = entry {
                    referenced.insert(info.checksum.clone());
                }
            }
        }
        for sum in self.recipe_ids()? {
            if let Some(recipe) = self.get_recipe(&sum)? {
                referenced.extend(recipe.pieces.into_iter().map(|p| p.source));
            }
        }
        Ok(self
            .raw_blob_ids()?
            .into_iter()
            .filter(|sum| !referenced.contains(sum))
            .collect())
    }

    /// Delete orphaned raw blobs. Must not run while a writer is staging.
    pub fn remove_orphan_blobs(&self) -> CairnResult<usize> {
        let orphans = self.find_orphan_blobs()?;
        for sum in &orphans {
            fs::remove_file(self.raw_blob_path(sum))?;
        }
        info!(removed = orphans.len(), "removed orphan blobs");
        Ok(orphans.len())
    }

    /// Remove staging directories left behind by crashed writers.
    ///
    /// Must not run while a writer is staging.
    pub fn clean_tmp(&self) -> CairnResult<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(self.root.join(TMP_DIR))? {
            let path = entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
            removed += 1;
        }
        if removed > 0 {
            warn!(removed, "removed stale staging directories");
        }
        Ok(removed)
    }

    // ── block index ──────────────────────────────────────────────────────────

    /// Open the block location index kept under `derived/`.
    pub fn open_block_index(&self) -> CairnResult<BlockLocationIndex> {
        let dir = self.root.join(DERIVED_DIR);
        fs::create_dir_all(&dir)?;
        BlockLocationIndex::open(&dir.join("blocks"), self.config.dedup.block_size)
    }

    /// Index every raw blob in the pool in one transaction.
    pub fn reindex(&self, index: &mut BlockLocationIndex) -> CairnResult<usize> {
        let ids = self.raw_blob_ids()?;
        index.begin()?;
        for sum in &ids {
            let data = match fs::read(self.raw_blob_path(sum)) {
                Ok(data) => data,
                Err(e) => {
                    index.rollback();
                    return Err(e.into());
                }
            };
            if let Err(e) = index.index_blob(sum, &data) {
                index.rollback();
                return Err(e);
            }
        }
        index.commit()?;
        info!(blobs = ids.len(), "reindexed raw blobs");
        Ok(ids.len())
    }
}

/// Byte reader over a raw blob window or a reconstructed recipe.
pub enum BlobReader {
    Raw(io::Take<File>),
    Recipe(RecipeReader),
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BlobReader::Raw(r) => r.read(buf),
            BlobReader::Recipe(r) => r.read(buf),
        }
    }
}

/// Resolve `(offset, size)` against a blob of `len` bytes.
pub(crate) fn check_window(offset: u64, size: Option<u64>, len: u64) -> CairnResult<u64> {
    if offset > len {
        return Err(CairnError::input(format!(
            "offset {offset} is past the end of a {len} byte blob"
        )));
    }
    let size = size.unwrap_or(len - offset);
    if size > len - offset {
        return Err(CairnError::input(format!(
            "range {offset}+{size} is past the end of a {len} byte blob"
        )));
    }
    Ok(size)
}

fn parse_recipe(bytes: &[u8], path: &Path) -> CairnResult<Recipe> {
    serde_json::from_slice(bytes)
        .map_err(|e| CairnError::hard(format!("unreadable recipe {}: {e}", path.display())))
}

fn check_checksum(checksum: &str) -> CairnResult<()> {
    if is_checksum(checksum) {
        Ok(())
    } else {
        Err(CairnError::input(format!("invalid checksum '{checksum}'")))
    }
}

fn no_such_blob(checksum: &str) -> CairnError {
    CairnError::input(format!("no such blob {checksum}"))
}
