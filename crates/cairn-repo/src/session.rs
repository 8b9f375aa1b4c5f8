//! Session writer and reader.
//!
//! A session directory holds exactly:
//! ```text
//! bloblist.json          this session's own entries (blobs and removal markers)
//! info.json              free-form client data
//! session.json           {"base_session": <id or null>, "fingerprint": <hex>}
//! session.checksums      "<blake3> *<name>" for the three documents above
//! <fingerprint>.fingerprint
//! ```
//! A session's resolved bloblist is its base session's resolved bloblist with
//! this session's entries applied on top. The fingerprint covers the resolved
//! list and is checked on every load.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use cairn_chunks::{hash_file, hash_to_hex, hex_digest, is_checksum};
use cairn_core::{
    BlobInfo, BloblistEntry, CairnError, CairnResult, Recipe, SessionId, SessionInfo,
};
use cairn_dedup::{plan, BlockLocationIndex, DedupPolicy, PlanPiece};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::repository::{Repository, RECIPE_SUFFIX};

pub const BLOBLIST_FILE: &str = "bloblist.json";
pub const INFO_FILE: &str = "info.json";
pub const META_FILE: &str = "session.json";
pub const CHECKSUMS_FILE: &str = "session.checksums";
const FINGERPRINT_SUFFIX: &str = ".fingerprint";
const FINGERPRINT_SEPARATOR: &[u8] = b"!SEPARATOR!";

const CHECKED_DOCS: [&str; 3] = [BLOBLIST_FILE, INFO_FILE, META_FILE];

/// Contents of `session.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub base_session: Option<SessionId>,
    pub fingerprint: String,
}

/// Digest over resolved `(filename, checksum)` pairs, independent of their order.
pub fn fingerprint<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut pairs: Vec<(&str, &str)> = pairs.into_iter().collect();
    pairs.sort_unstable();
    let mut buf = Vec::new();
    for (filename, checksum) in pairs {
        buf.extend_from_slice(filename.as_bytes());
        buf.extend_from_slice(FINGERPRINT_SEPARATOR);
        buf.extend_from_slice(checksum.as_bytes());
        buf.extend_from_slice(FINGERPRINT_SEPARATOR);
    }
    hex_digest(&buf)
}

/// Reject filenames that are not plain relative unix paths.
pub fn normalize_filename(filename: &str) -> CairnResult<&str> {
    let bad = |why: &str| Err(CairnError::input(format!("filename '{filename}' {why}")));
    if filename.is_empty() {
        return bad("is empty");
    }
    if filename.contains('\\') {
        return bad("contains a backslash");
    }
    if filename.starts_with('/') || filename.ends_with('/') {
        return bad("has a leading or trailing slash");
    }
    if filename.contains("//") {
        return bad("contains an empty path component");
    }
    if filename.split('/').any(|c| c == "." || c == "..") {
        return bad("contains a relative path component");
    }
    Ok(filename)
}

// ── session directory documents ──────────────────────────────────────────────

fn read_doc(dir: &Path, name: &str) -> CairnResult<Vec<u8>> {
    match fs::read(dir.join(name)) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CairnError::hard(format!(
            "{} is missing {name}",
            dir.display()
        ))),
        Err(e) => Err(e.into()),
    }
}

fn parse_doc<T: serde::de::DeserializeOwned>(dir: &Path, name: &str) -> CairnResult<T> {
    let bytes = read_doc(dir, name)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| CairnError::hard(format!("unreadable {name} in {}: {e}", dir.display())))
}

pub(crate) fn read_meta(dir: &Path) -> CairnResult<SessionMeta> {
    parse_doc(dir, META_FILE)
}

/// Read a bloblist document, rejecting one that names a file twice.
pub(crate) fn read_bloblist(dir: &Path) -> CairnResult<Vec<BloblistEntry>> {
    let own: Vec<BloblistEntry> = parse_doc(dir, BLOBLIST_FILE)?;
    let mut filenames = HashSet::new();
    for entry in &own {
        if !filenames.insert(entry.filename()) {
            return Err(CairnError::hard(format!(
                "{} lists {} twice",
                dir.display(),
                entry.filename()
            )));
        }
    }
    Ok(own)
}

fn expected_files(fingerprint: &str) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = CHECKED_DOCS.iter().map(|s| s.to_string()).collect();
    names.insert(CHECKSUMS_FILE.to_string());
    names.insert(format!("{fingerprint}{FINGERPRINT_SUFFIX}"));
    names
}

/// Check that `names` is exactly the session file set and the documents match
/// their recorded checksums.
pub(crate) fn check_session_dir(dir: &Path, names: &BTreeSet<String>) -> CairnResult<SessionMeta> {
    verify_checksums(dir)?;
    let meta = read_meta(dir)?;
    let expected = expected_files(&meta.fingerprint);
    if *names != expected {
        let extra: Vec<_> = names.difference(&expected).collect();
        let missing: Vec<_> = expected.difference(names).collect();
        return Err(CairnError::hard(format!(
            "{} has unexpected contents (extra {extra:?}, missing {missing:?})",
            dir.display()
        )));
    }
    Ok(meta)
}

fn verify_checksums(dir: &Path) -> CairnResult<()> {
    let text = String::from_utf8(read_doc(dir, CHECKSUMS_FILE)?)
        .map_err(|_| CairnError::hard(format!("{CHECKSUMS_FILE} in {} is not utf-8", dir.display())))?;
    let mut seen = BTreeSet::new();
    for line in text.lines().filter(|l| !l.is_empty()) {
        let (expected, name) = line.split_once(" *").ok_or_else(|| {
            CairnError::hard(format!("malformed line '{line}' in {CHECKSUMS_FILE}"))
        })?;
        let actual = hex_digest(&read_doc(dir, name)?);
        if actual != expected {
            return Err(CairnError::hard(format!(
                "{name} in {} has checksum {actual}, recorded {expected}",
                dir.display()
            )));
        }
        seen.insert(name.to_string());
    }
    let covered: BTreeSet<String> = CHECKED_DOCS.iter().map(|s| s.to_string()).collect();
    if seen != covered {
        return Err(CairnError::hard(format!(
            "{CHECKSUMS_FILE} in {} covers {seen:?}",
            dir.display()
        )));
    }
    Ok(())
}

fn load_dir(dir: &Path) -> CairnResult<(SessionMeta, SessionInfo, Vec<BloblistEntry>)> {
    let mut names = BTreeSet::new();
    for entry in fs::read_dir(dir)? {
        names.insert(entry?.file_name().to_string_lossy().into_owned());
    }
    let meta = check_session_dir(dir, &names)?;
    let info: SessionInfo = parse_doc(dir, INFO_FILE)?;
    let own = read_bloblist(dir)?;
    Ok((meta, info, own))
}

fn apply(resolved: &mut BTreeMap<String, BlobInfo>, entries: &[BloblistEntry]) {
    for entry in entries {
        match entry {
            BloblistEntry::Present(info) => {
                resolved.insert(info.filename.clone(), info.clone());
            }
            BloblistEntry::Removed(marker) => {
                resolved.remove(&marker.filename);
            }
        }
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> CairnResult<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|e| CairnError::Other(anyhow::anyhow!("serializing: {e}")))
}

// ── reader ───────────────────────────────────────────────────────────────────

/// A loaded, verified session.
#[derive(Debug, Clone)]
pub struct SessionReader {
    id: SessionId,
    meta: SessionMeta,
    info: SessionInfo,
    own: Vec<BloblistEntry>,
    resolved: BTreeMap<String, BlobInfo>,
}

impl SessionReader {
    /// Load session `id`, resolve it through its base chain and check its fingerprint.
    pub fn load(repo: &Repository, id: SessionId) -> CairnResult<Self> {
        let dir = repo.session_dir(id);
        if !dir.is_dir() {
            return Err(CairnError::SessionNotFound(id));
        }
        let (meta, info, own) = load_dir(&dir)?;

        let mut bases = Vec::new();
        let mut cursor = meta.base_session;
        let mut child = id;
        while let Some(base) = cursor {
            if base >= child {
                return Err(CairnError::hard(format!(
                    "session {child} builds on session {base}, which is not older"
                )));
            }
            let base_dir = repo.session_dir(base);
            if !base_dir.is_dir() {
                return Err(CairnError::hard(format!(
                    "session {child} builds on missing session {base}"
                )));
            }
            let (base_meta, _, entries) = load_dir(&base_dir)?;
            bases.push(entries);
            cursor = base_meta.base_session;
            child = base;
        }

        let mut resolved = BTreeMap::new();
        for entries in bases.iter().rev() {
            apply(&mut resolved, entries);
        }
        apply(&mut resolved, &own);

        let computed = fingerprint(
            resolved
                .values()
                .map(|b| (b.filename.as_str(), b.checksum.as_str())),
        );
        if computed != meta.fingerprint {
            return Err(CairnError::hard(format!(
                "session {id} fingerprint is {computed}, recorded {}",
                meta.fingerprint
            )));
        }

        debug!(session = id, files = resolved.len(), depth = bases.len(), "loaded session");
        Ok(SessionReader {
            id,
            meta,
            info,
            own,
            resolved,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn base_session(&self) -> Option<SessionId> {
        self.meta.base_session
    }

    pub fn fingerprint(&self) -> &str {
        &self.meta.fingerprint
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Entries written by this session alone, removal markers included.
    pub fn own_entries(&self) -> &[BloblistEntry] {
        &self.own
    }

    /// Resolved bloblist ordered by filename.
    pub fn bloblist(&self) -> Vec<BlobInfo> {
        self.resolved.values().cloned().collect()
    }

    pub fn get(&self, filename: &str) -> Option<&BlobInfo> {
        self.resolved.get(filename)
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

// ── writer ───────────────────────────────────────────────────────────────────

/// Builds one session in a private staging directory.
///
/// Nothing outside the staging directory changes until `queue`. Dropping an
/// unqueued writer deletes its staging directory.
pub struct SessionWriter<'a> {
    repo: &'a Repository,
    base: Option<SessionId>,
    base_entries: BTreeMap<String, BlobInfo>,
    staging: PathBuf,
    entries: BTreeMap<String, BloblistEntry>,
    staged_blobs: HashSet<String>,
    /// checksum → declared size
    staged_recipes: HashMap<String, u64>,
    finished: bool,
}

impl<'a> SessionWriter<'a> {
    pub(crate) fn new(repo: &'a Repository, base: Option<SessionId>) -> CairnResult<Self> {
        let base_entries = match base {
            Some(id) => repo.session(id)?.resolved,
            None => BTreeMap::new(),
        };
        let staging = repo.new_staging_dir()?;
        debug!(staging = %staging.display(), ?base, "started session");
        Ok(SessionWriter {
            repo,
            base,
            base_entries,
            staging,
            entries: BTreeMap::new(),
            staged_blobs: HashSet::new(),
            staged_recipes: HashMap::new(),
            finished: false,
        })
    }

    pub fn base_session(&self) -> Option<SessionId> {
        self.base
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    /// Add a file whose content is `data`. `info.checksum` must match it.
    pub fn add(&mut self, data: &[u8], info: BlobInfo) -> CairnResult<()> {
        self.check_open()?;
        self.check_content(data, &info)?;
        if !self.has_content(&info.checksum) {
            self.stage_blob(&info.checksum, data)?;
        }
        self.push_entry(info)
    }

    /// Stream a blob into staging, verifying it hashes to `checksum`.
    ///
    /// Returns the number of bytes written, 0 if the blob is already known.
    pub fn write_blob<R: Read>(&mut self, checksum: &str, mut reader: R) -> CairnResult<u64> {
        self.check_open()?;
        check_checksum(checksum)?;
        if self.has_content(checksum) {
            return Ok(0);
        }
        let path = self.staging.join(checksum);
        let written = (|| -> CairnResult<u64> {
            let mut file = File::create(&path)?;
            let n = io::copy(&mut reader, &mut file)?;
            file.sync_all()?;
            let actual = hash_to_hex(&hash_file(&path)?);
            if actual != checksum {
                return Err(CairnError::input(format!(
                    "data hashes to {actual}, not the claimed {checksum}"
                )));
            }
            Ok(n)
        })();
        match written {
            Ok(n) => {
                self.staged_blobs.insert(checksum.to_string());
                Ok(n)
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(&path) {
                    warn!(path = %path.display(), "failed to remove partial blob: {rm}");
                }
                Err(e)
            }
        }
    }

    /// Add a file whose content is already in the pool or already staged.
    pub fn add_info(&mut self, info: BlobInfo) -> CairnResult<()> {
        self.check_open()?;
        normalize_filename(&info.filename)?;
        check_checksum(&info.checksum)?;
        let size = if self.staged_blobs.contains(&info.checksum) {
            fs::metadata(self.staging.join(&info.checksum))?.len()
        } else if let Some(size) = self.staged_recipes.get(&info.checksum) {
            *size
        } else if self.repo.has_blob(&info.checksum) {
            self.repo.get_blob_size(&info.checksum)?
        } else {
            return Err(CairnError::input(format!(
                "blob {} is neither stored nor staged",
                info.checksum
            )));
        };
        if size != info.size {
            return Err(CairnError::input(format!(
                "{} claims {} bytes but blob {} has {size}",
                info.filename, info.size, info.checksum
            )));
        }
        self.push_entry(info)
    }

    /// Stage a recipe. Its sources must be raw blobs, stored or staged.
    ///
    /// The recipe is reconstructed once here; a recipe that does not rebuild
    /// its declared checksum is rejected.
    pub fn add_recipe(&mut self, recipe: Recipe) -> CairnResult<()> {
        self.check_open()?;
        check_checksum(&recipe.checksum)?;
        if self.has_content(&recipe.checksum) {
            return Ok(());
        }
        self.repo
            .verify_recipe_content(&recipe, Some(&self.staging))
            .map_err(|e| match e {
                CairnError::Corruption { message, .. } => CairnError::input(message),
                other => other,
            })?;
        let path = self
            .staging
            .join(format!("{}{RECIPE_SUFFIX}", recipe.checksum));
        write_synced(&path, &to_json(&recipe)?)?;
        self.staged_recipes.insert(recipe.checksum, recipe.size);
        Ok(())
    }

    /// Add a file, storing only the parts of `data` not already in the repository.
    ///
    /// Content matched through `index` is stored as a recipe over existing raw
    /// blobs plus one residue blob holding the unmatched bytes. Newly stored raw
    /// blobs are added to `index`. Falls back to a plain `add` when nothing
    /// usable matched.
    pub fn add_deduplicated(
        &mut self,
        data: &[u8],
        info: BlobInfo,
        index: &mut BlockLocationIndex,
        policy: DedupPolicy,
    ) -> CairnResult<()> {
        self.check_open()?;
        self.check_content(data, &info)?;
        if self.has_content(&info.checksum) {
            return self.push_entry(info);
        }

        let dedup_plan = plan(index, data, policy)?;
        let usable = dedup_plan.has_matches()
            && dedup_plan.pieces.iter().all(|p| match p {
                PlanPiece::Match { blob, .. } => self.has_raw(blob),
                PlanPiece::Original { .. } => true,
            });
        if !usable {
            self.stage_blob(&info.checksum, data)?;
            index_raw(index, &info.checksum, data)?;
            return self.push_entry(info);
        }

        let residue = dedup_plan.residue(data);
        let residue_sum = if residue.is_empty() {
            None
        } else {
            let sum = hex_digest(&residue);
            if !self.has_raw(&sum) {
                self.stage_blob(&sum, &residue)?;
                index_raw(index, &sum, &residue)?;
            }
            Some(sum)
        };
        let recipe = dedup_plan.to_recipe(&info.checksum, residue_sum.as_deref())?;
        debug!(
            filename = %info.filename,
            size = data.len(),
            matched = dedup_plan.matched_bytes(),
            residue = residue.len(),
            "stored as recipe"
        );
        self.add_recipe(recipe)?;
        self.push_entry(info)
    }

    /// Drop `filename`, inherited from the base session, from this session.
    pub fn remove(&mut self, filename: &str) -> CairnResult<()> {
        self.check_open()?;
        normalize_filename(filename)?;
        if self.base.is_none() {
            return Err(CairnError::input(format!(
                "cannot remove {filename}: session has no base"
            )));
        }
        if !self.base_entries.contains_key(filename) {
            return Err(CairnError::input(format!(
                "cannot remove {filename}: not in base session"
            )));
        }
        self.entries
            .insert(filename.to_string(), BloblistEntry::removal(filename));
        Ok(())
    }

    /// The bloblist this session will have once committed, ordered by filename.
    pub fn resolved_bloblist(&self) -> Vec<BlobInfo> {
        self.resolved().into_values().collect()
    }

    /// Write the session documents and move the staging directory into the
    /// queue slot. Fails with `CommitInProgress` if the slot is taken, in which
    /// case the writer stays usable.
    pub fn queue(&mut self, info: SessionInfo) -> CairnResult<()> {
        self.check_open()?;
        let fp = self.write_documents(&info)?;

        let slot = self.repo.queue_slot();
        if slot.exists() {
            return Err(CairnError::CommitInProgress);
        }
        match fs::rename(&self.staging, &slot) {
            Ok(()) => {}
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::AlreadyExists | io::ErrorKind::DirectoryNotEmpty
                ) =>
            {
                return Err(CairnError::CommitInProgress);
            }
            Err(e) => return Err(e.into()),
        }
        self.finished = true;
        info!(
            base = ?self.base,
            entries = self.entries.len(),
            fingerprint = %fp,
            "queued session"
        );
        Ok(())
    }

    /// Queue and consolidate. Returns the id of the new session.
    pub fn commit(&mut self, info: SessionInfo) -> CairnResult<SessionId> {
        self.queue(info)?;
        let fp = fingerprint(
            self.resolved()
                .values()
                .map(|b| (b.filename.as_str(), b.checksum.as_str())),
        );
        let marker = format!("{fp}{FINGERPRINT_SUFFIX}");
        if let Some(id) = self.repo.process_queue()? {
            if self.repo.session_dir(id).join(&marker).exists() {
                return Ok(id);
            }
        }
        // another process consolidated the slot first
        for id in self.repo.session_ids()?.into_iter().rev() {
            if self.repo.session_dir(id).join(&marker).exists() {
                return Ok(id);
            }
        }
        Err(CairnError::hard(format!(
            "queued session with fingerprint {fp} was not consolidated"
        )))
    }

    /// Abandon the session and delete its staging directory.
    pub fn cancel(mut self) -> CairnResult<()> {
        self.finished = true;
        fs::remove_dir_all(&self.staging)?;
        debug!(staging = %self.staging.display(), "cancelled session");
        Ok(())
    }

    fn write_documents(&self, info: &SessionInfo) -> CairnResult<String> {
        // a previous queue attempt may have left a marker for other contents
        for entry in fs::read_dir(&self.staging)? {
            let path = entry?.path();
            if path.to_string_lossy().ends_with(FINGERPRINT_SUFFIX) {
                fs::remove_file(&path)?;
            }
        }

        let resolved = self.resolved();
        let fp = fingerprint(
            resolved
                .values()
                .map(|b| (b.filename.as_str(), b.checksum.as_str())),
        );
        let own: Vec<&BloblistEntry> = self.entries.values().collect();
        let meta = SessionMeta {
            base_session: self.base,
            fingerprint: fp.clone(),
        };

        let mut checksums = String::new();
        for (name, bytes) in [
            (BLOBLIST_FILE, to_json(&own)?),
            (INFO_FILE, to_json(info)?),
            (META_FILE, to_json(&meta)?),
        ] {
            write_synced(&self.staging.join(name), &bytes)?;
            checksums.push_str(&format!("{} *{name}\n", hex_digest(&bytes)));
        }
        write_synced(&self.staging.join(CHECKSUMS_FILE), checksums.as_bytes())?;
        write_synced(&self.staging.join(format!("{fp}{FINGERPRINT_SUFFIX}")), b"")?;
        Ok(fp)
    }

    fn resolved(&self) -> BTreeMap<String, BlobInfo> {
        let mut resolved = self.base_entries.clone();
        for entry in self.entries.values() {
            match entry {
                BloblistEntry::Present(info) => {
                    resolved.insert(info.filename.clone(), info.clone());
                }
                BloblistEntry::Removed(marker) => {
                    resolved.remove(&marker.filename);
                }
            }
        }
        resolved
    }

    fn check_open(&self) -> CairnResult<()> {
        if self.finished {
            Err(CairnError::misuse("session writer has already been queued"))
        } else {
            Ok(())
        }
    }

    fn check_content(&self, data: &[u8], info: &BlobInfo) -> CairnResult<()> {
        normalize_filename(&info.filename)?;
        if info.size != data.len() as u64 {
            return Err(CairnError::input(format!(
                "{} claims {} bytes but {} were supplied",
                info.filename,
                info.size,
                data.len()
            )));
        }
        let actual = hex_digest(data);
        if actual != info.checksum {
            return Err(CairnError::input(format!(
                "{} hashes to {actual}, not the claimed {}",
                info.filename, info.checksum
            )));
        }
        Ok(())
    }

    fn has_raw(&self, checksum: &str) -> bool {
        self.staged_blobs.contains(checksum) || self.repo.has_raw_blob(checksum)
    }

    fn has_content(&self, checksum: &str) -> bool {
        self.has_raw(checksum)
            || self.staged_recipes.contains_key(checksum)
            || self.repo.has_recipe(checksum)
    }

    fn stage_blob(&mut self, checksum: &str, data: &[u8]) -> CairnResult<()> {
        write_synced(&self.staging.join(checksum), data)?;
        self.staged_blobs.insert(checksum.to_string());
        Ok(())
    }

    fn push_entry(&mut self, info: BlobInfo) -> CairnResult<()> {
        if let Some(BloblistEntry::Present(_)) = self.entries.get(&info.filename) {
            return Err(CairnError::input(format!(
                "{} was already added to this session",
                info.filename
            )));
        }
        self.entries
            .insert(info.filename.clone(), BloblistEntry::Present(info));
        Ok(())
    }
}

impl Drop for SessionWriter<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = fs::remove_dir_all(&self.staging) {
                warn!(staging = %self.staging.display(), "failed to clean up staging dir: {e}");
            }
        }
    }
}

fn index_raw(index: &mut BlockLocationIndex, checksum: &str, data: &[u8]) -> CairnResult<()> {
    let owned = !index.in_transaction();
    if owned {
        index.begin()?;
    }
    index.index_blob(checksum, data)?;
    if owned {
        index.commit()?;
    }
    Ok(())
}

fn check_checksum(checksum: &str) -> CairnResult<()> {
    if is_checksum(checksum) {
        Ok(())
    } else {
        Err(CairnError::input(format!("invalid checksum '{checksum}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_order() {
        let a = fingerprint([("b.txt", "22"), ("a.txt", "11")]);
        let b = fingerprint([("a.txt", "11"), ("b.txt", "22")]);
        assert_eq!(a, b);
        assert_ne!(a, fingerprint([("a.txt", "22"), ("b.txt", "11")]));
    }

    #[test]
    fn fingerprint_of_empty_list_is_digest_of_nothing() {
        assert_eq!(fingerprint(std::iter::empty()), hex_digest(b""));
    }

    #[test]
    fn fingerprint_layout() {
        let expected = hex_digest(b"a!SEPARATOR!11!SEPARATOR!b!SEPARATOR!22!SEPARATOR!");
        assert_eq!(fingerprint([("b", "22"), ("a", "11")]), expected);
    }

    #[test]
    fn filename_rules() {
        for ok in ["a", "a/b.txt", "dir/sub/file", ".hidden", "a..b"] {
            assert!(normalize_filename(ok).is_ok(), "{ok}");
        }
        for bad in ["", "/abs", "trail/", "a//b", "win\\path", "../up", "a/./b"] {
            assert!(normalize_filename(bad).unwrap_err().is_input(), "{bad}");
        }
    }

    #[test]
    fn checksums_file_detects_edits() {
        let dir = tempfile::tempdir().unwrap();
        let mut sums = String::new();
        for name in CHECKED_DOCS {
            let body = format!("{{\"doc\": \"{name}\"}}");
            fs::write(dir.path().join(name), &body).unwrap();
            sums.push_str(&format!("{} *{name}\n", hex_digest(body.as_bytes())));
        }
        fs::write(dir.path().join(CHECKSUMS_FILE), &sums).unwrap();
        verify_checksums(dir.path()).unwrap();

        fs::write(dir.path().join(INFO_FILE), b"{}").unwrap();
        assert!(verify_checksums(dir.path()).unwrap_err().is_hard_corruption());
    }
}
