//! Bloblist cache: hits, misses, stale rows and the no-op fallback.

use std::fs;

use cairn_chunks::hex_digest;
use cairn_core::{BlobInfo, SessionInfo};
use cairn_repo::{BloblistCache, Repository};
use serde_json::json;

fn info(name: &str, data: &[u8]) -> BlobInfo {
    BlobInfo::new(name, hex_digest(data), data.len() as u64).with_times(100, 200)
}

/// A repository whose cache lives in its own temp dir.
fn cached_repo(dir: &tempfile::TempDir, cache_dir: &tempfile::TempDir) -> Repository {
    Repository::create(dir.path()).unwrap();
    fs::write(
        dir.path().join("cairn.toml"),
        format!("[cache]\nenabled = true\ndir = '{}'\n", cache_dir.path().display()),
    )
    .unwrap();
    let repo = Repository::open(dir.path()).unwrap();

    let mut s1 = repo.create_session(None).unwrap();
    let mut tagged = info("a", b"A");
    tagged.extra.insert("owner".into(), json!("mats"));
    s1.add(b"A", tagged).unwrap();
    s1.add(b"B", info("b", b"B")).unwrap();
    s1.commit(SessionInfo::new()).unwrap();

    let mut s2 = repo.create_session(Some(1)).unwrap();
    s2.add(b"C", info("c", b"C")).unwrap();
    s2.remove("a").unwrap();
    s2.commit(SessionInfo::new()).unwrap();
    repo
}

fn plain_rows(repo: &Repository, id: u64) -> Vec<BlobInfo> {
    repo.session(id)
        .unwrap()
        .bloblist()
        .into_iter()
        .map(|mut b| {
            b.extra.clear();
            b
        })
        .collect()
}

#[test]
fn miss_then_hit_return_the_same_rows() {
    let dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let repo = cached_repo(&dir, &cache_dir);

    let mut cache = BloblistCache::open(&repo).unwrap();
    assert!(!cache.is_noop());
    let BloblistCache::Rocks(rocks) = &cache else {
        panic!("expected the RocksDB cache");
    };
    assert!(rocks.load(2).unwrap().is_none());
    assert!(rocks
        .path()
        .ends_with(format!("bloblist-cache-{}", repo.repo_id().unwrap())));

    let first = cache.get_bloblist(&repo, 2, false).unwrap();
    assert_eq!(first, plain_rows(&repo, 2));
    let names: Vec<&str> = first.iter().map(|b| b.filename.as_str()).collect();
    assert_eq!(names, vec!["b", "c"]);
    assert_eq!(first[0].mtime, 100);

    let BloblistCache::Rocks(rocks) = &cache else {
        unreachable!()
    };
    assert_eq!(rocks.load(2).unwrap(), Some(first.clone()));
    assert_eq!(cache.get_bloblist(&repo, 2, false).unwrap(), first);
}

#[test]
fn cache_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let repo = cached_repo(&dir, &cache_dir);
    {
        let mut cache = BloblistCache::open(&repo).unwrap();
        cache.get_bloblist(&repo, 1, false).unwrap();
        cache.get_bloblist(&repo, 2, false).unwrap();
    }
    let cache = BloblistCache::open(&repo).unwrap();
    let BloblistCache::Rocks(rocks) = &cache else {
        panic!("expected the RocksDB cache");
    };
    assert_eq!(rocks.load(1).unwrap(), Some(plain_rows(&repo, 1)));
    assert_eq!(rocks.load(2).unwrap(), Some(plain_rows(&repo, 2)));
}

#[test]
fn stale_rows_are_rebuilt() {
    let dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let repo = cached_repo(&dir, &cache_dir);
    let mut cache = BloblistCache::open(&repo).unwrap();

    let wrong = plain_rows(&repo, 2);
    if let BloblistCache::Rocks(rocks) = &mut cache {
        rocks.store(1, &wrong).unwrap();
    }

    // unverified reads trust the cache as-is
    assert_eq!(cache.get_bloblist(&repo, 1, true).unwrap(), wrong);

    let rows = cache.get_bloblist(&repo, 1, false).unwrap();
    assert_eq!(rows, plain_rows(&repo, 1));
    if let BloblistCache::Rocks(rocks) = &cache {
        assert_eq!(rocks.load(1).unwrap(), Some(rows));
    }
}

#[test]
fn repository_without_id_uses_noop_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    cached_repo(&dir, &cache_dir);
    fs::remove_file(dir.path().join("repo_uuid")).unwrap();

    let repo = Repository::open(dir.path()).unwrap();
    assert!(repo.repo_id().is_none());
    let mut cache = BloblistCache::open(&repo).unwrap();
    assert!(cache.is_noop());
    assert_eq!(cache.get_bloblist(&repo, 2, false).unwrap(), plain_rows(&repo, 2));
    assert!(fs::read_dir(cache_dir.path()).unwrap().next().is_none());
}

#[test]
fn disabled_cache_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    Repository::create(dir.path()).unwrap();
    fs::write(dir.path().join("cairn.toml"), "[cache]\nenabled = false\n").unwrap();
    let repo = Repository::open(dir.path()).unwrap();
    assert!(BloblistCache::open(&repo).unwrap().is_noop());
}

#[test]
fn missing_session_is_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let repo = cached_repo(&dir, &cache_dir);
    let mut cache = BloblistCache::open(&repo).unwrap();
    assert!(cache.get_bloblist(&repo, 7, false).unwrap_err().is_input());
}
