//! Directory-backed backing services.
//!
//! Every station pointed at the same root directory (a local path or a
//! shared mount) sees the same buckets. Layout:
//!
//! ```text
//! <root>/kv/<bucket>/bucket.json            bucket config
//! <root>/kv/<bucket>/bucket.lock            writer lock
//! <root>/kv/<bucket>/sequence               last revision handed out
//! <root>/kv/<bucket>/entries/<sha256>.kv    header line + raw value
//! <root>/objects/<bucket>/bucket.json
//! <root>/objects/<bucket>/bucket.lock
//! <root>/objects/<bucket>/usage             bytes held by the bucket
//! <root>/objects/<bucket>/data/<sha256>.obj header line + raw body
//! ```
//!
//! File names are the SHA-256 of the key, so any key fits the file-name
//! limit. The key itself lives in the object header.
//!
//! Files are replaced with write-to-temp + rename, so readers never see a
//! torn entry and take no lock. Writers hold an exclusive `fd-lock` on the
//! bucket lock file, which keeps revisions and capacity accounting
//! consistent between processes.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    is_expired, validate_key, BackendError, BlobBucket, BlobService, KeyValueBucket,
    KeyValueConfig, KeyValueService, KvEntry, ObjectInfo, ObjectMeta, ObjectStoreConfig,
    StoredObject,
};

const BUCKET_CONFIG: &str = "bucket.json";
const BUCKET_LOCK: &str = "bucket.lock";
const SEQUENCE: &str = "sequence";
const USAGE: &str = "usage";
const TMP_PREFIX: &str = "tmp-";

#[derive(Debug, Clone)]
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn kv_dir(&self, bucket: &str) -> Result<PathBuf, BackendError> {
        validate_bucket_name(bucket)?;
        Ok(self.root.join("kv").join(bucket))
    }

    fn objects_dir(&self, bucket: &str) -> Result<PathBuf, BackendError> {
        validate_bucket_name(bucket)?;
        Ok(self.root.join("objects").join(bucket))
    }
}

#[async_trait]
impl KeyValueService for FilesystemBackend {
    async fn key_value(&self, bucket: &str) -> Result<Arc<dyn KeyValueBucket>, BackendError> {
        let dir = self.kv_dir(bucket)?;
        let config = {
            let (dir, name) = (dir.clone(), bucket.to_string());
            blocking(move || read_bucket_config::<KeyValueConfig>(&dir)?.ok_or(BackendError::BucketNotFound(name)))
                .await?
        };
        Ok(Arc::new(FsKvBucket { dir, config }) as Arc<dyn KeyValueBucket>)
    }

    /// Also sweeps expired entries and temp files left by interrupted writers.
    async fn create_key_value(
        &self,
        config: KeyValueConfig,
    ) -> Result<Arc<dyn KeyValueBucket>, BackendError> {
        let dir = self.kv_dir(&config.bucket)?;
        let config = {
            let dir = dir.clone();
            blocking(move || {
                fs::create_dir_all(dir.join("entries"))?;
                let config = ensure_bucket_config(&dir, config)?;
                with_bucket_lock(&dir, || FsKvBucket::sweep(&dir, config.ttl))?;
                Ok(config)
            })
            .await?
        };
        debug!(bucket = %config.bucket, "key-value bucket ready");
        Ok(Arc::new(FsKvBucket { dir, config }) as Arc<dyn KeyValueBucket>)
    }
}

#[async_trait]
impl BlobService for FilesystemBackend {
    async fn object_store(&self, bucket: &str) -> Result<Arc<dyn BlobBucket>, BackendError> {
        let dir = self.objects_dir(bucket)?;
        let config = {
            let (dir, name) = (dir.clone(), bucket.to_string());
            blocking(move || read_bucket_config::<ObjectStoreConfig>(&dir)?.ok_or(BackendError::BucketNotFound(name)))
                .await?
        };
        Ok(Arc::new(FsBlobBucket { dir, config }) as Arc<dyn BlobBucket>)
    }

    /// Also sweeps temp files and recounts the bytes held by the bucket.
    async fn create_object_store(
        &self,
        config: ObjectStoreConfig,
    ) -> Result<Arc<dyn BlobBucket>, BackendError> {
        let dir = self.objects_dir(&config.bucket)?;
        let config = {
            let dir = dir.clone();
            blocking(move || {
                fs::create_dir_all(dir.join("data"))?;
                let config = ensure_bucket_config(&dir, config)?;
                with_bucket_lock(&dir, || FsBlobBucket::sweep(&dir))?;
                Ok(config)
            })
            .await?
        };
        debug!(bucket = %config.bucket, "object bucket ready");
        Ok(Arc::new(FsBlobBucket { dir, config }) as Arc<dyn BlobBucket>)
    }
}

struct FsKvBucket {
    dir: PathBuf,
    config: KeyValueConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    revision: u64,
    updated_at: DateTime<Utc>,
}

impl FsKvBucket {
    fn entry_path(dir: &Path, key: &str) -> PathBuf {
        dir.join("entries").join(format!("{}.kv", hashed_name(key)))
    }

    fn read_entry(
        dir: &Path,
        key: &str,
        ttl: Option<Duration>,
    ) -> Result<Option<KvEntry>, BackendError> {
        let Some(raw) = read_optional(&Self::entry_path(dir, key))? else {
            return Ok(None);
        };
        let (header, value): (EntryHeader, Bytes) = split_envelope(raw)?;
        if is_expired(header.updated_at, ttl, Utc::now()) {
            return Ok(None);
        }
        Ok(Some(KvEntry {
            value,
            revision: header.revision,
            updated_at: header.updated_at,
        }))
    }

    /// Writes under the bucket lock, which must already be held.
    fn write_entry(dir: &Path, key: &str, value: &[u8]) -> Result<u64, BackendError> {
        let sequence_path = dir.join(SEQUENCE);
        let last = read_counter(&sequence_path)?.unwrap_or(0);
        let revision = last + 1;
        write_atomic(&sequence_path, revision.to_string().as_bytes())?;

        let header = EntryHeader {
            revision,
            updated_at: Utc::now(),
        };
        write_atomic(&Self::entry_path(dir, key), &join_envelope(&header, value)?)?;
        Ok(revision)
    }

    /// Removes expired entries and orphaned temp files. Needs the bucket lock.
    fn sweep(dir: &Path, ttl: Option<Duration>) -> Result<(), BackendError> {
        let mut removed = remove_temp_files(dir)? + remove_temp_files(&dir.join("entries"))?;
        if ttl.is_some() {
            let now = Utc::now();
            for path in files_with_extension(&dir.join("entries"), "kv")? {
                let header = match read_header::<EntryHeader>(&path) {
                    Ok(Some(header)) => header,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                        continue;
                    }
                };
                if is_expired(header.updated_at, ttl, now) {
                    remove_optional(&path)?;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!(dir = %dir.display(), removed, "Swept key-value bucket");
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueBucket for FsKvBucket {
    async fn entry(&self, key: &str) -> Result<Option<KvEntry>, BackendError> {
        validate_key(key)?;
        let (dir, key, ttl) = (self.dir.clone(), key.to_string(), self.config.ttl);
        blocking(move || Self::read_entry(&dir, &key, ttl)).await
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<u64, BackendError> {
        validate_key(key)?;
        let (dir, key) = (self.dir.clone(), key.to_string());
        blocking(move || with_bucket_lock(&dir, || Self::write_entry(&dir, &key, &value))).await
    }

    async fn update(
        &self,
        key: &str,
        value: Bytes,
        expected_revision: u64,
    ) -> Result<u64, BackendError> {
        validate_key(key)?;
        let (dir, key, ttl) = (self.dir.clone(), key.to_string(), self.config.ttl);
        blocking(move || {
            with_bucket_lock(&dir, || {
                let found = Self::read_entry(&dir, &key, ttl)?.map(|e| e.revision);
                if found != Some(expected_revision) {
                    return Err(BackendError::RevisionMismatch {
                        key: key.clone(),
                        expected: expected_revision,
                        found,
                    });
                }
                Self::write_entry(&dir, &key, &value)
            })
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        validate_key(key)?;
        let (dir, key) = (self.dir.clone(), key.to_string());
        blocking(move || {
            with_bucket_lock(&dir, || remove_optional(&Self::entry_path(&dir, &key)))
        })
        .await
    }
}

struct FsBlobBucket {
    dir: PathBuf,
    config: ObjectStoreConfig,
}

impl FsBlobBucket {
    fn object_path(dir: &Path, name: &str) -> PathBuf {
        dir.join("data").join(format!("{}.obj", hashed_name(name)))
    }

    /// Reads only the header line of every stored object.
    fn scan(dir: &Path) -> Result<Vec<ObjectInfo>, BackendError> {
        let mut infos = Vec::new();
        for path in files_with_extension(&dir.join("data"), "obj")? {
            // None: deleted between read_dir and open.
            if let Some(info) = read_header::<ObjectInfo>(&path)? {
                infos.push(info);
            }
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    /// Bytes currently held. Recounted from the headers when the counter is missing.
    fn usage(dir: &Path) -> Result<u64, BackendError> {
        match read_counter(&dir.join(USAGE))? {
            Some(used) => Ok(used),
            None => Ok(Self::scan(dir)?.iter().map(|info| info.size).sum()),
        }
    }

    fn stored_size(dir: &Path, name: &str) -> Result<u64, BackendError> {
        Ok(read_header::<ObjectInfo>(&Self::object_path(dir, name))?
            .map(|info| info.size)
            .unwrap_or(0))
    }

    /// Removes orphaned temp files and rewrites the usage counter. Needs the bucket lock.
    fn sweep(dir: &Path) -> Result<(), BackendError> {
        let removed = remove_temp_files(dir)? + remove_temp_files(&dir.join("data"))?;
        let used: u64 = Self::scan(dir)?.iter().map(|info| info.size).sum();
        write_atomic(&dir.join(USAGE), used.to_string().as_bytes())?;
        if removed > 0 {
            info!(dir = %dir.display(), removed, "Swept object bucket");
        }
        Ok(())
    }
}

#[async_trait]
impl BlobBucket for FsBlobBucket {
    async fn put(&self, meta: ObjectMeta, body: Bytes) -> Result<ObjectInfo, BackendError> {
        validate_key(&meta.name)?;
        let (dir, config) = (self.dir.clone(), self.config.clone());
        blocking(move || {
            with_bucket_lock(&dir, || {
                let requested = body.len() as u64;
                let replaced = Self::stored_size(&dir, &meta.name)?;
                let used = Self::usage(&dir)?.saturating_sub(replaced);
                if let Some(limit) = config.max_bytes {
                    if used + requested > limit {
                        return Err(BackendError::CapacityExceeded {
                            bucket: config.bucket.clone(),
                            requested,
                            limit,
                        });
                    }
                }

                let info = ObjectInfo {
                    name: meta.name.clone(),
                    size: requested,
                    modified: Utc::now(),
                    description: meta.description.clone(),
                    headers: meta.headers.clone(),
                };
                write_atomic(
                    &Self::object_path(&dir, &meta.name),
                    &join_envelope(&info, &body)?,
                )?;
                write_atomic(&dir.join(USAGE), (used + requested).to_string().as_bytes())?;
                Ok(info)
            })
        })
        .await
    }

    async fn get(&self, name: &str) -> Result<Option<StoredObject>, BackendError> {
        validate_key(name)?;
        let path = Self::object_path(&self.dir, name);
        blocking(move || {
            let Some(raw) = read_optional(&path)? else {
                return Ok(None);
            };
            let (info, body) = split_envelope::<ObjectInfo>(raw)?;
            Ok(Some(StoredObject { info, body }))
        })
        .await
    }

    async fn delete(&self, name: &str) -> Result<(), BackendError> {
        validate_key(name)?;
        let (dir, name) = (self.dir.clone(), name.to_string());
        blocking(move || {
            with_bucket_lock(&dir, || {
                let removed = Self::stored_size(&dir, &name)?;
                let used = Self::usage(&dir)?;
                remove_optional(&Self::object_path(&dir, &name))?;
                write_atomic(
                    &dir.join(USAGE),
                    used.saturating_sub(removed).to_string().as_bytes(),
                )
            })
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, BackendError> {
        let (dir, prefix) = (self.dir.clone(), prefix.to_string());
        blocking(move || {
            Ok(Self::scan(&dir)?
                .into_iter()
                .filter(|info| info.name.starts_with(&prefix))
                .collect())
        })
        .await
    }
}

async fn blocking<T, F>(f: F) -> Result<T, BackendError>
where
    F: FnOnce() -> Result<T, BackendError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BackendError::Io(std::io::Error::other(e)))?
}

fn with_bucket_lock<T>(
    dir: &Path,
    f: impl FnOnce() -> Result<T, BackendError>,
) -> Result<T, BackendError> {
    let file = File::options()
        .create(true)
        .truncate(false)
        .write(true)
        .open(dir.join(BUCKET_LOCK))?;
    let mut lock = RwLock::new(file);
    let _guard = lock.write()?;
    f()
}

fn validate_bucket_name(bucket: &str) -> Result<(), BackendError> {
    let valid = !bucket.is_empty()
        && bucket
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(BackendError::InvalidKey(bucket.to_string()))
    }
}

fn read_bucket_config<C: for<'de> Deserialize<'de>>(dir: &Path) -> Result<Option<C>, BackendError> {
    match read_optional(&dir.join(BUCKET_CONFIG))? {
        Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        None => Ok(None),
    }
}

/// First creator wins; later creators get the stored config back.
fn ensure_bucket_config<C>(dir: &Path, config: C) -> Result<C, BackendError>
where
    C: Serialize + for<'de> Deserialize<'de>,
{
    with_bucket_lock(dir, || {
        if let Some(existing) = read_bucket_config(dir)? {
            return Ok(existing);
        }
        write_atomic(&dir.join(BUCKET_CONFIG), &serde_json::to_vec_pretty(&config)?)?;
        Ok(config)
    })
}

fn join_envelope<H: Serialize>(header: &H, body: &[u8]) -> Result<Vec<u8>, BackendError> {
    let mut out = serde_json::to_vec(header)?;
    out.push(b'\n');
    out.extend_from_slice(body);
    Ok(out)
}

fn split_envelope<H: for<'de> Deserialize<'de>>(raw: Vec<u8>) -> Result<(H, Bytes), BackendError> {
    let raw = Bytes::from(raw);
    let newline = raw
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidData, "missing envelope header"))?;
    let header = serde_json::from_slice(&raw[..newline])?;
    Ok((header, raw.slice(newline + 1..)))
}

/// The header line of an envelope file, without reading the body.
fn read_header<H: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<H>, BackendError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut line = String::new();
    BufReader::new(file).read_line(&mut line)?;
    Ok(Some(serde_json::from_str(line.trim_end())?))
}

/// A decimal counter file. A file that does not parse is an error, never zero.
fn read_counter(path: &Path) -> Result<Option<u64>, BackendError> {
    let Some(raw) = read_optional(path)? else {
        return Ok(None);
    };
    let text = String::from_utf8_lossy(&raw);
    text.trim().parse::<u64>().map(Some).map_err(|e| {
        BackendError::Io(std::io::Error::new(
            ErrorKind::InvalidData,
            format!("corrupt counter {}: {e}", path.display()),
        ))
    })
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, BackendError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(Some(buf))
}

fn remove_optional(path: &Path) -> Result<(), BackendError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, BackendError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            paths.push(path);
        }
    }
    Ok(paths)
}

/// Deletes `*.tmp-*` files in `dir`. Only safe while holding the bucket lock.
fn remove_temp_files(dir: &Path) -> Result<usize, BackendError> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_temp = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.starts_with(TMP_PREFIX));
        if is_temp && path.is_file() {
            remove_optional(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), BackendError> {
    let tmp = path.with_extension(format!("{TMP_PREFIX}{}", uuid::Uuid::new_v4().simple()));
    {
        let mut file = File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Fixed-length file name for a key. Keys never escape the bucket directory
/// and never exceed the file-name limit, whatever their length or script.
fn hashed_name(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn kv_config() -> KeyValueConfig {
        KeyValueConfig {
            bucket: "harness-state".to_string(),
            description: "test".to_string(),
            ttl: None,
        }
    }

    fn object_config(max_bytes: Option<u64>) -> ObjectStoreConfig {
        ObjectStoreConfig {
            bucket: "harness-files".to_string(),
            description: "test".to_string(),
            max_bytes,
        }
    }

    fn named(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: name.to_string(),
            ..ObjectMeta::default()
        }
    }

    #[test]
    fn test_hashed_name_is_fixed_length_and_stays_inside_bucket() {
        let long = "r".repeat(1000);
        let accented = "é".repeat(200);
        for key in ["run.abc.state", "../x", long.as_str(), accented.as_str()] {
            let name = hashed_name(key);
            assert_eq!(name.len(), 64);
            assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
        }
        assert_ne!(hashed_name("a/b"), hashed_name("a%2Fb"));
    }

    #[tokio::test]
    async fn test_long_and_non_ascii_keys_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(temp_dir.path());
        let long = format!("run/{}/output/{}.json", uuid::Uuid::new_v4(), "r".repeat(200));
        let accented = format!("shared/{}", "é".repeat(50));

        let objects = backend.create_object_store(object_config(None)).await.unwrap();
        for name in [&long, &accented] {
            objects.put(named(name), Bytes::from_static(b"body")).await.unwrap();
            let stored = objects.get(name).await.unwrap().unwrap();
            assert_eq!(&stored.info.name, name);
            assert_eq!(stored.body, Bytes::from_static(b"body"));
        }
        let listed: Vec<String> = objects.list("").await.unwrap().into_iter().map(|i| i.name).collect();
        assert_eq!(listed, vec![long.clone(), accented.clone()]);

        let kv = backend.create_key_value(kv_config()).await.unwrap();
        let key = format!("workflow.{}.context", "w".repeat(250));
        kv.put(&key, Bytes::from_static(b"{}")).await.unwrap();
        assert!(kv.entry(&key).await.unwrap().is_some());
        kv.delete(&key).await.unwrap();
        assert!(kv.entry(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_before_create_reports_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(temp_dir.path());
        assert!(matches!(
            backend.key_value("harness-state").await,
            Err(BackendError::BucketNotFound(_))
        ));
        assert!(matches!(
            backend.object_store("harness-files").await,
            Err(BackendError::BucketNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_separate_instances_share_entries() {
        let temp_dir = TempDir::new().unwrap();
        let station_a = FilesystemBackend::new(temp_dir.path());
        let station_b = FilesystemBackend::new(temp_dir.path());

        let bucket_a = station_a.create_key_value(kv_config()).await.unwrap();
        let revision = bucket_a
            .put("workflow.wf-1.context", Bytes::from_static(b"{\"a\":1}\n{}"))
            .await
            .unwrap();

        let bucket_b = station_b.key_value("harness-state").await.unwrap();
        let entry = bucket_b.entry("workflow.wf-1.context").await.unwrap().unwrap();
        assert_eq!(entry.value, Bytes::from_static(b"{\"a\":1}\n{}"));
        assert_eq!(entry.revision, revision);

        bucket_b.delete("workflow.wf-1.context").await.unwrap();
        assert!(bucket_a.entry("workflow.wf-1.context").await.unwrap().is_none());
        bucket_b.delete("workflow.wf-1.context").await.unwrap();
    }

    #[tokio::test]
    async fn test_update_rejects_stale_revision() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(temp_dir.path());
        let bucket = backend.create_key_value(kv_config()).await.unwrap();

        let first = bucket.put("doc", Bytes::from_static(b"1")).await.unwrap();
        let second = bucket.update("doc", Bytes::from_static(b"2"), first).await.unwrap();
        let err = bucket.update("doc", Bytes::from_static(b"3"), first).await;
        assert!(matches!(
            err,
            Err(BackendError::RevisionMismatch { found: Some(r), .. }) if r == second
        ));
    }

    #[tokio::test]
    async fn test_corrupt_sequence_fails_instead_of_restarting_revisions() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(temp_dir.path());
        let bucket = backend.create_key_value(kv_config()).await.unwrap();
        bucket.put("doc", Bytes::from_static(b"1")).await.unwrap();

        std::fs::write(temp_dir.path().join("kv/harness-state/sequence"), "garbage").unwrap();
        let err = bucket.put("doc", Bytes::from_static(b"2")).await.unwrap_err();
        assert!(matches!(err, BackendError::Io(ref e) if e.kind() == ErrorKind::InvalidData));
        assert_eq!(
            bucket.entry("doc").await.unwrap().unwrap().value,
            Bytes::from_static(b"1")
        );
    }

    #[tokio::test]
    async fn test_reopening_sweeps_expired_entries_and_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(temp_dir.path());
        let config = KeyValueConfig {
            ttl: Some(Duration::from_millis(20)),
            ..kv_config()
        };
        let bucket = backend.create_key_value(config.clone()).await.unwrap();
        bucket.put("old", Bytes::from_static(b"1")).await.unwrap();

        let entries = temp_dir.path().join("kv/harness-state/entries");
        std::fs::write(entries.join("abc.tmp-deadbeef"), "torn").unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        backend.create_key_value(config).await.unwrap();
        assert_eq!(std::fs::read_dir(&entries).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_objects_round_trip_with_headers() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(temp_dir.path());
        let bucket = backend.create_object_store(object_config(None)).await.unwrap();

        let mut headers = super::super::Headers::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        let meta = ObjectMeta {
            name: "run/r1/output/out.json".to_string(),
            description: Some("output".to_string()),
            headers,
        };
        bucket.put(meta, Bytes::from_static(b"{\"ok\":true}\n")).await.unwrap();

        let stored = bucket.get("run/r1/output/out.json").await.unwrap().unwrap();
        assert_eq!(stored.body, Bytes::from_static(b"{\"ok\":true}\n"));
        assert_eq!(stored.info.size, 12);
        assert_eq!(
            stored.info.headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );

        let listed = bucket.list("run/r1/").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(bucket.list("shared/").await.unwrap().is_empty());
        assert!(bucket.get("run/r1/output/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_capacity_exceeded_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(temp_dir.path());
        let bucket = backend.create_object_store(object_config(Some(4))).await.unwrap();

        let err = bucket.put(named("shared/big"), Bytes::from_static(b"12345")).await;
        assert!(matches!(err, Err(BackendError::CapacityExceeded { limit: 4, .. })));
        assert!(bucket.get("shared/big").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_capacity_tracks_overwrites_and_deletes() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(temp_dir.path());
        let bucket = backend.create_object_store(object_config(Some(10))).await.unwrap();

        bucket.put(named("a"), Bytes::from_static(b"123456")).await.unwrap();
        // Replacing an object only counts its new size.
        bucket.put(named("a"), Bytes::from_static(b"12345678")).await.unwrap();
        assert!(matches!(
            bucket.put(named("b"), Bytes::from_static(b"123")).await,
            Err(BackendError::CapacityExceeded { .. })
        ));

        bucket.delete("a").await.unwrap();
        bucket.put(named("b"), Bytes::from_static(b"123")).await.unwrap();

        // A second adapter over the same directory sees the same usage.
        let other = FilesystemBackend::new(temp_dir.path())
            .create_object_store(object_config(Some(10)))
            .await
            .unwrap();
        assert!(matches!(
            other.put(named("c"), Bytes::from_static(b"12345678")).await,
            Err(BackendError::CapacityExceeded { .. })
        ));
        other.put(named("c"), Bytes::from_static(b"1234567")).await.unwrap();
    }
}
