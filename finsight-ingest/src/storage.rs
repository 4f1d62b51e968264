//! Object storage for raw images and crops
//!
//! Layout: raw uploads live under `pre-cut/`, crops under
//! `post-cut/<deviceId>/`. The [`ObjectStore`] trait is the seam the
//! dispatcher and workers depend on; [`FsObjectStore`] is the production
//! backend (rooted at the configured data directory) and
//! [`MemoryObjectStore`] backs tests, with fault-injection knobs for the
//! failure paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use finsight_common::{Error, Result};

/// Namespace prefix for raw uploads
pub const PRE_CUT_PREFIX: &str = "pre-cut";

/// Namespace prefix for crops
pub const POST_CUT_PREFIX: &str = "post-cut";

/// Storage abstraction for image blobs
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Verify the backing container exists and is usable
    async fn ready(&self) -> Result<()>;

    /// Store a blob at `key`, overwriting any existing blob
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Fetch a blob; a missing key is `Error::NotFound`
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Remove a blob; removing a missing key succeeds
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Build a collision-resistant key for a raw upload:
/// `pre-cut/<unix-millis>_<uuid>.jpg`
pub fn raw_image_key(now: DateTime<Utc>) -> String {
    format!(
        "{}/{}_{}.jpg",
        PRE_CUT_PREFIX,
        now.timestamp_millis(),
        Uuid::new_v4()
    )
}

/// Build the key for one crop:
/// `post-cut/<deviceId>/<unix-millis>_fish_<n>_<cleanTag>_<confidence>pct.jpg`
///
/// `index` is 0-based; the name carries it 1-based. The tag is reduced
/// to `[A-Za-z0-9]` with `_` standing in for everything else, and the
/// confidence is the rounded percentage. The name is cosmetic metadata;
/// the timestamp and index keep the key collision-resistant.
pub fn crop_key(
    device_id: &str,
    now: DateTime<Utc>,
    index: usize,
    tag_name: &str,
    confidence: f64,
) -> String {
    let clean_tag: String = tag_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let pct = (confidence * 100.0).round() as i64;
    format!(
        "{}/{}/{}_fish_{}_{}_{}pct.jpg",
        POST_CUT_PREFIX,
        device_id,
        now.timestamp_millis(),
        index + 1,
        clean_tag,
        pct
    )
}

/// Keys are service-generated, but they also arrive inside queue
/// payloads; refuse anything that could escape the storage root.
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('/') || key.split('/').any(|part| part == "..") {
        return Err(Error::InvalidInput(format!("Invalid storage key: {}", key)));
    }
    Ok(())
}

/// Filesystem-backed object store rooted at a local directory
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Open a store rooted at `root`, creating the directory tree
    pub fn create(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::Storage(format!("Cannot create storage root: {}", e)))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn ready(&self) -> Result<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(Error::Storage(format!(
                "Storage root does not exist: {}",
                self.root.display()
            )))
        }
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("Cannot create {}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::Storage(format!("Cannot write {}: {}", key, e)))?;
        tracing::debug!(key, bytes = bytes.len(), "Stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Object not found: {}", key)))
            }
            Err(e) => Err(Error::Storage(format!("Cannot read {}: {}", key, e))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("Cannot delete {}: {}", key, e))),
        }
    }
}

/// In-memory object store for tests and ephemeral runs.
///
/// The `fail_*` knobs inject faults so failure paths (skipped
/// detections, swallowed deletes, redelivery) can be exercised without a
/// broken filesystem.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_puts: AtomicBool,
    fail_gets: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn ready(&self) -> Result<()> {
        Ok(())
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        validate_key(key)?;
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(Error::Storage("Injected put failure".to_string()));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(Error::Storage("Injected get failure".to_string()));
        }
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", key)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Error::Storage("Injected delete failure".to_string()));
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn raw_image_keys_live_under_pre_cut_and_are_unique() {
        let now = Utc::now();
        let a = raw_image_key(now);
        let b = raw_image_key(now);
        assert!(a.starts_with("pre-cut/"));
        assert!(a.ends_with(".jpg"));
        assert_ne!(a, b);
    }

    #[test]
    fn crop_keys_encode_device_index_tag_and_confidence() {
        let now = Utc::now();
        let key = crop_key("device-1", now, 0, "rainbow trout", 0.874);
        assert!(key.starts_with("post-cut/device-1/"));
        assert!(key.contains("_fish_1_"), "index is 1-based in the name: {key}");
        assert!(key.contains("rainbow_trout"), "tag is cleaned: {key}");
        assert!(key.ends_with("_87pct.jpg"), "confidence is rounded percent: {key}");
    }

    #[test]
    fn keys_escaping_the_root_are_rejected() {
        assert!(validate_key("pre-cut/../../etc/passwd").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("").is_err());
        assert!(validate_key("pre-cut/ok.jpg").is_ok());
    }

    #[tokio::test]
    async fn fs_store_round_trips_objects() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::create(dir.path().join("fish-images")).unwrap();
        store.ready().await.unwrap();

        store.put("post-cut/device-1/a.jpg", b"bytes").await.unwrap();
        assert_eq!(store.get("post-cut/device-1/a.jpg").await.unwrap(), b"bytes");

        store.delete("post-cut/device-1/a.jpg").await.unwrap();
        assert!(matches!(
            store.get("post-cut/device-1/a.jpg").await,
            Err(Error::NotFound(_))
        ));
        // deleting again is fine
        store.delete("post-cut/device-1/a.jpg").await.unwrap();
    }

    #[tokio::test]
    async fn memory_store_fault_injection() {
        let store = MemoryObjectStore::new();
        store.put("pre-cut/a.jpg", b"x").await.unwrap();

        store.fail_deletes(true);
        assert!(store.delete("pre-cut/a.jpg").await.is_err());
        assert!(store.contains("pre-cut/a.jpg"));

        store.fail_deletes(false);
        store.delete("pre-cut/a.jpg").await.unwrap();
        assert!(store.is_empty());
    }
}
