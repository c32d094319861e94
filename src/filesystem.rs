//! Filesystem-backed artifact storage.
//!
//! Objects live under `<root>/objects/<key>` and metadata documents under
//! `<root>/meta/<key>.json`, so metadata can never collide with an object
//! key. Writes are staged under `<root>/tmp/` and renamed into place; the
//! staging directory sits on the same filesystem as the trees, so the
//! rename stays atomic and never shares a path with any storable key. This
//! also gives `put` its overwrite semantics: a second upload to the same
//! key replaces the prior object and its metadata wholesale.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::artifacts::ArtifactMetadata;

/// Metadata document stored alongside each object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMetadata {
    pub content_type: String,
    #[serde(flatten)]
    pub artifact: ArtifactMetadata,
}

#[derive(Debug, Clone)]
pub struct ArtifactEntry {
    pub key: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
}

pub struct FilesystemService {
    objects_dir: PathBuf,
    meta_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl FilesystemService {
    pub fn new(root_dir: PathBuf) -> Result<Self, std::io::Error> {
        let objects_dir = root_dir.join("objects");
        let meta_dir = root_dir.join("meta");
        let tmp_dir = root_dir.join("tmp");
        fs::create_dir_all(&objects_dir)?;
        fs::create_dir_all(&meta_dir)?;
        // Staging files from an interrupted write are garbage by now.
        if tmp_dir.is_dir() {
            fs::remove_dir_all(&tmp_dir)?;
        }
        fs::create_dir_all(&tmp_dir)?;
        Ok(Self {
            objects_dir,
            meta_dir,
            tmp_dir,
        })
    }

    // The branch segment of read-path keys is caller-supplied, so every key
    // is checked for traversal before touching the filesystem.
    fn safe_join(base: &Path, key: &str) -> Result<PathBuf, std::io::Error> {
        let relative = Path::new(key);
        if key.is_empty()
            || relative.is_absolute()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            warn!(key = %key, "Rejected unsafe storage key");
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "unsafe storage key",
            ));
        }
        Ok(base.join(relative))
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, std::io::Error> {
        Self::safe_join(&self.objects_dir, key)
    }

    fn meta_path(&self, key: &str) -> Result<PathBuf, std::io::Error> {
        Self::safe_join(&self.meta_dir, &format!("{}.json", key))
    }

    /// Stores an object and its metadata, overwriting any prior version.
    pub async fn put(
        &self,
        key: &str,
        body: &[u8],
        metadata: &StoredMetadata,
    ) -> Result<(), std::io::Error> {
        let object_path = self.object_path(key)?;
        let meta_path = self.meta_path(key)?;
        debug!(key = %key, size = body.len(), "Writing artifact");

        self.write_atomic(&object_path, body).await?;
        let meta_json = serde_json::to_vec_pretty(metadata).map_err(std::io::Error::other)?;
        self.write_atomic(&meta_path, &meta_json).await?;
        Ok(())
    }

    /// Reads an object and its metadata. A missing or unreadable metadata
    /// document does not fail the read; the object itself is what matters.
    pub async fn get(
        &self,
        key: &str,
    ) -> Result<Option<(Vec<u8>, Option<StoredMetadata>)>, std::io::Error> {
        let object_path = self.object_path(key)?;
        match async_fs::read(&object_path).await {
            Ok(bytes) => {
                let metadata = self.read_metadata(key).await;
                Ok(Some((bytes, metadata)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(key = %key, "Artifact does not exist");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn read_metadata(&self, key: &str) -> Option<StoredMetadata> {
        let meta_path = self.meta_path(key).ok()?;
        let bytes = async_fs::read(&meta_path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to parse stored metadata");
                None
            }
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        match self.object_path(key) {
            Ok(path) => path.is_file(),
            Err(_) => false,
        }
    }

    /// Lists stored objects under a key prefix, sorted by key. The prefix
    /// must end at a path-segment boundary (`{branch}/latest/`).
    pub fn list(&self, prefix: &str) -> Result<Vec<ArtifactEntry>, std::io::Error> {
        let prefix_dir = Self::safe_join(&self.objects_dir, prefix.trim_end_matches('/'))?;
        debug!(prefix = %prefix, "Listing artifacts");

        let mut entries = Vec::new();
        if !prefix_dir.is_dir() {
            return Ok(entries);
        }

        fn collect_files(
            dir: &Path,
            root: &Path,
            entries: &mut Vec<ArtifactEntry>,
        ) -> Result<(), std::io::Error> {
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                let path = entry.path();

                if path.is_file() {
                    let relative_path = path.strip_prefix(root).map_err(std::io::Error::other)?;
                    let key = relative_path.to_string_lossy().to_string();

                    let metadata = entry.metadata()?;
                    let uploaded_at = metadata
                        .modified()?
                        .duration_since(SystemTime::UNIX_EPOCH)
                        .unwrap_or_default();
                    let uploaded_at = DateTime::from_timestamp(uploaded_at.as_secs() as i64, 0)
                        .unwrap_or_else(Utc::now);

                    entries.push(ArtifactEntry {
                        key,
                        size: metadata.len(),
                        uploaded_at,
                    });
                } else if path.is_dir() {
                    collect_files(&path, root, entries)?;
                }
            }
            Ok(())
        }

        collect_files(&prefix_dir, &self.objects_dir, &mut entries)?;
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        debug!(prefix = %prefix, count = entries.len(), "Found artifacts");
        Ok(entries)
    }

    // Staging paths live under tmp/, never under objects/ or meta/, so a
    // write in flight can never clobber a stored object whose own name
    // happens to end in a temp-looking suffix.
    async fn write_atomic(&self, path: &Path, body: &[u8]) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            async_fs::create_dir_all(parent).await?;
        }

        static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);
        let temp_path = self
            .tmp_dir
            .join(format!("write-{}", WRITE_SEQ.fetch_add(1, Ordering::Relaxed)));

        let mut file = async_fs::File::create(&temp_path).await?;
        file.write_all(body).await?;
        file.sync_all().await?;
        drop(file);

        async_fs::rename(&temp_path, path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_metadata() -> StoredMetadata {
        StoredMetadata {
            content_type: "application/zip".to_string(),
            artifact: ArtifactMetadata {
                repository: "octocat/widgets".to_string(),
                branch: "main".to_string(),
                git_ref: "refs/heads/main".to_string(),
                actor: "octocat".to_string(),
                run_id: "42".to_string(),
                run_number: "7".to_string(),
                uploaded_at: Utc::now(),
            },
        }
    }

    fn service() -> (FilesystemService, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let service = FilesystemService::new(temp_dir.path().to_path_buf())
            .expect("Failed to create filesystem service");
        (service, temp_dir)
    }

    #[tokio::test]
    async fn test_put_then_get_round_trip() {
        let (service, _guard) = service();
        service
            .put("main/latest/x.zip", b"zipped bytes", &test_metadata())
            .await
            .expect("put failed");

        let (bytes, metadata) = service
            .get("main/latest/x.zip")
            .await
            .expect("get failed")
            .expect("artifact missing");
        assert_eq!(bytes, b"zipped bytes");
        let metadata = metadata.expect("metadata missing");
        assert_eq!(metadata.content_type, "application/zip");
        assert_eq!(metadata.artifact.repository, "octocat/widgets");
    }

    #[tokio::test]
    async fn test_put_overwrites_prior_object() {
        let (service, _guard) = service();
        service
            .put("main/latest/x.zip", b"first", &test_metadata())
            .await
            .expect("first put failed");
        service
            .put("main/latest/x.zip", b"second", &test_metadata())
            .await
            .expect("second put failed");

        let (bytes, _) = service
            .get("main/latest/x.zip")
            .await
            .expect("get failed")
            .expect("artifact missing");
        assert_eq!(bytes, b"second");

        let entries = service.list("main/latest/").expect("list failed");
        assert_eq!(entries.len(), 1, "overwrite must not duplicate");
    }

    #[tokio::test]
    async fn test_tmp_suffixed_key_survives_neighboring_write() {
        let (service, _guard) = service();
        service
            .put("main/latest/x.zip.tmp", b"artifact-bytes", &test_metadata())
            .await
            .expect("put failed");
        // An unrelated upload to x.zip must not stage over x.zip.tmp.
        service
            .put("main/latest/x.zip", b"other", &test_metadata())
            .await
            .expect("put failed");

        let (bytes, _) = service
            .get("main/latest/x.zip.tmp")
            .await
            .expect("get failed")
            .expect("artifact missing");
        assert_eq!(bytes, b"artifact-bytes");
    }

    #[tokio::test]
    async fn test_list_includes_tmp_suffixed_key() {
        let (service, _guard) = service();
        service
            .put("main/latest/build.tmp", b"bytes", &test_metadata())
            .await
            .expect("put failed");

        let entries = service.list("main/latest/").expect("list failed");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "main/latest/build.tmp");
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let (service, _guard) = service();
        let result = service.get("main/latest/nope.zip").await.expect("get failed");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_list_scoped_to_prefix() {
        let (service, _guard) = service();
        service
            .put("main/latest/a.zip", b"a", &test_metadata())
            .await
            .expect("put failed");
        service
            .put("dev/latest/b.zip", b"b", &test_metadata())
            .await
            .expect("put failed");

        let entries = service.list("main/latest/").expect("list failed");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "main/latest/a.zip");
        assert_eq!(entries[0].size, 1);
    }

    #[tokio::test]
    async fn test_unsafe_keys_rejected() {
        let (service, _guard) = service();
        let err = service
            .get("../outside")
            .await
            .expect_err("expected unsafe key rejection");
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);

        assert!(service
            .put("a/../../b", b"x", &test_metadata())
            .await
            .is_err());
        assert!(service.list("/etc").is_err());
        assert!(!service.exists("../outside"));
    }
}
