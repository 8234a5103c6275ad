//! cache
//! -----
//! Filesystem-backed resource cache. Cached files are immutable: a resource
//! is downloaded at most once and every later request reuses the same local
//! file. Downloads stream to a `.part` temp path and are renamed into place
//! only on success, so a partially written file is never visible under a
//! cache name.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::format::TabularFormat;

/// A resource present in the cache.
#[derive(Debug, Clone)]
pub struct CachedResource {
    pub resource_id: u64,
    pub declared_format: TabularFormat,
    pub actual_format: TabularFormat,
    pub local_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> EngineResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, resource_id: u64, fmt: TabularFormat) -> PathBuf {
        self.root.join(format!("resource_{}.{}", resource_id, fmt.extension()))
    }

    /// Look the resource up in the cache. In-progress `.part` files are
    /// never returned.
    pub fn find(&self, resource_id: u64) -> Option<PathBuf> {
        for fmt in TabularFormat::ALL {
            let p = self.file_path(resource_id, fmt);
            if p.is_file() {
                return Some(p);
            }
        }
        None
    }

    /// Return the cached file for `resource_id`, downloading it first if
    /// absent. The declared format picks the filename extension; the actual
    /// format is sniffed by the caller afterwards.
    pub async fn ensure_cached(
        &self,
        client: &reqwest::Client,
        resource_id: u64,
        url: &str,
        declared: TabularFormat,
    ) -> EngineResult<PathBuf> {
        if let Some(existing) = self.find(resource_id) {
            debug!(target: "tabq::cache", resource_id, path = %existing.display(), "cache hit");
            return Ok(existing);
        }

        let final_path = self.file_path(resource_id, declared);
        let tmp_path = self
            .root
            .join(format!("resource_{}.{}.{}.part", resource_id, declared.extension(), Uuid::new_v4()));

        match self.download_to(client, resource_id, url, &tmp_path).await {
            Ok(bytes) => {
                tokio::fs::rename(&tmp_path, &final_path)
                    .await
                    .map_err(|e| EngineError::transport(resource_id, e.to_string()))?;
                info!(target: "tabq::cache", resource_id, bytes, path = %final_path.display(),
                    "resource downloaded");
                Ok(final_path)
            }
            Err(e) => {
                if tokio::fs::remove_file(&tmp_path).await.is_err() {
                    warn!(target: "tabq::cache", resource_id, path = %tmp_path.display(),
                        "could not remove partial download");
                }
                Err(e)
            }
        }
    }

    async fn download_to(
        &self,
        client: &reqwest::Client,
        resource_id: u64,
        url: &str,
        dest: &Path,
    ) -> EngineResult<u64> {
        let resp = client
            .get(url)
            .send()
            .await
            .map_err(|e| EngineError::transport(resource_id, e.to_string()))?;
        if !resp.status().is_success() {
            return Err(EngineError::transport(
                resource_id,
                format!("download returned HTTP {} for {}", resp.status(), url),
            ));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| EngineError::transport(resource_id, e.to_string()))?;
        let mut stream = resp.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| EngineError::transport(resource_id, e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| EngineError::transport(resource_id, e.to_string()))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| EngineError::transport(resource_id, e.to_string()))?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_locates_cached_file_by_any_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(tmp.path()).unwrap();
        std::fs::write(tmp.path().join("resource_42.tsv"), "a\tb\n").unwrap();

        let found = store.find(42).unwrap();
        assert!(found.ends_with("resource_42.tsv"));
        assert!(store.find(43).is_none());
    }

    #[test]
    fn partial_downloads_are_invisible() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(tmp.path()).unwrap();
        std::fs::write(tmp.path().join("resource_7.csv.abc.part"), "half").unwrap();
        assert!(store.find(7).is_none());
    }

    #[tokio::test]
    async fn cached_file_is_never_redownloaded() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(tmp.path()).unwrap();
        let seeded = tmp.path().join("resource_9.csv");
        std::fs::write(&seeded, "a,b\n1,2\n").unwrap();

        // unroutable URL: must not be contacted because the file exists
        let client = reqwest::Client::new();
        let p = store
            .ensure_cached(&client, 9, "http://127.0.0.1:1/never", TabularFormat::Csv)
            .await
            .unwrap();
        assert_eq!(p, seeded);
        assert_eq!(std::fs::read_to_string(&p).unwrap(), "a,b\n1,2\n");
    }

    #[tokio::test]
    async fn failed_download_leaves_no_cache_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(tmp.path()).unwrap();
        let client = reqwest::Client::new();

        let err = store
            .ensure_cached(&client, 11, "http://127.0.0.1:1/nope", TabularFormat::Csv)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transport_error");
        assert!(store.find(11).is_none());
        // no stray temp files either
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }
}
