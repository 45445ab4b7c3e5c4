use std::path::PathBuf;
use std::sync::{Arc, Weak};

use tokio::sync::RwLock;

use crate::cache::CacheStore;
use crate::error::{Error, Result};
use crate::index::IndexClient;
use crate::path;

use super::folder::LazyFolder;

/// A lazily sized leaf node in the scraped tree.
///
/// `parent` is a [`Weak`] reference: the parent's `Children` map is the
/// only strong owner of a file, so a strong back-reference here would make
/// every file keep its parent folder (and transitively everything above
/// it) alive forever, even after the folder is dropped from the tree
/// (spec.md §9 design note).
pub struct LazyFile {
    pub name: String,
    pub url: String,
    parent: Weak<LazyFolder>,
    /// `None` until resolved; `Some(None)` means resolved-but-unknown
    /// (neither the index page nor a `HEAD` produced a length).
    size: RwLock<Option<Option<u64>>>,
}

impl LazyFile {
    pub fn new(name: String, url: String, content_length: Option<u64>, parent: &Arc<LazyFolder>) -> Arc<Self> {
        let size = match content_length {
            Some(n) => Some(Some(n)),
            None => None,
        };
        Arc::new(Self { name, url, parent: Arc::downgrade(parent), size: RwLock::new(size) })
    }

    pub fn parent(&self) -> Option<Arc<LazyFolder>> {
        self.parent.upgrade()
    }

    pub fn logical_path(&self) -> String {
        match self.parent() {
            Some(parent) => path::join(&parent.logical_path(), &self.name),
            None => self.name.clone(),
        }
    }

    /// Returns the approximate size, resolving it with a `HEAD` request the
    /// first time it's asked for if the index page didn't already supply
    /// one (spec.md §4.2/§4.6). A failed `HEAD` is a soft failure: logged
    /// and treated as size 0 rather than propagated, so one unreachable
    /// file doesn't abort a whole listing.
    pub async fn size_bytes_approximate(&self, index: &IndexClient) -> u64 {
        {
            let guard = self.size.read().await;
            if let Some(known) = *guard {
                return known.unwrap_or(0);
            }
        }
        let mut guard = self.size.write().await;
        if let Some(known) = *guard {
            return known.unwrap_or(0);
        }
        match index.head_content_length(&self.url).await {
            Ok(len) => {
                *guard = Some(len);
                len.unwrap_or(0)
            }
            Err(err) => {
                tracing::warn!(url = %self.url, error = %err, "HEAD failed approximating size, treating as 0");
                0
            }
        }
    }

    /// Returns the size if already known, without triggering a `HEAD`.
    pub async fn cached_size(&self) -> Option<u64> {
        self.size.read().await.flatten()
    }

    /// Guarantees a byte-accurate size: the local file's length if already
    /// materialized, a known `Content-Length` if one is cached, or
    /// materializes the file and reports its length (spec.md §4.4).
    /// Idempotent — materializing twice is a cheap existence check.
    pub async fn size_bytes_exact(&self, index: &IndexClient, cache: &CacheStore) -> Result<u64> {
        let logical_path = self.logical_path();
        if let Some(len) = cache.local_size(&logical_path).await? {
            return Ok(len);
        }
        if let Some(len) = self.cached_size().await {
            return Ok(len);
        }
        let path = self.ensure_fetched(cache).await?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| Error::cache_io(path.display().to_string(), e))?;
        Ok(meta.len())
    }

    /// Materializes this file via `cache`, coalescing with concurrent
    /// callers (spec.md §4.3).
    pub async fn ensure_fetched(&self, cache: &CacheStore) -> Result<PathBuf> {
        cache.ensure_materialized(&self.logical_path(), &self.url).await
    }

    /// The deterministic local path this file materializes to. Valid to
    /// open only after [`Self::ensure_fetched`] has succeeded.
    pub fn cache_path(&self, cache: &CacheStore) -> PathBuf {
        cache.cache_path_for(&self.logical_path())
    }
}
