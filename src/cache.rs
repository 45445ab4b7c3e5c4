//! Persistent local cache store (spec.md §4.3, component C).
//!
//! Materialized files live under a configured root directory at the same
//! relative path their logical path implies. A file is materialized by
//! streaming it to a temporary sibling and renaming it into place, so a
//! reader never observes a partially written file (spec.md §8, atomic
//! materialization property) — the same pattern `tarkah-mirror-caddy` uses
//! for its on-disk cache. Concurrent callers asking for the same path while
//! a download is in flight all await that one download rather than
//! starting their own (spec.md §8, single-flight property).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::gate::FetchGate;

static TEMP_SUFFIX: AtomicU64 = AtomicU64::new(0);

/// One in-progress materialization, shared by every caller coalesced onto
/// it. `result` is filled in by the owner right before `notify_waiters`
/// fires, so a woken waiter reads the owner's actual outcome instead of
/// re-entering the download path itself (spec.md §4.3: "all callers
/// observe success/failure identically"; §8 property 2: exactly one
/// underlying GET for N concurrent callers, success *or* failure).
struct InFlight {
    notify: Notify,
    result: Mutex<Option<Result<()>>>,
}

/// Stores and serves materialized copies of remote files under `root`.
pub struct CacheStore {
    root: PathBuf,
    http: reqwest::Client,
    gate: FetchGate,
    inflight: DashMap<String, Arc<InFlight>>,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>, http: reqwest::Client, gate: FetchGate) -> Self {
        Self { root: root.into(), http, gate, inflight: DashMap::new() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The on-disk path a logical path materializes to. Does not imply the
    /// file exists yet.
    pub fn cache_path_for(&self, logical_path: &str) -> PathBuf {
        if logical_path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(logical_path)
        }
    }

    /// Returns the size of the already-materialized file at `logical_path`,
    /// or `None` if it hasn't been materialized yet.
    pub async fn local_size(&self, logical_path: &str) -> Result<Option<u64>> {
        let path = self.cache_path_for(logical_path);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::cache_io(path.display().to_string(), e)),
        }
    }

    /// Ensures `logical_path` is materialized on disk from `url`, fetching
    /// it if necessary, and returns its local path. Once materialized a
    /// path stays materialized: a second call is a cheap existence check
    /// (spec.md §8, population monotonicity property).
    pub async fn ensure_materialized(&self, logical_path: &str, url: &str) -> Result<PathBuf> {
        let path = self.cache_path_for(logical_path);

        loop {
            if tokio::fs::try_exists(&path)
                .await
                .map_err(|e| Error::cache_io(path.display().to_string(), e))?
            {
                return Ok(path);
            }

            let (inflight, owner) = match self.inflight.entry(logical_path.to_string()) {
                dashmap::mapref::entry::Entry::Occupied(existing) => (existing.get().clone(), false),
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    let inflight = Arc::new(InFlight { notify: Notify::new(), result: Mutex::new(None) });
                    slot.insert(inflight.clone());
                    (inflight, true)
                }
            };

            if !owner {
                // Wait for the owner to finish, then read *its* outcome
                // straight off the shared slot rather than looping back
                // around to contend for ownership again — a failure must
                // reach every coalesced waiter identically, not just kick
                // off a fresh GET from whoever wakes up first.
                inflight.notify.notified().await;
                let result = inflight
                    .result
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .clone()
                    .expect("owner stores a result before notifying waiters");
                return result.map(|()| path);
            }

            let result = self.download_to(&path, url).await;
            *inflight.result.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(result.clone());
            self.inflight.remove(logical_path);
            inflight.notify.notify_waiters();
            return result.map(|()| path);
        }
    }

    async fn download_to(&self, dest: &Path, url: &str) -> Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::cache_io(parent.display().to_string(), e))?;
        }

        let temp_path = sibling_temp_path(dest);
        {
            let _permit = self.gate.acquire().await;
            let resp = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|e| Error::network(url, e))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(Error::http_status(url, status.as_u16()));
            }

            let mut file = tokio::fs::File::create(&temp_path)
                .await
                .map_err(|e| Error::cache_io(temp_path.display().to_string(), e))?;
            let mut stream = resp.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| Error::network(url, e))?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| Error::cache_io(temp_path.display().to_string(), e))?;
            }
            file.flush()
                .await
                .map_err(|e| Error::cache_io(temp_path.display().to_string(), e))?;
        }

        tokio::fs::rename(&temp_path, dest).await.map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            Error::cache_io(dest.display().to_string(), e)
        })
    }
}

fn sibling_temp_path(dest: &Path) -> PathBuf {
    let suffix = TEMP_SUFFIX.fetch_add(1, Ordering::Relaxed);
    let file_name = dest.file_name().and_then(|n| n.to_str()).unwrap_or("file");
    let temp_name = format!(".{file_name}.{}.{}.tmp", std::process::id(), suffix);
    dest.with_file_name(temp_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::net::TcpListener;
    use std::sync::atomic::AtomicUsize;

    fn spawn_http_server(body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = std::io::Read::read(&mut stream, &mut buf);
                let header = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(header.as_bytes());
                let _ = stream.write_all(body);
            }
        });
        format!("http://{addr}/f")
    }

    /// Like [`spawn_http_server`], but answers every connection with a 404
    /// and counts how many it served — used to assert that N coalesced
    /// callers produce exactly one underlying GET even when it fails.
    fn spawn_failing_server_counting() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = requests.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 1024];
                let _ = std::io::Read::read(&mut stream, &mut buf);
                let body = b"not found";
                let header = format!(
                    "HTTP/1.1 404 Not Found\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(header.as_bytes());
                let _ = stream.write_all(body);
            }
        });
        (format!("http://{addr}/missing"), requests)
    }

    #[tokio::test]
    async fn materializes_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let url = spawn_http_server(b"hello world");
        let store = CacheStore::new(dir.path(), reqwest::Client::new(), FetchGate::new(4));

        let path = store.ensure_materialized("a/f.txt", &url).await.unwrap();
        let contents = tokio::fs::read(&path).await.unwrap();
        assert_eq!(contents, b"hello world");

        // Second call finds the file already there; no server to talk to
        // this time, so this would fail if it tried to refetch.
        let path2 = store.ensure_materialized("a/f.txt", &url).await.unwrap();
        assert_eq!(path, path2);
    }

    #[tokio::test]
    async fn concurrent_requests_coalesce() {
        let dir = tempfile::tempdir().unwrap();
        let url = spawn_http_server(b"shared payload");
        let store = Arc::new(CacheStore::new(dir.path(), reqwest::Client::new(), FetchGate::new(4)));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let url = url.clone();
            tasks.push(tokio::spawn(async move { store.ensure_materialized("shared.bin", &url).await }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn concurrent_failures_share_the_same_error_and_one_get() {
        let dir = tempfile::tempdir().unwrap();
        let (url, requests) = spawn_failing_server_counting();
        let store = Arc::new(CacheStore::new(dir.path(), reqwest::Client::new(), FetchGate::new(4)));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let url = url.clone();
            tasks.push(tokio::spawn(async move { store.ensure_materialized("missing.bin", &url).await }));
        }

        let mut failures = 0;
        for t in tasks {
            match t.await.unwrap() {
                Err(Error::HttpStatus { status: 404, .. }) => failures += 1,
                other => panic!("expected every coalesced caller to see the same 404, got {other:?}"),
            }
        }
        assert_eq!(failures, 8);

        // Give a straggler connection (if the bug reintroduced one) time to
        // land before counting.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(requests.load(Ordering::SeqCst), 1, "8 coalesced callers must share a single underlying GET");
    }
}
