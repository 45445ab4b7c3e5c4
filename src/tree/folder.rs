use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::index::IndexClient;
use crate::path;

use super::{file::LazyFile, Node, Population, Populating};

/// A folder's children, keyed by name. Cheap to clone: every value is an
/// `Arc`.
#[derive(Clone, Default)]
pub struct Children {
    pub folders: BTreeMap<String, Arc<LazyFolder>>,
    pub files: BTreeMap<String, Arc<LazyFile>>,
}

impl Children {
    pub fn len(&self) -> usize {
        self.folders.len() + self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.files.is_empty()
    }
}

/// A lazily populated directory node in the scraped tree.
///
/// `name` is empty only for the root. `url` is the folder's absolute index
/// URL (always ending in `/`). `parent` is `None` only for the root;
/// unlike [`LazyFile`], a folder's back-reference does not need to be weak
/// for correctness (folders don't hold a strong ref to themselves anywhere
/// that would create a cycle through `parent`), but it is kept weak anyway
/// for symmetry with `LazyFile` and so the tree can be pruned from the
/// leaves without the root keeping every folder alive by accident.
pub struct LazyFolder {
    pub name: String,
    pub url: String,
    parent: Option<Weak<LazyFolder>>,
    state: RwLock<Population<Children>>,
}

impl LazyFolder {
    pub fn new_root(url: impl Into<String>) -> Arc<Self> {
        let mut url = url.into();
        if !url.ends_with('/') {
            url.push('/');
        }
        Arc::new(Self { name: String::new(), url, parent: None, state: RwLock::new(Population::Unpopulated) })
    }

    fn new_child(name: String, url: String, parent: &Arc<LazyFolder>) -> Arc<Self> {
        Arc::new(Self {
            name,
            url,
            parent: Some(Arc::downgrade(parent)),
            state: RwLock::new(Population::Unpopulated),
        })
    }

    pub fn parent(&self) -> Option<Arc<LazyFolder>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Reconstructs this folder's logical path by walking parent links.
    pub fn logical_path(&self) -> String {
        let mut segments = Vec::new();
        if !self.name.is_empty() {
            segments.push(self.name.clone());
        }
        let mut current = self.parent();
        while let Some(folder) = current {
            if !folder.name.is_empty() {
                segments.push(folder.name.clone());
            }
            current = folder.parent();
        }
        segments.reverse();
        segments.join("/")
    }

    /// Returns this folder's children, fetching them from the index client
    /// on first access. Concurrent callers during that fetch share the
    /// *same* outcome as the one caller who actually issued the fetch
    /// (spec.md §8, single-flight property) rather than each racing to
    /// become a new owner when it fails; a failed fetch resets to
    /// `Unpopulated` so a later, non-coalesced call can retry.
    pub async fn children(self: &Arc<Self>, index: &IndexClient) -> Result<Children> {
        loop {
            {
                let guard = self.state.read().await;
                match &*guard {
                    Population::Populated(children) => return Ok(children.clone()),
                    Population::Populating(populating) => {
                        let populating = populating.clone();
                        drop(guard);
                        populating.notify.notified().await;
                        let result = populating
                            .result
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .clone()
                            .expect("owner stores a result before notifying waiters");
                        return result;
                    }
                    Population::Unpopulated => {}
                }
            }

            let populating = Populating::new();
            {
                let mut guard = self.state.write().await;
                if !matches!(&*guard, Population::Unpopulated) {
                    continue;
                }
                *guard = Population::Populating(populating.clone());
            }

            let result = self.populate(index).await;
            *populating.result.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(result.clone());

            let mut guard = self.state.write().await;
            *guard = match &result {
                Ok(children) => Population::Populated(children.clone()),
                Err(_) => Population::Unpopulated,
            };
            drop(guard);
            populating.notify.notify_waiters();
            return result;
        }
    }

    async fn populate(self: &Arc<Self>, index: &IndexClient) -> Result<Children> {
        let listing = index.list_index(&self.url).await?;
        let mut children = Children::default();
        for (name, entry) in listing.folders {
            let folder = LazyFolder::new_child(name.clone(), entry.url, self);
            children.folders.insert(name, folder);
        }
        for (name, entry) in listing.files {
            let file = LazyFile::new(name.clone(), entry.url, entry.content_length, self);
            children.files.insert(name, file);
        }
        Ok(children)
    }

    /// Looks up a single child by name, populating this folder if needed.
    pub async fn lookup(self: &Arc<Self>, name: &str, index: &IndexClient) -> Result<Node> {
        let children = self.children(index).await?;
        if let Some(folder) = children.folders.get(name) {
            return Ok(Node::Folder(folder.clone()));
        }
        if let Some(file) = children.files.get(name) {
            return Ok(Node::File(file.clone()));
        }
        Err(Error::NotFound(path::join(&self.logical_path(), name)))
    }

    /// Returns a cached snapshot of children without triggering a fetch,
    /// or `None` if this folder has never been populated. Used by the FUSE
    /// adapter to answer `lookup`/`getattr` against inode numbers it has
    /// already handed out without refetching.
    pub async fn cached_children(&self) -> Option<Children> {
        match &*self.state.read().await {
            Population::Populated(children) => Some(children.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::FetchGate;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// An index-page server that always answers 404 and counts how many
    /// requests it served — used to assert N concurrent `children()`
    /// callers coalesce onto a single index fetch even when it fails.
    fn spawn_failing_index_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = requests.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let body = b"not found";
                let header = format!(
                    "HTTP/1.1 404 Not Found\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(header.as_bytes());
                let _ = stream.write_all(body);
            }
        });
        (format!("http://{addr}/"), requests)
    }

    #[tokio::test]
    async fn concurrent_population_failures_share_one_fetch_and_error() {
        let (root_url, requests) = spawn_failing_index_server();
        let gate = FetchGate::new(4);
        let http = reqwest::Client::new();
        let index = Arc::new(IndexClient::new(http, gate, &root_url).unwrap());
        let root = LazyFolder::new_root(root_url);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let root = root.clone();
            let index = index.clone();
            tasks.push(tokio::spawn(async move { root.children(&index).await }));
        }

        let mut failures = 0;
        for t in tasks {
            match t.await.unwrap() {
                Err(Error::HttpStatus { status: 404, .. }) => failures += 1,
                other => panic!("expected every coalesced caller to see the same 404, got {other:?}"),
            }
        }
        assert_eq!(failures, 8);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(requests.load(Ordering::SeqCst), 1, "8 coalesced callers must share a single underlying fetch");
    }
}
