//! Bridges the lazily populated tree to the kernel FUSE transport
//! (spec.md §4.7, component H).
//!
//! `fuser::Filesystem` callbacks are synchronous; the tree and cache are
//! async. Each callback borrows a handle to the current Tokio runtime and
//! calls `block_on` to drive the async work to completion, the same
//! bridging pattern `pantsbuild/pants`'s `brfs` uses to serve an async
//! content store through a synchronous FUSE trait.
//!
//! Inode numbers are handed out on demand and cached in both directions
//! (`ino -> Node` and logical path `-> ino`) so the same path always maps
//! to the same inode for the lifetime of the mount. Open file handles hold
//! a persistent `mmap` of the materialized cache file, kept in a bounded
//! [`moka::sync::Cache`] so a workload that opens many files doesn't leak
//! file descriptors; eviction closes the mapping.

use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, Request,
};
use memmap2::Mmap;

use crate::cache::CacheStore;
use crate::error::Error;
use crate::index::IndexClient;
use crate::tree::{LazyFolder, Node};

/// inode 1 is the FUSE-mandated root.
const ROOT_INO: u64 = 1;

/// `FOPEN_DIRECT_IO`: tells the kernel not to cache page data for this
/// open file, since a materialized cache file never changes underneath us
/// but mmap-backed reads make the kernel's own page cache redundant
/// (spec.md §6, "direct-I/O flag on open").
const FOPEN_DIRECT_IO: u32 = 1 << 0;

/// Attribute and directory-entry cache TTL handed back to the kernel.
/// Configurable via [`crate::cli::Cli::ttl_secs`]; defaults to one second
/// (spec.md §5, supplemented from the original's fixed one-second TTL).
pub const DEFAULT_TTL: Duration = Duration::from_secs(1);

struct OpenHandle {
    mmap: Mmap,
}

/// Owns the inode table and bridges [`fuser::Filesystem`] to the async
/// tree.
///
/// Open handles are keyed by logical path, not by the per-open `fh` the
/// kernel hands back to callers: the spec's handle lifecycle (spec.md §4.7)
/// keeps a persistent mmap per *path*, reused across repeated opens of the
/// same file, and closed only on LRU eviction or shutdown — not on every
/// `release`. `fh_paths` is the thin per-open indirection from the kernel's
/// `fh` back to that shared path-keyed handle; `read_locks` is the per-path
/// mutex spec.md §4.7/§5 requires to serialize reads of the same file.
pub struct LazyFs {
    root: Arc<LazyFolder>,
    index: Arc<IndexClient>,
    cache: Arc<CacheStore>,
    runtime: tokio::runtime::Handle,
    ttl: Duration,

    nodes: DashMap<u64, Node>,
    ino_by_path: DashMap<String, u64>,
    next_ino: AtomicU64,

    handles: moka::sync::Cache<String, Arc<OpenHandle>>,
    fh_paths: DashMap<u64, String>,
    read_locks: DashMap<String, Arc<Mutex<()>>>,
    next_fh: AtomicU64,
}

impl LazyFs {
    pub fn new(
        root: Arc<LazyFolder>,
        index: Arc<IndexClient>,
        cache: Arc<CacheStore>,
        runtime: tokio::runtime::Handle,
        ttl: Duration,
        max_open_handles: u64,
    ) -> Self {
        let nodes = DashMap::new();
        nodes.insert(ROOT_INO, Node::Folder(root.clone()));
        let ino_by_path = DashMap::new();
        ino_by_path.insert(String::new(), ROOT_INO);

        Self {
            root,
            index,
            cache,
            runtime,
            ttl,
            nodes,
            ino_by_path,
            next_ino: AtomicU64::new(ROOT_INO + 1),
            handles: moka::sync::Cache::new(max_open_handles),
            fh_paths: DashMap::new(),
            read_locks: DashMap::new(),
            next_fh: AtomicU64::new(1),
        }
    }

    fn read_lock_for(&self, path: &str) -> Arc<Mutex<()>> {
        self.read_locks.entry(path.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn logical_path_of(&self, node: &Node) -> String {
        match node {
            Node::Folder(f) => f.logical_path(),
            Node::File(f) => f.logical_path(),
        }
    }

    fn ino_for(&self, node: Node) -> u64 {
        let path = self.logical_path_of(&node);
        if let Some(existing) = self.ino_by_path.get(&path) {
            return *existing;
        }
        let ino = self.next_ino.fetch_add(1, Ordering::Relaxed);
        self.ino_by_path.insert(path, ino);
        self.nodes.insert(ino, node);
        ino
    }

    fn node(&self, ino: u64) -> Option<Node> {
        self.nodes.get(&ino).map(|n| n.clone())
    }

    /// Builds kernel attributes for `node`. Folders get `S_IFDIR|0755`,
    /// files `S_IFREG|0644` (spec.md §4.7's pinned mode bits). A file's
    /// size is always `size_bytes_exact` rather than the approximate
    /// index-provided size, per spec.md §4.7's `lookup` contract — most
    /// servers supply a `Content-Length` on the index page or a cheap
    /// `HEAD`, so this only materializes a file early when neither is
    /// available.
    fn attr_for(&self, ino: u64, node: &Node) -> FileAttr {
        let now = std::time::SystemTime::now();
        match node {
            Node::Folder(_) => FileAttr {
                ino,
                size: 0,
                blocks: 0,
                atime: now,
                mtime: now,
                ctime: now,
                crtime: now,
                kind: FileType::Directory,
                perm: 0o755,
                nlink: 2,
                uid: unsafe { libc::getuid() },
                gid: unsafe { libc::getgid() },
                rdev: 0,
                blksize: 512,
                flags: 0,
            },
            Node::File(file) => {
                let size = match self.runtime.block_on(file.size_bytes_exact(&self.index, &self.cache)) {
                    Ok(size) => size,
                    Err(err) => {
                        tracing::warn!(path = %file.logical_path(), error = %err, "size_bytes_exact failed, reporting 0");
                        0
                    }
                };
                FileAttr {
                    ino,
                    size,
                    blocks: size.div_ceil(512),
                    atime: now,
                    mtime: now,
                    ctime: now,
                    crtime: now,
                    kind: FileType::RegularFile,
                    perm: 0o644,
                    nlink: 1,
                    uid: unsafe { libc::getuid() },
                    gid: unsafe { libc::getgid() },
                    rdev: 0,
                    blksize: 512,
                    flags: 0,
                }
            }
        }
    }

    /// A placeholder attribute with inode 0, used to answer a failed
    /// lookup via `ReplyEntry` rather than `reply.error`, so the kernel
    /// caches the miss for `ttl` instead of re-asking immediately
    /// (spec.md §6, negative-lookup caching).
    fn negative_attr(&self) -> FileAttr {
        let now = std::time::SystemTime::now();
        FileAttr {
            ino: 0,
            size: 0,
            blocks: 0,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind: FileType::RegularFile,
            perm: 0,
            nlink: 0,
            uid: 0,
            gid: 0,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }
}

impl Filesystem for LazyFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        tracing::trace!(parent, ?name, "lookup");
        let Some(Node::Folder(parent_folder)) = self.node(parent) else {
            reply.error(libc::ENOTDIR);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };

        match self.runtime.block_on(parent_folder.lookup(name, &self.index)) {
            Ok(node) => {
                let ino = self.ino_for(node.clone());
                let attr = self.attr_for(ino, &node);
                reply.entry(&self.ttl, &attr, 0);
            }
            Err(Error::NotFound(_)) => {
                reply.entry(&self.ttl, &self.negative_attr(), 0);
            }
            Err(err) => reply.error(err.as_errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        tracing::trace!(ino, "getattr");
        match self.node(ino) {
            Some(node) => {
                let attr = self.attr_for(ino, &node);
                reply.attr(&self.ttl, &attr);
            }
            None => reply.error(libc::ENOENT),
        }
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        tracing::trace!(ino, offset, "readdir");
        let Some(Node::Folder(folder)) = self.node(ino) else {
            reply.error(libc::ENOTDIR);
            return;
        };

        let children = match self.runtime.block_on(folder.children(&self.index)) {
            Ok(children) => children,
            Err(err) => {
                reply.error(err.as_errno());
                return;
            }
        };

        let parent_ino = folder.parent().map(|p| self.ino_for(Node::Folder(p))).unwrap_or(ROOT_INO);

        let mut entries: Vec<(u64, FileType, String)> =
            vec![(ino, FileType::Directory, ".".to_string()), (parent_ino, FileType::Directory, "..".to_string())];
        for (name, child) in &children.folders {
            let child_ino = self.ino_for(Node::Folder(child.clone()));
            entries.push((child_ino, FileType::Directory, name.clone()));
        }
        for (name, child) in &children.files {
            let child_ino = self.ino_for(Node::File(child.clone()));
            entries.push((child_ino, FileType::RegularFile, name.clone()));
        }

        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(Node::File(file)) = self.node(ino) else {
            reply.error(libc::EISDIR);
            return;
        };
        let logical_path = file.logical_path();
        tracing::trace!(ino, path = %logical_path, "open");

        // The mmap is kept per logical path, not per open: a second
        // concurrent (or later) open of the same file reuses it instead of
        // remapping, and `release` below never tears it down (spec.md §4.7
        // handle lifecycle; only LRU eviction in `handles` closes a mapping).
        if self.handles.get(&logical_path).is_none() {
            let materialize = async { self.cache.ensure_materialized(&logical_path, &file.url).await };
            let path = match self.runtime.block_on(materialize) {
                Ok(path) => path,
                Err(err) => {
                    reply.error(err.as_errno());
                    return;
                }
            };

            let mmap = match std::fs::File::open(&path).and_then(|f| unsafe { Mmap::map(&f) }) {
                Ok(m) => m,
                Err(_) => {
                    reply.error(libc::EIO);
                    return;
                }
            };
            self.handles.insert(logical_path.clone(), Arc::new(OpenHandle { mmap }));
        }

        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.fh_paths.insert(fh, logical_path);
        reply.opened(fh, FOPEN_DIRECT_IO);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.fh_paths.get(&fh).map(|p| p.clone()) else {
            reply.error(libc::EBADF);
            return;
        };
        let Some(handle) = self.handles.get(&path) else {
            reply.error(libc::EBADF);
            return;
        };

        // Reads of the same file strictly serialize under its per-path
        // mutex (spec.md §4.7/§5); the mmap itself never mutates so this
        // only orders concurrent callers, it doesn't protect shared state.
        let lock = self.read_lock_for(&path);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let data = &handle.mmap;
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(size as usize).min(data.len());
        reply.data(&data[start..end]);
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        // No-op per spec.md §4.7: handles are not pinned, and the backing
        // mmap (keyed by path, not by this `fh`) outlives the individual
        // open/release pair so later opens of the same file reuse it.
        tracing::trace!(fh, "release");
        self.fh_paths.remove(&fh);
        reply.ok();
    }
}

/// Mounts `fs` at `mountpoint`, blocking the calling thread until the mount
/// is unmounted. `fs_name`/`name` mirror the original implementation's
/// fixed mount option pair (spec.md §5).
pub fn mount(fs: LazyFs, mountpoint: &std::path::Path) -> std::io::Result<()> {
    let options = vec![
        fuser::MountOption::RO,
        fuser::MountOption::FSName("lazyfs".to_string()),
        fuser::MountOption::Subtype("lazyfs".to_string()),
    ];
    fuser::mount2(fs, mountpoint, &options)
}
