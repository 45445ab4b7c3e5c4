//! Command-line interface (spec.md §6, supplemented by SPEC_FULL.md §5).
//!
//! Mirrors the pinned shape from spec.md §6 exactly:
//! `program [--fetch-limit N] [--fuse-version fuse|fuse3] <cacheDir> <rootURL>
//! <command> [arg]`. The ambient `--ttl-secs`/`--max-open-handles` flags and
//! the second, `mount`-only positional are additions (SPEC_FULL.md §4.3/§5)
//! layered on top without disturbing that shape.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::gate::DEFAULT_FETCH_LIMIT;

/// Lazily scrapes an HTTP-served directory tree and serves it read-only,
/// either as one-shot listing/prefetch commands or mounted over FUSE.
#[derive(Debug, Parser)]
#[command(name = "lazyfs", version, about)]
pub struct Cli {
    /// Maximum number of concurrent outbound HTTP requests.
    #[arg(long, default_value_t = DEFAULT_FETCH_LIMIT)]
    pub fetch_limit: usize,

    /// Which FUSE ABI to present. `fuse` is accepted for compatibility with
    /// the original tool but is served identically to `fuse3`.
    #[arg(long, default_value = "fuse3")]
    pub fuse_version: String,

    /// Attribute, directory-entry, and negative-lookup cache TTL handed to
    /// the kernel, in seconds. Only meaningful for `mount`.
    #[arg(long, default_value_t = 1)]
    pub ttl_secs: u64,

    /// Maximum number of concurrently open file handles kept memory-mapped.
    /// Only meaningful for `mount`.
    #[arg(long, default_value_t = 4096)]
    pub max_open_handles: u64,

    /// Local directory materialized files are cached under.
    pub cache_dir: PathBuf,

    /// Base URL of the HTTP index tree to scrape. Must end in `/`.
    pub root_url: String,

    /// Which operation to run.
    pub command: CommandName,

    /// The command's single argument: a logical path for every command
    /// except `mount`, where it's the mountpoint (or the subtree path, if
    /// a second positional follows).
    pub arg: Option<String>,

    /// Present only for `mount <path> <mountpoint>`: mounts `arg` as a
    /// subtree path instead of the root (SPEC_FULL.md §5).
    pub mountpoint: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CommandName {
    #[value(name = "list")]
    List,
    #[value(name = "list_recursive")]
    ListRecursive,
    #[value(name = "du_approximate")]
    DuApproximate,
    #[value(name = "prefetch-meta")]
    PrefetchMeta,
    #[value(name = "prefetch-files")]
    PrefetchFiles,
    #[value(name = "mount")]
    Mount,
}
