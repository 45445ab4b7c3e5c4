//! Listing, sizing, and prefetch helpers (spec.md §4.5/§4.6, component G).
//!
//! These sit above [`crate::walk`] and turn the raw tree into what the CLI
//! prints: flat and recursive directory listings, approximate disk-usage
//! totals, and the eager `prefetch-meta` / `prefetch-files` traversals.

use std::sync::Arc;

use futures::future::join_all;

use crate::cache::CacheStore;
use crate::error::Result;
use crate::index::IndexClient;
use crate::path;
use crate::tree::folder::Children;
use crate::tree::{LazyFolder, Node};
use crate::walk;

/// One entry in a directory listing.
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub is_folder: bool,
    pub size_approx: Option<u64>,
    pub special: Option<SpecialKind>,
}

/// Heuristic classification of a folder's contents (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialKind {
    /// Contains a `.zarray` file: a zarr array chunk directory.
    Zarr,
    /// Contains more than 20 `.tif` files: a flat TIFF tile archive.
    TiffArchive,
}

/// Detects whether a folder's children match one of the known special
/// shapes. Checked against already-populated children only; callers
/// populate the folder first via [`crate::tree::folder::LazyFolder::children`].
pub fn detect_special(children: &Children) -> Option<SpecialKind> {
    if children.files.contains_key(".zarray") {
        return Some(SpecialKind::Zarr);
    }
    let tif_count = children
        .files
        .keys()
        .filter(|name| name.to_ascii_lowercase().ends_with(".tif"))
        .count();
    if tif_count > 20 {
        return Some(SpecialKind::TiffArchive);
    }
    None
}

/// Returns the one-line summary printed instead of enumerating a special
/// folder's files (spec.md §8, S6).
pub fn special_summary(kind: SpecialKind) -> &'static str {
    match kind {
        SpecialKind::Zarr => "probably zarr archive",
        SpecialKind::TiffArchive => "probably tiff archive",
    }
}

/// Lists the immediate children of `logical_path`, resolving each file's
/// approximate size concurrently (bounded by the shared [`crate::gate::FetchGate`]
/// rather than by this function). Unlike [`list_recursive`], this always
/// enumerates files even in a folder the special-folder heuristic would
/// otherwise summarize.
pub async fn list(root: &Arc<LazyFolder>, logical_path: &str, index: &IndexClient) -> Result<Vec<Entry>> {
    let folder = walk::walk_to_folder(root, logical_path, index).await?;
    let children = folder.children(index).await?;
    entries_for(&children, index).await
}

async fn entries_for(children: &Children, index: &IndexClient) -> Result<Vec<Entry>> {
    let mut entries = Vec::with_capacity(children.len());
    for name in children.folders.keys() {
        entries.push(Entry { name: name.clone(), is_folder: true, size_approx: None, special: None });
    }

    let file_futures = children.files.values().map(|file| async move {
        let size = file.size_bytes_approximate(index).await;
        Entry { name: file.name.clone(), is_folder: false, size_approx: Some(size), special: None }
    });
    entries.extend(join_all(file_futures).await);
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Recursively lists every descendant of `logical_path`, yielding
/// `(logical_path, entry)` pairs in a deterministic, depth-first,
/// name-sorted order. A folder matching the special-folder heuristic
/// (spec.md §4.7) contributes a single summary entry in place of its
/// files and is not descended into further.
pub fn list_recursive<'a>(
    root: &'a Arc<LazyFolder>,
    logical_path: &'a str,
    index: &'a IndexClient,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<(String, Entry)>>> + 'a>> {
    Box::pin(async move {
        let folder = walk::walk_to_folder(root, logical_path, index).await?;
        let children = folder.children(index).await?;

        if let Some(kind) = detect_special(&children) {
            let summary = Entry {
                name: special_summary(kind).to_string(),
                is_folder: false,
                size_approx: None,
                special: Some(kind),
            };
            return Ok(vec![(logical_path.to_string(), summary)]);
        }

        let entries = entries_for(&children, index).await?;
        let mut out = Vec::new();
        for entry in entries {
            let child_path = path::join(logical_path, &entry.name);
            let is_folder = entry.is_folder;
            out.push((child_path.clone(), entry));
            if is_folder {
                let nested = list_recursive(root, &child_path, index).await?;
                out.extend(nested);
            }
        }
        Ok(out)
    })
}

/// Sums the approximate size of every file under `logical_path`, recursing
/// through all descendant folders.
pub fn du_approximate<'a>(
    root: &'a Arc<LazyFolder>,
    logical_path: &'a str,
    index: &'a IndexClient,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<u64>> + 'a>> {
    Box::pin(async move {
        let folder = walk::walk_to_folder(root, logical_path, index).await?;
        let children = folder.children(index).await?;

        let file_sizes =
            join_all(children.files.values().map(|file| async move { file.size_bytes_approximate(index).await }))
                .await;
        let mut total: u64 = file_sizes.into_iter().sum();

        for name in children.folders.keys() {
            let child_path = path::join(logical_path, name);
            total += du_approximate(root, &child_path, index).await?;
        }
        Ok(total)
    })
}

/// Eagerly populates every folder under `logical_path` so later traversals
/// are served from the in-memory tree without further index fetches.
pub fn prefetch_meta<'a>(
    root: &'a Arc<LazyFolder>,
    logical_path: &'a str,
    index: &'a IndexClient,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + 'a>> {
    Box::pin(async move {
        let folder = walk::walk_to_folder(root, logical_path, index).await?;
        let children = folder.children(index).await?;
        for (name, _) in &children.folders {
            let child_path = path::join(logical_path, name);
            prefetch_meta(root, &child_path, index).await?;
        }
        Ok(())
    })
}

/// Eagerly materializes every file under `logical_path` into `cache`.
pub fn prefetch_files<'a>(
    root: &'a Arc<LazyFolder>,
    logical_path: &'a str,
    index: &'a IndexClient,
    cache: &'a CacheStore,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + 'a>> {
    Box::pin(async move {
        let folder = walk::walk_to_folder(root, logical_path, index).await?;
        let children = folder.children(index).await?;

        let downloads = children.files.values().map(|file| async move {
            let child_path = path::join(logical_path, &file.name);
            cache.ensure_materialized(&child_path, &file.url).await.map(|_| ())
        });
        for result in join_all(downloads).await {
            result?;
        }

        for (name, _) in &children.folders {
            let child_path = path::join(logical_path, name);
            prefetch_files(root, &child_path, index, cache).await?;
        }
        Ok(())
    })
}

/// Formats a byte count the way `du -h`/`ls -lh` do: one or two significant
/// digits followed by a `K`/`M`/`G`/`T` unit, or the plain byte count below
/// 1024.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["K", "M", "G", "T"];
    if bytes < 1024 {
        return format!("{bytes}B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = UNITS[0];
    for candidate in &UNITS[1..] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = candidate;
    }
    if value < 10.0 {
        format!("{value:.1}{unit}")
    } else {
        format!("{value:.0}{unit}")
    }
}

/// Formats a byte count as a fixed-unit MiB figure with two decimals
/// (spec.md §8, S3), the format `du_approximate` prints its totals in.
pub fn mib_string(bytes: u64) -> String {
    format!("{:.2} MiB", bytes as f64 / (1024.0 * 1024.0))
}

/// Formats one `list` entry the way spec.md §8 S1 pins literally: a folder
/// prints as `name/`, a file as `name N bytes` with the plain byte count —
/// not `human_size`'s abbreviated unit, which is for `list_recursive`
/// instead.
pub fn format_entry(entry: &Entry) -> String {
    if entry.is_folder {
        format!("{}/", entry.name)
    } else {
        format!("{} {} bytes", entry.name, entry.size_approx.unwrap_or(0))
    }
}
