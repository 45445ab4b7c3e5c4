//! Exposes a remote HTTP-served directory hierarchy as a local, read-only
//! FUSE filesystem.
//!
//! Directory listings and file contents are discovered by scraping HTTP
//! index pages rooted at a configurable base URL, fetched lazily on demand,
//! cached persistently on local disk, and served through the kernel's
//! user-space filesystem interface.
//!
//! The module layout mirrors the component table of the design: [`gate`]
//! bounds concurrent fetches, [`index`] scrapes index pages, [`cache`]
//! materializes file content on disk, [`tree`] holds the lazily-populated
//! node graph, [`walk`] resolves logical paths through it, [`listing`]
//! implements the non-FUSE CLI commands, and [`fsadapter`] bridges the tree
//! to the kernel FUSE transport.

pub mod cache;
pub mod cli;
pub mod error;
pub mod fsadapter;
pub mod gate;
pub mod index;
pub mod listing;
pub mod path;
pub mod tree;
pub mod walk;

pub use error::{Error, Result};
