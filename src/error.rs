//! Error taxonomy shared by every component.
//!
//! [`Error`] is deliberately flat rather than nested per-module: the FUSE
//! adapter needs to match on a concrete variant to pick an errno, and a
//! nested `enum Error { Cache(cache::Error), ... }` would make every match
//! arm at that boundary two levels deep for no benefit.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while discovering, fetching, or serving the tree.
#[derive(Debug, thiserror::Error, Clone)]
pub enum Error {
    /// Connection, DNS, or timeout failure. Not retried by the core; another
    /// request against the same resource may still succeed.
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// Non-2xx HTTP response.
    #[error("http status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    /// The index page could not be parsed into folder/file entries.
    #[error("failed to parse index page at {url}: {message}")]
    Parse { url: String, message: String },

    /// A path component does not exist in its parent's listing.
    #[error("{0} not found")]
    NotFound(String),

    /// A path component that should be a folder resolved to a file.
    #[error("{0} is not a folder")]
    NotAFolder(String),

    /// Local cache directory I/O failure (create, rename, read, write).
    #[error("cache i/o error at {path}: {message}")]
    CacheIo { path: String, message: String },

    /// The caller's cancellation signal fired before the operation finished.
    #[error("operation cancelled")]
    Cancelled,

    /// The FUSE mount itself failed (permissions, missing mountpoint,
    /// kernel module unavailable).
    #[error("mount failed: {0}")]
    Mount(String),
}

impl Error {
    pub fn network(url: impl Into<String>, err: impl fmt::Display) -> Self {
        Error::Network { url: url.into(), message: err.to_string() }
    }

    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Error::HttpStatus { url: url.into(), status }
    }

    pub fn parse(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Parse { url: url.into(), message: message.into() }
    }

    pub fn cache_io(path: impl Into<String>, err: impl fmt::Display) -> Self {
        Error::CacheIo { path: path.into(), message: err.to_string() }
    }

    /// Maps this error onto a POSIX errno for the FUSE boundary (spec §7).
    pub fn as_errno(&self) -> libc::c_int {
        match self {
            Error::NotFound(_) => libc::ENOENT,
            Error::NotAFolder(_) => libc::ENOTDIR,
            Error::HttpStatus { status: 404, .. } => libc::ENOENT,
            Error::HttpStatus { .. } => libc::EIO,
            Error::Parse { .. } => libc::EIO,
            Error::CacheIo { .. } => libc::EIO,
            Error::Network { .. } => libc::EIO,
            Error::Cancelled => libc::EINTR,
            Error::Mount(_) => libc::EIO,
        }
    }
}
