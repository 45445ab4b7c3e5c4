//! In-memory tree of lazily discovered folders and files (spec.md §3,
//! components D and E).
//!
//! Every [`folder::LazyFolder`] and [`file::LazyFile`] is reference-counted
//! and built once, the first time a path through it is walked; a folder's
//! children come from a single HTTP index-page fetch the first time
//! they're asked for, and concurrent askers during that fetch all observe
//! the same in-flight [`Population::Populating`] state rather than issuing
//! duplicate requests.

pub mod file;
pub mod folder;

pub use file::LazyFile;
pub use folder::LazyFolder;

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::error::Result;

/// A population attempt shared by every caller coalesced onto it. `result`
/// is filled in by the owner right before `notify_waiters` fires, so a
/// woken waiter reads the owner's actual outcome instead of re-entering the
/// fetch itself (spec.md §8, single-flight property: N concurrent callers
/// observe exactly one underlying fetch and identical success/failure).
pub struct Populating<T> {
    pub notify: Notify,
    pub result: Mutex<Option<Result<T>>>,
}

impl<T> Populating<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self { notify: Notify::new(), result: Mutex::new(None) })
    }
}

/// Tri-state population marker: nothing has been fetched yet, a fetch is
/// in flight (other callers await the attached [`Populating`] rather than
/// starting their own), or the value is ready.
pub enum Population<T> {
    Unpopulated,
    Populating(Arc<Populating<T>>),
    Populated(T),
}

/// Either kind of tree node, returned by folder lookups.
#[derive(Clone)]
pub enum Node {
    Folder(Arc<LazyFolder>),
    File(Arc<LazyFile>),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Folder(f) => &f.name,
            Node::File(f) => &f.name,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Node::Folder(_))
    }
}
