//! Tree walker (spec.md §4.4, component F).
//!
//! Resolves a logical path to a [`tree::Node`] by walking from the root,
//! populating each intermediate folder on demand. All lookup-miss and
//! wrong-kind errors funnel through here so callers (the listing helpers,
//! the FUSE adapter) see a single consistent error shape.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::index::IndexClient;
use crate::path;
use crate::tree::{LazyFolder, Node};

/// Resolves `logical_path` to whichever node (folder or file) it names.
/// The empty path resolves to `root` itself.
pub async fn walk(root: &Arc<LazyFolder>, logical_path: &str, index: &IndexClient) -> Result<Node> {
    let components = path::components(logical_path);
    let mut current = root.clone();

    for (i, name) in components.iter().enumerate() {
        let node = current.lookup(name, index).await?;
        let is_last = i == components.len() - 1;
        match node {
            Node::Folder(folder) => current = folder,
            Node::File(file) => {
                if is_last {
                    return Ok(Node::File(file));
                }
                return Err(Error::NotAFolder(path::join(&current.logical_path(), name)));
            }
        }
    }
    Ok(Node::Folder(current))
}

/// Like [`walk`], but requires the resolved node to be a folder.
pub async fn walk_to_folder(
    root: &Arc<LazyFolder>,
    logical_path: &str,
    index: &IndexClient,
) -> Result<Arc<LazyFolder>> {
    match walk(root, logical_path, index).await? {
        Node::Folder(folder) => Ok(folder),
        Node::File(file) => Err(Error::NotAFolder(file.logical_path())),
    }
}
