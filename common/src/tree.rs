//! Local directory tree, walked one level at a time.

use anyhow::{Context, anyhow};
use tracing::instrument;

use crate::remote::RemoteId;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

/// One local entry that is mirrored remotely.
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// Name used remotely, exactly as the local file system spells it
    pub name: std::ffi::OsString,
    pub local_path: std::path::PathBuf,
    pub kind: NodeKind,
    /// Size in bytes, 0 for directories
    pub size: u64,
    parent_remote_id: Option<RemoteId>,
}

impl TreeNode {
    #[must_use]
    pub fn new(
        name: std::ffi::OsString,
        local_path: std::path::PathBuf,
        kind: NodeKind,
        size: u64,
    ) -> Self {
        Self {
            name,
            local_path,
            kind,
            size,
            parent_remote_id: None,
        }
    }

    #[must_use]
    pub fn parent_remote_id(&self) -> Option<&RemoteId> {
        self.parent_remote_id.as_ref()
    }

    /// Records the parent's remote identifier. Can only happen once per node.
    pub fn assign_parent(&mut self, id: RemoteId) {
        assert!(
            self.parent_remote_id.is_none(),
            "parent of {:?} assigned twice",
            &self.local_path
        );
        self.parent_remote_id = Some(id);
    }

    /// Local path of the directory containing this node.
    #[must_use]
    pub fn parent_path(&self) -> Option<&std::path::Path> {
        self.local_path.parent()
    }
}

/// Result of walking a local directory.
#[derive(Debug)]
pub struct LocalTree {
    pub root: TreeNode,
    /// `levels[i]` holds the directories at depth `i + 1`, children of `levels[i - 1]`
    pub levels: Vec<Vec<TreeNode>>,
    /// Every file, in walk order
    pub files: Vec<TreeNode>,
}

impl LocalTree {
    #[must_use]
    pub fn directory_count(&self) -> usize {
        1 + self.levels.iter().map(Vec::len).sum::<usize>()
    }
}

/// Strips trailing separators so the root spells the same way its children compute their parent.
#[must_use]
pub fn normalize_root(path: &std::path::Path) -> std::path::PathBuf {
    // Path::components drops trailing separators (and redundant "." segments)
    let normalized: std::path::PathBuf = path.components().collect();
    if normalized.as_os_str().is_empty() {
        return path.to_path_buf();
    }
    normalized
}

fn node_name(path: &std::path::Path) -> std::ffi::OsString {
    match path.file_name() {
        Some(name) => name.to_os_string(),
        // e.g. "/" or ".."
        None => path.as_os_str().to_os_string(),
    }
}

/// Reads one directory and splits its entries into subdirectories and files, both sorted by name.
async fn read_level(
    dir: &std::path::Path,
) -> anyhow::Result<(Vec<TreeNode>, Vec<TreeNode>)> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("cannot open directory {dir:?} for reading"))?;
    let mut dirs = vec![];
    let mut files = vec![];
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed traversing directory {dir:?}"))?
    {
        let entry_path = entry.path();
        let file_type = entry
            .file_type()
            .await
            .with_context(|| format!("failed reading file type of {entry_path:?}"))?;
        let name = node_name(&entry_path);
        if file_type.is_dir() {
            dirs.push(TreeNode::new(name, entry_path, NodeKind::Directory, 0));
            continue;
        }
        if file_type.is_symlink() {
            // follow links to files, never links to directories (they may form cycles)
            match tokio::fs::metadata(&entry_path).await {
                Ok(metadata) if metadata.is_file() => {
                    files.push(TreeNode::new(name, entry_path, NodeKind::File, metadata.len()));
                }
                Ok(_) => {
                    tracing::warn!("skipping symlink {:?}: does not point to a file", &entry_path);
                }
                Err(error) => {
                    tracing::warn!("skipping dangling symlink {:?}: {}", &entry_path, &error);
                }
            }
            continue;
        }
        if file_type.is_file() {
            let metadata = entry
                .metadata()
                .await
                .with_context(|| format!("failed reading metadata from {entry_path:?}"))?;
            files.push(TreeNode::new(name, entry_path, NodeKind::File, metadata.len()));
            continue;
        }
        tracing::warn!("skipping {:?}: unsupported file type {:?}", &entry_path, file_type);
    }
    dirs.sort_by(|a, b| a.name.cmp(&b.name));
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok((dirs, files))
}

/// Walks `root` breadth first. Any read error aborts the walk: a partial tree would mirror the
/// wrong shape.
#[instrument]
pub async fn walk(root: &std::path::Path) -> anyhow::Result<LocalTree> {
    let root_path = normalize_root(root);
    let metadata = tokio::fs::metadata(&root_path)
        .await
        .with_context(|| format!("failed reading metadata from {root_path:?}"))?;
    if !metadata.is_dir() {
        return Err(anyhow!("{:?} is not a directory", &root_path));
    }
    let root_name = if root_path.file_name().is_some() {
        node_name(&root_path)
    } else {
        // "." or ".." - name the remote root after the directory it resolves to
        let canonical = tokio::fs::canonicalize(&root_path)
            .await
            .with_context(|| format!("failed resolving {root_path:?}"))?;
        node_name(&canonical)
    };
    let root = TreeNode::new(
        root_name,
        root_path.clone(),
        NodeKind::Directory,
        0,
    );
    let (mut current, mut files) = read_level(&root_path).await?;
    let mut levels = vec![];
    while !current.is_empty() {
        let mut next = vec![];
        for dir in &current {
            let (dirs, dir_files) = read_level(&dir.local_path).await?;
            next.extend(dirs);
            files.extend(dir_files);
        }
        levels.push(current);
        current = next;
    }
    tracing::debug!(
        "walked {:?}: {} levels, {} files",
        &root_path,
        levels.len(),
        files.len()
    );
    Ok(LocalTree {
        root,
        levels,
        files,
    })
}
