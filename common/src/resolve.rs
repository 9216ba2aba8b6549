//! Creates the remote folder hierarchy, one tree level per batch.
//!
//! # Ordering
//!
//! The root folder is created on its own. Every following level is dispatched as a single batch
//! on the [`WorkerPool`] and all of its results are merged into the [`DirectoryMap`] before the
//! next level is looked at, so a folder's create call always carries the identifier its parent's
//! create call returned.
//!
//! # Failed directories
//!
//! A directory whose folder could not be created (retries exhausted, or cancelled) is *blocked*.
//! Its subdirectories are never dispatched: they are reported as skipped and blocked in turn, so
//! the whole subtree and every file in it ends up in the summary instead of silently vanishing.

use tracing::instrument;

use crate::mirror::{Error, Summary};
use crate::pool::{BatchOutcome, WorkerPool};
use crate::progress;
use crate::remote::{RemoteId, RemoteStore};
use crate::retry;
use crate::tree::TreeNode;

/// Where a node's parent folder stands.
#[derive(Debug, PartialEq, Eq)]
pub enum ParentState<'a> {
    Resolved(&'a RemoteId),
    Blocked,
}

/// Local directory path to remote folder id.
///
/// Only mutated between batches, by the single task driving the resolver.
#[derive(Debug, Default)]
pub struct DirectoryMap {
    ids: std::collections::HashMap<std::path::PathBuf, RemoteId>,
    blocked: std::collections::HashSet<std::path::PathBuf>,
}

impl DirectoryMap {
    #[must_use]
    pub fn get(&self, path: &std::path::Path) -> Option<&RemoteId> {
        self.ids.get(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[must_use]
    pub fn is_blocked(&self, path: &std::path::Path) -> bool {
        self.blocked.contains(path)
    }

    #[must_use]
    pub fn parent_state(&self, node: &TreeNode) -> ParentState<'_> {
        let Some(parent) = node.parent_path() else {
            return ParentState::Blocked;
        };
        match self.ids.get(parent) {
            Some(id) => ParentState::Resolved(id),
            None => {
                if !self.is_blocked(parent) {
                    tracing::error!(
                        "{:?}: parent {:?} was never processed",
                        &node.local_path,
                        parent
                    );
                }
                ParentState::Blocked
            }
        }
    }

    fn commit(&mut self, path: std::path::PathBuf, id: RemoteId) {
        debug_assert!(!self.blocked.contains(&path));
        let previous = self.ids.insert(path, id);
        debug_assert!(previous.is_none());
    }

    fn block(&mut self, path: std::path::PathBuf) {
        debug_assert!(!self.ids.contains_key(&path));
        self.blocked.insert(path);
    }
}

/// Finished phase 1: the folder map and what it took to build it.
#[derive(Debug)]
pub struct Resolution {
    pub map: DirectoryMap,
    pub summary: Summary,
}

type FolderResult = (TreeNode, Result<RemoteId, retry::Error>);

fn folder_what(node: &TreeNode) -> String {
    format!("create folder {:?}", &node.local_path)
}

async fn create_folder<S: RemoteStore>(
    prog_track: &'static progress::Progress,
    store: &S,
    retry_settings: &retry::Settings,
    cancel: &tokio_util::sync::CancellationToken,
    node: &TreeNode,
) -> Result<RemoteId, retry::Error> {
    let what = folder_what(node);
    let res = retry::invoke(retry_settings, cancel, prog_track, &what, || {
        store.create_folder(&node.name, node.parent_remote_id())
    })
    .await;
    match &res {
        Ok(id) => {
            prog_track.folders_created.inc();
            tracing::info!("created {:?} as {}", &node.local_path, id);
        }
        Err(retry::Error::Exhausted { .. }) => prog_track.folders_failed.inc(),
        Err(retry::Error::Cancelled { .. }) => prog_track.folders_skipped.inc(),
    }
    res
}

/// Commits one folder outcome into the map and the summary.
fn merge(
    map: &mut DirectoryMap,
    summary: &mut Summary,
    node: TreeNode,
    result: Result<RemoteId, retry::Error>,
) {
    match result {
        Ok(id) => {
            map.commit(node.local_path, id);
            summary.folders_created += 1;
        }
        Err(error @ retry::Error::Exhausted { .. }) => {
            tracing::error!("FAILED: {:#}", &error);
            map.block(node.local_path);
            summary.folders_failed += 1;
        }
        Err(retry::Error::Cancelled { .. }) => {
            tracing::debug!("cancelled: {}", folder_what(&node));
            map.block(node.local_path);
            summary.folders_skipped += 1;
        }
    }
}

fn skip(
    prog_track: &'static progress::Progress,
    map: &mut DirectoryMap,
    summary: &mut Summary,
    node: TreeNode,
    reason: &str,
) {
    tracing::error!("skipping directory {:?}: {}", &node.local_path, reason);
    prog_track.folders_skipped.inc();
    map.block(node.local_path);
    summary.folders_skipped += 1;
}

/// Creates `root` and every directory in `levels` remotely, parents strictly before children.
#[instrument(skip(prog_track, store, pool, root, levels), fields(root = ?root.local_path))]
pub async fn resolve<S: RemoteStore>(
    prog_track: &'static progress::Progress,
    store: &std::sync::Arc<S>,
    pool: &WorkerPool,
    retry_settings: &retry::Settings,
    root: &TreeNode,
    levels: Vec<Vec<TreeNode>>,
) -> Result<Resolution, Error> {
    let mut map = DirectoryMap::default();
    let mut summary = Summary::default();
    // the root has no siblings, create it directly
    if pool.is_cancelled() {
        skip(prog_track, &mut map, &mut summary, root.clone(), "cancelled");
    } else {
        let res = create_folder(
            prog_track,
            store.as_ref(),
            retry_settings,
            pool.cancel_token(),
            root,
        )
        .await;
        merge(&mut map, &mut summary, root.clone(), res);
    }
    for (depth, level) in levels.into_iter().enumerate() {
        let mut batch = Vec::with_capacity(level.len());
        for mut node in level {
            if pool.is_cancelled() {
                skip(prog_track, &mut map, &mut summary, node, "cancelled");
                continue;
            }
            let parent_id = match map.parent_state(&node) {
                ParentState::Resolved(id) => id.clone(),
                ParentState::Blocked => {
                    skip(
                        prog_track,
                        &mut map,
                        &mut summary,
                        node,
                        "parent folder was not created",
                    );
                    continue;
                }
            };
            node.assign_parent(parent_id);
            batch.push(node);
        }
        tracing::debug!("level {}: dispatching {} folders", depth + 1, batch.len());
        let task = {
            let store = store.clone();
            let retry_settings = *retry_settings;
            let cancel = pool.cancel_token().clone();
            move |node: TreeNode| {
                let store = store.clone();
                let cancel = cancel.clone();
                async move {
                    let res = create_folder(
                        prog_track,
                        store.as_ref(),
                        &retry_settings,
                        &cancel,
                        &node,
                    )
                    .await;
                    (node, res)
                }
            }
        };
        let outcomes: Vec<BatchOutcome<TreeNode, FolderResult>> = pool
            .run_batch(batch, task)
            .await
            .map_err(|err| Error::new(err, summary))?;
        // barrier: the next level only sees ids merged here
        for outcome in outcomes {
            match outcome {
                BatchOutcome::Done((node, res)) => merge(&mut map, &mut summary, node, res),
                BatchOutcome::NotStarted(node) => {
                    skip(prog_track, &mut map, &mut summary, node, "cancelled");
                }
            }
        }
    }
    Ok(Resolution { map, summary })
}
