//! Uploads every discovered file once the folder hierarchy exists.

use tracing::instrument;

use crate::mirror::{Error, Summary};
use crate::pool::{BatchOutcome, WorkerPool};
use crate::progress;
use crate::remote::{RemoteId, RemoteStore};
use crate::resolve::{DirectoryMap, ParentState};
use crate::retry;
use crate::tree::TreeNode;

/// File waiting for upload, with its parent folder already known.
#[derive(Debug)]
pub struct UploadItem {
    pub parent: RemoteId,
    pub file: TreeNode,
}

/// Files to upload, in walk order. Built once the [`DirectoryMap`] is complete.
#[derive(Debug, Default)]
pub struct UploadQueue {
    items: Vec<UploadItem>,
}

impl UploadQueue {
    /// Pairs every file with its parent folder id. Files below a directory that could not be
    /// created are counted as skipped instead.
    pub fn build(
        prog_track: &'static progress::Progress,
        files: Vec<TreeNode>,
        map: &DirectoryMap,
    ) -> (Self, Summary) {
        let mut items = Vec::with_capacity(files.len());
        let mut skipped = Summary::default();
        for mut file in files {
            match map.parent_state(&file) {
                ParentState::Resolved(id) => {
                    let parent = id.clone();
                    file.assign_parent(parent.clone());
                    items.push(UploadItem { parent, file });
                }
                ParentState::Blocked => {
                    tracing::error!(
                        "skipping file {:?}: parent folder was not created",
                        &file.local_path
                    );
                    prog_track.files_skipped.inc();
                    skipped.files_skipped += 1;
                }
            }
        }
        (Self { items }, skipped)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UploadItem> {
        self.items.iter()
    }

    /// Total bytes queued.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.iter().map(|item| item.file.size).sum()
    }
}

type FileResult = (UploadItem, Result<(), retry::Error>);

async fn upload_file<S: RemoteStore>(
    prog_track: &'static progress::Progress,
    store: &S,
    retry_settings: &retry::Settings,
    cancel: &tokio_util::sync::CancellationToken,
    item: &UploadItem,
) -> Result<(), retry::Error> {
    let what = format!("upload {:?}", &item.file.local_path);
    let res = retry::invoke(retry_settings, cancel, prog_track, &what, || {
        store.upload_file(&item.file.name, &item.parent, &item.file.local_path)
    })
    .await;
    match &res {
        Ok(()) => {
            prog_track.files_uploaded.inc();
            prog_track.bytes_uploaded.add(item.file.size);
            tracing::info!("uploaded {:?}", &item.file.local_path);
        }
        Err(retry::Error::Exhausted { .. }) => prog_track.files_failed.inc(),
        Err(retry::Error::Cancelled { .. }) => prog_track.files_skipped.inc(),
    }
    res
}

/// Uploads the whole queue with no ordering between files. Returns once every file either
/// succeeded, failed terminally or was not started because of cancellation.
#[instrument(skip(prog_track, store, pool, queue), fields(files = queue.len()))]
pub async fn upload<S: RemoteStore>(
    prog_track: &'static progress::Progress,
    store: &std::sync::Arc<S>,
    pool: &WorkerPool,
    retry_settings: &retry::Settings,
    queue: UploadQueue,
) -> Result<Summary, Error> {
    let task = {
        let store = store.clone();
        let retry_settings = *retry_settings;
        let cancel = pool.cancel_token().clone();
        move |item: UploadItem| {
            let store = store.clone();
            let cancel = cancel.clone();
            async move {
                let res =
                    upload_file(prog_track, store.as_ref(), &retry_settings, &cancel, &item).await;
                (item, res)
            }
        }
    };
    let outcomes: Vec<BatchOutcome<UploadItem, FileResult>> = pool
        .run_batch(queue.items, task)
        .await
        .map_err(|err| Error::new(err, Summary::default()))?;
    let mut summary = Summary::default();
    for outcome in outcomes {
        match outcome {
            BatchOutcome::Done((item, Ok(()))) => {
                summary.files_uploaded += 1;
                summary.bytes_uploaded += item.file.size;
            }
            BatchOutcome::Done((_, Err(error @ retry::Error::Exhausted { .. }))) => {
                tracing::error!("FAILED: {:#}", &error);
                summary.files_failed += 1;
            }
            BatchOutcome::Done((item, Err(retry::Error::Cancelled { .. }))) => {
                tracing::debug!("cancelled upload of {:?}", &item.file.local_path);
                summary.files_skipped += 1;
            }
            BatchOutcome::NotStarted(item) => {
                tracing::debug!("upload of {:?} not started", &item.file.local_path);
                prog_track.files_skipped.inc();
                summary.files_skipped += 1;
            }
        }
    }
    Ok(summary)
}
