//! Mirrors a local directory into remote storage in two phases: folders, then files.

use anyhow::anyhow;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::pool::WorkerPool;
use crate::progress;
use crate::remote::RemoteStore;
use crate::resolve;
use crate::retry;
use crate::tree;
use crate::upload;

/// Error type for mirror operations that preserves the summary even on failure.
///
/// # Logging Convention
/// The Display implementation shows the full error chain, so it can be logged with any format
/// specifier.
#[derive(Debug, thiserror::Error)]
#[error("{source:#}")]
pub struct Error {
    #[source]
    pub source: anyhow::Error,
    pub summary: Summary,
}

impl Error {
    #[must_use]
    pub fn new(source: anyhow::Error, summary: Summary) -> Self {
        Error { source, summary }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct Settings {
    /// Worker pool width, shared by both phases
    pub num_connections: usize,
    pub retry: retry::Settings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            num_connections: 10,
            retry: retry::Settings::default(),
        }
    }
}

impl Settings {
    /// # Errors
    ///
    /// Returns an error if the pool would have no workers or a call no attempts.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.num_connections == 0 {
            return Err(anyhow!("number of connections must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("number of attempts must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Summary {
    pub folders_created: usize,
    pub folders_failed: usize,
    pub folders_skipped: usize,
    pub files_uploaded: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    pub bytes_uploaded: u64,
}

impl Summary {
    /// Items that did not make it to the remote side.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.folders_failed + self.folders_skipped + self.files_failed + self.files_skipped
    }
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            folders_created: self.folders_created + other.folders_created,
            folders_failed: self.folders_failed + other.folders_failed,
            folders_skipped: self.folders_skipped + other.folders_skipped,
            files_uploaded: self.files_uploaded + other.files_uploaded,
            files_failed: self.files_failed + other.files_failed,
            files_skipped: self.files_skipped + other.files_skipped,
            bytes_uploaded: self.bytes_uploaded + other.bytes_uploaded,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "folders created: {}\n\
            folders failed: {}\n\
            folders skipped: {}\n\
            files uploaded: {}\n\
            files failed: {}\n\
            files skipped: {}\n\
            bytes uploaded: {}",
            self.folders_created,
            self.folders_failed,
            self.folders_skipped,
            self.files_uploaded,
            self.files_failed,
            self.files_skipped,
            bytesize::ByteSize(self.bytes_uploaded),
        )
    }
}

/// Recreates `root` (and everything below it) remotely.
///
/// Phase 1 creates the folders level by level, phase 2 uploads every file. Phase 2 only starts
/// once phase 1 is completely done. Item failures never abort the run; they are collected and
/// returned as an [`Error`] carrying the full summary at the end.
#[instrument(skip(prog_track, store, cancel))]
pub async fn mirror<S: RemoteStore>(
    prog_track: &'static progress::Progress,
    store: std::sync::Arc<S>,
    root: &std::path::Path,
    settings: &Settings,
    cancel: CancellationToken,
) -> Result<Summary, Error> {
    settings
        .validate()
        .map_err(|err| Error::new(err, Summary::default()))?;
    let tree::LocalTree {
        root: root_node,
        levels,
        files,
    } = tree::walk(root)
        .await
        .map_err(|err| Error::new(err, Summary::default()))?;
    let pool = WorkerPool::new(settings.num_connections, cancel);
    tracing::info!(
        "creating {} directories",
        1 + levels.iter().map(Vec::len).sum::<usize>()
    );
    let resolution = resolve::resolve(
        prog_track,
        &store,
        &pool,
        &settings.retry,
        &root_node,
        levels,
    )
    .await?;
    tracing::info!(
        "created {} directories",
        resolution.summary.folders_created
    );
    let (queue, skipped) = upload::UploadQueue::build(prog_track, files, &resolution.map);
    let summary = resolution.summary + skipped;
    tracing::info!(
        "uploading {} files ({})",
        queue.len(),
        bytesize::ByteSize(queue.bytes())
    );
    let summary = summary
        + upload::upload(prog_track, &store, &pool, &settings.retry, queue)
            .await
            .map_err(|err| Error::new(err.source, summary + err.summary))?;
    tracing::info!("upload complete");
    finish(&root_node.local_path, summary, pool.is_cancelled())
}

/// Turns the final summary into the run's result. A cancellation that came too late to stop
/// anything is not an error.
fn finish(
    root: &std::path::Path,
    summary: Summary,
    cancelled: bool,
) -> Result<Summary, Error> {
    if summary.failures() == 0 {
        return Ok(summary);
    }
    if cancelled {
        return Err(Error::new(
            anyhow!("mirroring {:?} was cancelled", root),
            summary,
        ));
    }
    Err(Error::new(
        anyhow!(
            "mirroring {:?}: {} item(s) failed or were skipped",
            root,
            summary.failures()
        ),
        summary,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteId;
    use crate::testutils::{self, Call, Event, StubStore};
    use tracing_test::traced_test;

    static PROGRESS: std::sync::LazyLock<progress::Progress> =
        std::sync::LazyLock::new(progress::Progress::new);

    fn settings(num_connections: usize, max_attempts: u32) -> Settings {
        Settings {
            num_connections,
            retry: retry::Settings {
                max_attempts,
                base_delay: std::time::Duration::from_millis(1),
            },
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn small_tree_scenario() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_small_dir().await?;
        let store = std::sync::Arc::new(
            StubStore::new()
                .with_id("root", "R")
                .with_id("a", "A")
                .with_id("b", "B"),
        );
        let summary = mirror(
            &PROGRESS,
            store.clone(),
            &tmp_dir.path().join("root"),
            &settings(10, 3),
            CancellationToken::new(),
        )
        .await
        .map_err(|err| err.source)?;
        assert_eq!(summary.folders_created, 3);
        assert_eq!(summary.files_uploaded, 1);
        assert_eq!(summary.failures(), 0);
        let calls = store.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(
            calls[3],
            Call::Upload {
                name: "x.jpg".to_string(),
                parent: RemoteId::new("A"),
                local_path: tmp_dir.path().join("root").join("a").join("x.jpg"),
            }
        );
        // the upload starts only after folder A exists
        let events = store.events();
        let created_a = events
            .iter()
            .position(|e| matches!(e, Event::Created(name, _) if name == "a"))
            .unwrap();
        let upload = events
            .iter()
            .position(|e| matches!(e, Event::Started(Call::Upload { .. })))
            .unwrap();
        assert!(created_a < upload);
        assert!(logs_contain("creating 3 directories"));
        assert!(logs_contain("uploading 1 files"));
        Ok(())
    }

    #[tokio::test]
    async fn trailing_slash_root() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_small_dir().await?;
        let store = std::sync::Arc::new(StubStore::new().with_id("a", "A"));
        let mut root = tmp_dir.path().join("root").into_os_string();
        root.push("/");
        let summary = mirror(
            &PROGRESS,
            store.clone(),
            std::path::Path::new(&root),
            &settings(2, 1),
            CancellationToken::new(),
        )
        .await
        .map_err(|err| err.source)?;
        assert_eq!(summary.folders_created, 3);
        assert_eq!(summary.files_uploaded, 1);
        assert_eq!(
            store.calls()[0],
            Call::CreateFolder {
                name: "root".to_string(),
                parent: None
            }
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn injected_failures_within_budget_succeed() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let store = std::sync::Arc::new(
            StubStore::new()
                .failing("foo", 1)
                .failing("qux", 2)
                .failing("0.txt", 3)
                .failing("6.txt", 4)
                .malformed_once("empty")
                .with_delay(std::time::Duration::from_millis(2)),
        );
        let summary = mirror(
            &PROGRESS,
            store.clone(),
            &tmp_dir.path().join("foo"),
            &settings(3, 5),
            CancellationToken::new(),
        )
        .await
        .map_err(|err| err.source)?;
        assert_eq!(summary.folders_created, 5);
        assert_eq!(summary.files_uploaded, 7);
        assert_eq!(summary.failures(), 0);
        assert!(store.violations().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn terminal_failures_are_reported() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let store = std::sync::Arc::new(
            StubStore::new()
                .always_failing("baz")
                .always_failing("1.txt"),
        );
        let error = mirror(
            &PROGRESS,
            store.clone(),
            &tmp_dir.path().join("foo"),
            &settings(4, 2),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        let summary = error.summary;
        assert_eq!(summary.folders_created, 3);
        assert_eq!(summary.folders_failed, 1);
        assert_eq!(summary.folders_skipped, 1);
        assert_eq!(summary.files_uploaded, 3);
        assert_eq!(summary.files_failed, 1);
        assert_eq!(summary.files_skipped, 3);
        assert_eq!(summary.failures(), 6);
        assert!(format!("{error}").contains("6 item(s) failed or were skipped"));
        Ok(())
    }

    #[tokio::test]
    async fn walk_errors_are_fatal() {
        let store = std::sync::Arc::new(StubStore::new());
        let res = mirror(
            &PROGRESS,
            store.clone(),
            std::path::Path::new("/nonexistent/rup/mirror"),
            &settings(4, 2),
            CancellationToken::new(),
        )
        .await;
        assert!(res.is_err());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn cancellation_is_an_error() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let store = std::sync::Arc::new(StubStore::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let error = mirror(
            &PROGRESS,
            store.clone(),
            &tmp_dir.path().join("foo"),
            &settings(4, 2),
            cancel,
        )
        .await
        .unwrap_err();
        assert!(format!("{error}").contains("cancelled"));
        assert_eq!(error.summary.folders_skipped, 5);
        assert_eq!(error.summary.files_skipped, 7);
        assert!(store.calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn zero_connections_is_an_error() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_small_dir().await?;
        let store = std::sync::Arc::new(StubStore::new());
        let error = mirror(
            &PROGRESS,
            store.clone(),
            &tmp_dir.path().join("root"),
            &settings(0, 3),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(format!("{error}").contains("at least 1"));
        assert_eq!(error.summary, Summary::default());
        assert!(store.calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn zero_attempts_is_an_error() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_small_dir().await?;
        let store = std::sync::Arc::new(StubStore::new());
        let res = mirror(
            &PROGRESS,
            store.clone(),
            &tmp_dir.path().join("root"),
            &settings(2, 0),
            CancellationToken::new(),
        )
        .await;
        assert!(res.is_err());
        assert!(store.calls().is_empty());
        Ok(())
    }

    #[test]
    fn late_cancellation_is_not_an_error() {
        let summary = Summary {
            folders_created: 3,
            files_uploaded: 1,
            ..Default::default()
        };
        let root = std::path::Path::new("/data/root");
        assert_eq!(finish(root, summary, true).unwrap(), summary);
        let skipped = Summary {
            files_skipped: 1,
            ..summary
        };
        let error = finish(root, skipped, true).unwrap_err();
        assert!(format!("{error}").contains("cancelled"));
        assert_eq!(error.summary, skipped);
        let error = finish(root, skipped, false).unwrap_err();
        assert!(format!("{error}").contains("1 item(s) failed or were skipped"));
    }

    #[test]
    fn summary_json_round_trip() -> Result<(), anyhow::Error> {
        let summary = Summary {
            folders_created: 5,
            folders_failed: 1,
            files_uploaded: 6,
            files_skipped: 3,
            bytes_uploaded: 1 << 20,
            ..Default::default()
        };
        let json = crate::render_summary(&summary, true)?;
        assert!(json.contains("\"bytes_uploaded\": 1048576"));
        let parsed: Summary = serde_json::from_str(&json)?;
        assert_eq!(parsed, summary);
        Ok(())
    }

    #[test]
    fn summary_display() {
        let summary = Summary {
            folders_created: 3,
            files_uploaded: 1,
            bytes_uploaded: 4,
            ..Default::default()
        };
        let text = format!("{summary}");
        assert!(text.contains("folders created: 3"));
        assert!(text.contains("files uploaded: 1"));
        assert!(text.contains("files failed: 0"));
    }
}
