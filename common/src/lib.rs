//! Shared library for the RUP tools - mirroring local directory trees into remote storage
//!
//! # Overview
//!
//! [`mirror()`] walks a local directory and recreates it in a remote store:
//!
//! 1. [`tree::walk`] reads the local tree breadth first, one level at a time
//! 2. [`resolve::resolve`] creates the remote folders, level by level, so every folder is created
//!    with the identifier of its already existing parent
//! 3. [`upload::upload`] uploads all files in parallel, each into its parent's folder
//!
//! Both phases run on one [`pool::WorkerPool`] whose width bounds the number of concurrent
//! remote calls. Each remote call goes through [`retry::invoke`].
//!
//! # Error Handling
//!
//! - a remote call that fails is retried with a randomized backoff
//! - a call that exhausts its attempts fails only that item; a failed folder causes its whole
//!   subtree to be reported as skipped
//! - a local read error while walking aborts the run before anything is created remotely
//!
//! All of the above is reflected in [`mirror::Summary`], which is also preserved in
//! [`mirror::Error`].
//!
//! # Runtime
//!
//! [`run`] sets up the tokio runtime, logging and progress reporting for a binary and executes
//! its main future.

use std::io::IsTerminal;

use anyhow::Context;

pub mod config;
pub mod mirror;
pub mod pool;
pub mod progress;
pub mod remote;
pub mod resolve;
pub mod retry;
pub mod tree;
pub mod upload;

#[cfg(test)]
mod testutils;

pub use config::{OutputConfig, RuntimeConfig, TransferConfig};
pub use mirror::mirror;

static PROGRESS: std::sync::LazyLock<progress::Progress> =
    std::sync::LazyLock::new(progress::Progress::new);

#[must_use]
pub fn get_progress() -> &'static progress::Progress {
    &PROGRESS
}

#[derive(Copy, Clone, Debug, Default, clap::ValueEnum)]
pub enum ProgressType {
    /// Animated progress bar when stderr is a terminal, text updates otherwise
    #[default]
    Auto,
    ProgressBar,
    TextUpdates,
}

#[derive(Debug, Clone)]
pub struct ProgressSettings {
    pub progress_type: ProgressType,
    /// Human readable delay between updates, e.g. "200ms"
    pub progress_delay: Option<String>,
}

impl ProgressSettings {
    fn resolve(&self) -> anyhow::Result<(bool, std::time::Duration)> {
        let interactive = match self.progress_type {
            ProgressType::Auto => std::io::stderr().is_terminal(),
            ProgressType::ProgressBar => true,
            ProgressType::TextUpdates => false,
        };
        let delay = match &self.progress_delay {
            Some(delay) => humantime::parse_duration(delay)
                .map_err(|err| anyhow::anyhow!("invalid progress delay {:?}: {}", delay, err))?,
            None if interactive => std::time::Duration::from_millis(200),
            None => std::time::Duration::from_secs(10),
        };
        Ok((interactive, delay))
    }
}

async fn show_progress(
    interactive: bool,
    delay: std::time::Duration,
    done: tokio_util::sync::CancellationToken,
) {
    let mut printer = progress::ProgressPrinter::new(get_progress());
    let bar = if interactive {
        let bar = indicatif::ProgressBar::new_spinner();
        bar.set_style(
            indicatif::ProgressStyle::with_template("{spinner} [{elapsed_precise}]\n{msg}")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_spinner()),
        );
        Some(bar)
    } else {
        None
    };
    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        let text = printer.print();
        match &bar {
            Some(bar) => {
                bar.set_message(text);
                bar.tick();
            }
            None => eprintln!("{text}"),
        }
    }
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
}

fn setup_tracing(output: &OutputConfig) {
    if output.quiet {
        return;
    }
    let level = match output.verbose {
        // JSON output keeps stdout machine readable
        0 if output.summary_json => "error",
        // phase boundaries are reported even without -v
        0 => "error,common::mirror=info",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    // progress goes to stderr, logs go to stdout
    let res = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stdout)
        .with_target(false)
        .try_init();
    if let Err(error) = res {
        eprintln!("failed to initialize logging: {error}");
    }
}

/// Renders a summary as text, or as pretty printed JSON when `json` is set.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_summary<S>(summary: &S, json: bool) -> anyhow::Result<String>
where
    S: std::fmt::Display + serde::Serialize,
{
    if json {
        return serde_json::to_string_pretty(summary).context("failed to serialize summary");
    }
    Ok(summary.to_string())
}

/// Runs `func` on a fresh tokio runtime with logging and optional progress reporting.
///
/// Returns `None` if anything failed; the error has been reported already (unless `quiet`).
pub fn run<Func, Fut, Summary>(
    progress: Option<ProgressSettings>,
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: Func,
) -> Option<Summary>
where
    Summary: std::fmt::Display + serde::Serialize,
    Func: FnOnce() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<Summary>>,
{
    setup_tracing(&output);
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let rt = match builder.build() {
        Ok(rt) => rt,
        Err(error) => {
            if !output.quiet {
                eprintln!("failed to start the tokio runtime: {error:#}");
            }
            return None;
        }
    };
    let progress = match progress.map(|settings| settings.resolve()).transpose() {
        Ok(progress) => progress,
        Err(error) => {
            if !output.quiet {
                eprintln!("{error:#}");
            }
            return None;
        }
    };
    let res = rt.block_on(async move {
        let done = tokio_util::sync::CancellationToken::new();
        let printer = progress.map(|(interactive, delay)| {
            tokio::spawn(show_progress(interactive, delay, done.clone()))
        });
        let res = func().await;
        done.cancel();
        let printed = match printer {
            Some(printer) => printer.await,
            None => Ok(()),
        };
        if let Err(error) = printed {
            tracing::debug!("progress printer failed: {}", &error);
        }
        res
    });
    match res {
        Ok(summary) => {
            if output.print_summary {
                match render_summary(&summary, output.summary_json) {
                    Ok(text) => println!("{text}"),
                    Err(error) => {
                        eprintln!("{error:#}");
                        return None;
                    }
                }
            }
            Some(summary)
        }
        Err(error) => {
            if !output.quiet {
                eprintln!("{error:#}");
            }
            None
        }
    }
}
