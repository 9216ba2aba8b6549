use anyhow::{Result, anyhow};
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rup",
    version,
    about = "Mirror a local directory into cloud storage using many parallel connections",
    long_about = "`rup` uploads everything below a local directory to cloud storage, recreating the folder structure remotely.

Folders are created level by level (a folder is only created once its parent exists), files are
uploaded afterwards with no ordering between them. Remote calls are issued over a fixed number of
parallel connections and retried with a randomized backoff.

Remote calls are made through a gdrive command line client (https://github.com/prasmussen/gdrive).

EXAMPLE:
    # Upload a photo library using 10 connections, with progress
    rup ~/Pictures/2023 -n 10 --progress

Note: `rup` does not compare against what already exists remotely, running it twice uploads
everything twice."
)]
struct Args {
    // Transfer options
    /// Number of parallel connections to the remote storage
    #[arg(
        short = 'n',
        long,
        alias = "num_connections",
        default_value = "10",
        value_name = "N",
        help_heading = "Transfer options"
    )]
    num_connections: usize,

    /// Attempts per remote call before giving up on that item
    #[arg(
        long,
        default_value = "1000",
        value_name = "N",
        help_heading = "Transfer options"
    )]
    max_attempts: u32,

    /// Base delay between attempts, randomized between 1x and 2x
    ///
    /// This option accepts a human readable duration, e.g. "200ms", "1s", "1min" etc.
    #[arg(
        long,
        default_value = "1s",
        value_name = "DELAY",
        help_heading = "Transfer options"
    )]
    retry_delay: humantime::Duration,

    /// Path to the gdrive command line client
    #[arg(
        long,
        default_value = common::remote::DEFAULT_DRIVE_BIN,
        value_name = "PATH",
        help_heading = "Transfer options"
    )]
    drive_bin: std::path::PathBuf,

    // Progress & output
    /// Show progress
    #[arg(long, help_heading = "Progress & output")]
    progress: bool,

    /// Toggles the type of progress to show
    ///
    /// If specified, --progress flag is implied.
    ///
    /// Options are: `ProgressBar` (animated progress bar), `TextUpdates` (appropriate for logging), Auto (default, will
    /// choose between `ProgressBar` or `TextUpdates` depending on the type of terminal attached to stderr)
    #[arg(long, value_name = "TYPE", help_heading = "Progress & output")]
    progress_type: Option<common::ProgressType>,

    /// Sets the delay between progress updates
    ///
    /// - For the interactive (--progress-type=ProgressBar), the default is 200ms.
    /// - For the non-interactive (--progress-type=TextUpdates), the default is 10s.
    ///
    /// If specified, --progress flag is implied.
    ///
    /// This option accepts a human readable duration, e.g. "200ms", "10s", "5min" etc.
    #[arg(long, value_name = "DELAY", help_heading = "Progress & output")]
    progress_delay: Option<String>,

    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print the final summary as JSON
    #[arg(long, help_heading = "Progress & output")]
    json: bool,

    /// Quiet mode, don't report errors or print the summary
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    // ARGUMENTS
    /// Local directory to upload
    #[arg()]
    folder: std::path::PathBuf,
}

#[instrument]
async fn async_main(args: Args) -> Result<common::mirror::Summary> {
    let transfer = common::TransferConfig {
        num_connections: args.num_connections,
        max_attempts: args.max_attempts,
        retry_delay: args.retry_delay.into(),
    };
    transfer.validate().map_err(|err| anyhow!(err))?;
    let cancel = tokio_util::sync::CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, waiting for in-flight remote calls to finish");
                cancel.cancel();
            }
            // a second interrupt doesn't wait
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });
    let store = std::sync::Arc::new(common::remote::DriveCli::new(&args.drive_bin));
    match common::mirror(
        common::get_progress(),
        store,
        &args.folder,
        &transfer.mirror_settings(),
        cancel,
    )
    .await
    {
        Ok(summary) => Ok(summary),
        Err(error) => {
            let summary = common::render_summary(&error.summary, args.json)?;
            Err(anyhow!("{}\n\n{}", error, summary))
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: !args.quiet,
        summary_json: args.json,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let res = common::run(
        if args.progress || args.progress_type.is_some() || args.progress_delay.is_some() {
            Some(common::ProgressSettings {
                progress_type: args.progress_type.unwrap_or_default(),
                progress_delay: args.progress_delay,
            })
        } else {
            None
        },
        output,
        runtime,
        func,
    );
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
