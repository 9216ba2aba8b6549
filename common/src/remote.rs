//! Boundary to the remote storage service.
//!
//! The rest of the crate only talks to [`RemoteStore`]. The production implementation,
//! [`DriveCli`], drives a gdrive-style command line client: one process per remote call.
//!
//! # Client contract
//!
//! ```text
//! <bin> folder -t <name> [-p <parent-id>]          -> stdout "Id: <id> ..."
//! <bin> upload -t <name> -p <parent-id> -f <path>  -> exit status 0 on success
//! ```
//!
//! The folder identifier is the second whitespace separated token of the client's output. The
//! root folder is created without `-p` at all.

use std::future::Future;

/// Opaque identifier of a remote folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RemoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failure of a single remote call. All variants are considered transient.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to run {program:?}")]
    Spawn {
        program: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("remote call failed ({status}): {stderr}")]
    Failed { status: String, stderr: String },
    #[error("malformed response: {output:?}")]
    Malformed { output: String },
}

pub trait RemoteStore: Send + Sync + 'static {
    /// Creates folder `name` under `parent` (or at the top level when `parent` is `None`) and
    /// returns its identifier.
    fn create_folder(
        &self,
        name: &std::ffi::OsStr,
        parent: Option<&RemoteId>,
    ) -> impl Future<Output = Result<RemoteId, StoreError>> + Send;

    /// Uploads the contents of `local_path` as file `name` inside folder `parent`.
    fn upload_file(
        &self,
        name: &std::ffi::OsStr,
        parent: &RemoteId,
        local_path: &std::path::Path,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// [`RemoteStore`] backed by an external gdrive command line client.
#[derive(Debug, Clone)]
pub struct DriveCli {
    program: std::path::PathBuf,
}

pub const DEFAULT_DRIVE_BIN: &str = "/usr/local/bin/drive";

impl Default for DriveCli {
    fn default() -> Self {
        Self::new(DEFAULT_DRIVE_BIN)
    }
}

impl DriveCli {
    pub fn new(program: impl Into<std::path::PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn execute(&self, args: Vec<std::ffi::OsString>) -> Result<String, StoreError> {
        tracing::trace!("running {:?} {:?}", &self.program, &args);
        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| StoreError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(StoreError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Extracts the folder identifier from the client's `folder` output.
pub fn parse_folder_id(output: &str) -> Result<RemoteId, StoreError> {
    let malformed = || StoreError::Malformed {
        output: output.to_string(),
    };
    let token = output.split_whitespace().nth(1).ok_or_else(malformed)?;
    if !token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(malformed());
    }
    Ok(RemoteId::new(token))
}

impl RemoteStore for DriveCli {
    async fn create_folder(
        &self,
        name: &std::ffi::OsStr,
        parent: Option<&RemoteId>,
    ) -> Result<RemoteId, StoreError> {
        let mut args: Vec<std::ffi::OsString> = vec!["folder".into(), "-t".into(), name.into()];
        if let Some(parent) = parent {
            args.push("-p".into());
            args.push(parent.as_str().into());
        }
        let output = self.execute(args).await?;
        parse_folder_id(&output)
    }

    async fn upload_file(
        &self,
        name: &std::ffi::OsStr,
        parent: &RemoteId,
        local_path: &std::path::Path,
    ) -> Result<(), StoreError> {
        let args: Vec<std::ffi::OsString> = vec![
            "upload".into(),
            "-t".into(),
            name.into(),
            "-p".into(),
            parent.as_str().into(),
            "-f".into(),
            local_path.into(),
        ];
        self.execute(args).await?;
        Ok(())
    }
}
