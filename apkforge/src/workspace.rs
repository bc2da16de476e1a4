//! Request-scoped temporary storage
//!
//! Both guards remove their files on drop, so every exit path of a request
//! (success, error, panic, cancellation) releases them.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, TempPath};
use tracing::{debug, warn};

const UPLOAD_FILE: &str = "upload.aab";
const OUTPUT_FILE: &str = "output.apks";
const EXTRACT_DIR: &str = "extracted";

/// Private directory holding one request's upload, tool output and extraction tree.
#[derive(Debug)]
pub struct RequestWorkspace {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl RequestWorkspace {
    pub fn create(root: &Path) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("apkforge-")
            .tempdir_in(root)?;
        let path = dir.path().to_path_buf();
        debug!(path = %path.display(), "created request workspace");
        Ok(Self {
            path,
            dir: Some(dir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn upload_path(&self) -> PathBuf {
        self.path.join(UPLOAD_FILE)
    }

    pub fn output_path(&self) -> PathBuf {
        self.path.join(OUTPUT_FILE)
    }

    pub fn extract_dir(&self) -> PathBuf {
        self.path.join(EXTRACT_DIR)
    }
}

impl Drop for RequestWorkspace {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        match dir.close() {
            Ok(()) => debug!(path = %self.path.display(), "removed request workspace"),
            Err(err) => warn!(
                path = %self.path.display(),
                error = %err,
                "failed to remove request workspace"
            ),
        }
    }
}

/// Copy of the chosen APK that outlives the workspace until the download ends.
#[derive(Debug)]
pub struct DeliveryCopy {
    path: PathBuf,
    guard: Option<TempPath>,
    len: u64,
}

impl DeliveryCopy {
    /// Copy `artifact` into a fresh temporary file under `root`.
    pub async fn stage(artifact: &Path, root: &Path) -> io::Result<Self> {
        let guard = tempfile::Builder::new()
            .prefix("apkforge-delivery-")
            .suffix(".apk")
            .tempfile_in(root)?
            .into_temp_path();
        let path = guard.to_path_buf();
        let len = tokio::fs::copy(artifact, &path).await?;
        debug!(
            from = %artifact.display(),
            to = %path.display(),
            bytes = len,
            "staged delivery copy"
        );
        Ok(Self {
            path,
            guard: Some(guard),
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for DeliveryCopy {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        match guard.close() {
            Ok(()) => debug!(path = %self.path.display(), "removed delivery copy"),
            Err(err) => warn!(
                path = %self.path.display(),
                error = %err,
                "failed to remove delivery copy"
            ),
        }
    }
}
