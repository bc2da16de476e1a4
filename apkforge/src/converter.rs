//! Per-request conversion pipeline
//!
//! `Validating -> Saving -> Converting -> Extracting -> Locating -> Staging ->
//! Delivering`, with `CleaningUp` run on every exit path. Everything after
//! Saving runs in a spawned task so that a client disconnect cannot interrupt
//! bundletool or skip workspace cleanup.

use crate::config::{Config, SigningConfig};
use crate::error::ConvertError;
use crate::locator;
use crate::packager::{PackageJob, Packager};
use crate::upload;
use crate::workspace::{DeliveryCopy, RequestWorkspace};
use axum::body::Bytes;
use futures_util::Stream;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, Instrument, Span};
use uuid::Uuid;
use zip::ZipArchive;

pub const APK_CONTENT_TYPE: &str = "application/vnd.android.package-archive";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Saving,
    Converting,
    Extracting,
    Locating,
    Staging,
    Delivering,
    CleaningUp,
}

impl Stage {
    fn enter(self) {
        debug!(stage = %self, "entering stage");
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validating => "validating",
            Stage::Saving => "saving",
            Stage::Converting => "converting",
            Stage::Extracting => "extracting",
            Stage::Locating => "locating",
            Stage::Staging => "staging",
            Stage::Delivering => "delivering",
            Stage::CleaningUp => "cleaning_up",
        };
        f.write_str(name)
    }
}

/// A finished APK ready to stream to the client.
#[derive(Debug)]
pub struct Delivery {
    pub file: DeliveryCopy,
    pub filename: String,
    pub content_type: &'static str,
}

#[derive(Clone)]
pub struct Converter {
    packager: Arc<dyn Packager>,
    signing: Arc<SigningConfig>,
    tmp_root: PathBuf,
    max_upload_bytes: u64,
}

impl Converter {
    pub fn new(config: &Config, packager: Arc<dyn Packager>) -> Self {
        Self {
            packager,
            signing: Arc::new(config.signing.clone()),
            tmp_root: config.tmp_root(),
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    pub fn tmp_root(&self) -> &Path {
        &self.tmp_root
    }

    /// Turn an uploaded bundle into a deliverable APK.
    #[instrument(skip(self, chunks), fields(request_id = %Uuid::new_v4()))]
    pub async fn convert<S>(&self, filename: &str, chunks: S) -> Result<Delivery, ConvertError>
    where
        S: Stream<Item = Result<Bytes, ConvertError>>,
    {
        Stage::Validating.enter();
        upload::validate_filename(filename)?;

        let workspace = RequestWorkspace::create(&self.tmp_root)?;

        Stage::Saving.enter();
        let saved = upload::save_upload(chunks, &workspace.upload_path(), self.max_upload_bytes)
            .await?;
        info!(bytes = saved, "upload saved");

        let this = self.clone();
        let output_name = upload::output_filename(filename);
        let task = tokio::spawn(
            async move {
                let result = this.package(&workspace, output_name).await;
                Stage::CleaningUp.enter();
                drop(workspace);
                result
            }
            .in_current_span(),
        );

        match task.await {
            Ok(result) => result,
            Err(err) => {
                error!(error = %err, "conversion task aborted");
                Err(ConvertError::Internal(format!(
                    "conversion task aborted: {}",
                    err
                )))
            }
        }
    }

    async fn package(
        &self,
        workspace: &RequestWorkspace,
        output_name: String,
    ) -> Result<Delivery, ConvertError> {
        Stage::Converting.enter();
        let bundle = workspace.upload_path();
        let output = workspace.output_path();
        let job = PackageJob {
            bundle: &bundle,
            output: &output,
            signing: &self.signing,
            work_dir: workspace.path(),
        };
        self.packager.convert(&job).await?;

        if !tokio::fs::try_exists(&output).await? {
            return Err(ConvertError::ToolOutputMissing { path: output });
        }

        Stage::Extracting.enter();
        let extract_dir = workspace.extract_dir();
        let entries = extract_archive(output, extract_dir.clone()).await?;
        debug!(entries, "archive extracted");

        Stage::Locating.enter();
        let artifact = locate_artifact(extract_dir)
            .await?
            .ok_or(ConvertError::ArtifactNotFound)?;

        Stage::Staging.enter();
        let file = DeliveryCopy::stage(&artifact, &self.tmp_root).await?;

        Stage::Delivering.enter();
        info!(
            artifact = %artifact.display(),
            bytes = file.len(),
            filename = %output_name,
            "APK ready for delivery"
        );

        Ok(Delivery {
            file,
            filename: output_name,
            content_type: APK_CONTENT_TYPE,
        })
    }
}

async fn extract_archive(archive: PathBuf, dest: PathBuf) -> Result<usize, ConvertError> {
    let span = Span::current();
    tokio::task::spawn_blocking(move || -> Result<usize, ConvertError> {
        let _entered = span.enter();
        std::fs::create_dir_all(&dest)?;
        let mut zip = ZipArchive::new(std::fs::File::open(&archive)?)?;
        debug!(entries = ?zip.file_names().collect::<Vec<_>>(), "extracting .apks archive");
        zip.extract(&dest)?;
        Ok(zip.len())
    })
    .await
    .map_err(|err| ConvertError::Internal(format!("archive extraction aborted: {}", err)))?
}

async fn locate_artifact(root: PathBuf) -> Result<Option<PathBuf>, ConvertError> {
    let span = Span::current();
    tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        locator::locate(&root)
    })
    .await
    .map_err(|err| ConvertError::Internal(format!("artifact search aborted: {}", err)))
}
