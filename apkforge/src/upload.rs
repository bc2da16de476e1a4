//! Upload validation and size-capped persistence

use crate::error::ConvertError;
use axum::body::Bytes;
use futures_util::{Stream, StreamExt};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub const BUNDLE_SUFFIX: &str = ".aab";

const PACKAGE_SUFFIX: &str = ".apk";

/// Used when the upload name has nothing before `.aab`.
const FALLBACK_STEM: &str = "app";

pub fn validate_filename(filename: &str) -> Result<(), ConvertError> {
    if filename.to_ascii_lowercase().ends_with(BUNDLE_SUFFIX) {
        Ok(())
    } else {
        Err(ConvertError::InvalidInput(format!(
            "file must have the {} extension, got {:?}",
            BUNDLE_SUFFIX, filename
        )))
    }
}

/// Download name for an accepted upload: `dir/MyApp.AAB` becomes `MyApp.apk`.
pub fn output_filename(upload_name: &str) -> String {
    let base = upload_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(upload_name);

    // The suffix is ASCII, so slicing it off keeps the string on a char boundary.
    let stem = if base.to_ascii_lowercase().ends_with(BUNDLE_SUFFIX) {
        &base[..base.len() - BUNDLE_SUFFIX.len()]
    } else {
        base
    };

    if stem.is_empty() {
        format!("{}{}", FALLBACK_STEM, PACKAGE_SUFFIX)
    } else {
        format!("{}{}", stem, PACKAGE_SUFFIX)
    }
}

/// Write `chunks` to `dest`, failing as soon as the running total passes `limit`.
///
/// A chunk that would cross the limit is never written and no further chunks
/// are pulled from the stream.
pub async fn save_upload<S>(chunks: S, dest: &Path, limit: u64) -> Result<u64, ConvertError>
where
    S: Stream<Item = Result<Bytes, ConvertError>>,
{
    futures_util::pin_mut!(chunks);

    let mut file = tokio::fs::File::create(dest).await?;
    let mut total: u64 = 0;

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        total += chunk.len() as u64;
        if total > limit {
            debug!(received = total, limit, "upload over limit, aborting");
            return Err(ConvertError::PayloadTooLarge { limit });
        }
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    Ok(total)
}
