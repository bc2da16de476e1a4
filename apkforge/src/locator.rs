//! Picks the APK to return from an extracted `.apks` archive

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// File name bundletool gives the universal variant.
pub const UNIVERSAL_APK: &str = "universal.apk";

pub const APK_EXTENSION: &str = "apk";

const UNIVERSAL_MARKER: &str = "universal";

/// Find the installable artifact under `root`.
///
/// Preference order:
/// 1. a file named exactly `universal.apk`, anywhere in the tree
/// 2. the only `.apk` file, when there is exactly one
/// 3. the first `.apk` whose name contains "universal" (case-insensitive)
/// 4. the first `.apk` in traversal order
///
/// Directory entries are visited sorted by file name, so the result is stable
/// for a given tree. Which file step 4 returns is implementation-defined and
/// carries no meaning beyond "some APK from the archive".
pub fn locate(root: &Path) -> Option<PathBuf> {
    let files: Vec<PathBuf> = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();

    debug!(root = %root.display(), files = files.len(), "scanning extracted archive");
    for file in &files {
        trace!(path = %file.display(), "found file");
    }

    if let Some(exact) = files
        .iter()
        .find(|path| path.file_name() == Some(OsStr::new(UNIVERSAL_APK)))
    {
        debug!(path = %exact.display(), "using exact universal APK");
        return Some(exact.clone());
    }

    let candidates: Vec<&PathBuf> = files.iter().filter(|path| is_apk(path)).collect();

    let chosen = match candidates.as_slice() {
        [] => None,
        [only] => Some(*only),
        many => many
            .iter()
            .copied()
            .find(|path| mentions_universal(path))
            .or_else(|| many.first().copied()),
    };

    match chosen {
        Some(path) => {
            debug!(
                path = %path.display(),
                candidates = candidates.len(),
                "selected APK"
            );
            Some(path.clone())
        }
        None => {
            debug!(root = %root.display(), "no APK found");
            None
        }
    }
}

fn is_apk(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(APK_EXTENSION))
}

fn mentions_universal(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .is_some_and(|name| name.contains(UNIVERSAL_MARKER))
}
