//! Source tree snapshot and priority ordering.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::ExtensionList;

/// A file found in the source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Absolute path to the file
    pub path: PathBuf,
    /// Path relative to the job's source directory
    pub relative: PathBuf,
    pub size: u64,
}

/// One snapshot of a job's source tree, taken at job start.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub files: Vec<SourceFile>,
    pub total_bytes: u64,
}

/// Scan a directory recursively, collecting regular files.
///
/// Entries are visited in name order so runs are reproducible. Symlinks and
/// special files are skipped.
pub fn scan_directory(source: &Path) -> io::Result<ScanResult> {
    let mut result = ScanResult::default();
    scan_directory_recursive(source, source, &mut result)?;
    Ok(result)
}

fn scan_directory_recursive(base: &Path, current: &Path, result: &mut ScanResult) -> io::Result<()> {
    let mut entries = fs::read_dir(current)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();

        // Use symlink_metadata to avoid following symlinks
        let metadata = match path.symlink_metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        if metadata.is_dir() {
            scan_directory_recursive(base, &path, result)?;
        } else if metadata.is_file() {
            let relative = path.strip_prefix(base).unwrap_or(&path).to_path_buf();
            result.total_bytes += metadata.len();
            result.files.push(SourceFile {
                path,
                relative,
                size: metadata.len(),
            });
        }
    }

    Ok(())
}

/// Move files with a priority extension to the front.
///
/// Both groups keep their original relative order.
pub fn order_by_priority(files: Vec<SourceFile>, priority: &ExtensionList) -> Vec<SourceFile> {
    if priority.is_empty() {
        return files;
    }

    let (mut first, rest): (Vec<_>, Vec<_>) =
        files.into_iter().partition(|f| priority.matches(&f.path));
    first.extend(rest);
    first
}
