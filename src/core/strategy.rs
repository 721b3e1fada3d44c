//! Per-file copy decision and the copy itself.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use filetime::FileTime;
use tracing::debug;

use super::models::BackupType;

/// Buffer size for file I/O operations (128KB for optimal throughput)
const BUFFER_SIZE: usize = 128 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStrategy {
    /// Copy every file
    Full,
    /// Copy only files newer than their existing counterpart
    Differential,
}

impl From<BackupType> for BackupStrategy {
    fn from(value: BackupType) -> Self {
        match value {
            BackupType::Full => Self::Full,
            BackupType::Differential => Self::Differential,
        }
    }
}

impl BackupStrategy {
    pub fn should_copy(&self, source: &Path, target: &Path) -> bool {
        match self {
            Self::Full => true,
            Self::Differential => is_newer_than_target(source, target),
        }
    }

    /// Copy `source` to `target`, creating parent directories and preserving
    /// permissions and timestamps. Returns the number of bytes written.
    pub fn copy(&self, source: &Path, target: &Path) -> io::Result<u64> {
        copy_file(source, target)
    }
}

fn is_newer_than_target(source: &Path, target: &Path) -> bool {
    let target_meta = match fs::metadata(target) {
        Ok(m) => m,
        Err(_) => return true,
    };
    let source_meta = match fs::metadata(source) {
        Ok(m) => m,
        // Let the copy surface the real error
        Err(_) => return true,
    };

    let source_mtime = FileTime::from_last_modification_time(&source_meta);
    let target_mtime = FileTime::from_last_modification_time(&target_meta);
    source_mtime > target_mtime
}

fn copy_file(source: &Path, target: &Path) -> io::Result<u64> {
    let source_metadata = fs::metadata(source)?;

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut reader = BufReader::with_capacity(BUFFER_SIZE, File::open(source)?);
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, File::create(target)?);

    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut bytes_written: u64 = 0;

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        writer.write_all(&buffer[..bytes_read])?;
        bytes_written += bytes_read as u64;
    }

    writer.flush()?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;

    if let Err(e) = fs::set_permissions(target, source_metadata.permissions()) {
        debug!(target = %target.display(), error = %e, "Failed to set file permissions");
    }

    let atime = FileTime::from_last_access_time(&source_metadata);
    let mtime = FileTime::from_last_modification_time(&source_metadata);
    if let Err(e) = filetime::set_file_times(target, atime, mtime) {
        debug!(target = %target.display(), error = %e, "Failed to preserve file timestamps");
    }

    Ok(bytes_written)
}
