//! Deletion Auditor.
//!
//! Hash the file, destroy it (shred-style overwrite when available, else
//! unlink), verify the path no longer resolves, and append one JSON object
//! per line to an append-only audit log.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use archivist_core::model::{DeletionMethod, DeletionRecord};
use archivist_core::ErrorKind;
use chrono::Utc;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum DeletionError {
    #[error("path {0:?} escapes the staging directory")]
    OutsideStagingDir(PathBuf),
    #[error("failed to read audio file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to destroy audio file {path:?}: {source}")]
    Destroy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("deletion of {0:?} could not be verified: path still resolves")]
    VerificationFailed(PathBuf),
    #[error("failed to append to audit log {path:?}: {source}")]
    AuditLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DeletionError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::DeletionFailed
    }
}

/// Appends a line-delimited JSON audit trail and destroys audio
/// files confined to a configured staging directory.
pub struct DeletionAuditor {
    staging_dir: PathBuf,
    audit_log_path: PathBuf,
    write_lock: Mutex<()>,
}

impl DeletionAuditor {
    pub fn new(staging_dir: impl Into<PathBuf>, audit_log_path: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            audit_log_path: audit_log_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn guard_within_staging(&self, path: &Path) -> Result<(), DeletionError> {
        let staging = fs::canonicalize(&self.staging_dir).unwrap_or_else(|_| self.staging_dir.clone());
        let parent = path.parent().unwrap_or(path);
        let canon_parent = fs::canonicalize(parent).unwrap_or_else(|_| parent.to_path_buf());
        if !canon_parent.starts_with(&staging) {
            return Err(DeletionError::OutsideStagingDir(path.to_path_buf()));
        }
        Ok(())
    }

    /// Runs the destroy-then-verify protocol for `recording_id`'s audio at
    /// `path` and returns the resulting `DeletionRecord`. Fails loudly
    /// (without destroying anything further) if verification does not
    /// confirm the file is gone.
    pub fn delete(&self, recording_id: &str, path: &Path) -> Result<DeletionRecord, DeletionError> {
        self.guard_within_staging(path)?;

        let bytes = fs::metadata(path)
            .map_err(|source| DeletionError::Read {
                path: path.to_path_buf(),
                source,
            })?
            .len();

        let contents = fs::read(path).map_err(|source| DeletionError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let sha256 = hex::encode(Sha256::digest(&contents));

        let method = self.destroy(path, bytes)?;

        if path.exists() {
            error!(recording_id, ?path, "deletion verification failed");
            return Err(DeletionError::VerificationFailed(path.to_path_buf()));
        }

        let record = DeletionRecord {
            recording_id: recording_id.to_string(),
            audio_path: path.to_string_lossy().into_owned(),
            bytes,
            sha256,
            method,
            verified: true,
            deleted_at: Utc::now(),
        };

        self.append_audit_line(&record)?;
        info!(recording_id, ?path, "audio deleted and verified");
        Ok(record)
    }

    /// Single-pass zero-fill overwrite followed by unlink, when the
    /// platform allows writing to the file before removing it; otherwise a
    /// plain unlink.
    fn destroy(&self, path: &Path, bytes: u64) -> Result<DeletionMethod, DeletionError> {
        let overwrite_result = OpenOptions::new()
            .write(true)
            .open(path)
            .and_then(|mut file| {
                let zeros = vec![0u8; 64 * 1024];
                let mut remaining = bytes;
                while remaining > 0 {
                    let chunk = remaining.min(zeros.len() as u64) as usize;
                    file.write_all(&zeros[..chunk])?;
                    remaining -= chunk as u64;
                }
                file.flush()
            });

        let method = if overwrite_result.is_ok() {
            DeletionMethod::Overwrite
        } else {
            DeletionMethod::Unlink
        };

        fs::remove_file(path).map_err(|source| DeletionError::Destroy {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(method)
    }

    fn append_audit_line(&self, record: &DeletionRecord) -> Result<(), DeletionError> {
        let _guard = self.write_lock.lock();
        let line = serde_json::to_string(&AuditLine::from(record)).expect("audit line serializes");

        if let Some(parent) = self.audit_log_path.parent() {
            fs::create_dir_all(parent).map_err(|source| DeletionError::AuditLog {
                path: self.audit_log_path.clone(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)
            .map_err(|source| DeletionError::AuditLog {
                path: self.audit_log_path.clone(),
                source,
            })?;

        writeln!(file, "{line}").map_err(|source| DeletionError::AuditLog {
            path: self.audit_log_path.clone(),
            source,
        })
    }
}

#[derive(serde::Serialize)]
struct AuditLine<'a> {
    timestamp: chrono::DateTime<Utc>,
    action: &'static str,
    audio_file: &'a str,
    bytes: u64,
    sha256: &'a str,
    method: &'static str,
    verified: bool,
}

impl<'a> From<&'a DeletionRecord> for AuditLine<'a> {
    fn from(record: &'a DeletionRecord) -> Self {
        Self {
            timestamp: record.deleted_at,
            action: "AUDIO_DELETION",
            audio_file: &record.audio_path,
            bytes: record.bytes,
            sha256: &record.sha256,
            method: match record.method {
                DeletionMethod::Unlink => "unlink",
                DeletionMethod::Overwrite => "overwrite",
            },
            verified: record.verified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;

    #[test]
    fn deletes_file_and_appends_one_audit_line() {
        let dir = tempfile::tempdir().unwrap();
        let audio_path = dir.path().join("r1.mp3");
        fs::write(&audio_path, b"fake audio bytes").unwrap();

        let audit_log = dir.path().join("audit.jsonl");
        let auditor = DeletionAuditor::new(dir.path(), &audit_log);

        let record = auditor.delete("r1", &audio_path).unwrap();
        assert!(record.verified);
        assert!(!audio_path.exists());
        assert!(record.audio_path.ends_with("r1.mp3"));

        let lines: Vec<_> = std::io::BufReader::new(fs::File::open(&audit_log).unwrap())
            .lines()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(lines.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(parsed["action"], "AUDIO_DELETION");
        assert_eq!(parsed["verified"], true);
    }

    #[test]
    fn rejects_paths_outside_the_staging_directory() {
        let staging = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let audio_path = outside.path().join("r1.mp3");
        fs::write(&audio_path, b"fake audio bytes").unwrap();

        let auditor = DeletionAuditor::new(staging.path(), staging.path().join("audit.jsonl"));
        let result = auditor.delete("r1", &audio_path);
        assert!(matches!(result, Err(DeletionError::OutsideStagingDir(_))));
        assert!(audio_path.exists());
    }

    #[test]
    fn appends_across_multiple_deletions() {
        let dir = tempfile::tempdir().unwrap();
        let audit_log = dir.path().join("audit.jsonl");
        let auditor = DeletionAuditor::new(dir.path(), &audit_log);

        for id in ["r1", "r2", "r3"] {
            let path = dir.path().join(format!("{id}.mp3"));
            fs::write(&path, b"audio").unwrap();
            auditor.delete(id, &path).unwrap();
        }

        let lines: Vec<_> = std::io::BufReader::new(fs::File::open(&audit_log).unwrap())
            .lines()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(lines.len(), 3);
    }
}
