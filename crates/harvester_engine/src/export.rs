use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};
use serde_json::json;

use crate::filename::{FragmentName, FRAGMENT_TIMESTAMP_FORMAT};
use crate::sparql::fragment_update;
use crate::persist::{AtomicFileWriter, PersistError};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
}

impl From<ExportError> for crate::HarvestError {
    fn from(err: ExportError) -> Self {
        crate::HarvestError::Storage(err.to_string())
    }
}

pub fn manifest_file_name(timestamp: DateTime<FixedOffset>) -> String {
    format!("fragments-{}.json", timestamp.format(FRAGMENT_TIMESTAMP_FORMAT))
}

/// Records the fragments of one run, in load order, next to the fragments.
pub fn write_manifest(
    dir: &Path,
    timestamp: DateTime<FixedOffset>,
    fragments: &[(FragmentName, PathBuf)],
) -> Result<PathBuf, ExportError> {
    let mut files = Vec::with_capacity(fragments.len());
    let mut total_bytes: u64 = 0;
    for (name, path) in fragments {
        let bytes = fs::metadata(path)?.len();
        total_bytes += bytes;
        files.push(json!({
            "file": name.file_name(),
            "kind": name.kind.prefix(),
            "sequence": name.sequence,
            "bytes": bytes,
        }));
    }

    let manifest = json!({
        "timestamp": timestamp.format(FRAGMENT_TIMESTAMP_FORMAT).to_string(),
        "fragment_count": fragments.len(),
        "total_bytes": total_bytes,
        "fragments": files,
    });
    let writer = AtomicFileWriter::new(dir);
    let path = writer.write(
        &manifest_file_name(timestamp),
        manifest.to_string().as_bytes(),
    )?;
    Ok(path)
}

pub fn update_file_name(timestamp: DateTime<FixedOffset>) -> String {
    format!("updates-{}.ru", timestamp.format(FRAGMENT_TIMESTAMP_FORMAT))
}

/// Writes the fragments of one run as a single SPARQL update request against
/// `graph`, one operation per fragment in load order.
pub fn write_updates(
    dir: &Path,
    timestamp: DateTime<FixedOffset>,
    fragments: &[(FragmentName, PathBuf)],
    graph: &str,
) -> Result<PathBuf, ExportError> {
    let mut operations = Vec::with_capacity(fragments.len());
    for (name, path) in fragments {
        operations.push(fragment_update(path, name.kind, graph)?);
    }
    let request = operations.join(";\n");
    let path = AtomicFileWriter::new(dir).write(&update_file_name(timestamp), request.as_bytes())?;
    Ok(path)
}
