use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use harvester_core::{Effect, LedgerEntry, LedgerFormatError, RunRequest, RunState};
use thiserror::Error;

use engine_logging::{engine_error, engine_info};

use crate::persist::{AtomicFileWriter, PersistError};

pub const STATE_FAILURE_MESSAGE: &str =
    "FATAL ERROR MANAGING STATE FILE - STATE MAY BE IRRETRIEVABLY CORRUPT";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("cannot read ledger {0}: {1}")]
    Read(PathBuf, io::Error),
    #[error("ledger {0} is corrupt: {1}")]
    Format(PathBuf, LedgerFormatError),
    #[error("cannot write ledger {0}: {1}")]
    Write(PathBuf, PersistError),
    #[error("ledger path {0} has no file name")]
    Path(PathBuf),
}

/// Reads and replaces the run ledger file.
#[derive(Debug, Clone)]
pub struct StateManager {
    path: PathBuf,
}

impl StateManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when the ledger does not exist yet.
    pub fn load(&self) -> Result<Option<LedgerEntry>, LedgerError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(LedgerError::Read(self.path.clone(), err)),
        };
        LedgerEntry::parse(&text)
            .map(Some)
            .map_err(|err| LedgerError::Format(self.path.clone(), err))
    }

    /// Loads the ledger and decides the classification of this run.
    pub fn resolve(
        &self,
        request: RunRequest,
        started_at: DateTime<Utc>,
    ) -> Result<RunState, LedgerError> {
        let entry = self.load()?;
        let state = RunState::resolve(entry.as_ref(), request, started_at);
        engine_info!(
            "run {} classified as {} (previous run count {})",
            state.current_run_count(),
            state.classification(),
            state.previous_run_count()
        );
        Ok(state)
    }

    pub fn write(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let result = self.write_inner(entry);
        if let Err(err) = &result {
            engine_error!("{STATE_FAILURE_MESSAGE}: {err}");
        }
        result
    }

    fn write_inner(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let file_name = self
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| LedgerError::Path(self.path.clone()))?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        AtomicFileWriter::new(dir)
            .write(file_name, entry.render().as_bytes())
            .map_err(|err| LedgerError::Write(self.path.clone(), err))?;
        Ok(())
    }

    /// Executes the lifecycle effects produced by `harvester_core::update`.
    pub fn apply(&self, effects: &[Effect]) -> Result<(), LedgerError> {
        for effect in effects {
            match effect {
                Effect::WriteLedger(entry) => {
                    self.write(entry)?;
                    engine_info!(
                        "ledger updated: run count {}{}",
                        entry.run_count,
                        entry
                            .failure
                            .map(|tag| format!(", tagged {tag}"))
                            .unwrap_or_default()
                    );
                }
            }
        }
        Ok(())
    }
}
