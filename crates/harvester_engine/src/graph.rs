use std::collections::BTreeSet;
use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use engine_logging::{engine_debug, engine_info};

use crate::persist::{AtomicFileWriter, PersistError};

/// File name of a snapshot inside its slot directory.
pub const SNAPSHOT_FILE: &str = "snapshot.nt";

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("io error on {0}: {1}")]
    Io(PathBuf, io::Error),
    #[error("{path}:{line}: not an N-Triples statement")]
    Syntax { path: PathBuf, line: usize },
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// A graph that can enumerate and test its statements.
pub trait GraphStore {
    fn statement_count(&self) -> usize;
    fn contains(&self, statement: &str) -> bool;
    /// Statements in a stable order.
    fn statements(&self) -> Box<dyn Iterator<Item = &str> + '_>;

    /// Writes `self` minus `other`, one statement per line. Returns the statement count.
    fn write_difference(&self, other: &dyn GraphStore, out: &mut dyn Write) -> io::Result<usize> {
        let mut written = 0;
        for statement in self.statements().filter(|s| !other.contains(s)) {
            out.write_all(statement.as_bytes())?;
            out.write_all(b"\n")?;
            written += 1;
        }
        Ok(written)
    }
}

/// In-memory set of N-Triples statements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NTriplesGraph {
    statements: BTreeSet<String>,
}

impl NTriplesGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one statement; blank and comment lines are ignored.
    pub fn insert(&mut self, line: &str) -> bool {
        match normalise(line) {
            Some(statement) => self.statements.insert(statement.to_string()),
            None => false,
        }
    }

    /// Loads a snapshot file; a missing file is an empty graph.
    pub fn load(path: &Path) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        match fs::File::open(path) {
            Ok(file) => graph.read_from(path, BufReader::new(file))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                engine_debug!("no snapshot at {}, starting empty", path.display());
            }
            Err(err) => return Err(GraphError::Io(path.to_path_buf(), err)),
        }
        Ok(graph)
    }

    /// Merges every `*.nt` file below `dir`, in path order.
    pub fn from_dir(dir: &Path) -> Result<Self, GraphError> {
        let mut files = Vec::new();
        collect_nt_files(dir, &mut files)?;
        files.sort();

        let mut graph = Self::new();
        for path in &files {
            let file = fs::File::open(path).map_err(|err| GraphError::Io(path.clone(), err))?;
            graph.read_from(path, BufReader::new(file))?;
        }
        engine_info!(
            "loaded {} statements from {} translated files",
            graph.statement_count(),
            files.len()
        );
        Ok(graph)
    }

    fn read_from(&mut self, path: &Path, reader: impl BufRead) -> Result<(), GraphError> {
        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|err| GraphError::Io(path.to_path_buf(), err))?;
            let Some(statement) = normalise(&line) else {
                continue;
            };
            if !statement.ends_with('.') {
                return Err(GraphError::Syntax {
                    path: path.to_path_buf(),
                    line: index + 1,
                });
            }
            self.statements.insert(statement.to_string());
        }
        Ok(())
    }

    /// Writes the snapshot atomically.
    pub fn save(&self, path: &Path) -> Result<(), GraphError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(SNAPSHOT_FILE);
        let mut content = Vec::new();
        for statement in &self.statements {
            content.extend_from_slice(statement.as_bytes());
            content.push(b'\n');
        }
        AtomicFileWriter::new(dir).write(name, &content)?;
        Ok(())
    }
}

impl GraphStore for NTriplesGraph {
    fn statement_count(&self) -> usize {
        self.statements.len()
    }

    fn contains(&self, statement: &str) -> bool {
        normalise(statement).is_some_and(|s| self.statements.contains(s))
    }

    fn statements(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        Box::new(self.statements.iter().map(String::as_str))
    }
}

/// The statement text of a line, without surrounding space or a trailing comment.
fn normalise(line: &str) -> Option<&str> {
    let trimmed = without_comment(line).trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Cuts the line at the first `#` outside an IRI or a string literal.
fn without_comment(line: &str) -> &str {
    let mut in_iri = false;
    let mut in_literal = false;
    let mut escaped = false;
    for (at, ch) in line.char_indices() {
        if in_literal {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_literal = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '<' => in_iri = true,
            '>' => in_iri = false,
            '"' if !in_iri => in_literal = true,
            '#' if !in_iri => return &line[..at],
            _ => {}
        }
    }
    line
}

fn collect_nt_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), GraphError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(GraphError::Io(dir.to_path_buf(), err)),
    };
    for entry in entries {
        let path = entry
            .map_err(|err| GraphError::Io(dir.to_path_buf(), err))?
            .path();
        if path.is_dir() {
            collect_nt_files(&path, files)?;
        } else if path.extension().and_then(|ext| ext.to_str()) == Some("nt") {
            files.push(path);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub additions: usize,
    pub subtractions: usize,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.additions == 0 && self.subtractions == 0
    }
}

/// Writes `current - previous` to `additions` and `previous - current` to `subtractions`.
pub fn diff(
    current: &dyn GraphStore,
    previous: &dyn GraphStore,
    additions: &Path,
    subtractions: &Path,
) -> Result<DiffSummary, GraphError> {
    let added = write_difference_file(current, previous, additions)?;
    let removed = write_difference_file(previous, current, subtractions)?;
    engine_info!("diff: {added} additions, {removed} subtractions");
    Ok(DiffSummary {
        additions: added,
        subtractions: removed,
    })
}

fn write_difference_file(
    left: &dyn GraphStore,
    right: &dyn GraphStore,
    path: &Path,
) -> Result<usize, GraphError> {
    let io_err = |err: io::Error| GraphError::Io(path.to_path_buf(), err);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut out = BufWriter::new(fs::File::create(path).map_err(io_err)?);
    let count = left.write_difference(right, &mut out).map_err(io_err)?;
    out.flush().map_err(io_err)?;
    Ok(count)
}
