use std::cmp::Ordering;
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use thiserror::Error;

use engine_logging::{engine_info, engine_warn};

use crate::filename::{FragmentKind, FragmentName, FragmentPattern};
use crate::persist::{AtomicFileWriter, PersistError};

/// Fragments are never cut smaller than this, whatever the caller asks for.
pub const MIN_FRAGMENT_BYTES: u64 = 64 * 1024;
pub const DEFAULT_MAX_FRAGMENT_BYTES: u64 = 1_228_800;

#[derive(Debug, Error)]
pub enum FragmentError {
    #[error("cannot read {0}: {1}")]
    Read(PathBuf, io::Error),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("invalid fragment extension: {0}")]
    Pattern(#[from] regex::Error),
    #[error("two fragments share the ordering key of {0}")]
    DuplicateOrderKey(String),
}

/// Serialisation of the diff files, which decides where a fragment may end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum FragmentFormat {
    /// One statement per line.
    #[default]
    NTriples,
    /// Statements may span lines and are separated by blank lines.
    N3,
}

impl FragmentFormat {
    pub fn extension(self) -> &'static str {
        match self {
            FragmentFormat::NTriples => "nt",
            FragmentFormat::N3 => "n3",
        }
    }

    fn is_split_point(self, line: &[u8]) -> bool {
        match self {
            FragmentFormat::NTriples => true,
            FragmentFormat::N3 => line.iter().all(u8::is_ascii_whitespace),
        }
    }
}

/// Cuts diff files into size-bounded fragments written to one directory.
#[derive(Debug, Clone)]
pub struct FragmentSplitter {
    out_dir: PathBuf,
    format: FragmentFormat,
    max_bytes: u64,
}

impl FragmentSplitter {
    pub fn new(out_dir: impl Into<PathBuf>, format: FragmentFormat, max_bytes: u64) -> Self {
        Self {
            out_dir: out_dir.into(),
            format,
            max_bytes: max_bytes.max(MIN_FRAGMENT_BYTES),
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn format(&self) -> FragmentFormat {
        self.format
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Splits `input` into `{kind}_{n}_{timestamp}` fragments, byte for byte.
    ///
    /// A fragment only ends at a split point of the format. If anything
    /// fails, fragments written by this call are removed again.
    pub fn split(
        &self,
        input: &Path,
        timestamp: DateTime<FixedOffset>,
        kind: FragmentKind,
    ) -> Result<Vec<PathBuf>, FragmentError> {
        let mut written = Vec::new();
        match self.split_into(input, timestamp, kind, &mut written) {
            Ok(()) => {
                engine_info!(
                    "{} split into {} {} fragments",
                    input.display(),
                    written.len(),
                    kind.prefix()
                );
                Ok(written)
            }
            Err(err) => {
                for path in &written {
                    if let Err(remove_err) = fs::remove_file(path) {
                        engine_warn!("could not remove partial fragment {}: {remove_err}", path.display());
                    }
                }
                Err(err)
            }
        }
    }

    fn split_into(
        &self,
        input: &Path,
        timestamp: DateTime<FixedOffset>,
        kind: FragmentKind,
        written: &mut Vec<PathBuf>,
    ) -> Result<(), FragmentError> {
        let read_err = |err: io::Error| FragmentError::Read(input.to_path_buf(), err);
        let mut reader = BufReader::new(fs::File::open(input).map_err(read_err)?);
        let writer = AtomicFileWriter::new(&self.out_dir);
        let limit = usize::try_from(self.max_bytes).unwrap_or(usize::MAX);

        let flush = |content: &[u8], written: &mut Vec<PathBuf>| -> Result<(), FragmentError> {
            let sequence = u32::try_from(written.len()).unwrap_or(u32::MAX);
            let name = FragmentName::new(kind, sequence, timestamp, self.format.extension());
            written.push(writer.write(&name.file_name(), content)?);
            Ok(())
        };

        // `ready` ends on a split point; `pending` holds lines read since the last one
        let mut ready: Vec<u8> = Vec::with_capacity(limit.min(1 << 22));
        let mut pending: Vec<u8> = Vec::new();
        let mut line: Vec<u8> = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line).map_err(read_err)? == 0 {
                break;
            }
            pending.extend_from_slice(&line);
            if !self.format.is_split_point(&line) {
                continue;
            }
            if !ready.is_empty() && ready.len() + pending.len() > limit {
                flush(&ready, written)?;
                ready.clear();
            }
            ready.append(&mut pending);
        }
        // end of input is a split point too
        if !ready.is_empty() && ready.len() + pending.len() > limit {
            flush(&ready, written)?;
            ready.clear();
        }
        ready.append(&mut pending);
        if !ready.is_empty() {
            flush(&ready, written)?;
        }
        Ok(())
    }
}

/// Lists the fragments in `dir` in load order.
///
/// Order is timestamp, then kind (subtractions first when `subtract_first`),
/// then sequence. Files outside the naming grammar are ignored.
pub fn list_fragments(
    dir: &Path,
    format: FragmentFormat,
    subtract_first: bool,
) -> Result<Vec<(FragmentName, PathBuf)>, FragmentError> {
    let pattern = FragmentPattern::new(format.extension())?;
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(FragmentError::Read(dir.to_path_buf(), err)),
    };

    let mut fragments = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| FragmentError::Read(dir.to_path_buf(), err))?;
        if !entry.path().is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str().and_then(|n| pattern.parse(n)) {
            fragments.push((name, entry.path()));
        }
    }

    let rank = |kind: FragmentKind| match (kind, subtract_first) {
        (FragmentKind::Subtractions, true) | (FragmentKind::Additions, false) => 0,
        _ => 1,
    };
    let order = |a: &FragmentName, b: &FragmentName| -> Ordering {
        a.timestamp
            .cmp(&b.timestamp)
            .then(rank(a.kind).cmp(&rank(b.kind)))
            .then(a.sequence.cmp(&b.sequence))
    };
    fragments.sort_by(|(a, _), (b, _)| order(a, b));

    for pair in fragments.windows(2) {
        if order(&pair[0].0, &pair[1].0) == Ordering::Equal {
            return Err(FragmentError::DuplicateOrderKey(pair[1].0.file_name()));
        }
    }
    Ok(fragments)
}
