use std::fs;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use harvester_core::{ItemId, ItemKind, RelationshipLink};
use thiserror::Error;

use engine_logging::{engine_debug, engine_info, engine_warn};

use crate::feed::{
    cached_entry_location, cached_relationship_location, EntryExtractor, FeedEntry,
    RelationshipLinkExtractor,
};
use crate::handlers::{Handler, ItemExtractor, ItemSink};
use crate::persist::{ensure_dir, AtomicFileWriter, PersistError};
use crate::scope::{ScopeError, ScopedEventProcessor};
use crate::xml::XmlTokenSource;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("cannot read cache directory {0}: {1}")]
    Scan(PathBuf, io::Error),
    #[error("cannot remove {0}: {1}")]
    Remove(PathBuf, io::Error),
    #[error("cached item rejected: {0}")]
    Sink(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReprocessStats {
    pub processed: usize,
    pub skipped: usize,
}

/// Directory of raw feed entries, one file per item: `{kind}/{descriptor}-{id}.xml`.
#[derive(Debug, Clone)]
pub struct RawItemStore {
    root: PathBuf,
}

impl RawItemStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        ensure_dir(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn kind_dir(&self, kind: ItemKind) -> PathBuf {
        self.root.join(kind.plural())
    }

    pub fn path_for(&self, id: &ItemId) -> PathBuf {
        self.kind_dir(id.kind()).join(file_name(id))
    }

    /// Writes a live entry, or removes the cached file of a deleted one.
    pub fn store(&self, entry: &FeedEntry) -> Result<(), StoreError> {
        if entry.deleted {
            return self.remove(&entry.id);
        }
        AtomicFileWriter::new(self.kind_dir(entry.id.kind()))
            .write(&file_name(&entry.id), entry.xml.as_bytes())?;
        Ok(())
    }

    pub fn remove(&self, id: &ItemId) -> Result<(), StoreError> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => {
                engine_debug!("removed cached {id}");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Remove(path, err)),
        }
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.path_for(id).is_file()
    }

    /// Drops every cached item of `kind`; used before a full pull.
    pub fn clear_kind(&self, kind: ItemKind) -> Result<(), StoreError> {
        let dir = self.kind_dir(kind);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                engine_info!("cleared raw cache for {}", kind.plural());
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Remove(dir, err)),
        }
    }

    fn cached_files(&self, kind: ItemKind) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.kind_dir(kind);
        let mut files = match fs::read_dir(&dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("xml"))
                .collect::<Vec<_>>(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(StoreError::Scan(dir, err)),
        };
        files.sort();
        Ok(files)
    }

    /// Re-parses every cached entry, in path order, and hands it to `sink`.
    ///
    /// A file that cannot be read or parsed is logged and skipped; a sink
    /// failure ends the scan.
    pub fn reprocess<S>(&self, sink: &mut S) -> Result<ReprocessStats, StoreError>
    where
        S: ItemSink<FeedEntry> + Send,
    {
        let mut stats = ReprocessStats::default();
        for kind in ItemKind::ALL {
            for path in self.cached_files(kind)? {
                replay_file(&path, &mut *sink, &mut stats)?;
            }
        }
        engine_info!(
            "reprocessed {} cached items, skipped {}",
            stats.processed,
            stats.skipped
        );
        Ok(stats)
    }

    /// Hands the cached entries of `ids` to `sink` again. Ids with no cached
    /// file are counted as skipped.
    pub fn replay<S>(&self, ids: &[ItemId], sink: &mut S) -> Result<ReprocessStats, StoreError>
    where
        S: ItemSink<FeedEntry> + Send,
    {
        let mut stats = ReprocessStats::default();
        for id in ids {
            if !self.contains(id) {
                engine_debug!("{id} is no longer cached");
                stats.skipped += 1;
                continue;
            }
            replay_file(&self.path_for(id), &mut *sink, &mut stats)?;
        }
        Ok(stats)
    }

    /// Reads the links of every cached relationship. Unreadable files are skipped.
    pub fn relationship_links(&self) -> Result<Vec<RelationshipLink>, StoreError> {
        let mut links = Vec::new();
        for path in self.cached_files(ItemKind::Relationship)? {
            if let Err(err) = read_link(&path, &mut links) {
                engine_warn!("cannot read links of {}: {err}", path.display());
            }
        }
        engine_debug!("read {} cached relationship links", links.len());
        Ok(links)
    }
}

fn read_link(path: &Path, links: &mut Vec<RelationshipLink>) -> Result<(), ScopeError> {
    let file = fs::File::open(path).map_err(|err| ScopeError::Io(err.to_string()))?;
    let extractor =
        ItemExtractor::new(RelationshipLinkExtractor::default(), links).with_max_items(1);
    let mut processor = ScopedEventProcessor::new();
    processor.register(cached_relationship_location(), Handler::extracting(extractor));
    processor.process(&mut XmlTokenSource::new(BufReader::new(file)))
}

fn replay_file<S: ItemSink<FeedEntry> + Send>(
    path: &Path,
    sink: &mut S,
    stats: &mut ReprocessStats,
) -> Result<(), StoreError> {
    match reparse(path, sink) {
        Ok(()) => stats.processed += 1,
        Err(ScopeError::Sink(message)) => return Err(StoreError::Sink(message)),
        Err(err) => {
            engine_warn!("skipping cached file {}: {err}", path.display());
            stats.skipped += 1;
        }
    }
    Ok(())
}

fn reparse<S: ItemSink<FeedEntry> + Send>(path: &Path, sink: &mut S) -> Result<(), ScopeError> {
    let file = fs::File::open(path).map_err(|err| ScopeError::Io(err.to_string()))?;
    let extractor = ItemExtractor::new(EntryExtractor::default(), sink).with_max_items(1);
    let mut processor = ScopedEventProcessor::new();
    processor.register(cached_entry_location(), Handler::extracting(extractor));
    processor.process(&mut XmlTokenSource::new(BufReader::new(file)))
}

fn file_name(id: &ItemId) -> String {
    format!("{}-{}.xml", id.descriptor(), id.id())
}

impl ItemSink<FeedEntry> for RawItemStore {
    fn accept(&mut self, entry: FeedEntry) -> Result<(), ScopeError> {
        self.store(&entry)
            .map_err(|err| ScopeError::Sink(err.to_string()))
    }
}
