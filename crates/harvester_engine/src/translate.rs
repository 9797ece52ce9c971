use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use harvester_core::{ItemId, ItemKind};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use engine_logging::{engine_debug, engine_error, engine_info};

use crate::feed::FeedEntry;
use crate::handlers::ItemSink;
use crate::persist::AtomicFileWriter;
use crate::scope::ScopeError;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("cannot run {program}: {message}")]
    Spawn { program: String, message: String },
    #[error("translation of {item} failed: {message}")]
    Failed { item: ItemId, message: String },
    #[error("cannot update translated output {0}: {1}")]
    Output(PathBuf, String),
    #[error("translation worker stopped: {0}")]
    Stopped(String),
}

/// Turns one raw item into graph statements.
#[async_trait]
pub trait Translator: Send + Sync {
    /// N-Triples for a live item, or `None` when it yields no statements.
    async fn translate(&self, entry: &FeedEntry) -> Result<Option<String>, TranslateError>;
}

/// Runs an external program per item, raw XML on stdin and N-Triples on stdout.
///
/// The item is also named in `HARVEST_ITEM` (e.g. `user:42`) and
/// `HARVEST_ITEM_KIND`.
#[derive(Debug, Clone)]
pub struct CommandTranslator {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandTranslator {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl Translator for CommandTranslator {
    async fn translate(&self, entry: &FeedEntry) -> Result<Option<String>, TranslateError> {
        let program = self.program.display().to_string();
        let failed = |message: String| TranslateError::Failed {
            item: entry.id,
            message,
        };
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("HARVEST_ITEM", entry.id.to_string())
            .env("HARVEST_ITEM_KIND", entry.id.kind().name())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| TranslateError::Spawn {
                program: program.clone(),
                message: err.to_string(),
            })?;

        // feed stdin while stdout is read, so a chatty program cannot block on a full pipe
        let feeder = child.stdin.take().map(|mut stdin| {
            let xml = entry.xml.clone().into_bytes();
            tokio::spawn(async move { stdin.write_all(&xml).await })
        });
        let output = child
            .wait_with_output()
            .await
            .map_err(|err| failed(err.to_string()))?;
        if let Some(feeder) = feeder {
            // a program may exit without reading all of its input
            match feeder.await.map_err(|err| failed(err.to_string()))? {
                Err(err) if err.kind() != io::ErrorKind::BrokenPipe => {
                    return Err(failed(format!("writing stdin: {err}")));
                }
                _ => {}
            }
        }

        if !output.status.success() {
            return Err(failed(format!(
                "{program} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let text = String::from_utf8(output.stdout).map_err(|err| failed(err.to_string()))?;
        Ok((!text.trim().is_empty()).then_some(text))
    }
}

/// Translated files, one per item: `{kind}/{descriptor}-{id}.nt`.
#[derive(Debug, Clone)]
pub struct TranslatedOutput {
    root: PathBuf,
}

impl TranslatedOutput {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, id: &ItemId) -> PathBuf {
        self.root
            .join(id.kind().plural())
            .join(format!("{}-{}.nt", id.descriptor(), id.id()))
    }

    pub fn write(&self, id: &ItemId, statements: &str) -> Result<(), TranslateError> {
        let dir = self.root.join(id.kind().plural());
        let name = format!("{}-{}.nt", id.descriptor(), id.id());
        let mut content = statements.as_bytes().to_vec();
        if !content.ends_with(b"\n") {
            content.push(b'\n');
        }
        AtomicFileWriter::new(dir)
            .write(&name, &content)
            .map_err(|err| TranslateError::Output(self.path_for(id), err.to_string()))?;
        Ok(())
    }

    pub fn remove(&self, id: &ItemId) -> Result<(), TranslateError> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(TranslateError::Output(path, err.to_string())),
        }
    }

    /// Drops the translated files of `kind`; anything else under the root is kept.
    pub fn clear_kind(&self, kind: ItemKind) -> Result<(), TranslateError> {
        let dir = self.root.join(kind.plural());
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                engine_info!("cleared translated {}", kind.plural());
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(TranslateError::Output(dir, err.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranslateStats {
    pub translated: usize,
    pub empty: usize,
    pub removed: usize,
}

enum Outcome {
    Translated,
    Empty,
    Removed,
}

/// Sending side of a [`TranslationService`]. Clones share the queue.
#[derive(Debug, Clone)]
pub struct TranslationQueue(mpsc::UnboundedSender<FeedEntry>);

impl ItemSink<FeedEntry> for TranslationQueue {
    fn accept(&mut self, entry: FeedEntry) -> Result<(), ScopeError> {
        self.0
            .send(entry)
            .map_err(|_| ScopeError::Sink("translation service has stopped".into()))
    }
}

/// Translates queued items on a bounded number of workers.
///
/// Entries for the same item are applied in the order they were queued. A
/// deleted entry removes the item's translated file.
pub struct TranslationService {
    queue: TranslationQueue,
    worker: JoinHandle<Result<TranslateStats, TranslateError>>,
}

impl TranslationService {
    pub fn start(translator: Arc<dyn Translator>, output: TranslatedOutput, workers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(drain(translator, Arc::new(output), workers.max(1), rx));
        Self {
            queue: TranslationQueue(tx),
            worker,
        }
    }

    pub fn queue(&self) -> TranslationQueue {
        self.queue.clone()
    }

    /// Waits until everything queued has been translated.
    ///
    /// Every queue handed out must be dropped first; the service keeps
    /// waiting while one is alive.
    pub async fn finish(self) -> Result<TranslateStats, TranslateError> {
        drop(self.queue);
        let stats = self
            .worker
            .await
            .map_err(|err| TranslateError::Stopped(err.to_string()))??;
        engine_info!(
            "translated {} items ({} without statements), removed {}",
            stats.translated,
            stats.empty,
            stats.removed
        );
        Ok(stats)
    }
}

type Running = JoinSet<(ItemId, Result<Outcome, TranslateError>)>;

async fn drain(
    translator: Arc<dyn Translator>,
    output: Arc<TranslatedOutput>,
    workers: usize,
    mut rx: mpsc::UnboundedReceiver<FeedEntry>,
) -> Result<TranslateStats, TranslateError> {
    let mut running = Running::new();
    let mut in_flight: HashSet<ItemId> = HashSet::new();
    let mut stats = TranslateStats::default();
    let mut open = true;

    loop {
        if open && running.len() < workers {
            if let Some(entry) = rx.recv().await {
                while in_flight.contains(&entry.id) {
                    settle(&mut running, &mut in_flight, &mut stats).await?;
                }
                in_flight.insert(entry.id);
                let translator = Arc::clone(&translator);
                let output = Arc::clone(&output);
                running.spawn(async move {
                    let id = entry.id;
                    (id, translate_one(translator.as_ref(), &output, entry).await)
                });
                continue;
            }
            open = false;
        }
        if running.is_empty() {
            return Ok(stats);
        }
        settle(&mut running, &mut in_flight, &mut stats).await?;
    }
}

/// Waits for one running translation and records its outcome.
async fn settle(
    running: &mut Running,
    in_flight: &mut HashSet<ItemId>,
    stats: &mut TranslateStats,
) -> Result<(), TranslateError> {
    let Some(joined) = running.join_next().await else {
        return Ok(());
    };
    let (id, outcome) = match joined {
        Ok(done) => done,
        Err(err) => return stop(running, TranslateError::Stopped(err.to_string())).await,
    };
    in_flight.remove(&id);
    match outcome {
        Ok(Outcome::Translated) => stats.translated += 1,
        Ok(Outcome::Empty) => stats.empty += 1,
        Ok(Outcome::Removed) => stats.removed += 1,
        Err(err) => return stop(running, err).await,
    }
    Ok(())
}

async fn stop(running: &mut Running, err: TranslateError) -> Result<(), TranslateError> {
    engine_error!("{err}; abandoning {} running translations", running.len());
    running.shutdown().await;
    Err(err)
}

async fn translate_one(
    translator: &dyn Translator,
    output: &TranslatedOutput,
    entry: FeedEntry,
) -> Result<Outcome, TranslateError> {
    if entry.deleted {
        output.remove(&entry.id)?;
        engine_debug!("removed translation of deleted {}", entry.id);
        return Ok(Outcome::Removed);
    }
    match translator.translate(&entry).await? {
        Some(statements) => {
            output.write(&entry.id, &statements)?;
            Ok(Outcome::Translated)
        }
        None => {
            output.remove(&entry.id)?;
            Ok(Outcome::Empty)
        }
    }
}
