use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, FixedOffset};
use engine_logging::{engine_error, engine_info, engine_warn};
use harvester_core::{
    update, ItemId, ItemKind, Run, RunClassification, RunEvent, RunRequest, RunState,
};
use harvester_engine::{
    diff, list_fragments, write_manifest, write_updates, DiffSummary, FeedClient, FeedEntry,
    FeedQuery, FragmentKind, FragmentSplitter, GeneralUrlBuilder, HarvestError, ItemSink,
    NTriplesGraph, QueryOptions, QueryPool, RateLimiter, RawItemStore, ReqwestFetcher,
    ScopeError, StateManager, TranslatedOutput, TranslationQueue, TranslationService, Translator,
    SNAPSHOT_FILE,
};

use crate::config::HarvesterConfig;

/// What one run did, for the final log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub classification: RunClassification,
    pub run_count: i64,
    pub entries: usize,
    pub diff: DiffSummary,
    pub fragments: usize,
}

/// Drives one complete run and records its outcome in the ledger.
///
/// Every item the run fetches or re-reads is handed to `translator`, and all
/// translations are finished before the graph is diffed.
pub async fn run_harvest(
    config: &HarvesterConfig,
    translator: Arc<dyn Translator>,
    request: RunRequest,
    started_at: DateTime<chrono::Utc>,
) -> Result<RunSummary, HarvestError> {
    let ledger = StateManager::new(&config.ledger_file);
    let state = ledger.resolve(request, started_at)?;
    if let Some(prior) = state.recovering_from() {
        engine_warn!(
            "previous run ended with {prior}; this run is {}",
            state.classification()
        );
    }

    let mut lifecycle = Lifecycle::new(state.clone(), &ledger);
    match pipeline(config, translator, &state, &mut lifecycle).await {
        Ok(summary) => {
            lifecycle.fire(RunEvent::Completed)?;
            Ok(summary)
        }
        Err(err) => {
            if let Err(ledger_err) = lifecycle.fire(RunEvent::Failed) {
                engine_error!("could not record the failed run: {ledger_err}");
            }
            Err(err)
        }
    }
}

/// Feeds lifecycle events through `update` and writes the resulting ledger entries.
struct Lifecycle<'a> {
    run: Run,
    ledger: &'a StateManager,
}

impl<'a> Lifecycle<'a> {
    fn new(state: RunState, ledger: &'a StateManager) -> Self {
        Self {
            run: Run::new(state),
            ledger,
        }
    }

    fn fire(&mut self, event: RunEvent) -> Result<(), HarvestError> {
        let (run, effects) = update(self.run.clone(), event);
        self.run = run;
        self.ledger.apply(&effects)?;
        Ok(())
    }
}

async fn pipeline(
    config: &HarvesterConfig,
    translator: Arc<dyn Translator>,
    state: &RunState,
    lifecycle: &mut Lifecycle<'_>,
) -> Result<RunSummary, HarvestError> {
    let store = RawItemStore::open(&config.raw_cache_dir)?;
    let output = TranslatedOutput::new(&config.translated_dir);
    let changes = ChangeLog::default();
    let reprocessing = state.classification() == RunClassification::Reprocessing;

    lifecycle.fire(RunEvent::CacheMutationStarted)?;
    if reprocessing || state.classification().is_full_pull() {
        for kind in ItemKind::ALL {
            output.clear_kind(kind)?;
        }
    }
    let service = TranslationService::start(translator, output, config.translation_workers);
    let gathered = if reprocessing {
        let mut queue = service.queue();
        store
            .reprocess(&mut queue)
            .map(|stats| stats.processed)
            .map_err(HarvestError::from)
    } else {
        harvest(config, state, &store, &changes, service.queue()).await
    };
    // a stopped translation service is the root cause of any sink failure above
    let translated = service.finish().await;
    let entries = match (gathered, translated) {
        (_, Err(err)) => return Err(err.into()),
        (Err(err), Ok(_)) => return Err(err),
        (Ok(entries), Ok(_)) => entries,
    };
    engine_info!("{} live items touched in the raw cache", changes.len());

    let (diff, fragments) = emit_fragments(config, state)?;
    Ok(RunSummary {
        classification: state.classification(),
        run_count: state.current_run_count(),
        entries,
        diff,
        fragments,
    })
}

async fn harvest(
    config: &HarvesterConfig,
    state: &RunState,
    store: &RawItemStore,
    changes: &ChangeLog,
    translations: TranslationQueue,
) -> Result<usize, HarvestError> {
    if state.classification().is_full_pull() {
        for kind in ItemKind::ALL {
            store.clear_kind(kind)?;
        }
    }

    let settings = config
        .client_settings()
        .map_err(|err| HarvestError::ProtocolInvariant(err.to_string()))?;
    let fetcher = ReqwestFetcher::new(config.fetch_settings()).map_err(|err| {
        HarvestError::Transport {
            url: settings.endpoint.to_string(),
            attempts: 0,
            message: err.to_string(),
        }
    })?;
    let client = Arc::new(FeedClient::new(
        settings,
        Arc::new(fetcher),
        Arc::new(GeneralUrlBuilder),
        Arc::new(RateLimiter::new(config.request_interval())),
    ));
    let pool = QueryPool::new(config.max_fetch_workers);
    let sink = |_: &FeedQuery| {
        CacheSink::new(store.clone(), changes.clone(), translations.clone())
    };

    let since = state.modified_since();
    let mut entries = 0;

    let objects = config
        .categories
        .iter()
        .map(|&category| FeedQuery::Objects {
            category,
            full_details: true,
            modified_since: since,
            deleted: false,
        })
        .collect();
    entries += pool
        .run(Arc::clone(&client), with_options(config, objects), sink)
        .await?
        .entries;

    let related = vec![
        FeedQuery::Relationships {
            full_details: false,
            modified_since: since,
            deleted: false,
        },
        FeedQuery::Groups,
        FeedQuery::RelationshipTypes,
    ];
    entries += pool
        .run(Arc::clone(&client), with_options(config, related), sink)
        .await?
        .entries;

    if since.is_some() {
        let plan = config
            .repull_policy()
            .plan(&changes.ids(), &store.relationship_links()?);
        engine_info!(
            "{} cached relationships to pull again, {} to translate again",
            plan.repull.len(),
            plan.reprocess.len()
        );
        if !plan.repull.is_empty() {
            let repull = vec![FeedQuery::RelationshipList { ids: plan.repull }];
            entries += pool
                .run(Arc::clone(&client), with_options(config, repull), sink)
                .await?
                .entries;
        }
        let mut replay = translations.clone();
        store.replay(&plan.reprocess, &mut replay)?;
    }

    // Deletions go last so they win over a modification of the same item.
    if since.is_some() {
        let mut deletions: Vec<FeedQuery> = config
            .categories
            .iter()
            .map(|&category| FeedQuery::Objects {
                category,
                full_details: false,
                modified_since: since,
                deleted: true,
            })
            .collect();
        deletions.push(FeedQuery::Relationships {
            full_details: false,
            modified_since: since,
            deleted: true,
        });
        entries += pool
            .run(client, with_options(config, deletions), sink)
            .await?
            .entries;
    }

    Ok(entries)
}

fn with_options(
    config: &HarvesterConfig,
    queries: Vec<FeedQuery>,
) -> Vec<(FeedQuery, QueryOptions)> {
    queries
        .into_iter()
        .map(|query| {
            let options = QueryOptions::for_query(
                &query,
                config.full_detail_per_page,
                config.ref_detail_per_page,
                config.process_all_pages,
            );
            (query, options)
        })
        .collect()
}

/// Loads the translated output into this run's snapshot slot, diffs it against
/// the previous slot and cuts both deltas into fragments.
fn emit_fragments(
    config: &HarvesterConfig,
    state: &RunState,
) -> Result<(DiffSummary, usize), HarvestError> {
    let current_dir = config.snapshot_dir.join(state.current_slot().dir_name());
    let previous_dir = config.snapshot_dir.join(state.previous_slot().dir_name());

    let current = NTriplesGraph::from_dir(&config.translated_dir)?;
    let previous = NTriplesGraph::load(&previous_dir.join(SNAPSHOT_FILE))?;
    current.save(&current_dir.join(SNAPSHOT_FILE))?;

    let additions = current_dir.join("additions.nt");
    let subtractions = current_dir.join("subtractions.nt");
    let summary = diff(&current, &previous, &additions, &subtractions)?;
    if summary.is_empty() {
        engine_info!("no graph changes since the previous run");
        return Ok((summary, 0));
    }

    let timestamp: DateTime<FixedOffset> = state.started_at().fixed_offset();
    let splitter = FragmentSplitter::new(
        &config.fragment_dir,
        config.fragment_format,
        config.max_fragment_bytes,
    );
    let mut written: Vec<PathBuf> =
        splitter.split(&subtractions, timestamp, FragmentKind::Subtractions)?;
    written.extend(splitter.split(&additions, timestamp, FragmentKind::Additions)?);

    let this_run: Vec<_> = list_fragments(
        &config.fragment_dir,
        config.fragment_format,
        config.subtract_first,
    )?
    .into_iter()
    .filter(|(name, _)| name.timestamp == timestamp)
    .collect();
    let manifest = write_manifest(&config.fragment_dir, timestamp, &this_run)?;
    engine_info!(
        "{} fragments listed in {}",
        written.len(),
        manifest.display()
    );
    if let Some(graph) = &config.update_graph {
        let updates = write_updates(&config.fragment_dir, timestamp, &this_run, graph)?;
        engine_info!("update request for <{graph}> written to {}", updates.display());
    }
    Ok((summary, written.len()))
}

/// Ids of items written to the raw cache during this run. Clones share the log.
#[derive(Debug, Clone, Default)]
struct ChangeLog(Arc<Mutex<BTreeSet<ItemId>>>);

impl ChangeLog {
    fn record(&self, id: ItemId) -> Result<(), ScopeError> {
        self.0
            .lock()
            .map_err(|_| ScopeError::Sink("change log poisoned".into()))?
            .insert(id);
        Ok(())
    }

    fn ids(&self) -> BTreeSet<ItemId> {
        self.0.lock().map(|ids| ids.clone()).unwrap_or_default()
    }

    fn len(&self) -> usize {
        self.0.lock().map(|ids| ids.len()).unwrap_or_default()
    }
}

/// Writes fetched entries to the raw cache, notes every live item it saw and
/// queues the entry for translation.
struct CacheSink {
    store: RawItemStore,
    changes: ChangeLog,
    translations: TranslationQueue,
}

impl CacheSink {
    fn new(store: RawItemStore, changes: ChangeLog, translations: TranslationQueue) -> Self {
        Self {
            store,
            changes,
            translations,
        }
    }
}

impl ItemSink<FeedEntry> for CacheSink {
    fn accept(&mut self, entry: FeedEntry) -> Result<(), ScopeError> {
        self.store
            .store(&entry)
            .map_err(|err| ScopeError::Sink(err.to_string()))?;
        if !entry.deleted {
            self.changes.record(entry.id)?;
        }
        self.translations.accept(entry)
    }
}
