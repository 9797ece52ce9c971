use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use harvester_app::{run_harvest, HarvesterConfig};
use harvester_core::{
    ItemId, LedgerEntry, ObjectCategory, PriorRunClassification, RunClassification, RunRequest,
};
use harvester_engine::{
    list_fragments, manifest_file_name, update_file_name, FeedEntry, FragmentFormat,
    HarvestError, RawItemStore, StateManager, TranslateError, TranslatedOutput, Translator,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Labels users by last name and publications by title; everything else has no statements.
#[derive(Default)]
struct LabelTranslator {
    seen: Mutex<Vec<ItemId>>,
    refuse: Option<ItemId>,
}

impl LabelTranslator {
    fn refusing(id: ItemId) -> Self {
        Self {
            refuse: Some(id),
            ..Self::default()
        }
    }

    fn seen(&self, id: ItemId) -> usize {
        self.seen.lock().unwrap().iter().filter(|&&s| s == id).count()
    }
}

fn text_of<'a>(xml: &'a str, element: &str) -> Option<&'a str> {
    let open = format!("{element}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find('<')? + start;
    Some(&xml[start..end])
}

#[async_trait]
impl Translator for LabelTranslator {
    async fn translate(&self, entry: &FeedEntry) -> Result<Option<String>, TranslateError> {
        self.seen.lock().unwrap().push(entry.id);
        if self.refuse == Some(entry.id) {
            return Err(TranslateError::Failed {
                item: entry.id,
                message: "stylesheet error".into(),
            });
        }
        let label = text_of(&entry.xml, "last-name").or_else(|| text_of(&entry.xml, "title"));
        Ok(label.map(|label| statement(entry.id, label)))
    }
}

fn statement(id: ItemId, label: &str) -> String {
    format!(
        "<http://ex.org/{}/{}> <http://www.w3.org/2000/01/rdf-schema#label> \"{label}\" .",
        id.descriptor(),
        id.id()
    )
}

fn user(id: u64) -> ItemId {
    ItemId::object(ObjectCategory::User, id)
}

fn feed(items: &[&str]) -> String {
    let entries: String = items
        .iter()
        .map(|item| format!("<entry>{item}</entry>"))
        .collect();
    format!(
        r#"<feed xmlns="http://www.w3.org/2005/Atom" xmlns:api="http://www.symplectic.co.uk/publications/api"><api:pagination items-per-page="25"/>{entries}</feed>"#
    )
}

const ADA: &str =
    r#"<api:object category="user" id="1"><api:last-name>Ada</api:last-name></api:object>"#;
const GRACE: &str =
    r#"<api:object category="user" id="2"><api:last-name>Grace</api:last-name></api:object>"#;
const ALAN: &str =
    r#"<api:object category="user" id="3"><api:last-name>Alan</api:last-name></api:object>"#;
const AUTHORSHIP: &str = r#"<api:relationship id="7" type="publication-user-authorship"><api:related direction="from"><api:object category="publication" id="9"/></api:related><api:related direction="to"><api:object category="user" id="1"/></api:related></api:relationship>"#;

async fn serve(server: &MockServer, at: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Serves `body` for the first request to `at` only, ahead of any other mock there.
async fn serve_once(server: &MockServer, at: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(server)
        .await;
}

/// Groups, types and the deletion feeds; users and relationships are up to each test.
async fn upstream() -> MockServer {
    let server = MockServer::start().await;
    serve(
        &server,
        "/api/deleted/users",
        feed(&[r#"<api:deleted-object category="user" id="2"/>"#]),
    )
    .await;
    serve(&server, "/api/deleted/publications", feed(&[])).await;
    serve(&server, "/api/relationships/deleted", feed(&[])).await;
    serve(&server, "/api/groups", feed(&[r#"<api:user-group id="3"/>"#])).await;
    serve(
        &server,
        "/api/relationship/types",
        feed(&[r#"<api:relationship-type id="8"/>"#]),
    )
    .await;
    server
}

fn config(root: &Path, endpoint: &str) -> HarvesterConfig {
    HarvesterConfig {
        api_endpoint: endpoint.to_string(),
        request_interval_ms: 0,
        max_retries: 1,
        retry_delay_ms: 10,
        raw_cache_dir: root.join("raw"),
        translated_dir: root.join("translated"),
        snapshot_dir: root.join("snapshots"),
        fragment_dir: root.join("fragments"),
        ledger_file: root.join("state.txt"),
        ..HarvesterConfig::default()
    }
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 2, hour, 0, 0).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fetched_items_reach_the_diff_of_the_same_run() {
    let temp = TempDir::new().unwrap();
    let server = upstream().await;
    serve_once(&server, "/api/users", feed(&[ADA, GRACE])).await;
    serve(&server, "/api/users", feed(&[ADA, ALAN])).await;
    serve(&server, "/api/relationships", feed(&[AUTHORSHIP])).await;
    let config = config(temp.path(), &format!("{}/api", server.uri()));
    let store = RawItemStore::open(&config.raw_cache_dir).unwrap();
    let output = TranslatedOutput::new(&config.translated_dir);
    let ledger = StateManager::new(&config.ledger_file);
    let translator = Arc::new(LabelTranslator::default());

    let first = run_harvest(&config, translator.clone(), RunRequest::Delta, at(10))
        .await
        .unwrap();
    assert_eq!(first.classification, RunClassification::Initial);
    assert_eq!(first.run_count, 0);
    assert_eq!(first.entries, 5);
    assert_eq!((first.diff.additions, first.diff.subtractions), (2, 0));
    assert_eq!(first.fragments, 1);
    assert!(store.contains(&user(2)));
    assert!(store.contains(&ItemId::relationship(7)));
    assert_eq!(
        fs::read_to_string(output.path_for(&user(2))).unwrap(),
        format!("{}\n", statement(user(2), "Grace"))
    );
    assert!(!output.path_for(&ItemId::relationship(7)).exists());
    assert_eq!(
        ledger.load().unwrap(),
        Some(LedgerEntry {
            run_count: 0,
            last_run: at(10),
            failure: None,
        })
    );

    let second = run_harvest(&config, translator.clone(), RunRequest::Delta, at(11))
        .await
        .unwrap();
    assert_eq!(second.classification, RunClassification::Delta);
    assert_eq!(second.run_count, 1);
    assert_eq!((second.diff.additions, second.diff.subtractions), (1, 1));
    assert_eq!(second.fragments, 2);
    assert!(!store.contains(&user(2)));
    assert!(!output.path_for(&user(2)).exists());
    assert_eq!(translator.seen(user(3)), 1);
    assert_eq!(translator.seen(user(1)), 2);
    // the deletion removes the output without asking the translator
    assert_eq!(translator.seen(user(2)), 1);

    let fragments = list_fragments(&config.fragment_dir, FragmentFormat::NTriples, true).unwrap();
    let names: Vec<String> = fragments.iter().map(|(name, _)| name.file_name()).collect();
    assert_eq!(names.len(), 3);
    assert!(names[1].starts_with("subtract"), "{names:?}");
    assert!(names[2].starts_with("add"), "{names:?}");
    let second_run = at(11).fixed_offset();
    assert_eq!(fragments[1].0.timestamp, second_run);
    assert_eq!(
        fs::read_to_string(&fragments[1].1).unwrap(),
        format!("{}\n", statement(user(2), "Grace"))
    );
    assert_eq!(
        fs::read_to_string(&fragments[2].1).unwrap(),
        format!("{}\n", statement(user(3), "Alan"))
    );

    let manifest = fs::read_to_string(config.fragment_dir.join(manifest_file_name(second_run)))
        .unwrap();
    let manifest: serde_json::Value = serde_json::from_str(&manifest).unwrap();
    assert_eq!(manifest["fragment_count"], 2);
    assert_eq!(manifest["fragments"][0]["kind"], "subtract");
    assert!(!config.fragment_dir.join(update_file_name(second_run)).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unchanged_graph_writes_no_fragments() {
    let temp = TempDir::new().unwrap();
    let server = upstream().await;
    serve(&server, "/api/users", feed(&[ADA])).await;
    serve(&server, "/api/relationships", feed(&[])).await;
    let config = config(temp.path(), &format!("{}/api", server.uri()));
    let translator = Arc::new(LabelTranslator::default());

    run_harvest(&config, translator.clone(), RunRequest::Delta, at(10))
        .await
        .unwrap();
    let again = run_harvest(&config, translator, RunRequest::Delta, at(11))
        .await
        .unwrap();

    assert!(again.diff.is_empty());
    assert_eq!(again.fragments, 0);
    assert!(!config
        .fragment_dir
        .join(manifest_file_name(at(11).fixed_offset()))
        .exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn modified_publication_pulls_its_cached_relationship_again() {
    let temp = TempDir::new().unwrap();
    let server = upstream().await;
    serve(&server, "/api/users", feed(&[ADA])).await;
    serve_once(&server, "/api/publications", feed(&[])).await;
    serve(
        &server,
        "/api/publications",
        feed(&[r#"<api:object category="publication" id="9"><api:title>Notes</api:title></api:object>"#]),
    )
    .await;
    serve_once(&server, "/api/relationships", feed(&[AUTHORSHIP])).await;
    Mock::given(method("GET"))
        .and(path("/api/relationships"))
        .and(query_param("ids", "7"))
        .respond_with(ResponseTemplate::new(200).set_body_string(feed(&[AUTHORSHIP])))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;
    serve(&server, "/api/relationships", feed(&[])).await;
    let config = HarvesterConfig {
        categories: vec![ObjectCategory::User, ObjectCategory::Publication],
        update_graph: Some("http://ex.org/graph".into()),
        ..config(temp.path(), &format!("{}/api", server.uri()))
    };
    let translator = Arc::new(LabelTranslator::default());

    run_harvest(&config, translator.clone(), RunRequest::Delta, at(10))
        .await
        .unwrap();
    let second = run_harvest(&config, translator.clone(), RunRequest::Delta, at(11))
        .await
        .unwrap();

    assert_eq!(translator.seen(ItemId::relationship(7)), 2);
    assert_eq!((second.diff.additions, second.diff.subtractions), (1, 0));
    let updates =
        fs::read_to_string(config.fragment_dir.join(update_file_name(at(11).fixed_offset())))
            .unwrap();
    assert!(updates.starts_with("INSERT DATA {\n  GRAPH <http://ex.org/graph> {\n"), "{updates}");
    assert!(updates.contains("\"Notes\""), "{updates}");
    server.verify().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_translation_fails_the_run_before_the_diff() {
    let temp = TempDir::new().unwrap();
    let server = upstream().await;
    serve(&server, "/api/users", feed(&[ADA, GRACE])).await;
    serve(&server, "/api/relationships", feed(&[])).await;
    let config = config(temp.path(), &format!("{}/api", server.uri()));

    let err = run_harvest(
        &config,
        Arc::new(LabelTranslator::refusing(user(2))),
        RunRequest::Delta,
        at(10),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, HarvestError::Translation(_)), "{err}");
    assert!(!config.snapshot_dir.exists());
    assert!(!config
        .fragment_dir
        .join(manifest_file_name(at(10).fixed_offset()))
        .exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_forced_full_run_is_tagged_in_the_ledger() {
    let temp = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let config = config(temp.path(), &format!("{}/api", server.uri()));
    let translator = Arc::new(LabelTranslator::default());
    let ledger = StateManager::new(&config.ledger_file);
    ledger
        .write(&LedgerEntry {
            run_count: 3,
            last_run: at(8),
            failure: None,
        })
        .unwrap();

    let err = run_harvest(&config, translator.clone(), RunRequest::FullPull, at(10))
        .await
        .unwrap_err();
    assert!(matches!(err, HarvestError::Transport { .. }), "{err}");
    assert_eq!(
        ledger.load().unwrap(),
        Some(LedgerEntry {
            run_count: 3,
            last_run: at(8),
            failure: Some(PriorRunClassification::FailedFull),
        })
    );

    // A plain delta request after the failure is forced into a full pull.
    let err = run_harvest(&config, translator, RunRequest::Delta, at(11))
        .await
        .unwrap_err();
    assert!(matches!(err, HarvestError::Transport { .. }), "{err}");
    assert_eq!(
        ledger.load().unwrap().and_then(|entry| entry.failure),
        Some(PriorRunClassification::FailedFull)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_delta_run_leaves_the_ledger_alone() {
    let temp = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let config = config(temp.path(), &format!("{}/api", server.uri()));
    let ledger = StateManager::new(&config.ledger_file);
    let before = LedgerEntry {
        run_count: 3,
        last_run: at(8),
        failure: None,
    };
    ledger.write(&before).unwrap();

    let translator = Arc::new(LabelTranslator::default());
    assert!(run_harvest(&config, translator, RunRequest::Delta, at(10))
        .await
        .is_err());
    assert_eq!(ledger.load().unwrap(), Some(before));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reprocessing_translates_the_cache_again_offline() {
    let temp = TempDir::new().unwrap();
    let config = config(temp.path(), "http://127.0.0.1:9/api");
    let ledger = StateManager::new(&config.ledger_file);
    ledger
        .write(&LedgerEntry {
            run_count: 4,
            last_run: at(8),
            failure: Some(PriorRunClassification::FailedReprocess),
        })
        .unwrap();
    let cached = config.raw_cache_dir.join("objects");
    fs::create_dir_all(&cached).unwrap();
    fs::write(
        cached.join("user-1.xml"),
        r#"<entry xmlns="http://www.w3.org/2005/Atom"><object xmlns="http://www.symplectic.co.uk/publications/api" category="user" id="1"><last-name>Ada</last-name></object></entry>"#,
    )
    .unwrap();
    let output = TranslatedOutput::new(&config.translated_dir);
    output.write(&user(5), &statement(user(5), "Stale")).unwrap();
    let translator = Arc::new(LabelTranslator::default());

    let summary = run_harvest(&config, translator.clone(), RunRequest::Delta, at(10))
        .await
        .unwrap();
    assert_eq!(summary.classification, RunClassification::Reprocessing);
    assert_eq!(summary.entries, 1);
    assert_eq!((summary.diff.additions, summary.diff.subtractions), (1, 0));
    assert_eq!(summary.fragments, 1);
    assert_eq!(translator.seen(user(1)), 1);
    assert!(output.path_for(&user(1)).exists());
    assert!(!output.path_for(&user(5)).exists());
    assert_eq!(
        ledger.load().unwrap(),
        Some(LedgerEntry {
            run_count: 5,
            last_run: at(8),
            failure: None,
        })
    );
}
