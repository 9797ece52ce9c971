use std::fs;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use harvester_core::{ItemId, ObjectCategory};
use harvester_engine::{
    CommandTranslator, FeedEntry, ItemSink, TranslateError, TranslateStats, TranslatedOutput,
    TranslationService, Translator,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn user(id: u64, name: &str) -> FeedEntry {
    FeedEntry {
        id: ItemId::object(ObjectCategory::User, id),
        deleted: false,
        xml: format!(
            r#"<entry xmlns="http://www.w3.org/2005/Atom"><object xmlns="http://www.symplectic.co.uk/publications/api" category="user" id="{id}"><last-name>{name}</last-name></object></entry>"#
        ),
    }
}

fn deleted_user(id: u64) -> FeedEntry {
    FeedEntry {
        id: ItemId::object(ObjectCategory::User, id),
        deleted: true,
        xml: String::new(),
    }
}

fn shell(script: &str) -> CommandTranslator {
    CommandTranslator::new("sh", vec!["-c".to_string(), script.to_string()])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn command_reads_the_item_from_stdin_and_its_environment() {
    let entry = user(1, "Ada");
    let translator =
        shell(r#"printf '<urn:%s> <urn:bytes> "%s" .\n' "$HARVEST_ITEM_KIND" "$(wc -c | tr -d ' ')""#);

    let statements = translator.translate(&entry).await.unwrap().unwrap();
    assert_eq!(
        statements,
        format!("<urn:object> <urn:bytes> \"{}\" .\n", entry.xml.len())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blank_output_means_no_statements() {
    let translator = shell("cat >/dev/null; echo");
    assert_eq!(translator.translate(&user(1, "Ada")).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_command_reports_its_stderr() {
    let translator = shell("cat >/dev/null; echo 'no template matched' >&2; exit 3");
    let err = translator.translate(&user(4, "Ada")).await.unwrap_err();
    match err {
        TranslateError::Failed { item, message } => {
            assert_eq!(item, ItemId::object(ObjectCategory::User, 4));
            assert!(message.contains("no template matched"), "{message}");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_program_cannot_be_spawned() {
    let translator = CommandTranslator::new("/nonexistent/translate-item", Vec::new());
    let err = translator.translate(&user(1, "Ada")).await.unwrap_err();
    assert!(matches!(err, TranslateError::Spawn { .. }), "{err}");
}

/// Emits the last name after a short pause, and fails for one item.
struct SlowNames {
    fail_for: Option<u64>,
}

#[async_trait]
impl Translator for SlowNames {
    async fn translate(&self, entry: &FeedEntry) -> Result<Option<String>, TranslateError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.fail_for == Some(entry.id.id()) {
            return Err(TranslateError::Failed {
                item: entry.id,
                message: "refused".into(),
            });
        }
        let start = entry.xml.find("<last-name>").map(|at| at + "<last-name>".len());
        let name = start.and_then(|start| {
            let end = entry.xml[start..].find('<')? + start;
            Some(&entry.xml[start..end])
        });
        Ok(name.map(|name| format!("<urn:user:{}> <urn:name> \"{name}\" .", entry.id.id())))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn later_entries_for_an_item_win() {
    let temp = TempDir::new().unwrap();
    let output = TranslatedOutput::new(temp.path());
    let service = TranslationService::start(
        Arc::new(SlowNames { fail_for: None }),
        output.clone(),
        4,
    );

    let mut queue = service.queue();
    queue.accept(user(1, "Ada")).unwrap();
    queue.accept(user(2, "Grace")).unwrap();
    queue.accept(deleted_user(1)).unwrap();
    queue.accept(user(2, "Hopper")).unwrap();
    drop(queue);

    let stats = service.finish().await.unwrap();
    assert_eq!(
        stats,
        TranslateStats {
            translated: 3,
            empty: 0,
            removed: 1,
        }
    );
    let ada = ItemId::object(ObjectCategory::User, 1);
    let grace = ItemId::object(ObjectCategory::User, 2);
    assert!(!output.path_for(&ada).exists());
    assert_eq!(
        fs::read_to_string(output.path_for(&grace)).unwrap(),
        "<urn:user:2> <urn:name> \"Hopper\" .\n"
    );
    assert!(output
        .path_for(&grace)
        .starts_with(temp.path().join("objects")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_translation_stops_the_service() {
    let temp = TempDir::new().unwrap();
    let service = TranslationService::start(
        Arc::new(SlowNames { fail_for: Some(2) }),
        TranslatedOutput::new(temp.path()),
        1,
    );

    let mut queue = service.queue();
    queue.accept(user(2, "Grace")).unwrap();
    drop(queue);

    let err = service.finish().await.unwrap_err();
    assert!(matches!(err, TranslateError::Failed { .. }), "{err}");
}

#[test]
fn clearing_a_kind_leaves_the_others() {
    let temp = TempDir::new().unwrap();
    let output = TranslatedOutput::new(temp.path());
    let ada = ItemId::object(ObjectCategory::User, 1);
    let group = ItemId::group(3);
    output.write(&ada, "<urn:a> <urn:b> <urn:c> .").unwrap();
    output.write(&group, "<urn:g> <urn:b> <urn:c> .").unwrap();

    output.clear_kind(ada.kind()).unwrap();
    output.clear_kind(ada.kind()).unwrap();
    assert!(!output.path_for(&ada).exists());
    assert!(output.path_for(&group).exists());
    output.remove(&ada).unwrap();
}
