use std::collections::BTreeSet;
use std::sync::Once;

use chrono::{DateTime, TimeZone, Utc};

use harvester_core::{
    update, Effect, ItemId, LedgerEntry, ObjectCategory, PriorRunClassification,
    RelationshipLink, RelationshipPlan, RepullPolicy, RepullScope, ReprocessTypes, Run, RunEvent,
    RunPhase, RunRequest, RunState,
};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(engine_logging::initialize_for_tests);
}

fn date(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, 8, 0, 0).unwrap()
}

fn run(request: RunRequest) -> Run {
    let entry = LedgerEntry {
        run_count: 2,
        last_run: date(1),
        failure: None,
    };
    Run::new(RunState::resolve(Some(&entry), request, date(2)))
}

#[test]
fn failure_before_mutation_leaves_ledger_untouched() {
    init_logging();
    let (next, effects) = update(run(RunRequest::FullPull), RunEvent::Failed);
    assert!(effects.is_empty());
    assert_eq!(next.phase(), RunPhase::Finished);
}

#[test]
fn failure_during_full_pull_tags_ledger() {
    init_logging();
    let (next, effects) = update(run(RunRequest::FullPull), RunEvent::CacheMutationStarted);
    assert!(effects.is_empty());
    assert_eq!(next.phase(), RunPhase::Mutating);

    let (_, effects) = update(next, RunEvent::Failed);
    assert_eq!(
        effects,
        vec![Effect::WriteLedger(LedgerEntry {
            run_count: 2,
            last_run: date(1),
            failure: Some(PriorRunClassification::FailedFull),
        })]
    );
}

#[test]
fn failed_delta_writes_nothing() {
    init_logging();
    let (next, _) = update(run(RunRequest::Delta), RunEvent::CacheMutationStarted);
    let (_, effects) = update(next, RunEvent::Failed);
    assert!(effects.is_empty());
}

#[test]
fn completion_commits_once() {
    init_logging();
    let (next, _) = update(run(RunRequest::Delta), RunEvent::CacheMutationStarted);
    let (next, effects) = update(next, RunEvent::Completed);
    assert_eq!(
        effects,
        vec![Effect::WriteLedger(LedgerEntry {
            run_count: 3,
            last_run: date(2),
            failure: None,
        })]
    );

    let (next, effects) = update(next, RunEvent::Failed);
    assert!(effects.is_empty());
    let (_, effects) = update(next, RunEvent::Completed);
    assert!(effects.is_empty());
}

#[test]
fn repull_plan_skips_fresh_and_unrelated_relationships() {
    init_logging();
    let publication = ItemId::object(ObjectCategory::Publication, 3);
    let updated: BTreeSet<ItemId> = [publication, ItemId::relationship(1)].into_iter().collect();
    let cached = [
        // written this run already
        RelationshipLink {
            id: ItemId::relationship(1),
            type_name: None,
            objects: vec![publication],
        },
        // only one side survived in the cache
        RelationshipLink {
            id: ItemId::relationship(5),
            type_name: None,
            objects: vec![publication],
        },
        RelationshipLink {
            id: ItemId::relationship(2),
            type_name: None,
            objects: vec![ItemId::object(ObjectCategory::User, 9)],
        },
    ];

    let plan = RepullPolicy::new(RepullScope::NonUserObjects, ReprocessTypes::All)
        .plan(&updated, &cached);
    assert_eq!(
        plan,
        RelationshipPlan {
            repull: vec![5],
            reprocess: Vec::new(),
        }
    );
}
