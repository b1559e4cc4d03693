/// Version partition tests
///
/// Disjointness and completeness of the per-version partitions while
/// documents are seeded, rewritten and migrated.
/// Run with: cargo test --test version_index_tests

use docmigrate::{
    DocId, DocumentStore, InMemoryStore, IndexSpec, IndexingMode, MigrateError, MigrationRunner,
    RunnerConfig, VersionIndex, players,
};
use serde_json::json;
use std::collections::BTreeSet;

async fn seeded_store() -> (InMemoryStore, VersionIndex) {
    let store = InMemoryStore::new();
    let index = players::version_index().unwrap();
    index.define(&store).await.unwrap();
    players::seed(&store, "Player", 1, 4).await.unwrap();
    players::seed(&store, "Player", 2, 5).await.unwrap();
    players::seed(&store, "Player", 3, 6).await.unwrap();
    (store, index)
}

#[tokio::test]
async fn test_partitions_are_disjoint_and_complete() {
    let (store, index) = seeded_store().await;
    store.insert(json!({"type": "monster", "version": 1})).await.unwrap();

    let report = index.check_invariants(&store).await.unwrap();
    assert!(report.is_consistent());
    assert_eq!(report.counts.get(&1), Some(&4));
    assert_eq!(report.counts.get(&2), Some(&5));
    assert_eq!(report.counts.get(&3), Some(&6));
    assert_eq!(report.total(), store.list_kind("player").await.unwrap().len());

    let mut union = BTreeSet::new();
    for version in index.versions() {
        for id in index.list(&store, version).await.unwrap() {
            assert!(union.insert(id), "document listed under two versions");
        }
    }
    let all: BTreeSet<DocId> = store.list_kind("player").await.unwrap().into_iter().collect();
    assert_eq!(union, all);
}

#[tokio::test]
async fn test_invariants_hold_between_chain_steps() {
    let (store, index) = seeded_store().await;
    let runner = MigrationRunner::new(index.clone(), RunnerConfig::default()).unwrap();

    for step in players::steps() {
        runner.run(&store, &step).await.unwrap();
        let report = index.check_invariants(&store).await.unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.total(), 15);
    }
}

#[tokio::test]
async fn test_rewrite_moves_document_between_partitions() {
    let (store, index) = seeded_store().await;
    let id = index.list(&store, 1).await.unwrap().remove(0);
    let stored = store.get(&id).await.unwrap();

    store
        .put(&id, players::player("Player 1", 3, 150), stored.rev)
        .await
        .unwrap();

    assert!(!index.list(&store, 1).await.unwrap().contains(&id));
    assert!(index.list(&store, 3).await.unwrap().contains(&id));
    assert!(index.check_invariants(&store).await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_lagging_partitions_are_reported_until_refresh() {
    let store = InMemoryStore::with_indexing(IndexingMode::Deferred);
    let index = players::version_index().unwrap();
    index.define(&store).await.unwrap();
    players::seed(&store, "Player", 1, 3).await.unwrap();

    let report = index.check_invariants(&store).await.unwrap();
    assert!(report.is_disjoint());
    assert_eq!(report.missing.len(), 3);

    store.refresh_indexes().await;
    assert!(index.check_invariants(&store).await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_untracked_versions_break_completeness() {
    let (store, index) = seeded_store().await;
    store.insert(players::player("Future", 4, 0)).await.unwrap();

    let report = index.check_invariants(&store).await.unwrap();
    assert!(report.is_disjoint());
    assert!(!report.is_complete());
    assert_eq!(report.missing.len(), 1);
}

#[tokio::test]
async fn test_define_is_idempotent_and_guards_conflicting_names() {
    let (store, index) = seeded_store().await;
    index.define(&store).await.unwrap();
    assert_eq!(index.counts(&store).await.unwrap().get(&2), Some(&5));

    let err = store
        .define_index(&index.partition_name(2), IndexSpec::field(Some("player"), "version"))
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::InvalidIndex(_)));
}

#[tokio::test]
async fn test_partitions_per_kind_do_not_mix() {
    let (store, players_index) = seeded_store().await;
    let monsters = VersionIndex::new("monster", [1, 2]).unwrap();
    monsters.define(&store).await.unwrap();
    store.insert(json!({"type": "monster", "version": 2})).await.unwrap();

    assert_eq!(monsters.list(&store, 2).await.unwrap().len(), 1);
    assert!(monsters.list(&store, 1).await.unwrap().is_empty());
    assert_eq!(players_index.list(&store, 2).await.unwrap().len(), 5);
}
