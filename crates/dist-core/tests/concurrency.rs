mod common;

use common::{countries, orders, partitioned, table, TestClusterBuilder};
use dist_core::{
    orchestrator, DistError, DistributionMethod, LockMode, LockTag, RelationId, Transaction,
};
use std::thread;
use std::time::Duration;

fn distribute(
    tx: &mut Transaction<'_>,
    relation_id: RelationId,
    shard_count: u32,
    colocate_with: &str,
) -> dist_core::Result<()> {
    orchestrator::create_distributed_table(
        tx,
        relation_id,
        "id",
        DistributionMethod::Hash,
        shard_count,
        false,
        colocate_with,
    )
}

#[test]
fn test_same_relation_distributed_twice() {
    let cluster = TestClusterBuilder::new().build();
    let id = cluster.register(table(1, "events"));
    let engine = &cluster.engine;

    let mut first = engine.begin();
    distribute(&mut first, id, 4, "default").unwrap();

    let mut second = engine.begin();
    let err = distribute(&mut second, id, 4, "default").unwrap_err();
    assert!(
        matches!(
            err,
            DistError::LockConflict {
                tag: LockTag::Relation(1),
                mode: LockMode::Exclusive
            }
        ),
        "{:?}",
        err
    );
    drop(second);

    first.commit().unwrap();
    let err = engine
        .create_distributed_table(id, "id", DistributionMethod::Hash, 4, false, "default")
        .unwrap_err();
    assert!(matches!(err, DistError::IneligibleRelation { .. }), "{:?}", err);
    assert_eq!(engine.catalog().shards_of(id).len(), 4);
}

#[test]
fn test_concurrent_default_colocation_shares_one_group() {
    let cluster = TestClusterBuilder::new()
        .config(|c| c.lock_timeout_ms = 5000)
        .build();
    let a = cluster.register(table(1, "a"));
    let b = cluster.register(table(2, "b"));
    let engine = &cluster.engine;

    thread::scope(|s| {
        let mut first = engine.begin();
        distribute(&mut first, a, 4, "default").unwrap();

        // blocks on the colocation catalog until the first commit
        let second = s.spawn(|| {
            engine.create_distributed_table(b, "id", DistributionMethod::Hash, 4, false, "default")
        });
        thread::sleep(Duration::from_millis(100));
        assert!(!second.is_finished());

        first.commit().unwrap();
        second.join().unwrap().unwrap();
    });

    let catalog = engine.catalog();
    assert_eq!(catalog.colocation_groups.len(), 1);
    assert_eq!(
        catalog.table(a).unwrap().colocation_id,
        catalog.table(b).unwrap().colocation_id
    );
}

#[test]
fn test_unrelated_creations_do_not_block_on_reference_group() {
    let cluster = TestClusterBuilder::new().build();
    let reference = cluster.register(countries(50));
    cluster.engine.create_reference_table(reference).unwrap();
    let a = cluster.register(table(1, "a"));
    let b = cluster.register(table(2, "b"));
    let engine = &cluster.engine;
    let reference_group = engine.catalog().table(reference).unwrap().colocation_id;

    let mut first = engine.begin();
    distribute(&mut first, a, 4, "none").unwrap();
    assert!(!first
        .lock_trace()
        .contains(&(LockTag::Colocation(reference_group), LockMode::Exclusive)));

    let mut second = engine.begin();
    distribute(&mut second, b, 8, "none").unwrap();
    second.commit().unwrap();
    first.commit().unwrap();

    let catalog = engine.catalog();
    assert_eq!(catalog.shards_of(a).len(), 4);
    assert_eq!(catalog.shards_of(b).len(), 8);
}

#[test]
fn test_missing_reference_placement_still_locks_group() {
    let cluster = TestClusterBuilder::new().workers(1).build();
    let reference = cluster.register(countries(50));
    cluster.engine.create_reference_table(reference).unwrap();
    cluster
        .engine
        .add_node("worker-2", common::WORKER_PORT, Default::default())
        .unwrap();
    let id = cluster.register(orders(10));
    let reference_group = cluster.engine.catalog().table(reference).unwrap().colocation_id;

    let mut tx = cluster.engine.begin();
    orchestrator::create_distributed_table(
        &mut tx,
        id,
        "customer_id",
        DistributionMethod::Hash,
        4,
        false,
        "none",
    )
    .unwrap();
    assert!(tx
        .lock_trace()
        .contains(&(LockTag::Colocation(reference_group), LockMode::Exclusive)));
    tx.commit().unwrap();
    assert_eq!(
        cluster.engine.catalog().placements_of_relation(reference).len(),
        3
    );
}

#[test]
fn test_concurrent_partition_registration_keeps_both() {
    let cluster = TestClusterBuilder::new()
        .config(|c| c.lock_timeout_ms = 5000)
        .build();
    let engine = &cluster.engine;

    for round in 0..20u32 {
        let parent_id = 100 + round * 3;
        let name = format!("events_{}", round);
        let mut relations = partitioned(parent_id, &name, &[parent_id + 1, parent_id + 2]);
        let second = relations.pop().unwrap();
        let first = relations.pop().unwrap();
        cluster.register(relations.pop().unwrap());

        thread::scope(|s| {
            let a = s.spawn(|| engine.register_relation(first));
            let b = s.spawn(|| engine.register_relation(second));
            a.join().unwrap().unwrap();
            b.join().unwrap().unwrap();
        });

        let mut partitions = engine.catalog().relation(parent_id).unwrap().partitions.clone();
        partitions.sort_unstable();
        assert_eq!(partitions, vec![parent_id + 1, parent_id + 2], "round {}", round);
    }
}

#[test]
fn test_partition_registration_waits_for_parent() {
    let cluster = TestClusterBuilder::new().build();
    let mut relations = partitioned(1, "events", &[2]);
    let partition = relations.pop().unwrap();
    cluster.register(relations.pop().unwrap());
    let engine = &cluster.engine;

    let mut tx = engine.begin();
    tx.lock(LockTag::Relation(1), LockMode::ShareUpdateExclusive).unwrap();
    let err = engine.register_relation(partition.clone()).unwrap_err();
    assert!(
        matches!(err, DistError::LockConflict { tag: LockTag::Relation(1), .. }),
        "{:?}",
        err
    );
    drop(tx);

    engine.register_relation(partition).unwrap();
    assert_eq!(engine.catalog().relation(1).unwrap().partitions, vec![2]);
}

#[test]
fn test_concurrent_partition_drops_clear_parent() {
    let cluster = TestClusterBuilder::new()
        .config(|c| c.lock_timeout_ms = 5000)
        .build();
    for relation in partitioned(1, "events", &[2, 3]) {
        cluster.register(relation);
    }
    let engine = &cluster.engine;

    thread::scope(|s| {
        let a = s.spawn(|| engine.drop_relation(2));
        let b = s.spawn(|| engine.drop_relation(3));
        a.join().unwrap().unwrap();
        b.join().unwrap().unwrap();
    });

    let catalog = engine.catalog();
    assert!(catalog.relation(1).unwrap().partitions.is_empty());
    assert!(catalog.relation(2).is_none());
    assert!(catalog.relation(3).is_none());
}
