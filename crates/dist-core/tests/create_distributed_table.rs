mod common;

use common::{countries, customers, orders, partitioned, table, TestClusterBuilder};
use dist_core::{
    orchestrator, ColocationParam, ColumnType, DistError, DistributionMethod, LockMode, LockTag,
    Relation, ShardInterval, TableType, WorkerCommand,
};
use std::collections::HashSet;

fn hash_bounds(intervals: &[ShardInterval]) -> Vec<(i32, i32)> {
    let mut bounds: Vec<(i32, i32)> = intervals
        .iter()
        .map(|i| i.hash_bounds().expect("hash interval"))
        .collect();
    bounds.sort();
    bounds
}

#[test]
fn test_four_shards_on_two_workers() {
    let cluster = TestClusterBuilder::new().workers(2).build();
    let orders = cluster.register(orders(10));

    cluster
        .engine
        .create_distributed_table(orders, "customer_id", DistributionMethod::Hash, 4, false, "default")
        .unwrap();

    let catalog = cluster.engine.catalog();
    assert_eq!(catalog.table_type(orders), Some(TableType::HashDistributed));

    let shards = catalog.shards_of(orders);
    assert_eq!(shards.len(), 4);
    let intervals: Vec<_> = shards.iter().map(|s| s.interval.clone()).collect();
    assert_eq!(
        hash_bounds(&intervals),
        vec![
            (i32::MIN, -1073741825),
            (-1073741824, -1),
            (0, 1073741823),
            (1073741824, i32::MAX),
        ]
    );

    let placements = catalog.placements_of_relation(orders);
    assert_eq!(placements.len(), 4);
    for worker in &cluster.workers {
        assert_eq!(placements.iter().filter(|p| p.node_id == *worker).count(), 2);
    }

    // one shard table per placement, nothing on the coordinator
    let creates: Vec<_> = cluster
        .data_commands()
        .into_iter()
        .filter(|(_, c)| matches!(c, WorkerCommand::CreateShardTable { .. }))
        .collect();
    assert_eq!(creates.len(), 4);
    assert!(creates.iter().all(|(node, _)| Some(*node) != cluster.coordinator));
}

#[test]
fn test_hash_ranges_cover_domain_for_any_shard_count() {
    for (i, shard_count) in [1u32, 3, 7, 32, 100].into_iter().enumerate() {
        let cluster = TestClusterBuilder::new().workers(3).build();
        let id = cluster.register(table(100 + i as u32, &format!("events_{}", i)));
        cluster
            .engine
            .create_distributed_table(id, "id", DistributionMethod::Hash, shard_count, false, "none")
            .unwrap();

        let catalog = cluster.engine.catalog();
        let intervals: Vec<_> = catalog
            .shards_of(id)
            .iter()
            .map(|s| s.interval.clone())
            .collect();
        let bounds = hash_bounds(&intervals);
        assert_eq!(bounds.len(), shard_count as usize);
        assert_eq!(bounds[0].0, i32::MIN);
        assert_eq!(bounds[bounds.len() - 1].1, i32::MAX);
        for pair in bounds.windows(2) {
            assert_eq!(pair[0].1 as i64 + 1, pair[1].0 as i64, "gap or overlap at {:?}", pair);
        }
    }
}

#[test]
fn test_colocated_tables_share_placement_nodes() {
    let cluster = TestClusterBuilder::new().workers(3).build();
    let orders = cluster.register(orders(10));
    let customers = cluster.register(customers(11));

    cluster
        .engine
        .create_distributed_table(customers, "customer_id", DistributionMethod::Hash, 6, false, "default")
        .unwrap();
    cluster
        .engine
        .create_distributed_table(orders, "customer_id", DistributionMethod::Hash, 6, false, "customers")
        .unwrap();

    let catalog = cluster.engine.catalog();
    let group = catalog.table(customers).unwrap().colocation_id;
    assert_eq!(catalog.table(orders).unwrap().colocation_id, group);

    let layout = |relation| {
        catalog
            .shards_of(relation)
            .into_iter()
            .map(|s| {
                let nodes: Vec<_> = catalog
                    .placements_of(s.shard_id)
                    .iter()
                    .map(|p| p.node_id)
                    .collect();
                (s.interval.clone(), nodes)
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(layout(customers), layout(orders));
}

#[test]
fn test_default_colocation_matches_signature() {
    let cluster = TestClusterBuilder::new().build();
    let a = cluster.register(table(1, "a"));
    let b = cluster.register(table(2, "b"));
    let c = cluster.register(table(3, "c"));
    let engine = &cluster.engine;

    engine.create_distributed_table(a, "id", DistributionMethod::Hash, 8, false, "default").unwrap();
    engine.create_distributed_table(b, "id", DistributionMethod::Hash, 8, false, "default").unwrap();
    engine.create_distributed_table(c, "id", DistributionMethod::Hash, 8, false, "none").unwrap();

    let catalog = engine.catalog();
    let group = |id| catalog.table(id).unwrap().colocation_id;
    assert_eq!(group(a), group(b));
    assert_ne!(group(a), group(c));
}

#[test]
fn test_strict_shard_count_mismatch() {
    let cluster = TestClusterBuilder::new().build();
    let customers = cluster.register(customers(11));
    let orders = cluster.register(orders(10));
    let engine = &cluster.engine;
    engine
        .create_distributed_table(customers, "customer_id", DistributionMethod::Hash, 4, false, "default")
        .unwrap();

    let err = engine
        .create_distributed_table(orders, "customer_id", DistributionMethod::Hash, 8, true, "customers")
        .unwrap_err();
    assert!(matches!(err, DistError::InvalidParams(_)));
    assert_eq!(engine.table_type(orders), None);

    // without strict the target's shard count wins
    engine
        .create_distributed_table(orders, "customer_id", DistributionMethod::Hash, 8, false, "customers")
        .unwrap();
    assert_eq!(engine.catalog().shards_of(orders).len(), 4);
}

#[test]
fn test_colocate_with_needs_unambiguous_name() {
    let cluster = TestClusterBuilder::new().build();
    let customers = cluster.register(customers(11));
    let mut sales_customers = common::customers(12);
    sales_customers.schema = "sales".to_string();
    cluster.register(sales_customers);
    let orders = cluster.register(orders(10));
    let engine = &cluster.engine;
    engine
        .create_distributed_table(customers, "customer_id", DistributionMethod::Hash, 4, false, "default")
        .unwrap();

    let err = engine
        .create_distributed_table(orders, "customer_id", DistributionMethod::Hash, 4, false, "customers")
        .unwrap_err();
    assert!(matches!(err, DistError::InvalidParams(_)), "{:?}", err);
    assert_eq!(engine.table_type(orders), None);

    engine
        .create_distributed_table(
            orders,
            "customer_id",
            DistributionMethod::Hash,
            4,
            false,
            "public.customers",
        )
        .unwrap();
    let catalog = engine.catalog();
    assert_eq!(
        catalog.table(orders).unwrap().colocation_id,
        catalog.table(customers).unwrap().colocation_id
    );
}

#[test]
fn test_ineligible_relations() {
    let cluster = TestClusterBuilder::new().build();
    let engine = &cluster.engine;

    let docs = cluster.register(
        Relation::new(20, "docs")
            .with_column("id", ColumnType::Int8)
            .with_column("body", ColumnType::Json),
    );
    let err = engine
        .create_distributed_table(docs, "body", DistributionMethod::Hash, 4, false, "default")
        .unwrap_err();
    assert!(matches!(err, DistError::IneligibleRelation { .. }));

    let err = engine
        .create_distributed_table(docs, "missing", DistributionMethod::Hash, 4, false, "default")
        .unwrap_err();
    assert!(matches!(err, DistError::IneligibleRelation { .. }));

    // primary key without the distribution column
    let customers = cluster.register(customers(21));
    let err = engine
        .create_distributed_table(customers, "name", DistributionMethod::Hash, 4, false, "default")
        .unwrap_err();
    assert!(matches!(err, DistError::IneligibleRelation { .. }));

    let err = engine
        .create_distributed_table(999, "id", DistributionMethod::Hash, 4, false, "default")
        .unwrap_err();
    assert!(matches!(err, DistError::IneligibleRelation { .. }));

    assert_eq!(engine.catalog().tables.len(), 0);
}

#[test]
fn test_distributing_twice_fails() {
    let cluster = TestClusterBuilder::new().build();
    let id = cluster.register(table(1, "events"));
    let engine = &cluster.engine;
    engine.create_distributed_table(id, "id", DistributionMethod::Hash, 4, false, "default").unwrap();

    let err = engine.create_reference_table(id).unwrap_err();
    assert!(matches!(err, DistError::IneligibleRelation { .. }));
}

#[test]
fn test_invalid_parameters() {
    let cluster = TestClusterBuilder::new().build();
    let id = cluster.register(table(1, "events"));
    let engine = &cluster.engine;

    for shard_count in [0, 64001] {
        let err = engine
            .create_distributed_table(id, "id", DistributionMethod::Hash, shard_count, false, "default")
            .unwrap_err();
        assert!(matches!(err, DistError::InvalidParams(_)));
    }
    let err = engine
        .create_distributed_table(id, "id", DistributionMethod::Range, 4, false, "other")
        .unwrap_err();
    assert!(matches!(err, DistError::InvalidParams(_)));
    let err = engine
        .create_distributed_table(id, "id", DistributionMethod::None, 4, false, "default")
        .unwrap_err();
    assert!(matches!(err, DistError::InvalidParams(_)));
}

#[test]
fn test_local_rows_are_copied_per_hash_range() {
    let cluster = TestClusterBuilder::new().build();
    let id = cluster.register(orders(10).with_rows(1_000));
    cluster
        .engine
        .create_distributed_table(id, "customer_id", DistributionMethod::Hash, 4, false, "default")
        .unwrap();

    let catalog = cluster.engine.catalog();
    let ranges: HashSet<_> = catalog
        .shards_of(id)
        .iter()
        .map(|s| s.interval.hash_bounds())
        .collect();
    let copies: Vec<_> = cluster
        .data_commands()
        .into_iter()
        .filter_map(|(_, c)| match c {
            WorkerCommand::CopyLocalRows {
                distribution_column,
                hash_range,
                ..
            } => Some((distribution_column, hash_range)),
            _ => None,
        })
        .collect();
    assert_eq!(copies.len(), 4);
    for (column, range) in copies {
        assert_eq!(column.as_deref(), Some("customer_id"));
        assert!(ranges.contains(&range));
    }
}

#[test]
fn test_empty_table_copies_nothing() {
    let cluster = TestClusterBuilder::new().build();
    let id = cluster.register(orders(10));
    cluster
        .engine
        .create_distributed_table(id, "customer_id", DistributionMethod::Hash, 4, false, "default")
        .unwrap();
    assert!(!cluster
        .data_commands()
        .iter()
        .any(|(_, c)| matches!(c, WorkerCommand::CopyLocalRows { .. })));
}

#[test]
fn test_partitions_follow_parent() {
    let cluster = TestClusterBuilder::new().build();
    for relation in partitioned(30, "events", &[31, 32]) {
        cluster.register(relation);
    }
    cluster
        .engine
        .create_distributed_table(30, "id", DistributionMethod::Hash, 4, false, "default")
        .unwrap();

    let catalog = cluster.engine.catalog();
    let group = catalog.table(30).unwrap().colocation_id;
    for partition in [31, 32] {
        assert_eq!(catalog.table_type(partition), Some(TableType::HashDistributed));
        assert_eq!(catalog.table(partition).unwrap().colocation_id, group);
        assert_eq!(catalog.shards_of(partition).len(), 4);
    }

    // every partition shard attaches to a parent shard
    let attached = cluster
        .data_commands()
        .into_iter()
        .filter(|(_, c)| {
            matches!(c, WorkerCommand::CreateShardTable { parent_shard: Some(p), .. } if p.contains("events_"))
        })
        .count();
    assert_eq!(attached, 8);
}

#[test]
fn test_range_table_gets_empty_shards() {
    let cluster = TestClusterBuilder::new().build();
    let id = cluster.register(table(40, "metrics"));
    let engine = &cluster.engine;
    engine
        .create_distributed_table(id, "id", DistributionMethod::Range, 1, false, "default")
        .unwrap();
    assert!(engine.catalog().shards_of(id).is_empty());
    assert_eq!(engine.catalog().table(id).unwrap().colocation_id, 0);

    let first = engine.create_empty_shard(id, Some("1"), Some("100")).unwrap();
    let second = engine.create_empty_shard(id, Some("101"), Some("200")).unwrap();
    assert!(second > first);

    let catalog = engine.catalog();
    assert_eq!(
        catalog.shard(first).unwrap().interval,
        ShardInterval::Range {
            min: "1".into(),
            max: "100".into()
        }
    );
    // round robin continues from the current shard count
    let node = |shard| catalog.placements_of(shard)[0].node_id;
    assert_ne!(node(first), node(second));

    let err = engine.create_empty_shard(id, Some("9"), Some("1")).unwrap_err();
    assert!(matches!(err, DistError::InvalidParams(_)));
    let err = engine.create_empty_shard(id, Some("9"), None).unwrap_err();
    assert!(matches!(err, DistError::InvalidParams(_)));
}

#[test]
fn test_append_shards_are_unbounded() {
    let cluster = TestClusterBuilder::new().build();
    let id = cluster.register(table(41, "logs"));
    let engine = &cluster.engine;
    engine
        .create_distributed_table(id, "id", DistributionMethod::Append, 1, false, "default")
        .unwrap();
    let shard = engine.create_empty_shard(id, None, None).unwrap();
    assert_eq!(engine.catalog().shard(shard).unwrap().interval, ShardInterval::Unbounded);

    let hash = cluster.register(table(42, "hashed"));
    engine
        .create_distributed_table(hash, "id", DistributionMethod::Hash, 2, false, "default")
        .unwrap();
    assert!(engine.create_empty_shard(hash, None, None).is_err());
}

#[test]
fn test_lock_order() {
    let cluster = TestClusterBuilder::new().build();
    let reference = cluster.register(countries(50));
    cluster.engine.create_reference_table(reference).unwrap();
    let id = cluster.register(orders(10));

    let mut tx = cluster.engine.begin();
    orchestrator::create_distributed_table(
        &mut tx,
        id,
        "customer_id",
        DistributionMethod::Hash,
        4,
        false,
        "default",
    )
    .unwrap();
    let colocation_id = tx.catalog().table(id).unwrap().colocation_id;

    let trace = tx.lock_trace().to_vec();
    let first = |tag: LockTag| {
        trace
            .iter()
            .position(|(t, _)| *t == tag)
            .unwrap_or_else(|| panic!("{} never locked", tag))
    };
    let relation = first(LockTag::Relation(id));
    let registry = first(LockTag::NodeRegistry);
    let colocation = first(LockTag::Colocation(colocation_id));
    assert!(relation < registry, "{:?}", trace);
    assert!(registry < colocation, "{:?}", trace);
    assert!(trace.contains(&(LockTag::Relation(id), LockMode::Exclusive)));
    tx.commit().unwrap();
}

#[test]
fn test_first_table_registers_coordinator() {
    let cluster = TestClusterBuilder::new().without_coordinator().workers(0).build();
    let id = cluster.register(table(1, "events"));
    cluster
        .engine
        .create_single_shard_table(id, ColocationParam::Default)
        .unwrap();

    let catalog = cluster.engine.catalog();
    let coordinator = catalog.coordinator().expect("coordinator registered");
    assert!(coordinator.should_have_shards);
    assert_eq!(catalog.first_placement_node(id), Some(coordinator.node_id));
}

#[test]
fn test_undistribute_restores_plain_table() {
    let cluster = TestClusterBuilder::new().build();
    let id = cluster.register(orders(10).with_rows(10));
    let engine = &cluster.engine;
    engine
        .create_distributed_table(id, "customer_id", DistributionMethod::Hash, 4, false, "default")
        .unwrap();
    cluster.executor.clear();

    engine.undistribute_table(id).unwrap();
    let catalog = engine.catalog();
    assert_eq!(catalog.table_type(id), None);
    assert!(catalog.shards_of(id).is_empty());
    assert!(catalog.placements_of_relation(id).is_empty());

    let commands = cluster.data_commands();
    let copies = commands
        .iter()
        .filter(|(_, c)| matches!(c, WorkerCommand::CopyShardToLocal { .. }))
        .count();
    let drops = commands
        .iter()
        .filter(|(_, c)| matches!(c, WorkerCommand::DropShardTable { .. }))
        .count();
    assert_eq!(copies, 4);
    assert_eq!(drops, 4);

    let err = engine.undistribute_table(id).unwrap_err();
    assert!(matches!(err, DistError::IneligibleRelation { .. }));
}

#[test]
fn test_drop_relation_removes_metadata() {
    let cluster = TestClusterBuilder::new().build();
    for relation in partitioned(30, "events", &[31]) {
        cluster.register(relation);
    }
    let engine = &cluster.engine;
    engine
        .create_distributed_table(30, "id", DistributionMethod::Hash, 2, false, "default")
        .unwrap();

    engine.drop_relation(30).unwrap();
    let catalog = engine.catalog();
    assert!(catalog.relation(30).is_none());
    assert!(catalog.relation(31).is_none());
    assert!(catalog.tables.is_empty());
    assert!(catalog.shards.is_empty());
    assert!(catalog.placements.is_empty());
}

#[test]
fn test_foreign_keys_between_colocated_tables() {
    let cluster = TestClusterBuilder::new().build();
    let engine = &cluster.engine;
    let customers = cluster.register(customers(11));
    let countries = cluster.register(countries(12));
    let notes = cluster.register(table(13, "notes"));
    engine.create_reference_table(countries).unwrap();
    engine
        .create_distributed_table(customers, "customer_id", DistributionMethod::Hash, 4, false, "default")
        .unwrap();

    // references a plain table
    let bad = cluster.register(
        table(14, "audit")
            .with_column("note_id", ColumnType::Int8)
            .with_foreign_key(&["note_id"], notes, &["id"]),
    );
    let err = engine
        .create_distributed_table(bad, "id", DistributionMethod::Hash, 4, false, "default")
        .unwrap_err();
    assert!(matches!(err, DistError::IneligibleRelation { .. }));

    // a plain table cannot be distributed while a plain table references it
    let err = engine
        .create_distributed_table(notes, "id", DistributionMethod::Hash, 4, false, "default")
        .unwrap_err();
    assert!(matches!(err, DistError::IneligibleRelation { .. }));

    let orders = cluster.register(
        orders(10)
            .with_column("country", ColumnType::Text)
            .with_foreign_key(&["customer_id"], customers, &["customer_id"])
            .with_foreign_key(&["country"], countries, &["code"]),
    );
    // not colocated with customers
    let err = engine
        .create_distributed_table(orders, "customer_id", DistributionMethod::Hash, 4, false, "none")
        .unwrap_err();
    assert!(matches!(err, DistError::IneligibleRelation { .. }));

    engine
        .create_distributed_table(orders, "customer_id", DistributionMethod::Hash, 4, false, "customers")
        .unwrap();
    assert_eq!(engine.table_type(orders), Some(TableType::HashDistributed));
    assert_eq!(engine.catalog().relation(orders).unwrap().foreign_keys.len(), 2);
}
