mod common;

use common::{countries, partitioned, table, TestCluster, TestClusterBuilder};
use dist_core::{
    Catalog, ColocationParam, DistError, DistributedTableParams, DistributionMethod, TableType,
    WorkerCommand,
};

fn single_shard() -> DistributedTableParams<'static> {
    DistributedTableParams::single_shard(ColocationParam::Default)
}

/// Partitioned citus local table 30 with partition 31
fn local_partitioned(cluster: &TestCluster) {
    for relation in partitioned(30, "events", &[31]) {
        cluster.register(relation);
    }
    cluster.engine.add_local_table_to_metadata(30).unwrap();
    cluster.executor.clear();
}

fn assert_unchanged(before: &Catalog, after: &Catalog) {
    assert_eq!(before.version, after.version);
    assert_eq!(before.tables, after.tables);
    assert_eq!(before.shards, after.shards);
    assert_eq!(before.placements, after.placements);
    assert_eq!(before.colocation_groups, after.colocation_groups);
}

#[test]
fn test_add_local_table_places_shards_on_coordinator() {
    let cluster = TestClusterBuilder::new().build();
    local_partitioned(&cluster);

    let catalog = cluster.engine.catalog();
    let coordinator = cluster.coordinator.unwrap();
    for relation in [30, 31] {
        assert_eq!(catalog.table_type(relation), Some(TableType::CitusLocal));
        assert_eq!(catalog.table(relation).unwrap().colocation_id, 0);
        let placements = catalog.placements_of_relation(relation);
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].node_id, coordinator);
    }
}

#[test]
fn test_add_local_table_requires_coordinator() {
    let cluster = TestClusterBuilder::new().without_coordinator().build();
    let id = cluster.register(table(1, "events"));
    let err = cluster.engine.add_local_table_to_metadata(id).unwrap_err();
    assert!(matches!(err, DistError::InvalidGroupState(_)));
}

#[test]
fn test_convert_partitioned_table_to_single_shard() {
    let cluster = TestClusterBuilder::new().workers(2).build();
    local_partitioned(&cluster);
    let coordinator = cluster.coordinator.unwrap();

    cluster
        .engine
        .convert_citus_local_table_to_table_type(
            30,
            TableType::SingleShardDistributed,
            Some(&single_shard()),
        )
        .unwrap();

    let catalog = cluster.engine.catalog();
    let parent_group = catalog.table(30).unwrap().colocation_id;
    let target = catalog.first_placement_node(30).unwrap();
    assert_ne!(target, coordinator);

    for relation in [30, 31] {
        let table = catalog.table(relation).unwrap();
        assert_eq!(table.table_type(), TableType::SingleShardDistributed);
        assert_eq!(table.colocation_id, parent_group);
        assert!(!table.auto_converted);

        let placements = catalog.placements_of_relation(relation);
        assert_eq!(placements.len(), 1, "relation {}", relation);
        assert_eq!(placements[0].node_id, target);
        // record updated in place, the shard is kept
        assert_eq!(catalog.shards_of(relation).len(), 1);
    }

    // coordinator copies go away only after the partition is done
    let commands = cluster.data_commands();
    let drops: Vec<_> = commands
        .iter()
        .enumerate()
        .filter(|(_, (node, c))| {
            *node == coordinator && matches!(c, WorkerCommand::DropShardTable { .. })
        })
        .map(|(i, (_, c))| (i, c.clone()))
        .collect();
    assert_eq!(drops.len(), 2);
    let shard_name = |relation| {
        let shard_id = catalog.shards_of(relation)[0].shard_id;
        catalog.relation(relation).unwrap().qualified_shard_name(shard_id)
    };
    assert_eq!(
        drops[0].1,
        WorkerCommand::DropShardTable {
            shard_name: shard_name(31)
        }
    );
    assert_eq!(
        drops[1].1,
        WorkerCommand::DropShardTable {
            shard_name: shard_name(30)
        }
    );
    let last_copy = commands
        .iter()
        .rposition(|(_, c)| matches!(c, WorkerCommand::CopyShardPlacement { .. }))
        .unwrap();
    assert!(last_copy < drops[0].0);
}

#[test]
fn test_single_shard_conversion_lands_with_group() {
    let cluster = TestClusterBuilder::new().workers(3).build();
    let engine = &cluster.engine;
    let a = cluster.register(table(1, "a"));
    let b = cluster.register(table(2, "b"));
    engine.create_single_shard_table(a, ColocationParam::Default).unwrap();
    engine.add_local_table_to_metadata(b).unwrap();

    engine
        .create_single_shard_table(b, ColocationParam::Table("a"))
        .unwrap();

    let catalog = engine.catalog();
    assert_eq!(catalog.table_type(b), Some(TableType::SingleShardDistributed));
    assert_eq!(
        catalog.table(a).unwrap().colocation_id,
        catalog.table(b).unwrap().colocation_id
    );
    assert_eq!(catalog.first_placement_node(a), catalog.first_placement_node(b));
}

#[test]
fn test_convert_to_reference_keeps_coordinator_copy() {
    let cluster = TestClusterBuilder::new().workers(2).build();
    let id = cluster.register(countries(5));
    let engine = &cluster.engine;
    engine.add_local_table_to_metadata(id).unwrap();
    let shard_before = engine.catalog().shards_of(id)[0].shard_id;

    engine.create_reference_table(id).unwrap();

    let catalog = engine.catalog();
    assert_eq!(catalog.table_type(id), Some(TableType::Reference));
    assert_eq!(catalog.shards_of(id)[0].shard_id, shard_before);
    let mut nodes: Vec<_> = catalog
        .placements_of_relation(id)
        .iter()
        .map(|p| p.node_id)
        .collect();
    nodes.sort();
    let mut expected = vec![cluster.coordinator.unwrap()];
    expected.extend(&cluster.workers);
    assert_eq!(nodes, expected);

    // copies come from the coordinator
    for worker in &cluster.workers {
        assert!(cluster.executor.commands_for(*worker).iter().any(|c| matches!(
            c,
            WorkerCommand::CopyShardPlacement { source_host, .. } if source_host == "coordinator"
        )));
    }
}

#[test]
fn test_partition_failure_leaves_nothing_behind() {
    let cluster = TestClusterBuilder::new().workers(2).build();
    let engine = &cluster.engine;

    // the partition references another citus local table, which single
    // shard tables cannot do
    let lookup = cluster.register(table(40, "lookup").with_primary_key(&["id"]));
    engine.add_local_table_to_metadata(lookup).unwrap();
    let mut relations = partitioned(30, "events", &[31]);
    relations[1] = relations[1].clone().with_foreign_key(&["id"], lookup, &["id"]);
    for relation in relations {
        cluster.register(relation);
    }
    engine.add_local_table_to_metadata(30).unwrap();
    cluster.executor.clear();

    let before = engine.catalog();
    let err = engine
        .convert_citus_local_table_to_table_type(
            30,
            TableType::SingleShardDistributed,
            Some(&single_shard()),
        )
        .unwrap_err();
    assert!(matches!(err, DistError::IneligibleRelation { .. }));
    assert_unchanged(&before, &engine.catalog());
    assert!(cluster.executor.commands().is_empty());
}

#[test]
fn test_remote_failure_aborts_conversion() {
    let cluster = TestClusterBuilder::new().workers(2).build();
    local_partitioned(&cluster);
    let before = cluster.engine.catalog();

    cluster.executor.fail_after(3);
    let err = cluster
        .engine
        .convert_citus_local_table_to_table_type(
            30,
            TableType::SingleShardDistributed,
            Some(&single_shard()),
        )
        .unwrap_err();
    assert!(matches!(err, DistError::Remote(_)));
    assert_unchanged(&before, &cluster.engine.catalog());

    // the same call succeeds once the node recovers
    cluster.executor.clear_failure();
    cluster
        .engine
        .convert_citus_local_table_to_table_type(
            30,
            TableType::SingleShardDistributed,
            Some(&single_shard()),
        )
        .unwrap();
}

#[test]
fn test_single_shard_rejects_replication() {
    let cluster = TestClusterBuilder::new().workers(2).replication_factor(2).build();
    let id = cluster.register(table(1, "events"));
    let before = cluster.engine.catalog();

    let err = cluster
        .engine
        .create_single_shard_table(id, ColocationParam::Default)
        .unwrap_err();
    assert!(matches!(
        err,
        DistError::ReplicationFactorConflict {
            replication_factor: 2,
            ..
        }
    ));
    assert_unchanged(&before, &cluster.engine.catalog());

    // also on the conversion path
    cluster.engine.add_local_table_to_metadata(id).unwrap();
    let err = cluster
        .engine
        .convert_citus_local_table_to_table_type(
            id,
            TableType::SingleShardDistributed,
            Some(&single_shard()),
        )
        .unwrap_err();
    assert!(matches!(err, DistError::ReplicationFactorConflict { .. }));
    assert_eq!(cluster.engine.table_type(id), Some(TableType::CitusLocal));
}

#[test]
fn test_unsupported_conversions() {
    let cluster = TestClusterBuilder::new().build();
    let engine = &cluster.engine;
    let plain = cluster.register(table(1, "plain"));
    let hash = cluster.register(table(2, "hashed"));
    let local = cluster.register(table(3, "local"));
    engine
        .create_distributed_table(hash, "id", DistributionMethod::Hash, 2, false, "default")
        .unwrap();
    engine.add_local_table_to_metadata(local).unwrap();

    let err = engine
        .convert_citus_local_table_to_table_type(plain, TableType::Reference, None)
        .unwrap_err();
    assert!(matches!(err, DistError::UnsupportedConversion { from: None, .. }));

    let err = engine
        .convert_citus_local_table_to_table_type(hash, TableType::Reference, None)
        .unwrap_err();
    assert!(matches!(
        err,
        DistError::UnsupportedConversion {
            from: Some(TableType::HashDistributed),
            to: TableType::Reference
        }
    ));

    let params = DistributedTableParams::hash("id", 4);
    let err = engine
        .convert_citus_local_table_to_table_type(local, TableType::HashDistributed, Some(&params))
        .unwrap_err();
    assert!(matches!(err, DistError::UnsupportedConversion { .. }));

    // parameters present iff the target is single shard
    let err = engine
        .convert_citus_local_table_to_table_type(local, TableType::Reference, Some(&single_shard()))
        .unwrap_err();
    assert!(matches!(err, DistError::InvalidParams(_)));
    let err = engine
        .convert_citus_local_table_to_table_type(local, TableType::SingleShardDistributed, None)
        .unwrap_err();
    assert!(matches!(err, DistError::InvalidParams(_)));
}

#[test]
fn test_citus_local_to_hash_replays_foreign_keys() {
    let cluster = TestClusterBuilder::new().workers(2).build();
    let engine = &cluster.engine;
    let countries = cluster.register(countries(5));
    engine.create_reference_table(countries).unwrap();
    let cities = cluster.register(
        table(6, "cities")
            .with_column("country", dist_core::ColumnType::Text)
            .with_foreign_key(&["country"], countries, &["code"])
            .with_rows(50),
    );
    engine.add_local_table_to_metadata(cities).unwrap();
    cluster.executor.clear();

    engine
        .create_distributed_table(cities, "id", DistributionMethod::Hash, 4, false, "default")
        .unwrap();

    let catalog = engine.catalog();
    assert_eq!(catalog.table_type(cities), Some(TableType::HashDistributed));
    assert_eq!(catalog.relation(cities).unwrap().foreign_keys.len(), 1);
    assert_eq!(catalog.shards_of(cities).len(), 4);
    assert!(catalog
        .placements_of_relation(cities)
        .iter()
        .all(|p| Some(p.node_id) != cluster.coordinator));

    // rows come back from the local shard before being spread out
    let commands = cluster.data_commands();
    let back = commands
        .iter()
        .position(|(_, c)| matches!(c, WorkerCommand::CopyShardToLocal { .. }))
        .unwrap();
    let out = commands
        .iter()
        .position(|(_, c)| matches!(c, WorkerCommand::CopyLocalRows { .. }))
        .unwrap();
    assert!(back < out);
}
