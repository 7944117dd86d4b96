//! Integration tests for channel creation across a mock cluster.

mod support;

use sable::cluster::NodeKey;
use sable::config::ChannelConfig;
use sable::resource::ResourceId;
use sable::storage::TsStore;
use sable::testing::node_address;
use sable::testing::MockCluster;
use sable::transport::CreateMessage;
use sable::transport::RpcError;
use sable::transport::Transport;
use sable::Channel;
use sable::CreateOptions;
use sable::DataType;
use sable::ErrorKind;
use support::cluster;
use support::float;
use support::float_on;
use support::free_key;
use support::key;

// ============================================================================
// Key assignment
// ============================================================================

#[tokio::test]
async fn test_sequential_keys_per_leaseholder() {
    let c = cluster(2).await;

    let created = c
        .service(1)
        .writer()
        .create_many(vec![float("a"), float("b"), float("c")], CreateOptions::default())
        .await
        .unwrap();
    let keys: Vec<_> = created.iter().map(Channel::key).collect();
    assert_eq!(keys, vec![key(1, 1), key(1, 2), key(1, 3)]);

    let created = c
        .service(2)
        .writer()
        .create_many(vec![float("d"), float("e")], CreateOptions::default())
        .await
        .unwrap();
    let keys: Vec<_> = created.iter().map(Channel::key).collect();
    assert_eq!(keys, vec![key(2, 1), key(2, 2)]);

    assert_eq!(c.node(1).ts.len(), 3);
    assert_eq!(c.node(2).ts.len(), 2);
    assert_eq!(c.service(1).external_count().await, 3);
    assert_eq!(c.service(2).external_count().await, 2);
}

#[tokio::test]
async fn test_create_forwards_to_remote_leaseholder() {
    let c = cluster(3).await;

    let created = c
        .service(1)
        .writer()
        .create_many(vec![float("local"), float_on("remote", 3)], CreateOptions::default())
        .await
        .unwrap();

    assert_eq!(created[0].key(), key(1, 1));
    assert_eq!(created[1].key(), key(3, 1));
    assert!(c.node(3).ts.contains(key(3, 1).storage_key()));
    assert!(!c.node(1).ts.contains(key(3, 1).storage_key()));
    assert_eq!(c.service(3).external_count().await, 1);
    assert_eq!(c.service(1).external_count().await, 1);

    let found = c.service(2).retrieve().where_names(["remote"]).exec_one().await.unwrap();
    assert_eq!(found.key(), key(3, 1));
}

#[tokio::test]
async fn test_keys_are_never_reused_after_delete() {
    let c = cluster(1).await;
    let writer = c.service(1).writer();

    let created = writer.create_many(vec![float("a"), float("b")], CreateOptions::default()).await.unwrap();
    writer.delete(&[created[1].key()]).await.unwrap();

    let next = writer.create(float("c"), CreateOptions::default()).await.unwrap();
    assert_eq!(next.key(), key(1, 3));
}

#[tokio::test]
async fn test_leased_channel_with_key_is_recreated() {
    let c = cluster(1).await;
    let writer = c.service(1).writer();

    let first = writer.create(float("a"), CreateOptions::default()).await.unwrap();
    let again = Channel {
        name: "b".into(),
        ..first.clone()
    };
    let second = writer.create(again, CreateOptions::default()).await.unwrap();

    assert_ne!(second.key(), first.key());
    assert_eq!(second.key(), key(1, 2));
    let all = c.service(1).retrieve().exec().await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_index_channel_points_at_itself() {
    let c = cluster(1).await;
    let writer = c.service(1).writer();

    let index = writer.create(Channel::new_index("time"), CreateOptions::default()).await.unwrap();
    assert_eq!(index.local_index, index.local_key);

    let data = writer
        .create(Channel::data("temp", DataType::Float64, index.local_key), CreateOptions::default())
        .await
        .unwrap();
    assert_eq!(data.index(), Some(index.key()));

    let stored = c.node(1).ts.retrieve_channels(&[data.key().storage_key()]).await.unwrap();
    assert_eq!(stored[0].index, index.key().storage_key());
}

// ============================================================================
// Calculated channels
// ============================================================================

#[tokio::test]
async fn test_calculated_channel_gets_free_index() {
    let c = cluster(2).await;

    let created = c
        .service(2)
        .writer()
        .create_many(vec![Channel::calculated("calc", "return float(a)")], CreateOptions::default())
        .await
        .unwrap();

    assert_eq!(created.len(), 2);
    let (calc, index) = (&created[0], &created[1]);
    assert!(calc.leaseholder.is_free());
    assert!(calc.is_virtual);
    assert_eq!(calc.data_type, DataType::Float64);
    assert_eq!(calc.key(), free_key(1));

    assert_eq!(index.name, "calc_time");
    assert!(index.is_index && index.is_virtual);
    assert_eq!(index.key(), free_key(2));
    assert_eq!(calc.index(), Some(index.key()));

    assert!(c.node(1).ts.is_empty());
    assert!(c.node(2).ts.is_empty());
    assert_eq!(c.service(1).external_count().await, 0);
}

#[tokio::test]
async fn test_calculated_index_inherits_internal_flag() {
    let c = cluster(1).await;

    let internal = Channel {
        is_internal: true,
        ..Channel::calculated("sy_calc", "return 1")
    };
    let created = c.service(1).writer().create_many(vec![internal], CreateOptions::default()).await.unwrap();

    assert_eq!(created[1].name, "sy_calc_time");
    assert!(created[1].is_internal);
}

#[tokio::test]
async fn test_manual_index_on_new_calculated_rejected() {
    let c = cluster(1).await;

    let manual = Channel {
        local_index: 5,
        ..Channel::calculated("calc", "return 1")
    };
    let err = c.service(1).writer().create(manual, CreateOptions::default()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ManualIndexOnCalculated);
    assert!(c.service(1).retrieve().exec().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_existing_calculated_channel_is_updated_in_place() {
    let c = cluster(2).await;
    let writer = c.service(2).writer();

    let created = writer.create(Channel::calculated("calc", "return 1"), CreateOptions::default()).await.unwrap();
    let edited = Channel {
        name: "calc_renamed".into(),
        expression: "return 2".into(),
        ..created.clone()
    };
    let updated = writer.create(edited, CreateOptions::default()).await.unwrap();

    assert_eq!(updated.key(), created.key());
    assert_eq!(updated.local_index, created.local_index);
    let stored = c.service(1).retrieve().where_keys([created.key()]).exec_one().await.unwrap();
    assert_eq!(stored.name, "calc_renamed");
    assert_eq!(stored.expression, "return 2");
    assert_eq!(c.service(1).retrieve().exec().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_index_name_collides_with_stored_channel() {
    let c = cluster(2).await;
    c.service(1).writer().create(float("x_time"), CreateOptions::default()).await.unwrap();

    let err = c
        .service(2)
        .writer()
        .create(Channel::calculated("x", "return 1"), CreateOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NameConflict);
    let stored = c.service(1).retrieve().exec().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].name, "x_time");
}

#[tokio::test]
async fn test_index_name_collides_within_batch() {
    let c = cluster(1).await;

    let err = c
        .service(1)
        .writer()
        .create_many(vec![Channel::calculated("x", "return 1"), float("x_time")], CreateOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DuplicateName);
    assert!(c.service(1).retrieve().exec().await.unwrap().is_empty());
    assert!(c.node(1).ts.is_empty());
}

#[tokio::test]
async fn test_retrieve_if_name_exists_on_calculated_channel() {
    let c = cluster(2).await;
    let writer = c.service(2).writer();

    let first = writer
        .create_many(vec![Channel::calculated("x", "return 1")], CreateOptions::default())
        .await
        .unwrap();
    let again = writer
        .create_many(
            vec![Channel::calculated("x", "return 1")],
            CreateOptions::default().retrieve_if_name_exists(),
        )
        .await
        .unwrap();

    assert_eq!(again, first);
    assert_eq!(c.service(1).retrieve().exec().await.unwrap().len(), 2);

    // The retrieval consumed no free keys.
    let next = writer.create(Channel::calculated("y", "return 2"), CreateOptions::default()).await.unwrap();
    assert_eq!(next.key(), free_key(3));
}

// ============================================================================
// Existing names
// ============================================================================

#[tokio::test]
async fn test_existing_name_rejected_by_default() {
    let c = cluster(1).await;
    let writer = c.service(1).writer();

    writer.create(float("a"), CreateOptions::default()).await.unwrap();
    let err = writer.create(float("a"), CreateOptions::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NameConflict);
}

#[tokio::test]
async fn test_retrieve_if_name_exists_returns_stored_key() {
    let c = cluster(2).await;

    let first = c.service(1).writer().create(float("a"), CreateOptions::default()).await.unwrap();
    let again = c
        .service(1)
        .writer()
        .create(float("a"), CreateOptions::default().retrieve_if_name_exists())
        .await
        .unwrap();

    assert_eq!(again, first);
    assert_eq!(c.node(1).ts.len(), 1);
    assert_eq!(c.service(1).external_count().await, 1);
}

#[tokio::test]
async fn test_overwrite_with_same_properties_keeps_key() {
    let c = cluster(1).await;
    let writer = c.service(1).writer();
    let opts = CreateOptions::default().overwrite_if_name_exists_and_different_properties();

    let first = writer.create(float("a"), CreateOptions::default()).await.unwrap();
    let again = writer.create(float("a"), opts).await.unwrap();

    assert_eq!(again.key(), first.key());
    assert_eq!(c.node(1).ts.len(), 1);
}

#[tokio::test]
async fn test_overwrite_with_different_properties_replaces_channel() {
    let c = cluster(1).await;
    let writer = c.service(1).writer();
    let opts = CreateOptions::default().overwrite_if_name_exists_and_different_properties();

    let first = writer.create(float("a"), CreateOptions::default()).await.unwrap();
    let replaced = writer.create(Channel::data("a", DataType::Int64, 0), opts).await.unwrap();

    assert_ne!(replaced.key(), first.key());
    assert_eq!(replaced.data_type, DataType::Int64);
    assert!(!c.node(1).ts.contains(first.key().storage_key()));
    assert!(c.node(1).ts.contains(replaced.key().storage_key()));
    assert_eq!(c.service(1).external_count().await, 1);

    let err = c.service(1).retrieve().where_keys([first.key()]).exec().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_overwrite_replaces_channel_on_other_node() {
    let c = cluster(2).await;
    let opts = CreateOptions::default().overwrite_if_name_exists_and_different_properties();

    let first = c.service(2).writer().create(float("a"), CreateOptions::default()).await.unwrap();
    let replaced = c.service(1).writer().create(Channel::data("a", DataType::Int64, 0), opts).await.unwrap();

    assert_eq!(replaced.leaseholder, NodeKey(1));
    assert!(!c.node(2).ts.contains(first.key().storage_key()));
    assert_eq!(c.service(2).external_count().await, 0);
    assert_eq!(c.service(1).external_count().await, 1);
}

// ============================================================================
// Validation and atomicity
// ============================================================================

#[tokio::test]
async fn test_duplicate_names_abort_whole_batch() {
    let c = cluster(1).await;

    let err = c
        .service(1)
        .writer()
        .create_many(vec![float("a"), float("b"), float("a")], CreateOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DuplicateName);
    assert!(c.service(1).retrieve().exec().await.unwrap().is_empty());
    assert_eq!(c.service(1).proxy().leased_counter_value().await.unwrap(), 0);
    assert!(c.node(1).ts.is_empty());
}

#[tokio::test]
async fn test_invalid_name_reports_field_path() {
    let c = cluster(1).await;

    let err = c
        .service(1)
        .writer()
        .create_many(vec![float("ok"), float("not ok")], CreateOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidName);
    assert!(err.to_string().contains("channels[1]"), "{err}");
}

#[tokio::test]
async fn test_external_channel_limit() {
    let config = ChannelConfig {
        max_external_channels: 2,
        ..ChannelConfig::default()
    };
    let c = MockCluster::provision_with(1, config).await.unwrap();
    let writer = c.service(1).writer();

    let err = writer
        .create_many(vec![float("a"), float("b"), float("c")], CreateOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
    assert!(c.node(1).ts.is_empty());
    assert!(c.service(1).retrieve().exec().await.unwrap().is_empty());

    writer.create_many(vec![float("a"), float("b")], CreateOptions::default()).await.unwrap();
    writer.create(Channel::new_virtual("v", DataType::Float64), CreateOptions::default()).await.unwrap();
    assert_eq!(c.service(1).external_count().await, 2);
}

#[tokio::test]
async fn test_remote_errors_keep_their_kind() {
    let config = ChannelConfig {
        max_external_channels: 1,
        ..ChannelConfig::default()
    };
    let c = MockCluster::provision_with(2, config).await.unwrap();

    let err = c
        .service(1)
        .writer()
        .create_many(vec![float_on("x", 2), float_on("y", 2)], CreateOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
}

#[tokio::test]
async fn test_unreachable_leaseholder() {
    let c = cluster(2).await;
    let writer = c.service(1).writer();

    c.network.partition(&c.node(2).address);
    let err = writer.create(float_on("x", 2), CreateOptions::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteUnreachable);

    c.network.heal(&c.node(2).address);
    let created = writer.create(float_on("x", 2), CreateOptions::default()).await.unwrap();
    assert_eq!(created.leaseholder, NodeKey(2));
}

#[tokio::test]
async fn test_peer_rejects_misrouted_create() {
    let c = cluster(3).await;
    let outsider = c.network.transport(node_address(NodeKey(9)));

    let msg = CreateMessage {
        channels: vec![float_on("x", 3)],
        opts: CreateOptions::default(),
    };
    let err = outsider.create_client().send(&c.node(2).address, msg).await.unwrap_err();
    assert!(matches!(err, RpcError::Remote { kind: ErrorKind::Validation, .. }), "{err}");
    assert!(c.node(3).ts.is_empty());
}

#[tokio::test]
async fn test_free_create_rejected_off_bootstrapper() {
    let c = cluster(2).await;
    let outsider = c.network.transport(node_address(NodeKey(9)));

    let calc = Channel {
        leaseholder: NodeKey::FREE,
        is_virtual: true,
        ..Channel::calculated("x", "return 1")
    };
    let msg = CreateMessage {
        channels: vec![calc],
        opts: CreateOptions::default(),
    };
    let err = outsider.create_client().send(&c.node(2).address, msg).await.unwrap_err();
    assert!(matches!(err, RpcError::Remote { kind: ErrorKind::Configuration, .. }), "{err}");
    assert!(c.service(1).retrieve().exec().await.unwrap().is_empty());
}

// ============================================================================
// Resource graph
// ============================================================================

#[tokio::test]
async fn test_group_relationship() {
    let c = cluster(1).await;
    let service = c.service(1);
    let writer = service.writer();

    let linked = writer.create(float("a"), CreateOptions::default()).await.unwrap();
    let unlinked = writer.create(float("b"), CreateOptions::default().without_group_relationship()).await.unwrap();
    let internal = Channel {
        is_internal: true,
        ..float("sy_c")
    };
    let internal = writer.create(internal, CreateOptions::default()).await.unwrap();

    let group = service.group().cloned().unwrap();
    let txn = service.proxy().metadata().begin();
    let children = c.resources.children(&txn, &group).await.unwrap();
    assert_eq!(children, vec![ResourceId::channel(linked.key())]);

    assert!(c.resources.retrieve(&txn, &ResourceId::channel(unlinked.key())).await.unwrap().is_some());
    assert!(c.resources.retrieve(&txn, &ResourceId::channel(internal.key())).await.unwrap().is_none());
}
