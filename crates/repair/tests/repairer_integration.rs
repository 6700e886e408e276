//! Segment repairer integration tests over an in-process cluster.

use orbit_piecestore::Ranger;
use orbit_repair::{RepairError, RepairMetrics, RepairerConfig};
use orbit_segments::SegmentStore;
use orbit_testbed::{Testbed, TestbedConfig};
use orbit_types::{NodeId, RedundancyScheme};
use prometheus::Registry;
use rand::RngCore;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

/// Nine nodes, six-piece scheme: repairs have three spare nodes to draw on.
fn repair_testbed() -> Testbed {
    let mut config = TestbedConfig::default();
    config.storage_nodes = 9;
    config.scheme = RedundancyScheme::new(3, 3, 5, 6, 1024).expect("scheme");
    Testbed::new(config)
}

async fn put(store: &SegmentStore, path: &str, data: &[u8]) {
    store
        .put(
            data,
            None,
            || Ok((path.to_string(), Vec::new())),
            &CancellationToken::new(),
        )
        .await
        .expect("put");
}

async fn holders(testbed: &Testbed, path: &str) -> Vec<NodeId> {
    testbed
        .pointer(path)
        .await
        .expect("pointer")
        .remote()
        .expect("remote")
        .node_ids()
}

fn metrics() -> Arc<RepairMetrics> {
    Arc::new(RepairMetrics::new(&Registry::new()).expect("metrics"))
}

#[tokio::test]
async fn too_few_healthy_pieces_is_irreparable() {
    let testbed = repair_testbed();
    let store = testbed.segment_store();
    put(&store, "s0/bucket/wrecked", &random_bytes(120 * 1024)).await;

    let holders = holders(&testbed, "s0/bucket/wrecked").await;
    for node_id in &holders[..4] {
        testbed.disqualify(node_id);
    }

    let metrics = metrics();
    let repairer = testbed.repairer().with_metrics(metrics.clone());
    let result = repairer
        .repair(&testbed.full_path("s0/bucket/wrecked"), &CancellationToken::new())
        .await;
    assert!(matches!(
        result,
        Err(RepairError::Irreparable {
            healthy: 2,
            required: 3,
            ..
        })
    ));
    assert_eq!(metrics.repair_nodes_unavailable.get(), 1);
}

#[tokio::test]
async fn healthy_above_threshold_is_unnecessary() {
    let testbed = repair_testbed();
    let store = testbed.segment_store();
    put(&store, "s0/bucket/fine", &random_bytes(120 * 1024)).await;

    let holders = holders(&testbed, "s0/bucket/fine").await;
    for node_id in &holders[..2] {
        testbed.disqualify(node_id);
    }

    let metrics = metrics();
    let repairer = testbed.repairer().with_metrics(metrics.clone());
    let result = repairer
        .repair(&testbed.full_path("s0/bucket/fine"), &CancellationToken::new())
        .await;
    assert!(matches!(
        result,
        Err(RepairError::Unnecessary {
            healthy: 4,
            repair_threshold: 3,
            ..
        })
    ));
    assert_eq!(metrics.repair_unnecessary.get(), 1);
}

#[tokio::test]
async fn repair_at_threshold_restores_optimal() {
    let testbed = repair_testbed();
    let store = testbed.segment_store();
    let data = random_bytes(120 * 1024);
    put(&store, "s0/bucket/saved", &data).await;

    let before = testbed.pointer("s0/bucket/saved").await.expect("pointer");
    let remote_before = before.remote().expect("remote").clone();
    let holders = holders(&testbed, "s0/bucket/saved").await;
    let lost: Vec<NodeId> = holders[..3].to_vec();
    let survivors: HashSet<NodeId> = holders[3..].iter().copied().collect();
    for node_id in &lost {
        testbed.disqualify(node_id);
        testbed.set_offline(node_id, true);
    }

    let metrics = metrics();
    let repairer = testbed.repairer().with_metrics(metrics.clone());
    repairer
        .repair(&testbed.full_path("s0/bucket/saved"), &CancellationToken::new())
        .await
        .expect("repair");
    assert_eq!(metrics.repair_success.get(), 1);

    let after = testbed.pointer("s0/bucket/saved").await.expect("pointer");
    let remote_after = after.remote().expect("remote");

    // the root, redundancy, and every surviving holder carry over
    assert_eq!(remote_after.root_piece_id, remote_before.root_piece_id);
    assert_eq!(remote_after.redundancy, remote_before.redundancy);
    let after_nodes: HashSet<NodeId> = remote_after.node_ids().into_iter().collect();
    assert!(survivors.is_subset(&after_nodes));
    for node_id in &lost {
        assert!(!after_nodes.contains(node_id));
    }

    // piece count is back at the full width with unique piece numbers
    assert_eq!(remote_after.pieces.len(), 6);
    let nums: HashSet<u16> = remote_after.pieces.iter().map(|p| p.piece_num).collect();
    assert_eq!(nums.len(), 6);

    // and the segment still reads back with the lost nodes gone
    let (ranger, _) = store.get("s0/bucket/saved").await.expect("get");
    assert_eq!(ranger.range(0, ranger.size()).await.expect("range"), data);
}

#[tokio::test]
async fn partial_repair_still_rewrites_pointer() {
    let testbed = repair_testbed();
    let store = testbed.segment_store();
    put(&store, "s0/bucket/limping", &random_bytes(120 * 1024)).await;

    let holders = holders(&testbed, "s0/bucket/limping").await;
    for node_id in &holders[..3] {
        testbed.disqualify(node_id);
    }
    // two of the three spare nodes refuse connections
    let spares: Vec<NodeId> = testbed
        .node_ids
        .iter()
        .filter(|node_id| !holders.contains(node_id))
        .copied()
        .collect();
    assert_eq!(spares.len(), 3);
    testbed.set_offline(&spares[0], true);
    testbed.set_offline(&spares[1], true);

    let metrics = metrics();
    let repairer = testbed.repairer().with_metrics(metrics.clone());
    repairer
        .repair(&testbed.full_path("s0/bucket/limping"), &CancellationToken::new())
        .await
        .expect("repair");

    assert_eq!(metrics.repair_partial.get(), 1);
    let after = testbed.pointer("s0/bucket/limping").await.expect("pointer");
    assert_eq!(after.remote().expect("remote").pieces.len(), 4);
}

#[tokio::test]
async fn failed_repair_keeps_survivor_set() {
    let testbed = repair_testbed();
    let store = testbed.segment_store();
    put(&store, "s0/bucket/stuck", &random_bytes(120 * 1024)).await;

    let holders = holders(&testbed, "s0/bucket/stuck").await;
    for node_id in &holders[..3] {
        testbed.disqualify(node_id);
    }
    for node_id in testbed
        .node_ids
        .iter()
        .filter(|node_id| !holders.contains(node_id))
    {
        testbed.set_offline(node_id, true);
    }

    let metrics = metrics();
    let repairer = testbed.repairer().with_metrics(metrics.clone());
    repairer
        .repair(&testbed.full_path("s0/bucket/stuck"), &CancellationToken::new())
        .await
        .expect("repair");

    assert_eq!(metrics.repair_failed.get(), 1);
    let after = testbed.pointer("s0/bucket/stuck").await.expect("pointer");
    assert_eq!(after.remote().expect("remote").pieces.len(), 3);
}

#[tokio::test]
async fn inline_segment_is_rejected() {
    let testbed = repair_testbed();
    let store = testbed.segment_store();
    put(&store, "l/bucket/tiny", b"small inline segment").await;

    let result = testbed
        .repairer()
        .repair(&testbed.full_path("l/bucket/tiny"), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(RepairError::InlineSegment(_))));
}

#[tokio::test]
async fn missing_pointer_is_not_found() {
    let testbed = repair_testbed();
    let result = testbed
        .repairer()
        .repair(&testbed.full_path("s0/bucket/ghost"), &CancellationToken::new())
        .await;
    assert!(matches!(
        result,
        Err(RepairError::Metainfo(err)) if err.is_not_found()
    ));
}

#[tokio::test]
async fn selection_shortfall_surfaces_overlay_error() {
    let testbed = repair_testbed();
    let store = testbed.segment_store();
    put(&store, "s0/bucket/cramped", &random_bytes(120 * 1024)).await;

    let holders = holders(&testbed, "s0/bucket/cramped").await;
    for node_id in &holders[..3] {
        testbed.disqualify(node_id);
    }
    // lose one spare as well, leaving only two candidates for three slots
    let spare = testbed
        .node_ids
        .iter()
        .find(|node_id| !holders.contains(node_id))
        .copied()
        .expect("spare node");
    testbed.disqualify(&spare);

    let result = testbed
        .repairer()
        .repair(&testbed.full_path("s0/bucket/cramped"), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(RepairError::Overlay(_))));
}

#[tokio::test(start_paused = true)]
async fn timeout_leaves_pointer_untouched() {
    let testbed = repair_testbed();
    let store = testbed.segment_store();
    put(&store, "s0/bucket/frozen", &random_bytes(120 * 1024)).await;

    let before = testbed.pointer("s0/bucket/frozen").await.expect("pointer");
    let holders = holders(&testbed, "s0/bucket/frozen").await;
    for node_id in &holders[..3] {
        testbed.disqualify(node_id);
    }
    for node_id in &holders[3..] {
        testbed.set_delay(node_id, Duration::from_secs(3600));
    }

    let repairer = testbed.repairer_with(RepairerConfig {
        timeout: Duration::from_secs(2),
    });
    let result = repairer
        .repair(&testbed.full_path("s0/bucket/frozen"), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(RepairError::Timeout)));

    let after = testbed.pointer("s0/bucket/frozen").await.expect("pointer");
    assert_eq!(after.modified, before.modified);
    assert_eq!(
        after.remote().expect("remote").pieces,
        before.remote().expect("remote").pieces
    );
}

#[tokio::test]
async fn cancellation_prevents_pointer_rewrite() {
    let testbed = repair_testbed();
    let store = testbed.segment_store();
    put(&store, "s0/bucket/aborted", &random_bytes(120 * 1024)).await;

    let before = testbed.pointer("s0/bucket/aborted").await.expect("pointer");
    let holders = holders(&testbed, "s0/bucket/aborted").await;
    for node_id in &holders[..3] {
        testbed.disqualify(node_id);
    }

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = testbed
        .repairer()
        .repair(&testbed.full_path("s0/bucket/aborted"), &cancel)
        .await;
    assert!(matches!(result, Err(RepairError::Cancelled)));

    let after = testbed.pointer("s0/bucket/aborted").await.expect("pointer");
    assert_eq!(after.modified, before.modified);
}
