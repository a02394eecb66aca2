//! Streaming Replication Tests
//!
//! Per STREAMING_MODEL.md:
//! - Fragments are cut at the configured byte/row/statement thresholds
//! - The first fragment registers the session in the streaming-clients
//!   registry; commit and rollback deregister it
//! - Remote streaming transactions are hosted by registered appliers and
//!   torn down on commit, rollback and foreign view changes

mod support;

use std::sync::atomic::Ordering;

use aerosync::client::AfterStatementResult;
use aerosync::provider::ProviderStatus;
use aerosync::server::RollbackMode;
use aerosync::transaction::{FragmentUnit, TransactionState};
use aerosync::types::{ws_flags, NodeId, Seqno, TransactionId};

use support::{
    connect_to_synced, mock_node, non_primary_view, remote_ws, replicating_client,
    MockHighPriorityService,
};

// =============================================================================
// Local fragment emission
// =============================================================================

/// Appending twice the byte threshold cuts two fragments while the
/// transaction keeps executing.
#[test]
fn test_byte_fragments() {
    let node = mock_node(RollbackMode::Async, false);
    connect_to_synced(&node);
    let (client, service) = replicating_client(&node, 1);
    client.enable_streaming(FragmentUnit::Bytes, 1024).unwrap();

    client.before_command().unwrap();
    client.start_transaction(TransactionId::new(100)).unwrap();
    client.append_data(&[0; 1024]).unwrap();
    client.append_data(&[0; 1024]).unwrap();

    let fragments = client.fragments_replicated();
    assert_eq!(fragments.len(), 2);
    assert!(fragments[0] < fragments[1]);
    assert_eq!(client.transaction_state(), TransactionState::Executing);
    assert!(node.server.is_streaming_client(client.id()));

    // the host stored both fragments; only the first carries the start flag
    let stored = service.fragments.lock().unwrap();
    assert_eq!(stored.len(), 2);
    assert_ne!(stored[0].1 & ws_flags::START_TRANSACTION, 0);
    assert_eq!(stored[1].1 & ws_flags::START_TRANSACTION, 0);
}

/// Row-unit streaming cuts a fragment every N rows.
#[test]
fn test_row_fragments() {
    let node = mock_node(RollbackMode::Async, false);
    connect_to_synced(&node);
    let (client, _service) = replicating_client(&node, 1);
    client.enable_streaming(FragmentUnit::Rows, 2).unwrap();

    client.before_command().unwrap();
    client.start_transaction(TransactionId::new(100)).unwrap();
    for _ in 0..4 {
        client.append_data(b"r").unwrap();
        client.after_row().unwrap();
    }
    assert_eq!(client.fragments_replicated().len(), 2);
}

/// Statement-unit streaming cuts a fragment at the statement epilogue.
#[test]
fn test_statement_fragments() {
    let node = mock_node(RollbackMode::Async, false);
    connect_to_synced(&node);
    let (client, _service) = replicating_client(&node, 1);
    client.enable_streaming(FragmentUnit::Statements, 2).unwrap();

    client.before_command().unwrap();
    client.start_transaction(TransactionId::new(100)).unwrap();
    for _ in 0..2 {
        client.before_statement().unwrap();
        client.append_data(b"stmt").unwrap();
        assert_eq!(client.after_statement(), AfterStatementResult::Success);
    }
    assert_eq!(client.fragments_replicated().len(), 1);
}

/// Committing a streaming transaction deregisters the client; the final
/// write set no longer carries the start flag.
#[test]
fn test_streaming_commit_deregisters_client() {
    let node = mock_node(RollbackMode::Async, false);
    connect_to_synced(&node);
    let (client, _service) = replicating_client(&node, 1);
    client.enable_streaming(FragmentUnit::Bytes, 8).unwrap();

    client.before_command().unwrap();
    client.start_transaction(TransactionId::new(100)).unwrap();
    client.append_data(&[0; 8]).unwrap();
    assert!(node.server.is_streaming_client(client.id()));

    client.before_commit().unwrap();
    client.ordered_commit().unwrap();
    client.after_commit().unwrap();
    assert_eq!(client.after_statement(), AfterStatementResult::Success);

    assert_eq!(client.transaction_state(), TransactionState::Committed);
    assert!(node.server.streaming_clients().is_empty());
}

/// Rolling back a streaming transaction removes the stored fragments and
/// replicates the rollback exactly once.
#[test]
fn test_streaming_rollback_tears_down() {
    let node = mock_node(RollbackMode::Async, false);
    connect_to_synced(&node);
    let (client, service) = replicating_client(&node, 1);
    client.enable_streaming(FragmentUnit::Bytes, 8).unwrap();

    client.before_command().unwrap();
    client.start_transaction(TransactionId::new(100)).unwrap();
    client.append_data(&[0; 8]).unwrap();
    assert_eq!(client.fragments_replicated().len(), 1);

    client.bf_abort(Seqno::new(1));
    assert_eq!(client.after_statement(), AfterStatementResult::MayRetry);

    assert_eq!(client.transaction_state(), TransactionState::Aborted);
    assert!(node.server.streaming_clients().is_empty());
    assert_eq!(service.remove_fragments_calls.load(Ordering::Relaxed), 1);
}

/// A fragment whose certification fails marks the transaction must_abort.
#[test]
fn test_fragment_certification_failure() {
    let node = mock_node(RollbackMode::Async, false);
    connect_to_synced(&node);
    let (client, _service) = replicating_client(&node, 1);
    client.enable_streaming(FragmentUnit::Bytes, 8).unwrap();

    client.before_command().unwrap();
    client.start_transaction(TransactionId::new(100)).unwrap();
    node.provider
        .fail_next_certify(ProviderStatus::CertificationFailed);
    assert!(client.append_data(&[0; 8]).is_err());
    assert_eq!(client.transaction_state(), TransactionState::MustAbort);
    assert_eq!(client.fragments_replicated().len(), 0);
    assert!(node.server.streaming_clients().is_empty());

    assert_eq!(client.after_statement(), AfterStatementResult::MayRetry);
    assert_eq!(client.transaction_state(), TransactionState::Aborted);
}

// =============================================================================
// Registry conversion
// =============================================================================

/// A streaming client whose session ends is converted into an applier
/// under this node's identity.
#[test]
fn test_convert_streaming_client_to_applier() {
    let node = mock_node(RollbackMode::Async, false);
    connect_to_synced(&node);
    let (client, _service) = replicating_client(&node, 1);
    client.enable_streaming(FragmentUnit::Bytes, 8).unwrap();

    client.before_command().unwrap();
    client.start_transaction(TransactionId::new(100)).unwrap();
    client.append_data(&[0; 8]).unwrap();
    assert!(node.server.is_streaming_client(client.id()));

    node.server.convert_streaming_client_to_applier(&client);
    assert!(node.server.streaming_clients().is_empty());

    let key = (node.server.id(), TransactionId::new(100));
    assert_eq!(node.server.streaming_appliers(), vec![key]);
    assert!(node
        .server
        .find_streaming_applier(key.0, key.1)
        .is_some());

    node.server.stop_streaming_applier(key.0, key.1);
    assert!(node.server.streaming_appliers().is_empty());
}

// =============================================================================
// Remote apply dispatch
// =============================================================================

/// A whole remote transaction applies and commits through the caller's
/// high-priority service.
#[test]
fn test_on_apply_whole_write_set() {
    let node = mock_node(RollbackMode::Async, false);
    connect_to_synced(&node);
    let applier = MockHighPriorityService::new();
    let origin = NodeId::generate();

    let (handle, meta) = remote_ws(
        &node,
        origin,
        7,
        10,
        ws_flags::START_TRANSACTION | ws_flags::COMMIT,
    );
    let status = node.server.on_apply(&*applier, &handle, &meta, b"payload");

    assert_eq!(status, ProviderStatus::Success);
    assert_eq!(applier.started.load(Ordering::Relaxed), 1);
    assert_eq!(applier.applied.load(Ordering::Relaxed), 1);
    assert_eq!(applier.committed.load(Ordering::Relaxed), 1);
    assert_eq!(node.server.last_committed_gtid(), meta.gtid());
}

/// An apply failure rolls the write set back and reports it.
#[test]
fn test_on_apply_failure_rolls_back() {
    let node = mock_node(RollbackMode::Async, false);
    connect_to_synced(&node);
    let applier = MockHighPriorityService::new();
    applier.fail_next_applying.store(true, Ordering::Relaxed);

    let (handle, meta) = remote_ws(
        &node,
        NodeId::generate(),
        7,
        10,
        ws_flags::START_TRANSACTION | ws_flags::COMMIT,
    );
    let status = node.server.on_apply(&*applier, &handle, &meta, b"payload");

    assert_eq!(status, ProviderStatus::Fatal);
    assert_eq!(applier.committed.load(Ordering::Relaxed), 0);
    assert_eq!(applier.rolled_back.load(Ordering::Relaxed), 1);
}

/// Remote streaming fragments are routed to one registered applier and the
/// commit fragment tears it down.
#[test]
fn test_on_apply_streaming_fragments() {
    let node = mock_node(RollbackMode::Async, false);
    connect_to_synced(&node);
    let outer = MockHighPriorityService::new();
    let origin = NodeId::generate();

    let (h1, m1) = remote_ws(&node, origin, 7, 10, ws_flags::START_TRANSACTION);
    assert_eq!(
        node.server.on_apply(&*outer, &h1, &m1, b"frag-1"),
        ProviderStatus::Success
    );
    assert_eq!(
        node.server.streaming_appliers(),
        vec![(origin, TransactionId::new(7))]
    );

    let (h2, m2) = remote_ws(&node, origin, 7, 11, 0);
    assert_eq!(
        node.server.on_apply(&*outer, &h2, &m2, b"frag-2"),
        ProviderStatus::Success
    );

    let (h3, m3) = remote_ws(&node, origin, 7, 12, ws_flags::COMMIT);
    assert_eq!(
        node.server.on_apply(&*outer, &h3, &m3, b"frag-3"),
        ProviderStatus::Success
    );

    assert!(node.server.streaming_appliers().is_empty());
    let appliers = node.service.created_appliers.lock().unwrap();
    let hosted = &appliers[0];
    assert_eq!(hosted.applied.load(Ordering::Relaxed), 3);
    assert_eq!(hosted.committed.load(Ordering::Relaxed), 1);
    assert_eq!(node.service.released_appliers.load(Ordering::Relaxed), 1);
    // the outer service never touched the fragments
    assert_eq!(outer.applied.load(Ordering::Relaxed), 0);
}

/// A rollback fragment abandons the hosted transaction.
#[test]
fn test_on_apply_rollback_fragment() {
    let node = mock_node(RollbackMode::Async, false);
    connect_to_synced(&node);
    let outer = MockHighPriorityService::new();
    let origin = NodeId::generate();

    let (h1, m1) = remote_ws(&node, origin, 7, 10, ws_flags::START_TRANSACTION);
    node.server.on_apply(&*outer, &h1, &m1, b"frag-1");

    let (h2, m2) = remote_ws(&node, origin, 7, 11, ws_flags::ROLLBACK);
    assert_eq!(
        node.server.on_apply(&*outer, &h2, &m2, &[]),
        ProviderStatus::Success
    );

    assert!(node.server.streaming_appliers().is_empty());
    let appliers = node.service.created_appliers.lock().unwrap();
    let hosted = &appliers[0];
    assert_eq!(hosted.rolled_back.load(Ordering::Relaxed), 1);
}

/// A continuation fragment without a registered applier is an apply
/// failure.
#[test]
fn test_on_apply_missing_applier() {
    let node = mock_node(RollbackMode::Async, false);
    connect_to_synced(&node);
    let outer = MockHighPriorityService::new();

    let (handle, meta) = remote_ws(&node, NodeId::generate(), 7, 11, 0);
    assert_eq!(
        node.server.on_apply(&*outer, &handle, &meta, b"frag"),
        ProviderStatus::Fatal
    );
}

/// TOI write sets apply through the caller's service.
#[test]
fn test_on_apply_toi() {
    let node = mock_node(RollbackMode::Async, false);
    connect_to_synced(&node);
    let applier = MockHighPriorityService::new();

    let (handle, meta) = remote_ws(&node, NodeId::generate(), 0, 20, ws_flags::TOI);
    assert_eq!(
        node.server.on_apply(&*applier, &handle, &meta, b"ddl"),
        ProviderStatus::Success
    );
    assert_eq!(applier.toi_applied.load(Ordering::Relaxed), 1);
    assert_eq!(node.server.last_committed_gtid(), meta.gtid());
}

// =============================================================================
// View changes
// =============================================================================

/// A non-primary view closes the streaming appliers whose origin left the
/// group and keeps the ones still in the view.
#[test]
fn test_non_primary_view_closes_foreign_appliers() {
    let node = mock_node(RollbackMode::Async, false);
    connect_to_synced(&node);
    let outer = MockHighPriorityService::new();
    let surviving = NodeId::generate();
    let departed = NodeId::generate();

    let (h1, m1) = remote_ws(&node, surviving, 1, 10, ws_flags::START_TRANSACTION);
    node.server.on_apply(&*outer, &h1, &m1, b"frag");
    let (h2, m2) = remote_ws(&node, departed, 2, 11, ws_flags::START_TRANSACTION);
    node.server.on_apply(&*outer, &h2, &m2, b"frag");
    assert_eq!(node.server.streaming_appliers().len(), 2);

    node.server
        .on_view(&non_primary_view(&node, &[node.server.id(), surviving]));

    assert_eq!(
        node.server.streaming_appliers(),
        vec![(surviving, TransactionId::new(1))]
    );
    // the departed origin's applier was told to roll back and released
    let appliers = node.service.created_appliers.lock().unwrap();
    let departed_applier = &appliers[1];
    assert_eq!(departed_applier.rolled_back.load(Ordering::Relaxed), 1);
    assert_eq!(node.service.released_appliers.load(Ordering::Relaxed), 1);
}
