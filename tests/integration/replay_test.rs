//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 指令重放集成测试

#[path = "../common/mod.rs"]
mod common;

use chrono::Utc;
use common::RecordingRefresher;
use oxsync::instruction::encode_payload;
use oxsync::metrics::GLOBAL_METRICS;
use oxsync::store::{InstructionStore, MemoryInstructionStore, NewCacheInstruction};
use oxsync::{RefreshInstruction, RefresherRegistry, SyncEngine};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const REMOTE: &str = "node-a";

fn row(payload: String, origin: &str) -> NewCacheInstruction {
    NewCacheInstruction {
        utc_stamp: Utc::now(),
        instructions: payload,
        origin_identity: origin.to_string(),
        instruction_count: 1,
    }
}

async fn insert(store: &MemoryInstructionStore, payload: String, origin: &str) -> i64 {
    store.insert_all(vec![row(payload, origin)]).await.unwrap()[0]
}

fn setup() -> (
    MemoryInstructionStore,
    SyncEngine,
    RefresherRegistry,
    Arc<RecordingRefresher>,
) {
    common::setup_logging();
    let store = MemoryInstructionStore::new();
    let engine = SyncEngine::new(Arc::new(store.clone()));
    let refresher = RecordingRefresher::with_json();
    let registry = RefresherRegistry::new();
    registry.register(refresher.clone());
    (store, engine, registry, refresher)
}

/// 测试单个批次内的多条指令按顺序执行
#[tokio::test]
async fn test_replays_batch_in_order() {
    let (store, engine, registry, refresher) = setup();
    let r = refresher.id();
    let payload = encode_payload(&[
        RefreshInstruction::refresh_by_id(r, 1),
        RefreshInstruction::refresh_by_id(r, 2),
        RefreshInstruction::refresh_by_id(r, 3),
    ])
    .unwrap();
    let id = insert(&store, payload, REMOTE).await;

    let node = common::unique_identity("node-b");
    let outcome = engine
        .process_instructions(&registry, &CancellationToken::new(), &node, 0)
        .await
        .unwrap();

    assert_eq!(outcome.fetched, 1);
    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.applied, 1);
    assert_eq!(outcome.last_id, id);
    assert_eq!(refresher.calls(), vec!["id:1", "id:2", "id:3"]);
}

/// 测试无法解析的批次被跳过，且不阻塞后续批次
#[tokio::test]
async fn test_malformed_batch_is_skipped_and_advanced() {
    let (store, engine, registry, refresher) = setup();
    let r = refresher.id();
    insert(&store, "{not json".to_string(), REMOTE).await;
    let valid = insert(
        &store,
        encode_payload(&[RefreshInstruction::remove_by_id(r, 9)]).unwrap(),
        REMOTE,
    )
    .await;

    let node = common::unique_identity("node-b");
    let outcome = engine
        .process_instructions(&registry, &CancellationToken::new(), &node, 0)
        .await
        .unwrap();

    assert_eq!(outcome.processed, 2);
    assert_eq!(outcome.skipped_malformed, 1);
    assert_eq!(outcome.applied, 1);
    assert_eq!(outcome.last_id, valid);
    assert_eq!(refresher.calls(), vec!["remove:9"]);
    assert_eq!(GLOBAL_METRICS.processed(&node, "malformed"), 1);
    assert_eq!(GLOBAL_METRICS.processed(&node, "applied"), 1);
}

/// 测试本节点写入的批次不执行但推进最后同步 ID
#[tokio::test]
async fn test_local_batches_are_skipped() {
    let (store, engine, registry, refresher) = setup();
    let node = common::unique_identity("node-b");
    let payload = encode_payload(&[RefreshInstruction::refresh_all(refresher.id())]).unwrap();
    insert(&store, payload.clone(), &node).await;
    let last = insert(&store, payload, &node).await;

    let outcome = engine
        .process_instructions(&registry, &CancellationToken::new(), &node, 0)
        .await
        .unwrap();

    assert_eq!(outcome.processed, 2);
    assert_eq!(outcome.skipped_local, 2);
    assert_eq!(outcome.last_id, last);
    assert!(refresher.calls().is_empty());
}

/// 测试嵌套数组被展开后按顺序执行
#[tokio::test]
async fn test_nested_payload_is_flattened() {
    let (store, engine, registry, refresher) = setup();
    let r = refresher.id().to_string();
    let payload = json!([
        [
            { "refresherId": r, "refreshType": "RefreshById", "intId": 1 },
            { "refresherId": r, "refreshType": "RefreshByIds", "jsonIds": "[2,3]" }
        ],
        { "refresherId": r, "refreshType": "RefreshByJson", "jsonPayload": "{\"k\":1}" }
    ])
    .to_string();
    insert(&store, payload, REMOTE).await;

    let node = common::unique_identity("node-b");
    engine
        .process_instructions(&registry, &CancellationToken::new(), &node, 0)
        .await
        .unwrap();

    assert_eq!(
        refresher.calls(),
        vec!["id:1", "id:2", "id:3", "json:{\"k\":1}"]
    );
}

/// 测试单次同步读取的批次数不超过上限
#[tokio::test]
async fn test_fetch_limit_is_respected() {
    let (store, engine, registry, refresher) = setup();
    let payload = encode_payload(&[RefreshInstruction::refresh_all(refresher.id())]).unwrap();
    let rows = (0..150).map(|_| row(payload.clone(), REMOTE)).collect();
    let ids = store.insert_all(rows).await.unwrap();

    let node = common::unique_identity("node-b");
    let first = engine
        .process_instructions(&registry, &CancellationToken::new(), &node, 0)
        .await
        .unwrap();
    assert_eq!(first.fetched, 100);
    assert_eq!(first.last_id, ids[99]);

    let second = engine
        .process_instructions(&registry, &CancellationToken::new(), &node, first.last_id)
        .await
        .unwrap();
    assert_eq!(second.fetched, 50);
    assert_eq!(second.last_id, ids[149]);

    let small = SyncEngine::new(Arc::new(store.clone())).with_fetch_limit(10);
    let third = small
        .process_instructions(&registry, &CancellationToken::new(), &node, 0)
        .await
        .unwrap();
    assert_eq!(third.fetched, 10);
}

/// 测试执行失败的批次被跳过，之后的批次继续处理
#[tokio::test]
async fn test_failed_batch_is_skipped_and_loop_continues() {
    let (store, engine, registry, refresher) = setup();
    let r = refresher.id();
    refresher.fail_on(2);

    insert(
        &store,
        encode_payload(&[
            RefreshInstruction::refresh_by_id(r, 1),
            RefreshInstruction::refresh_by_id(r, 2),
            RefreshInstruction::refresh_by_id(r, 3),
        ])
        .unwrap(),
        REMOTE,
    )
    .await;
    insert(
        &store,
        encode_payload(&[RefreshInstruction::refresh_all(uuid::Uuid::new_v4())]).unwrap(),
        REMOTE,
    )
    .await;
    let last = insert(
        &store,
        encode_payload(&[RefreshInstruction::refresh_by_id(r, 4)]).unwrap(),
        REMOTE,
    )
    .await;

    let node = common::unique_identity("node-b");
    let outcome = engine
        .process_instructions(&registry, &CancellationToken::new(), &node, 0)
        .await
        .unwrap();

    assert_eq!(outcome.processed, 3);
    assert_eq!(outcome.failed, 2);
    assert_eq!(outcome.applied, 1);
    assert_eq!(outcome.last_id, last);
    // 批次部分执行：失败之前的指令已执行，之后的未执行
    assert_eq!(refresher.calls(), vec!["id:1", "id:4"]);
}

/// 测试 JSON 刷新发给不支持 JSON 的刷新器时批次被跳过
#[tokio::test]
async fn test_json_refresh_on_plain_refresher_is_skipped() {
    let (store, engine, registry, _) = setup();
    let plain = RecordingRefresher::new();
    registry.register(plain.clone());

    let id = insert(
        &store,
        encode_payload(&[RefreshInstruction::refresh_by_json(plain.id(), "{}")]).unwrap(),
        REMOTE,
    )
    .await;

    let node = common::unique_identity("node-b");
    let outcome = engine
        .process_instructions(&registry, &CancellationToken::new(), &node, 0)
        .await
        .unwrap();
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.last_id, id);
    assert!(plain.calls().is_empty());
}

/// 测试同一次同步中重复的指令只执行一次，再次同步时可以重复执行
#[tokio::test]
async fn test_duplicates_within_call_run_once() {
    let (store, engine, registry, refresher) = setup();
    let r = refresher.id();
    let payload = encode_payload(&[
        RefreshInstruction::refresh_by_id(r, 7),
        RefreshInstruction::refresh_by_id(r, 7),
    ])
    .unwrap();
    insert(&store, payload.clone(), REMOTE).await;
    insert(&store, payload, REMOTE).await;

    let node = common::unique_identity("node-b");
    let outcome = engine
        .process_instructions(&registry, &CancellationToken::new(), &node, 0)
        .await
        .unwrap();
    assert_eq!(outcome.processed, 2);
    assert_eq!(refresher.calls(), vec!["id:7"]);

    // 重放同样的批次，结果不变
    refresher.clear();
    engine
        .process_instructions(&registry, &CancellationToken::new(), &node, 0)
        .await
        .unwrap();
    assert_eq!(refresher.calls(), vec!["id:7"]);
}

/// 测试取消后不推进最后同步 ID
#[tokio::test]
async fn test_cancelled_sync_does_not_advance() {
    let (store, engine, registry, refresher) = setup();
    insert(
        &store,
        encode_payload(&[RefreshInstruction::refresh_all(refresher.id())]).unwrap(),
        REMOTE,
    )
    .await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let node = common::unique_identity("node-b");
    let outcome = engine
        .process_instructions(&registry, &cancel, &node, 0)
        .await
        .unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.fetched, 1);
    assert_eq!(outcome.processed, 0);
    assert_eq!(outcome.last_id, 0);
    assert!(refresher.calls().is_empty());
}

/// 测试批次执行中途取消时停留在上一个完成的批次
#[tokio::test]
async fn test_cancel_mid_batch_keeps_previous_marker() {
    let (store, engine, registry, refresher) = setup();
    let r = refresher.id();
    let first = insert(
        &store,
        encode_payload(&[RefreshInstruction::refresh_by_id(r, 1)]).unwrap(),
        REMOTE,
    )
    .await;
    insert(
        &store,
        encode_payload(&[
            RefreshInstruction::refresh_by_id(r, 2),
            RefreshInstruction::refresh_by_id(r, 3),
        ])
        .unwrap(),
        REMOTE,
    )
    .await;
    insert(
        &store,
        encode_payload(&[RefreshInstruction::refresh_by_id(r, 4)]).unwrap(),
        REMOTE,
    )
    .await;

    let cancel = CancellationToken::new();
    refresher.cancel_on(2, cancel.clone());
    let node = common::unique_identity("node-b");
    let outcome = engine
        .process_instructions(&registry, &cancel, &node, 0)
        .await
        .unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.fetched, 3);
    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.applied, 1);
    assert_eq!(outcome.last_id, first);
    assert_eq!(refresher.calls(), vec!["id:1", "id:2"]);
}

/// 测试没有新批次时返回传入的最后同步 ID
#[tokio::test]
async fn test_marker_never_moves_backwards() {
    let (store, engine, registry, refresher) = setup();
    insert(
        &store,
        encode_payload(&[RefreshInstruction::refresh_all(refresher.id())]).unwrap(),
        REMOTE,
    )
    .await;

    let node = common::unique_identity("node-b");
    let outcome = engine
        .process_instructions(&registry, &CancellationToken::new(), &node, 500)
        .await
        .unwrap();
    assert_eq!(outcome.fetched, 0);
    assert_eq!(outcome.last_id, 500);
}
