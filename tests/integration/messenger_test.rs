//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 多节点消息同步集成测试

#[path = "../common/mod.rs"]
mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::RecordingRefresher;
use oxsync::config::MessengerConfig;
use oxsync::metrics::{get_metrics_string, GLOBAL_METRICS};
use oxsync::store::{InstructionStore, MemoryInstructionStore, NewCacheInstruction};
use oxsync::{
    InstructionIds, MessageType, RefreshInstruction, RefresherRegistry, ServerMessenger,
    SyncEngine,
};
use serial_test::serial;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn test_config() -> MessengerConfig {
    MessengerConfig {
        throttle_seconds: 0,
        prune_enabled: false,
        ..Default::default()
    }
}

fn node(
    store: &MemoryInstructionStore,
    refresher_id: Uuid,
    config: MessengerConfig,
) -> (ServerMessenger, Arc<RecordingRefresher>) {
    let refresher = RecordingRefresher::with_id(refresher_id);
    let registry = RefresherRegistry::new();
    registry.register(refresher.clone());

    let messenger = ServerMessenger::new(
        SyncEngine::new(Arc::new(store.clone())),
        registry,
        config,
    )
    .with_identity(common::unique_identity("node"));
    (messenger, refresher)
}

fn old_row(count: i32) -> NewCacheInstruction {
    NewCacheInstruction {
        utc_stamp: Utc::now() - ChronoDuration::days(10),
        instructions: "[]".to_string(),
        origin_identity: "node-z".to_string(),
        instruction_count: count,
    }
}

fn marker_config(path: PathBuf) -> MessengerConfig {
    MessengerConfig {
        last_synced_path: Some(path),
        ..test_config()
    }
}

/// 测试一个节点的指令在本地执行并被其他节点同步执行
#[tokio::test]
async fn test_perform_is_replayed_on_other_nodes() {
    common::setup_logging();
    let store = MemoryInstructionStore::new();
    let r = Uuid::new_v4();
    let (a, a_cache) = node(&store, r, test_config());
    let (b, b_cache) = node(&store, r, test_config());
    a.boot().await.unwrap();
    b.boot().await.unwrap();

    let ids = a
        .perform(&[RefreshInstruction::refresh_by_id(r, 1)])
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);
    assert_eq!(a_cache.calls(), vec!["id:1"]);
    assert!(b_cache.calls().is_empty());

    let outcome = b.sync().await.unwrap().unwrap();
    assert_eq!(outcome.applied, 1);
    assert_eq!(b_cache.calls(), vec!["id:1"]);
    assert_eq!(b.last_id().await, Some(ids[0]));

    // 自己写入的批次只推进不执行
    let outcome = a.sync().await.unwrap().unwrap();
    assert_eq!(outcome.skipped_local, 1);
    assert_eq!(a_cache.calls(), vec!["id:1"]);
    assert_eq!(a.last_id().await, Some(ids[0]));
}

/// 测试刷新器调用被转换为指令后执行
#[tokio::test]
async fn test_perform_message() {
    let store = MemoryInstructionStore::new();
    let r = Uuid::new_v4();
    let (a, a_cache) = node(&store, r, test_config());
    a.boot().await.unwrap();

    a.perform_message(
        r,
        MessageType::RemoveById,
        Some(InstructionIds::Int(vec![4, 5])),
        None,
    )
    .await
    .unwrap();
    assert_eq!(a_cache.calls(), vec!["remove:4", "remove:5"]);

    let records = store.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].instruction_count, 2);

    assert!(a
        .perform_message(
            r,
            MessageType::RemoveById,
            Some(InstructionIds::Guid(vec![Uuid::new_v4()])),
            None,
        )
        .await
        .is_err());
}

/// 测试未启动或关闭分布式时指令只在本地执行
#[tokio::test]
async fn test_local_only_delivery() {
    let store = MemoryInstructionStore::new();
    let r = Uuid::new_v4();

    let (not_booted, cache) = node(&store, r, test_config());
    not_booted
        .perform(&[RefreshInstruction::refresh_all(r)])
        .await
        .unwrap();
    assert_eq!(cache.calls(), vec!["all"]);

    let (local, _) = node(
        &store,
        r,
        MessengerConfig {
            distributed_enabled: false,
            ..test_config()
        },
    );
    local.boot().await.unwrap();
    local
        .perform(&[RefreshInstruction::refresh_all(r)])
        .await
        .unwrap();

    assert!(store.records().await.is_empty());
}

/// 测试本地执行失败时不写入存储
#[tokio::test]
async fn test_local_failure_is_not_broadcast() {
    let store = MemoryInstructionStore::new();
    let (a, _) = node(&store, Uuid::new_v4(), test_config());
    a.boot().await.unwrap();

    let result = a
        .perform(&[RefreshInstruction::refresh_all(Uuid::new_v4())])
        .await;
    assert!(result.is_err());
    assert!(store.records().await.is_empty());
}

/// 测试启动后的首次同步立即执行，之后在节流间隔内跳过
#[tokio::test]
async fn test_sync_is_throttled_after_first_run() {
    let store = MemoryInstructionStore::new();
    let (m, _) = node(
        &store,
        Uuid::new_v4(),
        MessengerConfig {
            throttle_seconds: 60,
            ..test_config()
        },
    );
    m.boot().await.unwrap();

    assert!(m.sync().await.unwrap().is_some());
    assert!(m.sync().await.unwrap().is_none());
}

/// 测试最后同步 ID 持久化后重启不需要冷启动
#[tokio::test]
async fn test_marker_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sync").join("lastsynced.txt");
    let store = MemoryInstructionStore::new();
    let r = Uuid::new_v4();

    let (writer, _) = node(&store, r, test_config());
    writer.boot().await.unwrap();

    let (reader, _) = node(&store, r, marker_config(path.clone()));
    let first = reader.boot().await.unwrap();
    assert!(first.cold_boot);
    assert_eq!(first.last_id, 0);

    let ids = writer
        .perform(&[RefreshInstruction::refresh_by_id(r, 1)])
        .await
        .unwrap();
    reader.sync().await.unwrap();
    assert_eq!(
        tokio::fs::read_to_string(&path).await.unwrap(),
        ids[0].to_string()
    );

    let (restarted, _) = node(&store, r, marker_config(path));
    let outcome = restarted.boot().await.unwrap();
    assert!(!outcome.cold_boot);
    assert_eq!(outcome.last_id, ids[0]);
}

/// 测试积压过多时冷启动，并先记录最大 ID 再执行回调
#[tokio::test]
async fn test_cold_boot_when_backlog_is_too_large() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lastsynced.txt");
    let store = MemoryInstructionStore::new();
    let ids = store
        .insert_all(vec![old_row(1), old_row(4), old_row(4)])
        .await
        .unwrap();
    tokio::fs::write(&path, ids[0].to_string()).await.unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let (m, _) = node(
        &store,
        Uuid::new_v4(),
        MessengerConfig {
            max_processing_instruction_count: 7,
            ..marker_config(path.clone())
        },
    );
    let m = m.with_cold_boot_callback(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let outcome = m.boot().await.unwrap();
    assert!(outcome.cold_boot);
    assert_eq!(outcome.last_id, ids[2]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        tokio::fs::read_to_string(&path).await.unwrap(),
        ids[2].to_string()
    );

    // 积压未超过上限时增量同步
    tokio::fs::write(&path, ids[0].to_string()).await.unwrap();
    let (warm, _) = node(&store, Uuid::new_v4(), marker_config(path));
    assert!(!warm.boot().await.unwrap().cold_boot);
}

/// 测试最后同步 ID 对应的批次已不存在时冷启动
#[tokio::test]
async fn test_cold_boot_when_marker_is_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lastsynced.txt");
    let store = MemoryInstructionStore::new();
    store.insert_all(vec![old_row(1)]).await.unwrap();
    tokio::fs::write(&path, "999").await.unwrap();

    let (m, _) = node(&store, Uuid::new_v4(), marker_config(path));
    let outcome = m.boot().await.unwrap();
    assert!(outcome.cold_boot);
    assert_eq!(outcome.last_id, 1);
}

/// 测试同步时清理过期指令
#[tokio::test]
async fn test_sync_prunes_expired_instructions() {
    let store = MemoryInstructionStore::new();
    store
        .insert_all(vec![old_row(1), old_row(1), old_row(1)])
        .await
        .unwrap();

    let (m, _) = node(
        &store,
        Uuid::new_v4(),
        MessengerConfig {
            prune_enabled: true,
            ..test_config()
        },
    );
    m.boot().await.unwrap();
    m.sync().await.unwrap();

    let records = store.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, 3);
}

/// 测试后台同步任务在释放后退出
#[tokio::test]
async fn test_run_loop_until_release() {
    common::setup_logging();
    let store = MemoryInstructionStore::new();
    let r = Uuid::new_v4();
    let (a, _) = node(&store, r, test_config());
    let (b, b_cache) = node(&store, r, test_config());
    a.boot().await.unwrap();
    b.boot().await.unwrap();

    let b = Arc::new(b);
    let handle = b.clone().run(Duration::from_millis(10));

    a.perform(&[RefreshInstruction::refresh_by_json(r, "{\"id\":1}")])
        .await
        .unwrap();

    let mut waited = 0;
    while b_cache.calls().is_empty() && waited < 200 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    }
    assert_eq!(b_cache.calls(), vec!["json:{\"id\":1}"]);

    b.release().await;
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("run loop did not stop")
        .unwrap();
    assert!(b.sync().await.unwrap().is_none());
}

/// 测试冷启动和最后同步 ID 指标
#[tokio::test]
#[serial]
async fn test_metrics_are_recorded() {
    let store = MemoryInstructionStore::new();
    store.insert_all(vec![old_row(1)]).await.unwrap();
    let (m, _) = node(&store, Uuid::new_v4(), test_config());
    m.boot().await.unwrap();

    let cold_boots = GLOBAL_METRICS
        .cold_boots
        .lock()
        .unwrap()
        .get(m.identity())
        .copied();
    assert_eq!(cold_boots, Some(1));

    let text = get_metrics_string();
    assert!(text.contains(&format!(
        "sync_last_synced_id{{node=\"{}\"}} 1",
        m.identity()
    )));
}
