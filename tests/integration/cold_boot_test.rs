//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 冷启动判断集成测试

#[path = "../common/mod.rs"]
mod common;

use chrono::{Duration, Utc};
use oxsync::store::{InstructionStore, MemoryInstructionStore, NewCacheInstruction};
use oxsync::SyncEngine;
use std::sync::Arc;

fn row(days_old: i64, count: i32) -> NewCacheInstruction {
    NewCacheInstruction {
        utc_stamp: Utc::now() - Duration::days(days_old),
        instructions: "[]".to_string(),
        origin_identity: "node-a".to_string(),
        instruction_count: count,
    }
}

fn engine() -> (MemoryInstructionStore, SyncEngine) {
    common::setup_logging();
    let store = MemoryInstructionStore::new();
    (store.clone(), SyncEngine::new(Arc::new(store)))
}

/// 测试从未同步的节点：存储为空时不需要冷启动，有历史批次时需要
#[tokio::test]
async fn test_never_synced_node() {
    let (store, engine) = engine();
    assert!(!engine.is_cold_boot_required(0).await.unwrap());

    store.insert_all(vec![row(0, 1)]).await.unwrap();
    assert!(engine.is_cold_boot_required(0).await.unwrap());
    assert!(engine.is_cold_boot_required(-1).await.unwrap());
}

/// 测试最后同步 ID 对应的批次被清理后需要冷启动
#[tokio::test]
async fn test_pruned_marker_requires_cold_boot() {
    let (store, engine) = engine();
    let ids = store
        .insert_all(vec![row(10, 1), row(10, 1), row(0, 1)])
        .await
        .unwrap();

    assert!(!engine.is_cold_boot_required(ids[0]).await.unwrap());
    assert!(engine.is_cold_boot_required(ids[2] + 1).await.unwrap());

    let pruned = engine.prune_instructions(2).await.unwrap();
    assert_eq!(pruned, 2);
    assert!(engine.is_cold_boot_required(ids[0]).await.unwrap());
    assert!(!engine.is_cold_boot_required(ids[2]).await.unwrap());
}

/// 测试清理始终保留最新的一行
#[tokio::test]
async fn test_prune_keeps_newest_row() {
    let (store, engine) = engine();
    let ids = store
        .insert_all(vec![row(30, 1), row(20, 1)])
        .await
        .unwrap();

    assert_eq!(engine.prune_instructions(1).await.unwrap(), 1);
    assert_eq!(engine.get_max_instruction_id().await.unwrap(), ids[1]);
    assert!(!engine.is_cold_boot_required(ids[1]).await.unwrap());
}

/// 测试积压指令数超过上限的判断
#[tokio::test]
async fn test_instruction_count_over_limit() {
    let (store, engine) = engine();
    let ids = store
        .insert_all(vec![row(0, 600), row(0, 300), row(0, 200)])
        .await
        .unwrap();

    assert!(engine
        .is_instruction_count_over_limit(0, 1000)
        .await
        .unwrap());
    assert!(!engine
        .is_instruction_count_over_limit(ids[0], 1000)
        .await
        .unwrap());
    assert!(!engine
        .is_instruction_count_over_limit(ids[0], 500)
        .await
        .unwrap());
    assert!(engine
        .is_instruction_count_over_limit(ids[0], 499)
        .await
        .unwrap());
    assert!(!engine
        .is_instruction_count_over_limit(ids[2], 0)
        .await
        .unwrap());
}

/// 测试最大批次 ID
#[tokio::test]
async fn test_max_instruction_id() {
    let (store, engine) = engine();
    assert_eq!(engine.get_max_instruction_id().await.unwrap(), 0);

    let ids = store.insert_all(vec![row(0, 1), row(0, 1)]).await.unwrap();
    assert_eq!(engine.get_max_instruction_id().await.unwrap(), ids[1]);
}
