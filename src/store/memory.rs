//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 内存指令存储，用于单进程部署和测试。

use super::{CacheInstructionRecord, InstructionStore, NewCacheInstruction};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MemoryState {
    rows: Vec<CacheInstructionRecord>,
    last_id: i64,
}

/// 内存指令存储
///
/// 克隆出的实例共享同一份数据，可模拟多个节点共用一个存储。
#[derive(Debug, Clone, Default)]
pub struct MemoryInstructionStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryInstructionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前所有批次的快照，按 ID 升序
    pub async fn records(&self) -> Vec<CacheInstructionRecord> {
        self.state.read().await.rows.clone()
    }
}

#[async_trait]
impl InstructionStore for MemoryInstructionStore {
    async fn count_all(&self) -> Result<i64> {
        Ok(self.state.read().await.rows.len() as i64)
    }

    async fn exists_by_id(&self, id: i64) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.rows.binary_search_by_key(&id, |r| r.id).is_ok())
    }

    async fn max_id(&self) -> Result<i64> {
        Ok(self.state.read().await.rows.last().map_or(0, |r| r.id))
    }

    async fn sum_instruction_count_after(&self, after_id: i64) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state
            .rows
            .iter()
            .filter(|r| r.id > after_id)
            .map(|r| r.instruction_count as i64)
            .sum())
    }

    async fn insert_all(&self, records: Vec<NewCacheInstruction>) -> Result<Vec<i64>> {
        // 整个写锁期间完成插入，读者只能看到全部或没有
        let mut state = self.state.write().await;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            state.last_id += 1;
            let id = state.last_id;
            state.rows.push(CacheInstructionRecord {
                id,
                utc_stamp: record.utc_stamp,
                instructions: record.instructions,
                origin_identity: record.origin_identity,
                instruction_count: record.instruction_count,
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn fetch_pending(
        &self,
        after_id: i64,
        limit: u64,
    ) -> Result<Vec<CacheInstructionRecord>> {
        let state = self.state.read().await;
        Ok(state
            .rows
            .iter()
            .filter(|r| r.id > after_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn prune_before(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let max_id = state.rows.last().map_or(0, |r| r.id);
        let len_before = state.rows.len();
        state
            .rows
            .retain(|r| r.id >= max_id || r.utc_stamp >= before);
        Ok((len_before - state.rows.len()) as u64)
    }
}
