//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 指令存储：只追加的缓存指令批次表。
//!
//! 存储是各节点之间唯一共享的可变资源。同步核心只插入和读取行，
//! 从不更新；删除只发生在显式的过期清理中。

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[cfg(test)]
use mockall::automock;

pub mod connection;
pub mod memory;
pub mod sql;

pub use memory::MemoryInstructionStore;
pub use sql::SqlInstructionStore;

/// 已持久化的指令批次
#[derive(Debug, Clone, PartialEq)]
pub struct CacheInstructionRecord {
    /// 存储分配的单调递增 ID，永不复用
    pub id: i64,
    /// UTC 创建时间
    pub utc_stamp: DateTime<Utc>,
    /// 序列化的指令载荷
    pub instructions: String,
    /// 写入节点的身份标识
    pub origin_identity: String,
    /// 载荷中逻辑指令的总数
    pub instruction_count: i32,
}

/// 待插入的指令批次
#[derive(Debug, Clone, PartialEq)]
pub struct NewCacheInstruction {
    pub utc_stamp: DateTime<Utc>,
    pub instructions: String,
    pub origin_identity: String,
    pub instruction_count: i32,
}

/// 指令存储接口
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InstructionStore: Send + Sync {
    /// 批次总数
    async fn count_all(&self) -> Result<i64>;

    /// 指定 ID 的批次是否存在
    async fn exists_by_id(&self, id: i64) -> Result<bool>;

    /// 最大批次 ID，表为空时返回 0
    async fn max_id(&self) -> Result<i64>;

    /// ID 大于 `after_id` 的批次的 instruction_count 之和
    async fn sum_instruction_count_after(&self, after_id: i64) -> Result<i64>;

    /// 在同一个事务中插入所有批次，要么全部可见要么全部不可见
    ///
    /// 返回按插入顺序分配的 ID。
    async fn insert_all(&self, records: Vec<NewCacheInstruction>) -> Result<Vec<i64>>;

    /// 读取 ID 大于 `after_id` 的批次，按 ID 升序，最多 `limit` 条
    async fn fetch_pending(&self, after_id: i64, limit: u64)
        -> Result<Vec<CacheInstructionRecord>>;

    /// 删除早于 `before` 的批次，但始终保留 ID 最大的一行
    ///
    /// 返回删除的行数。
    async fn prune_before(&self, before: DateTime<Utc>) -> Result<u64>;
}
