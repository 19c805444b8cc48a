//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 同步引擎：写入指令批次、冷启动判断以及读取并重放其他节点的指令。
//!
//! 引擎本身不保存最后同步 ID，由调用方传入并保存返回值。
//! `process_instructions` 不能在同一节点上并发调用，调用方负责串行化。

use super::dispatch::{dispatch_batch, BatchDispatch, ProcessedSet};
use crate::error::{Result, SyncError};
use crate::instruction::{decode_payload, encode_payload, total_count, RefreshInstruction};
use crate::metrics::GLOBAL_METRICS;
use crate::refresher::RefresherRegistry;
use crate::store::{InstructionStore, NewCacheInstruction};
use crate::utils::redaction::truncate_payload;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// 每次同步默认最多读取的批次数
pub const DEFAULT_FETCH_LIMIT: u64 = 100;

/// 来源身份的最大长度，与存储列宽一致
pub const MAX_ORIGIN_IDENTITY_LEN: usize = 500;

/// 一次同步的处理结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// 读取到的批次数
    pub fetched: usize,
    /// 已处理（含跳过）并推进了最后同步 ID 的批次数
    pub processed: usize,
    /// 新的最后同步 ID，不小于传入值
    pub last_id: i64,
    /// 成功执行的批次数
    pub applied: usize,
    /// 本节点写入而跳过的批次数
    pub skipped_local: usize,
    /// 载荷无法解析而跳过的批次数
    pub skipped_malformed: usize,
    /// 执行出错而跳过的批次数
    pub failed: usize,
    /// 是否因取消而提前结束
    pub cancelled: bool,
}

impl ProcessOutcome {
    fn advance(&mut self, id: i64) {
        self.last_id = self.last_id.max(id);
        self.processed += 1;
    }
}

/// 同步引擎
#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<dyn InstructionStore>,
    fetch_limit: u64,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn InstructionStore>) -> Self {
        Self {
            store,
            fetch_limit: DEFAULT_FETCH_LIMIT,
        }
    }

    /// 设置每次同步最多读取的批次数（至少为 1）
    pub fn with_fetch_limit(mut self, fetch_limit: u64) -> Self {
        self.fetch_limit = fetch_limit.max(1);
        self
    }

    pub fn fetch_limit(&self) -> u64 {
        self.fetch_limit
    }

    pub fn store(&self) -> &Arc<dyn InstructionStore> {
        &self.store
    }

    fn build_record(
        instructions: &[RefreshInstruction],
        origin_identity: &str,
    ) -> Result<NewCacheInstruction> {
        let count = i32::try_from(total_count(instructions)).map_err(|_| {
            SyncError::InvalidArgument("instruction count does not fit the batch".to_string())
        })?;

        Ok(NewCacheInstruction {
            utc_stamp: Utc::now(),
            instructions: encode_payload(instructions)?,
            origin_identity: origin_identity.to_string(),
            instruction_count: count,
        })
    }

    fn check_origin(origin_identity: &str) -> Result<()> {
        if origin_identity.is_empty() || origin_identity.len() > MAX_ORIGIN_IDENTITY_LEN {
            return Err(SyncError::InvalidArgument(format!(
                "origin identity must be between 1 and {} bytes",
                MAX_ORIGIN_IDENTITY_LEN
            )));
        }
        Ok(())
    }

    /// 将全部指令作为一个批次写入存储
    ///
    /// 返回新批次的 ID；指令为空时不写入，返回 None。
    #[instrument(skip(self, instructions), level = "debug", fields(count = instructions.len()))]
    pub async fn deliver_instructions(
        &self,
        instructions: &[RefreshInstruction],
        origin_identity: &str,
    ) -> Result<Option<i64>> {
        Self::check_origin(origin_identity)?;
        if instructions.is_empty() {
            debug!("没有需要写入的指令");
            return Ok(None);
        }

        let record = Self::build_record(instructions, origin_identity)?;
        let logical = record.instruction_count as u64;
        let ids = self.store.insert_all(vec![record]).await?;
        GLOBAL_METRICS.record_delivery(origin_identity, 1, logical);
        Ok(ids.first().copied())
    }

    /// 按每批最多 `max_per_batch` 条指令拆分后写入
    ///
    /// 所有批次在同一个事务中插入。返回新批次的 ID，按写入顺序。
    #[instrument(skip(self, instructions), level = "debug", fields(count = instructions.len()))]
    pub async fn deliver_instructions_in_batches(
        &self,
        instructions: &[RefreshInstruction],
        origin_identity: &str,
        max_per_batch: usize,
    ) -> Result<Vec<i64>> {
        Self::check_origin(origin_identity)?;
        if max_per_batch == 0 {
            return Err(SyncError::InvalidArgument(
                "max_per_batch must be greater than zero".to_string(),
            ));
        }

        let records = instructions
            .chunks(max_per_batch)
            .map(|chunk| Self::build_record(chunk, origin_identity))
            .collect::<Result<Vec<_>>>()?;
        if records.is_empty() {
            debug!("没有需要写入的指令");
            return Ok(Vec::new());
        }

        let batches = records.len() as u64;
        let logical: u64 = records.iter().map(|r| r.instruction_count as u64).sum();
        let ids = self.store.insert_all(records).await?;
        GLOBAL_METRICS.record_delivery(origin_identity, batches, logical);
        debug!("写入 {} 个指令批次，共 {} 条指令", batches, logical);
        Ok(ids)
    }

    /// 判断是否需要冷启动
    ///
    /// `last_id <= 0`（从未同步）时，只要存储中存在任何批次就需要冷启动；
    /// 否则当该 ID 的批次已不存在（被清理或从未存在）时需要冷启动。
    pub async fn is_cold_boot_required(&self, last_id: i64) -> Result<bool> {
        if last_id <= 0 {
            let count = self.store.count_all().await?;
            Ok(count > 0)
        } else {
            let exists = self.store.exists_by_id(last_id).await?;
            Ok(!exists)
        }
    }

    /// ID 大于 `last_id` 的批次的指令总数是否超过 `limit`
    pub async fn is_instruction_count_over_limit(&self, last_id: i64, limit: i64) -> Result<bool> {
        let count = self.store.sum_instruction_count_after(last_id).await?;
        Ok(count > limit)
    }

    /// 当前最大的批次 ID，存储为空时为 0
    pub async fn get_max_instruction_id(&self) -> Result<i64> {
        self.store.max_id().await
    }

    /// 删除超过保留天数的批次，最新一行始终保留
    pub async fn prune_instructions(&self, days_to_retain: u32) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(days_to_retain as i64);
        self.store.prune_before(cutoff).await
    }

    /// 读取并执行其他节点写入的指令
    ///
    /// 读取 ID 大于 `last_id` 的最早若干批次（最多 `fetch_limit` 个），按 ID 升序处理：
    ///
    /// - 本节点写入的批次：直接跳过并推进；
    /// - 载荷无法解析：记录错误、跳过并推进；
    /// - 执行出错：记录错误、跳过并推进，批次可能只执行了一部分；
    /// - 取消：立即停止，当前批次不推进，下次同步时重新处理。
    ///
    /// 存储读取错误直接返回，最后同步 ID 不变。
    #[instrument(skip(self, registry, cancel), level = "debug")]
    pub async fn process_instructions(
        &self,
        registry: &RefresherRegistry,
        cancel: &CancellationToken,
        local_identity: &str,
        last_id: i64,
    ) -> Result<ProcessOutcome> {
        let records = self.store.fetch_pending(last_id, self.fetch_limit).await?;
        let mut outcome = ProcessOutcome {
            fetched: records.len(),
            last_id,
            ..Default::default()
        };
        let mut processed = ProcessedSet::new();

        for record in records {
            if cancel.is_cancelled() {
                info!("同步已取消，批次 {} 及之后的批次将在下次同步时处理", record.id);
                outcome.cancelled = true;
                break;
            }

            if record.origin_identity == local_identity {
                outcome.skipped_local += 1;
                outcome.advance(record.id);
                continue;
            }

            let instructions = match decode_payload(&record.instructions) {
                Ok(instructions) => instructions,
                Err(e) => {
                    error!(
                        "Failed to deserialize instructions ({}: '{}'): {}",
                        record.id,
                        truncate_payload(&record.instructions),
                        e
                    );
                    outcome.skipped_malformed += 1;
                    outcome.advance(record.id);
                    continue;
                }
            };

            let (dispatch, set) = dispatch_batch(registry, instructions, processed, cancel).await;
            processed = set;

            match dispatch {
                BatchDispatch::Completed {
                    applied,
                    duplicates,
                } => {
                    debug!(
                        "批次 {} 执行完成: applied={}, duplicates={}",
                        record.id, applied, duplicates
                    );
                    outcome.applied += 1;
                    outcome.advance(record.id);
                }
                BatchDispatch::Cancelled { applied } => {
                    info!(
                        "批次 {} 未完整执行（已执行 {} 条），同步已取消",
                        record.id, applied
                    );
                    outcome.cancelled = true;
                    break;
                }
                BatchDispatch::Failed { applied, error } => {
                    error!(
                        "DISTRIBUTED CACHE IS NOT UPDATED. Failed to execute instructions ({}: '{}'), {} applied before the failure. Instruction is being skipped: {}",
                        record.id,
                        truncate_payload(&record.instructions),
                        applied,
                        error
                    );
                    outcome.failed += 1;
                    outcome.advance(record.id);
                }
            }
        }

        GLOBAL_METRICS.record_processed(local_identity, "applied", outcome.applied as u64);
        GLOBAL_METRICS.record_processed(local_identity, "local", outcome.skipped_local as u64);
        GLOBAL_METRICS.record_processed(
            local_identity,
            "malformed",
            outcome.skipped_malformed as u64,
        );
        GLOBAL_METRICS.record_processed(local_identity, "failed", outcome.failed as u64);

        debug!(
            "同步完成: fetched={}, processed={}, last_id={}",
            outcome.fetched, outcome.processed, outcome.last_id
        );
        Ok(outcome)
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("fetch_limit", &self.fetch_limit)
            .finish()
    }
}
