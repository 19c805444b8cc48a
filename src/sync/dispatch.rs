//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 将刷新指令分发给已注册的缓存刷新器。

use crate::error::{Result, SyncError};
use crate::instruction::{RefreshInstruction, RefreshMethod};
use crate::refresher::RefresherRegistry;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// 本次同步中已执行过的指令集合
pub type ProcessedSet = HashSet<RefreshInstruction>;

/// 单个批次的分发结果
#[derive(Debug)]
pub enum BatchDispatch {
    /// 所有指令都已执行（或此前已执行过）
    Completed { applied: usize, duplicates: usize },
    /// 分发过程中收到取消请求，批次未完整执行
    Cancelled { applied: usize },
    /// 某条指令执行失败，其后的指令未执行
    Failed { applied: usize, error: SyncError },
}

/// 执行单条指令
///
/// 刷新器不存在或不支持 JSON 刷新时返回错误；不做重试。
pub async fn dispatch_instruction(
    registry: &RefresherRegistry,
    instruction: &RefreshInstruction,
) -> Result<()> {
    let refresher = registry
        .resolve(&instruction.refresher_id)
        .ok_or(SyncError::RefresherNotFound(instruction.refresher_id))?;

    trace!(
        "分发指令: refresher={} type={:?}",
        refresher.name(),
        instruction.refresh_type()
    );

    match &instruction.method {
        RefreshMethod::RefreshAll => refresher.refresh_all().await,
        RefreshMethod::RefreshByGuid(id) => refresher.refresh_guid(*id).await,
        RefreshMethod::RefreshById(id) => refresher.refresh_id(*id).await,
        RefreshMethod::RefreshByIds(ids) => {
            for id in ids {
                refresher.refresh_id(*id).await?;
            }
            Ok(())
        }
        RefreshMethod::RefreshByJson(payload) => {
            let json_refresher = refresher
                .as_json_refresher()
                .ok_or(SyncError::JsonRefreshNotSupported(instruction.refresher_id))?;
            json_refresher.refresh_json(payload).await
        }
        RefreshMethod::RemoveById(id) => refresher.remove(*id).await,
    }
}

/// 分发一个批次的全部指令
///
/// `processed` 记录本次同步中已执行过的指令，重复出现的指令会被跳过。
/// 集合随结果一起返回，调用方把它传给下一个批次。
/// 取消请求在每条指令执行前检查。
pub async fn dispatch_batch(
    registry: &RefresherRegistry,
    instructions: Vec<RefreshInstruction>,
    mut processed: ProcessedSet,
    cancel: &CancellationToken,
) -> (BatchDispatch, ProcessedSet) {
    let mut applied = 0usize;
    let mut duplicates = 0usize;

    for instruction in instructions {
        if cancel.is_cancelled() {
            return (BatchDispatch::Cancelled { applied }, processed);
        }

        if processed.contains(&instruction) {
            duplicates += 1;
            continue;
        }

        if let Err(error) = dispatch_instruction(registry, &instruction).await {
            return (BatchDispatch::Failed { applied, error }, processed);
        }

        processed.insert(instruction);
        applied += 1;
    }

    (
        BatchDispatch::Completed {
            applied,
            duplicates,
        },
        processed,
    )
}

/// 在本地依次执行一组指令，遇到第一个错误即返回
pub async fn dispatch_local(
    registry: &RefresherRegistry,
    instructions: &[RefreshInstruction],
) -> Result<()> {
    for instruction in instructions {
        dispatch_instruction(registry, instruction).await?;
    }
    Ok(())
}
