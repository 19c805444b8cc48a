//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存刷新指令：指令类型、载荷以及从刷新器调用构建指令的逻辑。

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod wire;

pub use wire::{decode_payload, encode_payload, flatten_payload, WireInstruction};

/// 刷新类型（线上格式中的 `refreshType` 字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefreshType {
    RefreshAll,
    RefreshByGuid,
    RefreshById,
    RefreshByIds,
    RefreshByJson,
    RemoveById,
}

/// 刷新方法
///
/// 每个变体只携带该刷新类型需要的载荷。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RefreshMethod {
    /// 刷新整个缓存
    RefreshAll,
    /// 按 GUID 刷新
    RefreshByGuid(Uuid),
    /// 按整数 ID 刷新
    RefreshById(i32),
    /// 按整数 ID 列表刷新，按列表顺序逐个调用
    RefreshByIds(Vec<i32>),
    /// 按不透明 JSON 载荷刷新，仅支持 JSON 的刷新器可处理
    RefreshByJson(String),
    /// 按整数 ID 移除
    RemoveById(i32),
}

impl RefreshMethod {
    pub fn refresh_type(&self) -> RefreshType {
        match self {
            RefreshMethod::RefreshAll => RefreshType::RefreshAll,
            RefreshMethod::RefreshByGuid(_) => RefreshType::RefreshByGuid,
            RefreshMethod::RefreshById(_) => RefreshType::RefreshById,
            RefreshMethod::RefreshByIds(_) => RefreshType::RefreshByIds,
            RefreshMethod::RefreshByJson(_) => RefreshType::RefreshByJson,
            RefreshMethod::RemoveById(_) => RefreshType::RemoveById,
        }
    }

    /// 逻辑指令数：ID 列表为列表长度，其余为 1
    pub fn count(&self) -> usize {
        match self {
            RefreshMethod::RefreshByIds(ids) => ids.len(),
            _ => 1,
        }
    }
}

/// 缓存刷新指令
///
/// 指令从不单独持久化，总是作为批次载荷的一部分写入存储。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefreshInstruction {
    /// 目标刷新器 ID
    pub refresher_id: Uuid,
    /// 刷新方法及其载荷
    pub method: RefreshMethod,
}

/// 刷新器调用的消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    RefreshAll,
    RefreshById,
    RemoveById,
    RefreshByJson,
}

/// 一次刷新器调用携带的 ID 集合，所有 ID 类型必须一致
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionIds {
    Int(Vec<i32>),
    Guid(Vec<Uuid>),
}

impl RefreshInstruction {
    pub fn new(refresher_id: Uuid, method: RefreshMethod) -> Self {
        Self {
            refresher_id,
            method,
        }
    }

    pub fn refresh_all(refresher_id: Uuid) -> Self {
        Self::new(refresher_id, RefreshMethod::RefreshAll)
    }

    pub fn refresh_by_id(refresher_id: Uuid, id: i32) -> Self {
        Self::new(refresher_id, RefreshMethod::RefreshById(id))
    }

    pub fn refresh_by_ids(refresher_id: Uuid, ids: Vec<i32>) -> Self {
        Self::new(refresher_id, RefreshMethod::RefreshByIds(ids))
    }

    pub fn refresh_by_guid(refresher_id: Uuid, id: Uuid) -> Self {
        Self::new(refresher_id, RefreshMethod::RefreshByGuid(id))
    }

    pub fn refresh_by_json(refresher_id: Uuid, payload: impl Into<String>) -> Self {
        Self::new(refresher_id, RefreshMethod::RefreshByJson(payload.into()))
    }

    pub fn remove_by_id(refresher_id: Uuid, id: i32) -> Self {
        Self::new(refresher_id, RefreshMethod::RemoveById(id))
    }

    pub fn refresh_type(&self) -> RefreshType {
        self.method.refresh_type()
    }

    /// 逻辑指令数，用于计算批次的 instruction_count
    pub fn count(&self) -> usize {
        self.method.count()
    }

    /// 将一次刷新器调用转换为指令列表
    ///
    /// 整数 ID 的刷新支持批量（多个 ID 合并为一条 `RefreshByIds`），
    /// GUID 刷新和按 ID 移除则每个 ID 生成一条指令。GUID 不支持移除。
    ///
    /// # 参数
    ///
    /// * `refresher_id` - 刷新器 ID
    /// * `message_type` - 消息类型
    /// * `ids` - ID 集合，`RefreshById` / `RemoveById` 必填
    /// * `json` - JSON 载荷，`RefreshByJson` 必填
    pub fn from_message(
        refresher_id: Uuid,
        message_type: MessageType,
        ids: Option<InstructionIds>,
        json: Option<&str>,
    ) -> Result<Vec<RefreshInstruction>> {
        match message_type {
            MessageType::RefreshAll => Ok(vec![Self::refresh_all(refresher_id)]),
            MessageType::RefreshByJson => {
                let payload = json.ok_or_else(|| {
                    SyncError::InvalidArgument("RefreshByJson requires a json payload".to_string())
                })?;
                Ok(vec![Self::refresh_by_json(refresher_id, payload)])
            }
            MessageType::RefreshById => match ids {
                Some(InstructionIds::Int(ids)) if ids.len() == 1 => {
                    Ok(vec![Self::refresh_by_id(refresher_id, ids[0])])
                }
                Some(InstructionIds::Int(ids)) if !ids.is_empty() => {
                    Ok(vec![Self::refresh_by_ids(refresher_id, ids)])
                }
                Some(InstructionIds::Guid(ids)) if !ids.is_empty() => Ok(ids
                    .into_iter()
                    .map(|id| Self::refresh_by_guid(refresher_id, id))
                    .collect()),
                _ => Err(SyncError::InvalidArgument(
                    "RefreshById requires at least one id".to_string(),
                )),
            },
            MessageType::RemoveById => match ids {
                Some(InstructionIds::Int(ids)) if !ids.is_empty() => Ok(ids
                    .into_iter()
                    .map(|id| Self::remove_by_id(refresher_id, id))
                    .collect()),
                Some(InstructionIds::Guid(_)) => Err(SyncError::InvalidArgument(
                    "RemoveById does not support guid ids".to_string(),
                )),
                _ => Err(SyncError::InvalidArgument(
                    "RemoveById requires at least one id".to_string(),
                )),
            },
        }
    }
}

/// 计算一组指令的逻辑指令总数
pub fn total_count(instructions: &[RefreshInstruction]) -> usize {
    instructions.iter().map(RefreshInstruction::count).sum()
}
