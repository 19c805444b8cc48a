//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 批次载荷的线上格式：JSON 数组，元素为指令对象或嵌套数组。

use super::{RefreshInstruction, RefreshMethod, RefreshType};
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 线上格式的单条指令
///
/// 只有与 `refresh_type` 对应的字段会被序列化，其余字段省略。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireInstruction {
    pub refresher_id: Uuid,
    pub refresh_type: RefreshType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub int_id: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid_id: Option<Uuid>,
    /// 字符串编码的整数数组，例如 `"[1,2,3]"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_ids: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_payload: Option<String>,
}

impl WireInstruction {
    fn empty(refresher_id: Uuid, refresh_type: RefreshType) -> Self {
        Self {
            refresher_id,
            refresh_type,
            int_id: None,
            guid_id: None,
            json_ids: None,
            json_payload: None,
        }
    }
}

impl TryFrom<&RefreshInstruction> for WireInstruction {
    type Error = SyncError;

    fn try_from(instruction: &RefreshInstruction) -> Result<Self> {
        let mut wire = Self::empty(instruction.refresher_id, instruction.refresh_type());
        match &instruction.method {
            RefreshMethod::RefreshAll => {}
            RefreshMethod::RefreshByGuid(id) => wire.guid_id = Some(*id),
            RefreshMethod::RefreshById(id) | RefreshMethod::RemoveById(id) => {
                // 默认值省略以节省空间
                if *id != 0 {
                    wire.int_id = Some(*id);
                }
            }
            RefreshMethod::RefreshByIds(ids) => wire.json_ids = Some(serde_json::to_string(ids)?),
            RefreshMethod::RefreshByJson(payload) => wire.json_payload = Some(payload.clone()),
        }
        Ok(wire)
    }
}

impl TryFrom<WireInstruction> for RefreshInstruction {
    type Error = SyncError;

    /// 缺省字段按默认值处理（0、空 GUID、空列表、空字符串）
    fn try_from(wire: WireInstruction) -> Result<Self> {
        let method = match wire.refresh_type {
            RefreshType::RefreshAll => RefreshMethod::RefreshAll,
            RefreshType::RefreshByGuid => {
                RefreshMethod::RefreshByGuid(wire.guid_id.unwrap_or_else(Uuid::nil))
            }
            RefreshType::RefreshById => RefreshMethod::RefreshById(wire.int_id.unwrap_or(0)),
            RefreshType::RemoveById => RefreshMethod::RemoveById(wire.int_id.unwrap_or(0)),
            RefreshType::RefreshByIds => {
                let ids = match wire.json_ids.as_deref().map(str::trim) {
                    None | Some("") => Vec::new(),
                    Some(raw) => serde_json::from_str::<Vec<i32>>(raw).map_err(|e| {
                        SyncError::MalformedPayload(format!("invalid jsonIds '{}': {}", raw, e))
                    })?,
                };
                RefreshMethod::RefreshByIds(ids)
            }
            RefreshType::RefreshByJson => {
                RefreshMethod::RefreshByJson(wire.json_payload.unwrap_or_default())
            }
        };
        Ok(RefreshInstruction::new(wire.refresher_id, method))
    }
}

/// 序列化一组指令为批次载荷
pub fn encode_payload(instructions: &[RefreshInstruction]) -> Result<String> {
    let wire = instructions
        .iter()
        .map(WireInstruction::try_from)
        .collect::<Result<Vec<_>>>()?;
    Ok(serde_json::to_string(&wire)?)
}

/// 将任意深度嵌套的 JSON 数组展开为有序的指令对象列表
///
/// 使用显式栈迭代展开，保持文档顺序。顶层必须是数组，
/// 数组元素只能是对象或数组。
pub fn flatten_payload(payload: Value) -> Result<Vec<Value>> {
    let root = match payload {
        Value::Array(items) => items,
        other => {
            return Err(SyncError::MalformedPayload(format!(
                "expected a JSON array, found {}",
                json_kind(&other)
            )))
        }
    };

    let mut flat = Vec::with_capacity(root.len());
    let mut stack = vec![root.into_iter()];
    while let Some(level) = stack.last_mut() {
        match level.next() {
            Some(Value::Array(inner)) => stack.push(inner.into_iter()),
            Some(item @ Value::Object(_)) => flat.push(item),
            Some(other) => {
                return Err(SyncError::MalformedPayload(format!(
                    "expected an instruction object or array, found {}",
                    json_kind(&other)
                )))
            }
            None => {
                stack.pop();
            }
        }
    }
    Ok(flat)
}

/// 解析批次载荷为扁平的指令列表
///
/// 任何一处格式错误都会使整个载荷解析失败。
pub fn decode_payload(payload: &str) -> Result<Vec<RefreshInstruction>> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|e| SyncError::MalformedPayload(format!("invalid JSON: {}", e)))?;

    flatten_payload(value)?
        .into_iter()
        .map(|item| {
            let wire: WireInstruction = serde_json::from_value(item)
                .map_err(|e| SyncError::MalformedPayload(format!("invalid instruction: {}", e)))?;
            RefreshInstruction::try_from(wire)
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
