//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存指令同步系统的错误类型和处理机制。

use thiserror::Error;
use uuid::Uuid;

/// 同步系统错误类型枚举
///
/// 存储层错误向上传播给调用方；载荷和分发错误只影响所在的批次。
#[derive(Error, Debug)]
pub enum SyncError {
    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 指令载荷格式错误（无法解析为刷新指令）
    #[error("Malformed instruction payload: {0}")]
    MalformedPayload(String),

    /// 刷新器不存在
    #[error("Cache refresher with id \"{0}\" does not exist")]
    RefresherNotFound(Uuid),

    /// 刷新器不支持 JSON 载荷刷新
    #[error("Cache refresher with id \"{0}\" does not support JSON refresh")]
    JsonRefreshNotSupported(Uuid),

    /// 刷新器执行失败
    #[error("Refresher error: {0}")]
    RefresherError(String),

    /// 参数错误
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// 数据库连接或查询错误
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Sea-ORM数据库错误
    #[error("Sea-ORM error: {0}")]
    SeaOrmError(#[from] sea_orm::DbErr),

    /// IO错误
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// 同步操作结果类型别名
pub type Result<T> = std::result::Result<T, SyncError>;
