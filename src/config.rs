//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了同步系统的配置结构和解析逻辑。

use crate::error::{Result, SyncError};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_VERSION: u32 = 1;
pub const CONFIG_VERSION_FIELD: &str = "config_version";

/// 默认指令表名
pub const DEFAULT_TABLE_NAME: &str = "cache_instruction";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_version: Option<u32>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub messenger: MessengerConfig,
}

/// 数据库配置
///
/// 定义共享指令存储的连接方式
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 连接字符串（sqlite / mysql / postgresql）
    pub connection_string: SecretString,
    /// 最大连接数
    pub max_connections: u32,
    /// 连接超时时间（毫秒）
    pub connect_timeout_ms: u64,
    /// 指令表名
    pub table_name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection_string: SecretString::new("sqlite::memory:".to_string().into()),
            max_connections: 5,
            connect_timeout_ms: 30000,
            table_name: DEFAULT_TABLE_NAME.to_string(),
        }
    }
}

/// 消息同步配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct MessengerConfig {
    /// 是否向其他节点广播指令
    pub distributed_enabled: bool,
    /// 启动时待处理指令数超过该值则冷启动
    pub max_processing_instruction_count: i64,
    /// 每次同步最多读取的批次数
    pub fetch_limit: u64,
    /// 写入时每个批次最多包含的指令数
    pub max_instructions_per_batch: usize,
    /// 两次同步之间的最小间隔（秒）
    pub throttle_seconds: u64,
    /// 是否由本节点清理过期指令
    pub prune_enabled: bool,
    /// 两次清理之间的最小间隔（秒）
    pub prune_throttle_seconds: u64,
    /// 指令保留天数
    pub days_to_retain_instructions: u32,
    /// 最后同步 ID 的持久化文件，未设置时只保存在内存中
    pub last_synced_path: Option<PathBuf>,
    /// 释放时等待进行中同步的最长时间（毫秒）
    pub release_timeout_ms: u64,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            distributed_enabled: true,
            max_processing_instruction_count: 1000,
            fetch_limit: 100,
            max_instructions_per_batch: 100,
            throttle_seconds: 5,
            prune_enabled: true,
            prune_throttle_seconds: 60,
            days_to_retain_instructions: 2,
            last_synced_path: None,
            release_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// 从 TOML 字符串解析并验证配置
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(s).map_err(|e| SyncError::ConfigError(e.to_string()))?;
        config.validate().map_err(SyncError::ConfigError)?;
        Ok(config)
    }

    /// 从 TOML 文件加载配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::ConfigError(format!("无法读取配置文件 {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// 验证配置
    ///
    /// 检查配置的有效性，确保值在合理范围内
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(version) = &self.config_version {
            if *version > CONFIG_VERSION {
                return Err(format!(
                    "Configuration version {} is not supported. Current version is {}.",
                    version, CONFIG_VERSION
                ));
            }
        }

        let db = &self.database;
        if db.max_connections == 0 || db.max_connections > 100 {
            return Err("database max_connections must be between 1 and 100".to_string());
        }
        if !(100..=120000).contains(&db.connect_timeout_ms) {
            return Err("database connect_timeout_ms must be between 100 and 120000 ms".to_string());
        }
        validate_table_name(&db.table_name)?;

        let m = &self.messenger;
        if m.max_processing_instruction_count <= 0 {
            return Err("messenger max_processing_instruction_count must be positive".to_string());
        }
        if m.fetch_limit == 0 || m.fetch_limit > 10000 {
            return Err("messenger fetch_limit must be between 1 and 10000".to_string());
        }
        if m.max_instructions_per_batch == 0 || m.max_instructions_per_batch > 10000 {
            return Err(
                "messenger max_instructions_per_batch must be between 1 and 10000".to_string(),
            );
        }
        if m.throttle_seconds > 3600 {
            return Err("messenger throttle_seconds cannot exceed 3600 seconds".to_string());
        }
        if m.prune_enabled && m.days_to_retain_instructions == 0 {
            return Err(
                "messenger days_to_retain_instructions cannot be zero when pruning is enabled"
                    .to_string(),
            );
        }
        if m.release_timeout_ms > 60000 {
            return Err("messenger release_timeout_ms cannot exceed 60000 ms".to_string());
        }

        Ok(())
    }
}

/// 表名只能包含字母、数字和下划线，且不能以数字开头
pub fn validate_table_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() || name.len() > 64 {
        return Err("table_name must be between 1 and 64 characters".to_string());
    }
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!(
            "Invalid table_name '{}': only alphanumeric characters and underscores are allowed",
            name
        ));
    }
    Ok(())
}
