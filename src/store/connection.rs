//! 连接字符串处理
//!
//! 识别数据库类型、规范化 SQLite 连接字符串，并在需要时创建 SQLite 文件所在目录。

use crate::error::{Result, SyncError};
use sea_orm::DatabaseBackend;
use std::path::Path;

/// 数据库类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    SQLite,
    MySQL,
    PostgreSQL,
}

impl DbType {
    /// 从连接字符串推断数据库类型，无法识别时按 SQLite 处理
    pub fn from_connection_string(s: &str) -> Self {
        let lower = s.trim().to_lowercase();
        if lower.starts_with("mysql") {
            DbType::MySQL
        } else if lower.starts_with("postgres") {
            DbType::PostgreSQL
        } else {
            DbType::SQLite
        }
    }

    pub fn backend(self) -> DatabaseBackend {
        match self {
            DbType::SQLite => DatabaseBackend::Sqlite,
            DbType::MySQL => DatabaseBackend::MySql,
            DbType::PostgreSQL => DatabaseBackend::Postgres,
        }
    }
}

/// SQLite 连接字符串中的文件路径，内存数据库返回 None
pub fn extract_sqlite_path(connection_string: &str) -> Option<String> {
    let s = connection_string.trim();
    if DbType::from_connection_string(s) != DbType::SQLite {
        return None;
    }

    let rest = s
        .strip_prefix("sqlite://")
        .or_else(|| s.strip_prefix("sqlite:"))
        .unwrap_or(s);
    let path = rest.split('?').next().unwrap_or_default();

    if path.is_empty() || path == ":memory:" || path.starts_with(":memory:") {
        return None;
    }
    Some(path.to_string())
}

/// 是否为 SQLite 内存数据库
pub fn is_sqlite_memory(connection_string: &str) -> bool {
    DbType::from_connection_string(connection_string) == DbType::SQLite
        && extract_sqlite_path(connection_string).is_none()
}

/// 规范化连接字符串
///
/// SQLite 统一为 `sqlite:<path>[?params]` 形式（`sqlite:///abs` 变为 `sqlite:/abs`，
/// 裸相对路径加上 `./`）；MySQL 和 PostgreSQL 仅去除首尾空白。
pub fn normalize_connection_string(s: &str) -> String {
    let s = s.trim();
    if DbType::from_connection_string(s) != DbType::SQLite {
        return s.to_string();
    }

    let params = s.split_once('?').map(|(_, p)| p).filter(|p| !p.is_empty());
    let base = match extract_sqlite_path(s) {
        None => "sqlite::memory:".to_string(),
        Some(path) if path.starts_with('/') || path.starts_with("./") || path.starts_with("../") => {
            format!("sqlite:{}", path)
        }
        Some(path) => format!("sqlite:./{}", path),
    };

    match params {
        Some(params) => format!("{}?{}", base, params),
        None => base,
    }
}

/// 确保 SQLite 数据库文件所在目录存在，返回规范化后的连接字符串
///
/// 未指定 `mode` 的 SQLite 文件数据库会加上 `mode=rwc`，文件不存在时自动创建。
pub fn ensure_database_directory(connection_string: &str) -> Result<String> {
    let mut normalized = normalize_connection_string(connection_string);
    if let Some(path) = extract_sqlite_path(&normalized) {
        let full_path = if path.starts_with('/') {
            Path::new(&path).to_path_buf()
        } else {
            std::env::current_dir()?.join(&path)
        };

        if let Some(parent) = full_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SyncError::DatabaseError(format!(
                        "无法创建数据库目录 {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        if !normalized.contains("mode=") {
            let sep = if normalized.contains('?') { '&' } else { '?' };
            normalized = format!("{}{}mode=rwc", normalized, sep);
        }
    }
    Ok(normalized)
}
