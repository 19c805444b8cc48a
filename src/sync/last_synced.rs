//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 最后同步 ID 的本地持久化。

use crate::error::{Result, SyncError};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 最后同步 ID 文件
///
/// 文件内容是一个十进制整数。未配置路径时读取总是返回 None，写入是空操作。
#[derive(Debug, Clone, Default)]
pub struct LastSyncedFile {
    path: Option<PathBuf>,
}

impl LastSyncedFile {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// 读取保存的 ID
    ///
    /// 文件不存在、内容无法解析或 ID 为负数时返回 None。
    pub async fn read(&self) -> Result<Option<i64>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match content.trim().parse::<i64>() {
            Ok(id) if id >= 0 => Ok(Some(id)),
            _ => {
                warn!(
                    "最后同步 ID 文件内容无效，将视为从未同步: {}",
                    path.display()
                );
                Ok(None)
            }
        }
    }

    /// 保存 ID，必要时创建父目录
    pub async fn write(&self, id: i64) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    SyncError::IoError(std::io::Error::new(
                        e.kind(),
                        format!("无法创建目录 {}: {}", parent.display(), e),
                    ))
                })?;
            }
        }

        tokio::fs::write(path, id.to_string()).await?;
        debug!("保存最后同步 ID {} 到 {}", id, path.display());
        Ok(())
    }
}
