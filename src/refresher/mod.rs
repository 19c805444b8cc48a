//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存刷新器能力接口及刷新器注册表。

use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// 缓存刷新器
///
/// 由各个本地缓存实现，收到失效指令时刷新或移除对应条目。
/// 实现必须保证重复执行是安全的。
#[async_trait]
pub trait CacheRefresher: Send + Sync {
    /// 刷新器的稳定唯一 ID
    fn refresher_id(&self) -> Uuid;

    /// 刷新器名称，仅用于日志
    fn name(&self) -> &str;

    async fn refresh_all(&self) -> Result<()>;

    async fn refresh_id(&self, id: i32) -> Result<()>;

    async fn refresh_guid(&self, id: Uuid) -> Result<()>;

    async fn remove(&self, id: i32) -> Result<()>;

    /// 支持 JSON 载荷刷新的刷新器返回自身
    fn as_json_refresher(&self) -> Option<&dyn JsonCacheRefresher> {
        None
    }
}

/// 支持 JSON 载荷刷新的缓存刷新器
#[async_trait]
pub trait JsonCacheRefresher: CacheRefresher {
    async fn refresh_json(&self, payload: &str) -> Result<()>;
}

/// 刷新器注册表
///
/// 按刷新器 ID 查找刷新器实例，可在多个任务间共享。
#[derive(Clone, Default)]
pub struct RefresherRegistry {
    refreshers: Arc<DashMap<Uuid, Arc<dyn CacheRefresher>>>,
}

impl RefresherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册刷新器，同 ID 的旧刷新器会被替换
    pub fn register(&self, refresher: Arc<dyn CacheRefresher>) {
        let id = refresher.refresher_id();
        debug!("注册缓存刷新器: {} ({})", refresher.name(), id);
        self.refreshers.insert(id, refresher);
    }

    pub fn unregister(&self, refresher_id: &Uuid) -> Option<Arc<dyn CacheRefresher>> {
        self.refreshers.remove(refresher_id).map(|(_, r)| r)
    }

    pub fn resolve(&self, refresher_id: &Uuid) -> Option<Arc<dyn CacheRefresher>> {
        self.refreshers.get(refresher_id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.refreshers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refreshers.is_empty()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.refreshers.iter().map(|entry| *entry.key()).collect()
    }
}

impl std::fmt::Debug for RefresherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefresherRegistry")
            .field("refreshers", &self.ids())
            .finish()
    }
}
