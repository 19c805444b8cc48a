//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 节点级消息同步器：启动时判断冷启动、节流同步、清理过期指令以及本地与远程分发。

use super::dispatch::dispatch_local;
use super::engine::{ProcessOutcome, SyncEngine};
use super::last_synced::LastSyncedFile;
use crate::config::{Config, MessengerConfig};
use crate::error::Result;
use crate::identity::local_identity;
use crate::instruction::{InstructionIds, MessageType, RefreshInstruction};
use crate::metrics::GLOBAL_METRICS;
use crate::refresher::RefresherRegistry;
use crate::store::SqlInstructionStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// 冷启动回调，通常用于从权威数据源重建本地缓存
pub type ColdBootCallback = Arc<dyn Fn() + Send + Sync>;

/// 启动结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootOutcome {
    pub cold_boot: bool,
    pub last_id: i64,
}

#[derive(Debug, Default)]
struct MessengerState {
    last_id: Option<i64>,
    last_sync: Option<Instant>,
    last_pruned: Option<Instant>,
}

/// 服务器消息同步器
///
/// 同一时刻最多只有一次同步在执行，最后同步 ID 由状态锁保护。
pub struct ServerMessenger {
    engine: SyncEngine,
    registry: RefresherRegistry,
    config: MessengerConfig,
    identity: String,
    last_synced: LastSyncedFile,
    state: Mutex<MessengerState>,
    initialized: AtomicBool,
    released: CancellationToken,
    cold_boot_callbacks: Vec<ColdBootCallback>,
}

impl ServerMessenger {
    pub fn new(engine: SyncEngine, registry: RefresherRegistry, config: MessengerConfig) -> Self {
        Self {
            engine: engine.with_fetch_limit(config.fetch_limit),
            registry,
            last_synced: LastSyncedFile::new(config.last_synced_path.clone()),
            config,
            identity: local_identity().to_string(),
            state: Mutex::new(MessengerState::default()),
            initialized: AtomicBool::new(false),
            released: CancellationToken::new(),
            cold_boot_callbacks: Vec::new(),
        }
    }

    /// 按配置连接 SQL 存储并创建同步器
    pub async fn connect(config: &Config, registry: RefresherRegistry) -> Result<Self> {
        let store = SqlInstructionStore::connect(&config.database).await?;
        let engine = SyncEngine::new(Arc::new(store));
        Ok(Self::new(engine, registry, config.messenger.clone()))
    }

    /// 覆盖本地身份，主要用于在同一进程中模拟多个节点
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_cold_boot_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.cold_boot_callbacks.push(Arc::new(callback));
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn registry(&self) -> &RefresherRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        self.released.is_cancelled()
    }

    /// 当前最后同步 ID，尚未启动时为 None
    pub async fn last_id(&self) -> Option<i64> {
        self.state.lock().await.last_id
    }

    /// 启动
    ///
    /// 判断是否需要冷启动。冷启动时先读取当前最大批次 ID 并保存，再执行冷启动回调，
    /// 因此回调期间写入的批次仍会在之后的同步中处理。
    #[instrument(skip(self), level = "debug", fields(identity = %self.identity))]
    pub async fn boot(&self) -> Result<BootOutcome> {
        let mut state = self.state.lock().await;

        let marker = match self.last_synced.read().await? {
            Some(id) => Some(id),
            None => state.last_id,
        };

        let cold_boot = match marker {
            None => {
                warn!("No last synced id found, a cold boot is required");
                true
            }
            Some(id) => self.is_cold_boot_required(id).await?,
        };

        let last_id = if cold_boot {
            let max_id = self.engine.get_max_instruction_id().await?;
            self.last_synced.write(max_id).await?;
            state.last_id = Some(max_id);
            GLOBAL_METRICS.record_cold_boot(&self.identity);

            for callback in &self.cold_boot_callbacks {
                callback();
            }
            max_id
        } else {
            let id = marker.unwrap_or(0);
            state.last_id = Some(id);
            id
        };

        GLOBAL_METRICS.set_last_synced(&self.identity, last_id);
        self.initialized.store(true, Ordering::Release);
        info!("同步器已启动: cold_boot={}, last_id={}", cold_boot, last_id);

        Ok(BootOutcome { cold_boot, last_id })
    }

    async fn is_cold_boot_required(&self, last_id: i64) -> Result<bool> {
        if self.engine.is_cold_boot_required(last_id).await? {
            warn!(
                "Last synced id {} is unknown to the instruction store, a cold boot is required",
                last_id
            );
            return Ok(true);
        }

        // 从未同步且存储为空时没有积压
        if last_id <= 0 {
            return Ok(false);
        }

        let limit = self.config.max_processing_instruction_count;
        if self
            .engine
            .is_instruction_count_over_limit(last_id, limit)
            .await?
        {
            warn!(
                "More than {} instructions are pending since {}, a cold boot is required",
                limit, last_id
            );
            return Ok(true);
        }
        Ok(false)
    }

    /// 在本地执行指令，并在分布式模式下写入存储供其他节点同步
    ///
    /// 返回新写入的批次 ID；本地执行失败时不写入存储。
    #[instrument(skip(self, instructions), level = "debug", fields(count = instructions.len()))]
    pub async fn perform(&self, instructions: &[RefreshInstruction]) -> Result<Vec<i64>> {
        dispatch_local(&self.registry, instructions).await?;

        if !self.config.distributed_enabled {
            return Ok(Vec::new());
        }
        if !self.is_initialized() || self.is_released() {
            debug!("同步器未启动或已释放，指令仅在本地执行");
            return Ok(Vec::new());
        }

        self.engine
            .deliver_instructions_in_batches(
                instructions,
                &self.identity,
                self.config.max_instructions_per_batch,
            )
            .await
    }

    /// 将一次刷新器调用转换为指令后执行
    pub async fn perform_message(
        &self,
        refresher_id: Uuid,
        message_type: MessageType,
        ids: Option<InstructionIds>,
        json: Option<&str>,
    ) -> Result<Vec<i64>> {
        let instructions = RefreshInstruction::from_message(refresher_id, message_type, ids, json)?;
        self.perform(&instructions).await
    }

    /// 同步其他节点写入的指令
    ///
    /// 未启动、已释放、正在同步或仍在节流间隔内时直接返回 None。
    #[instrument(skip(self), level = "debug", fields(identity = %self.identity))]
    pub async fn sync(&self) -> Result<Option<ProcessOutcome>> {
        if self.is_released() || !self.is_initialized() {
            return Ok(None);
        }

        let Ok(mut state) = self.state.try_lock() else {
            debug!("已有同步正在进行");
            return Ok(None);
        };

        let throttle = Duration::from_secs(self.config.throttle_seconds);
        if state.last_sync.is_some_and(|at| at.elapsed() < throttle) {
            return Ok(None);
        }
        state.last_sync = Some(Instant::now());

        let last_id = state.last_id.unwrap_or(0);
        let outcome = self
            .engine
            .process_instructions(&self.registry, &self.released, &self.identity, last_id)
            .await?;

        if outcome.last_id != last_id {
            state.last_id = Some(outcome.last_id);
            self.last_synced.write(outcome.last_id).await?;
            GLOBAL_METRICS.set_last_synced(&self.identity, outcome.last_id);
        }

        if self.config.prune_enabled && !outcome.cancelled {
            let prune_throttle = Duration::from_secs(self.config.prune_throttle_seconds);
            if !state
                .last_pruned
                .is_some_and(|at| at.elapsed() < prune_throttle)
            {
                state.last_pruned = Some(Instant::now());
                match self
                    .engine
                    .prune_instructions(self.config.days_to_retain_instructions)
                    .await
                {
                    Ok(rows) => {
                        if rows > 0 {
                            info!("清理过期指令 {} 条", rows);
                        }
                        GLOBAL_METRICS.record_pruned(&self.identity, rows);
                    }
                    Err(e) => error!("清理过期指令失败: {}", e),
                }
            }
        }

        Ok(Some(outcome))
    }

    /// 释放同步器
    ///
    /// 取消进行中的同步，并最多等待 `release_timeout_ms` 让其结束。
    pub async fn release(&self) {
        self.released.cancel();

        let timeout = Duration::from_millis(self.config.release_timeout_ms);
        match tokio::time::timeout(timeout, self.state.lock()).await {
            Ok(_) => debug!("同步器已释放"),
            Err(_) => warn!(
                "Sync did not finish within {} ms after release",
                self.config.release_timeout_ms
            ),
        }
    }

    /// 启动后台同步任务，直到同步器被释放
    pub fn run(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sync().await {
                            error!("同步失败，将在下次重试: {}", e);
                        }
                    }
                    _ = self.released.cancelled() => {
                        info!("同步任务收到释放信号");
                        break;
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for ServerMessenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerMessenger")
            .field("identity", &self.identity)
            .field("engine", &self.engine)
            .field("initialized", &self.is_initialized())
            .field("released", &self.is_released())
            .finish()
    }
}
