//! oxsync - 分布式缓存指令同步
//!
//! 以共享数据库表作为消息通道，在多个节点之间广播缓存刷新指令：
//! 有界批次写入、可重复执行的重放、冷启动判断以及出错时跳过并推进。

#![doc(html_root_url = "https://docs.rs/oxsync/0.1.0")]

pub use serde;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
pub use tokio;

pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod instruction;
pub mod metrics;
pub mod refresher;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod utils;

// Re-export commonly used items
pub use config::Config;
pub use error::{Result, SyncError};
pub use instruction::{InstructionIds, MessageType, RefreshInstruction, RefreshMethod, RefreshType};
pub use refresher::{CacheRefresher, JsonCacheRefresher, RefresherRegistry};
pub use store::{InstructionStore, MemoryInstructionStore, SqlInstructionStore};
pub use sync::{ProcessOutcome, ServerMessenger, SyncEngine};

/// oxsync 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
