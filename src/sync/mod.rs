//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存指令的分布式同步机制，包括写入、重放、分发和节点级编排。

pub mod dispatch;
pub mod engine;
pub mod last_synced;
pub mod messenger;

pub use dispatch::{
    dispatch_batch, dispatch_instruction, dispatch_local, BatchDispatch, ProcessedSet,
};
pub use engine::{ProcessOutcome, SyncEngine, DEFAULT_FETCH_LIMIT};
pub use last_synced::LastSyncedFile;
pub use messenger::{BootOutcome, ColdBootCallback, ServerMessenger};
