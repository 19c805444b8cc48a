//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了同步系统的指标收集和监控功能。

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{span, Level};

/// 指标收集器
///
/// 用于收集和存储同步系统的各种运行时指标
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    /// 写入的批次数
    /// key: "node"
    pub batches_delivered: Arc<Mutex<HashMap<String, u64>>>,
    /// 写入的逻辑指令数
    pub instructions_delivered: Arc<Mutex<HashMap<String, u64>>>,
    /// 已处理批次数
    /// key: "node:outcome"（applied / local / malformed / failed）
    pub batches_processed: Arc<Mutex<HashMap<String, u64>>>,
    /// 冷启动次数
    pub cold_boots: Arc<Mutex<HashMap<String, u64>>>,
    /// 清理删除的行数
    pub pruned_rows: Arc<Mutex<HashMap<String, u64>>>,
    /// 最后同步的批次 ID
    pub last_synced_id: Arc<Mutex<HashMap<String, i64>>>,
}

lazy_static! {
    /// 全局指标实例
    pub static ref GLOBAL_METRICS: Metrics = Metrics::default();
}

fn increment(map: &Mutex<HashMap<String, u64>>, key: String, by: u64) {
    if let Ok(mut map) = map.lock() {
        *map.entry(key).or_insert(0) += by;
    }
}

impl Metrics {
    /// 记录一次写入
    ///
    /// # 参数
    ///
    /// * `node` - 节点名称
    /// * `batches` - 写入的批次数
    /// * `instructions` - 写入的逻辑指令数
    pub fn record_delivery(&self, node: &str, batches: u64, instructions: u64) {
        let span = span!(Level::DEBUG, "instruction_delivery", node, batches, instructions);
        let _enter = span.enter();
        increment(&self.batches_delivered, node.to_string(), batches);
        increment(&self.instructions_delivered, node.to_string(), instructions);
    }

    /// 记录已处理批次
    pub fn record_processed(&self, node: &str, outcome: &str, count: u64) {
        if count == 0 {
            return;
        }
        increment(
            &self.batches_processed,
            format!("{}:{}", node, outcome),
            count,
        );
    }

    pub fn record_cold_boot(&self, node: &str) {
        increment(&self.cold_boots, node.to_string(), 1);
    }

    pub fn record_pruned(&self, node: &str, rows: u64) {
        increment(&self.pruned_rows, node.to_string(), rows);
    }

    pub fn set_last_synced(&self, node: &str, id: i64) {
        if let Ok(mut map) = self.last_synced_id.lock() {
            map.insert(node.to_string(), id);
        }
    }

    /// 读取某个计数器的值，主要用于测试和 CLI
    pub fn processed(&self, node: &str, outcome: &str) -> u64 {
        self.batches_processed
            .lock()
            .ok()
            .and_then(|map| map.get(&format!("{}:{}", node, outcome)).copied())
            .unwrap_or(0)
    }
}

/// 获取指标字符串
///
/// 将所有指标格式化为 Prometheus 文本格式，用于监控系统采集
pub fn get_metrics_string() -> String {
    let metrics = &GLOBAL_METRICS;
    let mut output = String::new();

    let simple = [
        ("sync_batches_delivered_total", &metrics.batches_delivered),
        ("sync_instructions_delivered_total", &metrics.instructions_delivered),
        ("sync_cold_boots_total", &metrics.cold_boots),
        ("sync_pruned_rows_total", &metrics.pruned_rows),
    ];
    for (name, map) in simple {
        if let Ok(map) = map.lock() {
            for (node, v) in map.iter() {
                output.push_str(&format!("{}{{node=\"{}\"}} {}\n", name, node, v));
            }
        }
    }

    if let Ok(map) = metrics.batches_processed.lock() {
        for (key, v) in map.iter() {
            if let Some((node, outcome)) = key.rsplit_once(':') {
                output.push_str(&format!(
                    "sync_batches_processed_total{{node=\"{}\", outcome=\"{}\"}} {}\n",
                    node, outcome, v
                ));
            }
        }
    }

    if let Ok(map) = metrics.last_synced_id.lock() {
        for (node, v) in map.iter() {
            output.push_str(&format!("sync_last_synced_id{{node=\"{}\"}} {}\n", node, v));
        }
    }

    output
}
