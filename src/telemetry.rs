//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了同步系统的日志和链路追踪初始化。

use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::trace::TracerProvider as SdkTracerProvider;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

/// 初始化 tracing 订阅器
///
/// 组合 `EnvFilter`、控制台输出层和 OpenTelemetry 层。`RUST_LOG` 存在时优先使用，
/// 否则使用 `default_filter`。应在程序启动时调用一次，重复调用不会覆盖已有的全局订阅器。
///
/// # 参数
///
/// * `service_name` - 服务名称，作为 tracer 名称
/// * `default_filter` - 默认日志过滤规则，例如 "info" 或 "oxsync=debug"
pub fn init_tracing(service_name: &str, default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // 未配置导出器时 provider 不会导出 span，只为 span 分配 trace 上下文
    let provider = SdkTracerProvider::builder().build();
    global::set_tracer_provider(provider.clone());
    let tracer = provider.tracer(service_name.to_string());

    let subscriber = Registry::default()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(tracing_opentelemetry::layer().with_tracer(tracer));

    let _ = tracing::subscriber::set_global_default(subscriber);
}
