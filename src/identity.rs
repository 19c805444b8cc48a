//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 本地节点身份标识。

use lazy_static::lazy_static;
use uuid::Uuid;

lazy_static! {
    static ref LOCAL_IDENTITY: String = build_identity(env!("CARGO_PKG_NAME"));
}

/// 当前进程的身份标识
///
/// 格式为 `主机名/应用名 [P进程号] GUID`。同一台机器上同时运行的两个进程
/// （例如重启期间）也视为不同节点，真正保证唯一的是末尾的 GUID，
/// 其余部分仅用于排查问题。
pub fn local_identity() -> &'static str {
    LOCAL_IDENTITY.as_str()
}

/// 为指定应用名生成新的身份标识，每次调用结果都不同
pub fn build_identity(app_name: &str) -> String {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string());
    format!(
        "{}/{} [P{}] {}",
        host,
        app_name,
        std::process::id(),
        Uuid::new_v4().simple().to_string().to_uppercase()
    )
}
