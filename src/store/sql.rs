//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 基于 Sea-ORM 的指令存储实现，支持 SQLite、MySQL 和 PostgreSQL。

use super::connection::{ensure_database_directory, is_sqlite_memory, DbType};
use super::{CacheInstructionRecord, InstructionStore, NewCacheInstruction};
use crate::config::{validate_table_name, DatabaseConfig};
use crate::error::{Result, SyncError};
use crate::utils::redaction::redact_connection_string;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, QueryResult,
    SqlxSqliteConnector, Statement, TransactionTrait, Value,
};
use secrecy::ExposeSecret;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

const SELECT_COLUMNS: &str = "id, utc_stamp, json_instruction, originated, instruction_count";

/// SQL 指令存储
///
/// 表结构：`id`（自增主键）、`utc_stamp`（UTC 毫秒时间戳）、`json_instruction`、
/// `originated`（来源节点身份，最长 500）、`instruction_count`。
#[derive(Clone)]
pub struct SqlInstructionStore {
    db: Arc<DatabaseConnection>,
    backend: DatabaseBackend,
    table: String,
}

impl SqlInstructionStore {
    /// 按配置建立连接并确保表存在
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let raw = config.connection_string.expose_secret();
        let normalized = ensure_database_directory(raw)?;
        let db_type = DbType::from_connection_string(&normalized);

        // SQLite 使用单连接，避免内存数据库在不同连接间不可见
        let max_connections = match db_type {
            DbType::SQLite => 1,
            _ => config.max_connections,
        };

        debug!(
            "连接指令存储: {} (max_connections={})",
            redact_connection_string(&normalized),
            max_connections
        );

        let connect_error = |e: &dyn std::fmt::Display| {
            SyncError::DatabaseError(format!(
                "Failed to connect to {}: {}",
                redact_connection_string(&normalized),
                e
            ))
        };

        let db = if is_sqlite_memory(&normalized) {
            // 内存数据库的连接一旦被回收，数据随之丢失，因此连接永不过期
            let options =
                SqliteConnectOptions::from_str(&normalized).map_err(|e| connect_error(&e))?;
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .max_lifetime(None)
                .idle_timeout(None)
                .acquire_timeout(Duration::from_millis(config.connect_timeout_ms))
                .connect_with(options)
                .await
                .map_err(|e| connect_error(&e))?;
            SqlxSqliteConnector::from_sqlx_sqlite_pool(pool)
        } else {
            let mut opt = ConnectOptions::new(normalized.clone());
            opt.max_connections(max_connections)
                .min_connections(1)
                .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
                .sqlx_logging(false);
            Database::connect(opt).await.map_err(|e| connect_error(&e))?
        };

        Self::from_connection(db, &config.table_name).await
    }

    /// 使用已有连接创建存储并确保表存在
    pub async fn from_connection(db: DatabaseConnection, table_name: &str) -> Result<Self> {
        validate_table_name(table_name).map_err(SyncError::ConfigError)?;
        let store = Self {
            backend: db.get_database_backend(),
            db: Arc::new(db),
            table: table_name.to_string(),
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// 创建指令表（若不存在）
    pub async fn ensure_schema(&self) -> Result<()> {
        let ddl = match self.backend {
            DatabaseBackend::Sqlite => format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    utc_stamp BIGINT NOT NULL,
                    json_instruction TEXT NOT NULL,
                    originated VARCHAR(500) NOT NULL,
                    instruction_count INTEGER NOT NULL DEFAULT 1
                )",
                self.table
            ),
            DatabaseBackend::Postgres => format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id BIGSERIAL PRIMARY KEY,
                    utc_stamp BIGINT NOT NULL,
                    json_instruction TEXT NOT NULL,
                    originated VARCHAR(500) NOT NULL,
                    instruction_count INTEGER NOT NULL DEFAULT 1
                )",
                self.table
            ),
            DatabaseBackend::MySql => format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
                    utc_stamp BIGINT NOT NULL,
                    json_instruction LONGTEXT NOT NULL,
                    originated VARCHAR(500) NOT NULL,
                    instruction_count INT NOT NULL DEFAULT 1
                )",
                self.table
            ),
        };

        debug!("确保指令表存在: {}", self.table);
        self.db
            .execute(Statement::from_string(self.backend, ddl))
            .await?;
        Ok(())
    }

    fn placeholder(&self, n: usize) -> String {
        match self.backend {
            DatabaseBackend::Postgres => format!("${}", n),
            _ => "?".to_string(),
        }
    }

    fn statement(&self, sql: String, values: Vec<Value>) -> Statement {
        Statement::from_sql_and_values(self.backend, sql, values)
    }

    async fn scalar_i64(&self, sql: String, values: Vec<Value>) -> Result<i64> {
        let row = self.db.query_one(self.statement(sql, values)).await?;
        match row {
            Some(row) => Ok(row.try_get::<i64>("", "total")?),
            None => Ok(0),
        }
    }

    fn map_row(row: QueryResult) -> Result<CacheInstructionRecord> {
        let millis: i64 = row.try_get("", "utc_stamp")?;
        let utc_stamp = DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
            SyncError::DatabaseError(format!("invalid utc_stamp value {}", millis))
        })?;

        Ok(CacheInstructionRecord {
            id: row.try_get("", "id")?,
            utc_stamp,
            instructions: row.try_get("", "json_instruction")?,
            origin_identity: row.try_get("", "originated")?,
            instruction_count: row.try_get("", "instruction_count")?,
        })
    }
}

#[async_trait]
impl InstructionStore for SqlInstructionStore {
    async fn count_all(&self) -> Result<i64> {
        self.scalar_i64(format!("SELECT COUNT(*) AS total FROM {}", self.table), vec![])
            .await
    }

    async fn exists_by_id(&self, id: i64) -> Result<bool> {
        let sql = format!(
            "SELECT id FROM {} WHERE id = {}",
            self.table,
            self.placeholder(1)
        );
        let row = self.db.query_one(self.statement(sql, vec![id.into()])).await?;
        Ok(row.is_some())
    }

    async fn max_id(&self) -> Result<i64> {
        self.scalar_i64(
            format!("SELECT COALESCE(MAX(id), 0) AS total FROM {}", self.table),
            vec![],
        )
        .await
    }

    async fn sum_instruction_count_after(&self, after_id: i64) -> Result<i64> {
        // MySQL 的 SUM 返回 DECIMAL，需要显式转换
        let sum = match self.backend {
            DatabaseBackend::MySql => "CAST(COALESCE(SUM(instruction_count), 0) AS SIGNED)",
            _ => "COALESCE(SUM(instruction_count), 0)",
        };
        let sql = format!(
            "SELECT {} AS total FROM {} WHERE id > {}",
            sum,
            self.table,
            self.placeholder(1)
        );
        self.scalar_i64(sql, vec![after_id.into()]).await
    }

    #[instrument(skip(self, records), level = "debug", fields(rows = records.len()))]
    async fn insert_all(&self, records: Vec<NewCacheInstruction>) -> Result<Vec<i64>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let columns = "utc_stamp, json_instruction, originated, instruction_count";
        let params = (1..=4)
            .map(|n| self.placeholder(n))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table, columns, params
        );

        let txn = self.db.begin().await?;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let values: Vec<Value> = vec![
                record.utc_stamp.timestamp_millis().into(),
                record.instructions.into(),
                record.origin_identity.into(),
                record.instruction_count.into(),
            ];

            let id = match self.backend {
                DatabaseBackend::Postgres => {
                    let sql = format!("{} RETURNING id", insert_sql);
                    let row = txn
                        .query_one(Statement::from_sql_and_values(self.backend, sql, values))
                        .await?
                        .ok_or_else(|| {
                            SyncError::DatabaseError("INSERT did not return an id".to_string())
                        })?;
                    row.try_get::<i64>("", "id")?
                }
                _ => {
                    let result = txn
                        .execute(Statement::from_sql_and_values(
                            self.backend,
                            insert_sql.clone(),
                            values,
                        ))
                        .await?;
                    result.last_insert_id() as i64
                }
            };
            ids.push(id);
        }
        txn.commit().await?;

        debug!("插入指令批次: ids={:?}", ids);
        Ok(ids)
    }

    async fn fetch_pending(
        &self,
        after_id: i64,
        limit: u64,
    ) -> Result<Vec<CacheInstructionRecord>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id > {} ORDER BY id ASC LIMIT {}",
            SELECT_COLUMNS,
            self.table,
            self.placeholder(1),
            limit
        );
        let rows = self
            .db
            .query_all(self.statement(sql, vec![after_id.into()]))
            .await?;
        rows.into_iter().map(Self::map_row).collect()
    }

    #[instrument(skip(self), level = "debug")]
    async fn prune_before(&self, before: DateTime<Utc>) -> Result<u64> {
        // 两条语句比关联删除更快
        let max_id = self.max_id().await?;
        let sql = format!(
            "DELETE FROM {} WHERE utc_stamp < {} AND id < {}",
            self.table,
            self.placeholder(1),
            self.placeholder(2)
        );
        let result = self
            .db
            .execute(self.statement(sql, vec![before.timestamp_millis().into(), max_id.into()]))
            .await?;
        Ok(result.rows_affected())
    }
}

impl std::fmt::Debug for SqlInstructionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlInstructionStore")
            .field("backend", &self.backend)
            .field("table", &self.table)
            .finish()
    }
}
