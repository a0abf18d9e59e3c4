// ==========================================
// 机组排班自愈系统 - 配置库连接
// ==========================================
// 职责: 打开策略配置库（SQLite），统一连接参数与 config_kv 表结构
// 说明: 排班聚合在内存中，SQLite 只承载策略覆写
// ==========================================

use rusqlite::Connection;
use std::path::PathBuf;
use std::time::Duration;

/// 并发周期读取配置时的等待上限（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 配置库目录名（位于用户数据目录下）
const CONFIG_DIR_NAME: &str = "aero-resilience";
const CONFIG_DB_FILE: &str = "config.db";

/// 应用连接参数（每个连接单独生效）
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

/// 打开配置库并应用连接参数
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 建立 config_kv 表（幂等）
///
/// scope_id 目前只使用 'global'
pub fn ensure_config_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );",
    )
}

/// 默认配置库路径（用户数据目录下）
pub fn default_config_db_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_DB_FILE))
}
