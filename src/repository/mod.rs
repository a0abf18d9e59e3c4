// ==========================================
// 机组排班自愈系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 持有排班聚合，提供快照读取与事务性提交接口
// ==========================================

pub mod error;
pub mod roster_store;

// 重导出核心仓储
pub use error::{RepositoryError, RepositoryResult};
pub use roster_store::{InMemoryRosterStore, RosterStore};
