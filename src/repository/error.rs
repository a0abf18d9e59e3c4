// ==========================================
// 机组排班自愈系统 - 仓储层错误类型
// ==========================================
// 依据: 乐观并发控制（快照版本号）
// 工具: thiserror 派生宏
// ==========================================

use crate::domain::roster::RosterViolation;
use thiserror::Error;

/// 仓储层错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    // ===== 并发控制错误 =====
    #[error("快照已过期: expected_version={expected}, actual_version={actual}")]
    StaleSnapshot { expected: u64, actual: u64 },

    #[error("实体锁获取失败: {0}")]
    LockError(String),

    // ===== 数据错误 =====
    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    #[error("记录已存在: {entity} with id={id}")]
    AlreadyExists { entity: String, id: String },

    // ===== 业务规则错误 =====
    #[error("排班不变量违反: {0}")]
    InvariantViolation(RosterViolation),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("扰动已关闭: id={id}, status={status}")]
    DisruptionClosed { id: String, status: String },

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<RosterViolation> for RepositoryError {
    fn from(violation: RosterViolation) -> Self {
        RepositoryError::InvariantViolation(violation)
    }
}

/// Result 类型别名
pub type RepositoryResult<T> = Result<T, RepositoryError>;
