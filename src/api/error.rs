// ==========================================
// 机组排班自愈系统 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型，将引擎/仓储错误转换为调用方可读的错误消息
// 红线: 错误信息必须包含显式原因
// ==========================================

use crate::engine::error::EngineError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 输入错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    // ==========================================
    // 自愈流程错误
    // ==========================================
    #[error("无可行方案: {0}")]
    Infeasible(String),

    #[error("求解超时: {0}")]
    SolverTimeout(String),

    // ==========================================
    // 并发控制错误
    // ==========================================
    #[error("排班版本冲突: expected_version={expected}, actual_version={actual}")]
    StaleSnapshot { expected: u64, actual: u64 },

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// 从 EngineError 转换
// ==========================================
impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Infeasible { flight_id, reason_code } => {
                ApiError::Infeasible(format!("航班{}: {}", flight_id, reason_code))
            }
            EngineError::SolverTimeout { elapsed_ms } => {
                ApiError::SolverTimeout(format!("耗时{}ms", elapsed_ms))
            }
            EngineError::StaleSnapshot { expected, actual } => ApiError::StaleSnapshot { expected, actual },
            EngineError::Validation(msg) => ApiError::InvalidInput(msg),
            EngineError::NotFound { entity, id } => ApiError::NotFound(format!("{}(id={})不存在", entity, id)),
            EngineError::InvalidTransition { from, to } => ApiError::InvalidStateTransition { from, to },
            EngineError::DisruptionClosed { status, .. } => ApiError::InvalidStateTransition {
                from: status,
                to: "RESOLVED".to_string(),
            },
            EngineError::TraceSealed(cycle_id) => {
                ApiError::InternalError(format!("推理轨迹已封存: {}", cycle_id))
            }
            EngineError::Config(msg) => ApiError::ConfigError(msg),
            EngineError::Repository(e) => e.into(),
            EngineError::Other(e) => ApiError::Other(e),
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::StaleSnapshot { expected, actual } => ApiError::StaleSnapshot { expected, actual },
            RepositoryError::NotFound { entity, id } => ApiError::NotFound(format!("{}(id={})不存在", entity, id)),
            RepositoryError::AlreadyExists { entity, id } => {
                ApiError::InvalidInput(format!("{}(id={})已存在", entity, id))
            }
            RepositoryError::InvariantViolation(v) => ApiError::InvalidInput(format!("排班不变量违反: {}", v)),
            RepositoryError::InvalidStateTransition { from, to } => ApiError::InvalidStateTransition { from, to },
            RepositoryError::DisruptionClosed { status, .. } => ApiError::InvalidStateTransition {
                from: status,
                to: "RESOLVED".to_string(),
            },
            RepositoryError::LockError(msg) => ApiError::InternalError(format!("锁获取失败: {}", msg)),
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(e) => ApiError::Other(e),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;
