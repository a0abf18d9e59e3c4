// ==========================================
// 机组排班自愈系统 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 传播策略:
// - 分类/生成失败写入推理轨迹终止步骤，不丢弃
// - StaleSnapshot 触发整周期重试（有上限）
// - SolverTimeout 可恢复（退回启发式结果并标记非最优）
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    // ===== 求解错误 =====
    #[error("无可行方案: flight_id={flight_id}, reason={reason_code}")]
    Infeasible { flight_id: String, reason_code: String },

    #[error("求解超时且无可用解: elapsed_ms={elapsed_ms}")]
    SolverTimeout { elapsed_ms: u64 },

    // ===== 并发控制错误 =====
    #[error("快照已过期: expected_version={expected}, actual_version={actual}")]
    StaleSnapshot { expected: u64, actual: u64 },

    // ===== 输入与状态错误 =====
    #[error("输入校验失败: {0}")]
    Validation(String),

    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidTransition { from: String, to: String },

    #[error("扰动已关闭: disruption_id={disruption_id}, status={status}")]
    DisruptionClosed { disruption_id: String, status: String },

    #[error("推理轨迹已封存: cycle_id={0}")]
    TraceSealed(String),

    // ===== 下层错误 =====
    #[error("配置错误: {0}")]
    Config(String),

    #[error("仓储错误: {0}")]
    Repository(RepositoryError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// 终止原因码（写入推理轨迹）
    pub fn reason_code(&self) -> &'static str {
        match self {
            EngineError::Infeasible { .. } => "no_feasible_candidate",
            EngineError::SolverTimeout { .. } => "solver_timeout",
            EngineError::StaleSnapshot { .. } => "stale_snapshot",
            EngineError::Validation(_) => "validation_error",
            EngineError::NotFound { .. } => "unknown_reference",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::DisruptionClosed { .. } => "disruption_closed",
            EngineError::TraceSealed(_) => "trace_sealed",
            EngineError::Config(_) => "config_error",
            EngineError::Repository(_) => "repository_error",
            EngineError::Other(_) => "internal_error",
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, EngineError::StaleSnapshot { .. })
    }

    pub fn is_disruption_closed(&self) -> bool {
        matches!(self, EngineError::DisruptionClosed { .. })
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::StaleSnapshot { expected, actual } => {
                EngineError::StaleSnapshot { expected, actual }
            }
            RepositoryError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            RepositoryError::DisruptionClosed { id, status } => EngineError::DisruptionClosed {
                disruption_id: id,
                status,
            },
            other => EngineError::Repository(other),
        }
    }
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;
