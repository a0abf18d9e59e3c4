// ==========================================
// 机组排班自愈系统 - 核心库
// ==========================================
// 职责: 航班扰动下的机组排班自愈与排班重优化
// 技术栈: Rust + SQLite（策略配置）
// 系统定位: 决策支持系统（自动提交 + 人工最终控制权）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 排班聚合与提交
pub mod repository;

// 引擎层 - 分类/生成/校验/排序/求解/编排
pub mod engine;

// 配置层 - 自愈策略
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 触发面接口
pub mod api;

// 异步运行时 - 多扰动并发自愈
pub mod runtime;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    CandidateAction, CandidateSource, DisruptionStatus, DisruptionType, FlightStatus,
    PilotStatus, RejectReason, Severity,
};

// 领域实体
pub use domain::{
    AssignmentDiff, Candidate, Disruption, DisruptionInput, DutyInterval, Flight, Pilot,
    ReasoningTrace, RosterSnapshot,
};

// 仓储
pub use repository::{InMemoryRosterStore, RosterStore};

// 引擎
pub use engine::{
    CandidateGenerator, ConstraintSolver, DisruptionClassifier, HealingOrchestrator,
    ResolutionExecutor, StandardEstimator, ValidationPipeline,
};

// 配置
pub use config::{ConfigManager, HealingPolicy};

// API
pub use api::HealingApi;

// 运行时
pub use runtime::HealingRuntime;

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "机组排班自愈系统";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
