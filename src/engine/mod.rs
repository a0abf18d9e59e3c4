// ==========================================
// 机组排班自愈系统 - 引擎层
// ==========================================
// 职责: 扰动分类 / 候选生成 / 校验 / 排序 / 求解 / 编排 / 提交
// 红线: 引擎只读快照产出差异，唯一写入口是执行器提交
// 红线: 所有拒绝与升级必须输出原因码
// ==========================================

pub mod classifier;
pub mod error;
pub mod estimator;
pub mod events;
pub mod executor;
pub mod generator;
pub mod orchestrator;
pub mod projection;
pub mod ranking;
pub mod solver;
pub mod trace_builder;
pub mod validation;

// 重导出核心引擎
pub use classifier::{Classification, CriticalFlight, CriticalReason, DisruptionClassifier};
pub use error::{EngineError, EngineResult};
pub use estimator::{CostFatigueEstimator, CrewCostEstimate, StandardEstimator};
pub use events::{
    NoOpNotificationPublisher, NotificationKind, NotificationPublisher,
    OptionalNotificationPublisher, RosterNotification,
};
pub use executor::ResolutionExecutor;
pub use generator::{CandidateGenerator, GenerationContext};
pub use orchestrator::{CycleReport, FlightPlan, HealingOrchestrator, HealingState, HealingStateMachine};
pub use solver::{ConflictReport, ConstraintKind, ConstraintSolver, SolveOutcome, SolverSolution};
pub use trace_builder::TraceBuilder;
pub use validation::{ValidationPipeline, Validator};
