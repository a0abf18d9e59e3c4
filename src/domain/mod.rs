// ==========================================
// 机组排班自愈系统 - 领域模型层
// ==========================================
// 职责: 航班/飞行员/扰动/候选/轨迹/排班快照的实体与不变量
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod candidate;
pub mod disruption;
pub mod flight;
pub mod pilot;
pub mod roster;
pub mod trace;
pub mod types;

// 重导出核心类型
pub use candidate::{
    AssignmentDiff, Candidate, CandidateDraft, CostItem, DutyGain, Estimate, FlightChange,
    PilotChange, Verdict,
};
pub use disruption::{Disruption, DisruptionInput};
pub use flight::Flight;
pub use pilot::{DutyInterval, Pilot};
pub use roster::{InvariantLimits, RosterSnapshot, RosterViolation};
pub use trace::{CycleOutcome, ReasoningTrace, StepContent, StepKind, TraceStep};
pub use types::{
    CandidateAction, CandidateSource, DisruptionStatus, DisruptionType, FlightStatus,
    PilotStatus, RejectReason, Severity,
};
