// ==========================================
// 机组排班自愈系统 - 领域类型定义
// ==========================================
// 职责: 航班/飞行员/扰动/候选方案的枚举类型
// 序列化格式: SCREAMING_SNAKE_CASE (与外部持久层一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 航班状态 (Flight Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightStatus {
    Scheduled, // 正常计划
    Delayed,   // 已延误
    Disrupted, // 受扰动待修复
    Cancelled, // 已取消
    Resolved,  // 已修复
}

impl FlightStatus {
    /// 是否仍需执行（未取消）
    pub fn is_operating(&self) -> bool {
        !matches!(self, FlightStatus::Cancelled)
    }
}

impl fmt::Display for FlightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlightStatus::Scheduled => write!(f, "SCHEDULED"),
            FlightStatus::Delayed => write!(f, "DELAYED"),
            FlightStatus::Disrupted => write!(f, "DISRUPTED"),
            FlightStatus::Cancelled => write!(f, "CANCELLED"),
            FlightStatus::Resolved => write!(f, "RESOLVED"),
        }
    }
}

// ==========================================
// 飞行员状态 (Pilot Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PilotStatus {
    Available, // 可用
    Reserve,   // 备份待命
    OnDuty,    // 执勤中
    Resting,   // 休息中
    Sick,      // 病假
    Off,       // 休假
}

impl PilotStatus {
    /// 是否可以接受新的执勤
    ///
    /// Resting 仍可接受休息结束之后的执勤，由最小休息规则判定
    pub fn can_take_duty(&self) -> bool {
        !matches!(self, PilotStatus::Sick | PilotStatus::Off)
    }
}

impl fmt::Display for PilotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PilotStatus::Available => write!(f, "AVAILABLE"),
            PilotStatus::Reserve => write!(f, "RESERVE"),
            PilotStatus::OnDuty => write!(f, "ON_DUTY"),
            PilotStatus::Resting => write!(f, "RESTING"),
            PilotStatus::Sick => write!(f, "SICK"),
            PilotStatus::Off => write!(f, "OFF"),
        }
    }
}

// ==========================================
// 扰动类型 (Disruption Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisruptionType {
    Weather,      // 天气
    Tech,         // 机务故障
    Atc,          // 空管流控
    CrewSickness, // 机组病假
}

impl fmt::Display for DisruptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisruptionType::Weather => write!(f, "WEATHER"),
            DisruptionType::Tech => write!(f, "TECH"),
            DisruptionType::Atc => write!(f, "ATC"),
            DisruptionType::CrewSickness => write!(f, "CREW_SICKNESS"),
        }
    }
}

// ==========================================
// 扰动严重度 (Severity)
// ==========================================
// 顺序: Low < Medium < High < Critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

// ==========================================
// 扰动生命周期 (Disruption Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisruptionStatus {
    Open,      // 已注入，待修复
    Resolved,  // 已提交修复
    Escalated, // 已升级人工处理
}

impl fmt::Display for DisruptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisruptionStatus::Open => write!(f, "OPEN"),
            DisruptionStatus::Resolved => write!(f, "RESOLVED"),
            DisruptionStatus::Escalated => write!(f, "ESCALATED"),
        }
    }
}

// ==========================================
// 候选动作 (Candidate Action)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CandidateAction {
    Swap,          // 机组互换
    AssignReserve, // 指派备份
    Delay,         // 推迟起飞
    Cancel,        // 取消航班（最后手段）
}

impl CandidateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateAction::Swap => "SWAP",
            CandidateAction::AssignReserve => "ASSIGN_RESERVE",
            CandidateAction::Delay => "DELAY",
            CandidateAction::Cancel => "CANCEL",
        }
    }
}

impl fmt::Display for CandidateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 候选来源 (Candidate Source)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CandidateSource {
    Heuristic, // 启发式生成器
    Solver,    // 约束求解器兜底
}

// ==========================================
// 拒绝原因 (Reject Reason)
// ==========================================
// 红线: 所有拒绝必须输出原因码，写入推理轨迹
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    PilotUnavailable,
    QualificationMismatch,
    DutyOverlap,
    MaxDutyExceeded,
    InsufficientRest,
    ConsecutiveNightDuties,
    NightLandingsExceeded,
    FatigueCapExceeded,
    StaleAssignment,
}

impl RejectReason {
    /// 原因码 (推理轨迹中使用)
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::PilotUnavailable => "pilot_unavailable",
            RejectReason::QualificationMismatch => "qualification_mismatch",
            RejectReason::DutyOverlap => "duty_overlap",
            RejectReason::MaxDutyExceeded => "max_duty_exceeded",
            RejectReason::InsufficientRest => "insufficient_rest",
            RejectReason::ConsecutiveNightDuties => "consecutive_night_duties",
            RejectReason::NightLandingsExceeded => "night_landings_exceeded",
            RejectReason::FatigueCapExceeded => "fatigue_cap_exceeded",
            RejectReason::StaleAssignment => "stale_assignment",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_reason_codes_are_snake_case() {
        assert_eq!(RejectReason::FatigueCapExceeded.code(), "fatigue_cap_exceeded");
        let json = serde_json::to_string(&RejectReason::ConsecutiveNightDuties).unwrap();
        assert_eq!(json, "\"consecutive_night_duties\"");
    }

    #[test]
    fn test_pilot_status_duty_eligibility() {
        assert!(PilotStatus::Reserve.can_take_duty());
        assert!(PilotStatus::Resting.can_take_duty());
        assert!(!PilotStatus::Sick.can_take_duty());
        assert!(!PilotStatus::Off.can_take_duty());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }
}
