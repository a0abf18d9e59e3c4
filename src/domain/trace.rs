// ==========================================
// 机组排班自愈系统 - 推理轨迹领域模型
// ==========================================
// 红线: 周期进入终态后轨迹封存，不可再追加
// 用途: 审计 / 外部报表 / 幂等性对比
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// StepKind - 轨迹步骤类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    DisruptionObserved,  // 观测到扰动
    CriticalFlight,      // 识别关键航班
    CandidateConsidered, // 候选已生成
    Verdict,             // 校验结论
    Ranked,              // 排序结果
    Selected,            // 选中方案
    SolverInvoked,       // 调用求解器兜底
    CommitAttempt,       // 提交尝试
    Failure,             // 组件失败（分类/生成）
    Outcome,             // 终态
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepKind::DisruptionObserved => "DISRUPTION_OBSERVED",
            StepKind::CriticalFlight => "CRITICAL_FLIGHT",
            StepKind::CandidateConsidered => "CANDIDATE_CONSIDERED",
            StepKind::Verdict => "VERDICT",
            StepKind::Ranked => "RANKED",
            StepKind::Selected => "SELECTED",
            StepKind::SolverInvoked => "SOLVER_INVOKED",
            StepKind::CommitAttempt => "COMMIT_ATTEMPT",
            StepKind::Failure => "FAILURE",
            StepKind::Outcome => "OUTCOME",
        };
        write!(f, "{}", s)
    }
}

// ==========================================
// CycleOutcome - 周期终态
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleOutcome {
    /// 已提交，new_version 为提交后的快照版本
    Committed { new_version: u64 },
    /// 已升级人工处理
    Escalated { reason_code: String },
    /// 仅规划（顾问模式），未提交
    Planned,
}

impl CycleOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CycleOutcome::Committed { .. })
    }

    pub fn is_escalated(&self) -> bool {
        matches!(self, CycleOutcome::Escalated { .. })
    }

    pub fn reason_code(&self) -> Option<&str> {
        match self {
            CycleOutcome::Escalated { reason_code } => Some(reason_code.as_str()),
            _ => None,
        }
    }
}

// ==========================================
// TraceStep - 轨迹步骤
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub seq: u32,                    // 序号（从1开始，严格递增）
    pub kind: StepKind,
    pub subject: String,             // 主体: 扰动ID / 航班ID / 候选ID
    pub reason_code: Option<String>, // 原因码 (fatigue_cap_exceeded 等)
    pub rationale: String,           // 说明文本
    pub recorded_at: NaiveDateTime,
}

/// 去除时间戳后的步骤内容（幂等性对比）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepContent {
    pub seq: u32,
    pub kind: StepKind,
    pub subject: String,
    pub reason_code: Option<String>,
    pub rationale: String,
}

// ==========================================
// ReasoningTrace - 已封存推理轨迹
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningTrace {
    pub cycle_id: String,
    pub disruption_id: String,
    pub steps: Vec<TraceStep>,
    pub outcome: CycleOutcome,
    pub sealed_at: NaiveDateTime,
}

impl ReasoningTrace {
    pub fn content(&self) -> Vec<StepContent> {
        self.steps
            .iter()
            .map(|s| StepContent {
                seq: s.seq,
                kind: s.kind,
                subject: s.subject.clone(),
                reason_code: s.reason_code.clone(),
                rationale: s.rationale.clone(),
            })
            .collect()
    }

    /// 是否存在指定原因码的步骤
    pub fn has_reason(&self, reason_code: &str) -> bool {
        self.steps
            .iter()
            .any(|s| s.reason_code.as_deref() == Some(reason_code))
    }

    /// 某主体的全部步骤
    pub fn steps_for<'a>(&'a self, subject: &'a str) -> impl Iterator<Item = &'a TraceStep> + 'a {
        self.steps.iter().filter(move |s| s.subject == subject)
    }
}
