// ==========================================
// 机组排班自愈系统 - 推理轨迹构建器
// ==========================================
// 职责: 按顺序追加带时间戳的步骤，终态时封存
// 红线: 封存后追加返回 TraceSealed
// ==========================================

use crate::domain::trace::{CycleOutcome, ReasoningTrace, StepKind, TraceStep};
use crate::engine::error::{EngineError, EngineResult};
use chrono::Utc;

pub struct TraceBuilder {
    cycle_id: String,
    disruption_id: String,
    steps: Vec<TraceStep>,
    sealed: bool,
}

impl TraceBuilder {
    pub fn new(cycle_id: impl Into<String>, disruption_id: impl Into<String>) -> Self {
        Self {
            cycle_id: cycle_id.into(),
            disruption_id: disruption_id.into(),
            steps: Vec::new(),
            sealed: false,
        }
    }

    pub fn cycle_id(&self) -> &str {
        &self.cycle_id
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// 追加步骤
    pub fn append(
        &mut self,
        kind: StepKind,
        subject: impl Into<String>,
        reason_code: Option<&str>,
        rationale: impl Into<String>,
    ) -> EngineResult<u32> {
        if self.sealed {
            return Err(EngineError::TraceSealed(self.cycle_id.clone()));
        }
        let seq = self.steps.len() as u32 + 1;
        self.steps.push(TraceStep {
            seq,
            kind,
            subject: subject.into(),
            reason_code: reason_code.map(|s| s.to_string()),
            rationale: rationale.into(),
            recorded_at: Utc::now().naive_utc(),
        });
        Ok(seq)
    }

    /// 封存轨迹（追加终态步骤）
    pub fn seal(&mut self, outcome: CycleOutcome) -> EngineResult<ReasoningTrace> {
        let (reason_code, rationale) = match &outcome {
            CycleOutcome::Committed { new_version } => (None, format!("已提交，排班版本 {}", new_version)),
            CycleOutcome::Escalated { reason_code } => (Some(reason_code.clone()), "升级人工处理".to_string()),
            CycleOutcome::Planned => (None, "顾问模式，仅输出排序结果".to_string()),
        };
        let subject = self.disruption_id.clone();
        self.append(StepKind::Outcome, subject, reason_code.as_deref(), rationale)?;
        self.sealed = true;
        Ok(ReasoningTrace {
            cycle_id: self.cycle_id.clone(),
            disruption_id: self.disruption_id.clone(),
            steps: std::mem::take(&mut self.steps),
            outcome,
            sealed_at: Utc::now().naive_utc(),
        })
    }
}
