// ==========================================
// 机组排班自愈系统 - 校验流水线
// ==========================================
// 职责: 按顺序执行校验器，首个 Reject 即短路
// 并行: validate_all 用 rayon 对候选并行校验（校验器无副作用）
// ==========================================

use crate::config::HealingPolicy;
use crate::domain::candidate::{Candidate, Verdict};
use crate::domain::roster::RosterSnapshot;
use crate::domain::types::RejectReason;
use crate::engine::projection::{project_affected_pilots, AffectedPilotState};
use crate::engine::validation::{fatigue, safety};
use rayon::prelude::*;
use std::fmt;
use tracing::debug;

// ==========================================
// Validator - 校验器
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    Safety,
    Fatigue,
}

impl Validator {
    pub fn check(&self, states: &[AffectedPilotState], policy: &HealingPolicy) -> Verdict {
        match self {
            Validator::Safety => safety::check(states, policy),
            Validator::Fatigue => fatigue::check(states, policy),
        }
    }
}

impl fmt::Display for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validator::Safety => write!(f, "SAFETY"),
            Validator::Fatigue => write!(f, "FATIGUE"),
        }
    }
}

// ==========================================
// ValidationPipeline - 校验流水线
// ==========================================
#[derive(Debug, Clone)]
pub struct ValidationPipeline {
    validators: Vec<Validator>,
}

impl Default for ValidationPipeline {
    fn default() -> Self {
        Self::new(vec![Validator::Safety, Validator::Fatigue])
    }
}

impl ValidationPipeline {
    pub fn new(validators: Vec<Validator>) -> Self {
        Self { validators }
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    /// 校验单个候选
    ///
    /// # 规则
    /// - 差异记录的原指派与快照不一致 -> stale_assignment
    /// - 依次执行校验器，Accept 的软惩罚与备注累加
    pub fn validate(&self, candidate: &Candidate, snapshot: &RosterSnapshot, policy: &HealingPolicy) -> Verdict {
        for change in &candidate.diff.flight_changes {
            let current = snapshot.flight(&change.flight_id).map(|f| &f.assigned_pilot_id);
            if current != Some(&change.expected_pilot_id) {
                return Verdict::reject(
                    RejectReason::StaleAssignment,
                    change.expected_pilot_id.as_deref(),
                    format!("航班 {} 的指派已变化", change.flight_id),
                );
            }
        }

        let states = match project_affected_pilots(snapshot, &candidate.diff) {
            Ok(states) => states,
            Err(e) => {
                return Verdict::reject(RejectReason::StaleAssignment, None, e.to_string());
            }
        };

        let mut soft_penalty = 0.0;
        let mut notes = Vec::new();
        for validator in &self.validators {
            match validator.check(&states, policy) {
                Verdict::Accept {
                    soft_penalty: penalty,
                    notes: mut extra,
                } => {
                    soft_penalty += penalty;
                    notes.append(&mut extra);
                }
                reject => {
                    debug!(
                        candidate_id = %candidate.candidate_id,
                        validator = %validator,
                        reason = reject.reject_reason().map(|r| r.code()).unwrap_or(""),
                        "候选被拒绝"
                    );
                    return reject;
                }
            }
        }
        Verdict::Accept { soft_penalty, notes }
    }

    /// 并行校验全部候选，结论写入 candidate.verdict
    pub fn validate_all(&self, candidates: &mut [Candidate], snapshot: &RosterSnapshot, policy: &HealingPolicy) {
        candidates.par_iter_mut().for_each(|candidate| {
            let verdict = self.validate(candidate, snapshot, policy);
            candidate.verdict = Some(verdict);
        });
    }
}
