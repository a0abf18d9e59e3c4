// ==========================================
// 机组排班自愈系统 - 修复候选领域模型
// ==========================================
// 红线: 候选方案只描述差异(diff)，生成与校验期间不修改共享排班
// 生命周期: 每个自愈周期内创建，周期结束即丢弃
// ==========================================

use crate::domain::pilot::DutyInterval;
use crate::domain::types::{
    CandidateAction, CandidateSource, FlightStatus, PilotStatus, RejectReason,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ==========================================
// FlightChange - 航班变更
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightChange {
    pub flight_id: String,
    pub expected_pilot_id: Option<String>, // 生成时的原指派，提交时须一致
    pub new_pilot_id: Option<String>,      // 新指派 (None = 取消/解除)
    pub new_departure: NaiveDateTime,
    pub new_arrival: NaiveDateTime,
    pub new_status: FlightStatus,
    pub added_delay_minutes: i64,          // 本次新增延误
    pub new_duty: Option<DutyInterval>,    // 新飞行员的执勤区间
}

// ==========================================
// PilotChange - 飞行员变更
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PilotChange {
    pub pilot_id: String,
    pub fatigue_delta: f64,
    pub weekly_minutes_delta: i64,
    pub new_status: Option<PilotStatus>,
    pub rest_available_from: Option<NaiveDateTime>,
}

impl PilotChange {
    pub fn status_only(pilot_id: &str, status: PilotStatus) -> Self {
        Self {
            pilot_id: pilot_id.to_string(),
            fatigue_delta: 0.0,
            weekly_minutes_delta: 0,
            new_status: Some(status),
            rest_available_from: None,
        }
    }
}

// ==========================================
// AssignmentDiff - 指派差异
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignmentDiff {
    pub flight_changes: Vec<FlightChange>,
    pub pilot_changes: Vec<PilotChange>,
}

impl AssignmentDiff {
    pub fn is_empty(&self) -> bool {
        self.flight_changes.is_empty() && self.pilot_changes.is_empty()
    }

    /// 合并另一个差异（用于一次周期内多个航班的整体提交）
    pub fn merge(&mut self, other: &AssignmentDiff) {
        self.flight_changes.extend(other.flight_changes.iter().cloned());
        for change in &other.pilot_changes {
            match self
                .pilot_changes
                .iter_mut()
                .find(|c| c.pilot_id == change.pilot_id)
            {
                Some(existing) => {
                    existing.fatigue_delta += change.fatigue_delta;
                    existing.weekly_minutes_delta += change.weekly_minutes_delta;
                    if change.new_status.is_some() {
                        existing.new_status = change.new_status;
                    }
                    if change.rest_available_from.is_some() {
                        existing.rest_available_from = change.rest_available_from;
                    }
                }
                None => self.pilot_changes.push(change.clone()),
            }
        }
    }

    /// 涉及的实体锁键（升序），格式 "flight:{id}" / "pilot:{id}"
    pub fn entity_keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        for change in &self.flight_changes {
            keys.insert(format!("flight:{}", change.flight_id));
            if let Some(p) = &change.expected_pilot_id {
                keys.insert(format!("pilot:{}", p));
            }
            if let Some(p) = &change.new_pilot_id {
                keys.insert(format!("pilot:{}", p));
            }
        }
        for change in &self.pilot_changes {
            keys.insert(format!("pilot:{}", change.pilot_id));
        }
        keys
    }

    /// 获得新执勤的飞行员
    pub fn gaining_pilots(&self) -> BTreeSet<String> {
        self.flight_changes
            .iter()
            .filter(|c| c.new_duty.is_some())
            .filter_map(|c| c.new_pilot_id.clone())
            .collect()
    }

    pub fn affected_flights(&self) -> BTreeSet<String> {
        self.flight_changes.iter().map(|c| c.flight_id.clone()).collect()
    }
}

// ==========================================
// Verdict - 校验结论
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Accept {
        soft_penalty: f64,
        notes: Vec<String>,
    },
    Reject {
        reason: RejectReason,
        pilot_id: Option<String>,
        detail: String,
    },
}

impl Verdict {
    pub fn accept() -> Self {
        Verdict::Accept {
            soft_penalty: 0.0,
            notes: Vec::new(),
        }
    }

    pub fn reject(reason: RejectReason, pilot_id: Option<&str>, detail: impl Into<String>) -> Self {
        Verdict::Reject {
            reason,
            pilot_id: pilot_id.map(|s| s.to_string()),
            detail: detail.into(),
        }
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept { .. })
    }

    pub fn soft_penalty(&self) -> f64 {
        match self {
            Verdict::Accept { soft_penalty, .. } => *soft_penalty,
            Verdict::Reject { .. } => 0.0,
        }
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Verdict::Reject { reason, .. } => Some(*reason),
            Verdict::Accept { .. } => None,
        }
    }
}

// ==========================================
// DutyGain - 新增执勤负荷（估算器输入）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DutyGain {
    pub pilot_id: String,
    pub minutes: i64,
    pub night: bool,
}

// ==========================================
// CandidateDraft - 候选草稿（待估算）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateDraft {
    pub flight_id: String,
    pub action: CandidateAction,
    pub source: CandidateSource,
    pub diff: AssignmentDiff,
    pub delay_minutes: i64,
    pub gains: Vec<DutyGain>,
    pub rationale: String,
}

// ==========================================
// Estimate - 成本/疲劳估算结果
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub predicted_cost: f64,
    pub fatigue_deltas: BTreeMap<String, f64>,
    pub co2_kg: f64,
    pub breakdown: Vec<CostItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostItem {
    pub category: String,
    pub amount: f64,
}

// ==========================================
// Candidate - 修复候选
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub candidate_id: String,                 // 确定性ID（同一快照重复计算结果一致）
    pub flight_id: String,                    // 目标航班
    pub action: CandidateAction,
    pub source: CandidateSource,
    pub diff: AssignmentDiff,
    pub predicted_cost: f64,
    pub fatigue_deltas: BTreeMap<String, f64>,
    pub co2_kg: f64,
    pub cost_breakdown: Vec<CostItem>,
    pub verdict: Option<Verdict>,
    pub score: Option<f64>,
    pub rationale: String,
}

impl Candidate {
    /// 由草稿和估算结果组装候选，疲劳增量同步写入 diff
    pub fn from_draft(candidate_id: String, mut draft: CandidateDraft, estimate: Estimate) -> Self {
        for (pilot_id, delta) in &estimate.fatigue_deltas {
            match draft
                .diff
                .pilot_changes
                .iter_mut()
                .find(|c| &c.pilot_id == pilot_id)
            {
                Some(change) => change.fatigue_delta += delta,
                None => draft.diff.pilot_changes.push(PilotChange {
                    pilot_id: pilot_id.clone(),
                    fatigue_delta: *delta,
                    weekly_minutes_delta: 0,
                    new_status: None,
                    rest_available_from: None,
                }),
            }
        }
        for gain in &draft.gains {
            if let Some(change) = draft
                .diff
                .pilot_changes
                .iter_mut()
                .find(|c| c.pilot_id == gain.pilot_id)
            {
                change.weekly_minutes_delta += gain.minutes;
            }
        }

        Self {
            candidate_id,
            flight_id: draft.flight_id,
            action: draft.action,
            source: draft.source,
            diff: draft.diff,
            predicted_cost: estimate.predicted_cost,
            fatigue_deltas: estimate.fatigue_deltas,
            co2_kg: estimate.co2_kg,
            cost_breakdown: estimate.breakdown,
            verdict: None,
            score: None,
            rationale: draft.rationale,
        }
    }

    /// 预测疲劳增量（各飞行员正增量之和）
    pub fn predicted_fatigue_delta(&self) -> f64 {
        self.fatigue_deltas.values().filter(|d| **d > 0.0).sum()
    }

    /// 通过本候选获得执勤的飞行员
    pub fn assigned_pilots(&self) -> BTreeSet<String> {
        self.diff.gaining_pilots()
    }

    pub fn is_accepted(&self) -> bool {
        self.verdict.as_ref().map(|v| v.is_accept()).unwrap_or(false)
    }

    pub fn is_cancel(&self) -> bool {
        self.action == CandidateAction::Cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_keys_are_sorted_and_deduplicated() {
        let diff = AssignmentDiff {
            flight_changes: vec![],
            pilot_changes: vec![
                PilotChange::status_only("P9", PilotStatus::Sick),
                PilotChange::status_only("P1", PilotStatus::Available),
                PilotChange::status_only("P9", PilotStatus::Sick),
            ],
        };
        let keys: Vec<String> = diff.entity_keys().into_iter().collect();
        assert_eq!(keys, vec!["pilot:P1".to_string(), "pilot:P9".to_string()]);
    }

    #[test]
    fn test_merge_accumulates_pilot_deltas() {
        let mut a = AssignmentDiff::default();
        a.pilot_changes.push(PilotChange {
            pilot_id: "P1".to_string(),
            fatigue_delta: 5.0,
            weekly_minutes_delta: 60,
            new_status: None,
            rest_available_from: None,
        });
        let mut b = a.clone();
        b.pilot_changes[0].new_status = Some(PilotStatus::OnDuty);
        a.merge(&b);
        assert_eq!(a.pilot_changes.len(), 1);
        assert_eq!(a.pilot_changes[0].fatigue_delta, 10.0);
        assert_eq!(a.pilot_changes[0].weekly_minutes_delta, 120);
        assert_eq!(a.pilot_changes[0].new_status, Some(PilotStatus::OnDuty));
    }
}
