// ==========================================
// 机组排班自愈系统 - 候选排序
// ==========================================
// 评分: cost_weight × 预测成本 + fatigue_risk_weight × 预测疲劳增量
//       + soft_penalty_weight × 软惩罚，越低越好
// 平局: 按 candidate_id 升序
// ==========================================

use crate::config::HealingPolicy;
use crate::domain::candidate::Candidate;
use std::cmp::Ordering;

/// 计算候选评分
pub fn score(candidate: &Candidate, policy: &HealingPolicy) -> f64 {
    let soft_penalty = candidate
        .verdict
        .as_ref()
        .map(|v| v.soft_penalty())
        .unwrap_or(0.0);
    policy.cost_weight * candidate.predicted_cost
        + policy.fatigue_risk_weight * candidate.predicted_fatigue_delta()
        + policy.soft_penalty_weight * soft_penalty
}

fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    let sa = a.score.unwrap_or(f64::INFINITY);
    let sb = b.score.unwrap_or(f64::INFINITY);
    sa.partial_cmp(&sb)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.candidate_id.cmp(&b.candidate_id))
}

/// 为已通过校验的候选打分并排序（被拒绝的候选排在最后，保持原始顺序）
pub fn rank(candidates: &mut Vec<Candidate>, policy: &HealingPolicy) {
    for candidate in candidates.iter_mut() {
        candidate.score = if candidate.is_accepted() {
            Some(score(candidate, policy))
        } else {
            None
        };
    }
    let (mut accepted, rejected): (Vec<Candidate>, Vec<Candidate>) =
        candidates.drain(..).partition(|c| c.is_accepted());
    accepted.sort_by(compare);
    candidates.extend(accepted);
    candidates.extend(rejected);
}

/// 选出可自动提交的最优候选（取消仅在 auto_cancel 开启时可选）
pub fn select_best<'a>(candidates: &'a [Candidate], policy: &HealingPolicy) -> Option<&'a Candidate> {
    candidates
        .iter()
        .filter(|c| c.is_accepted())
        .filter(|c| policy.auto_cancel || !c.is_cancel())
        .min_by(|a, b| compare(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candidate::{AssignmentDiff, Verdict};
    use crate::domain::types::{CandidateAction, CandidateSource, RejectReason};
    use std::collections::BTreeMap;

    fn candidate(id: &str, action: CandidateAction, cost: f64, fatigue: f64, verdict: Verdict) -> Candidate {
        Candidate {
            candidate_id: id.to_string(),
            flight_id: "F1".to_string(),
            action,
            source: CandidateSource::Heuristic,
            diff: AssignmentDiff::default(),
            predicted_cost: cost,
            fatigue_deltas: BTreeMap::from([("P1".to_string(), fatigue)]),
            co2_kg: 0.0,
            cost_breakdown: vec![],
            verdict: Some(verdict),
            score: None,
            rationale: String::new(),
        }
    }

    #[test]
    fn test_rank_orders_by_score_then_id() {
        let policy = HealingPolicy::default();
        let mut list = vec![
            candidate("b", CandidateAction::AssignReserve, 1000.0, 0.0, Verdict::accept()),
            candidate("a", CandidateAction::AssignReserve, 1000.0, 0.0, Verdict::accept()),
            candidate("c", CandidateAction::Swap, 10.0, 0.0, Verdict::reject(RejectReason::DutyOverlap, None, "")),
            candidate("d", CandidateAction::Delay, 100.0, 10.0, Verdict::accept()),
        ];
        rank(&mut list, &policy);
        let ids: Vec<&str> = list.iter().map(|c| c.candidate_id.as_str()).collect();
        // d: 100 + 500 × 10 = 5100 > 1000
        assert_eq!(ids, vec!["a", "b", "d", "c"]);
        assert!(list[3].score.is_none());
    }

    #[test]
    fn test_cancel_needs_auto_cancel() {
        let mut policy = HealingPolicy::default();
        let list = vec![candidate("x", CandidateAction::Cancel, 0.0, 0.0, Verdict::accept())];
        assert!(select_best(&list, &policy).is_none());
        policy.auto_cancel = true;
        assert_eq!(select_best(&list, &policy).map(|c| c.candidate_id.as_str()), Some("x"));
    }
}
