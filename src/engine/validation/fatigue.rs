// ==========================================
// 机组排班自愈系统 - 疲劳校验
// ==========================================
// 硬约束: 投影疲劳 > 上限 -> fatigue_cap_exceeded
// 软惩罚: 回看窗口内休息缺口(相对推荐休息) + 超出意愿阈值的疲劳
// ==========================================

use crate::config::HealingPolicy;
use crate::domain::candidate::Verdict;
use crate::domain::pilot::Pilot;
use crate::domain::types::RejectReason;
use crate::engine::projection::AffectedPilotState;
use chrono::{Duration, NaiveDateTime};

/// 回看窗口内相邻执勤的休息缺口合计(分钟)
///
/// 只统计后一段执勤签到落在 [reference - lookback, reference] 内的间隔
pub fn rest_deficit_minutes(pilot: &Pilot, reference: NaiveDateTime, policy: &HealingPolicy) -> i64 {
    let window_start = reference - Duration::hours(policy.rest_lookback_hours);
    pilot
        .sorted_duties()
        .windows(2)
        .filter(|w| w[1].start >= window_start && w[1].start <= reference)
        .map(|w| (policy.recommended_rest_minutes - w[0].rest_before(&w[1])).max(0))
        .sum()
}

/// 疲劳校验
pub fn check(states: &[AffectedPilotState], policy: &HealingPolicy) -> Verdict {
    let mut soft_penalty = 0.0;
    let mut notes = Vec::new();

    for state in states.iter().filter(|s| !s.gained.is_empty()) {
        if state.fatigue_delta() > 0.0 && state.projected_fatigue > policy.fatigue_cap {
            return Verdict::reject(
                RejectReason::FatigueCapExceeded,
                Some(&state.pilot_id),
                format!(
                    "投影疲劳 {:.1} > 上限 {:.1}",
                    state.projected_fatigue, policy.fatigue_cap
                ),
            );
        }

        let reference = state
            .gained
            .iter()
            .map(|g| g.duty.start)
            .max()
            .unwrap_or(state.after.rest_available_from);
        let deficit = rest_deficit_minutes(&state.after, reference, policy);
        if deficit > 0 {
            soft_penalty += deficit as f64 / 60.0 * policy.rest_deficit_penalty_per_hour;
            notes.push(format!("{} 回看窗口休息缺口 {} 分钟", state.pilot_id, deficit));
        }

        let over = state.projected_fatigue - policy.soft_fatigue_threshold;
        if over > 0.0 {
            soft_penalty += over * policy.high_fatigue_penalty_per_point;
            notes.push(format!(
                "{} 疲劳 {:.1} 超过意愿阈值 {:.1}，需安排补休",
                state.pilot_id, state.projected_fatigue, policy.soft_fatigue_threshold
            ));
        }
    }

    Verdict::Accept { soft_penalty, notes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pilot::DutyInterval;
    use crate::domain::types::PilotStatus;
    use crate::engine::projection::GainedDuty;
    use chrono::NaiveDate;
    use std::collections::BTreeSet;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn state(fatigue: f64, projected: f64, history: Vec<DutyInterval>) -> AffectedPilotState {
        let duty = DutyInterval::for_flight("F1", at(10, 8), at(10, 12));
        let before = Pilot {
            pilot_id: "P1".to_string(),
            name: "Test".to_string(),
            base: "DEL".to_string(),
            qualifications: BTreeSet::from(["A320".to_string()]),
            fatigue_score: fatigue,
            duty_history: history,
            rest_available_from: at(1, 0),
            status: PilotStatus::Available,
            weekly_duty_minutes: 0,
        };
        let mut after = before.clone();
        after.insert_duty(duty.clone());
        after.fatigue_score = projected;
        AffectedPilotState {
            pilot_id: "P1".to_string(),
            before,
            after,
            projected_fatigue: projected,
            gained: vec![GainedDuty {
                flight_id: "F1".to_string(),
                qualification: "A320".to_string(),
                duty,
                landings: 1,
                extension_only: false,
            }],
        }
    }

    #[test]
    fn test_fatigue_cap_is_hard() {
        let verdict = check(&[state(75.0, 85.0, vec![])], &HealingPolicy::default());
        assert_eq!(verdict.reject_reason(), Some(RejectReason::FatigueCapExceeded));
    }

    #[test]
    fn test_soft_penalty_above_threshold() {
        let verdict = check(&[state(55.0, 65.0, vec![])], &HealingPolicy::default());
        assert!(verdict.is_accept());
        assert!((verdict.soft_penalty() - 5.0 * 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_rest_deficit_within_lookback() {
        // 前一段执勤 09日 12:00 -> 22:00，到 10日 08:00 休息 600 分钟，推荐 720
        let history = vec![DutyInterval::new(at(9, 12), at(9, 22))];
        let verdict = check(&[state(20.0, 30.0, history)], &HealingPolicy::default());
        assert!((verdict.soft_penalty() - 2.0 * 200.0).abs() < 1e-9);
    }
}
