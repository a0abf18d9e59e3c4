// ==========================================
// 机组排班自愈系统 - 受影响飞行员状态投影
// ==========================================
// 职责: 快照 + 差异 -> 受影响飞行员的投影状态（纯函数）
// 职责: 执勤落位规则（重叠/最大执勤/最小休息/连续夜航）
// 红线: 只在副本上计算，不修改快照
// ==========================================

use crate::config::HealingPolicy;
use crate::domain::candidate::AssignmentDiff;
use crate::domain::flight::Flight;
use crate::domain::pilot::{DutyInterval, Pilot};
use crate::domain::roster::RosterSnapshot;
use crate::domain::types::RejectReason;
use crate::engine::error::{EngineError, EngineResult};
use std::collections::BTreeMap;

// ==========================================
// GainedDuty - 新增执勤
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct GainedDuty {
    pub flight_id: String,
    pub qualification: String,
    pub duty: DutyInterval,
    pub landings: u32,
    /// 原机组延误顺延（签到时刻不变，只延长签退）
    pub extension_only: bool,
}

// ==========================================
// AffectedPilotState - 受影响飞行员投影
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct AffectedPilotState {
    pub pilot_id: String,
    pub before: Pilot,
    pub after: Pilot,
    pub projected_fatigue: f64, // 未截断，可能超过 100
    pub gained: Vec<GainedDuty>,
}

impl AffectedPilotState {
    pub fn fatigue_delta(&self) -> f64 {
        self.projected_fatigue - self.before.fatigue_score
    }
}

/// 航班的标准执勤区间
pub fn flight_duty(flight: &Flight, policy: &HealingPolicy) -> DutyInterval {
    flight.duty_interval(policy.sign_on_minutes, policy.sign_off_minutes)
}

/// 投影差异涉及的全部飞行员（按 pilot_id 升序）
pub fn project_affected_pilots(
    snapshot: &RosterSnapshot,
    diff: &AssignmentDiff,
) -> EngineResult<Vec<AffectedPilotState>> {
    let mut states: BTreeMap<String, AffectedPilotState> = BTreeMap::new();

    let touch = |pilot_id: &str,
                     states: &mut BTreeMap<String, AffectedPilotState>|
     -> EngineResult<()> {
        if states.contains_key(pilot_id) {
            return Ok(());
        }
        let pilot = snapshot.pilot(pilot_id).ok_or_else(|| EngineError::NotFound {
            entity: "Pilot".to_string(),
            id: pilot_id.to_string(),
        })?;
        states.insert(
            pilot_id.to_string(),
            AffectedPilotState {
                pilot_id: pilot_id.to_string(),
                before: pilot.clone(),
                after: pilot.clone(),
                projected_fatigue: pilot.fatigue_score,
                gained: Vec::new(),
            },
        );
        Ok(())
    };

    for change in &diff.flight_changes {
        if let Some(previous) = &change.expected_pilot_id {
            touch(previous, &mut states)?;
            if let Some(state) = states.get_mut(previous) {
                state.after.remove_flight_duty(&change.flight_id);
            }
        }
        if let (Some(new_pilot), Some(duty)) = (&change.new_pilot_id, &change.new_duty) {
            touch(new_pilot, &mut states)?;
            let flight = snapshot.flight(&change.flight_id).ok_or_else(|| EngineError::NotFound {
                entity: "Flight".to_string(),
                id: change.flight_id.clone(),
            })?;
            if let Some(state) = states.get_mut(new_pilot) {
                let prior = state.before.duty_for_flight(&change.flight_id);
                let extension_only = prior.map(|d| d.start == duty.start).unwrap_or(false);
                state.after.remove_flight_duty(&change.flight_id);
                state.after.insert_duty(duty.clone());
                state.gained.push(GainedDuty {
                    flight_id: change.flight_id.clone(),
                    qualification: flight.required_qualification.clone(),
                    duty: duty.clone(),
                    landings: flight.landings,
                    extension_only,
                });
            }
        }
    }

    for change in &diff.pilot_changes {
        touch(&change.pilot_id, &mut states)?;
        if let Some(state) = states.get_mut(&change.pilot_id) {
            state.projected_fatigue += change.fatigue_delta;
            state.after.fatigue_score = state.projected_fatigue;
            state.after.weekly_duty_minutes += change.weekly_minutes_delta;
            if let Some(status) = change.new_status {
                state.after.status = status;
            }
            if let Some(rest_from) = change.rest_available_from {
                state.after.rest_available_from = rest_from;
            }
        }
    }

    Ok(states.into_values().collect())
}

// ==========================================
// 执勤落位规则
// ==========================================

/// 检查 pilot（已包含 duty）上该执勤的落位合法性
///
/// # 参数
/// - `pilot`: 投影后的飞行员（duty 已插入）
/// - `duty`: 待检查的执勤
/// - `extension_only`: 原机组顺延，签到不变，跳过签到前的休息检查
///
/// # 返回
/// - None: 合法
/// - Some((原因, 说明)): 第一条违反的规则
pub fn placement_violation(
    pilot: &Pilot,
    duty: &DutyInterval,
    extension_only: bool,
    policy: &HealingPolicy,
) -> Option<(RejectReason, String)> {
    if duty.duration_minutes() > policy.max_duty_minutes {
        return Some((
            RejectReason::MaxDutyExceeded,
            format!(
                "执勤 {} 分钟 > 上限 {} 分钟",
                duty.duration_minutes(),
                policy.max_duty_minutes
            ),
        ));
    }

    let duties = pilot.sorted_duties();
    let Some(idx) = duties.iter().position(|d| d == duty) else {
        return None;
    };

    if let Some(other) = duties
        .iter()
        .enumerate()
        .find(|(i, d)| *i != idx && d.overlaps(duty))
        .map(|(_, d)| d)
    {
        return Some((
            RejectReason::DutyOverlap,
            format!(
                "与执勤 {} ~ {} 重叠",
                other.start.format("%m-%d %H:%M"),
                other.end.format("%m-%d %H:%M")
            ),
        ));
    }

    if !extension_only {
        if duty.start < pilot.rest_available_from {
            return Some((
                RejectReason::InsufficientRest,
                format!(
                    "签到 {} 早于可执勤时刻 {}",
                    duty.start.format("%m-%d %H:%M"),
                    pilot.rest_available_from.format("%m-%d %H:%M")
                ),
            ));
        }
        if let Some(prev) = idx.checked_sub(1).map(|i| &duties[i]) {
            let rest = prev.rest_before(duty);
            if rest < policy.min_rest_minutes {
                return Some((
                    RejectReason::InsufficientRest,
                    format!("前序休息 {} 分钟 < {} 分钟", rest, policy.min_rest_minutes),
                ));
            }
        }
    }

    if let Some(next) = duties.get(idx + 1) {
        let rest = duty.rest_before(next);
        if rest < policy.min_rest_minutes {
            return Some((
                RejectReason::InsufficientRest,
                format!("后续休息 {} 分钟 < {} 分钟", rest, policy.min_rest_minutes),
            ));
        }
    }

    let is_night = |d: &DutyInterval| d.is_night(policy.night_start_hour, policy.night_end_hour);
    if is_night(duty) {
        let prev_night = idx.checked_sub(1).map(|i| is_night(&duties[i])).unwrap_or(false);
        let next_night = duties.get(idx + 1).map(is_night).unwrap_or(false);
        if prev_night || next_night {
            return Some((
                RejectReason::ConsecutiveNightDuties,
                "相邻执勤均为夜航".to_string(),
            ));
        }
    }

    None
}

/// 夜间执勤起降次数检查：执勤与夜间窗口重叠时，起降次数不得超过上限
pub fn night_landings_violation(
    duty: &DutyInterval,
    landings: u32,
    policy: &HealingPolicy,
) -> Option<(RejectReason, String)> {
    if landings <= policy.max_night_landings {
        return None;
    }
    if !duty.is_night(policy.night_start_hour, policy.night_end_hour) {
        return None;
    }
    Some((
        RejectReason::NightLandingsExceeded,
        format!("夜间执勤起降 {} 次 > 上限 {} 次", landings, policy.max_night_landings),
    ))
}

/// 在 pilot 副本上插入 duty 并检查落位（生成器预筛用）
pub fn check_insertion(
    pilot: &Pilot,
    duty: &DutyInterval,
    policy: &HealingPolicy,
) -> Option<(RejectReason, String)> {
    let mut trial = pilot.clone();
    if let Some(flight_id) = &duty.flight_id {
        trial.remove_flight_duty(flight_id);
    }
    trial.insert_duty(duty.clone());
    placement_violation(&trial, duty, false, policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::PilotStatus;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::collections::BTreeSet;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn pilot_with(duties: Vec<DutyInterval>) -> Pilot {
        Pilot {
            pilot_id: "P1".to_string(),
            name: "Test".to_string(),
            base: "DEL".to_string(),
            qualifications: BTreeSet::from(["A320".to_string()]),
            fatigue_score: 20.0,
            duty_history: duties,
            rest_available_from: at(1, 0),
            status: PilotStatus::Available,
            weekly_duty_minutes: 0,
        }
    }

    #[test]
    fn test_insufficient_rest_is_detected() {
        let policy = HealingPolicy::default();
        let pilot = pilot_with(vec![DutyInterval::for_flight("F0", at(10, 6), at(10, 10))]);
        let duty = DutyInterval::for_flight("F1", at(10, 14), at(10, 17));
        let violation = check_insertion(&pilot, &duty, &policy);
        assert_eq!(violation.map(|v| v.0), Some(RejectReason::InsufficientRest));
    }

    #[test]
    fn test_consecutive_nights_are_rejected() {
        let policy = HealingPolicy::default();
        let pilot = pilot_with(vec![DutyInterval::for_flight("F0", at(10, 1), at(10, 5))]);
        let duty = DutyInterval::for_flight("F1", at(11, 2), at(11, 5));
        let violation = check_insertion(&pilot, &duty, &policy);
        assert_eq!(violation.map(|v| v.0), Some(RejectReason::ConsecutiveNightDuties));
    }

    #[test]
    fn test_overlap_and_max_duty() {
        let policy = HealingPolicy::default();
        let pilot = pilot_with(vec![DutyInterval::for_flight("F0", at(10, 8), at(10, 12))]);
        let overlapping = DutyInterval::for_flight("F1", at(10, 11), at(10, 13));
        assert_eq!(
            check_insertion(&pilot, &overlapping, &policy).map(|v| v.0),
            Some(RejectReason::DutyOverlap)
        );
        let long = DutyInterval::for_flight("F2", at(12, 6), at(12, 15));
        assert_eq!(
            check_insertion(&pilot, &long, &policy).map(|v| v.0),
            Some(RejectReason::MaxDutyExceeded)
        );
    }

    #[test]
    fn test_night_landings_cap() {
        let policy = HealingPolicy::default();
        let night = DutyInterval::for_flight("F1", at(11, 1), at(11, 5));
        let day = DutyInterval::for_flight("F2", at(11, 10), at(11, 14));
        assert!(night_landings_violation(&night, 2, &policy).is_none());
        assert_eq!(
            night_landings_violation(&night, 3, &policy).map(|v| v.0),
            Some(RejectReason::NightLandingsExceeded)
        );
        assert!(night_landings_violation(&day, 3, &policy).is_none());
    }

    #[test]
    fn test_legal_placement() {
        let policy = HealingPolicy::default();
        let pilot = pilot_with(vec![DutyInterval::for_flight("F0", at(10, 8), at(10, 12))]);
        let duty = DutyInterval::for_flight("F1", at(11, 8), at(11, 12));
        assert!(check_insertion(&pilot, &duty, &policy).is_none());
    }
}
