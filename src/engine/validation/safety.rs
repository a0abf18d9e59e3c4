// ==========================================
// 机组排班自愈系统 - 安全校验
// ==========================================
// 规则顺序: 可用性 -> 资质 -> 执勤落位（最大执勤/重叠/最小休息/连续夜航） -> 夜间起降
// 红线: 纯函数，首条违反即拒绝
// ==========================================

use crate::config::HealingPolicy;
use crate::domain::candidate::Verdict;
use crate::domain::types::RejectReason;
use crate::engine::projection::{night_landings_violation, placement_violation, AffectedPilotState};

/// 安全校验
pub fn check(states: &[AffectedPilotState], policy: &HealingPolicy) -> Verdict {
    for state in states.iter().filter(|s| !s.gained.is_empty()) {
        let pilot_id = state.pilot_id.as_str();

        if !state.before.status.can_take_duty() || !state.after.status.can_take_duty() {
            return Verdict::reject(
                RejectReason::PilotUnavailable,
                Some(pilot_id),
                format!("飞行员状态 {}", state.after.status),
            );
        }

        for gained in &state.gained {
            if !state.after.is_qualified(&gained.qualification) {
                return Verdict::reject(
                    RejectReason::QualificationMismatch,
                    Some(pilot_id),
                    format!("航班 {} 需要资质 {}", gained.flight_id, gained.qualification),
                );
            }
            if let Some((reason, detail)) =
                placement_violation(&state.after, &gained.duty, gained.extension_only, policy)
            {
                return Verdict::reject(reason, Some(pilot_id), format!("航班 {}: {}", gained.flight_id, detail));
            }
            if let Some((reason, detail)) = night_landings_violation(&gained.duty, gained.landings, policy) {
                return Verdict::reject(reason, Some(pilot_id), format!("航班 {}: {}", gained.flight_id, detail));
            }
        }
    }
    Verdict::accept()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pilot::{DutyInterval, Pilot};
    use crate::domain::types::PilotStatus;
    use crate::engine::projection::GainedDuty;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::collections::BTreeSet;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn state(status: PilotStatus, qualification: &str) -> AffectedPilotState {
        state_with(status, qualification, DutyInterval::for_flight("F1", at(10, 8), at(10, 12)), 1)
    }

    fn state_with(status: PilotStatus, qualification: &str, duty: DutyInterval, landings: u32) -> AffectedPilotState {
        let before = Pilot {
            pilot_id: "R1".to_string(),
            name: "Reserve".to_string(),
            base: "DEL".to_string(),
            qualifications: BTreeSet::from([qualification.to_string()]),
            fatigue_score: 10.0,
            duty_history: vec![],
            rest_available_from: at(1, 0),
            status,
            weekly_duty_minutes: 0,
        };
        let mut after = before.clone();
        after.insert_duty(duty.clone());
        AffectedPilotState {
            pilot_id: "R1".to_string(),
            before,
            after,
            projected_fatigue: 10.0,
            gained: vec![GainedDuty {
                flight_id: "F1".to_string(),
                qualification: "A320".to_string(),
                duty,
                landings,
                extension_only: false,
            }],
        }
    }

    #[test]
    fn test_qualification_mismatch() {
        let verdict = check(&[state(PilotStatus::Reserve, "B737")], &HealingPolicy::default());
        assert_eq!(verdict.reject_reason(), Some(RejectReason::QualificationMismatch));
    }

    #[test]
    fn test_unavailable_pilot_is_rejected_first() {
        let verdict = check(&[state(PilotStatus::Sick, "B737")], &HealingPolicy::default());
        assert_eq!(verdict.reject_reason(), Some(RejectReason::PilotUnavailable));
    }

    #[test]
    fn test_night_duty_with_three_landings_is_rejected() {
        let night = DutyInterval::for_flight("F1", at(11, 1), at(11, 5));
        let verdict = check(
            &[state_with(PilotStatus::Reserve, "A320", night.clone(), 3)],
            &HealingPolicy::default(),
        );
        assert_eq!(verdict.reject_reason(), Some(RejectReason::NightLandingsExceeded));

        let verdict = check(&[state_with(PilotStatus::Reserve, "A320", night, 2)], &HealingPolicy::default());
        assert!(verdict.is_accept());
    }

    #[test]
    fn test_clean_assignment_is_accepted() {
        let verdict = check(&[state(PilotStatus::Reserve, "A320")], &HealingPolicy::default());
        assert!(verdict.is_accept());
    }
}
