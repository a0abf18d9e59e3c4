// ==========================================
// 机组排班自愈系统 - 飞行员领域模型
// ==========================================
// 红线: 同一飞行员执勤区间不可重叠
// 红线: 提交后疲劳分不得超过策略上限
// ==========================================

use crate::domain::types::PilotStatus;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ==========================================
// DutyInterval - 执勤区间
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutyInterval {
    pub start: NaiveDateTime,       // 签到
    pub end: NaiveDateTime,         // 签退
    pub flight_id: Option<String>,  // 关联航班 (历史执勤可为空)
}

impl DutyInterval {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            start,
            end,
            flight_id: None,
        }
    }

    pub fn for_flight(flight_id: &str, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            start,
            end,
            flight_id: Some(flight_id.to_string()),
        }
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// 半开区间重叠判定 [start, end)
    pub fn overlaps(&self, other: &DutyInterval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// 本区间结束到 next 开始之间的休息时长(分钟)，可为负
    pub fn rest_before(&self, next: &DutyInterval) -> i64 {
        (next.start - self.end).num_minutes()
    }

    /// 是否为夜间执勤（与夜间窗口 [start_hour, end_hour) 有交集）
    pub fn is_night(&self, night_start_hour: u32, night_end_hour: u32) -> bool {
        if night_start_hour >= night_end_hour {
            return false;
        }
        let mut day = self.start.date() - Duration::days(1);
        let last = self.end.date();
        while day <= last {
            let window = (
                day.and_hms_opt(night_start_hour, 0, 0),
                day.and_hms_opt(night_end_hour, 0, 0),
            );
            if let (Some(window_start), Some(window_end)) = window {
                if self.start < window_end && self.end > window_start {
                    return true;
                }
            }
            day += Duration::days(1);
        }
        false
    }

    pub fn is_for_flight(&self, flight_id: &str) -> bool {
        self.flight_id.as_deref() == Some(flight_id)
    }
}

// ==========================================
// Pilot - 飞行员
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pilot {
    pub pilot_id: String,                    // 飞行员ID
    pub name: String,                        // 姓名
    pub base: String,                        // 基地
    pub qualifications: BTreeSet<String>,    // 机型资质
    pub fatigue_score: f64,                  // 疲劳分 (0-100)
    pub duty_history: Vec<DutyInterval>,     // 执勤历史（按签到排序，含未来执勤）
    pub rest_available_from: NaiveDateTime,  // 最早可执勤时刻
    pub status: PilotStatus,                 // 状态
    #[serde(default)]
    pub weekly_duty_minutes: i64,            // 本周累计执勤(分钟)，用于加班费分档
}

impl Pilot {
    pub fn is_qualified(&self, qualification: &str) -> bool {
        self.qualifications.contains(qualification)
    }

    /// 按签到时间排序的执勤列表
    pub fn sorted_duties(&self) -> Vec<DutyInterval> {
        let mut duties = self.duty_history.clone();
        duties.sort_by(|a, b| a.start.cmp(&b.start).then(a.end.cmp(&b.end)));
        duties
    }

    pub fn duty_for_flight(&self, flight_id: &str) -> Option<&DutyInterval> {
        self.duty_history.iter().find(|d| d.is_for_flight(flight_id))
    }

    /// 移除与航班关联的执勤，返回被移除的区间
    pub fn remove_flight_duty(&mut self, flight_id: &str) -> Option<DutyInterval> {
        let idx = self.duty_history.iter().position(|d| d.is_for_flight(flight_id))?;
        Some(self.duty_history.remove(idx))
    }

    /// 插入执勤并保持排序
    pub fn insert_duty(&mut self, duty: DutyInterval) {
        let idx = self
            .duty_history
            .iter()
            .position(|d| d.start > duty.start)
            .unwrap_or(self.duty_history.len());
        self.duty_history.insert(idx, duty);
    }

    /// 执勤区间重叠检查，返回第一对重叠区间
    pub fn find_overlap(&self) -> Option<(DutyInterval, DutyInterval)> {
        let duties = self.sorted_duties();
        duties
            .windows(2)
            .find(|w| w[0].overlaps(&w[1]))
            .map(|w| (w[0].clone(), w[1].clone()))
    }

    /// 相邻执勤最短休息(分钟)，执勤少于两段时返回 None
    pub fn min_rest_between_duties(&self) -> Option<i64> {
        let duties = self.sorted_duties();
        duties.windows(2).map(|w| w[0].rest_before(&w[1])).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_night_detection() {
        let day_duty = DutyInterval::new(at(10, 8), at(10, 16));
        let night_duty = DutyInterval::new(at(10, 22), at(11, 2));
        let early_duty = DutyInterval::new(at(11, 5), at(11, 9));
        assert!(!day_duty.is_night(0, 6));
        assert!(night_duty.is_night(0, 6));
        assert!(early_duty.is_night(0, 6));
    }

    #[test]
    fn test_overlap_is_half_open() {
        let a = DutyInterval::new(at(10, 8), at(10, 10));
        let b = DutyInterval::new(at(10, 10), at(10, 12));
        let c = DutyInterval::new(at(10, 9), at(10, 11));
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert_eq!(a.rest_before(&b), 0);
    }

    #[test]
    fn test_insert_duty_keeps_order() {
        let mut pilot = Pilot {
            pilot_id: "P1".to_string(),
            name: "Test".to_string(),
            base: "DEL".to_string(),
            qualifications: BTreeSet::new(),
            fatigue_score: 10.0,
            duty_history: vec![DutyInterval::new(at(12, 8), at(12, 10))],
            rest_available_from: at(1, 0),
            status: PilotStatus::Available,
            weekly_duty_minutes: 0,
        };
        pilot.insert_duty(DutyInterval::for_flight("F1", at(10, 8), at(10, 10)));
        assert_eq!(pilot.duty_history[0].flight_id.as_deref(), Some("F1"));
        assert_eq!(pilot.min_rest_between_duties(), Some(46 * 60));
        assert!(pilot.remove_flight_duty("F1").is_some());
        assert_eq!(pilot.duty_history.len(), 1);
    }
}
