// ==========================================
// 机组排班自愈系统 - 航班领域模型
// ==========================================
// 红线: 一个航班任意时刻至多一个指派飞行员
// ==========================================

use crate::domain::pilot::DutyInterval;
use crate::domain::types::FlightStatus;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ==========================================
// Flight - 航班
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flight {
    pub flight_id: String,                   // 航班ID
    pub flight_number: String,               // 航班号
    pub origin: String,                      // 起飞机场
    pub destination: String,                 // 到达机场
    pub scheduled_departure: NaiveDateTime,  // 计划起飞 (UTC)
    pub scheduled_arrival: NaiveDateTime,    // 计划到达 (UTC)
    pub required_qualification: String,      // 所需机型资质
    pub assigned_pilot_id: Option<String>,   // 指派飞行员
    pub status: FlightStatus,                // 航班状态
    #[serde(default)]
    pub delay_minutes: i64,                  // 已累计延误(分钟)
    #[serde(default = "default_landings")]
    pub landings: u32,                       // 本航班起降次数（经停航班大于1）
}

fn default_landings() -> u32 {
    1
}

impl Flight {
    /// 轮挡时间(分钟)
    pub fn block_minutes(&self) -> i64 {
        (self.scheduled_arrival - self.scheduled_departure).num_minutes()
    }

    /// 推迟 delay 分钟后的起降时间
    pub fn shifted_times(&self, delay_minutes: i64) -> (NaiveDateTime, NaiveDateTime) {
        let shift = Duration::minutes(delay_minutes);
        (self.scheduled_departure + shift, self.scheduled_arrival + shift)
    }

    /// 航班对应的执勤区间（含签到/签退）
    ///
    /// # 参数
    /// - sign_on_minutes: 起飞前签到时长
    /// - sign_off_minutes: 落地后签退时长
    pub fn duty_interval(&self, sign_on_minutes: i64, sign_off_minutes: i64) -> DutyInterval {
        DutyInterval::for_flight(
            &self.flight_id,
            self.scheduled_departure - Duration::minutes(sign_on_minutes),
            self.scheduled_arrival + Duration::minutes(sign_off_minutes),
        )
    }

    /// 推迟后新执勤区间（新飞行员按新时刻签到）
    pub fn delayed_duty_interval(
        &self,
        delay_minutes: i64,
        sign_on_minutes: i64,
        sign_off_minutes: i64,
    ) -> DutyInterval {
        let (dep, arr) = self.shifted_times(delay_minutes);
        DutyInterval::for_flight(
            &self.flight_id,
            dep - Duration::minutes(sign_on_minutes),
            arr + Duration::minutes(sign_off_minutes),
        )
    }

    /// 原机组已签到时的延误执勤区间：签到时刻不变，签退随落地顺延
    pub fn extended_duty_interval(
        &self,
        delay_minutes: i64,
        sign_on_minutes: i64,
        sign_off_minutes: i64,
    ) -> DutyInterval {
        let (_, arr) = self.shifted_times(delay_minutes);
        DutyInterval::for_flight(
            &self.flight_id,
            self.scheduled_departure - Duration::minutes(sign_on_minutes),
            arr + Duration::minutes(sign_off_minutes),
        )
    }

    pub fn is_assigned_to(&self, pilot_id: &str) -> bool {
        self.assigned_pilot_id.as_deref() == Some(pilot_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_flight() -> Flight {
        let day = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        Flight {
            flight_id: "F100".to_string(),
            flight_number: "AR100".to_string(),
            origin: "DEL".to_string(),
            destination: "BOM".to_string(),
            scheduled_departure: day.and_hms_opt(10, 0, 0).unwrap(),
            scheduled_arrival: day.and_hms_opt(12, 0, 0).unwrap(),
            required_qualification: "A320".to_string(),
            assigned_pilot_id: Some("P1".to_string()),
            status: FlightStatus::Scheduled,
            delay_minutes: 0,
            landings: 1,
        }
    }

    #[test]
    fn test_duty_interval_includes_sign_on_and_off() {
        let flight = sample_flight();
        let duty = flight.duty_interval(30, 15);
        assert_eq!(duty.duration_minutes(), 120 + 45);
        assert_eq!(duty.flight_id.as_deref(), Some("F100"));
    }

    #[test]
    fn test_extended_duty_keeps_sign_on() {
        let flight = sample_flight();
        let extended = flight.extended_duty_interval(180, 30, 15);
        let fresh = flight.delayed_duty_interval(180, 30, 15);
        assert_eq!(extended.duration_minutes(), 165 + 180);
        assert_eq!(fresh.duration_minutes(), 165);
        assert_eq!(extended.end, fresh.end);
    }
}
