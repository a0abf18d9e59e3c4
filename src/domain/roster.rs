// ==========================================
// 机组排班自愈系统 - 排班聚合 / 快照
// ==========================================
// 职责: 航班 + 飞行员 + 未关闭扰动的不可变视图
// 红线: 读方只持有 Arc<RosterSnapshot>，唯一的写入口是提交时的 apply_diff
// 红线: 提交前对投影状态复核结构性不变量
// ==========================================

use crate::domain::candidate::AssignmentDiff;
use crate::domain::disruption::Disruption;
use crate::domain::flight::Flight;
use crate::domain::pilot::Pilot;
use crate::domain::types::PilotStatus;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ==========================================
// InvariantLimits - 不变量阈值
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvariantLimits {
    pub min_rest_minutes: i64,
    pub max_duty_minutes: i64,
    pub fatigue_cap: f64,
}

// ==========================================
// RosterViolation - 不变量违反
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterViolation {
    pub entity: String, // "flight:F1" / "pilot:P1"
    pub rule: String,   // 原因码
    pub detail: String,
}

impl RosterViolation {
    fn new(entity: String, rule: &str, detail: String) -> Self {
        Self {
            entity,
            rule: rule.to_string(),
            detail,
        }
    }
}

impl fmt::Display for RosterViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.entity, self.rule, self.detail)
    }
}

// ==========================================
// RosterSnapshot - 排班快照
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterSnapshot {
    pub version: u64,
    pub as_of: NaiveDateTime,
    pub flights: BTreeMap<String, Flight>,
    pub pilots: BTreeMap<String, Pilot>,
    #[serde(default)]
    pub disruptions: BTreeMap<String, Disruption>,
}

impl RosterSnapshot {
    pub fn new(as_of: NaiveDateTime, flights: Vec<Flight>, pilots: Vec<Pilot>) -> Self {
        Self {
            version: 1,
            as_of,
            flights: flights
                .into_iter()
                .map(|f| (f.flight_id.clone(), f))
                .collect(),
            pilots: pilots.into_iter().map(|p| (p.pilot_id.clone(), p)).collect(),
            disruptions: BTreeMap::new(),
        }
    }

    pub fn flight(&self, flight_id: &str) -> Option<&Flight> {
        self.flights.get(flight_id)
    }

    pub fn pilot(&self, pilot_id: &str) -> Option<&Pilot> {
        self.pilots.get(pilot_id)
    }

    pub fn open_disruptions(&self) -> impl Iterator<Item = &Disruption> {
        self.disruptions.values().filter(|d| d.is_open())
    }

    /// 飞行员名下仍执行的航班（按起飞时间排序）
    pub fn flights_of_pilot(&self, pilot_id: &str) -> Vec<&Flight> {
        let mut flights: Vec<&Flight> = self
            .flights
            .values()
            .filter(|f| f.status.is_operating() && f.is_assigned_to(pilot_id))
            .collect();
        flights.sort_by(|a, b| {
            a.scheduled_departure
                .cmp(&b.scheduled_departure)
                .then_with(|| a.flight_id.cmp(&b.flight_id))
        });
        flights
    }

    /// 备份飞行员: Reserve 状态，或 Available 且名下无航班
    pub fn is_reserve(&self, pilot: &Pilot) -> bool {
        match pilot.status {
            PilotStatus::Reserve => true,
            PilotStatus::Available => self.flights_of_pilot(&pilot.pilot_id).is_empty(),
            _ => false,
        }
    }

    pub fn reserve_pilots(&self) -> Vec<&Pilot> {
        self.pilots.values().filter(|p| self.is_reserve(p)).collect()
    }

    /// 从某机场起飞的执行中航班（机场级扰动展开）
    pub fn departures_from(&self, airport: &str) -> Vec<String> {
        self.flights
            .values()
            .filter(|f| f.status.is_operating() && f.origin == airport)
            .map(|f| f.flight_id.clone())
            .collect()
    }

    /// 起飞时间落在 [start, end) 内的执行中航班
    pub fn flights_in_window(&self, start: NaiveDateTime, end: NaiveDateTime) -> Vec<&Flight> {
        let mut flights: Vec<&Flight> = self
            .flights
            .values()
            .filter(|f| {
                f.status.is_operating()
                    && f.scheduled_departure >= start
                    && f.scheduled_departure < end
            })
            .collect();
        flights.sort_by(|a, b| {
            a.scheduled_departure
                .cmp(&b.scheduled_departure)
                .then_with(|| a.flight_id.cmp(&b.flight_id))
        });
        flights
    }

    // ==========================================
    // 差异应用
    // ==========================================

    /// 将差异应用到本快照（调用方负责在副本上调用）
    ///
    /// 航班的当前指派必须与差异中记录的原指派一致，否则返回 stale_assignment
    pub fn apply_diff(&mut self, diff: &AssignmentDiff) -> Result<(), RosterViolation> {
        for change in &diff.flight_changes {
            let entity = format!("flight:{}", change.flight_id);
            let flight = self.flights.get_mut(&change.flight_id).ok_or_else(|| {
                RosterViolation::new(entity.clone(), "not_found", "航班不存在".to_string())
            })?;

            if flight.assigned_pilot_id != change.expected_pilot_id {
                return Err(RosterViolation::new(
                    entity,
                    "stale_assignment",
                    format!(
                        "期望指派={:?}, 实际指派={:?}",
                        change.expected_pilot_id, flight.assigned_pilot_id
                    ),
                ));
            }

            flight.assigned_pilot_id = change.new_pilot_id.clone();
            flight.scheduled_departure = change.new_departure;
            flight.scheduled_arrival = change.new_arrival;
            flight.status = change.new_status;
            flight.delay_minutes += change.added_delay_minutes;

            if let Some(previous) = &change.expected_pilot_id {
                if let Some(pilot) = self.pilots.get_mut(previous) {
                    pilot.remove_flight_duty(&change.flight_id);
                }
            }

            if let (Some(new_pilot), Some(duty)) = (&change.new_pilot_id, &change.new_duty) {
                let pilot = self.pilots.get_mut(new_pilot).ok_or_else(|| {
                    RosterViolation::new(
                        format!("pilot:{}", new_pilot),
                        "not_found",
                        "飞行员不存在".to_string(),
                    )
                })?;
                pilot.remove_flight_duty(&change.flight_id);
                pilot.insert_duty(duty.clone());
            }
        }

        for change in &diff.pilot_changes {
            let pilot = self.pilots.get_mut(&change.pilot_id).ok_or_else(|| {
                RosterViolation::new(
                    format!("pilot:{}", change.pilot_id),
                    "not_found",
                    "飞行员不存在".to_string(),
                )
            })?;
            pilot.fatigue_score = (pilot.fatigue_score + change.fatigue_delta).clamp(0.0, 100.0);
            pilot.weekly_duty_minutes += change.weekly_minutes_delta;
            if let Some(status) = change.new_status {
                pilot.status = status;
            }
            if let Some(rest_from) = change.rest_available_from {
                pilot.rest_available_from = rest_from;
            }
        }

        Ok(())
    }

    // ==========================================
    // 不变量复核
    // ==========================================

    /// 复核差异涉及实体的结构性不变量
    ///
    /// - 航班执勤至多归属一名飞行员
    /// - 飞行员执勤不重叠
    /// - 新增执勤与相邻执勤间隔 ≥ 最小休息，单段执勤 ≤ 最大执勤
    /// - 疲劳增加的飞行员不超过上限
    pub fn check_invariants(
        &self,
        diff: &AssignmentDiff,
        limits: &InvariantLimits,
    ) -> Result<(), RosterViolation> {
        for flight_id in diff.affected_flights() {
            let holders: Vec<&str> = self
                .pilots
                .values()
                .filter(|p| p.duty_for_flight(&flight_id).is_some())
                .map(|p| p.pilot_id.as_str())
                .collect();
            if holders.len() > 1 {
                return Err(RosterViolation::new(
                    format!("flight:{}", flight_id),
                    "multiple_pilots",
                    format!("航班执勤同时归属: {}", holders.join(",")),
                ));
            }
        }

        let touched: BTreeSet<String> = diff
            .entity_keys()
            .into_iter()
            .filter_map(|k| k.strip_prefix("pilot:").map(|s| s.to_string()))
            .collect();

        for pilot_id in &touched {
            let Some(pilot) = self.pilots.get(pilot_id) else {
                continue;
            };
            let entity = format!("pilot:{}", pilot_id);
            if let Some((a, b)) = pilot.find_overlap() {
                return Err(RosterViolation::new(
                    entity,
                    "duty_overlap",
                    format!("{} ~ {} 与 {} ~ {} 重叠", a.start, a.end, b.start, b.end),
                ));
            }
        }

        for change in &diff.flight_changes {
            let (Some(pilot_id), Some(duty)) = (&change.new_pilot_id, &change.new_duty) else {
                continue;
            };
            let Some(pilot) = self.pilots.get(pilot_id) else {
                continue;
            };
            let entity = format!("pilot:{}", pilot_id);
            if duty.duration_minutes() > limits.max_duty_minutes {
                return Err(RosterViolation::new(
                    entity,
                    "max_duty_exceeded",
                    format!("执勤 {} 分钟", duty.duration_minutes()),
                ));
            }
            let duties = pilot.sorted_duties();
            if let Some(idx) = duties.iter().position(|d| d.is_for_flight(&change.flight_id)) {
                let prev_rest = idx.checked_sub(1).map(|i| duties[i].rest_before(&duties[idx]));
                let next_rest = duties.get(idx + 1).map(|n| duties[idx].rest_before(n));
                for rest in [prev_rest, next_rest].into_iter().flatten() {
                    if rest < limits.min_rest_minutes {
                        return Err(RosterViolation::new(
                            entity,
                            "insufficient_rest",
                            format!("休息 {} 分钟 < {}", rest, limits.min_rest_minutes),
                        ));
                    }
                }
            }
        }

        for change in &diff.pilot_changes {
            if change.fatigue_delta <= 0.0 {
                continue;
            }
            if let Some(pilot) = self.pilots.get(&change.pilot_id) {
                if pilot.fatigue_score > limits.fatigue_cap {
                    return Err(RosterViolation::new(
                        format!("pilot:{}", change.pilot_id),
                        "fatigue_cap_exceeded",
                        format!("疲劳 {:.1} > {:.1}", pilot.fatigue_score, limits.fatigue_cap),
                    ));
                }
            }
        }

        Ok(())
    }

    /// 在副本上应用差异并复核，成功返回投影状态（版本号不变）
    pub fn project(
        &self,
        diff: &AssignmentDiff,
        limits: &InvariantLimits,
    ) -> Result<RosterSnapshot, RosterViolation> {
        let mut next = self.clone();
        next.apply_diff(diff)?;
        next.check_invariants(diff, limits)?;
        Ok(next)
    }
}
