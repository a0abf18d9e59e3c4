// ==========================================
// 机组排班自愈系统 - 扰动分类引擎
// ==========================================
// 职责: 扰动 + 快照 -> 关键航班集合（含级联影响）
// 输入: Disruption + RosterSnapshot + HealingPolicy
// 输出: 关键航班(原因/预测延误/级联深度) + 不可用飞行员
// 红线: 所有关键航班必须输出原因码
// ==========================================

use crate::config::HealingPolicy;
use crate::domain::disruption::Disruption;
use crate::domain::flight::Flight;
use crate::domain::roster::RosterSnapshot;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::projection::flight_duty;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

// ==========================================
// CriticalReason - 关键原因
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalReason {
    DirectDelay,        // 直接延误超过阈值
    PilotUnavailable,   // 机组不可用（病假/休假）
    DutyLimitExceeded,  // 延误后执勤超过上限
    FatigueCapExceeded, // 延误后疲劳超过上限
    Unassigned,         // 无指派机组
    CascadeDelay,       // 级联延误超过阈值
}

impl CriticalReason {
    pub fn code(&self) -> &'static str {
        match self {
            CriticalReason::DirectDelay => "direct_delay",
            CriticalReason::PilotUnavailable => "pilot_unavailable",
            CriticalReason::DutyLimitExceeded => "duty_limit_exceeded",
            CriticalReason::FatigueCapExceeded => "fatigue_cap_exceeded",
            CriticalReason::Unassigned => "unassigned",
            CriticalReason::CascadeDelay => "cascade_delay",
        }
    }
}

// ==========================================
// CriticalFlight - 关键航班
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalFlight {
    pub flight_id: String,
    pub reason: CriticalReason,
    pub predicted_delay_minutes: i64,
    pub cascade_depth: u32,            // 0 = 直接受影响
    pub affected_pilot: Option<String>,
    pub departure: NaiveDateTime,
}

// ==========================================
// Classification - 分类结果
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub direct_flight_ids: Vec<String>,
    pub direct_delay_minutes: i64,
    pub critical: Vec<CriticalFlight>,          // 按起飞时间、航班ID排序
    pub unavailable_pilots: BTreeSet<String>,   // 本周期不可用机组
    pub newly_sick_pilots: BTreeSet<String>,    // 需要标记为 Sick 的机组
    pub absorbed: BTreeMap<String, i64>,        // 受影响但未超过阈值的航班 -> 预测延误
}

impl Classification {
    pub fn is_empty(&self) -> bool {
        self.critical.is_empty()
    }
}

// ==========================================
// DisruptionClassifier - 扰动分类引擎
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct DisruptionClassifier;

impl DisruptionClassifier {
    pub fn new() -> Self {
        Self
    }

    /// 扰动直接受影响航班（机场级扰动按起飞机场展开）
    pub fn resolve_direct_flights(
        &self,
        disruption: &Disruption,
        snapshot: &RosterSnapshot,
    ) -> EngineResult<Vec<String>> {
        if !disruption.affected_flight_ids.is_empty() {
            for flight_id in &disruption.affected_flight_ids {
                if snapshot.flight(flight_id).is_none() {
                    return Err(EngineError::NotFound {
                        entity: "Flight".to_string(),
                        id: flight_id.clone(),
                    });
                }
            }
            let unique: BTreeSet<String> = disruption.affected_flight_ids.iter().cloned().collect();
            return Ok(unique.into_iter().collect());
        }
        match &disruption.affected_airport {
            Some(airport) => Ok(snapshot.departures_from(airport)),
            None => Err(EngineError::Validation(format!(
                "扰动 {} 未指定航班或机场",
                disruption.disruption_id
            ))),
        }
    }

    /// 扰动带来的直接延误（显式值优先，否则按类型/严重度取默认）
    pub fn direct_delay(&self, disruption: &Disruption, policy: &HealingPolicy) -> i64 {
        disruption
            .delay_minutes
            .unwrap_or_else(|| {
                policy
                    .delay_defaults
                    .lookup(disruption.disruption_type, disruption.severity)
            })
            .max(0)
    }

    /// 分类
    ///
    /// # 算法
    /// 1. 标记直接受影响航班，计算直接延误
    /// 2. 沿每名受影响飞行员的后续执勤链按起飞顺序传播延误:
    ///    next_delay = max(0, 上一执勤延误后结束 + 最小休息 - 下一执勤开始)
    /// 3. 传播延误 < ε 时停止本段级联，从链上下一个直接受影响航班重新开始；
    ///    不可用飞行员的后续航班全部为关键航班
    pub fn classify(
        &self,
        disruption: &Disruption,
        snapshot: &RosterSnapshot,
        policy: &HealingPolicy,
    ) -> EngineResult<Classification> {
        let direct_ids = self.resolve_direct_flights(disruption, snapshot)?;
        let direct_delay = self.direct_delay(disruption, policy);
        let direct_set: BTreeSet<&str> = direct_ids.iter().map(|s| s.as_str()).collect();

        let mut result = Classification {
            direct_flight_ids: direct_ids.clone(),
            direct_delay_minutes: direct_delay,
            ..Default::default()
        };

        // 步骤1: 直接航班按机组分组
        let mut pilots: BTreeSet<String> = BTreeSet::new();
        for flight_id in &direct_ids {
            let Some(flight) = snapshot.flight(flight_id) else {
                continue;
            };
            if !flight.status.is_operating() {
                continue;
            }
            match &flight.assigned_pilot_id {
                Some(pilot_id) => {
                    pilots.insert(pilot_id.clone());
                }
                None => result.critical.push(CriticalFlight {
                    flight_id: flight.flight_id.clone(),
                    reason: CriticalReason::Unassigned,
                    predicted_delay_minutes: direct_delay,
                    cascade_depth: 0,
                    affected_pilot: None,
                    departure: flight.scheduled_departure,
                }),
            }
        }

        // 步骤2: 沿执勤链传播
        for pilot_id in &pilots {
            let pilot = snapshot.pilot(pilot_id).ok_or_else(|| EngineError::NotFound {
                entity: "Pilot".to_string(),
                id: pilot_id.clone(),
            })?;

            let unavailable = !pilot.status.can_take_duty() || disruption.is_crew_sickness();
            if unavailable {
                result.unavailable_pilots.insert(pilot_id.clone());
                if disruption.is_crew_sickness() {
                    result.newly_sick_pilots.insert(pilot_id.clone());
                }
            }

            let chain: Vec<&Flight> = snapshot.flights_of_pilot(pilot_id);
            let Some(start) = chain
                .iter()
                .position(|f| direct_set.contains(f.flight_id.as_str()))
            else {
                continue;
            };

            let mut carry_end: Option<NaiveDateTime> = None;
            let mut depth: u32 = 0;
            for flight in &chain[start..] {
                let is_direct = direct_set.contains(flight.flight_id.as_str());
                if is_direct {
                    depth = 0;
                } else {
                    depth += 1;
                }
                let duty = flight_duty(flight, policy);

                if unavailable {
                    result.critical.push(CriticalFlight {
                        flight_id: flight.flight_id.clone(),
                        reason: CriticalReason::PilotUnavailable,
                        predicted_delay_minutes: if is_direct { direct_delay } else { 0 },
                        cascade_depth: if is_direct { 0 } else { depth },
                        affected_pilot: Some(pilot_id.clone()),
                        departure: flight.scheduled_departure,
                    });
                    continue;
                }

                // 级联已中断: 跳到链上下一个直接受影响航班
                if !is_direct && carry_end.is_none() {
                    continue;
                }

                let propagated = carry_end
                    .map(|end| {
                        (end + Duration::minutes(policy.min_rest_minutes) - duty.start)
                            .num_minutes()
                            .max(0)
                    })
                    .unwrap_or(0);
                if !is_direct && propagated < policy.cascade_epsilon_minutes {
                    debug!(
                        pilot_id = %pilot_id,
                        flight_id = %flight.flight_id,
                        propagated,
                        "级联延误低于 ε，停止传播"
                    );
                    carry_end = None;
                    continue;
                }

                let delay = if is_direct {
                    direct_delay.max(propagated)
                } else {
                    propagated
                };
                carry_end = Some(duty.end + Duration::minutes(delay));

                let reason = if is_direct {
                    let extended_minutes = duty.duration_minutes() + delay;
                    let night = duty.is_night(policy.night_start_hour, policy.night_end_hour);
                    if extended_minutes > policy.max_duty_minutes {
                        Some(CriticalReason::DutyLimitExceeded)
                    } else if delay > 0
                        && pilot.fatigue_score + policy.fatigue_for_duty(delay, night)
                            > policy.fatigue_cap
                    {
                        Some(CriticalReason::FatigueCapExceeded)
                    } else if delay > policy.delay_threshold_minutes {
                        Some(CriticalReason::DirectDelay)
                    } else {
                        None
                    }
                } else if delay > policy.delay_threshold_minutes {
                    Some(CriticalReason::CascadeDelay)
                } else {
                    None
                };

                match reason {
                    Some(reason) => result.critical.push(CriticalFlight {
                        flight_id: flight.flight_id.clone(),
                        reason,
                        predicted_delay_minutes: delay,
                        cascade_depth: if is_direct { 0 } else { depth },
                        affected_pilot: Some(pilot_id.clone()),
                        departure: flight.scheduled_departure,
                    }),
                    None => {
                        result.absorbed.insert(flight.flight_id.clone(), delay);
                    }
                }
            }
        }

        result.critical.sort_by(|a, b| {
            a.departure
                .cmp(&b.departure)
                .then_with(|| a.flight_id.cmp(&b.flight_id))
        });
        result.critical.dedup_by(|a, b| a.flight_id == b.flight_id);

        info!(
            disruption_id = %disruption.disruption_id,
            direct = result.direct_flight_ids.len(),
            critical = result.critical.len(),
            unavailable = result.unavailable_pilots.len(),
            "扰动分类完成"
        );
        Ok(result)
    }

    /// 在工作快照上复核关键航班（上游修复可能已消除级联）
    ///
    /// # 返回
    /// - Some: 仍需修复（预测延误按工作快照重算）
    /// - None: 已被上游修复覆盖
    pub fn recheck(
        &self,
        critical: &CriticalFlight,
        working: &RosterSnapshot,
        unavailable: &BTreeSet<String>,
        policy: &HealingPolicy,
    ) -> Option<CriticalFlight> {
        let flight = working.flight(&critical.flight_id)?;
        if !flight.status.is_operating() {
            return None;
        }
        if flight.assigned_pilot_id != critical.affected_pilot {
            return None;
        }
        if let Some(pilot_id) = &flight.assigned_pilot_id {
            if unavailable.contains(pilot_id) {
                return Some(critical.clone());
            }
        }
        if critical.reason != CriticalReason::CascadeDelay {
            return Some(critical.clone());
        }

        let pilot = working.pilot(flight.assigned_pilot_id.as_deref()?)?;
        let duty = flight_duty(flight, policy);
        let propagated = pilot
            .sorted_duties()
            .iter()
            .filter(|d| d.start < duty.start && !d.is_for_flight(&flight.flight_id))
            .last()
            .map(|prev| {
                (prev.end + Duration::minutes(policy.min_rest_minutes) - duty.start)
                    .num_minutes()
                    .max(0)
            })
            .unwrap_or(0);

        if propagated > policy.delay_threshold_minutes {
            Some(CriticalFlight {
                predicted_delay_minutes: propagated,
                ..critical.clone()
            })
        } else {
            None
        }
    }
}
