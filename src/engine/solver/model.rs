// ==========================================
// 机组排班自愈系统 - 约束模型
// ==========================================
// 变量: x[p,f] 仅为 资质匹配且可用 的 (飞行员, 航班) 对建立
// 硬约束: 每航班恰好一名飞行员 / 不重叠 / 最小休息 / 非连续夜航 / 最大执勤 / 疲劳上限
// 目标: Σ 指派成本 + 改派成本 + 疲劳暴露权重 × 新增疲劳负荷
// ==========================================

use crate::config::HealingPolicy;
use crate::domain::pilot::{DutyInterval, Pilot};
use crate::domain::roster::RosterSnapshot;
use crate::domain::types::RejectReason;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::estimator::CostFatigueEstimator;
use crate::engine::projection::{night_landings_violation, placement_violation};
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// ConstraintKind - 约束类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Coverage,         // 每航班恰好一名飞行员
    Availability,     // 飞行员可用
    Qualification,    // 资质匹配
    MaxDuty,          // 最大执勤时长
    NoOverlap,        // 执勤不重叠
    MinRest,          // 最小休息
    ConsecutiveNight, // 非连续夜航
    NightLandings,    // 夜间起降次数上限
    FatigueCap,       // 疲劳上限
}

impl ConstraintKind {
    pub fn code(&self) -> &'static str {
        match self {
            ConstraintKind::Coverage => "coverage",
            ConstraintKind::Availability => "availability",
            ConstraintKind::Qualification => "qualification",
            ConstraintKind::MaxDuty => "max_duty",
            ConstraintKind::NoOverlap => "no_overlap",
            ConstraintKind::MinRest => "min_rest",
            ConstraintKind::ConsecutiveNight => "consecutive_night",
            ConstraintKind::NightLandings => "night_landings",
            ConstraintKind::FatigueCap => "fatigue_cap",
        }
    }
}

impl From<RejectReason> for ConstraintKind {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::PilotUnavailable | RejectReason::StaleAssignment => ConstraintKind::Availability,
            RejectReason::QualificationMismatch => ConstraintKind::Qualification,
            RejectReason::DutyOverlap => ConstraintKind::NoOverlap,
            RejectReason::MaxDutyExceeded => ConstraintKind::MaxDuty,
            RejectReason::InsufficientRest => ConstraintKind::MinRest,
            RejectReason::ConsecutiveNightDuties => ConstraintKind::ConsecutiveNight,
            RejectReason::NightLandingsExceeded => ConstraintKind::NightLandings,
            RejectReason::FatigueCapExceeded => ConstraintKind::FatigueCap,
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ==========================================
// FlightSlot - 模型中的航班槽位
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightSlot {
    pub flight_id: String,
    pub delay_minutes: i64, // 求解时按延误后时刻排班
}

impl FlightSlot {
    pub fn on_time(flight_id: &str) -> Self {
        Self {
            flight_id: flight_id.to_string(),
            delay_minutes: 0,
        }
    }
}

/// 模型航班
#[derive(Debug, Clone)]
pub struct ModelFlight {
    pub flight_id: String,
    pub qualification: String,
    pub delay_minutes: i64,
    pub current_pilot: Option<String>,
}

/// 候选指派 x[p,f]
#[derive(Debug, Clone)]
pub struct Pair {
    pub pilot_idx: usize,
    pub duty: DutyInterval,
    pub extension_only: bool, // 原机组顺延
    pub fatigue_load: f64,    // 新增疲劳负荷
    pub added_minutes: i64,   // 新增执勤分钟
    pub night: bool,
    pub cost: f64,            // 目标函数贡献
    pub is_current: bool,
}

/// 被静态剔除的 (飞行员, 约束)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Elimination {
    pub pilot_id: String,
    pub constraint: ConstraintKind,
}

// ==========================================
// RosterModel - 约束模型
// ==========================================
#[derive(Debug, Clone)]
pub struct RosterModel {
    pub flights: Vec<ModelFlight>,
    pub pilots: Vec<Pilot>,          // 已移除模型内航班执勤的飞行员副本
    pub domains: Vec<Vec<Pair>>,     // 每个航班的候选指派（按成本升序）
    pub eliminated: Vec<Vec<Elimination>>,
    pub fatigue_cap: f64,
}

impl RosterModel {
    /// 构建模型
    ///
    /// # 参数
    /// - `slots`: 参与求解的航班（其余执勤视为固定）
    pub fn build(
        snapshot: &RosterSnapshot,
        slots: &[FlightSlot],
        policy: &HealingPolicy,
        estimator: &dyn CostFatigueEstimator,
    ) -> EngineResult<Self> {
        let mut flights = Vec::with_capacity(slots.len());
        for slot in slots {
            let flight = snapshot.flight(&slot.flight_id).ok_or_else(|| EngineError::NotFound {
                entity: "Flight".to_string(),
                id: slot.flight_id.clone(),
            })?;
            flights.push((flight, slot.delay_minutes.max(0)));
        }

        // 步骤1: 飞行员副本（移除模型内航班的执勤）
        let originals: Vec<&Pilot> = snapshot.pilots.values().collect();
        let pilots: Vec<Pilot> = originals
            .iter()
            .map(|p| {
                let mut trial = Pilot::clone(p);
                for (flight, _) in &flights {
                    trial.remove_flight_duty(&flight.flight_id);
                }
                trial
            })
            .collect();

        // 步骤2: 为每个航班建立候选指派
        let mut domains = Vec::with_capacity(flights.len());
        let mut eliminated = Vec::with_capacity(flights.len());
        for (flight, delay) in &flights {
            let mut domain = Vec::new();
            let mut removed = Vec::new();
            for (pilot_idx, pilot) in pilots.iter().enumerate() {
                let original = originals[pilot_idx];
                let is_current = flight.is_assigned_to(&pilot.pilot_id);
                let eliminate = |kind: ConstraintKind, removed: &mut Vec<Elimination>| {
                    removed.push(Elimination {
                        pilot_id: pilot.pilot_id.clone(),
                        constraint: kind,
                    })
                };

                if !pilot.status.can_take_duty() {
                    eliminate(ConstraintKind::Availability, &mut removed);
                    continue;
                }
                if !pilot.is_qualified(&flight.required_qualification) {
                    eliminate(ConstraintKind::Qualification, &mut removed);
                    continue;
                }

                let (duty, extension_only, added_minutes) = if is_current {
                    let duty = flight.extended_duty_interval(*delay, policy.sign_on_minutes, policy.sign_off_minutes);
                    let extension = original
                        .duty_for_flight(&flight.flight_id)
                        .map(|d| d.start == duty.start)
                        .unwrap_or(false);
                    (duty, extension, *delay)
                } else {
                    let duty = flight.delayed_duty_interval(*delay, policy.sign_on_minutes, policy.sign_off_minutes);
                    let minutes = duty.duration_minutes();
                    (duty, false, minutes)
                };

                let mut trial = pilot.clone();
                trial.insert_duty(duty.clone());
                if let Some((reason, _)) = placement_violation(&trial, &duty, extension_only, policy) {
                    eliminate(reason.into(), &mut removed);
                    continue;
                }

                if night_landings_violation(&duty, flight.landings, policy).is_some() {
                    eliminate(ConstraintKind::NightLandings, &mut removed);
                    continue;
                }

                let night = duty.is_night(policy.night_start_hour, policy.night_end_hour);
                let fatigue_load = policy.fatigue_for_duty(added_minutes, night);
                if fatigue_load > 0.0 && pilot.fatigue_score + fatigue_load > policy.fatigue_cap {
                    eliminate(ConstraintKind::FatigueCap, &mut removed);
                    continue;
                }

                let mut cost = estimator.assignment_cost(original, flight, policy)
                    + policy.fatigue_exposure_weight * fatigue_load;
                if !is_current {
                    cost += policy.reassignment_cost;
                }
                domain.push(Pair {
                    pilot_idx,
                    duty,
                    extension_only,
                    fatigue_load,
                    added_minutes,
                    night,
                    cost,
                    is_current,
                });
            }
            domain.sort_by(|a, b| {
                a.cost
                    .partial_cmp(&b.cost)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| pilots[a.pilot_idx].pilot_id.cmp(&pilots[b.pilot_idx].pilot_id))
            });
            domains.push(domain);
            eliminated.push(removed);
        }

        Ok(Self {
            flights: flights
                .iter()
                .map(|(f, delay)| ModelFlight {
                    flight_id: f.flight_id.clone(),
                    qualification: f.required_qualification.clone(),
                    delay_minutes: *delay,
                    current_pilot: f.assigned_pilot_id.clone(),
                })
                .collect(),
            pilots,
            domains,
            eliminated,
            fatigue_cap: policy.fatigue_cap,
        })
    }

    pub fn flight_count(&self) -> usize {
        self.flights.len()
    }

    /// 变量 x[p,f] 的数量
    pub fn variable_count(&self) -> usize {
        self.domains.iter().map(|d| d.len()).sum()
    }

    /// 在飞行员当前执勤副本与已累计负荷下，检查指派是否可行
    pub fn fits(
        &self,
        trial: &Pilot,
        load_so_far: f64,
        pair: &Pair,
        policy: &HealingPolicy,
    ) -> Result<(), ConstraintKind> {
        let mut candidate = trial.clone();
        candidate.insert_duty(pair.duty.clone());
        if let Some((reason, _)) = placement_violation(&candidate, &pair.duty, pair.extension_only, policy) {
            return Err(reason.into());
        }
        if pair.fatigue_load > 0.0
            && self.pilots[pair.pilot_idx].fatigue_score + load_so_far + pair.fatigue_load > self.fatigue_cap
        {
            return Err(ConstraintKind::FatigueCap);
        }
        Ok(())
    }
}
