// ==========================================
// 机组排班自愈系统 - 成本/疲劳估算
// ==========================================
// 职责: 候选草稿 -> 预测成本 / 各飞行员疲劳增量 / 碳排放
// 红线: 纯函数，无副作用
// 说明: 薪酬按周累计分钟分档（40h 基础 / 50h 1.5x / 以上 2.0x）
// ==========================================

use crate::config::{CostModel, HealingPolicy};
use crate::domain::candidate::{CandidateDraft, CostItem, Estimate};
use crate::domain::flight::Flight;
use crate::domain::pilot::{DutyInterval, Pilot};
use crate::domain::roster::RosterSnapshot;
use crate::domain::types::CandidateAction;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// CostFatigueEstimator Trait
// ==========================================
// 实现者: StandardEstimator（默认）；分析协作方可提供替代实现
pub trait CostFatigueEstimator: Send + Sync {
    /// 估算候选草稿
    fn estimate(&self, draft: &CandidateDraft, snapshot: &RosterSnapshot, policy: &HealingPolicy) -> Estimate;

    /// 单个指派（飞行员执飞航班）的预测成本，供求解器目标函数使用
    fn assignment_cost(&self, pilot: &Pilot, flight: &Flight, policy: &HealingPolicy) -> f64;

    /// 机组新增执勤的成本估算（薪酬分档 + FRMS 溢价）
    fn estimate_crew_cost(
        &self,
        pilot: &Pilot,
        additional_minutes: i64,
        at: NaiveDateTime,
        policy: &HealingPolicy,
    ) -> CrewCostEstimate;
}

// ==========================================
// CrewCostEstimate - 机组加班成本估算
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrewCostEstimate {
    pub pilot_id: String,
    pub additional_minutes: i64,
    pub total_cost: f64,
    pub breakdown: Vec<CostItem>,
    pub projected_fatigue: f64,
    pub is_overtime: bool,
    pub in_wocl: bool,
}

/// 分档薪酬
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SlabPay {
    pub base: f64,
    pub overtime: f64,
    pub premium: f64,
}

impl SlabPay {
    pub fn total(&self) -> f64 {
        self.base + self.overtime + self.premium
    }
}

/// 按周累计分钟计算新增分钟的分档薪酬
pub fn slab_pay(weekly_minutes: i64, additional_minutes: i64, cost: &CostModel) -> SlabPay {
    let mut pay = SlabPay::default();
    let mut remaining = additional_minutes.max(0);
    let mut current = weekly_minutes.max(0);

    if remaining > 0 && current < cost.base_slab_minutes {
        let take = remaining.min(cost.base_slab_minutes - current);
        pay.base += take as f64 * cost.base_rate_per_hour / 60.0;
        remaining -= take;
        current += take;
    }
    if remaining > 0 && current < cost.overtime_slab_minutes {
        let take = remaining.min(cost.overtime_slab_minutes - current);
        pay.overtime += take as f64 * cost.overtime_rate_per_hour / 60.0;
        remaining -= take;
    }
    if remaining > 0 {
        pay.premium += remaining as f64 * cost.premium_rate_per_hour / 60.0;
    }
    pay
}

fn in_wocl(duty: &DutyInterval, cost: &CostModel) -> bool {
    duty.is_night(cost.wocl_start_hour, cost.wocl_end_hour)
}

fn push_item(items: &mut Vec<CostItem>, category: &str, amount: f64) {
    if amount > 0.0 {
        items.push(CostItem {
            category: category.to_string(),
            amount: (amount * 100.0).round() / 100.0,
        });
    }
}

// ==========================================
// StandardEstimator - 默认估算器
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct StandardEstimator;

impl StandardEstimator {
    pub fn new() -> Self {
        Self
    }

    /// 延误相关成本（燃油/维修/餐券/旅客补偿）
    fn delay_costs(&self, delay_minutes: i64, cost: &CostModel, items: &mut Vec<CostItem>) -> f64 {
        if delay_minutes <= 0 {
            return 0.0;
        }
        let fuel = delay_minutes as f64 * cost.fuel_per_minute;
        let maintenance = delay_minutes as f64 * cost.maintenance_per_minute;
        let meal = if delay_minutes >= cost.meal_voucher_after_minutes {
            cost.meal_voucher
        } else {
            0.0
        };
        let compensation = if delay_minutes >= cost.compensation_after_minutes {
            cost.passenger_compensation
        } else {
            0.0
        };
        push_item(items, "燃油消耗", fuel);
        push_item(items, "维修储备", maintenance);
        push_item(items, "餐券", meal);
        push_item(items, "旅客补偿", compensation);
        fuel + maintenance + meal + compensation
    }
}

impl CostFatigueEstimator for StandardEstimator {
    fn estimate(&self, draft: &CandidateDraft, snapshot: &RosterSnapshot, policy: &HealingPolicy) -> Estimate {
        let cost = &policy.cost;
        let mut breakdown = Vec::new();
        let mut total = 0.0;
        let mut fatigue_deltas: BTreeMap<String, f64> = BTreeMap::new();

        // 机组薪酬 + FRMS 溢价 + 疲劳增量
        for gain in &draft.gains {
            let Some(pilot) = snapshot.pilot(&gain.pilot_id) else {
                continue;
            };
            let pay = slab_pay(pilot.weekly_duty_minutes, gain.minutes, cost);
            let mut crew = pay.total();
            let wocl = draft
                .diff
                .flight_changes
                .iter()
                .filter(|c| c.new_pilot_id.as_deref() == Some(gain.pilot_id.as_str()))
                .filter_map(|c| c.new_duty.as_ref())
                .any(|d| in_wocl(d, cost));
            if wocl {
                crew += pay.total() * cost.wocl_premium_pct;
            }
            if pilot.fatigue_score > policy.soft_fatigue_threshold {
                crew += pay.total() * cost.high_fatigue_premium_pct;
            }
            push_item(&mut breakdown, &format!("机组薪酬({})", gain.pilot_id), crew);
            total += crew;

            *fatigue_deltas.entry(gain.pilot_id.clone()).or_insert(0.0) +=
                policy.fatigue_for_duty(gain.minutes, gain.night);
        }

        // 方案固定成本
        let (fixed, co2_fixed) = match draft.action {
            CandidateAction::AssignReserve => (cost.reserve_callout, cost.co2_reserve_kg),
            CandidateAction::Swap => (cost.swap_handling, cost.co2_swap_kg),
            CandidateAction::Delay => (0.0, 0.0),
            CandidateAction::Cancel => (
                cost.cancellation_penalty + cost.passenger_compensation + cost.hotel_per_night,
                cost.co2_cancel_kg,
            ),
        };
        push_item(&mut breakdown, draft.action.as_str(), fixed);
        total += fixed;

        total += self.delay_costs(draft.delay_minutes, cost, &mut breakdown);
        let co2_kg = co2_fixed + draft.delay_minutes.max(0) as f64 * cost.co2_delay_kg_per_minute;

        Estimate {
            predicted_cost: (total * 100.0).round() / 100.0,
            fatigue_deltas,
            co2_kg,
            breakdown,
        }
    }

    fn assignment_cost(&self, pilot: &Pilot, flight: &Flight, policy: &HealingPolicy) -> f64 {
        let duty = flight.duty_interval(policy.sign_on_minutes, policy.sign_off_minutes);
        slab_pay(pilot.weekly_duty_minutes, duty.duration_minutes(), &policy.cost).total()
    }

    /// 机组加班成本估算（含 FRMS 溢价）
    ///
    /// # 参数
    /// - `pilot`: 飞行员
    /// - `additional_minutes`: 新增执勤分钟
    /// - `at`: 新增执勤开始时刻（判断 WOCL 窗口）
    fn estimate_crew_cost(
        &self,
        pilot: &Pilot,
        additional_minutes: i64,
        at: NaiveDateTime,
        policy: &HealingPolicy,
    ) -> CrewCostEstimate {
        let cost = &policy.cost;
        let mut breakdown = Vec::new();
        let pay = slab_pay(pilot.weekly_duty_minutes, additional_minutes, cost);
        push_item(&mut breakdown, "机组薪酬(基础)", pay.base);
        push_item(&mut breakdown, "加班薪酬(1.5x)", pay.overtime);
        push_item(&mut breakdown, "加班薪酬(2.0x)", pay.premium);

        let fuel = additional_minutes.max(0) as f64 * cost.fuel_per_minute;
        let maintenance = additional_minutes.max(0) as f64 * cost.maintenance_per_minute;
        push_item(&mut breakdown, "燃油消耗", fuel);
        push_item(&mut breakdown, "维修储备", maintenance);

        let window = DutyInterval::new(at, at + chrono::Duration::minutes(additional_minutes.max(1)));
        let wocl = in_wocl(&window, cost);
        let mut premium = 0.0;
        if wocl {
            let fee = pay.total() * cost.wocl_premium_pct;
            push_item(&mut breakdown, "FRMS: WOCL 溢价", fee);
            premium += fee;
        }
        if pilot.fatigue_score > policy.soft_fatigue_threshold {
            let fee = pay.total() * cost.high_fatigue_premium_pct;
            push_item(&mut breakdown, "FRMS: 高疲劳风险溢价", fee);
            premium += fee;
        }

        let projected_fatigue = (pilot.fatigue_score
            + policy.fatigue_for_duty(additional_minutes, window.is_night(policy.night_start_hour, policy.night_end_hour)))
        .min(100.0);

        CrewCostEstimate {
            pilot_id: pilot.pilot_id.clone(),
            additional_minutes,
            total_cost: pay.total() + fuel + maintenance + premium,
            breakdown,
            projected_fatigue,
            is_overtime: pilot.weekly_duty_minutes + additional_minutes > cost.base_slab_minutes,
            in_wocl: wocl,
        }
    }
}
