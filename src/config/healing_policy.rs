// ==========================================
// 机组排班自愈系统 - 自愈策略参数
// ==========================================
// 职责: 汇总自愈周期使用的全部可调参数（含默认值）
// 存储: config_kv（scope_id='global'）逐项覆写，见 ConfigManager
// 红线: 排序权重 / 意愿阈值均为显式参数，不在引擎中写死
// ==========================================

use crate::domain::roster::InvariantLimits;
use crate::domain::types::{DisruptionType, Severity};
use serde::{Deserialize, Serialize};

// ==========================================
// DelayDefaults - 默认延误表
// ==========================================
// 未显式给出延误时，按 (类型, 严重度) 取值；数组顺序 Low/Medium/High/Critical
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayDefaults {
    pub weather: [i64; 4],
    pub tech: [i64; 4],
    pub atc: [i64; 4],
    pub crew_sickness: [i64; 4],
}

impl Default for DelayDefaults {
    fn default() -> Self {
        Self {
            weather: [60, 120, 240, 300],
            tech: [45, 120, 180, 240],
            atc: [30, 60, 90, 120],
            crew_sickness: [0, 0, 0, 0],
        }
    }
}

impl DelayDefaults {
    pub fn lookup(&self, disruption_type: DisruptionType, severity: Severity) -> i64 {
        let row = match disruption_type {
            DisruptionType::Weather => &self.weather,
            DisruptionType::Tech => &self.tech,
            DisruptionType::Atc => &self.atc,
            DisruptionType::CrewSickness => &self.crew_sickness,
        };
        let idx = match severity {
            Severity::Low => 0,
            Severity::Medium => 1,
            Severity::High => 2,
            Severity::Critical => 3,
        };
        row[idx]
    }
}

// ==========================================
// CostModel - 成本模型
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    // 机组薪酬分档（周累计分钟）
    pub base_rate_per_hour: f64,       // 0 ~ 40h
    pub overtime_rate_per_hour: f64,   // 40h ~ 50h (1.5x)
    pub premium_rate_per_hour: f64,    // 50h 以上 (2.0x)
    pub base_slab_minutes: i64,
    pub overtime_slab_minutes: i64,

    // 直接运营成本
    pub fuel_per_minute: f64,
    pub maintenance_per_minute: f64,

    // 旅客相关
    pub meal_voucher: f64,
    pub meal_voucher_after_minutes: i64,
    pub passenger_compensation: f64,
    pub compensation_after_minutes: i64,
    pub hotel_per_night: f64,

    // 方案固定成本
    pub cancellation_penalty: f64,
    pub reserve_callout: f64,
    pub swap_handling: f64,

    // FRMS 风险溢价
    pub wocl_start_hour: u32,
    pub wocl_end_hour: u32,
    pub wocl_premium_pct: f64,
    pub high_fatigue_premium_pct: f64,

    // 碳排放估算 (kg)
    pub co2_cancel_kg: f64,
    pub co2_delay_kg_per_minute: f64,
    pub co2_swap_kg: f64,
    pub co2_reserve_kg: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            base_rate_per_hour: 4000.0,
            overtime_rate_per_hour: 6000.0,
            premium_rate_per_hour: 8000.0,
            base_slab_minutes: 2400,
            overtime_slab_minutes: 3000,
            fuel_per_minute: 200.0,
            maintenance_per_minute: 150.0,
            meal_voucher: 500.0,
            meal_voucher_after_minutes: 120,
            passenger_compensation: 5000.0,
            compensation_after_minutes: 180,
            hotel_per_night: 8000.0,
            cancellation_penalty: 50_000.0,
            reserve_callout: 3000.0,
            swap_handling: 1000.0,
            wocl_start_hour: 2,
            wocl_end_hour: 6,
            wocl_premium_pct: 0.20,
            high_fatigue_premium_pct: 0.30,
            co2_cancel_kg: 120.0,
            co2_delay_kg_per_minute: 10.0,
            co2_swap_kg: 50.0,
            co2_reserve_kg: 80.0,
        }
    }
}

// ==========================================
// HealingPolicy - 自愈策略
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingPolicy {
    // ===== 疲劳 =====
    pub fatigue_cap: f64,              // 硬上限
    pub soft_fatigue_threshold: f64,   // 飞行员意愿阈值（“接受但需休息”区间下沿）
    pub fatigue_per_duty_hour: f64,    // 每执勤小时疲劳增量
    pub night_duty_fatigue: f64,       // 夜间执勤额外疲劳

    // ===== 执勤与休息 =====
    pub min_rest_minutes: i64,
    pub recommended_rest_minutes: i64,
    pub rest_lookback_hours: i64,
    pub max_duty_minutes: i64,
    pub sign_on_minutes: i64,
    pub sign_off_minutes: i64,
    pub night_start_hour: u32,
    pub night_end_hour: u32,
    pub max_night_landings: u32, // 夜间执勤最多起降次数

    // ===== 分类 =====
    pub delay_threshold_minutes: i64,
    pub cascade_epsilon_minutes: i64,
    pub delay_defaults: DelayDefaults,

    // ===== 候选生成 =====
    pub max_candidates_per_flight: usize,
    pub max_delay_minutes: i64,
    pub delay_step_minutes: i64,
    pub reserve_base_match: bool,
    pub auto_cancel: bool,

    // ===== 排序权重 =====
    pub cost_weight: f64,
    pub fatigue_risk_weight: f64,
    pub soft_penalty_weight: f64,
    pub rest_deficit_penalty_per_hour: f64,
    pub high_fatigue_penalty_per_point: f64,

    // ===== 提交 =====
    pub max_commit_retries: u32,

    // ===== 求解器 =====
    pub solver_time_budget_ms: u64,
    pub solver_horizon_hours: i64,
    pub reassignment_cost: f64,
    pub fatigue_exposure_weight: f64,

    pub cost: CostModel,
}

impl Default for HealingPolicy {
    fn default() -> Self {
        Self {
            fatigue_cap: 80.0,
            soft_fatigue_threshold: 60.0,
            fatigue_per_duty_hour: 10.0,
            night_duty_fatigue: 5.0,
            min_rest_minutes: 600,
            recommended_rest_minutes: 720,
            rest_lookback_hours: 168,
            max_duty_minutes: 480,
            sign_on_minutes: 30,
            sign_off_minutes: 15,
            night_start_hour: 0,
            night_end_hour: 6,
            max_night_landings: 2,
            delay_threshold_minutes: 30,
            cascade_epsilon_minutes: 15,
            delay_defaults: DelayDefaults::default(),
            max_candidates_per_flight: 6,
            max_delay_minutes: 240,
            delay_step_minutes: 15,
            reserve_base_match: true,
            auto_cancel: false,
            cost_weight: 1.0,
            fatigue_risk_weight: 500.0,
            soft_penalty_weight: 1.0,
            rest_deficit_penalty_per_hour: 200.0,
            high_fatigue_penalty_per_point: 300.0,
            max_commit_retries: 3,
            solver_time_budget_ms: 2000,
            solver_horizon_hours: 24,
            reassignment_cost: 2000.0,
            fatigue_exposure_weight: 100.0,
            cost: CostModel::default(),
        }
    }
}

impl HealingPolicy {
    /// 提交时复核所用的不变量阈值
    pub fn limits(&self) -> InvariantLimits {
        InvariantLimits {
            min_rest_minutes: self.min_rest_minutes,
            max_duty_minutes: self.max_duty_minutes,
            fatigue_cap: self.fatigue_cap,
        }
    }

    /// 新增执勤带来的疲劳增量
    pub fn fatigue_for_duty(&self, minutes: i64, night: bool) -> f64 {
        if minutes <= 0 {
            return 0.0;
        }
        let base = minutes as f64 / 60.0 * self.fatigue_per_duty_hour;
        if night {
            base + self.night_duty_fatigue
        } else {
            base
        }
    }

    /// 参数一致性校验
    ///
    /// # 返回
    /// - Ok(()): 校验通过
    /// - Err(String): 第一个不一致项
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.fatigue_cap) {
            return Err(format!("fatigue_cap 超出范围: {}", self.fatigue_cap));
        }
        if self.soft_fatigue_threshold > self.fatigue_cap {
            return Err(format!(
                "soft_fatigue_threshold({}) 不能高于 fatigue_cap({})",
                self.soft_fatigue_threshold, self.fatigue_cap
            ));
        }
        if self.min_rest_minutes < 0 || self.max_duty_minutes <= 0 {
            return Err("min_rest_minutes / max_duty_minutes 必须为正".to_string());
        }
        if self.night_start_hour > 24 || self.night_end_hour > 24 {
            return Err("夜间窗口小时数超出范围".to_string());
        }
        if self.max_night_landings == 0 {
            return Err("max_night_landings 必须大于0".to_string());
        }
        if self.delay_step_minutes <= 0 {
            return Err("delay_step_minutes 必须大于0".to_string());
        }
        if self.max_delay_minutes < 0 || self.cascade_epsilon_minutes < 0 {
            return Err("max_delay_minutes / cascade_epsilon_minutes 不能为负".to_string());
        }
        if self.max_candidates_per_flight == 0 {
            return Err("max_candidates_per_flight 必须大于0".to_string());
        }
        if self.cost_weight < 0.0 || self.fatigue_risk_weight < 0.0 || self.soft_penalty_weight < 0.0 {
            return Err("排序权重不能为负".to_string());
        }
        if self.cost.base_slab_minutes > self.cost.overtime_slab_minutes {
            return Err("薪酬分档顺序错误".to_string());
        }
        if self.solver_time_budget_ms == 0 {
            return Err("solver_time_budget_ms 必须大于0".to_string());
        }
        Ok(())
    }
}
