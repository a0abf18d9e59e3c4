// ==========================================
// 机组排班自愈系统 - 配置管理器
// ==========================================
// 职责: 策略加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::healing_policy::{CostModel, DelayDefaults, HealingPolicy};
use crate::config::policy_reader::PolicyReader;
use crate::db::{self, open_sqlite_connection};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::BTreeMap;
use std::error::Error;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

pub type ConfigResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例（config_kv 不存在时自动建表）
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        let manager = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        manager.ensure_schema()?;
        Ok(manager)
    }

    /// 从已有连接创建 ConfigManager（与其他组件共用配置库连接时使用）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            db::configure_sqlite_connection(&conn_guard)?;
        }
        let manager = Self { conn };
        manager.ensure_schema()?;
        Ok(manager)
    }

    fn ensure_schema(&self) -> ConfigResult<()> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        db::ensure_config_schema(&conn)?;
        Ok(())
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    fn get_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取 global scope 的配置值（公开方法，供其他模块复用）
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 配置值（UPSERT）
    pub fn set_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        tracing::info!(config_key = key, value = value, "配置已更新");
        Ok(())
    }

    /// 读取并解析配置，缺失或格式错误时返回默认值
    fn get_parsed_or<T>(&self, key: &str, default: T) -> ConfigResult<T>
    where
        T: FromStr + Copy,
    {
        match self.get_config_value(key)? {
            None => Ok(default),
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(v) => Ok(v),
                Err(_) => {
                    tracing::warn!(
                        config_key = key,
                        raw_value = %raw,
                        "配置格式错误，使用默认值"
                    );
                    Ok(default)
                }
            },
        }
    }

    /// 读取 JSON 配置，缺失或格式错误时返回默认值
    fn get_json_or<T>(&self, key: &str, default: T) -> ConfigResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        match self.get_config_value(key)? {
            None => Ok(default),
            Some(raw) => match serde_json::from_str::<T>(&raw) {
                Ok(v) => Ok(v),
                Err(e) => {
                    tracing::warn!(
                        config_key = key,
                        error = %e,
                        "JSON 配置格式错误，使用默认值"
                    );
                    Ok(default)
                }
            },
        }
    }

    /// 获取所有配置的快照（JSON格式）
    ///
    /// # 用途
    /// - 自愈周期轨迹中记录当时生效的配置
    pub fn get_config_snapshot(&self) -> ConfigResult<String> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key",
        )?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        let json_value = json!(config_map);
        Ok(serde_json::to_string(&json_value)?)
    }

    /// 组装完整策略（同步版本，供非 async 调用方使用）
    pub fn read_policy(&self) -> ConfigResult<HealingPolicy> {
        let d = HealingPolicy::default();
        let policy = HealingPolicy {
            fatigue_cap: self.get_parsed_or(config_keys::FATIGUE_CAP, d.fatigue_cap)?,
            soft_fatigue_threshold: self
                .get_parsed_or(config_keys::SOFT_FATIGUE_THRESHOLD, d.soft_fatigue_threshold)?,
            fatigue_per_duty_hour: self
                .get_parsed_or(config_keys::FATIGUE_PER_DUTY_HOUR, d.fatigue_per_duty_hour)?,
            night_duty_fatigue: self
                .get_parsed_or(config_keys::NIGHT_DUTY_FATIGUE, d.night_duty_fatigue)?,
            min_rest_minutes: self.get_parsed_or(config_keys::MIN_REST_MINUTES, d.min_rest_minutes)?,
            recommended_rest_minutes: self.get_parsed_or(
                config_keys::RECOMMENDED_REST_MINUTES,
                d.recommended_rest_minutes,
            )?,
            rest_lookback_hours: self
                .get_parsed_or(config_keys::REST_LOOKBACK_HOURS, d.rest_lookback_hours)?,
            max_duty_minutes: self.get_parsed_or(config_keys::MAX_DUTY_MINUTES, d.max_duty_minutes)?,
            sign_on_minutes: self.get_parsed_or(config_keys::SIGN_ON_MINUTES, d.sign_on_minutes)?,
            sign_off_minutes: self.get_parsed_or(config_keys::SIGN_OFF_MINUTES, d.sign_off_minutes)?,
            night_start_hour: self.get_parsed_or(config_keys::NIGHT_START_HOUR, d.night_start_hour)?,
            night_end_hour: self.get_parsed_or(config_keys::NIGHT_END_HOUR, d.night_end_hour)?,
            max_night_landings: self
                .get_parsed_or(config_keys::MAX_NIGHT_LANDINGS, d.max_night_landings)?,
            delay_threshold_minutes: self
                .get_parsed_or(config_keys::DELAY_THRESHOLD_MINUTES, d.delay_threshold_minutes)?,
            cascade_epsilon_minutes: self
                .get_parsed_or(config_keys::CASCADE_EPSILON_MINUTES, d.cascade_epsilon_minutes)?,
            delay_defaults: self.get_json_or(config_keys::DELAY_DEFAULTS, DelayDefaults::default())?,
            max_candidates_per_flight: self.get_parsed_or(
                config_keys::MAX_CANDIDATES_PER_FLIGHT,
                d.max_candidates_per_flight,
            )?,
            max_delay_minutes: self.get_parsed_or(config_keys::MAX_DELAY_MINUTES, d.max_delay_minutes)?,
            delay_step_minutes: self
                .get_parsed_or(config_keys::DELAY_STEP_MINUTES, d.delay_step_minutes)?,
            reserve_base_match: self
                .get_parsed_or(config_keys::RESERVE_BASE_MATCH, d.reserve_base_match)?,
            auto_cancel: self.get_parsed_or(config_keys::AUTO_CANCEL, d.auto_cancel)?,
            cost_weight: self.get_parsed_or(config_keys::COST_WEIGHT, d.cost_weight)?,
            fatigue_risk_weight: self
                .get_parsed_or(config_keys::FATIGUE_RISK_WEIGHT, d.fatigue_risk_weight)?,
            soft_penalty_weight: self
                .get_parsed_or(config_keys::SOFT_PENALTY_WEIGHT, d.soft_penalty_weight)?,
            rest_deficit_penalty_per_hour: self.get_parsed_or(
                config_keys::REST_DEFICIT_PENALTY_PER_HOUR,
                d.rest_deficit_penalty_per_hour,
            )?,
            high_fatigue_penalty_per_point: self.get_parsed_or(
                config_keys::HIGH_FATIGUE_PENALTY_PER_POINT,
                d.high_fatigue_penalty_per_point,
            )?,
            max_commit_retries: self
                .get_parsed_or(config_keys::MAX_COMMIT_RETRIES, d.max_commit_retries)?,
            solver_time_budget_ms: self
                .get_parsed_or(config_keys::SOLVER_TIME_BUDGET_MS, d.solver_time_budget_ms)?,
            solver_horizon_hours: self
                .get_parsed_or(config_keys::SOLVER_HORIZON_HOURS, d.solver_horizon_hours)?,
            reassignment_cost: self
                .get_parsed_or(config_keys::REASSIGNMENT_COST, d.reassignment_cost)?,
            fatigue_exposure_weight: self
                .get_parsed_or(config_keys::FATIGUE_EXPOSURE_WEIGHT, d.fatigue_exposure_weight)?,
            cost: self.get_json_or(config_keys::COST_MODEL, CostModel::default())?,
        };

        policy
            .validate()
            .map_err(|e| format!("自愈策略配置不一致: {}", e))?;
        Ok(policy)
    }
}

// ==========================================
// PolicyReader Trait 实现
// ==========================================
#[async_trait]
impl PolicyReader for ConfigManager {
    async fn load_policy(&self) -> ConfigResult<HealingPolicy> {
        self.read_policy()
    }

    async fn get_fatigue_cap(&self) -> ConfigResult<f64> {
        self.get_parsed_or(config_keys::FATIGUE_CAP, 80.0)
    }

    async fn get_max_commit_retries(&self) -> ConfigResult<u32> {
        self.get_parsed_or(config_keys::MAX_COMMIT_RETRIES, 3)
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 疲劳
    pub const FATIGUE_CAP: &str = "fatigue_cap";
    pub const SOFT_FATIGUE_THRESHOLD: &str = "soft_fatigue_threshold";
    pub const FATIGUE_PER_DUTY_HOUR: &str = "fatigue_per_duty_hour";
    pub const NIGHT_DUTY_FATIGUE: &str = "night_duty_fatigue";

    // 执勤与休息
    pub const MIN_REST_MINUTES: &str = "min_rest_minutes";
    pub const RECOMMENDED_REST_MINUTES: &str = "recommended_rest_minutes";
    pub const REST_LOOKBACK_HOURS: &str = "rest_lookback_hours";
    pub const MAX_DUTY_MINUTES: &str = "max_duty_minutes";
    pub const SIGN_ON_MINUTES: &str = "sign_on_minutes";
    pub const SIGN_OFF_MINUTES: &str = "sign_off_minutes";
    pub const NIGHT_START_HOUR: &str = "night_start_hour";
    pub const NIGHT_END_HOUR: &str = "night_end_hour";
    pub const MAX_NIGHT_LANDINGS: &str = "max_night_landings";

    // 分类
    pub const DELAY_THRESHOLD_MINUTES: &str = "delay_threshold_minutes";
    pub const CASCADE_EPSILON_MINUTES: &str = "cascade_epsilon_minutes";
    pub const DELAY_DEFAULTS: &str = "delay_defaults"; // JSON

    // 候选生成
    pub const MAX_CANDIDATES_PER_FLIGHT: &str = "max_candidates_per_flight";
    pub const MAX_DELAY_MINUTES: &str = "max_delay_minutes";
    pub const DELAY_STEP_MINUTES: &str = "delay_step_minutes";
    pub const RESERVE_BASE_MATCH: &str = "reserve_base_match";
    pub const AUTO_CANCEL: &str = "auto_cancel";

    // 排序权重
    pub const COST_WEIGHT: &str = "cost_weight";
    pub const FATIGUE_RISK_WEIGHT: &str = "fatigue_risk_weight";
    pub const SOFT_PENALTY_WEIGHT: &str = "soft_penalty_weight";
    pub const REST_DEFICIT_PENALTY_PER_HOUR: &str = "rest_deficit_penalty_per_hour";
    pub const HIGH_FATIGUE_PENALTY_PER_POINT: &str = "high_fatigue_penalty_per_point";

    // 提交
    pub const MAX_COMMIT_RETRIES: &str = "max_commit_retries";

    // 求解器
    pub const SOLVER_TIME_BUDGET_MS: &str = "solver_time_budget_ms";
    pub const SOLVER_HORIZON_HOURS: &str = "solver_horizon_hours";
    pub const REASSIGNMENT_COST: &str = "reassignment_cost";
    pub const FATIGUE_EXPOSURE_WEIGHT: &str = "fatigue_exposure_weight";

    // 成本模型 (JSON)
    pub const COST_MODEL: &str = "cost_model";
}
