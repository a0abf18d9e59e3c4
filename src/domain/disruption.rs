// ==========================================
// 机组排班自愈系统 - 扰动领域模型
// ==========================================
// 生命周期: 注入(Open) -> 提交修复(Resolved) / 升级人工(Escalated)
// ==========================================

use crate::domain::types::{DisruptionStatus, DisruptionType, Severity};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// Disruption - 扰动事件
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disruption {
    pub disruption_id: String,              // 扰动ID
    pub disruption_type: DisruptionType,    // 扰动类型
    pub affected_flight_ids: Vec<String>,   // 直接受影响航班
    #[serde(default)]
    pub affected_airport: Option<String>,   // 机场级扰动（未指定航班时按起飞机场展开）
    pub severity: Severity,                 // 严重度
    #[serde(default)]
    pub delay_minutes: Option<i64>,         // 显式延误(分钟)，为空时按类型/严重度取默认值
    #[serde(default)]
    pub description: Option<String>,        // 描述 (如 Fog / Hydraulic)
    pub occurred_at: NaiveDateTime,         // 发生时间
    pub status: DisruptionStatus,           // 生命周期状态
}

impl Disruption {
    pub fn is_open(&self) -> bool {
        self.status == DisruptionStatus::Open
    }

    pub fn is_crew_sickness(&self) -> bool {
        self.disruption_type == DisruptionType::CrewSickness
    }
}

// ==========================================
// DisruptionInput - 注入请求
// ==========================================
// 用途: 外部 API 层提交的原始扰动，边界校验通过后才生成 Disruption
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisruptionInput {
    pub disruption_type: DisruptionType,
    #[serde(default)]
    pub affected_flight_ids: Vec<String>,
    #[serde(default)]
    pub affected_airport: Option<String>,
    pub severity: Severity,
    #[serde(default)]
    pub delay_minutes: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    pub occurred_at: NaiveDateTime,
}

impl DisruptionInput {
    /// 生成已注入的扰动实体
    pub fn into_disruption(self, disruption_id: String, affected_flight_ids: Vec<String>) -> Disruption {
        Disruption {
            disruption_id,
            disruption_type: self.disruption_type,
            affected_flight_ids,
            affected_airport: self.affected_airport,
            severity: self.severity,
            delay_minutes: self.delay_minutes,
            description: self.description,
            occurred_at: self.occurred_at,
            status: DisruptionStatus::Open,
        }
    }
}
