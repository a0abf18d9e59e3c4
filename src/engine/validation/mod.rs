// ==========================================
// 机组排班自愈系统 - 校验层
// ==========================================
// 职责: 候选 + 受影响飞行员投影 -> Verdict
// 组成: Validator 枚举 (Safety / Fatigue) + 有序流水线
// ==========================================

pub mod fatigue;
pub mod pipeline;
pub mod safety;

pub use pipeline::{Validator, ValidationPipeline};
