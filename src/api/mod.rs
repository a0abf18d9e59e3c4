// ==========================================
// 机组排班自愈系统 - API 层
// ==========================================
// 职责: 提供触发面接口（扰动注入/自愈/采纳/重优化）
// ==========================================

pub mod error;
pub mod healing_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use healing_api::{HealingApi, RosterOptimization};
