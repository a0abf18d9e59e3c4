// ==========================================
// 机组排班自愈系统 - 配置层
// ==========================================
// 职责: 自愈策略参数管理,支持 config_kv 覆写
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod healing_policy;
pub mod policy_reader;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager, ConfigResult};
pub use healing_policy::{CostModel, DelayDefaults, HealingPolicy};
pub use policy_reader::{PolicyReader, StaticPolicyReader};
