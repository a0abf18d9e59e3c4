// ==========================================
// 机组排班自愈系统 - 策略读取 Trait
// ==========================================
// 职责: 定义引擎所需的策略读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::config::healing_policy::HealingPolicy;
use async_trait::async_trait;
use std::error::Error;

// ==========================================
// PolicyReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）/ StaticPolicyReader（固定值，测试用）
#[async_trait]
pub trait PolicyReader: Send + Sync {
    /// 读取完整自愈策略（未配置项取默认值）
    async fn load_policy(&self) -> Result<HealingPolicy, Box<dyn Error + Send + Sync>>;

    /// 读取疲劳上限
    ///
    /// # 默认值
    /// - 80.0
    async fn get_fatigue_cap(&self) -> Result<f64, Box<dyn Error + Send + Sync>> {
        Ok(self.load_policy().await?.fatigue_cap)
    }

    /// 读取最大提交重试次数
    ///
    /// # 默认值
    /// - 3
    async fn get_max_commit_retries(&self) -> Result<u32, Box<dyn Error + Send + Sync>> {
        Ok(self.load_policy().await?.max_commit_retries)
    }
}

// ==========================================
// StaticPolicyReader - 固定策略
// ==========================================
pub struct StaticPolicyReader {
    policy: HealingPolicy,
}

impl StaticPolicyReader {
    pub fn new(policy: HealingPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl PolicyReader for StaticPolicyReader {
    async fn load_policy(&self) -> Result<HealingPolicy, Box<dyn Error + Send + Sync>> {
        Ok(self.policy.clone())
    }
}
