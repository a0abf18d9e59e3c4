// ==========================================
// 机组排班自愈系统 - 异步运行时
// ==========================================
// 职责: 多个扰动的自愈周期并发执行（tokio 阻塞任务 + join_all 汇合）
// 红线: 每个周期开始前重新加载策略；周期内部保持同步执行
// ==========================================

use crate::config::{HealingPolicy, PolicyReader};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::orchestrator::{CycleReport, HealingOrchestrator};
use crate::engine::solver::SolveOutcome;
use chrono::NaiveDateTime;
use futures::future::join_all;
use std::sync::Arc;
use tokio::task;
use tracing::{info, warn};

/// 单个扰动的自愈结果
#[derive(Debug)]
pub struct CycleResult {
    pub disruption_id: String,
    pub result: EngineResult<CycleReport>,
}

// ==========================================
// HealingRuntime
// ==========================================
pub struct HealingRuntime {
    orchestrator: Arc<HealingOrchestrator>,
    policy_reader: Arc<dyn PolicyReader>,
}

impl HealingRuntime {
    pub fn new(orchestrator: Arc<HealingOrchestrator>, policy_reader: Arc<dyn PolicyReader>) -> Self {
        Self {
            orchestrator,
            policy_reader,
        }
    }

    pub fn orchestrator(&self) -> &Arc<HealingOrchestrator> {
        &self.orchestrator
    }

    async fn load_policy(&self) -> EngineResult<HealingPolicy> {
        let policy = self
            .policy_reader
            .load_policy()
            .await
            .map_err(|e| EngineError::Config(e.to_string()))?;
        policy.validate().map_err(EngineError::Config)?;
        Ok(policy)
    }

    /// 单个扰动自愈
    pub async fn heal(&self, disruption_id: &str) -> EngineResult<CycleReport> {
        let policy = self.load_policy().await?;
        let orchestrator = Arc::clone(&self.orchestrator);
        let id = disruption_id.to_string();
        task::spawn_blocking(move || orchestrator.heal(&id, &policy))
            .await
            .map_err(|e| EngineError::Other(anyhow::anyhow!("自愈任务异常退出: {}", e)))?
    }

    /// 多个扰动并发自愈
    ///
    /// # 返回
    /// - 与输入顺序一致的结果列表（单个失败不影响其他周期）
    pub async fn heal_all(&self, disruption_ids: Vec<String>) -> EngineResult<Vec<CycleResult>> {
        let policy = Arc::new(self.load_policy().await?);
        info!(count = disruption_ids.len(), "并发自愈开始");

        let handles = disruption_ids.iter().map(|id| {
            let orchestrator = Arc::clone(&self.orchestrator);
            let policy = Arc::clone(&policy);
            let id = id.clone();
            task::spawn_blocking(move || orchestrator.heal(&id, &policy))
        });
        let joined = join_all(handles).await;

        let results = disruption_ids
            .into_iter()
            .zip(joined)
            .map(|(disruption_id, joined)| {
                let result = joined
                    .map_err(|e| EngineError::Other(anyhow::anyhow!("自愈任务异常退出: {}", e)))
                    .and_then(|r| r);
                if let Err(e) = &result {
                    warn!(disruption_id = %disruption_id, error = %e, "自愈周期失败");
                }
                CycleResult { disruption_id, result }
            })
            .collect::<Vec<_>>();

        info!(
            count = results.len(),
            failed = results.iter().filter(|r| r.result.is_err()).count(),
            "并发自愈结束"
        );
        Ok(results)
    }

    /// 整体重优化（阻塞求解放入专用线程）
    pub async fn reoptimize(&self, horizon_start: Option<NaiveDateTime>) -> EngineResult<(u64, SolveOutcome)> {
        let policy = self.load_policy().await?;
        let orchestrator = Arc::clone(&self.orchestrator);
        task::spawn_blocking(move || {
            let snapshot = orchestrator.store().read_snapshot()?;
            let start = horizon_start.unwrap_or(snapshot.as_of);
            let outcome = orchestrator.solver().reoptimize(&snapshot, start, &policy)?;
            Ok((snapshot.version, outcome))
        })
        .await
        .map_err(|e| EngineError::Other(anyhow::anyhow!("重优化任务异常退出: {}", e)))?
    }
}
