// ==========================================
// 机组排班自愈系统 - 自愈 API
// ==========================================
// 职责: 扰动注入、自愈触发（自动/顾问）、人工采纳候选、整体重优化、休息安排
// 红线: 边界输入在此校验，引擎只接收合法数据
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::config::HealingPolicy;
use crate::domain::candidate::Candidate;
use crate::domain::disruption::DisruptionInput;
use crate::domain::roster::RosterSnapshot;
use crate::domain::trace::{CycleOutcome, ReasoningTrace};
use crate::engine::estimator::CrewCostEstimate;
use crate::engine::orchestrator::{CycleReport, HealingOrchestrator};
use crate::engine::solver::SolveOutcome;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

/// 顾问模式输出的待采纳候选
#[derive(Debug, Clone)]
struct PendingCandidate {
    disruption_id: String,
    snapshot_version: u64,
    candidate: Candidate,
}

/// 整体重优化结果（带求解时的快照版本）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterOptimization {
    pub snapshot_version: u64,
    pub outcome: SolveOutcome,
}

// ==========================================
// HealingApi - 自愈 API
// ==========================================
pub struct HealingApi {
    orchestrator: Arc<HealingOrchestrator>,
    policy: RwLock<HealingPolicy>,
    pending: Mutex<HashMap<String, PendingCandidate>>,
}

impl HealingApi {
    pub fn new(orchestrator: Arc<HealingOrchestrator>, policy: HealingPolicy) -> Self {
        Self {
            orchestrator,
            policy: RwLock::new(policy),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// 当前策略副本
    pub fn policy(&self) -> ApiResult<HealingPolicy> {
        self.policy
            .read()
            .map(|p| p.clone())
            .map_err(|e| ApiError::InternalError(format!("策略锁获取失败: {}", e)))
    }

    /// 替换策略（校验通过后生效）
    pub fn set_policy(&self, policy: HealingPolicy) -> ApiResult<()> {
        policy.validate().map_err(ApiError::ConfigError)?;
        let mut guard = self
            .policy
            .write()
            .map_err(|e| ApiError::InternalError(format!("策略锁获取失败: {}", e)))?;
        *guard = policy;
        Ok(())
    }

    pub fn snapshot(&self) -> ApiResult<Arc<RosterSnapshot>> {
        Ok(self.orchestrator.store().read_snapshot()?)
    }

    // ==========================================
    // 扰动注入
    // ==========================================

    /// 注入扰动
    ///
    /// # 校验
    /// - 必须指定航班或机场
    /// - 航班必须存在；机场必须有执行中的起飞航班
    /// - 显式延误不得为负
    ///
    /// # 返回
    /// - Ok(disruption_id)
    pub fn inject_disruption(&self, input: DisruptionInput) -> ApiResult<String> {
        if let Some(delay) = input.delay_minutes {
            if delay < 0 {
                return Err(ApiError::InvalidInput(format!("延误分钟不能为负: {}", delay)));
            }
        }

        let snapshot = self.snapshot()?;
        let mut flight_ids: BTreeSet<String> = BTreeSet::new();
        for flight_id in &input.affected_flight_ids {
            let flight_id = flight_id.trim();
            if flight_id.is_empty() {
                return Err(ApiError::InvalidInput("航班ID不能为空".to_string()));
            }
            if snapshot.flight(flight_id).is_none() {
                return Err(ApiError::NotFound(format!("Flight(id={})不存在", flight_id)));
            }
            flight_ids.insert(flight_id.to_string());
        }

        if flight_ids.is_empty() {
            let airport = input
                .affected_airport
                .as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .ok_or_else(|| ApiError::InvalidInput("必须指定受影响航班或机场".to_string()))?;
            if snapshot.departures_from(airport).is_empty() {
                return Err(ApiError::InvalidInput(format!("机场 {} 没有执行中的起飞航班", airport)));
            }
        }

        let disruption_id = format!("DSR-{}", Uuid::new_v4().simple());
        let disruption = input.into_disruption(disruption_id.clone(), flight_ids.into_iter().collect());
        info!(
            disruption_id = %disruption_id,
            disruption_type = %disruption.disruption_type,
            severity = %disruption.severity,
            flights = disruption.affected_flight_ids.len(),
            "扰动已注入"
        );
        self.orchestrator.store().record_disruption(disruption)?;
        Ok(disruption_id)
    }

    // ==========================================
    // 自愈
    // ==========================================

    /// 自动自愈（提交或升级）
    pub fn heal(&self, disruption_id: &str) -> ApiResult<CycleReport> {
        let policy = self.policy()?;
        let report = self.orchestrator.heal(disruption_id, &policy)?;
        self.drop_pending(disruption_id)?;
        Ok(report)
    }

    /// 顾问模式: 输出排序后的候选与推理轨迹，不提交
    pub fn run_heal(&self, disruption_id: &str) -> ApiResult<CycleReport> {
        let policy = self.policy()?;
        let report = self.orchestrator.plan(disruption_id, &policy)?;

        let mut pending = self
            .pending
            .lock()
            .map_err(|e| ApiError::InternalError(format!("候选缓存锁获取失败: {}", e)))?;
        pending.retain(|_, p| p.disruption_id != disruption_id);
        for candidate in report.plans.iter().flat_map(|p| p.candidates.iter()) {
            pending.insert(
                candidate.candidate_id.clone(),
                PendingCandidate {
                    disruption_id: disruption_id.to_string(),
                    snapshot_version: report.snapshot_version,
                    candidate: candidate.clone(),
                },
            );
        }
        Ok(report)
    }

    /// 人工采纳候选
    ///
    /// # 规则
    /// - 只能采纳最近一次顾问模式输出、且通过校验的候选（含取消）
    /// - 采纳时一并提交不可用机组状态与其余关键航班的自动修复；
    ///   任一关键航班无可提交候选时不提交，扰动保持 Open
    /// - 快照在规划后被修改 -> StaleSnapshot，需要重新规划
    ///
    /// # 返回
    /// - Ok(new_version)
    pub fn resolve(&self, candidate_id: &str) -> ApiResult<u64> {
        let pending = {
            let guard = self
                .pending
                .lock()
                .map_err(|e| ApiError::InternalError(format!("候选缓存锁获取失败: {}", e)))?;
            guard
                .get(candidate_id)
                .cloned()
                .ok_or_else(|| ApiError::NotFound(format!("Candidate(id={})不存在或已失效", candidate_id)))?
        };
        if !pending.candidate.is_accepted() {
            return Err(ApiError::InvalidInput(format!("候选 {} 未通过校验，不可采纳", candidate_id)));
        }

        let policy = self.policy()?;
        let report = match self.orchestrator.resolve_candidate(
            &pending.disruption_id,
            candidate_id,
            pending.snapshot_version,
            &policy,
        ) {
            Ok(report) => report,
            Err(e) => {
                // 快照或扰动已变化，缓存的候选全部失效
                if e.is_stale() || e.is_disruption_closed() {
                    self.drop_pending(&pending.disruption_id)?;
                }
                return Err(e.into());
            }
        };

        self.drop_pending(&pending.disruption_id)?;
        let new_version = match report.outcome {
            CycleOutcome::Committed { new_version } => new_version,
            _ => report.snapshot_version,
        };
        info!(candidate_id, new_version, flights = report.plans.len(), "人工采纳完成");
        Ok(new_version)
    }

    fn drop_pending(&self, disruption_id: &str) -> ApiResult<()> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|e| ApiError::InternalError(format!("候选缓存锁获取失败: {}", e)))?;
        pending.retain(|_, p| p.disruption_id != disruption_id);
        Ok(())
    }

    /// 扰动的全部推理轨迹
    pub fn traces(&self, disruption_id: &str) -> ApiResult<Vec<ReasoningTrace>> {
        Ok(self.orchestrator.store().traces_for(disruption_id)?)
    }

    // ==========================================
    // 整体重优化
    // ==========================================

    /// 规划窗口内整体重优化（不提交）
    ///
    /// # 参数
    /// - `horizon_start`: 为空时取快照时间
    pub fn reoptimize_roster(&self, horizon_start: Option<NaiveDateTime>) -> ApiResult<RosterOptimization> {
        let policy = self.policy()?;
        let snapshot = self.snapshot()?;
        let start = horizon_start.unwrap_or(snapshot.as_of);
        let outcome = self.orchestrator.solver().reoptimize(&snapshot, start, &policy)?;
        Ok(RosterOptimization {
            snapshot_version: snapshot.version,
            outcome,
        })
    }

    /// 校验并应用整体重优化结果
    pub fn apply_roster_solution(&self, optimization: &RosterOptimization) -> ApiResult<u64> {
        let solution = optimization
            .outcome
            .solution()
            .ok_or_else(|| ApiError::Infeasible("重优化结果不可行，无法应用".to_string()))?;
        let policy = self.policy()?;
        let version = self.orchestrator.executor().apply_solution(
            solution,
            optimization.snapshot_version,
            self.orchestrator.pipeline(),
            &policy,
        )?;
        Ok(version)
    }

    // ==========================================
    // 机组
    // ==========================================

    /// 安排休息
    pub fn grant_rest(&self, pilot_id: &str, rest_end: NaiveDateTime) -> ApiResult<u64> {
        Ok(self.orchestrator.executor().grant_rest(pilot_id, rest_end)?)
    }

    /// 机组加班成本估算
    ///
    /// # 参数
    /// - `at`: 新增执勤开始时刻，为空时取快照时间
    pub fn estimate_crew_cost(
        &self,
        pilot_id: &str,
        additional_minutes: i64,
        at: Option<NaiveDateTime>,
    ) -> ApiResult<CrewCostEstimate> {
        if additional_minutes <= 0 {
            return Err(ApiError::InvalidInput(format!(
                "新增执勤分钟必须为正: {}",
                additional_minutes
            )));
        }
        let policy = self.policy()?;
        let snapshot = self.snapshot()?;
        let pilot = snapshot
            .pilot(pilot_id)
            .ok_or_else(|| ApiError::NotFound(format!("Pilot(id={})不存在", pilot_id)))?;
        Ok(self
            .orchestrator
            .estimator()
            .estimate_crew_cost(pilot, additional_minutes, at.unwrap_or(snapshot.as_of), &policy))
    }
}
