// ==========================================
// 机组排班自愈系统 - 修复执行器
// ==========================================
// 职责: 提交已选差异 -> 关闭扰动 -> 发出通知 -> 归档推理轨迹
// 红线: 提交全有或全无，通知失败不回滚已提交排班
// ==========================================

use crate::config::HealingPolicy;
use crate::domain::candidate::{AssignmentDiff, Candidate, PilotChange};
use crate::domain::trace::ReasoningTrace;
use crate::domain::types::{CandidateAction, CandidateSource, DisruptionStatus, PilotStatus};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{OptionalNotificationPublisher, RosterNotification};
use crate::engine::solver::SolverSolution;
use crate::engine::validation::ValidationPipeline;
use crate::repository::roster_store::RosterStore;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct ResolutionExecutor {
    store: Arc<dyn RosterStore>,
    publisher: OptionalNotificationPublisher,
}

impl ResolutionExecutor {
    pub fn new(store: Arc<dyn RosterStore>, publisher: OptionalNotificationPublisher) -> Self {
        Self { store, publisher }
    }

    /// 提交差异
    ///
    /// # 参数
    /// - `disruption_id`: 与排班同一事务标记为 Resolved（批量重优化等场景为空）
    /// - `snapshot_version`: 生成差异时读取的快照版本
    ///
    /// # 返回
    /// - Ok(new_version)
    /// - Err(StaleSnapshot): 快照已过期，排班未改变
    /// - Err(DisruptionClosed): 扰动已被其他周期关闭，排班未改变
    pub fn commit(
        &self,
        disruption_id: Option<&str>,
        diff: &AssignmentDiff,
        snapshot_version: u64,
    ) -> EngineResult<u64> {
        let new_version = match disruption_id {
            Some(id) => self.store.commit_resolving(diff, snapshot_version, id)?,
            None => self.store.commit(diff, snapshot_version)?,
        };
        self.notify(diff, new_version);

        info!(
            disruption_id = disruption_id.unwrap_or("-"),
            new_version,
            "修复已提交"
        );
        Ok(new_version)
    }

    /// 标记扰动为已修复（无需变更排班的周期）
    pub fn resolve_without_changes(&self, disruption_id: &str) -> EngineResult<()> {
        self.store.close_disruption(disruption_id, DisruptionStatus::Resolved)?;
        Ok(())
    }

    /// 升级人工处理
    pub fn escalate(&self, disruption_id: &str, reason_code: &str) -> EngineResult<()> {
        self.store.close_disruption(disruption_id, DisruptionStatus::Escalated)?;
        warn!(disruption_id, reason_code, "扰动已升级人工处理");
        Ok(())
    }

    /// 归档已封存的推理轨迹
    pub fn record_trace(&self, trace: ReasoningTrace) -> EngineResult<()> {
        self.store.record_trace(trace)?;
        Ok(())
    }

    fn notify(&self, diff: &AssignmentDiff, version: u64) {
        if !self.publisher.is_configured() {
            return;
        }
        for notification in RosterNotification::from_diff(diff, version) {
            let flight_id = notification.flight_id.clone();
            if let Err(e) = self.publisher.publish(notification) {
                warn!(flight_id = %flight_id, error = %e, "通知发布失败");
            }
        }
    }

    /// 安排休息: 疲劳清零、状态 Available、可执勤时刻推迟到 rest_end
    pub fn grant_rest(&self, pilot_id: &str, rest_end: NaiveDateTime) -> EngineResult<u64> {
        let snapshot = self.store.read_snapshot()?;
        let pilot = snapshot.pilot(pilot_id).ok_or_else(|| EngineError::NotFound {
            entity: "Pilot".to_string(),
            id: pilot_id.to_string(),
        })?;
        if !pilot.status.can_take_duty() {
            return Err(EngineError::InvalidTransition {
                from: pilot.status.to_string(),
                to: PilotStatus::Available.to_string(),
            });
        }

        let diff = AssignmentDiff {
            flight_changes: Vec::new(),
            pilot_changes: vec![PilotChange {
                pilot_id: pilot_id.to_string(),
                fatigue_delta: -pilot.fatigue_score,
                weekly_minutes_delta: 0,
                new_status: Some(PilotStatus::Available),
                rest_available_from: Some(rest_end.max(pilot.rest_available_from)),
            }],
        };
        let new_version = self.store.commit(&diff, snapshot.version)?;
        info!(pilot_id, rest_end = %rest_end, new_version, "休息安排已提交");
        Ok(new_version)
    }

    /// 校验并应用整体重优化结果
    pub fn apply_solution(
        &self,
        solution: &SolverSolution,
        snapshot_version: u64,
        pipeline: &ValidationPipeline,
        policy: &HealingPolicy,
    ) -> EngineResult<u64> {
        let snapshot = self.store.read_snapshot()?;
        if snapshot.version != snapshot_version {
            return Err(EngineError::StaleSnapshot {
                expected: snapshot_version,
                actual: snapshot.version,
            });
        }
        if solution.diff.is_empty() {
            return Ok(snapshot.version);
        }

        let fatigue_deltas: BTreeMap<String, f64> = solution
            .diff
            .pilot_changes
            .iter()
            .map(|c| (c.pilot_id.clone(), c.fatigue_delta))
            .collect();
        let candidate = Candidate {
            candidate_id: format!("reoptimize:{}", snapshot_version),
            flight_id: String::new(),
            action: CandidateAction::Swap,
            source: CandidateSource::Solver,
            diff: solution.diff.clone(),
            predicted_cost: solution.objective,
            fatigue_deltas,
            co2_kg: 0.0,
            cost_breakdown: Vec::new(),
            verdict: None,
            score: None,
            rationale: format!("整体重优化，改派 {} 个航班", solution.reassignments),
        };
        let verdict = pipeline.validate(&candidate, &snapshot, policy);
        if let Some(reason) = verdict.reject_reason() {
            return Err(EngineError::Validation(format!("重优化结果未通过校验: {}", reason)));
        }
        self.commit(None, &solution.diff, snapshot_version)
    }
}
