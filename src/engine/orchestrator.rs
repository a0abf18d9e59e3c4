// ==========================================
// 机组排班自愈系统 - 自愈编排器
// ==========================================
// 职责: 协调 分类 -> 候选生成 -> 校验 -> 排序 -> 提交/升级 的完整周期
// 状态机: Idle -> Detecting -> GeneratingCandidates -> Validating -> Ranking
//         -> {Committed | Escalated}，非法转换返回 InvalidTransition
// 红线: 每个周期（含失败）都必须产出封存的推理轨迹
// 红线: 取消方案只在 auto_cancel 开启时自动提交（人工采纳除外）
// 红线: 扰动只在全部关键航班有修复时随提交一起关闭
// ==========================================

use crate::config::HealingPolicy;
use crate::domain::candidate::{AssignmentDiff, Candidate, CandidateDraft, DutyGain, PilotChange, Verdict};
use crate::domain::disruption::Disruption;
use crate::domain::roster::RosterSnapshot;
use crate::domain::trace::{CycleOutcome, ReasoningTrace, StepKind};
use crate::domain::types::{CandidateAction, CandidateSource, PilotStatus};
use crate::engine::classifier::{CriticalFlight, DisruptionClassifier};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::estimator::CostFatigueEstimator;
use crate::engine::events::OptionalNotificationPublisher;
use crate::engine::executor::ResolutionExecutor;
use crate::engine::generator::{CandidateGenerator, GenerationContext};
use crate::engine::ranking;
use crate::engine::solver::{ConstraintSolver, FlightSlot, SolveOutcome};
use crate::engine::trace_builder::TraceBuilder;
use crate::engine::validation::ValidationPipeline;
use crate::repository::roster_store::RosterStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ==========================================
// HealingState - 周期状态
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealingState {
    Idle,
    Detecting,
    GeneratingCandidates,
    Validating,
    Ranking,
    Committed,
    Escalated,
}

impl HealingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HealingState::Committed | HealingState::Escalated)
    }

    /// 合法转换
    pub fn can_transition_to(&self, next: HealingState) -> bool {
        use HealingState::*;
        match (self, next) {
            (Idle, Detecting) => true,
            (Detecting, GeneratingCandidates | Committed | Escalated) => true,
            (GeneratingCandidates, GeneratingCandidates | Validating | Committed | Escalated) => true,
            (Validating, Ranking | Escalated) => true,
            (Ranking, GeneratingCandidates | Committed | Escalated) => true,
            // 提交冲突重试: 回到 Idle 重新读取快照
            (Detecting | GeneratingCandidates | Validating | Ranking, Idle) => true,
            _ => false,
        }
    }
}

impl fmt::Display for HealingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealingState::Idle => "IDLE",
            HealingState::Detecting => "DETECTING",
            HealingState::GeneratingCandidates => "GENERATING_CANDIDATES",
            HealingState::Validating => "VALIDATING",
            HealingState::Ranking => "RANKING",
            HealingState::Committed => "COMMITTED",
            HealingState::Escalated => "ESCALATED",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug)]
pub struct HealingStateMachine {
    state: HealingState,
}

impl Default for HealingStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl HealingStateMachine {
    pub fn new() -> Self {
        Self {
            state: HealingState::Idle,
        }
    }

    pub fn state(&self) -> HealingState {
        self.state
    }

    pub fn transition(&mut self, next: HealingState) -> EngineResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!(from = %self.state, to = %next, "状态转换");
        self.state = next;
        Ok(())
    }
}

// ==========================================
// 周期结果
// ==========================================

/// 单个关键航班的规划结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightPlan {
    pub critical: CriticalFlight,
    pub candidates: Vec<Candidate>, // 已排序（被拒绝的在后）
    pub selected: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: String,
    pub disruption_id: String,
    pub snapshot_version: u64,
    pub attempts: u32,
    pub outcome: CycleOutcome,
    pub plans: Vec<FlightPlan>,
    pub diff: AssignmentDiff,
    pub trace: ReasoningTrace,
}

impl CycleReport {
    /// 按 candidate_id 查找候选
    pub fn candidate(&self, candidate_id: &str) -> Option<&Candidate> {
        self.plans
            .iter()
            .flat_map(|p| p.candidates.iter())
            .find(|c| c.candidate_id == candidate_id)
    }

    /// 选中的候选（按航班处理顺序）
    pub fn selected_candidates(&self) -> Vec<&Candidate> {
        self.plans
            .iter()
            .filter_map(|p| p.selected.as_deref().and_then(|id| p.candidates.iter().find(|c| c.candidate_id == id)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode<'a> {
    Autonomous,                 // 自动提交
    Advisory,                   // 只排序不提交
    Manual { pinned: &'a str }, // 指定航班采用人工候选，其余航班自动选择
}

enum Planning {
    Ready {
        plans: Vec<FlightPlan>,
        diff: AssignmentDiff,
    },
    Escalate {
        reason_code: String,
        plans: Vec<FlightPlan>,
    },
}

// ==========================================
// HealingOrchestrator - 自愈编排器
// ==========================================
pub struct HealingOrchestrator {
    store: Arc<dyn RosterStore>,
    classifier: DisruptionClassifier,
    generator: CandidateGenerator,
    pipeline: ValidationPipeline,
    solver: ConstraintSolver,
    executor: ResolutionExecutor,
    estimator: Arc<dyn CostFatigueEstimator>,
}

impl HealingOrchestrator {
    pub fn new(
        store: Arc<dyn RosterStore>,
        estimator: Arc<dyn CostFatigueEstimator>,
        publisher: OptionalNotificationPublisher,
    ) -> Self {
        Self {
            classifier: DisruptionClassifier::new(),
            generator: CandidateGenerator::new(Arc::clone(&estimator)),
            pipeline: ValidationPipeline::default(),
            solver: ConstraintSolver::new(Arc::clone(&estimator)),
            executor: ResolutionExecutor::new(Arc::clone(&store), publisher),
            estimator,
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn RosterStore> {
        &self.store
    }

    pub fn executor(&self) -> &ResolutionExecutor {
        &self.executor
    }

    pub fn pipeline(&self) -> &ValidationPipeline {
        &self.pipeline
    }

    pub fn solver(&self) -> &ConstraintSolver {
        &self.solver
    }

    pub fn estimator(&self) -> &Arc<dyn CostFatigueEstimator> {
        &self.estimator
    }

    fn open_disruption(&self, disruption_id: &str) -> EngineResult<Disruption> {
        let disruption = self.store.get_disruption(disruption_id)?;
        if !disruption.is_open() {
            return Err(EngineError::InvalidTransition {
                from: disruption.status.to_string(),
                to: "HEALING".to_string(),
            });
        }
        Ok(disruption)
    }

    /// 自动自愈周期（提交或升级）
    pub fn heal(&self, disruption_id: &str, policy: &HealingPolicy) -> EngineResult<CycleReport> {
        self.open_disruption(disruption_id)?;
        let cycle_id = Uuid::new_v4().to_string();
        let mut trace = TraceBuilder::new(&cycle_id, disruption_id);

        info!(disruption_id, cycle_id = %cycle_id, "开始自愈周期");
        let result = self.heal_cycle(&cycle_id, disruption_id, policy, &mut trace);
        self.finish(disruption_id, result, &mut trace)
    }

    fn heal_cycle(
        &self,
        cycle_id: &str,
        disruption_id: &str,
        policy: &HealingPolicy,
        trace: &mut TraceBuilder,
    ) -> EngineResult<CycleReport> {
        let mut machine = HealingStateMachine::new();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            // 每次尝试前复核扰动状态（可能已被并发周期或人工采纳关闭）
            let disruption = self.store.get_disruption(disruption_id)?;
            let snapshot = self.store.read_snapshot()?;
            if !disruption.is_open() {
                return self.closed_elsewhere(cycle_id, &disruption, &snapshot, attempts, Vec::new(), trace);
            }

            let planning = self.plan_cycle(&disruption, &snapshot, policy, Mode::Autonomous, &mut machine, trace)?;
            let (plans, diff) = match planning {
                Planning::Escalate { reason_code, plans } => {
                    return self.escalate(cycle_id, &disruption, &snapshot, attempts, reason_code, plans, &mut machine, trace);
                }
                Planning::Ready { plans, diff } => (plans, diff),
            };

            if diff.is_empty() {
                machine.transition(HealingState::Committed)?;
                match self.executor.resolve_without_changes(disruption_id) {
                    Ok(()) => {}
                    Err(e) if e.is_disruption_closed() => {
                        return self.closed_elsewhere(cycle_id, &disruption, &snapshot, attempts, plans, trace);
                    }
                    Err(e) => return Err(e),
                }
                let outcome = CycleOutcome::Committed {
                    new_version: snapshot.version,
                };
                let sealed = self.seal(trace, outcome.clone())?;
                info!(disruption_id, version = snapshot.version, "无需变更排班，扰动已关闭");
                return Ok(CycleReport {
                    cycle_id: cycle_id.to_string(),
                    disruption_id: disruption_id.to_string(),
                    snapshot_version: snapshot.version,
                    attempts,
                    outcome,
                    plans,
                    diff,
                    trace: sealed,
                });
            }

            trace.append(
                StepKind::CommitAttempt,
                disruption_id,
                None,
                format!(
                    "提交 {} 个航班变更、{} 个机组变更（快照版本 {}）",
                    diff.flight_changes.len(),
                    diff.pilot_changes.len(),
                    snapshot.version
                ),
            )?;

            match self.executor.commit(Some(disruption_id), &diff, snapshot.version) {
                Ok(new_version) => {
                    machine.transition(HealingState::Committed)?;
                    let outcome = CycleOutcome::Committed { new_version };
                    let sealed = self.seal(trace, outcome.clone())?;
                    info!(disruption_id, new_version, attempts, "自愈周期完成");
                    return Ok(CycleReport {
                        cycle_id: cycle_id.to_string(),
                        disruption_id: disruption_id.to_string(),
                        snapshot_version: snapshot.version,
                        attempts,
                        outcome,
                        plans,
                        diff,
                        trace: sealed,
                    });
                }
                Err(e) if e.is_disruption_closed() => {
                    trace.append(StepKind::CommitAttempt, disruption_id, Some(e.reason_code()), e.to_string())?;
                    let closed = self.store.get_disruption(disruption_id)?;
                    return self.closed_elsewhere(cycle_id, &closed, &snapshot, attempts, plans, trace);
                }
                Err(e) if e.is_stale() => {
                    trace.append(StepKind::CommitAttempt, disruption_id, Some(e.reason_code()), e.to_string())?;
                    if attempts > policy.max_commit_retries {
                        warn!(disruption_id, attempts, "提交重试次数耗尽");
                        return self.escalate(
                            cycle_id,
                            &disruption,
                            &snapshot,
                            attempts,
                            "commit_retries_exhausted".to_string(),
                            plans,
                            &mut machine,
                            trace,
                        );
                    }
                    warn!(disruption_id, attempts, "快照已过期，重新执行周期");
                    machine.transition(HealingState::Idle)?;
                }
                Err(e) => {
                    trace.append(StepKind::CommitAttempt, disruption_id, Some("commit_rejected"), e.to_string())?;
                    return self.escalate(
                        cycle_id,
                        &disruption,
                        &snapshot,
                        attempts,
                        "commit_rejected".to_string(),
                        plans,
                        &mut machine,
                        trace,
                    );
                }
            }
        }
    }

    /// 顾问模式: 排序后停止，不提交
    pub fn plan(&self, disruption_id: &str, policy: &HealingPolicy) -> EngineResult<CycleReport> {
        let disruption = self.open_disruption(disruption_id)?;
        let cycle_id = Uuid::new_v4().to_string();
        let mut trace = TraceBuilder::new(&cycle_id, disruption_id);
        let result = self.plan_only(&cycle_id, &disruption, policy, &mut trace);
        self.finish(disruption_id, result, &mut trace)
    }

    fn plan_only(
        &self,
        cycle_id: &str,
        disruption: &Disruption,
        policy: &HealingPolicy,
        trace: &mut TraceBuilder,
    ) -> EngineResult<CycleReport> {
        let mut machine = HealingStateMachine::new();
        let snapshot = self.store.read_snapshot()?;

        let planning = self.plan_cycle(disruption, &snapshot, policy, Mode::Advisory, &mut machine, trace)?;
        let (outcome, plans, diff) = match planning {
            Planning::Ready { plans, diff } => (CycleOutcome::Planned, plans, diff),
            Planning::Escalate { reason_code, plans } => {
                (CycleOutcome::Escalated { reason_code }, plans, AssignmentDiff::default())
            }
        };
        let sealed = self.seal(trace, outcome.clone())?;
        info!(disruption_id = %disruption.disruption_id, flights = plans.len(), "顾问模式规划完成");

        Ok(CycleReport {
            cycle_id: cycle_id.to_string(),
            disruption_id: disruption.disruption_id.clone(),
            snapshot_version: snapshot.version,
            attempts: 1,
            outcome,
            plans,
            diff,
            trace: sealed,
        })
    }

    /// 人工采纳候选
    ///
    /// # 规则
    /// 1. 在规划时的快照版本上重放规划（规划是确定性的）
    /// 2. 候选所属航班采用人工候选，其余关键航班按排序自动选择
    /// 3. 不可用机组状态 + 全部关键航班的修复与扰动关闭一起提交
    /// 4. 任一关键航班无可提交候选 -> 不提交，扰动保持 Open
    ///
    /// 失败时轨迹以错误原因码封存，扰动状态不变
    pub fn resolve_candidate(
        &self,
        disruption_id: &str,
        candidate_id: &str,
        snapshot_version: u64,
        policy: &HealingPolicy,
    ) -> EngineResult<CycleReport> {
        let disruption = self.open_disruption(disruption_id)?;
        let cycle_id = Uuid::new_v4().to_string();
        let mut trace = TraceBuilder::new(&cycle_id, disruption_id);
        trace.append(
            StepKind::Selected,
            candidate_id,
            Some("manual_selection"),
            format!("人工采纳候选（规划快照版本 {}）", snapshot_version),
        )?;
        let result = self.manual_cycle(&cycle_id, &disruption, candidate_id, snapshot_version, policy, &mut trace);
        self.finish(disruption_id, result, &mut trace)
    }

    fn manual_cycle(
        &self,
        cycle_id: &str,
        disruption: &Disruption,
        candidate_id: &str,
        snapshot_version: u64,
        policy: &HealingPolicy,
        trace: &mut TraceBuilder,
    ) -> EngineResult<CycleReport> {
        let disruption_id = disruption.disruption_id.as_str();
        let snapshot = self.store.read_snapshot()?;
        if snapshot.version != snapshot_version {
            return Err(EngineError::StaleSnapshot {
                expected: snapshot_version,
                actual: snapshot.version,
            });
        }

        let mut machine = HealingStateMachine::new();
        let mode = Mode::Manual { pinned: candidate_id };
        let (plans, diff) = match self.plan_cycle(disruption, &snapshot, policy, mode, &mut machine, trace)? {
            Planning::Ready { plans, diff } => (plans, diff),
            Planning::Escalate { reason_code, plans } => {
                let flight_id = plans
                    .last()
                    .map(|p| p.critical.flight_id.clone())
                    .unwrap_or_else(|| disruption_id.to_string());
                return Err(EngineError::Infeasible { flight_id, reason_code });
            }
        };
        if !plans.iter().any(|p| p.selected.as_deref() == Some(candidate_id)) {
            return Err(EngineError::Validation(format!(
                "候选 {} 不在当前规划中，需要重新规划",
                candidate_id
            )));
        }

        trace.append(
            StepKind::CommitAttempt,
            disruption_id,
            None,
            format!(
                "人工采纳提交 {} 个航班变更、{} 个机组变更（快照版本 {}）",
                diff.flight_changes.len(),
                diff.pilot_changes.len(),
                snapshot.version
            ),
        )?;
        let new_version = self.executor.commit(Some(disruption_id), &diff, snapshot.version)?;
        machine.transition(HealingState::Committed)?;
        let outcome = CycleOutcome::Committed { new_version };
        let sealed = self.seal(trace, outcome.clone())?;
        info!(disruption_id, candidate_id, new_version, "人工采纳候选已提交");

        Ok(CycleReport {
            cycle_id: cycle_id.to_string(),
            disruption_id: disruption_id.to_string(),
            snapshot_version: snapshot.version,
            attempts: 1,
            outcome,
            plans,
            diff,
            trace: sealed,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn escalate(
        &self,
        cycle_id: &str,
        disruption: &Disruption,
        snapshot: &RosterSnapshot,
        attempts: u32,
        reason_code: String,
        plans: Vec<FlightPlan>,
        machine: &mut HealingStateMachine,
        trace: &mut TraceBuilder,
    ) -> EngineResult<CycleReport> {
        machine.transition(HealingState::Escalated)?;
        match self.executor.escalate(&disruption.disruption_id, &reason_code) {
            Ok(()) => {}
            Err(e) if e.is_disruption_closed() => {
                let closed = self.store.get_disruption(&disruption.disruption_id)?;
                return self.closed_elsewhere(cycle_id, &closed, snapshot, attempts, plans, trace);
            }
            Err(e) => return Err(e),
        }
        let outcome = CycleOutcome::Escalated { reason_code };
        let sealed = self.seal(trace, outcome.clone())?;
        Ok(CycleReport {
            cycle_id: cycle_id.to_string(),
            disruption_id: disruption.disruption_id.clone(),
            snapshot_version: snapshot.version,
            attempts,
            outcome,
            plans,
            diff: AssignmentDiff::default(),
            trace: sealed,
        })
    }

    /// 扰动已被其他周期关闭: 放弃本周期，不改变排班与扰动状态
    fn closed_elsewhere(
        &self,
        cycle_id: &str,
        disruption: &Disruption,
        snapshot: &RosterSnapshot,
        attempts: u32,
        plans: Vec<FlightPlan>,
        trace: &mut TraceBuilder,
    ) -> EngineResult<CycleReport> {
        warn!(
            disruption_id = %disruption.disruption_id,
            status = %disruption.status,
            attempts,
            "扰动已被其他周期关闭，放弃本周期"
        );
        trace.append(
            StepKind::Failure,
            &disruption.disruption_id,
            Some("disruption_closed"),
            format!("扰动已被其他周期关闭（{}）", disruption.status),
        )?;
        let outcome = CycleOutcome::Escalated {
            reason_code: "disruption_closed".to_string(),
        };
        let sealed = self.seal(trace, outcome.clone())?;
        Ok(CycleReport {
            cycle_id: cycle_id.to_string(),
            disruption_id: disruption.disruption_id.clone(),
            snapshot_version: snapshot.version,
            attempts,
            outcome,
            plans,
            diff: AssignmentDiff::default(),
            trace: sealed,
        })
    }

    /// 周期出错时补封轨迹（未封存时以错误原因码封存），错误原样返回
    fn finish(
        &self,
        disruption_id: &str,
        result: EngineResult<CycleReport>,
        trace: &mut TraceBuilder,
    ) -> EngineResult<CycleReport> {
        let err = match result {
            Ok(report) => return Ok(report),
            Err(e) => e,
        };
        if !trace.is_sealed() {
            if let Err(e) = self.archive_failure(disruption_id, &err, trace) {
                warn!(disruption_id, error = %e, "失败轨迹归档失败");
            }
        }
        warn!(disruption_id, error = %err, "自愈周期失败");
        Err(err)
    }

    fn archive_failure(&self, disruption_id: &str, err: &EngineError, trace: &mut TraceBuilder) -> EngineResult<()> {
        trace.append(StepKind::Failure, disruption_id, Some(err.reason_code()), err.to_string())?;
        self.seal(
            trace,
            CycleOutcome::Escalated {
                reason_code: err.reason_code().to_string(),
            },
        )?;
        Ok(())
    }

    fn seal(&self, trace: &mut TraceBuilder, outcome: CycleOutcome) -> EngineResult<ReasoningTrace> {
        let sealed = trace.seal(outcome)?;
        self.executor.record_trace(sealed.clone())?;
        Ok(sealed)
    }

    // ==========================================
    // 规划: 分类 -> 逐航班生成/校验/排序/选择
    // ==========================================
    fn plan_cycle(
        &self,
        disruption: &Disruption,
        snapshot: &RosterSnapshot,
        policy: &HealingPolicy,
        mode: Mode<'_>,
        machine: &mut HealingStateMachine,
        trace: &mut TraceBuilder,
    ) -> EngineResult<Planning> {
        let disruption_id = disruption.disruption_id.as_str();
        machine.transition(HealingState::Detecting)?;
        trace.append(
            StepKind::DisruptionObserved,
            disruption_id,
            None,
            format!(
                "扰动 {} / {}，快照版本 {}",
                disruption.disruption_type, disruption.severity, snapshot.version
            ),
        )?;

        // 步骤1: 分类
        let classification = match self.classifier.classify(disruption, snapshot, policy) {
            Ok(c) => c,
            Err(e) => {
                warn!(disruption_id, error = %e, "扰动分类失败");
                trace.append(StepKind::Failure, disruption_id, Some(e.reason_code()), e.to_string())?;
                return Ok(Planning::Escalate {
                    reason_code: e.reason_code().to_string(),
                    plans: Vec::new(),
                });
            }
        };
        for critical in &classification.critical {
            trace.append(
                StepKind::CriticalFlight,
                &critical.flight_id,
                Some(critical.reason.code()),
                format!(
                    "预测延误 {} 分钟，级联深度 {}，机组 {}",
                    critical.predicted_delay_minutes,
                    critical.cascade_depth,
                    critical.affected_pilot.as_deref().unwrap_or("-")
                ),
            )?;
        }

        // 步骤2: 不可用机组状态并入工作快照
        let mut combined = AssignmentDiff::default();
        for pilot_id in &classification.newly_sick_pilots {
            let already_sick = snapshot
                .pilot(pilot_id)
                .map(|p| p.status == PilotStatus::Sick)
                .unwrap_or(false);
            if !already_sick {
                combined.pilot_changes.push(PilotChange::status_only(pilot_id, PilotStatus::Sick));
            }
        }
        let mut working = snapshot.clone();
        working
            .apply_diff(&combined)
            .map_err(|v| EngineError::Validation(v.to_string()))?;

        if classification.is_empty() {
            trace.append(
                StepKind::Ranked,
                disruption_id,
                Some("no_critical_flights"),
                format!("无关键航班，吸收延误航班 {} 个", classification.absorbed.len()),
            )?;
            return Ok(Planning::Ready {
                plans: Vec::new(),
                diff: combined,
            });
        }

        // 步骤3: 按起飞顺序逐航班处理
        let protected: BTreeSet<String> = classification
            .critical
            .iter()
            .map(|c| c.flight_id.clone())
            .collect();
        let mut plans = Vec::new();

        for critical in &classification.critical {
            machine.transition(HealingState::GeneratingCandidates)?;
            let Some(current) =
                self.classifier
                    .recheck(critical, &working, &classification.unavailable_pilots, policy)
            else {
                trace.append(
                    StepKind::CriticalFlight,
                    &critical.flight_id,
                    Some("covered_upstream"),
                    "上游修复已消除该航班的影响",
                )?;
                continue;
            };

            let ctx = GenerationContext {
                disruption_id,
                excluded_pilots: &classification.unavailable_pilots,
                protected_flights: &protected,
            };
            let mut candidates = match self.generator.generate(ctx, &current, &working, policy) {
                Ok(c) => c,
                Err(e) => {
                    warn!(flight_id = %current.flight_id, error = %e, "候选生成失败");
                    trace.append(StepKind::Failure, &current.flight_id, Some(e.reason_code()), e.to_string())?;
                    return Ok(Planning::Escalate {
                        reason_code: e.reason_code().to_string(),
                        plans,
                    });
                }
            };
            for candidate in &candidates {
                trace.append(
                    StepKind::CandidateConsidered,
                    &candidate.candidate_id,
                    None,
                    format!(
                        "{}: {}，预测成本 {:.2}，疲劳增量 {:.1}，碳排放 {:.0} kg",
                        candidate.action,
                        candidate.rationale,
                        candidate.predicted_cost,
                        candidate.predicted_fatigue_delta(),
                        candidate.co2_kg
                    ),
                )?;
            }

            // 步骤4: 校验
            machine.transition(HealingState::Validating)?;
            self.pipeline.validate_all(&mut candidates, &working, policy);
            for candidate in &candidates {
                self.trace_verdict(trace, candidate)?;
            }

            // 步骤5: 排序与选择
            machine.transition(HealingState::Ranking)?;
            ranking::rank(&mut candidates, policy);
            trace.append(StepKind::Ranked, &current.flight_id, None, ranking_summary(&candidates))?;

            let mut selected = ranking::select_best(&candidates, policy).cloned();
            if let Mode::Manual { pinned } = mode {
                if let Some(choice) = candidates.iter().find(|c| c.candidate_id == pinned) {
                    if !choice.is_accepted() {
                        return Err(EngineError::Validation(format!("候选 {} 未通过校验，不可采纳", pinned)));
                    }
                    selected = Some(choice.clone());
                }
            }
            if selected.is_none() {
                if let Some(fallback) = self.solver_fallback(disruption_id, &current, &working, policy, trace)? {
                    candidates.push(fallback.clone());
                    if fallback.is_accepted() {
                        selected = Some(fallback);
                    }
                }
            }

            match selected {
                Some(choice) => {
                    let manual = matches!(mode, Mode::Manual { pinned } if pinned == choice.candidate_id);
                    trace.append(
                        StepKind::Selected,
                        &choice.candidate_id,
                        manual.then_some("manual_selection"),
                        format!("航班 {}: {}，评分 {:.2}", current.flight_id, choice.rationale, choice.score.unwrap_or(0.0)),
                    )?;
                    working
                        .apply_diff(&choice.diff)
                        .map_err(|v| EngineError::Validation(v.to_string()))?;
                    combined.merge(&choice.diff);
                    plans.push(FlightPlan {
                        critical: current,
                        candidates,
                        selected: Some(choice.candidate_id),
                    });
                }
                None => {
                    trace.append(
                        StepKind::Failure,
                        &current.flight_id,
                        Some("no_feasible_candidate"),
                        "无可自动提交的候选",
                    )?;
                    plans.push(FlightPlan {
                        critical: current,
                        candidates,
                        selected: None,
                    });
                    if mode != Mode::Advisory {
                        return Ok(Planning::Escalate {
                            reason_code: "no_feasible_candidate".to_string(),
                            plans,
                        });
                    }
                }
            }
        }

        Ok(Planning::Ready { plans, diff: combined })
    }

    fn trace_verdict(&self, trace: &mut TraceBuilder, candidate: &Candidate) -> EngineResult<()> {
        match &candidate.verdict {
            Some(Verdict::Reject { reason, pilot_id, detail }) => {
                trace.append(
                    StepKind::Verdict,
                    &candidate.candidate_id,
                    Some(reason.code()),
                    format!("拒绝（机组 {}）: {}", pilot_id.as_deref().unwrap_or("-"), detail),
                )?;
            }
            Some(Verdict::Accept { soft_penalty, notes }) => {
                let mut rationale = format!("通过，软惩罚 {:.2}", soft_penalty);
                if !notes.is_empty() {
                    rationale.push_str("；");
                    rationale.push_str(&notes.join("；"));
                }
                trace.append(StepKind::Verdict, &candidate.candidate_id, None, rationale)?;
            }
            None => {}
        }
        Ok(())
    }

    // ==========================================
    // 求解器兜底: 以单航班子问题扩大机组范围
    // ==========================================
    fn solver_fallback(
        &self,
        disruption_id: &str,
        critical: &CriticalFlight,
        working: &RosterSnapshot,
        policy: &HealingPolicy,
        trace: &mut TraceBuilder,
    ) -> EngineResult<Option<Candidate>> {
        trace.append(
            StepKind::SolverInvoked,
            &critical.flight_id,
            None,
            "启发式无可自动提交候选，调用约束求解器",
        )?;
        let slot = FlightSlot {
            flight_id: critical.flight_id.clone(),
            delay_minutes: critical.predicted_delay_minutes,
        };

        let solution = match self.solver.solve(working, &[slot], policy) {
            Ok(SolveOutcome::Solved(solution)) => solution,
            Ok(SolveOutcome::Infeasible(report)) => {
                let kinds: Vec<&str> = report.constraint_kinds.iter().map(|k| k.code()).collect();
                trace.append(
                    StepKind::SolverInvoked,
                    &critical.flight_id,
                    Some("solver_infeasible"),
                    format!("模型不可行，冲突约束: {}", kinds.join(",")),
                )?;
                return Ok(None);
            }
            Err(e) => {
                trace.append(StepKind::SolverInvoked, &critical.flight_id, Some(e.reason_code()), e.to_string())?;
                return Ok(None);
            }
        };

        let Some(change) = solution
            .diff
            .flight_changes
            .iter()
            .find(|c| c.flight_id == critical.flight_id)
        else {
            return Ok(None);
        };
        let (Some(new_pilot), Some(duty)) = (change.new_pilot_id.as_deref(), change.new_duty.as_ref()) else {
            return Ok(None);
        };
        let keeps_pilot = change.expected_pilot_id.as_deref() == Some(new_pilot);
        let minutes = if keeps_pilot {
            change.added_delay_minutes
        } else {
            duty.duration_minutes()
        };

        let draft = CandidateDraft {
            flight_id: critical.flight_id.clone(),
            action: if keeps_pilot {
                CandidateAction::Delay
            } else {
                CandidateAction::AssignReserve
            },
            source: CandidateSource::Solver,
            diff: AssignmentDiff {
                flight_changes: vec![change.clone()],
                pilot_changes: Vec::new(),
            },
            delay_minutes: change.added_delay_minutes,
            gains: vec![DutyGain {
                pilot_id: new_pilot.to_string(),
                minutes,
                night: duty.is_night(policy.night_start_hour, policy.night_end_hour),
            }],
            rationale: format!("求解器兜底: 指派 {}（目标值 {:.2}）", new_pilot, solution.objective),
        };
        let id = format!("{}:{}:SOLVER:{}", disruption_id, critical.flight_id, new_pilot);
        let mut candidate = self.generator.assemble(id, draft, working, policy);
        candidate.verdict = Some(self.pipeline.validate(&candidate, working, policy));
        if candidate.is_accepted() {
            candidate.score = Some(ranking::score(&candidate, policy));
        }

        trace.append(
            StepKind::CandidateConsidered,
            &candidate.candidate_id,
            None,
            candidate.rationale.clone(),
        )?;
        self.trace_verdict(trace, &candidate)?;
        Ok(Some(candidate))
    }
}

fn ranking_summary(candidates: &[Candidate]) -> String {
    let ranked: Vec<String> = candidates
        .iter()
        .filter_map(|c| c.score.map(|s| format!("{}={:.2}", c.candidate_id, s)))
        .collect();
    if ranked.is_empty() {
        "无通过校验的候选".to_string()
    } else {
        ranked.join(" > ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_rejects_illegal_transition() {
        let mut machine = HealingStateMachine::new();
        let err = machine.transition(HealingState::Ranking).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));

        machine.transition(HealingState::Detecting).unwrap();
        machine.transition(HealingState::GeneratingCandidates).unwrap();
        machine.transition(HealingState::Validating).unwrap();
        machine.transition(HealingState::Ranking).unwrap();
        machine.transition(HealingState::Committed).unwrap();
        assert!(machine.state().is_terminal());
        assert!(machine.transition(HealingState::Idle).is_err());
    }
}
