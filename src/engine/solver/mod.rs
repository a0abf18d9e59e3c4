// ==========================================
// 机组排班自愈系统 - 约束求解器
// ==========================================
// 用途1: 规划窗口内的整体排班重优化
// 用途2: 启发式无可行候选时的局部子问题兜底
// 红线: 求解只读快照，结果以差异形式返回，提交需经校验与执行器
// ==========================================

pub mod diagnosis;
pub mod model;
pub mod search;

pub use diagnosis::ConflictReport;
pub use model::{ConstraintKind, FlightSlot, RosterModel};

use crate::config::HealingPolicy;
use crate::domain::candidate::{AssignmentDiff, FlightChange, PilotChange};
use crate::domain::roster::RosterSnapshot;
use crate::domain::types::FlightStatus;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::estimator::CostFatigueEstimator;
use chrono::{Duration, NaiveDateTime};
use search::{BranchAndBound, SearchMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};
use tracing::{info, warn};

// ==========================================
// SolverSolution - 求解结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverSolution {
    pub assignments: BTreeMap<String, String>, // flight_id -> pilot_id
    pub reassignments: usize,
    pub objective: f64,
    pub baseline: Option<f64>, // 当前排班的目标值（不可行时为空）
    pub optimal: bool,         // 搜索完整结束
    pub nodes: u64,
    pub elapsed_ms: u64,
    pub diff: AssignmentDiff,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolveOutcome {
    Solved(SolverSolution),
    Infeasible(ConflictReport),
}

impl SolveOutcome {
    pub fn solution(&self) -> Option<&SolverSolution> {
        match self {
            SolveOutcome::Solved(solution) => Some(solution),
            SolveOutcome::Infeasible(_) => None,
        }
    }
}

// ==========================================
// ConstraintSolver - 约束求解器
// ==========================================
pub struct ConstraintSolver {
    estimator: Arc<dyn CostFatigueEstimator>,
}

impl ConstraintSolver {
    pub fn new(estimator: Arc<dyn CostFatigueEstimator>) -> Self {
        Self { estimator }
    }

    /// 规划窗口内整体重优化
    ///
    /// # 参数
    /// - `horizon_start`: 窗口起点，窗口长度取 policy.solver_horizon_hours
    pub fn reoptimize(
        &self,
        snapshot: &RosterSnapshot,
        horizon_start: NaiveDateTime,
        policy: &HealingPolicy,
    ) -> EngineResult<SolveOutcome> {
        let horizon_end = horizon_start + Duration::hours(policy.solver_horizon_hours);
        let slots: Vec<FlightSlot> = snapshot
            .flights_in_window(horizon_start, horizon_end)
            .into_iter()
            .map(|f| FlightSlot::on_time(&f.flight_id))
            .collect();
        info!(
            horizon_start = %horizon_start,
            horizon_end = %horizon_end,
            flights = slots.len(),
            "开始整体重优化"
        );
        self.solve(snapshot, &slots, policy)
    }

    /// 求解给定航班槽位
    pub fn solve(
        &self,
        snapshot: &RosterSnapshot,
        slots: &[FlightSlot],
        policy: &HealingPolicy,
    ) -> EngineResult<SolveOutcome> {
        let started = Instant::now();
        let deadline = started + StdDuration::from_millis(policy.solver_time_budget_ms);
        let model = RosterModel::build(snapshot, slots, policy, self.estimator.as_ref())?;
        let active = vec![true; model.flight_count()];

        let outcome = BranchAndBound::new(&model, policy, &active, SearchMode::Optimize, deadline).run();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome.best {
            Some(choice) => {
                let solution = self.to_solution(snapshot, &model, &choice, policy);
                let solution = SolverSolution {
                    objective: round2(outcome.best_cost),
                    baseline: outcome.baseline.map(round2),
                    optimal: outcome.exhausted,
                    nodes: outcome.nodes,
                    elapsed_ms,
                    ..solution
                };
                info!(
                    variables = model.variable_count(),
                    nodes = solution.nodes,
                    objective = solution.objective,
                    reassignments = solution.reassignments,
                    optimal = solution.optimal,
                    "求解完成"
                );
                Ok(SolveOutcome::Solved(solution))
            }
            None if outcome.timed_out => {
                warn!(elapsed_ms, nodes = outcome.nodes, "求解超时且无可行解");
                Err(EngineError::SolverTimeout { elapsed_ms })
            }
            None => {
                let report = diagnosis::diagnose(&model, policy, deadline);
                warn!(
                    conflict = ?report.flight_ids,
                    kinds = ?report.constraint_kinds,
                    "模型不可行"
                );
                Ok(SolveOutcome::Infeasible(report))
            }
        }
    }

    /// 选择结果 -> 指派与差异
    fn to_solution(
        &self,
        snapshot: &RosterSnapshot,
        model: &RosterModel,
        choice: &[usize],
        policy: &HealingPolicy,
    ) -> SolverSolution {
        let mut assignments = BTreeMap::new();
        let mut diff = AssignmentDiff::default();
        let mut reassignments = 0;

        for (f, &idx) in choice.iter().enumerate() {
            let Some(pair) = model.domains[f].get(idx) else {
                continue;
            };
            let slot = &model.flights[f];
            let pilot_id = model.pilots[pair.pilot_idx].pilot_id.clone();
            assignments.insert(slot.flight_id.clone(), pilot_id.clone());

            if pair.is_current && slot.delay_minutes == 0 {
                continue;
            }
            if !pair.is_current {
                reassignments += 1;
            }
            let Some(flight) = snapshot.flight(&slot.flight_id) else {
                continue;
            };
            let (dep, arr) = flight.shifted_times(slot.delay_minutes);
            diff.flight_changes.push(FlightChange {
                flight_id: slot.flight_id.clone(),
                expected_pilot_id: slot.current_pilot.clone(),
                new_pilot_id: Some(pilot_id.clone()),
                new_departure: dep,
                new_arrival: arr,
                new_status: if slot.delay_minutes > 0 {
                    FlightStatus::Delayed
                } else if flight.status == FlightStatus::Disrupted {
                    FlightStatus::Resolved
                } else {
                    flight.status
                },
                added_delay_minutes: slot.delay_minutes,
                new_duty: Some(pair.duty.clone()),
            });
            if pair.added_minutes > 0 {
                diff.merge(&AssignmentDiff {
                    flight_changes: Vec::new(),
                    pilot_changes: vec![PilotChange {
                        pilot_id,
                        fatigue_delta: policy.fatigue_for_duty(pair.added_minutes, pair.night),
                        weekly_minutes_delta: pair.added_minutes,
                        new_status: None,
                        rest_available_from: None,
                    }],
                });
            }
        }

        SolverSolution {
            assignments,
            reassignments,
            objective: 0.0,
            baseline: None,
            optimal: false,
            nodes: 0,
            elapsed_ms: 0,
            diff,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
