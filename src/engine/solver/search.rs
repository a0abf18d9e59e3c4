// ==========================================
// 机组排班自愈系统 - 分支定界搜索
// ==========================================
// 策略: 深度优先 + 前向检查，变量按最小剩余域(MRV)选择，值按成本升序
// 上界: 当前排班作为初始可行解（warm start），只接受严格更优的解
// 下界: 已指派成本 + 各未指派航班最小候选成本
// 时限: 到期立即停止，返回已有最好解并标记非最优
// ==========================================

use crate::config::HealingPolicy;
use crate::domain::pilot::Pilot;
use crate::engine::solver::model::RosterModel;
use std::time::Instant;

const EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Optimize,      // 分支定界求最优
    FirstFeasible, // 找到任一可行解即停止（冲突诊断用）
}

/// 搜索结果
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// 每个航班选中的候选下标（对应 model.domains[f]）
    pub best: Option<Vec<usize>>,
    pub best_cost: f64,
    pub baseline: Option<f64>,
    pub nodes: u64,
    pub timed_out: bool,
    pub exhausted: bool, // 搜索完整结束（非超时）
}

/// 搜索状态（回溯时整体还原）
struct State {
    choice: Vec<Option<usize>>,
    trials: Vec<Pilot>,
    loads: Vec<f64>,
    domains: Vec<Vec<usize>>,
    cost: f64,
}

pub struct BranchAndBound<'a> {
    model: &'a RosterModel,
    policy: &'a HealingPolicy,
    active: &'a [bool],
    mode: SearchMode,
    deadline: Instant,
    best: Option<Vec<usize>>,
    best_cost: f64,
    nodes: u64,
    timed_out: bool,
}

impl<'a> BranchAndBound<'a> {
    /// # 参数
    /// - `active`: 参与本次搜索的航班（冲突诊断时逐个移除）
    pub fn new(
        model: &'a RosterModel,
        policy: &'a HealingPolicy,
        active: &'a [bool],
        mode: SearchMode,
        deadline: Instant,
    ) -> Self {
        Self {
            model,
            policy,
            active,
            mode,
            deadline,
            best: None,
            best_cost: f64::INFINITY,
            nodes: 0,
            timed_out: false,
        }
    }

    /// 执行搜索
    pub fn run(mut self) -> SearchOutcome {
        let baseline = if self.mode == SearchMode::Optimize {
            self.warm_start()
        } else {
            None
        };

        let initial = State {
            choice: vec![None; self.model.flights.len()],
            trials: self.model.pilots.clone(),
            loads: vec![0.0; self.model.pilots.len()],
            domains: self
                .model
                .domains
                .iter()
                .map(|d| (0..d.len()).collect())
                .collect(),
            cost: 0.0,
        };

        let feasible_start = self
            .active
            .iter()
            .enumerate()
            .all(|(f, on)| !*on || !initial.domains[f].is_empty());
        if feasible_start {
            self.dfs(initial);
        }

        SearchOutcome {
            exhausted: !self.timed_out,
            best: self.best,
            best_cost: self.best_cost,
            baseline,
            nodes: self.nodes,
            timed_out: self.timed_out,
        }
    }

    fn done(&self) -> bool {
        self.timed_out || (self.mode == SearchMode::FirstFeasible && self.best.is_some())
    }

    /// 以当前排班作为初始可行解
    fn warm_start(&mut self) -> Option<f64> {
        let mut trials = self.model.pilots.clone();
        let mut loads = vec![0.0; self.model.pilots.len()];
        let mut choice = Vec::with_capacity(self.model.flights.len());
        let mut cost = 0.0;
        for (f, domain) in self.model.domains.iter().enumerate() {
            if !self.active[f] {
                choice.push(0);
                continue;
            }
            let idx = domain.iter().position(|p| p.is_current)?;
            let pair = &domain[idx];
            if self
                .model
                .fits(&trials[pair.pilot_idx], loads[pair.pilot_idx], pair, self.policy)
                .is_err()
            {
                return None;
            }
            trials[pair.pilot_idx].insert_duty(pair.duty.clone());
            loads[pair.pilot_idx] += pair.fatigue_load;
            cost += pair.cost;
            choice.push(idx);
        }
        self.best = Some(choice);
        self.best_cost = cost;
        Some(cost)
    }

    fn lower_bound(&self, state: &State) -> f64 {
        state.cost
            + state
                .domains
                .iter()
                .enumerate()
                .filter(|(f, _)| self.active[*f] && state.choice[*f].is_none())
                .map(|(f, d)| {
                    d.iter()
                        .map(|&i| self.model.domains[f][i].cost)
                        .fold(f64::INFINITY, f64::min)
                })
                .sum::<f64>()
    }

    /// 最小剩余域的未指派航班
    fn select_variable(&self, state: &State) -> Option<usize> {
        (0..self.model.flights.len())
            .filter(|&f| self.active[f] && state.choice[f].is_none())
            .min_by_key(|&f| (state.domains[f].len(), f))
    }

    fn dfs(&mut self, state: State) {
        if self.done() {
            return;
        }
        self.nodes += 1;
        if Instant::now() >= self.deadline {
            self.timed_out = true;
            return;
        }

        let Some(flight) = self.select_variable(&state) else {
            // 全部指派完成
            if state.cost + EPS < self.best_cost {
                self.best_cost = state.cost;
                self.best = Some(state.choice.iter().map(|c| c.unwrap_or(0)).collect());
            }
            return;
        };

        if self.mode == SearchMode::Optimize && self.lower_bound(&state) + EPS >= self.best_cost {
            return;
        }

        for &pair_idx in &state.domains[flight] {
            if self.done() {
                return;
            }
            let pair = &self.model.domains[flight][pair_idx];
            let p = pair.pilot_idx;
            if self
                .model
                .fits(&state.trials[p], state.loads[p], pair, self.policy)
                .is_err()
            {
                continue;
            }

            let mut next = State {
                choice: state.choice.clone(),
                trials: state.trials.clone(),
                loads: state.loads.clone(),
                domains: state.domains.clone(),
                cost: state.cost + pair.cost,
            };
            next.choice[flight] = Some(pair_idx);
            next.trials[p].insert_duty(pair.duty.clone());
            next.loads[p] += pair.fatigue_load;

            // 前向检查: 仅同一飞行员的候选受影响
            let mut wiped_out = false;
            for g in 0..self.model.flights.len() {
                if !self.active[g] || next.choice[g].is_some() {
                    continue;
                }
                let model = self.model;
                let policy = self.policy;
                let trial = &next.trials[p];
                let load = next.loads[p];
                next.domains[g].retain(|&i| {
                    let other = &model.domains[g][i];
                    other.pilot_idx != p || model.fits(trial, load, other, policy).is_ok()
                });
                if next.domains[g].is_empty() {
                    wiped_out = true;
                    break;
                }
            }
            if wiped_out {
                continue;
            }

            self.dfs(next);
        }
    }
}
