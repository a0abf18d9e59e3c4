// ==========================================
// 机组排班自愈系统 - 不可行诊断
// ==========================================
// 方法: 删除过滤（deletion filter）求不可约冲突航班子集
//   逐个移除航班，移除后仍不可行则永久移除，否则保留
// 输出: 冲突航班 + 每个航班被剔除的 (飞行员, 约束类型)
// ==========================================

use crate::config::HealingPolicy;
use crate::engine::solver::model::{ConstraintKind, Elimination, RosterModel};
use crate::engine::solver::search::{BranchAndBound, SearchMode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::warn;

// ==========================================
// ConflictReport - 冲突报告
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub flight_ids: Vec<String>,
    pub constraint_kinds: BTreeSet<ConstraintKind>,
    pub eliminated: BTreeMap<String, Vec<Elimination>>,
    /// 诊断在时限内完成（否则冲突集可能不是最小的）
    pub irreducible: bool,
}

fn feasible(model: &RosterModel, policy: &HealingPolicy, active: &[bool], deadline: Instant) -> Option<bool> {
    let outcome = BranchAndBound::new(model, policy, active, SearchMode::FirstFeasible, deadline).run();
    if outcome.best.is_some() {
        Some(true)
    } else if outcome.timed_out {
        None
    } else {
        Some(false)
    }
}

/// 冲突集内同一飞行员两段候选执勤之间的冲突类型
fn pairwise_kinds(model: &RosterModel, policy: &HealingPolicy, members: &[usize]) -> BTreeSet<ConstraintKind> {
    let mut kinds = BTreeSet::new();
    for (i, &f) in members.iter().enumerate() {
        for &g in &members[i + 1..] {
            for a in &model.domains[f] {
                for b in model.domains[g].iter().filter(|b| b.pilot_idx == a.pilot_idx) {
                    let mut trial = model.pilots[a.pilot_idx].clone();
                    trial.insert_duty(a.duty.clone());
                    if let Err(kind) = model.fits(&trial, a.fatigue_load, b, policy) {
                        kinds.insert(kind);
                    }
                }
            }
        }
    }
    kinds
}

/// 计算不可约冲突集
pub fn diagnose(model: &RosterModel, policy: &HealingPolicy, deadline: Instant) -> ConflictReport {
    let mut active = vec![true; model.flights.len()];
    let mut irreducible = true;

    for f in 0..model.flights.len() {
        active[f] = false;
        match feasible(model, policy, &active, deadline) {
            Some(false) => {} // 仍不可行: 永久移除
            Some(true) => active[f] = true,
            None => {
                active[f] = true;
                irreducible = false;
                warn!(flight_index = f, "冲突诊断超时，返回非最小冲突集");
                break;
            }
        }
    }

    let members: Vec<usize> = (0..model.flights.len()).filter(|&f| active[f]).collect();
    let mut constraint_kinds = BTreeSet::from([ConstraintKind::Coverage]);
    let mut eliminated = BTreeMap::new();
    let mut flight_ids = Vec::new();
    for &f in &members {
        let flight = &model.flights[f];
        flight_ids.push(flight.flight_id.clone());
        constraint_kinds.extend(model.eliminated[f].iter().map(|e| e.constraint));
        eliminated.insert(flight.flight_id.clone(), model.eliminated[f].clone());
    }
    constraint_kinds.extend(pairwise_kinds(model, policy, &members));

    ConflictReport {
        flight_ids,
        constraint_kinds,
        eliminated,
        irreducible,
    }
}
