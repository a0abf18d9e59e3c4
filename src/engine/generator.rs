// ==========================================
// 机组排班自愈系统 - 修复候选生成引擎
// ==========================================
// 职责: 针对单个关键航班枚举修复候选（备份/互换/推迟/取消）
// 红线: 只读快照 -> 差异，绝不修改共享排班
// 红线: 候选ID确定性生成，同一快照重复计算结果一致
// ==========================================
// 顺序: 各类内部 备份(疲劳升序, ID) / 互换(疲劳升序, ID) / 推迟；
//       按类轮流取，至多 K 个，取消始终追加在最后
// ==========================================

use crate::config::HealingPolicy;
use crate::domain::candidate::{
    AssignmentDiff, Candidate, CandidateDraft, DutyGain, FlightChange, PilotChange,
};
use crate::domain::flight::Flight;
use crate::domain::pilot::{DutyInterval, Pilot};
use crate::domain::roster::RosterSnapshot;
use crate::domain::types::{CandidateAction, CandidateSource, FlightStatus, PilotStatus};
use crate::engine::classifier::CriticalFlight;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::estimator::CostFatigueEstimator;
use crate::engine::projection::{check_insertion, flight_duty};
use chrono::Duration;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

// ==========================================
// GenerationContext - 生成上下文
// ==========================================
#[derive(Debug, Clone, Copy)]
pub struct GenerationContext<'a> {
    pub disruption_id: &'a str,
    /// 本周期不可用的机组（病假等）
    pub excluded_pilots: &'a BTreeSet<String>,
    /// 不可作为互换对象的航班（本周期的关键航班）
    pub protected_flights: &'a BTreeSet<String>,
}

/// 向上取整到步长
pub fn round_up_to_step(minutes: i64, step: i64) -> i64 {
    if minutes <= 0 || step <= 0 {
        return minutes.max(0);
    }
    ((minutes + step - 1) / step) * step
}

/// 各组轮流取一个，至多 limit 个（组内顺序保持）
pub fn interleave<T>(groups: Vec<Vec<T>>, limit: usize) -> Vec<T> {
    let mut iters: Vec<std::vec::IntoIter<T>> = groups.into_iter().map(Vec::into_iter).collect();
    let mut out = Vec::new();
    while out.len() < limit {
        let mut progressed = false;
        for it in iters.iter_mut() {
            if out.len() >= limit {
                break;
            }
            if let Some(item) = it.next() {
                out.push(item);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    out
}

fn by_fatigue_then_id(a: &Pilot, b: &Pilot) -> Ordering {
    a.fatigue_score
        .partial_cmp(&b.fatigue_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.pilot_id.cmp(&b.pilot_id))
}

// ==========================================
// CandidateGenerator - 候选生成引擎
// ==========================================
pub struct CandidateGenerator {
    estimator: Arc<dyn CostFatigueEstimator>,
}

impl CandidateGenerator {
    pub fn new(estimator: Arc<dyn CostFatigueEstimator>) -> Self {
        Self { estimator }
    }

    /// 草稿 -> 候选（调用估算器）
    pub fn assemble(
        &self,
        candidate_id: String,
        draft: CandidateDraft,
        snapshot: &RosterSnapshot,
        policy: &HealingPolicy,
    ) -> Candidate {
        let estimate = self.estimator.estimate(&draft, snapshot, policy);
        Candidate::from_draft(candidate_id, draft, estimate)
    }

    /// 生成关键航班的候选列表
    pub fn generate(
        &self,
        ctx: GenerationContext<'_>,
        critical: &CriticalFlight,
        snapshot: &RosterSnapshot,
        policy: &HealingPolicy,
    ) -> EngineResult<Vec<Candidate>> {
        let flight = snapshot
            .flight(&critical.flight_id)
            .ok_or_else(|| EngineError::NotFound {
                entity: "Flight".to_string(),
                id: critical.flight_id.clone(),
            })?;

        // 按类轮流取，备份数量多时互换/推迟仍能进入排序
        let mut drafts = interleave(
            vec![
                self.reserve_drafts(ctx, flight, critical, snapshot, policy),
                self.swap_drafts(ctx, flight, critical, snapshot, policy),
                self.delay_draft(ctx, flight, critical, snapshot, policy)
                    .into_iter()
                    .collect(),
            ],
            policy.max_candidates_per_flight,
        );
        drafts.push(self.cancel_draft(ctx, flight));

        let candidates: Vec<Candidate> = drafts
            .into_iter()
            .map(|(id, draft)| self.assemble(id, draft, snapshot, policy))
            .collect();

        debug!(
            flight_id = %flight.flight_id,
            count = candidates.len(),
            "候选生成完成"
        );
        Ok(candidates)
    }

    /// 替换机组时航班的新时刻与新执勤（新机组按延误后时刻签到）
    fn replacement_change(
        &self,
        flight: &Flight,
        delay: i64,
        new_pilot: &str,
        policy: &HealingPolicy,
    ) -> FlightChange {
        let (dep, arr) = flight.shifted_times(delay);
        FlightChange {
            flight_id: flight.flight_id.clone(),
            expected_pilot_id: flight.assigned_pilot_id.clone(),
            new_pilot_id: Some(new_pilot.to_string()),
            new_departure: dep,
            new_arrival: arr,
            new_status: if delay > 0 {
                FlightStatus::Delayed
            } else {
                FlightStatus::Resolved
            },
            added_delay_minutes: delay,
            new_duty: Some(flight.delayed_duty_interval(
                delay,
                policy.sign_on_minutes,
                policy.sign_off_minutes,
            )),
        }
    }

    fn gain(pilot_id: &str, duty: &DutyInterval, minutes: i64, policy: &HealingPolicy) -> DutyGain {
        DutyGain {
            pilot_id: pilot_id.to_string(),
            minutes,
            night: duty.is_night(policy.night_start_hour, policy.night_end_hour),
        }
    }

    // ==========================================
    // AssignReserve
    // ==========================================
    fn reserve_drafts(
        &self,
        ctx: GenerationContext<'_>,
        flight: &Flight,
        critical: &CriticalFlight,
        snapshot: &RosterSnapshot,
        policy: &HealingPolicy,
    ) -> Vec<(String, CandidateDraft)> {
        let delay = critical.predicted_delay_minutes;
        let duty = flight.delayed_duty_interval(delay, policy.sign_on_minutes, policy.sign_off_minutes);

        let mut reserves: Vec<&Pilot> = snapshot
            .reserve_pilots()
            .into_iter()
            .filter(|r| !flight.is_assigned_to(&r.pilot_id))
            .filter(|r| !ctx.excluded_pilots.contains(&r.pilot_id))
            .filter(|r| r.status.can_take_duty())
            .filter(|r| r.is_qualified(&flight.required_qualification))
            .filter(|r| !policy.reserve_base_match || r.base == flight.origin)
            .filter(|r| match check_insertion(r, &duty, policy) {
                None => true,
                Some((reason, detail)) => {
                    debug!(pilot_id = %r.pilot_id, reason = reason.code(), detail = %detail, "备份机组预筛未通过");
                    false
                }
            })
            .collect();
        reserves.sort_by(|a, b| by_fatigue_then_id(a, b));

        reserves
            .into_iter()
            .map(|reserve| {
                let change = self.replacement_change(flight, delay, &reserve.pilot_id, policy);
                let diff = AssignmentDiff {
                    flight_changes: vec![change],
                    pilot_changes: vec![PilotChange::status_only(&reserve.pilot_id, PilotStatus::OnDuty)],
                };
                let id = format!(
                    "{}:{}:{}:{}",
                    ctx.disruption_id,
                    flight.flight_id,
                    CandidateAction::AssignReserve.as_str(),
                    reserve.pilot_id
                );
                let draft = CandidateDraft {
                    flight_id: flight.flight_id.clone(),
                    action: CandidateAction::AssignReserve,
                    source: CandidateSource::Heuristic,
                    diff,
                    delay_minutes: delay,
                    gains: vec![Self::gain(&reserve.pilot_id, &duty, duty.duration_minutes(), policy)],
                    rationale: format!(
                        "指派备份机组 {}（基地 {}，疲劳 {:.1}）",
                        reserve.pilot_id, reserve.base, reserve.fatigue_score
                    ),
                };
                (id, draft)
            })
            .collect()
    }

    // ==========================================
    // Swap
    // ==========================================
    fn swap_drafts(
        &self,
        ctx: GenerationContext<'_>,
        flight: &Flight,
        critical: &CriticalFlight,
        snapshot: &RosterSnapshot,
        policy: &HealingPolicy,
    ) -> Vec<(String, CandidateDraft)> {
        let Some(current) = flight.assigned_pilot_id.as_deref().and_then(|id| snapshot.pilot(id)) else {
            return Vec::new();
        };
        if ctx.excluded_pilots.contains(&current.pilot_id) || !current.status.can_take_duty() {
            return Vec::new();
        }

        let delay = critical.predicted_delay_minutes;
        let new_duty = flight.delayed_duty_interval(delay, policy.sign_on_minutes, policy.sign_off_minutes);

        let mut options: Vec<(&Pilot, &Flight)> = Vec::new();
        for other in snapshot.flights.values() {
            if other.flight_id == flight.flight_id
                || !other.status.is_operating()
                || ctx.protected_flights.contains(&other.flight_id)
            {
                continue;
            }
            let Some(partner) = other.assigned_pilot_id.as_deref().and_then(|id| snapshot.pilot(id)) else {
                continue;
            };
            if partner.pilot_id == current.pilot_id
                || ctx.excluded_pilots.contains(&partner.pilot_id)
                || !partner.status.can_take_duty()
                || !partner.is_qualified(&flight.required_qualification)
                || !current.is_qualified(&other.required_qualification)
            {
                continue;
            }

            // 预筛: 互换后双方执勤均可落位
            let other_duty = partner
                .duty_for_flight(&other.flight_id)
                .cloned()
                .unwrap_or_else(|| flight_duty(other, policy));
            let mut current_trial = current.clone();
            current_trial.remove_flight_duty(&flight.flight_id);
            let mut partner_trial = partner.clone();
            partner_trial.remove_flight_duty(&other.flight_id);
            if check_insertion(&current_trial, &other_duty, policy).is_some()
                || check_insertion(&partner_trial, &new_duty, policy).is_some()
            {
                continue;
            }
            options.push((partner, other));
        }
        options.sort_by(|(pa, fa), (pb, fb)| {
            by_fatigue_then_id(pa, pb).then_with(|| fa.flight_id.cmp(&fb.flight_id))
        });

        options
            .into_iter()
            .map(|(partner, other)| {
                let other_duty = partner
                    .duty_for_flight(&other.flight_id)
                    .cloned()
                    .unwrap_or_else(|| flight_duty(other, policy));
                let forward = self.replacement_change(flight, delay, &partner.pilot_id, policy);
                let backward = FlightChange {
                    flight_id: other.flight_id.clone(),
                    expected_pilot_id: Some(partner.pilot_id.clone()),
                    new_pilot_id: Some(current.pilot_id.clone()),
                    new_departure: other.scheduled_departure,
                    new_arrival: other.scheduled_arrival,
                    new_status: other.status,
                    added_delay_minutes: 0,
                    new_duty: Some(other_duty.clone()),
                };
                let id = format!(
                    "{}:{}:{}:{}:{}",
                    ctx.disruption_id,
                    flight.flight_id,
                    CandidateAction::Swap.as_str(),
                    partner.pilot_id,
                    other.flight_id
                );
                let draft = CandidateDraft {
                    flight_id: flight.flight_id.clone(),
                    action: CandidateAction::Swap,
                    source: CandidateSource::Heuristic,
                    diff: AssignmentDiff {
                        flight_changes: vec![forward, backward],
                        pilot_changes: Vec::new(),
                    },
                    delay_minutes: delay,
                    gains: vec![
                        Self::gain(&partner.pilot_id, &new_duty, new_duty.duration_minutes(), policy),
                        Self::gain(&current.pilot_id, &other_duty, other_duty.duration_minutes(), policy),
                    ],
                    rationale: format!(
                        "机组互换: {} 接飞 {}，{} 改飞 {}",
                        partner.pilot_id, flight.flight_id, current.pilot_id, other.flight_id
                    ),
                };
                (id, draft)
            })
            .collect()
    }

    // ==========================================
    // Delay
    // ==========================================
    fn delay_draft(
        &self,
        ctx: GenerationContext<'_>,
        flight: &Flight,
        critical: &CriticalFlight,
        snapshot: &RosterSnapshot,
        policy: &HealingPolicy,
    ) -> Option<(String, CandidateDraft)> {
        let pilot = flight.assigned_pilot_id.as_deref().and_then(|id| snapshot.pilot(id))?;
        if ctx.excluded_pilots.contains(&pilot.pilot_id) || !pilot.status.can_take_duty() {
            return None;
        }

        // 休息缺口: 可执勤时刻 / 前序执勤 + 最小休息
        let base_duty = pilot
            .duty_for_flight(&flight.flight_id)
            .cloned()
            .unwrap_or_else(|| flight_duty(flight, policy));
        let mut ready_at = pilot.rest_available_from;
        if let Some(prev) = pilot
            .sorted_duties()
            .iter()
            .filter(|d| d.start < base_duty.start && !d.is_for_flight(&flight.flight_id))
            .last()
        {
            ready_at = ready_at.max(prev.end + Duration::minutes(policy.min_rest_minutes));
        }
        let shortfall = (ready_at - base_duty.start).num_minutes().max(0);

        let delta = round_up_to_step(
            critical.predicted_delay_minutes.max(shortfall),
            policy.delay_step_minutes,
        );
        if delta == 0 || delta > policy.max_delay_minutes {
            debug!(flight_id = %flight.flight_id, delta, "推迟方案超出上限或无需推迟");
            return None;
        }

        // 缺口由休息不足造成: 整体后移签到；否则原机组已签到，只顺延签退
        let (new_duty, gained_minutes) = if shortfall > critical.predicted_delay_minutes {
            (
                flight.delayed_duty_interval(delta, policy.sign_on_minutes, policy.sign_off_minutes),
                0,
            )
        } else {
            (
                flight.extended_duty_interval(delta, policy.sign_on_minutes, policy.sign_off_minutes),
                delta,
            )
        };
        let (dep, arr) = flight.shifted_times(delta);
        let mut flight_changes = vec![FlightChange {
            flight_id: flight.flight_id.clone(),
            expected_pilot_id: Some(pilot.pilot_id.clone()),
            new_pilot_id: Some(pilot.pilot_id.clone()),
            new_departure: dep,
            new_arrival: arr,
            new_status: FlightStatus::Delayed,
            added_delay_minutes: delta,
            new_duty: Some(new_duty.clone()),
        }];

        // 后续执勤休息不足时整体顺延
        let mut carry_end = new_duty.end;
        for next in snapshot.flights_of_pilot(&pilot.pilot_id) {
            if next.scheduled_departure <= flight.scheduled_departure || next.flight_id == flight.flight_id {
                continue;
            }
            let next_duty = flight_duty(next, policy);
            let need = (carry_end + Duration::minutes(policy.min_rest_minutes) - next_duty.start).num_minutes();
            if need <= 0 {
                break;
            }
            let shift = round_up_to_step(need, policy.delay_step_minutes);
            if shift > policy.max_delay_minutes {
                debug!(flight_id = %next.flight_id, shift, "级联顺延超出上限，放弃推迟方案");
                return None;
            }
            let (ndep, narr) = next.shifted_times(shift);
            let shifted = next.delayed_duty_interval(shift, policy.sign_on_minutes, policy.sign_off_minutes);
            carry_end = shifted.end;
            flight_changes.push(FlightChange {
                flight_id: next.flight_id.clone(),
                expected_pilot_id: Some(pilot.pilot_id.clone()),
                new_pilot_id: Some(pilot.pilot_id.clone()),
                new_departure: ndep,
                new_arrival: narr,
                new_status: FlightStatus::Delayed,
                added_delay_minutes: shift,
                new_duty: Some(shifted),
            });
        }

        let cascaded = flight_changes.len() - 1;
        let id = format!(
            "{}:{}:{}:{}",
            ctx.disruption_id,
            flight.flight_id,
            CandidateAction::Delay.as_str(),
            delta
        );
        let total_delay: i64 = flight_changes.iter().map(|c| c.added_delay_minutes).sum();
        let draft = CandidateDraft {
            flight_id: flight.flight_id.clone(),
            action: CandidateAction::Delay,
            source: CandidateSource::Heuristic,
            diff: AssignmentDiff {
                flight_changes,
                pilot_changes: Vec::new(),
            },
            delay_minutes: total_delay,
            gains: vec![Self::gain(&pilot.pilot_id, &new_duty, gained_minutes, policy)],
            rationale: format!(
                "推迟 {} 分钟，原机组 {} 执飞（级联顺延 {} 个航班）",
                delta, pilot.pilot_id, cascaded
            ),
        };
        Some((id, draft))
    }

    // ==========================================
    // Cancel
    // ==========================================
    fn cancel_draft(&self, ctx: GenerationContext<'_>, flight: &Flight) -> (String, CandidateDraft) {
        let id = format!(
            "{}:{}:{}",
            ctx.disruption_id,
            flight.flight_id,
            CandidateAction::Cancel.as_str()
        );
        let draft = CandidateDraft {
            flight_id: flight.flight_id.clone(),
            action: CandidateAction::Cancel,
            source: CandidateSource::Heuristic,
            diff: AssignmentDiff {
                flight_changes: vec![FlightChange {
                    flight_id: flight.flight_id.clone(),
                    expected_pilot_id: flight.assigned_pilot_id.clone(),
                    new_pilot_id: None,
                    new_departure: flight.scheduled_departure,
                    new_arrival: flight.scheduled_arrival,
                    new_status: FlightStatus::Cancelled,
                    added_delay_minutes: 0,
                    new_duty: None,
                }],
                pilot_changes: Vec::new(),
            },
            delay_minutes: 0,
            gains: Vec::new(),
            rationale: "取消航班（最后手段）".to_string(),
        };
        (id, draft)
    }
}
