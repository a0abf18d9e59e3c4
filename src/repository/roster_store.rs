// ==========================================
// 机组排班自愈系统 - 排班存储
// ==========================================
// 职责: 持有唯一的排班聚合，提供快照读取与事务性提交
// 红线: Repository 不含业务逻辑（候选生成/校验均在引擎层）
// 红线: 提交全有或全无，失败时原状态保持不变
// ==========================================
// 并发控制:
// - 读方拿到 Arc<RosterSnapshot>，之后的提交不影响已持有的快照
// - 提交按升序键逐个获取实体锁（"flight:{id}" / "pilot:{id}"），避免死锁
// - 版本号乐观校验: 快照版本落后于当前版本 -> StaleSnapshot
// - 扰动登记不推进版本号（版本号只反映指派变化）
// - 修复提交与扰动关闭在同一把写锁内完成，已关闭的扰动不会被重复修复
// ==========================================

use crate::domain::candidate::AssignmentDiff;
use crate::domain::disruption::Disruption;
use crate::domain::roster::{InvariantLimits, RosterSnapshot};
use crate::domain::trace::ReasoningTrace;
use crate::domain::types::DisruptionStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

// ==========================================
// RosterStore Trait
// ==========================================
// 实现者: InMemoryRosterStore（持久化由外部协作方负责）
pub trait RosterStore: Send + Sync {
    /// 读取当前快照
    fn read_snapshot(&self) -> RepositoryResult<Arc<RosterSnapshot>>;

    /// 当前版本号
    fn current_version(&self) -> RepositoryResult<u64>;

    /// 事务性提交差异
    ///
    /// # 返回
    /// - Ok(new_version): 提交成功后的版本号
    /// - Err(StaleSnapshot): snapshot_version 已过期，状态未改变
    /// - Err(InvariantViolation): 投影状态违反不变量，状态未改变
    fn commit(&self, diff: &AssignmentDiff, snapshot_version: u64) -> RepositoryResult<u64>;

    /// 事务性提交差异并把扰动标记为 Resolved
    ///
    /// # 返回
    /// - Err(DisruptionClosed): 扰动已被其他周期关闭，排班未改变
    /// - 其余同 commit
    fn commit_resolving(
        &self,
        diff: &AssignmentDiff,
        snapshot_version: u64,
        disruption_id: &str,
    ) -> RepositoryResult<u64>;

    /// 登记新扰动（状态 Open）
    fn record_disruption(&self, disruption: Disruption) -> RepositoryResult<()>;

    /// 查询扰动
    fn get_disruption(&self, disruption_id: &str) -> RepositoryResult<Disruption>;

    /// 关闭扰动（Resolved / Escalated）
    fn close_disruption(&self, disruption_id: &str, status: DisruptionStatus) -> RepositoryResult<()>;

    /// 归档已封存的推理轨迹
    fn record_trace(&self, trace: ReasoningTrace) -> RepositoryResult<()>;

    /// 按扰动查询推理轨迹（按封存顺序）
    fn traces_for(&self, disruption_id: &str) -> RepositoryResult<Vec<ReasoningTrace>>;
}

// ==========================================
// InMemoryRosterStore - 内存排班存储
// ==========================================
pub struct InMemoryRosterStore {
    state: RwLock<Arc<RosterSnapshot>>,
    entity_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    traces: Mutex<BTreeMap<String, Vec<ReasoningTrace>>>,
    limits: InvariantLimits,
}

impl InMemoryRosterStore {
    /// 创建存储
    ///
    /// # 参数
    /// - `snapshot`: 初始排班（其 version 作为起始版本）
    /// - `limits`: 提交时复核的不变量阈值
    pub fn new(snapshot: RosterSnapshot, limits: InvariantLimits) -> Self {
        Self {
            state: RwLock::new(Arc::new(snapshot)),
            entity_locks: Mutex::new(HashMap::new()),
            traces: Mutex::new(BTreeMap::new()),
            limits,
        }
    }

    fn current(&self) -> RepositoryResult<Arc<RosterSnapshot>> {
        self.state
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 按键取得实体锁句柄（不存在则创建）
    fn lock_handles(&self, keys: impl Iterator<Item = String>) -> RepositoryResult<Vec<Arc<Mutex<()>>>> {
        let mut registry = self
            .entity_locks
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        Ok(keys
            .map(|k| Arc::clone(registry.entry(k).or_insert_with(|| Arc::new(Mutex::new(())))))
            .collect())
    }

    /// 提交差异（resolving 非空时同一写锁内关闭扰动）
    fn commit_inner(
        &self,
        diff: &AssignmentDiff,
        snapshot_version: u64,
        resolving: Option<&str>,
    ) -> RepositoryResult<u64> {
        // 步骤1: 按升序获取实体锁（BTreeSet 已排序）
        let mut keys = diff.entity_keys();
        if let Some(id) = resolving {
            keys.insert(format!("disruption:{}", id));
        }
        let handles = self.lock_handles(keys.iter().cloned())?;
        let _guards: Vec<MutexGuard<'_, ()>> = handles
            .iter()
            .map(|h| h.lock().map_err(|e| RepositoryError::LockError(e.to_string())))
            .collect::<RepositoryResult<_>>()?;

        // 步骤2: 乐观版本校验
        let base = self.current()?;
        if base.version != snapshot_version {
            tracing::warn!(
                expected = snapshot_version,
                actual = base.version,
                "提交被拒绝: 快照已过期"
            );
            return Err(RepositoryError::StaleSnapshot {
                expected: snapshot_version,
                actual: base.version,
            });
        }

        // 步骤3: 在副本上应用并复核不变量
        let mut next = base.project(diff, &self.limits)?;
        next.version = base.version + 1;
        next.as_of = Utc::now().naive_utc();

        // 步骤4: 原子替换（二次确认版本未被其他不相交提交推进）
        let mut guard = self
            .state
            .write()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        if guard.version != base.version {
            return Err(RepositoryError::StaleSnapshot {
                expected: snapshot_version,
                actual: guard.version,
            });
        }
        // 扰动表可能在步骤2之后被更新，以最新为准
        next.disruptions = guard.disruptions.clone();
        if let Some(id) = resolving {
            let disruption = next
                .disruptions
                .get_mut(id)
                .ok_or_else(|| RepositoryError::NotFound {
                    entity: "Disruption".to_string(),
                    id: id.to_string(),
                })?;
            if disruption.status != DisruptionStatus::Open {
                tracing::warn!(disruption_id = id, status = %disruption.status, "提交被拒绝: 扰动已关闭");
                return Err(RepositoryError::DisruptionClosed {
                    id: id.to_string(),
                    status: disruption.status.to_string(),
                });
            }
            disruption.status = DisruptionStatus::Resolved;
        }
        let new_version = next.version;
        *guard = Arc::new(next);

        tracing::info!(
            new_version,
            flight_changes = diff.flight_changes.len(),
            pilot_changes = diff.pilot_changes.len(),
            locked_entities = keys.len(),
            resolving = resolving.unwrap_or("-"),
            "排班提交完成"
        );
        Ok(new_version)
    }

    /// 原地修改扰动表（不推进版本号）
    fn update_disruptions<F>(&self, mutate: F) -> RepositoryResult<()>
    where
        F: FnOnce(&mut BTreeMap<String, Disruption>) -> RepositoryResult<()>,
    {
        let mut guard = self
            .state
            .write()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let mut next = RosterSnapshot::clone(&guard);
        mutate(&mut next.disruptions)?;
        *guard = Arc::new(next);
        Ok(())
    }
}

impl RosterStore for InMemoryRosterStore {
    fn read_snapshot(&self) -> RepositoryResult<Arc<RosterSnapshot>> {
        self.current()
    }

    fn current_version(&self) -> RepositoryResult<u64> {
        Ok(self.current()?.version)
    }

    fn commit(&self, diff: &AssignmentDiff, snapshot_version: u64) -> RepositoryResult<u64> {
        self.commit_inner(diff, snapshot_version, None)
    }

    fn commit_resolving(
        &self,
        diff: &AssignmentDiff,
        snapshot_version: u64,
        disruption_id: &str,
    ) -> RepositoryResult<u64> {
        self.commit_inner(diff, snapshot_version, Some(disruption_id))
    }

    fn record_disruption(&self, disruption: Disruption) -> RepositoryResult<()> {
        self.update_disruptions(|map| {
            if map.contains_key(&disruption.disruption_id) {
                return Err(RepositoryError::AlreadyExists {
                    entity: "Disruption".to_string(),
                    id: disruption.disruption_id.clone(),
                });
            }
            map.insert(disruption.disruption_id.clone(), disruption);
            Ok(())
        })
    }

    fn get_disruption(&self, disruption_id: &str) -> RepositoryResult<Disruption> {
        self.current()?
            .disruptions
            .get(disruption_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "Disruption".to_string(),
                id: disruption_id.to_string(),
            })
    }

    fn close_disruption(&self, disruption_id: &str, status: DisruptionStatus) -> RepositoryResult<()> {
        self.update_disruptions(|map| {
            let disruption = map
                .get_mut(disruption_id)
                .ok_or_else(|| RepositoryError::NotFound {
                    entity: "Disruption".to_string(),
                    id: disruption_id.to_string(),
                })?;
            if disruption.status != DisruptionStatus::Open {
                return Err(RepositoryError::DisruptionClosed {
                    id: disruption_id.to_string(),
                    status: disruption.status.to_string(),
                });
            }
            if status == DisruptionStatus::Open {
                return Err(RepositoryError::InvalidStateTransition {
                    from: disruption.status.to_string(),
                    to: status.to_string(),
                });
            }
            disruption.status = status;
            Ok(())
        })
    }

    fn record_trace(&self, trace: ReasoningTrace) -> RepositoryResult<()> {
        let mut traces = self
            .traces
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        traces
            .entry(trace.disruption_id.clone())
            .or_default()
            .push(trace);
        Ok(())
    }

    fn traces_for(&self, disruption_id: &str) -> RepositoryResult<Vec<ReasoningTrace>> {
        let traces = self
            .traces
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        Ok(traces.get(disruption_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candidate::PilotChange;
    use crate::domain::pilot::Pilot;
    use crate::domain::types::{DisruptionType, PilotStatus, Severity};
    use chrono::{NaiveDate, NaiveDateTime};
    use std::collections::BTreeSet;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn limits() -> InvariantLimits {
        InvariantLimits {
            min_rest_minutes: 600,
            max_duty_minutes: 480,
            fatigue_cap: 80.0,
        }
    }

    fn store() -> InMemoryRosterStore {
        let pilot = Pilot {
            pilot_id: "P1".to_string(),
            name: "Test".to_string(),
            base: "DEL".to_string(),
            qualifications: BTreeSet::from(["A320".to_string()]),
            fatigue_score: 20.0,
            duty_history: Vec::new(),
            rest_available_from: at(1, 0),
            status: PilotStatus::Available,
            weekly_duty_minutes: 0,
        };
        InMemoryRosterStore::new(RosterSnapshot::new(at(10, 6), Vec::new(), vec![pilot]), limits())
    }

    fn disruption(id: &str) -> Disruption {
        Disruption {
            disruption_id: id.to_string(),
            disruption_type: DisruptionType::Weather,
            affected_flight_ids: Vec::new(),
            affected_airport: Some("DEL".to_string()),
            severity: Severity::Low,
            delay_minutes: None,
            description: None,
            occurred_at: at(10, 5),
            status: DisruptionStatus::Open,
        }
    }

    #[test]
    fn test_commit_bumps_version() {
        let store = store();
        let diff = AssignmentDiff {
            flight_changes: Vec::new(),
            pilot_changes: vec![PilotChange::status_only("P1", PilotStatus::Resting)],
        };
        assert_eq!(store.commit(&diff, 1).unwrap(), 2);
        let snapshot = store.read_snapshot().unwrap();
        assert_eq!(snapshot.pilot("P1").unwrap().status, PilotStatus::Resting);
    }

    #[test]
    fn test_disruption_lifecycle() {
        let store = store();
        store.record_disruption(disruption("D1")).unwrap();
        assert!(matches!(
            store.record_disruption(disruption("D1")),
            Err(RepositoryError::AlreadyExists { .. })
        ));
        assert_eq!(store.current_version().unwrap(), 1);

        store.close_disruption("D1", DisruptionStatus::Escalated).unwrap();
        assert_eq!(store.get_disruption("D1").unwrap().status, DisruptionStatus::Escalated);

        // 已关闭的扰动不能再次关闭
        assert!(matches!(
            store.close_disruption("D1", DisruptionStatus::Resolved),
            Err(RepositoryError::DisruptionClosed { .. })
        ));
        assert!(matches!(
            store.get_disruption("D9"),
            Err(RepositoryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_disruptions_survive_commit() {
        let store = store();
        store.record_disruption(disruption("D1")).unwrap();
        let diff = AssignmentDiff {
            flight_changes: Vec::new(),
            pilot_changes: vec![PilotChange::status_only("P1", PilotStatus::Resting)],
        };
        store.commit(&diff, 1).unwrap();
        assert!(store.get_disruption("D1").is_ok());
        assert!(store.traces_for("D1").unwrap().is_empty());
    }

    #[test]
    fn test_commit_resolving_closes_disruption_atomically() {
        let store = store();
        store.record_disruption(disruption("D1")).unwrap();
        let diff = AssignmentDiff {
            flight_changes: Vec::new(),
            pilot_changes: vec![PilotChange::status_only("P1", PilotStatus::Resting)],
        };
        assert_eq!(store.commit_resolving(&diff, 1, "D1").unwrap(), 2);
        assert_eq!(store.get_disruption("D1").unwrap().status, DisruptionStatus::Resolved);
    }

    #[test]
    fn test_commit_resolving_refuses_closed_disruption() {
        let store = store();
        store.record_disruption(disruption("D1")).unwrap();
        store.close_disruption("D1", DisruptionStatus::Escalated).unwrap();

        let diff = AssignmentDiff {
            flight_changes: Vec::new(),
            pilot_changes: vec![PilotChange::status_only("P1", PilotStatus::Resting)],
        };
        let err = store.commit_resolving(&diff, 1, "D1").unwrap_err();
        assert!(matches!(err, RepositoryError::DisruptionClosed { .. }));

        // 排班与扰动状态均保持不变
        let snapshot = store.read_snapshot().unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.pilot("P1").unwrap().status, PilotStatus::Available);
        assert_eq!(store.get_disruption("D1").unwrap().status, DisruptionStatus::Escalated);
    }
}
