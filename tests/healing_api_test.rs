// ==========================================
// 自愈 API 测试
// ==========================================
// 职责: 验证边界输入校验、顾问模式 + 人工采纳、休息安排、成本估算
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

#[cfg(test)]
mod healing_api_test {
    use aero_resilience::api::{ApiError, HealingApi};
    use aero_resilience::config::HealingPolicy;
    use aero_resilience::domain::{
        CycleOutcome, DisruptionStatus, DisruptionType, PilotStatus, RosterSnapshot, Severity,
        StepKind,
    };
    use aero_resilience::domain::{CandidateDraft, Estimate, Flight, Pilot};
    use aero_resilience::engine::{
        CostFatigueEstimator, CrewCostEstimate, HealingOrchestrator, OptionalNotificationPublisher,
        StandardEstimator,
    };
    use aero_resilience::repository::{InMemoryRosterStore, RosterStore};
    use chrono::NaiveDateTime;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use crate::test_helpers::{
        assert_roster_invariants, at, disruption_input, fatigued_captain_roster, flight, pilot,
        roster, setup, sick_captain_roster,
    };

    fn api_over(snapshot: RosterSnapshot) -> (Arc<InMemoryRosterStore>, HealingApi) {
        let policy = HealingPolicy::default();
        let (store, orchestrator) = setup(snapshot, &policy);
        (store, HealingApi::new(Arc::new(orchestrator), policy))
    }

    // ==========================================
    // 扰动注入
    // ==========================================

    #[test]
    fn test_inject_rejects_invalid_input() {
        let (_store, api) = api_over(fatigued_captain_roster());

        let negative = disruption_input(DisruptionType::Weather, &["F1"], Severity::Low, Some(-5));
        assert!(matches!(api.inject_disruption(negative), Err(ApiError::InvalidInput(_))));

        let unknown = disruption_input(DisruptionType::Weather, &["F404"], Severity::Low, None);
        assert!(matches!(api.inject_disruption(unknown), Err(ApiError::NotFound(_))));

        let blank = disruption_input(DisruptionType::Weather, &["  "], Severity::Low, None);
        assert!(matches!(api.inject_disruption(blank), Err(ApiError::InvalidInput(_))));

        let nothing = disruption_input(DisruptionType::Weather, &[], Severity::Low, None);
        assert!(matches!(api.inject_disruption(nothing), Err(ApiError::InvalidInput(_))));

        let mut quiet_airport = disruption_input(DisruptionType::Weather, &[], Severity::Low, None);
        quiet_airport.affected_airport = Some("BLR".to_string());
        assert!(matches!(api.inject_disruption(quiet_airport), Err(ApiError::InvalidInput(_))));
    }

    #[test]
    fn test_airport_disruption_expands_departures() {
        let (store, api) = api_over(fatigued_captain_roster());
        let mut input = disruption_input(DisruptionType::Weather, &[], Severity::High, Some(90));
        input.affected_airport = Some("DEL".to_string());

        let id = api.inject_disruption(input).unwrap();
        assert!(id.starts_with("DSR-"));
        let disruption = store.get_disruption(&id).unwrap();
        assert_eq!(disruption.affected_flight_ids, vec!["F1".to_string()]);
        assert_eq!(disruption.status, DisruptionStatus::Open);
        // 扰动登记不推进版本号
        assert_eq!(store.current_version().unwrap(), 1);
    }

    // ==========================================
    // 顾问模式 + 人工采纳
    // ==========================================

    #[test]
    fn test_run_heal_then_resolve_candidate() {
        let (store, api) = api_over(fatigued_captain_roster());
        let id = api
            .inject_disruption(disruption_input(DisruptionType::Weather, &["F1"], Severity::High, Some(90)))
            .unwrap();

        let report = api.run_heal(&id).unwrap();
        assert_eq!(report.outcome, CycleOutcome::Planned);
        assert_eq!(store.current_version().unwrap(), 1);

        // 人工选择取消而非推荐的备份改派
        let cancel_id = format!("{}:F1:CANCEL", id);
        assert!(report.candidate(&cancel_id).is_some());
        let version = api.resolve(&cancel_id).unwrap();
        assert_eq!(version, 2);

        let snapshot = store.read_snapshot().unwrap();
        assert!(snapshot.flight("F1").unwrap().assigned_pilot_id.is_none());
        assert_eq!(store.get_disruption(&id).unwrap().status, DisruptionStatus::Resolved);

        let traces = api.traces(&id).unwrap();
        assert_eq!(traces.len(), 2);
        let manual = &traces[1];
        assert_eq!(manual.outcome, CycleOutcome::Committed { new_version: 2 });
        assert_eq!(manual.steps[0].kind, StepKind::Selected);
        assert_eq!(manual.steps[0].reason_code.as_deref(), Some("manual_selection"));

        // 已采纳后候选缓存清空
        assert!(matches!(api.resolve(&cancel_id), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn test_resolve_rejects_rejected_candidate() {
        let (_store, api) = api_over(fatigued_captain_roster());
        let id = api
            .inject_disruption(disruption_input(DisruptionType::Weather, &["F1"], Severity::High, Some(90)))
            .unwrap();
        api.run_heal(&id).unwrap();

        let err = api.resolve(&format!("{}:F1:DELAY:90", id)).unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[test]
    fn test_resolve_after_concurrent_change_is_stale() {
        let (store, api) = api_over(fatigued_captain_roster());
        let id = api
            .inject_disruption(disruption_input(DisruptionType::Weather, &["F1"], Severity::High, Some(90)))
            .unwrap();
        api.run_heal(&id).unwrap();

        // 规划之后排班被修改
        api.grant_rest("R1", at(10, 7, 0)).unwrap();

        let candidate_id = format!("{}:F1:ASSIGN_RESERVE:R1", id);
        let err = api.resolve(&candidate_id).unwrap_err();
        assert!(matches!(err, ApiError::StaleSnapshot { expected: 1, actual: 2 }));

        // 扰动仍为 Open，失败轨迹已归档，缓存失效
        assert_eq!(store.get_disruption(&id).unwrap().status, DisruptionStatus::Open);
        let traces = api.traces(&id).unwrap();
        assert!(traces.last().unwrap().has_reason("stale_snapshot"));
        assert!(matches!(api.resolve(&candidate_id), Err(ApiError::NotFound(_))));

        // 重新规划后可以采纳
        api.run_heal(&id).unwrap();
        assert_eq!(api.resolve(&candidate_id).unwrap(), 3);
    }

    #[test]
    fn test_resolve_sickness_commits_status_and_whole_chain() {
        let (store, api) = api_over(sick_captain_roster());
        let id = api
            .inject_disruption(disruption_input(DisruptionType::CrewSickness, &["F1"], Severity::High, None))
            .unwrap();
        let report = api.run_heal(&id).unwrap();
        assert_eq!(report.plans.len(), 2);

        // 人工选择 R2 执飞 F1，后续 F2 仍需一并改派
        let version = api.resolve(&format!("{}:F1:ASSIGN_RESERVE:R2", id)).unwrap();
        assert_eq!(version, 2);

        let snapshot = store.read_snapshot().unwrap();
        assert_eq!(snapshot.pilot("P1").unwrap().status, PilotStatus::Sick);
        assert_eq!(snapshot.flight("F1").unwrap().assigned_pilot_id.as_deref(), Some("R2"));
        let f2_crew = snapshot.flight("F2").unwrap().assigned_pilot_id.clone();
        assert!(f2_crew.is_some());
        assert_ne!(f2_crew.as_deref(), Some("P1"));
        assert!(snapshot.pilot("P1").unwrap().duty_history.is_empty());
        assert_eq!(store.get_disruption(&id).unwrap().status, DisruptionStatus::Resolved);
        assert_roster_invariants(&snapshot, &HealingPolicy::default());
    }

    #[test]
    fn test_resolve_refuses_partial_repair() {
        // F2 需要 B737，只有病假的 P1 具备该资质
        let mut p1 = pilot("P1", 30.0, PilotStatus::Available);
        p1.qualifications = BTreeSet::from(["A320".to_string(), "B737".to_string()]);
        let mut f2 = flight("F2", at(11, 10, 0), at(11, 12, 0), Some("P1"));
        f2.required_qualification = "B737".to_string();
        let (store, api) = api_over(roster(
            at(10, 6, 0),
            vec![flight("F1", at(10, 10, 0), at(10, 12, 0), Some("P1")), f2],
            vec![p1, pilot("R1", 10.0, PilotStatus::Reserve)],
        ));
        let id = api
            .inject_disruption(disruption_input(DisruptionType::CrewSickness, &["F1"], Severity::High, None))
            .unwrap();
        api.run_heal(&id).unwrap();

        let err = api.resolve(&format!("{}:F1:ASSIGN_RESERVE:R1", id)).unwrap_err();
        assert!(matches!(err, ApiError::Infeasible(_)));

        // 未提交任何变更，扰动保持打开
        assert_eq!(store.current_version().unwrap(), 1);
        assert_eq!(store.get_disruption(&id).unwrap().status, DisruptionStatus::Open);
        let snapshot = store.read_snapshot().unwrap();
        assert_eq!(snapshot.pilot("P1").unwrap().status, PilotStatus::Available);
        assert_eq!(snapshot.flight("F1").unwrap().assigned_pilot_id.as_deref(), Some("P1"));

        // 取消 F2 后，F1 的改派与病假状态一并提交
        api.run_heal(&id).unwrap();
        assert_eq!(api.resolve(&format!("{}:F2:CANCEL", id)).unwrap(), 2);
        let snapshot = store.read_snapshot().unwrap();
        assert_eq!(snapshot.pilot("P1").unwrap().status, PilotStatus::Sick);
        assert_eq!(snapshot.flight("F1").unwrap().assigned_pilot_id.as_deref(), Some("R1"));
        assert!(snapshot.flight("F2").unwrap().assigned_pilot_id.is_none());
        assert_eq!(store.get_disruption(&id).unwrap().status, DisruptionStatus::Resolved);
    }

    #[test]
    fn test_resolve_unknown_candidate() {
        let (_store, api) = api_over(fatigued_captain_roster());
        assert!(matches!(api.resolve("D0:F1:CANCEL"), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn test_heal_unknown_disruption() {
        let (_store, api) = api_over(fatigued_captain_roster());
        assert!(matches!(api.heal("DSR-missing"), Err(ApiError::NotFound(_))));
    }

    // ==========================================
    // 策略
    // ==========================================

    #[test]
    fn test_set_policy_validates() {
        let (_store, api) = api_over(fatigued_captain_roster());
        let invalid = HealingPolicy {
            soft_fatigue_threshold: 95.0,
            ..HealingPolicy::default()
        };
        assert!(matches!(api.set_policy(invalid), Err(ApiError::ConfigError(_))));

        let stricter = HealingPolicy {
            auto_cancel: true,
            ..HealingPolicy::default()
        };
        api.set_policy(stricter).unwrap();
        assert!(api.policy().unwrap().auto_cancel);
    }

    // ==========================================
    // 机组
    // ==========================================

    #[test]
    fn test_grant_rest_resets_fatigue() {
        let (store, api) = api_over(sick_captain_roster());

        let version = api.grant_rest("R2", at(10, 20, 0)).unwrap();
        assert_eq!(version, 2);
        let r2 = store.read_snapshot().unwrap().pilot("R2").unwrap().clone();
        assert_eq!(r2.fatigue_score, 0.0);
        assert_eq!(r2.status, PilotStatus::Available);
        assert_eq!(r2.rest_available_from, at(10, 20, 0));

        assert!(matches!(api.grant_rest("P404", at(10, 20, 0)), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn test_grant_rest_refuses_sick_pilot() {
        let mut snapshot = sick_captain_roster();
        snapshot
            .pilots
            .insert("S1".to_string(), pilot("S1", 40.0, PilotStatus::Sick));
        let (store, api) = api_over(snapshot);

        let err = api.grant_rest("S1", at(10, 20, 0)).unwrap_err();
        assert!(matches!(err, ApiError::InvalidStateTransition { .. }));
        assert_eq!(store.current_version().unwrap(), 1);
    }

    #[test]
    fn test_estimate_crew_cost_crosses_overtime_slab() {
        let mut snapshot = fatigued_captain_roster();
        if let Some(r1) = snapshot.pilots.get_mut("R1") {
            r1.weekly_duty_minutes = 2370;
            r1.fatigue_score = 30.0;
        }
        let (_store, api) = api_over(snapshot);

        let estimate = api.estimate_crew_cost("R1", 60, Some(at(10, 10, 0))).unwrap();
        // 30 分钟基础 2000 + 30 分钟 1.5x 3000 + 燃油 12000 + 维修 9000
        assert_eq!(estimate.total_cost, 26_000.0);
        assert!(estimate.is_overtime);
        assert!(!estimate.in_wocl);
        assert_eq!(estimate.projected_fatigue, 40.0);

        let night = api.estimate_crew_cost("R1", 60, Some(at(10, 3, 0))).unwrap();
        assert!(night.in_wocl);
        assert!(night.total_cost > estimate.total_cost);

        assert!(matches!(api.estimate_crew_cost("R1", 0, None), Err(ApiError::InvalidInput(_))));
        assert!(matches!(api.estimate_crew_cost("P404", 60, None), Err(ApiError::NotFound(_))));
    }

    /// 固定报价的估算器，其余估算沿用标准实现
    struct FlatRateEstimator {
        standard: StandardEstimator,
    }

    impl CostFatigueEstimator for FlatRateEstimator {
        fn estimate(&self, draft: &CandidateDraft, snapshot: &RosterSnapshot, policy: &HealingPolicy) -> Estimate {
            self.standard.estimate(draft, snapshot, policy)
        }

        fn assignment_cost(&self, pilot: &Pilot, flight: &Flight, policy: &HealingPolicy) -> f64 {
            self.standard.assignment_cost(pilot, flight, policy)
        }

        fn estimate_crew_cost(
            &self,
            pilot: &Pilot,
            additional_minutes: i64,
            _at: NaiveDateTime,
            _policy: &HealingPolicy,
        ) -> CrewCostEstimate {
            CrewCostEstimate {
                pilot_id: pilot.pilot_id.clone(),
                additional_minutes,
                total_cost: 1234.0,
                breakdown: Vec::new(),
                projected_fatigue: pilot.fatigue_score,
                is_overtime: false,
                in_wocl: false,
            }
        }
    }

    #[test]
    fn test_estimate_crew_cost_uses_injected_estimator() {
        let policy = HealingPolicy::default();
        let store = Arc::new(InMemoryRosterStore::new(fatigued_captain_roster(), policy.limits()));
        let orchestrator = HealingOrchestrator::new(
            store,
            Arc::new(FlatRateEstimator {
                standard: StandardEstimator::new(),
            }),
            OptionalNotificationPublisher::none(),
        );
        let api = HealingApi::new(Arc::new(orchestrator), policy);

        let estimate = api.estimate_crew_cost("R1", 60, Some(at(10, 10, 0))).unwrap();
        assert_eq!(estimate.total_cost, 1234.0);
        assert_eq!(estimate.pilot_id, "R1");
    }
}
