// ==========================================
// 自愈周期场景测试
// ==========================================
// 职责: 验证端到端自愈周期（疲劳上限/病假改派/无可行方案/推迟级联）
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

#[cfg(test)]
mod healing_scenario_test {
    use aero_resilience::config::HealingPolicy;
    use aero_resilience::domain::{
        CandidateAction, CandidateSource, CycleOutcome, DisruptionStatus, DisruptionType,
        FlightStatus, PilotStatus, RejectReason, Severity, StepKind,
    };
    use aero_resilience::engine::{
        CriticalReason, DisruptionClassifier, NotificationKind, OptionalNotificationPublisher,
    };
    use aero_resilience::repository::RosterStore;
    use std::sync::Arc;

    use crate::test_helpers::{
        assert_roster_invariants, at, disruption_input, fatigued_captain_roster, flight,
        no_cover_roster, pilot, register, roster, setup, setup_with_publisher,
        sick_captain_roster, RecordingPublisher,
    };

    // ==========================================
    // 场景A: 原机组推迟超疲劳上限，改派备份
    // ==========================================

    #[test]
    fn test_fatigue_cap_rejects_delay_and_assigns_reserve() {
        let policy = HealingPolicy::default();
        let (store, orchestrator) = setup(fatigued_captain_roster(), &policy);
        register(
            store.as_ref(),
            "D1",
            disruption_input(DisruptionType::Weather, &["F1"], Severity::High, Some(90)),
        )
        .unwrap();

        let report = orchestrator.heal("D1", &policy).unwrap();

        assert_eq!(report.outcome, CycleOutcome::Committed { new_version: 2 });
        assert_eq!(report.attempts, 1);
        assert_eq!(report.plans.len(), 1);
        assert_eq!(
            report.plans[0].selected.as_deref(),
            Some("D1:F1:ASSIGN_RESERVE:R1")
        );

        // 推迟方案: 疲劳 75 + 15 = 90 > 80
        let delay = report.candidate("D1:F1:DELAY:90").expect("推迟候选应存在");
        assert_eq!(delay.action, CandidateAction::Delay);
        assert_eq!(
            delay.verdict.as_ref().and_then(|v| v.reject_reason()),
            Some(RejectReason::FatigueCapExceeded)
        );
        assert!(delay.score.is_none());

        // 取消方案通过校验但不自动提交
        let cancel = report.candidate("D1:F1:CANCEL").expect("取消候选始终存在");
        assert!(cancel.is_accepted());
        // 被拒绝的候选排在最后
        assert_eq!(
            report.plans[0].candidates.last().map(|c| c.candidate_id.as_str()),
            Some("D1:F1:DELAY:90")
        );

        assert!(report.trace.has_reason("fatigue_cap_exceeded"));
        assert!(report.trace.outcome.is_committed());

        let snapshot = store.read_snapshot().unwrap();
        assert_eq!(snapshot.version, 2);
        let f1 = snapshot.flight("F1").unwrap();
        assert_eq!(f1.assigned_pilot_id.as_deref(), Some("R1"));
        assert_eq!(f1.status, FlightStatus::Delayed);
        assert_eq!(f1.delay_minutes, 90);
        assert_eq!(f1.scheduled_departure, at(10, 11, 30));

        let r1 = snapshot.pilot("R1").unwrap();
        assert_eq!(r1.status, PilotStatus::OnDuty);
        // 新执勤 11:00 - 13:45 = 165 分钟 -> 27.5
        assert!((r1.fatigue_score - 37.5).abs() < 1e-9);
        assert_eq!(r1.weekly_duty_minutes, 165);
        assert!(snapshot.pilot("P1").unwrap().duty_for_flight("F1").is_none());

        assert_eq!(store.get_disruption("D1").unwrap().status, DisruptionStatus::Resolved);
        assert_roster_invariants(&snapshot, &policy);
    }

    #[test]
    fn test_trace_is_archived_and_ordered() {
        let policy = HealingPolicy::default();
        let (store, orchestrator) = setup(fatigued_captain_roster(), &policy);
        register(
            store.as_ref(),
            "D1",
            disruption_input(DisruptionType::Weather, &["F1"], Severity::High, Some(90)),
        )
        .unwrap();
        let report = orchestrator.heal("D1", &policy).unwrap();

        let archived = store.traces_for("D1").unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0], report.trace);

        let steps = &report.trace.steps;
        assert_eq!(steps.first().map(|s| s.kind), Some(StepKind::DisruptionObserved));
        assert_eq!(steps.last().map(|s| s.kind), Some(StepKind::Outcome));
        for (i, step) in steps.iter().enumerate() {
            assert_eq!(step.seq as usize, i + 1);
        }
        assert!(steps.iter().any(|s| s.kind == StepKind::Selected
            && s.subject == "D1:F1:ASSIGN_RESERVE:R1"));
        assert!(report
            .trace
            .steps_for("D1:F1:DELAY:90")
            .any(|s| s.kind == StepKind::Verdict));
    }

    #[test]
    fn test_committed_changes_are_notified() {
        let policy = HealingPolicy::default();
        let publisher = Arc::new(RecordingPublisher::default());
        let (store, orchestrator) = setup_with_publisher(
            fatigued_captain_roster(),
            &policy,
            OptionalNotificationPublisher::with_publisher(publisher.clone()),
        );
        register(
            store.as_ref(),
            "D1",
            disruption_input(DisruptionType::Weather, &["F1"], Severity::High, Some(90)),
        )
        .unwrap();
        orchestrator.heal("D1", &policy).unwrap();

        let sent = publisher.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].flight_id, "F1");
        assert_eq!(sent[0].kind, NotificationKind::Delayed);
        assert_eq!(sent[0].roster_version, 2);
    }

    // ==========================================
    // 场景B: 无可行方案，升级人工
    // ==========================================

    #[test]
    fn test_no_feasible_candidate_escalates() {
        let policy = HealingPolicy::default();
        let (store, orchestrator) = setup(no_cover_roster(), &policy);
        register(
            store.as_ref(),
            "D2",
            disruption_input(DisruptionType::CrewSickness, &["F1"], Severity::Medium, None),
        )
        .unwrap();

        let report = orchestrator.heal("D2", &policy).unwrap();

        assert_eq!(
            report.outcome,
            CycleOutcome::Escalated {
                reason_code: "no_feasible_candidate".to_string()
            }
        );
        assert!(report.diff.is_empty());
        assert!(report.trace.has_reason("solver_infeasible"));
        assert!(report.trace.has_reason("no_feasible_candidate"));
        assert!(report
            .trace
            .steps
            .iter()
            .any(|s| s.kind == StepKind::SolverInvoked));

        // 只剩取消方案，且未自动提交
        let plan = &report.plans[0];
        assert!(plan.selected.is_none());
        assert!(plan.candidates.iter().all(|c| c.is_cancel()));

        let snapshot = store.read_snapshot().unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.flight("F1").unwrap().assigned_pilot_id.as_deref(), Some("P1"));
        assert_eq!(store.get_disruption("D2").unwrap().status, DisruptionStatus::Escalated);
    }

    #[test]
    fn test_auto_cancel_commits_cancellation() {
        let policy = HealingPolicy {
            auto_cancel: true,
            ..HealingPolicy::default()
        };
        let (store, orchestrator) = setup(no_cover_roster(), &policy);
        register(
            store.as_ref(),
            "D2",
            disruption_input(DisruptionType::CrewSickness, &["F1"], Severity::Medium, None),
        )
        .unwrap();

        let report = orchestrator.heal("D2", &policy).unwrap();
        assert!(report.outcome.is_committed());

        let snapshot = store.read_snapshot().unwrap();
        let f1 = snapshot.flight("F1").unwrap();
        assert_eq!(f1.status, FlightStatus::Cancelled);
        assert!(f1.assigned_pilot_id.is_none());
        assert_eq!(snapshot.pilot("P1").unwrap().status, PilotStatus::Sick);
        assert_roster_invariants(&snapshot, &policy);
    }

    // ==========================================
    // 场景C: 病假，后续航班全部改派
    // ==========================================

    #[test]
    fn test_crew_sickness_reassigns_whole_chain() {
        let policy = HealingPolicy::default();
        let (store, orchestrator) = setup(sick_captain_roster(), &policy);
        register(
            store.as_ref(),
            "D3",
            disruption_input(DisruptionType::CrewSickness, &["F1"], Severity::High, None),
        )
        .unwrap();

        let report = orchestrator.heal("D3", &policy).unwrap();
        assert_eq!(report.outcome, CycleOutcome::Committed { new_version: 2 });

        let critical: Vec<&str> = report
            .plans
            .iter()
            .map(|p| p.critical.flight_id.as_str())
            .collect();
        assert_eq!(critical, vec!["F1", "F2"]);
        assert_eq!(report.plans[1].critical.cascade_depth, 1);

        let selected: Vec<&str> = report
            .selected_candidates()
            .iter()
            .map(|c| c.candidate_id.as_str())
            .collect();
        assert_eq!(selected, vec!["D3:F1:ASSIGN_RESERVE:R1", "D3:F2:ASSIGN_RESERVE:R2"]);

        let snapshot = store.read_snapshot().unwrap();
        assert_eq!(snapshot.flight("F1").unwrap().assigned_pilot_id.as_deref(), Some("R1"));
        assert_eq!(snapshot.flight("F2").unwrap().assigned_pilot_id.as_deref(), Some("R2"));
        assert_eq!(snapshot.flight("F1").unwrap().status, FlightStatus::Resolved);

        let p1 = snapshot.pilot("P1").unwrap();
        assert_eq!(p1.status, PilotStatus::Sick);
        assert!(p1.duty_history.is_empty());
        // 移除执勤不返还疲劳
        assert_eq!(p1.fatigue_score, 30.0);
        assert_roster_invariants(&snapshot, &policy);
    }

    // ==========================================
    // 推迟方案: 原机组顺延并级联后移后续航班
    // ==========================================

    #[test]
    fn test_delay_with_cascade_shift() {
        let policy = HealingPolicy::default();
        let snapshot = roster(
            at(10, 5, 0),
            vec![
                flight("F1", at(10, 7, 0), at(10, 8, 0), Some("P1")),
                flight("F3", at(10, 19, 0), at(10, 20, 0), Some("P1")),
            ],
            vec![pilot("P1", 20.0, PilotStatus::Available)],
        );
        let (store, orchestrator) = setup(snapshot, &policy);
        register(
            store.as_ref(),
            "D4",
            disruption_input(DisruptionType::Atc, &["F1"], Severity::Medium, Some(60)),
        )
        .unwrap();

        let report = orchestrator.heal("D4", &policy).unwrap();
        assert!(report.outcome.is_committed());
        assert_eq!(report.plans.len(), 1);
        assert_eq!(report.plans[0].selected.as_deref(), Some("D4:F1:DELAY:60"));

        // F3 级联延误 45 分钟，已被上游推迟方案覆盖
        assert!(report.trace.has_reason("cascade_delay"));
        assert!(report.trace.has_reason("covered_upstream"));

        let delay = report.candidate("D4:F1:DELAY:60").unwrap();
        assert_eq!(delay.diff.flight_changes.len(), 2);
        // 回看窗口休息 600 < 推荐 720: 缺口 2 小时
        assert!((delay.verdict.as_ref().unwrap().soft_penalty() - 400.0).abs() < 1e-9);

        let snapshot = store.read_snapshot().unwrap();
        let f1 = snapshot.flight("F1").unwrap();
        let f3 = snapshot.flight("F3").unwrap();
        assert_eq!(f1.scheduled_departure, at(10, 8, 0));
        assert_eq!(f3.scheduled_departure, at(10, 19, 45));
        assert_eq!(f3.delay_minutes, 45);
        assert_eq!(f1.assigned_pilot_id.as_deref(), Some("P1"));
        assert!((snapshot.pilot("P1").unwrap().fatigue_score - 30.0).abs() < 1e-9);
        assert_roster_invariants(&snapshot, &policy);
    }

    // ==========================================
    // 同一执勤链上的多个直接受影响航班
    // ==========================================

    #[test]
    fn test_every_direct_flight_on_chain_is_classified() {
        let policy = HealingPolicy::default();
        let (store, orchestrator) = setup(
            roster(
                at(10, 6, 0),
                vec![
                    flight("F1", at(10, 10, 0), at(10, 12, 0), Some("P1")),
                    flight("F2", at(11, 10, 0), at(11, 12, 0), Some("P1")),
                    flight("F3", at(12, 10, 0), at(12, 12, 0), Some("P1")),
                ],
                vec![pilot("P1", 20.0, PilotStatus::Available)],
            ),
            &policy,
        );
        let disruption = register(
            store.as_ref(),
            "D6",
            disruption_input(DisruptionType::Weather, &["F1", "F3"], Severity::High, Some(120)),
        )
        .unwrap();

        // F1 的延误在 F2 前已被休息吸收，F3 仍需单独处理
        let snapshot = store.read_snapshot().unwrap();
        let classification = DisruptionClassifier::new()
            .classify(&disruption, &snapshot, &policy)
            .unwrap();
        let critical: Vec<&str> = classification.critical.iter().map(|c| c.flight_id.as_str()).collect();
        assert_eq!(critical, vec!["F1", "F3"]);
        assert!(classification
            .critical
            .iter()
            .all(|c| c.reason == CriticalReason::DirectDelay && c.cascade_depth == 0 && c.predicted_delay_minutes == 120));
        assert!(!classification.absorbed.contains_key("F2"));

        let report = orchestrator.plan("D6", &policy).unwrap();
        let planned: Vec<&str> = report.plans.iter().map(|p| p.critical.flight_id.as_str()).collect();
        assert_eq!(planned, vec!["F1", "F3"]);
    }

    // ==========================================
    // 备份充足时仍保留推迟候选
    // ==========================================

    #[test]
    fn test_delay_candidate_survives_many_reserves() {
        let policy = HealingPolicy::default();
        let mut pilots = vec![pilot("P1", 20.0, PilotStatus::Available)];
        for i in 1..=7 {
            pilots.push(pilot(&format!("R{}", i), 10.0, PilotStatus::Reserve));
        }
        let (store, orchestrator) = setup(
            roster(at(10, 6, 0), vec![flight("F1", at(10, 10, 0), at(10, 12, 0), Some("P1"))], pilots),
            &policy,
        );
        register(
            store.as_ref(),
            "D7",
            disruption_input(DisruptionType::Weather, &["F1"], Severity::High, Some(90)),
        )
        .unwrap();

        let report = orchestrator.plan("D7", &policy).unwrap();
        let candidates = &report.plans[0].candidates;
        assert!(report.candidate("D7:F1:DELAY:90").is_some());
        let reserves = candidates
            .iter()
            .filter(|c| c.action == CandidateAction::AssignReserve)
            .count();
        assert_eq!(reserves, policy.max_candidates_per_flight - 1);
    }

    #[test]
    fn test_small_delay_is_absorbed_without_commit() {
        let policy = HealingPolicy::default();
        let (store, orchestrator) = setup(sick_captain_roster(), &policy);
        register(
            store.as_ref(),
            "D5",
            disruption_input(DisruptionType::Atc, &["F1"], Severity::Low, Some(20)),
        )
        .unwrap();

        let report = orchestrator.heal("D5", &policy).unwrap();
        assert_eq!(report.outcome, CycleOutcome::Committed { new_version: 1 });
        assert!(report.trace.has_reason("no_critical_flights"));
        assert!(report.plans.is_empty());
        assert_eq!(store.current_version().unwrap(), 1);
        assert_eq!(store.get_disruption("D5").unwrap().status, DisruptionStatus::Resolved);
    }

    #[test]
    fn test_solver_fallback_when_no_reserve() {
        // R9 名下有航班（不属于备份），但可在其后接飞 F1
        let policy = HealingPolicy::default();
        let snapshot = roster(
            at(10, 0, 0),
            vec![
                flight("F1", at(10, 20, 0), at(10, 22, 0), Some("P1")),
                flight("F9", at(10, 7, 0), at(10, 8, 0), Some("R9")),
            ],
            vec![
                pilot("P1", 30.0, PilotStatus::Available),
                pilot("R9", 10.0, PilotStatus::Available),
            ],
        );
        let (store, orchestrator) = setup(snapshot, &policy);
        register(
            store.as_ref(),
            "D6",
            disruption_input(DisruptionType::CrewSickness, &["F1"], Severity::High, None),
        )
        .unwrap();

        let report = orchestrator.heal("D6", &policy).unwrap();
        assert!(report.outcome.is_committed());
        let chosen = report.candidate("D6:F1:SOLVER:R9").expect("求解器兜底候选");
        assert_eq!(chosen.source, CandidateSource::Solver);
        assert!(chosen.is_accepted());

        let snapshot = store.read_snapshot().unwrap();
        assert_eq!(snapshot.flight("F1").unwrap().assigned_pilot_id.as_deref(), Some("R9"));
        assert_roster_invariants(&snapshot, &policy);
    }

    #[test]
    fn test_closed_disruption_cannot_be_healed_again() {
        let policy = HealingPolicy::default();
        let (store, orchestrator) = setup(fatigued_captain_roster(), &policy);
        register(
            store.as_ref(),
            "D1",
            disruption_input(DisruptionType::Weather, &["F1"], Severity::High, Some(90)),
        )
        .unwrap();
        orchestrator.heal("D1", &policy).unwrap();
        assert!(orchestrator.heal("D1", &policy).is_err());
    }
}
