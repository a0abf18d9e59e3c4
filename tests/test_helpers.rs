// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 提供排班快照夹具、存储/编排器构造、不变量断言
// ==========================================
#![allow(dead_code)]

use aero_resilience::config::HealingPolicy;
use aero_resilience::domain::{
    Disruption, DisruptionInput, DisruptionType, Flight, FlightStatus, Pilot, PilotStatus,
    RosterSnapshot, Severity,
};
use aero_resilience::engine::{
    HealingOrchestrator, NotificationPublisher, OptionalNotificationPublisher, RosterNotification,
    StandardEstimator,
};
use aero_resilience::repository::{InMemoryRosterStore, RosterStore};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeSet;
use std::error::Error;
use std::sync::{Arc, Mutex};

/// 2026-03-{day} {hour}:{minute}
pub fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

/// 创建航班（A320，DEL -> BOM）
pub fn flight(id: &str, dep: NaiveDateTime, arr: NaiveDateTime, pilot: Option<&str>) -> Flight {
    Flight {
        flight_id: id.to_string(),
        flight_number: format!("AI{}", id.trim_start_matches('F')),
        origin: "DEL".to_string(),
        destination: "BOM".to_string(),
        scheduled_departure: dep,
        scheduled_arrival: arr,
        required_qualification: "A320".to_string(),
        assigned_pilot_id: pilot.map(|p| p.to_string()),
        status: FlightStatus::Scheduled,
        delay_minutes: 0,
        landings: 1,
    }
}

/// 创建飞行员（A320 资质，DEL 基地，无执勤历史）
pub fn pilot(id: &str, fatigue: f64, status: PilotStatus) -> Pilot {
    Pilot {
        pilot_id: id.to_string(),
        name: format!("Captain {}", id),
        base: "DEL".to_string(),
        qualifications: BTreeSet::from(["A320".to_string()]),
        fatigue_score: fatigue,
        duty_history: Vec::new(),
        rest_available_from: at(1, 0, 0),
        status,
        weekly_duty_minutes: 0,
    }
}

/// 组装快照，并按默认签到/签退把航班执勤写入飞行员历史
pub fn roster(as_of: NaiveDateTime, flights: Vec<Flight>, mut pilots: Vec<Pilot>) -> RosterSnapshot {
    let policy = HealingPolicy::default();
    for f in &flights {
        let Some(pilot_id) = &f.assigned_pilot_id else {
            continue;
        };
        if let Some(p) = pilots.iter_mut().find(|p| &p.pilot_id == pilot_id) {
            p.insert_duty(f.duty_interval(policy.sign_on_minutes, policy.sign_off_minutes));
        }
    }
    RosterSnapshot::new(as_of, flights, pilots)
}

/// 构造内存存储 + 编排器
pub fn setup(
    snapshot: RosterSnapshot,
    policy: &HealingPolicy,
) -> (Arc<InMemoryRosterStore>, HealingOrchestrator) {
    setup_with_publisher(snapshot, policy, OptionalNotificationPublisher::none())
}

pub fn setup_with_publisher(
    snapshot: RosterSnapshot,
    policy: &HealingPolicy,
    publisher: OptionalNotificationPublisher,
) -> (Arc<InMemoryRosterStore>, HealingOrchestrator) {
    let store = Arc::new(InMemoryRosterStore::new(snapshot, policy.limits()));
    let orchestrator = HealingOrchestrator::new(
        store.clone(),
        Arc::new(StandardEstimator::new()),
        publisher,
    );
    (store, orchestrator)
}

/// 扰动输入
pub fn disruption_input(
    disruption_type: DisruptionType,
    flight_ids: &[&str],
    severity: Severity,
    delay_minutes: Option<i64>,
) -> DisruptionInput {
    DisruptionInput {
        disruption_type,
        affected_flight_ids: flight_ids.iter().map(|s| s.to_string()).collect(),
        affected_airport: None,
        severity,
        delay_minutes,
        description: None,
        occurred_at: at(10, 5, 0),
    }
}

/// 直接登记扰动（绕过 API 边界校验）
pub fn register(
    store: &dyn RosterStore,
    id: &str,
    input: DisruptionInput,
) -> Result<Disruption, Box<dyn Error>> {
    let flights = input.affected_flight_ids.clone();
    let disruption = input.into_disruption(id.to_string(), flights);
    store.record_disruption(disruption.clone())?;
    Ok(disruption)
}

// ==========================================
// 标准场景
// ==========================================

/// 场景A: P1（疲劳75）执飞 F1 10:00-12:00，R1 备份（疲劳10）
pub fn fatigued_captain_roster() -> RosterSnapshot {
    roster(
        at(10, 6, 0),
        vec![flight("F1", at(10, 10, 0), at(10, 12, 0), Some("P1"))],
        vec![
            pilot("P1", 75.0, PilotStatus::Available),
            pilot("R1", 10.0, PilotStatus::Reserve),
        ],
    )
}

/// 场景C: P1 执飞 F1(10日) / F2(11日)，R1（疲劳10）、R2（疲劳20）备份
pub fn sick_captain_roster() -> RosterSnapshot {
    roster(
        at(10, 6, 0),
        vec![
            flight("F1", at(10, 10, 0), at(10, 12, 0), Some("P1")),
            flight("F2", at(11, 10, 0), at(11, 12, 0), Some("P1")),
        ],
        vec![
            pilot("P1", 30.0, PilotStatus::Available),
            pilot("R1", 10.0, PilotStatus::Reserve),
            pilot("R2", 20.0, PilotStatus::Reserve),
        ],
    )
}

/// 场景B: P1 病假候选航班 F1；P2 同时段执飞 F2，无备份
pub fn no_cover_roster() -> RosterSnapshot {
    roster(
        at(10, 6, 0),
        vec![
            flight("F1", at(10, 10, 0), at(10, 12, 0), Some("P1")),
            flight("F2", at(10, 10, 0), at(10, 12, 0), Some("P2")),
        ],
        vec![
            pilot("P1", 30.0, PilotStatus::Available),
            pilot("P2", 30.0, PilotStatus::Available),
        ],
    )
}

// ==========================================
// 不变量断言
// ==========================================

/// 全量复核排班结构不变量
pub fn assert_roster_invariants(snapshot: &RosterSnapshot, policy: &HealingPolicy) {
    for pilot in snapshot.pilots.values() {
        assert!(
            pilot.find_overlap().is_none(),
            "飞行员 {} 存在重叠执勤",
            pilot.pilot_id
        );
        if let Some(rest) = pilot.min_rest_between_duties() {
            assert!(
                rest >= policy.min_rest_minutes,
                "飞行员 {} 休息 {} 分钟不足",
                pilot.pilot_id,
                rest
            );
        }
        assert!(
            pilot.fatigue_score <= policy.fatigue_cap,
            "飞行员 {} 疲劳 {} 超过上限",
            pilot.pilot_id,
            pilot.fatigue_score
        );
        for duty in &pilot.duty_history {
            assert!(duty.duration_minutes() <= policy.max_duty_minutes);
        }
    }

    for flight in snapshot.flights.values() {
        let holders: Vec<&str> = snapshot
            .pilots
            .values()
            .filter(|p| p.duty_for_flight(&flight.flight_id).is_some())
            .map(|p| p.pilot_id.as_str())
            .collect();
        match (&flight.assigned_pilot_id, flight.status.is_operating()) {
            (Some(assigned), true) => assert_eq!(holders, vec![assigned.as_str()]),
            _ => assert!(holders.is_empty(), "航班 {} 执勤残留: {:?}", flight.flight_id, holders),
        }
    }
}

// ==========================================
// 通知记录
// ==========================================

#[derive(Default)]
pub struct RecordingPublisher {
    pub sent: Mutex<Vec<RosterNotification>>,
}

impl NotificationPublisher for RecordingPublisher {
    fn publish(&self, notification: RosterNotification) -> Result<String, Box<dyn Error + Send + Sync>> {
        let mut sent = self.sent.lock().map_err(|e| e.to_string())?;
        sent.push(notification);
        Ok(format!("msg-{}", sent.len()))
    }
}
