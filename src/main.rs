// 命令行工具: 对排班快照注入一个扰动并运行一次自动自愈周期，输出结果与推理轨迹（JSON）。
//
// Usage:
//   crew-heal <snapshot.json> <disruption.json> [config_db_path]
//
// 不指定配置库时读取用户数据目录下的 aero-resilience/config.db（存在时），否则使用默认策略。

use aero_resilience::config::{ConfigManager, HealingPolicy};
use aero_resilience::domain::{DisruptionInput, RosterSnapshot};
use aero_resilience::engine::{HealingOrchestrator, OptionalNotificationPublisher, StandardEstimator};
use aero_resilience::repository::InMemoryRosterStore;
use aero_resilience::{db, logging, HealingApi};
use std::sync::Arc;
use tracing::info;

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, Box<dyn std::error::Error + Send + Sync>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("读取文件失败 {}: {}", path, e))?;
    Ok(serde_json::from_str(&text).map_err(|e| format!("解析 JSON 失败 {}: {}", path, e))?)
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    logging::init();

    let mut args = std::env::args().skip(1);
    let usage = "usage: crew-heal <snapshot.json> <disruption.json> [config_db_path]";
    let snapshot_path = args.next().ok_or(usage)?;
    let disruption_path = args.next().ok_or(usage)?;

    let config_path = args
        .next()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            db::default_config_db_path()
                .filter(|p| p.exists())
                .map(|p| p.to_string_lossy().into_owned())
        });
    let policy = match config_path {
        Some(db_path) => {
            info!(db_path = %db_path, "从配置库加载自愈策略");
            ConfigManager::new(&db_path)?.read_policy()?
        }
        None => HealingPolicy::default(),
    };
    policy.validate()?;

    let snapshot: RosterSnapshot = read_json(&snapshot_path)?;
    let input: DisruptionInput = read_json(&disruption_path)?;
    info!(
        flights = snapshot.flights.len(),
        pilots = snapshot.pilots.len(),
        version = snapshot.version,
        "排班快照已加载"
    );

    let store = Arc::new(InMemoryRosterStore::new(snapshot, policy.limits()));
    let orchestrator = Arc::new(HealingOrchestrator::new(
        store,
        Arc::new(StandardEstimator::new()),
        OptionalNotificationPublisher::none(),
    ));
    let api = HealingApi::new(orchestrator, policy);

    let disruption_id = api.inject_disruption(input)?;
    let report = api.heal(&disruption_id)?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
