// ==========================================
// 机组排班自愈系统 - 引擎层通知发布
// ==========================================
// 职责: 定义排班变更通知 trait，实现依赖倒置
// 说明: Engine 层只产出通知，投递（邮件/短信/推送）由外部协作方实现
// ==========================================

use crate::domain::candidate::AssignmentDiff;
use crate::domain::types::FlightStatus;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;

// ==========================================
// 通知类型
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    /// 机组变更
    Reassigned,
    /// 航班推迟
    Delayed,
    /// 航班取消
    Cancelled,
}

impl NotificationKind {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationKind::Reassigned => "Reassigned",
            NotificationKind::Delayed => "Delayed",
            NotificationKind::Cancelled => "Cancelled",
        }
    }
}

/// 排班变更通知
///
/// 提交成功后按航班逐条发出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterNotification {
    /// 航班 ID
    pub flight_id: String,
    /// 变更说明
    pub change_description: String,
    /// 通知类型
    pub kind: NotificationKind,
    /// 提交后的快照版本
    pub roster_version: u64,
}

impl RosterNotification {
    /// 由已提交差异生成通知（每个航班变更一条）
    pub fn from_diff(diff: &AssignmentDiff, roster_version: u64) -> Vec<Self> {
        diff.flight_changes
            .iter()
            .map(|change| {
                let (kind, change_description) = if change.new_status == FlightStatus::Cancelled {
                    (NotificationKind::Cancelled, "航班已取消".to_string())
                } else if change.added_delay_minutes > 0 {
                    (
                        NotificationKind::Delayed,
                        format!(
                            "航班推迟 {} 分钟，新起飞时间 {}",
                            change.added_delay_minutes,
                            change.new_departure.format("%Y-%m-%d %H:%M")
                        ),
                    )
                } else {
                    (
                        NotificationKind::Reassigned,
                        format!(
                            "机组调整: {} -> {}",
                            change.expected_pilot_id.as_deref().unwrap_or("-"),
                            change.new_pilot_id.as_deref().unwrap_or("-")
                        ),
                    )
                };
                RosterNotification {
                    flight_id: change.flight_id.clone(),
                    change_description,
                    kind,
                    roster_version,
                }
            })
            .collect()
    }
}

// ==========================================
// 通知发布 Trait
// ==========================================

/// 排班通知发布者 Trait
///
/// Engine 层定义，通知协作方实现
pub trait NotificationPublisher: Send + Sync {
    /// 发布通知
    ///
    /// # 返回
    /// - `Ok(message_id)`: 消息 ID（如果支持）或空字符串
    /// - `Err`: 发布失败（不影响已完成的提交）
    fn publish(&self, notification: RosterNotification) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// 空操作通知发布者
///
/// 用于不需要通知的场景（如单元测试）
#[derive(Debug, Clone, Default)]
pub struct NoOpNotificationPublisher;

impl NotificationPublisher for NoOpNotificationPublisher {
    fn publish(&self, notification: RosterNotification) -> Result<String, Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpNotificationPublisher: 跳过通知 - flight_id={}, kind={}",
            notification.flight_id,
            notification.kind.as_str()
        );
        Ok(String::new())
    }
}

/// 可选的通知发布者包装
///
/// 简化 Option<Arc<dyn NotificationPublisher>> 的使用
#[derive(Clone)]
pub struct OptionalNotificationPublisher {
    inner: Option<Arc<dyn NotificationPublisher>>,
}

impl OptionalNotificationPublisher {
    /// 创建带发布者的实例
    pub fn with_publisher(publisher: Arc<dyn NotificationPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    /// 创建空实例（不发布通知）
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 发布通知（如果有发布者）
    pub fn publish(&self, notification: RosterNotification) -> Result<String, Box<dyn Error + Send + Sync>> {
        match &self.inner {
            Some(publisher) => publisher.publish(notification),
            None => {
                tracing::debug!(
                    "OptionalNotificationPublisher: 未配置发布者，跳过通知 - flight_id={}",
                    notification.flight_id
                );
                Ok(String::new())
            }
        }
    }

    /// 检查是否配置了发布者
    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalNotificationPublisher {
    fn default() -> Self {
        Self::none()
    }
}
