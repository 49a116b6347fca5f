use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::PushError;
use crate::push::types::Notification;

/// 投递结果分类
///
/// 所有通道都归一到这五种结果，外部调度器据此统一决定重试、丢弃或注销设备。
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    /// 网关已接收
    Success,
    /// 网关有意丢弃或延后投递，不是错误
    Suppressed,
    /// 设备订阅失效，调度器应注销 `subscription_id`
    SubscriptionExpired {
        subscription_id: String,
        expired_at: DateTime<Utc>,
    },
    /// 可重试失败
    RetryableFailure(PushError),
    /// 永久失败，不应重试
    TerminalFailure(PushError),
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Success => "success",
            DeliveryOutcome::Suppressed => "suppressed",
            DeliveryOutcome::SubscriptionExpired { .. } => "subscription_expired",
            DeliveryOutcome::RetryableFailure(_) => "retryable_failure",
            DeliveryOutcome::TerminalFailure(_) => "terminal_failure",
        }
    }
}

/// 单条通知的发送结果
#[derive(Debug, Clone)]
pub struct SendResult {
    pub notification: Arc<Notification>,
    pub outcome: DeliveryOutcome,
}

impl SendResult {
    pub fn new(notification: Arc<Notification>, outcome: DeliveryOutcome) -> Self {
        Self {
            notification,
            outcome,
        }
    }

    pub fn success(notification: Arc<Notification>) -> Self {
        Self::new(notification, DeliveryOutcome::Success)
    }

    pub fn suppressed(notification: Arc<Notification>) -> Self {
        Self::new(notification, DeliveryOutcome::Suppressed)
    }

    pub fn subscription_expired(notification: Arc<Notification>, subscription_id: impl Into<String>) -> Self {
        Self::new(
            notification,
            DeliveryOutcome::SubscriptionExpired {
                subscription_id: subscription_id.into(),
                expired_at: Utc::now(),
            },
        )
    }

    pub fn failure(notification: Arc<Notification>, error: PushError, should_retry: bool) -> Self {
        let outcome = if should_retry {
            DeliveryOutcome::RetryableFailure(error)
        } else {
            DeliveryOutcome::TerminalFailure(error)
        };
        Self::new(notification, outcome)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Success)
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Suppressed)
    }

    pub fn should_retry(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::RetryableFailure(_))
    }

    pub fn is_subscription_expired(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::SubscriptionExpired { .. })
    }

    pub fn expired_subscription_id(&self) -> Option<&str> {
        match &self.outcome {
            DeliveryOutcome::SubscriptionExpired { subscription_id, .. } => Some(subscription_id),
            _ => None,
        }
    }

    pub fn expiry_timestamp(&self) -> Option<DateTime<Utc>> {
        match &self.outcome {
            DeliveryOutcome::SubscriptionExpired { expired_at, .. } => Some(*expired_at),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&PushError> {
        match &self.outcome {
            DeliveryOutcome::RetryableFailure(e) | DeliveryOutcome::TerminalFailure(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::types::{WindowsPhoneKind, WindowsPhoneNotification};

    fn notification() -> Arc<Notification> {
        Arc::new(
            WindowsPhoneNotification::new(WindowsPhoneKind::Toast, "http://example.invalid/ch", "<x/>").into(),
        )
    }

    #[test]
    fn test_exactly_one_characterisation() {
        let results = vec![
            SendResult::success(notification()),
            SendResult::suppressed(notification()),
            SendResult::subscription_expired(notification(), "http://example.invalid/ch"),
            SendResult::failure(notification(), PushError::Transport("reset".into()), true),
            SendResult::failure(notification(), PushError::Gateway { status: 400, body: String::new() }, false),
        ];

        for r in &results {
            let flags = [
                r.is_success(),
                r.is_suppressed(),
                r.is_subscription_expired(),
                r.should_retry(),
            ];
            assert!(flags.iter().filter(|f| **f).count() <= 1, "{}", r.outcome.as_str());
        }

        assert!(results[1].error().is_none());
        assert_eq!(results[2].expired_subscription_id(), Some("http://example.invalid/ch"));
        assert!(results[2].expiry_timestamp().is_some());
        assert!(results[4].error().is_some());
        assert!(!results[4].should_retry());
    }
}
