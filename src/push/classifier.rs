//! 投递结果分类表
//!
//! 两个通道各自有一张固定的决策表，把协议相关的信号（HTTP 状态码、响应头）
//! 映射到统一的 [`DeliveryOutcome`]。这里只有纯函数，不做任何 IO。

use std::fmt;

use chrono::Utc;
use reqwest::header::HeaderMap;
use uuid::Uuid;

use crate::error::PushError;
use crate::push::result::DeliveryOutcome;

/// APNs 明确拒绝、重发也不会成功的状态码
const APNS_TERMINAL_STATUSES: [u16; 5] = [400, 403, 404, 405, 413];

pub const WP_THROTTLED_MESSAGE: &str = "This error occurs when an unauthenticated cloud service has reached the per-day throttling limit for a subscription, or when a cloud service (authenticated or unauthenticated) has sent too many notifications per second.";

pub fn is_terminal_apns_status(status: u16) -> bool {
    APNS_TERMINAL_STATUSES.contains(&status)
}

/// APNs 响应分类
///
/// | status | outcome |
/// |---|---|
/// | 2xx | Success |
/// | 410 + delete_token_on_gone | SubscriptionExpired(device_token) |
/// | 410 | TerminalFailure |
/// | 400/403/404/405/413 | TerminalFailure |
/// | 其他 | RetryableFailure |
pub fn classify_apns_status(
    status: u16,
    body: &str,
    device_token: &str,
    delete_token_on_gone: bool,
) -> DeliveryOutcome {
    if (200..300).contains(&status) {
        return DeliveryOutcome::Success;
    }

    if status == 410 && delete_token_on_gone {
        return DeliveryOutcome::SubscriptionExpired {
            subscription_id: device_token.to_string(),
            expired_at: Utc::now(),
        };
    }

    failure(gateway_error(status, body))
}

/// 按 [`PushError::is_retryable`] 分成可重试/终止失败
pub fn failure(error: PushError) -> DeliveryOutcome {
    if error.is_retryable() {
        DeliveryOutcome::RetryableFailure(error)
    } else {
        DeliveryOutcome::TerminalFailure(error)
    }
}

fn gateway_error(status: u16, body: &str) -> PushError {
    PushError::Gateway {
        status,
        body: if body.is_empty() {
            "No response body".to_string()
        } else {
            body.to_string()
        },
    }
}

/// 从 APNs 错误体 `{"reason": "..."}` 中取出原因
pub fn apns_reason(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("reason")?
        .as_str()
        .map(str::to_string)
}

/// X-NotificationStatus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WpNotificationStatus {
    Received,
    Dropped,
    QueueFull,
    Suppressed,
    NotAvailable,
}

/// X-SubscriptionStatus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WpSubscriptionStatus {
    Active,
    Expired,
    NotAvailable,
}

/// X-DeviceConnectionStatus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WpDeviceConnectionStatus {
    Connected,
    InActive,
    Disconnected,
    TempDisconnected,
    NotAvailable,
}

impl WpNotificationStatus {
    fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("received") => WpNotificationStatus::Received,
            Some("dropped") => WpNotificationStatus::Dropped,
            Some("queuefull") => WpNotificationStatus::QueueFull,
            Some("suppressed") => WpNotificationStatus::Suppressed,
            _ => WpNotificationStatus::NotAvailable,
        }
    }
}

impl WpSubscriptionStatus {
    fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("active") => WpSubscriptionStatus::Active,
            Some("expired") => WpSubscriptionStatus::Expired,
            _ => WpSubscriptionStatus::NotAvailable,
        }
    }
}

impl WpDeviceConnectionStatus {
    fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("connected") => WpDeviceConnectionStatus::Connected,
            Some("inactive") => WpDeviceConnectionStatus::InActive,
            Some("disconnected") => WpDeviceConnectionStatus::Disconnected,
            Some("tempdisconnected") => WpDeviceConnectionStatus::TempDisconnected,
            _ => WpDeviceConnectionStatus::NotAvailable,
        }
    }
}

/// Windows Phone 推送服务返回的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowsPhoneMessageStatus {
    pub message_id: Option<Uuid>,
    pub http_status: u16,
    pub notification_status: WpNotificationStatus,
    pub subscription_status: WpSubscriptionStatus,
    pub device_connection_status: WpDeviceConnectionStatus,
}

impl WindowsPhoneMessageStatus {
    /// 没有拿到响应时的状态：全部 NotAvailable，HTTP 状态按 503 处理
    pub fn unavailable() -> Self {
        Self {
            message_id: None,
            http_status: 503,
            notification_status: WpNotificationStatus::NotAvailable,
            subscription_status: WpSubscriptionStatus::NotAvailable,
            device_connection_status: WpDeviceConnectionStatus::NotAvailable,
        }
    }

    pub fn from_headers(http_status: u16, headers: &HeaderMap) -> Self {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        Self {
            message_id: header("X-MessageID").and_then(|v| Uuid::parse_str(v.trim()).ok()),
            http_status,
            notification_status: WpNotificationStatus::parse(header("X-NotificationStatus")),
            subscription_status: WpSubscriptionStatus::parse(header("X-SubscriptionStatus")),
            device_connection_status: WpDeviceConnectionStatus::parse(header("X-DeviceConnectionStatus")),
        }
    }
}

impl fmt::Display for WindowsPhoneMessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "http={}, notification={:?}, subscription={:?}, device={:?}",
            self.http_status, self.notification_status, self.subscription_status, self.device_connection_status
        )?;
        if let Some(id) = self.message_id {
            write!(f, ", message_id={}", id)?;
        }
        Ok(())
    }
}

/// Windows Phone 响应分类
///
/// 订阅过期优先于一切；200 + Dropped 视为已确认（接收后尽力投递）；
/// 412 + Dropped 表示设备离线，网关稍后会恢复，按 Suppressed 处理。
/// 其余情况为失败；5xx（包括本地异常时默认的 503）允许重试。
pub fn classify_windows_phone_status(status: &WindowsPhoneMessageStatus, endpoint_url: &str) -> DeliveryOutcome {
    use WpNotificationStatus::*;

    if status.subscription_status == WpSubscriptionStatus::Expired {
        return DeliveryOutcome::SubscriptionExpired {
            subscription_id: endpoint_url.to_string(),
            expired_at: Utc::now(),
        };
    }

    match (status.http_status, status.notification_status) {
        (200, Received) | (200, Dropped) => DeliveryOutcome::Success,
        (200, Suppressed) | (412, Dropped) => DeliveryOutcome::Suppressed,
        (406, Dropped) => DeliveryOutcome::TerminalFailure(PushError::Throttled {
            status: status.clone(),
            message: WP_THROTTLED_MESSAGE.to_string(),
        }),
        _ => failure(PushError::WindowsPhone(status.clone())),
    }
}
