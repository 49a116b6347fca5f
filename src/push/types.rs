use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 推送平台
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PushVendor {
    Apns,
    WindowsPhone,
}

impl PushVendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushVendor::Apns => "apns",
            PushVendor::WindowsPhone => "windows_phone",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "apns" | "apple" => Some(PushVendor::Apns),
            "wp" | "windows_phone" | "windowsphone" => Some(PushVendor::WindowsPhone),
            _ => None,
        }
    }
}

/// 待投递的通知
///
/// 构造后不可变，重试时重发同一个实例（通常以 `Arc<Notification>` 传递）。
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Apple(AppleNotification),
    WindowsPhone(WindowsPhoneNotification),
}

impl Notification {
    pub fn vendor(&self) -> PushVendor {
        match self {
            Notification::Apple(_) => PushVendor::Apns,
            Notification::WindowsPhone(_) => PushVendor::WindowsPhone,
        }
    }

    /// 关联 ID，用于日志
    pub fn identifier(&self) -> String {
        match self {
            Notification::Apple(n) => n.identifier.clone(),
            Notification::WindowsPhone(n) => n.message_id.to_string(),
        }
    }

    /// 目标地址：APNs 为 device token，Windows Phone 为 endpoint URL
    pub fn target(&self) -> &str {
        match self {
            Notification::Apple(n) => &n.device_token,
            Notification::WindowsPhone(n) => n.endpoint_url.as_deref().unwrap_or(""),
        }
    }
}

impl From<AppleNotification> for Notification {
    fn from(n: AppleNotification) -> Self {
        Notification::Apple(n)
    }
}

impl From<WindowsPhoneNotification> for Notification {
    fn from(n: WindowsPhoneNotification) -> Self {
        Notification::WindowsPhone(n)
    }
}

/// APNs push type，对应 `apns-push-type` 头（小写）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApplePushType {
    #[default]
    Alert,
    Background,
    Voip,
    Complication,
    Fileprovider,
    Mdm,
}

impl ApplePushType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplePushType::Alert => "alert",
            ApplePushType::Background => "background",
            ApplePushType::Voip => "voip",
            ApplePushType::Complication => "complication",
            ApplePushType::Fileprovider => "fileprovider",
            ApplePushType::Mdm => "mdm",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "alert" => Some(ApplePushType::Alert),
            "background" => Some(ApplePushType::Background),
            "voip" => Some(ApplePushType::Voip),
            "complication" => Some(ApplePushType::Complication),
            "fileprovider" => Some(ApplePushType::Fileprovider),
            "mdm" => Some(ApplePushType::Mdm),
            _ => None,
        }
    }
}

/// APNs 通知
#[derive(Debug, Clone, PartialEq)]
pub struct AppleNotification {
    pub identifier: String,
    pub device_token: String,
    /// 原始 JSON payload，按原样作为请求体发送
    pub payload: String,
    /// 过期时间（epoch 秒）
    pub expiration: Option<i64>,
    pub push_type: ApplePushType,
}

impl AppleNotification {
    pub fn new(device_token: impl Into<String>, payload: &serde_json::Value) -> Self {
        Self {
            identifier: Uuid::new_v4().to_string(),
            device_token: device_token.into(),
            payload: payload.to_string(),
            expiration: None,
            push_type: ApplePushType::Alert,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn with_expiration(mut self, epoch_secs: i64) -> Self {
        self.expiration = Some(epoch_secs);
        self
    }

    pub fn with_push_type(mut self, push_type: ApplePushType) -> Self {
        self.push_type = push_type;
        self
    }
}

/// Windows Phone 批处理级别（X-NotificationClass）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum BatchingInterval {
    #[default]
    Immediate,
    Medium,
    Slow,
}

impl BatchingInterval {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "immediate" => Some(BatchingInterval::Immediate),
            "medium" => Some(BatchingInterval::Medium),
            "slow" => Some(BatchingInterval::Slow),
            _ => None,
        }
    }
}

/// Windows Phone 通知种类
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WindowsPhoneKind {
    Toast,
    Tile,
    CycleTile,
    FlipTile,
    IconicTile,
    Raw,
}

impl WindowsPhoneKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "toast" => Some(WindowsPhoneKind::Toast),
            "tile" => Some(WindowsPhoneKind::Tile),
            "cycle_tile" => Some(WindowsPhoneKind::CycleTile),
            "flip_tile" => Some(WindowsPhoneKind::FlipTile),
            "iconic_tile" => Some(WindowsPhoneKind::IconicTile),
            "raw" => Some(WindowsPhoneKind::Raw),
            _ => None,
        }
    }
}

/// Windows Phone 通知
#[derive(Debug, Clone, PartialEq)]
pub struct WindowsPhoneNotification {
    pub message_id: Uuid,
    pub endpoint_url: Option<String>,
    pub kind: WindowsPhoneKind,
    pub notification_class: Option<BatchingInterval>,
    /// 已序列化的 XML（raw 通知可以是任意文本）
    pub payload: String,
}

impl WindowsPhoneNotification {
    pub fn new(kind: WindowsPhoneKind, endpoint_url: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            endpoint_url: Some(endpoint_url.into()),
            kind,
            notification_class: None,
            payload: payload.into(),
        }
    }

    pub fn with_class(mut self, class: BatchingInterval) -> Self {
        self.notification_class = Some(class);
        self
    }

    pub fn with_message_id(mut self, message_id: Uuid) -> Self {
        self.message_id = message_id;
        self
    }

    /// endpoint 缺失或为空
    pub fn has_endpoint(&self) -> bool {
        self.endpoint_url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }
}

/// Feedback 服务上报的失效设备
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    /// 64 位小写十六进制
    pub device_token: String,
    pub timestamp: DateTime<FixedOffset>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_push_type_header_values() {
        assert_eq!(ApplePushType::Voip.as_str(), "voip");
        assert_eq!(ApplePushType::default().as_str(), "alert");
        assert_eq!(ApplePushType::from_str("Background"), Some(ApplePushType::Background));
    }

    #[test]
    fn test_apple_notification_generates_identifier() {
        let a = AppleNotification::new("aa", &json!({"aps": {"alert": "hi"}}));
        let b = AppleNotification::new("aa", &json!({"aps": {"alert": "hi"}}));
        assert_ne!(a.identifier, b.identifier);
        assert_eq!(a.payload, r#"{"aps":{"alert":"hi"}}"#);
    }

    #[test]
    fn test_windows_phone_endpoint_presence() {
        let mut n = WindowsPhoneNotification::new(WindowsPhoneKind::Raw, "http://sn1.notify.live.net/x", "<x/>");
        assert!(n.has_endpoint());
        n.endpoint_url = Some("  ".to_string());
        assert!(!n.has_endpoint());
        n.endpoint_url = None;
        assert!(!n.has_endpoint());
        assert_eq!(Notification::from(n).target(), "");
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(WindowsPhoneKind::from_str("flip-tile"), Some(WindowsPhoneKind::FlipTile));
        assert_eq!(PushVendor::from_str("WP"), Some(PushVendor::WindowsPhone));
        assert_eq!(BatchingInterval::from_str("slow"), Some(BatchingInterval::Slow));
    }
}
