use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Identity};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WindowsPhoneSettings;
use crate::error::{PushError, Result};
use crate::push::channel::channel_trait::PushChannel;
use crate::push::classifier::{classify_windows_phone_status, WindowsPhoneMessageStatus};
use crate::push::result::{DeliveryOutcome, SendResult};
use crate::push::types::{BatchingInterval, Notification, PushVendor, WindowsPhoneKind, WindowsPhoneNotification};

pub const WP_CONTENT_TYPE: &str = "text/xml;charset=\"utf-8\"";

/// X-NotificationClass 取值：(种类, 批处理级别) → 整数
pub fn notification_class_value(kind: WindowsPhoneKind, class: Option<BatchingInterval>) -> u8 {
    let (immediate, medium, slow) = match kind {
        WindowsPhoneKind::Toast => (2, 12, 22),
        WindowsPhoneKind::Tile
        | WindowsPhoneKind::CycleTile
        | WindowsPhoneKind::FlipTile
        | WindowsPhoneKind::IconicTile => (1, 11, 21),
        WindowsPhoneKind::Raw => (3, 13, 23),
    };

    match class.unwrap_or_default() {
        BatchingInterval::Immediate => immediate,
        BatchingInterval::Medium => medium,
        BatchingInterval::Slow => slow,
    }
}

/// X-WindowsPhone-Target 取值；raw 通知不带这个头
pub fn target_header(kind: WindowsPhoneKind) -> Option<&'static str> {
    match kind {
        WindowsPhoneKind::Toast => Some("toast"),
        WindowsPhoneKind::Tile
        | WindowsPhoneKind::CycleTile
        | WindowsPhoneKind::FlipTile
        | WindowsPhoneKind::IconicTile => Some("token"),
        WindowsPhoneKind::Raw => None,
    }
}

/// Windows Phone (MPNS) Channel
///
/// 调用方可以直接 `await` [`PushChannel::send`]，也可以用
/// [`WindowsPhoneChannel::send_with_callback`] 发起请求后立即返回，
/// 结果通过回调恰好送达一次。
pub struct WindowsPhoneChannel {
    channel_id: Uuid,
    client: RwLock<Option<Client>>,
}

impl WindowsPhoneChannel {
    pub fn new(settings: WindowsPhoneSettings) -> Result<Self> {
        let channel_id = Uuid::new_v4();

        let mut builder = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(settings.request_timeout_secs));

        if let Some(path) = &settings.client_identity_path {
            let pem = std::fs::read(path).map_err(|e| {
                PushError::Configuration(format!("Failed to read web service certificate {:?}: {}", path, e))
            })?;
            let identity = Identity::from_pem(&pem)
                .map_err(|e| PushError::Configuration(format!("Failed to parse web service certificate: {}", e)))?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| PushError::Configuration(format!("Failed to build Windows Phone HTTP client: {}", e)))?;

        info!(
            "[WP] Channel {} ready: client_certificate={}",
            channel_id,
            settings.client_identity_path.is_some()
        );

        Ok(Self {
            channel_id,
            client: RwLock::new(Some(client)),
        })
    }

    /// 发起发送后立即返回，`on_result` 在请求完成（或失败）后被调用恰好一次
    ///
    /// endpoint 缺失时不发起任何网络请求，直接以 Suppressed 回调。
    pub fn send_with_callback<F>(self: &Arc<Self>, notification: Arc<Notification>, on_result: F)
    where
        F: FnOnce(SendResult) + Send + 'static,
    {
        if let Notification::WindowsPhone(wp) = notification.as_ref() {
            if !wp.has_endpoint() {
                debug!("[WP] Notification {} has no endpoint, suppressed", wp.message_id);
                on_result(SendResult::suppressed(notification));
                return;
            }
        }

        match Handle::try_current() {
            Ok(handle) => {
                let channel = Arc::clone(self);
                handle.spawn(async move {
                    let result = channel.send(notification).await;
                    on_result(result);
                });
            }
            Err(e) => {
                error!("[WP] Channel {} has no async runtime: {}", self.channel_id, e);
                on_result(SendResult::failure(
                    notification,
                    PushError::Transport(format!("no async runtime: {}", e)),
                    true,
                ));
            }
        }
    }

    async fn post(&self, notification: &WindowsPhoneNotification, endpoint: &str) -> Result<WindowsPhoneMessageStatus> {
        let client = self
            .client
            .read()
            .clone()
            .ok_or_else(|| PushError::Transport(format!("Windows Phone channel {} is closed", self.channel_id)))?;

        let class = notification_class_value(notification.kind, notification.notification_class);

        let mut request = client
            .post(endpoint)
            .header("Content-Type", WP_CONTENT_TYPE)
            .header("X-NotificationClass", class.to_string())
            .header("X-MessageID", notification.message_id.to_string());

        if let Some(target) = target_header(notification.kind) {
            request = request.header("X-WindowsPhone-Target", target);
        }

        let response = request
            .body(notification.payload.clone().into_bytes())
            .send()
            .await?;

        Ok(WindowsPhoneMessageStatus::from_headers(
            response.status().as_u16(),
            response.headers(),
        ))
    }
}

#[async_trait]
impl PushChannel for WindowsPhoneChannel {
    async fn send(&self, notification: Arc<Notification>) -> SendResult {
        let Notification::WindowsPhone(wp) = notification.as_ref() else {
            error!(
                "[WP] Channel {} received a non-Windows Phone notification: {}",
                self.channel_id,
                notification.identifier()
            );
            return SendResult::failure(
                notification.clone(),
                PushError::Unsupported("notification was not a WindowsPhoneNotification".to_string()),
                false,
            );
        };

        let endpoint = match wp.endpoint_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url,
            _ => return SendResult::suppressed(notification.clone()),
        };

        let status = match self.post(wp, endpoint).await {
            Ok(status) => status,
            Err(e) => {
                error!(
                    channel_id = %self.channel_id,
                    notification_id = %wp.message_id,
                    target = endpoint,
                    "[WP] Send failed locally: {}",
                    e
                );
                WindowsPhoneMessageStatus::unavailable()
            }
        };

        let outcome = classify_windows_phone_status(&status, endpoint);
        match &outcome {
            DeliveryOutcome::Success => {
                debug!("[WP] Notification {} accepted ({})", wp.message_id, status);
            }
            DeliveryOutcome::Suppressed => {
                debug!("[WP] Notification {} suppressed ({})", wp.message_id, status);
            }
            DeliveryOutcome::SubscriptionExpired { .. } => {
                warn!("[WP] Subscription expired: endpoint={}, id={}", endpoint, wp.message_id);
            }
            DeliveryOutcome::RetryableFailure(e) | DeliveryOutcome::TerminalFailure(e) => {
                error!(
                    channel_id = %self.channel_id,
                    notification_id = %wp.message_id,
                    target = endpoint,
                    "[WP] Push failed: {}",
                    e
                );
            }
        }

        SendResult::new(notification.clone(), outcome)
    }

    fn vendor(&self) -> PushVendor {
        PushVendor::WindowsPhone
    }

    fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    fn close(&self) {
        if self.client.write().take().is_some() {
            debug!("[WP] Channel {} closed", self.channel_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn channel() -> Arc<WindowsPhoneChannel> {
        Arc::new(WindowsPhoneChannel::new(WindowsPhoneSettings::default()).unwrap())
    }

    fn notification(server: &MockServer, kind: WindowsPhoneKind, class: Option<BatchingInterval>) -> Arc<Notification> {
        let mut n = WindowsPhoneNotification::new(kind, format!("{}/channel/abc", server.uri()), "<wp:Notification/>");
        n.notification_class = class;
        Arc::new(n.into())
    }

    fn wp_response(status: u16, notification: &str, subscription: &str) -> ResponseTemplate {
        ResponseTemplate::new(status)
            .insert_header("X-NotificationStatus", notification)
            .insert_header("X-SubscriptionStatus", subscription)
            .insert_header("X-DeviceConnectionStatus", "Connected")
    }

    #[test]
    fn test_notification_class_table() {
        use BatchingInterval::*;
        use WindowsPhoneKind::*;

        assert_eq!(notification_class_value(Toast, Some(Medium)), 12);
        assert_eq!(notification_class_value(Tile, Some(Slow)), 21);
        assert_eq!(notification_class_value(Raw, None), 3);
        assert_eq!(notification_class_value(Toast, None), 2);
        assert_eq!(notification_class_value(FlipTile, Some(Immediate)), 1);
        assert_eq!(notification_class_value(IconicTile, Some(Medium)), 11);
        assert_eq!(notification_class_value(CycleTile, Some(Slow)), 21);
        assert_eq!(notification_class_value(Raw, Some(Slow)), 23);
        assert_eq!(notification_class_value(Raw, Some(Medium)), 13);

        assert_eq!(target_header(Toast), Some("toast"));
        assert_eq!(target_header(FlipTile), Some("token"));
        assert_eq!(target_header(Raw), None);
    }

    #[tokio::test]
    async fn test_toast_medium_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channel/abc"))
            .and(header("X-NotificationClass", "12"))
            .and(header("X-WindowsPhone-Target", "toast"))
            .and(header("Content-Type", WP_CONTENT_TYPE))
            .and(body_string("<wp:Notification/>"))
            .respond_with(wp_response(200, "Received", "Active"))
            .expect(1)
            .mount(&server)
            .await;

        let n = notification(&server, WindowsPhoneKind::Toast, Some(BatchingInterval::Medium));
        let result = channel().send(n.clone()).await;
        assert!(result.is_success(), "{:?}", result.outcome);

        let requests = server.received_requests().await.unwrap();
        let message_id = requests[0].headers.get("X-MessageID").unwrap().to_str().unwrap().to_string();
        assert_eq!(message_id, n.identifier());
    }

    #[tokio::test]
    async fn test_tile_slow_and_raw_default() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(wp_response(200, "Received", "Active"))
            .mount(&server)
            .await;

        let channel = channel();
        assert!(channel
            .send(notification(&server, WindowsPhoneKind::Tile, Some(BatchingInterval::Slow)))
            .await
            .is_success());
        assert!(channel
            .send(notification(&server, WindowsPhoneKind::Raw, None))
            .await
            .is_success());

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests[0].headers.get("X-NotificationClass").unwrap(), "21");
        assert_eq!(requests[0].headers.get("X-WindowsPhone-Target").unwrap(), "token");
        assert_eq!(requests[1].headers.get("X-NotificationClass").unwrap(), "3");
        assert!(requests[1].headers.get("X-WindowsPhone-Target").is_none());
    }

    #[tokio::test]
    async fn test_response_classification() {
        let cases = [
            (200, "Suppressed", "Active", "suppressed"),
            (200, "Dropped", "Active", "success"),
            (412, "Dropped", "Active", "suppressed"),
            (406, "Dropped", "Active", "terminal_failure"),
            (404, "Dropped", "Expired", "subscription_expired"),
            (400, "Dropped", "Active", "terminal_failure"),
            (503, "QueueFull", "Active", "retryable_failure"),
        ];

        for (status, notification_status, subscription, expected) in cases {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(wp_response(status, notification_status, subscription))
                .mount(&server)
                .await;

            let n = notification(&server, WindowsPhoneKind::Toast, None);
            let result = channel().send(n.clone()).await;
            assert_eq!(result.outcome.as_str(), expected, "{} {}", status, notification_status);

            if expected == "subscription_expired" {
                assert_eq!(result.expired_subscription_id(), Some(n.target()));
            }
        }
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_suppressed_without_io() {
        let server = MockServer::start().await;
        let mut wp = WindowsPhoneNotification::new(WindowsPhoneKind::Toast, "", "<x/>");
        wp.endpoint_url = None;
        let n = Arc::new(Notification::from(wp));

        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();
        let counter = calls.clone();
        channel().send_with_callback(n, move |result| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(result);
        });

        // 回调在 send_with_callback 返回前已经完成
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(rx.await.unwrap().is_suppressed());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_callback_fires_once_on_connection_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let n = Arc::new(Notification::from(WindowsPhoneNotification::new(
            WindowsPhoneKind::Raw,
            format!("http://127.0.0.1:{}/channel", port),
            "payload",
        )));

        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();
        let counter = calls.clone();
        channel().send_with_callback(n, move |result| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(result);
        });

        let result = tokio::time::timeout(Duration::from_secs(10), rx).await.unwrap().unwrap();
        assert!(!result.is_success());
        assert!(result.should_retry());
        match result.error() {
            Some(PushError::WindowsPhone(status)) => assert_eq!(status.http_status, 503),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_callback_delivers_async_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(wp_response(200, "Received", "Active"))
            .mount(&server)
            .await;

        let (tx, rx) = oneshot::channel();
        channel().send_with_callback(notification(&server, WindowsPhoneKind::FlipTile, None), move |result| {
            let _ = tx.send(result);
        });

        assert!(rx.await.unwrap().is_success());
    }
}
