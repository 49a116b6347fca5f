use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use reqwest::{Client, Identity};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ApnsAuth, ApnsSettings};
use crate::error::{PushError, Result};
use crate::push::channel::apns_token::{ApnsTokenSigner, AuthTokenCache};
use crate::push::channel::channel_trait::PushChannel;
use crate::push::classifier::{apns_reason, classify_apns_status};
use crate::push::result::{DeliveryOutcome, SendResult};
use crate::push::types::{AppleNotification, ApplePushType, Notification, PushVendor};

/// APNs (Apple Push Notification service) Channel
///
/// 使用 APNs HTTP/2 API（`POST /3/device/{token}`），支持 token（ES256）和证书两种认证。
/// 同一个实例可以被多个 worker 并发调用，唯一共享的可变状态是 token 缓存。
pub struct ApnsChannel {
    channel_id: Uuid,
    settings: ApnsSettings,
    base_url: String,
    client: RwLock<Option<Client>>,
    signer: Option<ApnsTokenSigner>,
    token_cache: AuthTokenCache,
}

impl ApnsChannel {
    /// 创建新的 APNs Channel
    ///
    /// 证书模式下客户端证书在 TLS 握手时提交；token 模式下首次发送时才签发 token。
    pub fn new(settings: ApnsSettings) -> Result<Self> {
        let channel_id = Uuid::new_v4();
        debug!("[APNs] Creating channel instance {}", channel_id);

        let mut builder = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(settings.request_timeout_secs));

        let signer = match &settings.auth {
            ApnsAuth::Token {
                key_id,
                team_id,
                private_key_path,
                private_key_pem,
            } => {
                let pem = match (private_key_pem, private_key_path) {
                    (Some(pem), _) => pem.clone().into_bytes(),
                    (None, Some(path)) => std::fs::read(path).map_err(|e| {
                        PushError::Configuration(format!("Failed to read APNs private key {:?}: {}", path, e))
                    })?,
                    (None, None) => {
                        return Err(PushError::Configuration(
                            "APNs token auth requires a private key".to_string(),
                        ))
                    }
                };
                Some(ApnsTokenSigner::from_pem(key_id.clone(), team_id.clone(), &pem)?)
            }
            ApnsAuth::Certificate { identity_path } => {
                let pem = std::fs::read(identity_path).map_err(|e| {
                    PushError::Configuration(format!("Failed to read APNs certificate {:?}: {}", identity_path, e))
                })?;
                let identity = Identity::from_pem(&pem)
                    .map_err(|e| PushError::Configuration(format!("Failed to parse APNs certificate: {}", e)))?;
                builder = builder.identity(identity);
                None
            }
        };

        let client = builder
            .build()
            .map_err(|e| PushError::Configuration(format!("Failed to build APNs HTTP client: {}", e)))?;

        info!(
            "[APNs] Channel {} ready: host={}:{}, bundle_id={}, token_auth={}",
            channel_id,
            settings.host,
            settings.port,
            settings.bundle_id,
            signer.is_some()
        );

        Ok(Self {
            channel_id,
            base_url: settings.base_url(),
            settings,
            client: RwLock::new(Some(client)),
            signer,
            token_cache: AuthTokenCache::new(),
        })
    }

    /// `apns-topic`：voip 推送需要 `.voip` 后缀
    pub fn topic_for(&self, push_type: ApplePushType) -> String {
        match push_type {
            ApplePushType::Voip => format!("{}.voip", self.settings.bundle_id),
            _ => self.settings.bundle_id.clone(),
        }
    }

    /// 当前可用的 bearer token；证书模式返回 None
    fn bearer_token(&self) -> Result<Option<String>> {
        let Some(signer) = &self.signer else {
            return Ok(None);
        };

        let token = self.token_cache.get_or_refresh(Utc::now(), |now| signer.sign(now))?;
        Ok(Some(token.value))
    }

    async fn post(&self, notification: &AppleNotification) -> Result<(u16, String)> {
        let client = self
            .client
            .read()
            .clone()
            .ok_or_else(|| PushError::Transport(format!("APNs channel {} is closed", self.channel_id)))?;

        let url = format!("{}/3/device/{}", self.base_url, notification.device_token);

        let mut request = client
            .post(&url)
            .header("apns-push-type", notification.push_type.as_str())
            .header("apns-topic", self.topic_for(notification.push_type))
            .header("content-type", "application/json");

        if let Some(expiration) = notification.expiration {
            request = request.header("apns-expiration", expiration.to_string());
        }
        if let Some(token) = self.bearer_token()? {
            request = request.header("authorization", format!("bearer {}", token));
        }

        let response = request.body(notification.payload.clone()).send().await?;

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    "[APNs] Failed to read response body: channel={}, id={}, status={}, error={}",
                    self.channel_id, notification.identifier, status, e
                );
                format!("<unreadable response body: {}>", e)
            }
        };
        Ok((status, body))
    }
}

#[async_trait]
impl PushChannel for ApnsChannel {
    async fn send(&self, notification: Arc<Notification>) -> SendResult {
        let Notification::Apple(apple) = notification.as_ref() else {
            error!(
                "[APNs] Channel {} received a non-Apple notification: {}",
                self.channel_id,
                notification.identifier()
            );
            return SendResult::failure(
                notification.clone(),
                PushError::Unsupported("notification was not an AppleNotification".to_string()),
                false,
            );
        };

        match self.post(apple).await {
            Ok((status, body)) => {
                let outcome = classify_apns_status(status, &body, &apple.device_token, self.settings.delete_token_on_gone);

                match &outcome {
                    DeliveryOutcome::Success => {
                        debug!(
                            "[APNs] Push sent successfully: channel={}, id={}",
                            self.channel_id, apple.identifier
                        );
                    }
                    DeliveryOutcome::SubscriptionExpired { .. } => {
                        warn!(
                            "[APNs] Device token no longer available: channel={}, id={}, token={}",
                            self.channel_id, apple.identifier, apple.device_token
                        );
                    }
                    _ => {
                        let reason = apns_reason(&body);
                        error!(
                            channel_id = %self.channel_id,
                            notification_id = %apple.identifier,
                            target = %apple.device_token,
                            reason = reason.as_deref().unwrap_or("-"),
                            "Error during APNS Send with channel {}: {} -> Code {} - {}",
                            self.channel_id,
                            apple.identifier,
                            status,
                            if body.is_empty() { "No response body" } else { body.as_str() }
                        );
                    }
                }

                SendResult::new(notification, outcome)
            }
            Err(e) => {
                error!(
                    channel_id = %self.channel_id,
                    notification_id = %apple.identifier,
                    target = %apple.device_token,
                    "Exception during APNS Send with channel {}: {} -> {}",
                    self.channel_id,
                    apple.identifier,
                    e
                );
                SendResult::failure(notification, e, true)
            }
        }
    }

    fn vendor(&self) -> PushVendor {
        PushVendor::Apns
    }

    fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    fn close(&self) {
        if self.client.write().take().is_some() {
            debug!("[APNs] Channel {} closed", self.channel_id);
        }
    }
}
