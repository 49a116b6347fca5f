use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::debug;

use crate::error::{PushError, Result};

/// APNs 要求 token 有效期在 20~60 分钟之间，这里取 50 分钟
pub const TOKEN_VALIDITY_MINUTES: i64 = 50;

/// 已签发的 APNs provider token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Serialize)]
struct ProviderClaims<'a> {
    iss: &'a str,
    iat: i64,
}

/// ES256 签名器：`{alg, kid}` + `{iss, iat}`
pub struct ApnsTokenSigner {
    key_id: String,
    team_id: String,
    key: EncodingKey,
}

impl ApnsTokenSigner {
    /// `private_key_pem` 为 PKCS#8 PEM（.p8 文件内容）
    pub fn from_pem(key_id: impl Into<String>, team_id: impl Into<String>, private_key_pem: &[u8]) -> Result<Self> {
        let key = EncodingKey::from_ec_pem(private_key_pem)
            .map_err(|e| PushError::Configuration(format!("Failed to parse APNs private key: {}", e)))?;

        Ok(Self {
            key_id: key_id.into(),
            team_id: team_id.into(),
            key,
        })
    }

    pub fn sign(&self, issued_at: DateTime<Utc>) -> Result<String> {
        let mut header = Header::new(Algorithm::ES256);
        header.typ = None;
        header.kid = Some(self.key_id.clone());

        let claims = ProviderClaims {
            iss: &self.team_id,
            iat: issued_at.timestamp(),
        };

        Ok(encode(&header, &claims, &self.key)?)
    }
}

/// 单个通道独占的 token 缓存
///
/// 快路径只拿读锁；过期时进入签名临界区后再检查一次，
/// 同一时刻多个发送方只会触发一次签名。
#[derive(Debug, Default)]
pub struct AuthTokenCache {
    current: RwLock<Option<AuthToken>>,
    signing: Mutex<()>,
}

impl AuthTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_refresh<F>(&self, now: DateTime<Utc>, sign: F) -> Result<AuthToken>
    where
        F: FnOnce(DateTime<Utc>) -> Result<String>,
    {
        if let Some(token) = self.valid_token(now) {
            return Ok(token);
        }

        let _guard = self.signing.lock();

        // 等锁期间可能已被其他发送方刷新
        if let Some(token) = self.valid_token(now) {
            return Ok(token);
        }

        let token = AuthToken {
            value: sign(now)?,
            expires_at: now + Duration::minutes(TOKEN_VALIDITY_MINUTES),
        };
        debug!("[APNs] Signed new provider token, expires_at={}", token.expires_at);

        *self.current.write() = Some(token.clone());
        Ok(token)
    }

    pub fn current(&self) -> Option<AuthToken> {
        self.current.read().clone()
    }

    fn valid_token(&self, now: DateTime<Utc>) -> Option<AuthToken> {
        self.current
            .read()
            .as_ref()
            .filter(|t| t.is_valid_at(now))
            .cloned()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use jsonwebtoken::{decode, DecodingKey, Validation};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    pub(crate) const TEST_PRIVATE_KEY: &str =
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/apns-auth-key.p8"));
    const TEST_PUBLIC_KEY: &str =
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/apns-auth-key.pub.pem"));

    #[derive(Debug, serde::Deserialize)]
    struct Claims {
        iss: String,
        iat: i64,
    }

    #[test]
    fn test_signed_token_layout() {
        let signer = ApnsTokenSigner::from_pem("KEY123", "TEAM456", TEST_PRIVATE_KEY.as_bytes()).unwrap();
        let issued_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let token = signer.sign(issued_at).unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 3);

        let header = URL_SAFE_NO_PAD.decode(parts[0]).unwrap();
        assert_eq!(String::from_utf8(header).unwrap(), r#"{"alg":"ES256","kid":"KEY123"}"#);
        let payload = URL_SAFE_NO_PAD.decode(parts[1]).unwrap();
        assert_eq!(String::from_utf8(payload).unwrap(), r#"{"iss":"TEAM456","iat":1700000000}"#);

        let mut validation = Validation::new(Algorithm::ES256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        let key = DecodingKey::from_ec_pem(TEST_PUBLIC_KEY.as_bytes()).unwrap();
        let decoded = decode::<Claims>(&token, &key, &validation).unwrap();
        assert_eq!(decoded.claims.iss, "TEAM456");
        assert_eq!(decoded.claims.iat, 1_700_000_000);
    }

    #[test]
    fn test_invalid_key_is_configuration_error() {
        let result = ApnsTokenSigner::from_pem("K", "T", b"not a key");
        assert!(matches!(result, Err(PushError::Configuration(_))));
    }

    #[test]
    fn test_cache_reuses_until_expiry() {
        let cache = AuthTokenCache::new();
        let signed = AtomicUsize::new(0);
        let sign = |_: DateTime<Utc>| -> Result<String> {
            let n = signed.fetch_add(1, Ordering::SeqCst);
            Ok(format!("token-{}", n))
        };

        let t0 = Utc::now();
        let first = cache.get_or_refresh(t0, sign).unwrap();
        let again = cache.get_or_refresh(t0 + Duration::minutes(49), sign).unwrap();
        assert_eq!(first, again);
        assert_eq!(signed.load(Ordering::SeqCst), 1);

        let refreshed = cache.get_or_refresh(t0 + Duration::minutes(50), sign).unwrap();
        assert_eq!(refreshed.value, "token-1");
        assert_eq!(signed.load(Ordering::SeqCst), 2);
        assert_eq!(cache.current(), Some(refreshed));
    }

    #[test]
    fn test_concurrent_refresh_signs_once() {
        let cache = Arc::new(AuthTokenCache::new());
        let signed = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));
        let now = Utc::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let signed = signed.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_refresh(now, |_| {
                            let n = signed.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(std::time::Duration::from_millis(20));
                            Ok(format!("token-{}", n))
                        })
                        .unwrap()
                })
            })
            .collect();

        let tokens: Vec<AuthToken> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(signed.load(Ordering::SeqCst), 1);
        assert!(tokens.iter().all(|t| t.value == "token-0"));
    }

    #[test]
    fn test_sign_failure_leaves_cache_empty() {
        let cache = AuthTokenCache::new();
        let result = cache.get_or_refresh(Utc::now(), |_| Err(PushError::Signing("boom".into())));
        assert!(result.is_err());
        assert!(cache.current().is_none());
    }
}
