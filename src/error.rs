use thiserror::Error;

use crate::push::classifier::{is_terminal_apns_status, WindowsPhoneMessageStatus};

/// 推送错误类型
#[derive(Debug, Clone, Error)]
pub enum PushError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// 网络错误（连接、超时、HTTP 传输层）
    #[error("Transport error: {0}")]
    Transport(String),
    /// TLS 握手或证书错误
    #[error("TLS error: {0}")]
    Tls(String),
    /// IO 错误
    #[error("IO error: {0}")]
    Io(String),
    /// 签名失败（APNs token）
    #[error("Signing error: {0}")]
    Signing(String),
    /// 网关返回非 2xx
    #[error("Gateway rejected notification: status={status}, body={body}")]
    Gateway { status: u16, body: String },
    /// Windows Phone 推送失败，携带解析后的状态头
    #[error("Windows Phone notification send failure: {0}")]
    WindowsPhone(WindowsPhoneMessageStatus),
    /// Windows Phone 限流（406 + Dropped）
    #[error("Throttled: {message} ({status})")]
    Throttled {
        status: WindowsPhoneMessageStatus,
        message: String,
    },
    /// 不支持的操作
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl PushError {
    /// 外部调度器是否应该重新入队
    ///
    /// 两个通道的分类表都以此为准：发送时的本地异常（传输层、签名）、
    /// APNs 非终止状态码、Windows Phone 5xx 可重试；其余不可重试。
    pub fn is_retryable(&self) -> bool {
        match self {
            PushError::Transport(_) | PushError::Tls(_) | PushError::Io(_) | PushError::Signing(_) => true,
            PushError::Gateway { status, .. } => *status != 410 && !is_terminal_apns_status(*status),
            PushError::WindowsPhone(status) => status.http_status >= 500,
            PushError::Configuration(_)
            | PushError::Throttled { .. }
            | PushError::Unsupported(_) => false,
        }
    }
}

impl From<std::io::Error> for PushError {
    fn from(err: std::io::Error) -> Self {
        PushError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for PushError {
    fn from(err: reqwest::Error) -> Self {
        PushError::Transport(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for PushError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        PushError::Signing(err.to_string())
    }
}

impl From<rustls::Error> for PushError {
    fn from(err: rustls::Error) -> Self {
        PushError::Tls(err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, PushError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_retryable() {
        assert!(PushError::Transport("connection reset".into()).is_retryable());
        assert!(PushError::Tls("handshake".into()).is_retryable());
        assert!(PushError::from(std::io::Error::other("broken pipe")).is_retryable());
        assert!(PushError::Signing("clock".into()).is_retryable());
        assert!(!PushError::Configuration("missing key".into()).is_retryable());
    }

    #[test]
    fn test_gateway_retryability_follows_status() {
        let gateway = |status| PushError::Gateway {
            status,
            body: "{\"reason\":\"BadDeviceToken\"}".into(),
        };
        for status in [400, 403, 404, 405, 410, 413] {
            assert!(!gateway(status).is_retryable(), "{}", status);
        }
        for status in [429, 500, 503] {
            assert!(gateway(status).is_retryable(), "{}", status);
        }
        assert!(gateway(400).to_string().contains("status=400"));
    }

    #[test]
    fn test_windows_phone_retryability_follows_http_status() {
        let mut status = WindowsPhoneMessageStatus::unavailable();
        assert!(PushError::WindowsPhone(status.clone()).is_retryable());

        status.http_status = 400;
        assert!(!PushError::WindowsPhone(status.clone()).is_retryable());
        assert!(!PushError::Throttled {
            status,
            message: "too many".into(),
        }
        .is_retryable());
    }

    #[test]
    fn test_unsupported_message() {
        let err = PushError::Unsupported("head insertion".into());
        assert_eq!(err.to_string(), "Unsupported operation: head insertion");
        assert!(!err.is_retryable());
    }
}
