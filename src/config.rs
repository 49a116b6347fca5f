use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cli::Cli;

pub const APNS_PRODUCTION_HOST: &str = "api.push.apple.com";
pub const APNS_SANDBOX_HOST: &str = "api.sandbox.push.apple.com";
pub const APNS_FEEDBACK_HOST: &str = "feedback.push.apple.com";
pub const APNS_SANDBOX_FEEDBACK_HOST: &str = "feedback.sandbox.push.apple.com";

/// 推送配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub logging: LoggingConfig,
    pub apns: Option<ApnsSettings>,
    pub windows_phone: Option<WindowsPhoneSettings>,
    pub feedback: Option<FeedbackSettings>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// compact / pretty / json
    pub format: Option<String>,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: None,
            file: None,
        }
    }
}

/// APNs 认证方式
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ApnsAuth {
    /// ES256 签名 token（.p8 私钥）
    Token {
        key_id: String,
        team_id: String,
        #[serde(default)]
        private_key_path: Option<PathBuf>,
        /// PKCS#8 PEM，优先于 private_key_path
        #[serde(default)]
        private_key_pem: Option<String>,
    },
    /// TLS 客户端证书（PEM，证书和私钥在同一个文件）
    Certificate { identity_path: PathBuf },
}

/// APNs 通道配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApnsSettings {
    #[serde(default = "default_apns_host")]
    pub host: String,
    #[serde(default = "default_https_port")]
    pub port: u16,
    /// 关闭后使用明文 HTTP（本地网关/测试）
    #[serde(default = "default_true")]
    pub tls: bool,
    pub bundle_id: String,
    pub auth: ApnsAuth,
    /// 410 时上报订阅过期
    #[serde(default)]
    pub delete_token_on_gone: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl ApnsSettings {
    pub fn new(bundle_id: impl Into<String>, auth: ApnsAuth) -> Self {
        Self {
            host: default_apns_host(),
            port: default_https_port(),
            tls: true,
            bundle_id: bundle_id.into(),
            auth,
            delete_token_on_gone: false,
            request_timeout_secs: default_request_timeout(),
        }
    }

    pub fn sandbox(mut self) -> Self {
        self.host = APNS_SANDBOX_HOST.to_string();
        self
    }

    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bundle_id.trim().is_empty() {
            bail!("apns.bundle_id 不能为空");
        }
        match &self.auth {
            ApnsAuth::Token {
                key_id,
                team_id,
                private_key_path,
                private_key_pem,
            } => {
                if key_id.is_empty() || team_id.is_empty() {
                    bail!("apns token 认证需要 key_id 和 team_id");
                }
                if private_key_path.is_none() && private_key_pem.is_none() {
                    bail!("apns token 认证需要 private_key_path 或 private_key_pem");
                }
            }
            ApnsAuth::Certificate { identity_path } => {
                if identity_path.as_os_str().is_empty() {
                    bail!("apns 证书认证需要 identity_path");
                }
            }
        }
        Ok(())
    }
}

/// Windows Phone 通道配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowsPhoneSettings {
    /// Web service 客户端证书（PEM，证书和私钥在同一个文件）
    #[serde(default)]
    pub client_identity_path: Option<PathBuf>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for WindowsPhoneSettings {
    fn default() -> Self {
        Self {
            client_identity_path: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// APNs Feedback 服务配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackSettings {
    #[serde(default = "default_feedback_host")]
    pub host: String,
    #[serde(default = "default_feedback_port")]
    pub port: u16,
    pub certificate_path: PathBuf,
    pub private_key_path: PathBuf,
    /// 额外信任的 CA（PEM）
    #[serde(default)]
    pub ca_path: Option<PathBuf>,
    /// false 时时间戳转换为本地时区
    #[serde(default)]
    pub feedback_time_is_utc: bool,
    #[serde(default = "default_feedback_initial_delay")]
    pub initial_delay_secs: u64,
    /// 0 表示只运行一次
    #[serde(default = "default_feedback_interval")]
    pub interval_minutes: u64,
}

impl FeedbackSettings {
    pub fn new(certificate_path: impl Into<PathBuf>, private_key_path: impl Into<PathBuf>) -> Self {
        Self {
            host: default_feedback_host(),
            port: default_feedback_port(),
            certificate_path: certificate_path.into(),
            private_key_path: private_key_path.into(),
            ca_path: None,
            feedback_time_is_utc: false,
            initial_delay_secs: default_feedback_initial_delay(),
            interval_minutes: default_feedback_interval(),
        }
    }
}

fn default_apns_host() -> String {
    APNS_PRODUCTION_HOST.to_string()
}

fn default_https_port() -> u16 {
    443
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

fn default_feedback_host() -> String {
    APNS_FEEDBACK_HOST.to_string()
}

fn default_feedback_port() -> u16 {
    2196
}

fn default_feedback_initial_delay() -> u64 {
    10
}

fn default_feedback_interval() -> u64 {
    10
}

impl PushConfig {
    /// 从 TOML 文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("无法读取配置文件: {:?}", path.as_ref()))?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "配置文件格式错误")
    }

    /// 从环境变量合并配置（PRIVPUSH_ 前缀）
    pub fn merge_from_env(&mut self) -> Result<()> {
        if let Ok(level) = env::var("PRIVPUSH_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("PRIVPUSH_LOG_FORMAT") {
            self.logging.format = Some(format);
        }
        if let Ok(file) = env::var("PRIVPUSH_LOG_FILE") {
            self.logging.file = Some(file);
        }

        if let Some(apns) = self.apns.as_mut() {
            if let Ok(host) = env::var("PRIVPUSH_APNS_HOST") {
                apns.host = host;
            }
            if let Ok(port) = env::var("PRIVPUSH_APNS_PORT") {
                apns.port = port.parse().with_context(|| "PRIVPUSH_APNS_PORT 不是有效端口")?;
            }
            if let Ok(bundle_id) = env::var("PRIVPUSH_APNS_BUNDLE_ID") {
                apns.bundle_id = bundle_id;
            }
            if let Ok(flag) = env::var("PRIVPUSH_APNS_DELETE_TOKEN_ON_GONE") {
                apns.delete_token_on_gone = parse_bool(&flag);
            }
            if let ApnsAuth::Token { private_key_pem, .. } = &mut apns.auth {
                if let Ok(pem) = env::var("PRIVPUSH_APNS_PRIVATE_KEY") {
                    *private_key_pem = Some(pem);
                }
            }
        }

        if let Some(feedback) = self.feedback.as_mut() {
            if let Ok(host) = env::var("PRIVPUSH_FEEDBACK_HOST") {
                feedback.host = host;
            }
            if let Ok(port) = env::var("PRIVPUSH_FEEDBACK_PORT") {
                feedback.port = port.parse().with_context(|| "PRIVPUSH_FEEDBACK_PORT 不是有效端口")?;
            }
            if let Ok(flag) = env::var("PRIVPUSH_FEEDBACK_TIME_IS_UTC") {
                feedback.feedback_time_is_utc = parse_bool(&flag);
            }
        }

        Ok(())
    }

    /// 加载配置（命令行 > 环境变量 > 配置文件 > 默认值）
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = match cli.config_file.as_deref() {
            Some(path) => {
                info!("📄 Loading config from {}", path);
                Self::from_toml_file(path)?
            }
            None if Path::new("config.toml").exists() => Self::from_toml_file("config.toml")?,
            None => Self::default(),
        };

        config.merge_from_env()?;

        if let Some(level) = cli.get_log_level() {
            config.logging.level = level;
        }
        if let Some(format) = cli.log_format.clone() {
            config.logging.format = Some(format);
        }
        if let Some(file) = cli.log_file.clone() {
            config.logging.file = Some(file);
        }
        if cli.sandbox {
            config.apns = config.apns.take().map(ApnsSettings::sandbox);
            if let Some(feedback) = config.feedback.as_mut() {
                feedback.host = APNS_SANDBOX_FEEDBACK_HOST.to_string();
            }
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(apns) = &self.apns {
            apns.validate()?;
        }
        if let Some(feedback) = &self.feedback {
            if feedback.host.is_empty() {
                bail!("feedback.host 不能为空");
            }
        }
        if self.apns.is_none() && self.windows_phone.is_none() && self.feedback.is_none() {
            bail!("至少需要配置 [apns]、[windows_phone] 或 [feedback] 之一");
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// `generate-config` 输出的默认配置
pub const DEFAULT_CONFIG_TOML: &str = r#"# privpush 配置文件

[logging]
level = "info"
format = "compact"

[apns]
host = "api.push.apple.com"
port = 443
bundle_id = "com.example.app"
delete_token_on_gone = true
request_timeout_secs = 30

[apns.auth]
mode = "token"
key_id = "ABC123DEFG"
team_id = "DEF123GHIJ"
private_key_path = "./certs/AuthKey_ABC123DEFG.p8"

[windows_phone]
request_timeout_secs = 30

[feedback]
host = "feedback.push.apple.com"
port = 2196
certificate_path = "./certs/apns-cert.pem"
private_key_path = "./certs/apns-key.pem"
feedback_time_is_utc = true
initial_delay_secs = 10
interval_minutes = 10
"#;
