use clap::{Parser, Subcommand};

// 确保 Parser trait 被使用
impl Cli {
    /// 解析命令行参数
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

/// privpush - APNs / Windows Phone 推送网关客户端
#[derive(Parser, Debug)]
#[command(name = "privpush")]
#[command(version)]
#[command(about = "APNs、Windows Phone 推送发送与 APNs Feedback 拉取", long_about = None)]
pub struct Cli {
    /// 配置文件路径
    #[arg(long, value_name = "FILE", help = "指定配置文件路径")]
    pub config_file: Option<String>,

    /// 日志级别
    #[arg(
        long,
        value_name = "LEVEL",
        help = "日志级别: trace, debug, info, warn, error"
    )]
    pub log_level: Option<String>,

    /// 日志格式
    #[arg(long, value_name = "FORMAT", help = "日志格式: pretty, json, compact")]
    pub log_format: Option<String>,

    /// 日志文件路径
    #[arg(long, value_name = "PATH", help = "日志输出文件路径")]
    pub log_file: Option<String>,

    /// 使用 APNs sandbox 环境
    #[arg(long, help = "使用 APNs sandbox 网关和 feedback 服务")]
    pub sandbox: bool,

    /// 详细输出（可重复使用：-v, -vv, -vvv）
    #[arg(short, action = clap::ArgAction::Count, help = "详细输出级别")]
    pub verbose: u8,

    /// 静默模式
    #[arg(long, short = 'q', help = "静默模式（只输出错误）")]
    pub quiet: bool,

    /// 子命令
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 通过 APNs 发送一条通知
    SendApns {
        /// 设备 token（64 位十六进制）
        #[arg(long, value_name = "HEX")]
        token: String,
        /// JSON payload
        #[arg(long, value_name = "JSON")]
        payload: String,
        /// apns-push-type: alert, background, voip, complication, fileprovider, mdm
        #[arg(long, value_name = "TYPE", default_value = "alert")]
        push_type: String,
        /// 过期时间（epoch 秒）
        #[arg(long, value_name = "SECS")]
        expiration: Option<i64>,
    },
    /// 通过 Windows Phone 推送服务发送一条通知
    SendWp {
        /// 设备 channel URI
        #[arg(long, value_name = "URL")]
        endpoint: String,
        /// toast, tile, cycle-tile, flip-tile, iconic-tile, raw
        #[arg(long, value_name = "KIND", default_value = "toast")]
        kind: String,
        /// immediate, medium, slow
        #[arg(long, value_name = "CLASS")]
        class: Option<String>,
        /// XML（或 raw 文本）payload
        #[arg(long, value_name = "BODY")]
        payload: String,
    },
    /// 拉取 APNs feedback（默认按配置周期运行，直到 Ctrl-C）
    Feedback {
        /// 只运行一次
        #[arg(long)]
        once: bool,
    },
    /// 生成默认配置文件
    GenerateConfig {
        /// 输出文件路径
        #[arg(value_name = "PATH", default_value = "config.toml")]
        path: String,
    },
    /// 验证配置文件
    ValidateConfig {
        /// 配置文件路径
        #[arg(value_name = "PATH", default_value = "config.toml")]
        path: String,
    },
    /// 显示最终配置（合并后的配置）
    ShowConfig,
}

impl Cli {
    /// 获取日志级别（考虑 verbose 和 quiet）
    pub fn get_log_level(&self) -> Option<String> {
        if self.quiet {
            return Some("error".to_string());
        }

        if let Some(level) = &self.log_level {
            return Some(level.clone());
        }

        // 根据 verbose 级别设置
        match self.verbose {
            0 => None, // 使用默认或配置文件
            1 => Some("info".to_string()),
            2 => Some("debug".to_string()),
            _ => Some("trace".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_apns() {
        let cli = Cli::try_parse_from([
            "privpush",
            "--sandbox",
            "-vv",
            "send-apns",
            "--token",
            "abcd",
            "--payload",
            r#"{"aps":{}}"#,
            "--push-type",
            "voip",
        ])
        .unwrap();

        assert!(cli.sandbox);
        assert_eq!(cli.get_log_level().as_deref(), Some("debug"));
        match cli.command {
            Commands::SendApns { token, push_type, expiration, .. } => {
                assert_eq!(token, "abcd");
                assert_eq!(push_type, "voip");
                assert!(expiration.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_quiet_overrides_level() {
        let cli = Cli::try_parse_from(["privpush", "-q", "--log-level", "trace", "feedback", "--once"]).unwrap();
        assert_eq!(cli.get_log_level().as_deref(), Some("error"));
        assert!(matches!(cli.command, Commands::Feedback { once: true }));
    }
}
