use std::fs;
use std::process;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use privpush::{
    cli::{Cli, Commands},
    config::{PushConfig, DEFAULT_CONFIG_TOML},
    logging,
    push::{
        AppleNotification, ApplePushType, BatchingInterval, FeedbackListener, WindowsPhoneKind,
        WindowsPhoneNotification,
    },
    ApnsChannel, DeliveryQueue, Notification, NotificationQueue, PushChannel, SendResult,
    WindowsPhoneChannel,
};
use tokio_util::sync::CancellationToken;

/// 命令行投递时的最大尝试次数
const MAX_ATTEMPTS: u32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载 .env 文件（如果存在）
    let _ = dotenvy::dotenv();

    // 解析命令行参数
    let cli = Cli::parse();

    match &cli.command {
        Commands::GenerateConfig { path } => return generate_config(path),
        Commands::ValidateConfig { path } => return validate_config(path),
        _ => {}
    }

    // 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    let config = PushConfig::load(&cli).context("加载配置失败")?;

    let _guard = logging::init_logging(
        &config.logging.level,
        config.logging.format.as_deref(),
        config.logging.file.as_deref(),
        cli.quiet,
    )?;

    let outcome = match &cli.command {
        Commands::ShowConfig => show_config(&config),
        Commands::SendApns { token, payload, push_type, expiration } => {
            send_apns(&config, token, payload, push_type, *expiration).await
        }
        Commands::SendWp { endpoint, kind, class, payload } => {
            send_wp(&config, endpoint, kind, class.as_deref(), payload).await
        }
        Commands::Feedback { once } => run_feedback(&config, *once).await,
        Commands::GenerateConfig { .. } | Commands::ValidateConfig { .. } => Ok(()),
    };

    if let Err(e) = outcome {
        tracing::error!("❌ {:#}", e);
        process::exit(1);
    }

    Ok(())
}

async fn send_apns(
    config: &PushConfig,
    token: &str,
    payload: &str,
    push_type: &str,
    expiration: Option<i64>,
) -> Result<()> {
    let settings = config.apns.clone().context("缺少 [apns] 配置")?;
    let payload: serde_json::Value = serde_json::from_str(payload).context("payload 不是有效 JSON")?;
    let push_type = ApplePushType::from_str(push_type)
        .ok_or_else(|| anyhow!("未知的 push type: {}", push_type))?;

    let mut notification = AppleNotification::new(token, &payload).with_push_type(push_type);
    if let Some(expiration) = expiration {
        notification = notification.with_expiration(expiration);
    }

    let channel = ApnsChannel::new(settings)?;
    let result = deliver(&channel, notification.into()).await;
    channel.close();
    report(result)
}

async fn send_wp(
    config: &PushConfig,
    endpoint: &str,
    kind: &str,
    class: Option<&str>,
    payload: &str,
) -> Result<()> {
    let settings = config.windows_phone.clone().unwrap_or_default();
    let kind = WindowsPhoneKind::from_str(kind).ok_or_else(|| anyhow!("未知的通知种类: {}", kind))?;

    let mut notification = WindowsPhoneNotification::new(kind, endpoint, payload);
    if let Some(class) = class {
        let class = BatchingInterval::from_str(class).ok_or_else(|| anyhow!("未知的 batching interval: {}", class))?;
        notification = notification.with_class(class);
    }

    let channel = WindowsPhoneChannel::new(settings)?;
    let result = deliver(&channel, notification.into()).await;
    channel.close();
    report(result)
}

/// 入队后逐条发送；可重试的失败重新放回队尾
async fn deliver(channel: &dyn PushChannel, notification: Notification) -> SendResult {
    let queue: DeliveryQueue = DeliveryQueue::new();
    let mut attempt = 0;
    queue.enqueue(Arc::new(notification));

    loop {
        let notification = queue.dequeue_async().await;
        attempt += 1;

        let result = channel.send(notification).await;
        if result.should_retry() && attempt < MAX_ATTEMPTS {
            tracing::warn!(
                "🔁 Retrying {} ({}/{}): {:?}",
                result.notification.identifier(),
                attempt,
                MAX_ATTEMPTS,
                result.error()
            );
            queue.enqueue(result.notification.clone());
            continue;
        }
        return result;
    }
}

fn report(result: SendResult) -> Result<()> {
    let id = result.notification.identifier();
    if result.is_success() {
        println!("✅ Delivered {}", id);
        return Ok(());
    }
    if result.is_suppressed() {
        println!("⏸ Suppressed {}", id);
        return Ok(());
    }
    if let Some(subscription) = result.expired_subscription_id() {
        println!(
            "🗑 Subscription expired: {} (at {:?})",
            subscription,
            result.expiry_timestamp()
        );
        return Ok(());
    }

    match result.error() {
        Some(e) => bail!("Delivery of {} failed ({}): {}", id, result.outcome.as_str(), e),
        None => bail!("Delivery of {} failed ({})", id, result.outcome.as_str()),
    }
}

async fn run_feedback(config: &PushConfig, once: bool) -> Result<()> {
    let settings = config.feedback.clone().context("缺少 [feedback] 配置")?;
    let listener = FeedbackListener::new(settings)?;
    let cancel = CancellationToken::new();

    if once {
        let records = listener.run_once(&cancel).await?;
        for record in records {
            println!("{} {}", record.timestamp.to_rfc3339(), record.device_token);
        }
        return Ok(());
    }

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("🛑 Received Ctrl-C, stopping feedback listener");
            shutdown.cancel();
        }
    });

    tracing::info!(
        "🚀 Feedback listener started: {}:{} (every {} minutes)",
        listener.settings().host,
        listener.settings().port,
        listener.settings().interval_minutes
    );

    listener
        .run_scheduled(cancel, |run| match run {
            Ok(records) => {
                for record in records {
                    println!("{} {}", record.timestamp.to_rfc3339(), record.device_token);
                }
            }
            Err(e) => tracing::error!("❌ Feedback run failed: {}", e),
        })
        .await;

    Ok(())
}

/// 生成默认配置文件
fn generate_config(path: &str) -> Result<()> {
    fs::write(path, DEFAULT_CONFIG_TOML).with_context(|| format!("无法写入配置文件: {}", path))?;

    println!("✅ 配置文件已生成: {}", path);
    Ok(())
}

/// 验证配置文件
fn validate_config(path: &str) -> Result<()> {
    let config = PushConfig::from_toml_file(path)
        .with_context(|| format!("配置文件验证失败: {}", path))?;
    config.validate().with_context(|| format!("配置文件验证失败: {}", path))?;

    println!("✅ 配置文件有效: {}", path);
    println!("📊 配置摘要:");
    if let Some(apns) = &config.apns {
        println!("  - APNs: {} ({})", apns.base_url(), apns.bundle_id);
    }
    if config.windows_phone.is_some() {
        println!("  - Windows Phone: enabled");
    }
    if let Some(feedback) = &config.feedback {
        println!("  - Feedback: {}:{}", feedback.host, feedback.port);
    }

    Ok(())
}

/// 显示最终配置（合并后的配置）
fn show_config(config: &PushConfig) -> Result<()> {
    println!("📊 最终配置（合并后的配置）:");
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
