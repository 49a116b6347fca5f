use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// 初始化日志系统
///
/// 指定 `log_file` 时额外按天滚动写入文件；返回的 guard 需要保持到进程退出，
/// 否则缓冲中的日志会丢失。
pub fn init_logging(
    log_level: &str,
    log_format: Option<&str>,
    log_file: Option<&str>,
    quiet: bool,
) -> Result<Option<WorkerGuard>> {
    // 如果静默模式，只输出错误
    let level = if quiet {
        "error"
    } else {
        log_level
    };

    // 解析日志级别
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    let (writer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = file_writer(Path::new(path))?;
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    // 文件层不带颜色；每个分支各自构造，订阅者类型不同
    match log_format {
        Some("json") => {
            // JSON 格式（适合生产环境）
            let file_layer = writer.map(|w| fmt::layer().with_writer(w).with_ansi(false));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .with(file_layer)
                .try_init()?;
        }
        Some("pretty") | Some("dev") => {
            // Pretty 格式（适合开发环境）
            let file_layer = writer.map(|w| fmt::layer().with_writer(w).with_ansi(false));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .with(file_layer)
                .try_init()?;
        }
        _ => {
            // Compact 格式（默认）
            let file_layer = writer.map(|w| fmt::layer().with_writer(w).with_ansi(false));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact())
                .with(file_layer)
                .try_init()?;
        }
    }

    Ok(guard)
}

fn file_writer(path: &Path) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("日志文件路径无效: {:?}", path))?;

    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}
