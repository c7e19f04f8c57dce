use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "tingxie.log";
const SERVICE_TARGETS: [&str; 3] = ["tingxie_backend", "tingxie_algo", "tower_http"];

/// Keeps the non-blocking file writer flushing until dropped.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

/// 纯级别（如 `debug`）只作用于本服务的 target，依赖库保持 warn；
/// 其余写法按 `EnvFilter` 指令原样使用。
pub fn filter_directives(log_level: &str) -> String {
    let level = log_level.trim().to_ascii_lowercase();
    if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error" | "off") {
        return log_level.trim().to_string();
    }

    let mut directives: Vec<String> = SERVICE_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect();
    directives.push("sqlx=warn".to_string());
    directives.push("warn".to_string());
    directives.join(",")
}

fn build_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(filter_directives(log_level)).unwrap_or_else(|err| {
        eprintln!("invalid log filter {log_level:?}: {err}; falling back to info");
        EnvFilter::new(filter_directives("info"))
    })
}

/// Installs stdout logging and, when `file_log_dir` is usable, a daily-rotated
/// `tingxie.log` alongside it.
pub fn init_tracing(log_level: &str, file_log_dir: Option<&Path>) -> Option<FileLogGuard> {
    let (file_layer, guard) = match file_log_dir.map(open_file_writer) {
        Some(Ok((writer, guard))) => {
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(FileLogGuard { _guard: guard }))
        }
        Some(Err(err)) => {
            eprintln!("file logging disabled: {err}");
            (None, None)
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(build_filter(log_level))
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .init();

    guard
}

fn open_file_writer(
    log_dir: &Path,
) -> std::io::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(log_dir)?;
    let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}
