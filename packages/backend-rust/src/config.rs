use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use crate::wechat::{WechatConfig, WechatProviderType};

const DEFAULT_DATABASE_URL: &str = "sqlite:./data/tingxie.db?mode=rwc";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    /// Some when daily rolling file logs are enabled
    pub file_log_dir: Option<PathBuf>,
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt: JwtConfig,
    pub wechat: WechatConfig,
    pub tz_offset_hours: i32,
    pub rate_limit: RateLimitSettings,
    pub workers: WorkerConfig,
    pub backup: BackupConfig,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Option<String>,
    pub expires_in: String,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub window_ms: u64,
    pub max: u64,
    /// Take the client address from `X-Forwarded-For`
    pub trust_proxy: bool,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub leader: bool,
    pub session_cleanup_schedule: String,
    pub review_reminder_schedule: String,
    pub backup_schedule: String,
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub dir: PathBuf,
    pub keep: usize,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3000);

        let host = std::env::var("HOST")
            .ok()
            .and_then(|value| value.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let file_log_dir = if env_bool("ENABLE_FILE_LOGS").unwrap_or(false) {
            Some(PathBuf::from(
                env_string("LOG_DIR").unwrap_or_else(|| "./logs".to_string()),
            ))
        } else {
            None
        };

        let database_url =
            env_string("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let wechat = WechatConfig {
            provider: match env_string("WECHAT_PROVIDER").as_deref() {
                Some("mock") => WechatProviderType::Mock,
                _ => WechatProviderType::Http,
            },
            app_id: env_string("WECHAT_APP_ID"),
            app_secret: env_string("WECHAT_APP_SECRET"),
            api_base: env_string("WECHAT_API_BASE")
                .unwrap_or_else(|| "https://api.weixin.qq.com".to_string()),
        };

        Self {
            host,
            port,
            log_level,
            file_log_dir,
            database_url,
            db_max_connections: env_u64("DB_MAX_CONNECTIONS").unwrap_or(5) as u32,
            jwt: JwtConfig {
                secret: env_string("JWT_SECRET"),
                expires_in: env_string("JWT_EXPIRES_IN").unwrap_or_else(|| "7d".to_string()),
            },
            wechat,
            tz_offset_hours: env_string("TZ_OFFSET_HOURS")
                .and_then(|v| v.parse::<i32>().ok())
                .filter(|v| (-12..=14).contains(v))
                .unwrap_or(8),
            rate_limit: RateLimitSettings {
                enabled: env_bool("RATE_LIMIT_ENABLED").unwrap_or(true),
                window_ms: env_u64("RATE_LIMIT_WINDOW_MS").unwrap_or(900_000),
                max: env_u64("RATE_LIMIT_MAX").unwrap_or(500),
                trust_proxy: env_bool("TRUST_PROXY").unwrap_or(false),
            },
            workers: WorkerConfig {
                leader: env_bool("WORKER_LEADER").unwrap_or(false),
                session_cleanup_schedule: env_string("SESSION_CLEANUP_SCHEDULE")
                    .unwrap_or_else(|| "0 0 * * * *".to_string()),
                review_reminder_schedule: env_string("REVIEW_REMINDER_SCHEDULE")
                    .unwrap_or_else(|| "0 0 7 * * *".to_string()),
                backup_schedule: env_string("BACKUP_SCHEDULE")
                    .unwrap_or_else(|| "0 30 3 * * *".to_string()),
            },
            backup: BackupConfig {
                dir: PathBuf::from(env_string("BACKUP_DIR").unwrap_or_else(|| "./backups".to_string())),
                keep: env_u64("BACKUP_KEEP").unwrap_or(7) as usize,
            },
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn is_in_memory_db(&self) -> bool {
        self.database_url.contains(":memory:") || self.database_url.contains("mode=memory")
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    env_string(key)?.parse::<u64>().ok()
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    let value = std::env::var(key).ok()?;
    parse_bool(&value)
}

fn parse_bool(value: &str) -> Option<bool> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bool_variants() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" on "), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool(""), None);
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn detects_in_memory_database() {
        let mut config = Config::from_env();
        config.database_url = "sqlite::memory:".to_string();
        assert!(config.is_in_memory_db());
        config.database_url = "sqlite:./data/tingxie.db?mode=rwc".to_string();
        assert!(!config.is_in_memory_db());
    }
}
