use std::sync::Arc;
use std::time::{Instant, SystemTime};

use chrono::{FixedOffset, Offset, Utc};

use crate::config::Config;
use crate::db::DatabaseProxy;
use crate::middleware::rate_limit::RateLimiters;
use crate::response::AppError;
use crate::wechat::WechatClient;

#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    started_at_system: SystemTime,
    db_proxy: Option<Arc<DatabaseProxy>>,
    config: Arc<Config>,
    wechat: Arc<WechatClient>,
    rate_limiters: Option<Arc<RateLimiters>>,
}

impl AppState {
    pub fn new(config: Config, db_proxy: Option<Arc<DatabaseProxy>>) -> Self {
        let wechat = WechatClient::new(config.wechat.clone());
        let rate_limiters = RateLimiters::from_settings(config.rate_limit);

        Self {
            started_at: Instant::now(),
            started_at_system: SystemTime::now(),
            db_proxy,
            config: Arc::new(config),
            wechat: Arc::new(wechat),
            rate_limiters,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at_system(&self) -> SystemTime {
        self.started_at_system
    }

    pub fn db_proxy(&self) -> Option<Arc<DatabaseProxy>> {
        self.db_proxy.clone()
    }

    /// 数据库不可用时返回 503
    pub fn require_db(&self) -> Result<Arc<DatabaseProxy>, AppError> {
        self.db_proxy
            .clone()
            .ok_or_else(|| AppError::service_unavailable("数据库服务不可用"))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn wechat(&self) -> Arc<WechatClient> {
        Arc::clone(&self.wechat)
    }

    pub fn rate_limiters(&self) -> Option<Arc<RateLimiters>> {
        self.rate_limiters.clone()
    }

    /// Offset used to bucket timestamps into local calendar days.
    pub fn local_offset(&self) -> FixedOffset {
        local_offset(self.config.tz_offset_hours)
    }
}

pub fn local_offset(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours.clamp(-12, 14) * 3600).unwrap_or_else(|| Utc.fix())
}
