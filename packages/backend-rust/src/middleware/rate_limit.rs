use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header::RETRY_AFTER, HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::Mutex;

use crate::config::RateLimitSettings;
use crate::response::json_error;
use crate::state::AppState;

const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

// 登录接口单独限流
const AUTH_WINDOW_MS: u64 = 5 * 60 * 1000;
const AUTH_MAX: u64 = 30;

/// Per-IP fixed-window limiters shared by every request of one server.
#[derive(Debug)]
pub struct RateLimiters {
    api: RateLimiter,
    auth: RateLimiter,
    trust_proxy: bool,
}

impl RateLimiters {
    pub fn from_settings(settings: RateLimitSettings) -> Option<Arc<Self>> {
        if !settings.enabled {
            return None;
        }

        Some(Arc::new(Self {
            api: RateLimiter::new(RateLimitConfig {
                window_ms: settings.window_ms.max(1),
                max: settings.max,
            }),
            auth: RateLimiter::new(RateLimitConfig {
                window_ms: AUTH_WINDOW_MS,
                max: AUTH_MAX.min(settings.max),
            }),
            trust_proxy: settings.trust_proxy,
        }))
    }
}

pub async fn api_rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(limiters) = state.rate_limiters() else {
        return next.run(req).await;
    };
    if !matches_prefix(req.uri().path(), "/api") {
        return next.run(req).await;
    }

    enforce_rate_limit(
        &limiters.api,
        Scope::Api,
        limiters.trust_proxy,
        req,
        next,
        "TOO_MANY_REQUESTS",
        "请求过于频繁，请稍后再试",
    )
    .await
}

pub async fn auth_rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(limiters) = state.rate_limiters() else {
        return next.run(req).await;
    };
    if !matches_prefix(req.uri().path(), "/api/auth") {
        return next.run(req).await;
    }

    enforce_rate_limit(
        &limiters.auth,
        Scope::Auth,
        limiters.trust_proxy,
        req,
        next,
        "TOO_MANY_AUTH_REQUESTS",
        "认证请求过于频繁，请稍后再试",
    )
    .await
}

async fn enforce_rate_limit(
    limiter: &RateLimiter,
    scope: Scope,
    trust_proxy: bool,
    req: Request<Body>,
    next: Next,
    code: &'static str,
    message: &'static str,
) -> Response {
    let ip = extract_client_ip(&req, trust_proxy).unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let check = limiter.check(Key { scope, ip }, now_ms()).await;

    if !check.allowed {
        tracing::debug!(%ip, ?scope, "rate limit exceeded");
        let mut res = json_error(StatusCode::TOO_MANY_REQUESTS, code, message).into_response();
        apply_rate_limit_headers(&mut res, check);
        return res;
    }

    let mut res = next.run(req).await;
    apply_rate_limit_headers(&mut res, check);
    res
}

fn apply_rate_limit_headers(res: &mut Response, check: RateLimitCheck) {
    let headers = res.headers_mut();
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(check.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(check.remaining));
    headers.insert(RATE_LIMIT_RESET, HeaderValue::from(check.reset_after_seconds));
    if check.remaining == 0 {
        headers.insert(RETRY_AFTER, HeaderValue::from(check.reset_after_seconds));
    }
}

fn matches_prefix(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Scope {
    Api,
    Auth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Key {
    scope: Scope,
    ip: IpAddr,
}

#[derive(Debug, Clone, Copy)]
struct RateLimitConfig {
    window_ms: u64,
    max: u64,
}

#[derive(Debug)]
struct RateLimiterState {
    entries: HashMap<Key, Entry>,
    last_cleanup_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    window_start_ms: u64,
    hits: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateLimitCheck {
    allowed: bool,
    limit: u64,
    remaining: u64,
    reset_after_seconds: u64,
}

#[derive(Debug)]
struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<RateLimiterState>,
}

impl RateLimiter {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RateLimiterState {
                entries: HashMap::new(),
                last_cleanup_ms: now_ms(),
            }),
        }
    }

    async fn check(&self, key: Key, now_ms: u64) -> RateLimitCheck {
        let window_ms = self.config.window_ms;
        let mut state = self.state.lock().await;

        if now_ms.saturating_sub(state.last_cleanup_ms) >= window_ms {
            state
                .entries
                .retain(|_, entry| now_ms.saturating_sub(entry.window_start_ms) < window_ms);
            state.last_cleanup_ms = now_ms;
        }

        let entry = state.entries.entry(key).or_insert(Entry {
            window_start_ms: now_ms,
            hits: 0,
        });

        if now_ms.saturating_sub(entry.window_start_ms) >= window_ms {
            entry.window_start_ms = now_ms;
            entry.hits = 0;
        }

        entry.hits = entry.hits.saturating_add(1);
        let allowed = entry.hits <= self.config.max;
        let reset_after_ms =
            window_ms.saturating_sub(now_ms.saturating_sub(entry.window_start_ms));

        RateLimitCheck {
            allowed,
            limit: self.config.max,
            remaining: self.config.max.saturating_sub(entry.hits),
            reset_after_seconds: reset_after_ms.div_ceil(1000),
        }
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn extract_client_ip(req: &Request<Body>, trust_proxy: bool) -> Option<IpAddr> {
    if trust_proxy {
        if let Some(ip) = extract_x_forwarded_for(req) {
            return Some(ip);
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

fn extract_x_forwarded_for(req: &Request<Body>) -> Option<IpAddr> {
    let raw = req
        .headers()
        .get(HeaderName::from_static("x-forwarded-for"))?
        .to_str()
        .ok()?;
    raw.split(',').next()?.trim().parse::<IpAddr>().ok()
}
