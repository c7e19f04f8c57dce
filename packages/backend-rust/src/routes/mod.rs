mod admin;
mod auth;
mod children;
mod curriculum;
mod dictation;
mod families;
mod feedback;
mod health;
mod reminders;
mod review;
mod statistics;
mod users;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::Router;

use crate::middleware::auth::{require_admin, require_auth};
use crate::middleware::rate_limit::{api_rate_limit_middleware, auth_rate_limit_middleware};
use crate::response::{json_error, AppError};
use crate::state::AppState;

const DEFAULT_PER_PAGE: i64 = 20;
const MAX_PER_PAGE: i64 = 100;
// (page - 1) * per_page must stay within i64
const MAX_PAGE: i64 = i64::MAX / MAX_PER_PAGE;

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .nest("/auth", auth::router())
        .nest("/users", users::router())
        .nest("/families", families::router())
        .nest("/children", children::router())
        .nest("/yuwen", curriculum::router())
        .nest("/dictation", dictation::router())
        .nest("/review", review::router())
        .nest("/statistics", statistics::router())
        .nest("/feedback", feedback::router())
        .nest("/reminders", reminders::router())
        .nest(
            "/admin",
            admin::router().route_layer(middleware::from_fn(require_admin)),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let api = Router::new()
        .nest("/auth", auth::public_router())
        .merge(protected);

    Router::new()
        .nest("/api", api)
        .nest("/health", health::router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_rate_limit_middleware,
        ))
        .fallback(fallback_handler)
        .with_state(state)
}

/// `child_id` is required by every per-child endpoint.
pub(crate) fn require_child_id(value: Option<i64>) -> Result<i64, AppError> {
    value.ok_or_else(|| AppError::missing_param("child_id"))
}

/// Validated `(page, per_page)`; page starts at 1.
pub(crate) fn page_window(page: Option<i64>, per_page: Option<i64>) -> Result<(i64, i64), AppError> {
    let page = page.unwrap_or(1);
    let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE);
    if !(1..=MAX_PAGE).contains(&page) {
        return Err(AppError::validation(format!("page 必须在 1-{MAX_PAGE} 之间")));
    }
    if !(1..=MAX_PER_PAGE).contains(&per_page) {
        return Err(AppError::validation(format!("per_page 必须在 1-{MAX_PER_PAGE} 之间")));
    }
    Ok((page, per_page))
}

async fn fallback_handler() -> Response {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "接口不存在").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_window_defaults_and_bounds() {
        assert_eq!(page_window(None, None).unwrap(), (1, 20));
        assert_eq!(page_window(Some(3), Some(100)).unwrap(), (3, 100));
        assert!(page_window(Some(0), None).is_err());
        assert!(page_window(Some(i64::MAX), Some(MAX_PER_PAGE)).is_err());
        let (page, per_page) = page_window(Some(MAX_PAGE), Some(MAX_PER_PAGE)).unwrap();
        assert!((page - 1).checked_mul(per_page).is_some());
        assert!(page_window(None, Some(101)).is_err());
    }

    #[test]
    fn child_id_is_required() {
        assert_eq!(require_child_id(Some(7)).unwrap(), 7);
        let err = require_child_id(None).unwrap_err();
        assert_eq!(err.code(), "MISSING_REQUIRED_PARAM");
    }
}
