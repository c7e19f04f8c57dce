use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{SecondsFormat, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::config::JwtConfig;
use crate::db::DatabaseProxy;

pub const AUTH_COOKIE_NAME: &str = "auth_token";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: i64,
    pub openid: String,
    pub nickname: String,
    pub avatar_url: Option<String>,
    pub role: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == "ADMIN"
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("missing JWT_SECRET")]
    MissingSecret,
    #[error("invalid JWT_EXPIRES_IN")]
    InvalidExpiresIn,
    #[error("database unavailable")]
    DatabaseUnavailable,
    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Database(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwtClaims {
    pub user_id: i64,
    pub jti: String,
}

#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub jti: String,
    pub expires_at_ms: i64,
}

pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    bearer.or_else(|| get_cookie(headers, AUTH_COOKIE_NAME))
}

pub fn sign_jwt_for_user(user_id: i64, jwt: &JwtConfig) -> Result<SignedToken, AuthError> {
    let secret = jwt.secret.as_deref().ok_or(AuthError::MissingSecret)?;
    let expires_in_ms = parse_expires_in_ms(&jwt.expires_in)?;

    let issued_at = Utc::now();
    let exp = issued_at
        .checked_add_signed(chrono::Duration::milliseconds(expires_in_ms))
        .ok_or(AuthError::InvalidExpiresIn)?;
    let jti = uuid::Uuid::new_v4().to_string();

    let header_json = serde_json::json!({
        "alg": "HS256",
        "typ": "JWT",
    });
    let payload_json = serde_json::json!({
        "userId": user_id,
        "iat": issued_at.timestamp(),
        "exp": exp.timestamp(),
        "jti": jti,
    });

    let header_b64 = URL_SAFE_NO_PAD
        .encode(serde_json::to_vec(&header_json).map_err(|_| AuthError::InvalidToken)?);
    let payload_b64 = URL_SAFE_NO_PAD
        .encode(serde_json::to_vec(&payload_json).map_err(|_| AuthError::InvalidToken)?);
    let signing_input = format!("{header_b64}.{payload_b64}");

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(signing_input.as_bytes());
    let sig_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(SignedToken {
        token: format!("{signing_input}.{sig_b64}"),
        jti,
        expires_at_ms: exp.timestamp_millis(),
    })
}

pub fn verify_jwt_hs256(token: &str, secret: &str) -> Result<JwtClaims, AuthError> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(AuthError::InvalidToken)?;
    let payload_b64 = parts.next().ok_or(AuthError::InvalidToken)?;
    let sig_b64 = parts.next().ok_or(AuthError::InvalidToken)?;
    if parts.next().is_some() {
        return Err(AuthError::InvalidToken);
    }

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64.as_bytes())
        .map_err(|_| AuthError::InvalidToken)?;
    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64.as_bytes())
        .map_err(|_| AuthError::InvalidToken)?;
    let sig_bytes = URL_SAFE_NO_PAD
        .decode(sig_b64.as_bytes())
        .map_err(|_| AuthError::InvalidToken)?;

    let header_json: serde_json::Value =
        serde_json::from_slice(&header_bytes).map_err(|_| AuthError::InvalidToken)?;
    if header_json.get("alg").and_then(|value| value.as_str()) != Some("HS256") {
        return Err(AuthError::InvalidToken);
    }

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(format!("{header_b64}.{payload_b64}").as_bytes());
    mac.verify_slice(&sig_bytes)
        .map_err(|_| AuthError::InvalidToken)?;

    let payload_json: serde_json::Value =
        serde_json::from_slice(&payload_bytes).map_err(|_| AuthError::InvalidToken)?;
    validate_registered_claims(&payload_json)?;

    let user_id = payload_json
        .get("userId")
        .and_then(|value| value.as_i64())
        .ok_or(AuthError::InvalidToken)?;
    let jti = payload_json
        .get("jti")
        .and_then(|value| value.as_str())
        .ok_or(AuthError::InvalidToken)?
        .to_string();

    Ok(JwtClaims { user_id, jti })
}

fn validate_registered_claims(payload: &serde_json::Value) -> Result<(), AuthError> {
    let now = Utc::now().timestamp();

    if let Some(exp) = payload.get("exp").and_then(|value| value.as_i64()) {
        if now >= exp {
            return Err(AuthError::InvalidToken);
        }
    }

    if let Some(nbf) = payload.get("nbf").and_then(|value| value.as_i64()) {
        if now < nbf {
            return Err(AuthError::InvalidToken);
        }
    }

    Ok(())
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn parse_expires_in_ms(value: &str) -> Result<i64, AuthError> {
    let trimmed = value.trim();
    if trimmed.len() < 2 {
        return Err(AuthError::InvalidExpiresIn);
    }

    let (digits, unit) = trimmed.split_at(trimmed.len() - 1);
    let amount: i64 = digits.parse().map_err(|_| AuthError::InvalidExpiresIn)?;
    if amount <= 0 {
        return Err(AuthError::InvalidExpiresIn);
    }

    let unit_ms = match unit {
        "s" => 1000,
        "m" => 60 * 1000,
        "h" => 60 * 60 * 1000,
        "d" => 24 * 60 * 60 * 1000,
        _ => return Err(AuthError::InvalidExpiresIn),
    };
    amount.checked_mul(unit_ms).ok_or(AuthError::InvalidExpiresIn)
}

/// Signs a token and records its session row.
pub async fn create_session(
    pool: &SqlitePool,
    user_id: i64,
    jwt: &JwtConfig,
) -> Result<SignedToken, AuthError> {
    let signed = sign_jwt_for_user(user_id, jwt)?;

    sqlx::query(
        r#"
        INSERT INTO "sessions" ("id", "user_id", "token_hash", "expires_at", "created_at")
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&signed.jti)
    .bind(user_id)
    .bind(hash_token(&signed.token))
    .bind(signed.expires_at_ms)
    .bind(now_ms())
    .execute(pool)
    .await?;

    Ok(signed)
}

pub async fn verify_request_token(
    proxy: &DatabaseProxy,
    jwt: &JwtConfig,
    token: &str,
) -> Result<AuthUser, AuthError> {
    let secret = jwt.secret.as_deref().ok_or(AuthError::MissingSecret)?;
    let claims = verify_jwt_hs256(token, secret)?;
    verify_session(proxy.pool(), &claims, &hash_token(token)).await
}

async fn verify_session(
    pool: &SqlitePool,
    claims: &JwtClaims,
    token_hash: &str,
) -> Result<AuthUser, AuthError> {
    let session_row = sqlx::query(
        r#"
        SELECT "id", "user_id", "expires_at"
        FROM "sessions"
        WHERE "token_hash" = ?
        "#,
    )
    .bind(token_hash)
    .fetch_optional(pool)
    .await?;

    let Some(session_row) = session_row else {
        return Err(AuthError::InvalidToken);
    };

    let session_id: String = session_row.try_get("id")?;
    let session_user_id: i64 = session_row.try_get("user_id")?;
    let expires_at: i64 = session_row.try_get("expires_at")?;

    if session_id != claims.jti || session_user_id != claims.user_id || expires_at < now_ms() {
        return Err(AuthError::InvalidToken);
    }

    load_user(pool, claims.user_id)
        .await?
        .ok_or(AuthError::InvalidToken)
}

pub async fn load_user(pool: &SqlitePool, user_id: i64) -> Result<Option<AuthUser>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT "id", "openid", "nickname", "avatar_url", "role", "created_at", "updated_at"
        FROM "users"
        WHERE "id" = ?
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(AuthUser {
        id: row.try_get("id")?,
        openid: row.try_get("openid")?,
        nickname: row.try_get("nickname")?,
        avatar_url: row.try_get("avatar_url")?,
        role: row.try_get("role")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    }))
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn format_timestamp_ms_iso_millis(value: i64) -> Option<String> {
    Utc.timestamp_millis_opt(value)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// RFC 3339 rendering for response bodies; out-of-range values render empty.
pub fn iso_ms(value: i64) -> String {
    format_timestamp_ms_iso_millis(value).unwrap_or_default()
}

pub fn iso_ms_opt(value: Option<i64>) -> Option<String> {
    value.and_then(format_timestamp_ms_iso_millis)
}

fn get_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';')
        .filter_map(|part| part.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn jwt_config() -> JwtConfig {
        JwtConfig {
            secret: Some("test-secret".to_string()),
            expires_in: "7d".to_string(),
        }
    }

    #[test]
    fn parses_expires_in_units() {
        assert_eq!(parse_expires_in_ms("30s").unwrap(), 30_000);
        assert_eq!(parse_expires_in_ms("15m").unwrap(), 900_000);
        assert_eq!(parse_expires_in_ms("2h").unwrap(), 7_200_000);
        assert_eq!(parse_expires_in_ms(" 7d ").unwrap(), 604_800_000);
        assert!(parse_expires_in_ms("7").is_err());
        assert!(parse_expires_in_ms("0d").is_err());
        assert!(parse_expires_in_ms("3w").is_err());
    }

    #[test]
    fn signed_token_verifies() {
        let signed = sign_jwt_for_user(42, &jwt_config()).unwrap();
        let claims = verify_jwt_hs256(&signed.token, "test-secret").unwrap();
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.jti, signed.jti);
        assert!(signed.expires_at_ms > now_ms());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let signed = sign_jwt_for_user(42, &jwt_config()).unwrap();
        assert!(matches!(
            verify_jwt_hs256(&signed.token, "other-secret"),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let signed = sign_jwt_for_user(42, &jwt_config()).unwrap();
        let mut parts: Vec<&str> = signed.token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"userId":1,"jti":"x","exp":9999999999}"#);
        parts[1] = forged.as_str();
        assert!(verify_jwt_hs256(&parts.join("."), "test-secret").is_err());
    }

    #[test]
    fn missing_secret_cannot_sign() {
        let config = JwtConfig {
            secret: None,
            expires_in: "7d".to_string(),
        };
        assert!(matches!(
            sign_jwt_for_user(1, &config),
            Err(AuthError::MissingSecret)
        ));
    }

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("a=b; auth_token=cookie-token"));
        assert_eq!(extract_token(&headers).as_deref(), Some("cookie-token"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer header-token"));
        assert_eq!(extract_token(&headers).as_deref(), Some("header-token"));
    }

    #[test]
    fn hash_is_stable_hex() {
        let hash = hash_token("abc");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("abc"));
        assert_ne!(hash, hash_token("abd"));
    }

    #[test]
    fn formats_millis_as_rfc3339() {
        assert_eq!(iso_ms(0), "1970-01-01T00:00:00.000Z");
        assert_eq!(iso_ms_opt(Some(1_500)).as_deref(), Some("1970-01-01T00:00:01.500Z"));
        assert_eq!(iso_ms_opt(None), None);
    }
}
