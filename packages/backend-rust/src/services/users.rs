use serde::Serialize;
use sqlx::SqlitePool;

use crate::auth::{iso_ms, load_user, now_ms, AuthUser};

pub const NICKNAME_MAX_CHARS: usize = 32;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    pub nickname: String,
    pub avatar_url: Option<String>,
    pub role: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&AuthUser> for UserProfile {
    fn from(user: &AuthUser) -> Self {
        Self {
            id: user.id,
            nickname: user.nickname.clone(),
            avatar_url: user.avatar_url.clone(),
            role: user.role.clone(),
            created_at: iso_ms(user.created_at),
            updated_at: iso_ms(user.updated_at),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub nickname: Option<String>,
    pub avatar_url: Option<String>,
}

/// Trims and checks a nickname; `None` when it is empty or too long.
pub fn normalize_nickname(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let chars = trimmed.chars().count();
    (1..=NICKNAME_MAX_CHARS)
        .contains(&chars)
        .then(|| trimmed.to_string())
}

/// Finds or creates the user behind a WeChat openid. Returns the user and
/// whether it was created by this call.
pub async fn upsert_wechat_user(
    pool: &SqlitePool,
    openid: &str,
    unionid: Option<&str>,
    profile: &ProfileUpdate,
) -> Result<(AuthUser, bool), sqlx::Error> {
    let now = now_ms();
    let nickname = profile.nickname.as_deref().unwrap_or("家长");
    // concurrent first logins race on the openid unique key; the loser updates
    let result = sqlx::query(
        r#"
        INSERT INTO "users"
          ("openid", "unionid", "nickname", "avatar_url", "role", "created_at", "updated_at", "last_login_at")
        VALUES (?, ?, ?, ?, 'USER', ?, ?, ?)
        ON CONFLICT ("openid") DO NOTHING
        "#,
    )
    .bind(openid)
    .bind(unionid)
    .bind(nickname)
    .bind(profile.avatar_url.as_deref())
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    let inserted = result.rows_affected() == 1;

    if !inserted {
        sqlx::query(
            r#"
            UPDATE "users" SET
              "nickname" = COALESCE(?, "nickname"),
              "avatar_url" = COALESCE(?, "avatar_url"),
              "unionid" = COALESCE(?, "unionid"),
              "last_login_at" = ?,
              "updated_at" = ?
            WHERE "openid" = ?
            "#,
        )
        .bind(profile.nickname.as_deref())
        .bind(profile.avatar_url.as_deref())
        .bind(unionid)
        .bind(now)
        .bind(now)
        .bind(openid)
        .execute(pool)
        .await?;
    }

    let user_id: i64 = sqlx::query_scalar(r#"SELECT "id" FROM "users" WHERE "openid" = ?"#)
        .bind(openid)
        .fetch_one(pool)
        .await?;

    let user = load_user(pool, user_id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;
    Ok((user, inserted))
}

pub async fn update_profile(
    pool: &SqlitePool,
    user_id: i64,
    update: &ProfileUpdate,
) -> Result<Option<AuthUser>, sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE "users" SET
          "nickname" = COALESCE(?, "nickname"),
          "avatar_url" = COALESCE(?, "avatar_url"),
          "updated_at" = ?
        WHERE "id" = ?
        "#,
    )
    .bind(update.nickname.as_deref())
    .bind(update.avatar_url.as_deref())
    .bind(now_ms())
    .bind(user_id)
    .execute(pool)
    .await?;

    load_user(pool, user_id).await
}
