use rand::Rng;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::auth::{iso_ms, now_ms};
use crate::response::AppError;

const INVITE_CODE_LEN: usize = 8;
// 去掉易混淆的 0/O、1/I
const INVITE_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const INVITE_CODE_ATTEMPTS: usize = 5;

pub const ROLE_OWNER: &str = "owner";
pub const ROLE_MEMBER: &str = "member";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Family {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    pub invite_code: String,
    pub role: String,
    pub member_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyMember {
    pub user_id: i64,
    pub nickname: String,
    pub avatar_url: Option<String>,
    pub role: String,
    pub joined_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyDetail {
    #[serde(flatten)]
    pub family: Family,
    pub members: Vec<FamilyMember>,
}

#[derive(Debug, Error)]
pub enum FamilyError {
    #[error("family not found")]
    NotFound,
    #[error("invite code not found")]
    InviteCodeNotFound,
    #[error("already a member")]
    AlreadyMember,
    #[error("owner cannot leave")]
    OwnerCannotLeave,
    #[error("owner only")]
    NotOwner,
    #[error("member not found")]
    MemberNotFound,
    #[error("cannot remove self")]
    CannotRemoveSelf,
    #[error("could not allocate invite code")]
    InviteCodeExhausted,
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

impl From<FamilyError> for AppError {
    fn from(err: FamilyError) -> Self {
        match err {
            FamilyError::NotFound => AppError::family_not_found(),
            FamilyError::InviteCodeNotFound => AppError::not_found("邀请码无效"),
            FamilyError::AlreadyMember => AppError::conflict("已经是该家庭成员"),
            FamilyError::OwnerCannotLeave => AppError::conflict("家庭创建者不能退出家庭"),
            FamilyError::NotOwner => AppError::forbidden("只有家庭创建者可以执行此操作"),
            FamilyError::MemberNotFound => AppError::not_found("成员不存在"),
            FamilyError::CannotRemoveSelf => AppError::validation("不能移除自己"),
            FamilyError::InviteCodeExhausted => AppError::internal("invite code allocation failed"),
            FamilyError::Sql(err) => err.into(),
        }
    }
}

pub fn generate_invite_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..INVITE_CODE_LEN)
        .map(|_| INVITE_CODE_ALPHABET[rng.random_range(0..INVITE_CODE_ALPHABET.len())] as char)
        .collect()
}

pub fn normalize_invite_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

async fn unused_invite_code(pool: &SqlitePool) -> Result<String, FamilyError> {
    for _ in 0..INVITE_CODE_ATTEMPTS {
        let code = generate_invite_code(&mut rand::rng());
        let taken = sqlx::query(r#"SELECT 1 FROM "families" WHERE "invite_code" = ?"#)
            .bind(&code)
            .fetch_optional(pool)
            .await?
            .is_some();
        if !taken {
            return Ok(code);
        }
    }
    Err(FamilyError::InviteCodeExhausted)
}

pub async fn create_family(
    pool: &SqlitePool,
    owner_id: i64,
    name: &str,
) -> Result<FamilyDetail, FamilyError> {
    let code = unused_invite_code(pool).await?;
    let now = now_ms();

    let mut tx = pool.begin().await?;
    let family_id = sqlx::query(
        r#"
        INSERT INTO "families" ("name", "owner_id", "invite_code", "created_at", "updated_at")
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(name)
    .bind(owner_id)
    .bind(&code)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    sqlx::query(
        r#"INSERT INTO "family_members" ("family_id", "user_id", "role", "joined_at") VALUES (?, ?, ?, ?)"#,
    )
    .bind(family_id)
    .bind(owner_id)
    .bind(ROLE_OWNER)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(family_id, owner_id, "family created");
    get_family(pool, owner_id, family_id).await
}

const FAMILY_SELECT: &str = r#"
    SELECT f."id", f."name", f."owner_id", f."invite_code", f."created_at", m."role",
           (SELECT COUNT(*) FROM "family_members" c WHERE c."family_id" = f."id") AS "member_count"
    FROM "families" f
    JOIN "family_members" m ON m."family_id" = f."id"
"#;

fn map_family(row: &sqlx::sqlite::SqliteRow) -> Result<Family, sqlx::Error> {
    Ok(Family {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        owner_id: row.try_get("owner_id")?,
        invite_code: row.try_get("invite_code")?,
        role: row.try_get("role")?,
        member_count: row.try_get("member_count")?,
        created_at: iso_ms(row.try_get("created_at")?),
    })
}

pub async fn list_families(pool: &SqlitePool, user_id: i64) -> Result<Vec<Family>, FamilyError> {
    let sql = format!(r#"{FAMILY_SELECT} WHERE m."user_id" = ? ORDER BY f."id""#);
    let rows = sqlx::query(&sql).bind(user_id).fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(map_family)
        .collect::<Result<Vec<_>, sqlx::Error>>()?)
}

/// 仅家庭成员可见
pub async fn get_family(
    pool: &SqlitePool,
    user_id: i64,
    family_id: i64,
) -> Result<FamilyDetail, FamilyError> {
    let sql = format!(r#"{FAMILY_SELECT} WHERE m."user_id" = ? AND f."id" = ?"#);
    let row = sqlx::query(&sql)
        .bind(user_id)
        .bind(family_id)
        .fetch_optional(pool)
        .await?
        .ok_or(FamilyError::NotFound)?;
    let family = map_family(&row)?;

    let member_rows = sqlx::query(
        r#"
        SELECT m."user_id", m."role", m."joined_at", u."nickname", u."avatar_url"
        FROM "family_members" m
        JOIN "users" u ON u."id" = m."user_id"
        WHERE m."family_id" = ?
        ORDER BY m."joined_at", m."user_id"
        "#,
    )
    .bind(family_id)
    .fetch_all(pool)
    .await?;

    let members = member_rows
        .iter()
        .map(|row| -> Result<FamilyMember, sqlx::Error> {
            Ok(FamilyMember {
                user_id: row.try_get("user_id")?,
                nickname: row.try_get("nickname")?,
                avatar_url: row.try_get("avatar_url")?,
                role: row.try_get("role")?,
                joined_at: iso_ms(row.try_get("joined_at")?),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FamilyDetail { family, members })
}

/// Role of `user_id` in the family, `None` when not a member.
pub async fn member_role(
    pool: &SqlitePool,
    family_id: i64,
    user_id: i64,
) -> Result<Option<String>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT "role" FROM "family_members" WHERE "family_id" = ? AND "user_id" = ?"#,
    )
    .bind(family_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    row.map(|row| row.try_get("role")).transpose()
}

pub async fn join_family(
    pool: &SqlitePool,
    user_id: i64,
    invite_code: &str,
) -> Result<FamilyDetail, FamilyError> {
    let code = normalize_invite_code(invite_code);
    let family_id: i64 = sqlx::query(r#"SELECT "id" FROM "families" WHERE "invite_code" = ?"#)
        .bind(&code)
        .fetch_optional(pool)
        .await?
        .ok_or(FamilyError::InviteCodeNotFound)?
        .try_get("id")?;

    if member_role(pool, family_id, user_id).await?.is_some() {
        return Err(FamilyError::AlreadyMember);
    }

    sqlx::query(
        r#"INSERT INTO "family_members" ("family_id", "user_id", "role", "joined_at") VALUES (?, ?, ?, ?)"#,
    )
    .bind(family_id)
    .bind(user_id)
    .bind(ROLE_MEMBER)
    .bind(now_ms())
    .execute(pool)
    .await?;

    tracing::info!(family_id, user_id, "user joined family");
    get_family(pool, user_id, family_id).await
}

pub async fn leave_family(pool: &SqlitePool, user_id: i64, family_id: i64) -> Result<(), FamilyError> {
    match member_role(pool, family_id, user_id).await?.as_deref() {
        None => Err(FamilyError::NotFound),
        Some(ROLE_OWNER) => Err(FamilyError::OwnerCannotLeave),
        Some(_) => {
            delete_member(pool, family_id, user_id).await?;
            Ok(())
        }
    }
}

pub async fn regenerate_invite_code(
    pool: &SqlitePool,
    user_id: i64,
    family_id: i64,
) -> Result<FamilyDetail, FamilyError> {
    require_owner(pool, family_id, user_id).await?;

    let code = unused_invite_code(pool).await?;
    sqlx::query(r#"UPDATE "families" SET "invite_code" = ?, "updated_at" = ? WHERE "id" = ?"#)
        .bind(&code)
        .bind(now_ms())
        .bind(family_id)
        .execute(pool)
        .await?;

    get_family(pool, user_id, family_id).await
}

pub async fn remove_member(
    pool: &SqlitePool,
    user_id: i64,
    family_id: i64,
    member_id: i64,
) -> Result<(), FamilyError> {
    require_owner(pool, family_id, user_id).await?;
    if member_id == user_id {
        return Err(FamilyError::CannotRemoveSelf);
    }

    if delete_member(pool, family_id, member_id).await? == 0 {
        return Err(FamilyError::MemberNotFound);
    }
    tracing::info!(family_id, member_id, "family member removed");
    Ok(())
}

async fn require_owner(pool: &SqlitePool, family_id: i64, user_id: i64) -> Result<(), FamilyError> {
    match member_role(pool, family_id, user_id).await?.as_deref() {
        None => Err(FamilyError::NotFound),
        Some(ROLE_OWNER) => Ok(()),
        Some(_) => Err(FamilyError::NotOwner),
    }
}

async fn delete_member(pool: &SqlitePool, family_id: i64, user_id: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(r#"DELETE FROM "family_members" WHERE "family_id" = ? AND "user_id" = ?"#)
        .bind(family_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
