use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::auth::{iso_ms, now_ms};
use crate::response::AppError;
use crate::services::families::{member_role, ROLE_OWNER};

pub const DEFAULT_TEXTBOOK_VERSION: &str = "renjiao";
const NAME_MAX_CHARS: usize = 32;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Child {
    pub id: i64,
    pub user_id: i64,
    pub family_id: Option<i64>,
    pub name: String,
    pub gender: Option<String>,
    pub grade: i64,
    pub semester: i64,
    pub textbook_version: String,
    pub avatar_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Curriculum coordinates of a child's current textbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Textbook {
    pub grade: i64,
    pub semester: i64,
    pub version: String,
}

impl Child {
    pub fn textbook(&self) -> Textbook {
        Textbook {
            grade: self.grade,
            semester: self.semester,
            version: self.textbook_version.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChildFields {
    pub name: Option<String>,
    pub gender: Option<String>,
    pub grade: Option<i64>,
    pub semester: Option<i64>,
    pub textbook_version: Option<String>,
    pub avatar_url: Option<String>,
    /// `Some(None)` takes the child out of its family.
    pub family_id: Option<Option<i64>>,
}

impl ChildFields {
    /// Normalizes the provided fields in place, rejecting out-of-range values.
    pub fn validate(&mut self) -> Result<(), String> {
        if let Some(name) = self.name.as_mut() {
            let trimmed = name.trim().to_string();
            let chars = trimmed.chars().count();
            if chars == 0 || chars > NAME_MAX_CHARS {
                return Err(format!("姓名长度必须在 1-{NAME_MAX_CHARS} 个字符之间"));
            }
            *name = trimmed;
        }
        if let Some(gender) = self.gender.as_deref() {
            if !matches!(gender, "male" | "female") {
                return Err("性别必须是 male 或 female".to_string());
            }
        }
        if let Some(grade) = self.grade {
            if !(1..=6).contains(&grade) {
                return Err("年级必须在 1-6 之间".to_string());
            }
        }
        if let Some(semester) = self.semester {
            if !(1..=2).contains(&semester) {
                return Err("学期必须是 1 或 2".to_string());
            }
        }
        if let Some(version) = self.textbook_version.as_mut() {
            let trimmed = version.trim().to_string();
            if trimmed.is_empty() {
                return Err("教材版本不能为空".to_string());
            }
            *version = trimmed;
        }
        Ok(())
    }
}

const CHILD_COLUMNS: &str = r#"
    c."id", c."user_id", c."family_id", c."name", c."gender", c."grade", c."semester",
    c."textbook_version", c."avatar_url", c."created_at", c."updated_at"
"#;

// 创建者或同一家庭的成员可以访问
const ACCESS_FILTER: &str = r#"
    (c."user_id" = ? OR c."family_id" IN
        (SELECT "family_id" FROM "family_members" WHERE "user_id" = ?))
"#;

fn map_child(row: &SqliteRow) -> Result<Child, sqlx::Error> {
    Ok(Child {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        family_id: row.try_get("family_id")?,
        name: row.try_get("name")?,
        gender: row.try_get("gender")?,
        grade: row.try_get("grade")?,
        semester: row.try_get("semester")?,
        textbook_version: row.try_get("textbook_version")?,
        avatar_url: row.try_get("avatar_url")?,
        created_at: iso_ms(row.try_get("created_at")?),
        updated_at: iso_ms(row.try_get("updated_at")?),
    })
}

pub async fn list_children(pool: &SqlitePool, user_id: i64) -> Result<Vec<Child>, sqlx::Error> {
    let sql = format!(r#"SELECT {CHILD_COLUMNS} FROM "children" c WHERE {ACCESS_FILTER} ORDER BY c."id""#);
    let rows = sqlx::query(&sql)
        .bind(user_id)
        .bind(user_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(map_child).collect()
}

pub async fn find_accessible_child(
    pool: &SqlitePool,
    user_id: i64,
    child_id: i64,
) -> Result<Option<Child>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {CHILD_COLUMNS} FROM "children" c WHERE c."id" = ? AND {ACCESS_FILTER}"#
    );
    let row = sqlx::query(&sql)
        .bind(child_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(map_child).transpose()
}

/// 无权访问与不存在一律返回 CHILD_NOT_FOUND
pub async fn require_child(pool: &SqlitePool, user_id: i64, child_id: i64) -> Result<Child, AppError> {
    find_accessible_child(pool, user_id, child_id)
        .await?
        .ok_or_else(AppError::child_not_found)
}

async fn ensure_family_member(
    pool: &SqlitePool,
    user_id: i64,
    family_id: i64,
) -> Result<(), AppError> {
    if member_role(pool, family_id, user_id).await?.is_none() {
        return Err(AppError::family_not_found());
    }
    Ok(())
}

pub async fn create_child(
    pool: &SqlitePool,
    user_id: i64,
    mut fields: ChildFields,
) -> Result<Child, AppError> {
    fields.validate().map_err(AppError::validation)?;
    let name = fields.name.clone().ok_or_else(|| AppError::missing_param("name"))?;
    let grade = fields.grade.ok_or_else(|| AppError::missing_param("grade"))?;
    let semester = fields.semester.ok_or_else(|| AppError::missing_param("semester"))?;
    let family_id = fields.family_id.flatten();
    if let Some(family_id) = family_id {
        ensure_family_member(pool, user_id, family_id).await?;
    }

    let now = now_ms();
    let child_id = sqlx::query(
        r#"
        INSERT INTO "children"
          ("user_id", "family_id", "name", "gender", "grade", "semester", "textbook_version", "avatar_url", "created_at", "updated_at")
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(family_id)
    .bind(name)
    .bind(fields.gender.as_deref())
    .bind(grade)
    .bind(semester)
    .bind(
        fields
            .textbook_version
            .as_deref()
            .unwrap_or(DEFAULT_TEXTBOOK_VERSION),
    )
    .bind(fields.avatar_url.as_deref())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    tracing::info!(child_id, user_id, "child created");
    require_child(pool, user_id, child_id).await
}

pub async fn update_child(
    pool: &SqlitePool,
    user_id: i64,
    child_id: i64,
    mut fields: ChildFields,
) -> Result<Child, AppError> {
    let child = require_child(pool, user_id, child_id).await?;
    fields.validate().map_err(AppError::validation)?;

    let family_change = fields.family_id.filter(|target| *target != child.family_id);
    if let Some(target) = family_change {
        if !can_manage(pool, user_id, &child).await? {
            return Err(AppError::forbidden("只有创建者或家庭创建者可以更换家庭"));
        }
        if let Some(family_id) = target {
            ensure_family_member(pool, user_id, family_id).await?;
        }
    }

    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        UPDATE "children" SET
          "name" = COALESCE(?, "name"),
          "gender" = COALESCE(?, "gender"),
          "grade" = COALESCE(?, "grade"),
          "semester" = COALESCE(?, "semester"),
          "textbook_version" = COALESCE(?, "textbook_version"),
          "avatar_url" = COALESCE(?, "avatar_url"),
          "updated_at" = ?
        WHERE "id" = ?
        "#,
    )
    .bind(fields.name.as_deref())
    .bind(fields.gender.as_deref())
    .bind(fields.grade)
    .bind(fields.semester)
    .bind(fields.textbook_version.as_deref())
    .bind(fields.avatar_url.as_deref())
    .bind(now_ms())
    .bind(child_id)
    .execute(&mut *tx)
    .await?;

    if let Some(target) = family_change {
        sqlx::query(r#"UPDATE "children" SET "family_id" = ? WHERE "id" = ?"#)
            .bind(target)
            .bind(child_id)
            .execute(&mut *tx)
            .await?;
        tracing::info!(child_id, user_id, family_id = ?target, "child family changed");
    }
    tx.commit().await?;

    // the caller may have moved the child out of their own reach
    find_child(pool, child_id)
        .await?
        .ok_or_else(AppError::child_not_found)
}

async fn find_child(pool: &SqlitePool, child_id: i64) -> Result<Option<Child>, sqlx::Error> {
    let sql = format!(r#"SELECT {CHILD_COLUMNS} FROM "children" c WHERE c."id" = ?"#);
    let row = sqlx::query(&sql).bind(child_id).fetch_optional(pool).await?;
    row.as_ref().map(map_child).transpose()
}

/// Creator of the child or owner of its current family.
async fn can_manage(pool: &SqlitePool, user_id: i64, child: &Child) -> Result<bool, sqlx::Error> {
    if child.user_id == user_id {
        return Ok(true);
    }
    match child.family_id {
        Some(family_id) => Ok(member_role(pool, family_id, user_id).await?.as_deref() == Some(ROLE_OWNER)),
        None => Ok(false),
    }
}

/// 创建者或家庭创建者可以删除；相关听写与复习记录级联删除
pub async fn delete_child(pool: &SqlitePool, user_id: i64, child_id: i64) -> Result<(), AppError> {
    let child = require_child(pool, user_id, child_id).await?;
    if !can_manage(pool, user_id, &child).await? {
        return Err(AppError::forbidden("只有创建者或家庭创建者可以删除"));
    }

    sqlx::query(r#"DELETE FROM "children" WHERE "id" = ?"#)
        .bind(child_id)
        .execute(pool)
        .await?;
    tracing::info!(child_id, user_id, "child deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> ChildFields {
        ChildFields {
            name: Some("  小明 ".to_string()),
            grade: Some(2),
            semester: Some(1),
            ..ChildFields::default()
        }
    }

    #[test]
    fn validate_trims_name() {
        let mut input = fields();
        input.validate().unwrap();
        assert_eq!(input.name.as_deref(), Some("小明"));
    }

    #[test]
    fn validate_rejects_out_of_range() {
        let mut input = ChildFields {
            grade: Some(7),
            ..fields()
        };
        assert!(input.validate().is_err());

        let mut input = ChildFields {
            semester: Some(3),
            ..fields()
        };
        assert!(input.validate().is_err());

        let mut input = ChildFields {
            gender: Some("other".to_string()),
            ..fields()
        };
        assert!(input.validate().is_err());

        let mut input = ChildFields {
            name: Some(" ".to_string()),
            ..fields()
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn empty_patch_is_valid() {
        assert!(ChildFields::default().validate().is_ok());
    }
}
