use std::path::{Path, PathBuf};

use sqlx::SqlitePool;
use thiserror::Error;

use crate::services::curriculum::{import_items, ImportItem, ImportReport};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid curriculum json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Rows of an import file that decoded, plus how many did not.
#[derive(Debug, Default)]
pub struct ParsedItems {
    pub items: Vec<ImportItem>,
    pub malformed: usize,
}

/// 文件必须是 JSON 数组；单行字段类型不符只跳过该行
pub fn parse_items(raw: &str) -> Result<ParsedItems, ImportError> {
    let rows: Vec<serde_json::Value> = serde_json::from_str(raw)?;
    let mut parsed = ParsedItems::default();
    for (index, row) in rows.into_iter().enumerate() {
        match serde_json::from_value::<ImportItem>(row) {
            Ok(item) => parsed.items.push(item),
            Err(err) => {
                tracing::warn!(row = index, error = %err, "skipping malformed curriculum row");
                parsed.malformed += 1;
            }
        }
    }
    Ok(parsed)
}

/// 从 JSON 文件导入语文词表
pub async fn import_file(pool: &SqlitePool, path: &Path) -> Result<ImportReport, ImportError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ImportError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let parsed = parse_items(&raw)?;
    let mut report = import_items(pool, &parsed.items).await?;
    report.skipped += parsed.malformed;

    tracing::info!(
        path = %path.display(),
        inserted = report.inserted,
        updated = report.updated,
        skipped = report.skipped,
        "curriculum import finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::db::DatabaseProxy;

    #[test]
    fn rejects_non_array_json() {
        assert!(matches!(parse_items(r#"{"word":"山"}"#), Err(ImportError::Parse(_))));
        assert!(parse_items("[]").unwrap().items.is_empty());
    }

    #[test]
    fn mistyped_rows_are_counted_not_fatal() {
        let parsed = parse_items(
            r#"[
                { "grade": 1, "semester": 1, "unit": 1, "word": "山" },
                { "grade": "one", "semester": 1, "unit": 1, "word": "水" },
                "not an object",
                { "grade": 1, "semester": 1, "unit": 2, "word": "田" }
            ]"#,
        )
        .unwrap();
        assert_eq!(parsed.malformed, 2);
        let words: Vec<&str> = parsed.items.iter().map(|item| item.word.as_str()).collect();
        assert_eq!(words, vec!["山", "田"]);
    }

    #[tokio::test]
    async fn import_file_reports_malformed_rows_as_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("yuwen.json");
        std::fs::write(
            &path,
            r#"[
                { "grade": 1, "semester": 1, "unit": 1, "word": "山", "pinyin": "shān" },
                { "grade": 1, "semester": 1, "unit": [1], "word": "水" },
                { "grade": 1, "semester": 1, "unit": 1, "word": "田" }
            ]"#,
        )
        .unwrap();
        let db = DatabaseProxy::connect("sqlite::memory:", 1).await.unwrap();

        let report = import_file(db.pool(), &path).await.unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.skipped, 1);

        let missing = import_file(db.pool(), &dir.path().join("absent.json")).await;
        assert!(matches!(missing, Err(ImportError::Read { .. })));
    }
}
