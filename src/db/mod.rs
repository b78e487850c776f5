//! Database Module
//!
//! 소스 통합 문서별 파생 캐시(SQLite) 관리. 외부 번역 DB는 `store` 모듈이 담당합니다.

pub mod schema;
pub mod store;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::error::SyncResult;
use crate::models::{RecordStatus, SheetInfo, TranslationRecord};

pub use store::TranslationStore;

/// 컬럼 값을 타입과 무관하게 문자열로 읽습니다 (NULL은 빈 문자열).
pub(crate) fn text_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    })
}

/// 파생 캐시 테이블의 공통 SELECT 컬럼 순서
const DERIVED_COLUMNS: &str =
    "string_id, kr, cn, tw, en, th, file_name, sheet_name, special_columns";

fn derived_record(row: &Row<'_>) -> rusqlite::Result<(TranslationRecord, String)> {
    let record = TranslationRecord {
        string_id: text_column(row, 0)?,
        kr: text_column(row, 1)?,
        cn: text_column(row, 2)?,
        tw: text_column(row, 3)?,
        en: text_column(row, 4)?,
        th: text_column(row, 5)?,
        file_name: text_column(row, 6)?,
        sheet_name: text_column(row, 7)?,
        status: RecordStatus::Active,
        update_date: None,
        special_columns: BTreeMap::new(),
    };
    Ok((record, text_column(row, 8)?))
}

/// 소스 통합 문서 하나에 대응하는 파생 캐시
pub struct DerivedCache {
    conn: Connection,
    path: PathBuf,
}

impl DerivedCache {
    /// 파생 캐시 파일 열기 (없으면 생성)
    pub fn open(path: &Path) -> SyncResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// 메타데이터 값 조회. 테이블이 없거나 파일이 손상되었으면 에러.
    pub fn metadata(&self, key: &str) -> SyncResult<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?;
        Ok(value.flatten())
    }

    /// 테이블을 다시 만들고 레코드를 기록합니다.
    /// `records`는 string_id별 최종 행, `superseded`는 번역 필드가 다른 이전 출현입니다.
    pub fn rebuild(
        &mut self,
        metadata: &[(&str, String)],
        records: &[TranslationRecord],
        superseded: &[TranslationRecord],
    ) -> SyncResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(schema::RESET_DERIVED_SCHEMA)?;

        {
            let mut meta_stmt = tx.prepare("INSERT INTO metadata (key, value) VALUES (?1, ?2)")?;
            for (key, value) in metadata {
                meta_stmt.execute(params![key, value])?;
            }

            let mut insert = tx.prepare(&format!(
                "INSERT OR REPLACE INTO translation_data ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                DERIVED_COLUMNS
            ))?;
            for record in records {
                insert.execute(Self::record_params(record)?.as_params())?;
            }

            let mut insert_dup = tx.prepare(&format!(
                "INSERT INTO duplicate_data ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                DERIVED_COLUMNS
            ))?;
            for record in superseded {
                insert_dup.execute(Self::record_params(record)?.as_params())?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn record_params(record: &TranslationRecord) -> SyncResult<RecordParams<'_>> {
        Ok(RecordParams {
            record,
            special_json: serde_json::to_string(&record.special_columns)?,
        })
    }

    /// 저장된 레코드를 순서대로 읽습니다: translation_data 다음 duplicate_data.
    pub fn records(&self) -> SyncResult<Vec<TranslationRecord>> {
        let mut out = Vec::new();
        for table in ["translation_data", "duplicate_data"] {
            let mut stmt = self
                .conn
                .prepare(&format!("SELECT {} FROM {} ORDER BY rowid", DERIVED_COLUMNS, table))?;
            let iter = stmt.query_map([], derived_record)?;
            for row in iter {
                let (mut record, special_json) = row?;
                if !special_json.trim().is_empty() {
                    record.special_columns = serde_json::from_str(&special_json)?;
                }
                out.push(record);
            }
        }
        Ok(out)
    }

    /// 시트별 행 수
    pub fn sheet_counts(&self) -> SyncResult<Vec<SheetInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT file_name, sheet_name, COUNT(*) FROM translation_data
             GROUP BY file_name, sheet_name ORDER BY MIN(rowid)",
        )?;
        let iter = stmt.query_map([], |row| {
            Ok(SheetInfo {
                file_name: text_column(row, 0)?,
                sheet_name: text_column(row, 1)?,
                rows: row.get::<_, i64>(2)?.max(0) as u64,
            })
        })?;
        let mut sheets = Vec::new();
        for sheet in iter {
            sheets.push(sheet?);
        }
        Ok(sheets)
    }

    /// string_id가 이 캐시에 존재하는지 (중복 테이블 포함)
    pub fn mentions(&self, string_id: &str) -> SyncResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT (SELECT COUNT(*) FROM translation_data WHERE string_id = ?1)
                  + (SELECT COUNT(*) FROM duplicate_data WHERE string_id = ?1)",
            [string_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// 중재 결과를 기록: 최종 행을 교체하고 남은 중복 행을 삭제합니다.
    pub fn replace_record(&mut self, record: &TranslationRecord) -> SyncResult<()> {
        let tx = self.conn.transaction()?;
        let params = Self::record_params(record)?;
        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO translation_data ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                DERIVED_COLUMNS
            ),
            params.as_params(),
        )?;
        tx.execute("DELETE FROM duplicate_data WHERE string_id = ?1", [&record.string_id])?;
        tx.commit()?;
        debug!(cache = %self.path.display(), string_id = %record.string_id, "Derived cache record replaced");
        Ok(())
    }
}

struct RecordParams<'a> {
    record: &'a TranslationRecord,
    special_json: String,
}

impl<'a> RecordParams<'a> {
    fn as_params(&self) -> [&dyn rusqlite::ToSql; 9] {
        let r = self.record;
        [
            &r.string_id,
            &r.kr,
            &r.cn,
            &r.tw,
            &r.en,
            &r.th,
            &r.file_name,
            &r.sheet_name,
            &self.special_json,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn record(id: &str, kr: &str, sheet: &str) -> TranslationRecord {
        let mut special_columns = BTreeMap::new();
        special_columns.insert("번역요청".to_string(), "신규".to_string());
        TranslationRecord {
            string_id: id.to_string(),
            kr: kr.to_string(),
            en: format!("{}-en", id),
            file_name: "master.xlsx".to_string(),
            sheet_name: sheet.to_string(),
            special_columns,
            ..Default::default()
        }
    }

    #[test]
    fn test_rebuild_and_read_back_in_order() {
        let dir = tempdir().unwrap();
        let mut cache = DerivedCache::open(&dir.path().join("cache_x.sqlite")).unwrap();
        let records = vec![record("S2", "둘", "string_a"), record("S1", "하나", "string_b")];
        let superseded = vec![record("S2", "이", "string_a")];
        cache
            .rebuild(&[(schema::META_SOURCE_MOD_TIME, "123".to_string())], &records, &superseded)
            .unwrap();

        assert_eq!(cache.metadata(schema::META_SOURCE_MOD_TIME).unwrap().as_deref(), Some("123"));
        let read = cache.records().unwrap();
        let ids: Vec<_> = read.iter().map(|r| (r.string_id.as_str(), r.kr.as_str())).collect();
        assert_eq!(ids, vec![("S2", "둘"), ("S1", "하나"), ("S2", "이")]);
        assert_eq!(read[0].special_columns.get("번역요청").map(String::as_str), Some("신규"));

        let sheets = cache.sheet_counts().unwrap();
        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[0].sheet_name, "string_a");
    }

    #[test]
    fn test_replace_record_clears_duplicates() {
        let dir = tempdir().unwrap();
        let mut cache = DerivedCache::open(&dir.path().join("cache_y.sqlite")).unwrap();
        cache
            .rebuild(&[], &[record("S4", "가", "string_a")], &[record("S4", "나", "string_a")])
            .unwrap();
        assert!(cache.mentions("S4").unwrap());

        cache.replace_record(&record("S4", "다", "string_a")).unwrap();
        let read = cache.records().unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].kr, "다");
        assert!(!cache.mentions("S9").unwrap());
    }

    #[test]
    fn test_garbage_file_reports_error_on_query() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache_bad.sqlite");
        std::fs::write(&path, b"this is not a database at all, just bytes").unwrap();
        let result = DerivedCache::open(&path).and_then(|c| c.metadata(schema::META_SOURCE_MOD_TIME));
        assert!(result.is_err());
    }
}
