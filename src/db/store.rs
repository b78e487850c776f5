//! 외부 번역 DB (translation_data 테이블을 가진 SQLite 파일)

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags};
use tracing::{debug, info};

use super::text_column;
use crate::error::{SyncError, SyncResult};
use crate::models::{RecordStatus, SheetInfo, TranslationRecord};

const STORE_COLUMNS: &str =
    "string_id, kr, en, cn, tw, th, file_name, sheet_name, status, update_date";

pub struct TranslationStore {
    conn: Connection,
    path: PathBuf,
}

impl TranslationStore {
    /// 기존 DB 파일을 엽니다. 파일이 없으면 `SourceUnavailable`,
    /// `translation_data` 테이블이 없으면 `SchemaMissing`.
    pub fn open(path: &Path) -> SyncResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| SyncError::source_unavailable(path, e))?;

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'translation_data'",
                [],
                |row| row.get(0),
            )
            .map_err(|e| SyncError::source_unavailable(path, e))?;
        if tables == 0 {
            return Err(SyncError::SchemaMissing(path.display().to_string()));
        }

        debug!(db = %path.display(), "Translation store opened");
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// 새 DB 파일을 만들고 스키마를 생성합니다.
    pub fn create(path: &Path) -> SyncResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(super::schema::CREATE_TRANSLATION_STORE)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// 모든 레코드를 rowid 순으로 읽습니다. 비활성 여부는 `status`에 담깁니다.
    pub fn records(&self) -> SyncResult<Vec<TranslationRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM translation_data ORDER BY rowid",
            STORE_COLUMNS
        ))?;
        let iter = stmt.query_map([], |row| {
            let status = text_column(row, 8)?;
            let update_date = text_column(row, 9)?;
            Ok(TranslationRecord {
                string_id: text_column(row, 0)?,
                kr: text_column(row, 1)?,
                en: text_column(row, 2)?,
                cn: text_column(row, 3)?,
                tw: text_column(row, 4)?,
                th: text_column(row, 5)?,
                file_name: text_column(row, 6)?,
                sheet_name: text_column(row, 7)?,
                status: RecordStatus::from_db(&status),
                update_date: (!update_date.is_empty()).then_some(update_date),
                special_columns: Default::default(),
            })
        })?;

        let mut records = Vec::new();
        for record in iter {
            records.push(record?);
        }
        Ok(records)
    }

    /// 활성 레코드의 (파일, 시트)별 행 수
    pub fn sheet_list(&self) -> SyncResult<Vec<SheetInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT file_name, sheet_name, COUNT(*) FROM translation_data
             WHERE status = 'active'
             GROUP BY file_name, sheet_name ORDER BY file_name, sheet_name",
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

    /// 중재 결과 반영: 같은 string_id 행을 갱신하고, 없으면 새로 추가합니다.
    pub fn write_resolution(&mut self, record: &TranslationRecord) -> SyncResult<()> {
        let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let tx = self.conn.transaction()?;
        let updated = tx.execute(
            "UPDATE translation_data
             SET kr = ?2, en = ?3, cn = ?4, tw = ?5, th = ?6,
                 file_name = ?7, sheet_name = ?8, status = 'active', update_date = ?9
             WHERE string_id = ?1",
            params![
                record.string_id,
                record.kr,
                record.en,
                record.cn,
                record.tw,
                record.th,
                record.file_name,
                record.sheet_name,
                now
            ],
        )?;
        if updated == 0 {
            tx.execute(
                &format!(
                    "INSERT INTO translation_data ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'active', ?9)",
                    STORE_COLUMNS
                ),
                params![
                    record.string_id,
                    record.kr,
                    record.en,
                    record.cn,
                    record.tw,
                    record.th,
                    record.file_name,
                    record.sheet_name,
                    now
                ],
            )?;
        }
        tx.commit()?;
        info!(
            db = %self.path.display(),
            string_id = %record.string_id,
            inserted = updated == 0,
            "Resolution written to translation store"
        );
        Ok(())
    }

    /// 레코드 추가 (테스트/가져오기용)
    pub fn insert(&mut self, record: &TranslationRecord) -> SyncResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO translation_data ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                STORE_COLUMNS
            ),
            params![
                record.string_id,
                record.kr,
                record.en,
                record.cn,
                record.tw,
                record.th,
                record.file_name,
                record.sheet_name,
                record.status.as_str(),
                record.update_date
            ],
        )?;
        Ok(())
    }
}
