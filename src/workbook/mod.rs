//! Workbook Module
//!
//! 통합 문서 읽기(헤더 행 탐지, 컬럼 분류, 행 순회)와 제자리 패치 저장

mod header;
pub mod patch;
pub mod writer;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use calamine::{open_workbook, Data, Range, Reader, Xlsx};
use tracing::{debug, warn};

use crate::config::HEADER_SCAN_ROWS;
use crate::error::{SyncError, SyncResult};

pub use header::{ColumnRole, HeaderMap, SpecialColumn};

/// 처리 대상 시트인지 판정: `string`으로 시작(대소문자 무시)하고 `#`으로 시작하지 않음
pub fn is_qualifying_sheet(name: &str) -> bool {
    !name.starts_with('#') && name.to_lowercase().starts_with("string")
}

/// 셀 값을 문자열로 변환 (정수형 실수는 소수점 없이)
pub fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        other => other.to_string(),
    }
}

/// 데이터 행 (값은 1-based 열 번호로 접근)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRow {
    /// 1-based 행 번호
    pub row_index: u32,
    values: Vec<String>,
}

impl SheetRow {
    pub fn new(row_index: u32, values: Vec<String>) -> Self {
        Self { row_index, values }
    }

    /// 1-based 열의 원본 값 (범위 밖이면 빈 문자열)
    pub fn get(&self, column: u32) -> &str {
        column
            .checked_sub(1)
            .and_then(|idx| self.values.get(idx as usize))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// 1-based 열의 앞뒤 공백 제거 값
    pub fn trimmed(&self, column: u32) -> &str {
        self.get(column).trim()
    }

    /// A열이 `#`으로 시작하면 비활성 행
    pub fn is_inactive(&self) -> bool {
        self.trimmed(1).starts_with('#')
    }
}

/// 헤더가 확인된 시트
#[derive(Debug)]
pub struct SheetData {
    pub name: String,
    pub header: HeaderMap,
    range: Range<Data>,
}

impl SheetData {
    /// 헤더 다음 행부터 순서대로 데이터 행을 돌려줍니다. STRING_ID가 빈 행도 포함됩니다.
    pub fn rows(&self) -> impl Iterator<Item = SheetRow> + '_ {
        let (first_row, last_row, last_col) = match (self.range.start(), self.range.end()) {
            (Some(_), Some((end_row, end_col))) => (self.header.header_row, end_row + 1, end_col + 1),
            _ => (1, 0, 0),
        };
        // header_row는 1-based이므로 다음 행의 0-based 인덱스와 같다
        (first_row..last_row).map(move |abs_row| {
            let values = (0..last_col)
                .map(|abs_col| {
                    self.range
                        .get_value((abs_row, abs_col))
                        .map(cell_to_string)
                        .unwrap_or_default()
                })
                .collect();
            SheetRow::new(abs_row + 1, values)
        })
    }
}

/// 읽기 전용 통합 문서
pub struct WorkbookReader {
    path: PathBuf,
    workbook: Xlsx<BufReader<File>>,
}

impl WorkbookReader {
    /// 통합 문서를 읽기 전용으로 엽니다.
    pub fn open(path: &Path) -> SyncResult<Self> {
        let workbook: Xlsx<_> =
            open_workbook(path).map_err(|e: calamine::XlsxError| SyncError::source_unavailable(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            workbook,
        })
    }

    /// 처리 대상 시트 이름 (통합 문서 순서)
    pub fn qualifying_sheets(&self) -> Vec<String> {
        self.workbook
            .sheet_names()
            .into_iter()
            .filter(|name| is_qualifying_sheet(name))
            .collect()
    }

    /// 시트를 읽어 헤더를 탐지합니다. 헤더가 없으면 `Ok(None)`,
    /// 시트를 읽을 수 없으면 `MalformedSheet`.
    pub fn read_sheet(&mut self, name: &str) -> SyncResult<Option<SheetData>> {
        let range = self
            .workbook
            .worksheet_range(name)
            .map_err(|e| SyncError::MalformedSheet {
                sheet: name.to_string(),
                reason: e.to_string(),
            })?;

        let Some(header) = detect_header(&range) else {
            debug!(sheet = name, "No STRING_ID header in first {} rows, skipping", HEADER_SCAN_ROWS);
            return Ok(None);
        };

        Ok(Some(SheetData {
            name: name.to_string(),
            header,
            range,
        }))
    }

    /// 모든 처리 대상 시트를 읽습니다. 손상된 시트는 로그만 남기고 건너뜁니다.
    pub fn read_qualifying_sheets(&mut self) -> Vec<SheetData> {
        let mut sheets = Vec::new();
        for name in self.qualifying_sheets() {
            match self.read_sheet(&name) {
                Ok(Some(sheet)) => sheets.push(sheet),
                Ok(None) => {}
                Err(e) => warn!(file = %self.path.display(), "{}", e),
            }
        }
        sheets
    }
}

/// 처음 10행에서 `string_id` 셀이 있는 첫 행을 헤더로 사용합니다.
fn detect_header(range: &Range<Data>) -> Option<HeaderMap> {
    let (_, end_col) = range.end()?;
    for abs_row in 0..HEADER_SCAN_ROWS {
        let cells: Vec<(u32, String)> = (0..=end_col)
            .filter_map(|abs_col| {
                let value = range.get_value((abs_row, abs_col)).map(cell_to_string)?;
                let value = value.trim().to_string();
                (!value.is_empty()).then_some((abs_col + 1, value))
            })
            .collect();

        if cells.iter().any(|(_, v)| v.eq_ignore_ascii_case("string_id")) {
            return HeaderMap::classify(abs_row + 1, cells);
        }
    }
    None
}
