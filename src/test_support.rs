//! 테스트 공용 헬퍼: rust_xlsxwriter로 픽스처 통합 문서를 만들고 calamine으로 다시 읽습니다.

use std::path::Path;

use calamine::{open_workbook, Reader, Xlsx};
use rust_xlsxwriter::Workbook;

use crate::workbook::cell_to_string;

/// 픽스처 시트 정의 (빈 문자열 셀은 기록하지 않음)
pub(crate) struct SheetSpec {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

impl SheetSpec {
    pub(crate) fn new<R: AsRef<[&'static str]>>(name: &str, rows: &[R]) -> Self {
        Self {
            name: name.to_string(),
            rows: rows
                .iter()
                .map(|r| r.as_ref().iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }
}

pub(crate) fn write_workbook(path: &Path, sheets: &[SheetSpec]) {
    let mut workbook = Workbook::new();
    for spec in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&spec.name).unwrap();
        for (r, row) in spec.rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                if value.is_empty() {
                    continue;
                }
                worksheet.write_string(r as u32, c as u16, value).unwrap();
            }
        }
    }
    workbook.save(path).unwrap();
}

/// 1-based (행, 열) 셀 값
pub(crate) fn read_cell(path: &Path, sheet: &str, row: u32, column: u32) -> String {
    let mut workbook: Xlsx<_> = open_workbook(path).unwrap();
    let range = workbook.worksheet_range(sheet).unwrap();
    range
        .get_value((row - 1, column - 1))
        .map(cell_to_string)
        .unwrap_or_default()
}
