//! 헤더 행 컬럼 분류
//!
//! 헤더 셀은 시트마다 한 번만 {id, 언어, 특수, 기타} 중 하나로 분류되고,
//! 이후의 모든 처리는 이 분류 표를 기준으로 합니다.

use std::collections::BTreeMap;

use crate::config::{REQUEST_COLUMN, SPECIAL_COLUMNS};
use crate::models::Language;
use crate::utils::normalize_special_name;

/// 특수 컬럼 (원본 헤더와 정규화 이름을 함께 보관)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialColumn {
    pub column: u32,
    pub raw: String,
    pub normalized: String,
}

/// 컬럼 역할
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRole {
    StringId,
    Language(Language),
    Special(String),
    Other,
}

/// 시트 헤더 분류 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMap {
    /// 1-based 헤더 행 번호
    pub header_row: u32,
    /// 1-based 열 번호 -> 원본(trim) 헤더 라벨
    pub headers: BTreeMap<u32, String>,
    pub roles: BTreeMap<u32, ColumnRole>,
    pub string_id_column: u32,
    languages: BTreeMap<Language, u32>,
    specials: Vec<SpecialColumn>,
}

impl HeaderMap {
    /// 헤더 셀 목록 `(1-based 열, trim된 라벨)`을 분류합니다.
    /// `string_id` 셀이 없으면 `None`.
    pub fn classify(header_row: u32, cells: Vec<(u32, String)>) -> Option<Self> {
        let string_id_column = cells
            .iter()
            .find(|(_, label)| label.eq_ignore_ascii_case("string_id"))
            .map(|(col, _)| *col)?;

        // 명시적인 CN 컬럼이 있으면 ZH 별칭보다 우선
        let has_explicit_cn = cells.iter().any(|(_, label)| label.eq_ignore_ascii_case("cn"));

        let mut headers = BTreeMap::new();
        let mut roles = BTreeMap::new();
        let mut languages = BTreeMap::new();
        let mut specials = Vec::new();

        for (column, label) in cells {
            let role = if column == string_id_column {
                ColumnRole::StringId
            } else if let Some(language) = Language::from_label(&label) {
                let is_zh_alias = label.eq_ignore_ascii_case("zh");
                if (is_zh_alias && has_explicit_cn) || languages.contains_key(&language) {
                    ColumnRole::Other
                } else {
                    languages.insert(language, column);
                    ColumnRole::Language(language)
                }
            } else {
                let normalized = normalize_special_name(&label);
                if SPECIAL_COLUMNS.contains(normalized.as_str())
                    && !specials.iter().any(|s: &SpecialColumn| s.normalized == normalized)
                {
                    specials.push(SpecialColumn {
                        column,
                        raw: label.clone(),
                        normalized: normalized.clone(),
                    });
                    ColumnRole::Special(normalized)
                } else {
                    ColumnRole::Other
                }
            };
            roles.insert(column, role);
            headers.insert(column, label);
        }

        Some(Self {
            header_row,
            headers,
            roles,
            string_id_column,
            languages,
            specials,
        })
    }

    pub fn language_column(&self, language: Language) -> Option<u32> {
        self.languages.get(&language).copied()
    }

    pub fn specials(&self) -> &[SpecialColumn] {
        &self.specials
    }

    /// 정규화 이름으로 특수 컬럼 조회
    pub fn special_column(&self, normalized: &str) -> Option<&SpecialColumn> {
        self.specials.iter().find(|s| s.normalized == normalized)
    }

    /// `#번역요청` 컬럼 번호
    pub fn request_column(&self) -> Option<u32> {
        self.special_column(REQUEST_COLUMN).map(|s| s.column)
    }
}
