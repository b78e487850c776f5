//! locsync Data Models
//!
//! 번역 레코드, 언어 태그, 로드/적용 통계 등 엔진 전반에서 공유하는 데이터 모델

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 언어 태그
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Language {
    Kr,
    En,
    Cn,
    Tw,
    Th,
}

impl Language {
    /// 적용 대상 언어 (고정 처리 순서)
    pub const TARGETS: [Language; 4] = [Language::En, Language::Cn, Language::Tw, Language::Th];

    pub fn as_str(self) -> &'static str {
        match self {
            Language::Kr => "KR",
            Language::En => "EN",
            Language::Cn => "CN",
            Language::Tw => "TW",
            Language::Th => "TH",
        }
    }

    /// 헤더 라벨을 언어 태그로 해석 (`ZH`는 `CN` 별칭)
    pub fn from_label(label: &str) -> Option<Language> {
        match label.trim().to_uppercase().as_str() {
            "KR" => Some(Language::Kr),
            "EN" => Some(Language::En),
            "CN" | "ZH" => Some(Language::Cn),
            "TW" => Some(Language::Tw),
            "TH" => Some(Language::Th),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 레코드 활성 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    #[default]
    Active,
    Inactive,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Inactive => "inactive",
        }
    }

    /// DB `status` 값 해석. `active`(또는 빈 값)만 활성
    pub fn from_db(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("active") {
            RecordStatus::Active
        } else {
            RecordStatus::Inactive
        }
    }
}

/// 번역 레코드 (캐시에 적재된 후에는 변경되지 않음)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationRecord {
    pub string_id: String,
    pub kr: String,
    pub en: String,
    pub cn: String,
    pub tw: String,
    pub th: String,
    pub file_name: String,
    pub sheet_name: String,
    #[serde(default)]
    pub status: RecordStatus,
    #[serde(default)]
    pub update_date: Option<String>,
    /// 정규화된 특수 컬럼 이름 -> 셀 값
    #[serde(default)]
    pub special_columns: BTreeMap<String, String>,
}

impl TranslationRecord {
    pub fn text(&self, language: Language) -> &str {
        match language {
            Language::Kr => &self.kr,
            Language::En => &self.en,
            Language::Cn => &self.cn,
            Language::Tw => &self.tw,
            Language::Th => &self.th,
        }
    }

    pub fn set_text(&mut self, language: Language, value: String) {
        match language {
            Language::Kr => self.kr = value,
            Language::En => self.en = value,
            Language::Cn => self.cn = value,
            Language::Tw => self.tw = value,
            Language::Th => self.th = value,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }

    /// 모든 문자열 필드의 앞뒤 공백 제거
    pub fn normalized(mut self) -> Self {
        fn trim_in_place(s: &mut String) {
            let trimmed = s.trim();
            if trimmed.len() != s.len() {
                *s = trimmed.to_string();
            }
        }
        trim_in_place(&mut self.string_id);
        trim_in_place(&mut self.kr);
        trim_in_place(&mut self.en);
        trim_in_place(&mut self.cn);
        trim_in_place(&mut self.tw);
        trim_in_place(&mut self.th);
        trim_in_place(&mut self.file_name);
        trim_in_place(&mut self.sheet_name);
        if let Some(date) = self.update_date.as_mut() {
            trim_in_place(date);
        }
        self.special_columns = std::mem::take(&mut self.special_columns)
            .into_iter()
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        self
    }

    /// 번역 필드(KR + 대상 언어)가 같은지 비교. 출처/특수 컬럼은 무시합니다.
    pub fn same_translation(&self, other: &TranslationRecord) -> bool {
        self.kr.trim() == other.kr.trim()
            && Language::TARGETS
                .iter()
                .all(|&lang| self.text(lang).trim() == other.text(lang).trim())
    }
}

/// 시트 정보 (prepare_source 결과)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetInfo {
    pub file_name: String,
    pub sheet_name: String,
    pub rows: u64,
}

/// prepare_source 결과
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetList {
    pub sheets: Vec<SheetInfo>,
    /// 파생 캐시를 새로 만들었는지 여부 (DB 소스는 항상 false)
    pub rebuilt: bool,
}

/// load 결과
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadStats {
    pub records_read: usize,
    pub unique_ids: usize,
    pub conflicting_ids: usize,
    pub by_id: usize,
    pub by_kr: usize,
    pub files: usize,
    pub sheets: usize,
    pub inactive_skipped: usize,
    pub rebuilt_caches: usize,
    pub special_filter: Option<SpecialColumnReport>,
}

/// 특수 컬럼 분석 리포트
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecialColumnReport {
    pub column: String,
    pub required_value: Option<String>,
    pub matched_rows: usize,
    pub distinct_values: Vec<String>,
    /// (값, 빈도) 내림차순 상위 5개
    pub top_values: Vec<(String, usize)>,
    pub sheets: Vec<String>,
}

/// 셀 시각 태그 (스타일 힌트)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CellTag {
    Fresh,
    Overwritten,
    Blanked,
}

/// 변경된 셀 위치와 태그
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellMark {
    pub sheet: String,
    pub row: u32,
    pub column: u32,
    pub tag: CellTag,
}

/// 덮어쓰기 감사 로그 항목
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverwriteEntry {
    pub file: String,
    pub sheet: String,
    pub string_id: String,
    pub language: Language,
    pub kr_text: String,
    pub old_text: String,
    pub new_text: String,
}

/// 파일 단위 적용 통계
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyStats {
    pub file: String,
    pub sheets: usize,
    pub rows_visited: usize,
    pub updated: usize,
    pub overwritten: usize,
    pub kr_mismatch_skipped: usize,
    pub kr_mismatch_deleted: usize,
    pub conditional_skipped: usize,
    pub unmatched: usize,
    pub no_key: usize,
    pub cells_blanked: usize,
    pub request_stamped: usize,
    pub saved: bool,
    pub overwrite_log: Vec<OverwriteEntry>,
    pub cell_marks: Vec<CellMark>,
}

impl ApplyStats {
    pub fn has_writes(&self) -> bool {
        self.updated > 0 || self.overwritten > 0 || self.cells_blanked > 0 || self.request_stamped > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_label_honors_zh_alias() {
        assert_eq!(Language::from_label(" zh "), Some(Language::Cn));
        assert_eq!(Language::from_label("Th"), Some(Language::Th));
        assert_eq!(Language::from_label("JP"), None);
    }

    #[test]
    fn test_normalized_trims_every_field() {
        let mut specials = BTreeMap::new();
        specials.insert(" 번역요청 ".to_string(), " 신규 ".to_string());
        let record = TranslationRecord {
            string_id: "  S1 ".to_string(),
            kr: " 안녕 ".to_string(),
            cn: "你好\n".to_string(),
            special_columns: specials,
            ..Default::default()
        }
        .normalized();

        assert_eq!(record.string_id, "S1");
        assert_eq!(record.kr, "안녕");
        assert_eq!(record.cn, "你好");
        assert_eq!(record.special_columns.get("번역요청").map(String::as_str), Some("신규"));
    }

    #[test]
    fn test_same_translation_ignores_provenance() {
        let a = TranslationRecord {
            string_id: "S1".to_string(),
            kr: "책".to_string(),
            file_name: "a.xlsx".to_string(),
            ..Default::default()
        };
        let mut b = a.clone();
        b.file_name = "b.xlsx".to_string();
        assert!(a.same_translation(&b));
        b.en = "book".to_string();
        assert!(!a.same_translation(&b));
    }
}
