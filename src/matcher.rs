//! Row Matcher
//!
//! 작업 파일의 행 하나를 캐시 레코드에 대응시킵니다.

use crate::cache::TranslationCache;

/// 매칭 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// string_id 기준: 파일 범위 -> 시트 범위 -> 전역
    Id,
    /// KR 원문 기준
    Kr,
    /// 특수 필터 계층만 사용 (string_id 기준)
    Filtered,
    /// KR 원문 기준이지만 특수 필터에 포함된 레코드만 허용
    FilteredKr,
}

/// 행 키 (trim된 값)
#[derive(Debug, Clone, Copy)]
pub struct RowKey<'r> {
    pub string_id: &'r str,
    pub kr: &'r str,
}

impl<'r> RowKey<'r> {
    pub fn new(string_id: &'r str, kr: &'r str) -> Self {
        Self {
            string_id: string_id.trim(),
            kr: kr.trim(),
        }
    }
}

/// 매칭 결과
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchOutcome<'c> {
    Matched(&'c crate::models::TranslationRecord),
    /// 키는 있으나 대응 레코드 없음
    Unmatched,
    /// 현재 모드에 필요한 키가 비어 있음
    NoKey,
}

/// 시트 하나를 처리하는 동안 사용하는 매처
pub struct Matcher<'c> {
    cache: &'c TranslationCache,
    mode: MatchMode,
    file_lower: String,
    sheet_lower: String,
}

impl<'c> Matcher<'c> {
    pub fn new(cache: &'c TranslationCache, mode: MatchMode, file_name: &str, sheet_name: &str) -> Self {
        Self {
            cache,
            mode,
            file_lower: file_name.to_lowercase(),
            sheet_lower: sheet_name.to_lowercase(),
        }
    }

    pub fn resolve(&self, key: &RowKey<'_>) -> MatchOutcome<'c> {
        let found = match self.mode {
            MatchMode::Id => {
                if key.string_id.is_empty() {
                    return MatchOutcome::NoKey;
                }
                self.cache
                    .by_file_id(&self.file_lower, key.string_id)
                    .or_else(|| self.cache.by_sheet_id(&self.sheet_lower, key.string_id))
                    .or_else(|| self.cache.by_id(key.string_id))
            }
            MatchMode::Filtered => {
                if key.string_id.is_empty() {
                    return MatchOutcome::NoKey;
                }
                self.cache.filtered(key.string_id)
            }
            MatchMode::Kr | MatchMode::FilteredKr => {
                if key.kr.is_empty() {
                    return MatchOutcome::NoKey;
                }
                let hit = self.cache.by_kr(key.kr);
                if self.mode == MatchMode::FilteredKr {
                    hit.filter(|record| self.cache.filtered(&record.string_id).is_some())
                } else {
                    hit
                }
            }
        };
        found.map_or(MatchOutcome::Unmatched, MatchOutcome::Matched)
    }
}
