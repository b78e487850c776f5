//! Translation Cache
//!
//! 로드된 레코드의 조회 계층: string_id 전역, 파일/시트 범위, KR 원문, 특수 필터.
//! 중복 충돌이 있는 string_id는 중재가 끝날 때까지 어느 계층에도 들어가지 않습니다.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::info;

use crate::models::{SpecialColumnReport, TranslationRecord};
use crate::source::{RecordGroup, RecordGroups};
use crate::utils::normalize_special_name;

type Tier = HashMap<String, Arc<TranslationRecord>>;

/// 특수 컬럼 값으로 걸러낸 레코드 집합
#[derive(Debug, Default)]
struct FilteredTier {
    records: Tier,
    report: SpecialColumnReport,
}

/// 중재 대기 중인 string_id와 후보들
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictSet {
    pub string_id: String,
    pub candidates: Vec<TranslationRecord>,
}

#[derive(Debug, Default)]
pub struct TranslationCache {
    by_id: Tier,
    /// 소문자 파일명 -> string_id -> 레코드
    by_file_id: HashMap<String, Tier>,
    /// 소문자 시트명 -> string_id -> 레코드
    by_sheet_id: HashMap<String, Tier>,
    /// trim된 KR 원문 -> 처음 본 레코드
    by_kr: Tier,
    filtered: Option<FilteredTier>,
}

impl TranslationCache {
    /// 그룹에서 캐시를 만듭니다. 충돌 그룹은 `ConflictSet`으로 돌려줍니다.
    pub fn build(groups: RecordGroups) -> (Self, Vec<ConflictSet>) {
        let mut cache = Self::default();
        let mut conflicts = Vec::new();
        for (string_id, group) in groups.into_ordered() {
            match group {
                RecordGroup::Unique(record) => cache.insert(record),
                RecordGroup::Conflict(candidates) => conflicts.push(ConflictSet { string_id, candidates }),
            }
        }
        info!(
            by_id = cache.by_id.len(),
            by_kr = cache.by_kr.len(),
            conflicts = conflicts.len(),
            "Translation cache built"
        );
        (cache, conflicts)
    }

    /// 레코드 하나를 모든 계층에 추가합니다. 중재 결과도 이 경로로 들어옵니다.
    pub fn insert(&mut self, record: TranslationRecord) {
        let record = Arc::new(record);
        let id = record.string_id.clone();

        self.by_file_id
            .entry(record.file_name.to_lowercase())
            .or_default()
            .insert(id.clone(), Arc::clone(&record));
        self.by_sheet_id
            .entry(record.sheet_name.to_lowercase())
            .or_default()
            .insert(id.clone(), Arc::clone(&record));

        let kr = record.kr.trim();
        if !kr.is_empty() && !self.by_kr.contains_key(kr) {
            self.by_kr.insert(kr.to_string(), Arc::clone(&record));
        }

        self.by_id.insert(id, record);
    }

    pub fn by_id(&self, string_id: &str) -> Option<&TranslationRecord> {
        self.by_id.get(string_id).map(Arc::as_ref)
    }

    pub fn by_file_id(&self, file_lower: &str, string_id: &str) -> Option<&TranslationRecord> {
        self.by_file_id
            .get(file_lower)
            .and_then(|tier| tier.get(string_id))
            .map(Arc::as_ref)
    }

    pub fn by_sheet_id(&self, sheet_lower: &str, string_id: &str) -> Option<&TranslationRecord> {
        self.by_sheet_id
            .get(sheet_lower)
            .and_then(|tier| tier.get(string_id))
            .map(Arc::as_ref)
    }

    pub fn by_kr(&self, kr: &str) -> Option<&TranslationRecord> {
        self.by_kr.get(kr.trim()).map(Arc::as_ref)
    }

    pub fn filtered(&self, string_id: &str) -> Option<&TranslationRecord> {
        self.filtered
            .as_ref()
            .and_then(|f| f.records.get(string_id))
            .map(Arc::as_ref)
    }

    pub fn has_filter(&self) -> bool {
        self.filtered.is_some()
    }

    pub fn filter_report(&self) -> Option<&SpecialColumnReport> {
        self.filtered.as_ref().map(|f| &f.report)
    }

    pub fn id_count(&self) -> usize {
        self.by_id.len()
    }

    pub fn kr_count(&self) -> usize {
        self.by_kr.len()
    }

    /// `column` 값에 `value`가 (대소문자 무시) 포함된 레코드로 특수 필터 계층을 만듭니다.
    pub fn build_special_filter(&mut self, column: &str, value: &str) -> SpecialColumnReport {
        let column = normalize_special_name(column);
        let needle = value.trim().to_lowercase();

        let records: Tier = self
            .by_id
            .iter()
            .filter(|(_, record)| {
                record
                    .special_columns
                    .get(&column)
                    .map(|v| v.to_lowercase().contains(&needle))
                    .unwrap_or(false)
            })
            .map(|(id, record)| (id.clone(), Arc::clone(record)))
            .collect();

        let report = self.report_for(&column, Some(value.trim().to_string()), records.values());
        info!(column = %column, value = %value, matched = report.matched_rows, "Special filter built");
        self.filtered = Some(FilteredTier {
            records,
            report: report.clone(),
        });
        report
    }

    /// 특수 필터가 있으면 같은 조건으로 다시 만듭니다. 중재 결과가 `by_id`에 들어온 뒤 호출합니다.
    pub fn refresh_special_filter(&mut self) -> Option<SpecialColumnReport> {
        let (column, value) = {
            let report = &self.filtered.as_ref()?.report;
            (report.column.clone(), report.required_value.clone().unwrap_or_default())
        };
        Some(self.build_special_filter(&column, &value))
    }

    /// 특수 컬럼 분석: 값이 있는 레코드 수와 값 분포를 집계합니다.
    pub fn analyze_special_column(&self, column: &str) -> SpecialColumnReport {
        let column = normalize_special_name(column);
        let matched = self
            .by_id
            .values()
            .filter(|record| record.special_columns.get(&column).is_some_and(|v| !v.is_empty()));
        self.report_for(&column, None, matched)
    }

    fn report_for<'r>(
        &self,
        column: &str,
        required_value: Option<String>,
        matched: impl Iterator<Item = &'r Arc<TranslationRecord>>,
    ) -> SpecialColumnReport {
        let mut matched_rows = 0;
        let mut sheets = BTreeSet::new();
        for record in matched {
            matched_rows += 1;
            sheets.insert(record.sheet_name.clone());
        }

        let mut frequency: HashMap<&str, usize> = HashMap::new();
        for record in self.by_id.values() {
            if let Some(value) = record.special_columns.get(column).filter(|v| !v.is_empty()) {
                *frequency.entry(value.as_str()).or_default() += 1;
            }
        }

        let mut distinct_values: Vec<String> = frequency.keys().map(|v| v.to_string()).collect();
        distinct_values.sort();

        let mut top_values: Vec<(String, usize)> =
            frequency.into_iter().map(|(v, n)| (v.to_string(), n)).collect();
        top_values.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_values.truncate(5);

        SpecialColumnReport {
            column: column.to_string(),
            required_value,
            matched_rows,
            distinct_values,
            top_values,
            sheets: sheets.into_iter().collect(),
        }
    }
}
