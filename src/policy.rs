//! Apply Policy
//!
//! 실행 단위로 구성되는 적용 정책. 행 판정 순서는 고정되어 있습니다:
//! 조건부 건너뛰기 -> 매칭 -> KR 일치 검사 -> 언어별 셀 판정 -> 요청 셀 기록.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{STAMP_APPLIED, STAMP_FILTER_APPLIED};
use crate::matcher::{MatchMode, MatchOutcome};
use crate::models::{CellTag, Language};

/// 매칭 기준
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyMode {
    #[default]
    Id,
    Kr,
}

/// 호출자가 넘기는 적용 옵션
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplyOptions {
    pub mode: ApplyMode,
    pub selected_languages: Vec<Language>,
    pub use_filtered_cache: bool,
    pub kr_match_check: bool,
    pub kr_mismatch_delete: bool,
    pub kr_overwrite: bool,
    pub kr_overwrite_on_kr_mode: bool,
    pub allowed_request_values: Vec<String>,
    pub record_date: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            mode: ApplyMode::Id,
            selected_languages: Language::TARGETS.to_vec(),
            use_filtered_cache: false,
            kr_match_check: false,
            kr_mismatch_delete: false,
            kr_overwrite: false,
            kr_overwrite_on_kr_mode: false,
            allowed_request_values: Vec::new(),
            record_date: false,
        }
    }
}

/// 셀 단위 판정
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellAction {
    Keep,
    Write { value: String, tag: CellTag },
}

/// 셀 판정: `(현재 값, 새 값, 덮어쓰기 허용)`만으로 결정됩니다.
pub fn decide_cell(cur: &str, new: &str, overwrite: bool) -> CellAction {
    let cur = cur.trim();
    let new = new.trim();
    if new.is_empty() || new == cur {
        return CellAction::Keep;
    }
    if cur.is_empty() {
        return CellAction::Write {
            value: new.to_string(),
            tag: CellTag::Fresh,
        };
    }
    if overwrite {
        CellAction::Write {
            value: new.to_string(),
            tag: CellTag::Overwritten,
        }
    } else {
        CellAction::Keep
    }
}

/// 판정에 필요한 행 값 (모두 trim된 값)
#[derive(Debug, Clone, Default)]
pub struct RowView<'r> {
    pub kr: &'r str,
    /// 요청 컬럼이 없으면 `None`
    pub request: Option<&'r str>,
    /// 시트에 컬럼이 있는 선택 언어의 현재 값
    pub cells: Vec<(Language, &'r str)>,
}

/// 행 판정 결과 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    ConditionalSkip,
    NoKey,
    Unmatched,
    KrMismatchSkipped,
    KrMismatchDeleted,
    /// 매칭되어 셀 판정까지 진행됨 (변경이 없을 수도 있음)
    Processed,
}

/// 변경될 셀
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellChange {
    pub language: Language,
    /// 빈 문자열이면 셀 비우기
    pub value: String,
    pub previous: String,
    pub tag: CellTag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDecision {
    pub outcome: RowOutcome,
    pub changes: Vec<CellChange>,
    /// 요청 셀에 기록할 값
    pub stamp: Option<&'static str>,
    /// 매칭된 레코드의 string_id / KR
    pub record_id: String,
    pub record_kr: String,
}

impl RowDecision {
    fn skipped(outcome: RowOutcome) -> Self {
        Self {
            outcome,
            changes: Vec::new(),
            stamp: None,
            record_id: String::new(),
            record_kr: String::new(),
        }
    }
}

/// 검증된 실행 정책
#[derive(Debug, Clone)]
pub struct ApplyPolicy {
    mode: ApplyMode,
    languages: Vec<Language>,
    use_filtered_cache: bool,
    kr_match_check: bool,
    mismatch_delete: bool,
    overwrite: bool,
    allowed_request_values: Option<HashSet<String>>,
    record_date: bool,
}

impl ApplyPolicy {
    pub fn from_options(options: &ApplyOptions) -> Self {
        // KR은 기록 대상이 아니며 처리 순서는 EN, CN, TW, TH 고정
        let languages: Vec<Language> = Language::TARGETS
            .iter()
            .copied()
            .filter(|l| options.selected_languages.contains(l))
            .collect();

        let (kr_match_check, mismatch_delete, overwrite) = match options.mode {
            ApplyMode::Id => (
                options.kr_match_check,
                options.kr_match_check && options.kr_mismatch_delete,
                options.kr_match_check && options.kr_overwrite,
            ),
            ApplyMode::Kr => (false, false, options.kr_overwrite_on_kr_mode),
        };
        if options.mode == ApplyMode::Id && !options.kr_match_check && (options.kr_mismatch_delete || options.kr_overwrite) {
            debug!("krMismatchDelete/krOverwrite have no effect without krMatchCheck");
        }

        let allowed: HashSet<String> = options
            .allowed_request_values
            .iter()
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .collect();

        Self {
            mode: options.mode,
            languages,
            use_filtered_cache: options.use_filtered_cache,
            kr_match_check,
            mismatch_delete,
            overwrite,
            allowed_request_values: (!allowed.is_empty()).then_some(allowed),
            record_date: options.record_date,
        }
    }

    pub fn match_mode(&self) -> MatchMode {
        match (self.mode, self.use_filtered_cache) {
            (ApplyMode::Id, false) => MatchMode::Id,
            (ApplyMode::Id, true) => MatchMode::Filtered,
            (ApplyMode::Kr, false) => MatchMode::Kr,
            (ApplyMode::Kr, true) => MatchMode::FilteredKr,
        }
    }

    pub fn languages(&self) -> &[Language] {
        &self.languages
    }

    pub fn uses_filtered_cache(&self) -> bool {
        self.use_filtered_cache
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    fn stamp_value(&self) -> Option<&'static str> {
        if !self.record_date {
            None
        } else if self.use_filtered_cache {
            Some(STAMP_FILTER_APPLIED)
        } else {
            Some(STAMP_APPLIED)
        }
    }

    fn request_allowed(&self, request: Option<&str>) -> bool {
        match &self.allowed_request_values {
            None => true,
            Some(allowed) => allowed.contains(&request.unwrap_or("").trim().to_lowercase()),
        }
    }

    /// 행 하나를 판정합니다. `resolve`는 조건부 검사를 통과한 뒤에만 호출됩니다.
    pub fn decide_row<'c>(&self, row: &RowView<'_>, resolve: impl FnOnce() -> MatchOutcome<'c>) -> RowDecision {
        if !self.request_allowed(row.request) {
            return RowDecision::skipped(RowOutcome::ConditionalSkip);
        }

        let record = match resolve() {
            MatchOutcome::Matched(record) => record,
            MatchOutcome::NoKey => return RowDecision::skipped(RowOutcome::NoKey),
            MatchOutcome::Unmatched => return RowDecision::skipped(RowOutcome::Unmatched),
        };

        let mut decision = RowDecision {
            outcome: RowOutcome::Processed,
            changes: Vec::new(),
            stamp: None,
            record_id: record.string_id.clone(),
            record_kr: record.kr.clone(),
        };

        if self.mode == ApplyMode::Id && self.kr_match_check && row.kr.trim() != record.kr.trim() {
            if !self.mismatch_delete {
                decision.outcome = RowOutcome::KrMismatchSkipped;
                return decision;
            }
            decision.outcome = RowOutcome::KrMismatchDeleted;
            decision.changes = row
                .cells
                .iter()
                .filter(|(_, cur)| !cur.trim().is_empty())
                .map(|(language, cur)| CellChange {
                    language: *language,
                    value: String::new(),
                    previous: cur.trim().to_string(),
                    tag: CellTag::Blanked,
                })
                .collect();
            decision.stamp = self.stamp_value();
            return decision;
        }

        for (language, cur) in &row.cells {
            if let CellAction::Write { value, tag } = decide_cell(cur, record.text(*language), self.overwrite) {
                decision.changes.push(CellChange {
                    language: *language,
                    value,
                    previous: cur.trim().to_string(),
                    tag,
                });
            }
        }
        if !decision.changes.is_empty() {
            decision.stamp = self.stamp_value();
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TranslationRecord;
    use pretty_assertions::assert_eq;

    fn record(id: &str, kr: &str, cn: &str) -> TranslationRecord {
        TranslationRecord {
            string_id: id.to_string(),
            kr: kr.to_string(),
            cn: cn.to_string(),
            ..Default::default()
        }
    }

    fn id_options() -> ApplyOptions {
        ApplyOptions {
            selected_languages: vec![Language::Cn],
            kr_match_check: true,
            record_date: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_decide_cell_matrix() {
        assert_eq!(decide_cell("", "  ", true), CellAction::Keep);
        assert_eq!(decide_cell(" 书 ", "书", true), CellAction::Keep);
        assert_eq!(
            decide_cell("", " 书 ", false),
            CellAction::Write {
                value: "书".to_string(),
                tag: CellTag::Fresh
            }
        );
        assert_eq!(decide_cell("冊", "书", false), CellAction::Keep);
        assert_eq!(
            decide_cell("冊", "书", true),
            CellAction::Write {
                value: "书".to_string(),
                tag: CellTag::Overwritten
            }
        );
    }

    #[test]
    fn test_fresh_write_stamps_request() {
        let policy = ApplyPolicy::from_options(&id_options());
        let rec = record("S1", "안녕", "你好");
        let row = RowView {
            kr: "안녕",
            request: Some(""),
            cells: vec![(Language::Cn, "")],
        };
        let decision = policy.decide_row(&row, || MatchOutcome::Matched(&rec));
        assert_eq!(decision.outcome, RowOutcome::Processed);
        assert_eq!(decision.changes.len(), 1);
        assert_eq!(decision.changes[0].value, "你好");
        assert_eq!(decision.stamp, Some("적용"));
    }

    #[test]
    fn test_kr_mismatch_skip_and_delete() {
        let rec = record("S1", "안녕", "你好");
        let row = RowView {
            kr: "안녕하세요",
            request: Some(""),
            cells: vec![(Language::Cn, "旧")],
        };

        let skip = ApplyPolicy::from_options(&id_options()).decide_row(&row, || MatchOutcome::Matched(&rec));
        assert_eq!(skip.outcome, RowOutcome::KrMismatchSkipped);
        assert!(skip.changes.is_empty());
        assert_eq!(skip.stamp, None);

        let options = ApplyOptions {
            kr_mismatch_delete: true,
            ..id_options()
        };
        let delete = ApplyPolicy::from_options(&options).decide_row(&row, || MatchOutcome::Matched(&rec));
        assert_eq!(delete.outcome, RowOutcome::KrMismatchDeleted);
        assert_eq!(delete.changes[0].tag, CellTag::Blanked);
        assert_eq!(delete.changes[0].previous, "旧");
        assert_eq!(delete.stamp, Some("적용"));
    }

    #[test]
    fn test_conditional_skip_never_resolves() {
        let options = ApplyOptions {
            allowed_request_values: vec!["신규".to_string(), "Change".to_string()],
            ..id_options()
        };
        let policy = ApplyPolicy::from_options(&options);
        let row = RowView {
            kr: "",
            request: Some("전달"),
            cells: vec![],
        };
        let decision = policy.decide_row(&row, || panic!("must not resolve"));
        assert_eq!(decision.outcome, RowOutcome::ConditionalSkip);

        let row = RowView {
            kr: "",
            request: Some(" CHANGE "),
            cells: vec![],
        };
        let decision = policy.decide_row(&row, || MatchOutcome::Unmatched);
        assert_eq!(decision.outcome, RowOutcome::Unmatched);
    }

    #[test]
    fn test_overwrite_requires_kr_match_check_in_id_mode() {
        let options = ApplyOptions {
            kr_match_check: false,
            kr_overwrite: true,
            ..id_options()
        };
        assert!(!ApplyPolicy::from_options(&options).overwrite());

        let options = ApplyOptions {
            mode: ApplyMode::Kr,
            kr_overwrite_on_kr_mode: true,
            use_filtered_cache: true,
            ..Default::default()
        };
        let policy = ApplyPolicy::from_options(&options);
        assert!(policy.overwrite());
        assert_eq!(policy.match_mode(), MatchMode::FilteredKr);
        assert_eq!(policy.languages(), Language::TARGETS.as_slice());
    }

    #[test]
    fn test_filtered_stamp_value() {
        let options = ApplyOptions {
            use_filtered_cache: true,
            ..id_options()
        };
        let policy = ApplyPolicy::from_options(&options);
        let rec = record("S1", "안녕", "你好");
        let row = RowView {
            kr: "안녕",
            request: None,
            cells: vec![(Language::Cn, "")],
        };
        assert_eq!(
            policy.decide_row(&row, || MatchOutcome::Matched(&rec)).stamp,
            Some("특수필터적용")
        );
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: ApplyOptions =
            serde_json::from_str(r#"{"mode":"kr","allowedRequestValues":["신규"],"selectedLanguages":["TH","EN"]}"#)
                .unwrap();
        assert_eq!(options.mode, ApplyMode::Kr);
        assert!(!options.record_date);
        let policy = ApplyPolicy::from_options(&options);
        assert_eq!(policy.languages(), &[Language::En, Language::Th]);
    }
}
