//! Duplicate Arbiter
//!
//! 번역 필드가 다른 중복 string_id를 보관하고, 호출자의 선택을 검증해 확정 레코드를 돌려줍니다.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::ConflictSet;
use crate::error::{SyncError, SyncResult};
use crate::models::{Language, RecordStatus, TranslationRecord};
use crate::utils::normalize_special_name;

/// 호출자가 고르는 해결 방법
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionChoice {
    /// 후보 목록의 인덱스
    Candidate(usize),
    /// 사람이 직접 입력한 레코드 (string_id는 키로 고정)
    Record(TranslationRecord),
}

/// 화면 표시용 후보
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateView {
    pub index: usize,
    pub file_name: String,
    pub sheet_name: String,
    pub texts: BTreeMap<Language, String>,
    /// 요청한 추가 컬럼 값 (언어 라벨 또는 특수 컬럼 이름)
    pub surfaced: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictView {
    pub string_id: String,
    pub candidates: Vec<CandidateView>,
}

#[derive(Debug, Default)]
pub struct DuplicateArbiter {
    pending: Vec<ConflictSet>,
}

impl DuplicateArbiter {
    pub fn new(pending: Vec<ConflictSet>) -> Self {
        Self { pending }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_settled(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending_ids(&self) -> Vec<&str> {
        self.pending.iter().map(|c| c.string_id.as_str()).collect()
    }

    /// 대기 중인 충돌을 표시용으로 변환합니다.
    pub fn present(&self, surface_columns: &[String]) -> Vec<ConflictView> {
        self.pending
            .iter()
            .map(|conflict| ConflictView {
                string_id: conflict.string_id.clone(),
                candidates: conflict
                    .candidates
                    .iter()
                    .enumerate()
                    .map(|(index, record)| candidate_view(index, record, surface_columns))
                    .collect(),
            })
            .collect()
    }

    /// 선택을 검증하고 적용합니다. 하나라도 잘못되면 아무것도 바꾸지 않습니다.
    /// 해결된 string_id는 대기 목록에서 빠지고 확정 레코드가 대기 목록 순서로 반환됩니다.
    pub fn resolve(&mut self, resolutions: &HashMap<String, ResolutionChoice>) -> SyncResult<Vec<TranslationRecord>> {
        if let Some(unknown) = resolutions
            .keys()
            .filter(|id| !self.pending.iter().any(|c| &c.string_id == *id))
            .min()
        {
            return Err(SyncError::InvalidOperation(format!(
                "'{}' is not awaiting arbitration",
                unknown
            )));
        }

        let mut chosen = Vec::with_capacity(resolutions.len());
        for conflict in &self.pending {
            let string_id = &conflict.string_id;
            let Some(choice) = resolutions.get(string_id) else {
                continue;
            };

            let record = match choice {
                ResolutionChoice::Candidate(index) => conflict.candidates.get(*index).cloned().ok_or_else(|| {
                    SyncError::InvalidOperation(format!(
                        "'{}' has {} candidate(s), index {} is out of range",
                        string_id,
                        conflict.candidates.len(),
                        index
                    ))
                })?,
                ResolutionChoice::Record(record) => {
                    let mut record = record.clone();
                    record.string_id = string_id.clone();
                    if record.file_name.trim().is_empty() {
                        if let Some(first) = conflict.candidates.first() {
                            record.file_name = first.file_name.clone();
                            record.sheet_name = first.sheet_name.clone();
                        }
                    }
                    record
                }
            };
            let mut record = record.normalized();
            record.status = RecordStatus::Active;
            chosen.push(record);
        }

        self.pending.retain(|c| !resolutions.contains_key(&c.string_id));
        info!(
            resolved = chosen.len(),
            remaining = self.pending.len(),
            "Duplicate arbitration applied"
        );
        Ok(chosen)
    }
}

fn candidate_view(index: usize, record: &TranslationRecord, surface_columns: &[String]) -> CandidateView {
    let texts = [Language::Kr, Language::En, Language::Cn, Language::Tw, Language::Th]
        .into_iter()
        .map(|l| (l, record.text(l).to_string()))
        .collect();

    let surfaced = surface_columns
        .iter()
        .map(|name| {
            let value = match Language::from_label(name) {
                Some(language) => record.text(language).to_string(),
                None => record
                    .special_columns
                    .get(&normalize_special_name(name))
                    .cloned()
                    .unwrap_or_default(),
            };
            (name.clone(), value)
        })
        .collect();

    CandidateView {
        index,
        file_name: record.file_name.clone(),
        sheet_name: record.sheet_name.clone(),
        texts,
        surfaced,
    }
}
