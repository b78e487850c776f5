//! Sync Engine
//!
//! 호출자(명령 계층/CLI)가 사용하는 연산: prepare_source, load, apply, resolve_duplicates,
//! analyze_special_column. 인메모리 캐시는 load와 중재 결과 반영 때만 변경됩니다.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::arbiter::{ConflictView, DuplicateArbiter, ResolutionChoice};
use crate::cache::TranslationCache;
use crate::config::EngineConfig;
use crate::db::{DerivedCache, TranslationStore};
use crate::error::{CommandError, SyncError, SyncResult};
use crate::models::{ApplyStats, LoadStats, SheetList, SpecialColumnReport};
use crate::policy::{ApplyOptions, ApplyPolicy};
use crate::progress::{CancelToken, NoProgress, ProgressReporter};
use crate::source::{SourceLoader, SourceRef};
use crate::utils::display_file_name;
use crate::workbook::writer::apply_to_workbook;

/// load 시 함께 만들 특수 필터
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecialFilter {
    pub column: String,
    pub value: String,
}

/// 배치 적용의 파일별 결과
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileApplyResult {
    pub file: String,
    pub stats: Option<ApplyStats>,
    pub error: Option<CommandError>,
}

/// 배치 적용 결과
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchApplyReport {
    pub files: Vec<FileApplyResult>,
    pub cancelled: bool,
    pub updated: usize,
    pub overwritten: usize,
    pub saved_files: usize,
    pub failed_files: usize,
}

/// 중재 결과 반영 통계
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveStats {
    pub resolved: usize,
    pub remaining: usize,
    pub written_back: usize,
}

struct LoadedState {
    source: SourceRef,
    cache: TranslationCache,
    arbiter: DuplicateArbiter,
    derived_caches: Vec<PathBuf>,
}

pub struct Engine {
    config: EngineConfig,
    loaded: Option<LoadedState>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config, loaded: None }
    }

    pub fn prepare_source(&self, source: &SourceRef, force_rebuild: bool) -> SyncResult<SheetList> {
        self.prepare_source_with(source, force_rebuild, &NoProgress, &CancelToken::new())
    }

    pub fn prepare_source_with(
        &self,
        source: &SourceRef,
        force_rebuild: bool,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> SyncResult<SheetList> {
        SourceLoader::new(&self.config, progress, cancel).prepare(source, force_rebuild)
    }

    pub fn load(
        &mut self,
        source: &SourceRef,
        sheet_subset: Option<&[String]>,
        special_filter: Option<&SpecialFilter>,
    ) -> SyncResult<LoadStats> {
        self.load_with(source, sheet_subset, special_filter, &NoProgress, &CancelToken::new())
    }

    /// 소스를 읽어 캐시를 새로 만듭니다. 실패하면 이전 캐시가 그대로 유지됩니다.
    pub fn load_with(
        &mut self,
        source: &SourceRef,
        sheet_subset: Option<&[String]>,
        special_filter: Option<&SpecialFilter>,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> SyncResult<LoadStats> {
        let subset: Option<HashSet<String>> =
            sheet_subset.map(|sheets| sheets.iter().map(|s| s.trim().to_string()).collect());
        let loaded = SourceLoader::new(&self.config, progress, cancel).load(source, subset.as_ref())?;

        let unique_ids = loaded.groups.len();
        let (mut cache, conflicts) = TranslationCache::build(loaded.groups);
        let special_report = special_filter.map(|f| cache.build_special_filter(&f.column, &f.value));

        let stats = LoadStats {
            records_read: loaded.records_read,
            unique_ids,
            conflicting_ids: conflicts.len(),
            by_id: cache.id_count(),
            by_kr: cache.kr_count(),
            files: loaded.files,
            sheets: loaded.sheets,
            inactive_skipped: loaded.inactive_skipped,
            rebuilt_caches: loaded.rebuilt_caches,
            special_filter: special_report,
        };
        if !conflicts.is_empty() {
            warn!(count = conflicts.len(), "Duplicate string ids await arbitration");
        }

        self.loaded = Some(LoadedState {
            source: source.clone(),
            cache,
            arbiter: DuplicateArbiter::new(conflicts),
            derived_caches: loaded.derived_caches,
        });
        Ok(stats)
    }

    fn loaded(&self) -> SyncResult<&LoadedState> {
        self.loaded.as_ref().ok_or(SyncError::CacheNotLoaded)
    }

    fn loaded_mut(&mut self) -> SyncResult<&mut LoadedState> {
        self.loaded.as_mut().ok_or(SyncError::CacheNotLoaded)
    }

    /// 적용 가능한 상태인지 확인하고 정책을 만듭니다.
    fn ready_policy(&self, options: &ApplyOptions) -> SyncResult<(&LoadedState, ApplyPolicy)> {
        let state = self.loaded()?;
        if !state.arbiter.is_settled() {
            return Err(SyncError::DuplicatePending(state.arbiter.pending_count()));
        }
        let policy = ApplyPolicy::from_options(options);
        if policy.uses_filtered_cache() && !state.cache.has_filter() {
            return Err(SyncError::InvalidOperation(
                "useFilteredCache requires a special filter built during load".to_string(),
            ));
        }
        Ok((state, policy))
    }

    pub fn apply(&self, working_file: &Path, options: &ApplyOptions) -> SyncResult<ApplyStats> {
        self.apply_with(working_file, options, &NoProgress, &CancelToken::new())
    }

    pub fn apply_with(
        &self,
        working_file: &Path,
        options: &ApplyOptions,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> SyncResult<ApplyStats> {
        let (state, policy) = self.ready_policy(options)?;
        apply_to_workbook(working_file, &state.cache, &policy, cancel, progress)
    }

    /// 파일 목록에 순서대로 적용합니다. 파일 단위 실패는 기록하고 다음 파일로 넘어가며,
    /// 취소되면 이미 저장된 파일은 그대로 두고 중단합니다.
    pub fn apply_many(
        &self,
        files: &[PathBuf],
        options: &ApplyOptions,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> SyncResult<BatchApplyReport> {
        let (state, policy) = self.ready_policy(options)?;
        let mut report = BatchApplyReport::default();
        let total = files.len().max(1) as f32;

        for (idx, file) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let file_name = display_file_name(file);
            progress.report(idx as f32 / total, &format!("Applying {}", file_name));

            let scoped = |fraction: f32, message: &str| {
                progress.report((idx as f32 + fraction) / total, message);
            };
            match apply_to_workbook(file, &state.cache, &policy, cancel, &scoped) {
                Ok(stats) => {
                    report.updated += stats.updated;
                    report.overwritten += stats.overwritten;
                    if stats.saved {
                        report.saved_files += 1;
                    }
                    report.files.push(FileApplyResult {
                        file: file.display().to_string(),
                        stats: Some(stats),
                        error: None,
                    });
                }
                Err(SyncError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => {
                    error!(file = %file_name, "Apply failed: {}", e);
                    report.failed_files += 1;
                    report.files.push(FileApplyResult {
                        file: file.display().to_string(),
                        stats: None,
                        error: Some(e.into()),
                    });
                }
            }
        }

        progress.report(1.0, "Apply finished");
        info!(
            files = report.files.len(),
            saved = report.saved_files,
            failed = report.failed_files,
            cancelled = report.cancelled,
            "Batch apply finished"
        );
        Ok(report)
    }

    /// 중재 대기 중인 충돌 목록
    pub fn pending_duplicates(&self, surface_columns: &[String]) -> SyncResult<Vec<ConflictView>> {
        Ok(self.loaded()?.arbiter.present(surface_columns))
    }

    /// 중재 결과를 캐시에 넣고 원본 저장소에 기록합니다.
    pub fn resolve_duplicates(&mut self, resolutions: &HashMap<String, ResolutionChoice>) -> SyncResult<ResolveStats> {
        let state = self.loaded_mut()?;
        let chosen = state.arbiter.resolve(resolutions)?;

        let mut written_back = 0;
        match &state.source {
            SourceRef::Database(path) => {
                let mut store = TranslationStore::open(path)?;
                for record in &chosen {
                    store.write_resolution(record)?;
                    written_back += 1;
                }
            }
            SourceRef::Workbooks(_) => {
                for cache_path in &state.derived_caches {
                    let mut derived = DerivedCache::open(cache_path)?;
                    for record in &chosen {
                        if derived.mentions(&record.string_id)? {
                            derived.replace_record(record)?;
                            written_back += 1;
                        }
                    }
                }
            }
        }

        let resolved = chosen.len();
        for record in chosen {
            state.cache.insert(record);
        }
        if let Some(report) = state.cache.refresh_special_filter() {
            info!(matched = report.matched_rows, "Special filter refreshed after arbitration");
        }
        Ok(ResolveStats {
            resolved,
            remaining: state.arbiter.pending_count(),
            written_back,
        })
    }

    pub fn analyze_special_column(&self, name: &str) -> SyncResult<SpecialColumnReport> {
        Ok(self.loaded()?.cache.analyze_special_column(name))
    }

    /// 로드된 캐시에 특수 필터를 (다시) 만듭니다.
    pub fn build_special_filter(&mut self, filter: &SpecialFilter) -> SyncResult<SpecialColumnReport> {
        Ok(self.loaded_mut()?.cache.build_special_filter(&filter.column, &filter.value))
    }
}
