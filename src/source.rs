//! Source Loader
//!
//! 소스(통합 문서 목록 또는 번역 DB)에서 활성 번역 레코드를 읽습니다.
//! 통합 문서 소스는 파일마다 파생 캐시를 두고, 원본 수정 시각이 바뀌었을 때만 다시 만듭니다.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::db::schema::{META_INACTIVE_ROWS, META_SOURCE_MOD_TIME, META_SOURCE_PATH};
use crate::db::{DerivedCache, TranslationStore};
use crate::error::{SyncError, SyncResult};
use crate::models::{Language, SheetList, TranslationRecord};
use crate::progress::{CancelToken, ProgressReporter};
use crate::utils::{display_file_name, file_mod_time, path_fingerprint, resolve_source_path};
use crate::workbook::{HeaderMap, SheetRow, WorkbookReader};

/// 번역 소스
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "camelCase")]
pub enum SourceRef {
    /// 마스터 통합 문서 목록 (파일별 파생 캐시 사용)
    Workbooks(Vec<PathBuf>),
    /// translation_data 테이블을 가진 SQLite 파일
    Database(PathBuf),
}

/// string_id 하나에 대한 관측 결과
#[derive(Debug, Clone, PartialEq)]
pub enum RecordGroup {
    Unique(TranslationRecord),
    /// 번역 필드가 서로 다른 후보들 (관측 순서)
    Conflict(Vec<TranslationRecord>),
}

/// string_id별 그룹 (첫 관측 순서 유지)
#[derive(Debug, Default)]
pub struct RecordGroups {
    order: Vec<String>,
    groups: HashMap<String, RecordGroup>,
}

impl RecordGroups {
    /// 레코드 하나를 관측합니다. 번역 필드가 같은 중복은 마지막 출처로 갱신되고,
    /// 다른 중복은 충돌 후보로 쌓입니다.
    pub fn observe(&mut self, record: TranslationRecord) {
        let id = record.string_id.clone();
        match self.groups.remove(&id) {
            None => {
                self.order.push(id.clone());
                self.groups.insert(id, RecordGroup::Unique(record));
            }
            Some(RecordGroup::Unique(existing)) => {
                let group = if existing.same_translation(&record) {
                    RecordGroup::Unique(record)
                } else {
                    RecordGroup::Conflict(vec![existing, record])
                };
                self.groups.insert(id, group);
            }
            Some(RecordGroup::Conflict(mut candidates)) => {
                if !candidates.iter().any(|c| c.same_translation(&record)) {
                    candidates.push(record);
                }
                self.groups.insert(id, RecordGroup::Conflict(candidates));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn conflict_count(&self) -> usize {
        self.groups
            .values()
            .filter(|g| matches!(g, RecordGroup::Conflict(_)))
            .count()
    }

    pub fn get(&self, string_id: &str) -> Option<&RecordGroup> {
        self.groups.get(string_id)
    }

    /// 첫 관측 순서로 소비
    pub fn into_ordered(self) -> Vec<(String, RecordGroup)> {
        let mut groups = self.groups;
        self.order
            .into_iter()
            .filter_map(|id| groups.remove(&id).map(|g| (id, g)))
            .collect()
    }
}

/// load 결과
#[derive(Debug, Default)]
pub struct LoadedSource {
    pub groups: RecordGroups,
    pub records_read: usize,
    pub files: usize,
    pub sheets: usize,
    pub inactive_skipped: usize,
    pub rebuilt_caches: usize,
    /// 이번 로드에 사용한 파생 캐시 파일 (DB 소스는 비어 있음)
    pub derived_caches: Vec<PathBuf>,
}

struct DerivedState {
    absolute: PathBuf,
    cache_path: PathBuf,
    rebuilt: bool,
    inactive_skipped: usize,
}

pub struct SourceLoader<'a> {
    config: &'a EngineConfig,
    progress: &'a dyn ProgressReporter,
    cancel: &'a CancelToken,
}

impl<'a> SourceLoader<'a> {
    pub fn new(config: &'a EngineConfig, progress: &'a dyn ProgressReporter, cancel: &'a CancelToken) -> Self {
        Self {
            config,
            progress,
            cancel,
        }
    }

    /// 소스를 검증하고 시트 목록을 돌려줍니다. 통합 문서 소스는 필요하면 파생 캐시를 다시 만듭니다.
    pub fn prepare(&self, source: &SourceRef, force_rebuild: bool) -> SyncResult<SheetList> {
        match source {
            SourceRef::Database(path) => {
                let store = TranslationStore::open(path)?;
                Ok(SheetList {
                    sheets: store.sheet_list()?,
                    rebuilt: false,
                })
            }
            SourceRef::Workbooks(paths) => {
                let mut list = SheetList::default();
                for (idx, path) in paths.iter().enumerate() {
                    self.cancel.check()?;
                    self.progress.report(
                        idx as f32 / paths.len().max(1) as f32,
                        &format!("Preparing {}", display_file_name(path)),
                    );
                    let state = self.ensure_derived(path, force_rebuild)?;
                    let cache = DerivedCache::open(&state.cache_path)?;
                    let sheets = cache
                        .sheet_counts()
                        .map_err(|e| SyncError::CorruptCache(format!("{}: {}", state.cache_path.display(), e)))?;
                    list.sheets.extend(sheets);
                    list.rebuilt |= state.rebuilt;
                }
                self.progress.report(1.0, "Source prepared");
                Ok(list)
            }
        }
    }

    /// 활성 레코드를 읽어 string_id별로 그룹화합니다.
    /// `sheet_subset`이 주어지면 해당 시트 이름의 레코드만 포함합니다.
    pub fn load(&self, source: &SourceRef, sheet_subset: Option<&HashSet<String>>) -> SyncResult<LoadedSource> {
        let mut loaded = LoadedSource::default();
        let mut files = BTreeSet::new();
        let mut sheets = BTreeSet::new();

        let mut accept = |loaded: &mut LoadedSource, record: TranslationRecord| {
            let record = record.normalized();
            if record.string_id.is_empty() || !record.is_active() {
                return;
            }
            if let Some(subset) = sheet_subset {
                if !subset.contains(&record.sheet_name) {
                    return;
                }
            }
            files.insert(record.file_name.clone());
            sheets.insert((record.file_name.clone(), record.sheet_name.clone()));
            loaded.records_read += 1;
            loaded.groups.observe(record);
        };

        match source {
            SourceRef::Database(path) => {
                self.progress.report(0.0, "Reading translation store");
                let store = TranslationStore::open(path)?;
                for record in store.records()? {
                    if !record.is_active() {
                        loaded.inactive_skipped += 1;
                        continue;
                    }
                    accept(&mut loaded, record);
                }
            }
            SourceRef::Workbooks(paths) => {
                for (idx, path) in paths.iter().enumerate() {
                    self.cancel.check()?;
                    self.progress.report(
                        idx as f32 / paths.len().max(1) as f32,
                        &format!("Loading {}", display_file_name(path)),
                    );
                    let (state, records) = self.read_derived(path)?;
                    loaded.inactive_skipped += state.inactive_skipped;
                    if state.rebuilt {
                        loaded.rebuilt_caches += 1;
                    }
                    for record in records {
                        accept(&mut loaded, record);
                    }
                    loaded.derived_caches.push(state.cache_path);
                }
            }
        }

        loaded.files = files.len();
        loaded.sheets = sheets.len();
        self.progress.report(1.0, "Source loaded");
        info!(
            records = loaded.records_read,
            ids = loaded.groups.len(),
            conflicts = loaded.groups.conflict_count(),
            "Source loaded"
        );
        Ok(loaded)
    }

    /// 파생 캐시에서 레코드를 읽습니다. 읽기에 실패하면 한 번 다시 만들어 봅니다.
    fn read_derived(&self, path: &Path) -> SyncResult<(DerivedState, Vec<TranslationRecord>)> {
        let mut state = self.ensure_derived(path, false)?;
        let records = match Self::read_records(&state.cache_path) {
            Ok(records) => records,
            Err(e) if !state.rebuilt => {
                warn!(cache = %state.cache_path.display(), "Derived cache unreadable, rebuilding: {}", e);
                state = self.ensure_derived(path, true)?;
                Self::read_records(&state.cache_path)
                    .map_err(|e| SyncError::CorruptCache(format!("{}: {}", state.cache_path.display(), e)))?
            }
            Err(e) => {
                return Err(SyncError::CorruptCache(format!("{}: {}", state.cache_path.display(), e)));
            }
        };

        let mod_time = file_mod_time(&state.absolute)?;
        let update_date = mod_time
            .parse::<i64>()
            .ok()
            .and_then(chrono::DateTime::from_timestamp_millis)
            .map(|d| d.to_rfc3339());
        let records = records
            .into_iter()
            .map(|mut r| {
                r.update_date = update_date.clone();
                r
            })
            .collect();
        Ok((state, records))
    }

    fn read_records(cache_path: &Path) -> SyncResult<Vec<TranslationRecord>> {
        DerivedCache::open(cache_path)?.records()
    }

    /// 파생 캐시가 최신인지 확인하고, 아니면 다시 만듭니다.
    fn ensure_derived(&self, path: &Path, force_rebuild: bool) -> SyncResult<DerivedState> {
        let absolute = resolve_source_path(path)?;
        let mod_time = file_mod_time(&absolute)?;
        let cache_path = self.config.derived_cache_path(&path_fingerprint(&absolute));

        if !force_rebuild && cache_path.exists() {
            match Self::cached_state(&cache_path) {
                Ok((Some(stored), inactive)) if stored == mod_time => {
                    debug!(source = %absolute.display(), "Derived cache is fresh");
                    return Ok(DerivedState {
                        absolute,
                        cache_path,
                        rebuilt: false,
                        inactive_skipped: inactive,
                    });
                }
                Ok(_) => debug!(source = %absolute.display(), "Derived cache is stale"),
                Err(e) => warn!(cache = %cache_path.display(), "Derived cache is corrupt, rebuilding: {}", e),
            }
        }

        let inactive_skipped = self.rebuild_derived(&absolute, &cache_path, &mod_time)?;
        Ok(DerivedState {
            absolute,
            cache_path,
            rebuilt: true,
            inactive_skipped,
        })
    }

    fn cached_state(cache_path: &Path) -> SyncResult<(Option<String>, usize)> {
        let cache = DerivedCache::open(cache_path)?;
        let mod_time = cache.metadata(META_SOURCE_MOD_TIME)?;
        let inactive = cache
            .metadata(META_INACTIVE_ROWS)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok((mod_time, inactive))
    }

    /// 통합 문서를 처음부터 읽어 파생 캐시를 다시 만듭니다. 비활성 행 수를 돌려줍니다.
    fn rebuild_derived(&self, absolute: &Path, cache_path: &Path, mod_time: &str) -> SyncResult<usize> {
        info!(source = %absolute.display(), "Rebuilding derived cache");
        let file_name = display_file_name(absolute);
        let mut reader = WorkbookReader::open(absolute)?;

        let mut order: Vec<String> = Vec::new();
        let mut occurrences: HashMap<String, Vec<TranslationRecord>> = HashMap::new();
        let mut inactive = 0usize;

        for sheet_name in reader.qualifying_sheets() {
            self.cancel.check()?;
            let sheet = match reader.read_sheet(&sheet_name) {
                Ok(Some(sheet)) => sheet,
                Ok(None) => continue,
                Err(e) => {
                    warn!(file = %file_name, "{}", e);
                    continue;
                }
            };

            for row in sheet.rows() {
                let id = row.trimmed(sheet.header.string_id_column);
                if id.is_empty() {
                    continue;
                }
                if row.is_inactive() {
                    inactive += 1;
                    continue;
                }
                let record = record_from_row(&row, &sheet.header, &file_name, &sheet.name);
                occurrences
                    .entry(record.string_id.clone())
                    .or_insert_with(|| {
                        order.push(record.string_id.clone());
                        Vec::new()
                    })
                    .push(record);
            }
        }

        let mut records = Vec::with_capacity(order.len());
        let mut superseded = Vec::new();
        for id in order {
            let Some(mut list) = occurrences.remove(&id) else {
                continue;
            };
            let Some(last) = list.pop() else {
                continue;
            };
            let mut kept: Vec<TranslationRecord> = Vec::new();
            for earlier in list {
                if !earlier.same_translation(&last) && !kept.iter().any(|k| k.same_translation(&earlier)) {
                    kept.push(earlier);
                }
            }
            superseded.extend(kept);
            records.push(last);
        }

        let metadata = [
            (META_SOURCE_MOD_TIME, mod_time.to_string()),
            (META_INACTIVE_ROWS, inactive.to_string()),
            (META_SOURCE_PATH, absolute.display().to_string()),
        ];
        let to_corrupt = |e: SyncError| SyncError::CorruptCache(format!("{}: {}", cache_path.display(), e));

        match std::fs::remove_file(cache_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(to_corrupt(e.into())),
        }
        let mut cache = DerivedCache::open(cache_path).map_err(to_corrupt)?;
        cache.rebuild(&metadata, &records, &superseded).map_err(to_corrupt)?;

        info!(
            source = %file_name,
            records = records.len(),
            duplicates = superseded.len(),
            inactive,
            "Derived cache rebuilt"
        );
        Ok(inactive)
    }
}

/// 데이터 행을 번역 레코드로 변환 (모든 값 trim, 빈 특수 컬럼 값은 제외)
fn record_from_row(row: &SheetRow, header: &HeaderMap, file_name: &str, sheet_name: &str) -> TranslationRecord {
    let mut record = TranslationRecord {
        string_id: row.trimmed(header.string_id_column).to_string(),
        file_name: file_name.to_string(),
        sheet_name: sheet_name.to_string(),
        ..Default::default()
    };
    for language in [Language::Kr, Language::En, Language::Cn, Language::Tw, Language::Th] {
        if let Some(column) = header.language_column(language) {
            record.set_text(language, row.trimmed(column).to_string());
        }
    }
    for special in header.specials() {
        let value = row.trimmed(special.column);
        if !value.is_empty() {
            record
                .special_columns
                .insert(special.normalized.clone(), value.to_string());
        }
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TranslationCache;
    use crate::progress::NoProgress;
    use crate::test_support::{write_workbook, SheetSpec};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn rec(id: &str, kr: &str, cn: &str) -> TranslationRecord {
        TranslationRecord {
            string_id: id.to_string(),
            kr: kr.to_string(),
            cn: cn.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_groups_separate_identical_and_differing_duplicates() {
        let mut groups = RecordGroups::default();
        groups.observe(rec("S1", "가", "甲"));
        groups.observe(rec("S1", "가", "甲"));
        groups.observe(rec("S2", "나", "乙"));
        groups.observe(rec("S2", "나", "丙"));
        groups.observe(rec("S2", "나", "乙"));

        assert_eq!(groups.len(), 2);
        assert_eq!(groups.conflict_count(), 1);
        assert!(matches!(groups.get("S1"), Some(RecordGroup::Unique(_))));
        match groups.get("S2") {
            Some(RecordGroup::Conflict(c)) => assert_eq!(c.len(), 2),
            other => panic!("unexpected group: {:?}", other),
        }
        let ids: Vec<_> = groups.into_ordered().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["S1", "S2"]);
    }

    fn master(path: &Path) {
        write_workbook(
            path,
            &[
                SheetSpec::new(
                    "string_ui",
                    &[
                        ["STRING_ID", "KR", "CN", "#번역요청"],
                        ["S1", "책", "书", "신규"],
                        ["#S5", "옛", "旧", ""],
                        ["S4", "문", "门", ""],
                        ["S4", "문", "門", ""],
                    ],
                ),
                SheetSpec::new("string_item", &[["STRING_ID", "KR", "CN", ""], ["S2", " 검 ", "剑", ""]]),
                SheetSpec::new("notes", &[["STRING_ID", "KR", "", ""], ["X1", "무시", "", ""]]),
            ],
        );
    }

    #[test]
    fn test_workbook_source_builds_and_reuses_derived_cache() {
        let dir = tempdir().unwrap();
        let source_path = dir.path().join("master.xlsx");
        master(&source_path);
        let config = EngineConfig::new(dir.path().join("cache"));
        let cancel = CancelToken::new();
        let loader = SourceLoader::new(&config, &NoProgress, &cancel);
        let source = SourceRef::Workbooks(vec![source_path.clone()]);

        let first = loader.prepare(&source, false).unwrap();
        assert!(first.rebuilt);
        assert_eq!(first.sheets.len(), 2);

        let second = loader.prepare(&source, false).unwrap();
        assert!(!second.rebuilt);

        let loaded = loader.load(&source, None).unwrap();
        assert_eq!(loaded.inactive_skipped, 1);
        assert_eq!(loaded.rebuilt_caches, 0);
        assert_eq!(loaded.groups.len(), 3);
        assert_eq!(loaded.groups.conflict_count(), 1);
        match loaded.groups.get("S2") {
            Some(RecordGroup::Unique(r)) => {
                assert_eq!(r.kr, "검");
                assert!(r.update_date.is_some());
            }
            other => panic!("unexpected group: {:?}", other),
        }
        match loaded.groups.get("S1") {
            Some(RecordGroup::Unique(r)) => {
                assert_eq!(r.special_columns.get("번역요청").map(String::as_str), Some("신규"))
            }
            other => panic!("unexpected group: {:?}", other),
        }
    }

    #[test]
    fn test_reload_keeps_derived_cache_bytes_and_mapping() {
        let dir = tempdir().unwrap();
        let source_path = dir.path().join("master.xlsx");
        master(&source_path);
        let config = EngineConfig::new(dir.path().join("cache"));
        let cancel = CancelToken::new();
        let loader = SourceLoader::new(&config, &NoProgress, &cancel);
        let source = SourceRef::Workbooks(vec![source_path.clone()]);

        let first = loader.load(&source, None).unwrap();
        assert_eq!(first.rebuilt_caches, 1);
        let cache_path = config.derived_cache_path(&path_fingerprint(&resolve_source_path(&source_path).unwrap()));
        let bytes_before = std::fs::read(&cache_path).unwrap();

        let second = loader.load(&source, None).unwrap();
        assert_eq!(second.rebuilt_caches, 0);
        assert_eq!(std::fs::read(&cache_path).unwrap(), bytes_before);

        let (first_cache, _) = TranslationCache::build(first.groups);
        let (second_cache, _) = TranslationCache::build(second.groups);
        assert_eq!(first_cache.id_count(), 2);
        assert_eq!(first_cache.id_count(), second_cache.id_count());
        for id in ["S1", "S2", "S4"] {
            assert_eq!(first_cache.by_id(id), second_cache.by_id(id));
        }
    }

    #[test]
    fn test_sheet_subset_limits_records() {
        let dir = tempdir().unwrap();
        let source_path = dir.path().join("master.xlsx");
        master(&source_path);
        let config = EngineConfig::new(dir.path().join("cache"));
        let cancel = CancelToken::new();
        let loader = SourceLoader::new(&config, &NoProgress, &cancel);

        let subset: HashSet<String> = ["string_item".to_string()].into_iter().collect();
        let loaded = loader
            .load(&SourceRef::Workbooks(vec![source_path]), Some(&subset))
            .unwrap();
        assert_eq!(loaded.records_read, 1);
        assert_eq!(loaded.sheets, 1);
    }

    #[test]
    fn test_corrupt_derived_cache_is_rebuilt() {
        let dir = tempdir().unwrap();
        let source_path = dir.path().join("master.xlsx");
        master(&source_path);
        let config = EngineConfig::new(dir.path().join("cache"));
        let cancel = CancelToken::new();
        let loader = SourceLoader::new(&config, &NoProgress, &cancel);
        let source = SourceRef::Workbooks(vec![source_path.clone()]);
        loader.prepare(&source, false).unwrap();

        let absolute = resolve_source_path(&source_path).unwrap();
        let cache_path = config.derived_cache_path(&path_fingerprint(&absolute));
        std::fs::write(&cache_path, b"garbage garbage garbage garbage").unwrap();

        let loaded = loader.load(&source, None).unwrap();
        assert_eq!(loaded.rebuilt_caches, 1);
        assert_eq!(loaded.groups.len(), 3);
    }

    #[test]
    fn test_database_source_skips_inactive_rows() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("translations.db");
        let mut store = TranslationStore::create(&db_path).unwrap();
        let mut retired = rec("S2", "둘", "二");
        retired.status = crate::models::RecordStatus::Inactive;
        for record in [rec("S1", "하나", "一"), retired, rec("S3", "셋", "三")] {
            store.insert(&record).unwrap();
        }

        let config = EngineConfig::new(dir.path().join("cache"));
        let cancel = CancelToken::new();
        let loader = SourceLoader::new(&config, &NoProgress, &cancel);
        let loaded = loader.load(&SourceRef::Database(db_path), None).unwrap();
        assert_eq!(loaded.records_read, 2);
        assert_eq!(loaded.inactive_skipped, 1);
        assert!(loaded.groups.get("S2").is_none());
        assert!(loaded.derived_caches.is_empty());
    }

    #[test]
    fn test_missing_workbook_is_unavailable() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::new(dir.path().join("cache"));
        let cancel = CancelToken::new();
        let loader = SourceLoader::new(&config, &NoProgress, &cancel);
        let err = loader
            .prepare(&SourceRef::Workbooks(vec![dir.path().join("none.xlsx")]), false)
            .unwrap_err();
        assert!(matches!(err, SyncError::SourceUnavailable(_)));
    }

    #[test]
    fn test_cancelled_load_stops() {
        let dir = tempdir().unwrap();
        let source_path = dir.path().join("master.xlsx");
        master(&source_path);
        let config = EngineConfig::new(dir.path().join("cache"));
        let cancel = CancelToken::new();
        cancel.cancel();
        let loader = SourceLoader::new(&config, &NoProgress, &cancel);
        let err = loader
            .load(&SourceRef::Workbooks(vec![source_path]), None)
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
    }
}
