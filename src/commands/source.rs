//! Source Commands
//!
//! 소스 준비/로드와 특수 컬럼 분석

use serde::Deserialize;

use super::{run_blocking, EngineState, SharedProgress};
use crate::engine::SpecialFilter;
use crate::error::{CommandError, CommandResult};
use crate::models::{LoadStats, SheetList, SpecialColumnReport};
use crate::progress::CancelToken;
use crate::source::SourceRef;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareSourceArgs {
    pub source: SourceRef,
    #[serde(default)]
    pub force_rebuild: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSourceArgs {
    pub source: SourceRef,
    #[serde(default)]
    pub sheets: Option<Vec<String>>,
    #[serde(default)]
    pub special_filter: Option<SpecialFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeSpecialColumnArgs {
    pub column: String,
}

/// 소스 준비 (파생 캐시 확인 또는 DB 스키마 검증)
pub async fn prepare_source(
    args: PrepareSourceArgs,
    state: &EngineState,
    progress: SharedProgress,
    cancel: CancelToken,
) -> CommandResult<SheetList> {
    run_blocking(state, move |engine| {
        engine
            .prepare_source_with(&args.source, args.force_rebuild, progress.as_ref(), &cancel)
            .map_err(CommandError::from)
    })
    .await
}

/// 소스를 읽어 인메모리 캐시 구성
pub async fn load_source(
    args: LoadSourceArgs,
    state: &EngineState,
    progress: SharedProgress,
    cancel: CancelToken,
) -> CommandResult<LoadStats> {
    run_blocking(state, move |engine| {
        engine
            .load_with(
                &args.source,
                args.sheets.as_deref(),
                args.special_filter.as_ref(),
                progress.as_ref(),
                &cancel,
            )
            .map_err(CommandError::from)
    })
    .await
}

/// 특수 컬럼 값 분포 분석
pub async fn analyze_special_column(
    args: AnalyzeSpecialColumnArgs,
    state: &EngineState,
) -> CommandResult<SpecialColumnReport> {
    run_blocking(state, move |engine| {
        engine
            .analyze_special_column(&args.column)
            .map_err(CommandError::from)
    })
    .await
}

/// 로드된 캐시에 특수 필터 구성
pub async fn build_special_filter(filter: SpecialFilter, state: &EngineState) -> CommandResult<SpecialColumnReport> {
    run_blocking(state, move |engine| {
        engine.build_special_filter(&filter).map_err(CommandError::from)
    })
    .await
}
