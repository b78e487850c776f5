//! Duplicate Arbitration Commands

use std::collections::HashMap;

use serde::Deserialize;

use super::{run_blocking, EngineState};
use crate::arbiter::{ConflictView, ResolutionChoice};
use crate::engine::ResolveStats;
use crate::error::{CommandError, CommandResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDuplicatesArgs {
    #[serde(default)]
    pub surface_columns: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveDuplicatesArgs {
    pub resolutions: HashMap<String, ResolutionChoice>,
}

/// 중재 대기 중인 중복 목록
pub async fn list_pending_duplicates(
    args: ListDuplicatesArgs,
    state: &EngineState,
) -> CommandResult<Vec<ConflictView>> {
    run_blocking(state, move |engine| {
        engine
            .pending_duplicates(&args.surface_columns)
            .map_err(CommandError::from)
    })
    .await
}

/// 중재 결과 반영
pub async fn resolve_duplicates(args: ResolveDuplicatesArgs, state: &EngineState) -> CommandResult<ResolveStats> {
    run_blocking(state, move |engine| {
        engine
            .resolve_duplicates(&args.resolutions)
            .map_err(CommandError::from)
    })
    .await
}
