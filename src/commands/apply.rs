//! Apply Commands

use std::path::PathBuf;

use serde::Deserialize;

use super::{run_blocking, EngineState, SharedProgress};
use crate::engine::BatchApplyReport;
use crate::error::{CommandError, CommandResult};
use crate::policy::ApplyOptions;
use crate::progress::CancelToken;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyFilesArgs {
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub options: ApplyOptions,
}

/// 작업 파일 목록에 번역 적용 (호출자가 지정한 순서대로)
pub async fn apply_files(
    args: ApplyFilesArgs,
    state: &EngineState,
    progress: SharedProgress,
    cancel: CancelToken,
) -> CommandResult<BatchApplyReport> {
    if args.files.is_empty() {
        return Err(CommandError {
            code: "INVALID_OPERATION".to_string(),
            message: "No working files given".to_string(),
            details: None,
        });
    }

    run_blocking(state, move |engine| {
        engine
            .apply_many(&args.files, &args.options, progress.as_ref(), &cancel)
            .map_err(CommandError::from)
    })
    .await
}
