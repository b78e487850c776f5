//! locsync - 번역 동기화 엔진 라이브러리
//!
//! 번역 스토어(마스터 통합 문서 또는 SQLite DB)의 번역을 작업용 통합 문서에 적용합니다.
//! 소스 로드 -> 캐시 구성 -> 중복 중재 -> 행 매칭 -> 정책 판정 -> 제자리 저장 순서로 동작합니다.

pub mod arbiter;
pub mod cache;
pub mod commands;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod models;
pub mod policy;
pub mod progress;
pub mod source;
pub mod utils;
pub mod workbook;

#[cfg(test)]
mod test_support;

use tracing_subscriber::EnvFilter;

pub use config::EngineConfig;
pub use engine::{BatchApplyReport, Engine, SpecialFilter};
pub use error::{CommandError, CommandResult, SyncError, SyncResult};
pub use policy::{ApplyMode, ApplyOptions};
pub use progress::{CancelToken, NoProgress, ProgressReporter};
pub use source::SourceRef;

/// stderr로 출력하는 tracing 구독자 초기화. `RUST_LOG`가 없으면 info 레벨.
/// 이미 초기화되어 있으면 아무것도 하지 않습니다.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
