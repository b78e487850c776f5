//! Engine Configuration
//!
//! 환경 변수(.env 포함)에서 엔진 설정을 읽습니다. 설정 영속화는 하지 않습니다.

use std::path::PathBuf;

use once_cell::sync::Lazy;
use std::collections::HashSet;

/// 파생 캐시 디렉토리를 지정하는 환경 변수
pub const CACHE_DIR_ENV: &str = "LOCSYNC_CACHE_DIR";

/// 헤더 행 탐색 깊이
pub const HEADER_SCAN_ROWS: u32 = 10;

/// 요청 컬럼의 정규화 이름
pub const REQUEST_COLUMN: &str = "번역요청";

/// 적용 후 요청 셀에 기록하는 값
pub const STAMP_APPLIED: &str = "적용";

/// 특수 필터 캐시로 적용한 경우의 기록 값
pub const STAMP_FILTER_APPLIED: &str = "특수필터적용";

/// 특수 컬럼 레지스트리 (정규화된 이름)
pub static SPECIAL_COLUMNS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["번역요청", "수정요청", "Help", "원문", "번역요청2", "번역추가", "번역적용"]
        .into_iter()
        .collect()
});

/// 엔진 설정
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 소스 통합 문서별 파생 캐시(SQLite)가 저장되는 디렉토리
    pub cache_dir: PathBuf,
}

impl EngineConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// `.env`를 로드한 뒤 `LOCSYNC_CACHE_DIR`를 읽습니다. 없으면 임시 디렉토리 하위를 사용합니다.
    pub fn from_env() -> Self {
        // .env가 없는 환경이 일반적이므로 실패는 무시
        let _ = dotenvy::dotenv();

        let cache_dir = std::env::var(CACHE_DIR_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_cache_dir);

        Self { cache_dir }
    }

    /// 소스 지문에 대응하는 파생 캐시 경로
    pub fn derived_cache_path(&self, fingerprint: &str) -> PathBuf {
        self.cache_dir.join(format!("cache_{}.sqlite", fingerprint))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("locsync-cache")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_cache_path_layout() {
        let config = EngineConfig::new("/tmp/cache");
        assert_eq!(
            config.derived_cache_path("abc"),
            PathBuf::from("/tmp/cache/cache_abc.sqlite")
        );
    }

    #[test]
    fn test_registry_holds_normalized_names() {
        assert!(SPECIAL_COLUMNS.contains("번역요청"));
        assert!(SPECIAL_COLUMNS.contains("Help"));
        assert!(!SPECIAL_COLUMNS.contains("#번역요청"));
    }
}
