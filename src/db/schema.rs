//! Database Schema
//!
//! 파생 캐시와 외부 번역 DB의 SQLite 스키마 정의

/// 파생 캐시 재구성: 기존 테이블을 버리고 새로 생성
pub const RESET_DERIVED_SCHEMA: &str = r#"
DROP TABLE IF EXISTS metadata;
DROP TABLE IF EXISTS translation_data;
DROP TABLE IF EXISTS duplicate_data;

-- 메타데이터 (source_mod_time 등)
CREATE TABLE metadata (
    key TEXT PRIMARY KEY,
    value TEXT
);

-- 번역 데이터 (같은 string_id는 마지막으로 본 행이 남음)
CREATE TABLE translation_data (
    string_id TEXT PRIMARY KEY,
    kr TEXT,
    cn TEXT,
    tw TEXT,
    en TEXT,
    th TEXT,
    file_name TEXT,
    sheet_name TEXT,
    special_columns TEXT  -- JSON Object
);

-- 번역 필드가 다른 이전 출현 (중복 중재용)
CREATE TABLE duplicate_data (
    string_id TEXT NOT NULL,
    kr TEXT,
    cn TEXT,
    tw TEXT,
    en TEXT,
    th TEXT,
    file_name TEXT,
    sheet_name TEXT,
    special_columns TEXT
);

CREATE INDEX idx_duplicate_string_id ON duplicate_data(string_id);
"#;

/// 외부 번역 DB 스키마 (인덱스는 성능용)
pub const CREATE_TRANSLATION_STORE: &str = r#"
CREATE TABLE IF NOT EXISTS translation_data (
    string_id TEXT UNIQUE,
    file_name TEXT,
    sheet_name TEXT,
    kr TEXT,
    en TEXT,
    cn TEXT,
    tw TEXT,
    th TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    update_date TEXT
);

CREATE INDEX IF NOT EXISTS idx_translation_string_id ON translation_data(string_id);
CREATE INDEX IF NOT EXISTS idx_translation_file_sheet ON translation_data(file_name, sheet_name);
CREATE INDEX IF NOT EXISTS idx_translation_status ON translation_data(status);
"#;

/// 메타데이터 키: 소스 통합 문서 수정 시각
pub const META_SOURCE_MOD_TIME: &str = "source_mod_time";

/// 메타데이터 키: 재구성 시 제외된 비활성 행 수
pub const META_INACTIVE_ROWS: &str = "inactive_rows";

/// 메타데이터 키: 소스 통합 문서 절대 경로
pub const META_SOURCE_PATH: &str = "source_path";
