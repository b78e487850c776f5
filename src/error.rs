//! locsync Error Types
//!
//! 엔진 전역 에러 타입 정의. 행 단위 판정(skip/overwrite/blank)은 에러가 아니라
//! 통계로 보고되며, 여기에는 호출자에게 전달되어야 하는 실패만 존재합니다.

use std::path::Path;

use serde::Serialize;
use thiserror::Error;

/// 엔진 에러
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Schema missing: {0}")]
    SchemaMissing(String),

    #[error("Corrupt derived cache: {0}")]
    CorruptCache(String),

    #[error("Translation cache is not loaded")]
    CacheNotLoaded,

    #[error("File is locked by another process: {0}")]
    FileLocked(String),

    #[error("Malformed sheet '{sheet}': {reason}")]
    MalformedSheet { sheet: String, reason: String },

    #[error("{0} string id(s) are awaiting duplicate arbitration")]
    DuplicatePending(usize),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// 기계가 읽을 수 있는 에러 종류 태그
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    SourceUnavailable,
    SchemaMissing,
    CorruptCache,
    CacheNotLoaded,
    FileLocked,
    MalformedSheet,
    DuplicatePending,
    Cancelled,
    DbError,
    IoError,
    SerializationError,
    ZipError,
    XmlError,
    InvalidOperation,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::SourceUnavailable => "SOURCE_UNAVAILABLE",
            ErrorKind::SchemaMissing => "SCHEMA_MISSING",
            ErrorKind::CorruptCache => "CORRUPT_CACHE",
            ErrorKind::CacheNotLoaded => "CACHE_NOT_LOADED",
            ErrorKind::FileLocked => "FILE_LOCKED",
            ErrorKind::MalformedSheet => "MALFORMED_SHEET",
            ErrorKind::DuplicatePending => "DUPLICATE_PENDING",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::DbError => "DB_ERROR",
            ErrorKind::IoError => "IO_ERROR",
            ErrorKind::SerializationError => "SERIALIZATION_ERROR",
            ErrorKind::ZipError => "ZIP_ERROR",
            ErrorKind::XmlError => "XML_ERROR",
            ErrorKind::InvalidOperation => "INVALID_OPERATION",
        }
    }
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::SourceUnavailable(_) => ErrorKind::SourceUnavailable,
            SyncError::SchemaMissing(_) => ErrorKind::SchemaMissing,
            SyncError::CorruptCache(_) => ErrorKind::CorruptCache,
            SyncError::CacheNotLoaded => ErrorKind::CacheNotLoaded,
            SyncError::FileLocked(_) => ErrorKind::FileLocked,
            SyncError::MalformedSheet { .. } => ErrorKind::MalformedSheet,
            SyncError::DuplicatePending(_) => ErrorKind::DuplicatePending,
            SyncError::Cancelled => ErrorKind::Cancelled,
            SyncError::Database(_) => ErrorKind::DbError,
            SyncError::Io(_) => ErrorKind::IoError,
            SyncError::Serialization(_) => ErrorKind::SerializationError,
            SyncError::Zip(_) => ErrorKind::ZipError,
            SyncError::Xml(_) => ErrorKind::XmlError,
            SyncError::InvalidOperation(_) => ErrorKind::InvalidOperation,
        }
    }

    /// 파일 경로를 메시지에 포함한 SourceUnavailable 생성
    pub fn source_unavailable(path: &Path, cause: impl std::fmt::Display) -> Self {
        SyncError::SourceUnavailable(format!("{}: {}", path.display(), cause))
    }
}

impl From<quick_xml::Error> for SyncError {
    fn from(error: quick_xml::Error) -> Self {
        SyncError::Xml(error.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for SyncError {
    fn from(error: quick_xml::events::attributes::AttrError) -> Self {
        SyncError::Xml(error.to_string())
    }
}

/// 엔진 결과 타입
pub type SyncResult<T> = Result<T, SyncError>;

/// 명령 응답용 직렬화 가능한 에러
#[derive(Debug, Serialize)]
pub struct CommandError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl From<SyncError> for CommandError {
    fn from(error: SyncError) -> Self {
        let details = match &error {
            SyncError::FileLocked(path) => Some(path.clone()),
            SyncError::MalformedSheet { sheet, .. } => Some(sheet.clone()),
            _ => None,
        };

        CommandError {
            code: error.kind().code().to_string(),
            message: error.to_string(),
            details,
        }
    }
}

/// 명령 결과 타입
pub type CommandResult<T> = Result<T, CommandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_carries_kind_code() {
        let err: CommandError = SyncError::FileLocked("/work/a.xlsx".to_string()).into();
        assert_eq!(err.code, "FILE_LOCKED");
        assert_eq!(err.details.as_deref(), Some("/work/a.xlsx"));
        assert!(err.message.contains("a.xlsx"));
    }

    #[test]
    fn test_kind_serializes_as_screaming_snake() {
        let json = serde_json::to_string(&SyncError::DuplicatePending(2).kind()).unwrap();
        assert_eq!(json, "\"DUPLICATE_PENDING\"");
    }
}
