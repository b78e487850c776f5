use std::fs::{self, OpenOptions};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::error::{SyncError, SyncResult};

/// 소스 경로를 절대 경로로 정규화합니다.
/// - 파일이 존재하지 않으면 SourceUnavailable
pub fn resolve_source_path(path: &Path) -> SyncResult<PathBuf> {
    if !path.exists() {
        return Err(SyncError::source_unavailable(path, "file does not exist"));
    }
    path.canonicalize()
        .map_err(|e| SyncError::source_unavailable(path, e))
}

/// 절대 경로의 md5 지문 (파생 캐시 파일명에 사용)
pub fn path_fingerprint(absolute: &Path) -> String {
    format!("{:x}", md5::compute(absolute.to_string_lossy().as_bytes()))
}

/// 파일 수정 시각 (UNIX epoch 기준 밀리초, 문자열)
pub fn file_mod_time(path: &Path) -> SyncResult<String> {
    let metadata = fs::metadata(path).map_err(|e| SyncError::source_unavailable(path, e))?;
    let modified = metadata.modified()?;
    let millis = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    Ok(millis.to_string())
}

/// 파일명만 추출 (없으면 전체 경로 문자열)
pub fn display_file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// 작업 파일이 다른 프로세스에 의해 잠겨 있는지 검사합니다.
///
/// Excel은 열린 통합 문서 옆에 `~$<파일명>` 소유자 파일을 만들고, Windows에서는
/// 공유 위반(32/33)으로 쓰기 열기가 실패합니다.
pub fn ensure_not_locked(path: &Path) -> SyncResult<()> {
    let file_name = display_file_name(path);
    if let Some(parent) = path.parent() {
        // 소유자 파일은 원본 파일명의 앞 두 글자를 "~$"로 대체하기도 함.
        // 잘린 이름과 같은 통합 문서가 옆에 있으면 그 파일의 소유자 파일로 봄
        let mut owner_candidates = vec![format!("~${}", file_name)];
        let tail: String = file_name.chars().skip(2).collect();
        if !tail.is_empty() && !parent.join(&tail).exists() {
            owner_candidates.push(format!("~${}", tail));
        }
        for candidate in owner_candidates {
            if parent.join(&candidate).exists() {
                return Err(SyncError::FileLocked(path.display().to_string()));
            }
        }
    }

    match OpenOptions::new().read(true).write(true).open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            Err(SyncError::source_unavailable(path, "file does not exist"))
        }
        Err(e) if e.kind() == IoErrorKind::PermissionDenied || matches!(e.raw_os_error(), Some(32) | Some(33)) => {
            Err(SyncError::FileLocked(path.display().to_string()))
        }
        Err(e) => Err(SyncError::Io(e)),
    }
}

/// 특수 컬럼 이름 정규화: 앞의 `#` 제거 후 모든 공백 제거
pub fn normalize_special_name(label: &str) -> String {
    let trimmed = label.trim();
    let without_hash = trimmed.strip_prefix('#').unwrap_or(trimmed);
    without_hash.chars().filter(|c| !c.is_whitespace()).collect()
}

/// 1-based 열 번호를 A1 표기 열 문자로 변환 (1 -> A, 28 -> AB)
pub fn column_letters(mut column: u32) -> String {
    let mut letters = Vec::new();
    while column > 0 {
        let rem = ((column - 1) % 26) as u8;
        letters.push((b'A' + rem) as char);
        column = (column - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// A1 셀 참조를 (1-based 행, 1-based 열)로 분해
pub fn parse_cell_ref(a1: &str) -> Option<(u32, u32)> {
    let mut column: u32 = 0;
    let mut digits_start = None;
    for (idx, ch) in a1.char_indices() {
        if ch.is_ascii_alphabetic() {
            if digits_start.is_some() {
                return None;
            }
            column = column
                .checked_mul(26)?
                .checked_add(u32::from(ch.to_ascii_uppercase() as u8 - b'A' + 1))?;
        } else if ch.is_ascii_digit() {
            if digits_start.is_none() {
                digits_start = Some(idx);
            }
        } else if ch != '$' {
            return None;
        }
    }
    let row: u32 = a1.get(digits_start?..)?.parse().ok()?;
    if column == 0 || row == 0 {
        return None;
    }
    Some((row, column))
}
