//! Workbook Writer
//!
//! 작업 통합 문서를 시트/행 순서대로 훑어 정책이 지정한 셀만 바꾸고, 파일당 한 번 저장합니다.
//! 저장은 같은 디렉토리의 임시 파일에 ZIP을 다시 쓴 뒤 원본 위치로 옮기는 방식입니다.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use tracing::{debug, info, warn};
use zip::write::ZipWriter;
use zip::{CompressionMethod, ZipArchive};

use super::patch::{patch_worksheet_xml, read_entry, resolve_sheet_parts, CellPatch};
use super::{SheetData, WorkbookReader};
use crate::cache::TranslationCache;
use crate::error::{SyncError, SyncResult};
use crate::matcher::{MatchOutcome, Matcher, RowKey};
use crate::models::{ApplyStats, CellMark, CellTag, Language, OverwriteEntry};
use crate::policy::{ApplyPolicy, RowOutcome, RowView};
use crate::progress::{CancelToken, ProgressReporter};
use crate::utils::{display_file_name, ensure_not_locked};

/// 작업 통합 문서 하나에 정책을 적용합니다. 변경이 없으면 파일을 건드리지 않습니다.
pub fn apply_to_workbook(
    path: &Path,
    cache: &TranslationCache,
    policy: &ApplyPolicy,
    cancel: &CancelToken,
    progress: &dyn ProgressReporter,
) -> SyncResult<ApplyStats> {
    ensure_not_locked(path)?;

    let file_name = display_file_name(path);
    let mut stats = ApplyStats {
        file: file_name.clone(),
        ..Default::default()
    };
    let mut patches: BTreeMap<String, Vec<CellPatch>> = BTreeMap::new();

    {
        let mut reader = WorkbookReader::open(path)?;
        let sheet_names = reader.qualifying_sheets();
        for (idx, sheet_name) in sheet_names.iter().enumerate() {
            cancel.check()?;
            progress.report(
                idx as f32 / sheet_names.len().max(1) as f32,
                &format!("{} / {}", file_name, sheet_name),
            );

            let sheet = match reader.read_sheet(sheet_name) {
                Ok(Some(sheet)) => sheet,
                Ok(None) => continue,
                Err(e) => {
                    warn!(file = %file_name, "{}", e);
                    continue;
                }
            };
            stats.sheets += 1;

            let sheet_patches = apply_to_sheet(&sheet, &file_name, cache, policy, &mut stats);
            if !sheet_patches.is_empty() {
                patches.insert(sheet.name.clone(), sheet_patches);
            }
        }
    }

    if patches.is_empty() {
        debug!(file = %file_name, "No changes, workbook left untouched");
        progress.report(1.0, &format!("{}: no changes", file_name));
        return Ok(stats);
    }

    cancel.check()?;
    save_patched_workbook(path, &patches)?;
    stats.saved = true;
    progress.report(1.0, &format!("{}: saved", file_name));
    info!(
        file = %file_name,
        updated = stats.updated,
        overwritten = stats.overwritten,
        blanked = stats.cells_blanked,
        "Workbook saved"
    );
    Ok(stats)
}

/// 시트 하나의 행을 판정하고 셀 패치를 모읍니다.
fn apply_to_sheet(
    sheet: &SheetData,
    file_name: &str,
    cache: &TranslationCache,
    policy: &ApplyPolicy,
    stats: &mut ApplyStats,
) -> Vec<CellPatch> {
    let header = &sheet.header;
    let matcher = Matcher::new(cache, policy.match_mode(), file_name, &sheet.name);
    let kr_column = header.language_column(Language::Kr);
    let request_column = header.request_column();
    let target_columns: Vec<(Language, u32)> = policy
        .languages()
        .iter()
        .filter_map(|&l| header.language_column(l).map(|c| (l, c)))
        .collect();

    // 헤더에 있는 마지막 열까지만 빈 행 검사
    let last_column = header.headers.keys().next_back().copied().unwrap_or(0);

    let mut patches = Vec::new();
    for row in sheet.rows() {
        if (1..=last_column).all(|c| row.trimmed(c).is_empty()) {
            continue;
        }
        stats.rows_visited += 1;

        let string_id = row.trimmed(header.string_id_column);
        let kr = kr_column.map(|c| row.trimmed(c)).unwrap_or("");
        let view = RowView {
            kr,
            request: request_column.map(|c| row.trimmed(c)),
            cells: target_columns.iter().map(|&(l, c)| (l, row.trimmed(c))).collect(),
        };

        let decision = policy.decide_row(&view, || {
            // 비활성 행은 방문하되 매칭하지 않음
            if row.is_inactive() {
                MatchOutcome::Unmatched
            } else {
                matcher.resolve(&RowKey::new(string_id, kr))
            }
        });

        match decision.outcome {
            RowOutcome::ConditionalSkip => stats.conditional_skipped += 1,
            RowOutcome::NoKey => stats.no_key += 1,
            RowOutcome::Unmatched => stats.unmatched += 1,
            RowOutcome::KrMismatchSkipped => stats.kr_mismatch_skipped += 1,
            RowOutcome::KrMismatchDeleted => stats.kr_mismatch_deleted += 1,
            RowOutcome::Processed => {}
        }

        for change in &decision.changes {
            let Some(&(_, column)) = target_columns.iter().find(|(l, _)| *l == change.language) else {
                continue;
            };
            match change.tag {
                CellTag::Fresh => stats.updated += 1,
                CellTag::Overwritten => {
                    stats.overwritten += 1;
                    stats.overwrite_log.push(OverwriteEntry {
                        file: file_name.to_string(),
                        sheet: sheet.name.clone(),
                        string_id: if string_id.is_empty() {
                            decision.record_id.clone()
                        } else {
                            string_id.to_string()
                        },
                        language: change.language,
                        kr_text: decision.record_kr.clone(),
                        old_text: change.previous.clone(),
                        new_text: change.value.clone(),
                    });
                }
                CellTag::Blanked => stats.cells_blanked += 1,
            }
            patches.push(if change.tag == CellTag::Blanked {
                CellPatch::blank(row.row_index, column)
            } else {
                CellPatch::text(row.row_index, column, change.value.clone())
            });
            stats.cell_marks.push(CellMark {
                sheet: sheet.name.clone(),
                row: row.row_index,
                column,
                tag: change.tag,
            });
        }

        if let (Some(stamp), Some(column)) = (decision.stamp, request_column) {
            if row.trimmed(column) != stamp {
                patches.push(CellPatch::text(row.row_index, column, stamp));
                stats.request_stamped += 1;
            }
        }
    }
    patches
}

/// 시트별 패치를 적용해 통합 문서를 다시 씁니다.
/// 패치 대상이 아닌 ZIP 엔트리는 바이트 그대로 복사합니다.
pub fn save_patched_workbook(path: &Path, patches: &BTreeMap<String, Vec<CellPatch>>) -> SyncResult<()> {
    let source_file = File::open(path).map_err(|e| SyncError::source_unavailable(path, e))?;
    let mut source_archive = ZipArchive::new(BufReader::new(source_file))?;

    let workbook_xml = read_entry(&mut source_archive, "xl/workbook.xml")?;
    let rels_xml = read_entry(&mut source_archive, "xl/_rels/workbook.xml.rels")?;
    let sheet_parts = resolve_sheet_parts(&workbook_xml, &rels_xml)?;

    // 엔트리 이름 -> 패치 목록
    let mut part_patches: BTreeMap<&str, &[CellPatch]> = BTreeMap::new();
    for (sheet_name, sheet_patches) in patches {
        let part = sheet_parts.get(sheet_name).ok_or_else(|| SyncError::MalformedSheet {
            sheet: sheet_name.clone(),
            reason: "worksheet part not found in workbook relationships".to_string(),
        })?;
        part_patches.insert(part.as_str(), sheet_patches.as_slice());
    }

    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let temp = tempfile::Builder::new()
        .prefix(".locsync-")
        .suffix(".xlsx")
        .tempfile_in(parent)?;

    {
        let mut output_archive = ZipWriter::new(temp.as_file());

        for i in 0..source_archive.len() {
            let mut source_entry = source_archive.by_index(i)?;
            let entry_name = source_entry.name().to_string();

            let options = zip::write::FileOptions::<()>::default().compression_method(
                if source_entry.compression() == CompressionMethod::Stored {
                    CompressionMethod::Stored
                } else {
                    CompressionMethod::Deflated
                },
            );

            if source_entry.is_dir() {
                output_archive.add_directory(entry_name.as_str(), options)?;
                continue;
            }

            let mut content = Vec::new();
            source_entry.read_to_end(&mut content)?;

            let final_content = match part_patches.get(entry_name.as_str()) {
                Some(cell_patches) => patch_worksheet_xml(&content, cell_patches)?,
                None => content,
            };

            output_archive.start_file(entry_name.as_str(), options)?;
            output_archive.write_all(&final_content)?;
        }

        output_archive.finish()?;
    }

    temp.persist(path).map_err(|e| SyncError::Io(e.error))?;
    Ok(())
}
