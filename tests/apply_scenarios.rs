//! End-to-end apply scenarios against real xlsx files.

use std::path::{Path, PathBuf};

use calamine::{open_workbook, Data, Reader, Xlsx};
use pretty_assertions::assert_eq;
use rust_xlsxwriter::Workbook;
use tempfile::{tempdir, TempDir};

use locsync_lib::models::{CellTag, Language};
use locsync_lib::{ApplyMode, ApplyOptions, Engine, EngineConfig, SourceRef, SpecialFilter, SyncError};

fn write_sheets(path: &Path, sheets: &[(&str, &[&[&str]])]) {
    let mut workbook = Workbook::new();
    for (name, rows) in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(*name).unwrap();
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                if !value.is_empty() {
                    worksheet.write_string(r as u32, c as u16, *value).unwrap();
                }
            }
        }
    }
    workbook.save(path).unwrap();
}

fn cell(path: &Path, sheet: &str, row: u32, column: u32) -> String {
    let mut workbook: Xlsx<_> = open_workbook(path).unwrap();
    let range = workbook.worksheet_range(sheet).unwrap();
    match range.get_value((row - 1, column - 1)) {
        Some(Data::String(s)) => s.clone(),
        Some(Data::Empty) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

struct Fixture {
    dir: TempDir,
    engine: Engine,
}

impl Fixture {
    fn new(master_rows: &[&[&str]]) -> Self {
        let dir = tempdir().unwrap();
        let master = dir.path().join("master.xlsx");
        write_sheets(&master, &[("string_ui", master_rows)]);
        let mut engine = Engine::new(EngineConfig::new(dir.path().join("cache")));
        engine
            .load(&SourceRef::Workbooks(vec![master]), None, None)
            .unwrap();
        Self { dir, engine }
    }

    fn working(&self, name: &str, rows: &[&[&str]]) -> PathBuf {
        let path = self.dir.path().join(name);
        write_sheets(&path, &[("string_ui", rows)]);
        path
    }
}

const MASTER: &[&[&str]] = &[
    &["STRING_ID", "KR", "CN"],
    &["S1", "안녕", "你好"],
    &["S2", "책", "书"],
    &["S3", "검", "剑"],
];

const HEADER: &[&str] = &["STRING_ID", "KR", "CN", "#번역요청"];

fn id_options() -> ApplyOptions {
    ApplyOptions {
        mode: ApplyMode::Id,
        selected_languages: vec![Language::Cn],
        kr_match_check: true,
        record_date: true,
        ..Default::default()
    }
}

#[test]
fn fresh_write_into_empty_cell() {
    let fx = Fixture::new(MASTER);
    let work = fx.working("work.xlsx", &[HEADER, &["S1", "안녕", "", ""]]);

    let stats = fx.engine.apply(&work, &id_options()).unwrap();

    assert_eq!(stats.updated, 1);
    assert_eq!(stats.request_stamped, 1);
    assert!(stats.saved);
    assert_eq!(cell(&work, "string_ui", 2, 3), "你好");
    assert_eq!(cell(&work, "string_ui", 2, 4), "적용");
    assert_eq!(stats.cell_marks[0].tag, CellTag::Fresh);
}

#[test]
fn kr_mismatch_skips_row() {
    let fx = Fixture::new(MASTER);
    let work = fx.working("work.xlsx", &[HEADER, &["S1", "안녕하세요", "", ""]]);
    let before = std::fs::read(&work).unwrap();

    let stats = fx.engine.apply(&work, &id_options()).unwrap();

    assert_eq!(stats.kr_mismatch_skipped, 1);
    assert!(!stats.has_writes());
    assert!(!stats.saved);
    assert_eq!(std::fs::read(&work).unwrap(), before);
}

#[test]
fn kr_mismatch_blanks_and_stamps() {
    let fx = Fixture::new(MASTER);
    let work = fx.working(
        "work.xlsx",
        &[HEADER, &["S1", "안녕하세요", "", ""], &["S2", "책들", "冊", ""]],
    );
    let options = ApplyOptions {
        kr_mismatch_delete: true,
        ..id_options()
    };

    let stats = fx.engine.apply(&work, &options).unwrap();

    assert_eq!(stats.kr_mismatch_deleted, 2);
    assert_eq!(stats.cells_blanked, 1);
    assert_eq!(stats.request_stamped, 2);
    assert_eq!(cell(&work, "string_ui", 2, 3), "");
    assert_eq!(cell(&work, "string_ui", 2, 4), "적용");
    assert_eq!(cell(&work, "string_ui", 3, 3), "");
    assert_eq!(cell(&work, "string_ui", 3, 2), "책들");
}

#[test]
fn overwrite_is_guarded_by_flag() {
    let fx = Fixture::new(MASTER);
    let work = fx.working("work.xlsx", &[HEADER, &["S2", "책", "冊", ""]]);

    let guarded = fx.engine.apply(&work, &id_options()).unwrap();
    assert!(!guarded.has_writes());
    assert_eq!(cell(&work, "string_ui", 2, 3), "冊");

    let options = ApplyOptions {
        kr_overwrite: true,
        ..id_options()
    };
    let stats = fx.engine.apply(&work, &options).unwrap();
    assert_eq!(stats.overwritten, 1);
    assert_eq!(cell(&work, "string_ui", 2, 3), "书");
    let entry = &stats.overwrite_log[0];
    assert_eq!(entry.string_id, "S2");
    assert_eq!(entry.language, Language::Cn);
    assert_eq!(entry.kr_text, "책");
    assert_eq!(entry.old_text, "冊");
    assert_eq!(entry.new_text, "书");

    // 다시 적용하면 변경 없음
    let again = fx.engine.apply(&work, &options).unwrap();
    assert!(!again.has_writes());
    assert!(!again.saved);
}

#[test]
fn conditional_skip_by_request_value() {
    let fx = Fixture::new(MASTER);
    let work = fx.working(
        "work.xlsx",
        &[HEADER, &["S3", "검", "", "전달"], &["S1", "안녕", "", "Change"]],
    );
    let options = ApplyOptions {
        allowed_request_values: vec!["신규".to_string(), "change".to_string()],
        ..id_options()
    };

    let stats = fx.engine.apply(&work, &options).unwrap();

    assert_eq!(stats.conditional_skipped, 1);
    assert_eq!(stats.updated, 1);
    assert_eq!(cell(&work, "string_ui", 2, 3), "");
    assert_eq!(cell(&work, "string_ui", 2, 4), "전달");
    assert_eq!(cell(&work, "string_ui", 3, 3), "你好");
}

#[test]
fn duplicates_block_apply() {
    let fx = Fixture::new(&[
        &["STRING_ID", "KR", "CN"],
        &["S4", "문", "门"],
        &["S4", "대문", "门"],
    ]);
    let work = fx.working("work.xlsx", &[HEADER, &["S4", "문", "", ""]]);

    let err = fx.engine.apply(&work, &id_options()).unwrap_err();
    assert!(matches!(err, SyncError::DuplicatePending(1)));
    assert_eq!(fx.engine.pending_duplicates(&[]).unwrap()[0].candidates.len(), 2);
}

#[test]
fn applying_source_onto_itself_writes_nothing() {
    let fx = Fixture::new(MASTER);
    let copy = fx.dir.path().join("copy.xlsx");
    std::fs::copy(fx.dir.path().join("master.xlsx"), &copy).unwrap();
    let before = std::fs::read(&copy).unwrap();

    let combos = [
        id_options(),
        ApplyOptions {
            kr_overwrite: true,
            ..id_options()
        },
        ApplyOptions::default(),
        ApplyOptions {
            mode: ApplyMode::Kr,
            kr_overwrite_on_kr_mode: true,
            ..Default::default()
        },
    ];
    for options in &combos {
        let stats = fx.engine.apply(&copy, options).unwrap();
        assert_eq!(stats.updated, 0);
        assert_eq!(stats.overwritten, 0);
        assert!(!stats.saved);
    }
    assert_eq!(std::fs::read(&copy).unwrap(), before);
}

#[test]
fn kr_mode_matches_rows_without_ids() {
    let fx = Fixture::new(MASTER);
    let work = fx.working(
        "work.xlsx",
        &[HEADER, &["", "검", "", ""], &["", "없는말", "", ""], &["", "", "", "메모"]],
    );
    let options = ApplyOptions {
        mode: ApplyMode::Kr,
        selected_languages: vec![Language::Cn],
        ..Default::default()
    };

    let stats = fx.engine.apply(&work, &options).unwrap();

    assert_eq!(stats.updated, 1);
    assert_eq!(stats.unmatched, 1);
    assert_eq!(stats.no_key, 1);
    assert_eq!(cell(&work, "string_ui", 2, 3), "剑");
}

#[test]
fn filtered_cache_limits_matches_and_uses_filter_stamp() {
    let dir = tempdir().unwrap();
    let master = dir.path().join("master.xlsx");
    write_sheets(
        &master,
        &[(
            "string_ui",
            &[
                &["STRING_ID", "KR", "CN", "#번역요청"],
                &["S1", "안녕", "你好", "신규"],
                &["S2", "책", "书", "완료"],
            ],
        )],
    );
    let mut engine = Engine::new(EngineConfig::new(dir.path().join("cache")));
    let stats = engine
        .load(
            &SourceRef::Workbooks(vec![master]),
            None,
            Some(&SpecialFilter {
                column: "#번역요청".to_string(),
                value: "신규".to_string(),
            }),
        )
        .unwrap();
    assert_eq!(stats.special_filter.as_ref().unwrap().matched_rows, 1);

    let work = dir.path().join("work.xlsx");
    write_sheets(
        &work,
        &[("string_ui", &[HEADER, &["S1", "안녕", "", ""], &["S2", "책", "", ""]])],
    );
    let options = ApplyOptions {
        use_filtered_cache: true,
        ..id_options()
    };
    let applied = engine.apply(&work, &options).unwrap();

    assert_eq!(applied.updated, 1);
    assert_eq!(applied.unmatched, 1);
    assert_eq!(cell(&work, "string_ui", 2, 4), "특수필터적용");
    assert_eq!(cell(&work, "string_ui", 3, 3), "");
}

#[test]
fn inactive_working_rows_never_match() {
    let fx = Fixture::new(MASTER);
    let work = fx.working(
        "work.xlsx",
        &[&["Memo", "STRING_ID", "KR", "CN"], &["# obsolete", "S1", "안녕", ""]],
    );

    let stats = fx.engine.apply(&work, &id_options()).unwrap();

    assert_eq!(stats.rows_visited, 1);
    assert_eq!(stats.unmatched, 1);
    assert_eq!(cell(&work, "string_ui", 2, 4), "");
}

#[test]
fn locked_workbook_is_reported_and_batch_continues() {
    let fx = Fixture::new(MASTER);
    let locked = fx.working("locked.xlsx", &[HEADER, &["S1", "안녕", "", ""]]);
    let free = fx.working("free.xlsx", &[HEADER, &["S1", "안녕", "", ""]]);
    std::fs::write(fx.dir.path().join("~$locked.xlsx"), b"owner").unwrap();

    let err = fx.engine.apply(&locked, &id_options()).unwrap_err();
    assert!(matches!(err, SyncError::FileLocked(_)));

    let report = fx
        .engine
        .apply_many(
            &[locked.clone(), free.clone()],
            &id_options(),
            &locsync_lib::NoProgress,
            &locsync_lib::CancelToken::new(),
        )
        .unwrap();
    assert_eq!(report.failed_files, 1);
    assert_eq!(report.files[0].error.as_ref().unwrap().code, "FILE_LOCKED");
    assert_eq!(report.saved_files, 1);
    assert_eq!(cell(&free, "string_ui", 2, 3), "你好");
    assert_eq!(cell(&locked, "string_ui", 2, 3), "");
}

#[test]
fn other_sheets_and_cells_survive_a_save() {
    let fx = Fixture::new(MASTER);
    let work = fx.dir.path().join("work.xlsx");
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("string_ui").unwrap();
    for (c, label) in HEADER.iter().enumerate() {
        sheet.write_string(0, c as u16, *label).unwrap();
    }
    sheet.write_string(1, 0, "S1").unwrap();
    sheet.write_string(1, 1, "안녕").unwrap();
    sheet.write_number(1, 5, 42.0).unwrap();
    sheet.write_formula(1, 6, "=F2*2").unwrap();
    let notes = workbook.add_worksheet();
    notes.set_name("notes").unwrap();
    notes.write_string(0, 0, "keep").unwrap();
    workbook.save(&work).unwrap();

    let stats = fx.engine.apply(&work, &id_options()).unwrap();
    assert!(stats.saved);

    assert_eq!(cell(&work, "string_ui", 2, 3), "你好");
    assert_eq!(cell(&work, "string_ui", 2, 6), "42");
    assert_eq!(cell(&work, "notes", 1, 1), "keep");
    let mut reopened: Xlsx<_> = open_workbook(&work).unwrap();
    let formulas = reopened.worksheet_formula("string_ui").unwrap();
    assert_eq!(
        formulas.get_value((1, 6)).map(String::as_str),
        Some("F2*2")
    );
}
