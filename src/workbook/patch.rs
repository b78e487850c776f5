//! Worksheet XML 패치
//!
//! 워크시트 XML을 스트리밍으로 다시 쓰면서 지정된 셀만 교체합니다.
//! 패치 대상이 아닌 셀, 수식, 스타일, 시트 구조는 이벤트 그대로 통과합니다.
//! 문자열은 공유 문자열 표를 건드리지 않도록 inline string으로 기록합니다.

use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, Read};

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{SyncError, SyncResult};
use crate::utils::{column_letters, parse_cell_ref};

/// 셀에 기록할 값
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValueUpdate {
    Text(String),
    Blank,
}

/// 단일 셀 패치 (1-based 행/열)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellPatch {
    pub row: u32,
    pub column: u32,
    pub value: CellValueUpdate,
}

impl CellPatch {
    pub fn text(row: u32, column: u32, value: impl Into<String>) -> Self {
        Self {
            row,
            column,
            value: CellValueUpdate::Text(value.into()),
        }
    }

    pub fn blank(row: u32, column: u32) -> Self {
        Self {
            row,
            column,
            value: CellValueUpdate::Blank,
        }
    }
}

struct RowState {
    pending: Vec<CellPatch>,
    next_idx: usize,
    /// 직전 `<c>`의 열 번호 (`r`이 없는 셀의 위치 추정용)
    last_column: u32,
}

fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|b| *b == b':') {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}

fn element_prefix(name: &[u8]) -> Option<String> {
    let idx = name.iter().rposition(|b| *b == b':')?;
    std::str::from_utf8(&name[..idx]).ok().map(|s| s.to_string())
}

fn prefixed_tag(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(p) => format!("{}:{}", p, local),
        None => local.to_string(),
    }
}

fn attribute_value(e: &BytesStart<'_>, key: &[u8]) -> SyncResult<Option<String>> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// 워크시트 XML에 셀 패치를 적용합니다.
pub fn patch_worksheet_xml(xml: &[u8], patches: &[CellPatch]) -> SyncResult<Vec<u8>> {
    let mut patches_by_row: BTreeMap<u32, Vec<CellPatch>> = BTreeMap::new();
    for patch in patches {
        let row_patches = patches_by_row.entry(patch.row).or_default();
        // 같은 셀에 대한 패치는 마지막 것만 유지
        row_patches.retain(|p| p.column != patch.column);
        row_patches.push(patch.clone());
    }
    for row_patches in patches_by_row.values_mut() {
        row_patches.sort_by_key(|p| p.column);
    }

    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + patches.len() * 64));

    let mut buf = Vec::new();
    let mut in_sheet_data = false;
    let mut saw_sheet_data = false;
    let mut sheet_prefix: Option<String> = None;
    let mut row_state: Option<RowState> = None;
    let mut in_cell = false;
    let mut last_row = 0u32;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Eof => break,

            Event::Start(ref e) if local_name(e.name().as_ref()) == b"sheetData" => {
                saw_sheet_data = true;
                in_sheet_data = true;
                sheet_prefix = element_prefix(e.name().as_ref());
                writer.write_event(Event::Start(e.clone()))?;
            }
            Event::Empty(ref e) if local_name(e.name().as_ref()) == b"sheetData" => {
                saw_sheet_data = true;
                sheet_prefix = element_prefix(e.name().as_ref());
                if patches_by_row.is_empty() {
                    writer.write_event(Event::Empty(e.clone()))?;
                } else {
                    let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    writer.write_event(Event::Start(e.clone()))?;
                    write_pending_rows(&mut writer, &mut patches_by_row, sheet_prefix.as_deref())?;
                    writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
                }
            }
            Event::End(ref e) if local_name(e.name().as_ref()) == b"sheetData" => {
                write_pending_rows(&mut writer, &mut patches_by_row, sheet_prefix.as_deref())?;
                in_sheet_data = false;
                writer.write_event(Event::End(e.clone()))?;
            }

            Event::Start(ref e) if in_sheet_data && local_name(e.name().as_ref()) == b"row" => {
                let row = row_number(e, last_row)?;
                last_row = row;
                in_cell = false;
                write_rows_before(&mut writer, &mut patches_by_row, row, sheet_prefix.as_deref())?;

                match patches_by_row.remove(&row) {
                    Some(pending) => {
                        let start = row_with_spans(e, &pending)?;
                        writer.write_event(Event::Start(start))?;
                        row_state = Some(RowState {
                            pending,
                            next_idx: 0,
                            last_column: 0,
                        });
                    }
                    None => writer.write_event(Event::Start(e.clone()))?,
                }
            }
            Event::Empty(ref e) if in_sheet_data && local_name(e.name().as_ref()) == b"row" => {
                let row = row_number(e, last_row)?;
                last_row = row;
                in_cell = false;
                write_rows_before(&mut writer, &mut patches_by_row, row, sheet_prefix.as_deref())?;

                match patches_by_row.remove(&row) {
                    Some(pending) => {
                        // `<row/>`를 `<row>...</row>`로 펼쳐 셀 삽입
                        let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                        let prefix = element_prefix(e.name().as_ref()).or_else(|| sheet_prefix.clone());
                        writer.write_event(Event::Start(row_with_spans(e, &pending)?))?;
                        for patch in &pending {
                            write_new_cell(&mut writer, patch, prefix.as_deref())?;
                        }
                        writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
                    }
                    None => writer.write_event(Event::Empty(e.clone()))?,
                }
            }
            Event::End(ref e) if in_sheet_data && local_name(e.name().as_ref()) == b"row" => {
                if let Some(state) = row_state.take() {
                    let prefix = element_prefix(e.name().as_ref()).or_else(|| sheet_prefix.clone());
                    for patch in &state.pending[state.next_idx..] {
                        write_new_cell(&mut writer, patch, prefix.as_deref())?;
                    }
                }
                in_cell = false;
                writer.write_event(Event::End(e.clone()))?;
            }

            Event::Start(ref e) if row_state.is_some() && local_name(e.name().as_ref()) == b"c" => {
                let prefix = element_prefix(e.name().as_ref()).or_else(|| sheet_prefix.clone());
                if let Some(state) = row_state.as_mut() {
                    let column = cell_column(e, state.last_column)?;
                    state.last_column = column;
                    insert_pending_before(&mut writer, state, column, prefix.as_deref())?;
                    match take_patch_for(state, column) {
                        Some(patch) => {
                            skip_cell_children(&mut reader)?;
                            write_replaced_cell(&mut writer, e, &patch)?;
                        }
                        None => {
                            writer.write_event(Event::Start(e.clone()))?;
                            in_cell = true;
                        }
                    }
                }
            }
            Event::Empty(ref e) if row_state.is_some() && local_name(e.name().as_ref()) == b"c" => {
                let prefix = element_prefix(e.name().as_ref()).or_else(|| sheet_prefix.clone());
                if let Some(state) = row_state.as_mut() {
                    let column = cell_column(e, state.last_column)?;
                    state.last_column = column;
                    insert_pending_before(&mut writer, state, column, prefix.as_deref())?;
                    match take_patch_for(state, column) {
                        Some(patch) => write_replaced_cell(&mut writer, e, &patch)?,
                        None => writer.write_event(Event::Empty(e.clone()))?,
                    }
                }
            }
            Event::End(ref e) if in_cell && local_name(e.name().as_ref()) == b"c" => {
                in_cell = false;
                writer.write_event(Event::End(e.clone()))?;
            }
            // 행 안의 셀 이외 요소(extLst 등)보다 셀이 먼저 와야 한다
            Event::Start(ref e) if row_state.is_some() && !in_cell => {
                flush_row_pending(&mut writer, &mut row_state, sheet_prefix.as_deref())?;
                writer.write_event(Event::Start(e.clone()))?;
            }
            Event::Empty(ref e) if row_state.is_some() && !in_cell => {
                flush_row_pending(&mut writer, &mut row_state, sheet_prefix.as_deref())?;
                writer.write_event(Event::Empty(e.clone()))?;
            }

            ev => writer.write_event(ev)?,
        }
        buf.clear();
    }

    if !saw_sheet_data {
        return Err(SyncError::Xml("worksheet has no sheetData element".to_string()));
    }

    Ok(writer.into_inner())
}

/// 행 번호. `r`이 없으면 앞 행의 다음 번호
fn row_number(e: &BytesStart<'_>, previous: u32) -> SyncResult<u32> {
    match attribute_value(e, b"r")? {
        Some(v) => v
            .trim()
            .parse::<u32>()
            .map_err(|_| SyncError::Xml(format!("invalid row number {}", v))),
        None => Ok(previous + 1),
    }
}

/// 셀 열 번호. `r`이 없으면 앞 셀의 다음 열
fn cell_column(e: &BytesStart<'_>, previous: u32) -> SyncResult<u32> {
    match attribute_value(e, b"r")? {
        Some(a1) => parse_cell_ref(&a1)
            .map(|(_, column)| column)
            .ok_or_else(|| SyncError::Xml(format!("invalid cell reference {}", a1))),
        None => Ok(previous + 1),
    }
}

/// 패치 열을 포함하도록 `spans` 속성을 넓힌 행 시작 태그
fn row_with_spans(original: &BytesStart<'_>, patches: &[CellPatch]) -> SyncResult<BytesStart<'static>> {
    let tag = String::from_utf8_lossy(original.name().as_ref()).into_owned();
    let mut out = BytesStart::new(tag);
    let min_col = patches.iter().map(|p| p.column).min().unwrap_or(1);
    let max_col = patches.iter().map(|p| p.column).max().unwrap_or(1);

    for attr in original.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"spans" {
            let existing = attr.unescape_value()?.into_owned();
            let widened = existing
                .split_once(':')
                .and_then(|(a, b)| Some((a.parse::<u32>().ok()?, b.parse::<u32>().ok()?)))
                .map(|(a, b)| format!("{}:{}", a.min(min_col), b.max(max_col)))
                .unwrap_or(existing);
            out.push_attribute(("spans", widened.as_str()));
        } else {
            out.push_attribute((attr.key.as_ref(), attr.value.as_ref()));
        }
    }
    Ok(out)
}

fn write_rows_before(
    writer: &mut Writer<Vec<u8>>,
    patches_by_row: &mut BTreeMap<u32, Vec<CellPatch>>,
    row: u32,
    prefix: Option<&str>,
) -> SyncResult<()> {
    while let Some((&next_row, _)) = patches_by_row.iter().next() {
        if next_row >= row {
            break;
        }
        let pending = patches_by_row.remove(&next_row).unwrap_or_default();
        write_new_row(writer, next_row, &pending, prefix)?;
    }
    Ok(())
}

fn write_pending_rows(
    writer: &mut Writer<Vec<u8>>,
    patches_by_row: &mut BTreeMap<u32, Vec<CellPatch>>,
    prefix: Option<&str>,
) -> SyncResult<()> {
    for (row, pending) in std::mem::take(patches_by_row) {
        write_new_row(writer, row, &pending, prefix)?;
    }
    Ok(())
}

fn write_new_row(
    writer: &mut Writer<Vec<u8>>,
    row: u32,
    patches: &[CellPatch],
    prefix: Option<&str>,
) -> SyncResult<()> {
    let tag = prefixed_tag(prefix, "row");
    let mut start = BytesStart::new(tag.as_str());
    let r = row.to_string();
    start.push_attribute(("r", r.as_str()));
    writer.write_event(Event::Start(start))?;
    for patch in patches {
        write_new_cell(writer, patch, prefix)?;
    }
    writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
    Ok(())
}

fn insert_pending_before(
    writer: &mut Writer<Vec<u8>>,
    state: &mut RowState,
    column: u32,
    prefix: Option<&str>,
) -> SyncResult<()> {
    while let Some(patch) = state.pending.get(state.next_idx) {
        if patch.column >= column {
            break;
        }
        write_new_cell(writer, patch, prefix)?;
        state.next_idx += 1;
    }
    Ok(())
}

fn flush_row_pending(
    writer: &mut Writer<Vec<u8>>,
    row_state: &mut Option<RowState>,
    prefix: Option<&str>,
) -> SyncResult<()> {
    if let Some(state) = row_state.as_mut() {
        insert_pending_before(writer, state, u32::MAX, prefix)?;
    }
    Ok(())
}

fn take_patch_for(state: &mut RowState, column: u32) -> Option<CellPatch> {
    let patch = state.pending.get(state.next_idx)?;
    if patch.column == column {
        state.next_idx += 1;
        Some(patch.clone())
    } else {
        None
    }
}

/// 현재 `<c>`의 자식 이벤트를 닫는 태그까지 건너뜁니다.
fn skip_cell_children<R: BufRead>(reader: &mut Reader<R>) -> SyncResult<()> {
    let mut buf = Vec::new();
    let mut depth = 0usize;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(_) => depth += 1,
            Event::End(ref e) if depth == 0 && local_name(e.name().as_ref()) == b"c" => break,
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => {
                return Err(SyncError::Xml("unexpected end of worksheet inside cell".to_string()))
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

/// 기존 셀을 교체합니다. `t`를 제외한 속성(`r`, `s` 스타일 등)은 유지합니다.
fn write_replaced_cell(
    writer: &mut Writer<Vec<u8>>,
    original: &BytesStart<'_>,
    patch: &CellPatch,
) -> SyncResult<()> {
    let tag = String::from_utf8_lossy(original.name().as_ref()).into_owned();
    let prefix = element_prefix(original.name().as_ref());
    let mut start = BytesStart::new(tag.as_str());
    for attr in original.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"t" {
            continue;
        }
        start.push_attribute((attr.key.as_ref(), attr.value.as_ref()));
    }
    write_cell_body(writer, start, &tag, prefix.as_deref(), &patch.value)
}

fn write_new_cell(writer: &mut Writer<Vec<u8>>, patch: &CellPatch, prefix: Option<&str>) -> SyncResult<()> {
    let tag = prefixed_tag(prefix, "c");
    let mut start = BytesStart::new(tag.as_str());
    let a1 = format!("{}{}", column_letters(patch.column), patch.row);
    start.push_attribute(("r", a1.as_str()));
    write_cell_body(writer, start, &tag, prefix, &patch.value)
}

fn write_cell_body(
    writer: &mut Writer<Vec<u8>>,
    mut start: BytesStart<'_>,
    tag: &str,
    prefix: Option<&str>,
    value: &CellValueUpdate,
) -> SyncResult<()> {
    match value {
        CellValueUpdate::Blank => {
            writer.write_event(Event::Empty(start))?;
        }
        CellValueUpdate::Text(text) => {
            start.push_attribute(("t", "inlineStr"));
            writer.write_event(Event::Start(start))?;

            let is_tag = prefixed_tag(prefix, "is");
            let t_tag = prefixed_tag(prefix, "t");
            writer.write_event(Event::Start(BytesStart::new(is_tag.as_str())))?;
            let mut t = BytesStart::new(t_tag.as_str());
            if text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace) {
                t.push_attribute(("xml:space", "preserve"));
            }
            writer.write_event(Event::Start(t))?;
            writer.write_event(Event::Text(BytesText::new(text)))?;
            writer.write_event(Event::End(BytesEnd::new(t_tag.as_str())))?;
            writer.write_event(Event::End(BytesEnd::new(is_tag.as_str())))?;
            writer.write_event(Event::End(BytesEnd::new(tag)))?;
        }
    }
    Ok(())
}

/// `xl/workbook.xml`과 관계 파일에서 시트 이름 -> 워크시트 파트 경로를 만듭니다.
pub fn resolve_sheet_parts(workbook_xml: &[u8], rels_xml: &[u8]) -> SyncResult<HashMap<String, String>> {
    let mut targets: HashMap<String, String> = HashMap::new();
    let mut reader = Reader::from_reader(rels_xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) | Event::Empty(ref e)
                if local_name(e.name().as_ref()) == b"Relationship" =>
            {
                let id = attribute_value(e, b"Id")?;
                let target = attribute_value(e, b"Target")?;
                if let (Some(id), Some(target)) = (id, target) {
                    targets.insert(id, normalize_part_target(&target));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let mut parts = HashMap::new();
    let mut reader = Reader::from_reader(workbook_xml);
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) | Event::Empty(ref e) if local_name(e.name().as_ref()) == b"sheet" => {
                let mut name = None;
                let mut rel_id = None;
                for attr in e.attributes() {
                    let attr = attr?;
                    let key = attr.key.as_ref();
                    if key == b"name" {
                        name = Some(attr.unescape_value()?.into_owned());
                    } else if key != b"id" && local_name(key) == b"id" {
                        rel_id = Some(attr.unescape_value()?.into_owned());
                    }
                }
                if let (Some(name), Some(target)) = (name, rel_id.and_then(|id| targets.get(&id))) {
                    parts.insert(name, target.clone());
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(parts)
}

/// 관계 Target을 ZIP 엔트리 이름으로 변환 (`worksheets/sheet1.xml` -> `xl/worksheets/sheet1.xml`)
fn normalize_part_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target.trim_start_matches("./")),
    }
}

/// ZIP 엔트리를 바이트로 읽습니다.
pub fn read_entry<R: Read + std::io::Seek>(archive: &mut zip::ZipArchive<R>, name: &str) -> SyncResult<Vec<u8>> {
    let mut entry = archive.by_name(name)?;
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut bytes)?;
    Ok(bytes)
}
