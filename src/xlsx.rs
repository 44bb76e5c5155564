//! Worksheet reader for OOXML spreadsheets (`.xlsx`).
//!
//! The KBOB dataset is published as an Excel workbook. This module unpacks
//! the ZIP container, resolves shared strings, and turns one worksheet into
//! [`RawRow`]s keyed by the header row. Only cell values are read; styles,
//! formulas and merged ranges are ignored.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;

use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

use kbob_core::models::{RawRow, RawValue};

/// Largest decompressed part we are willing to inflate.
const MAX_PART_BYTES: u64 = 64 * 1024 * 1024;
/// Non-blank cells one worksheet may hold. Larger sheets are refused.
const MAX_CELLS_PER_SHEET: usize = 2_000_000;

#[derive(Debug, Error)]
pub enum XlsxError {
    #[error("not a valid xlsx archive: {0}")]
    Archive(String),
    #[error("worksheet {0} not found")]
    MissingSheet(usize),
    #[error("header row {0} is empty or missing")]
    MissingHeader(usize),
    #[error("malformed worksheet XML: {0}")]
    Xml(String),
    #[error("{part} exceeds the limit of {limit} {unit}")]
    TooLarge {
        part: String,
        limit: u64,
        unit: &'static str,
    },
}

/// Read worksheet `sheet_index` (0-based) and return its data rows.
///
/// Row `header_row` (1-based) provides field names; every later non-empty
/// row becomes a [`RawRow`] whose `position` is the spreadsheet row number.
/// Cells under an empty header are dropped.
pub fn read_rows(
    bytes: &[u8],
    sheet_index: usize,
    header_row: usize,
) -> Result<Vec<RawRow>, XlsxError> {
    let mut book = Workbook::open(bytes)?;
    let shared_strings = book.shared_strings()?;
    let sheet_path = book
        .worksheet_paths()?
        .into_iter()
        .nth(sheet_index)
        .ok_or(XlsxError::MissingSheet(sheet_index))?;
    let xml = book
        .part(&sheet_path)?
        .ok_or(XlsxError::MissingSheet(sheet_index))?;
    let grid = read_sheet_cells(&xml, &shared_strings, MAX_CELLS_PER_SHEET)?;

    let headers = grid
        .get(&header_row)
        .filter(|cells| cells.values().any(|v| !v.is_blank()))
        .ok_or(XlsxError::MissingHeader(header_row))?;
    let headers: BTreeMap<usize, String> = headers
        .iter()
        .map(|(col, v)| (*col, v.to_string().trim().to_string()))
        .filter(|(_, name)| !name.is_empty())
        .collect();

    let mut rows = Vec::new();
    for (row_num, cells) in grid.range(header_row + 1..) {
        if cells.values().all(|v| v.is_blank()) {
            continue;
        }
        let mut row = RawRow::new(*row_num);
        for (col, name) in &headers {
            let value = cells.get(col).cloned().unwrap_or(RawValue::Empty);
            row.push(name.clone(), value);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// The OOXML package: a ZIP archive of XML parts.
struct Workbook<'a> {
    archive: zip::ZipArchive<std::io::Cursor<&'a [u8]>>,
}

impl<'a> Workbook<'a> {
    fn open(bytes: &'a [u8]) -> Result<Self, XlsxError> {
        let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
            .map_err(|e| XlsxError::Archive(e.to_string()))?;
        Ok(Self { archive })
    }

    /// Inflate one part, or `None` if the package does not contain it.
    fn part(&mut self, name: &str) -> Result<Option<Vec<u8>>, XlsxError> {
        if self.archive.index_for_name(name).is_none() {
            return Ok(None);
        }
        let entry = self
            .archive
            .by_name(name)
            .map_err(|e| XlsxError::Archive(format!("{}: {}", name, e)))?;
        let mut out = Vec::new();
        entry
            .take(MAX_PART_BYTES + 1)
            .read_to_end(&mut out)
            .map_err(|e| XlsxError::Archive(format!("{}: {}", name, e)))?;
        if out.len() as u64 > MAX_PART_BYTES {
            return Err(XlsxError::TooLarge {
                part: name.to_string(),
                limit: MAX_PART_BYTES,
                unit: "bytes",
            });
        }
        Ok(Some(out))
    }

    /// Shared string table. Rich-text runs inside one `<si>` are concatenated.
    /// Workbooks without any text cells have no table at all.
    fn shared_strings(&mut self) -> Result<Vec<String>, XlsxError> {
        let Some(xml) = self.part("xl/sharedStrings.xml")? else {
            return Ok(Vec::new());
        };
        let mut strings = Vec::new();
        let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
        let mut buf = Vec::new();
        let mut current: Option<String> = None;
        let mut in_t = false;
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => match e.local_name().as_ref() {
                    b"si" => current = Some(String::new()),
                    b"t" => in_t = true,
                    _ => {}
                },
                Ok(Event::Empty(e)) => {
                    if e.local_name().as_ref() == b"si" {
                        strings.push(String::new());
                    }
                }
                Ok(Event::Text(te)) if in_t => {
                    if let Some(s) = current.as_mut() {
                        s.push_str(&te.unescape().map_err(|e| XlsxError::Xml(e.to_string()))?);
                    }
                }
                Ok(Event::End(e)) => match e.local_name().as_ref() {
                    b"t" => in_t = false,
                    b"si" => strings.push(current.take().unwrap_or_default()),
                    _ => {}
                },
                Ok(Event::Eof) => break,
                Err(e) => return Err(XlsxError::Xml(e.to_string())),
                _ => {}
            }
            buf.clear();
        }
        Ok(strings)
    }

    /// Worksheet part paths in tab order.
    ///
    /// The order comes from `<sheets>` in `xl/workbook.xml`, resolved through
    /// its relationships. Chart sheets are skipped. A package without a
    /// workbook part falls back to `sheetN.xml` numbering.
    fn worksheet_paths(&mut self) -> Result<Vec<String>, XlsxError> {
        let (Some(workbook), Some(rels)) = (
            self.part("xl/workbook.xml")?,
            self.part("xl/_rels/workbook.xml.rels")?,
        ) else {
            return Ok(self.numbered_worksheets());
        };

        let targets = worksheet_targets(&rels)?;
        let mut paths = Vec::new();
        for rel_id in sheet_rel_ids(&workbook)? {
            if let Some(target) = targets.get(&rel_id) {
                paths.push(target.clone());
            }
        }
        Ok(paths)
    }

    fn numbered_worksheets(&self) -> Vec<String> {
        let mut numbered: Vec<(u32, String)> = self
            .archive
            .file_names()
            .filter_map(|name| {
                let n = name
                    .strip_prefix("xl/worksheets/sheet")?
                    .strip_suffix(".xml")?
                    .parse()
                    .ok()?;
                Some((n, name.to_string()))
            })
            .collect();
        numbered.sort();
        numbered.into_iter().map(|(_, name)| name).collect()
    }
}

/// `r:id` of every `<sheet>` in `xl/workbook.xml`, in document order.
fn sheet_rel_ids(xml: &[u8]) -> Result<Vec<String>, XlsxError> {
    let mut ids = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                if let Some(id) = attr(&e, b"id") {
                    ids.push(id);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(XlsxError::Xml(format!("xl/workbook.xml: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(ids)
}

/// Relationship id → package path, for worksheet relationships only.
fn worksheet_targets(xml: &[u8]) -> Result<HashMap<String, String>, XlsxError> {
    let mut targets = HashMap::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let is_worksheet = attr(&e, b"Type").is_some_and(|t| t.ends_with("/worksheet"));
                if let (true, Some(id), Some(target)) =
                    (is_worksheet, attr(&e, b"Id"), attr(&e, b"Target"))
                {
                    let path = match target.strip_prefix('/') {
                        Some(absolute) => absolute.to_string(),
                        None => format!("xl/{}", target),
                    };
                    targets.insert(id, path);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(XlsxError::Xml(format!(
                    "xl/_rels/workbook.xml.rels: {}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(targets)
}

/// Cell type from the `t` attribute of `<c>`.
#[derive(Clone, Copy, PartialEq)]
enum CellKind {
    Number,
    Shared,
    Inline,
    Str,
    Bool,
    Error,
}

struct CellCursor {
    row: usize,
    col: usize,
    kind: CellKind,
    text: String,
}

/// Row number → (column index → value). Both 1-based, as in Excel.
type Grid = BTreeMap<usize, BTreeMap<usize, RawValue>>;

/// Collect the non-blank cells of one worksheet. More than `max_cells`
/// of them is an error; a truncated grid would publish a partial dataset.
fn read_sheet_cells(
    xml: &[u8],
    shared_strings: &[String],
    max_cells: usize,
) -> Result<Grid, XlsxError> {
    let mut grid: Grid = BTreeMap::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut current_row = 0usize;
    let mut next_col = 1usize;
    let mut cell: Option<CellCursor> = None;
    let mut in_value = false;
    let mut cell_count = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    current_row = attr(&e, b"r")
                        .and_then(|r| r.parse().ok())
                        .unwrap_or(current_row + 1);
                    next_col = 1;
                }
                b"c" => {
                    cell = Some(open_cell(&e, current_row, next_col));
                }
                b"v" | b"t" => in_value = cell.is_some(),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"row" => {
                    current_row = attr(&e, b"r")
                        .and_then(|r| r.parse().ok())
                        .unwrap_or(current_row + 1);
                }
                b"c" => {
                    // Styled but empty cell: only advances the column cursor.
                    let c = open_cell(&e, current_row, next_col);
                    next_col = c.col + 1;
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                if let Some(c) = cell.as_mut() {
                    c.text
                        .push_str(&te.unescape().map_err(|e| XlsxError::Xml(e.to_string()))?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some(c) = cell.take() {
                        next_col = c.col + 1;
                        let value = cell_value(&c, shared_strings);
                        if !value.is_blank() {
                            cell_count += 1;
                            if cell_count > max_cells {
                                return Err(XlsxError::TooLarge {
                                    part: "worksheet".to_string(),
                                    limit: max_cells as u64,
                                    unit: "cells",
                                });
                            }
                            grid.entry(c.row).or_default().insert(c.col, value);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(XlsxError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(grid)
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

fn open_cell(e: &BytesStart<'_>, current_row: usize, next_col: usize) -> CellCursor {
    let (col, row) = attr(e, b"r")
        .and_then(|r| parse_cell_ref(&r))
        .unwrap_or((next_col, current_row));
    let kind = match attr(e, b"t").as_deref() {
        Some("s") => CellKind::Shared,
        Some("inlineStr") => CellKind::Inline,
        Some("str") => CellKind::Str,
        Some("b") => CellKind::Bool,
        Some("e") => CellKind::Error,
        _ => CellKind::Number,
    };
    CellCursor {
        row,
        col,
        kind,
        text: String::new(),
    }
}

fn cell_value(cell: &CellCursor, shared_strings: &[String]) -> RawValue {
    let text = cell.text.as_str();
    if text.is_empty() {
        return RawValue::Empty;
    }
    match cell.kind {
        CellKind::Shared => text
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared_strings.get(i))
            .map(|s| RawValue::Text(s.clone()))
            .unwrap_or(RawValue::Empty),
        CellKind::Inline | CellKind::Str | CellKind::Error => RawValue::Text(text.to_string()),
        CellKind::Bool => RawValue::Bool(text.trim() == "1"),
        CellKind::Number => match text.trim().parse::<f64>() {
            Ok(n) => RawValue::Number(n),
            Err(_) => RawValue::Text(text.to_string()),
        },
    }
}

/// `"AB12"` → `(28, 12)`.
fn parse_cell_ref(r: &str) -> Option<(usize, usize)> {
    let letters: String = r.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    let digits = &r[letters.len()..];
    if letters.is_empty() || digits.is_empty() {
        return None;
    }
    let col = letters
        .chars()
        .try_fold(0usize, |acc, c| {
            acc.checked_mul(26)?
                .checked_add((c.to_ascii_uppercase() as u8 - b'A') as usize + 1)
        })?;
    let row = digits.parse().ok()?;
    Some((col, row))
}
