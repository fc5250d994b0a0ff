//! Document boundary
//!
//! The engine never talks to a spreadsheet library directly. Export drives a
//! [`DocumentSink`] and import reads from a [`DocumentSource`]. The buffered
//! [`Workbook`] implements both and renders `.xlsx` through rust_xlsxwriter;
//! [`XlsxReader`] reads `.xlsx` through calamine.

mod reader;
mod workbook;

pub use reader::XlsxReader;
pub use workbook::{SheetModel, Workbook};

use crate::error::TabulaResult;
use crate::types::{Align, CellValue, Rgb};
use std::collections::HashMap;
use std::io::Write;

/// Index of a sheet inside one document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SheetId(pub usize);

/// Index of a style registered with [`DocumentSink::create_style`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StyleHandle(pub usize);

/// Inclusive rectangular cell range, zero-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRange {
    pub first_row: u32,
    pub last_row: u32,
    pub first_col: u16,
    pub last_col: u16,
}

impl CellRange {
    pub fn new(first_row: u32, last_row: u32, first_col: u16, last_col: u16) -> Self {
        Self {
            first_row,
            last_row,
            first_col,
            last_col,
        }
    }

    pub fn is_single_cell(&self) -> bool {
        self.first_row == self.last_row && self.first_col == self.last_col
    }

    pub fn rows(&self) -> u32 {
        self.last_row - self.first_row + 1
    }

    pub fn contains(&self, row: u32, col: u16) -> bool {
        (self.first_row..=self.last_row).contains(&row)
            && (self.first_col..=self.last_col).contains(&col)
    }
}

/// Visual attributes of one style record
#[derive(Debug, Clone, PartialEq)]
pub struct StyleSpec {
    pub font_name: String,
    pub font_size: f64,
    pub bold: bool,
    pub font_color: Option<Rgb>,
    /// Solid fill colour
    pub background: Option<Rgb>,
    pub align: Align,
    pub vertical_center: bool,
    /// Thin border on all four sides in this colour
    pub border: Option<Rgb>,
    pub num_format: Option<String>,
    pub wrap: bool,
}

impl Default for StyleSpec {
    fn default() -> Self {
        Self {
            font_name: "Arial".to_string(),
            font_size: 10.0,
            bold: false,
            font_color: None,
            background: None,
            align: Align::General,
            vertical_center: false,
            border: None,
            num_format: None,
            wrap: false,
        }
    }
}

/// Allowed-value rule of a data validation
#[derive(Debug, Clone, PartialEq)]
pub enum DataRule {
    /// Explicit inline list
    List(Vec<String>),
    /// List backed by a formula, typically a named range
    ListFormula(String),
    /// No restriction; used to carry a prompt only
    Any,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataConstraint {
    pub rule: DataRule,
    pub prompt: Option<String>,
    pub range: CellRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    Png,
    Jpeg,
    Gif,
    Bmp,
}

impl ImageKind {
    /// Detect the picture format from magic bytes, defaulting to JPEG
    pub fn sniff(bytes: &[u8]) -> Self {
        match bytes {
            [0x89, b'P', b'N', b'G', ..] => ImageKind::Png,
            [b'G', b'I', b'F', b'8', ..] => ImageKind::Gif,
            [b'B', b'M', ..] => ImageKind::Bmp,
            _ => ImageKind::Jpeg,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Png => "png",
            ImageKind::Jpeg => "jpeg",
            ImageKind::Gif => "gif",
            ImageKind::Bmp => "bmp",
        }
    }
}

/// Write side of the document boundary
pub trait DocumentSink {
    /// Register a style. Implementations may treat this as expensive.
    fn create_style(&mut self, spec: &StyleSpec) -> TabulaResult<StyleHandle>;

    fn create_sheet(&mut self, name: &str) -> TabulaResult<SheetId>;

    /// Declare a row, optionally with a height in points
    fn create_row(&mut self, sheet: SheetId, row: u32, height: Option<f64>) -> TabulaResult<()>;

    fn set_column_width(&mut self, sheet: SheetId, col: u16, width: f64) -> TabulaResult<()>;

    fn set_cell(
        &mut self,
        sheet: SheetId,
        row: u32,
        col: u16,
        value: CellValue,
        style: Option<StyleHandle>,
    ) -> TabulaResult<()>;

    fn add_merged_region(&mut self, sheet: SheetId, range: CellRange) -> TabulaResult<()>;

    fn add_data_validation(
        &mut self,
        sheet: SheetId,
        constraint: DataConstraint,
    ) -> TabulaResult<()>;

    /// Bind a workbook-level name to a formula such as `combo!$A$1:$A$20`
    fn create_named_range(&mut self, name: &str, formula: &str) -> TabulaResult<()>;

    fn hide_sheet(&mut self, sheet: SheetId) -> TabulaResult<()>;

    fn embed_picture(
        &mut self,
        sheet: SheetId,
        row: u32,
        col: u16,
        bytes: &[u8],
        kind: ImageKind,
    ) -> TabulaResult<()>;

    /// Serialize the whole document
    fn write(&mut self, out: &mut dyn Write) -> TabulaResult<()>;
}

/// Read side of the document boundary
pub trait DocumentSource {
    fn sheet_names(&self) -> Vec<String>;

    fn read_sheet(&mut self, name: &str) -> TabulaResult<SheetData>;
}

/// Materialized sheet contents, zero-based and dense from `A1`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetData {
    pub name: String,
    rows: Vec<Vec<CellValue>>,
    pictures: HashMap<(u32, u16), Vec<u8>>,
}

static EMPTY: CellValue = CellValue::Empty;

impl SheetData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn set(&mut self, row: u32, col: u16, value: CellValue) {
        let (r, c) = (row as usize, col as usize);
        if self.rows.len() <= r {
            self.rows.resize_with(r + 1, Vec::new);
        }
        let cells = &mut self.rows[r];
        if cells.len() <= c {
            cells.resize(c + 1, CellValue::Empty);
        }
        cells[c] = value;
    }

    pub fn add_picture(&mut self, row: u32, col: u16, bytes: Vec<u8>) {
        self.pictures.insert((row, col), bytes);
    }

    pub fn cell(&self, row: u32, col: u16) -> &CellValue {
        self.rows
            .get(row as usize)
            .and_then(|cells| cells.get(col as usize))
            .unwrap_or(&EMPTY)
    }

    pub fn row(&self, row: u32) -> &[CellValue] {
        self.rows.get(row as usize).map_or(&[], Vec::as_slice)
    }

    /// Index of the last row holding any cell, blank or not
    pub fn last_row(&self) -> Option<u32> {
        self.rows.len().checked_sub(1).map(|r| r as u32)
    }

    pub fn picture(&self, row: u32, col: u16) -> Option<&[u8]> {
        self.pictures.get(&(row, col)).map(Vec::as_slice)
    }

    pub fn row_has_picture(&self, row: u32) -> bool {
        self.pictures.keys().any(|(r, _)| *r == row)
    }

    pub fn picture_count(&self) -> usize {
        self.pictures.len()
    }
}

/// Convert a zero-based column index to letters: 0 -> A, 26 -> AA
pub fn column_letter(mut idx: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'A' + (idx % 26) as u8) as char);
        if idx < 26 {
            break;
        }
        idx = idx / 26 - 1;
    }
    letters.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letter() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(51), "AZ");
        assert_eq!(column_letter(52), "BA");
        assert_eq!(column_letter(701), "ZZ");
        assert_eq!(column_letter(702), "AAA");
    }

    #[test]
    fn test_sniff_image_kind() {
        assert_eq!(ImageKind::sniff(&[0x89, b'P', b'N', b'G', 0x0D]), ImageKind::Png);
        assert_eq!(ImageKind::sniff(b"GIF89a"), ImageKind::Gif);
        assert_eq!(ImageKind::sniff(b"BM...."), ImageKind::Bmp);
        assert_eq!(ImageKind::sniff(&[0xFF, 0xD8, 0xFF]), ImageKind::Jpeg);
        assert_eq!(ImageKind::sniff(&[]), ImageKind::Jpeg);
    }

    #[test]
    fn test_sheet_data_dense_access() {
        let mut sheet = SheetData::new("s");
        sheet.set(2, 3, CellValue::Number(1.0));
        assert_eq!(sheet.last_row(), Some(2));
        assert_eq!(sheet.cell(2, 3), &CellValue::Number(1.0));
        assert_eq!(sheet.cell(0, 0), &CellValue::Empty);
        assert_eq!(sheet.cell(9, 9), &CellValue::Empty);
        assert!(sheet.row(1).is_empty());
        assert_eq!(sheet.row(2).len(), 4);
    }

    #[test]
    fn test_cell_range() {
        let range = CellRange::new(3, 5, 1, 1);
        assert_eq!(range.rows(), 3);
        assert!(!range.is_single_cell());
        assert!(range.contains(4, 1));
        assert!(!range.contains(4, 2));
        assert!(CellRange::new(1, 1, 0, 0).is_single_cell());
    }
}
