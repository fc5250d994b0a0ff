//! Buffered workbook
//!
//! Records every boundary call in memory and renders the `.xlsx` package in
//! one pass on [`DocumentSink::write`]. Merges are laid down before values so
//! the first cell of a merged region keeps its content.

use super::{
    CellRange, DataConstraint, DataRule, DocumentSink, DocumentSource, ImageKind, SheetData,
    SheetId, StyleHandle, StyleSpec,
};
use crate::error::{TabulaError, TabulaResult};
use crate::types::{Align, CellValue};
use rust_xlsxwriter::{
    Color, DataValidation, Format, FormatAlign, FormatBorder, FormatPattern, Formula, Image,
    Worksheet,
};
use std::collections::BTreeMap;
use std::io::Write;
use tracing::debug;

const MAX_SHEET_NAME: usize = 31;
const INVALID_NAME_CHARS: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];

#[derive(Debug, Clone, PartialEq)]
pub struct Picture {
    pub row: u32,
    pub col: u16,
    pub bytes: Vec<u8>,
    pub kind: ImageKind,
}

/// Everything declared on one sheet
#[derive(Debug, Clone, Default)]
pub struct SheetModel {
    pub name: String,
    pub hidden: bool,
    pub cells: BTreeMap<(u32, u16), (CellValue, Option<StyleHandle>)>,
    pub row_heights: BTreeMap<u32, f64>,
    pub column_widths: BTreeMap<u16, f64>,
    pub merges: Vec<CellRange>,
    pub validations: Vec<DataConstraint>,
    pub pictures: Vec<Picture>,
}

impl SheetModel {
    pub fn value(&self, row: u32, col: u16) -> Option<&CellValue> {
        self.cells.get(&(row, col)).map(|(v, _)| v)
    }

    pub fn style(&self, row: u32, col: u16) -> Option<StyleHandle> {
        self.cells.get(&(row, col)).and_then(|(_, s)| *s)
    }

    /// Cell text, empty when the cell was never written
    pub fn text(&self, row: u32, col: u16) -> String {
        self.value(row, col).map(ToString::to_string).unwrap_or_default()
    }

    /// Highest row index that holds a cell
    pub fn last_row(&self) -> Option<u32> {
        self.cells.keys().map(|(r, _)| *r).max()
    }
}

/// In-memory document
#[derive(Debug, Default)]
pub struct Workbook {
    styles: Vec<StyleSpec>,
    sheets: Vec<SheetModel>,
    names: Vec<(String, String)>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of style records created so far
    pub fn style_count(&self) -> usize {
        self.styles.len()
    }

    pub fn style_spec(&self, handle: StyleHandle) -> Option<&StyleSpec> {
        self.styles.get(handle.0)
    }

    pub fn sheets(&self) -> &[SheetModel] {
        &self.sheets
    }

    pub fn sheet(&self, name: &str) -> Option<&SheetModel> {
        self.sheets.iter().find(|s| s.name == name)
    }

    /// Visible sheets, in creation order
    pub fn data_sheets(&self) -> impl Iterator<Item = &SheetModel> {
        self.sheets.iter().filter(|s| !s.hidden)
    }

    pub fn named_ranges(&self) -> &[(String, String)] {
        &self.names
    }

    /// Render the `.xlsx` package
    pub fn to_bytes(&self) -> TabulaResult<Vec<u8>> {
        let formats: Vec<Format> = self.styles.iter().map(to_format).collect();
        let mut workbook = rust_xlsxwriter::Workbook::new();

        for model in &self.sheets {
            let worksheet = render_sheet(model, &formats)?;
            workbook.push_worksheet(worksheet);
        }
        for (name, formula) in &self.names {
            workbook
                .define_name(name, &format!("={formula}"))
                .map_err(|e| TabulaError::document("define name", name.clone(), e))?;
        }

        workbook
            .save_to_buffer()
            .map_err(|e| TabulaError::document("save workbook", "", e))
    }

    fn model_mut(&mut self, sheet: SheetId) -> TabulaResult<&mut SheetModel> {
        self.sheets.get_mut(sheet.0).ok_or_else(|| {
            TabulaError::document("lookup sheet", format!("#{}", sheet.0), "unknown sheet id")
        })
    }
}

impl DocumentSink for Workbook {
    fn create_style(&mut self, spec: &StyleSpec) -> TabulaResult<StyleHandle> {
        self.styles.push(spec.clone());
        Ok(StyleHandle(self.styles.len() - 1))
    }

    fn create_sheet(&mut self, name: &str) -> TabulaResult<SheetId> {
        if name.is_empty() || name.chars().count() > MAX_SHEET_NAME {
            return Err(TabulaError::document(
                "create sheet",
                name,
                format!("sheet names must be 1 to {MAX_SHEET_NAME} characters"),
            ));
        }
        if name.contains(INVALID_NAME_CHARS) {
            return Err(TabulaError::document(
                "create sheet",
                name,
                "sheet name contains one of []:*?/\\",
            ));
        }
        if self
            .sheets
            .iter()
            .any(|s| s.name.eq_ignore_ascii_case(name))
        {
            return Err(TabulaError::document("create sheet", name, "duplicate sheet name"));
        }
        self.sheets.push(SheetModel {
            name: name.to_string(),
            ..Default::default()
        });
        Ok(SheetId(self.sheets.len() - 1))
    }

    fn create_row(&mut self, sheet: SheetId, row: u32, height: Option<f64>) -> TabulaResult<()> {
        let model = self.model_mut(sheet)?;
        if let Some(height) = height {
            model.row_heights.insert(row, height);
        }
        Ok(())
    }

    fn set_column_width(&mut self, sheet: SheetId, col: u16, width: f64) -> TabulaResult<()> {
        self.model_mut(sheet)?.column_widths.insert(col, width);
        Ok(())
    }

    fn set_cell(
        &mut self,
        sheet: SheetId,
        row: u32,
        col: u16,
        value: CellValue,
        style: Option<StyleHandle>,
    ) -> TabulaResult<()> {
        self.model_mut(sheet)?.cells.insert((row, col), (value, style));
        Ok(())
    }

    fn add_merged_region(&mut self, sheet: SheetId, range: CellRange) -> TabulaResult<()> {
        let model = self.model_mut(sheet)?;
        if range.is_single_cell() {
            return Ok(());
        }
        let overlaps = model.merges.iter().any(|m| {
            m.first_row <= range.last_row
                && range.first_row <= m.last_row
                && m.first_col <= range.last_col
                && range.first_col <= m.last_col
        });
        if overlaps {
            return Err(TabulaError::document(
                "merge cells",
                model.name.clone(),
                format!("region {range:?} overlaps an existing merge"),
            ));
        }
        model.merges.push(range);
        Ok(())
    }

    fn add_data_validation(
        &mut self,
        sheet: SheetId,
        constraint: DataConstraint,
    ) -> TabulaResult<()> {
        self.model_mut(sheet)?.validations.push(constraint);
        Ok(())
    }

    fn create_named_range(&mut self, name: &str, formula: &str) -> TabulaResult<()> {
        if self.names.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)) {
            return Err(TabulaError::document("define name", name, "duplicate defined name"));
        }
        self.names.push((name.to_string(), formula.to_string()));
        Ok(())
    }

    fn hide_sheet(&mut self, sheet: SheetId) -> TabulaResult<()> {
        self.model_mut(sheet)?.hidden = true;
        Ok(())
    }

    fn embed_picture(
        &mut self,
        sheet: SheetId,
        row: u32,
        col: u16,
        bytes: &[u8],
        kind: ImageKind,
    ) -> TabulaResult<()> {
        let model = self.model_mut(sheet)?;
        if let Err(e) = Image::new_from_buffer(bytes) {
            debug!(sheet = %model.name, row, col, error = %e, "Picture not decodable; cell left empty");
            return Ok(());
        }
        model.pictures.push(Picture {
            row,
            col,
            bytes: bytes.to_vec(),
            kind,
        });
        Ok(())
    }

    fn write(&mut self, out: &mut dyn Write) -> TabulaResult<()> {
        let bytes = self.to_bytes()?;
        out.write_all(&bytes)?;
        out.flush()?;
        debug!(bytes = bytes.len(), sheets = self.sheets.len(), "Workbook written");
        Ok(())
    }
}

/// Lets tests and in-process pipelines import what was just exported
impl DocumentSource for Workbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    fn read_sheet(&mut self, name: &str) -> TabulaResult<SheetData> {
        let model = self
            .sheet(name)
            .ok_or_else(|| TabulaError::document("read sheet", name, "sheet not found"))?;
        let mut data = SheetData::new(name);
        for (&(row, col), (value, _)) in &model.cells {
            data.set(row, col, value.clone());
        }
        for picture in &model.pictures {
            data.add_picture(picture.row, picture.col, picture.bytes.clone());
        }
        Ok(data)
    }
}

//==============================================================================
// Rendering
//==============================================================================

fn render_sheet(model: &SheetModel, formats: &[Format]) -> TabulaResult<Worksheet> {
    let name = model.name.as_str();
    let fail = |phase: &'static str| {
        move |e: rust_xlsxwriter::XlsxError| TabulaError::document(phase, name, e)
    };
    let format_of = |style: Option<StyleHandle>| style.and_then(|h| formats.get(h.0));

    let mut worksheet = Worksheet::new();
    worksheet.set_name(name).map_err(fail("set sheet name"))?;
    if model.hidden {
        worksheet.set_hidden(true);
    }

    for (&row, &height) in &model.row_heights {
        worksheet
            .set_row_height(row, height)
            .map_err(fail("set row height"))?;
    }
    for (&col, &width) in &model.column_widths {
        worksheet
            .set_column_width(col, width)
            .map_err(fail("set column width"))?;
    }

    let default_format = Format::new();
    for range in &model.merges {
        let format = format_of(model.style(range.first_row, range.first_col))
            .unwrap_or(&default_format);
        worksheet
            .merge_range(
                range.first_row,
                range.first_col,
                range.last_row,
                range.last_col,
                "",
                format,
            )
            .map_err(fail("merge cells"))?;
    }

    for (&(row, col), (value, style)) in &model.cells {
        let format = format_of(*style);
        write_cell(&mut worksheet, row, col, value, format).map_err(fail("write cell"))?;
    }

    for constraint in &model.validations {
        let validation = to_validation(constraint).map_err(fail("add validation"))?;
        let r = constraint.range;
        worksheet
            .add_data_validation(r.first_row, r.first_col, r.last_row, r.last_col, &validation)
            .map_err(fail("add validation"))?;
    }

    for picture in &model.pictures {
        let image = Image::new_from_buffer(&picture.bytes).map_err(fail("embed picture"))?;
        worksheet
            .insert_image_fit_to_cell(picture.row, picture.col, &image, false)
            .map_err(fail("embed picture"))?;
    }

    Ok(worksheet)
}

fn write_cell(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: &CellValue,
    format: Option<&Format>,
) -> Result<(), rust_xlsxwriter::XlsxError> {
    let plain = Format::new();
    let format = format.unwrap_or(&plain);
    match value {
        CellValue::Empty => {
            worksheet.write_blank(row, col, format)?;
        }
        CellValue::Text(s) => {
            worksheet.write_string_with_format(row, col, s, format)?;
        }
        CellValue::Number(n) => {
            worksheet.write_number_with_format(row, col, *n, format)?;
        }
        CellValue::Bool(b) => {
            worksheet.write_boolean_with_format(row, col, *b, format)?;
        }
        CellValue::DateTime(dt) => {
            let text = dt.format("%Y-%m-%d %H:%M:%S").to_string();
            worksheet.write_string_with_format(row, col, &text, format)?;
        }
        CellValue::Error(e) => {
            worksheet.write_string_with_format(row, col, e, format)?;
        }
    }
    Ok(())
}

fn to_validation(constraint: &DataConstraint) -> Result<DataValidation, rust_xlsxwriter::XlsxError> {
    let validation = DataValidation::new();
    let mut validation = match &constraint.rule {
        DataRule::List(values) => {
            let refs: Vec<&str> = values.iter().map(String::as_str).collect();
            validation.allow_list_strings(&refs)?
        }
        DataRule::ListFormula(formula) => validation.allow_list_formula(Formula::new(formula)),
        DataRule::Any => validation.allow_any_value(),
    };
    if let Some(prompt) = constraint.prompt.as_deref().filter(|p| !p.is_empty()) {
        validation = validation.set_input_message(prompt)?;
    }
    Ok(validation)
}

fn to_format(spec: &StyleSpec) -> Format {
    let mut format = Format::new()
        .set_font_name(&spec.font_name)
        .set_font_size(spec.font_size);
    if spec.bold {
        format = format.set_bold();
    }
    if let Some(color) = spec.font_color {
        format = format.set_font_color(Color::RGB(color.0));
    }
    if let Some(bg) = spec.background {
        format = format
            .set_background_color(Color::RGB(bg.0))
            .set_pattern(FormatPattern::Solid);
    }
    format = match spec.align {
        Align::General => format,
        Align::Left => format.set_align(FormatAlign::Left),
        Align::Center => format.set_align(FormatAlign::Center),
        Align::Right => format.set_align(FormatAlign::Right),
    };
    if spec.vertical_center {
        format = format.set_align(FormatAlign::VerticalCenter);
    }
    if let Some(border) = spec.border {
        format = format
            .set_border(FormatBorder::Thin)
            .set_border_color(Color::RGB(border.0));
    }
    if let Some(num_format) = &spec.num_format {
        format = format.set_num_format(num_format);
    }
    if spec.wrap {
        format = format.set_text_wrap();
    }
    format
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rgb;

    const PNG_1X1: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48,
        0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00,
        0x00, 0x1F, 0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78,
        0x9C, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00,
        0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
    ];

    #[test]
    fn test_sheet_name_rules() {
        let mut wb = Workbook::new();
        assert!(wb.create_sheet("Users").is_ok());
        assert!(wb.create_sheet("users").is_err());
        assert!(wb.create_sheet("a/b").is_err());
        assert!(wb.create_sheet("").is_err());
        assert!(wb.create_sheet(&"x".repeat(32)).is_err());
    }

    #[test]
    fn test_merge_overlap_rejected_single_cell_ignored() {
        let mut wb = Workbook::new();
        let s = wb.create_sheet("s").unwrap();
        wb.add_merged_region(s, CellRange::new(0, 0, 0, 3)).unwrap();
        wb.add_merged_region(s, CellRange::new(1, 1, 2, 2)).unwrap();
        assert!(wb.add_merged_region(s, CellRange::new(0, 2, 1, 1)).is_err());
        assert_eq!(wb.sheets()[0].merges.len(), 1);
    }

    #[test]
    fn test_duplicate_named_range_rejected() {
        let mut wb = Workbook::new();
        wb.create_named_range("combo_1_1_data", "combo_1_1!$A$1:$A$20").unwrap();
        assert!(wb.create_named_range("COMBO_1_1_DATA", "x!$A$1").is_err());
    }

    #[test]
    fn test_renders_xlsx_package() {
        let mut wb = Workbook::new();
        let style = wb
            .create_style(&StyleSpec {
                bold: true,
                background: Some(Rgb::GREY_50),
                border: Some(Rgb::GREY_50),
                align: Align::Center,
                vertical_center: true,
                num_format: Some("@".into()),
                ..Default::default()
            })
            .unwrap();
        let s = wb.create_sheet("Data").unwrap();
        wb.create_row(s, 0, Some(30.0)).unwrap();
        wb.add_merged_region(s, CellRange::new(0, 0, 0, 2)).unwrap();
        wb.set_cell(s, 0, 0, CellValue::Text("Title".into()), Some(style)).unwrap();
        wb.set_cell(s, 1, 0, CellValue::Number(1.5), None).unwrap();
        wb.set_cell(s, 1, 1, CellValue::Bool(true), None).unwrap();
        wb.add_data_validation(
            s,
            DataConstraint {
                rule: DataRule::List(vec!["a".into(), "b".into()]),
                prompt: Some("pick".into()),
                range: CellRange::new(2, 101, 0, 0),
            },
        )
        .unwrap();
        let hidden = wb.create_sheet("combo_1_1").unwrap();
        wb.set_cell(hidden, 0, 0, CellValue::Text("x".into()), None).unwrap();
        wb.hide_sheet(hidden).unwrap();
        wb.create_named_range("combo_1_1_data", "combo_1_1!$A$1:$A$1").unwrap();

        let mut out = Vec::new();
        wb.write(&mut out).unwrap();
        assert_eq!(&out[..2], b"PK");
    }

    #[test]
    fn test_reads_back_as_source() {
        let mut wb = Workbook::new();
        let s = wb.create_sheet("s").unwrap();
        wb.set_cell(s, 1, 1, CellValue::Text("hi".into()), None).unwrap();
        wb.embed_picture(s, 1, 2, PNG_1X1, ImageKind::Png).unwrap();
        let data = wb.read_sheet("s").unwrap();
        assert_eq!(data.cell(1, 1), &CellValue::Text("hi".into()));
        assert_eq!(data.picture(1, 2), Some(PNG_1X1));
        assert!(wb.read_sheet("missing").is_err());
    }

    #[test]
    fn test_undecodable_picture_dropped() {
        let mut wb = Workbook::new();
        let s = wb.create_sheet("s").unwrap();
        wb.embed_picture(s, 1, 0, &[1, 2, 3, 4, 5], ImageKind::Png).unwrap();
        assert!(wb.sheets()[0].pictures.is_empty());

        let mut out = Vec::new();
        wb.write(&mut out).unwrap();
        assert_eq!(&out[..2], b"PK");
    }
}
