//! Excel exporter implementation

use crate::codec::{CellCodec, Encoded};
use crate::config::EngineConfig;
use crate::dict::{DictionaryCache, DictionaryLookup, NoDictionary};
use crate::document::{DocumentSink, SheetId, Workbook};
use crate::error::{TabulaError, TabulaResult};
use crate::layout::{ColumnSlot, LayoutPlanner, LayoutState, Source};
use crate::schema::{Direction, FieldSource, Schema, Tabular};
use crate::stats::Statistics;
use crate::style::{StyleCatalog, StyleKey};
use crate::types::{CellValue, FieldValue};
use crate::validation::{allowed_values, Strategy, ValidationBuilder};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

static NO_DICTIONARY: NoDictionary = NoDictionary;

/// Column widths carry a small padding on top of the declared character count
const WIDTH_PADDING: f64 = 0.72;

/// What one export produced
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    /// Data sheets in order; hidden dropdown sheets are not listed
    pub sheets: Vec<String>,
    pub records: usize,
    pub validations: usize,
}

/// Writes records of one schema into a spreadsheet document
pub struct ExcelExporter<'d> {
    schema: Arc<Schema>,
    config: EngineConfig,
    dictionary: &'d dyn DictionaryLookup,
}

impl ExcelExporter<'static> {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            config: EngineConfig::default(),
            dictionary: &NO_DICTIONARY,
        }
    }

    /// Exporter for a record type with a static schema
    pub fn for_type<T: Tabular>() -> TabulaResult<Self> {
        Ok(Self::new(T::schema()?))
    }
}

impl<'d> ExcelExporter<'d> {
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_dictionary<'e>(self, dictionary: &'e dyn DictionaryLookup) -> ExcelExporter<'e> {
        ExcelExporter {
            schema: self.schema,
            config: self.config,
            dictionary,
        }
    }

    /// Leave the named fields out of every following export
    #[must_use]
    pub fn hide_columns<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.schema = Arc::new(self.schema.hide_columns(names));
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Export records into `doc`. The document is not written out.
    pub fn export<R: FieldSource>(
        &self,
        records: &[R],
        sheet_name: &str,
        title: Option<&str>,
        doc: &mut dyn DocumentSink,
    ) -> TabulaResult<ExportSummary> {
        let rows: Vec<&dyn FieldSource> = records.iter().map(|r| r as &dyn FieldSource).collect();
        let schema = self.schema.view(Direction::Export);
        self.render(&schema, &rows, sheet_name, title, doc)
    }

    /// Empty sheet with headers and dropdowns for the import-side columns
    pub fn export_template(
        &self,
        sheet_name: &str,
        title: Option<&str>,
        doc: &mut dyn DocumentSink,
    ) -> TabulaResult<ExportSummary> {
        let schema = self.schema.view(Direction::Import);
        self.render(&schema, &[], sheet_name, title, doc)
    }

    /// Export to a byte stream. Any failure surfaces as `ExportFailed`.
    pub fn export_to_writer<R: FieldSource>(
        &self,
        records: &[R],
        sheet_name: &str,
        title: Option<&str>,
        out: &mut dyn Write,
    ) -> TabulaResult<ExportSummary> {
        let mut workbook = Workbook::new();
        let result = self
            .export(records, sheet_name, title, &mut workbook)
            .and_then(|summary| {
                write_document(&mut workbook, out, "<stream>")?;
                Ok(summary)
            });
        result.map_err(|e| {
            error!(sheet = sheet_name, error = %e, "Export failed");
            TabulaError::ExportFailed(Box::new(e))
        })
    }

    /// Import template written to `path`
    pub fn export_template_to_file(
        &self,
        sheet_name: &str,
        title: Option<&str>,
        path: &Path,
    ) -> TabulaResult<ExportSummary> {
        let mut workbook = Workbook::new();
        let summary = self
            .export_template(sheet_name, title, &mut workbook)
            .map_err(|e| TabulaError::ExportFailed(Box::new(e)))?;
        save(&mut workbook, path)?;
        Ok(summary)
    }

    /// Export into `dir` as `<uuid>_<sheet>.xlsx`, returning the file path
    pub fn export_to_dir<R: FieldSource>(
        &self,
        records: &[R],
        sheet_name: &str,
        title: Option<&str>,
        dir: &Path,
    ) -> TabulaResult<(PathBuf, ExportSummary)> {
        let path = dir.join(file_name(sheet_name));
        let summary = self.export_to_file(records, sheet_name, title, &path)?;
        Ok((path, summary))
    }

    /// Export to an explicit file path
    pub fn export_to_file<R: FieldSource>(
        &self,
        records: &[R],
        sheet_name: &str,
        title: Option<&str>,
        path: &Path,
    ) -> TabulaResult<ExportSummary> {
        let mut workbook = Workbook::new();
        let summary = self
            .export(records, sheet_name, title, &mut workbook)
            .map_err(|e| TabulaError::ExportFailed(Box::new(e)))?;
        save(&mut workbook, path)?;
        Ok(summary)
    }

    //==========================================================================
    // Rendering
    //==========================================================================

    fn render(
        &self,
        schema: &Schema,
        records: &[&dyn FieldSource],
        sheet_name: &str,
        title: Option<&str>,
        doc: &mut dyn DocumentSink,
    ) -> TabulaResult<ExportSummary> {
        let title = title.filter(|t| !t.trim().is_empty());
        let planner = LayoutPlanner::new(schema, title.is_some(), self.config.max_rows_per_sheet)?;

        let mut styles = StyleCatalog::new(doc, self.config.style_theme())?;
        styles.register_columns(doc, planner.slots().iter().map(|s| s.column))?;

        let mut ctx = SheetWriter {
            planner: &planner,
            schema,
            styles,
            codec: CellCodec::new(DictionaryCache::new(self.dictionary)),
            validations: ValidationBuilder::new(self.config.validation_policy()),
            stats: Statistics::new(),
            config: &self.config,
            constraints: 0,
        };

        let chunks = planner.chunks(records.len());
        let mut sheets = Vec::with_capacity(chunks.len());
        let mut state = LayoutState::start();

        for (index, chunk) in chunks.iter().enumerate() {
            let name = LayoutPlanner::sheet_name(sheet_name, index);
            let sheet = doc.create_sheet(&name)?;
            debug!(sheet = %name, records = chunk.len(), "Writing sheet");

            state = ctx.write_heading(doc, sheet, state, title)?;
            ctx.write_columns(doc, sheet, state.row, chunk.len())?;
            for record in &records[chunk.clone()] {
                state = ctx.write_record(doc, sheet, state, *record)?;
            }
            state = ctx.write_totals(doc, sheet, state)?;
            state = planner.end_sheet(state)?;
            state = planner.next_sheet(state, index + 1 < chunks.len())?;
            sheets.push(name);
        }

        info!(
            sheets = sheets.len(),
            records = records.len(),
            styles = ctx.styles.len(),
            "Export complete"
        );
        Ok(ExportSummary {
            sheets,
            records: records.len(),
            validations: ctx.constraints,
        })
    }
}

/// `<uuid>_<sheet>.xlsx`
pub fn file_name(sheet_name: &str) -> String {
    format!("{}_{}.xlsx", uuid::Uuid::new_v4(), sheet_name)
}

fn write_document(doc: &mut Workbook, out: &mut dyn Write, target: &str) -> TabulaResult<()> {
    doc.write(out).map_err(|e| match e {
        TabulaError::Io(source) => TabulaError::Resource {
            target: target.to_string(),
            source,
        },
        other => other,
    })
}

/// Write the document to `path`. The handle is released on every path and a
/// partial file is removed on failure.
fn save(doc: &mut Workbook, path: &Path) -> TabulaResult<()> {
    let target = path.display().to_string();
    let result = (|| {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| TabulaError::Resource {
                target: parent.display().to_string(),
                source,
            })?;
        }
        let mut file = File::create(path).map_err(|source| TabulaError::Resource {
            target: target.clone(),
            source,
        })?;
        write_document(doc, &mut file, &target)
    })();

    result.map_err(|e| {
        error!(path = %target, error = %e, "Failed to write export");
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
        TabulaError::ExportFailed(Box::new(e))
    })?;
    info!(path = %target, "Export written");
    Ok(())
}

/// Per-export state shared by every sheet
struct SheetWriter<'a, 's> {
    planner: &'a LayoutPlanner<'s>,
    schema: &'a Schema,
    styles: StyleCatalog,
    codec: CellCodec<'a>,
    validations: ValidationBuilder,
    stats: Statistics,
    config: &'a EngineConfig,
    constraints: usize,
}

impl SheetWriter<'_, '_> {
    fn header_style(
        &mut self,
        doc: &mut dyn DocumentSink,
        slot: &ColumnSlot<'_>,
    ) -> TabulaResult<crate::document::StyleHandle> {
        self.styles.resolve(doc, StyleKey::header(slot.column))
    }

    fn write_heading(
        &mut self,
        doc: &mut dyn DocumentSink,
        sheet: SheetId,
        mut state: LayoutState,
        title: Option<&str>,
    ) -> TabulaResult<LayoutState> {
        let planner = self.planner;
        let schema = self.schema;

        if let Some(title) = title {
            let (next, placement) = planner.emit_title(state)?;
            let style = self.styles.resolve(doc, StyleKey::Title)?;
            doc.create_row(sheet, placement.row, Some(self.config.title_row_height))?;
            doc.set_cell(sheet, placement.row, 0, CellValue::Text(title.to_string()), Some(style))?;
            if let Some(merge) = placement.merge {
                doc.add_merged_region(sheet, merge)?;
            }
            state = next;
        }

        if let Some(sub) = schema.sub_collection() {
            let (next, placement) = planner.emit_sub_header(state)?;
            doc.create_row(sheet, placement.row, None)?;
            let sub_style = self.styles.resolve(
                doc,
                StyleKey::Header {
                    color: sub.header_color,
                    background: sub.header_background,
                },
            )?;
            for slot in planner.slots() {
                let (value, style) = match slot.source {
                    Source::Parent(_) => (
                        CellValue::Text(slot.column.display_name.clone()),
                        self.header_style(doc, slot)?,
                    ),
                    Source::Child(_) if slot.index == placement.label_col => {
                        (CellValue::Text(sub.display_name.clone()), sub_style)
                    }
                    Source::Child(_) => (CellValue::Empty, sub_style),
                };
                doc.set_cell(sheet, placement.row, slot.index, value, Some(style))?;
            }
            if let Some(merge) = placement.merge {
                doc.add_merged_region(sheet, merge)?;
            }
            state = next;
        }

        let (next, placement) = planner.emit_header(state)?;
        doc.create_row(sheet, placement.row, None)?;
        for slot in planner.slots() {
            let merged_up = placement.merges.iter().any(|m| m.first_col == slot.index);
            let value = if merged_up {
                CellValue::Empty
            } else {
                CellValue::Text(slot.column.display_name.clone())
            };
            let style = self.header_style(doc, slot)?;
            doc.set_cell(sheet, placement.row, slot.index, value, Some(style))?;
        }
        for merge in placement.merges {
            doc.add_merged_region(sheet, merge)?;
        }
        Ok(next)
    }

    /// Column widths and dropdown constraints for the data area
    fn write_columns(
        &mut self,
        doc: &mut dyn DocumentSink,
        sheet: SheetId,
        first_data_row: u32,
        records: usize,
    ) -> TabulaResult<()> {
        let span = (self.config.validation_rows as usize).max(records).max(1) as u32;
        let rows = (first_data_row, first_data_row + span - 1);

        let planner = self.planner;
        for slot in planner.slots() {
            let column = slot.column;
            doc.set_column_width(sheet, slot.index, column.width + WIDTH_PADDING)?;
            if !column.has_constraint() {
                continue;
            }
            let values = allowed_values(column, self.codec.dictionaries());
            let strategy = self.validations.apply(
                doc,
                sheet,
                slot.index,
                &values,
                column.prompt.as_deref(),
                rows,
            )?;
            if strategy != Strategy::None {
                self.constraints += 1;
            }
        }
        Ok(())
    }

    fn write_record(
        &mut self,
        doc: &mut dyn DocumentSink,
        sheet: SheetId,
        state: LayoutState,
        record: &dyn FieldSource,
    ) -> TabulaResult<LayoutState> {
        let planner = self.planner;
        let children = match self.schema.sub_collection() {
            Some(sub) => record.sub_records(&sub.field_id),
            None => Vec::new(),
        };
        let (next, placement) = planner.emit_record(state, children.len())?;

        for row in placement.rows() {
            doc.create_row(sheet, row, Some(planner.row_height()))?;
        }
        for merge in &placement.merges {
            doc.add_merged_region(sheet, *merge)?;
        }

        for slot in planner.slots() {
            let path = slot.column.path();
            match slot.source {
                Source::Parent(_) => {
                    let value = record.field(&path);
                    self.write_value(doc, sheet, placement.first_row, slot, &value)?;
                    let merged = placement.merges.iter().any(|m| m.first_col == slot.index);
                    if !merged {
                        // parent values appear once; continuation rows only carry the fill
                        let style = self.styles.resolve(doc, StyleKey::data(slot.column))?;
                        for row in placement.first_row + 1..=placement.last_row {
                            doc.set_cell(sheet, row, slot.index, CellValue::Empty, Some(style))?;
                        }
                    }
                }
                Source::Child(_) if children.is_empty() => {
                    self.write_value(doc, sheet, placement.first_row, slot, &FieldValue::Null)?;
                }
                Source::Child(_) => {
                    for (offset, child) in children.iter().enumerate() {
                        let value = child.field(&path);
                        let row = placement.first_row + offset as u32;
                        self.write_value(doc, sheet, row, slot, &value)?;
                    }
                }
            }
        }
        Ok(next)
    }

    fn write_value(
        &mut self,
        doc: &mut dyn DocumentSink,
        sheet: SheetId,
        row: u32,
        slot: &ColumnSlot<'_>,
        value: &FieldValue,
    ) -> TabulaResult<()> {
        let column = slot.column;
        let style = self.styles.resolve(doc, StyleKey::data(column))?;
        if column.statistics && !value.is_null() {
            self.stats.add(slot.index, &value.to_text());
        }
        match self.codec.encode(value, column) {
            Encoded::Cell(cell) => doc.set_cell(sheet, row, slot.index, cell, Some(style)),
            Encoded::Picture(bytes, kind) => {
                doc.set_cell(sheet, row, slot.index, CellValue::Empty, Some(style))?;
                doc.embed_picture(sheet, row, slot.index, &bytes, kind)
            }
        }
    }

    fn write_totals(
        &mut self,
        doc: &mut dyn DocumentSink,
        sheet: SheetId,
        state: LayoutState,
    ) -> TabulaResult<LayoutState> {
        if self.stats.is_empty() {
            return Ok(state);
        }
        let (next, row) = self.planner.emit_totals(state)?;
        let style = self.styles.resolve(doc, StyleKey::Total)?;
        doc.create_row(sheet, row, None)?;
        doc.set_cell(
            sheet,
            row,
            0,
            CellValue::Text(self.config.totals_label.clone()),
            Some(style),
        )?;
        for (col, total) in self.stats.flush() {
            doc.set_cell(sheet, row, col, CellValue::Number(total), Some(style))?;
        }
        Ok(next)
    }
}
