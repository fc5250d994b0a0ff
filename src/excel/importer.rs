//! Excel importer implementation - spreadsheet rows back into records

use crate::codec::CellCodec;
use crate::config::EngineConfig;
use crate::dict::{DictionaryCache, DictionaryLookup, NoDictionary};
use crate::document::{DocumentSource, SheetData, XlsxReader};
use crate::error::{TabulaError, TabulaResult};
use crate::schema::{ColumnDescriptor, Direction, FieldSink, Schema, Tabular};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

static NO_DICTIONARY: NoDictionary = NoDictionary;

/// What to do with a row that fails to convert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportPolicy {
    /// Stop at the first bad row
    #[default]
    Abort,
    /// Record the error and keep going
    SkipRow,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Sheet to read; the first sheet when unset
    pub sheet_name: Option<String>,
    /// Zero-based index of the header row
    pub header_row: u32,
    pub policy: ImportPolicy,
}

/// A row skipped under [`ImportPolicy::SkipRow`]
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    /// 1-based, as shown by spreadsheet applications
    pub row: u32,
    pub column: String,
    pub message: String,
}

impl From<RowError> for TabulaError {
    fn from(e: RowError) -> Self {
        TabulaError::conversion(e.row, e.column, e.message)
    }
}

#[derive(Debug)]
pub struct ImportReport<R> {
    pub records: Vec<R>,
    pub errors: Vec<RowError>,
}

/// Reads records of one schema out of a spreadsheet
pub struct ExcelImporter<'d> {
    schema: Arc<Schema>,
    options: ImportOptions,
    config: EngineConfig,
    dictionary: &'d dyn DictionaryLookup,
}

impl ExcelImporter<'static> {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            options: ImportOptions::default(),
            config: EngineConfig::default(),
            dictionary: &NO_DICTIONARY,
        }
    }

    pub fn for_type<T: Tabular>() -> TabulaResult<Self> {
        Ok(Self::new(T::schema()?))
    }
}

impl<'d> ExcelImporter<'d> {
    pub fn with_dictionary<'e>(self, dictionary: &'e dyn DictionaryLookup) -> ExcelImporter<'e> {
        ExcelImporter {
            schema: self.schema,
            options: self.options,
            config: self.config,
            dictionary,
        }
    }

    /// Engine settings; the totals label decides which trailing row is skipped
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: ImportOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn hide_columns<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.schema = Arc::new(self.schema.hide_columns(names));
        self
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Import from an open document
    pub fn import<R: FieldSink + Default>(
        &self,
        source: &mut dyn DocumentSource,
    ) -> TabulaResult<ImportReport<R>> {
        let sheet_name = match &self.options.sheet_name {
            Some(name) => name.clone(),
            None => source
                .sheet_names()
                .into_iter()
                .next()
                .ok_or_else(|| TabulaError::document("read sheet", "", "workbook has no sheets"))?,
        };
        let sheet = source.read_sheet(&sheet_name)?;
        self.parse(&sheet)
    }

    pub fn import_bytes<R: FieldSink + Default>(&self, bytes: Vec<u8>) -> TabulaResult<ImportReport<R>> {
        let mut reader = XlsxReader::from_bytes(bytes)?;
        self.import(&mut reader)
    }

    pub fn import_from<R: FieldSink + Default>(&self, input: impl Read) -> TabulaResult<ImportReport<R>> {
        let mut reader = XlsxReader::from_reader(input)?;
        self.import(&mut reader)
    }

    pub fn import_file<R: FieldSink + Default>(&self, path: &Path) -> TabulaResult<ImportReport<R>> {
        let mut reader = XlsxReader::open(path)?;
        self.import(&mut reader)
    }

    /// Map one materialized sheet to records
    pub fn parse<R: FieldSink + Default>(&self, sheet: &SheetData) -> TabulaResult<ImportReport<R>> {
        let header_row = self.options.header_row;
        let mut report = ImportReport {
            records: Vec::new(),
            errors: Vec::new(),
        };
        let Some(last_row) = sheet.last_row().filter(|last| *last > header_row) else {
            debug!(sheet = %sheet.name, header_row, "No data rows below the header");
            return Ok(report);
        };

        let schema = self.schema.view(Direction::Import);
        let bindings = bind_header(sheet, header_row, &schema);
        if bindings.is_empty() {
            warn!(sheet = %sheet.name, header_row, "No header label matches a schema column");
        }

        let mut codec = CellCodec::new(DictionaryCache::new(self.dictionary));
        let nested = schema.sub_collection().is_some();
        let mut skipped_blank = 0usize;

        let last_row = if self.is_totals_row(sheet, last_row) {
            debug!(sheet = %sheet.name, row = last_row + 1, "Totals row skipped");
            last_row - 1
        } else {
            last_row
        };

        for row in header_row + 1..=last_row {
            if is_blank_row(sheet, row) {
                skipped_blank += 1;
                continue;
            }
            // extra rows of a multi-row record carry only sub-collection cells
            if nested && is_continuation_row(sheet, row, &bindings) {
                continue;
            }
            match read_record::<R>(&mut codec, sheet, row, &bindings) {
                Ok(record) => report.records.push(record),
                Err(e) => match self.options.policy {
                    ImportPolicy::Abort => return Err(e.into()),
                    ImportPolicy::SkipRow => {
                        debug!(row = e.row, column = %e.column, error = %e.message, "Row skipped");
                        report.errors.push(e);
                    }
                },
            }
        }

        info!(
            sheet = %sheet.name,
            records = report.records.len(),
            errors = report.errors.len(),
            blank = skipped_blank,
            "Import complete"
        );
        Ok(report)
    }
}

impl ExcelImporter<'_> {
    /// The trailing row an export writes below summable columns
    fn is_totals_row(&self, sheet: &SheetData, row: u32) -> bool {
        let summable = self.schema.columns().iter().any(|c| c.statistics)
            || self
                .schema
                .sub_collection()
                .is_some_and(|s| s.columns.iter().any(|c| c.statistics));
        summable
            && sheet
                .cell(row, 0)
                .as_text()
                .is_some_and(|t| t.trim() == self.config.totals_label)
    }
}

/// Schema columns found in the header row, keyed by physical column.
/// A blank header cell under a vertical merge takes the label above it.
fn bind_header<'s>(
    sheet: &SheetData,
    header_row: u32,
    schema: &'s Schema,
) -> Vec<(u16, &'s ColumnDescriptor)> {
    let by_label: HashMap<&str, &ColumnDescriptor> = schema
        .columns()
        .iter()
        .map(|c| (c.display_name.as_str(), c))
        .collect();

    let mut seen = HashMap::new();
    let mut bindings = Vec::new();
    for (col, cell) in sheet.row(header_row).iter().enumerate() {
        let col = col as u16;
        let label = match cell.as_text().map(str::trim).filter(|t| !t.is_empty()) {
            Some(label) => label.to_string(),
            None if header_row > 0 => match sheet.cell(header_row - 1, col).as_text() {
                Some(above) => above.trim().to_string(),
                None => continue,
            },
            None => continue,
        };
        let Some(column) = by_label.get(label.as_str()) else {
            debug!(column = col, label = %label, "Header label not in schema");
            continue;
        };
        // first occurrence wins
        if seen.insert(label, col).is_none() {
            bindings.push((col, *column));
        }
    }
    bindings
}

fn is_blank_row(sheet: &SheetData, row: u32) -> bool {
    sheet.row(row).iter().all(|c| c.is_blank()) && !sheet.row_has_picture(row)
}

fn is_continuation_row(sheet: &SheetData, row: u32, bindings: &[(u16, &ColumnDescriptor)]) -> bool {
    bindings
        .iter()
        .all(|(col, _)| sheet.cell(row, *col).is_blank() && sheet.picture(row, *col).is_none())
}

fn read_record<R: FieldSink + Default>(
    codec: &mut CellCodec<'_>,
    sheet: &SheetData,
    row: u32,
    bindings: &[(u16, &ColumnDescriptor)],
) -> Result<R, RowError> {
    let mut record = R::default();
    for (col, column) in bindings {
        let fail = |message: String| RowError {
            row: row + 1,
            column: column.display_name.clone(),
            message,
        };
        let value = codec
            .decode(sheet.cell(row, *col), sheet.picture(row, *col), column)
            .map_err(fail)?;
        if value.is_null() {
            continue;
        }
        record.set_field(&column.path(), value).map_err(fail)?;
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSource;
    use crate::types::{CellValue, FieldType, FieldValue};
    use pretty_assertions::assert_eq;

    #[derive(Debug, Default, PartialEq)]
    struct Person {
        name: String,
        age: Option<i32>,
    }

    impl FieldSource for Person {
        fn field(&self, path: &str) -> FieldValue {
            match path {
                "name" => self.name.as_str().into(),
                "age" => self.age.into(),
                _ => FieldValue::Null,
            }
        }
    }

    impl FieldSink for Person {
        fn set_field(&mut self, path: &str, value: FieldValue) -> Result<(), String> {
            match (path, value) {
                ("name", v) => self.name = v.to_text(),
                ("age", FieldValue::Int(v)) => self.age = Some(v),
                (p, v) => return Err(format!("cannot assign {v:?} to {p}")),
            }
            Ok(())
        }
    }

    fn importer(policy: ImportPolicy) -> ExcelImporter<'static> {
        let schema = Schema::builder("person")
            .column(ColumnDescriptor::new("name", "Name"))
            .column(ColumnDescriptor::new("age", "Age").field_type(FieldType::Int))
            .build()
            .unwrap();
        ExcelImporter::new(Arc::new(schema)).with_options(ImportOptions {
            policy,
            ..Default::default()
        })
    }

    fn sheet(rows: &[&[CellValue]]) -> SheetData {
        let mut data = SheetData::new("People");
        for (r, cells) in rows.iter().enumerate() {
            for (c, cell) in cells.iter().enumerate() {
                data.set(r as u32, c as u16, cell.clone());
            }
        }
        data
    }

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    #[test]
    fn test_header_order_and_unknown_columns() {
        let data = sheet(&[
            &[text("Age"), text("Notes"), text("Name")],
            &[CellValue::Number(41.0), text("x"), text("Ann")],
        ]);
        let report: ImportReport<Person> = importer(ImportPolicy::Abort).parse(&data).unwrap();
        assert_eq!(
            report.records,
            vec![Person {
                name: "Ann".into(),
                age: Some(41)
            }]
        );
    }

    #[test]
    fn test_blank_rows_skipped() {
        let data = sheet(&[
            &[text("Name"), text("Age")],
            &[text("Ann"), CellValue::Number(1.0)],
            &[CellValue::Empty, text("  ")],
            &[text("Bob"), CellValue::Empty],
        ]);
        let report: ImportReport<Person> = importer(ImportPolicy::Abort).parse(&data).unwrap();
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[1].age, None);
    }

    #[test]
    fn test_abort_reports_spreadsheet_row() {
        let data = sheet(&[
            &[text("Name"), text("Age")],
            &[text("Ann"), text("forty")],
        ]);
        let err = importer(ImportPolicy::Abort)
            .parse::<Person>(&data)
            .unwrap_err();
        assert_eq!(err.row(), Some(2));
        assert!(err.to_string().contains("'Age'"));
    }

    #[test]
    fn test_skip_row_collects_errors() {
        let data = sheet(&[
            &[text("Name"), text("Age")],
            &[text("Ann"), text("forty")],
            &[text("Bob"), CellValue::Number(30.0)],
        ]);
        let report: ImportReport<Person> = importer(ImportPolicy::SkipRow).parse(&data).unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].row, 2);
        assert_eq!(report.errors[0].column, "Age");
    }

    #[test]
    fn test_header_only_sheet_is_empty() {
        let data = sheet(&[&[text("Name"), text("Age")]]);
        let report: ImportReport<Person> = importer(ImportPolicy::Abort).parse(&data).unwrap();
        assert!(report.records.is_empty());
    }

    fn summing_importer() -> ExcelImporter<'static> {
        let schema = Schema::builder("person")
            .column(ColumnDescriptor::new("name", "Name"))
            .column(
                ColumnDescriptor::new("age", "Age")
                    .field_type(FieldType::Int)
                    .statistics(),
            )
            .build()
            .unwrap();
        ExcelImporter::new(Arc::new(schema))
    }

    #[test]
    fn test_trailing_totals_row_skipped() {
        let data = sheet(&[
            &[text("Name"), text("Age")],
            &[text("Ann"), CellValue::Number(40.0)],
            &[text("Bob"), CellValue::Number(30.0)],
            &[text("Total"), CellValue::Number(70.0)],
        ]);
        let report: ImportReport<Person> = summing_importer().parse(&data).unwrap();
        let names: Vec<_> = report.records.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Ann", "Bob"]);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_totals_label_follows_config() {
        let data = sheet(&[
            &[text("Name"), text("Age")],
            &[text("Ann"), CellValue::Number(40.0)],
            &[text("Sum"), CellValue::Number(40.0)],
        ]);
        let report: ImportReport<Person> = summing_importer().parse(&data).unwrap();
        assert_eq!(report.records.len(), 2);

        let config = EngineConfig {
            totals_label: "Sum".into(),
            ..Default::default()
        };
        let report: ImportReport<Person> = summing_importer()
            .with_config(config)
            .parse(&data)
            .unwrap();
        assert_eq!(report.records.len(), 1);
    }

    #[test]
    fn test_totals_label_kept_without_statistics() {
        let data = sheet(&[
            &[text("Name"), text("Age")],
            &[text("Ann"), CellValue::Number(40.0)],
            &[text("Total"), CellValue::Number(40.0)],
        ]);
        let report: ImportReport<Person> = importer(ImportPolicy::Abort).parse(&data).unwrap();
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[1].name, "Total");
    }

    #[test]
    fn test_merged_header_uses_label_above() {
        let data = sheet(&[
            &[text("Name"), text("Items")],
            &[CellValue::Empty, text("SKU")],
            &[text("Ann"), text("A-1")],
        ]);
        let report: ImportReport<Person> = importer(ImportPolicy::Abort)
            .with_options(ImportOptions {
                header_row: 1,
                ..Default::default()
            })
            .parse(&data)
            .unwrap();
        assert_eq!(report.records[0].name, "Ann");
    }
}
