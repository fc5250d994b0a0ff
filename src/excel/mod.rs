//! Caller-facing export and import
//!
//! - Export: records → workbook (.xlsx), paginated across sheets
//! - Import: workbook (.xlsx) → records, bound by header labels

mod exporter;
mod importer;

pub use exporter::{file_name, ExcelExporter, ExportSummary};
pub use importer::{ExcelImporter, ImportOptions, ImportPolicy, ImportReport, RowError};
