//! Tabula - schema-driven spreadsheet interchange
//!
//! Converts collections of typed records into `.xlsx` workbooks and back,
//! driven by a per-type column schema.
//!
//! # Features
//!
//! - Column order, headers, styles and widths from the schema
//! - Dictionary and expression coded values (`0` ↔ `Male`)
//! - Nested sub-collections flattened into merged multi-row records
//! - Dropdown constraints, inline or on hidden sheets for long lists
//! - Totals rows for summable columns
//! - Automatic pagination across sheets
//! - Formula-injection neutralization of exported text
//!
//! # Example
//!
//! ```no_run
//! use royalbit_tabula::dynamic::{load_records, load_schema};
//! use royalbit_tabula::excel::ExcelExporter;
//! use std::path::Path;
//!
//! let loaded = load_schema(Path::new("staff.yaml"))?;
//! let records = load_records(Path::new("staff_data.yaml"))?;
//!
//! let summary = ExcelExporter::new(loaded.schema)
//!     .with_dictionary(&loaded.dictionaries)
//!     .export_to_file(&records, "Staff", Some("Staff list"), Path::new("staff.xlsx"))?;
//!
//! println!("Sheets: {}", summary.sheets.join(", "));
//! # Ok::<(), royalbit_tabula::error::TabulaError>(())
//! ```

pub mod cli;
pub mod codec;
pub mod config;
pub mod dict;
pub mod document;
pub mod dynamic;
pub mod error;
pub mod excel;
pub mod layout;
pub mod schema;
pub mod stats;
pub mod style;
pub mod types;
pub mod validation;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{TabulaError, TabulaResult};
pub use excel::{ExcelExporter, ExcelImporter, ImportOptions, ImportPolicy};
pub use schema::{ColumnDescriptor, FieldSink, FieldSource, Schema, SubCollection, Tabular};
pub use types::{CellValue, FieldValue};
