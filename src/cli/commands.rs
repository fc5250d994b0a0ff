use crate::codec::dates;
use crate::config::EngineConfig;
use crate::dict::DictionaryCache;
use crate::document::{column_letter, ImageKind};
use crate::dynamic::{load_records, load_schema, save_records, DynamicRecord};
use crate::error::{TabulaError, TabulaResult};
use crate::excel::{ExcelExporter, ExcelImporter, ImportOptions, ImportPolicy};
use crate::layout::{LayoutPlanner, Source};
use crate::schema::FieldSink;
use crate::style::StyleKey;
use crate::types::FieldValue;
use crate::validation::allowed_values;
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

/// Inputs of `tabula export`
#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    pub schema: PathBuf,
    pub data: PathBuf,
    /// File or directory; the configured download directory when unset
    pub output: Option<PathBuf>,
    pub sheet: Option<String>,
    pub title: Option<String>,
    pub hide: Vec<String>,
    pub verbose: bool,
}

/// Inputs of `tabula import`
#[derive(Debug, Clone, Default)]
pub struct ImportRequest {
    pub schema: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    pub sheet: Option<String>,
    pub header_row: u32,
    pub skip_bad_rows: bool,
    pub verbose: bool,
}

/// Load the engine configuration file, or defaults when none is given
pub fn load_config(path: Option<&Path>) -> TabulaResult<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_yaml_file(path),
        None => Ok(EngineConfig::default()),
    }
}

fn is_workbook_path(path: &Path) -> bool {
    !path.is_dir()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("xlsx"))
}

/// Execute the export command
pub fn export(request: ExportRequest, config: EngineConfig) -> TabulaResult<()> {
    println!("{}", "📤 Tabula - Excel Export".bold().green());
    println!("   Schema: {}", request.schema.display());
    println!("   Data:   {}\n", request.data.display());

    let loaded = load_schema(&request.schema)?;
    let records = load_records(&request.data)?;
    if request.verbose {
        println!(
            "   Loaded schema '{}' ({} columns), {} records\n",
            loaded.schema.name().bright_blue(),
            loaded.schema.width(),
            records.len()
        );
    }

    let sheet = request
        .sheet
        .clone()
        .unwrap_or_else(|| loaded.schema.name().to_string());
    let target = request
        .output
        .clone()
        .unwrap_or_else(|| config.download_dir.clone());

    let exporter = ExcelExporter::new(loaded.schema)
        .with_config(config)
        .with_dictionary(&loaded.dictionaries)
        .hide_columns(&request.hide);
    let title = request.title.as_deref();

    let (path, summary) = if is_workbook_path(&target) {
        let summary = exporter.export_to_file(&records, &sheet, title, &target)?;
        (target, summary)
    } else {
        exporter.export_to_dir(&records, &sheet, title, &target)?
    };

    println!("{}", "✅ Export Complete!".bold().green());
    println!("   Excel file: {}", path.display());
    println!(
        "   {} records on {} sheet(s): {}",
        summary.records,
        summary.sheets.len(),
        summary.sheets.join(", ").cyan()
    );
    if summary.validations > 0 {
        println!("   {} column(s) with dropdowns or prompts", summary.validations);
    }
    println!();
    Ok(())
}

/// Execute the template command
pub fn template(
    schema: PathBuf,
    output: PathBuf,
    sheet: Option<String>,
    title: Option<String>,
    config: EngineConfig,
) -> TabulaResult<()> {
    println!("{}", "📝 Tabula - Import Template".bold().green());
    println!("   Schema: {}\n", schema.display());

    let loaded = load_schema(&schema)?;
    let sheet = sheet.unwrap_or_else(|| loaded.schema.name().to_string());
    let exporter = ExcelExporter::new(loaded.schema)
        .with_config(config)
        .with_dictionary(&loaded.dictionaries);
    let summary = exporter.export_template_to_file(&sheet, title.as_deref(), &output)?;

    println!("{}", "✅ Template written".bold().green());
    println!("   Excel file: {}", output.display());
    println!("   Sheet: {}\n", summary.sheets.join(", ").cyan());
    Ok(())
}

/// Execute the import command
pub fn import(request: ImportRequest, config: EngineConfig) -> TabulaResult<()> {
    println!("{}", "📥 Tabula - Excel Import".bold().green());
    println!("   Schema: {}", request.schema.display());
    println!("   Input:  {}\n", request.input.display());

    let loaded = load_schema(&request.schema)?;
    let importer = ExcelImporter::new(loaded.schema)
        .with_dictionary(&loaded.dictionaries)
        .with_config(config)
        .with_options(ImportOptions {
            sheet_name: request.sheet.clone(),
            header_row: request.header_row,
            policy: if request.skip_bad_rows {
                ImportPolicy::SkipRow
            } else {
                ImportPolicy::Abort
            },
        });

    let mut report = importer.import_file::<DynamicRecord>(&request.input)?;
    let pictures = extract_images(&mut report.records, &request.output)?;
    save_records(&request.output, &report.records)?;

    println!("{}", "✅ Import Complete!".bold().green());
    println!("   Records: {}", report.records.len().to_string().bold());
    println!("   Output:  {}", request.output.display());
    if pictures > 0 {
        println!("   Pictures: {pictures}");
    }
    if !report.errors.is_empty() {
        println!(
            "\n{}",
            format!("⚠️  {} row(s) skipped", report.errors.len()).yellow()
        );
        for error in &report.errors {
            println!(
                "   row {} column '{}': {}",
                error.row.to_string().bold(),
                error.column.cyan(),
                error.message.red()
            );
        }
    } else if request.verbose {
        println!("   No conversion errors");
    }
    println!();
    Ok(())
}

/// Write imported pictures beside the output file and reference them by path
fn extract_images(records: &mut [DynamicRecord], output: &Path) -> TabulaResult<usize> {
    let stem = output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("import");
    let dir = output.with_file_name(format!("{stem}_images"));
    let mut written = 0;

    for (index, record) in records.iter_mut().enumerate() {
        for (field, bytes) in record.take_images() {
            if written == 0 {
                fs::create_dir_all(&dir).map_err(|source| TabulaError::Resource {
                    target: dir.display().to_string(),
                    source,
                })?;
            }
            let name = format!(
                "{}_{}.{}",
                index + 1,
                field.replace('.', "_"),
                ImageKind::sniff(&bytes).extension()
            );
            let path = dir.join(name);
            fs::write(&path, &bytes).map_err(|source| TabulaError::Resource {
                target: path.display().to_string(),
                source,
            })?;
            let text = path.display().to_string();
            record
                .set_field(&field, FieldValue::Text(text))
                .map_err(TabulaError::Schema)?;
            written += 1;
        }
    }
    Ok(written)
}

/// Execute the inspect command
pub fn inspect(schema: PathBuf, config: EngineConfig) -> TabulaResult<()> {
    println!("{}", "🔍 Tabula - Schema".bold().green());
    println!("   File: {}\n", schema.display());

    let loaded = load_schema(&schema)?;
    let planner = LayoutPlanner::new(&loaded.schema, false, config.max_rows_per_sheet)?;
    let policy = config.validation_policy();
    let mut dicts = DictionaryCache::new(&loaded.dictionaries);

    println!(
        "   Schema '{}': {} physical columns",
        loaded.schema.name().bright_blue().bold(),
        planner.width()
    );
    if let Some(sub) = loaded.schema.sub_collection() {
        println!(
            "   Sub-collection '{}' ({}) with {} columns",
            sub.display_name.cyan(),
            sub.field_id,
            sub.columns.len()
        );
    }
    println!();

    for slot in planner.slots() {
        let column = slot.column;
        let origin = match slot.source {
            Source::Parent(_) => "",
            Source::Child(_) => " (sub)",
        };
        let values = allowed_values(column, &mut dicts);
        let strategy = policy.strategy(&values, column.prompt.as_deref());
        println!(
            "   {:>3} {}{}  {}",
            column_letter(slot.index as usize).bold(),
            column.display_name.bright_blue(),
            origin,
            column.path().cyan()
        );
        println!(
            "       type {:?}, kind {:?}, direction {:?}",
            column.field_type, column.cell_kind, column.direction
        );
        println!(
            "       styles {} / {}",
            StyleKey::header(column),
            StyleKey::data(column)
        );
        if let Some(format) = &column.date_format {
            println!("       date format {format} ({})", dates::to_chrono(format));
        }
        if !values.is_empty() || column.has_constraint() {
            println!(
                "       validation {} ({} values)",
                strategy.to_string().yellow(),
                values.len()
            );
        }
    }
    println!();
    Ok(())
}

#[cfg(test)]
#[path = "commands_tests.rs"]
mod tests;
