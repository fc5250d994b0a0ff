use clap::{Parser, Subcommand};
use royalbit_tabula::cli::{self, ExportRequest, ImportRequest};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tabula")]
#[command(about = "Schema-driven spreadsheet export and import")]
#[command(long_about = "Tabula - records to .xlsx and back, driven by a column schema

COMMANDS:
  export    - Records (YAML/JSON) to Excel (.xlsx)
  import    - Excel (.xlsx) to records (YAML/JSON)
  template  - Empty import template with headers and dropdowns
  inspect   - Show column order, styles and validation per column

EXAMPLES:
  tabula export staff.yaml people.json out.xlsx --title \"Staff list\"
  tabula export staff.yaml people.yaml ./download --hide salary
  tabula import staff.yaml filled.xlsx people.yaml --header-row 1
  tabula template staff.yaml staff_template.xlsx

Set RUST_LOG=royalbit_tabula=debug for detailed logs.")]
#[command(version)]
struct Cli {
    /// Engine configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export records to an Excel workbook
    Export {
        /// Schema file (YAML)
        schema: PathBuf,

        /// Records file (YAML or JSON list)
        data: PathBuf,

        /// Output .xlsx file, or a directory for a generated file name
        output: Option<PathBuf>,

        /// Directory used when no output is given
        #[arg(long, env = "TABULA_DOWNLOAD_DIR")]
        download_dir: Option<PathBuf>,

        /// Sheet name (defaults to the schema name)
        #[arg(short, long)]
        sheet: Option<String>,

        /// Title row above the header
        #[arg(short, long)]
        title: Option<String>,

        /// Fields to leave out, comma separated
        #[arg(long, value_delimiter = ',')]
        hide: Vec<String>,

        /// Records per sheet before a new sheet is started
        #[arg(long, env = "TABULA_MAX_ROWS")]
        max_rows: Option<usize>,

        /// Show verbose export steps
        #[arg(short, long)]
        verbose: bool,
    },

    /// Import records from an Excel workbook
    Import {
        /// Schema file (YAML)
        schema: PathBuf,

        /// Input .xlsx file
        input: PathBuf,

        /// Output records file (.yaml or .json)
        output: PathBuf,

        /// Sheet to read (defaults to the first sheet)
        #[arg(short, long)]
        sheet: Option<String>,

        /// Zero-based row holding the column labels
        #[arg(long, default_value = "0")]
        header_row: u32,

        /// Skip rows that fail to convert instead of aborting
        #[arg(long)]
        skip_bad_rows: bool,

        /// Show verbose import steps
        #[arg(short, long)]
        verbose: bool,
    },

    /// Write an empty import template
    Template {
        /// Schema file (YAML)
        schema: PathBuf,

        /// Output .xlsx file
        output: PathBuf,

        /// Sheet name (defaults to the schema name)
        #[arg(short, long)]
        sheet: Option<String>,

        /// Title row above the header
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Describe how a schema lays out
    Inspect {
        /// Schema file (YAML)
        schema: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "royalbit_tabula=info,tabula=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = cli::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Export {
            schema,
            data,
            output,
            download_dir,
            sheet,
            title,
            hide,
            max_rows,
            verbose,
        } => {
            if let Some(dir) = download_dir {
                config.download_dir = dir;
            }
            if let Some(max_rows) = max_rows {
                config.max_rows_per_sheet = max_rows;
                config.validate()?;
            }
            cli::export(
                ExportRequest {
                    schema,
                    data,
                    output,
                    sheet,
                    title,
                    hide,
                    verbose,
                },
                config,
            )?;
        }

        Commands::Import {
            schema,
            input,
            output,
            sheet,
            header_row,
            skip_bad_rows,
            verbose,
        } => cli::import(
            ImportRequest {
                schema,
                input,
                output,
                sheet,
                header_row,
                skip_bad_rows,
                verbose,
            },
            config,
        )?,

        Commands::Template {
            schema,
            output,
            sheet,
            title,
        } => cli::template(schema, output, sheet, title, config)?,

        Commands::Inspect { schema } => cli::inspect(schema, config)?,
    }
    Ok(())
}
