use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use locsync_lib::arbiter::ResolutionChoice;
use locsync_lib::commands::apply::{apply_files, ApplyFilesArgs};
use locsync_lib::commands::duplicates::{
    list_pending_duplicates, resolve_duplicates, ListDuplicatesArgs, ResolveDuplicatesArgs,
};
use locsync_lib::commands::source::{
    analyze_special_column, load_source, prepare_source, AnalyzeSpecialColumnArgs, LoadSourceArgs,
    PrepareSourceArgs,
};
use locsync_lib::commands::{EngineState, SharedProgress};
use locsync_lib::{
    init_tracing, ApplyOptions, CancelToken, CommandError, CommandResult, Engine, EngineConfig, SourceRef,
    SpecialFilter,
};

#[derive(Parser)]
#[command(name = "locsync")]
#[command(about = "Apply translations from a translation store onto working spreadsheets")]
#[command(version)]
struct Cli {
    /// Directory for derived caches (defaults to LOCSYNC_CACHE_DIR or the temp dir)
    #[arg(long, global = true, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct SourceArgs {
    /// Master workbook (repeatable)
    #[arg(long = "workbook", value_name = "XLSX", required_unless_present = "db", conflicts_with = "db")]
    workbooks: Vec<PathBuf>,

    /// Translation database with a translation_data table
    #[arg(long, value_name = "SQLITE")]
    db: Option<PathBuf>,

    /// Only load records from these sheets
    #[arg(long = "sheet", value_name = "NAME")]
    sheets: Vec<String>,
}

impl SourceArgs {
    fn source_ref(&self) -> SourceRef {
        match &self.db {
            Some(db) => SourceRef::Database(db.clone()),
            None => SourceRef::Workbooks(self.workbooks.clone()),
        }
    }

    fn load_args(&self, special_filter: Option<SpecialFilter>) -> LoadSourceArgs {
        LoadSourceArgs {
            source: self.source_ref(),
            sheets: (!self.sheets.is_empty()).then(|| self.sheets.clone()),
            special_filter,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the source and list its sheets, rebuilding derived caches when stale
    Prepare {
        #[command(flatten)]
        source: SourceArgs,

        /// Rebuild derived caches even when fresh
        #[arg(long)]
        force: bool,
    },

    /// Report value distribution of a special column
    Analyze {
        #[command(flatten)]
        source: SourceArgs,

        /// Special column name (e.g. "#번역요청")
        #[arg(long)]
        column: String,
    },

    /// List string ids awaiting duplicate arbitration
    Duplicates {
        #[command(flatten)]
        source: SourceArgs,

        /// Extra columns to show per candidate
        #[arg(long = "surface", value_name = "COLUMN")]
        surface_columns: Vec<String>,
    },

    /// Apply translations onto working workbooks, in the given order
    Apply {
        #[command(flatten)]
        source: SourceArgs,

        /// JSON file with apply options (camelCase keys)
        #[arg(long, value_name = "JSON")]
        options: Option<PathBuf>,

        /// JSON file mapping string id -> {"candidate": n} | {"record": {...}}
        #[arg(long, value_name = "JSON")]
        resolutions: Option<PathBuf>,

        /// Special column to build the filtered cache from
        #[arg(long, requires = "filter_value")]
        filter_column: Option<String>,

        /// Value the special column must contain
        #[arg(long, requires = "filter_column")]
        filter_value: Option<String>,

        /// Working workbooks
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> CommandResult<T> {
    let text = std::fs::read_to_string(path).map_err(|e| CommandError {
        code: "IO_ERROR".to_string(),
        message: format!("Failed to read {}: {}", path.display(), e),
        details: None,
    })?;
    serde_json::from_str(&text).map_err(|e| CommandError {
        code: "SERIALIZATION_ERROR".to_string(),
        message: format!("Failed to parse {}: {}", path.display(), e),
        details: Some(path.display().to_string()),
    })
}

fn print_json<T: Serialize>(value: &T) -> CommandResult<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| CommandError {
        code: "SERIALIZATION_ERROR".to_string(),
        message: e.to_string(),
        details: None,
    })?;
    println!("{}", text);
    Ok(())
}

async fn run(cli: Cli, state: EngineState, progress: SharedProgress, cancel: CancelToken) -> CommandResult<()> {
    match cli.command {
        Commands::Prepare { source, force } => {
            let sheets = prepare_source(
                PrepareSourceArgs {
                    source: source.source_ref(),
                    force_rebuild: force,
                },
                &state,
                progress,
                cancel,
            )
            .await?;
            print_json(&sheets)
        }
        Commands::Analyze { source, column } => {
            load_source(source.load_args(None), &state, progress, cancel).await?;
            let report = analyze_special_column(AnalyzeSpecialColumnArgs { column }, &state).await?;
            print_json(&report)
        }
        Commands::Duplicates {
            source,
            surface_columns,
        } => {
            load_source(source.load_args(None), &state, progress, cancel).await?;
            let pending = list_pending_duplicates(ListDuplicatesArgs { surface_columns }, &state).await?;
            print_json(&pending)
        }
        Commands::Apply {
            source,
            options,
            resolutions,
            filter_column,
            filter_value,
            files,
        } => {
            let options: ApplyOptions = match &options {
                Some(path) => read_json(path)?,
                None => ApplyOptions::default(),
            };
            let special_filter = match (filter_column, filter_value) {
                (Some(column), Some(value)) => Some(SpecialFilter { column, value }),
                _ => None,
            };

            let stats = load_source(source.load_args(special_filter), &state, Arc::clone(&progress), cancel.clone())
                .await?;
            tracing::info!(records = stats.records_read, conflicts = stats.conflicting_ids, "Source loaded");

            if let Some(path) = &resolutions {
                let resolutions: HashMap<String, ResolutionChoice> = read_json(path)?;
                let resolved = resolve_duplicates(ResolveDuplicatesArgs { resolutions }, &state).await?;
                tracing::info!(resolved = resolved.resolved, remaining = resolved.remaining, "Duplicates resolved");
            }

            let report = apply_files(ApplyFilesArgs { files, options }, &state, progress, cancel).await?;
            print_json(&report)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.cache_dir {
        Some(dir) => EngineConfig::new(dir.clone()),
        None => EngineConfig::from_env(),
    };
    let state = EngineState::new(Engine::new(config));

    let progress: SharedProgress = Arc::new(|fraction: f32, message: &str| {
        tracing::info!(progress = %format!("{:.0}%", fraction * 100.0), "{}", message);
    });

    // Ctrl-C는 다음 파일/시트 경계에서 작업을 멈춤
    let cancel = CancelToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Cancellation requested");
            signal_token.cancel();
        }
    });

    match run(cli, state, progress, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match serde_json::to_string_pretty(&e) {
                Ok(text) => eprintln!("{}", text),
                Err(_) => eprintln!("{}: {}", e.code, e.message),
            }
            ExitCode::FAILURE
        }
    }
}
