use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use live_core::config::{CellSpec, ConfigLoader, LiveConfig, PageFile};
use live_core::{CellReport, LiveSession};
use log::LevelFilter;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[clap(name = "live", author, version = "0.1.0", about = "Run and grade live code exercises")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, short, help = "Session configuration (YAML); a page's own config wins")]
    config: Option<PathBuf>,

    #[clap(long, short, help = "Log level; defaults to the configured logging.level")]
    log_level: Option<String>,

    #[clap(long, short, value_enum, default_value = "html")]
    format: OutputFormat,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate (and grade) every cell of a page file
    Run {
        page: PathBuf,
    },
    /// Evaluate one snippet
    Eval {
        code: String,
        #[clap(long, help = "Evaluation options as a JSON object")]
        options: Option<String>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum OutputFormat {
    Html,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let base = match &cli.config {
        Some(path) => load_config(path).await?,
        None => LiveConfig::default(),
    };

    let page = match &cli.command {
        Commands::Run { page } => {
            let mut page = ConfigLoader::page_from_file(page)
                .await
                .with_context(|| format!("Failed to load page {}", page.display()))?;
            if cli.config.is_some() && page.config == LiveConfig::default() {
                page.config = base;
            }
            page
        }
        Commands::Eval { code, options } => {
            let options = match options {
                Some(raw) => serde_json::from_str(raw).context("--options must be a JSON object")?,
                None => serde_json::Value::Null,
            };
            PageFile {
                config: base,
                cells: vec![CellSpec {
                    code: code.clone(),
                    options,
                    inputs: Default::default(),
                    grade: false,
                }],
                ..Default::default()
            }
        }
    };

    let level = match &cli.log_level {
        Some(level) => level.parse().unwrap_or(LevelFilter::Info),
        None => page.config.logging.level_filter()?,
    };
    env_logger::Builder::new().filter_level(level).init();

    let session = LiveSession::for_page(&page).await?;
    let reports = session.run_page(&page).await;
    session.close().await?;
    print_reports(&reports?, cli.format)
}

async fn load_config(path: &Path) -> Result<LiveConfig> {
    ConfigLoader::from_file(path)
        .await
        .with_context(|| format!("Failed to load configuration {}", path.display()))
}

fn print_reports(reports: &[CellReport], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(reports)?),
        OutputFormat::Html => {
            for report in reports {
                println!("<!-- cell {} ({:?}) -->", report.index, report.state);
                println!("{}", report.html);
                if let Some(error) = &report.error {
                    println!("<!-- error: {} -->", error);
                }
                if let Some(grade) = &report.grade_html {
                    println!("{}", grade);
                }
            }
        }
    }
    Ok(())
}
