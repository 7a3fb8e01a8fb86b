use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use things_dataloader::catalog::Catalog;
use things_dataloader::config::{Config, ConfigLoader};
use things_dataloader::domain::{PackMode, Selection};
use things_dataloader::error::PackError;
use things_dataloader::http::HttpSourceClient;
use things_dataloader::output::{CatalogListing, JsonOutput, PackSummary, StderrProgress};
use things_dataloader::pipeline::{PackRequest, Pipeline};
use things_dataloader::tool::SystemToolRunner;

#[derive(Parser)]
#[command(name = "things-dl")]
#[command(about = "Package catalog sub-datasets into one archive or a portable download script")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Override the datasets catalog CSV")]
    catalog: Option<PathBuf>,

    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "List catalog datasets and their selection tokens")]
    List,
    #[command(about = "Fetch the selected sub-datasets and pack them into an archive")]
    Pack(PackArgs),
    #[command(about = "Print the fetch operations for a selection without running them")]
    Plan(PlanArgs),
}

#[derive(Args)]
struct PackArgs {
    #[arg(required = true)]
    tokens: Vec<String>,

    #[arg(long, help = "Emit a shell script instead of fetching server-side")]
    script: bool,

    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct PlanArgs {
    #[arg(required = true)]
    tokens: Vec<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<PackError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PackError) -> u8 {
    match error.status_class() {
        400 => 2,
        _ => match error {
            PackError::Network { .. }
            | PackError::HttpStatus { .. }
            | PackError::MissingTool(_)
            | PackError::ToolFailed(_) => 3,
            _ => 1,
        },
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(catalog) = cli.catalog {
        config.datasets_csv = catalog;
    }
    let catalog = load_catalog(&config)?;

    match cli.command {
        Command::List => {
            JsonOutput::print_listing(&CatalogListing::from_catalog(&catalog)).into_diagnostic()
        }
        Command::Plan(args) => {
            let pipeline = build_pipeline(catalog, config)?;
            let plans = pipeline.plan(&Selection::new(&args.tokens))?;
            JsonOutput::print_plans(&plans).into_diagnostic()
        }
        Command::Pack(args) => {
            let output = args
                .output
                .clone()
                .unwrap_or_else(|| PathBuf::from(&config.bundle_name));
            let pipeline = build_pipeline(catalog, config)?;
            let request = PackRequest {
                selection: Selection::new(&args.tokens),
                mode: if args.script {
                    PackMode::Record
                } else {
                    PackMode::Execute
                },
            };
            let bundle = if cli.quiet {
                pipeline.run(&request, &JsonOutput)?
            } else {
                pipeline.run(&request, &StderrProgress)?
            };
            bundle.persist(&output)?;
            let summary = PackSummary::new(&bundle, output.display().to_string());
            JsonOutput::print_pack(&summary).into_diagnostic()
        }
    }
}

fn load_catalog(config: &Config) -> Result<Catalog, PackError> {
    Catalog::load(
        &config.datasets_csv,
        config.descriptions_csv.as_deref(),
        &config.source_markers,
    )
}

fn build_pipeline(
    catalog: Catalog,
    config: Config,
) -> Result<Pipeline<HttpSourceClient, SystemToolRunner>, PackError> {
    let http = HttpSourceClient::new()?;
    Ok(Pipeline::new(catalog, config, http, SystemToolRunner::new()))
}
