use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use basin_data_manager::app::{App, FetchOptions, FetchResult, ProgressSink};
use basin_data_manager::boundary::{BoundaryIndexCache, WbdHttpClient};
use basin_data_manager::config::{ConfigLoader, ResolvedConfig};
use basin_data_manager::crs::Normalizer;
use basin_data_manager::domain::BasinId;
use basin_data_manager::elevation::{ElevationFetcher, ThreeDepHttpClient};
use basin_data_manager::error::BasinError;
use basin_data_manager::hydrography::{HydrographyFetcher, NhdHrHttpClient};
use basin_data_manager::output::{JsonOutput, OutputMode, TextOutput};
use basin_data_manager::persist::OutputWriter;
use basin_data_manager::roads::{OverpassHttpClient, RoadNetworkFetcher};
use basin_data_manager::store::Store;

type HttpApp = App<
    WbdHttpClient,
    ElevationFetcher<ThreeDepHttpClient>,
    HydrographyFetcher<NhdHrHttpClient>,
    RoadNetworkFetcher<OverpassHttpClient>,
>;

#[derive(Parser)]
#[command(name = "basin-dm")]
#[command(about = "Fetch elevation, flowlines and roads for a HUC10 watershed")]
#[command(version, author)]
struct Cli {
    /// Config file (defaults to ./basin-dm.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Machine-readable output on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "List basins in the configured region")]
    List,
    #[command(about = "Show a basin's boundary summary")]
    Resolve(BasinArgs),
    #[command(about = "Download DEM, flowlines and roads for a basin")]
    Fetch(FetchArgs),
}

#[derive(Args)]
struct BasinArgs {
    id: String,
}

#[derive(Args)]
struct FetchArgs {
    id: String,

    /// Run the three source fetches one after another
    #[arg(long)]
    sequential: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<BasinError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &BasinError) -> u8 {
    match error {
        BasinError::InvalidBasinId(_) | BasinError::NotFound(_) | BasinError::InvalidRegion(_) => 2,
        BasinError::ConfigRead(_) | BasinError::ConfigParse(_) | BasinError::UnsupportedCrs(_) => 2,
        BasinError::SourceUnavailable { .. }
        | BasinError::EmptyResult { .. }
        | BasinError::RequestTooLarge { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Command::List => {
            let app = build_app(&config, FetchOptions::default())?;
            let result = app.list_basins(sink(output_mode))?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_list(&result).into_diagnostic()?,
                OutputMode::Text => TextOutput::print_list(&result),
            }
        }
        Command::Resolve(args) => {
            let id: BasinId = args.id.parse()?;
            let app = build_app(&config, FetchOptions::default())?;
            let result = app.resolve(&id, sink(output_mode))?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_resolve(&result).into_diagnostic()?,
                OutputMode::Text => TextOutput::print_resolve(&result),
            }
        }
        Command::Fetch(args) => {
            let id: BasinId = args.id.parse()?;
            let options = FetchOptions {
                concurrent: config.concurrent_fetch && !args.sequential,
            };
            let app = build_app(&config, options)?;
            let output = app.acquire_basin(&id, sink(output_mode))?;
            let result = FetchResult::from(&output);
            match output_mode {
                OutputMode::Json => JsonOutput::print_fetch(&result).into_diagnostic()?,
                OutputMode::Text => TextOutput::print_fetch(&result),
            }
        }
    }
    Ok(())
}

fn sink(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Text => &TextOutput,
    }
}

fn build_app(config: &ResolvedConfig, options: FetchOptions) -> Result<HttpApp, BasinError> {
    let store = Store::new(&config.data_dir)?;
    let normalizer = Normalizer::new(config.geographic_crs, config.projected_crs)?;
    let timeout = config.timeout_secs;

    let boundary = BoundaryIndexCache::new(
        WbdHttpClient::new(&config.boundary, timeout)?,
        store.clone(),
        config.region.clone(),
        config.boundary.out_crs,
    );
    let elevation = ElevationFetcher::new(
        ThreeDepHttpClient::new(&config.elevation, timeout)?,
        normalizer,
        &config.elevation,
    );
    let hydrography = HydrographyFetcher::new(NhdHrHttpClient::new(&config.hydrography, timeout)?, normalizer);
    let roads = RoadNetworkFetcher::new(
        OverpassHttpClient::new(&config.roads, timeout)?,
        normalizer,
        config.roads.network_type,
    );
    let writer = OutputWriter::new(store, config.elevation.resolution_m);

    Ok(App::new(boundary, elevation, hydrography, roads, writer, normalizer, options))
}
