use anyhow::Result;
use clap::{Parser, Subcommand};
use demrisk::PipelineBuilder;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// DEM mosaic, terrain derivation and risk scoring CLI tool
#[derive(Parser)]
#[command(name = "demrisk")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory for the merged DEM and derived rasters (defaults to the tile directory)
    #[arg(short, long, env = "DEMRISK_OUTPUT_DIR", global = true)]
    output_dir: Option<PathBuf>,

    /// Integer factor tiles are downsampled by before merging
    #[arg(
        short,
        long,
        env = "DEMRISK_DOWNSAMPLE",
        default_value = "8",
        global = true
    )]
    downsample: usize,

    /// Maximum pipeline results in cache
    #[arg(
        short,
        long,
        env = "DEMRISK_CACHE_SIZE",
        default_value = "32",
        global = true
    )]
    cache_size: u64,

    /// Hillshade sun azimuth in degrees
    #[arg(long, env = "DEMRISK_AZIMUTH", default_value = "315", global = true)]
    azimuth: f64,

    /// Hillshade sun altitude in degrees
    #[arg(long, env = "DEMRISK_ALTITUDE", default_value = "45", global = true)]
    altitude: f64,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn pipeline_builder(&self) -> PipelineBuilder {
        let mut builder = PipelineBuilder::new()
            .cache_size(self.cache_size)
            .downsample_factor(self.downsample)
            .azimuth(self.azimuth)
            .altitude(self.altitude);
        if let Some(dir) = &self.output_dir {
            builder = builder.output_dir(dir);
        }
        builder
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Merge tile directories and derive slope, hillshade and elevation statistics
    Build {
        /// Directories of GeoTIFF tiles
        #[arg(required = true)]
        dirs: Vec<PathBuf>,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Display information about a GeoTIFF raster
    Info {
        /// Path to a .tif file
        raster: PathBuf,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Score features by proximity to restricted areas and terrain slope
    Score {
        /// GeoJSON file with the features to score
        #[arg(long)]
        features: PathBuf,

        /// GeoJSON file with the restricted areas
        #[arg(long)]
        restricted: PathBuf,

        /// Tile directory to derive feature slopes from
        #[arg(long)]
        dem: Option<PathBuf>,

        /// Output file (.json, .csv or .geojson); prints JSON scores if not specified
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "demrisk=info,demrisk_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let builder = cli.pipeline_builder();

    match cli.command {
        Commands::Build { dirs, json } => commands::build::run(builder, dirs, json),
        Commands::Info { raster, json } => commands::info::run(raster, json),
        Commands::Score {
            features,
            restricted,
            dem,
            out,
        } => commands::score::run(builder, features, restricted, dem, out),
    }
}
