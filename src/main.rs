use anyhow::{Context, Result};
use clap::Parser;
use fleet_clusters::{BuildOptions, FleetPipeline, Settings};
use log::info;
use std::path::PathBuf;

mod input_loader;
mod output_writer;

use input_loader::InputLoader;
use output_writer::{assignments_frame, write_frame, OutputFormat};

#[derive(Parser)]
#[command(name = "fleet_processor")]
#[command(about = "Cluster existing generators and build a resource table for capacity expansion models")]
struct Args {
    /// Settings YAML file
    #[arg(short, long)]
    settings: PathBuf,

    /// Directory holding the input tables
    #[arg(short, long)]
    input_dir: PathBuf,

    /// Resource table output path
    #[arg(short, long)]
    output: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "csv")]
    format: OutputFormat,

    /// Only build clusters of existing generators
    #[arg(long, conflicts_with = "new_only")]
    existing_only: bool,

    /// Only build new-build resources
    #[arg(long)]
    new_only: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let settings = Settings::from_path(&args.settings)
        .with_context(|| format!("Failed to load settings from {:?}", args.settings))?;
    info!(
        "Model year {} with {} regions",
        settings.model_year,
        settings.model_regions.len()
    );

    let inputs = InputLoader::new(args.input_dir.clone()).load_all()?;
    let options = BuildOptions {
        existing: !args.new_only,
        new_build: !args.existing_only,
    };
    let table = FleetPipeline::new(&settings, &inputs)
        .build_all_resources(options)
        .context("Failed to build resource table")?;

    let mut df = table.to_dataframe()?;
    write_frame(&mut df, &args.output, args.format)?;

    if !table.assignments.is_empty() {
        let stem = args.output.file_stem().and_then(|s| s.to_str()).unwrap_or("resources");
        let ext = match args.format {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        };
        let path = args.output.with_file_name(format!("{}_unit_clusters.{}", stem, ext));
        write_frame(&mut assignments_frame(&table.assignments)?, &path, args.format)?;
        info!("Wrote unit cluster assignments to {:?}", path);
    }

    println!("\nResource Table Summary");
    println!("{}", "=".repeat(60));
    println!("Resources: {}", table.resources.len());
    println!("Existing capacity: {:.1} MW", table.existing_capacity_mw());
    println!("Retired by {}: {:.1} MW", settings.model_year, table.retired_capacity_mw());
    if options.existing {
        println!("{}", table.capacity_summary()?);
    }
    println!("Saved to {:?}", args.output);
    Ok(())
}
