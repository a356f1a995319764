use anyhow::{Context, Result};
use clap::ValueEnum;
use fleet_clusters::clustering::UnitAssignment;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Csv,
    Parquet,
}

pub fn write_frame(df: &mut DataFrame, path: &Path, format: OutputFormat) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    match format {
        OutputFormat::Csv => {
            CsvWriter::new(file)
                .finish(df)
                .with_context(|| format!("Failed to write CSV {:?}", path))?;
        }
        OutputFormat::Parquet => {
            ParquetWriter::new(file)
                .finish(df)
                .with_context(|| format!("Failed to write Parquet {:?}", path))?;
        }
    }
    Ok(())
}

/// Cluster label of every unit group, for tracing a cluster back to plants
pub fn assignments_frame(assignments: &[UnitAssignment]) -> Result<DataFrame> {
    let df = DataFrame::new(vec![
        Series::new("region", assignments.iter().map(|a| a.region.as_str()).collect::<Vec<_>>()),
        Series::new("technology", assignments.iter().map(|a| a.technology.as_str()).collect::<Vec<_>>()),
        Series::new("plant_id_eia", assignments.iter().map(|a| a.plant_id).collect::<Vec<i64>>()),
        Series::new("unit_id", assignments.iter().map(|a| a.unit_id.as_str()).collect::<Vec<_>>()),
        Series::new("cluster", assignments.iter().map(|a| a.cluster as u32).collect::<Vec<u32>>()),
    ])?;
    Ok(df)
}
