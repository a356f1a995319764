use anyhow::{bail, Context, Result};
use fleet_clusters::models::{AmendmentTables, GeneratorSnapshot, ProfileGroup};
use fleet_clusters::{FleetInputs, RegionShapes};
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serde::de::DeserializeOwned;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// Reads every input table from one directory.
///
/// A table named `foo` is read from `foo.csv`, or from the first CSV inside
/// `foo.zip` when no plain file exists.
pub struct InputLoader {
    input_dir: PathBuf,
}

impl InputLoader {
    pub fn new(input_dir: PathBuf) -> Self {
        Self { input_dir }
    }

    fn table_path(&self, name: &str) -> Option<PathBuf> {
        ["csv", "zip"]
            .iter()
            .map(|ext| self.input_dir.join(format!("{}.{}", name, ext)))
            .find(|p| p.is_file())
    }

    fn read_csv_bytes(path: &Path) -> Result<Vec<u8>> {
        if path.extension().and_then(|s| s.to_str()) != Some("zip") {
            return fs::read(path).with_context(|| format!("Failed to read {:?}", path));
        }

        let file = fs::File::open(path).with_context(|| format!("Failed to open ZIP file: {:?}", path))?;
        let mut archive =
            ZipArchive::new(file).with_context(|| format!("Failed to read ZIP archive: {:?}", path))?;
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.name().to_lowercase().ends_with(".csv") {
                let mut bytes = Vec::new();
                entry
                    .read_to_end(&mut bytes)
                    .with_context(|| format!("Failed to extract {} from {:?}", entry.name(), path))?;
                return Ok(bytes);
            }
        }
        bail!("No CSV file inside {:?}", path)
    }

    /// Deserialize every row of a CSV file
    pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
        let bytes = Self::read_csv_bytes(path)?;
        let mut reader = csv::Reader::from_reader(Cursor::new(bytes));
        let mut rows = Vec::new();
        for (i, record) in reader.deserialize().enumerate() {
            let row: T = record.with_context(|| format!("Bad row {} in {:?}", i + 1, path))?;
            rows.push(row);
        }
        Ok(rows)
    }

    fn required<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        match self.table_path(name) {
            Some(path) => Self::read_rows(&path),
            None => bail!("Missing input table {} in {:?}", name, self.input_dir),
        }
    }

    fn optional<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        match self.table_path(name) {
            Some(path) => {
                let rows = Self::read_rows(&path)?;
                info!("Loaded {} rows from {:?}", rows.len(), path);
                Ok(rows)
            }
            None => {
                info!("No {} table; continuing without it", name);
                Ok(vec![])
            }
        }
    }

    /// All yearly generator snapshots (`generators_*.csv` / `.zip`)
    pub fn load_snapshots(&self) -> Result<Vec<GeneratorSnapshot>> {
        let mut files = Vec::new();
        for ext in ["csv", "zip"] {
            let pattern = self.input_dir.join(format!("generators_*.{}", ext));
            files.extend(glob(&pattern.to_string_lossy())?.filter_map(Result::ok));
        }
        files.sort();
        if files.is_empty() {
            bail!("No generators_*.csv files found in {:?}", self.input_dir);
        }

        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?,
        );
        let mut snapshots = Vec::new();
        for file in &files {
            pb.set_message(file.file_name().and_then(|s| s.to_str()).unwrap_or("").to_string());
            snapshots.extend(Self::read_rows::<GeneratorSnapshot>(file)?);
            pb.inc(1);
        }
        pb.finish_with_message("generator snapshots loaded");
        info!("Loaded {} generator rows from {} files", snapshots.len(), files.len());
        Ok(snapshots)
    }

    fn load_profile_groups(&self) -> Result<Vec<ProfileGroup>> {
        let path = self.input_dir.join("profile_groups.json");
        if !path.is_file() {
            return Ok(vec![]);
        }
        let text = fs::read_to_string(&path).with_context(|| format!("Failed to read {:?}", path))?;
        serde_json::from_str(&text).with_context(|| format!("Failed to parse {:?}", path))
    }

    fn load_region_shapes(&self) -> Result<Option<RegionShapes>> {
        let path = self.input_dir.join("region_shapes.geojson");
        if !path.is_file() {
            warn!("No region_shapes.geojson; units without a region lookup will not be located");
            return Ok(None);
        }
        let text = fs::read_to_string(&path).with_context(|| format!("Failed to read {:?}", path))?;
        let shapes = RegionShapes::from_geojson_str(&text).with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(Some(shapes))
    }

    pub fn load_all(&self) -> Result<FleetInputs> {
        Ok(FleetInputs {
            snapshots: self.load_snapshots()?,
            entities: self.required("generator_entities")?,
            associations: self.optional("boiler_generator_assn")?,
            locations: self.optional("plant_locations")?,
            plant_regions: self.required("plant_regions")?,
            region_overrides: self.optional("plant_region_overrides")?,
            generation_fuel: self.optional("generation_fuel")?,
            unit_heat_rates: self.optional("unit_heat_rates")?,
            amendments: AmendmentTables {
                operating: self.optional("amendments_operating")?,
                planned: self.optional("amendments_planned")?,
                canceled: self.optional("amendments_canceled")?,
                retired: self.optional("amendments_retired")?,
            },
            ownership: self.optional("ownership")?,
            plant_generation: self.optional("plant_generation")?,
            om_costs: self.optional("om_costs")?,
            fuel_prices: self.optional("fuel_prices")?,
            price_index: self.optional("price_index")?,
            new_build_costs: self.optional("new_build_costs")?,
            spur_distances: self.optional("spur_distances")?,
            offshore_spur_costs: self.optional("offshore_spur_costs")?,
            profile_groups: self.load_profile_groups()?,
            region_shapes: self.load_region_shapes()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_clusters::models::PlantRegionRecord;
    use std::io::Write;
    use tempfile::TempDir;

    const GENERATORS: &str = "plant_id_eia,generator_id,report_date,capacity_mw,summer_capacity_mw,winter_capacity_mw,minimum_load_mw,technology_description,energy_source_code_1,operational_status_code,planned_retirement_date
1,1,2020-12-01,100.0,95.0,,40.0,Conventional Steam Coal,BIT,OP,
2,GT1,2020-12-01,50.0,,,,Natural Gas Fired Combustion Turbine,NG,OP,2028-06-01
";

    #[test]
    fn test_read_snapshots_with_empty_fields() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("generators_2020.csv"), GENERATORS).unwrap();
        let loader = InputLoader::new(dir.path().to_path_buf());
        let rows = loader.load_snapshots().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].summer_capacity_mw, Some(95.0));
        assert_eq!(rows[0].winter_capacity_mw, None);
        assert_eq!(rows[1].generator_id, "GT1");
        assert!(rows[1].planned_retirement_date.is_some());
    }

    #[test]
    fn test_zipped_table() {
        let dir = TempDir::new().unwrap();
        let file = fs::File::create(dir.path().join("plant_regions.zip")).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("plant_regions.csv", zip::write::FileOptions::default()).unwrap();
        zip.write_all(b"plant_id_eia,region\n1,NY_Z_A\n2,PJM_E\n").unwrap();
        zip.finish().unwrap();

        let loader = InputLoader::new(dir.path().to_path_buf());
        let rows: Vec<PlantRegionRecord> = loader.required("plant_regions").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].region, "PJM_E");
    }

    #[test]
    fn test_missing_tables() {
        let dir = TempDir::new().unwrap();
        let loader = InputLoader::new(dir.path().to_path_buf());
        assert!(loader.load_snapshots().is_err());
        let ownership: Vec<fleet_clusters::models::OwnershipRecord> = loader.optional("ownership").unwrap();
        assert!(ownership.is_empty());
        assert!(loader.required::<PlantRegionRecord>("plant_regions").is_err());
    }
}
