//! Run settings, parsed once from YAML and validated before any stage runs.
//!
//! Maps whose entries are applied in sequence (tags, startup fuel, fuel labels)
//! keep the order they were written in, so later entries override earlier ones
//! exactly as they appear in the file.

use crate::error::{ClusterError, ClusterResult};
use crate::models::{AmendmentRecord, GeneratorSnapshot};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use std::path::Path;

/// Keys that must be present and non-null in every settings file
pub const REQUIRED_KEYS: [&str; 4] = ["model_year", "data_years", "model_regions", "num_clusters"];

/// Seasonal or nameplate capacity column used for every capacity total
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CapacityColumn {
    #[default]
    CapacityMw,
    SummerCapacityMw,
    WinterCapacityMw,
}

impl CapacityColumn {
    pub fn of_snapshot(&self, row: &GeneratorSnapshot) -> Option<f64> {
        match self {
            CapacityColumn::CapacityMw => row.capacity_mw,
            CapacityColumn::SummerCapacityMw => row.summer_capacity_mw,
            CapacityColumn::WinterCapacityMw => row.winter_capacity_mw,
        }
    }

    pub fn of_amendment(&self, row: &AmendmentRecord) -> Option<f64> {
        match self {
            CapacityColumn::CapacityMw => row.capacity_mw,
            CapacityColumn::SummerCapacityMw => row.summer_capacity_mw,
            CapacityColumn::WinterCapacityMw => row.winter_capacity_mw,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s.clone()],
            OneOrMany::Many(v) => v.clone(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdValue {
    Int(i64),
    Text(String),
}

/// Generator ids are strings even when written as bare integers
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match IdValue::deserialize(deserializer)? {
        IdValue::Int(i) => i.to_string(),
        IdValue::Text(s) => s,
    })
}

/// `[plant_id, generator_id, retirement_year]`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AdditionalRetirement(
    pub i64,
    #[serde(deserialize_with = "id_string")] pub String,
    pub i32,
);

/// `[plant_id, generator_id, model_region]`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AdditionalPlanned(
    pub i64,
    #[serde(deserialize_with = "id_string")] pub String,
    pub String,
);

/// `[technology, tech_detail, cost_case, size_mw]`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NewGenSpec(pub String, pub String, pub String, pub f64);

impl NewGenSpec {
    pub fn resource_name(&self) -> String {
        format!("{}_{}_{}", self.0, self.1, self.2)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum UserFuelPrice {
    Flat(f64),
    Regional(IndexMap<String, f64>),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CapexPerMile {
    Constant(f64),
    Mapped(IndexMap<String, f64>),
    Other(serde_yaml::Value),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TransmissionSegmentParams {
    pub capex_mw_mile: Option<CapexPerMile>,
    pub wacc: Option<f64>,
    pub investment_years: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TransmissionInvestmentCost {
    #[serde(default)]
    pub use_total: bool,
    #[serde(flatten)]
    pub segments: IndexMap<String, TransmissionSegmentParams>,
}

/// Owner-based clustering for a region
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct OwnerClusterSettings {
    #[serde(default)]
    pub technology_description: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub model_year: i32,
    pub data_years: Vec<i32>,
    pub model_regions: Vec<String>,
    pub num_clusters: IndexMap<String, usize>,
    #[serde(default)]
    pub alt_num_clusters: IndexMap<String, IndexMap<String, usize>>,
    #[serde(default)]
    pub alt_cluster_method: IndexMap<String, OwnerClusterSettings>,
    #[serde(default)]
    pub capacity_col: CapacityColumn,
    #[serde(default)]
    pub region_aggregations: IndexMap<String, Vec<String>>,

    #[serde(default)]
    pub retirement_ages: IndexMap<String, i32>,
    #[serde(default)]
    pub additional_retirements: Vec<AdditionalRetirement>,

    #[serde(default)]
    pub small_hydro: bool,
    #[serde(default)]
    pub small_hydro_mw: f64,
    #[serde(default)]
    pub small_hydro_regions: Vec<String>,

    #[serde(default)]
    pub group_technologies: bool,
    #[serde(default)]
    pub tech_groups: IndexMap<String, Vec<String>>,
    #[serde(default)]
    pub regional_no_grouping: IndexMap<String, Vec<String>>,

    #[serde(default)]
    pub proposed_status_included: Vec<String>,
    #[serde(default)]
    pub proposed_gen_heat_rates: IndexMap<String, f64>,
    #[serde(default)]
    pub proposed_min_load: IndexMap<String, f64>,
    #[serde(default)]
    pub additional_planned: Vec<AdditionalPlanned>,

    #[serde(default)]
    pub eia_atb_tech_map: IndexMap<String, OneOrMany>,
    #[serde(default)]
    pub startup_fuel_use: IndexMap<String, f64>,
    pub startup_costs_type: Option<String>,
    #[serde(default)]
    pub startup_vom_costs_mw: IndexMap<String, f64>,
    pub startup_vom_costs_usd_year: Option<i32>,
    pub startup_costs_per_cold_start_usd_year: Option<i32>,
    pub target_usd_year: Option<i32>,
    #[serde(default)]
    pub existing_startup_costs_tech_map: IndexMap<String, String>,
    #[serde(default)]
    pub new_build_startup_costs: IndexMap<String, String>,

    #[serde(default)]
    pub tech_fuel_map: IndexMap<String, String>,
    #[serde(default)]
    pub ccs_fuel_map: IndexMap<String, String>,
    #[serde(default)]
    pub aeo_fuel_scenarios: IndexMap<String, String>,
    #[serde(default)]
    pub aeo_fuel_region_map: IndexMap<String, Vec<String>>,
    #[serde(default)]
    pub user_fuel_price: IndexMap<String, UserFuelPrice>,

    #[serde(default)]
    pub transmission_investment_cost: TransmissionInvestmentCost,

    #[serde(default)]
    pub model_tag_names: Vec<String>,
    #[serde(default)]
    pub default_model_tag: f64,
    #[serde(default)]
    pub model_tag_values: IndexMap<String, IndexMap<String, f64>>,
    #[serde(default)]
    pub regional_tag_values: IndexMap<String, IndexMap<String, IndexMap<String, f64>>>,

    #[serde(default)]
    pub capacity_factor_techs: Vec<String>,
    pub capacity_factor_default_year_filter: Option<Vec<i32>>,
    #[serde(default)]
    pub alt_year_filters: IndexMap<String, Option<Vec<i32>>>,
    #[serde(default)]
    pub derate_capacity: bool,
    #[serde(default)]
    pub derate_techs: Vec<String>,

    #[serde(default)]
    pub energy_storage_duration: IndexMap<String, f64>,

    #[serde(default)]
    pub atb_new_gen: Vec<NewGenSpec>,
    #[serde(default)]
    pub sort_gens: bool,

    /// Keys not modeled above, looked up indirectly by name
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_yaml::Value>,
}

impl Settings {
    /// Parse and validate a YAML settings document
    pub fn from_yaml_str(text: &str) -> ClusterResult<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(text)?;
        if !value.is_mapping() {
            return Err(ClusterError::invalid("settings", "top level must be a mapping"));
        }
        for key in REQUIRED_KEYS {
            if value.get(key).map_or(true, |v| v.is_null()) {
                return Err(ClusterError::MissingSetting(key.to_string()));
            }
        }
        let settings: Settings = serde_yaml::from_value(value)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_path(path: &Path) -> ClusterResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Checks that go beyond the shape of the document
    pub fn validate(&self) -> ClusterResult<()> {
        if self.data_years.is_empty() {
            return Err(ClusterError::MissingSetting("data_years".to_string()));
        }
        if self.model_regions.is_empty() {
            return Err(ClusterError::MissingSetting("model_regions".to_string()));
        }
        if self.num_clusters.is_empty() {
            return Err(ClusterError::MissingSetting("num_clusters".to_string()));
        }
        for region in self.alt_num_clusters.keys() {
            if !self.model_regions.contains(region) {
                return Err(ClusterError::invalid(
                    "alt_num_clusters",
                    format!("region `{}` is not in model_regions", region),
                ));
            }
        }
        if self.small_hydro && self.small_hydro_mw <= 0.0 {
            return Err(ClusterError::MissingSetting("small_hydro_mw".to_string()));
        }
        if self.derate_capacity && self.capacity_factor_techs.is_empty() {
            return Err(ClusterError::MissingSetting("capacity_factor_techs".to_string()));
        }
        if let Some(kind) = &self.startup_costs_type {
            if self.startup_cost_table().is_none() {
                return Err(ClusterError::MissingSetting(kind.clone()));
            }
        }
        for (segment, params) in &self.transmission_investment_cost.segments {
            if let Some(CapexPerMile::Other(value)) = &params.capex_mw_mile {
                return Err(ClusterError::InvalidCapex {
                    segment: segment.clone(),
                    value: format!("{:?}", value),
                });
            }
        }
        Ok(())
    }

    /// Cluster counts per region, with regional overrides applied
    pub fn region_num_clusters(&self) -> IndexMap<String, IndexMap<String, usize>> {
        let mut counts: IndexMap<String, IndexMap<String, usize>> = self
            .model_regions
            .iter()
            .map(|region| (region.clone(), self.num_clusters.clone()))
            .collect();
        for (region, overrides) in &self.alt_num_clusters {
            if let Some(region_counts) = counts.get_mut(region) {
                for (tech, k) in overrides {
                    region_counts.insert(tech.clone(), *k);
                }
            }
        }
        counts
    }

    /// Raw region names to keep, and the raw -> model region mapping
    pub fn region_mapping(&self) -> IndexMap<String, String> {
        let mut mapping = IndexMap::new();
        for region in &self.model_regions {
            match self.region_aggregations.get(region) {
                Some(raw_regions) => {
                    for raw in raw_regions {
                        mapping.insert(raw.clone(), region.clone());
                    }
                }
                None => {
                    mapping.insert(region.clone(), region.clone());
                }
            }
        }
        mapping
    }

    /// Raw regions that make up a model region
    pub fn raw_regions_of(&self, model_region: &str) -> Vec<String> {
        self.region_aggregations
            .get(model_region)
            .cloned()
            .unwrap_or_else(|| vec![model_region.to_string()])
    }

    pub fn uses_owner_clustering(&self, region: &str, technology: &str) -> bool {
        self.alt_cluster_method
            .get(region)
            .map_or(false, |m| m.technology_description.iter().any(|t| t == technology))
    }

    /// Cold-start cost table named by `startup_costs_type`
    pub fn startup_cost_table(&self) -> Option<IndexMap<String, f64>> {
        let kind = self.startup_costs_type.as_ref()?;
        let value = self.extra.get(kind)?;
        serde_yaml::from_value(value.clone()).ok()
    }

    /// Data years used for a technology's capacity factor, `None` meaning all
    pub fn capacity_factor_years(&self, technology: &str) -> Option<Vec<i32>> {
        match self.alt_year_filters.get(technology) {
            Some(filter) => filter.clone(),
            None => self.capacity_factor_default_year_filter.clone(),
        }
    }

    /// Technologies mapped to an EIA technology, the name itself included
    pub fn atb_techs_for(&self, eia_tech: &str) -> ClusterResult<Vec<String>> {
        let mut techs = self
            .eia_atb_tech_map
            .get(eia_tech)
            .map(OneOrMany::to_vec)
            .ok_or_else(|| ClusterError::MissingSetting(format!("eia_atb_tech_map.{}", eia_tech)))?;
        techs.push(eia_tech.to_string());
        Ok(techs)
    }
}

#[cfg(test)]
pub(crate) const SAMPLE_SETTINGS: &str = r#"
model_year: 2030
data_years: [2019, 2020]
model_regions: [east, west]
region_aggregations:
  east: [NY_Z_A, NY_Z_J]
capacity_col: summer_capacity_mw
num_clusters:
  Conventional Steam Coal: 2
  Natural Gas Fired Combined Cycle: 3
  Conventional Hydroelectric: 1
  Onshore Wind Turbine: 0
alt_num_clusters:
  west:
    Conventional Steam Coal: 1
retirement_ages:
  Conventional Steam Coal: 60
  Natural Gas Fired Combined Cycle: 40
additional_retirements:
  - [10, 1, 2025]
  - [11, "GT2", 2040]
startup_costs_type: startup_costs_per_cold_start_mw
startup_costs_per_cold_start_mw:
  coal: 100.0
  gas_cc: 60.0
transmission_investment_cost:
  use_total: true
  spur:
    capex_mw_mile: 3900
    wacc: 0.069
    investment_years: 60
  tx:
    capex_mw_mile:
      east: 2000
      west: 1500
    wacc: 0.069
    investment_years: 60
atb_new_gen:
  - [NaturalGas, CCAvgCF, Moderate, 500]
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample_settings() {
        let settings = Settings::from_yaml_str(SAMPLE_SETTINGS).unwrap();
        assert_eq!(settings.model_year, 2030);
        assert_eq!(settings.capacity_col, CapacityColumn::SummerCapacityMw);
        assert_eq!(settings.additional_retirements[0].1, "1");
        assert_eq!(settings.additional_retirements[1].1, "GT2");
        assert!(settings.transmission_investment_cost.use_total);
        assert_eq!(settings.transmission_investment_cost.segments.len(), 2);
        assert_eq!(settings.atb_new_gen[0].resource_name(), "NaturalGas_CCAvgCF_Moderate");
        let table = settings.startup_cost_table().unwrap();
        assert_eq!(table["coal"], 100.0);
    }

    #[test]
    fn test_missing_required_key_is_named() {
        let text = SAMPLE_SETTINGS.replace("model_year: 2030\n", "");
        match Settings::from_yaml_str(&text) {
            Err(ClusterError::MissingSetting(key)) => assert_eq!(key, "model_year"),
            other => panic!("expected missing setting, got {:?}", other),
        }
    }

    #[test]
    fn test_region_num_clusters_applies_overrides() {
        let settings = Settings::from_yaml_str(SAMPLE_SETTINGS).unwrap();
        let counts = settings.region_num_clusters();
        assert_eq!(counts["east"]["Conventional Steam Coal"], 2);
        assert_eq!(counts["west"]["Conventional Steam Coal"], 1);
        assert_eq!(counts["west"]["Natural Gas Fired Combined Cycle"], 3);
    }

    #[test]
    fn test_region_mapping() {
        let settings = Settings::from_yaml_str(SAMPLE_SETTINGS).unwrap();
        let mapping = settings.region_mapping();
        assert_eq!(mapping["NY_Z_A"], "east");
        assert_eq!(mapping["NY_Z_J"], "east");
        assert_eq!(mapping["west"], "west");
        assert!(!mapping.contains_key("east"));
    }

    #[test]
    fn test_invalid_capex_shape_is_rejected() {
        let text = SAMPLE_SETTINGS.replace("capex_mw_mile: 3900", "capex_mw_mile: expensive");
        match Settings::from_yaml_str(&text) {
            Err(ClusterError::InvalidCapex { segment, .. }) => assert_eq!(segment, "spur"),
            other => panic!("expected invalid capex, got {:?}", other),
        }
    }

    #[test]
    fn test_startup_cost_table_must_exist() {
        let text = SAMPLE_SETTINGS.replace(
            "startup_costs_type: startup_costs_per_cold_start_mw",
            "startup_costs_type: startup_costs_per_hot_start_mw",
        );
        assert!(matches!(
            Settings::from_yaml_str(&text),
            Err(ClusterError::MissingSetting(key)) if key == "startup_costs_per_hot_start_mw"
        ));
    }
}
