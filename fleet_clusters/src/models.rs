use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Key used to anti-join generators against amendment tables
pub fn plant_gen_id(plant_id: i64, generator_id: &str) -> String {
    format!("{}_{}", plant_id, generator_id)
}

/// One generator row from a yearly fleet snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratorSnapshot {
    #[serde(alias = "plant_id_eia")]
    pub plant_id: i64,
    pub generator_id: String,
    pub report_date: NaiveDate,
    pub capacity_mw: Option<f64>,
    pub summer_capacity_mw: Option<f64>,
    pub winter_capacity_mw: Option<f64>,
    pub minimum_load_mw: Option<f64>,
    #[serde(alias = "technology")]
    pub technology_description: Option<String>,
    pub energy_source_code_1: Option<String>,
    #[serde(alias = "operational_status")]
    pub operational_status_code: Option<String>,
    pub planned_retirement_date: Option<NaiveDate>,
}

/// Static generator attributes that do not change between snapshots
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratorEntity {
    #[serde(alias = "plant_id_eia")]
    pub plant_id: i64,
    pub generator_id: String,
    pub prime_mover_code: Option<String>,
    pub operating_date: Option<NaiveDate>,
}

/// Boiler-generator association, carrying the shared unit id where one exists
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoilerGeneratorAssociation {
    #[serde(alias = "plant_id_eia")]
    pub plant_id: i64,
    pub generator_id: String,
    pub boiler_id: Option<String>,
    pub unit_id_eia: Option<String>,
    pub unit_id_pudl: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlantLocation {
    #[serde(alias = "plant_id_eia")]
    pub plant_id: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Fuel consumption and net generation for a plant / prime mover / fuel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationFuelRecord {
    #[serde(alias = "plant_id_eia")]
    pub plant_id: i64,
    pub prime_mover_code: String,
    #[serde(alias = "energy_source_code")]
    pub fuel_type: String,
    #[serde(alias = "fuel_consumed_for_electricity_mmbtu")]
    pub fuel_consumed_mmbtu: f64,
    pub net_generation_mwh: f64,
    pub report_date: NaiveDate,
}

/// Official heat rate reported for a unit group in one year
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitHeatRateRecord {
    #[serde(alias = "plant_id_eia")]
    pub plant_id: i64,
    #[serde(alias = "unit_id_pudl")]
    pub unit_id: String,
    pub report_date: NaiveDate,
    #[serde(alias = "heat_rate_mmbtu_mwh")]
    pub heat_rate: Option<f64>,
    pub net_generation_mwh: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlantRegionRecord {
    #[serde(alias = "plant_id_eia")]
    pub plant_id: i64,
    pub region: String,
}

/// A row from one of the monthly amendment sheets (operating, planned,
/// canceled or retired)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AmendmentRecord {
    #[serde(alias = "plant_id_eia")]
    pub plant_id: i64,
    pub generator_id: String,
    pub capacity_mw: Option<f64>,
    pub summer_capacity_mw: Option<f64>,
    pub winter_capacity_mw: Option<f64>,
    #[serde(alias = "technology")]
    pub technology_description: Option<String>,
    pub energy_source_code_1: Option<String>,
    pub prime_mover_code: Option<String>,
    /// Actual operating year for operating units, planned year otherwise
    #[serde(alias = "planned_operating_year")]
    pub operating_year: Option<i32>,
    #[serde(alias = "operational_status")]
    pub operational_status_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub state: Option<String>,
    pub balancing_authority_code: Option<String>,
}

/// The four amendment sheets consumed by reconciliation
#[derive(Debug, Clone, Default)]
pub struct AmendmentTables {
    pub operating: Vec<AmendmentRecord>,
    pub planned: Vec<AmendmentRecord>,
    pub canceled: Vec<AmendmentRecord>,
    pub retired: Vec<AmendmentRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OwnershipRecord {
    #[serde(alias = "plant_id_eia")]
    pub plant_id: i64,
    pub generator_id: String,
    #[serde(alias = "owner_utility_id_eia")]
    pub utility_id: i64,
    pub fraction_owned: f64,
}

/// Annual net generation by plant and technology, used for capacity factors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlantGenerationRecord {
    #[serde(alias = "plant_id_eia")]
    pub plant_id: i64,
    pub year: i32,
    #[serde(alias = "technology_description")]
    pub technology: String,
    pub net_generation_mwh: f64,
}

/// One regional fuel price series value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FuelPriceRecord {
    pub year: i32,
    pub price: f64,
    pub fuel: String,
    pub region: String,
    pub scenario: String,
    pub full_fuel_name: String,
}

/// Fixed and variable O&M for an existing technology
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OmCostRecord {
    #[serde(alias = "technology_description")]
    pub technology: String,
    #[serde(alias = "Fixed_OM_Cost_per_MWyr")]
    pub fixed_om_per_mw_yr: f64,
    #[serde(alias = "Var_OM_Cost_per_MWh")]
    pub var_om_per_mwh: f64,
}

/// Cost and performance of a new-build technology in one year
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewBuildCostRecord {
    pub technology: String,
    pub tech_detail: String,
    pub cost_case: String,
    pub year: i32,
    #[serde(alias = "Inv_Cost_per_MWyr")]
    pub inv_cost_per_mw_yr: f64,
    #[serde(alias = "Fixed_OM_Cost_per_MWyr")]
    pub fixed_om_per_mw_yr: f64,
    #[serde(alias = "Var_OM_Cost_per_MWh")]
    pub var_om_per_mwh: f64,
    #[serde(alias = "heat_rate_mmbtu_mwh")]
    pub heat_rate: f64,
    #[serde(default)]
    pub interconnect_annuity: Option<f64>,
}

/// Transmission distances for new-build resources of a technology in a region
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpurDistanceRecord {
    pub region: String,
    pub technology: String,
    pub spur_miles: Option<f64>,
    pub offshore_spur_miles: Option<f64>,
    pub tx_miles: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OffshoreSpurCostRecord {
    pub technology: String,
    pub tech_detail: String,
    pub cost_case: String,
    pub capex_mw_mile: f64,
}

impl OffshoreSpurCostRecord {
    pub fn resource_name(&self) -> String {
        format!("{}_{}_{}", self.technology, self.tech_detail, self.cost_case)
    }
}

/// Price index value used for inflation adjustment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceIndexRecord {
    pub year: i32,
    pub index: f64,
}

/// A group of hourly generation profiles shared by a set of technologies
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileGroup {
    pub name: String,
    pub technologies: Vec<String>,
    /// Raw regions the group has resources in
    pub regions: Vec<String>,
    pub profile: Vec<f64>,
}

/// Where a reconciled unit came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UnitSource {
    Snapshot,
    Planned,
    NewOperating,
}

/// One reconciled generator, labeled with a model region
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRecord {
    pub plant_id: i64,
    pub generator_id: String,
    /// Explicit shared unit id, or `<plant>_<generator>` when none exists
    pub unit_id: String,
    pub has_explicit_unit_id: bool,
    pub model_region: String,
    pub technology: Option<String>,
    pub prime_mover_code: Option<String>,
    pub energy_source_code: Option<String>,
    /// Capacity from the configured capacity column
    pub capacity_mw: Option<f64>,
    pub nameplate_mw: Option<f64>,
    pub minimum_load_mw: Option<f64>,
    pub operating_year: Option<i32>,
    pub planned_retirement_year: Option<i32>,
    pub retirement_year: Option<i32>,
    pub operational_status_code: Option<String>,
    pub heat_rate: Option<f64>,
    pub fixed_om_per_mw_yr: Option<f64>,
    pub var_om_per_mwh: Option<f64>,
    pub source: UnitSource,
}

impl UnitRecord {
    pub fn capacity(&self) -> f64 {
        self.capacity_mw.unwrap_or(0.0)
    }

    pub fn technology_is(&self, name: &str) -> bool {
        self.technology.as_deref() == Some(name)
    }

    pub fn plant_gen_id(&self) -> String {
        plant_gen_id(self.plant_id, &self.generator_id)
    }

    /// Retired by the model year; units without a retirement year never are
    pub fn is_retired_by(&self, model_year: i32) -> bool {
        matches!(self.retirement_year, Some(year) if year <= model_year)
    }
}

/// Generators at one plant assumed to share a heat rate
#[derive(Debug, Clone, PartialEq)]
pub struct UnitGroup {
    pub plant_id: i64,
    pub unit_id: String,
    pub capacity_mw: f64,
    pub minimum_load_mw: f64,
    pub heat_rate: Option<f64>,
    pub fixed_om_per_mw_yr: f64,
    pub var_om_per_mwh: f64,
    pub generator_ids: Vec<String>,
}

/// Aggregate attributes of one cluster of unit groups
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub region: String,
    pub technology: String,
    /// 1-based cluster label
    pub cluster: usize,
    /// Mean capacity of member unit groups
    pub cap_size: f64,
    pub minimum_load_mw: f64,
    pub heat_rate: f64,
    pub heat_rate_iqr: f64,
    pub heat_rate_std: Option<f64>,
    pub fixed_om_per_mw_yr: f64,
    pub fixed_om_std: Option<f64>,
    pub var_om_per_mwh: f64,
    pub min_power: f64,
    pub num_units: usize,
    pub plant_ids: Vec<i64>,
    pub unit_ids: Vec<String>,
}

/// Investment cost contribution of one transmission segment type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentCost {
    pub segment: String,
    pub miles: f64,
    pub capex: f64,
    pub inv_mw_yr: f64,
}

/// One row of the final resource table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    pub region: String,
    pub technology: String,
    pub cluster: usize,
    pub resource: String,
    pub cap_size: f64,
    pub existing_cap_mw: f64,
    pub existing_cap_mwh: Option<f64>,
    pub unmodified_cap_size: Option<f64>,
    pub unmodified_existing_cap_mw: Option<f64>,
    pub num_units: usize,
    pub min_power: f64,
    pub heat_rate: f64,
    pub heat_rate_iqr: Option<f64>,
    pub heat_rate_std: Option<f64>,
    pub fixed_om_per_mw_yr: f64,
    pub var_om_per_mwh: f64,
    pub inv_cost_per_mw_yr: f64,
    pub plant_inv_cost_per_mw_yr: Option<f64>,
    pub interconnect_annuity: Option<f64>,
    pub fuel: String,
    pub start_fuel_mmbtu_per_mw: f64,
    pub start_cost_per_mw: f64,
    pub capacity_factor: Option<f64>,
    pub variable_cf: f64,
    pub transmission: Vec<SegmentCost>,
    /// Model tag values in the order of `model_tag_names`
    pub tags: Vec<(String, f64)>,
    pub new_build: bool,
    pub r_id: usize,
}

impl Resource {
    /// A blank row for a region/technology; callers fill in the rest
    pub fn new(region: &str, technology: &str, cluster: usize) -> Self {
        Self {
            region: region.to_string(),
            technology: technology.to_string(),
            cluster,
            resource: snake_case(technology),
            cap_size: 0.0,
            existing_cap_mw: 0.0,
            existing_cap_mwh: None,
            unmodified_cap_size: None,
            unmodified_existing_cap_mw: None,
            num_units: 0,
            min_power: 0.0,
            heat_rate: 0.0,
            heat_rate_iqr: None,
            heat_rate_std: None,
            fixed_om_per_mw_yr: 0.0,
            var_om_per_mwh: 0.0,
            inv_cost_per_mw_yr: 0.0,
            plant_inv_cost_per_mw_yr: None,
            interconnect_annuity: None,
            fuel: "None".to_string(),
            start_fuel_mmbtu_per_mw: 0.0,
            start_cost_per_mw: 0.0,
            capacity_factor: None,
            variable_cf: 0.0,
            transmission: vec![],
            tags: vec![],
            new_build: false,
            r_id: 0,
        }
    }

    pub fn tag(&self, name: &str) -> Option<f64> {
        self.tags.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn set_tag(&mut self, name: &str, value: f64) {
        match self.tags.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.tags.push((name.to_string(), value)),
        }
    }

    pub fn segment_miles(&self, segment: &str) -> Option<f64> {
        self.transmission
            .iter()
            .find(|s| s.segment == segment)
            .map(|s| s.miles)
    }
}

/// Lowercase, underscore-separated version of a technology name
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_underscore = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

pub fn year_of(date: Option<NaiveDate>) -> Option<i32> {
    date.map(|d| d.year())
}
