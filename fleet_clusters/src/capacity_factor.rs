use crate::models::{GeneratorSnapshot, PlantGenerationRecord, Resource};
use crate::regions::PlantRegions;
use crate::settings::Settings;
use chrono::Datelike;
use indexmap::IndexMap;
use log::{info, warn};
use std::collections::HashMap;

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Hours in a calendar year
pub fn hours_in_year(year: i32) -> f64 {
    if is_leap_year(year) {
        8784.0
    } else {
        8760.0
    }
}

/// Capacity factor per (model region, technology)
pub type CapacityFactors = IndexMap<(String, String), f64>;

/// Historical capacity factors for the configured technologies.
///
/// Sum of net generation over the sum of capacity times hours, across every
/// (plant, year) that has both a snapshot and generation records. Years are
/// limited by the technology's year filter when one is set.
pub fn capacity_factors(
    settings: &Settings,
    snapshots: &[GeneratorSnapshot],
    plant_regions: &PlantRegions,
    generation: &[PlantGenerationRecord],
) -> CapacityFactors {
    let in_years = |tech: &str, year: i32| {
        settings
            .capacity_factor_years(tech)
            .map_or(true, |years| years.contains(&year))
    };

    let mut capacity: IndexMap<(i64, i32, String), f64> = IndexMap::new();
    for row in snapshots {
        let Some(tech) = row.technology_description.as_deref() else {
            continue;
        };
        let year = row.report_date.year();
        if !settings.capacity_factor_techs.iter().any(|t| t == tech) || !in_years(tech, year) {
            continue;
        }
        *capacity.entry((row.plant_id, year, tech.to_string())).or_insert(0.0) +=
            settings.capacity_col.of_snapshot(row).unwrap_or(0.0);
    }

    let mut net_generation: HashMap<(i64, i32, &str), f64> = HashMap::new();
    for record in generation {
        *net_generation
            .entry((record.plant_id, record.year, record.technology.as_str()))
            .or_insert(0.0) += record.net_generation_mwh;
    }

    let mut totals: IndexMap<(String, String), (f64, f64)> = IndexMap::new();
    let mut unmatched = 0;
    for ((plant_id, year, tech), cap) in &capacity {
        let Some(region) = plant_regions.get(plant_id) else {
            continue;
        };
        match net_generation.get(&(*plant_id, *year, tech.as_str())) {
            Some(gen) => {
                let entry = totals.entry((region.clone(), tech.clone())).or_insert((0.0, 0.0));
                entry.0 += gen;
                entry.1 += cap * hours_in_year(*year);
            }
            None => unmatched += 1,
        }
    }
    if unmatched > 0 {
        warn!(
            "{} plant-years have capacity but no generation records and were left out of capacity factors",
            unmatched
        );
    }

    let factors: CapacityFactors = totals
        .into_iter()
        .filter(|(_, (_, potential))| *potential > 0.0)
        .map(|(key, (gen, potential))| (key, gen / potential))
        .collect();
    info!("Calculated {} regional capacity factors", factors.len());
    factors
}

/// Attach capacity factors to resources by region and technology
pub fn apply_capacity_factors(resources: &mut [Resource], factors: &CapacityFactors) {
    for resource in resources.iter_mut() {
        let key = (resource.region.clone(), resource.technology.clone());
        if let Some(cf) = factors.get(&key) {
            resource.capacity_factor = Some(*cf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SAMPLE_SETTINGS;
    use chrono::NaiveDate;

    fn snapshot(plant_id: i64, year: i32, tech: &str, cap: f64) -> GeneratorSnapshot {
        GeneratorSnapshot {
            plant_id,
            generator_id: "1".into(),
            report_date: NaiveDate::from_ymd_opt(year, 1, 1).unwrap(),
            capacity_mw: Some(cap + 10.0),
            summer_capacity_mw: Some(cap),
            winter_capacity_mw: None,
            minimum_load_mw: None,
            technology_description: Some(tech.to_string()),
            energy_source_code_1: None,
            operational_status_code: Some("OP".into()),
            planned_retirement_date: None,
        }
    }

    fn gen(plant_id: i64, year: i32, tech: &str, mwh: f64) -> PlantGenerationRecord {
        PlantGenerationRecord {
            plant_id,
            year,
            technology: tech.to_string(),
            net_generation_mwh: mwh,
        }
    }

    #[test]
    fn test_hours_in_year() {
        assert_eq!(hours_in_year(2019), 8760.0);
        assert_eq!(hours_in_year(2020), 8784.0);
        assert_eq!(hours_in_year(1900), 8760.0);
        assert_eq!(hours_in_year(2000), 8784.0);
    }

    #[test]
    fn test_capacity_factor_over_filtered_years() {
        let text = format!(
            "{}capacity_factor_techs: [Onshore Wind Turbine]\ncapacity_factor_default_year_filter: [2019]\n",
            SAMPLE_SETTINGS
        );
        let settings = Settings::from_yaml_str(&text).unwrap();
        let regions: PlantRegions = [(1, "east".to_string()), (2, "east".to_string())].into_iter().collect();
        let snapshots = vec![
            snapshot(1, 2019, "Onshore Wind Turbine", 100.0),
            snapshot(2, 2019, "Onshore Wind Turbine", 100.0),
            snapshot(1, 2020, "Onshore Wind Turbine", 100.0),
            snapshot(3, 2019, "Conventional Steam Coal", 100.0),
        ];
        let generation = vec![
            gen(1, 2019, "Onshore Wind Turbine", 262_800.0),
            gen(2, 2019, "Onshore Wind Turbine", 350_400.0),
            gen(1, 2020, "Onshore Wind Turbine", 800_000.0),
        ];
        let factors = capacity_factors(&settings, &snapshots, &regions, &generation);
        let cf = factors[&("east".to_string(), "Onshore Wind Turbine".to_string())];
        assert!((cf - 0.35).abs() < 1e-12);
        assert_eq!(factors.len(), 1);
    }

    #[test]
    fn test_apply_capacity_factors() {
        let mut factors = CapacityFactors::new();
        factors.insert(("east".into(), "Solar Photovoltaic".into()), 0.25);
        let mut resources = vec![
            Resource::new("east", "Solar Photovoltaic", 1),
            Resource::new("west", "Solar Photovoltaic", 1),
        ];
        apply_capacity_factors(&mut resources, &factors);
        assert_eq!(resources[0].capacity_factor, Some(0.25));
        assert_eq!(resources[1].capacity_factor, None);
    }
}
