use crate::geo::RegionShapes;
use crate::models::{AmendmentRecord, PlantLocation, PlantRegionRecord};
use crate::settings::{CapacityColumn, Settings};
use indexmap::IndexMap;
use log::{info, warn};
use std::collections::HashMap;

/// Model region for each plant id, in first-seen order
pub type PlantRegions = IndexMap<i64, String>;

/// Maps plants and coordinates to model regions
pub struct RegionAssigner<'a> {
    /// Raw region -> model region, restricted to the regions kept in the study
    mapping: IndexMap<String, String>,
    model_regions: Vec<String>,
    shapes: Option<&'a RegionShapes>,
}

impl<'a> RegionAssigner<'a> {
    pub fn new(settings: &Settings, shapes: Option<&'a RegionShapes>) -> Self {
        Self {
            mapping: settings.region_mapping(),
            model_regions: settings.model_regions.clone(),
            shapes,
        }
    }

    /// Model region for a raw region name, `None` when outside the study
    pub fn model_region(&self, raw_region: &str) -> Option<&str> {
        match self.mapping.get(raw_region) {
            Some(region) => Some(region.as_str()),
            None => self
                .model_regions
                .iter()
                .find(|r| *r == raw_region)
                .map(|r| r.as_str()),
        }
    }

    /// Model region containing a longitude/latitude point
    pub fn locate(&self, longitude: f64, latitude: f64) -> Option<String> {
        let raw = self.shapes?.locate(longitude, latitude)?;
        self.model_region(raw).map(str::to_string)
    }

    /// Build the plant -> model region map.
    ///
    /// The lookup table is applied first with any user overrides, then hydro
    /// plants the lookup table misses are placed by their coordinates.
    pub fn plant_regions(
        &self,
        lookup: &[PlantRegionRecord],
        overrides: &[PlantRegionRecord],
        hydro_capacity: &IndexMap<i64, f64>,
        locations: &[PlantLocation],
    ) -> PlantRegions {
        let override_map: HashMap<i64, &str> = overrides
            .iter()
            .map(|r| (r.plant_id, r.region.as_str()))
            .collect();

        let mut raw: IndexMap<i64, String> = IndexMap::new();
        for record in lookup {
            let region = override_map
                .get(&record.plant_id)
                .copied()
                .unwrap_or(record.region.as_str());
            raw.entry(record.plant_id).or_insert_with(|| region.to_string());
        }
        if !override_map.is_empty() {
            info!("Applied {} user plant region overrides", override_map.len());
        }

        self.place_hydro(&mut raw, hydro_capacity, locations);

        let (regions, dropped) = self.split_by_model_region(raw);
        if !dropped.is_empty() {
            warn!(
                "{} plants are in regions outside the model and were dropped: {:?}",
                dropped.len(),
                dropped
            );
        }
        regions
    }

    /// Label hydro plants missing from the lookup table by their coordinates.
    ///
    /// Returns the hydro plants left without a raw region.
    fn place_hydro(
        &self,
        raw: &mut IndexMap<i64, String>,
        hydro_capacity: &IndexMap<i64, f64>,
        locations: &[PlantLocation],
    ) -> Vec<i64> {
        let location_map: HashMap<i64, &PlantLocation> = locations.iter().map(|l| (l.plant_id, l)).collect();
        let mut missing_coords = Vec::new();
        let mut missing_capacity = 0.0;
        let mut unplaced = Vec::new();
        let mut unplaced_capacity = 0.0;
        let mut located = 0;

        for (plant_id, capacity) in hydro_capacity {
            if raw.contains_key(plant_id) {
                continue;
            }
            let coords = location_map
                .get(plant_id)
                .and_then(|l| Some((l.longitude?, l.latitude?)));
            let Some((lon, lat)) = coords else {
                missing_coords.push(*plant_id);
                missing_capacity += *capacity;
                continue;
            };
            match self.shapes.and_then(|shapes| shapes.locate(lon, lat)) {
                Some(region) => {
                    raw.insert(*plant_id, region.to_string());
                    located += 1;
                }
                None => {
                    unplaced.push(*plant_id);
                    unplaced_capacity += *capacity;
                }
            }
        }

        if located > 0 {
            info!("Labeled {} hydro plants by location", located);
        }
        if !missing_coords.is_empty() {
            warn!(
                "{} hydro plants ({} MW) have no lon/lat and were excluded: {:?}",
                missing_coords.len(),
                missing_capacity,
                missing_coords
            );
        }
        if !unplaced.is_empty() {
            warn!(
                "{} hydro plants ({} MW) could not be placed in a region polygon and were excluded: {:?}",
                unplaced.len(),
                unplaced_capacity,
                unplaced
            );
        }
        missing_coords.extend(unplaced);
        missing_coords
    }

    /// Split raw plant regions into model regions and the plants outside the model
    fn split_by_model_region(&self, raw: IndexMap<i64, String>) -> (PlantRegions, Vec<i64>) {
        let mut regions = PlantRegions::new();
        let mut dropped = Vec::new();
        for (plant_id, region) in raw {
            match self.model_region(&region) {
                Some(model_region) => {
                    regions.insert(plant_id, model_region.to_string());
                }
                None => dropped.push(plant_id),
            }
        }
        (regions, dropped)
    }

    /// Place amendment-file units into model regions by their coordinates
    pub fn locate_amendments(
        &self,
        records: &[AmendmentRecord],
        capacity_col: CapacityColumn,
    ) -> Vec<(AmendmentRecord, String)> {
        let (with_coords, without_coords): (Vec<_>, Vec<_>) = records
            .iter()
            .partition(|r| r.latitude.is_some() && r.longitude.is_some());

        if !without_coords.is_empty() {
            let capacity: f64 = without_coords
                .iter()
                .map(|r| capacity_col.of_amendment(r).unwrap_or(0.0))
                .sum();
            let authorities: Vec<&str> = without_coords
                .iter()
                .filter_map(|r| r.balancing_authority_code.as_deref())
                .collect();
            warn!(
                "Some generators do not have lon/lat data. The affected generators account \
                 for {} MW in balancing authorities: {:?}",
                capacity, authorities
            );
        }

        with_coords
            .into_iter()
            .filter_map(|record| {
                let (lon, lat) = (record.longitude?, record.latitude?);
                self.locate(lon, lat).map(|region| (record.clone(), region))
            })
            .collect()
    }
}
