//! Reconciliation of generator snapshots, entity metadata and amendment sheets
//! into one unit-level table.

use crate::error::{ClusterError, ClusterResult};
use crate::models::{
    plant_gen_id, year_of, AmendmentRecord, AmendmentTables, BoilerGeneratorAssociation, GenerationFuelRecord,
    GeneratorEntity, GeneratorSnapshot, UnitRecord, UnitSource,
};
use crate::regions::{PlantRegions, RegionAssigner};
use crate::settings::Settings;
use chrono::Datelike;
use indexmap::IndexMap;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};

pub const COMBINED_CYCLE: &str = "Natural Gas Fired Combined Cycle";
pub const CONVENTIONAL_HYDRO: &str = "Conventional Hydroelectric";
pub const SMALL_HYDRO: &str = "Small Hydroelectric";

/// Heat rate assumed for new units without a configured value
pub const DEFAULT_PROPOSED_HEAT_RATE: f64 = 9.21;

/// Operating status codes that never count as part of the fleet
const EXCLUDED_STATUS: [&str; 4] = ["RE", "OS", "IP", "CN"];

/// Relative tolerance used when comparing capacity totals
const CAPACITY_TOLERANCE: f64 = 1e-9;

pub fn capacity_matches(a: f64, b: f64) -> bool {
    (a - b).abs() <= CAPACITY_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

fn total_capacity(units: &[UnitRecord]) -> f64 {
    units.iter().map(UnitRecord::capacity).sum()
}

/// Back-fill missing technology descriptions within each generator's history.
///
/// Rows are ordered by report date; a missing label takes the next later label
/// for the same (plant, generator). Rows that cannot be filled are kept.
pub fn fill_missing_technology(
    mut snapshots: Vec<GeneratorSnapshot>,
) -> ClusterResult<Vec<GeneratorSnapshot>> {
    let start_len = snapshots.len();
    snapshots.sort_by(|a, b| a.report_date.cmp(&b.report_date));

    let mut next_label: HashMap<(i64, String), String> = HashMap::new();
    for row in snapshots.iter_mut().rev() {
        let key = (row.plant_id, row.generator_id.clone());
        match &row.technology_description {
            Some(tech) => {
                next_label.insert(key, tech.clone());
            }
            None => row.technology_description = next_label.get(&key).cloned(),
        }
    }

    let unfilled: Vec<String> = snapshots
        .iter()
        .filter(|r| r.technology_description.is_none())
        .map(|r| plant_gen_id(r.plant_id, &r.generator_id))
        .collect();
    if !unfilled.is_empty() {
        warn!("Failed to fill some technology names: {:?}", unfilled);
    }

    if snapshots.len() != start_len {
        return Err(ClusterError::invariant(
            "fill_missing_technology",
            format!("{} rows became {}", start_len, snapshots.len()),
        ));
    }
    Ok(snapshots)
}

/// Remove units listed in an amendment sheet, checking that nothing is lost
pub fn remove_listed(
    units: Vec<UnitRecord>,
    listed: &[AmendmentRecord],
    step: &str,
) -> ClusterResult<Vec<UnitRecord>> {
    let listed_ids: HashSet<String> = listed
        .iter()
        .map(|r| plant_gen_id(r.plant_id, &r.generator_id))
        .collect();

    let start_len = units.len();
    let start_capacity = total_capacity(&units);
    let (removed, kept): (Vec<_>, Vec<_>) = units
        .into_iter()
        .partition(|u| listed_ids.contains(&u.plant_gen_id()));

    let removed_capacity = total_capacity(&removed);
    let kept_capacity = total_capacity(&kept);
    if start_len != removed.len() + kept.len() {
        return Err(ClusterError::invariant(
            step,
            format!("{} units became {} removed + {} kept", start_len, removed.len(), kept.len()),
        ));
    }
    if !capacity_matches(start_capacity, removed_capacity + kept_capacity) {
        return Err(ClusterError::invariant(
            step,
            format!(
                "{} MW became {} MW removed + {} MW kept",
                start_capacity, removed_capacity, kept_capacity
            ),
        ));
    }
    if !removed.is_empty() {
        info!(
            "{}: removed {} units totaling {:.1} MW",
            step,
            removed.len(),
            removed_capacity
        );
    }
    Ok(kept)
}

/// Set prime movers of combined-cycle pieces to CC where the plant has
/// combined-cycle units without a shared unit id. Single-shaft (CS) units are
/// left untouched.
pub fn normalize_combined_cycle(units: &mut [UnitRecord], fuel: &mut [GenerationFuelRecord]) {
    let plants: HashSet<i64> = units
        .iter()
        .filter(|u| u.technology_is(COMBINED_CYCLE) && !u.has_explicit_unit_id)
        .map(|u| u.plant_id)
        .collect();
    if plants.is_empty() {
        return;
    }

    let is_cc_piece = |code: &str| code == "CA" || code == "CT";
    let mut changed = 0;
    for unit in units.iter_mut().filter(|u| plants.contains(&u.plant_id)) {
        if unit.prime_mover_code.as_deref().map_or(false, is_cc_piece) {
            unit.prime_mover_code = Some("CC".to_string());
            changed += 1;
        }
    }
    for record in fuel.iter_mut().filter(|r| plants.contains(&r.plant_id)) {
        if is_cc_piece(&record.prime_mover_code) {
            record.prime_mover_code = "CC".to_string();
        }
    }
    debug!(
        "Changed {} generator prime movers to CC at {} plants",
        changed,
        plants.len()
    );
}

/// Builds the reconciled unit table
pub struct FleetReconciler<'a> {
    settings: &'a Settings,
}

impl<'a> FleetReconciler<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Most recent in-service snapshot row per generator within the data years
    pub fn current_snapshots(&self, snapshots: &[GeneratorSnapshot]) -> Vec<GeneratorSnapshot> {
        let mut latest: IndexMap<(i64, String), &GeneratorSnapshot> = IndexMap::new();
        for row in snapshots {
            if !self.settings.data_years.contains(&row.report_date.year()) {
                continue;
            }
            let status = row.operational_status_code.as_deref().unwrap_or("");
            if EXCLUDED_STATUS.contains(&status) {
                continue;
            }
            let key = (row.plant_id, row.generator_id.clone());
            match latest.get(&key) {
                Some(existing) if existing.report_date >= row.report_date => {}
                _ => {
                    latest.insert(key, row);
                }
            }
        }
        latest.into_values().cloned().collect()
    }

    /// Join snapshots with plant regions, entity data and unit ids.
    ///
    /// Generators without an entity record are dropped. Missing seasonal
    /// capacity is set to nameplate only when every generator in the unit is
    /// missing it.
    pub fn merge_unit_metadata(
        &self,
        snapshots: &[GeneratorSnapshot],
        plant_regions: &PlantRegions,
        entities: &[GeneratorEntity],
        associations: &[BoilerGeneratorAssociation],
    ) -> Vec<UnitRecord> {
        let cap_col = self.settings.capacity_col;
        let entity_map: HashMap<(i64, &str), &GeneratorEntity> = entities
            .iter()
            .map(|e| ((e.plant_id, e.generator_id.as_str()), e))
            .collect();
        let mut unit_map: HashMap<(i64, &str), &str> = HashMap::new();
        for bga in associations {
            if let Some(unit_id) = bga.unit_id_pudl.as_deref() {
                unit_map
                    .entry((bga.plant_id, bga.generator_id.as_str()))
                    .or_insert(unit_id);
            }
        }

        let in_regions: Vec<&GeneratorSnapshot> = snapshots
            .iter()
            .filter(|s| plant_regions.contains_key(&s.plant_id))
            .collect();
        let initial_capacity = capacity_by_technology(
            in_regions
                .iter()
                .map(|s| (s.technology_description.as_deref(), cap_col.of_snapshot(s))),
        );

        let mut units = Vec::with_capacity(in_regions.len());
        let mut no_entity = Vec::new();
        for snapshot in in_regions {
            let key = (snapshot.plant_id, snapshot.generator_id.as_str());
            let Some(entity) = entity_map.get(&key) else {
                no_entity.push(plant_gen_id(snapshot.plant_id, &snapshot.generator_id));
                continue;
            };
            let explicit_unit = unit_map.get(&key).map(|u| u.to_string());
            units.push(UnitRecord {
                plant_id: snapshot.plant_id,
                generator_id: snapshot.generator_id.clone(),
                unit_id: explicit_unit
                    .clone()
                    .unwrap_or_else(|| plant_gen_id(snapshot.plant_id, &snapshot.generator_id)),
                has_explicit_unit_id: explicit_unit.is_some(),
                model_region: plant_regions[&snapshot.plant_id].clone(),
                technology: snapshot.technology_description.clone(),
                prime_mover_code: entity.prime_mover_code.clone(),
                energy_source_code: snapshot.energy_source_code_1.clone(),
                capacity_mw: cap_col.of_snapshot(snapshot),
                nameplate_mw: snapshot.capacity_mw,
                minimum_load_mw: snapshot.minimum_load_mw,
                operating_year: year_of(entity.operating_date),
                planned_retirement_year: year_of(snapshot.planned_retirement_date),
                retirement_year: None,
                operational_status_code: snapshot.operational_status_code.clone(),
                heat_rate: None,
                fixed_om_per_mw_yr: None,
                var_om_per_mwh: None,
                source: UnitSource::Snapshot,
            });
        }
        if !no_entity.is_empty() {
            info!(
                "{} generators without entity records were dropped: {:?}",
                no_entity.len(),
                no_entity
            );
        }

        fill_seasonal_capacity(&mut units);

        let merged_capacity = capacity_by_technology(
            units
                .iter()
                .map(|u| (u.technology.as_deref(), u.capacity_mw)),
        );
        let initial_total: f64 = initial_capacity.values().sum();
        let merged_total: f64 = merged_capacity.values().sum();
        if !capacity_matches(initial_total, merged_total) {
            for (tech, before) in &initial_capacity {
                let after = merged_capacity.get(tech).copied().unwrap_or(0.0);
                if !capacity_matches(*before, after) {
                    warn!(
                        "Adding entity/unit data and filling seasonal capacity changed {} \
                         capacity from {} MW to {} MW",
                        tech, before, after
                    );
                }
            }
        }

        units
    }

    /// Retirement year from lifetime, planned retirement, then settings overrides
    pub fn label_retirement_year(&self, units: &mut [UnitRecord], apply_overrides: bool) {
        for unit in units.iter_mut() {
            if let Some(life) = unit
                .technology
                .as_ref()
                .and_then(|t| self.settings.retirement_ages.get(t))
            {
                unit.retirement_year = unit.operating_year.map(|y| y + life);
            }
            if let Some(planned) = unit.planned_retirement_year {
                unit.retirement_year = Some(planned);
            }
        }

        let additional = &self.settings.additional_retirements;
        if !apply_overrides || additional.is_empty() {
            info!("No retirement dates changed based on the settings file");
            return;
        }

        let model_year = self.settings.model_year;
        let retiring = |units: &[UnitRecord]| -> f64 {
            units
                .iter()
                .filter(|u| u.is_retired_by(model_year))
                .map(UnitRecord::capacity)
                .sum()
        };
        let start_ret_cap = retiring(units);
        info!("Starting retirement capacity is {} MW", start_ret_cap);

        let mut changed_cap = 0.0;
        for record in additional {
            for unit in units
                .iter_mut()
                .filter(|u| u.plant_id == record.0 && u.generator_id == record.1)
            {
                unit.retirement_year = Some(record.2);
                changed_cap += unit.capacity();
            }
        }

        let end_ret_cap = retiring(units);
        info!("Ending retirement capacity is {} MW", end_ret_cap);
        if end_ret_cap <= start_ret_cap {
            debug!("Adding retirements from settings didn't change the retiring capacity");
        }
        info!(
            "The retirement year for {} generators, totaling {} MW, was changed based on settings",
            additional.len(),
            changed_cap
        );
    }

    /// Relabel hydro plants at or below the small hydro threshold
    pub fn label_small_hydro(&self, units: &mut [UnitRecord]) -> ClusterResult<()> {
        if !self.settings.small_hydro {
            return Ok(());
        }
        let regions = &self.settings.small_hydro_regions;
        let start_len = units.len();
        let hydro_capacity = |units: &[UnitRecord], tech: &str| -> f64 {
            units
                .iter()
                .filter(|u| u.technology_is(tech))
                .map(UnitRecord::capacity)
                .sum()
        };
        let start_hydro = hydro_capacity(units, CONVENTIONAL_HYDRO);

        let mut plant_capacity: IndexMap<i64, f64> = IndexMap::new();
        for unit in units
            .iter()
            .filter(|u| u.technology_is(CONVENTIONAL_HYDRO) && regions.contains(&u.model_region))
        {
            *plant_capacity.entry(unit.plant_id).or_insert(0.0) += unit.capacity();
        }
        let small_plants: HashSet<i64> = plant_capacity
            .into_iter()
            .filter(|(_, cap)| *cap <= self.settings.small_hydro_mw)
            .map(|(plant, _)| plant)
            .collect();

        for unit in units
            .iter_mut()
            .filter(|u| u.technology_is(CONVENTIONAL_HYDRO) && small_plants.contains(&u.plant_id))
        {
            unit.technology = Some(SMALL_HYDRO.to_string());
        }

        let small = hydro_capacity(units, SMALL_HYDRO);
        let conventional = hydro_capacity(units, CONVENTIONAL_HYDRO);
        if units.len() != start_len || !capacity_matches(start_hydro, small + conventional) {
            return Err(ClusterError::invariant(
                "label_small_hydro",
                format!(
                    "{} MW hydro became {} MW small + {} MW conventional",
                    start_hydro, small, conventional
                ),
            ));
        }
        info!(
            "Labeled {} plants ({} MW) as small hydro",
            small_plants.len(),
            small
        );
        Ok(())
    }

    /// Rename technologies to their configured group
    pub fn group_technologies(&self, units: &mut [UnitRecord]) {
        if !self.settings.group_technologies {
            return;
        }
        for unit in units.iter_mut() {
            let Some(tech) = unit.technology.clone() else {
                continue;
            };
            let opted_out = self
                .settings
                .regional_no_grouping
                .get(&unit.model_region)
                .map_or(false, |techs| techs.contains(&tech));
            if opted_out {
                continue;
            }
            if let Some((group, _)) = self
                .settings
                .tech_groups
                .iter()
                .find(|(_, members)| members.contains(&tech))
            {
                unit.technology = Some(group.clone());
            }
        }
    }

    /// Snapshot units through every reconciliation step up to heat rates
    pub fn reconcile(
        &self,
        snapshots: &[GeneratorSnapshot],
        plant_regions: &PlantRegions,
        entities: &[GeneratorEntity],
        associations: &[BoilerGeneratorAssociation],
        amendments: &AmendmentTables,
    ) -> ClusterResult<Vec<UnitRecord>> {
        let current = self.current_snapshots(snapshots);
        let mut units = self.merge_unit_metadata(&current, plant_regions, entities, associations);
        info!(
            "Merged {} generators with {:.1} MW capacity",
            units.len(),
            total_capacity(&units)
        );

        units = remove_listed(units, &amendments.canceled, "remove_canceled")?;
        units = remove_listed(units, &amendments.retired, "remove_retired")?;
        self.label_retirement_year(&mut units, true);
        self.label_small_hydro(&mut units)?;
        self.group_technologies(&mut units);

        let mut seen = HashSet::new();
        units.retain(|u| seen.insert(u.plant_gen_id()));
        Ok(units)
    }

    fn unit_from_amendment(&self, record: &AmendmentRecord, region: String, source: UnitSource) -> UnitRecord {
        let capacity = self.settings.capacity_col.of_amendment(record);
        let technology = record.technology_description.clone();
        let heat_rate = technology
            .as_ref()
            .and_then(|t| self.settings.proposed_gen_heat_rates.get(t))
            .copied()
            .unwrap_or(DEFAULT_PROPOSED_HEAT_RATE);
        // Anything else built at scale is assumed to have no minimum load
        let minimum_load = technology
            .as_ref()
            .and_then(|t| self.settings.proposed_min_load.get(t))
            .and_then(|fraction| capacity.map(|c| fraction * c))
            .unwrap_or(0.0);

        UnitRecord {
            plant_id: record.plant_id,
            generator_id: record.generator_id.clone(),
            unit_id: plant_gen_id(record.plant_id, &record.generator_id),
            has_explicit_unit_id: false,
            model_region: region,
            technology,
            prime_mover_code: record.prime_mover_code.clone(),
            energy_source_code: record.energy_source_code_1.clone(),
            capacity_mw: capacity,
            nameplate_mw: record.capacity_mw,
            minimum_load_mw: Some(minimum_load),
            operating_year: record.operating_year,
            planned_retirement_year: None,
            retirement_year: None,
            operational_status_code: record.operational_status_code.clone(),
            heat_rate: Some(heat_rate),
            fixed_om_per_mw_yr: None,
            var_om_per_mwh: None,
            source,
        }
    }

    fn finish_amendment_units(&self, units: &mut Vec<UnitRecord>, label: &str) {
        let missing: Vec<i64> = units
            .iter()
            .filter(|u| u.technology.is_none())
            .map(|u| u.plant_id)
            .collect();
        if !missing.is_empty() {
            let capacity: f64 = units
                .iter()
                .filter(|u| u.technology.is_none())
                .map(UnitRecord::capacity)
                .sum();
            warn!(
                "{} {} generator(s) have no technology description. The plant IDs are {:?}, \
                 with a combined capacity of {} MW",
                missing.len(),
                label,
                missing,
                capacity
            );
        }
        self.label_retirement_year(units, false);
        self.group_technologies(units);
    }

    /// Operating units in the amendment sheet that the snapshot does not have
    pub fn import_new_operating(
        &self,
        operating: &[AmendmentRecord],
        existing: &[UnitRecord],
        assigner: &RegionAssigner,
    ) -> Vec<UnitRecord> {
        let known: HashSet<(i64, &str)> = existing
            .iter()
            .map(|u| (u.plant_id, u.generator_id.as_str()))
            .collect();
        let new_records: Vec<AmendmentRecord> = operating
            .iter()
            .filter(|r| !known.contains(&(r.plant_id, r.generator_id.as_str())))
            .cloned()
            .collect();

        let mut units: Vec<UnitRecord> = assigner
            .locate_amendments(&new_records, self.settings.capacity_col)
            .into_iter()
            .map(|(record, region)| self.unit_from_amendment(&record, region, UnitSource::NewOperating))
            .collect();
        self.finish_amendment_units(&mut units, "operating");
        units
    }

    /// Planned units from the amendment sheet plus settings-listed additions
    pub fn import_planned(
        &self,
        planned: &[AmendmentRecord],
        assigner: &RegionAssigner,
    ) -> Vec<UnitRecord> {
        let statuses = &self.settings.proposed_status_included;
        let included: Vec<AmendmentRecord> = planned
            .iter()
            .filter(|r| {
                statuses.is_empty()
                    || r.operational_status_code
                        .as_ref()
                        .map_or(false, |s| statuses.contains(s))
            })
            .cloned()
            .collect();

        let mut located = assigner.locate_amendments(&included, self.settings.capacity_col);
        for extra in &self.settings.additional_planned {
            let matches = planned
                .iter()
                .filter(|r| r.plant_id == extra.0 && r.generator_id == extra.1);
            for record in matches {
                located.push((record.clone(), extra.2.clone()));
            }
        }
        info!(
            "{} generators were added to the planned list based on settings",
            self.settings.additional_planned.len()
        );

        let mut units: Vec<UnitRecord> = located
            .into_iter()
            .map(|(record, region)| self.unit_from_amendment(&record, region, UnitSource::Planned))
            .collect();
        self.finish_amendment_units(&mut units, "proposed");
        info!("{:.1} MW proposed", total_capacity(&units));
        units
    }
}

/// Fill missing seasonal capacity from nameplate when a whole unit is missing it
fn fill_seasonal_capacity(units: &mut [UnitRecord]) {
    let mut unit_has_value: HashMap<(i64, String), bool> = HashMap::new();
    for unit in units.iter() {
        let entry = unit_has_value
            .entry((unit.plant_id, unit.unit_id.clone()))
            .or_insert(false);
        *entry |= unit.capacity_mw.is_some();
    }
    for unit in units.iter_mut().filter(|u| u.capacity_mw.is_none()) {
        if !unit_has_value[&(unit.plant_id, unit.unit_id.clone())] {
            unit.capacity_mw = unit.nameplate_mw;
        }
    }
}

fn capacity_by_technology<'b>(
    rows: impl Iterator<Item = (Option<&'b str>, Option<f64>)>,
) -> IndexMap<String, f64> {
    let mut totals = IndexMap::new();
    for (tech, capacity) in rows {
        let key = tech.unwrap_or("unknown").to_string();
        *totals.entry(key).or_insert(0.0) += capacity.unwrap_or(0.0);
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SAMPLE_SETTINGS;
    use crate::test_support::unit;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    fn snapshot(plant_id: i64, gen: &str, year: i32, tech: Option<&str>, cap: f64) -> GeneratorSnapshot {
        GeneratorSnapshot {
            plant_id,
            generator_id: gen.to_string(),
            report_date: date(year, 1),
            capacity_mw: Some(cap),
            summer_capacity_mw: Some(cap * 0.9),
            winter_capacity_mw: Some(cap),
            minimum_load_mw: Some(cap * 0.3),
            technology_description: tech.map(str::to_string),
            energy_source_code_1: Some("BIT".to_string()),
            operational_status_code: Some("OP".to_string()),
            planned_retirement_date: None,
        }
    }

    fn entity(plant_id: i64, gen: &str, pm: &str, year: i32) -> GeneratorEntity {
        GeneratorEntity {
            plant_id,
            generator_id: gen.to_string(),
            prime_mover_code: Some(pm.to_string()),
            operating_date: Some(date(year, 6)),
        }
    }

    fn amendment(plant_id: i64, gen: &str) -> AmendmentRecord {
        AmendmentRecord {
            plant_id,
            generator_id: gen.to_string(),
            ..Default::default()
        }
    }

    fn settings() -> Settings {
        Settings::from_yaml_str(SAMPLE_SETTINGS).unwrap()
    }

    #[test]
    fn test_fill_missing_technology_backfills_from_later_records() {
        let rows = vec![
            snapshot(1, "1", 2020, Some("Conventional Steam Coal"), 100.0),
            snapshot(1, "1", 2012, None, 100.0),
            snapshot(2, "A", 2012, None, 50.0),
        ];
        let filled = fill_missing_technology(rows).unwrap();
        assert_eq!(filled.len(), 3);
        let early = filled
            .iter()
            .find(|r| r.plant_id == 1 && r.report_date.year() == 2012)
            .unwrap();
        assert_eq!(early.technology_description.as_deref(), Some("Conventional Steam Coal"));
        let unfilled = filled.iter().find(|r| r.plant_id == 2).unwrap();
        assert_eq!(unfilled.technology_description, None);
    }

    #[test]
    fn test_remove_listed_conserves_capacity() {
        let units = vec![
            unit(1, "1", "Conventional Steam Coal", 100.0),
            unit(1, "2", "Conventional Steam Coal", 150.0),
            unit(2, "1", "Onshore Wind Turbine", 75.5),
        ];
        let before = total_capacity(&units);
        let canceled = vec![amendment(1, "2"), amendment(9, "9")];
        let kept = remove_listed(units, &canceled, "remove_canceled").unwrap();
        assert_eq!(kept.len(), 2);
        assert!(capacity_matches(before, total_capacity(&kept) + 150.0));
        assert!(kept.iter().all(|u| u.plant_gen_id() != "1_2"));
    }

    #[test]
    fn test_merge_drops_units_without_entity_and_synthesizes_unit_ids() {
        let settings = settings();
        let reconciler = FleetReconciler::new(&settings);
        let plant_regions: PlantRegions = [(1, "east".to_string()), (2, "west".to_string())].into_iter().collect();
        let snapshots = vec![
            snapshot(1, "1", 2020, Some("Conventional Steam Coal"), 100.0),
            snapshot(1, "2", 2020, Some("Conventional Steam Coal"), 100.0),
            snapshot(2, "1", 2020, Some("Conventional Steam Coal"), 100.0),
            snapshot(3, "1", 2020, Some("Conventional Steam Coal"), 100.0),
        ];
        let entities = vec![entity(1, "1", "ST", 1980), entity(1, "2", "ST", 1985)];
        let associations = vec![BoilerGeneratorAssociation {
            plant_id: 1,
            generator_id: "1".to_string(),
            boiler_id: Some("B1".to_string()),
            unit_id_eia: None,
            unit_id_pudl: Some("U1".to_string()),
        }];
        let units = reconciler.merge_unit_metadata(&snapshots, &plant_regions, &entities, &associations);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].unit_id, "U1");
        assert!(units[0].has_explicit_unit_id);
        assert_eq!(units[1].unit_id, "1_2");
        assert!(!units[1].has_explicit_unit_id);
        // Sample settings use summer capacity
        assert!((units[0].capacity() - 90.0).abs() < 1e-9);
        assert_eq!(units[0].operating_year, Some(1980));
    }

    #[test]
    fn test_seasonal_capacity_filled_only_for_whole_units() {
        let mut a = unit(1, "1", "Conventional Steam Coal", 100.0);
        a.unit_id = "U1".into();
        a.capacity_mw = None;
        a.nameplate_mw = Some(110.0);
        let mut b = unit(1, "2", "Conventional Steam Coal", 100.0);
        b.unit_id = "U1".into();
        let mut c = unit(1, "3", "Conventional Steam Coal", 100.0);
        c.unit_id = "U2".into();
        c.capacity_mw = None;
        c.nameplate_mw = Some(120.0);
        let mut units = vec![a, b, c];
        fill_seasonal_capacity(&mut units);
        assert_eq!(units[0].capacity_mw, None);
        assert_eq!(units[2].capacity_mw, Some(120.0));
    }

    #[test]
    fn test_retirement_year_labels() {
        let settings = settings();
        let reconciler = FleetReconciler::new(&settings);
        let mut by_age = unit(5, "1", "Conventional Steam Coal", 100.0);
        by_age.operating_year = Some(1960);
        let mut planned = unit(5, "2", "Conventional Steam Coal", 100.0);
        planned.operating_year = Some(1990);
        planned.planned_retirement_year = Some(2028);
        let mut forced = unit(10, "1", "Natural Gas Fired Combined Cycle", 300.0);
        forced.operating_year = Some(2010);
        let mut no_age = unit(6, "1", "Onshore Wind Turbine", 50.0);
        no_age.operating_year = Some(2015);

        let mut units = vec![by_age, planned, forced, no_age];
        reconciler.label_retirement_year(&mut units, true);
        assert_eq!(units[0].retirement_year, Some(2020));
        assert_eq!(units[1].retirement_year, Some(2028));
        assert_eq!(units[2].retirement_year, Some(2025));
        assert_eq!(units[3].retirement_year, None);

        let mut units_no_override = vec![units[2].clone()];
        reconciler.label_retirement_year(&mut units_no_override, false);
        assert_eq!(units_no_override[0].retirement_year, Some(2050));
    }

    #[test]
    fn test_small_hydro_relabel_preserves_capacity() {
        let text = format!("{}\nsmall_hydro: true\nsmall_hydro_mw: 30\nsmall_hydro_regions: [east]\n", SAMPLE_SETTINGS);
        let settings = Settings::from_yaml_str(&text).unwrap();
        let reconciler = FleetReconciler::new(&settings);
        let mut west_small = unit(3, "1", CONVENTIONAL_HYDRO, 10.0);
        west_small.model_region = "west".into();
        let mut units = vec![
            unit(1, "1", CONVENTIONAL_HYDRO, 10.0),
            unit(1, "2", CONVENTIONAL_HYDRO, 15.0),
            unit(2, "1", CONVENTIONAL_HYDRO, 40.0),
            west_small,
        ];
        reconciler.label_small_hydro(&mut units).unwrap();
        assert!(units[0].technology_is(SMALL_HYDRO));
        assert!(units[1].technology_is(SMALL_HYDRO));
        assert!(units[2].technology_is(CONVENTIONAL_HYDRO));
        assert!(units[3].technology_is(CONVENTIONAL_HYDRO));
    }

    #[test]
    fn test_group_technologies_respects_regional_opt_out() {
        let text = format!(
            "{}\ngroup_technologies: true\ntech_groups:\n  Biomass: [Wood/Wood Waste Biomass, Landfill Gas]\nregional_no_grouping:\n  west: [Landfill Gas]\n",
            SAMPLE_SETTINGS
        );
        let settings = Settings::from_yaml_str(&text).unwrap();
        let reconciler = FleetReconciler::new(&settings);
        let mut west = unit(2, "1", "Landfill Gas", 5.0);
        west.model_region = "west".into();
        let mut units = vec![
            unit(1, "1", "Wood/Wood Waste Biomass", 20.0),
            unit(1, "2", "Landfill Gas", 5.0),
            west,
        ];
        reconciler.group_technologies(&mut units);
        assert!(units[0].technology_is("Biomass"));
        assert!(units[1].technology_is("Biomass"));
        assert!(units[2].technology_is("Landfill Gas"));
    }

    #[test]
    fn test_combined_cycle_prime_movers() {
        let mut ct = unit(7, "1", COMBINED_CYCLE, 150.0);
        ct.prime_mover_code = Some("CT".into());
        let mut ca = unit(7, "2", COMBINED_CYCLE, 80.0);
        ca.prime_mover_code = Some("CA".into());
        let mut cs = unit(8, "1", COMBINED_CYCLE, 200.0);
        cs.prime_mover_code = Some("CS".into());
        let mut explicit = unit(9, "1", COMBINED_CYCLE, 200.0);
        explicit.prime_mover_code = Some("CT".into());
        explicit.has_explicit_unit_id = true;
        let mut units = vec![ct, ca, cs, explicit];
        let mut fuel = vec![GenerationFuelRecord {
            plant_id: 7,
            prime_mover_code: "CT".into(),
            fuel_type: "NG".into(),
            fuel_consumed_mmbtu: 1000.0,
            net_generation_mwh: 140.0,
            report_date: date(2020, 1),
        }];
        normalize_combined_cycle(&mut units, &mut fuel);
        assert_eq!(units[0].prime_mover_code.as_deref(), Some("CC"));
        assert_eq!(units[1].prime_mover_code.as_deref(), Some("CC"));
        assert_eq!(units[2].prime_mover_code.as_deref(), Some("CS"));
        assert_eq!(units[3].prime_mover_code.as_deref(), Some("CT"));
        assert_eq!(fuel[0].prime_mover_code, "CC");
    }

    #[test]
    fn test_reconcile_removes_canceled_and_retired() {
        let settings = settings();
        let reconciler = FleetReconciler::new(&settings);
        let plant_regions: PlantRegions = [(1, "east".to_string())].into_iter().collect();
        let snapshots = vec![
            snapshot(1, "1", 2020, Some("Conventional Steam Coal"), 100.0),
            snapshot(1, "2", 2020, Some("Conventional Steam Coal"), 100.0),
            snapshot(1, "3", 2020, Some("Conventional Steam Coal"), 100.0),
            snapshot(1, "1", 2019, Some("Conventional Steam Coal"), 90.0),
        ];
        let entities = vec![
            entity(1, "1", "ST", 1980),
            entity(1, "2", "ST", 1980),
            entity(1, "3", "ST", 1980),
        ];
        let amendments = AmendmentTables {
            canceled: vec![amendment(1, "2")],
            retired: vec![amendment(1, "3")],
            ..Default::default()
        };
        let units = reconciler
            .reconcile(&snapshots, &plant_regions, &entities, &[], &amendments)
            .unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].generator_id, "1");
        assert!((units[0].capacity() - 90.0).abs() < 1e-9);
        assert_eq!(units[0].retirement_year, Some(2040));
    }

    #[test]
    fn test_unit_from_amendment_defaults() {
        let text = format!(
            "{}\nproposed_gen_heat_rates:\n  Natural Gas Fired Combustion Turbine: 10.2\nproposed_min_load:\n  Natural Gas Fired Combustion Turbine: 0.5\n",
            SAMPLE_SETTINGS
        );
        let settings = Settings::from_yaml_str(&text).unwrap();
        let reconciler = FleetReconciler::new(&settings);
        let ct = AmendmentRecord {
            plant_id: 50,
            generator_id: "CT1".into(),
            summer_capacity_mw: Some(100.0),
            technology_description: Some("Natural Gas Fired Combustion Turbine".into()),
            ..Default::default()
        };
        let pv = AmendmentRecord {
            plant_id: 51,
            generator_id: "PV1".into(),
            summer_capacity_mw: Some(80.0),
            technology_description: Some("Solar Photovoltaic".into()),
            ..Default::default()
        };
        let ct_unit = reconciler.unit_from_amendment(&ct, "east".into(), UnitSource::Planned);
        assert_eq!(ct_unit.heat_rate, Some(10.2));
        assert_eq!(ct_unit.minimum_load_mw, Some(50.0));
        assert_eq!(ct_unit.unit_id, "50_CT1");
        let pv_unit = reconciler.unit_from_amendment(&pv, "east".into(), UnitSource::Planned);
        assert_eq!(pv_unit.heat_rate, Some(DEFAULT_PROPOSED_HEAT_RATE));
        assert_eq!(pv_unit.minimum_load_mw, Some(0.0));
    }
}
