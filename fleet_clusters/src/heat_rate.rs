//! Heat rate estimation with unit, plant/prime mover/fuel and technology
//! fallbacks.

use crate::models::{GenerationFuelRecord, UnitHeatRateRecord, UnitRecord};
use crate::stats::{median, weighted_mean};
use chrono::Datelike;
use indexmap::IndexMap;
use log::{info, warn};
use std::collections::HashMap;

pub const MIN_HEAT_RATE: f64 = 5.0;
pub const MAX_HEAT_RATE: f64 = 35.0;

/// Heat rates within [5, 35] MMBtu/MWh are valid. Exactly 0 is also valid:
/// generation with no fuel use, such as pumped storage.
pub fn is_valid_heat_rate(heat_rate: f64) -> bool {
    heat_rate == 0.0 || (MIN_HEAT_RATE..=MAX_HEAT_RATE).contains(&heat_rate)
}

fn valid(heat_rate: Option<f64>) -> Option<f64> {
    heat_rate.filter(|hr| is_valid_heat_rate(*hr))
}

/// Key for plant-level heat rates: plant, prime mover, fuel
type PlantKey = (i64, String, String);

pub struct HeatRateEstimator {
    unit_rates: HashMap<(i64, String), f64>,
    plant_rates: HashMap<PlantKey, f64>,
}

impl HeatRateEstimator {
    pub fn new(
        unit_records: &[UnitHeatRateRecord],
        fuel_records: &[GenerationFuelRecord],
        data_years: &[i32],
    ) -> Self {
        Self {
            unit_rates: Self::weighted_unit_heat_rates(unit_records, data_years),
            plant_rates: Self::plant_prime_mover_heat_rates(fuel_records, data_years),
        }
    }

    /// Generation-weighted unit heat rate across the selected years
    pub fn weighted_unit_heat_rates(
        records: &[UnitHeatRateRecord],
        data_years: &[i32],
    ) -> HashMap<(i64, String), f64> {
        let mut grouped: IndexMap<(i64, String), (Vec<f64>, Vec<f64>)> = IndexMap::new();
        for record in records {
            if !data_years.contains(&record.report_date.year()) {
                continue;
            }
            let (Some(hr), Some(gen)) = (record.heat_rate, record.net_generation_mwh) else {
                continue;
            };
            if gen <= 0.0 || !hr.is_finite() {
                continue;
            }
            let entry = grouped
                .entry((record.plant_id, record.unit_id.clone()))
                .or_default();
            entry.0.push(hr);
            entry.1.push(gen);
        }

        grouped
            .into_iter()
            .filter_map(|(key, (rates, gens))| weighted_mean(&rates, &gens).map(|hr| (key, hr)))
            .collect()
    }

    /// Total fuel over total generation for each plant / prime mover / fuel
    pub fn plant_prime_mover_heat_rates(
        records: &[GenerationFuelRecord],
        data_years: &[i32],
    ) -> HashMap<PlantKey, f64> {
        let mut totals: HashMap<PlantKey, (f64, f64)> = HashMap::new();
        for record in records {
            if !data_years.contains(&record.report_date.year()) {
                continue;
            }
            let entry = totals
                .entry((
                    record.plant_id,
                    record.prime_mover_code.clone(),
                    record.fuel_type.clone(),
                ))
                .or_insert((0.0, 0.0));
            entry.0 += record.fuel_consumed_mmbtu;
            entry.1 += record.net_generation_mwh;
        }

        totals
            .into_iter()
            .filter(|(_, (_, gen))| *gen != 0.0)
            .map(|(key, (fuel, gen))| (key, fuel / gen))
            .collect()
    }

    fn plant_rate(&self, unit: &UnitRecord) -> Option<f64> {
        let key = (
            unit.plant_id,
            unit.prime_mover_code.clone()?,
            unit.energy_source_code.clone()?,
        );
        self.plant_rates.get(&key).copied()
    }

    /// Attach a heat rate to every unit.
    ///
    /// Order of preference: official unit heat rate, plant/prime mover/fuel
    /// heat rate, then the median heat rate of the unit's technology. Out of
    /// band values are discarded before each fallback.
    pub fn apply(&self, units: &mut [UnitRecord]) {
        let mut from_unit = 0;
        let mut from_plant = 0;
        let mut rejected = 0;

        for unit in units.iter_mut() {
            let unit_rate = self.unit_rates.get(&(unit.plant_id, unit.unit_id.clone())).copied();
            let plant_rate = self.plant_rate(unit);
            if unit_rate.is_some() && valid(unit_rate).is_none() {
                rejected += 1;
            }

            unit.heat_rate = match (valid(unit_rate), valid(plant_rate)) {
                (Some(hr), _) => {
                    from_unit += 1;
                    Some(hr)
                }
                (None, Some(hr)) => {
                    from_plant += 1;
                    Some(hr)
                }
                (None, None) => None,
            };
        }
        info!(
            "Heat rates: {} from units, {} from plant/prime mover/fuel, {} unit values out of bounds",
            from_unit, from_plant, rejected
        );

        fill_with_technology_median(units);
    }
}

/// Fill missing heat rates with the median of the same technology
pub fn fill_with_technology_median(units: &mut [UnitRecord]) {
    let mut by_tech: IndexMap<Option<String>, Vec<f64>> = IndexMap::new();
    for unit in units.iter() {
        let rates = by_tech.entry(unit.technology.clone()).or_default();
        if let Some(hr) = unit.heat_rate {
            rates.push(hr);
        }
    }
    let medians: HashMap<Option<String>, Option<f64>> = by_tech
        .into_iter()
        .map(|(tech, rates)| (tech, median(&rates)))
        .collect();

    let mut still_missing = Vec::new();
    for unit in units.iter_mut().filter(|u| u.heat_rate.is_none()) {
        unit.heat_rate = medians.get(&unit.technology).copied().flatten();
        if unit.heat_rate.is_none() {
            still_missing.push(unit.plant_gen_id());
        }
    }
    if !still_missing.is_empty() {
        warn!(
            "{} units have no heat rate after all fallbacks: {:?}",
            still_missing.len(),
            still_missing
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::unit;
    use chrono::NaiveDate;

    fn unit_hr(plant_id: i64, unit_id: &str, year: i32, hr: f64, gen: f64) -> UnitHeatRateRecord {
        UnitHeatRateRecord {
            plant_id,
            unit_id: unit_id.to_string(),
            report_date: NaiveDate::from_ymd_opt(year, 1, 1).unwrap(),
            heat_rate: Some(hr),
            net_generation_mwh: Some(gen),
        }
    }

    fn fuel(plant_id: i64, pm: &str, fuel_type: &str, mmbtu: f64, mwh: f64) -> GenerationFuelRecord {
        GenerationFuelRecord {
            plant_id,
            prime_mover_code: pm.to_string(),
            fuel_type: fuel_type.to_string(),
            fuel_consumed_mmbtu: mmbtu,
            net_generation_mwh: mwh,
            report_date: NaiveDate::from_ymd_opt(2020, 3, 1).unwrap(),
        }
    }

    fn coal(plant_id: i64) -> UnitRecord {
        let mut u = unit(plant_id, "1", "Conventional Steam Coal", 100.0);
        u.prime_mover_code = Some("ST".into());
        u.energy_source_code = Some("BIT".into());
        u
    }

    #[test]
    fn test_banding() {
        assert!(is_valid_heat_rate(0.0));
        assert!(is_valid_heat_rate(5.0));
        assert!(is_valid_heat_rate(35.0));
        assert!(!is_valid_heat_rate(3.0));
        assert!(!is_valid_heat_rate(40.0));
        assert!(!is_valid_heat_rate(-1.0));
    }

    #[test]
    fn test_weighted_unit_heat_rate_skips_zero_generation_and_other_years() {
        let records = vec![
            unit_hr(1, "U1", 2020, 10.0, 100.0),
            unit_hr(1, "U1", 2019, 12.0, 300.0),
            unit_hr(1, "U1", 2018, 50.0, 300.0),
            unit_hr(1, "U1", 2020, 99.0, 0.0),
        ];
        let rates = HeatRateEstimator::weighted_unit_heat_rates(&records, &[2019, 2020]);
        assert!((rates[&(1, "U1".to_string())] - 11.5).abs() < 1e-12);
    }

    #[test]
    fn test_zero_heat_rate_is_preserved() {
        let mut u = coal(1);
        u.unit_id = "U1".into();
        let estimator = HeatRateEstimator::new(
            &[unit_hr(1, "U1", 2020, 0.0, 500.0)],
            &[fuel(1, "ST", "BIT", 1000.0, 100.0)],
            &[2020],
        );
        let mut units = vec![u];
        estimator.apply(&mut units);
        assert_eq!(units[0].heat_rate, Some(0.0));
    }

    #[test]
    fn test_out_of_band_unit_rates_fall_back_to_plant_rate() {
        let mut high = coal(1);
        high.unit_id = "U1".into();
        let mut low = coal(2);
        low.unit_id = "U2".into();
        let estimator = HeatRateEstimator::new(
            &[unit_hr(1, "U1", 2020, 40.0, 500.0), unit_hr(2, "U2", 2020, 3.0, 500.0)],
            &[fuel(1, "ST", "BIT", 1050.0, 100.0), fuel(2, "ST", "BIT", 900.0, 100.0)],
            &[2020],
        );
        let mut units = vec![high, low];
        estimator.apply(&mut units);
        assert!((units[0].heat_rate.unwrap() - 10.5).abs() < 1e-12);
        assert!((units[1].heat_rate.unwrap() - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_plant_rate_used_without_unit_rate() {
        let estimator = HeatRateEstimator::new(&[], &[fuel(1, "ST", "BIT", 1050.0, 100.0)], &[2020]);
        let mut units = vec![coal(1)];
        estimator.apply(&mut units);
        assert!((units[0].heat_rate.unwrap() - 10.5).abs() < 1e-12);
    }

    #[test]
    fn test_technology_median_fallback() {
        let estimator = HeatRateEstimator::new(
            &[],
            &[
                fuel(1, "ST", "BIT", 1000.0, 100.0),
                fuel(2, "ST", "BIT", 1200.0, 100.0),
                fuel(3, "ST", "BIT", 1100.0, 100.0),
                // Out of band, so plant 4 falls through to the median
                fuel(4, "ST", "BIT", 4000.0, 100.0),
            ],
            &[2020],
        );
        let mut units = vec![coal(1), coal(2), coal(3), coal(4), coal(5)];
        estimator.apply(&mut units);
        assert!((units[3].heat_rate.unwrap() - 11.0).abs() < 1e-12);
        assert!((units[4].heat_rate.unwrap() - 11.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_rates_anywhere_leaves_missing() {
        let estimator = HeatRateEstimator::new(&[], &[], &[2020]);
        let mut units = vec![coal(1)];
        estimator.apply(&mut units);
        assert_eq!(units[0].heat_rate, None);
    }
}
