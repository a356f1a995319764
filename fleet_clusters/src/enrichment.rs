//! Column-by-column enrichment of resource tables: O&M, transmission
//! investment, storage energy and capacity-factor derating.

use crate::error::{ClusterError, ClusterResult};
use crate::models::{OffshoreSpurCostRecord, OmCostRecord, Resource, SegmentCost, UnitRecord};
use crate::settings::{CapexPerMile, Settings, TransmissionSegmentParams};
use indexmap::{IndexMap, IndexSet};
use log::{info, warn};
use std::collections::HashMap;

/// Transmission segment types, in the order they are costed
pub const SEGMENT_TYPES: [&str; 3] = ["spur", "offshore_spur", "tx"];

/// Attach fixed and variable O&M to existing units by technology.
///
/// Units whose technology has no O&M record keep missing values, which the
/// unit grouping later fills with the column mean.
pub fn attach_existing_om(units: &mut [UnitRecord], costs: &[OmCostRecord]) {
    let by_tech: HashMap<&str, &OmCostRecord> = costs.iter().map(|c| (c.technology.as_str(), c)).collect();
    let mut missing: IndexMap<String, f64> = IndexMap::new();
    for unit in units.iter_mut() {
        let Some(tech) = unit.technology.as_deref() else {
            continue;
        };
        match by_tech.get(tech) {
            Some(cost) => {
                unit.fixed_om_per_mw_yr = Some(cost.fixed_om_per_mw_yr);
                unit.var_om_per_mwh = Some(cost.var_om_per_mwh);
            }
            None => *missing.entry(tech.to_string()).or_insert(0.0) += unit.capacity(),
        }
    }
    if !missing.is_empty() {
        warn!("No O&M costs for technologies (MW affected): {:?}", missing);
    }
}

/// Capital recovery factor for a discount rate and amortization period
pub fn capital_recovery_factor(wacc: f64, years: u32) -> f64 {
    if wacc == 0.0 {
        return 1.0 / years.max(1) as f64;
    }
    wacc / (1.0 - (1.0 + wacc).powf(-(years as f64)))
}

/// Resolved cost parameters for one segment type
struct SegmentCostModel<'a> {
    capex: Option<&'a CapexPerMile>,
    crf: f64,
}

pub struct TransmissionCoster<'a> {
    settings: &'a Settings,
    offshore_costs: HashMap<String, f64>,
}

impl<'a> TransmissionCoster<'a> {
    pub fn new(settings: &'a Settings, offshore_costs: &[OffshoreSpurCostRecord]) -> Self {
        Self {
            settings,
            offshore_costs: offshore_costs
                .iter()
                .map(|c| (c.resource_name(), c.capex_mw_mile))
                .collect(),
        }
    }

    fn segment_model<'p>(
        &self,
        segment: &str,
        params: &'p TransmissionSegmentParams,
    ) -> ClusterResult<SegmentCostModel<'p>> {
        let mut missing = Vec::new();
        if params.wacc.is_none() {
            missing.push("wacc".to_string());
        }
        if params.investment_years.is_none() {
            missing.push("investment_years".to_string());
        }
        let offshore_fallback = segment == "offshore_spur" && !self.offshore_costs.is_empty();
        if params.capex_mw_mile.is_none() && !offshore_fallback {
            missing.push("capex_mw_mile".to_string());
        }
        match (params.wacc, params.investment_years) {
            (Some(wacc), Some(years)) if missing.is_empty() => Ok(SegmentCostModel {
                capex: params.capex_mw_mile.as_ref(),
                crf: capital_recovery_factor(wacc, years),
            }),
            _ => Err(ClusterError::MissingTransmissionKeys {
                segment: segment.to_string(),
                keys: missing,
            }),
        }
    }

    /// Fill capex and annualized investment for every transmission segment.
    ///
    /// Every segment type used by a resource must be configured, and region
    /// keyed capex must cover every region that uses the segment.
    pub fn calculate(&self, resources: &mut [Resource]) -> ClusterResult<()> {
        let used: IndexSet<String> = resources
            .iter()
            .flat_map(|r| r.transmission.iter().map(|s| s.segment.clone()))
            .collect();
        let segments = &self.settings.transmission_investment_cost.segments;
        let missing_types: Vec<String> = used
            .iter()
            .filter(|s| !segments.contains_key(*s))
            .cloned()
            .collect();
        if !missing_types.is_empty() {
            return Err(ClusterError::MissingTransmissionTypes(missing_types));
        }

        for segment in SEGMENT_TYPES.iter().filter(|s| used.contains(**s)) {
            let model = self.segment_model(segment, &segments[*segment])?;

            if let Some(CapexPerMile::Mapped(by_region)) = model.capex {
                let missing_regions: IndexSet<String> = resources
                    .iter()
                    .filter(|r| r.transmission.iter().any(|s| s.segment == *segment))
                    .filter(|r| !by_region.contains_key(&r.region))
                    .map(|r| r.region.clone())
                    .collect();
                if !missing_regions.is_empty() {
                    return Err(ClusterError::MissingCapexRegions {
                        segment: segment.to_string(),
                        regions: missing_regions.into_iter().collect(),
                    });
                }
            }

            for resource in resources.iter_mut() {
                let capex_per_mile = match model.capex {
                    Some(CapexPerMile::Constant(value)) => Some(*value),
                    Some(CapexPerMile::Mapped(by_region)) => by_region.get(&resource.region).copied(),
                    Some(CapexPerMile::Other(value)) => {
                        return Err(ClusterError::InvalidCapex {
                            segment: segment.to_string(),
                            value: format!("{:?}", value),
                        })
                    }
                    None => self.offshore_costs.get(&resource.technology).copied(),
                };
                let region = resource.region.clone();
                let technology = resource.technology.clone();
                for cost in resource.transmission.iter_mut().filter(|s| s.segment == *segment) {
                    let per_mile = capex_per_mile.unwrap_or_else(|| {
                        warn!(
                            "No {} capex for {} in {}; using 0",
                            segment, technology, region
                        );
                        0.0
                    });
                    cost.capex = per_mile * cost.miles;
                    cost.inv_mw_yr = cost.capex * model.crf;
                }
            }
        }
        Ok(())
    }

    /// Add transmission investment to each resource's annual investment cost.
    ///
    /// The plant-only cost is kept. With `use_total`, a non-zero
    /// interconnection annuity replaces the segment sum.
    pub fn add_to_investment(&self, resources: &mut [Resource]) {
        let use_total = self.settings.transmission_investment_cost.use_total;
        let mut zero_cost = Vec::new();
        for resource in resources.iter_mut() {
            let segment_total: f64 = resource.transmission.iter().map(|s| s.inv_mw_yr).sum();
            let tx_cost = match resource.interconnect_annuity {
                Some(annuity) if use_total && annuity != 0.0 => annuity,
                _ => segment_total,
            };
            if tx_cost == 0.0 || !tx_cost.is_finite() {
                zero_cost.push(format!("{} {}", resource.region, resource.technology));
            }
            resource.plant_inv_cost_per_mw_yr = Some(resource.inv_cost_per_mw_yr);
            if tx_cost.is_finite() {
                resource.inv_cost_per_mw_yr += tx_cost;
            }
        }
        if !zero_cost.is_empty() {
            warn!(
                "{} new resources have no transmission investment cost: {:?}",
                zero_cost.len(),
                zero_cost
            );
        }
    }

    pub fn apply(&self, resources: &mut [Resource]) -> ClusterResult<()> {
        self.calculate(resources)?;
        self.add_to_investment(resources);
        Ok(())
    }
}

/// Segment list for a resource from optional spur, offshore spur and backbone miles
pub fn segments_from_miles(spur: Option<f64>, offshore_spur: Option<f64>, tx: Option<f64>) -> Vec<SegmentCost> {
    SEGMENT_TYPES
        .iter()
        .zip([spur, offshore_spur, tx])
        .filter_map(|(segment, miles)| {
            miles.map(|miles| SegmentCost {
                segment: segment.to_string(),
                miles,
                capex: 0.0,
                inv_mw_yr: 0.0,
            })
        })
        .collect()
}

/// Storage energy capacity from power capacity times duration
pub fn apply_storage_duration(settings: &Settings, resources: &mut [Resource]) {
    for (tech, duration) in &settings.energy_storage_duration {
        for resource in resources.iter_mut().filter(|r| r.technology == *tech) {
            resource.existing_cap_mwh = Some(resource.existing_cap_mw * duration);
        }
    }
}

/// Scale representative capacity by capacity factor for derated technologies.
///
/// `Existing_Cap_MW` follows the derated `Cap_size`; the `unmodified_*`
/// columns keep the nameplate values.
pub fn derate_capacity(settings: &Settings, resources: &mut [Resource]) {
    if !settings.derate_capacity {
        return;
    }
    let mut derated = 0;
    for resource in resources
        .iter_mut()
        .filter(|r| settings.derate_techs.contains(&r.technology))
    {
        let Some(cf) = resource.capacity_factor else {
            continue;
        };
        let unmodified = resource.cap_size;
        resource.unmodified_cap_size = Some(unmodified);
        resource.unmodified_existing_cap_mw = Some(unmodified * resource.num_units as f64);
        resource.cap_size = unmodified * cf;
        resource.existing_cap_mw = resource.cap_size * resource.num_units as f64;
        derated += 1;
    }
    info!("Derated {} resources by capacity factor", derated);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SAMPLE_SETTINGS;
    use crate::test_support::unit;

    fn settings() -> Settings {
        Settings::from_yaml_str(SAMPLE_SETTINGS).unwrap()
    }

    fn new_build(region: &str, spur: f64, tx: f64) -> Resource {
        let mut r = Resource::new(region, "NaturalGas_CCAvgCF_Moderate", 1);
        r.new_build = true;
        r.inv_cost_per_mw_yr = 100_000.0;
        r.transmission = segments_from_miles(Some(spur), None, Some(tx));
        r
    }

    #[test]
    fn test_capital_recovery_factor() {
        let crf = capital_recovery_factor(0.069, 60);
        assert!((crf - 0.069 / (1.0 - 1.069f64.powi(-60))).abs() < 1e-15);
        assert_eq!(capital_recovery_factor(0.0, 20), 0.05);
    }

    #[test]
    fn test_attach_existing_om() {
        let mut units = vec![
            unit(1, "1", "Conventional Steam Coal", 100.0),
            unit(2, "1", "Batteries", 10.0),
        ];
        let costs = vec![OmCostRecord {
            technology: "Conventional Steam Coal".into(),
            fixed_om_per_mw_yr: 45_000.0,
            var_om_per_mwh: 4.5,
        }];
        attach_existing_om(&mut units, &costs);
        assert_eq!(units[0].fixed_om_per_mw_yr, Some(45_000.0));
        assert_eq!(units[0].var_om_per_mwh, Some(4.5));
        assert_eq!(units[1].fixed_om_per_mw_yr, None);
    }

    #[test]
    fn test_transmission_costs_by_segment() {
        let settings = settings();
        let coster = TransmissionCoster::new(&settings, &[]);
        let mut resources = vec![new_build("east", 10.0, 20.0), new_build("west", 5.0, 0.0)];
        coster.calculate(&mut resources).unwrap();
        let crf = capital_recovery_factor(0.069, 60);
        let east = &resources[0].transmission;
        assert_eq!(east[0].capex, 39_000.0);
        assert_eq!(east[1].capex, 40_000.0);
        assert!((east[1].inv_mw_yr - 40_000.0 * crf).abs() < 1e-9);
        assert_eq!(resources[1].transmission[0].capex, 19_500.0);
    }

    #[test]
    fn test_missing_segment_type_is_fatal() {
        let settings = settings();
        let coster = TransmissionCoster::new(&settings, &[]);
        let mut r = new_build("east", 1.0, 1.0);
        r.transmission = segments_from_miles(None, Some(3.0), None);
        match coster.calculate(&mut [r]) {
            Err(ClusterError::MissingTransmissionTypes(types)) => assert_eq!(types, vec!["offshore_spur"]),
            other => panic!("expected missing types, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_capex_region_is_fatal() {
        let text = SAMPLE_SETTINGS.replace("model_regions: [east, west]", "model_regions: [east, west, south]");
        let settings = Settings::from_yaml_str(&text).unwrap();
        let coster = TransmissionCoster::new(&settings, &[]);
        let mut resources = vec![new_build("south", 1.0, 1.0)];
        match coster.calculate(&mut resources) {
            Err(ClusterError::MissingCapexRegions { segment, regions }) => {
                assert_eq!(segment, "tx");
                assert_eq!(regions, vec!["south"]);
            }
            other => panic!("expected missing regions, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_segment_keys_are_named() {
        let text = SAMPLE_SETTINGS.replace("    wacc: 0.069\n    investment_years: 60\n  tx:", "  tx:");
        let settings = Settings::from_yaml_str(&text).unwrap();
        let coster = TransmissionCoster::new(&settings, &[]);
        match coster.calculate(&mut [new_build("east", 1.0, 1.0)]) {
            Err(ClusterError::MissingTransmissionKeys { segment, keys }) => {
                assert_eq!(segment, "spur");
                assert_eq!(keys, vec!["wacc", "investment_years"]);
            }
            other => panic!("expected missing keys, got {:?}", other),
        }
    }

    #[test]
    fn test_offshore_spur_falls_back_to_cost_table() {
        let text = format!(
            "{}\n  offshore_spur:\n    wacc: 0.05\n    investment_years: 30\n",
            SAMPLE_SETTINGS.trim_end().replace("atb_new_gen:\n  - [NaturalGas, CCAvgCF, Moderate, 500]", "")
        );
        let settings = Settings::from_yaml_str(&text).unwrap();
        let table = vec![OffshoreSpurCostRecord {
            technology: "OffShoreWind".into(),
            tech_detail: "Class1".into(),
            cost_case: "Moderate".into(),
            capex_mw_mile: 5000.0,
        }];
        let coster = TransmissionCoster::new(&settings, &table);
        let mut r = Resource::new("east", "OffShoreWind_Class1_Moderate", 1);
        r.transmission = segments_from_miles(None, Some(2.0), None);
        let mut resources = vec![r];
        coster.calculate(&mut resources).unwrap();
        assert_eq!(resources[0].transmission[0].capex, 10_000.0);
    }

    #[test]
    fn test_add_to_investment_prefers_interconnect_annuity() {
        let settings = settings();
        let coster = TransmissionCoster::new(&settings, &[]);
        let mut with_annuity = new_build("east", 10.0, 0.0);
        with_annuity.interconnect_annuity = Some(5_000.0);
        let mut zero_annuity = new_build("east", 10.0, 0.0);
        zero_annuity.interconnect_annuity = Some(0.0);
        let mut resources = vec![with_annuity, zero_annuity];
        coster.apply(&mut resources).unwrap();
        assert_eq!(resources[0].inv_cost_per_mw_yr, 105_000.0);
        assert_eq!(resources[0].plant_inv_cost_per_mw_yr, Some(100_000.0));
        let spur_inv = resources[1].transmission[0].inv_mw_yr;
        assert!((resources[1].inv_cost_per_mw_yr - (100_000.0 + spur_inv)).abs() < 1e-9);
    }

    #[test]
    fn test_storage_duration_and_derate() {
        let text = format!(
            "{}energy_storage_duration:\n  Batteries: 4\nderate_capacity: true\nderate_techs: [Onshore Wind Turbine]\ncapacity_factor_techs: [Onshore Wind Turbine]\n",
            SAMPLE_SETTINGS
        );
        let settings = Settings::from_yaml_str(&text).unwrap();
        let mut battery = Resource::new("east", "Batteries", 1);
        battery.existing_cap_mw = 25.0;
        let mut wind = Resource::new("east", "Onshore Wind Turbine", 1);
        wind.cap_size = 100.0;
        wind.num_units = 3;
        wind.capacity_factor = Some(0.35);
        let mut resources = vec![battery, wind];
        apply_storage_duration(&settings, &mut resources);
        derate_capacity(&settings, &mut resources);
        assert_eq!(resources[0].existing_cap_mwh, Some(100.0));
        assert!((resources[1].cap_size - 35.0).abs() < 1e-12);
        assert_eq!(resources[1].unmodified_cap_size, Some(100.0));
        assert_eq!(resources[1].unmodified_existing_cap_mw, Some(300.0));
        assert!((resources[1].existing_cap_mw - 105.0).abs() < 1e-9);
    }
}
