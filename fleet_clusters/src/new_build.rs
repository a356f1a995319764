use crate::enrichment::segments_from_miles;
use crate::error::{ClusterError, ClusterResult};
use crate::models::{NewBuildCostRecord, Resource, SpurDistanceRecord};
use crate::settings::{NewGenSpec, Settings};
use log::{info, warn};

/// Builds candidate new-build resources for every model region
pub struct NewBuildPlanner<'a> {
    settings: &'a Settings,
}

impl<'a> NewBuildPlanner<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    fn cost_for<'c>(&self, spec: &NewGenSpec, costs: &'c [NewBuildCostRecord]) -> ClusterResult<&'c NewBuildCostRecord> {
        costs
            .iter()
            .find(|c| {
                c.technology == spec.0
                    && c.tech_detail == spec.1
                    && c.cost_case == spec.2
                    && c.year == self.settings.model_year
            })
            .ok_or_else(|| {
                ClusterError::invalid(
                    "atb_new_gen",
                    format!(
                        "no cost record for {} in {}",
                        spec.resource_name(),
                        self.settings.model_year
                    ),
                )
            })
    }

    /// One resource per region and configured technology, with transmission
    /// distances attached but not yet costed
    pub fn build(
        &self,
        costs: &[NewBuildCostRecord],
        distances: &[SpurDistanceRecord],
    ) -> ClusterResult<Vec<Resource>> {
        let mut resources = Vec::new();
        let mut no_distance = Vec::new();

        for region in &self.settings.model_regions {
            for spec in &self.settings.atb_new_gen {
                let cost = self.cost_for(spec, costs)?;
                let name = spec.resource_name();

                let mut resource = Resource::new(region, &name, 1);
                resource.new_build = true;
                resource.cap_size = spec.3;
                resource.heat_rate = cost.heat_rate;
                resource.fixed_om_per_mw_yr = cost.fixed_om_per_mw_yr;
                resource.var_om_per_mwh = cost.var_om_per_mwh;
                resource.inv_cost_per_mw_yr = cost.inv_cost_per_mw_yr;
                resource.interconnect_annuity = cost.interconnect_annuity;

                let distance = distances
                    .iter()
                    .find(|d| d.region == *region && d.technology == name)
                    .or_else(|| distances.iter().find(|d| d.region == *region && d.technology == spec.0));
                match distance {
                    Some(d) => {
                        resource.transmission = segments_from_miles(d.spur_miles, d.offshore_spur_miles, d.tx_miles)
                    }
                    None => no_distance.push(format!("{} {}", region, name)),
                }
                resources.push(resource);
            }
        }

        if !no_distance.is_empty() {
            warn!("No transmission distances for new resources: {:?}", no_distance);
        }
        info!("Built {} new-build resources", resources.len());
        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SAMPLE_SETTINGS;

    fn cost(year: i32) -> NewBuildCostRecord {
        NewBuildCostRecord {
            technology: "NaturalGas".into(),
            tech_detail: "CCAvgCF".into(),
            cost_case: "Moderate".into(),
            year,
            inv_cost_per_mw_yr: 90_000.0 + year as f64,
            fixed_om_per_mw_yr: 12_000.0,
            var_om_per_mwh: 2.0,
            heat_rate: 6.4,
            interconnect_annuity: None,
        }
    }

    #[test]
    fn test_one_resource_per_region() {
        let settings = Settings::from_yaml_str(SAMPLE_SETTINGS).unwrap();
        let distances = vec![SpurDistanceRecord {
            region: "east".into(),
            technology: "NaturalGas".into(),
            spur_miles: Some(12.0),
            offshore_spur_miles: None,
            tx_miles: Some(30.0),
        }];
        let resources = NewBuildPlanner::new(&settings)
            .build(&[cost(2029), cost(2030)], &distances)
            .unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].region, "east");
        assert_eq!(resources[1].region, "west");
        assert_eq!(resources[0].technology, "NaturalGas_CCAvgCF_Moderate");
        assert_eq!(resources[0].inv_cost_per_mw_yr, 92_030.0);
        assert_eq!(resources[0].cap_size, 500.0);
        assert!(resources[0].new_build);
        assert_eq!(resources[0].segment_miles("spur"), Some(12.0));
        assert_eq!(resources[0].segment_miles("tx"), Some(30.0));
        assert!(resources[1].transmission.is_empty());
    }

    #[test]
    fn test_missing_cost_year_is_an_error() {
        let settings = Settings::from_yaml_str(SAMPLE_SETTINGS).unwrap();
        let result = NewBuildPlanner::new(&settings).build(&[cost(2025)], &[]);
        assert!(matches!(result, Err(ClusterError::InvalidSetting { .. })));
    }
}
