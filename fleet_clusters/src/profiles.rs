use crate::error::{ClusterError, ClusterResult};
use crate::models::{snake_case, ProfileGroup, Resource};
use crate::settings::Settings;
use crate::stats::mean;
use log::info;
use std::collections::HashMap;

/// Technology -> profile group lookup, built once per run
pub struct ProfileIndex<'a> {
    groups: &'a [ProfileGroup],
    by_technology: HashMap<String, Vec<usize>>,
}

impl<'a> ProfileIndex<'a> {
    pub fn new(groups: &'a [ProfileGroup]) -> Self {
        let mut by_technology: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, group) in groups.iter().enumerate() {
            for tech in &group.technologies {
                by_technology.entry(snake_case(tech)).or_default().push(i);
            }
        }
        Self { groups, by_technology }
    }

    /// The single group covering a technology in any of the given raw regions
    pub fn find(&self, technology: &str, raw_regions: &[String]) -> ClusterResult<Option<&'a ProfileGroup>> {
        let groups = self.groups;
        let matches: Vec<&'a ProfileGroup> = self
            .by_technology
            .get(&snake_case(technology))
            .map(|indices| {
                indices
                    .iter()
                    .map(|i| &groups[*i])
                    .filter(|g| g.regions.iter().any(|r| raw_regions.contains(r)))
                    .collect()
            })
            .unwrap_or_default();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches[0])),
            _ => Err(ClusterError::AmbiguousProfileGroup(technology.to_string())),
        }
    }

    /// Set `variable_cf` to the mean of each resource's profile
    pub fn apply(&self, settings: &Settings, resources: &mut [Resource]) -> ClusterResult<()> {
        let mut raw_regions: HashMap<String, Vec<String>> = HashMap::new();
        let mut matched = 0;
        for resource in resources.iter_mut() {
            let regions = raw_regions
                .entry(resource.region.clone())
                .or_insert_with(|| settings.raw_regions_of(&resource.region));
            if let Some(group) = self.find(&resource.technology, regions)? {
                resource.variable_cf = mean(&group.profile).unwrap_or(0.0);
                matched += 1;
            }
        }
        info!("Matched {} resources to generation profiles", matched);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SAMPLE_SETTINGS;

    fn group(name: &str, techs: &[&str], regions: &[&str], profile: Vec<f64>) -> ProfileGroup {
        ProfileGroup {
            name: name.to_string(),
            technologies: techs.iter().map(|t| t.to_string()).collect(),
            regions: regions.iter().map(|r| r.to_string()).collect(),
            profile,
        }
    }

    #[test]
    fn test_profile_mean_by_region() {
        let settings = Settings::from_yaml_str(SAMPLE_SETTINGS).unwrap();
        let groups = vec![
            group("wind_ny", &["Onshore Wind Turbine"], &["NY_Z_A"], vec![0.2, 0.4]),
            group("wind_west", &["onshore_wind_turbine"], &["west"], vec![0.5, 0.7]),
        ];
        let index = ProfileIndex::new(&groups);
        let mut resources = vec![
            Resource::new("east", "Onshore Wind Turbine", 1),
            Resource::new("west", "Onshore Wind Turbine", 1),
            Resource::new("west", "Conventional Steam Coal", 1),
        ];
        index.apply(&settings, &mut resources).unwrap();
        assert!((resources[0].variable_cf - 0.3).abs() < 1e-12);
        assert!((resources[1].variable_cf - 0.6).abs() < 1e-12);
        assert_eq!(resources[2].variable_cf, 0.0);
    }

    #[test]
    fn test_ambiguous_group_is_fatal() {
        let groups = vec![
            group("a", &["Solar Photovoltaic"], &["west"], vec![0.1]),
            group("b", &["Solar Photovoltaic"], &["west"], vec![0.2]),
        ];
        let index = ProfileIndex::new(&groups);
        match index.find("Solar Photovoltaic", &["west".to_string()]) {
            Err(ClusterError::AmbiguousProfileGroup(tech)) => assert_eq!(tech, "Solar Photovoltaic"),
            other => panic!("expected ambiguous group, got {:?}", other),
        }
    }
}
