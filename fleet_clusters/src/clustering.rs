//! Grouping of reconciled units into representative clusters per region and
//! technology.

use crate::error::{ClusterError, ClusterResult};
use crate::kmeans::{standardize, KMeans, KMeansConfig};
use crate::models::{Cluster, OwnershipRecord, UnitGroup, UnitRecord};
use crate::settings::Settings;
use crate::stats::{fill_non_finite_with_mean, iqr, mean, sample_std, weighted_mean};
use indexmap::IndexMap;
use log::{info, warn};
use std::collections::{BTreeMap, HashMap};

/// Sum capacity and minimum load per unit group; average heat rate and O&M.
///
/// Missing or non-finite averages are filled with the mean over all groups.
pub fn group_units(units: &[&UnitRecord]) -> Vec<UnitGroup> {
    let mut grouped: IndexMap<(i64, String), Vec<&UnitRecord>> = IndexMap::new();
    for unit in units {
        grouped
            .entry((unit.plant_id, unit.unit_id.clone()))
            .or_default()
            .push(unit);
    }

    let mean_of = |members: &[&UnitRecord], field: fn(&UnitRecord) -> Option<f64>| -> f64 {
        let values: Vec<f64> = members.iter().filter_map(|u| field(u)).collect();
        mean(&values).unwrap_or(f64::NAN)
    };

    let mut groups: Vec<UnitGroup> = grouped
        .into_iter()
        .map(|((plant_id, unit_id), members)| UnitGroup {
            plant_id,
            unit_id,
            capacity_mw: members.iter().map(|u| u.capacity()).sum(),
            minimum_load_mw: members.iter().filter_map(|u| u.minimum_load_mw).sum(),
            heat_rate: Some(mean_of(&members, |u| u.heat_rate)),
            fixed_om_per_mw_yr: mean_of(&members, |u| u.fixed_om_per_mw_yr),
            var_om_per_mwh: mean_of(&members, |u| u.var_om_per_mwh),
            generator_ids: members.iter().map(|u| u.generator_id.clone()).collect(),
        })
        .collect();

    let mut heat_rates: Vec<f64> = groups.iter().map(|g| g.heat_rate.unwrap_or(f64::NAN)).collect();
    let mut fixed_om: Vec<f64> = groups.iter().map(|g| g.fixed_om_per_mw_yr).collect();
    let mut var_om: Vec<f64> = groups.iter().map(|g| g.var_om_per_mwh).collect();
    let heat_rate_known = heat_rates.iter().any(|hr| hr.is_finite());
    fill_non_finite_with_mean(&mut heat_rates);
    fill_non_finite_with_mean(&mut fixed_om);
    fill_non_finite_with_mean(&mut var_om);

    for (i, group) in groups.iter_mut().enumerate() {
        // A group of units that all lack heat rates stays missing
        group.heat_rate = heat_rate_known.then_some(heat_rates[i]);
        group.fixed_om_per_mw_yr = fixed_om[i];
        group.var_om_per_mwh = var_om[i];
    }
    groups
}

/// Owner-based partitioning of unit groups
pub trait OwnershipClusterer {
    /// 1-based cluster label for each group, in input order
    fn cluster(&self, region: &str, technology: &str, groups: &[UnitGroup]) -> ClusterResult<Vec<usize>>;
}

/// Clusters unit groups by the utility owning the largest share of their capacity
pub struct MajorityOwnerClusterer {
    shares: HashMap<(i64, String), Vec<(i64, f64)>>,
}

impl MajorityOwnerClusterer {
    pub fn new(ownership: &[OwnershipRecord]) -> Self {
        let mut shares: HashMap<(i64, String), Vec<(i64, f64)>> = HashMap::new();
        for record in ownership {
            shares
                .entry((record.plant_id, record.generator_id.clone()))
                .or_default()
                .push((record.utility_id, record.fraction_owned));
        }
        Self { shares }
    }

    /// Generators in a group split its capacity evenly, so owned MW is
    /// proportional to the summed ownership fractions.
    fn majority_owner(&self, group: &UnitGroup) -> Option<i64> {
        let mut owned: BTreeMap<i64, f64> = BTreeMap::new();
        for gen in &group.generator_ids {
            if let Some(owners) = self.shares.get(&(group.plant_id, gen.clone())) {
                for (utility, fraction) in owners {
                    *owned.entry(*utility).or_insert(0.0) += fraction;
                }
            }
        }
        owned
            .into_iter()
            .fold(None, |acc: Option<(i64, f64)>, (utility, share)| match acc {
                Some((_, best)) if best >= share => acc,
                _ => Some((utility, share)),
            })
            .map(|(utility, _)| utility)
    }
}

impl OwnershipClusterer for MajorityOwnerClusterer {
    fn cluster(&self, region: &str, technology: &str, groups: &[UnitGroup]) -> ClusterResult<Vec<usize>> {
        let mut owner_labels: IndexMap<Option<i64>, usize> = IndexMap::new();
        let labels = groups
            .iter()
            .map(|g| {
                let owner = self.majority_owner(g);
                let next = owner_labels.len() + 1;
                *owner_labels.entry(owner).or_insert(next)
            })
            .collect();
        info!(
            "Clustered {} {} units in {} by {} owners",
            groups.len(),
            technology,
            region,
            owner_labels.len()
        );
        Ok(labels)
    }
}

/// Aggregate one cluster of unit groups.
///
/// Capacity and minimum load are plain means (the average unit); heat rate
/// and O&M are capacity-weighted.
pub fn aggregate_cluster(region: &str, technology: &str, label: usize, members: &[&UnitGroup]) -> Cluster {
    let capacities: Vec<f64> = members.iter().map(|g| g.capacity_mw).collect();
    let min_loads: Vec<f64> = members.iter().map(|g| g.minimum_load_mw).collect();
    let heat_rates: Vec<f64> = members.iter().filter_map(|g| g.heat_rate).collect();
    let fixed_om: Vec<f64> = members.iter().map(|g| g.fixed_om_per_mw_yr).collect();
    let var_om: Vec<f64> = members.iter().map(|g| g.var_om_per_mwh).collect();

    let cap_size = mean(&capacities).unwrap_or(0.0);
    let minimum_load_mw = mean(&min_loads).unwrap_or(0.0);
    let min_power = if cap_size > 0.0 { minimum_load_mw / cap_size } else { 0.0 };

    Cluster {
        region: region.to_string(),
        technology: technology.to_string(),
        cluster: label,
        cap_size,
        minimum_load_mw,
        heat_rate: weighted_mean(&heat_rates, &capacities).unwrap_or(0.0),
        heat_rate_iqr: iqr(&heat_rates).unwrap_or(0.0),
        heat_rate_std: sample_std(&heat_rates),
        fixed_om_per_mw_yr: weighted_mean(&fixed_om, &capacities).unwrap_or(0.0),
        fixed_om_std: sample_std(&fixed_om),
        var_om_per_mwh: weighted_mean(&var_om, &capacities).unwrap_or(0.0),
        min_power,
        num_units: members.len(),
        plant_ids: members.iter().map(|g| g.plant_id).collect(),
        unit_ids: members.iter().map(|g| g.unit_id.clone()).collect(),
    }
}

/// Cluster label assigned to one unit group
#[derive(Debug, Clone, PartialEq)]
pub struct UnitAssignment {
    pub region: String,
    pub technology: String,
    pub plant_id: i64,
    pub unit_id: String,
    pub cluster: usize,
}

/// Result of clustering the whole fleet
#[derive(Debug, Clone, Default)]
pub struct ClusterOutcome {
    pub clusters: Vec<Cluster>,
    /// Units retired by the model year, including technologies with no clusters
    pub retired: Vec<UnitRecord>,
    pub assignments: Vec<UnitAssignment>,
}

pub struct ClusterEngine<'a> {
    settings: &'a Settings,
    num_clusters: IndexMap<String, IndexMap<String, usize>>,
    ownership: Option<&'a dyn OwnershipClusterer>,
}

impl<'a> ClusterEngine<'a> {
    pub fn new(settings: &'a Settings, ownership: Option<&'a dyn OwnershipClusterer>) -> Self {
        Self {
            settings,
            num_clusters: settings.region_num_clusters(),
            ownership,
        }
    }

    /// Cluster every (region, technology) group of operating units
    pub fn build_clusters(&self, units: &[UnitRecord]) -> ClusterResult<ClusterOutcome> {
        let model_year = self.settings.model_year;
        let mut outcome = ClusterOutcome {
            retired: units
                .iter()
                .filter(|u| u.is_retired_by(model_year))
                .cloned()
                .collect(),
            ..Default::default()
        };

        let mut grouped: BTreeMap<(String, String), Vec<&UnitRecord>> = BTreeMap::new();
        for unit in units.iter().filter(|u| !u.is_retired_by(model_year)) {
            let Some(tech) = unit.technology.as_ref() else {
                continue;
            };
            if self.settings.num_clusters.contains_key(tech) {
                grouped
                    .entry((unit.model_region.clone(), tech.clone()))
                    .or_default()
                    .push(unit);
            }
        }

        for ((region, tech), members) in grouped {
            let groups = group_units(&members);
            if let Some((clusters, labels)) = self.cluster_group(&region, &tech, groups)? {
                outcome.assignments.extend(labels.into_iter().map(|(group, cluster)| UnitAssignment {
                    region: region.clone(),
                    technology: tech.clone(),
                    plant_id: group.plant_id,
                    unit_id: group.unit_id,
                    cluster,
                }));
                outcome.clusters.extend(clusters);
            }
        }

        info!(
            "Created {} clusters; {} units retired by {}",
            outcome.clusters.len(),
            outcome.retired.len(),
            model_year
        );
        Ok(outcome)
    }

    fn target_clusters(&self, region: &str, technology: &str) -> usize {
        self.num_clusters
            .get(region)
            .and_then(|techs| techs.get(technology))
            .copied()
            .unwrap_or(0)
    }

    /// Cluster one region/technology. Returns `None` when the technology is
    /// configured with zero clusters or has no usable units.
    pub fn cluster_group(
        &self,
        region: &str,
        technology: &str,
        groups: Vec<UnitGroup>,
    ) -> ClusterResult<Option<(Vec<Cluster>, Vec<(UnitGroup, usize)>)>> {
        let start_capacity: f64 = groups.iter().map(|g| g.capacity_mw).sum();
        let groups: Vec<UnitGroup> = groups.into_iter().filter(|g| g.heat_rate.is_some()).collect();
        let dropped = start_capacity - groups.iter().map(|g| g.capacity_mw).sum::<f64>();
        if dropped != 0.0 {
            warn!(
                "Dropped {} MW of {} in {} because of null heat rate values",
                dropped, technology, region
            );
        }
        if groups.is_empty() {
            return Ok(None);
        }

        let labels = if let Some(owner) = self
            .ownership
            .filter(|_| self.settings.uses_owner_clustering(region, technology))
        {
            owner.cluster(region, technology, &groups)?
        } else {
            let k = self.target_clusters(region, technology);
            if k == 0 {
                return Ok(None);
            }
            self.kmeans_labels(region, technology, &groups, k)
        };

        if labels.len() != groups.len() {
            return Err(ClusterError::invariant(
                "cluster_group",
                format!("{} labels for {} unit groups", labels.len(), groups.len()),
            ));
        }

        let mut by_label: BTreeMap<usize, Vec<&UnitGroup>> = BTreeMap::new();
        for (group, label) in groups.iter().zip(&labels) {
            by_label.entry(*label).or_default().push(group);
        }
        let clusters: Vec<Cluster> = by_label
            .iter()
            .map(|(label, members)| aggregate_cluster(region, technology, *label, members))
            .collect();

        let assigned: usize = clusters.iter().map(|c| c.num_units).sum();
        if assigned != groups.len() {
            return Err(ClusterError::invariant(
                "cluster_group",
                format!("{} of {} unit groups assigned to clusters", assigned, groups.len()),
            ));
        }

        Ok(Some((clusters, groups.into_iter().zip(labels).collect())))
    }

    /// 1-based k-means labels over standardized fixed O&M and heat rate
    fn kmeans_labels(&self, region: &str, technology: &str, groups: &[UnitGroup], k: usize) -> Vec<usize> {
        let n = groups.len();
        if k >= n {
            if k > n {
                warn!(
                    "The technology {} in region {} has only {} operating units, which is less \
                     than the {} clusters specified. The number of clusters has been set equal \
                     to the number of units.",
                    technology, region, n, k
                );
            }
            return (1..=n).collect();
        }

        let features: Vec<Vec<f64>> = groups
            .iter()
            .map(|g| vec![g.fixed_om_per_mw_yr, g.heat_rate.unwrap_or(0.0)])
            .collect();
        let fit = KMeans::new(KMeansConfig::new(k)).fit(&standardize(&features));
        fit.labels.into_iter().map(|label| label + 1).collect()
    }
}
