//! End-to-end construction of the resource table from typed input tables.
//!
//! Each stage takes the tables it needs and returns new ones; nothing is
//! accumulated on the pipeline itself.

use crate::capacity_factor::{apply_capacity_factors, capacity_factors};
use crate::clustering::{ClusterEngine, MajorityOwnerClusterer, UnitAssignment};
use crate::enrichment::{apply_storage_duration, attach_existing_om, derate_capacity, TransmissionCoster};
use crate::error::ClusterResult;
use crate::geo::RegionShapes;
use crate::heat_rate::HeatRateEstimator;
use crate::inflation::PriceIndex;
use crate::models::{
    snake_case, AmendmentTables, BoilerGeneratorAssociation, Cluster, FuelPriceRecord, GenerationFuelRecord,
    GeneratorEntity, GeneratorSnapshot, NewBuildCostRecord, OffshoreSpurCostRecord, OmCostRecord,
    OwnershipRecord, PlantGenerationRecord, PlantLocation, PlantRegionRecord, PriceIndexRecord, ProfileGroup,
    Resource, SpurDistanceRecord, UnitHeatRateRecord, UnitRecord, UnitSource,
};
use crate::new_build::NewBuildPlanner;
use crate::profiles::ProfileIndex;
use crate::reconcile::{fill_missing_technology, normalize_combined_cycle, FleetReconciler, CONVENTIONAL_HYDRO};
use crate::regions::{PlantRegions, RegionAssigner};
use crate::settings::Settings;
use crate::stats::round_to;
use crate::tech_index::TechnologyIndex;
use indexmap::IndexMap;
use log::info;

/// Decimal places kept in the final table
const OUTPUT_DECIMALS: i32 = 3;

/// Every input table the pipeline reads
#[derive(Debug, Clone, Default)]
pub struct FleetInputs {
    pub snapshots: Vec<GeneratorSnapshot>,
    pub entities: Vec<GeneratorEntity>,
    pub associations: Vec<BoilerGeneratorAssociation>,
    pub locations: Vec<PlantLocation>,
    pub plant_regions: Vec<PlantRegionRecord>,
    pub region_overrides: Vec<PlantRegionRecord>,
    pub generation_fuel: Vec<GenerationFuelRecord>,
    pub unit_heat_rates: Vec<UnitHeatRateRecord>,
    pub amendments: AmendmentTables,
    pub ownership: Vec<OwnershipRecord>,
    pub plant_generation: Vec<PlantGenerationRecord>,
    pub om_costs: Vec<OmCostRecord>,
    pub fuel_prices: Vec<FuelPriceRecord>,
    pub price_index: Vec<PriceIndexRecord>,
    pub new_build_costs: Vec<NewBuildCostRecord>,
    pub spur_distances: Vec<SpurDistanceRecord>,
    pub offshore_spur_costs: Vec<OffshoreSpurCostRecord>,
    pub profile_groups: Vec<ProfileGroup>,
    pub region_shapes: Option<RegionShapes>,
}

/// Which halves of the resource table to build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    pub existing: bool,
    pub new_build: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            existing: true,
            new_build: true,
        }
    }
}

/// Reconciled fleet ready for clustering
#[derive(Debug, Clone)]
pub struct ReconciledFleet {
    pub units: Vec<UnitRecord>,
    pub plant_regions: PlantRegions,
    pub snapshots: Vec<GeneratorSnapshot>,
}

#[derive(Debug, Clone, Default)]
pub struct ExistingResources {
    pub resources: Vec<Resource>,
    pub retired: Vec<UnitRecord>,
    pub assignments: Vec<UnitAssignment>,
}

/// The final resource table
#[derive(Debug, Clone, Default)]
pub struct ResourceTable {
    pub resources: Vec<Resource>,
    /// Model tag columns, in configured order
    pub tag_names: Vec<String>,
    pub retired: Vec<UnitRecord>,
    pub assignments: Vec<UnitAssignment>,
}

impl ResourceTable {
    pub fn existing_capacity_mw(&self) -> f64 {
        self.resources.iter().map(|r| r.existing_cap_mw).sum()
    }

    pub fn retired_capacity_mw(&self) -> f64 {
        self.retired.iter().map(UnitRecord::capacity).sum()
    }
}

pub fn resource_from_cluster(cluster: &Cluster) -> Resource {
    let mut resource = Resource::new(&cluster.region, &cluster.technology, cluster.cluster);
    resource.cap_size = cluster.cap_size;
    resource.num_units = cluster.num_units;
    resource.min_power = cluster.min_power;
    resource.heat_rate = cluster.heat_rate;
    resource.heat_rate_iqr = Some(cluster.heat_rate_iqr);
    resource.heat_rate_std = cluster.heat_rate_std;
    resource.fixed_om_per_mw_yr = cluster.fixed_om_per_mw_yr;
    resource.var_om_per_mwh = cluster.var_om_per_mwh;
    resource
}

fn round_option(value: &mut Option<f64>) {
    if let Some(v) = value {
        *v = round_to(*v, OUTPUT_DECIMALS);
    }
}

/// Round every numeric column of a resource
pub fn round_resource(resource: &mut Resource) {
    for value in [
        &mut resource.cap_size,
        &mut resource.existing_cap_mw,
        &mut resource.min_power,
        &mut resource.heat_rate,
        &mut resource.fixed_om_per_mw_yr,
        &mut resource.var_om_per_mwh,
        &mut resource.inv_cost_per_mw_yr,
        &mut resource.start_fuel_mmbtu_per_mw,
        &mut resource.start_cost_per_mw,
        &mut resource.variable_cf,
    ] {
        *value = round_to(*value, OUTPUT_DECIMALS);
    }
    for value in [
        &mut resource.existing_cap_mwh,
        &mut resource.unmodified_cap_size,
        &mut resource.unmodified_existing_cap_mw,
        &mut resource.heat_rate_iqr,
        &mut resource.heat_rate_std,
        &mut resource.plant_inv_cost_per_mw_yr,
        &mut resource.interconnect_annuity,
        &mut resource.capacity_factor,
    ] {
        round_option(value);
    }
    for segment in resource.transmission.iter_mut() {
        segment.miles = round_to(segment.miles, OUTPUT_DECIMALS);
        segment.capex = round_to(segment.capex, OUTPUT_DECIMALS);
        segment.inv_mw_yr = round_to(segment.inv_mw_yr, OUTPUT_DECIMALS);
    }
    for (_, value) in resource.tags.iter_mut() {
        *value = round_to(*value, OUTPUT_DECIMALS);
    }
}

pub struct FleetPipeline<'a> {
    settings: &'a Settings,
    inputs: &'a FleetInputs,
}

impl<'a> FleetPipeline<'a> {
    pub fn new(settings: &'a Settings, inputs: &'a FleetInputs) -> Self {
        Self { settings, inputs }
    }

    pub fn technology_index(&self) -> ClusterResult<TechnologyIndex> {
        let price_index = PriceIndex::new(&self.inputs.price_index);
        TechnologyIndex::build(self.settings, &self.inputs.fuel_prices, &price_index)
    }

    /// Region labels, reconciliation, heat rates, amendment units and O&M
    pub fn reconciled_units(&self) -> ClusterResult<ReconciledFleet> {
        let settings = self.settings;
        let inputs = self.inputs;
        let snapshots = fill_missing_technology(inputs.snapshots.clone())?;
        let reconciler = FleetReconciler::new(settings);
        let assigner = RegionAssigner::new(settings, inputs.region_shapes.as_ref());

        let mut hydro_capacity: IndexMap<i64, f64> = IndexMap::new();
        for row in reconciler.current_snapshots(&snapshots) {
            if row.technology_description.as_deref() == Some(CONVENTIONAL_HYDRO) {
                *hydro_capacity.entry(row.plant_id).or_insert(0.0) +=
                    settings.capacity_col.of_snapshot(&row).unwrap_or(0.0);
            }
        }
        let plant_regions = assigner.plant_regions(
            &inputs.plant_regions,
            &inputs.region_overrides,
            &hydro_capacity,
            &inputs.locations,
        );

        let mut units = reconciler.reconcile(
            &snapshots,
            &plant_regions,
            &inputs.entities,
            &inputs.associations,
            &inputs.amendments,
        )?;
        let mut fuel = inputs.generation_fuel.clone();
        normalize_combined_cycle(&mut units, &mut fuel);
        HeatRateEstimator::new(&inputs.unit_heat_rates, &fuel, &settings.data_years).apply(&mut units);

        let new_operating = reconciler.import_new_operating(&inputs.amendments.operating, &units, &assigner);
        let planned = reconciler.import_planned(&inputs.amendments.planned, &assigner);
        info!(
            "Adding {} newly operating and {} planned units",
            new_operating.len(),
            planned.len()
        );
        units.extend(new_operating);
        units.extend(planned);
        attach_existing_om(&mut units, &inputs.om_costs);

        Ok(ReconciledFleet {
            units,
            plant_regions,
            snapshots,
        })
    }

    /// Clustered existing resources with capacity factors and enrichment
    pub fn build_existing_resources(&self, index: &TechnologyIndex) -> ClusterResult<ExistingResources> {
        let settings = self.settings;
        let fleet = self.reconciled_units()?;

        let ownership = MajorityOwnerClusterer::new(&self.inputs.ownership);
        let engine = ClusterEngine::new(settings, Some(&ownership));
        let outcome = engine.build_clusters(&fleet.units)?;

        let mut resources: Vec<Resource> = outcome.clusters.iter().map(resource_from_cluster).collect();
        let factors = capacity_factors(
            settings,
            &fleet.snapshots,
            &fleet.plant_regions,
            &self.inputs.plant_generation,
        );
        apply_capacity_factors(&mut resources, &factors);

        derate_capacity(settings, &mut resources);
        for resource in resources.iter_mut() {
            round_resource(resource);
            resource.existing_cap_mw = resource.cap_size * resource.num_units as f64;
        }
        apply_storage_duration(settings, &mut resources);
        index.apply(&mut resources);

        if settings.sort_gens {
            resources.sort_by(|a, b| (&a.region, &a.technology).cmp(&(&b.region, &b.technology)));
        }
        for resource in resources.iter_mut() {
            resource.resource = snake_case(&resource.technology);
        }
        ProfileIndex::new(&self.inputs.profile_groups).apply(settings, &mut resources)?;

        let planned_mw: f64 = fleet
            .units
            .iter()
            .filter(|u| u.source == UnitSource::Planned)
            .map(UnitRecord::capacity)
            .sum();
        info!(
            "Built {} existing resources ({:.1} MW planned units included)",
            resources.len(),
            planned_mw
        );
        Ok(ExistingResources {
            resources,
            retired: outcome.retired,
            assignments: outcome.assignments,
        })
    }

    /// New-build candidates with enrichment and transmission investment
    pub fn build_new_resources(&self, index: &TechnologyIndex) -> ClusterResult<Vec<Resource>> {
        let mut resources =
            NewBuildPlanner::new(self.settings).build(&self.inputs.new_build_costs, &self.inputs.spur_distances)?;
        index.apply(&mut resources);
        TransmissionCoster::new(self.settings, &self.inputs.offshore_spur_costs).apply(&mut resources)?;
        for resource in resources.iter_mut() {
            resource.resource = snake_case(&resource.technology);
        }
        Ok(resources)
    }

    /// Existing and new-build resources concatenated, with sequential ids
    pub fn build_all_resources(&self, options: BuildOptions) -> ClusterResult<ResourceTable> {
        let index = self.technology_index()?;
        let mut table = ResourceTable {
            tag_names: self.settings.model_tag_names.clone(),
            ..Default::default()
        };

        if options.existing {
            let existing = self.build_existing_resources(&index)?;
            table.resources.extend(existing.resources);
            table.retired = existing.retired;
            table.assignments = existing.assignments;
        }
        if options.new_build {
            table.resources.extend(self.build_new_resources(&index)?);
        }

        for (i, resource) in table.resources.iter_mut().enumerate() {
            round_resource(resource);
            if resource.tag("VRE") == Some(1.0) {
                resource.min_power = 0.0;
            }
            resource.r_id = i + 1;
        }
        info!(
            "Resource table has {} rows, {:.1} MW existing capacity, {:.1} MW retired",
            table.resources.len(),
            table.existing_capacity_mw(),
            table.retired_capacity_mw()
        );
        Ok(table)
    }
}
