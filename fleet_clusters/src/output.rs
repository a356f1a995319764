use crate::enrichment::SEGMENT_TYPES;
use crate::error::ClusterResult;
use crate::models::Resource;
use crate::pipeline::ResourceTable;
use polars::prelude::*;

impl ResourceTable {
    /// Resource table as a DataFrame with the output column names
    pub fn to_dataframe(&self) -> ClusterResult<DataFrame> {
        let rows = &self.resources;
        let float = |f: fn(&Resource) -> f64| -> Vec<f64> { rows.iter().map(f).collect() };
        let optional = |f: fn(&Resource) -> Option<f64>| -> Vec<Option<f64>> {
            rows.iter().map(f).collect()
        };

        let mut columns = vec![
            Series::new("region", rows.iter().map(|r| r.region.as_str()).collect::<Vec<_>>()),
            Series::new("technology", rows.iter().map(|r| r.technology.as_str()).collect::<Vec<_>>()),
            Series::new("cluster", rows.iter().map(|r| r.cluster as u32).collect::<Vec<u32>>()),
            Series::new("Resource", rows.iter().map(|r| r.resource.as_str()).collect::<Vec<_>>()),
            Series::new("Cap_size", float(|r| r.cap_size)),
            Series::new("Existing_Cap_MW", float(|r| r.existing_cap_mw)),
            Series::new("Existing_Cap_MWh", optional(|r| r.existing_cap_mwh)),
            Series::new("num_units", rows.iter().map(|r| r.num_units as u32).collect::<Vec<u32>>()),
            Series::new("unmodified_cap_size", optional(|r| r.unmodified_cap_size)),
            Series::new("unmodified_existing_cap_mw", optional(|r| r.unmodified_existing_cap_mw)),
            Series::new("Min_Power", float(|r| r.min_power)),
            Series::new("Heat_Rate_MMBTU_per_MWh", float(|r| r.heat_rate)),
            Series::new("heat_rate_iqr", optional(|r| r.heat_rate_iqr)),
            Series::new("heat_rate_std", optional(|r| r.heat_rate_std)),
            Series::new("Fixed_OM_Cost_per_MWyr", float(|r| r.fixed_om_per_mw_yr)),
            Series::new("Var_OM_Cost_per_MWh", float(|r| r.var_om_per_mwh)),
            Series::new("Inv_Cost_per_MWyr", float(|r| r.inv_cost_per_mw_yr)),
            Series::new("plant_inv_cost_mwyr", optional(|r| r.plant_inv_cost_per_mw_yr)),
            Series::new("interconnect_annuity", optional(|r| r.interconnect_annuity)),
            Series::new("Fuel", rows.iter().map(|r| r.fuel.as_str()).collect::<Vec<_>>()),
            Series::new("Start_Fuel_MMBTU_per_MW", float(|r| r.start_fuel_mmbtu_per_mw)),
            Series::new("Start_Cost_per_MW", float(|r| r.start_cost_per_mw)),
            Series::new("capacity_factor", optional(|r| r.capacity_factor)),
            Series::new("variable_CF", float(|r| r.variable_cf)),
        ];

        for segment in SEGMENT_TYPES {
            if rows.iter().any(|r| r.segment_miles(segment).is_some()) {
                columns.push(Series::new(
                    &format!("{}_miles", segment),
                    rows.iter().map(|r| r.segment_miles(segment)).collect::<Vec<Option<f64>>>(),
                ));
                columns.push(Series::new(
                    &format!("{}_inv_mwyr", segment),
                    rows.iter()
                        .map(|r| r.transmission.iter().find(|s| s.segment == segment).map(|s| s.inv_mw_yr))
                        .collect::<Vec<Option<f64>>>(),
                ));
            }
        }

        for tag in &self.tag_names {
            columns.push(Series::new(
                tag,
                rows.iter().map(|r| r.tag(tag).unwrap_or(0.0)).collect::<Vec<f64>>(),
            ));
        }
        columns.push(Series::new("New_Build", rows.iter().map(|r| r.new_build).collect::<Vec<bool>>()));
        columns.push(Series::new("R_ID", rows.iter().map(|r| r.r_id as u32).collect::<Vec<u32>>()));

        Ok(DataFrame::new(columns)?)
    }

    /// Existing capacity and unit counts by region and technology
    pub fn capacity_summary(&self) -> ClusterResult<DataFrame> {
        let summary = self
            .to_dataframe()?
            .lazy()
            .filter(col("New_Build").not())
            .group_by_stable([col("region"), col("technology")])
            .agg([
                col("Existing_Cap_MW").sum().alias("Existing_Cap_MW"),
                col("num_units").sum().alias("num_units"),
                col("cluster").count().alias("num_clusters"),
            ])
            .collect()?;
        Ok(summary)
    }
}
