use fleet_clusters::clustering::{aggregate_cluster, ClusterEngine};
use fleet_clusters::models::UnitGroup;
use fleet_clusters::Settings;

const SETTINGS: &str = r#"
model_year: 2030
data_years: [2022]
model_regions: [north]
num_clusters:
  Conventional Steam Coal: 2
"#;

fn main() {
    let settings = Settings::from_yaml_str(SETTINGS).expect("valid settings");
    let engine = ClusterEngine::new(&settings, None);

    // Two efficient baseload units and three older, costlier ones
    let groups: Vec<UnitGroup> = [
        (1, 650.0, 9.6, 38_000.0),
        (2, 700.0, 9.8, 40_000.0),
        (3, 250.0, 11.9, 55_000.0),
        (4, 300.0, 12.2, 58_000.0),
        (5, 220.0, 12.6, 61_000.0),
    ]
    .into_iter()
    .map(|(plant_id, capacity_mw, heat_rate, fixed_om)| UnitGroup {
        plant_id,
        unit_id: format!("{}_1", plant_id),
        capacity_mw,
        minimum_load_mw: capacity_mw * 0.4,
        heat_rate: Some(heat_rate),
        fixed_om_per_mw_yr: fixed_om,
        var_om_per_mwh: 4.5,
        generator_ids: vec!["1".to_string()],
    })
    .collect();

    let (clusters, _) = engine
        .cluster_group("north", "Conventional Steam Coal", groups.clone())
        .expect("clustering succeeds")
        .expect("coal is clustered");

    println!("Coal Clusters");
    println!("=============");
    for cluster in &clusters {
        println!(
            "Cluster {}: {} units, {:.1} MW each, heat rate {:.2} MMBtu/MWh, plants {:?}",
            cluster.cluster, cluster.num_units, cluster.cap_size, cluster.heat_rate, cluster.plant_ids
        );
    }

    let all: Vec<&UnitGroup> = groups.iter().collect();
    let single = aggregate_cluster("north", "Conventional Steam Coal", 1, &all);
    println!();
    println!(
        "As one cluster: {:.1} MW average unit, Min_Power {:.2}",
        single.cap_size, single.min_power
    );
}
