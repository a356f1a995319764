pub mod capacity_factor;
pub mod clustering;
pub mod enrichment;
pub mod error;
pub mod geo;
pub mod heat_rate;
pub mod inflation;
pub mod kmeans;
pub mod models;
pub mod new_build;
pub mod output;
pub mod pipeline;
pub mod profiles;
pub mod reconcile;
pub mod regions;
pub mod settings;
pub mod stats;
pub mod tech_index;

pub use clustering::{ClusterEngine, MajorityOwnerClusterer, OwnershipClusterer};
pub use error::{ClusterError, ClusterResult};
pub use geo::RegionShapes;
pub use kmeans::{KMeans, KMeansConfig, KMEANS_SEED};
pub use models::{Cluster, Resource, UnitRecord};
pub use pipeline::{BuildOptions, FleetInputs, FleetPipeline, ResourceTable};
pub use settings::Settings;
pub use tech_index::TechnologyIndex;
