//! Error types for the clustering pipeline.
//!
//! Configuration problems and invariant violations are fatal and surface as a
//! [`ClusterError`]. Data-quality problems are logged where they are found and
//! never reach this type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    /// A required settings key is absent or empty
    #[error("missing required setting `{0}`")]
    MissingSetting(String),

    /// A settings value has the wrong shape or an unusable value
    #[error("invalid setting `{key}`: {reason}")]
    InvalidSetting { key: String, reason: String },

    /// A fuel label references a price series that does not exist
    #[error("fuel price series `{fuel_name}` has no record for {year}")]
    MissingFuelPrice { fuel_name: String, year: i32 },

    /// A fuel in `tech_fuel_map` is neither an AEO nor a user-priced fuel
    #[error(
        "the fuel type `{0}` is not in `aeo_fuel_scenarios` or `user_fuel_price`; \
         all fuels listed in `tech_fuel_map` must be included in one of these"
    )]
    UnpricedFuel(String),

    #[error("transmission_investment_cost missing transmission line types {0:?}")]
    MissingTransmissionTypes(Vec<String>),

    #[error("transmission_investment_cost.{segment} missing required keys {keys:?}")]
    MissingTransmissionKeys { segment: String, keys: Vec<String> },

    #[error("transmission_investment_cost.{segment}.capex_mw_mile missing regions {regions:?}")]
    MissingCapexRegions { segment: String, regions: Vec<String> },

    #[error(
        "transmission_investment_cost.{segment}.capex_mw_mile should be numeric or a \
         mapping of <region>: <capex>, not {value}"
    )]
    InvalidCapex { segment: String, value: String },

    /// More than one resource profile group claims a technology
    #[error("multiple existing resource groups match technology `{0}`")]
    AmbiguousProfileGroup(String),

    #[error("unsupported coordinate reference system `{0}`")]
    UnsupportedCrs(String),

    #[error("price index has no value for year {0}")]
    MissingPriceIndex(i32),

    /// A record-count or capacity invariant did not hold after a step
    #[error("invariant violated in {step}: {detail}")]
    Invariant { step: String, detail: String },

    #[error("invalid technology pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("settings parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dataframe error: {0}")]
    Frame(#[from] polars::prelude::PolarsError),
}

pub type ClusterResult<T> = Result<T, ClusterError>;

impl ClusterError {
    pub fn invariant(step: &str, detail: impl Into<String>) -> Self {
        ClusterError::Invariant {
            step: step.to_string(),
            detail: detail.into(),
        }
    }

    pub fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ClusterError::InvalidSetting {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
