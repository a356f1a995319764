use crate::error::{ClusterError, ClusterResult};
use crate::models::PriceIndexRecord;
use std::collections::BTreeMap;

/// Year -> price index table for converting costs between dollar years
#[derive(Debug, Clone, Default)]
pub struct PriceIndex {
    by_year: BTreeMap<i32, f64>,
}

impl PriceIndex {
    pub fn new(records: &[PriceIndexRecord]) -> Self {
        Self {
            by_year: records.iter().map(|r| (r.year, r.index)).collect(),
        }
    }

    fn index(&self, year: i32) -> ClusterResult<f64> {
        self.by_year
            .get(&year)
            .copied()
            .ok_or(ClusterError::MissingPriceIndex(year))
    }

    /// Convert a price in `base_year` dollars to `target_year` dollars
    pub fn adjust(&self, price: f64, base_year: i32, target_year: i32) -> ClusterResult<f64> {
        if base_year == target_year {
            return Ok(price);
        }
        Ok(price * self.index(target_year)? / self.index(base_year)?)
    }
}
