//! Technology classification built once from settings.
//!
//! Every enrichment that depends on a technology name (startup fuel, startup
//! cost, fuel label, model tags) is compiled into an ordered rule list here.
//! A resource table is then classified once per distinct (region, technology)
//! pair instead of re-matching names in every enrichment step.

use crate::error::{ClusterError, ClusterResult};
use crate::inflation::PriceIndex;
use crate::models::{FuelPriceRecord, Resource};
use crate::settings::{Settings, UserFuelPrice};
use log::{info, warn};
use regex::Regex;
use std::collections::HashMap;

/// How a configured technology name is compared with a resource technology
#[derive(Debug, Clone)]
pub enum TechPattern {
    Exact(String),
    /// Lowercase, trailing underscores stripped, then equal
    Normalized(String),
    Contains { needle: String, case_sensitive: bool },
    /// Anchored prefix on the underscore-stripped technology name
    Prefix(Regex),
}

impl TechPattern {
    pub fn contains_ci(needle: &str) -> Self {
        TechPattern::Contains {
            needle: needle.to_lowercase(),
            case_sensitive: false,
        }
    }

    pub fn contains(needle: &str) -> Self {
        TechPattern::Contains {
            needle: needle.to_string(),
            case_sensitive: true,
        }
    }

    pub fn normalized(name: &str) -> Self {
        TechPattern::Normalized(name.to_lowercase())
    }

    pub fn prefix(name: &str) -> ClusterResult<Self> {
        let pattern = format!("(?i)^{}", regex::escape(&strip_underscores(name)));
        Ok(TechPattern::Prefix(Regex::new(&pattern)?))
    }

    pub fn matches(&self, technology: &str) -> bool {
        match self {
            TechPattern::Exact(name) => technology == name,
            TechPattern::Normalized(name) => {
                technology.trim_end_matches('_').to_lowercase() == *name
            }
            TechPattern::Contains {
                needle,
                case_sensitive: true,
            } => technology.contains(needle.as_str()),
            TechPattern::Contains { needle, .. } => {
                technology.to_lowercase().contains(needle.as_str())
            }
            TechPattern::Prefix(re) => re.is_match(&strip_underscores(technology)),
        }
    }
}

fn strip_underscores(name: &str) -> String {
    name.replace('_', "")
}

#[derive(Debug, Clone)]
struct FuelRule {
    pattern: TechPattern,
    /// Model regions the rule applies to; `None` applies everywhere
    regions: Option<Vec<String>>,
    label: String,
    /// Only set the label when no earlier rule has
    fill_only: bool,
}

#[derive(Debug, Clone)]
struct TagRule {
    tag: String,
    pattern: TechPattern,
    region: Option<String>,
    value: f64,
}

/// Everything the enrichment stage needs to know about one technology in one region
#[derive(Debug, Clone, PartialEq)]
pub struct TechnologyClass {
    pub start_fuel_mmbtu_per_mw: f64,
    pub start_cost_per_mw: f64,
    pub fuel: String,
    pub tags: Vec<(String, f64)>,
}

pub struct TechnologyIndex {
    start_fuel: Vec<(TechPattern, f64)>,
    start_cost: Vec<(TechPattern, f64)>,
    fuel: Vec<FuelRule>,
    tag_names: Vec<String>,
    default_tag: f64,
    tags: Vec<TagRule>,
}

impl TechnologyIndex {
    /// Compile every technology rule in the settings
    pub fn build(
        settings: &Settings,
        fuel_prices: &[FuelPriceRecord],
        price_index: &PriceIndex,
    ) -> ClusterResult<Self> {
        Ok(Self {
            start_fuel: Self::start_fuel_rules(settings)?,
            start_cost: Self::start_cost_rules(settings, price_index)?,
            fuel: Self::fuel_rules(settings, fuel_prices)?,
            tag_names: settings.model_tag_names.clone(),
            default_tag: settings.default_model_tag,
            tags: Self::tag_rules(settings)?,
        })
    }

    fn start_fuel_rules(settings: &Settings) -> ClusterResult<Vec<(TechPattern, f64)>> {
        let mut rules = Vec::new();
        for (eia_tech, fuel_use) in &settings.startup_fuel_use {
            for tech in settings.atb_techs_for(eia_tech)? {
                rules.push((TechPattern::contains_ci(&tech), *fuel_use));
            }
        }
        Ok(rules)
    }

    fn start_cost_rules(
        settings: &Settings,
        price_index: &PriceIndex,
    ) -> ClusterResult<Vec<(TechPattern, f64)>> {
        if settings.existing_startup_costs_tech_map.is_empty()
            && settings.new_build_startup_costs.is_empty()
        {
            return Ok(vec![]);
        }
        let costs_type = settings
            .startup_costs_type
            .clone()
            .ok_or_else(|| ClusterError::MissingSetting("startup_costs_type".to_string()))?;
        let mut cold_start = settings
            .startup_cost_table()
            .ok_or_else(|| ClusterError::MissingSetting(costs_type.clone()))?;
        let mut vom = settings.startup_vom_costs_mw.clone();

        if let Some(target) = settings.target_usd_year {
            if let Some(vom_year) = settings.startup_vom_costs_usd_year {
                info!("Changing non-fuel VOM costs from {} to {}", vom_year, target);
                for cost in vom.values_mut() {
                    *cost = price_index.adjust(*cost, vom_year, target)?;
                }
            }
            if let Some(start_year) = settings.startup_costs_per_cold_start_usd_year {
                info!("Changing non-fuel startup costs from {} to {}", start_year, target);
                for cost in cold_start.values_mut() {
                    *cost = price_index.adjust(*cost, start_year, target)?;
                }
            }
        }

        let total = |cost_tech: &str| -> ClusterResult<f64> {
            let v = vom.get(cost_tech).ok_or_else(|| {
                ClusterError::MissingSetting(format!("startup_vom_costs_mw.{}", cost_tech))
            })?;
            let s = cold_start.get(cost_tech).ok_or_else(|| {
                ClusterError::MissingSetting(format!("{}.{}", costs_type, cost_tech))
            })?;
            Ok(v + s)
        };

        let mut rules = Vec::new();
        for (existing_tech, cost_tech) in &settings.existing_startup_costs_tech_map {
            rules.push((TechPattern::contains_ci(existing_tech), total(cost_tech)?));
        }
        for (new_tech, cost_tech) in &settings.new_build_startup_costs {
            rules.push((TechPattern::contains(new_tech), total(cost_tech)?));
        }
        Ok(rules)
    }

    fn fuel_rules(
        settings: &Settings,
        fuel_prices: &[FuelPriceRecord],
    ) -> ClusterResult<Vec<FuelRule>> {
        let mut rules = Vec::new();

        for (eia_tech, fuel) in &settings.tech_fuel_map {
            // There is no new-build gas steam turbine; its ATB mapping points at coal
            let atb_prefixes: Vec<String> = if eia_tech == "Natural Gas Steam Turbine" {
                vec![]
            } else {
                settings
                    .eia_atb_tech_map
                    .get(eia_tech)
                    .map(|techs| {
                        techs
                            .to_vec()
                            .iter()
                            .map(|t| format!("{}_", t.split('_').next().unwrap_or(t)))
                            .collect()
                    })
                    .unwrap_or_default()
            };
            let atb_rules = |regions: Option<Vec<String>>, label: &str| -> Vec<FuelRule> {
                atb_prefixes
                    .iter()
                    .map(|prefix| FuelRule {
                        pattern: TechPattern::contains_ci(prefix),
                        regions: regions.clone(),
                        label: label.to_string(),
                        fill_only: true,
                    })
                    .collect()
            };

            match settings.aeo_fuel_scenarios.get(fuel) {
                Some(scenario) => {
                    for (aeo_region, model_regions) in &settings.aeo_fuel_region_map {
                        let fuel_name = format!("{}_{}_{}", aeo_region, scenario, fuel);
                        let priced = fuel_prices.iter().any(|p| {
                            p.year == settings.model_year && p.full_fuel_name == fuel_name
                        });
                        if !priced {
                            return Err(ClusterError::MissingFuelPrice {
                                fuel_name,
                                year: settings.model_year,
                            });
                        }
                        rules.push(FuelRule {
                            pattern: TechPattern::Exact(eia_tech.clone()),
                            regions: Some(model_regions.clone()),
                            label: fuel_name.clone(),
                            fill_only: false,
                        });
                        rules.extend(atb_rules(Some(model_regions.clone()), &fuel_name));
                    }
                }
                None => match settings.user_fuel_price.get(fuel) {
                    Some(UserFuelPrice::Regional(prices)) => {
                        for region in prices.keys() {
                            let fuel_name = format!("{}_{}", region, fuel);
                            rules.push(FuelRule {
                                pattern: TechPattern::normalized(eia_tech),
                                regions: Some(vec![region.clone()]),
                                label: fuel_name.clone(),
                                fill_only: false,
                            });
                            rules.extend(atb_rules(Some(vec![region.clone()]), &fuel_name));
                        }
                    }
                    Some(UserFuelPrice::Flat(_)) => {
                        rules.push(FuelRule {
                            pattern: TechPattern::normalized(eia_tech),
                            regions: None,
                            label: fuel.clone(),
                            fill_only: true,
                        });
                        rules.extend(atb_rules(None, fuel));
                    }
                    None => return Err(ClusterError::UnpricedFuel(fuel.clone())),
                },
            }
        }

        for (ccs_tech, ccs_fuel) in &settings.ccs_fuel_map {
            let base = match ccs_fuel.rfind('_') {
                Some(pos) => &ccs_fuel[..pos],
                None => "",
            };
            if let Some(scenario) = settings.aeo_fuel_scenarios.get(base) {
                for (aeo_region, model_regions) in &settings.aeo_fuel_region_map {
                    rules.push(FuelRule {
                        pattern: TechPattern::contains(ccs_tech),
                        regions: Some(model_regions.clone()),
                        label: format!("{}_{}_{}", aeo_region, scenario, ccs_fuel),
                        fill_only: false,
                    });
                }
            } else if let Some(user_price) = settings.user_fuel_price.get(base) {
                match user_price {
                    UserFuelPrice::Regional(prices) => {
                        for region in prices.keys() {
                            rules.push(FuelRule {
                                pattern: TechPattern::contains(ccs_tech),
                                regions: Some(vec![region.clone()]),
                                label: format!("{}_{}", region, ccs_fuel),
                                fill_only: false,
                            });
                        }
                    }
                    UserFuelPrice::Flat(_) => rules.push(FuelRule {
                        pattern: TechPattern::contains(ccs_tech),
                        regions: None,
                        label: ccs_fuel.clone(),
                        fill_only: false,
                    }),
                }
            } else {
                warn!(
                    "The fuel {} is included in `ccs_fuel_map` but can't be matched against an \
                     AEO or user fuel. CCS fuels should have the format <fuel name>_ccs<capture rate>",
                    ccs_fuel
                );
            }
        }

        Ok(rules)
    }

    fn tag_rules(settings: &Settings) -> ClusterResult<Vec<TagRule>> {
        let mut rules = Vec::new();
        for tag in &settings.model_tag_names {
            match settings.model_tag_values.get(tag) {
                Some(values) => {
                    for (tech, value) in values {
                        rules.push(TagRule {
                            tag: tag.clone(),
                            pattern: TechPattern::prefix(tech)?,
                            region: None,
                            value: *value,
                        });
                    }
                }
                None => warn!("No model tag values found for {}", tag),
            }
        }
        for (region, tag_values) in &settings.regional_tag_values {
            for (tag, values) in tag_values {
                for (tech, value) in values {
                    rules.push(TagRule {
                        tag: tag.clone(),
                        pattern: TechPattern::prefix(tech)?,
                        region: Some(region.clone()),
                        value: *value,
                    });
                }
            }
        }
        Ok(rules)
    }

    fn last_match(rules: &[(TechPattern, f64)], technology: &str) -> Option<f64> {
        rules
            .iter()
            .filter(|(pattern, _)| pattern.matches(technology))
            .map(|(_, value)| *value)
            .last()
    }

    /// Fuel label for a technology in a region, "None" when no rule applies
    pub fn fuel_label(&self, region: &str, technology: &str) -> String {
        let mut label: Option<&str> = None;
        for rule in &self.fuel {
            let in_region = rule
                .regions
                .as_ref()
                .map_or(true, |regions| regions.iter().any(|r| r == region));
            if !in_region || !rule.pattern.matches(technology) {
                continue;
            }
            if !rule.fill_only || label.is_none() {
                label = Some(&rule.label);
            }
        }
        label.unwrap_or("None").to_string()
    }

    pub fn tags(&self, region: &str, technology: &str) -> Vec<(String, f64)> {
        let mut tags: Vec<(String, f64)> = self
            .tag_names
            .iter()
            .map(|name| (name.clone(), self.default_tag))
            .collect();
        for rule in &self.tags {
            let in_region = rule.region.as_deref().map_or(true, |r| r == region);
            if !in_region || !rule.pattern.matches(technology) {
                continue;
            }
            match tags.iter_mut().find(|(name, _)| *name == rule.tag) {
                Some(entry) => entry.1 = rule.value,
                None => tags.push((rule.tag.clone(), rule.value)),
            }
        }
        tags
    }

    pub fn classify(&self, region: &str, technology: &str) -> TechnologyClass {
        TechnologyClass {
            start_fuel_mmbtu_per_mw: Self::last_match(&self.start_fuel, technology).unwrap_or(0.0),
            start_cost_per_mw: Self::last_match(&self.start_cost, technology).unwrap_or(0.0),
            fuel: self.fuel_label(region, technology),
            tags: self.tags(region, technology),
        }
    }

    /// Attach startup, fuel and tag columns to every resource
    pub fn apply(&self, resources: &mut [Resource]) {
        let mut classes: HashMap<(String, String), TechnologyClass> = HashMap::new();
        for resource in resources.iter_mut() {
            let key = (resource.region.clone(), resource.technology.clone());
            let class = classes
                .entry(key)
                .or_insert_with(|| self.classify(&resource.region, &resource.technology));
            resource.start_fuel_mmbtu_per_mw = class.start_fuel_mmbtu_per_mw;
            resource.start_cost_per_mw = class.start_cost_per_mw;
            resource.fuel = class.fuel.clone();
            for (name, value) in &class.tags {
                resource.set_tag(name, *value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceIndexRecord;

    const SETTINGS: &str = r#"
model_year: 2030
data_years: [2020]
model_regions: [east, west]
num_clusters:
  Conventional Steam Coal: 1
eia_atb_tech_map:
  Conventional Steam Coal: Coal_newAvgCF
  Natural Gas Fired Combined Cycle: [NaturalGas_CCAvgCF, NaturalGas_CCCCSAvgCF]
  Onshore Wind Turbine: LandbasedWind_Class3
startup_fuel_use:
  Conventional Steam Coal: 16.5
  Natural Gas Fired Combined Cycle: 2.0
startup_costs_type: startup_costs_per_cold_start_mw
startup_costs_per_cold_start_mw:
  coal: 100.0
  ngcc: 80.0
startup_vom_costs_mw:
  coal: 10.0
  ngcc: 1.0
startup_vom_costs_usd_year: 2018
startup_costs_per_cold_start_usd_year: 2018
target_usd_year: 2020
existing_startup_costs_tech_map:
  Conventional Steam Coal: coal
  Combined Cycle: ngcc
new_build_startup_costs:
  NaturalGas_CC: ngcc
tech_fuel_map:
  Conventional Steam Coal: coal
  Natural Gas Fired Combined Cycle: naturalgas
  Biomass: biomass
  Wood: wood
ccs_fuel_map:
  CCS90: coal_ccs90
aeo_fuel_scenarios:
  coal: reference
  naturalgas: high_resource
aeo_fuel_region_map:
  mountain: [west]
  south_atlantic: [east]
user_fuel_price:
  biomass: 4.5
  wood:
    east: 2.0
model_tag_names: [THERM, VRE]
default_model_tag: 0
model_tag_values:
  THERM:
    Conventional Steam: 1
    Natural Gas_Fired: 1
    NaturalGas: 1
  VRE:
    Onshore Wind: 1
    Landbased_Wind: 1
regional_tag_values:
  west:
    THERM:
      Conventional Steam Coal: 2
"#;

    fn fuel_prices() -> Vec<FuelPriceRecord> {
        let mut prices = vec![];
        for (aeo_region, scenario, fuel) in [
            ("mountain", "reference", "coal"),
            ("south_atlantic", "reference", "coal"),
            ("mountain", "high_resource", "naturalgas"),
            ("south_atlantic", "high_resource", "naturalgas"),
        ] {
            prices.push(FuelPriceRecord {
                year: 2030,
                price: 2.0,
                fuel: fuel.to_string(),
                region: aeo_region.to_string(),
                scenario: scenario.to_string(),
                full_fuel_name: format!("{}_{}_{}", aeo_region, scenario, fuel),
            });
        }
        prices
    }

    fn price_index() -> PriceIndex {
        PriceIndex::new(&[
            PriceIndexRecord { year: 2018, index: 100.0 },
            PriceIndexRecord { year: 2020, index: 110.0 },
        ])
    }

    fn index() -> TechnologyIndex {
        let settings = Settings::from_yaml_str(SETTINGS).unwrap();
        TechnologyIndex::build(&settings, &fuel_prices(), &price_index()).unwrap()
    }

    #[test]
    fn test_prefix_pattern_ignores_underscores_and_case() {
        let pattern = TechPattern::prefix("Landbased_Wind").unwrap();
        assert!(pattern.matches("LandbasedWind_Class3_Moderate"));
        assert!(pattern.matches("landbasedwind"));
        assert!(!pattern.matches("OffshoreLandbasedWind"));
    }

    #[test]
    fn test_startup_fuel_matches_eia_and_atb_names() {
        let index = index();
        assert_eq!(index.classify("east", "Conventional Steam Coal").start_fuel_mmbtu_per_mw, 16.5);
        assert_eq!(index.classify("east", "Coal_newAvgCF_Moderate").start_fuel_mmbtu_per_mw, 16.5);
        assert_eq!(index.classify("east", "NaturalGas_CCAvgCF_Moderate").start_fuel_mmbtu_per_mw, 2.0);
        assert_eq!(index.classify("east", "Onshore Wind Turbine").start_fuel_mmbtu_per_mw, 0.0);
    }

    #[test]
    fn test_startup_costs_are_inflation_adjusted() {
        let index = index();
        let coal = index.classify("east", "Conventional Steam Coal").start_cost_per_mw;
        assert!((coal - 121.0).abs() < 1e-9);
        let cc = index.classify("east", "Natural Gas Fired Combined Cycle").start_cost_per_mw;
        assert!((cc - 89.1).abs() < 1e-9);
        // New-build matching is case sensitive
        assert_eq!(index.classify("east", "naturalgas_cc").start_cost_per_mw, 0.0);
    }

    #[test]
    fn test_aeo_fuel_labels_by_region() {
        let index = index();
        assert_eq!(
            index.fuel_label("east", "Conventional Steam Coal"),
            "south_atlantic_reference_coal"
        );
        assert_eq!(
            index.fuel_label("west", "NaturalGas_CCAvgCF_Moderate"),
            "mountain_high_resource_naturalgas"
        );
        assert_eq!(index.fuel_label("west", "Onshore Wind Turbine"), "None");
    }

    #[test]
    fn test_ccs_fuel_label() {
        let index = index();
        assert_eq!(
            index.fuel_label("west", "Coal_CCS90AvgCF_Moderate"),
            "mountain_reference_coal_ccs90"
        );
    }

    #[test]
    fn test_user_fuel_labels() {
        let index = index();
        assert_eq!(index.fuel_label("west", "Biomass_"), "biomass");
        assert_eq!(index.fuel_label("east", "wood"), "east_wood");
        assert_eq!(index.fuel_label("west", "Wood"), "None");
    }

    #[test]
    fn test_missing_fuel_price_names_series() {
        let settings = Settings::from_yaml_str(SETTINGS).unwrap();
        let prices: Vec<_> = fuel_prices().into_iter().filter(|p| p.fuel != "coal").collect();
        match TechnologyIndex::build(&settings, &prices, &price_index()) {
            Err(ClusterError::MissingFuelPrice { fuel_name, year }) => {
                assert_eq!(fuel_name, "mountain_reference_coal");
                assert_eq!(year, 2030);
            }
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("expected a missing fuel price"),
        }
    }

    #[test]
    fn test_unpriced_fuel_is_rejected() {
        let text = SETTINGS.replace("Wood: wood", "Wood: peat");
        let settings = Settings::from_yaml_str(&text).unwrap();
        assert!(matches!(
            TechnologyIndex::build(&settings, &fuel_prices(), &price_index()),
            Err(ClusterError::UnpricedFuel(fuel)) if fuel == "peat"
        ));
    }

    #[test]
    fn test_model_tags_with_regional_override() {
        let index = index();
        let east = index.tags("east", "Conventional Steam Coal");
        assert_eq!(east, vec![("THERM".to_string(), 1.0), ("VRE".to_string(), 0.0)]);
        let west = index.tags("west", "Conventional Steam Coal");
        assert_eq!(west[0].1, 2.0);
        let wind = index.tags("east", "LandbasedWind_Class3_Moderate");
        assert_eq!(wind[1].1, 1.0);
    }

    #[test]
    fn test_apply_sets_resource_columns() {
        let index = index();
        let mut resources = vec![
            Resource::new("east", "Conventional Steam Coal", 1),
            Resource::new("east", "Onshore Wind Turbine", 1),
        ];
        index.apply(&mut resources);
        assert_eq!(resources[0].fuel, "south_atlantic_reference_coal");
        assert_eq!(resources[0].tag("THERM"), Some(1.0));
        assert_eq!(resources[1].fuel, "None");
        assert_eq!(resources[1].tag("VRE"), Some(1.0));
    }
}
