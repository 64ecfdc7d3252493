//! The model definition: sets and parameter collections that together describe an energy system.
//!
//! Every parameter collection is sparse. Lookups for keys absent from the input data return the
//! parameter's default value.
use crate::finance::Discounting;
use crate::fuel::{FuelMap, FuelSubstitution};
use crate::id::{AuxMediumID, FuelID, NodeID, TechID};
use crate::tech::{Tech, TechMap};
use crate::time_index::{TimeIndex, TimeStep};
use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::path::PathBuf;

pub mod parameters;
pub use parameters::{CalendarParameters, ModelParameters, UnitConversion};

fn default_one() -> f64 {
    1.0
}

fn default_infinity() -> f64 {
    f64::INFINITY
}

/// Costs of a technology in a given year
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct TechCosts {
    /// Investment cost per unit of added capacity (or volume for storages)
    #[serde(default)]
    pub invest: f64,
    /// Fixed O&M cost per unit of installed capacity (or volume) and year
    #[serde(default)]
    pub fixed_om: f64,
    /// Variable O&M cost per unit of energy
    #[serde(default)]
    pub variable_om: f64,
    /// Investment costs of an external technology
    #[serde(default)]
    pub external_capex: f64,
    /// Operational costs of an external technology
    #[serde(default)]
    pub external_opex: f64,
}

/// Prices and fees of a fuel in a given year
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct FuelCosts {
    /// Price of imports
    #[serde(default)]
    pub import_cost: f64,
    /// Price received for exports
    #[serde(default)]
    pub export_price: f64,
    /// Fee added to spot-market import prices
    #[serde(default)]
    pub import_timeseries_fee: f64,
    /// Fee deducted from spot-market export prices
    #[serde(default)]
    pub export_timeseries_fee: f64,
    /// Price of fixed-quantity imports
    #[serde(default)]
    pub fix_quant_cost: f64,
}

/// Capacity, volume and unit-size limits of a technology at a node in a given year
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct NodeTechLimits {
    /// Size of one capacity unit
    #[serde(default = "default_one")]
    pub unit_cap: f64,
    /// Size of one storage volume unit
    #[serde(default = "default_one")]
    pub unit_volume: f64,
    /// Minimum installed capacity
    #[serde(default)]
    pub min_inst_cap: f64,
    /// Maximum installed capacity (zero disables the technology at the node)
    #[serde(default = "default_infinity")]
    pub max_inst_cap: f64,
    /// Minimum capacity addition
    #[serde(default)]
    pub min_cap_add: f64,
    /// Maximum capacity addition
    #[serde(default = "default_infinity")]
    pub max_cap_add: f64,
    /// Minimum capacity retirement
    #[serde(default)]
    pub min_cap_sub: f64,
    /// Maximum capacity retirement
    #[serde(default = "default_infinity")]
    pub max_cap_sub: f64,
    /// Minimum installed storage volume
    #[serde(default)]
    pub min_inst_storage_vol: f64,
    /// Maximum installed storage volume (zero disables the storage at the node)
    #[serde(default = "default_infinity")]
    pub max_inst_storage_vol: f64,
    /// Minimum storage volume addition
    #[serde(default)]
    pub min_storage_vol_add: f64,
    /// Maximum storage volume addition
    #[serde(default = "default_infinity")]
    pub max_storage_vol_add: f64,
    /// Minimum storage volume retirement
    #[serde(default)]
    pub min_storage_vol_sub: f64,
    /// Maximum storage volume retirement
    #[serde(default = "default_infinity")]
    pub max_storage_vol_sub: f64,
}

impl Default for NodeTechLimits {
    fn default() -> Self {
        Self {
            unit_cap: 1.0,
            unit_volume: 1.0,
            min_inst_cap: 0.0,
            max_inst_cap: f64::INFINITY,
            min_cap_add: 0.0,
            max_cap_add: f64::INFINITY,
            min_cap_sub: 0.0,
            max_cap_sub: f64::INFINITY,
            min_inst_storage_vol: 0.0,
            max_inst_storage_vol: f64::INFINITY,
            min_storage_vol_add: 0.0,
            max_storage_vol_add: f64::INFINITY,
            min_storage_vol_sub: 0.0,
            max_storage_vol_sub: f64::INFINITY,
        }
    }
}

/// Limits applying to a whole node in a given year
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct NodeLimits {
    /// Minimum combined capacity of flagged technologies
    #[serde(default)]
    pub min_combined_cap: f64,
    /// Maximum combined capacity of flagged technologies
    #[serde(default = "default_infinity")]
    pub max_combined_cap: f64,
    /// Maximum land area
    #[serde(default = "default_infinity")]
    pub max_area: f64,
}

impl Default for NodeLimits {
    fn default() -> Self {
        Self {
            min_combined_cap: 0.0,
            max_combined_cap: f64::INFINITY,
            max_area: f64::INFINITY,
        }
    }
}

/// Storage level bounds of a storage at a node, as fractions of the installed volume
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct StorageLevels {
    /// Level at the start (and end) of the modelled period
    #[serde(default = "default_start_level")]
    pub start: f64,
    /// Minimum level
    #[serde(default)]
    pub min: f64,
    /// Maximum level
    #[serde(default = "default_one")]
    pub max: f64,
}

fn default_start_level() -> f64 {
    0.5
}

impl Default for StorageLevels {
    fn default() -> Self {
        Self {
            start: default_start_level(),
            min: 0.0,
            max: 1.0,
        }
    }
}

/// Energy reserve required from a storage at a node for a fuel
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct StorageReserve {
    /// Static minimum stored energy
    #[serde(default)]
    pub min_energy_reserve: f64,
    /// Look-ahead window of the rolling reserve in hours (zero disables it)
    #[serde(default)]
    pub window: u32,
    /// Security factor applied to the rolling demand sum
    #[serde(default = "default_one")]
    pub factor: f64,
}

impl Default for StorageReserve {
    fn default() -> Self {
        Self {
            min_energy_reserve: 0.0,
            window: 0,
            factor: 1.0,
        }
    }
}

/// Trade limits and slack costs of a fuel at a node
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct NodeFuelTrade {
    /// Penalty per unit of slack
    #[serde(default = "default_slack_cost")]
    pub slack_cost: f64,
    /// Minimum import flow
    #[serde(default)]
    pub min_import: f64,
    /// Maximum import flow (zero disables imports)
    #[serde(default)]
    pub max_import: f64,
    /// Minimum export flow
    #[serde(default)]
    pub min_export: f64,
    /// Maximum export flow (zero disables exports)
    #[serde(default)]
    pub max_export: f64,
    /// Minimum grid injection, relative to the network flow profile
    #[serde(default)]
    pub min_injection: f64,
    /// Maximum grid injection, relative to the network flow profile
    #[serde(default)]
    pub max_injection: f64,
    /// Size of one fixed-quantity delivery
    #[serde(default)]
    pub fix_quant_size: f64,
    /// Maximum number of fixed-quantity deliveries per step (zero disables them)
    #[serde(default)]
    pub max_fix_quant: u32,
}

fn default_slack_cost() -> f64 {
    1e4
}

impl Default for NodeFuelTrade {
    fn default() -> Self {
        Self {
            slack_cost: default_slack_cost(),
            min_import: 0.0,
            max_import: 0.0,
            min_export: 0.0,
            max_export: 0.0,
            min_injection: 0.0,
            max_injection: 0.0,
            fix_quant_size: 0.0,
            max_fix_quant: 0,
        }
    }
}

/// Spot-market limits and network charges of a fuel at a node in a given year
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct NodeFuelYearTrade {
    /// Minimum spot-market import flow
    #[serde(default)]
    pub min_import_timeseries: f64,
    /// Maximum spot-market import flow (zero disables spot imports)
    #[serde(default)]
    pub max_import_timeseries: f64,
    /// Minimum spot-market export flow
    #[serde(default)]
    pub min_export_timeseries: f64,
    /// Maximum spot-market export flow (zero disables spot exports)
    #[serde(default)]
    pub max_export_timeseries: f64,
    /// Charge per unit of required network capacity
    #[serde(default)]
    pub network_capacity_charge: f64,
}

/// An auxiliary medium (e.g. process water) whose flow follows the production of a fuel
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuxMedium {
    /// Unique identifier
    pub id: AuxMediumID,
    /// Medium volume per unit of fuel mass
    #[serde(default)]
    pub spec_medium_ratio: f64,
}

/// The weekdays and hours at which fixed-quantity deliveries may arrive
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FixQuantSchedule {
    /// Allowed `(node, fuel, weekday)` combinations, weekdays numbered 1 to 7
    pub days: HashSet<(NodeID, FuelID, u32)>,
    /// Allowed `(node, fuel, hour)` combinations
    pub hours: HashSet<(NodeID, FuelID, u32)>,
}

impl FixQuantSchedule {
    /// Whether a delivery may arrive in the given step.
    ///
    /// Deliveries only arrive at the first sub-hour of a scheduled hour on a scheduled weekday.
    pub fn allows(&self, node: &NodeID, fuel: &FuelID, step: &TimeStep) -> bool {
        let weekday = (step.day + 6) % 7 + 1;
        step.sub_hour == 0
            && self
                .days
                .contains(&(node.clone(), fuel.clone(), weekday))
            && self
                .hours
                .contains(&(node.clone(), fuel.clone(), step.hour))
    }
}

/// A parameter varying over time, keyed by `K` and a time step
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries<K: Eq + Hash> {
    values: HashMap<K, HashMap<TimeStep, f64>>,
    default: f64,
}

impl<K: Eq + Hash> TimeSeries<K> {
    /// Create an empty time series with the given default value
    pub fn new(default: f64) -> Self {
        Self {
            values: HashMap::new(),
            default,
        }
    }

    /// Set a value, returning the previous value if there was one
    pub fn insert(&mut self, key: K, step: TimeStep, value: f64) -> Option<f64> {
        self.values.entry(key).or_default().insert(step, value)
    }

    /// Get a value, or the default if absent
    pub fn get(&self, key: &K, step: &TimeStep) -> f64 {
        self.values
            .get(key)
            .and_then(|series| series.get(step))
            .copied()
            .unwrap_or(self.default)
    }

    /// Whether any value was supplied for the key
    pub fn has_key(&self, key: &K) -> bool {
        self.values.contains_key(key)
    }
}

/// All time-varying parameters of a model
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesData {
    /// Exogenous demand per node and fuel
    pub demand: TimeSeries<(NodeID, FuelID)>,
    /// Availability of technologies per node
    pub availability: TimeSeries<(NodeID, TechID)>,
    /// Fixed electricity demand profile of technologies
    pub fixed_demand_profile: TimeSeries<(NodeID, TechID)>,
    /// Electricity demand profile of technologies per unit of installed capacity
    pub variable_demand_profile: TimeSeries<(NodeID, TechID)>,
    /// Spot-market import prices per fuel
    pub import_price: TimeSeries<FuelID>,
    /// Spot-market export prices per fuel
    pub export_price: TimeSeries<FuelID>,
    /// Network flow profile scaling the injection limits
    pub network_flow: TimeSeries<(NodeID, FuelID)>,
}

impl Default for TimeSeriesData {
    fn default() -> Self {
        Self {
            demand: TimeSeries::new(0.0),
            availability: TimeSeries::new(1.0),
            fixed_demand_profile: TimeSeries::new(0.0),
            variable_demand_profile: TimeSeries::new(0.0),
            import_price: TimeSeries::new(0.0),
            export_price: TimeSeries::new(0.0),
            network_flow: TimeSeries::new(0.0),
        }
    }
}

/// Model definition
#[derive(Debug, Clone)]
pub struct Model {
    /// Path to model folder
    pub model_dir: PathBuf,
    /// Parameters from the model TOML file
    pub parameters: ModelParameters,
    /// The sampled calendar
    pub time: TimeIndex,
    /// Nodes of the system
    pub nodes: IndexSet<NodeID>,
    /// Fuels
    pub fuels: FuelMap,
    /// The fuel-substitution relation
    pub substitution: FuelSubstitution,
    /// Technologies
    pub techs: TechMap,
    /// Auxiliary media
    pub aux_media: IndexMap<AuxMediumID, AuxMedium>,
    /// Technology costs per year
    pub tech_costs: HashMap<(TechID, u32), TechCosts>,
    /// Fuel prices per year
    pub fuel_costs: HashMap<(FuelID, u32), FuelCosts>,
    /// Auxiliary medium costs per year
    pub aux_medium_costs: HashMap<(AuxMediumID, u32), f64>,
    /// Technology limits per node and year
    pub node_tech_limits: HashMap<(NodeID, TechID, u32), NodeTechLimits>,
    /// Node limits per year
    pub node_limits: HashMap<(NodeID, u32), NodeLimits>,
    /// Storage level bounds per node
    pub storage_levels: HashMap<(NodeID, TechID), StorageLevels>,
    /// Storage reserves per node and fuel
    pub storage_reserves: HashMap<(NodeID, TechID, FuelID), StorageReserve>,
    /// Trade limits per node and fuel
    pub node_fuel_trade: HashMap<(NodeID, FuelID), NodeFuelTrade>,
    /// Spot-market limits per node, fuel and year
    pub node_fuel_year_trade: HashMap<(NodeID, FuelID, u32), NodeFuelYearTrade>,
    /// Fixed-quantity delivery schedule
    pub fix_quant_schedule: FixQuantSchedule,
    /// Time-varying parameters
    pub series: TimeSeriesData,
}

impl Model {
    /// Present-value weights for the model's calendar and discounting parameters
    pub fn discounting(&self) -> Discounting {
        let params = &self.parameters;
        Discounting::new(
            &self.time,
            params.discount_rate,
            params.capex_discount_offset,
            params.opex_discount_offset,
        )
    }

    /// Costs of a technology in a year
    pub fn tech_costs(&self, tech: &TechID, year: u32) -> TechCosts {
        self.tech_costs
            .get(&(tech.clone(), year))
            .copied()
            .unwrap_or_default()
    }

    /// Prices of a fuel in a year
    pub fn fuel_costs(&self, fuel: &FuelID, year: u32) -> FuelCosts {
        self.fuel_costs
            .get(&(fuel.clone(), year))
            .copied()
            .unwrap_or_default()
    }

    /// Cost of an auxiliary medium in a year
    pub fn aux_medium_cost(&self, medium: &AuxMediumID, year: u32) -> f64 {
        self.aux_medium_costs
            .get(&(medium.clone(), year))
            .copied()
            .unwrap_or(0.0)
    }

    /// Limits of a technology at a node in a year
    pub fn limits(&self, node: &NodeID, tech: &TechID, year: u32) -> NodeTechLimits {
        self.node_tech_limits
            .get(&(node.clone(), tech.clone(), year))
            .copied()
            .unwrap_or_default()
    }

    /// Limits of a node in a year
    pub fn node_limits(&self, node: &NodeID, year: u32) -> NodeLimits {
        self.node_limits
            .get(&(node.clone(), year))
            .copied()
            .unwrap_or_default()
    }

    /// Storage level bounds of a storage at a node
    pub fn storage_levels(&self, node: &NodeID, tech: &TechID) -> StorageLevels {
        self.storage_levels
            .get(&(node.clone(), tech.clone()))
            .copied()
            .unwrap_or_default()
    }

    /// Reserve requirement of a storage at a node for a fuel
    pub fn storage_reserve(&self, node: &NodeID, tech: &TechID, fuel: &FuelID) -> StorageReserve {
        self.storage_reserves
            .get(&(node.clone(), tech.clone(), fuel.clone()))
            .copied()
            .unwrap_or_default()
    }

    /// Trade limits of a fuel at a node
    pub fn trade(&self, node: &NodeID, fuel: &FuelID) -> NodeFuelTrade {
        self.node_fuel_trade
            .get(&(node.clone(), fuel.clone()))
            .copied()
            .unwrap_or_default()
    }

    /// Spot-market limits of a fuel at a node in a year
    pub fn year_trade(&self, node: &NodeID, fuel: &FuelID, year: u32) -> NodeFuelYearTrade {
        self.node_fuel_year_trade
            .get(&(node.clone(), fuel.clone(), year))
            .copied()
            .unwrap_or_default()
    }

    /// Demand for a fuel at a node
    pub fn demand(&self, node: &NodeID, fuel: &FuelID, step: &TimeStep) -> f64 {
        self.series
            .demand
            .get(&(node.clone(), fuel.clone()), step)
    }

    /// Availability of a technology at a node
    pub fn availability(&self, node: &NodeID, tech: &TechID, step: &TimeStep) -> f64 {
        self.series
            .availability
            .get(&(node.clone(), tech.clone()), step)
    }

    /// Fixed electricity demand of a technology at a node
    pub fn fixed_demand_profile(&self, node: &NodeID, tech: &TechID, step: &TimeStep) -> f64 {
        self.series
            .fixed_demand_profile
            .get(&(node.clone(), tech.clone()), step)
    }

    /// Electricity demand of a technology at a node per unit of installed capacity
    pub fn variable_demand_profile(&self, node: &NodeID, tech: &TechID, step: &TimeStep) -> f64 {
        self.series
            .variable_demand_profile
            .get(&(node.clone(), tech.clone()), step)
    }

    /// Network flow profile of a fuel at a node
    pub fn network_flow(&self, node: &NodeID, fuel: &FuelID, step: &TimeStep) -> f64 {
        self.series
            .network_flow
            .get(&(node.clone(), fuel.clone()), step)
    }

    /// Spot-market import price of a fuel
    pub fn import_price(&self, fuel: &FuelID, step: &TimeStep) -> f64 {
        self.series.import_price.get(fuel, step)
    }

    /// Spot-market export price of a fuel
    pub fn export_price(&self, fuel: &FuelID, step: &TimeStep) -> f64 {
        self.series.export_price.get(fuel, step)
    }

    /// Whether a technology may be installed at a node in a year
    pub fn is_active(&self, node: &NodeID, tech: &TechID, year: u32) -> bool {
        self.limits(node, tech, year).max_inst_cap > 0.0
    }

    /// Whether a storage may be installed at a node in a year (needs both power and volume)
    pub fn is_storage_active(&self, node: &NodeID, tech: &TechID, year: u32) -> bool {
        let limits = self.limits(node, tech, year);
        limits.max_inst_cap > 0.0 && limits.max_inst_storage_vol > 0.0
    }

    /// The electricity fuel, if it is part of the model
    pub fn electricity(&self) -> Option<&FuelID> {
        self.fuels
            .get_key_value(self.parameters.electricity_fuel.as_str())
            .map(|(id, _)| id)
    }

    /// Whether the fuel is the electricity fuel
    pub fn is_electricity(&self, fuel: &FuelID) -> bool {
        fuel.0.as_ref() == self.parameters.electricity_fuel
    }

    /// Factor converting quantities of a fuel into its reporting unit
    pub fn conversion_factor(&self, fuel: &FuelID) -> f64 {
        self.fuels
            .get(fuel)
            .and_then(|fuel| self.parameters.unit_conversion.get(&fuel.unit))
            .map_or(1.0, |conv| conv.factor)
    }

    /// The reporting unit of a fuel
    pub fn reporting_unit(&self, fuel: &FuelID) -> &str {
        self.fuels
            .get(fuel)
            .and_then(|fuel| self.parameters.unit_conversion.get(&fuel.unit))
            .map_or("", |conv| conv.new_unit.as_str())
    }

    /// Fuels flagged as reference fuels
    pub fn reference_fuels(&self) -> impl Iterator<Item = &FuelID> {
        self.fuels
            .values()
            .filter(|fuel| fuel.reference)
            .map(|fuel| &fuel.id)
    }

    /// Whether the fuel is a variable renewable source
    pub fn is_vre(&self, fuel: &FuelID) -> bool {
        self.fuels.get(fuel).is_some_and(|fuel| fuel.vre)
    }

    /// Settlement fuels that balances are booked in (settlement and not variable renewable)
    pub fn balanced_fuels(&self) -> impl Iterator<Item = &FuelID> {
        self.substitution
            .settlement_fuels()
            .filter(|fuel| !self.is_vre(fuel))
    }

    /// The balanced fuels a quantity of `fuel` can be settled as
    pub fn balanced_substitutes<'a>(&'a self, fuel: &'a FuelID) -> impl Iterator<Item = &'a FuelID> {
        self.substitution
            .settlement_substitutes(fuel)
            .iter()
            .filter(|f1| !self.is_vre(f1))
    }

    /// Storage technologies
    pub fn storage_techs(&self) -> impl Iterator<Item = &Tech> {
        self.techs.values().filter(|tech| tech.is_storage())
    }

    /// Technologies which take part in the energy balance but are not storages
    pub fn conversion_techs(&self) -> impl Iterator<Item = &Tech> {
        self.techs
            .values()
            .filter(|tech| !tech.is_storage() && !tech.is_external())
    }

    /// External technologies
    pub fn external_techs(&self) -> impl Iterator<Item = &Tech> {
        self.techs.values().filter(|tech| tech.is_external())
    }
}
