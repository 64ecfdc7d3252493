//! Technologies: conversion plants, storages and external (exogenously costed) components.
use crate::id::{FuelID, TechID, define_id_getter};
use anyhow::{Context, Result, ensure};
use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;
use serde_string_enum::DeserializeLabeledStringEnum;

/// A map of [`Tech`]s, keyed by technology ID
pub type TechMap = IndexMap<TechID, Tech>;

/// The kind of a technology, which determines its cost and balance treatment
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeserializeLabeledStringEnum)]
pub enum TechKind {
    /// Converts input fuels into output fuels (or produces from a renewable resource)
    #[string = "conversion"]
    Conversion,
    /// Stores a single fuel, charging and discharging it
    #[string = "storage"]
    Storage,
    /// A component outside the energy balance with exogenous investment and operational costs
    #[string = "external"]
    External,
}

/// Whether a fuel is an input or an output of a technology
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeserializeLabeledStringEnum)]
pub enum FlowDirection {
    /// The technology consumes the fuel
    #[string = "in"]
    Input,
    /// The technology produces the fuel
    #[string = "out"]
    Output,
}

fn default_one() -> f64 {
    1.0
}

fn default_infinity() -> f64 {
    f64::INFINITY
}

fn default_half() -> f64 {
    0.5
}

/// A technology as read from `techs.csv`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Tech {
    /// Unique identifier
    pub id: TechID,
    /// The kind of technology
    pub kind: TechKind,
    /// Unit of installed capacity
    #[serde(default)]
    pub unit: String,
    /// Unit of installed storage volume
    #[serde(default)]
    pub storage_unit: String,
    /// Conversion (or round-trip leg) efficiency
    #[serde(default = "default_one")]
    pub efficiency: f64,
    /// Whether capacity is measured on the input side (e.g. electrolysers)
    #[serde(default)]
    pub capacity_of_input: bool,
    /// Load fraction at which the efficiency is highest
    #[serde(default = "default_one")]
    pub part_load_max_eff: f64,
    /// Load fraction at which the efficiency curve bends
    #[serde(default = "default_one")]
    pub part_load_bend: f64,
    /// Loss coefficient for production above the max-efficiency point
    #[serde(default)]
    pub k_part_load_max_eff: f64,
    /// Loss coefficient for production above the bend point
    #[serde(default)]
    pub k_part_load_bend: f64,
    /// Auxiliary electricity demand per unit of linear production
    #[serde(default)]
    pub aux_electricity_demand: f64,
    /// Land use per unit of installed capacity (or volume for storages)
    #[serde(default)]
    pub land_use: f64,
    /// Upper limit of production relative to delivered demand of the produced fuel
    #[serde(default = "default_infinity")]
    pub production_upper_limit: f64,
    /// Capacity credit towards the firm capacity requirement
    #[serde(default)]
    pub capacity_value: f64,
    /// Technical lifetime in years
    #[serde(default = "default_one")]
    pub tech_lifetime: f64,
    /// Economic lifetime in years
    #[serde(default = "default_one")]
    pub econ_lifetime: f64,
    /// Available share of the storage volume
    #[serde(default = "default_one")]
    pub availability_storage_vol: f64,
    /// Ratio of storage volume to power (0 means unconstrained)
    #[serde(default)]
    pub energy_power_ratio: f64,
    /// Reward per unit of stored energy, removed again from the reported total costs
    #[serde(default)]
    pub high_storage_level_incentive: f64,
    /// Whether the technology belongs to the hydrogen system (for system cost shares)
    #[serde(default)]
    pub hydrogen_system: bool,
    /// Whether the technology carries a share of the system and external costs in its LCOE
    #[serde(default)]
    pub system_tech: bool,
    /// Whether the technology causes constant system self-consumption
    #[serde(default)]
    pub const_cons_system: bool,
    /// Whether the technology's investment is subsidised
    #[serde(default)]
    pub subsidy_tech: bool,
    /// Whether the technology counts towards the combined capacity limit of its node
    #[serde(default)]
    pub capacity_constraint_tech: bool,
    /// The fuel whose production drives an auxiliary medium flow, if any
    #[serde(default)]
    pub aux_medium_fuel: Option<FuelID>,
    /// Input fuels (read from `tech_fuels.csv`)
    #[serde(skip)]
    pub inputs: IndexSet<FuelID>,
    /// Output fuels (read from `tech_fuels.csv`)
    #[serde(skip)]
    pub outputs: IndexSet<FuelID>,
}
define_id_getter! {Tech, TechID}

impl Tech {
    /// Whether the technology is a storage
    pub fn is_storage(&self) -> bool {
        self.kind == TechKind::Storage
    }

    /// Whether the technology is external
    pub fn is_external(&self) -> bool {
        self.kind == TechKind::External
    }

    /// Whether the technology consumes the fuel
    pub fn has_input(&self, fuel: &FuelID) -> bool {
        self.inputs.contains(fuel)
    }

    /// Whether the technology produces the fuel
    pub fn has_output(&self, fuel: &FuelID) -> bool {
        self.outputs.contains(fuel)
    }

    /// Whether the technology has a non-trivial part-load efficiency curve
    pub fn is_part_load(&self) -> bool {
        self.k_part_load_max_eff > 0.0 || self.k_part_load_bend > 0.0
    }

    /// Efficiency applied to capacity when bounding the linear production proxy
    pub fn capacity_efficiency(&self) -> f64 {
        if self.capacity_of_input {
            self.efficiency
        } else {
            1.0
        }
    }

    /// The single input fuel of the technology.
    ///
    /// Returns an error if the technology has zero or several inputs.
    pub fn unique_input(&self) -> Result<&FuelID> {
        unique_fuel(&self.inputs)
            .with_context(|| format!("Technology {} must have exactly one input fuel", self.id))
    }

    /// The single output fuel of the technology.
    ///
    /// Returns an error if the technology has zero or several outputs.
    pub fn unique_output(&self) -> Result<&FuelID> {
        unique_fuel(&self.outputs)
            .with_context(|| format!("Technology {} must have exactly one output fuel", self.id))
    }

    /// The first declared input fuel, used where a primary input is reported
    pub fn primary_input(&self) -> Result<&FuelID> {
        self.inputs
            .first()
            .with_context(|| format!("Technology {} has no input fuel", self.id))
    }

    /// The first declared output fuel, used where a primary output is reported
    pub fn primary_output(&self) -> Result<&FuelID> {
        self.outputs
            .first()
            .with_context(|| format!("Technology {} has no output fuel", self.id))
    }

    /// The fuel whose flow measures the technology's load: the input for input-rated
    /// technologies, the output otherwise
    pub fn load_fuel(&self) -> Result<&FuelID> {
        if self.capacity_of_input {
            self.primary_input()
        } else {
            self.primary_output()
        }
    }
}

fn unique_fuel(fuels: &IndexSet<FuelID>) -> Result<&FuelID> {
    ensure!(fuels.len() == 1, "found {} fuels", fuels.len());
    Ok(&fuels[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, storage_tech};

    #[test]
    fn test_unique_input() {
        let tech = storage_tech("Battery", "Electricity");
        assert_eq!(tech.unique_input().unwrap(), &FuelID::new("Electricity"));
        assert_eq!(tech.unique_output().unwrap(), &FuelID::new("Electricity"));
    }

    #[test]
    fn test_unique_input_missing() {
        let mut tech = storage_tech("Battery", "Electricity");
        tech.inputs.clear();
        assert_error!(
            tech.unique_input(),
            "Technology Battery must have exactly one input fuel"
        );
    }

    #[test]
    fn test_unique_output_ambiguous() {
        let mut tech = storage_tech("Battery", "Electricity");
        tech.outputs.insert("Heat".into());
        assert!(tech.unique_output().is_err());
        assert_eq!(tech.primary_input().unwrap(), &FuelID::new("Electricity"));
    }

    #[test]
    fn test_capacity_efficiency() {
        let mut tech = storage_tech("Electrolyser", "Electricity");
        tech.kind = TechKind::Conversion;
        tech.efficiency = 0.7;
        assert_eq!(tech.capacity_efficiency(), 1.0);
        tech.capacity_of_input = true;
        assert_eq!(tech.capacity_efficiency(), 0.7);
    }
}
