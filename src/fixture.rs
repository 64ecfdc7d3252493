//! Fixtures for tests
use crate::fuel::{Fuel, FuelMap, FuelSubstitution};
use crate::id::{FuelID, NodeID, TechID};
use crate::model::{CalendarParameters, Model, ModelParameters, NodeFuelTrade};
use crate::tech::{Tech, TechKind, TechMap};
use crate::time_index::{TimeIndex, TimeStep};
use indexmap::{IndexMap, IndexSet};
use map_macro::hash_map;
use rstest::fixture;
use std::collections::HashMap;
use std::path::PathBuf;

/// Assert that an error with the given message occurs
macro_rules! assert_error {
    ($result:expr, $msg:expr) => {
        assert_eq!(
            $result.unwrap_err().chain().next().unwrap().to_string(),
            $msg
        );
    };
}
pub(crate) use assert_error;

/// A calendar with one year, one day and 24 hours
#[fixture]
pub fn calendar_params() -> CalendarParameters {
    CalendarParameters::default()
}

/// A fuel with the given ID and unit and no flags set
pub fn fuel(id: &str, unit: &str) -> Fuel {
    Fuel {
        id: id.into(),
        unit: unit.to_string(),
        vre: false,
        reference: false,
        spec_energy: 0.0,
        share_const_cons_system: 0.0,
    }
}

/// A technology of the given kind with default parameters
pub fn tech(id: &str, kind: TechKind) -> Tech {
    Tech {
        id: id.into(),
        kind,
        unit: "kW".to_string(),
        storage_unit: String::new(),
        efficiency: 1.0,
        capacity_of_input: false,
        part_load_max_eff: 1.0,
        part_load_bend: 1.0,
        k_part_load_max_eff: 0.0,
        k_part_load_bend: 0.0,
        aux_electricity_demand: 0.0,
        land_use: 0.0,
        production_upper_limit: f64::INFINITY,
        capacity_value: 0.0,
        tech_lifetime: 1.0,
        econ_lifetime: 1.0,
        availability_storage_vol: 1.0,
        energy_power_ratio: 0.0,
        high_storage_level_incentive: 0.0,
        hydrogen_system: false,
        system_tech: false,
        const_cons_system: false,
        subsidy_tech: false,
        capacity_constraint_tech: false,
        aux_medium_fuel: None,
        inputs: IndexSet::new(),
        outputs: IndexSet::new(),
    }
}

/// A storage which charges and discharges the given fuel
pub fn storage_tech(id: &str, fuel: &str) -> Tech {
    let mut tech = tech(id, TechKind::Storage);
    tech.storage_unit = "kWh".to_string();
    tech.inputs.insert(fuel.into());
    tech.outputs.insert(fuel.into());
    tech
}

/// A conversion technology with the given inputs and outputs
pub fn conversion_tech(id: &str, inputs: &[&str], outputs: &[&str]) -> Tech {
    let mut tech = tech(id, TechKind::Conversion);
    tech.inputs = inputs.iter().map(|&fuel| FuelID::new(fuel)).collect();
    tech.outputs = outputs.iter().map(|&fuel| FuelID::new(fuel)).collect();
    tech
}

/// A calendar of a single year, day and hour, used to keep fixture models small
pub fn single_step_calendar() -> CalendarParameters {
    CalendarParameters {
        hours: vec![1],
        scale_d_to: 1,
        scale_h_to: 1,
        ..CalendarParameters::default()
    }
}

/// Create a model from its parts, with no cost or limit data
pub fn build_model(calendar: CalendarParameters, fuels: FuelMap, techs: TechMap) -> Model {
    let parameters = ModelParameters {
        calendar,
        cap_switch: false,
        ..ModelParameters::default()
    };
    let time = TimeIndex::new(&parameters.calendar).unwrap();
    let substitution = FuelSubstitution::new(&fuels, []).unwrap();

    Model {
        model_dir: PathBuf::from("model"),
        parameters,
        time,
        nodes: IndexSet::from([NodeID::new("N1")]),
        fuels,
        substitution,
        techs,
        aux_media: IndexMap::new(),
        tech_costs: HashMap::new(),
        fuel_costs: HashMap::new(),
        aux_medium_costs: HashMap::new(),
        node_tech_limits: HashMap::new(),
        node_limits: HashMap::new(),
        storage_levels: HashMap::new(),
        storage_reserves: HashMap::new(),
        node_fuel_trade: HashMap::new(),
        node_fuel_year_trade: HashMap::new(),
        fix_quant_schedule: Default::default(),
        series: Default::default(),
    }
}

/// A one-node model in which a PV plant and electricity imports meet an electricity demand
#[fixture]
pub fn model() -> Model {
    let mut electricity = fuel("Electricity", "kWh");
    electricity.reference = true;
    let mut sun = fuel("Sun", "kWh");
    sun.vre = true;
    let fuels: FuelMap = [electricity, sun]
        .into_iter()
        .map(|fuel| (fuel.id.clone(), fuel))
        .collect();
    let techs: TechMap = [conversion_tech("PV", &["Sun"], &["Electricity"])]
        .into_iter()
        .map(|tech| (tech.id.clone(), tech))
        .collect();

    let mut model = build_model(single_step_calendar(), fuels, techs);
    let node = NodeID::new("N1");
    let elec = FuelID::new("Electricity");
    let step = TimeStep::new(1, 1, 1, 0);
    model.series.demand.insert((node.clone(), elec.clone()), step, 100.0);
    model.node_fuel_trade = hash_map! {
        (node, elec) => NodeFuelTrade {
            max_import: 1000.0,
            ..NodeFuelTrade::default()
        },
    };
    model
}

/// The node of [`model`]
pub fn node_id() -> NodeID {
    NodeID::new("N1")
}

/// The PV plant of [`model`]
pub fn pv_id() -> TechID {
    TechID::new("PV")
}
