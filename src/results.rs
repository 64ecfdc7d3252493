//! The values of a solved problem, looked up by the same indices the problem was built with.
//!
//! Variables which were never created (e.g. flows of a technology which is not active at a node)
//! read as zero.
use crate::id::{FuelID, NodeID, TechID};
use crate::model::Model;
use crate::optimisation::{
    BuiltModel, CostStreams, DiscountedCosts, LinExpr, NodeFlow, NodeTechYear, SettledFlow,
    TechConsumption, TechFlow,
};
use crate::solver::Solution;
use crate::time_index::TimeStep;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::hash::Hash;

fn value_of<K: Eq + Hash>(values: &IndexMap<K, f64>, key: &K) -> f64 {
    values.get(key).copied().unwrap_or(0.0)
}

/// Evaluate a map of expressions, in a stable (sorted) order
fn evaluate_stocks(
    exprs: &HashMap<NodeTechYear, LinExpr>,
    columns: &[f64],
) -> IndexMap<NodeTechYear, f64> {
    let mut values: IndexMap<_, _> = exprs
        .iter()
        .map(|(key, expr)| (key.clone(), expr.evaluate(columns)))
        .collect();
    values.sort_keys();
    values
}

/// The solution of a model
#[derive(Debug, Clone)]
pub struct Results {
    /// Value of every column
    pub columns: Vec<f64>,
    /// Value of the objective
    pub objective: f64,
    /// Annual cost and revenue streams
    pub costs: CostStreams<f64>,
    /// Present values of the cost streams
    pub discounted: DiscountedCosts<f64>,
    inst_cap: IndexMap<NodeTechYear, f64>,
    inst_storage_vol: IndexMap<NodeTechYear, f64>,
    cap_add: IndexMap<NodeTechYear, f64>,
    cap_sub: IndexMap<NodeTechYear, f64>,
    storage_vol_add: IndexMap<NodeTechYear, f64>,
    storage_vol_sub: IndexMap<NodeTechYear, f64>,
    f_prod: IndexMap<TechFlow, f64>,
    f_cons: IndexMap<TechConsumption, f64>,
    f_import: IndexMap<NodeFlow, f64>,
    f_import_timeseries: IndexMap<NodeFlow, f64>,
    f_fix_quant_import: IndexMap<NodeFlow, f64>,
    f_slack_pos: IndexMap<NodeFlow, f64>,
    f_slack_neg: IndexMap<NodeFlow, f64>,
    f_export: IndexMap<SettledFlow, f64>,
    f_export_timeseries: IndexMap<SettledFlow, f64>,
    f_delivery: IndexMap<SettledFlow, f64>,
    f_supply_cons_system: IndexMap<SettledFlow, f64>,
    f_network_capacity: IndexMap<(NodeID, FuelID, u32), f64>,
    storage_level: IndexMap<TechFlow, f64>,
    start_storage_level: IndexMap<(NodeID, TechID, FuelID), f64>,
    peak_el_demand: IndexMap<(NodeID, u32), f64>,
}

impl Results {
    /// Read the values of every variable and expression of a built model from a solution
    pub fn new(model: &Model, built: &BuiltModel, solution: &Solution) -> Self {
        let columns = &solution.columns;
        let vars = &built.variables;
        let costs = built.costs.evaluate(columns);
        let discounted = costs.discounted(&model.discounting(), model.parameters.subsidy_capex);

        Self {
            objective: solution.objective,
            costs,
            discounted,
            inst_cap: evaluate_stocks(&built.inst_cap, columns),
            inst_storage_vol: evaluate_stocks(&built.inst_storage_vol, columns),
            cap_add: vars.cap_add.values(columns),
            cap_sub: vars.cap_sub.values(columns),
            storage_vol_add: vars.storage_vol_add.values(columns),
            storage_vol_sub: vars.storage_vol_sub.values(columns),
            f_prod: vars.f_prod.values(columns),
            f_cons: vars.f_cons.values(columns),
            f_import: vars.f_import.values(columns),
            f_import_timeseries: vars.f_import_timeseries.values(columns),
            f_fix_quant_import: vars.f_fix_quant_import.values(columns),
            f_slack_pos: vars.f_slack_pos.values(columns),
            f_slack_neg: vars.f_slack_neg.values(columns),
            f_export: vars.f_export.values(columns),
            f_export_timeseries: vars.f_export_timeseries.values(columns),
            f_delivery: vars.f_delivery.values(columns),
            f_supply_cons_system: vars.f_supply_cons_system.values(columns),
            f_network_capacity: vars.f_network_capacity.values(columns),
            storage_level: vars.storage_level.values(columns),
            start_storage_level: vars.start_storage_level.values(columns),
            peak_el_demand: vars.peak_el_demand.values(columns),
            columns: columns.clone(),
        }
    }

    /// Installed capacity
    pub fn inst_cap(&self, node: &NodeID, tech: &TechID, year: u32) -> f64 {
        value_of(&self.inst_cap, &(node.clone(), tech.clone(), year))
    }

    /// Installed storage volume
    pub fn inst_storage_vol(&self, node: &NodeID, tech: &TechID, year: u32) -> f64 {
        value_of(&self.inst_storage_vol, &(node.clone(), tech.clone(), year))
    }

    /// Installed capacity of every technology, by node, technology and year
    pub fn inst_caps(&self) -> impl Iterator<Item = (&NodeTechYear, f64)> {
        self.inst_cap.iter().map(|(key, value)| (key, *value))
    }

    /// Installed volume of every storage, by node, technology and year
    pub fn inst_storage_vols(&self) -> impl Iterator<Item = (&NodeTechYear, f64)> {
        self.inst_storage_vol.iter().map(|(key, value)| (key, *value))
    }

    /// Added capacity
    pub fn cap_add(&self, node: &NodeID, tech: &TechID, year: u32) -> f64 {
        value_of(&self.cap_add, &(node.clone(), tech.clone(), year))
    }

    /// Retired capacity
    pub fn cap_sub(&self, node: &NodeID, tech: &TechID, year: u32) -> f64 {
        value_of(&self.cap_sub, &(node.clone(), tech.clone(), year))
    }

    /// Added storage volume
    pub fn storage_vol_add(&self, node: &NodeID, tech: &TechID, year: u32) -> f64 {
        value_of(&self.storage_vol_add, &(node.clone(), tech.clone(), year))
    }

    /// Retired storage volume
    pub fn storage_vol_sub(&self, node: &NodeID, tech: &TechID, year: u32) -> f64 {
        value_of(&self.storage_vol_sub, &(node.clone(), tech.clone(), year))
    }

    /// Production of a fuel (or storage discharge as a settlement fuel)
    pub fn f_prod(&self, node: &NodeID, tech: &TechID, fuel: &FuelID, step: &TimeStep) -> f64 {
        value_of(&self.f_prod, &(node.clone(), tech.clone(), fuel.clone(), *step))
    }

    /// Consumption of `fuel`, settled as `f1`
    pub fn f_cons(
        &self,
        node: &NodeID,
        tech: &TechID,
        fuel: &FuelID,
        f1: &FuelID,
        step: &TimeStep,
    ) -> f64 {
        value_of(
            &self.f_cons,
            &(node.clone(), tech.clone(), fuel.clone(), f1.clone(), *step),
        )
    }

    /// Imports
    pub fn f_import(&self, node: &NodeID, f1: &FuelID, step: &TimeStep) -> f64 {
        value_of(&self.f_import, &(node.clone(), f1.clone(), *step))
    }

    /// Spot-market imports
    pub fn f_import_timeseries(&self, node: &NodeID, f1: &FuelID, step: &TimeStep) -> f64 {
        value_of(&self.f_import_timeseries, &(node.clone(), f1.clone(), *step))
    }

    /// Number of fixed-quantity deliveries
    pub fn f_fix_quant_import(&self, node: &NodeID, f1: &FuelID, step: &TimeStep) -> f64 {
        value_of(&self.f_fix_quant_import, &(node.clone(), f1.clone(), *step))
    }

    /// Positive balance slack
    pub fn f_slack_pos(&self, node: &NodeID, f1: &FuelID, step: &TimeStep) -> f64 {
        value_of(&self.f_slack_pos, &(node.clone(), f1.clone(), *step))
    }

    /// Negative balance slack
    pub fn f_slack_neg(&self, node: &NodeID, f1: &FuelID, step: &TimeStep) -> f64 {
        value_of(&self.f_slack_neg, &(node.clone(), f1.clone(), *step))
    }

    /// Exports of `fuel`, settled as `f1`
    pub fn f_export(&self, node: &NodeID, fuel: &FuelID, f1: &FuelID, step: &TimeStep) -> f64 {
        value_of(
            &self.f_export,
            &(node.clone(), fuel.clone(), f1.clone(), *step),
        )
    }

    /// Spot-market exports of `fuel`, settled as `f1`
    pub fn f_export_timeseries(
        &self,
        node: &NodeID,
        fuel: &FuelID,
        f1: &FuelID,
        step: &TimeStep,
    ) -> f64 {
        value_of(
            &self.f_export_timeseries,
            &(node.clone(), fuel.clone(), f1.clone(), *step),
        )
    }

    /// Delivery to the demand for `fuel`, settled as `f1`
    pub fn f_delivery(&self, node: &NodeID, fuel: &FuelID, f1: &FuelID, step: &TimeStep) -> f64 {
        value_of(
            &self.f_delivery,
            &(node.clone(), fuel.clone(), f1.clone(), *step),
        )
    }

    /// Supply of the system self-consumption of `fuel`, settled as `f1`
    pub fn f_supply_cons_system(
        &self,
        node: &NodeID,
        fuel: &FuelID,
        f1: &FuelID,
        step: &TimeStep,
    ) -> f64 {
        value_of(
            &self.f_supply_cons_system,
            &(node.clone(), fuel.clone(), f1.clone(), *step),
        )
    }

    /// Required network capacity
    pub fn f_network_capacity(&self, node: &NodeID, fuel: &FuelID, year: u32) -> f64 {
        value_of(&self.f_network_capacity, &(node.clone(), fuel.clone(), year))
    }

    /// Stored energy, by settlement fuel
    pub fn storage_level(&self, node: &NodeID, tech: &TechID, f1: &FuelID, step: &TimeStep) -> f64 {
        value_of(
            &self.storage_level,
            &(node.clone(), tech.clone(), f1.clone(), *step),
        )
    }

    /// Stored energy before the first step, by settlement fuel
    pub fn start_storage_level(&self, node: &NodeID, tech: &TechID, f1: &FuelID) -> f64 {
        value_of(
            &self.start_storage_level,
            &(node.clone(), tech.clone(), f1.clone()),
        )
    }

    /// Peak electricity demand
    pub fn peak_el_demand(&self, node: &NodeID, year: u32) -> f64 {
        value_of(&self.peak_el_demand, &(node.clone(), year))
    }

    /// Total flow of a settlement fuel entering a node: production, imports and deliveries
    pub fn node_supply(&self, model: &Model, node: &NodeID, f1: &FuelID, step: &TimeStep) -> f64 {
        let production: f64 = model
            .techs
            .keys()
            .map(|tech| self.f_prod(node, tech, f1, step))
            .sum();

        production
            + self.f_import(node, f1, step)
            + self.f_import_timeseries(node, f1, step)
            + self.fix_quant_flow(model, node, f1, step)
    }

    /// Fixed-quantity deliveries expressed as a flow over one step
    pub fn fix_quant_flow(&self, model: &Model, node: &NodeID, f1: &FuelID, step: &TimeStep) -> f64 {
        self.f_fix_quant_import(node, f1, step) * model.trade(node, f1).fix_quant_size
            / model.time.delta_t()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{model, node_id, pv_id};
    use crate::optimisation::build_model;
    use crate::solver::{HighsSolver, Solver};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    #[rstest]
    fn test_results_of_solved_model(model: Model) {
        let built = build_model(&model).unwrap();
        let solution = HighsSolver.solve(&built.lp).unwrap();
        let results = Results::new(&model, &built, &solution);

        let node = node_id();
        let elec = FuelID::new("Electricity");
        let step = TimeStep::new(1, 1, 1, 0);
        assert_approx_eq!(
            f64,
            results.f_delivery(&node, &elec, &elec, &step),
            100.0,
            epsilon = 1e-6
        );

        // The PV plant costs nothing, so whatever it produces plus imports covers the demand
        let supply = results.node_supply(&model, &node, &elec, &step);
        assert_approx_eq!(f64, supply, 100.0, epsilon = 1e-6);
        assert!(results.inst_cap(&node, &pv_id(), 1) >= 0.0);
    }

    #[rstest]
    fn test_missing_values_read_as_zero(model: Model) {
        let built = build_model(&model).unwrap();
        let solution = Solution {
            columns: vec![0.0; built.lp.variables.len()],
            duals: Vec::new(),
            objective: 0.0,
        };
        let results = Results::new(&model, &built, &solution);
        let node = NodeID::new("Nowhere");
        let fuel = FuelID::new("Gas");
        let step = TimeStep::new(9, 9, 9, 0);
        assert_eq!(results.f_import(&node, &fuel, &step), 0.0);
        assert_eq!(results.inst_storage_vol(&node, &pv_id(), 9), 0.0);
    }
}
