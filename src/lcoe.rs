//! Allocation of levelised costs of energy (LCOE) to nodes, technologies and time steps.
//!
//! The marginal cost of a settlement fuel at a node is the flow-weighted blend of the costs of
//! everything supplying it: the levelised costs of the producing technologies and the prices of
//! imports. A technology's levelised cost in turn depends on the marginal costs of the fuels it
//! consumes, so both are found by fixed-point iteration. Each iteration maps an immutable
//! [`LcoeIterate`] onto the next one.
use crate::finance::{CostKind, Discounting};
use crate::id::{FuelID, NodeID, TechID};
use crate::kpi::{AnnualValues, consumed_fuels, produced_fuels};
use crate::model::Model;
use crate::optimisation::expressions::aux_medium_factor;
use crate::results::Results;
use crate::tech::Tech;
use crate::time_index::TimeStep;
use anyhow::Result;
use indexmap::IndexMap;
use log::{debug, info, warn};
use std::hash::Hash;

/// Marginal cost of a settlement fuel at a node in a time step
pub type NodeCostKey = (NodeID, FuelID, TimeStep);
/// A value per node, fuel and year
pub type NodeFuelYear = (NodeID, FuelID, u32);
/// A value per node, technology, fuel and year
pub type TechFuelYear = (NodeID, TechID, FuelID, u32);

fn get<K: Eq + Hash>(values: &IndexMap<K, f64>, key: &K) -> f64 {
    values.get(key).copied().unwrap_or(0.0)
}

/// One state of the fixed-point iteration
#[derive(Debug, Clone, PartialEq)]
pub struct LcoeIterate {
    /// Marginal cost of every settlement fuel at every node and step
    pub node_cost: IndexMap<NodeCostKey, f64>,
    /// Supply-weighted annual mean of the marginal costs
    pub mean: IndexMap<NodeFuelYear, f64>,
    /// Levelised cost of every technology's production
    pub tech: IndexMap<TechFuelYear, f64>,
    /// Sum of the absolute changes of the reference fuels' mean costs in the last update
    pub delta: f64,
}

impl LcoeIterate {
    /// The starting point: every cost is zero and no change has been measured yet
    pub fn initial() -> Self {
        Self {
            node_cost: IndexMap::new(),
            mean: IndexMap::new(),
            tech: IndexMap::new(),
            delta: f64::INFINITY,
        }
    }

    /// Marginal cost of a settlement fuel at a node in a step
    pub fn node_cost(&self, node: &NodeID, f1: &FuelID, step: &TimeStep) -> f64 {
        get(&self.node_cost, &(node.clone(), f1.clone(), *step))
    }

    /// Mean marginal cost of a fuel at a node in a year
    pub fn mean(&self, node: &NodeID, fuel: &FuelID, year: u32) -> f64 {
        get(&self.mean, &(node.clone(), fuel.clone(), year))
    }

    /// Levelised cost of a technology's production of a fuel
    pub fn tech(&self, node: &NodeID, tech: &TechID, fuel: &FuelID, year: u32) -> f64 {
        get(&self.tech, &(node.clone(), tech.clone(), fuel.clone(), year))
    }
}

/// The parts of a technology's levelised cost which do not depend on marginal costs
#[derive(Debug, Clone, Default)]
struct TechBase {
    /// Installed capacity per year
    inst_cap: IndexMap<u32, f64>,
    /// Discounted investment, fixed and variable O&M and share of system costs
    other_costs_disc: f64,
    /// As `other_costs_disc`, with variable O&M on the ideal production
    other_costs_ideal_disc: f64,
    /// Discounted production per output fuel
    prod_disc: IndexMap<FuelID, f64>,
    /// Discounted production per output fuel at full availability
    ideal_prod_disc: IndexMap<FuelID, f64>,
}

/// Everything the iteration needs from a solved model
pub struct LcoeContext<'a> {
    model: &'a Model,
    results: &'a Results,
    annual: &'a AnnualValues,
    steps: Vec<TimeStep>,
    discounting: Discounting,
    /// Total supply of every settlement fuel at every node and step
    supply: IndexMap<NodeCostKey, f64>,
    techs: IndexMap<(NodeID, TechID), TechBase>,
}

/// Efficiency applied to a technology's capacity to get its ideal output
fn output_efficiency(tech: &Tech) -> f64 {
    if tech.is_storage() || tech.capacity_of_input {
        tech.efficiency
    } else {
        1.0
    }
}

/// Efficiency dividing a technology's capacity to get its ideal input
fn input_efficiency(tech: &Tech) -> f64 {
    if tech.capacity_of_input && !tech.is_storage() {
        1.0
    } else {
        tech.efficiency
    }
}

impl<'a> LcoeContext<'a> {
    /// Precompute the supply of every node and the cost components of every technology
    pub fn new(model: &'a Model, results: &'a Results, annual: &'a AnnualValues) -> Result<Self> {
        let steps: Vec<TimeStep> = model.time.steps().collect();
        let mut context = Self {
            model,
            results,
            annual,
            discounting: model.discounting(),
            supply: IndexMap::new(),
            techs: IndexMap::new(),
            steps,
        };

        for node in &model.nodes {
            for f1 in model.substitution.settlement_fuels() {
                for step in &context.steps {
                    let supply = results.node_supply(model, node, f1, step);
                    context
                        .supply
                        .insert((node.clone(), f1.clone(), *step), supply);
                }
            }
        }

        let system_costs = {
            let discounted = &results.discounted;
            let external = |costs: &IndexMap<TechID, f64>| -> f64 {
                model
                    .external_techs()
                    .map(|tech| get(costs, &tech.id))
                    .sum()
            };
            discounted.capex_system
                + discounted.opex_system
                + external(&discounted.capex)
                + external(&discounted.opex)
        };
        let system_capex: f64 = model
            .techs
            .values()
            .filter(|tech| tech.system_tech)
            .map(|tech| get(&results.discounted.capex, &tech.id))
            .sum();

        for node in &model.nodes {
            for tech in model.techs.values().filter(|tech| !tech.is_external()) {
                let base = context.tech_base(node, tech, system_costs, system_capex)?;
                context.techs.insert((node.clone(), tech.id.clone()), base);
            }
        }

        Ok(context)
    }

    fn disc<F: FnMut(u32) -> f64>(&self, kind: CostKind, value: F) -> f64 {
        self.discounting
            .discount(kind, self.model.time.years.iter().copied(), value)
    }

    fn tech_base(
        &self,
        node: &NodeID,
        tech: &Tech,
        system_costs: f64,
        system_capex: f64,
    ) -> Result<TechBase> {
        let model = self.model;
        let results = self.results;
        let threshold = model.parameters.zero_threshold;
        let aef = model.time.annual_energy_factor();
        let years = &model.time.years;

        let inst_cap: IndexMap<u32, f64> = years
            .iter()
            .map(|&year| (year, results.inst_cap(node, &tech.id, year)))
            .collect();
        let installed = |year: u32| {
            if tech.is_storage() {
                results.inst_storage_vol(node, &tech.id, year)
            } else {
                inst_cap[&year]
            }
        };

        let produced = produced_fuels(model, tech)?;
        let production = |year: u32| -> f64 {
            produced
                .iter()
                .map(|f1| self.annual.production(node, &tech.id, f1, year))
                .sum()
        };
        // Annual output at full availability, per output fuel
        let ideal_prod = |year: u32| -> f64 {
            let available: f64 = model
                .time
                .steps_in_year(year)
                .map(|step| model.availability(node, &tech.id, &step))
                .sum();
            inst_cap[&year] * available * output_efficiency(tech) * aef
        };

        let capex_disc = self.disc(CostKind::Capex, |year| {
            get(&results.costs.capex, &(node.clone(), tech.id.clone(), year))
        });
        let fixed_disc = self.disc(CostKind::Opex, |year| {
            installed(year) * model.tech_costs(&tech.id, year).fixed_om
        });
        let var_disc = self.disc(CostKind::Opex, |year| {
            production(year) * model.tech_costs(&tech.id, year).variable_om
        });
        #[allow(clippy::cast_precision_loss)]
        let num_outputs = tech.outputs.len() as f64;
        let var_ideal_disc = self.disc(CostKind::Opex, |year| {
            ideal_prod(year) * num_outputs * model.tech_costs(&tech.id, year).variable_om
        });
        let system_share = if tech.system_tech && system_capex.abs() >= threshold {
            capex_disc / system_capex * system_costs
        } else {
            0.0
        };

        let mut prod_disc = IndexMap::new();
        let mut ideal_prod_disc = IndexMap::new();
        for fuel in &tech.outputs {
            let disc = if tech.is_storage() {
                self.disc(CostKind::Opex, production)
            } else {
                self.disc(CostKind::Opex, |year| {
                    self.annual.production(node, &tech.id, fuel, year)
                })
            };
            prod_disc.insert(fuel.clone(), disc);
            ideal_prod_disc.insert(fuel.clone(), self.disc(CostKind::Opex, ideal_prod));
        }

        Ok(TechBase {
            inst_cap,
            other_costs_disc: capex_disc + fixed_disc + var_disc + system_share,
            other_costs_ideal_disc: capex_disc + fixed_disc + var_ideal_disc + system_share,
            prod_disc,
            ideal_prod_disc,
        })
    }

    /// Annual cost of the fuels and auxiliary media a technology consumed, at the given marginal
    /// costs
    fn fuel_costs(&self, node: &NodeID, tech: &Tech, year: u32, iterate: &LcoeIterate) -> f64 {
        let model = self.model;
        let results = self.results;
        let inst_cap = results.inst_cap(node, &tech.id, year);
        let const_cons = if tech.const_cons_system { inst_cap } else { 0.0 };

        let mut costs = 0.0;
        for fuel in consumed_fuels(model, tech) {
            for f1 in model.balanced_substitutes(fuel) {
                let share = model
                    .fuels
                    .get(f1)
                    .map_or(0.0, |fuel| fuel.share_const_cons_system);
                costs += model
                    .time
                    .steps_in_year(year)
                    .map(|step| {
                        let consumed = results.f_cons(node, &tech.id, fuel, f1, &step);
                        (consumed + share * const_cons) * iterate.node_cost(node, f1, &step)
                    })
                    .sum::<f64>();
            }
        }
        costs *= model.time.annual_energy_factor();

        for medium in model.aux_media.values() {
            let price = model.aux_medium_cost(&medium.id, year);
            if price <= 0.0 {
                continue;
            }
            if let Some((fuel, factor)) = aux_medium_factor(model, tech, medium) {
                costs += self.annual.production(node, &tech.id, fuel, year) * factor * price;
            }
        }

        costs
    }

    /// Annual cost of the fuels a technology would consume at full availability, at the given
    /// marginal costs
    fn ideal_fuel_costs(&self, node: &NodeID, tech: &Tech, year: u32, iterate: &LcoeIterate) -> f64 {
        let model = self.model;
        let time = &model.time;
        let aef = time.annual_energy_factor();
        let inst_cap = self.results.inst_cap(node, &tech.id, year);
        let available: f64 = time
            .steps_in_year(year)
            .map(|step| model.availability(node, &tech.id, &step))
            .sum();
        let ideal_cons = inst_cap * available / input_efficiency(tech) * aef;
        #[allow(clippy::cast_precision_loss)]
        let steps_per_year = time.steps_in_year(year).count() as f64;

        let mut costs = 0.0;
        for (id, fuel) in &model.fuels {
            let mut quantity = 0.0;
            if tech.has_input(id) {
                quantity += ideal_cons;
            }
            if tech.const_cons_system {
                quantity += fuel.share_const_cons_system * inst_cap * steps_per_year * aef;
            }
            costs += quantity * iterate.mean(node, id, year);
        }

        if let Some(electricity) = model.electricity() {
            #[allow(clippy::cast_precision_loss)]
            let ideal_prod = inst_cap
                * available
                * output_efficiency(tech)
                * aef
                * tech.outputs.len() as f64;
            costs += ideal_prod * tech.aux_electricity_demand * iterate.mean(node, electricity, year);

            let profile: f64 = time
                .steps_in_year(year)
                .map(|step| {
                    let demand = model.fixed_demand_profile(node, &tech.id, &step)
                        + inst_cap * model.variable_demand_profile(node, &tech.id, &step);
                    demand * iterate.node_cost(node, electricity, &step)
                })
                .sum();
            costs += profile * aef;
        }

        costs
    }

    /// Supply-weighted annual mean of some marginal costs
    fn mean_costs(&self, node_cost: &IndexMap<NodeCostKey, f64>) -> IndexMap<NodeFuelYear, f64> {
        let model = self.model;
        let mut mean = IndexMap::new();
        for node in &model.nodes {
            for f1 in model.substitution.settlement_fuels() {
                for &year in &model.time.years {
                    let (weighted, total) = self
                        .steps
                        .iter()
                        .filter(|step| step.year == year)
                        .map(|step| {
                            let key = (node.clone(), f1.clone(), *step);
                            let supply = get(&self.supply, &key);
                            (get(node_cost, &key) * supply, supply)
                        })
                        .fold((0.0, 0.0), |(w, t), (dw, dt)| (w + dw, t + dt));
                    let value = if total == 0.0 { 0.0 } else { weighted / total };
                    mean.insert((node.clone(), f1.clone(), year), value);
                }
            }
        }

        mean
    }

    /// Levelised costs of the technologies' production at the given marginal costs.
    ///
    /// Costs which cannot be calculated keep their previous value.
    fn tech_costs(&self, iterate: &LcoeIterate) -> IndexMap<TechFuelYear, f64> {
        let model = self.model;
        let threshold = model.parameters.zero_threshold;
        let mut tech_costs = iterate.tech.clone();

        for ((node, id), base) in &self.techs {
            let tech = &model.techs[id];
            let fuel_costs_disc = self.disc(CostKind::Opex, |year| {
                if base.inst_cap[&year] < threshold {
                    0.0
                } else {
                    self.fuel_costs(node, tech, year, iterate)
                }
            });

            for (fuel, &prod_disc) in &base.prod_disc {
                if prod_disc < threshold {
                    continue;
                }
                let lcoe = (base.other_costs_disc + fuel_costs_disc) / prod_disc;

                let settled: Vec<&FuelID> = if tech.is_storage() {
                    model.balanced_substitutes(fuel).collect()
                } else {
                    vec![fuel]
                };
                for (&year, &inst_cap) in &base.inst_cap {
                    if inst_cap < threshold {
                        continue;
                    }
                    for f1 in &settled {
                        tech_costs.insert((node.clone(), id.clone(), (*f1).clone(), year), lcoe);
                    }
                }
            }
        }

        tech_costs
    }

    /// Marginal costs of every settlement fuel at the given technology costs
    fn node_costs(&self, tech_costs: &IndexMap<TechFuelYear, f64>) -> IndexMap<NodeCostKey, f64> {
        let model = self.model;
        let results = self.results;
        let threshold = model.parameters.zero_threshold;
        let mut node_cost = IndexMap::new();

        for (key, &supply) in &self.supply {
            let (node, f1, step) = key;
            if supply < threshold {
                node_cost.insert(key.clone(), 0.0);
                continue;
            }

            let conv = model.conversion_factor(f1);
            let prices = model.fuel_costs(f1, step.year);
            let produced: f64 = model
                .techs
                .values()
                .filter(|tech| !tech.is_external())
                .map(|tech| {
                    let lcoe = get(
                        tech_costs,
                        &(node.clone(), tech.id.clone(), f1.clone(), step.year),
                    );
                    results.f_prod(node, &tech.id, f1, step) * lcoe
                })
                .sum();
            let imported = results.f_import(node, f1, step) * prices.import_cost
                + results.f_import_timeseries(node, f1, step)
                    * (model.import_price(f1, step) + prices.import_timeseries_fee)
                + results.fix_quant_flow(model, node, f1, step) * prices.fix_quant_cost;

            node_cost.insert(key.clone(), (produced + imported * conv) / supply);
        }

        node_cost
    }

    /// Perform one iteration
    pub fn update(&self, previous: &LcoeIterate) -> LcoeIterate {
        let model = self.model;
        let mean = self.mean_costs(&previous.node_cost);
        let mut delta = 0.0;
        for node in &model.nodes {
            for fuel in model.reference_fuels() {
                for &year in &model.time.years {
                    let key = (node.clone(), fuel.clone(), year);
                    delta += (get(&mean, &key) - get(&previous.mean, &key)).abs();
                }
            }
        }

        let with_mean = LcoeIterate {
            mean,
            delta,
            ..previous.clone()
        };
        let tech = self.tech_costs(&with_mean);
        let node_cost = self.node_costs(&tech);

        LcoeIterate {
            node_cost,
            tech,
            ..with_mean
        }
    }
}

/// The outcome of the LCOE allocation
#[derive(Debug, Clone, PartialEq)]
pub struct LcoeReport {
    /// The last iterate
    pub iterate: LcoeIterate,
    /// Number of iterations performed
    pub iterations: u32,
    /// Whether the mean costs converged
    pub converged: bool,
    /// Levelised cost of technologies operated at full availability
    pub ideal: IndexMap<TechFuelYear, f64>,
    /// Mean marginal cost of the fuels consumed by technologies
    pub consumed: IndexMap<TechFuelYear, f64>,
    /// Mean marginal cost of exported fuels
    pub export: IndexMap<NodeFuelYear, f64>,
    /// Marginal cost of deliveries per unit of demand
    pub demand: IndexMap<NodeFuelYear, f64>,
}

/// Run the fixed-point iteration, starting from `start`
pub fn iterate_lcoe(context: &LcoeContext, start: LcoeIterate) -> (LcoeIterate, u32, bool) {
    let params = &context.model.parameters;
    let threshold = params.zero_threshold;
    let mut iterate = start;
    let mut iterations = 0;
    while (iterate.delta > threshold || iterations + 1 < params.lcoe_min_iterations)
        && iterations + 1 < params.lcoe_max_iterations
    {
        iterate = context.update(&iterate);
        iterations += 1;
        debug!("LCOE iteration {iterations}: delta = {}", iterate.delta);
    }

    let converged = iterate.delta <= threshold;
    if converged {
        info!("LCOE allocation converged after {iterations} iterations");
    } else {
        warn!(
            "LCOE allocation stopped after {iterations} iterations without converging (delta = {})",
            iterate.delta
        );
    }

    (iterate, iterations, converged)
}

/// Allocate levelised costs for a solved model
pub fn allocate_lcoe(model: &Model, results: &Results, annual: &AnnualValues) -> Result<LcoeReport> {
    info!("Calculating levelised costs of energy");
    let context = LcoeContext::new(model, results, annual)?;
    let (iterate, iterations, converged) = iterate_lcoe(&context, LcoeIterate::initial());

    let mut report = LcoeReport {
        ideal: IndexMap::new(),
        consumed: IndexMap::new(),
        export: IndexMap::new(),
        demand: IndexMap::new(),
        iterate,
        iterations,
        converged,
    };
    context.fill_report(&mut report);

    Ok(report)
}

impl LcoeContext<'_> {
    /// A flow-weighted mean of the marginal costs of the settlement fuels of a fuel in a year
    fn settled_cost<F>(
        &self,
        iterate: &LcoeIterate,
        node: &NodeID,
        fuel: &FuelID,
        year: u32,
        mut flow: F,
    ) -> (f64, f64)
    where
        F: FnMut(&FuelID, &TimeStep) -> f64,
    {
        let mut weighted = 0.0;
        let mut total = 0.0;
        for f1 in self.model.balanced_substitutes(fuel) {
            for step in self.steps.iter().filter(|step| step.year == year) {
                let quantity = flow(f1, step);
                weighted += quantity * iterate.node_cost(node, f1, step);
                total += quantity;
            }
        }

        (weighted, total)
    }

    fn fill_report(&self, report: &mut LcoeReport) {
        let model = self.model;
        let results = self.results;
        let threshold = model.parameters.zero_threshold;
        let iterate = &report.iterate;

        for node in &model.nodes {
            for &year in &model.time.years {
                for fuel in model.fuels.keys() {
                    let key = (node.clone(), fuel.clone(), year);
                    let (weighted, exported) = self.settled_cost(iterate, node, fuel, year, |f1, step| {
                        results.f_export(node, fuel, f1, step)
                            + results.f_export_timeseries(node, fuel, f1, step)
                    });
                    let export = if exported < threshold { 0.0 } else { weighted / exported };
                    report.export.insert(key.clone(), export);

                    let demand: f64 = self
                        .steps
                        .iter()
                        .filter(|step| step.year == year)
                        .map(|step| model.demand(node, fuel, step))
                        .sum();
                    let (weighted, _) = self.settled_cost(iterate, node, fuel, year, |f1, step| {
                        results.f_delivery(node, fuel, f1, step)
                    });
                    let demand = if demand < threshold { 0.0 } else { weighted / demand };
                    report.demand.insert(key, demand);
                }
            }
        }

        for ((node, id), base) in &self.techs {
            let tech = &model.techs[id];
            for (&year, &inst_cap) in &base.inst_cap {
                if inst_cap < threshold {
                    continue;
                }
                for fuel in model.fuels.keys() {
                    let (weighted, consumed) = self.settled_cost(iterate, node, fuel, year, |f1, step| {
                        results.f_cons(node, id, fuel, f1, step)
                    });
                    let cost = if consumed < threshold { 0.0 } else { weighted / consumed };
                    report
                        .consumed
                        .insert((node.clone(), id.clone(), fuel.clone(), year), cost);
                }
            }

            let fuel_costs_disc = self.disc(CostKind::Opex, |year| {
                if base.inst_cap[&year] < threshold {
                    0.0
                } else {
                    self.ideal_fuel_costs(node, tech, year, iterate)
                }
            });
            for (fuel, &prod_disc) in &base.ideal_prod_disc {
                let lcoe = if prod_disc < threshold {
                    0.0
                } else {
                    (base.other_costs_ideal_disc + fuel_costs_disc) / prod_disc
                };
                for (&year, &inst_cap) in &base.inst_cap {
                    if inst_cap >= threshold {
                        report
                            .ideal
                            .insert((node.clone(), id.clone(), fuel.clone(), year), lcoe);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{model, node_id, pv_id};
    use crate::model::{FuelCosts, NodeTechLimits, TechCosts};
    use crate::optimisation::build_model;
    use crate::solver::{HighsSolver, Solver};
    use float_cmp::assert_approx_eq;
    use rstest::{fixture, rstest};

    fn elec() -> FuelID {
        FuelID::new("Electricity")
    }

    fn step() -> TimeStep {
        TimeStep::new(1, 1, 1, 0)
    }

    /// The fixture model with a PV plant cheaper than imports, limited to 60 kW
    #[fixture]
    fn priced_model(mut model: Model) -> Model {
        model.tech_costs.insert(
            (pv_id(), 1),
            TechCosts {
                invest: 10.0,
                ..TechCosts::default()
            },
        );
        model.fuel_costs.insert(
            (elec(), 1),
            FuelCosts {
                // 20 per kWh
                import_cost: 20_000.0,
                ..FuelCosts::default()
            },
        );
        model.node_tech_limits.insert(
            (node_id(), pv_id(), 1),
            NodeTechLimits {
                max_inst_cap: 60.0,
                ..NodeTechLimits::default()
            },
        );
        model
    }

    fn solve(model: &Model) -> (Results, AnnualValues) {
        let built = build_model(model).unwrap();
        let solution = HighsSolver.solve(&built.lp).unwrap();
        let results = Results::new(model, &built, &solution);
        let annual = AnnualValues::new(model, &results).unwrap();
        (results, annual)
    }

    #[rstest]
    fn test_allocate_lcoe(priced_model: Model) {
        let (results, annual) = solve(&priced_model);
        let report = allocate_lcoe(&priced_model, &results, &annual).unwrap();
        let (node, elec) = (node_id(), elec());

        // 600 of investment spread over 60 kWh
        assert_approx_eq!(
            f64,
            report.iterate.tech(&node, &pv_id(), &elec, 1),
            10.0,
            epsilon = 1e-6
        );
        // 60 kWh at 10 and 40 kWh imported at 20
        assert_approx_eq!(
            f64,
            report.iterate.node_cost(&node, &elec, &step()),
            14.0,
            epsilon = 1e-6
        );
        assert_approx_eq!(f64, report.iterate.mean(&node, &elec, 1), 14.0, epsilon = 1e-6);
        assert_approx_eq!(
            f64,
            report.demand[&(node.clone(), elec.clone(), 1)],
            14.0,
            epsilon = 1e-6
        );
        assert_eq!(report.export[&(node, elec, 1)], 0.0);
        assert!(report.converged);
        assert!(report.iterations >= priced_model.parameters.lcoe_min_iterations - 1);
    }

    #[rstest]
    fn test_converged_iterate_is_stable(priced_model: Model) {
        let (results, annual) = solve(&priced_model);
        let context = LcoeContext::new(&priced_model, &results, &annual).unwrap();
        let (converged, _, _) = iterate_lcoe(&context, LcoeIterate::initial());

        let next = context.update(&converged);
        assert!(next.delta < priced_model.parameters.zero_threshold);
        assert_eq!(next.tech, converged.tech);
    }

    #[rstest]
    fn test_iteration_respects_bounds(mut priced_model: Model) {
        priced_model.parameters.lcoe_min_iterations = 3;
        priced_model.parameters.lcoe_max_iterations = 3;
        let (results, annual) = solve(&priced_model);
        let context = LcoeContext::new(&priced_model, &results, &annual).unwrap();
        let (_, iterations, _) = iterate_lcoe(&context, LcoeIterate::initial());
        assert_eq!(iterations, 2);
    }

    #[rstest]
    fn test_tech_cost_kept_without_production(priced_model: Model) {
        let (results, annual) = solve(&priced_model);
        let context = LcoeContext::new(&priced_model, &results, &annual).unwrap();
        let key = (node_id(), TechID::new("Idle"), elec(), 1);
        let mut start = LcoeIterate::initial();
        start.tech.insert(key.clone(), 5.0);

        let next = context.update(&start);
        assert_eq!(next.tech[&key], 5.0);
    }

    #[test]
    fn test_efficiencies() {
        let mut tech = crate::fixture::conversion_tech("E", &["Electricity"], &["H2"]);
        tech.efficiency = 0.5;
        assert_eq!(output_efficiency(&tech), 1.0);
        assert_eq!(input_efficiency(&tech), 0.5);

        tech.capacity_of_input = true;
        assert_eq!(output_efficiency(&tech), 0.5);
        assert_eq!(input_efficiency(&tech), 1.0);
    }
}
