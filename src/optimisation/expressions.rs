//! Expressions derived from the decision variables, and the annual cost and revenue streams.
//!
//! Cost streams are generic over their value type so the same discounting code serves both the
//! objective (streams of [`LinExpr`]) and the reporting of a solution (streams of `f64`).
use super::{Builder, LinExpr, NodeTechYear};
use crate::finance::{CostKind, Discountable, Discounting};
use crate::id::{AuxMediumID, FuelID, NodeID, TechID};
use crate::model::{AuxMedium, Model};
use crate::tech::Tech;
use crate::time_index::TimeStep;
use anyhow::Result;
use indexmap::IndexMap;
use std::hash::Hash;
use std::ops::AddAssign;

/// Annual costs and revenues, per year and the index dimensions of each stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostStreams<T> {
    /// Investment in capacity (or storage volume)
    pub capex: IndexMap<NodeTechYear, T>,
    /// Fixed and variable operation and maintenance
    pub opex: IndexMap<NodeTechYear, T>,
    /// Investment in external technologies
    pub external_capex: IndexMap<(TechID, u32), T>,
    /// Operational costs of external technologies
    pub external_opex: IndexMap<(TechID, u32), T>,
    /// Imports and fixed-quantity deliveries
    pub opex_fuel: IndexMap<(NodeID, FuelID, u32), T>,
    /// Spot-market imports
    pub opex_timeseries: IndexMap<(FuelID, u32), T>,
    /// Auxiliary media
    pub opex_auxmedium: IndexMap<(NodeID, TechID, AuxMediumID, u32), T>,
    /// Network capacity charges
    pub opex_network: IndexMap<(NodeID, FuelID, u32), T>,
    /// Export revenues (negative)
    pub revenue: IndexMap<(FuelID, u32), T>,
    /// Spot-market export revenues (negative)
    pub revenue_timeseries: IndexMap<(FuelID, u32), T>,
    /// Investment subsidies (negative)
    pub capex_subsidy: IndexMap<(NodeID, u32), T>,
    /// System investment, as a share of the hydrogen-system investment
    pub capex_system: IndexMap<(NodeID, u32), T>,
    /// System operational costs, as a share of the system investment
    pub opex_system: IndexMap<(NodeID, u32), T>,
    /// Project margin on added capacity
    pub project_margin: IndexMap<u32, T>,
    /// Taxes on operational costs
    pub opex_taxes: IndexMap<u32, T>,
    /// Penalty for slack over the whole horizon
    pub slack: T,
    /// Reward for stored energy over the whole horizon (negative)
    pub storage_incentive: IndexMap<TechID, T>,
}

fn map_stream<K, T, U, F>(stream: &IndexMap<K, T>, f: &F) -> IndexMap<K, U>
where
    K: Clone + Eq + Hash,
    F: Fn(&T) -> U,
{
    stream.iter().map(|(key, value)| (key.clone(), f(value))).collect()
}

fn merge<G: Eq + Hash, T: Discountable>(into: &mut IndexMap<G, T>, from: IndexMap<G, T>) {
    for (key, value) in from {
        *into.entry(key).or_default() += value;
    }
}

impl<T> CostStreams<T> {
    /// Transform every value of the streams
    pub fn map<U, F: Fn(&T) -> U>(&self, f: F) -> CostStreams<U> {
        CostStreams {
            capex: map_stream(&self.capex, &f),
            opex: map_stream(&self.opex, &f),
            external_capex: map_stream(&self.external_capex, &f),
            external_opex: map_stream(&self.external_opex, &f),
            opex_fuel: map_stream(&self.opex_fuel, &f),
            opex_timeseries: map_stream(&self.opex_timeseries, &f),
            opex_auxmedium: map_stream(&self.opex_auxmedium, &f),
            opex_network: map_stream(&self.opex_network, &f),
            revenue: map_stream(&self.revenue, &f),
            revenue_timeseries: map_stream(&self.revenue_timeseries, &f),
            capex_subsidy: map_stream(&self.capex_subsidy, &f),
            capex_system: map_stream(&self.capex_system, &f),
            opex_system: map_stream(&self.opex_system, &f),
            project_margin: map_stream(&self.project_margin, &f),
            opex_taxes: map_stream(&self.opex_taxes, &f),
            slack: f(&self.slack),
            storage_incentive: map_stream(&self.storage_incentive, &f),
        }
    }
}

impl CostStreams<LinExpr> {
    /// The values of the streams in a solution
    pub fn evaluate(&self, columns: &[f64]) -> CostStreams<f64> {
        self.map(|expr| expr.evaluate(columns))
    }
}

impl<T: Discountable + Clone> CostStreams<T> {
    /// Discount the streams to present values.
    ///
    /// Investment-like streams (capex, subsidies, system capex and project margin) are discounted
    /// as capex; everything else as opex. Slack and the storage incentive are not discounted.
    pub fn discounted(&self, discounting: &Discounting, subsidy_capex: f64) -> DiscountedCosts<T> {
        use CostKind::{Capex, Opex};

        let by_tech = |(_, tech, year): &NodeTechYear| (tech.clone(), *year);
        let mut capex = discounting.discount_grouped(Capex, &self.capex, by_tech);
        merge(
            &mut capex,
            discounting.discount_grouped(Capex, &self.external_capex, |(tech, year)| {
                (tech.clone(), *year)
            }),
        );
        let mut opex = discounting.discount_grouped(Opex, &self.opex, by_tech);
        merge(
            &mut opex,
            discounting.discount_grouped(Opex, &self.external_opex, |(tech, year)| {
                (tech.clone(), *year)
            }),
        );

        let by_fuel = |(fuel, year): &(FuelID, u32)| (fuel.clone(), *year);
        let mut storage_incentive = T::default();
        for value in self.storage_incentive.values() {
            storage_incentive += value.clone();
        }

        DiscountedCosts {
            capex,
            opex,
            opex_fuel: discounting.discount_grouped(Opex, &self.opex_fuel, |(_, fuel, year)| {
                (fuel.clone(), *year)
            }),
            opex_timeseries: discounting.discount_grouped(Opex, &self.opex_timeseries, by_fuel),
            opex_auxmedium: discounting.discount_grouped(
                Opex,
                &self.opex_auxmedium,
                |(_, _, medium, year)| (medium.clone(), *year),
            ),
            opex_network: discounting.discount_grouped(Opex, &self.opex_network, |(_, fuel, year)| {
                (fuel.clone(), *year)
            }),
            revenue: discounting.discount_grouped(Opex, &self.revenue, by_fuel),
            revenue_timeseries: discounting.discount_grouped(
                Opex,
                &self.revenue_timeseries,
                by_fuel,
            ),
            capex_subsidy: discounting.discount_total(Capex, &self.capex_subsidy, |(_, y)| *y),
            capex_system: discounting.discount_total(Capex, &self.capex_system, |(_, y)| *y),
            opex_system: discounting.discount_total(Opex, &self.opex_system, |(_, y)| *y),
            project_margin: discounting.discount_total(Capex, &self.project_margin, |y| *y),
            opex_taxes: discounting.discount_total(Opex, &self.opex_taxes, |y| *y),
            subsidy_capex,
            slack: self.slack.clone(),
            storage_incentive,
        }
    }
}

/// Present values of the cost streams
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscountedCosts<T> {
    /// Investment per technology (including external technologies)
    pub capex: IndexMap<TechID, T>,
    /// Operation and maintenance per technology (including external technologies)
    pub opex: IndexMap<TechID, T>,
    /// Imports per settlement fuel
    pub opex_fuel: IndexMap<FuelID, T>,
    /// Spot-market imports per settlement fuel
    pub opex_timeseries: IndexMap<FuelID, T>,
    /// Auxiliary media
    pub opex_auxmedium: IndexMap<AuxMediumID, T>,
    /// Network capacity charges per fuel
    pub opex_network: IndexMap<FuelID, T>,
    /// Export revenues per fuel
    pub revenue: IndexMap<FuelID, T>,
    /// Spot-market export revenues per fuel
    pub revenue_timeseries: IndexMap<FuelID, T>,
    /// Investment subsidies
    pub capex_subsidy: T,
    /// System investment
    pub capex_system: T,
    /// System operational costs
    pub opex_system: T,
    /// Project margin
    pub project_margin: T,
    /// Taxes on operational costs
    pub opex_taxes: T,
    /// Lump-sum investment subsidy
    pub subsidy_capex: f64,
    /// Slack penalty
    pub slack: T,
    /// Storage level reward
    pub storage_incentive: T,
}

impl<T: Discountable + Clone + AddAssign<f64>> DiscountedCosts<T> {
    /// The total cost of the system, excluding the storage level reward
    pub fn total_excluding_incentive(&self) -> T {
        let mut total = T::default();
        let per_key = self
            .capex
            .values()
            .chain(self.opex.values())
            .chain(self.opex_fuel.values())
            .chain(self.opex_timeseries.values())
            .chain(self.opex_auxmedium.values())
            .chain(self.opex_network.values())
            .chain(self.revenue.values())
            .chain(self.revenue_timeseries.values());
        let scalars = [
            &self.capex_subsidy,
            &self.capex_system,
            &self.opex_system,
            &self.project_margin,
            &self.opex_taxes,
            &self.slack,
        ];
        for value in per_key.chain(scalars) {
            total += value.clone();
        }
        total += self.subsidy_capex;

        total
    }

    /// The objective: total cost including the storage level reward
    pub fn total(&self) -> T {
        let mut total = self.total_excluding_incentive();
        total += self.storage_incentive.clone();
        total
    }
}

/// The electricity fuel's quantity of auxiliary medium per unit of production of its driving fuel.
///
/// Returns the driving fuel and the factor, or `None` if the technology does not produce an
/// auxiliary-medium-driving fuel.
pub fn aux_medium_factor<'a>(
    model: &Model,
    tech: &'a Tech,
    medium: &AuxMedium,
) -> Option<(&'a FuelID, f64)> {
    let fuel = tech
        .aux_medium_fuel
        .as_ref()
        .filter(|fuel| tech.has_output(fuel))?;
    let spec_energy = model.fuels.get(fuel)?.spec_energy;

    Some((fuel, medium.spec_medium_ratio / spec_energy))
}

/// Energy a storage must hold in reserve for the demand over the following window.
///
/// The look-ahead steps forward with [`crate::time_index::TimeIndex::roll_forward`], so beyond the
/// last sampled year it reads the demand of the year numbered like the first sampled day.
pub fn rolling_reserve(
    model: &Model,
    node: &NodeID,
    tech: &TechID,
    fuel: &FuelID,
    step: &TimeStep,
) -> f64 {
    let time = &model.time;
    let reserve = model.storage_reserve(node, tech, fuel);
    if reserve.window == 0 || reserve.factor <= 0.0 {
        return 0.0;
    }

    let mut current = *step;
    let mut demand = 0.0;
    for _ in 0..reserve.window {
        for _ in &time.sub_hours {
            current = time.roll_forward(&current);
            demand += model.demand(node, fuel, &current);
        }
    }

    demand * reserve.factor * time.delta_t()
}

/// A stock which follows the capacity motion
#[derive(Debug, Clone, Copy)]
enum Stock {
    Capacity,
    StorageVolume,
}

impl Builder<'_> {
    /// The sampled year whose stock carries over into `year`, if any
    pub(super) fn previous_year(&self, year: u32) -> Option<u32> {
        let time = &self.model.time;
        let position = time.years.iter().position(|&y| y == year)?;
        (position > 0 && year > time.y_start).then(|| time.years[position - 1])
    }

    fn installed(&mut self, stock: Stock, node: &NodeID, tech: &TechID, year: u32) -> LinExpr {
        let key = (node.clone(), tech.clone(), year);
        let memo = match stock {
            Stock::Capacity => &self.inst_cap,
            Stock::StorageVolume => &self.inst_storage_vol,
        };
        if let Some(expr) = memo.get(&key) {
            return expr.clone();
        }

        let previous = self
            .previous_year(year)
            .map(|previous| self.installed(stock, node, tech, previous));
        let (add, sub, memo) = match stock {
            Stock::Capacity => (
                &mut self.vars.cap_add,
                &mut self.vars.cap_sub,
                &mut self.inst_cap,
            ),
            Stock::StorageVolume => (
                &mut self.vars.storage_vol_add,
                &mut self.vars.storage_vol_sub,
                &mut self.inst_storage_vol,
            ),
        };

        let mut expr = LinExpr::var(add.get(&mut self.lp, key.clone()));
        if let Some(previous) = previous {
            expr += previous;
            expr.add_term(sub.get(&mut self.lp, key.clone()), -1.0);
        }
        memo.insert(key, expr.clone());

        expr
    }

    /// Installed capacity
    pub(super) fn inst_cap(&mut self, node: &NodeID, tech: &TechID, year: u32) -> LinExpr {
        self.installed(Stock::Capacity, node, tech, year)
    }

    /// Installed storage volume
    pub(super) fn inst_storage_vol(&mut self, node: &NodeID, tech: &TechID, year: u32) -> LinExpr {
        self.installed(Stock::StorageVolume, node, tech, year)
    }

    /// Constant self-consumption of a fuel by the system
    pub(super) fn const_cons_system(&mut self, node: &NodeID, fuel: &FuelID, year: u32) -> LinExpr {
        let model = self.model;
        let share = model
            .fuels
            .get(fuel)
            .map_or(0.0, |fuel| fuel.share_const_cons_system);

        let mut expr = LinExpr::default();
        for tech in model
            .techs
            .values()
            .filter(|tech| tech.const_cons_system && !tech.is_external())
        {
            expr.add_scaled(&self.inst_cap(node, &tech.id, year), share);
        }

        expr
    }

    /// Production at the given fraction of the (output-side) installed capacity
    pub(super) fn part_load_production(
        &mut self,
        node: &NodeID,
        tech: &Tech,
        year: u32,
        fraction: f64,
    ) -> LinExpr {
        self.inst_cap(node, &tech.id, year) * (tech.capacity_efficiency() * fraction)
    }

    /// The lowest allowed storage level, including the unavailable share of the volume
    pub(super) fn min_storage_level(&mut self, node: &NodeID, tech: &Tech, year: u32) -> LinExpr {
        let levels = self.model.storage_levels(node, &tech.id);
        self.inst_storage_vol(node, &tech.id, year)
            * (levels.min + 1.0 - tech.availability_storage_vol)
    }

    /// The highest allowed storage level
    pub(super) fn max_storage_level(&mut self, node: &NodeID, tech: &Tech, year: u32) -> LinExpr {
        let levels = self.model.storage_levels(node, &tech.id);
        self.inst_storage_vol(node, &tech.id, year) * levels.max
    }

    /// Whether a technology draws electricity besides (or instead of) its declared inputs
    pub(super) fn has_electricity_demand(&self, node: &NodeID, tech: &Tech, step: &TimeStep) -> bool {
        let model = self.model;
        model.fixed_demand_profile(node, &tech.id, step) > 0.0
            || model.variable_demand_profile(node, &tech.id, step) > 0.0
            || tech.aux_electricity_demand > 0.0
    }

    /// Formulate the annual cost and revenue streams
    pub(super) fn cost_streams(&mut self) -> Result<CostStreams<LinExpr>> {
        let model = self.model;
        let params = &model.parameters;
        let mut costs = CostStreams::default();

        for &year in &model.time.years {
            for tech in model.external_techs() {
                let tech_costs = model.tech_costs(&tech.id, year);
                let key = (tech.id.clone(), year);
                costs
                    .external_capex
                    .insert(key.clone(), tech_costs.external_capex.into());
                costs
                    .external_opex
                    .insert(key, tech_costs.external_opex.into());
            }

            for node in &model.nodes {
                for tech in model.techs.values().filter(|tech| !tech.is_external()) {
                    let key = (node.clone(), tech.id.clone(), year);
                    let capex = self.capex(node, tech, year);
                    costs.capex.insert(key.clone(), capex);
                    let opex = self.opex(node, tech, year)?;
                    costs.opex.insert(key, opex);
                }

                let capex_of = |flag: fn(&Tech) -> bool| -> LinExpr {
                    model
                        .techs
                        .values()
                        .filter(|tech| !tech.is_external() && flag(tech))
                        .filter_map(|tech| costs.capex.get(&(node.clone(), tech.id.clone(), year)))
                        .cloned()
                        .sum()
                };
                let subsidised = capex_of(|tech| tech.subsidy_tech) * params.subsidy_share;
                let capex_system = capex_of(|tech| tech.hydrogen_system) * params.capex_system_share;
                let key = (node.clone(), year);
                costs.capex_subsidy.insert(key.clone(), subsidised);
                costs.opex_system.insert(
                    key.clone(),
                    capex_system.clone() * params.opex_system_share,
                );
                costs.capex_system.insert(key, capex_system);

                for fuel in model.balanced_fuels() {
                    let opex_fuel = self.opex_fuel(node, fuel, year);
                    costs
                        .opex_fuel
                        .insert((node.clone(), fuel.clone(), year), opex_fuel);
                }

                for tech in model.conversion_techs() {
                    if !model.is_active(node, &tech.id, year) {
                        continue;
                    }
                    for medium in model.aux_media.values() {
                        if let Some(cost) = self.opex_auxmedium(node, tech, medium, year) {
                            costs.opex_auxmedium.insert(
                                (node.clone(), tech.id.clone(), medium.id.clone(), year),
                                cost,
                            );
                        }
                    }
                }

                for fuel in model.fuels.keys() {
                    let charge = model.year_trade(node, fuel, year).network_capacity_charge;
                    if charge > 0.0 {
                        let key = (node.clone(), fuel.clone(), year);
                        let var = self.vars.f_network_capacity.get(&mut self.lp, key.clone());
                        costs.opex_network.insert(key, LinExpr::term(var, charge));
                    }
                }
            }

            for fuel in model.balanced_fuels() {
                let cost = self.opex_timeseries(fuel, year);
                costs.opex_timeseries.insert((fuel.clone(), year), cost);
            }

            for fuel in model.fuels.keys() {
                let revenue = self.revenue(fuel, year);
                costs.revenue.insert((fuel.clone(), year), revenue);
                let revenue = self.revenue_timeseries(fuel, year);
                costs.revenue_timeseries.insert((fuel.clone(), year), revenue);
            }

            let margin = self.project_margin(year);
            costs.project_margin.insert(year, margin);

            let taxed = costs
                .opex
                .iter()
                .filter(|((_, _, y), _)| *y == year)
                .map(|(_, cost)| cost)
                .chain(costs.external_opex.iter().filter(|((_, y), _)| *y == year).map(|(_, cost)| cost))
                .chain(costs.opex_fuel.iter().filter(|((_, _, y), _)| *y == year).map(|(_, cost)| cost))
                .chain(
                    costs
                        .opex_auxmedium
                        .iter()
                        .filter(|((_, _, _, y), _)| *y == year)
                        .map(|(_, cost)| cost),
                )
                .chain(costs.opex_network.iter().filter(|((_, _, y), _)| *y == year).map(|(_, cost)| cost))
                .cloned()
                .sum::<LinExpr>();
            costs.opex_taxes.insert(year, taxed * params.taxes);
        }

        costs.slack = self.slack_costs();
        for tech in model.storage_techs() {
            let incentive = self.storage_incentive(tech)?;
            costs.storage_incentive.insert(tech.id.clone(), incentive);
        }

        Ok(costs)
    }

    fn capex(&mut self, node: &NodeID, tech: &Tech, year: u32) -> LinExpr {
        let invest = self.model.tech_costs(&tech.id, year).invest;
        if invest == 0.0 {
            return LinExpr::default();
        }

        let key = (node.clone(), tech.id.clone(), year);
        let family = if tech.is_storage() {
            &mut self.vars.storage_vol_add
        } else {
            &mut self.vars.cap_add
        };

        LinExpr::term(family.get(&mut self.lp, key), invest)
    }

    fn opex(&mut self, node: &NodeID, tech: &Tech, year: u32) -> Result<LinExpr> {
        let model = self.model;
        let costs = model.tech_costs(&tech.id, year);
        let aef = model.time.annual_energy_factor();
        let mut opex = LinExpr::default();

        if costs.fixed_om != 0.0 {
            let installed = if tech.is_storage() {
                self.inst_storage_vol(node, &tech.id, year)
            } else {
                self.inst_cap(node, &tech.id, year)
            };
            opex.add_scaled(&installed, costs.fixed_om);
        }

        let active = if tech.is_storage() {
            model.is_storage_active(node, &tech.id, year)
        } else {
            model.is_active(node, &tech.id, year)
        };
        if costs.variable_om == 0.0 || !active {
            return Ok(opex);
        }

        let coeff = costs.variable_om * aef;
        if tech.is_storage() {
            let fuel = tech.unique_output()?;
            for f1 in model.balanced_substitutes(fuel) {
                for step in model.time.steps_in_year(year) {
                    let key = (node.clone(), tech.id.clone(), f1.clone(), step);
                    opex.add_term(self.vars.f_prod.get(&mut self.lp, key), coeff);
                }
            }
        } else if tech.capacity_of_input {
            for input in tech.inputs.iter().filter(|fuel| !model.is_vre(fuel)) {
                for f1 in model.balanced_substitutes(input) {
                    for step in model.time.steps_in_year(year) {
                        let key = (node.clone(), tech.id.clone(), input.clone(), f1.clone(), step);
                        opex.add_term(self.vars.f_cons.get(&mut self.lp, key), coeff);
                    }
                }
            }
        } else {
            for output in &tech.outputs {
                for step in model.time.steps_in_year(year) {
                    let key = (node.clone(), tech.id.clone(), output.clone(), step);
                    opex.add_term(self.vars.f_prod.get(&mut self.lp, key), coeff);
                }
            }
        }

        Ok(opex)
    }

    fn opex_fuel(&mut self, node: &NodeID, fuel: &FuelID, year: u32) -> LinExpr {
        let model = self.model;
        let time = &model.time;
        let trade = model.trade(node, fuel);
        let prices = model.fuel_costs(fuel, year);
        let conv = model.conversion_factor(fuel);
        let mut cost = LinExpr::default();

        if trade.max_import > 0.0 && prices.import_cost != 0.0 {
            let coeff = conv * prices.import_cost * time.annual_energy_factor();
            for step in time.steps_in_year(year) {
                let var = self
                    .vars
                    .f_import
                    .get(&mut self.lp, (node.clone(), fuel.clone(), step));
                cost.add_term(var, coeff);
            }
        }

        if trade.max_fix_quant > 0 && prices.fix_quant_cost != 0.0 {
            // Deliveries are counted, so no sub-hour length applies
            let coeff = conv
                * prices.fix_quant_cost
                * trade.fix_quant_size
                * time.scale_h()
                * time.scale_d();
            for step in time.steps_in_year(year) {
                let var = self
                    .vars
                    .f_fix_quant_import
                    .get(&mut self.lp, (node.clone(), fuel.clone(), step));
                cost.add_term(var, coeff);
            }
        }

        cost
    }

    fn opex_timeseries(&mut self, fuel: &FuelID, year: u32) -> LinExpr {
        let model = self.model;
        let time = &model.time;
        let fee = model.fuel_costs(fuel, year).import_timeseries_fee;
        let factor = model.conversion_factor(fuel) * time.annual_energy_factor();
        let mut cost = LinExpr::default();

        for node in &model.nodes {
            if model.year_trade(node, fuel, year).max_import_timeseries <= 0.0 {
                continue;
            }
            for step in time.steps_in_year(year) {
                let price = model.import_price(fuel, &step) + fee;
                let var = self
                    .vars
                    .f_import_timeseries
                    .get(&mut self.lp, (node.clone(), fuel.clone(), step));
                cost.add_term(var, price * factor);
            }
        }

        cost
    }

    fn opex_auxmedium(
        &mut self,
        node: &NodeID,
        tech: &Tech,
        medium: &AuxMedium,
        year: u32,
    ) -> Option<LinExpr> {
        let model = self.model;
        let (fuel, factor) = aux_medium_factor(model, tech, medium)?;
        let coeff = factor
            * model.aux_medium_cost(&medium.id, year)
            * model.time.annual_energy_factor();

        let mut cost = LinExpr::default();
        for step in model.time.steps_in_year(year) {
            let key = (node.clone(), tech.id.clone(), fuel.clone(), step);
            cost.add_term(self.vars.f_prod.get(&mut self.lp, key), coeff);
        }

        Some(cost)
    }

    fn revenue(&mut self, fuel: &FuelID, year: u32) -> LinExpr {
        let model = self.model;
        let price = model.fuel_costs(fuel, year).export_price;
        let mut revenue = LinExpr::default();
        if price == 0.0 {
            return revenue;
        }

        let coeff = -price * model.conversion_factor(fuel) * model.time.annual_energy_factor();
        for node in &model.nodes {
            let trade = model.trade(node, fuel);
            if trade.max_export <= 0.0 && trade.max_injection <= 0.0 {
                continue;
            }
            for f1 in model.balanced_substitutes(fuel) {
                for step in model.time.steps_in_year(year) {
                    let key = (node.clone(), fuel.clone(), f1.clone(), step);
                    revenue.add_term(self.vars.f_export.get(&mut self.lp, key), coeff);
                }
            }
        }

        revenue
    }

    fn revenue_timeseries(&mut self, fuel: &FuelID, year: u32) -> LinExpr {
        let model = self.model;
        let fee = model.fuel_costs(fuel, year).export_timeseries_fee;
        let factor = -model.conversion_factor(fuel) * model.time.annual_energy_factor();
        let mut revenue = LinExpr::default();

        for node in &model.nodes {
            if model.year_trade(node, fuel, year).max_export_timeseries <= 0.0 {
                continue;
            }
            for f1 in model.balanced_substitutes(fuel) {
                for step in model.time.steps_in_year(year) {
                    let price = model.export_price(fuel, &step) - fee;
                    let key = (node.clone(), fuel.clone(), f1.clone(), step);
                    let var = self.vars.f_export_timeseries.get(&mut self.lp, key);
                    revenue.add_term(var, price * factor);
                }
            }
        }

        revenue
    }

    fn project_margin(&mut self, year: u32) -> LinExpr {
        let model = self.model;
        let spec = model.parameters.project_margin_spec;
        let mut margin = LinExpr::default();
        if spec == 0.0 {
            return margin;
        }

        for node in &model.nodes {
            for tech in model.conversion_techs() {
                let key = (node.clone(), tech.id.clone(), year);
                margin.add_term(self.vars.cap_add.get(&mut self.lp, key), spec);
            }
        }

        margin
    }

    fn slack_costs(&mut self) -> LinExpr {
        let model = self.model;
        let time = &model.time;
        let mut cost = LinExpr::default();
        if !model.parameters.slack_switch {
            return cost;
        }

        let factor = time.annual_energy_factor() * time.scale_y();
        for node in &model.nodes {
            for fuel in model.balanced_fuels() {
                let coeff = model.trade(node, fuel).slack_cost * factor;
                for step in time.steps() {
                    let key = (node.clone(), fuel.clone(), step);
                    let pos = self.vars.f_slack_pos.get(&mut self.lp, key.clone());
                    let neg = self.vars.f_slack_neg.get(&mut self.lp, key);
                    cost.add_term(pos, coeff);
                    cost.add_term(neg, -coeff);
                }
            }
        }

        cost
    }

    fn storage_incentive(&mut self, tech: &Tech) -> Result<LinExpr> {
        let model = self.model;
        let mut incentive = LinExpr::default();
        if tech.high_storage_level_incentive <= 0.0 {
            return Ok(incentive);
        }

        let fuel = tech.unique_input()?;
        let coeff = tech.high_storage_level_incentive * model.time.annual_energy_factor();
        for node in &model.nodes {
            for &year in &model.time.years {
                if !model.is_storage_active(node, &tech.id, year) {
                    continue;
                }
                for f1 in model.balanced_substitutes(fuel) {
                    for step in model.time.steps_in_year(year) {
                        let key = (node.clone(), tech.id.clone(), f1.clone(), step);
                        incentive.add_term(self.vars.storage_level.get(&mut self.lp, key), coeff);
                    }
                }
            }
        }

        Ok(incentive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{build_model, fuel, model, node_id, pv_id, storage_tech};
    use crate::fuel::FuelMap;
    use crate::model::{CalendarParameters, StorageReserve, TechCosts};
    use crate::optimisation::{LinearProgram, Variables};
    use crate::solver::{HighsSolver, Solver};
    use crate::tech::TechMap;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;
    use std::collections::HashMap;

    fn builder(model: &Model) -> Builder<'_> {
        Builder {
            model,
            lp: LinearProgram::default(),
            vars: Variables::default(),
            inst_cap: HashMap::new(),
            inst_storage_vol: HashMap::new(),
        }
    }

    #[rstest]
    fn test_capacity_motion(mut model: Model) {
        model.parameters.calendar.years = vec![1, 2, 3];
        model.time.years = vec![1, 2, 3];
        let mut builder = builder(&model);
        let (node, tech) = (node_id(), pv_id());

        let first = builder.inst_cap(&node, &tech, 1);
        assert_eq!(first.terms().count(), 1);

        // Each later year adds one addition and one retirement
        let third = builder.inst_cap(&node, &tech, 3);
        assert_eq!(third.terms().count(), 5);
        assert_eq!(builder.vars.cap_add.iter().count(), 3);
        assert_eq!(builder.vars.cap_sub.iter().count(), 2);

        // Memoised: asking again adds no variables
        builder.inst_cap(&node, &tech, 3);
        assert_eq!(builder.lp.variables.len(), 5);

        // inst_cap[3] = add1 + add2 - sub2 + add3 - sub3
        let add = |year| builder.vars.cap_add.lookup(&(node.clone(), tech.clone(), year)).unwrap();
        let mut columns = vec![0.0; 5];
        columns[add(1).index()] = 10.0;
        columns[add(2).index()] = 5.0;
        columns[add(3).index()] = 1.0;
        let sub2 = builder
            .vars
            .cap_sub
            .lookup(&(node.clone(), tech.clone(), 2))
            .unwrap();
        columns[sub2.index()] = 3.0;
        assert_approx_eq!(f64, third.evaluate(&columns), 13.0);
    }

    fn storage_model() -> Model {
        let calendar = CalendarParameters {
            years: vec![1, 2],
            days: vec![3, 4],
            hours: vec![1],
            scale_y_to: 2,
            scale_d_to: 2,
            scale_h_to: 1,
            ..CalendarParameters::default()
        };
        let fuels: FuelMap = [fuel("H2", "kg")]
            .into_iter()
            .map(|fuel| (fuel.id.clone(), fuel))
            .collect();
        let techs: TechMap = [storage_tech("Tank", "H2")]
            .into_iter()
            .map(|tech| (tech.id.clone(), tech))
            .collect();

        build_model(calendar, fuels, techs)
    }

    #[test]
    fn test_rolling_reserve_sums_window() {
        let mut model = storage_model();
        let (node, tech, fuel) = (node_id(), TechID::new("Tank"), FuelID::new("H2"));
        model.storage_reserves.insert(
            (node.clone(), tech.clone(), fuel.clone()),
            StorageReserve {
                min_energy_reserve: 0.0,
                window: 2,
                factor: 1.5,
            },
        );
        let key = (node.clone(), fuel.clone());
        model.series.demand.insert(key.clone(), TimeStep::new(1, 4, 1, 0), 2.0);
        model.series.demand.insert(key, TimeStep::new(2, 3, 1, 0), 4.0);

        let reserve = rolling_reserve(&model, &node, &tech, &fuel, &TimeStep::new(1, 3, 1, 0));
        assert_approx_eq!(f64, reserve, 9.0);
    }

    #[test]
    fn test_rolling_reserve_wraps_year_to_first_day() {
        // Beyond the last sampled year the look-ahead continues in the year numbered like the first
        // sampled day (here year 3), not in the first sampled year
        let mut model = storage_model();
        let (node, tech, fuel) = (node_id(), TechID::new("Tank"), FuelID::new("H2"));
        model.storage_reserves.insert(
            (node.clone(), tech.clone(), fuel.clone()),
            StorageReserve {
                min_energy_reserve: 0.0,
                window: 1,
                factor: 1.0,
            },
        );
        let key = (node.clone(), fuel.clone());
        model.series.demand.insert(key.clone(), TimeStep::new(3, 3, 1, 0), 7.0);
        model.series.demand.insert(key, TimeStep::new(1, 3, 1, 0), 100.0);

        let reserve = rolling_reserve(&model, &node, &tech, &fuel, &TimeStep::new(2, 4, 1, 0));
        assert_approx_eq!(f64, reserve, 7.0);
    }

    #[test]
    fn test_rolling_reserve_disabled() {
        let model = storage_model();
        let reserve = rolling_reserve(
            &model,
            &node_id(),
            &"Tank".into(),
            &"H2".into(),
            &TimeStep::new(1, 3, 1, 0),
        );
        assert_eq!(reserve, 0.0);
    }

    #[test]
    fn test_storage_incentive_is_a_cost() {
        let mut model = storage_model();
        let tank = TechID::new("Tank");
        model.techs.get_mut(&tank).unwrap().high_storage_level_incentive = 1.0;

        let mut builder = builder(&model);
        let costs = builder.cost_streams().unwrap();
        let incentive = &costs.storage_incentive[&tank];
        assert!(incentive.terms().count() > 0);
        assert!(incentive.terms().all(|(_, coeff)| coeff > 0.0));

        // Storing energy is penalised, so the tank stays empty
        let built = crate::optimisation::build_model(&model).unwrap();
        let solution = HighsSolver.solve(&built.lp).unwrap();
        assert_approx_eq!(f64, solution.objective, 0.0, epsilon = 1e-9);
        for (_, var) in built.variables.storage_level.iter() {
            assert_approx_eq!(f64, solution.columns[var.index()], 0.0, epsilon = 1e-9);
        }
    }

    #[rstest]
    fn test_capex_and_opex_streams(mut model: Model) {
        model.tech_costs.insert(
            (pv_id(), 1),
            TechCosts {
                invest: 1000.0,
                fixed_om: 20.0,
                variable_om: 0.5,
                ..TechCosts::default()
            },
        );
        let mut builder = builder(&model);
        let costs = builder.cost_streams().unwrap();
        let key = (node_id(), pv_id(), 1);

        let add = builder.vars.cap_add.lookup(&key).unwrap();
        let prod = builder
            .vars
            .f_prod
            .lookup(&(node_id(), pv_id(), "Electricity".into(), TimeStep::new(1, 1, 1, 0)))
            .unwrap();
        let mut columns = vec![0.0; builder.lp.variables.len()];
        columns[add.index()] = 2.0;
        columns[prod.index()] = 4.0;

        let values = costs.evaluate(&columns);
        assert_approx_eq!(f64, values.capex[&key], 2000.0);
        // Fixed on installed capacity plus variable on production
        assert_approx_eq!(f64, values.opex[&key], 40.0 + 2.0);
    }

    #[rstest]
    fn test_discounted_total_matches_objective(model: Model) {
        let mut builder = builder(&model);
        let costs = builder.cost_streams().unwrap();
        let discounting = Discounting::new(&model.time, 0.05, 0.0, 1.0);

        let columns: Vec<f64> = (0..builder.lp.variables.len())
            .map(|i| f64::from(u32::try_from(i).unwrap()) + 1.0)
            .collect();
        let objective = costs.discounted(&discounting, -10.0).total();
        let reported = costs.evaluate(&columns).discounted(&discounting, -10.0).total();
        assert_approx_eq!(f64, objective.evaluate(&columns), reported, epsilon = 1e-6);
    }
}
