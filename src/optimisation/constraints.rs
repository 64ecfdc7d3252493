//! Constraint families of the optimisation problem.
use super::expressions::rolling_reserve;
use super::{Builder, ConstraintOutcome, LinExpr, Relation, SettledFlow, VarFamily, Variables, key};
use crate::id::{FuelID, NodeID};
use crate::tech::Tech;
use crate::time_index::{PreviousStep, TimeStep};
use anyhow::Result;

/// Shorthand for `lhs <rel> rhs`
fn relation<L: Into<LinExpr>, R: Into<LinExpr>>(lhs: L, rel: Relation, rhs: R) -> ConstraintOutcome {
    ConstraintOutcome::relation(lhs.into(), rel, rhs.into())
}

/// Whether a range is worth stating at all
fn is_bounded(min: f64, max: f64) -> bool {
    min > 0.0 || max < f64::INFINITY
}

impl Builder<'_> {
    /// Add every constraint family to the problem
    pub(super) fn add_constraints(&mut self) -> Result<()> {
        self.add_capacity_constraints()?;
        self.add_storage_volume_constraints()?;
        self.add_fuel_balances()?;
        self.add_delivery_constraints()?;
        self.add_cons_system_constraints()?;
        self.add_production_constraints()?;
        self.add_consumption_constraints()?;
        self.add_trade_constraints()?;
        self.add_network_constraints()?;
        self.add_storage_constraints()?;
        self.add_peak_constraints()?;

        Ok(())
    }

    /// Whether a technology's consumption of `fuel` takes part in the balances
    fn consumes(&self, node: &NodeID, tech: &Tech, fuel: &FuelID, step: &TimeStep) -> bool {
        let model = self.model;
        (tech.has_input(fuel) && !model.is_vre(fuel))
            || (model.is_electricity(fuel) && self.has_electricity_demand(node, tech, step))
    }

    fn add_capacity_constraints(&mut self) -> Result<()> {
        let model = self.model;
        let unit_switch = model.parameters.unit_cap_switch;

        for node in &model.nodes {
            for &year in &model.time.years {
                let node_limits = model.node_limits(node, year);
                let mut combined = LinExpr::default();
                let mut area = LinExpr::default();

                for tech in model.techs.values().filter(|tech| !tech.is_external()) {
                    let limits = model.limits(node, &tech.id, year);
                    let inst_cap = self.inst_cap(node, &tech.id, year);

                    // Retirements may never take the stock below zero
                    if is_bounded(limits.min_inst_cap, limits.max_inst_cap)
                        || self.previous_year(year).is_some()
                    {
                        self.lp.add_constraint(
                            "capacity_bounds",
                            key!(node, tech.id, year),
                            ConstraintOutcome::range(
                                limits.min_inst_cap,
                                inst_cap.clone(),
                                limits.max_inst_cap,
                            ),
                        )?;
                    }

                    if tech.capacity_constraint_tech {
                        combined += &inst_cap;
                    }
                    if tech.land_use > 0.0 && !tech.is_storage() {
                        area.add_scaled(&inst_cap, tech.land_use);
                    }
                    if tech.land_use > 0.0 && tech.is_storage() {
                        let inst_vol = self.inst_storage_vol(node, &tech.id, year);
                        area.add_scaled(&inst_vol, tech.land_use);
                    }

                    let key = (node.clone(), tech.id.clone(), year);
                    let add = self.vars.cap_add.get(&mut self.lp, key.clone());
                    if is_bounded(limits.min_cap_add, limits.max_cap_add) {
                        self.lp.add_constraint(
                            "capacity_addition",
                            key!(node, tech.id, year),
                            ConstraintOutcome::range(
                                limits.min_cap_add,
                                add.into(),
                                limits.max_cap_add,
                            ),
                        )?;
                    }
                    let sub = self.vars.cap_sub.lookup(&key);
                    if let Some(sub) = sub
                        && is_bounded(limits.min_cap_sub, limits.max_cap_sub)
                    {
                        self.lp.add_constraint(
                            "capacity_retirement",
                            key!(node, tech.id, year),
                            ConstraintOutcome::range(
                                limits.min_cap_sub,
                                sub.into(),
                                limits.max_cap_sub,
                            ),
                        )?;
                    }

                    if unit_switch {
                        let units = self.vars.unit_add.get(&mut self.lp, key.clone());
                        self.lp.add_constraint(
                            "unit_capacity_addition",
                            key!(node, tech.id, year),
                            relation(add, Relation::Eq, LinExpr::term(units, limits.unit_cap)),
                        )?;
                        if let Some(sub) = sub {
                            let units = self.vars.unit_sub.get(&mut self.lp, key);
                            self.lp.add_constraint(
                                "unit_capacity_retirement",
                                key!(node, tech.id, year),
                                relation(sub, Relation::Eq, LinExpr::term(units, limits.unit_cap)),
                            )?;
                        }
                    }
                }

                if is_bounded(node_limits.min_combined_cap, node_limits.max_combined_cap) {
                    self.lp.add_constraint(
                        "combined_capacity",
                        key!(node, year),
                        ConstraintOutcome::range(
                            node_limits.min_combined_cap,
                            combined,
                            node_limits.max_combined_cap,
                        ),
                    )?;
                }
                if node_limits.max_area < f64::INFINITY {
                    self.lp.add_constraint(
                        "land_area",
                        key!(node, year),
                        relation(area, Relation::Le, node_limits.max_area),
                    )?;
                }
            }
        }

        Ok(())
    }

    fn add_storage_volume_constraints(&mut self) -> Result<()> {
        let model = self.model;
        let unit_switch = model.parameters.unit_cap_switch;

        for node in &model.nodes {
            for tech in model.storage_techs() {
                for &year in &model.time.years {
                    let limits = model.limits(node, &tech.id, year);
                    let inst_vol = self.inst_storage_vol(node, &tech.id, year);
                    if is_bounded(limits.min_inst_storage_vol, limits.max_inst_storage_vol)
                        || self.previous_year(year).is_some()
                    {
                        self.lp.add_constraint(
                            "storage_volume_bounds",
                            key!(node, tech.id, year),
                            ConstraintOutcome::range(
                                limits.min_inst_storage_vol,
                                inst_vol.clone(),
                                limits.max_inst_storage_vol,
                            ),
                        )?;
                    }

                    if tech.energy_power_ratio > 0.0 {
                        let inst_cap = self.inst_cap(node, &tech.id, year);
                        self.lp.add_constraint(
                            "energy_power_ratio",
                            key!(node, tech.id, year),
                            relation(inst_cap, Relation::Le, inst_vol * (1.0 / tech.energy_power_ratio)),
                        )?;
                    }

                    let key = (node.clone(), tech.id.clone(), year);
                    let add = self.vars.storage_vol_add.get(&mut self.lp, key.clone());
                    if is_bounded(limits.min_storage_vol_add, limits.max_storage_vol_add) {
                        self.lp.add_constraint(
                            "storage_volume_addition",
                            key!(node, tech.id, year),
                            ConstraintOutcome::range(
                                limits.min_storage_vol_add,
                                add.into(),
                                limits.max_storage_vol_add,
                            ),
                        )?;
                    }
                    let sub = self.vars.storage_vol_sub.lookup(&key);
                    if let Some(sub) = sub
                        && is_bounded(limits.min_storage_vol_sub, limits.max_storage_vol_sub)
                    {
                        self.lp.add_constraint(
                            "storage_volume_retirement",
                            key!(node, tech.id, year),
                            ConstraintOutcome::range(
                                limits.min_storage_vol_sub,
                                sub.into(),
                                limits.max_storage_vol_sub,
                            ),
                        )?;
                    }

                    if unit_switch {
                        let units = self.vars.storage_unit_add.get(&mut self.lp, key.clone());
                        self.lp.add_constraint(
                            "unit_storage_volume_addition",
                            key!(node, tech.id, year),
                            relation(add, Relation::Eq, LinExpr::term(units, limits.unit_volume)),
                        )?;
                        if let Some(sub) = sub {
                            let units = self.vars.storage_unit_sub.get(&mut self.lp, key);
                            self.lp.add_constraint(
                                "unit_storage_volume_retirement",
                                key!(node, tech.id, year),
                                relation(sub, Relation::Eq, LinExpr::term(units, limits.unit_volume)),
                            )?;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn add_fuel_balances(&mut self) -> Result<()> {
        let model = self.model;
        for node in &model.nodes {
            for f1 in model.balanced_fuels() {
                for step in model.time.steps() {
                    let supply = self.balance_supply(node, f1, step)?;
                    let demand = self.balance_demand(node, f1, step)?;
                    self.lp.add_constraint(
                        "fuel_balance",
                        key!(node, f1, step),
                        relation(supply, Relation::Eq, demand),
                    )?;
                }
            }
        }

        Ok(())
    }

    /// Production, storage discharge, imports and slack of a settlement fuel
    fn balance_supply(&mut self, node: &NodeID, f1: &FuelID, step: TimeStep) -> Result<LinExpr> {
        let model = self.model;
        let year = step.year;
        let trade = model.trade(node, f1);
        let year_trade = model.year_trade(node, f1, year);
        let mut supply = LinExpr::default();

        for tech in model
            .conversion_techs()
            .filter(|tech| tech.has_output(f1) && model.is_active(node, &tech.id, year))
        {
            let key = (node.clone(), tech.id.clone(), f1.clone(), step);
            supply.add_term(self.vars.f_prod.get(&mut self.lp, key), 1.0);
        }

        for tech in model.storage_techs() {
            let fuel = tech.unique_input()?;
            if model.is_storage_active(node, &tech.id, year)
                && model.balanced_substitutes(fuel).any(|sub| sub == f1)
            {
                let key = (node.clone(), tech.id.clone(), f1.clone(), step);
                supply.add_term(self.vars.f_prod.get(&mut self.lp, key), 1.0);
            }
        }

        let key = (node.clone(), f1.clone(), step);
        if trade.max_import > 0.0 {
            supply.add_term(self.vars.f_import.get(&mut self.lp, key.clone()), 1.0);
        }
        if trade.max_fix_quant > 0 {
            let var = self.vars.f_fix_quant_import.get(&mut self.lp, key.clone());
            supply.add_term(var, trade.fix_quant_size / model.time.delta_t());
        }
        if year_trade.max_import_timeseries > 0.0 {
            let var = self.vars.f_import_timeseries.get(&mut self.lp, key.clone());
            supply.add_term(var, 1.0);
        }
        if model.parameters.slack_switch {
            supply.add_term(self.vars.f_slack_pos.get(&mut self.lp, key.clone()), 1.0);
            supply.add_term(self.vars.f_slack_neg.get(&mut self.lp, key), 1.0);
        }

        Ok(supply)
    }

    /// Consumption, storage charging, deliveries and exports settled as a settlement fuel
    fn balance_demand(&mut self, node: &NodeID, f1: &FuelID, step: TimeStep) -> Result<LinExpr> {
        let model = self.model;
        let year = step.year;
        let substituted = model.substitution.substituted_by(f1);
        let mut demand = LinExpr::default();

        for tech in model
            .conversion_techs()
            .filter(|tech| model.is_active(node, &tech.id, year))
        {
            for fuel in substituted {
                if self.consumes(node, tech, fuel, &step) {
                    let key = (node.clone(), tech.id.clone(), fuel.clone(), f1.clone(), step);
                    demand.add_term(self.vars.f_cons.get(&mut self.lp, key), 1.0);
                }
            }
        }

        for tech in model.storage_techs() {
            let fuel = tech.unique_input()?;
            if model.is_storage_active(node, &tech.id, year)
                && model.balanced_substitutes(fuel).any(|sub| sub == f1)
            {
                let key = (node.clone(), tech.id.clone(), fuel.clone(), f1.clone(), step);
                demand.add_term(self.vars.f_cons.get(&mut self.lp, key), 1.0);
            }
        }

        for fuel in substituted {
            let key = (node.clone(), fuel.clone(), f1.clone(), step);
            let share = model
                .fuels
                .get(fuel)
                .map_or(0.0, |fuel| fuel.share_const_cons_system);
            if share > 0.0 {
                let var = self.vars.f_supply_cons_system.get(&mut self.lp, key.clone());
                demand.add_term(var, 1.0);
            }
            if model.demand(node, fuel, &step) > 0.0 {
                demand.add_term(self.vars.f_delivery.get(&mut self.lp, key.clone()), 1.0);
            }
            let trade = model.trade(node, fuel);
            if trade.max_export > 0.0 || trade.max_injection > 0.0 {
                demand.add_term(self.vars.f_export.get(&mut self.lp, key.clone()), 1.0);
            }
            if model.year_trade(node, fuel, year).max_export_timeseries > 0.0 {
                let var = self.vars.f_export_timeseries.get(&mut self.lp, key);
                demand.add_term(var, 1.0);
            }
        }

        Ok(demand)
    }

    /// Sum a settled-flow family over the balanced substitutes of a fuel
    fn settled_sum(
        &mut self,
        family: fn(&mut Variables) -> &mut VarFamily<SettledFlow>,
        node: &NodeID,
        fuel: &FuelID,
        step: TimeStep,
    ) -> LinExpr {
        let model = self.model;
        let mut sum = LinExpr::default();
        for f1 in model.balanced_substitutes(fuel) {
            let key = (node.clone(), fuel.clone(), f1.clone(), step);
            sum.add_term(family(&mut self.vars).get(&mut self.lp, key), 1.0);
        }

        sum
    }

    fn add_delivery_constraints(&mut self) -> Result<()> {
        let model = self.model;
        for node in &model.nodes {
            for fuel in model.fuels.keys().filter(|fuel| !model.is_vre(fuel)) {
                for step in model.time.steps() {
                    let demand = model.demand(node, fuel, &step);
                    if demand <= 0.0 {
                        continue;
                    }
                    let delivered = self.settled_sum(|vars| &mut vars.f_delivery, node, fuel, step);
                    self.lp.add_constraint(
                        "fuel_delivery",
                        key!(node, fuel, step),
                        relation(delivered, Relation::Eq, demand),
                    )?;
                }
            }
        }

        Ok(())
    }

    fn add_cons_system_constraints(&mut self) -> Result<()> {
        let model = self.model;
        for node in &model.nodes {
            for fuel in model
                .fuels
                .values()
                .filter(|fuel| fuel.share_const_cons_system > 0.0)
            {
                for &year in &model.time.years {
                    let required = self.const_cons_system(node, &fuel.id, year);
                    for step in model.time.steps_in_year(year) {
                        let supplied = self.settled_sum(
                            |vars| &mut vars.f_supply_cons_system,
                            node,
                            &fuel.id,
                            step,
                        );
                        self.lp.add_constraint(
                            "supply_const_cons_system",
                            key!(node, fuel.id, step),
                            relation(supplied, Relation::Eq, required.clone()),
                        )?;
                    }
                }
            }
        }

        Ok(())
    }

    fn add_production_constraints(&mut self) -> Result<()> {
        let model = self.model;
        let aef = model.time.annual_energy_factor();

        for node in &model.nodes {
            for tech in model.conversion_techs() {
                for &year in &model.time.years {
                    if !model.is_active(node, &tech.id, year) {
                        continue;
                    }
                    let inst_cap = self.inst_cap(node, &tech.id, year);

                    for output in &tech.outputs {
                        for step in model.time.steps_in_year(year) {
                            self.add_part_load_production(node, tech, output, step, &inst_cap)?;
                        }

                        if tech.production_upper_limit < f64::INFINITY {
                            let mut produced = LinExpr::default();
                            let mut delivered = LinExpr::default();
                            for step in model.time.steps_in_year(year) {
                                let key = (node.clone(), tech.id.clone(), output.clone(), step);
                                produced.add_term(self.vars.f_prod.get(&mut self.lp, key), aef);
                                if model.demand(node, output, &step) > 0.0 {
                                    let sum = self.settled_sum(
                                        |vars| &mut vars.f_delivery,
                                        node,
                                        output,
                                        step,
                                    );
                                    delivered.add_scaled(&sum, aef);
                                }
                            }
                            self.lp.add_constraint(
                                "production_upper_limit",
                                key!(node, tech.id, output, year),
                                relation(
                                    produced,
                                    Relation::Le,
                                    delivered * tech.production_upper_limit,
                                ),
                            )?;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Bound the linear production proxy by capacity and apply the part-load losses
    fn add_part_load_production(
        &mut self,
        node: &NodeID,
        tech: &Tech,
        output: &FuelID,
        step: TimeStep,
        inst_cap: &LinExpr,
    ) -> Result<()> {
        let model = self.model;
        let year = step.year;
        let key = (node.clone(), tech.id.clone(), output.clone(), step);
        let lin = self.vars.f_prod_lin.get(&mut self.lp, key.clone());

        let available = model.availability(node, &tech.id, &step) * tech.capacity_efficiency();
        self.lp.add_constraint(
            "production_capacity",
            key!(node, tech.id, output, step),
            relation(lin, Relation::Le, inst_cap.clone() * available),
        )?;

        let mut net = LinExpr::var(lin);
        if tech.k_part_load_max_eff > 0.0 {
            let over = self.vars.f_prod_over_max_eff.get(&mut self.lp, key.clone());
            let threshold = self.part_load_production(node, tech, year, tech.part_load_max_eff);
            self.lp.add_constraint(
                "part_load_max_eff",
                key!(node, tech.id, output, step),
                relation(over, Relation::Ge, LinExpr::var(lin) - threshold),
            )?;
            net.add_term(over, -tech.k_part_load_max_eff);
        }
        if tech.k_part_load_bend > 0.0 {
            let over = self.vars.f_prod_over_bend.get(&mut self.lp, key.clone());
            let threshold = self.part_load_production(node, tech, year, tech.part_load_bend);
            self.lp.add_constraint(
                "part_load_bend",
                key!(node, tech.id, output, step),
                relation(over, Relation::Ge, LinExpr::var(lin) - threshold),
            )?;
            net.add_term(over, -tech.k_part_load_bend);
        }

        let prod = self.vars.f_prod.get(&mut self.lp, key);
        self.lp.add_constraint(
            "production",
            key!(node, tech.id, output, step),
            relation(prod, Relation::Le, net),
        )
    }

    fn add_consumption_constraints(&mut self) -> Result<()> {
        let model = self.model;

        for node in &model.nodes {
            for tech in model.conversion_techs() {
                for &year in &model.time.years {
                    if !model.is_active(node, &tech.id, year) {
                        continue;
                    }
                    for step in model.time.steps_in_year(year) {
                        for fuel in model.fuels.keys() {
                            if !self.consumes(node, tech, fuel, &step) {
                                continue;
                            }

                            let mut consumed = LinExpr::default();
                            for f1 in model.balanced_substitutes(fuel) {
                                let key =
                                    (node.clone(), tech.id.clone(), fuel.clone(), f1.clone(), step);
                                consumed.add_term(self.vars.f_cons.get(&mut self.lp, key), 1.0);
                            }

                            let required = self.required_consumption(node, tech, fuel, step);
                            self.lp.add_constraint(
                                "consumption",
                                key!(node, tech.id, fuel, step),
                                relation(consumed, Relation::Eq, required),
                            )?;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Consumption of a fuel implied by the linear production and the electricity demand profiles
    fn required_consumption(
        &mut self,
        node: &NodeID,
        tech: &Tech,
        fuel: &FuelID,
        step: TimeStep,
    ) -> LinExpr {
        let model = self.model;
        let mut lin = LinExpr::default();
        for output in &tech.outputs {
            let key = (node.clone(), tech.id.clone(), output.clone(), step);
            lin.add_term(self.vars.f_prod_lin.get(&mut self.lp, key), 1.0);
        }

        let mut required = LinExpr::default();
        if tech.has_input(fuel) {
            required.add_scaled(&lin, 1.0 / tech.efficiency);
        }
        if model.is_electricity(fuel) {
            required += model.fixed_demand_profile(node, &tech.id, &step);
            let variable = model.variable_demand_profile(node, &tech.id, &step);
            if variable > 0.0 {
                let inst_cap = self.inst_cap(node, &tech.id, step.year);
                required.add_scaled(&inst_cap, variable);
            }
            required.add_scaled(&lin, tech.aux_electricity_demand);
        }

        required
    }

    fn add_trade_constraints(&mut self) -> Result<()> {
        let model = self.model;

        for node in &model.nodes {
            for fuel in model.fuels.keys() {
                let trade = model.trade(node, fuel);
                let balanced = model.substitution.is_settlement(fuel) && !model.is_vre(fuel);

                for step in model.time.steps() {
                    let key = (node.clone(), fuel.clone(), step);
                    let year_trade = model.year_trade(node, fuel, step.year);

                    if balanced
                        && trade.max_import != 0.0
                        && is_bounded(trade.min_import, trade.max_import)
                    {
                        let import = self.vars.f_import.get(&mut self.lp, key.clone());
                        self.lp.add_constraint(
                            "import_bounds",
                            key!(node, fuel, step),
                            ConstraintOutcome::range(trade.min_import, import.into(), trade.max_import),
                        )?;
                    }

                    if balanced && trade.max_fix_quant > 0 {
                        let deliveries = self.vars.f_fix_quant_import.get(&mut self.lp, key.clone());
                        let max = if model.fix_quant_schedule.allows(node, fuel, &step) {
                            f64::from(trade.max_fix_quant)
                        } else {
                            0.0
                        };
                        self.lp.add_constraint(
                            "fix_quant_import",
                            key!(node, fuel, step),
                            relation(deliveries, Relation::Le, max),
                        )?;
                    }

                    if balanced
                        && year_trade.max_import_timeseries != 0.0
                        && is_bounded(
                            year_trade.min_import_timeseries,
                            year_trade.max_import_timeseries,
                        )
                    {
                        let import = self.vars.f_import_timeseries.get(&mut self.lp, key.clone());
                        self.lp.add_constraint(
                            "import_timeseries_bounds",
                            key!(node, fuel, step),
                            ConstraintOutcome::range(
                                year_trade.min_import_timeseries,
                                import.into(),
                                year_trade.max_import_timeseries,
                            ),
                        )?;
                    }

                    if trade.max_export > 0.0 && is_bounded(trade.min_export, trade.max_export) {
                        let export = self.settled_sum(|vars| &mut vars.f_export, node, fuel, step);
                        self.lp.add_constraint(
                            "export_bounds",
                            key!(node, fuel, step),
                            ConstraintOutcome::range(trade.min_export, export, trade.max_export),
                        )?;
                    }

                    if trade.max_injection > 0.0 {
                        let flow = model.network_flow(node, fuel, &step);
                        let export = self.settled_sum(|vars| &mut vars.f_export, node, fuel, step);
                        self.lp.add_constraint(
                            "injection_bounds",
                            key!(node, fuel, step),
                            ConstraintOutcome::range(
                                trade.min_injection * flow,
                                export,
                                trade.max_injection * flow,
                            ),
                        )?;
                    }

                    if year_trade.max_export_timeseries != 0.0
                        && is_bounded(
                            year_trade.min_export_timeseries,
                            year_trade.max_export_timeseries,
                        )
                    {
                        let export = self.settled_sum(
                            |vars| &mut vars.f_export_timeseries,
                            node,
                            fuel,
                            step,
                        );
                        self.lp.add_constraint(
                            "export_timeseries_bounds",
                            key!(node, fuel, step),
                            ConstraintOutcome::range(
                                year_trade.min_export_timeseries,
                                export,
                                year_trade.max_export_timeseries,
                            ),
                        )?;
                    }
                }
            }
        }

        Ok(())
    }

    fn add_network_constraints(&mut self) -> Result<()> {
        let model = self.model;

        for node in &model.nodes {
            for fuel in model.fuels.keys() {
                let trade = model.trade(node, fuel);
                let balanced = model.substitution.is_settlement(fuel) && !model.is_vre(fuel);

                for &year in &model.time.years {
                    let year_trade = model.year_trade(node, fuel, year);
                    if year_trade.network_capacity_charge <= 0.0 {
                        continue;
                    }
                    let capacity = self
                        .vars
                        .f_network_capacity
                        .get(&mut self.lp, (node.clone(), fuel.clone(), year));

                    for step in model.time.steps_in_year(year) {
                        let key = (node.clone(), fuel.clone(), step);
                        let mut flow = LinExpr::default();
                        if balanced && trade.max_import > 0.0 {
                            flow.add_term(self.vars.f_import.get(&mut self.lp, key.clone()), 1.0);
                        }
                        if balanced && year_trade.max_import_timeseries > 0.0 {
                            let var = self.vars.f_import_timeseries.get(&mut self.lp, key);
                            flow.add_term(var, 1.0);
                        }
                        if trade.max_export > 0.0 {
                            flow += self.settled_sum(|vars| &mut vars.f_export, node, fuel, step);
                        }
                        if year_trade.max_export_timeseries > 0.0 {
                            flow += self.settled_sum(
                                |vars| &mut vars.f_export_timeseries,
                                node,
                                fuel,
                                step,
                            );
                        }

                        self.lp.add_constraint(
                            "network_capacity",
                            key!(node, fuel, step),
                            relation(capacity, Relation::Ge, flow),
                        )?;
                    }
                }
            }
        }

        Ok(())
    }

    fn add_storage_constraints(&mut self) -> Result<()> {
        let model = self.model;
        let time = &model.time;
        let (first_year, last_year) = (time.first_year(), time.last_year());

        for node in &model.nodes {
            for tech in model.storage_techs() {
                let fuel = tech.unique_input()?;
                let settled: Vec<&FuelID> = model.balanced_substitutes(fuel).collect();

                if model.is_storage_active(node, &tech.id, last_year) {
                    let levels = model.storage_levels(node, &tech.id);
                    let mut start = LinExpr::default();
                    for &f1 in &settled {
                        let key = (node.clone(), tech.id.clone(), f1.clone());
                        let start_var = self.vars.start_storage_level.get(&mut self.lp, key);
                        start.add_term(start_var, 1.0);

                        let key = (node.clone(), tech.id.clone(), f1.clone(), time.last_step());
                        let end = self.vars.storage_level.get(&mut self.lp, key);
                        self.lp.add_constraint(
                            "storage_end_level",
                            key!(node, tech.id, f1),
                            relation(end, Relation::Eq, start_var),
                        )?;
                    }
                    let inst_vol = self.inst_storage_vol(node, &tech.id, first_year);
                    self.lp.add_constraint(
                        "storage_start_level",
                        key!(node, tech.id),
                        relation(start, Relation::Eq, inst_vol * levels.start),
                    )?;
                }

                for &year in &time.years {
                    if !model.is_storage_active(node, &tech.id, year) {
                        continue;
                    }
                    for step in time.steps_in_year(year) {
                        self.add_storage_step(node, tech, fuel, &settled, step)?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Level bookkeeping, power limits and reserves of a storage in one step
    fn add_storage_step(
        &mut self,
        node: &NodeID,
        tech: &Tech,
        fuel: &FuelID,
        settled: &[&FuelID],
        step: TimeStep,
    ) -> Result<()> {
        let model = self.model;
        let time = &model.time;
        let year = step.year;
        let dt = time.delta_t();
        let previous = time.step_back(&step)?;

        let mut charge = LinExpr::default();
        let mut discharge = LinExpr::default();
        let mut level = LinExpr::default();
        for &f1 in settled {
            let key = (node.clone(), tech.id.clone(), f1.clone(), step);
            let cons_key = (node.clone(), tech.id.clone(), fuel.clone(), f1.clone(), step);
            let cons = self.vars.f_cons.get(&mut self.lp, cons_key);
            let prod = self.vars.f_prod.get(&mut self.lp, key.clone());
            let current = self.vars.storage_level.get(&mut self.lp, key);
            // A storage that was inactive in the previous step's year holds no energy
            let before = match previous {
                PreviousStep::Step(previous)
                    if model.is_storage_active(node, &tech.id, previous.year) =>
                {
                    let key = (node.clone(), tech.id.clone(), f1.clone(), previous);
                    Some(self.vars.storage_level.get(&mut self.lp, key))
                }
                PreviousStep::Step(_) => None,
                PreviousStep::BeforeStart => {
                    let key = (node.clone(), tech.id.clone(), f1.clone());
                    Some(self.vars.start_storage_level.get(&mut self.lp, key))
                }
            };

            let mut rhs = before.map(LinExpr::var).unwrap_or_default();
            rhs.add_term(cons, tech.efficiency * dt);
            rhs.add_term(prod, -dt / tech.efficiency);
            self.lp.add_constraint(
                "storage_balance",
                key!(node, tech.id, f1, step),
                relation(current, Relation::Eq, rhs),
            )?;

            charge.add_term(cons, 1.0);
            discharge.add_term(prod, 1.0);
            level.add_term(current, 1.0);
        }

        let inst_cap = self.inst_cap(node, &tech.id, year);
        self.lp.add_constraint(
            "storage_charge",
            key!(node, tech.id, step),
            relation(charge, Relation::Le, inst_cap.clone()),
        )?;
        self.lp.add_constraint(
            "storage_discharge",
            key!(node, tech.id, step),
            relation(discharge, Relation::Le, inst_cap),
        )?;

        let min_level = self.min_storage_level(node, tech, year);
        self.lp.add_constraint(
            "storage_min_level",
            key!(node, tech.id, step),
            relation(level.clone(), Relation::Ge, min_level),
        )?;
        let max_level = self.max_storage_level(node, tech, year);
        self.lp.add_constraint(
            "storage_max_level",
            key!(node, tech.id, step),
            relation(level, Relation::Le, max_level),
        )?;

        self.add_storage_reserves(node, tech, settled, step)
    }

    fn add_storage_reserves(
        &mut self,
        node: &NodeID,
        tech: &Tech,
        settled: &[&FuelID],
        step: TimeStep,
    ) -> Result<()> {
        let model = self.model;
        for reserved in model.fuels.keys() {
            let reserve = model.storage_reserve(node, &tech.id, reserved);
            let rolling = if reserve.window > 0 {
                rolling_reserve(model, node, &tech.id, reserved, &step)
            } else {
                0.0
            };
            if reserve.min_energy_reserve <= 0.0 && rolling <= 0.0 {
                continue;
            }

            let mut level = LinExpr::default();
            for &f1 in settled
                .iter()
                .filter(|f1| model.substitution.can_substitute(reserved, f1))
            {
                let key = (node.clone(), tech.id.clone(), f1.clone(), step);
                level.add_term(self.vars.storage_level.get(&mut self.lp, key), 1.0);
            }
            let unavailable = self.inst_storage_vol(node, &tech.id, step.year)
                * (1.0 - tech.availability_storage_vol);

            if reserve.min_energy_reserve > 0.0 {
                let mut required = unavailable.clone();
                required += reserve.min_energy_reserve;
                self.lp.add_constraint(
                    "storage_reserve",
                    key!(node, tech.id, reserved, step),
                    relation(level.clone(), Relation::Ge, required),
                )?;
            }
            if rolling > 0.0 {
                let mut required = unavailable;
                required += rolling;
                self.lp.add_constraint(
                    "storage_rolling_reserve",
                    key!(node, tech.id, reserved, step),
                    relation(level, Relation::Ge, required),
                )?;
            }
        }

        Ok(())
    }

    fn add_peak_constraints(&mut self) -> Result<()> {
        let model = self.model;
        let Some(electricity) = model.electricity() else {
            return Ok(());
        };

        for node in &model.nodes {
            for &year in &model.time.years {
                let key = (node.clone(), year);
                let active: Vec<&Tech> = model
                    .conversion_techs()
                    .filter(|tech| model.is_active(node, &tech.id, year))
                    .collect();

                let peak_v_edp = self.vars.peak_v_edp.get(&mut self.lp, key.clone());
                let peak_f_edp = self.vars.peak_f_edp.get(&mut self.lp, key.clone());
                let peak_demand = self.vars.peak_demand_el.get(&mut self.lp, key.clone());
                let peak_aux = self.vars.peak_aux_demand_el.get(&mut self.lp, key.clone());

                for step in model.time.steps_in_year(year) {
                    let mut variable = LinExpr::default();
                    let mut fixed = 0.0;
                    for tech in &active {
                        let profile = model.variable_demand_profile(node, &tech.id, &step);
                        if profile > 0.0 {
                            let inst_cap = self.inst_cap(node, &tech.id, year);
                            variable.add_scaled(&inst_cap, profile);
                        }
                        fixed += model.fixed_demand_profile(node, &tech.id, &step);
                    }
                    if !variable.is_constant() {
                        self.lp.add_constraint(
                            "peak_v_edp",
                            key!(node, step),
                            relation(peak_v_edp, Relation::Ge, variable),
                        )?;
                    }
                    if fixed > 0.0 {
                        self.lp.add_constraint(
                            "peak_f_edp",
                            key!(node, step),
                            relation(peak_f_edp, Relation::Ge, fixed),
                        )?;
                    }

                    let demand = model.demand(node, electricity, &step);
                    if demand > 0.0 {
                        self.lp.add_constraint(
                            "peak_demand_el",
                            key!(node, step),
                            relation(peak_demand, Relation::Ge, demand),
                        )?;
                    }
                }

                let mut aux = LinExpr::default();
                for tech in active.iter().filter(|tech| tech.aux_electricity_demand > 0.0) {
                    let inst_cap = self.inst_cap(node, &tech.id, year);
                    aux.add_scaled(&inst_cap, tech.aux_electricity_demand);
                }
                if !aux.is_constant() {
                    self.lp.add_constraint(
                        "peak_aux_demand_el",
                        key!(node, year),
                        relation(peak_aux, Relation::Ge, aux),
                    )?;
                }

                let peak = self.vars.peak_el_demand.get(&mut self.lp, key);
                let mut components = LinExpr::var(peak_v_edp);
                components.add_term(peak_f_edp, 1.0);
                components.add_term(peak_demand, 1.0);
                components.add_term(peak_aux, 1.0);
                self.lp.add_constraint(
                    "peak_el_demand",
                    key!(node, year),
                    relation(peak, Relation::Ge, components),
                )?;

                if model.parameters.cap_switch {
                    let mut firm = LinExpr::default();
                    for tech in model.techs.values().filter(|tech| {
                        !tech.is_external()
                            && tech.capacity_value > 0.0
                            && model.is_active(node, &tech.id, year)
                    }) {
                        let inst_cap = self.inst_cap(node, &tech.id, year);
                        firm.add_scaled(&inst_cap, tech.capacity_value);
                    }
                    self.lp.add_constraint(
                        "firm_capacity",
                        key!(node, year),
                        relation(peak, Relation::Le, firm),
                    )?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::fixture::{
        assert_error, build_model, conversion_tech, fuel, model, node_id, pv_id,
        single_step_calendar, storage_tech,
    };
    use crate::fuel::FuelMap;
    use crate::model::{CalendarParameters, Model, NodeFuelTrade, NodeTechLimits, TechCosts};
    use crate::optimisation::build_model as formulate;
    use crate::results::Results;
    use crate::solver::{HighsSolver, Solver};
    use crate::tech::TechMap;
    use crate::time_index::TimeStep;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    #[rstest]
    fn test_fuel_balance_terms(mut model: Model) {
        model.parameters.slack_switch = false;
        let built = formulate(&model).unwrap();
        let rows: Vec<_> = built.lp.rows_in("fuel_balance").collect();
        assert_eq!(rows.len(), 1);

        // PV production and imports against delivery
        let row = rows[0];
        assert_eq!(row.key, "N1, Electricity, Y1 D1 H1 sH0");
        assert_eq!(row.constraint.terms.len(), 3);
        assert_eq!(row.constraint.lower, 0.0);
        assert_eq!(row.constraint.upper, 0.0);
        let delivery = built
            .variables
            .f_delivery
            .iter()
            .next()
            .map(|(_, var)| var)
            .unwrap();
        assert!(
            row.constraint
                .terms
                .iter()
                .any(|&(var, coeff)| var == delivery && coeff < 0.0)
        );
    }

    #[rstest]
    fn test_no_consumption_of_renewable_resource(model: Model) {
        let built = formulate(&model).unwrap();
        assert_eq!(built.lp.rows_in("consumption").count(), 0);
        assert_eq!(built.variables.f_cons.iter().count(), 0);
    }

    #[rstest]
    fn test_inverted_capacity_limits_are_infeasible(mut model: Model) {
        model.node_tech_limits.insert(
            (node_id(), pv_id(), 1),
            NodeTechLimits {
                min_inst_cap: 10.0,
                max_inst_cap: 5.0,
                ..NodeTechLimits::default()
            },
        );
        assert_error!(
            formulate(&model),
            "Constraint capacity_bounds[N1, PV, 1] is infeasible by construction"
        );
    }

    #[rstest]
    fn test_unit_sizing_adds_integer_variables(mut model: Model) {
        model.parameters.unit_cap_switch = true;
        let built = formulate(&model).unwrap();
        assert_eq!(built.lp.rows_in("unit_capacity_addition").count(), 1);
        assert!(built.lp.num_integer() >= 1);
    }

    #[rstest]
    fn test_unit_sizing_installs_whole_units(mut model: Model) {
        model.parameters.unit_cap_switch = true;
        model.parameters.slack_switch = false;
        model.node_fuel_trade.clear();
        model.tech_costs.insert(
            (pv_id(), 1),
            TechCosts {
                invest: 10.0,
                ..TechCosts::default()
            },
        );
        model.node_tech_limits.insert(
            (node_id(), pv_id(), 1),
            NodeTechLimits {
                unit_cap: 30.0,
                ..NodeTechLimits::default()
            },
        );

        let built = formulate(&model).unwrap();
        let solution = HighsSolver.solve(&built.lp).unwrap();
        let results = Results::new(&model, &built, &solution);

        // A demand of 100 needs four units of 30
        let units = results.cap_add(&node_id(), &pv_id(), 1) / 30.0;
        assert_approx_eq!(f64, units, units.round(), epsilon = 1e-6);
        assert_approx_eq!(f64, units, 4.0, epsilon = 1e-6);
        assert!(results.inst_cap(&node_id(), &pv_id(), 1) >= 100.0 - 1e-6);
    }

    #[rstest]
    fn test_finite_import_limit_adds_bounds(mut model: Model) {
        let built = formulate(&model).unwrap();
        assert_eq!(built.lp.rows_in("import_bounds").count(), 1);

        // Disabled imports neither enter the balance nor get bounds
        model
            .node_fuel_trade
            .insert((node_id(), "Electricity".into()), NodeFuelTrade::default());
        let built = formulate(&model).unwrap();
        assert_eq!(built.lp.rows_in("import_bounds").count(), 0);
        assert_eq!(built.variables.f_import.iter().count(), 0);
    }

    fn storage_model() -> Model {
        let fuels: FuelMap = [fuel("H2", "kg")]
            .into_iter()
            .map(|fuel| (fuel.id.clone(), fuel))
            .collect();
        let techs: TechMap = [
            storage_tech("Tank", "H2"),
            conversion_tech("Source", &[], &["H2"]),
        ]
        .into_iter()
        .map(|tech| (tech.id.clone(), tech))
        .collect();
        let calendar = CalendarParameters {
            hours: vec![1, 2, 3],
            scale_h_to: 3,
            ..single_step_calendar()
        };

        build_model(calendar, fuels, techs)
    }

    #[test]
    fn test_storage_is_cyclic() {
        let model = storage_model();
        let built = formulate(&model).unwrap();
        let lp = &built.lp;

        assert_eq!(lp.rows_in("storage_balance").count(), 3);
        assert_eq!(lp.rows_in("storage_start_level").count(), 1);
        let end: Vec<_> = lp.rows_in("storage_end_level").collect();
        assert_eq!(end.len(), 1);
        assert_eq!(end[0].key, "N1, Tank, H2");

        // The first step carries over from the start level
        let start = built.variables.start_storage_level.iter().next().unwrap().1;
        let first = lp.rows_in("storage_balance").next().unwrap();
        assert!(first.constraint.terms.iter().any(|&(var, _)| var == start));
    }

    #[test]
    fn test_storage_balance_coefficients() {
        let mut model = storage_model();
        model.techs.get_mut("Tank").unwrap().efficiency = 0.5;
        let built = formulate(&model).unwrap();
        let row = built.lp.rows_in("storage_balance").nth(1).unwrap();

        // level - before - 0.5 * charge + 2 * discharge == 0
        let mut coeffs: Vec<f64> = row.constraint.terms.iter().map(|&(_, coeff)| coeff).collect();
        coeffs.sort_by(f64::total_cmp);
        assert_eq!(coeffs.len(), 4);
        assert_approx_eq!(f64, coeffs[0], -1.0);
        assert_approx_eq!(f64, coeffs[1], -0.5);
        assert_approx_eq!(f64, coeffs[2], 1.0);
        assert_approx_eq!(f64, coeffs[3], 2.0);
    }

    #[test]
    fn test_inactive_storage_has_no_balance() {
        let mut model = storage_model();
        model.node_tech_limits.insert(
            (node_id(), "Tank".into(), 1),
            NodeTechLimits {
                max_inst_storage_vol: 0.0,
                ..NodeTechLimits::default()
            },
        );
        let built = formulate(&model).unwrap();
        assert_eq!(built.lp.rows_in("storage_balance").count(), 0);
        assert_eq!(built.lp.rows_in("storage_start_level").count(), 0);
    }

    #[test]
    fn test_storage_starts_empty_after_inactive_year() {
        let fuels: FuelMap = [fuel("H2", "kg")]
            .into_iter()
            .map(|fuel| (fuel.id.clone(), fuel))
            .collect();
        let techs: TechMap = [storage_tech("Tank", "H2")]
            .into_iter()
            .map(|tech| (tech.id.clone(), tech))
            .collect();
        let calendar = CalendarParameters {
            years: vec![1, 2],
            hours: vec![1, 2, 3],
            scale_y_to: 2,
            scale_h_to: 3,
            ..single_step_calendar()
        };
        let mut model = build_model(calendar, fuels, techs);
        model.parameters.slack_switch = false;
        model.node_tech_limits.insert(
            (node_id(), "Tank".into(), 1),
            NodeTechLimits {
                max_inst_cap: 0.0,
                ..NodeTechLimits::default()
            },
        );
        model
            .series
            .demand
            .insert((node_id(), "H2".into()), TimeStep::new(2, 1, 1, 0), 10.0);

        let built = formulate(&model).unwrap();
        assert_eq!(built.lp.rows_in("storage_balance").count(), 3);
        assert!(
            built
                .variables
                .storage_level
                .iter()
                .all(|(key, _)| key.3.year == 2)
        );

        // Nothing produces hydrogen, so the tank cannot serve the demand
        assert!(HighsSolver.solve(&built.lp).is_err());
    }

    #[rstest]
    fn test_firm_capacity_requirement(mut model: Model) {
        model.parameters.cap_switch = true;
        let built = formulate(&model).unwrap();
        let rows: Vec<_> = built.lp.rows_in("firm_capacity").collect();
        assert_eq!(rows.len(), 1);

        // No technology has a capacity value, so the peak must be zero
        assert_eq!(rows[0].constraint.upper, 0.0);
    }
}
