//! Aggregation of a solution into annual values, key performance indicators and reference prices.
//!
//! Flows are summed over the sampled steps of a year and scaled to annual energy with the
//! calendar's scale factors. Ratios whose denominator is below the model's zero threshold are
//! reported as zero.
use crate::finance::CostKind;
use crate::id::{AuxMediumID, FuelID, NodeID, TechID};
use crate::model::Model;
use crate::optimisation::NodeTechYear;
use crate::optimisation::expressions::aux_medium_factor;
use crate::results::Results;
use crate::tech::Tech;
use crate::time_index::TimeStep;
use anyhow::Result;
use indexmap::IndexMap;
use itertools::Itertools;
use log::debug;
use std::hash::Hash;

fn get<K: Eq + Hash>(values: &IndexMap<K, f64>, key: &K) -> f64 {
    values.get(key).copied().unwrap_or(0.0)
}

/// Sum a flow over the steps of a year and convert it into annual energy
fn annual_sum<F: FnMut(&TimeStep) -> f64>(model: &Model, year: u32, mut flow: F) -> f64 {
    let time = &model.time;
    time.steps_in_year(year).map(|step| flow(&step)).sum::<f64>() * time.annual_energy_factor()
}

/// `numerator / denominator`, or zero if the denominator is negligible
fn ratio(model: &Model, numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() < model.parameters.zero_threshold {
        0.0
    } else {
        numerator / denominator
    }
}

/// The fuels a technology's production is booked in
pub fn produced_fuels<'a>(model: &'a Model, tech: &'a Tech) -> Result<Vec<&'a FuelID>> {
    if tech.is_storage() {
        Ok(model.balanced_substitutes(tech.unique_output()?).collect())
    } else {
        Ok(tech.outputs.iter().collect())
    }
}

/// The fuels a technology may consume: its inputs plus electricity for its own demand
pub fn consumed_fuels<'a>(model: &'a Model, tech: &'a Tech) -> impl Iterator<Item = &'a FuelID> {
    model
        .fuels
        .keys()
        .filter(move |fuel| tech.has_input(fuel) || model.is_electricity(fuel))
}

/// Constant self-consumption of a settlement fuel by the system
pub fn const_cons_system(
    model: &Model,
    results: &Results,
    node: &NodeID,
    f1: &FuelID,
    year: u32,
) -> f64 {
    let share = model
        .fuels
        .get(f1)
        .map_or(0.0, |fuel| fuel.share_const_cons_system);
    if share == 0.0 {
        return 0.0;
    }

    let capacity: f64 = model
        .techs
        .values()
        .filter(|tech| tech.const_cons_system && !tech.is_external())
        .map(|tech| results.inst_cap(node, &tech.id, year))
        .sum();

    capacity * share
}

/// Annual energy flows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnualValues {
    /// Exogenous demand, summed over nodes
    pub demand: IndexMap<(FuelID, u32), f64>,
    /// Delivery to demand of a fuel, by settlement fuel
    pub delivery: IndexMap<(FuelID, FuelID, u32), f64>,
    /// Production, by node, technology and fuel
    pub production: IndexMap<(NodeID, TechID, FuelID, u32), f64>,
    /// Consumption of a fuel, by node, technology and settlement fuel
    pub consumption: IndexMap<(NodeID, TechID, FuelID, FuelID, u32), f64>,
    /// Auxiliary medium flow
    pub aux_medium_flow: IndexMap<(NodeID, AuxMediumID, u32), f64>,
    /// Imports, summed over nodes
    pub import: IndexMap<(FuelID, u32), f64>,
    /// Spot-market imports, summed over nodes
    pub import_timeseries: IndexMap<(FuelID, u32), f64>,
    /// Fixed-quantity deliveries, summed over nodes
    pub fix_quant_import: IndexMap<(FuelID, u32), f64>,
    /// Exports of a fuel, by settlement fuel
    pub export: IndexMap<(FuelID, FuelID, u32), f64>,
    /// Spot-market exports of a fuel, by settlement fuel
    pub export_timeseries: IndexMap<(FuelID, FuelID, u32), f64>,
    /// Supply of the system self-consumption of a fuel, by settlement fuel
    pub supply_cons_system: IndexMap<(FuelID, FuelID, u32), f64>,
}

/// The signature of per-node flows of a fuel settled as a settlement fuel
type SettledFlowFn = fn(&Results, &NodeID, &FuelID, &FuelID, &TimeStep) -> f64;
/// The signature of per-node flows of a settlement fuel
type NodeFlowFn = fn(&Results, &NodeID, &FuelID, &TimeStep) -> f64;

impl AnnualValues {
    /// Sum the flows of a solution per year
    pub fn new(model: &Model, results: &Results) -> Result<Self> {
        let time = &model.time;
        let mut annual = Self::default();

        for &year in &time.years {
            for fuel in model.fuels.keys() {
                let demand = model
                    .nodes
                    .iter()
                    .map(|node| annual_sum(model, year, |step| model.demand(node, fuel, step)))
                    .sum();
                annual.demand.insert((fuel.clone(), year), demand);

                for f1 in model.balanced_substitutes(fuel) {
                    let settled = |flow: SettledFlowFn| -> f64 {
                        model
                            .nodes
                            .iter()
                            .map(|node| {
                                annual_sum(model, year, |step| flow(results, node, fuel, f1, step))
                            })
                            .sum()
                    };
                    let key = (fuel.clone(), f1.clone(), year);
                    annual
                        .delivery
                        .insert(key.clone(), settled(Results::f_delivery));
                    annual.export.insert(key.clone(), settled(Results::f_export));
                    annual
                        .export_timeseries
                        .insert(key.clone(), settled(Results::f_export_timeseries));
                    annual
                        .supply_cons_system
                        .insert(key, settled(Results::f_supply_cons_system));
                }
            }

            for f1 in model.balanced_fuels() {
                let summed = |flow: NodeFlowFn| -> f64 {
                    model
                        .nodes
                        .iter()
                        .map(|node| annual_sum(model, year, |step| flow(results, node, f1, step)))
                        .sum()
                };
                let key = (f1.clone(), year);
                annual.import.insert(key.clone(), summed(Results::f_import));
                annual
                    .import_timeseries
                    .insert(key.clone(), summed(Results::f_import_timeseries));

                // Deliveries are counted, so the sub-hour length does not apply
                let deliveries: f64 = model
                    .nodes
                    .iter()
                    .map(|node| {
                        let size = model.trade(node, f1).fix_quant_size;
                        time.steps_in_year(year)
                            .map(|step| results.f_fix_quant_import(node, f1, &step))
                            .sum::<f64>()
                            * size
                    })
                    .sum();
                annual
                    .fix_quant_import
                    .insert(key, deliveries * time.scale_h() * time.scale_d());
            }

            for node in &model.nodes {
                for tech in model.techs.values().filter(|tech| !tech.is_external()) {
                    for f1 in produced_fuels(model, tech)? {
                        let production =
                            annual_sum(model, year, |step| results.f_prod(node, &tech.id, f1, step));
                        annual.production.insert(
                            (node.clone(), tech.id.clone(), f1.clone(), year),
                            production,
                        );
                    }

                    for fuel in consumed_fuels(model, tech) {
                        for f1 in model.balanced_substitutes(fuel) {
                            let consumption = annual_sum(model, year, |step| {
                                results.f_cons(node, &tech.id, fuel, f1, step)
                            });
                            annual.consumption.insert(
                                (node.clone(), tech.id.clone(), fuel.clone(), f1.clone(), year),
                                consumption,
                            );
                        }
                    }
                }

                for medium in model.aux_media.values() {
                    let flow = model
                        .conversion_techs()
                        .filter_map(|tech| {
                            let (fuel, factor) = aux_medium_factor(model, tech, medium)?;
                            let production = annual_sum(model, year, |step| {
                                results.f_prod(node, &tech.id, fuel, step)
                            });
                            Some(production * factor)
                        })
                        .sum();
                    annual
                        .aux_medium_flow
                        .insert((node.clone(), medium.id.clone(), year), flow);
                }
            }
        }

        Ok(annual)
    }

    /// Annual production of a fuel by a technology at a node
    pub fn production(&self, node: &NodeID, tech: &TechID, f1: &FuelID, year: u32) -> f64 {
        get(
            &self.production,
            &(node.clone(), tech.clone(), f1.clone(), year),
        )
    }

    /// Annual consumption of a fuel by a technology at a node, summed over its settlement fuels
    pub fn consumption(&self, model: &Model, node: &NodeID, tech: &TechID, fuel: &FuelID, year: u32) -> f64 {
        model
            .balanced_substitutes(fuel)
            .map(|f1| {
                get(
                    &self.consumption,
                    &(node.clone(), tech.clone(), fuel.clone(), f1.clone(), year),
                )
            })
            .sum()
    }

    /// Net annual inflow of a settlement fuel over all nodes and years.
    ///
    /// This is zero whenever no slack was used.
    pub fn energy_balance(&self, f1: &FuelID) -> f64 {
        let sum_settled = |values: &IndexMap<(FuelID, FuelID, u32), f64>| -> f64 {
            values
                .iter()
                .filter(|((_, settled, _), _)| settled == f1)
                .map(|(_, value)| value)
                .sum()
        };
        let sum_fuel = |values: &IndexMap<(FuelID, u32), f64>| -> f64 {
            values
                .iter()
                .filter(|((fuel, _), _)| fuel == f1)
                .map(|(_, value)| value)
                .sum()
        };

        let production: f64 = self
            .production
            .iter()
            .filter(|((_, _, fuel, _), _)| fuel == f1)
            .map(|(_, value)| value)
            .sum();
        let consumption: f64 = self
            .consumption
            .iter()
            .filter(|((_, _, _, settled, _), _)| settled == f1)
            .map(|(_, value)| value)
            .sum();

        production + sum_fuel(&self.import) + sum_fuel(&self.import_timeseries)
            + sum_fuel(&self.fix_quant_import)
            - consumption
            - sum_settled(&self.export)
            - sum_settled(&self.export_timeseries)
            - sum_settled(&self.delivery)
            - sum_settled(&self.supply_cons_system)
    }
}

/// Key performance indicators of a solution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Kpis {
    /// Positive slack over the whole horizon, per fuel
    pub slack_pos: IndexMap<FuelID, f64>,
    /// Negative slack over the whole horizon, per fuel
    pub slack_neg: IndexMap<FuelID, f64>,
    /// Net inflow of every balanced fuel (see [`AnnualValues::energy_balance`])
    pub energy_balance: IndexMap<FuelID, f64>,
    /// Land used by installed capacities and storage volumes
    pub land_use: IndexMap<(NodeID, u32), f64>,
    /// Full-load hours of simulated operation
    pub flh: IndexMap<NodeTechYear, f64>,
    /// Full-load hours possible from availability alone
    pub flh_possible: IndexMap<NodeTechYear, f64>,
    /// Storage volume in days of average consumption
    pub storage_ratio: IndexMap<(NodeID, TechID, FuelID, u32), f64>,
    /// Lowest total storage level in a year
    pub min_storage_level: IndexMap<NodeTechYear, f64>,
}

/// Calculate the key performance indicators of a solution
pub fn calculate_kpis(model: &Model, results: &Results, annual: &AnnualValues) -> Result<Kpis> {
    debug!("Calculating KPIs");
    let time = &model.time;
    let mut kpis = Kpis::default();

    let slack_factor = time.annual_energy_factor() * time.scale_y();
    let steps: Vec<TimeStep> = time.steps().collect();
    for f1 in model.balanced_fuels() {
        let total = |flow: NodeFlowFn| -> f64 {
            model
                .nodes
                .iter()
                .cartesian_product(&steps)
                .map(|(node, step)| flow(results, node, f1, step))
                .sum::<f64>()
                * slack_factor
        };
        kpis.slack_pos
            .insert(f1.clone(), total(Results::f_slack_pos));
        kpis.slack_neg
            .insert(f1.clone(), total(Results::f_slack_neg));
        kpis.energy_balance
            .insert(f1.clone(), annual.energy_balance(f1));
    }

    for node in &model.nodes {
        for &year in &time.years {
            let land: f64 = model
                .techs
                .values()
                .filter(|tech| !tech.is_external())
                .map(|tech| {
                    let installed = if tech.is_storage() {
                        results.inst_storage_vol(node, &tech.id, year)
                    } else {
                        results.inst_cap(node, &tech.id, year)
                    };
                    installed * tech.land_use
                })
                .sum();
            kpis.land_use.insert((node.clone(), year), land);

            for tech in model.techs.values().filter(|tech| !tech.is_external()) {
                let key = (node.clone(), tech.id.clone(), year);
                let possible =
                    annual_sum(model, year, |step| model.availability(node, &tech.id, step));
                kpis.flh_possible.insert(key.clone(), possible);

                if tech.is_storage() {
                    add_storage_kpis(model, results, &mut kpis, node, tech, year)?;
                    continue;
                }

                let inst_cap = results.inst_cap(node, &tech.id, year);
                let fuel = tech.load_fuel()?;
                let load = if tech.capacity_of_input {
                    annual.consumption(model, node, &tech.id, fuel, year)
                } else {
                    annual.production(node, &tech.id, fuel, year)
                };
                kpis.flh.insert(key, ratio(model, load, inst_cap));
            }
        }
    }

    Ok(kpis)
}

fn add_storage_kpis(
    model: &Model,
    results: &Results,
    kpis: &mut Kpis,
    node: &NodeID,
    tech: &Tech,
    year: u32,
) -> Result<()> {
    let time = &model.time;
    let fuel = tech.unique_output()?;
    let settled: Vec<&FuelID> = model.balanced_substitutes(fuel).collect();

    // Consumption by conversion technologies and demand, per sampled day
    let daily: Vec<f64> = time
        .days
        .iter()
        .map(|&day| {
            time.steps_in_year(year)
                .filter(|step| step.day == day)
                .cartesian_product(&settled)
                .map(|(step, f1)| {
                    let consumed: f64 = model
                        .conversion_techs()
                        .map(|other| results.f_cons(node, &other.id, fuel, f1, &step))
                        .sum();
                    consumed + results.f_delivery(node, fuel, f1, &step)
                })
                .sum::<f64>()
                * time.delta_t()
                * time.scale_h()
        })
        .collect();
    #[allow(clippy::cast_precision_loss)]
    let average = daily.iter().sum::<f64>() / daily.len() as f64;
    let volume = results.inst_storage_vol(node, &tech.id, year);
    kpis.storage_ratio.insert(
        (node.clone(), tech.id.clone(), fuel.clone(), year),
        ratio(model, volume, average),
    );

    let min_level = time
        .steps_in_year(year)
        .map(|step| {
            settled
                .iter()
                .map(|f1| results.storage_level(node, &tech.id, f1, &step))
                .sum::<f64>()
        })
        .fold(f64::INFINITY, f64::min);
    kpis.min_storage_level
        .insert((node.clone(), tech.id.clone(), year), min_level);

    Ok(())
}

/// The load of one or more technologies over a year, sorted from highest to lowest
#[derive(Debug, Clone, PartialEq)]
pub struct LoadDurationCurve {
    /// `<techs joined by +>_<node>_Y<year>`
    pub label: String,
    /// Load at hourly resolution, in descending order
    pub values: Vec<f64>,
}

/// Calculate the combined load duration curve of some technologies at a node.
///
/// The load is the consumption of input-rated technologies and the production of all others.
pub fn load_duration_curve(
    model: &Model,
    results: &Results,
    node: &NodeID,
    techs: &[&Tech],
    year: u32,
) -> Result<LoadDurationCurve> {
    let fuels: Vec<&FuelID> = techs
        .iter()
        .map(|tech| tech.load_fuel())
        .collect::<Result<_>>()?;

    let mut values: Vec<f64> = model
        .time
        .hourly_steps_in_year(year)
        .map(|step| {
            techs
                .iter()
                .zip(&fuels)
                .map(|(tech, fuel)| {
                    if tech.capacity_of_input {
                        model
                            .balanced_substitutes(fuel)
                            .map(|f1| results.f_cons(node, &tech.id, fuel, f1, &step))
                            .sum::<f64>()
                    } else {
                        results.f_prod(node, &tech.id, fuel, &step)
                    }
                })
                .sum::<f64>()
        })
        .collect();
    values.sort_by(|a, b| b.total_cmp(a));

    let label = format!(
        "{}_{node}_Y{year}",
        techs.iter().map(|tech| tech.id.to_string()).join("+")
    );

    Ok(LoadDurationCurve { label, values })
}

/// Load duration curves of the variable renewable generation (combined) and of every conversion
/// technology, for every node and year
pub fn load_duration_curves(model: &Model, results: &Results) -> Result<Vec<LoadDurationCurve>> {
    let vre: Vec<&Tech> = model
        .conversion_techs()
        .filter(|tech| tech.inputs.iter().any(|fuel| model.is_vre(fuel)))
        .collect();
    let mut groups: Vec<Vec<&Tech>> = Vec::new();
    if vre.len() > 1 {
        groups.push(vre);
    }
    groups.extend(model.conversion_techs().map(|tech| vec![tech]));

    let mut curves = Vec::new();
    for techs in &groups {
        for node in &model.nodes {
            for &year in &model.time.years {
                curves.push(load_duration_curve(model, results, node, techs, year)?);
            }
        }
    }

    Ok(curves)
}

/// The share of electricity each producer supplies to each consumer over the project time
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyShare {
    /// The fuel the matrix is calculated for
    pub fuel: FuelID,
    /// Row labels: technologies, then imports and spot imports
    pub producers: Vec<String>,
    /// Column labels: technologies, then exports, spot exports, deliveries and system
    /// self-consumption
    pub consumers: Vec<String>,
    /// Energy, by producer (rows) and consumer (columns)
    pub values: Vec<Vec<f64>>,
}

impl EnergyShare {
    /// The energy a producer supplied to a consumer
    pub fn get(&self, producer: &str, consumer: &str) -> Option<f64> {
        let row = self.producers.iter().position(|label| label == producer)?;
        let column = self.consumers.iter().position(|label| label == consumer)?;
        Some(self.values[row][column])
    }
}

/// Calculate the electricity energy-share matrix.
///
/// In each step, every consumer is attributed the producers' shares of the total supply.
/// Returns `None` if the model has no electricity fuel.
pub fn energy_share(model: &Model, results: &Results) -> Option<EnergyShare> {
    let electricity = model.electricity()?;
    let time = &model.time;
    let threshold = model.parameters.zero_threshold;
    let settled: Vec<&FuelID> = model.balanced_substitutes(electricity).collect();
    let steps: Vec<TimeStep> = time.steps().collect();
    let techs: Vec<&Tech> = model
        .techs
        .values()
        .filter(|tech| !tech.is_external())
        .collect();

    // A flow summed over nodes and settlement fuels, per step
    let per_step = |flow: &dyn Fn(&NodeID, &FuelID, &TimeStep) -> f64| -> Vec<f64> {
        steps
            .iter()
            .map(|step| {
                model
                    .nodes
                    .iter()
                    .cartesian_product(&settled)
                    .map(|(node, f1)| flow(node, f1, step))
                    .sum()
            })
            .collect()
    };

    let mut producers: Vec<(String, Vec<f64>)> = techs
        .iter()
        .map(|tech| {
            let power = per_step(&|node, f1, step| results.f_prod(node, &tech.id, f1, step));
            (tech.id.to_string(), power)
        })
        .collect();
    producers.push((
        "f_import".to_string(),
        per_step(&|node, f1, step| results.f_import(node, f1, step)),
    ));
    producers.push((
        "f_import_timeseries".to_string(),
        per_step(&|node, f1, step| results.f_import_timeseries(node, f1, step)),
    ));
    let fix_quant = per_step(&|node, f1, step| results.fix_quant_flow(model, node, f1, step));
    let total: Vec<f64> = (0..steps.len())
        .map(|i| producers.iter().map(|(_, power)| power[i]).sum::<f64>() + fix_quant[i])
        .collect();

    let mut consumers: Vec<(String, Vec<f64>)> = techs
        .iter()
        .map(|tech| {
            let load = per_step(&|node, f1, step| {
                results.f_cons(node, &tech.id, electricity, f1, step)
            });
            (tech.id.to_string(), load)
        })
        .collect();
    consumers.push((
        "f_export".to_string(),
        per_step(&|node, f1, step| results.f_export(node, electricity, f1, step)),
    ));
    consumers.push((
        "f_export_timeseries".to_string(),
        per_step(&|node, f1, step| results.f_export_timeseries(node, electricity, f1, step)),
    ));
    consumers.push((
        "f_delivery".to_string(),
        per_step(&|node, f1, step| results.f_delivery(node, electricity, f1, step)),
    ));
    consumers.push((
        "const_cons_system".to_string(),
        per_step(&|node, f1, step| const_cons_system(model, results, node, f1, step.year)),
    ));

    let factor = time.annual_energy_factor() * time.scale_y();
    let values = producers
        .iter()
        .map(|(_, power)| {
            let share: Vec<f64> = power
                .iter()
                .zip(&total)
                .map(|(power, total)| if total.abs() < threshold { 0.0 } else { power / total })
                .collect();
            consumers
                .iter()
                .map(|(_, load)| {
                    share.iter().zip(load).map(|(s, l)| s * l).sum::<f64>() * factor
                })
                .collect()
        })
        .collect();

    Some(EnergyShare {
        fuel: electricity.clone(),
        producers: producers.into_iter().map(|(label, _)| label).collect(),
        consumers: consumers.into_iter().map(|(label, _)| label).collect(),
        values,
    })
}

/// Total costs related to the discounted quantities of the reference fuels
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Prices {
    /// Total discounted cost, excluding the storage level reward
    pub total_cost: f64,
    /// Discounted production of the reference fuels by conversion technologies
    pub ref_prod_disc: f64,
    /// Discounted demand for the reference fuels
    pub ref_demand_disc: f64,
    /// Discounted exports of the reference fuels
    pub ref_export_disc: f64,
    /// Discounted demand and exports of the reference fuels
    pub ref_out_disc: f64,
    /// Cost per unit of production
    pub ref_prod_price: f64,
    /// Cost per unit of demand
    pub ref_demand_price: f64,
    /// Cost per unit of exports
    pub ref_export_price: f64,
    /// Cost per unit of demand and exports
    pub ref_out_price: f64,
}

/// Discount an annual quantity as an operational stream over the sampled years
fn discounted_quantity<F: FnMut(u32) -> f64>(model: &Model, value: F) -> f64 {
    model
        .discounting()
        .discount(CostKind::Opex, model.time.years.iter().copied(), value)
}

/// Calculate the cost per unit of the reference fuels, in base units of the fuels
pub fn calculate_prices(model: &Model, results: &Results, annual: &AnnualValues) -> Prices {
    let mut ref_prod_disc = 0.0;
    let mut ref_demand_disc = 0.0;
    let mut ref_export_disc = 0.0;
    for fuel in model.reference_fuels() {
        ref_demand_disc +=
            discounted_quantity(model, |year| get(&annual.demand, &(fuel.clone(), year)));
        for f1 in model.substitution.settlement_substitutes(fuel) {
            ref_export_disc += discounted_quantity(model, |year| {
                get(&annual.export, &(fuel.clone(), f1.clone(), year))
            });
            ref_prod_disc += discounted_quantity(model, |year| {
                let mut production = 0.0;
                for node in &model.nodes {
                    for tech in model.conversion_techs() {
                        production += annual.production(node, &tech.id, f1, year);
                    }
                }
                production
            });
        }
    }
    let ref_out_disc = ref_demand_disc + ref_export_disc;

    let total_cost = results.discounted.total_excluding_incentive();
    let price = |reference: f64| {
        if reference > model.parameters.zero_threshold {
            total_cost / reference
        } else {
            0.0
        }
    };

    Prices {
        total_cost,
        ref_prod_disc,
        ref_demand_disc,
        ref_export_disc,
        ref_out_disc,
        ref_prod_price: price(ref_prod_disc),
        ref_demand_price: price(ref_demand_disc),
        ref_export_price: price(ref_export_disc),
        ref_out_price: price(ref_out_disc),
    }
}
