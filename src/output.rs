//! The module responsible for writing output data to disk.
use crate::id::{FuelID, NodeID, TechID};
use crate::kpi::{EnergyShare, LoadDurationCurve, consumed_fuels, produced_fuels};
use crate::model::Model;
use crate::optimisation::LinearProgram;
use crate::optimisation::expressions::rolling_reserve;
use crate::results::Results;
use crate::scenario::Report;
use crate::time_index::{TimeIndex, TimeStep};
use anyhow::{Context, Result, ensure};
use chrono::{Duration, NaiveDate};
use indexmap::IndexMap;
use itertools::{Itertools, iproduct};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub mod metadata;

/// The root folder in which model-specific output folders will be created
pub const OUTPUT_DIRECTORY_ROOT: &str = "enopt_results";

/// The output file name for annual values, costs and indicators
pub const OUTPUT_FILE_NAME: &str = "output.csv";

/// The output file name for load duration curves
pub const LOAD_DURATION_CURVE_FILE_NAME: &str = "load_duration_curve.csv";

/// The output file name for the electricity energy-share matrix
pub const ENERGY_SHARE_FILE_NAME: &str = "energy_share.csv";

/// The output file name for time series
pub const TIMESERIES_FILE_NAME: &str = "timeseries.csv";

/// The output file name for the duration of each phase of a run
pub const RUNTIME_FILE_NAME: &str = "runtime.csv";

/// The output file name for the size of each variable and constraint family
pub const LP_SUMMARY_FILE_NAME: &str = "lp_summary.csv";

/// Calendar year of the first modelled year in time stamps
const FIRST_CALENDAR_YEAR: i32 = 2019;

/// The default output folder for the scenario in `model_dir`, named after its input folder
pub fn get_output_dir(model_dir: &Path) -> Result<PathBuf> {
    // Resolve "." and similar to a real folder name
    let model_dir = model_dir
        .canonicalize()
        .context("Could not resolve path to model")?;
    let model_name = model_dir
        .file_name()
        .context("Model cannot be in root folder")?
        .to_str()
        .context("Invalid chars in model dir name")?;

    Ok([OUTPUT_DIRECTORY_ROOT, model_name].iter().collect())
}

/// Create an empty output folder at `output_dir`, with its parents.
///
/// A non-empty folder is only replaced if `allow_overwrite` is set. Returns whether one was.
pub fn create_output_directory(output_dir: &Path, allow_overwrite: bool) -> Result<bool> {
    let mut overwrite = false;
    if let Ok(mut entries) = fs::read_dir(output_dir)
        && entries.next().is_some()
    {
        ensure!(
            allow_overwrite,
            "Output folder already exists and is not empty. Use --overwrite to replace it."
        );
        fs::remove_dir_all(output_dir)?;
        overwrite = true;
    }
    fs::create_dir_all(output_dir)?;

    Ok(overwrite)
}

/// The reporting unit of quantities measured in `unit`, and the factor converting them into it
fn convert_unit(model: &Model, unit: &str) -> (String, f64) {
    model
        .parameters
        .unit_conversion
        .get(unit)
        .map_or_else(|| (unit.to_string(), 1.0), |conv| (conv.new_unit.clone(), conv.factor))
}

/// The base unit of a fuel
fn base_unit<'a>(model: &'a Model, fuel: &FuelID) -> &'a str {
    model.fuels.get(fuel).map_or("", |fuel| fuel.unit.as_str())
}

/// The reporting unit of a fuel and the factor converting its quantities into it
fn fuel_unit(model: &Model, fuel: &FuelID) -> (String, f64) {
    convert_unit(model, base_unit(model, fuel))
}

/// A row of the output CSV file
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct OutputRow {
    /// What the value describes
    pub category: String,
    /// Technology (or other stream) the value refers to
    pub tech: String,
    /// Fuel the value refers to
    pub fuel: String,
    /// Settlement fuel the value refers to
    pub fuel1: String,
    /// Node the value refers to
    pub node: String,
    /// Year the value refers to
    pub year: Option<u32>,
    /// Unit of the value
    pub unit: String,
    /// The value
    pub value: f64,
}

/// The index columns of an [`OutputRow`]
#[derive(Default)]
struct Keys {
    tech: String,
    fuel: String,
    fuel1: String,
    node: String,
    year: Option<u32>,
}

impl Keys {
    fn tech(mut self, tech: &TechID) -> Self {
        self.tech = tech.to_string();
        self
    }

    fn label(mut self, label: impl Display) -> Self {
        self.tech = label.to_string();
        self
    }

    fn fuel(mut self, fuel: impl Display) -> Self {
        self.fuel = fuel.to_string();
        self
    }

    fn fuel1(mut self, fuel1: &FuelID) -> Self {
        self.fuel1 = fuel1.to_string();
        self
    }

    fn node(mut self, node: &NodeID) -> Self {
        self.node = node.to_string();
        self
    }

    fn year(mut self, year: u32) -> Self {
        self.year = Some(year);
        self
    }
}

#[derive(Default)]
struct OutputRows(Vec<OutputRow>);

impl OutputRows {
    fn push(&mut self, category: &str, keys: Keys, unit: &str, value: f64) {
        self.0.push(OutputRow {
            category: category.to_string(),
            tech: keys.tech,
            fuel: keys.fuel,
            fuel1: keys.fuel1,
            node: keys.node,
            year: keys.year,
            unit: unit.to_string(),
            value,
        });
    }

    /// Add a row unless the value is zero
    fn push_nonzero(&mut self, category: &str, keys: Keys, unit: &str, value: f64) {
        if value != 0.0 {
            self.push(category, keys, unit, value);
        }
    }
}

/// Sum of the values of a cost stream
fn total<K>(values: &IndexMap<K, f64>) -> f64 {
    values.values().sum()
}

/// Collect the rows of the output CSV file
pub fn output_rows(model: &Model, report: &Report) -> Result<Vec<OutputRow>> {
    let mut rows = OutputRows::default();
    add_price_rows(model, report, &mut rows);
    add_balance_rows(model, report, &mut rows);
    add_dimension_rows(model, report, &mut rows);
    add_cost_rows(model, report, &mut rows);
    add_annual_rows(model, report, &mut rows);
    add_indicator_rows(model, report, &mut rows)?;
    add_lcoe_rows(model, report, &mut rows)?;

    Ok(rows.0)
}

fn add_price_rows(model: &Model, report: &Report, rows: &mut OutputRows) {
    let Some(first) = model.reference_fuels().next() else {
        return;
    };
    let (unit, conv) = fuel_unit(model, first);
    let refs = model.reference_fuels().join(" + ");
    let prices = &report.prices;
    let price_unit = format!("EUR/{unit}");

    for (category, value) in [
        ("Price (ref: production)", prices.ref_prod_price),
        ("Price (ref: demand)", prices.ref_demand_price),
        ("Price (ref: export)", prices.ref_export_price),
        ("Price (ref: output)", prices.ref_out_price),
    ] {
        rows.push(category, Keys::default().fuel(&refs), &price_unit, value / conv);
    }

    for (category, value) in [
        ("Total_disc Production", prices.ref_prod_disc),
        ("Total_disc Demand", prices.ref_demand_disc),
        ("Total_disc Export", prices.ref_export_disc),
        ("Total_disc Output", prices.ref_out_disc),
    ] {
        rows.push(category, Keys::default().fuel(&refs), &unit, value * conv);
    }
}

fn add_balance_rows(model: &Model, report: &Report, rows: &mut OutputRows) {
    for ((fuel, year), &value) in &report.annual.demand {
        let reference = model.fuels.get(fuel).is_some_and(|fuel| fuel.reference);
        if value != 0.0 || reference {
            let (unit, conv) = fuel_unit(model, fuel);
            rows.push(
                "F_demand",
                Keys::default().fuel(fuel).year(*year),
                &format!("{unit}/a"),
                value * conv,
            );
        }
    }

    rows.push(
        "Objective function value",
        Keys::default(),
        "EUR",
        report.results.discounted.total_excluding_incentive(),
    );

    let kpis = &report.kpis;
    for (fuel, &value) in &kpis.slack_pos {
        rows.push("Slack pos balance", Keys::default().fuel(fuel), base_unit(model, fuel), value);
    }
    for (fuel, &value) in &kpis.slack_neg {
        rows.push("Slack neg balance", Keys::default().fuel(fuel), base_unit(model, fuel), value);
    }
    for (fuel, &value) in &kpis.energy_balance {
        rows.push(
            "Energy balance [F1]",
            Keys::default().fuel1(fuel),
            base_unit(model, fuel),
            value,
        );
    }
}

fn add_dimension_rows(model: &Model, report: &Report, rows: &mut OutputRows) {
    let results = &report.results;
    for node in &model.nodes {
        for tech in model.techs.values().filter(|tech| !tech.is_external()) {
            for &year in &model.time.years {
                let keys = || Keys::default().node(node).tech(&tech.id).year(year);
                let unit = tech.unit.as_str();
                rows.push("Inst Capacity", keys(), unit, results.inst_cap(node, &tech.id, year));
                rows.push("Capacity add", keys(), unit, results.cap_add(node, &tech.id, year));
                rows.push("Capacity sub", keys(), unit, results.cap_sub(node, &tech.id, year));

                if tech.is_storage() {
                    let unit = tech.storage_unit.as_str();
                    rows.push(
                        "Inst Storage Capacity",
                        keys(),
                        unit,
                        results.inst_storage_vol(node, &tech.id, year),
                    );
                    rows.push(
                        "Storage Capacity add",
                        keys(),
                        unit,
                        results.storage_vol_add(node, &tech.id, year),
                    );
                    rows.push(
                        "Storage Capacity sub",
                        keys(),
                        unit,
                        results.storage_vol_sub(node, &tech.id, year),
                    );
                }
            }
        }
    }
}

fn add_cost_rows(model: &Model, report: &Report, rows: &mut OutputRows) {
    let disc = &report.results.discounted;

    for (category, value) in [
        ("Total_disc", disc.total_excluding_incentive()),
        ("CAPEX_total_disc", total(&disc.capex)),
        ("CAPEX_system_disc", disc.capex_system),
        ("OPEX_total_disc", total(&disc.opex)),
        ("OPEX_system_total_disc", disc.opex_system),
        ("OPEX_fuel_total_disc", total(&disc.opex_fuel)),
        ("OPEX_timeseries_disc", total(&disc.opex_timeseries)),
        ("OPEX_auxmedium_total_disc", total(&disc.opex_auxmedium)),
        ("OPEX_network_capacity_total_disc", total(&disc.opex_network)),
        ("TAXES_disc", disc.opex_taxes),
        ("MARGIN_disc", disc.project_margin),
        ("REVENUE_total_disc", total(&disc.revenue)),
        ("REVENUE_timeseries_total_disc", total(&disc.revenue_timeseries)),
        ("SUBSIDY_disc", disc.subsidy_capex),
        ("SUBSIDY_share_disc", disc.capex_subsidy),
    ] {
        rows.push(category, Keys::default(), "EUR", value);
    }

    // Costs per unit of discounted production of the reference fuels
    let ref_prod_disc = report.prices.ref_prod_disc;
    if let Some(first) = model.reference_fuels().next()
        && ref_prod_disc != 0.0
    {
        let (unit, conv) = fuel_unit(model, first);
        let unit = format!("EUR/{unit}");
        let mut partial = |category: &str, label: String, value: f64| {
            rows.push_nonzero(
                category,
                Keys::default().label(label),
                &unit,
                value / ref_prod_disc / conv,
            );
        };

        for (tech, &value) in &disc.capex {
            partial("Partial_CAPEX", tech.to_string(), value);
        }
        for (tech, &value) in &disc.opex {
            partial("Partial_OPEX", tech.to_string(), value);
        }
        for (fuel, &value) in &disc.opex_fuel {
            partial("Partial_OPEX_fuel", fuel.to_string(), value);
        }
        for (fuel, &value) in &disc.opex_timeseries {
            partial("Partial_OPEX_timeseries", fuel.to_string(), value);
        }
        for (medium, &value) in &disc.opex_auxmedium {
            partial("Partial_OPEX_auxmedium", medium.to_string(), value);
        }
        for (fuel, &value) in &disc.opex_network {
            partial("Partial_OPEX_network_capacity", fuel.to_string(), value);
        }
        for (fuel, &value) in &disc.revenue {
            partial("Partial_REVENUE", fuel.to_string(), value);
        }
        for (fuel, &value) in &disc.revenue_timeseries {
            partial("Partial_REVENUE_timeseries", fuel.to_string(), value);
        }
        partial("Partial_CAPEX_system", String::new(), disc.capex_system);
        partial("Partial_OPEX_system", String::new(), disc.opex_system);
        partial("Partial_SUBSIDY", String::new(), disc.subsidy_capex);
        partial("Partial_SUBSIDY_share", String::new(), disc.capex_subsidy);
        partial("Partial_MARGIN", String::new(), disc.project_margin);
        partial("Partial_TAXES", String::new(), disc.opex_taxes);
    }

    let costs = &report.results.costs;
    for ((node, tech, year), &value) in &costs.capex {
        rows.push_nonzero("CAPEX", Keys::default().node(node).tech(tech).year(*year), "EUR", value);
    }
    for ((tech, year), &value) in &costs.external_capex {
        rows.push_nonzero("CAPEX", Keys::default().tech(tech).year(*year), "EUR", value);
    }
    for ((node, tech, year), &value) in &costs.opex {
        rows.push_nonzero("OPEX", Keys::default().node(node).tech(tech).year(*year), "EUR/a", value);
    }
    for ((tech, year), &value) in &costs.external_opex {
        rows.push_nonzero("OPEX", Keys::default().tech(tech).year(*year), "EUR/a", value);
    }
    rows.push("SUBSIDY", Keys::default(), "EUR", model.parameters.subsidy_capex);
    for ((node, year), &value) in &costs.capex_subsidy {
        rows.push("SUBSIDY_share", Keys::default().node(node).year(*year), "EUR", value);
    }
    for ((node, year), &value) in &costs.capex_system {
        rows.push("CAPEX system", Keys::default().node(node).year(*year), "EUR", value);
    }
    for ((node, year), &value) in &costs.opex_system {
        rows.push("OPEX system", Keys::default().node(node).year(*year), "EUR/a", value);
    }
    for ((fuel, year), &value) in &costs.opex_timeseries {
        rows.push_nonzero("OPEX_timeseries", Keys::default().fuel1(fuel).year(*year), "EUR/a", value);
    }
    for ((node, fuel, year), &value) in &costs.opex_fuel {
        rows.push_nonzero(
            "OPEX fuel",
            Keys::default().node(node).fuel1(fuel).year(*year),
            "EUR/a",
            value,
        );
    }
    for ((node, fuel, year), &value) in &costs.opex_network {
        rows.push_nonzero(
            "OPEX network capacity",
            Keys::default().node(node).fuel(fuel).year(*year),
            "EUR/a",
            value,
        );
    }
    for (medium, node, year) in iproduct!(model.aux_media.keys(), &model.nodes, &model.time.years) {
        let value = costs
            .opex_auxmedium
            .iter()
            .filter(|((n, _, m, y), _)| n == node && m == medium && y == year)
            .map(|(_, value)| value)
            .sum();
        rows.push(
            "OPEX aux medium",
            Keys::default().node(node).fuel(medium).year(*year),
            "EUR/a",
            value,
        );
    }
    for (year, &value) in &costs.opex_taxes {
        rows.push("OPEX taxes", Keys::default().year(*year), "EUR/a", value);
    }
    for ((fuel, year), &value) in &costs.revenue {
        rows.push_nonzero("REVENUE", Keys::default().fuel(fuel).year(*year), "EUR/a", value);
    }
    for ((fuel, year), &value) in &costs.revenue_timeseries {
        rows.push_nonzero(
            "REVENUE_timeseries",
            Keys::default().fuel(fuel).year(*year),
            "EUR/a",
            value,
        );
    }
}

fn add_annual_rows(model: &Model, report: &Report, rows: &mut OutputRows) {
    let annual = &report.annual;

    for ((node, tech, f1, year), &value) in &annual.production {
        let (unit, conv) = fuel_unit(model, f1);
        rows.push(
            "Annual PRODUCTION",
            Keys::default().node(node).tech(tech).fuel1(f1).year(*year),
            &unit,
            value * conv,
        );
    }
    for ((node, tech, fuel, f1, year), &value) in &annual.consumption {
        let (unit, conv) = fuel_unit(model, f1);
        rows.push(
            "Annual CONSUMPTION",
            Keys::default()
                .node(node)
                .tech(tech)
                .fuel(fuel)
                .fuel1(f1)
                .year(*year),
            &unit,
            value * conv,
        );
    }
    for ((node, medium, year), &value) in &annual.aux_medium_flow {
        rows.push(
            "Annual VOLUME",
            Keys::default().node(node).fuel(medium).year(*year),
            "Nm3",
            value,
        );
    }

    for (category, values) in [
        ("Annual IMPORT", &annual.import),
        ("Annual IMPORT_timeseries", &annual.import_timeseries),
        ("Annual IMPORT_fix_quantity", &annual.fix_quant_import),
    ] {
        for ((f1, year), &value) in values {
            let (unit, conv) = fuel_unit(model, f1);
            rows.push_nonzero(category, Keys::default().fuel1(f1).year(*year), &unit, value * conv);
        }
    }

    for (category, values) in [
        ("Annual EXPORT", &annual.export),
        ("Annual EXPORT_timeseries", &annual.export_timeseries),
        ("Annual DELIVERY", &annual.delivery),
        ("Annual CONS_system", &annual.supply_cons_system),
    ] {
        for ((fuel, f1, year), &value) in values {
            let (unit, conv) = fuel_unit(model, f1);
            rows.push_nonzero(
                category,
                Keys::default().fuel(fuel).fuel1(f1).year(*year),
                &unit,
                value * conv,
            );
        }
    }
}

fn add_indicator_rows(model: &Model, report: &Report, rows: &mut OutputRows) -> Result<()> {
    let kpis = &report.kpis;
    let results = &report.results;

    for ((node, tech, year), &value) in &kpis.flh {
        rows.push("FLH", Keys::default().node(node).tech(tech).year(*year), "h", value);
    }
    for ((node, tech, year), &value) in &kpis.flh_possible {
        if !model.techs[tech].is_storage() {
            rows.push(
                "FLH possible",
                Keys::default().node(node).tech(tech).year(*year),
                "h",
                value,
            );
        }
    }
    for ((node, tech, fuel, year), &value) in &kpis.storage_ratio {
        rows.push(
            "STORAGE ratio",
            Keys::default().node(node).tech(tech).fuel(fuel).year(*year),
            "d",
            value,
        );
    }

    let peak_unit = model.electricity().map_or("", |fuel| base_unit(model, fuel));
    for (node, &year) in iproduct!(&model.nodes, &model.time.years) {
        rows.push(
            "peak el demand",
            Keys::default().node(node).year(year),
            peak_unit,
            results.peak_el_demand(node, year),
        );
    }

    for (node, fuel, &year) in iproduct!(&model.nodes, model.fuels.keys(), &model.time.years) {
        if model.year_trade(node, fuel, year).network_capacity_charge == 0.0 {
            continue;
        }
        rows.push(
            "Network capacity required",
            Keys::default().node(node).fuel(fuel).year(year),
            &format!("{}/h", base_unit(model, fuel)),
            results.f_network_capacity(node, fuel, year),
        );
    }

    for ((node, year), &value) in &kpis.land_use {
        rows.push("Land use", Keys::default().node(node).year(*year), "m2", value);
    }

    for ((node, tech, year), &value) in &kpis.min_storage_level {
        let (unit, conv) = convert_unit(model, &model.techs[tech].storage_unit);
        rows.push(
            "Min storage level",
            Keys::default().node(node).tech(tech).year(*year),
            &unit,
            value * conv,
        );
    }

    if let Some(share) = &report.energy_share {
        add_consumption_share_rows(model, share, rows);
    }

    Ok(())
}

/// Where the electricity consumed by each technology came from
fn add_consumption_share_rows(model: &Model, share: &EnergyShare, rows: &mut OutputRows) {
    let (unit, conv) = fuel_unit(model, &share.fuel);
    for (column, consumer) in share.consumers.iter().enumerate() {
        if !model.techs.contains_key(consumer.as_str()) {
            continue;
        }
        let consumed: f64 = share.values.iter().map(|row| row[column]).sum();
        if consumed == 0.0 {
            continue;
        }

        for (producer, values) in share.producers.iter().zip(&share.values) {
            rows.push(
                "Consumption share",
                Keys::default()
                    .label(consumer)
                    .fuel(&share.fuel)
                    .fuel1(&FuelID::new(producer)),
                &unit,
                values[column] * conv,
            );
        }
    }
}

fn add_lcoe_rows(model: &Model, report: &Report, rows: &mut OutputRows) -> Result<()> {
    let lcoe = &report.lcoe;
    let price_unit = |fuel: &FuelID| {
        let (unit, conv) = fuel_unit(model, fuel);
        (format!("EUR/{unit}"), conv)
    };

    for node in &model.nodes {
        for tech in model.techs.values().filter(|tech| !tech.is_external()) {
            let fuels: Vec<&FuelID> = if tech.is_storage() {
                produced_fuels(model, tech)?
            } else {
                tech.outputs.iter().collect()
            };
            for fuel in fuels {
                let (unit, conv) = price_unit(fuel);
                for &year in &model.time.years {
                    let keys = || Keys::default().node(node).tech(&tech.id).fuel(fuel).year(year);
                    let key = (node.clone(), tech.id.clone(), fuel.clone(), year);
                    let ideal = lcoe.ideal.get(&key).copied().unwrap_or(0.0);
                    rows.push("LCOEnergy ideal", keys(), &unit, ideal / conv);
                    let actual = lcoe.iterate.tech(node, &tech.id, fuel, year);
                    rows.push("LCOEnergy", keys(), &unit, actual / conv);
                }
            }

            for fuel in consumed_fuels(model, tech) {
                let (unit, conv) = price_unit(fuel);
                for &year in &model.time.years {
                    let key = (node.clone(), tech.id.clone(), fuel.clone(), year);
                    let value = lcoe.consumed.get(&key).copied().unwrap_or(0.0);
                    rows.push(
                        "LCOEnergy consumed",
                        Keys::default().node(node).tech(&tech.id).fuel(fuel).year(year),
                        &unit,
                        value / conv,
                    );
                }
            }
        }
    }

    for (category, values) in [
        ("LCOEnergy demand", &lcoe.demand),
        ("LCOEnergy exported", &lcoe.export),
    ] {
        for ((node, fuel, year), &value) in values {
            let (unit, conv) = price_unit(fuel);
            rows.push(
                category,
                Keys::default().node(node).fuel(fuel).year(*year),
                &unit,
                value / conv,
            );
        }
    }

    Ok(())
}

/// Write annual values, costs and indicators to the output CSV file
pub fn write_output(output_dir: &Path, model: &Model, report: &Report) -> Result<()> {
    let mut writer = csv::Writer::from_path(output_dir.join(OUTPUT_FILE_NAME))?;
    for row in output_rows(model, report)? {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(())
}

/// Write load duration curves to file, one column per curve
pub fn write_load_duration_curves(output_dir: &Path, curves: &[LoadDurationCurve]) -> Result<()> {
    let mut writer = csv::Writer::from_path(output_dir.join(LOAD_DURATION_CURVE_FILE_NAME))?;
    writer.write_record(
        std::iter::once("Index").chain(curves.iter().map(|curve| curve.label.as_str())),
    )?;

    let length = curves.iter().map(|curve| curve.values.len()).max().unwrap_or(0);
    for i in 0..length {
        let values = curves.iter().map(|curve| {
            curve
                .values
                .get(i)
                .map_or_else(String::new, ToString::to_string)
        });
        writer.write_record(std::iter::once((i + 1).to_string()).chain(values))?;
    }
    writer.flush()?;

    Ok(())
}

/// Write the energy-share matrix to file, in the reporting unit of its fuel
pub fn write_energy_share(output_dir: &Path, model: &Model, share: &EnergyShare) -> Result<()> {
    let (unit, conv) = fuel_unit(model, &share.fuel);
    let mut file = File::create(output_dir.join(ENERGY_SHARE_FILE_NAME))?;
    writeln!(
        file,
        "# {} share over project time [{unit}] (rows: producer; cols: consumer)",
        share.fuel
    )?;

    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(
        std::iter::once("producer").chain(share.consumers.iter().map(String::as_str)),
    )?;
    for (producer, values) in share.producers.iter().zip(&share.values) {
        let values = values.iter().map(|value| (value * conv).to_string());
        writer.write_record(std::iter::once(producer.clone()).chain(values))?;
    }
    writer.flush()?;

    Ok(())
}

/// The time stamp of an hour of a step, with `hour_offset` hours into the step
fn timestamp(time: &TimeIndex, step: &TimeStep, hour_offset: u32) -> String {
    let datetime = i32::try_from(step.year)
        .ok()
        .and_then(|year| NaiveDate::from_ymd_opt(FIRST_CALENDAR_YEAR + year - 1, 1, 1))
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|start| {
            #[allow(clippy::cast_possible_truncation)]
            let minutes = (f64::from(step.sub_hour) * time.delta_t() * 60.0).round() as i64;
            start
                + Duration::days(i64::from(step.day) - 1)
                + Duration::hours(i64::from(step.hour + hour_offset) - 1)
                + Duration::minutes(minutes)
        });

    match datetime {
        Some(datetime) => datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => step.to_string(),
    }
}

/// The columns of the time series file
struct TimeSeriesColumns<'a> {
    steps: &'a [TimeStep],
    headers: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl TimeSeriesColumns<'_> {
    /// Add a column, unless all of its values are zero and `keep_zero` is false
    fn push<F: FnMut(&TimeStep) -> f64>(&mut self, header: String, keep_zero: bool, value: F) {
        let values: Vec<f64> = self.steps.iter().map(value).collect();
        if keep_zero || values.iter().any(|value| *value != 0.0) {
            self.headers.push(header);
            self.values.push(values);
        }
    }
}

/// Write flows, exogenous series and marginal costs at hourly resolution.
///
/// Sampled hours standing for several real hours are repeated. Columns of zeros are left out.
pub fn write_timeseries(output_dir: &Path, model: &Model, report: &Report) -> Result<()> {
    let time = &model.time;
    let results = &report.results;

    let hours: Vec<(TimeStep, u32)> = iproduct!(
        &time.years,
        &time.days,
        &time.hours,
        0..time.delta_h,
        &time.sub_hours
    )
    .map(|(&year, &day, &hour, offset, &sub_hour)| {
        (TimeStep::new(year, day, hour, sub_hour), offset)
    })
    .collect();
    let steps: Vec<TimeStep> = hours.iter().map(|(step, _)| *step).collect();
    let mut columns = TimeSeriesColumns {
        steps: &steps,
        headers: Vec::new(),
        values: Vec::new(),
    };

    for (tech, node) in iproduct!(model.conversion_techs(), &model.nodes) {
        for fuel in &tech.outputs {
            columns.push(format!("f_prod {} {node} {fuel}", tech.id), false, |step| {
                results.f_prod(node, &tech.id, fuel, step)
            });
        }
        for fuel in consumed_fuels(model, tech) {
            if !tech.has_input(fuel) && tech.aux_electricity_demand <= 0.0 {
                continue;
            }
            let settled: Vec<&FuelID> = model.balanced_substitutes(fuel).collect();
            columns.push(format!("f_cons_total {} {node} {fuel}", tech.id), false, |step| {
                settled
                    .iter()
                    .map(|f1| results.f_cons(node, &tech.id, fuel, f1, step))
                    .sum()
            });
            for f1 in &settled {
                columns.push(format!("f_cons {} {node} {fuel} {f1}", tech.id), false, |step| {
                    results.f_cons(node, &tech.id, fuel, f1, step)
                });
            }
        }
    }

    type NodeFlowFn = fn(&Results, &NodeID, &FuelID, &TimeStep) -> f64;
    let node_flows: [(&str, NodeFlowFn); 5] = [
        ("f_import", Results::f_import),
        ("f_import_timeseries", Results::f_import_timeseries),
        ("f_fix_quant_import", Results::f_fix_quant_import),
        ("f_slack_pos", Results::f_slack_pos),
        ("f_slack_neg", Results::f_slack_neg),
    ];
    for (name, flow) in node_flows {
        for (node, f1) in iproduct!(&model.nodes, model.balanced_fuels()) {
            columns.push(format!("{name} {node} {f1}"), false, |step| {
                flow(results, node, f1, step)
            });
        }
    }

    type SettledFlowFn = fn(&Results, &NodeID, &FuelID, &FuelID, &TimeStep) -> f64;
    let settled_flows: [(&str, SettledFlowFn); 3] = [
        ("f_export", Results::f_export),
        ("f_export_timeseries", Results::f_export_timeseries),
        ("f_delivery", Results::f_delivery),
    ];
    for (name, flow) in settled_flows {
        for (node, fuel) in iproduct!(&model.nodes, model.fuels.keys()) {
            let settled: Vec<&FuelID> = model.balanced_substitutes(fuel).collect();
            columns.push(format!("{name}_total {node} {fuel}"), false, |step| {
                settled
                    .iter()
                    .map(|f1| flow(results, node, fuel, f1, step))
                    .sum()
            });
            for f1 in &settled {
                columns.push(format!("{name} {node} {fuel} {f1}"), false, |step| {
                    flow(results, node, fuel, f1, step)
                });
            }
        }
    }

    for (tech, node) in iproduct!(model.storage_techs(), &model.nodes) {
        let fuel = tech.unique_output()?;
        let settled: Vec<&FuelID> = model.balanced_substitutes(fuel).collect();
        let id = &tech.id;

        columns.push(format!("storage_level_total {id} {node} {fuel}"), false, |step| {
            settled
                .iter()
                .map(|f1| results.storage_level(node, id, f1, step))
                .sum()
        });
        for f1 in &settled {
            columns.push(format!("storage_level {id} {node} {fuel} {f1}"), false, |step| {
                results.storage_level(node, id, f1, step)
            });
        }
        columns.push(format!("f_prod_total {id} {node} {fuel}"), false, |step| {
            settled
                .iter()
                .map(|f1| results.f_prod(node, id, f1, step))
                .sum()
        });
        for f1 in &settled {
            columns.push(format!("f_prod {id} {node} {fuel} {f1}"), false, |step| {
                results.f_prod(node, id, f1, step)
            });
        }
        columns.push(format!("f_cons_total {id} {node} {fuel}"), false, |step| {
            settled
                .iter()
                .map(|f1| results.f_cons(node, id, fuel, f1, step))
                .sum()
        });
        for f1 in &settled {
            columns.push(format!("f_cons {id} {node} {fuel} {f1}"), false, |step| {
                results.f_cons(node, id, fuel, f1, step)
            });
        }
        columns.push(format!("Rolling_energy_reserve {id} {node} {fuel}"), false, |step| {
            rolling_reserve(model, node, id, fuel, step)
        });
    }

    for (tech, node) in iproduct!(model.techs.values(), &model.nodes) {
        let can_build = time
            .years
            .iter()
            .any(|&year| model.limits(node, &tech.id, year).max_inst_cap > 0.0);
        if can_build && !tech.is_external() {
            columns.push(format!("Availability {} {node}", tech.id), true, |step| {
                model.availability(node, &tech.id, step)
            });
        }
    }
    for (fuel, node) in iproduct!(model.fuels.keys(), &model.nodes) {
        columns.push(format!("F_demand {fuel} {node}"), false, |step| {
            model.demand(node, fuel, step)
        });
    }
    for fuel in model.fuels.keys() {
        columns.push(format!("F_export_timeseries_price {fuel}"), false, |step| {
            model.export_price(fuel, step)
        });
        columns.push(format!("F_import_timeseries_price {fuel}"), false, |step| {
            model.import_price(fuel, step)
        });
    }
    for (node, f1) in iproduct!(&model.nodes, model.substitution.settlement_fuels()) {
        columns.push(format!("lcoEnergy {node} {f1}"), false, |step| {
            report.lcoe.iterate.node_cost(node, f1, step)
        });
    }

    let mut writer = csv::Writer::from_path(output_dir.join(TIMESERIES_FILE_NAME))?;
    writer.write_record(
        std::iter::once("timestamp").chain(columns.headers.iter().map(String::as_str)),
    )?;
    for (i, (step, offset)) in hours.iter().enumerate() {
        let values = columns.values.iter().map(|column| column[i].to_string());
        writer.write_record(std::iter::once(timestamp(time, step, *offset)).chain(values))?;
    }
    writer.flush()?;

    Ok(())
}

/// A row of the runtime CSV file
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct RuntimeRow {
    /// Phase of the run
    pub phase: String,
    /// Duration in seconds
    pub seconds: f64,
}

/// Write the duration of each phase of a run
pub fn write_runtime(output_dir: &Path, phases: &[(String, f64)]) -> Result<()> {
    let mut writer = csv::Writer::from_path(output_dir.join(RUNTIME_FILE_NAME))?;
    for (phase, seconds) in phases {
        writer.serialize(RuntimeRow {
            phase: phase.clone(),
            seconds: *seconds,
        })?;
    }
    writer.flush()?;

    Ok(())
}

/// A row of the LP summary file
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct LpSummaryRow {
    /// Either `variable` or `constraint`
    pub kind: String,
    /// Name of the family
    pub family: String,
    /// Number of members
    pub count: usize,
}

/// Write the number of variables and constraints in each family of a built model
pub fn write_lp_summary(output_dir: &Path, lp: &LinearProgram) -> Result<()> {
    let (variables, constraints) = lp.family_sizes();
    let mut writer = csv::Writer::from_path(output_dir.join(LP_SUMMARY_FILE_NAME))?;
    for (kind, sizes) in [("variable", variables), ("constraint", constraints)] {
        for (family, count) in sizes {
            writer.serialize(LpSummaryRow {
                kind: kind.to_string(),
                family: family.to_string(),
                count,
            })?;
        }
    }
    writer.flush()?;

    Ok(())
}

/// Write every report file.
///
/// A failure to write one file is logged and does not stop the others from being written.
/// Returns whether all files were written.
pub fn write_report(output_dir: &Path, model: &Model, report: &Report) -> bool {
    info!("Writing results to {}", output_dir.display());
    let mut outcomes = vec![
        (OUTPUT_FILE_NAME, write_output(output_dir, model, report)),
        (
            LOAD_DURATION_CURVE_FILE_NAME,
            write_load_duration_curves(output_dir, &report.load_duration_curves),
        ),
        (TIMESERIES_FILE_NAME, write_timeseries(output_dir, model, report)),
        (
            metadata::METADATA_FILE_NAME,
            metadata::write_metadata(output_dir, &model.model_dir),
        ),
    ];
    if let Some(share) = &report.energy_share {
        outcomes.push((
            ENERGY_SHARE_FILE_NAME,
            write_energy_share(output_dir, model, share),
        ));
    }

    let mut success = true;
    for (file_name, outcome) in outcomes {
        if let Err(err) = outcome {
            error!("Failed to write {file_name}: {err:?}");
            success = false;
        }
    }

    success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{model, node_id, pv_id};
    use crate::scenario::evaluate;
    use crate::optimisation::build_model;
    use crate::solver::{HighsSolver, Solver};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;
    use std::fs::read_to_string;
    use tempfile::tempdir;

    fn solved_report(model: &Model) -> Report {
        let built = build_model(model).unwrap();
        let solution = HighsSolver.solve(&built.lp).unwrap();
        let results = Results::new(model, &built, &solution);
        evaluate(model, results).unwrap()
    }

    #[test]
    fn test_create_output_directory_new_directory() {
        let temp_dir = tempdir().unwrap();
        let output_dir = temp_dir.path().join("new_output");

        // Create a new directory should succeed and return false (no overwrite)
        assert!(!create_output_directory(&output_dir, false).unwrap());
        assert!(output_dir.is_dir());
    }

    #[test]
    fn test_create_output_directory_non_empty() {
        let temp_dir = tempdir().unwrap();
        let output_dir = temp_dir.path().join("output");
        fs::create_dir(&output_dir).unwrap();
        fs::write(output_dir.join("old.csv"), "stale").unwrap();

        assert!(create_output_directory(&output_dir, false).is_err());
        assert!(create_output_directory(&output_dir, true).unwrap());
        assert!(!output_dir.join("old.csv").exists());
    }

    #[test]
    fn test_timestamp() {
        let time = TimeIndex::new(&crate::fixture::calendar_params()).unwrap();
        let step = TimeStep::new(1, 32, 3, 0);
        assert_eq!(timestamp(&time, &step, 1), "2019-02-01 03:00:00");
    }

    #[rstest]
    fn test_output_rows(model: Model) {
        let report = solved_report(&model);
        let rows = output_rows(&model, &report).unwrap();
        let find = |category: &str| rows.iter().find(|row| row.category == category).unwrap();

        // Demand in kWh is reported in MWh
        let demand = find("F_demand");
        assert_eq!(demand.fuel, "Electricity");
        assert_eq!(demand.unit, "MWh/a");
        let annual = report.annual.demand[&(FuelID::new("Electricity"), 1)];
        assert_approx_eq!(f64, demand.value, annual / 1000.0);

        let capacity = find("Inst Capacity");
        assert_eq!(capacity.tech, pv_id().to_string());
        assert_eq!(capacity.node, node_id().to_string());
        assert_eq!(capacity.year, Some(1));

        assert!(rows.iter().any(|row| row.category == "LCOEnergy demand"));
    }

    #[rstest]
    fn test_write_report(model: Model) {
        let report = solved_report(&model);
        let dir = tempdir().unwrap();
        assert!(write_report(dir.path(), &model, &report));

        let records: Vec<OutputRow> = csv::Reader::from_path(dir.path().join(OUTPUT_FILE_NAME))
            .unwrap()
            .into_deserialize()
            .try_collect()
            .unwrap();
        assert_eq!(records, output_rows(&model, &report).unwrap());

        let timeseries = read_to_string(dir.path().join(TIMESERIES_FILE_NAME)).unwrap();
        let mut lines = timeseries.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("timestamp,"));
        assert!(header.contains("F_demand Electricity N1"));
        assert_eq!(lines.count(), 1);

        let share = read_to_string(dir.path().join(ENERGY_SHARE_FILE_NAME)).unwrap();
        assert!(share.starts_with("# Electricity share over project time [MWh]"));
        assert!(dir.path().join(LOAD_DURATION_CURVE_FILE_NAME).is_file());
        assert!(dir.path().join(metadata::METADATA_FILE_NAME).is_file());
    }

    #[test]
    fn test_write_load_duration_curves() {
        let dir = tempdir().unwrap();
        let curves = [
            LoadDurationCurve {
                label: "A_N1_Y1".into(),
                values: vec![2.0, 1.0],
            },
            LoadDurationCurve {
                label: "B_N1_Y1".into(),
                values: vec![3.0, 0.0],
            },
        ];
        write_load_duration_curves(dir.path(), &curves).unwrap();

        let contents = read_to_string(dir.path().join(LOAD_DURATION_CURVE_FILE_NAME)).unwrap();
        assert_eq!(contents, "Index,A_N1_Y1,B_N1_Y1\n1,2,3\n2,1,0\n");
    }

    #[test]
    fn test_write_runtime() {
        let dir = tempdir().unwrap();
        let phases = vec![("build".to_string(), 1.5), ("solve".to_string(), 2.0)];
        write_runtime(dir.path(), &phases).unwrap();

        let records: Vec<RuntimeRow> = csv::Reader::from_path(dir.path().join(RUNTIME_FILE_NAME))
            .unwrap()
            .into_deserialize()
            .try_collect()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].phase, "solve");
    }

    #[rstest]
    fn test_write_lp_summary(model: Model) {
        let built = build_model(&model).unwrap();
        let dir = tempdir().unwrap();
        write_lp_summary(dir.path(), &built.lp).unwrap();

        let records: Vec<LpSummaryRow> =
            csv::Reader::from_path(dir.path().join(LP_SUMMARY_FILE_NAME))
                .unwrap()
                .into_deserialize()
                .try_collect()
                .unwrap();
        let variables: usize = records
            .iter()
            .filter(|row| row.kind == "variable")
            .map(|row| row.count)
            .sum();
        assert_eq!(variables, built.lp.variables.len());
    }

    #[test]
    fn test_write_report_to_missing_dir_fails() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(write_runtime(&missing, &[]).is_err());
    }
}
