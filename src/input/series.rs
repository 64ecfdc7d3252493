//! Code for reading time series (demand, availability, profiles and spot prices).
//!
//! Each file is in long format: key columns followed by `year`, `day`, `hour`, an optional
//! `sub_hour` (default 0) and `value`.
use super::*;
use crate::fuel::FuelMap;
use crate::id::{FuelID, NodeID, TechID};
use crate::model::{TimeSeries, TimeSeriesData};
use crate::tech::TechMap;
use crate::time_index::TimeStep;
use indexmap::IndexSet;
use serde::Deserialize;

const DEMAND_FILE_NAME: &str = "demand.csv";
const AVAILABILITY_FILE_NAME: &str = "availability.csv";
const FIXED_PROFILES_FILE_NAME: &str = "fixed_demand_profiles.csv";
const VARIABLE_PROFILES_FILE_NAME: &str = "variable_demand_profiles.csv";
const IMPORT_PRICES_FILE_NAME: &str = "import_prices.csv";
const EXPORT_PRICES_FILE_NAME: &str = "export_prices.csv";
const NETWORK_FLOW_FILE_NAME: &str = "network_flow.csv";

#[derive(Debug, Deserialize)]
struct StepValue {
    year: u32,
    day: u32,
    hour: u32,
    #[serde(default)]
    sub_hour: u32,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct NodeFuelKey {
    node_id: String,
    fuel_id: String,
}

#[derive(Debug, Deserialize)]
struct NodeTechKey {
    node_id: String,
    tech_id: String,
}

#[derive(Debug, Deserialize)]
struct FuelKey {
    fuel_id: String,
}

/// Check that a step lies within the calendar's `_All` supersets
fn check_step(time: &TimeIndex, step: &TimeStep) -> Result<()> {
    ensure!(
        time.years_all.contains(&step.year)
            && time.days_all.contains(&step.day)
            && time.hours_all.contains(&step.hour)
            && time.sub_hours.contains(&step.sub_hour),
        "Time step {step} is not part of the calendar"
    );

    Ok(())
}

/// Read one long-format series into `series`, resolving each row's key with `resolve`
fn read_series<K, R, F>(
    file_path: &Path,
    time: &TimeIndex,
    series: &mut TimeSeries<R>,
    resolve: F,
) -> Result<()>
where
    K: DeserializeOwned,
    R: Eq + Hash + std::fmt::Debug,
    F: Fn(K) -> Result<R>,
{
    let fill = |series: &mut TimeSeries<R>| -> Result<()> {
        for (key, raw) in read_csv_keyed_optional::<K, StepValue>(file_path)? {
            let key = resolve(key)?;
            let step = TimeStep::new(raw.year, raw.day, raw.hour, raw.sub_hour);
            check_step(time, &step)?;
            ensure!(
                raw.value.is_finite() && raw.value >= 0.0,
                "Values must be finite and not negative (got {} at {step})",
                raw.value
            );
            ensure!(
                series.insert(key, step, raw.value).is_none(),
                "Duplicate entry for {step}"
            );
        }

        Ok(())
    };

    fill(series).with_context(|| input_err_msg(file_path))
}

/// Read every time series file, each of which is optional
pub fn read_time_series(
    model_dir: &Path,
    nodes: &IndexSet<NodeID>,
    techs: &TechMap,
    fuels: &FuelMap,
    time: &TimeIndex,
) -> Result<TimeSeriesData> {
    let node_fuel = |key: NodeFuelKey| -> Result<(NodeID, FuelID)> {
        Ok((
            get_id(nodes, "node", &key.node_id)?,
            get_id(fuels, "fuel", &key.fuel_id)?,
        ))
    };
    let node_tech = |key: NodeTechKey| -> Result<(NodeID, TechID)> {
        Ok((
            get_id(nodes, "node", &key.node_id)?,
            get_id(techs, "technology", &key.tech_id)?,
        ))
    };
    let fuel = |key: FuelKey| -> Result<FuelID> { get_id(fuels, "fuel", &key.fuel_id) };

    let mut data = TimeSeriesData::default();
    let path = |file_name: &str| model_dir.join(file_name);
    read_series(&path(DEMAND_FILE_NAME), time, &mut data.demand, node_fuel)?;
    read_series(
        &path(AVAILABILITY_FILE_NAME),
        time,
        &mut data.availability,
        node_tech,
    )?;
    read_series(
        &path(FIXED_PROFILES_FILE_NAME),
        time,
        &mut data.fixed_demand_profile,
        node_tech,
    )?;
    read_series(
        &path(VARIABLE_PROFILES_FILE_NAME),
        time,
        &mut data.variable_demand_profile,
        node_tech,
    )?;
    read_series(
        &path(IMPORT_PRICES_FILE_NAME),
        time,
        &mut data.import_price,
        fuel,
    )?;
    read_series(
        &path(EXPORT_PRICES_FILE_NAME),
        time,
        &mut data.export_price,
        fuel,
    )?;
    read_series(
        &path(NETWORK_FLOW_FILE_NAME),
        time,
        &mut data.network_flow,
        node_fuel,
    )?;

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{conversion_tech, fuel};
    use crate::model::CalendarParameters;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut file = File::create(dir.join(name)).unwrap();
        writeln!(file, "{contents}").unwrap();
    }

    fn read(dir: &Path) -> Result<TimeSeriesData> {
        let nodes = IndexSet::from([NodeID::new("N1")]);
        let techs: TechMap = [conversion_tech("PV", &["Sun"], &["Electricity"])]
            .into_iter()
            .map(|tech| (tech.id.clone(), tech))
            .collect();
        let fuels: FuelMap = ["Electricity", "Sun"]
            .into_iter()
            .map(|id| (FuelID::new(id), fuel(id, "kWh")))
            .collect();
        let time = TimeIndex::new(&CalendarParameters::default()).unwrap();
        read_time_series(dir, &nodes, &techs, &fuels, &time)
    }

    #[test]
    fn test_read_demand() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            DEMAND_FILE_NAME,
            "node_id,fuel_id,year,day,hour,value\nN1,Electricity,1,1,5,42",
        );
        let data = read(dir.path()).unwrap();
        let key = (NodeID::new("N1"), FuelID::new("Electricity"));
        assert_eq!(data.demand.get(&key, &TimeStep::new(1, 1, 5, 0)), 42.0);
        assert_eq!(data.demand.get(&key, &TimeStep::new(1, 1, 6, 0)), 0.0);
        assert!(data.demand.has_key(&key));
    }

    #[test]
    fn test_availability_defaults_to_one() {
        let dir = tempdir().unwrap();
        let data = read(dir.path()).unwrap();
        let key = (NodeID::new("N1"), TechID::new("PV"));
        assert_eq!(data.availability.get(&key, &TimeStep::new(1, 1, 1, 0)), 1.0);
    }

    #[test]
    fn test_read_series_step_outside_calendar() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            IMPORT_PRICES_FILE_NAME,
            "fuel_id,year,day,hour,value\nElectricity,1,1,25,0.1",
        );
        assert!(read(dir.path()).is_err());
    }

    #[test]
    fn test_read_series_duplicate() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            AVAILABILITY_FILE_NAME,
            "node_id,tech_id,year,day,hour,value\nN1,PV,1,1,1,0.5\nN1,PV,1,1,1,0.6",
        );
        assert!(read(dir.path()).is_err());
    }
}
