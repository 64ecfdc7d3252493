//! Common routines for handling input data.
use crate::fuel::FuelSubstitution;
use crate::id::{HasID, IDCollection, IDLike};
use crate::model::{Model, ModelParameters};
use crate::time_index::TimeIndex;
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use itertools::Itertools;
use log::{info, warn};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs;
use std::hash::Hash;
use std::path::Path;

mod fuel;
use fuel::{read_aux_media, read_fuel_costs, read_fuel_substitutes, read_fuels};
mod node;
use node::{read_node_data, read_nodes};
mod series;
use series::read_time_series;
mod tech;
use tech::{read_tech_costs, read_techs};

/// Read a series of type `T`s from a CSV file.
///
/// Returns an error if the file is missing, malformed or contains no rows.
///
/// # Arguments
///
/// * `file_path` - Path to the CSV file
pub fn read_csv<T: DeserializeOwned>(file_path: &Path) -> Result<Vec<T>> {
    let rows = read_csv_optional(file_path)?;
    ensure!(!rows.is_empty(), "{} cannot be empty", file_path.display());

    Ok(rows)
}

/// Read a series of type `T`s from a CSV file which may be absent.
///
/// A missing file yields no rows, in which case every value takes its default.
pub fn read_csv_optional<T: DeserializeOwned>(file_path: &Path) -> Result<Vec<T>> {
    if !file_path.exists() {
        log_missing(file_path);
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(file_path)
        .with_context(|| input_err_msg(file_path))?;
    reader
        .deserialize()
        .map(|row| row.with_context(|| input_err_msg(file_path)))
        .collect()
}

fn log_missing(file_path: &Path) {
    info!(
        "{} not found, using default values",
        file_path.file_name().unwrap_or_default().to_string_lossy()
    );
}

/// Read a CSV file which may be absent, deserialising each row into both a key and a value.
///
/// The key and value types pick out their own columns by header name, so several tables can share
/// one value type without restating its fields in a row type.
pub fn read_csv_keyed_optional<K, V>(file_path: &Path) -> Result<Vec<(K, V)>>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    if !file_path.exists() {
        log_missing(file_path);
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(file_path)
        .with_context(|| input_err_msg(file_path))?;
    let headers = reader
        .headers()
        .with_context(|| input_err_msg(file_path))?
        .clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| input_err_msg(file_path))?;
        let key: K = record
            .deserialize(Some(&headers))
            .with_context(|| input_err_msg(file_path))?;
        let value: V = record
            .deserialize(Some(&headers))
            .with_context(|| input_err_msg(file_path))?;
        rows.push((key, value));
    }

    Ok(rows)
}

/// Parse a TOML file at the specified path.
///
/// # Arguments
///
/// * `file_path` - Path to the TOML file
///
/// # Returns
///
/// * The deserialised TOML data or an error if the file could not be read or parsed.
pub fn read_toml<T: DeserializeOwned>(file_path: &Path) -> Result<T> {
    let toml_str = fs::read_to_string(file_path).with_context(|| input_err_msg(file_path))?;
    let toml_data = toml::from_str(&toml_str).with_context(|| input_err_msg(file_path))?;
    Ok(toml_data)
}

/// Format an error message to include the file path. To be used with `anyhow::Context`.
pub fn input_err_msg<P: AsRef<Path>>(file_path: P) -> String {
    format!("Error reading {}", file_path.as_ref().display())
}

/// Indicates whether the values are sorted in ascending order with no duplicates
pub fn is_sorted_and_unique<T, I>(iter: I) -> bool
where
    T: PartialOrd + Clone,
    I: IntoIterator<Item = T>,
{
    iter.into_iter().tuple_windows().all(|(a, b)| a < b)
}

/// Insert a value into a map, returning an error if the key is already present
pub fn try_insert<K, V>(map: &mut HashMap<K, V>, key: K, value: V) -> Result<()>
where
    K: Eq + Hash + std::fmt::Debug,
{
    let description = format!("{key:?}");
    ensure!(
        map.insert(key, value).is_none(),
        "Duplicate entry for {description}"
    );

    Ok(())
}

/// Collect items into a map keyed by their IDs, rejecting duplicate IDs
fn collect_id_map<ID, T>(items: Vec<T>) -> Result<IndexMap<ID, T>>
where
    ID: IDLike,
    T: HasID<ID>,
{
    let mut map = IndexMap::new();
    for item in items {
        let id = item.get_id().clone();
        ensure!(!map.contains_key(&id), "Duplicate ID {id} found");
        map.insert(id, item);
    }

    Ok(map)
}

/// Look up an ID in a collection, naming the kind of ID in the error
fn get_id<ID, C>(collection: &C, kind: &str, id: &str) -> Result<ID>
where
    ID: IDLike,
    C: IDCollection<ID>,
{
    collection
        .get_id_by_str(id)
        .with_context(|| format!("Unknown {kind} ID {id}"))
}

/// Check that a year is part of the calendar
fn check_year(time: &TimeIndex, year: u32) -> Result<()> {
    ensure!(
        time.years_all.contains(&year),
        "Year {year} is not part of the calendar"
    );

    Ok(())
}

/// Collect keyed rows into a map, rejecting duplicate keys
fn collect_unique<K, V>(rows: impl IntoIterator<Item = Result<(K, V)>>) -> Result<HashMap<K, V>>
where
    K: Eq + Hash + std::fmt::Debug,
{
    let mut map = HashMap::new();
    for row in rows {
        let (key, value) = row?;
        try_insert(&mut map, key, value)?;
    }

    Ok(map)
}

/// Read a model from the specified directory.
///
/// # Arguments
///
/// * `model_dir` - Folder containing model configuration files
///
/// # Returns
///
/// The fully validated [`Model`] or an error.
pub fn load_model<P: AsRef<Path>>(model_dir: P) -> Result<Model> {
    let model_dir = model_dir.as_ref();
    let parameters = ModelParameters::from_path(model_dir)?;
    let time = TimeIndex::new(&parameters.calendar)
        .with_context(|| input_err_msg(model_dir.join("model.toml")))?;

    let nodes = read_nodes(model_dir)?;
    let fuels = read_fuels(model_dir, &parameters)?;
    let pairs = read_fuel_substitutes(model_dir, &fuels)?;
    let substitution = FuelSubstitution::new(&fuels, pairs)
        .with_context(|| input_err_msg(model_dir.join("fuel_substitutes.csv")))?;
    let (aux_media, aux_medium_costs) = read_aux_media(model_dir, &time)?;
    let techs = read_techs(model_dir, &fuels)?;
    let tech_costs = read_tech_costs(model_dir, &techs, &time)?;
    let fuel_costs = read_fuel_costs(model_dir, &fuels, &time)?;
    let node_data = read_node_data(model_dir, &nodes, &techs, &fuels, &time)?;
    let series = read_time_series(model_dir, &nodes, &techs, &fuels, &time)?;

    let electricity = &parameters.electricity_fuel;
    if !fuels.contains_key(electricity.as_str()) {
        warn!("The electricity fuel {electricity} is not defined; electricity terms are omitted");
    }

    Ok(Model {
        model_dir: model_dir.to_path_buf(),
        parameters,
        time,
        nodes,
        fuels,
        substitution,
        techs,
        aux_media: aux_media.into_iter().collect::<IndexMap<_, _>>(),
        tech_costs,
        fuel_costs,
        aux_medium_costs,
        node_tech_limits: node_data.tech_limits,
        node_limits: node_data.node_limits,
        storage_levels: node_data.storage_levels,
        storage_reserves: node_data.storage_reserves,
        node_fuel_trade: node_data.fuel_trade,
        node_fuel_year_trade: node_data.fuel_year_trade,
        fix_quant_schedule: node_data.fix_quant_schedule,
        series,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::fs::File;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Record {
        id: String,
        value: u32,
    }

    #[derive(Debug, PartialEq, Deserialize)]
    struct Value {
        value: u32,
    }

    /// Create an example CSV file in dir_path
    fn create_csv_file(dir_path: &Path, contents: &str) -> PathBuf {
        let file_path = dir_path.join("test.csv");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "{contents}").unwrap();
        file_path
    }

    #[test]
    fn test_read_csv() {
        let dir = tempdir().unwrap();
        let file_path = create_csv_file(dir.path(), "id,value\nhello,1\nworld, 2\n");
        let records: Vec<Record> = read_csv(&file_path).unwrap();
        assert_eq!(
            records,
            &[
                Record {
                    id: "hello".to_string(),
                    value: 1,
                },
                Record {
                    id: "world".to_string(),
                    value: 2,
                }
            ]
        );

        // File with no data (only column headers)
        let file_path = create_csv_file(dir.path(), "id,value\n");
        assert!(read_csv::<Record>(&file_path).is_err());
        assert!(
            read_csv_optional::<Record>(&file_path)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_read_csv_optional_missing() {
        let dir = tempdir().unwrap();
        let rows: Vec<Record> = read_csv_optional(&dir.path().join("absent.csv")).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_read_csv_keyed() {
        #[derive(Debug, PartialEq, Deserialize)]
        struct Key {
            id: String,
        }

        let dir = tempdir().unwrap();
        let file_path = create_csv_file(dir.path(), "id,value\na,3");
        let rows: Vec<(Key, Value)> = read_csv_keyed_optional(&file_path).unwrap();
        assert_eq!(
            rows,
            [(
                Key {
                    id: "a".to_string()
                },
                Value { value: 3 }
            )]
        );
    }

    #[test]
    fn test_read_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test.toml");
        {
            let mut file = File::create(&file_path).unwrap();
            writeln!(file, "value = 1").unwrap();
        }

        assert_eq!(read_toml::<Value>(&file_path).unwrap(), Value { value: 1 });

        // Invalid TOML
        {
            let mut file = File::create(&file_path).unwrap();
            writeln!(file, "bad toml syntax").unwrap();
        }
        assert!(read_toml::<Value>(&file_path).is_err());
    }

    #[test]
    fn test_is_sorted_and_unique() {
        assert!(is_sorted_and_unique([1, 2]));
        assert!(!is_sorted_and_unique([1, 1]));
        assert!(!is_sorted_and_unique([2, 1]));
        assert!(is_sorted_and_unique(Vec::<u32>::new()));
        assert!(is_sorted_and_unique(["a", "b"]));
    }

    #[test]
    fn test_try_insert() {
        let mut map = HashMap::new();
        try_insert(&mut map, "a", 1).unwrap();
        assert!(try_insert(&mut map, "a", 2).is_err());
        assert_eq!(map["a"], 1);
    }
}
