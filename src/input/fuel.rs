//! Code for reading fuels, fuel substitutes, fuel prices and auxiliary media.
use super::*;
use crate::fuel::{Fuel, FuelMap};
use crate::id::{AuxMediumID, FuelID};
use crate::model::{AuxMedium, FuelCosts};
use serde::Deserialize;

const FUELS_FILE_NAME: &str = "fuels.csv";
const FUEL_SUBSTITUTES_FILE_NAME: &str = "fuel_substitutes.csv";
const FUEL_COSTS_FILE_NAME: &str = "fuel_costs.csv";
const AUX_MEDIA_FILE_NAME: &str = "aux_media.csv";
const AUX_MEDIUM_COSTS_FILE_NAME: &str = "aux_medium_costs.csv";

#[derive(Debug, Deserialize)]
struct FuelSubstituteRaw {
    fuel_id: String,
    substitute_id: String,
}

#[derive(Debug, Deserialize)]
struct FuelYearKey {
    fuel_id: String,
    year: u32,
}

#[derive(Debug, Deserialize)]
struct AuxMediumCostRaw {
    medium_id: String,
    year: u32,
    cost: f64,
}

/// Read fuels from `fuels.csv`.
///
/// Every fuel's unit must appear in the unit conversion table so that its flows can be reported.
pub fn read_fuels(model_dir: &Path, parameters: &ModelParameters) -> Result<FuelMap> {
    let file_path = model_dir.join(FUELS_FILE_NAME);
    let fuels = read_csv::<Fuel>(&file_path)?;
    let fuels = collect_id_map(fuels).with_context(|| input_err_msg(&file_path))?;
    validate_fuels(&fuels, parameters).with_context(|| input_err_msg(&file_path))?;

    Ok(fuels)
}

fn validate_fuels(fuels: &FuelMap, parameters: &ModelParameters) -> Result<()> {
    for fuel in fuels.values() {
        parameters
            .unit_conversion(&fuel.unit)
            .with_context(|| format!("Invalid unit for fuel {}", fuel.id))?;
        ensure!(
            fuel.spec_energy >= 0.0 && fuel.share_const_cons_system >= 0.0,
            "spec_energy and share_const_cons_system of fuel {} must not be negative",
            fuel.id
        );
    }

    Ok(())
}

/// Read `(fuel, substitute)` pairs from `fuel_substitutes.csv`, if present
pub fn read_fuel_substitutes(model_dir: &Path, fuels: &FuelMap) -> Result<Vec<(FuelID, FuelID)>> {
    let file_path = model_dir.join(FUEL_SUBSTITUTES_FILE_NAME);
    read_csv_optional::<FuelSubstituteRaw>(&file_path)?
        .into_iter()
        .map(|raw| {
            Ok((
                get_id(fuels, "fuel", &raw.fuel_id)?,
                get_id(fuels, "fuel", &raw.substitute_id)?,
            ))
        })
        .collect::<Result<_>>()
        .with_context(|| input_err_msg(&file_path))
}

/// Read fuel prices per year from `fuel_costs.csv`, if present
pub fn read_fuel_costs(
    model_dir: &Path,
    fuels: &FuelMap,
    time: &TimeIndex,
) -> Result<HashMap<(FuelID, u32), FuelCosts>> {
    let file_path = model_dir.join(FUEL_COSTS_FILE_NAME);
    let rows = read_csv_keyed_optional::<FuelYearKey, FuelCosts>(&file_path)?;
    collect_unique(rows.into_iter().map(|(key, costs)| {
        let fuel_id = get_id(fuels, "fuel", &key.fuel_id)?;
        check_year(time, key.year)?;
        Ok(((fuel_id, key.year), costs))
    }))
    .with_context(|| input_err_msg(&file_path))
}

/// Read auxiliary media and their costs per year, both of which are optional
pub fn read_aux_media(
    model_dir: &Path,
    time: &TimeIndex,
) -> Result<(
    IndexMap<AuxMediumID, AuxMedium>,
    HashMap<(AuxMediumID, u32), f64>,
)> {
    let file_path = model_dir.join(AUX_MEDIA_FILE_NAME);
    let media = read_csv_optional::<AuxMedium>(&file_path)?;
    let media = collect_id_map(media).with_context(|| input_err_msg(&file_path))?;
    for medium in media.values() {
        ensure!(
            medium.spec_medium_ratio >= 0.0,
            "{}: spec_medium_ratio of {} must not be negative",
            input_err_msg(&file_path),
            medium.id
        );
    }

    let file_path = model_dir.join(AUX_MEDIUM_COSTS_FILE_NAME);
    let costs = collect_unique(
        read_csv_optional::<AuxMediumCostRaw>(&file_path)?
            .into_iter()
            .map(|raw| {
                let medium_id = get_id(&media, "auxiliary medium", &raw.medium_id)?;
                check_year(time, raw.year)?;
                Ok(((medium_id, raw.year), raw.cost))
            }),
    )
    .with_context(|| input_err_msg(&file_path))?;

    Ok((media, costs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::calendar_params;
    use crate::model::CalendarParameters;
    use rstest::rstest;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut file = File::create(dir.join(name)).unwrap();
        writeln!(file, "{contents}").unwrap();
    }

    #[test]
    fn test_read_fuels() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            FUELS_FILE_NAME,
            "id,unit,vre,reference\nElectricity,kWh,false,true\nSun,kWh,true,false",
        );

        let fuels = read_fuels(dir.path(), &ModelParameters::default()).unwrap();
        assert_eq!(fuels.len(), 2);
        assert!(fuels["Electricity"].reference);
        assert!(fuels["Sun"].vre);
        assert_eq!(fuels["Sun"].spec_energy, 0.0);
    }

    #[test]
    fn test_read_fuels_bad_unit() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), FUELS_FILE_NAME, "id,unit\nElectricity,furlong");
        assert!(read_fuels(dir.path(), &ModelParameters::default()).is_err());
    }

    #[test]
    fn test_read_fuels_duplicate() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), FUELS_FILE_NAME, "id,unit\nH2,kg\nH2,kg");
        assert!(read_fuels(dir.path(), &ModelParameters::default()).is_err());
    }

    #[rstest]
    fn test_read_fuel_costs(calendar_params: CalendarParameters) {
        let time = TimeIndex::new(&calendar_params).unwrap();
        let dir = tempdir().unwrap();
        write_file(dir.path(), FUELS_FILE_NAME, "id,unit\nH2,kg");
        let fuels = read_fuels(dir.path(), &ModelParameters::default()).unwrap();

        write_file(
            dir.path(),
            FUEL_COSTS_FILE_NAME,
            "fuel_id,year,import_cost\nH2,1,4.5",
        );
        let costs = read_fuel_costs(dir.path(), &fuels, &time).unwrap();
        let h2_costs = costs[&(FuelID::new("H2"), 1)];
        assert_eq!(h2_costs.import_cost, 4.5);
        assert_eq!(h2_costs.export_price, 0.0);

        // Year outside the calendar
        write_file(
            dir.path(),
            FUEL_COSTS_FILE_NAME,
            "fuel_id,year,import_cost\nH2,2,4.5",
        );
        assert!(read_fuel_costs(dir.path(), &fuels, &time).is_err());
    }

    #[rstest]
    fn test_read_aux_media_absent(calendar_params: CalendarParameters) {
        let time = TimeIndex::new(&calendar_params).unwrap();
        let dir = tempdir().unwrap();
        let (media, costs) = read_aux_media(dir.path(), &time).unwrap();
        assert!(media.is_empty());
        assert!(costs.is_empty());
    }

    #[test]
    fn test_read_fuel_substitutes_unknown() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), FUELS_FILE_NAME, "id,unit\nH2,kg");
        let fuels = read_fuels(dir.path(), &ModelParameters::default()).unwrap();
        write_file(
            dir.path(),
            FUEL_SUBSTITUTES_FILE_NAME,
            "fuel_id,substitute_id\nH2,CH4",
        );
        assert!(read_fuel_substitutes(dir.path(), &fuels).is_err());
    }
}
