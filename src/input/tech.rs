//! Code for reading technologies, their fuel incidence and their costs.
use super::*;
use crate::fuel::FuelMap;
use crate::id::TechID;
use crate::model::TechCosts;
use crate::tech::{FlowDirection, Tech, TechMap};
use serde::Deserialize;

const TECHS_FILE_NAME: &str = "techs.csv";
const TECH_FUELS_FILE_NAME: &str = "tech_fuels.csv";
const TECH_COSTS_FILE_NAME: &str = "tech_costs.csv";

#[derive(Debug, Deserialize)]
struct TechFuelRaw {
    tech_id: String,
    fuel_id: String,
    direction: FlowDirection,
}

#[derive(Debug, Deserialize)]
struct TechYearKey {
    tech_id: String,
    year: u32,
}

/// Read technologies from `techs.csv` and attach their input and output fuels from
/// `tech_fuels.csv`.
pub fn read_techs(model_dir: &Path, fuels: &FuelMap) -> Result<TechMap> {
    let file_path = model_dir.join(TECHS_FILE_NAME);
    let techs = read_csv::<Tech>(&file_path)?;
    let mut techs = collect_id_map(techs).with_context(|| input_err_msg(&file_path))?;
    for tech in techs.values() {
        validate_tech(tech, fuels).with_context(|| input_err_msg(&file_path))?;
    }

    let file_path = model_dir.join(TECH_FUELS_FILE_NAME);
    read_tech_fuels(&file_path, &mut techs, fuels).with_context(|| input_err_msg(&file_path))?;
    for tech in techs.values().filter(|tech| tech.is_storage()) {
        let input = tech.unique_input()?;
        let output = tech.unique_output()?;
        ensure!(
            input == output,
            "Storage {} must charge and discharge the same fuel",
            tech.id
        );
    }

    Ok(techs)
}

fn validate_tech(tech: &Tech, fuels: &FuelMap) -> Result<()> {
    ensure!(
        tech.efficiency > 0.0 && tech.efficiency.is_finite(),
        "Efficiency of technology {} must be greater than zero",
        tech.id
    );
    for (name, value) in [
        ("part_load_max_eff", tech.part_load_max_eff),
        ("part_load_bend", tech.part_load_bend),
        ("availability_storage_vol", tech.availability_storage_vol),
    ] {
        ensure!(
            value > 0.0 && value <= 1.0,
            "{name} of technology {} must be in the range (0, 1]",
            tech.id
        );
    }
    ensure!(
        tech.production_upper_limit >= 0.0,
        "production_upper_limit of technology {} must not be negative",
        tech.id
    );

    if let Some(fuel_id) = &tech.aux_medium_fuel {
        let fuel = fuels
            .get(fuel_id)
            .with_context(|| format!("Unknown auxiliary medium fuel {fuel_id}"))?;
        ensure!(
            fuel.spec_energy > 0.0,
            "Fuel {fuel_id} drives an auxiliary medium flow and needs a specific energy above zero"
        );
    }

    Ok(())
}

fn read_tech_fuels(file_path: &Path, techs: &mut TechMap, fuels: &FuelMap) -> Result<()> {
    for raw in read_csv_optional::<TechFuelRaw>(file_path)? {
        let fuel_id = get_id(fuels, "fuel", &raw.fuel_id)?;
        let tech = techs
            .get_mut(raw.tech_id.as_str())
            .with_context(|| format!("Unknown technology ID {}", raw.tech_id))?;
        let fuels = match raw.direction {
            FlowDirection::Input => &mut tech.inputs,
            FlowDirection::Output => &mut tech.outputs,
        };
        ensure!(
            fuels.insert(fuel_id),
            "Duplicate fuel {} for technology {}",
            raw.fuel_id,
            raw.tech_id
        );
    }

    Ok(())
}

/// Read technology costs per year from `tech_costs.csv`, if present
pub fn read_tech_costs(
    model_dir: &Path,
    techs: &TechMap,
    time: &TimeIndex,
) -> Result<HashMap<(TechID, u32), TechCosts>> {
    let file_path = model_dir.join(TECH_COSTS_FILE_NAME);
    let rows = read_csv_keyed_optional::<TechYearKey, TechCosts>(&file_path)?;
    collect_unique(rows.into_iter().map(|(key, costs)| {
        let tech_id = get_id(techs, "technology", &key.tech_id)?;
        check_year(time, key.year)?;
        Ok(((tech_id, key.year), costs))
    }))
    .with_context(|| input_err_msg(&file_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::fuel;
    use crate::id::FuelID;
    use crate::model::CalendarParameters;
    use crate::tech::TechKind;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut file = File::create(dir.join(name)).unwrap();
        writeln!(file, "{contents}").unwrap();
    }

    fn fuels() -> FuelMap {
        ["Electricity", "H2"]
            .into_iter()
            .map(|id| (FuelID::new(id), fuel(id, "kWh")))
            .collect()
    }

    #[test]
    fn test_read_techs() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            TECHS_FILE_NAME,
            "id,kind,efficiency,capacity_of_input\n\
             Electrolyser,conversion,0.7,true\n\
             Battery,storage,0.95,false",
        );
        write_file(
            dir.path(),
            TECH_FUELS_FILE_NAME,
            "tech_id,fuel_id,direction\n\
             Electrolyser,Electricity,in\n\
             Electrolyser,H2,out\n\
             Battery,Electricity,in\n\
             Battery,Electricity,out",
        );

        let techs = read_techs(dir.path(), &fuels()).unwrap();
        let electrolyser = &techs["Electrolyser"];
        assert_eq!(electrolyser.kind, TechKind::Conversion);
        assert_eq!(electrolyser.efficiency, 0.7);
        assert!(electrolyser.capacity_of_input);
        assert!(electrolyser.has_input(&"Electricity".into()));
        assert!(electrolyser.has_output(&"H2".into()));
        assert_eq!(electrolyser.part_load_max_eff, 1.0);
        assert_eq!(electrolyser.production_upper_limit, f64::INFINITY);
        assert!(techs["Battery"].is_storage());
    }

    #[test]
    fn test_read_techs_storage_without_output() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), TECHS_FILE_NAME, "id,kind\nBattery,storage");
        write_file(
            dir.path(),
            TECH_FUELS_FILE_NAME,
            "tech_id,fuel_id,direction\nBattery,Electricity,in",
        );

        let err = read_techs(dir.path(), &fuels()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Technology Battery must have exactly one output fuel"
        );
    }

    #[test]
    fn test_read_techs_bad_aux_medium_fuel() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            TECHS_FILE_NAME,
            "id,kind,aux_medium_fuel\nElectrolyser,conversion,H2",
        );
        // H2 has no specific energy
        assert!(read_techs(dir.path(), &fuels()).is_err());
    }

    #[test]
    fn test_read_tech_costs() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), TECHS_FILE_NAME, "id,kind\nPV,conversion");
        let techs = read_techs(dir.path(), &fuels()).unwrap();
        let time = TimeIndex::new(&CalendarParameters::default()).unwrap();

        write_file(
            dir.path(),
            TECH_COSTS_FILE_NAME,
            "tech_id,year,invest,fixed_om\nPV,1,800,12",
        );
        let costs = read_tech_costs(dir.path(), &techs, &time).unwrap();
        let pv = costs[&(TechID::new("PV"), 1)];
        assert_eq!(pv.invest, 800.0);
        assert_eq!(pv.fixed_om, 12.0);
        assert_eq!(pv.variable_om, 0.0);

        write_file(
            dir.path(),
            TECH_COSTS_FILE_NAME,
            "tech_id,year,invest\nPV,1,800\nPV,1,900",
        );
        assert!(read_tech_costs(dir.path(), &techs, &time).is_err());
    }
}
