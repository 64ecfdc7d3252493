//! Code for reading nodes and every node-level limit, trade bound and schedule.
use super::*;
use crate::fuel::FuelMap;
use crate::id::{FuelID, NodeID, TechID};
use crate::model::{
    FixQuantSchedule, NodeFuelTrade, NodeFuelYearTrade, NodeLimits, NodeTechLimits,
    StorageLevels, StorageReserve,
};
use crate::tech::TechMap;
use indexmap::IndexSet;
use serde::Deserialize;
use serde_string_enum::DeserializeLabeledStringEnum;

const NODES_FILE_NAME: &str = "nodes.csv";
const TECH_LIMITS_FILE_NAME: &str = "tech_limits.csv";
const NODE_LIMITS_FILE_NAME: &str = "node_limits.csv";
const STORAGE_LEVELS_FILE_NAME: &str = "storage_levels.csv";
const STORAGE_RESERVES_FILE_NAME: &str = "storage_reserves.csv";
const NODE_FUELS_FILE_NAME: &str = "node_fuels.csv";
const NODE_FUEL_YEARS_FILE_NAME: &str = "node_fuel_years.csv";
const FIX_QUANT_SCHEDULE_FILE_NAME: &str = "fix_quant_schedule.csv";

#[derive(Debug, Deserialize)]
struct NodeRaw {
    id: String,
}

#[derive(Debug, Deserialize)]
struct NodeTechYearKey {
    node_id: String,
    tech_id: String,
    year: u32,
}

#[derive(Debug, Deserialize)]
struct NodeYearKey {
    node_id: String,
    year: u32,
}

#[derive(Debug, Deserialize)]
struct NodeTechKey {
    node_id: String,
    tech_id: String,
}

#[derive(Debug, Deserialize)]
struct NodeTechFuelKey {
    node_id: String,
    tech_id: String,
    fuel_id: String,
}

#[derive(Debug, Deserialize)]
struct NodeFuelKey {
    node_id: String,
    fuel_id: String,
}

#[derive(Debug, Deserialize)]
struct NodeFuelYearKey {
    node_id: String,
    fuel_id: String,
    year: u32,
}

/// Which calendar level a fixed-quantity schedule entry refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeserializeLabeledStringEnum)]
enum ScheduleLevel {
    #[string = "weekday"]
    Weekday,
    #[string = "hour"]
    Hour,
}

#[derive(Debug, Deserialize)]
struct ScheduleRaw {
    node_id: String,
    fuel_id: String,
    level: ScheduleLevel,
    value: u32,
}

/// Node-level data read from the optional node files
#[derive(Debug, Default)]
pub struct NodeData {
    pub tech_limits: HashMap<(NodeID, TechID, u32), NodeTechLimits>,
    pub node_limits: HashMap<(NodeID, u32), NodeLimits>,
    pub storage_levels: HashMap<(NodeID, TechID), StorageLevels>,
    pub storage_reserves: HashMap<(NodeID, TechID, FuelID), StorageReserve>,
    pub fuel_trade: HashMap<(NodeID, FuelID), NodeFuelTrade>,
    pub fuel_year_trade: HashMap<(NodeID, FuelID, u32), NodeFuelYearTrade>,
    pub fix_quant_schedule: FixQuantSchedule,
}

/// Read node IDs from `nodes.csv`
pub fn read_nodes(model_dir: &Path) -> Result<IndexSet<NodeID>> {
    let file_path = model_dir.join(NODES_FILE_NAME);
    let mut nodes = IndexSet::new();
    for raw in read_csv::<NodeRaw>(&file_path)? {
        ensure!(
            nodes.insert(NodeID::from(raw.id.as_str())),
            "{}: duplicate node ID {}",
            input_err_msg(&file_path),
            raw.id
        );
    }

    Ok(nodes)
}

/// Read every optional node-level file
pub fn read_node_data(
    model_dir: &Path,
    nodes: &IndexSet<NodeID>,
    techs: &TechMap,
    fuels: &FuelMap,
    time: &TimeIndex,
) -> Result<NodeData> {
    let read = |file_name: &str| model_dir.join(file_name);

    let file_path = read(TECH_LIMITS_FILE_NAME);
    let tech_limits = collect_unique(
        read_csv_keyed_optional::<NodeTechYearKey, NodeTechLimits>(&file_path)?
            .into_iter()
            .map(|(key, limits)| {
                let node_id = get_id(nodes, "node", &key.node_id)?;
                let tech_id = get_id(techs, "technology", &key.tech_id)?;
                check_year(time, key.year)?;
                check_tech_limits(&limits)?;
                Ok(((node_id, tech_id, key.year), limits))
            }),
    )
    .with_context(|| input_err_msg(&file_path))?;

    let file_path = read(NODE_LIMITS_FILE_NAME);
    let node_limits = collect_unique(
        read_csv_keyed_optional::<NodeYearKey, NodeLimits>(&file_path)?
            .into_iter()
            .map(|(key, limits)| {
                let node_id = get_id(nodes, "node", &key.node_id)?;
                check_year(time, key.year)?;
                check_bounds("combined capacity", limits.min_combined_cap, limits.max_combined_cap)?;
                Ok(((node_id, key.year), limits))
            }),
    )
    .with_context(|| input_err_msg(&file_path))?;

    let file_path = read(STORAGE_LEVELS_FILE_NAME);
    let storage_levels = collect_unique(
        read_csv_keyed_optional::<NodeTechKey, StorageLevels>(&file_path)?
            .into_iter()
            .map(|(key, levels)| {
                let node_id = get_id(nodes, "node", &key.node_id)?;
                let tech_id = get_storage_id(techs, &key.tech_id)?;
                check_storage_levels(&levels)?;
                Ok(((node_id, tech_id), levels))
            }),
    )
    .with_context(|| input_err_msg(&file_path))?;

    let file_path = read(STORAGE_RESERVES_FILE_NAME);
    let storage_reserves = collect_unique(
        read_csv_keyed_optional::<NodeTechFuelKey, StorageReserve>(&file_path)?
            .into_iter()
            .map(|(key, reserve)| {
                let node_id = get_id(nodes, "node", &key.node_id)?;
                let tech_id = get_storage_id(techs, &key.tech_id)?;
                let fuel_id = get_id(fuels, "fuel", &key.fuel_id)?;
                ensure!(
                    reserve.min_energy_reserve >= 0.0 && reserve.factor >= 0.0,
                    "Reserves and reserve factors must not be negative"
                );
                Ok(((node_id, tech_id, fuel_id), reserve))
            }),
    )
    .with_context(|| input_err_msg(&file_path))?;

    let file_path = read(NODE_FUELS_FILE_NAME);
    let fuel_trade = collect_unique(
        read_csv_keyed_optional::<NodeFuelKey, NodeFuelTrade>(&file_path)?
            .into_iter()
            .map(|(key, trade)| {
                let node_id = get_id(nodes, "node", &key.node_id)?;
                let fuel_id = get_id(fuels, "fuel", &key.fuel_id)?;
                check_bounds("import", trade.min_import, trade.max_import)?;
                check_bounds("export", trade.min_export, trade.max_export)?;
                check_bounds("injection", trade.min_injection, trade.max_injection)?;
                Ok(((node_id, fuel_id), trade))
            }),
    )
    .with_context(|| input_err_msg(&file_path))?;

    let file_path = read(NODE_FUEL_YEARS_FILE_NAME);
    let fuel_year_trade = collect_unique(
        read_csv_keyed_optional::<NodeFuelYearKey, NodeFuelYearTrade>(&file_path)?
            .into_iter()
            .map(|(key, trade)| {
                let node_id = get_id(nodes, "node", &key.node_id)?;
                let fuel_id = get_id(fuels, "fuel", &key.fuel_id)?;
                check_year(time, key.year)?;
                check_bounds(
                    "spot import",
                    trade.min_import_timeseries,
                    trade.max_import_timeseries,
                )?;
                check_bounds(
                    "spot export",
                    trade.min_export_timeseries,
                    trade.max_export_timeseries,
                )?;
                Ok(((node_id, fuel_id, key.year), trade))
            }),
    )
    .with_context(|| input_err_msg(&file_path))?;

    let file_path = read(FIX_QUANT_SCHEDULE_FILE_NAME);
    let fix_quant_schedule = read_fix_quant_schedule(&file_path, nodes, fuels)
        .with_context(|| input_err_msg(&file_path))?;

    Ok(NodeData {
        tech_limits,
        node_limits,
        storage_levels,
        storage_reserves,
        fuel_trade,
        fuel_year_trade,
        fix_quant_schedule,
    })
}

fn get_storage_id(techs: &TechMap, id: &str) -> Result<TechID> {
    let tech_id = get_id(techs, "technology", id)?;
    ensure!(techs[&tech_id].is_storage(), "Technology {id} is not a storage");
    Ok(tech_id)
}

fn check_bounds(name: &str, min: f64, max: f64) -> Result<()> {
    ensure!(
        min >= 0.0 && min <= max,
        "Bounds for {name} must satisfy 0 <= min <= max (got {min} and {max})"
    );

    Ok(())
}

fn check_tech_limits(limits: &NodeTechLimits) -> Result<()> {
    ensure!(
        limits.unit_cap > 0.0 && limits.unit_volume > 0.0,
        "Unit capacity and unit volume must be greater than zero"
    );
    check_bounds("installed capacity", limits.min_inst_cap, limits.max_inst_cap)?;
    check_bounds("capacity addition", limits.min_cap_add, limits.max_cap_add)?;
    check_bounds("capacity retirement", limits.min_cap_sub, limits.max_cap_sub)?;
    check_bounds(
        "installed storage volume",
        limits.min_inst_storage_vol,
        limits.max_inst_storage_vol,
    )?;
    check_bounds(
        "storage volume addition",
        limits.min_storage_vol_add,
        limits.max_storage_vol_add,
    )?;
    check_bounds(
        "storage volume retirement",
        limits.min_storage_vol_sub,
        limits.max_storage_vol_sub,
    )
}

fn check_storage_levels(levels: &StorageLevels) -> Result<()> {
    for value in [levels.start, levels.min, levels.max] {
        ensure!(
            (0.0..=1.0).contains(&value),
            "Storage levels must be between 0 and 1"
        );
    }
    ensure!(
        levels.min <= levels.max,
        "Minimum storage level exceeds maximum"
    );

    Ok(())
}

fn read_fix_quant_schedule(
    file_path: &Path,
    nodes: &IndexSet<NodeID>,
    fuels: &FuelMap,
) -> Result<FixQuantSchedule> {
    let mut schedule = FixQuantSchedule::default();
    for raw in read_csv_optional::<ScheduleRaw>(file_path)? {
        let node_id = get_id(nodes, "node", &raw.node_id)?;
        let fuel_id = get_id(fuels, "fuel", &raw.fuel_id)?;
        let entries = match raw.level {
            ScheduleLevel::Weekday => {
                ensure!(
                    (1..=7).contains(&raw.value),
                    "Weekdays are numbered 1 to 7 (got {})",
                    raw.value
                );
                &mut schedule.days
            }
            ScheduleLevel::Hour => &mut schedule.hours,
        };
        entries.insert((node_id, fuel_id, raw.value));
    }

    Ok(schedule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{conversion_tech, fuel, storage_tech};
    use crate::model::CalendarParameters;
    use crate::time_index::TimeStep;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut file = File::create(dir.join(name)).unwrap();
        writeln!(file, "{contents}").unwrap();
    }

    struct Sets {
        nodes: IndexSet<NodeID>,
        techs: TechMap,
        fuels: FuelMap,
        time: TimeIndex,
    }

    fn sets() -> Sets {
        let techs = [
            conversion_tech("PV", &["Sun"], &["Electricity"]),
            storage_tech("Battery", "Electricity"),
        ]
        .into_iter()
        .map(|tech| (tech.id.clone(), tech))
        .collect();
        let fuels = ["Electricity", "Sun"]
            .into_iter()
            .map(|id| (FuelID::new(id), fuel(id, "kWh")))
            .collect();

        Sets {
            nodes: IndexSet::from([NodeID::new("N1")]),
            techs,
            fuels,
            time: TimeIndex::new(&CalendarParameters::default()).unwrap(),
        }
    }

    fn read(dir: &Path, sets: &Sets) -> Result<NodeData> {
        read_node_data(dir, &sets.nodes, &sets.techs, &sets.fuels, &sets.time)
    }

    #[test]
    fn test_read_nodes() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), NODES_FILE_NAME, "id\nN1\nN2");
        let nodes = read_nodes(dir.path()).unwrap();
        assert_eq!(nodes.len(), 2);

        write_file(dir.path(), NODES_FILE_NAME, "id\nN1\nN1");
        assert!(read_nodes(dir.path()).is_err());
    }

    #[test]
    fn test_read_node_data_absent() {
        let dir = tempdir().unwrap();
        let data = read(dir.path(), &sets()).unwrap();
        assert!(data.tech_limits.is_empty());
        assert!(data.fix_quant_schedule.days.is_empty());
    }

    #[test]
    fn test_read_tech_limits() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            TECH_LIMITS_FILE_NAME,
            "node_id,tech_id,year,max_inst_cap,unit_cap\nN1,PV,1,50,5",
        );
        let data = read(dir.path(), &sets()).unwrap();
        let limits = data.tech_limits[&(NodeID::new("N1"), TechID::new("PV"), 1)];
        assert_eq!(limits.max_inst_cap, 50.0);
        assert_eq!(limits.unit_cap, 5.0);
        assert_eq!(limits.max_cap_add, f64::INFINITY);

        write_file(
            dir.path(),
            TECH_LIMITS_FILE_NAME,
            "node_id,tech_id,year,min_inst_cap,max_inst_cap\nN1,PV,1,60,50",
        );
        assert!(read(dir.path(), &sets()).is_err());
    }

    #[test]
    fn test_read_storage_levels_for_non_storage() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            STORAGE_LEVELS_FILE_NAME,
            "node_id,tech_id,start\nN1,PV,0.5",
        );
        assert!(read(dir.path(), &sets()).is_err());

        write_file(
            dir.path(),
            STORAGE_LEVELS_FILE_NAME,
            "node_id,tech_id,start,min\nN1,Battery,0.4,0.1",
        );
        let data = read(dir.path(), &sets()).unwrap();
        let levels = data.storage_levels[&(NodeID::new("N1"), TechID::new("Battery"))];
        assert_eq!(levels.start, 0.4);
        assert_eq!(levels.min, 0.1);
        assert_eq!(levels.max, 1.0);
    }

    #[test]
    fn test_read_fix_quant_schedule() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            FIX_QUANT_SCHEDULE_FILE_NAME,
            "node_id,fuel_id,level,value\nN1,Electricity,weekday,1\nN1,Electricity,hour,3",
        );
        let data = read(dir.path(), &sets()).unwrap();
        let schedule = data.fix_quant_schedule;
        let node = NodeID::new("N1");
        let fuel = FuelID::new("Electricity");
        assert!(schedule.allows(&node, &fuel, &TimeStep::new(1, 1, 3, 0)));
        assert!(!schedule.allows(&node, &fuel, &TimeStep::new(1, 1, 4, 0)));

        write_file(
            dir.path(),
            FIX_QUANT_SCHEDULE_FILE_NAME,
            "node_id,fuel_id,level,value\nN1,Electricity,weekday,8",
        );
        assert!(read(dir.path(), &sets()).is_err());
    }
}
