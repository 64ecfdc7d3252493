//! Running a single scenario from input folder to report files, and coordinating a queue of
//! scenarios through a shared status file.
use crate::input::load_model;
use crate::kpi::{
    AnnualValues, EnergyShare, Kpis, LoadDurationCurve, Prices, calculate_kpis, calculate_prices,
    energy_share, load_duration_curves,
};
use crate::lcoe::{LcoeReport, allocate_lcoe};
use crate::model::Model;
use crate::optimisation::build_model;
use crate::output::{create_output_directory, write_lp_summary, write_report, write_runtime};
use crate::results::Results;
use crate::settings::Settings;
use crate::solver::get_solver;
use anyhow::{Context, Result, ensure};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_string_enum::{DeserializeLabeledStringEnum, SerializeLabeledStringEnum};
use std::fs;
use std::path::Path;
use std::time::Instant;

/// Everything reported about a solved scenario
pub struct Report {
    /// Values of the decision variables and costs
    pub results: Results,
    /// Annual flows
    pub annual: AnnualValues,
    /// Performance indicators
    pub kpis: Kpis,
    /// Prices of the reference fuels
    pub prices: Prices,
    /// Levelised costs of energy
    pub lcoe: LcoeReport,
    /// Sorted production curves
    pub load_duration_curves: Vec<LoadDurationCurve>,
    /// Origin of the electricity consumed, if the model has electricity
    pub energy_share: Option<EnergyShare>,
}

/// Post-process the results of a solved model
pub fn evaluate(model: &Model, results: Results) -> Result<Report> {
    let annual = AnnualValues::new(model, &results)?;
    let kpis = calculate_kpis(model, &results, &annual)?;
    let prices = calculate_prices(model, &results, &annual);
    let lcoe = allocate_lcoe(model, &results, &annual)?;
    let load_duration_curves = load_duration_curves(model, &results)?;
    let energy_share = energy_share(model, &results);

    Ok(Report {
        results,
        annual,
        kpis,
        prices,
        lcoe,
        load_duration_curves,
        energy_share,
    })
}

/// Wall-clock duration of each phase of a run
#[derive(Default)]
struct PhaseTimer {
    phases: Vec<(String, f64)>,
}

impl PhaseTimer {
    /// Run `f`, recording how long it took whether or not it succeeded
    fn time<T, F>(&mut self, phase: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let start = Instant::now();
        let outcome = f();
        self.phases
            .push((phase.to_string(), start.elapsed().as_secs_f64()));

        outcome
    }
}

/// Load, build, solve, post-process and report a scenario.
///
/// Returns whether every report file was written.
fn solve_and_report(
    model_dir: &Path,
    output_dir: &Path,
    settings: &Settings,
    timer: &mut PhaseTimer,
) -> Result<bool> {
    let model = timer
        .time("load", || load_model(model_dir))
        .context("Failed to load model.")?;
    info!("Loaded model from {}", model_dir.display());

    let built = timer
        .time("build", || build_model(&model))
        .context("Failed to build model.")?;

    let solver = get_solver(model.parameters.solver);
    let solution = timer
        .time("solve", || Ok(solver.solve(&built.lp)?))
        .context("Failed to solve model.")?;
    info!("Objective value: {}", solution.objective);

    if settings.write_lp_summary
        && let Err(err) = write_lp_summary(output_dir, &built.lp)
    {
        error!("Failed to write LP summary: {err:?}");
    }

    let results = Results::new(&model, &built, &solution);
    let report = timer.time("postprocess", || evaluate(&model, results))?;
    let written = timer.time("write", || Ok(write_report(output_dir, &model, &report)))?;

    Ok(written)
}

/// Run the scenario in `model_dir`, writing its reports into `output_dir`.
///
/// The output directory must already exist. Errors are logged rather than returned. A runtime
/// report is written however far the run got.
pub fn run_scenario(model_dir: &Path, output_dir: &Path, settings: &Settings) -> bool {
    let mut timer = PhaseTimer::default();
    let outcome = solve_and_report(model_dir, output_dir, settings, &mut timer);
    if let Err(err) = write_runtime(output_dir, &timer.phases) {
        error!("Failed to write runtime report: {err:?}");
    }

    match outcome {
        Ok(success) => {
            if success {
                info!("Scenario {} complete", model_dir.display());
            } else {
                warn!("Scenario {} solved but not all reports were written", model_dir.display());
            }
            success
        }
        Err(err) => {
            error!("Scenario {} failed: {err:?}", model_dir.display());
            false
        }
    }
}

/// Progress of a scenario in a status file
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, SerializeLabeledStringEnum, DeserializeLabeledStringEnum,
)]
pub enum Status {
    /// Waiting to be claimed
    #[string = "pending"]
    Pending,
    /// Claimed by a coordinator
    #[string = "running"]
    Running,
    /// Reports written
    #[string = "finished"]
    Finished,
    /// The run failed
    #[string = "error"]
    Error,
}

/// A row of a status file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRow {
    /// Name of the scenario, which is also its folder name
    #[serde(rename = "Name")]
    pub name: String,
    /// Progress of the scenario
    #[serde(rename = "Status")]
    pub status: Status,
}

/// The contents of a status file: comment lines followed by a tab-separated table
#[derive(Debug, PartialEq)]
pub struct StatusFile {
    /// Comment lines, each starting with `#`
    pub header: Vec<String>,
    /// Scenarios in file order
    pub rows: Vec<StatusRow>,
}

impl StatusFile {
    /// Read a status file
    pub fn read(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Could not read status file {}", path.display()))?;
        let header: Vec<String> = contents
            .lines()
            .take_while(|line| line.starts_with('#'))
            .map(ToString::to_string)
            .collect();
        ensure!(
            !header.is_empty(),
            "Status file {} must start with a comment line",
            path.display()
        );

        let table: String = contents
            .lines()
            .skip(header.len())
            .map(|line| format!("{line}\n"))
            .collect();
        let rows = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .trim(csv::Trim::All)
            .from_reader(table.as_bytes())
            .into_deserialize()
            .collect::<Result<Vec<StatusRow>, _>>()
            .with_context(|| format!("Invalid status table in {}", path.display()))?;

        Ok(Self { header, rows })
    }

    /// Overwrite the file at `path` with these contents
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(Vec::new());
        for row in &self.rows {
            writer.serialize(row)?;
        }
        let table = String::from_utf8(writer.into_inner()?)?;

        let mut contents = self.header.join("\n");
        contents.push('\n');
        contents.push_str(&table);
        fs::write(path, contents)
            .with_context(|| format!("Could not write status file {}", path.display()))?;

        Ok(())
    }
}

/// Mark the first pending scenario as running and return its name.
///
/// The file is read and rewritten without a lock, so two coordinators polling at the same moment
/// can both claim the same scenario.
fn claim_next(status_file: &Path) -> Result<Option<String>> {
    let mut file = StatusFile::read(status_file)?;
    let Some(row) = file
        .rows
        .iter_mut()
        .find(|row| row.status == Status::Pending)
    else {
        return Ok(None);
    };

    row.status = Status::Running;
    let name = row.name.clone();
    file.write(status_file)?;

    Ok(Some(name))
}

/// Set the status of the named scenario, re-reading the file so other coordinators' claims survive
fn set_status(status_file: &Path, name: &str, status: Status) -> Result<()> {
    let mut file = StatusFile::read(status_file)?;
    let row = file
        .rows
        .iter_mut()
        .find(|row| row.name == name)
        .with_context(|| format!("Scenario {name} disappeared from status file"))?;
    row.status = status;

    file.write(status_file)
}

/// Run pending scenarios until none are left.
///
/// Each scenario is read from `scenario_root/<name>` and reported into `output_root/<name>`.
/// Returns the number of scenarios this coordinator ran.
pub fn coordinate(
    status_file: &Path,
    scenario_root: &Path,
    output_root: &Path,
    settings: &Settings,
) -> Result<usize> {
    let mut count = 0;
    while let Some(name) = claim_next(status_file)? {
        info!("Starting scenario {name}");
        let output_dir = output_root.join(&name);
        let success = match create_output_directory(&output_dir, true) {
            Ok(_) => run_scenario(&scenario_root.join(&name), &output_dir, settings),
            Err(err) => {
                error!("Failed to create output directory for {name}: {err:?}");
                false
            }
        };

        let status = if success {
            Status::Finished
        } else {
            Status::Error
        };
        set_status(status_file, &name, status)?;
        count += 1;
    }
    info!("No pending scenarios left in {}", status_file.display());

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const STATUS_CONTENTS: &str = "# Scenario queue\nName\tStatus\nbase\tfinished\nhigh\tpending\nlow\tpending\n";

    #[test]
    fn test_read_status_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.tsv");
        fs::write(&path, STATUS_CONTENTS).unwrap();

        let file = StatusFile::read(&path).unwrap();
        assert_eq!(file.header, ["# Scenario queue"]);
        assert_eq!(
            file.rows[1],
            StatusRow {
                name: "high".into(),
                status: Status::Pending
            }
        );
    }

    #[test]
    fn test_status_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.tsv");
        fs::write(&path, STATUS_CONTENTS).unwrap();

        StatusFile::read(&path).unwrap().write(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), STATUS_CONTENTS);
    }

    #[test]
    fn test_status_file_needs_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.tsv");
        fs::write(&path, "Name\tStatus\nbase\tpending\n").unwrap();
        assert!(StatusFile::read(&path).is_err());
    }

    #[test]
    fn test_claim_next() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.tsv");
        fs::write(&path, STATUS_CONTENTS).unwrap();

        assert_eq!(claim_next(&path).unwrap().as_deref(), Some("high"));
        assert_eq!(claim_next(&path).unwrap().as_deref(), Some("low"));
        assert_eq!(claim_next(&path).unwrap(), None);

        set_status(&path, "high", Status::Error).unwrap();
        let statuses: Vec<Status> = StatusFile::read(&path)
            .unwrap()
            .rows
            .into_iter()
            .map(|row| row.status)
            .collect();
        assert_eq!(
            statuses,
            [Status::Finished, Status::Error, Status::Running]
        );
    }

    #[test]
    fn test_coordinate_missing_scenarios() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.tsv");
        fs::write(&path, STATUS_CONTENTS).unwrap();
        let output_root = dir.path().join("results");

        let count = coordinate(
            &path,
            &dir.path().join("scenarios"),
            &output_root,
            &Settings::default(),
        )
        .unwrap();
        assert_eq!(count, 2);

        // Neither scenario folder exists, but each failed run still leaves a runtime report
        let file = StatusFile::read(&path).unwrap();
        assert!(file.rows[1..].iter().all(|row| row.status == Status::Error));
        assert!(output_root.join("high").join("runtime.csv").is_file());
    }
}
