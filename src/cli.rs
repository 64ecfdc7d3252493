//! The command line interface for enopt.
use crate::input::load_model;
use crate::log;
use crate::optimisation::build_model;
use crate::output::{OUTPUT_DIRECTORY_ROOT, create_output_directory, get_output_dir};
use crate::scenario::{coordinate, run_scenario};
use crate::settings::Settings;
use ::log::{info, warn};
use anyhow::{Context, Result, ensure};
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};

pub mod demo;
use demo::DemoSubcommands;
pub mod settings;
use settings::SettingsSubcommands;

/// Capacity expansion and dispatch optimisation for multi-node energy systems.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// The available commands.
    #[command(subcommand)]
    command: Option<Commands>,
    /// Flag to provide the CLI docs as markdown
    #[arg(long, hide = true)]
    markdown_help: bool,
}

/// Options for the run command
#[derive(Args, Default)]
pub struct RunOpts {
    /// Directory for output files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// Whether to overwrite the output directory if it already exists
    #[arg(long)]
    pub overwrite: bool,
    /// Whether to write the size of each variable and constraint family
    #[arg(long)]
    pub write_lp_summary: bool,
}

/// The available commands.
#[derive(Subcommand)]
enum Commands {
    /// Solve a scenario and write its reports.
    Run {
        /// Path to the scenario input folder.
        model_dir: PathBuf,
        /// Other run options
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Check that a scenario can be loaded and its optimisation problem built.
    Validate {
        /// Path to the scenario input folder.
        model_dir: PathBuf,
    },
    /// Run the pending scenarios of a status file until none are left.
    Coordinate {
        /// Tab-separated file of scenario names and statuses.
        status_file: PathBuf,
        /// Folder holding one input folder per scenario (defaults to that of the status file)
        #[arg(long)]
        scenario_root: Option<PathBuf>,
        /// Folder in which to create one output folder per scenario
        #[arg(long)]
        output_root: Option<PathBuf>,
    },
    /// Manage the bundled demo models.
    Demo {
        /// The available subcommands for managing demo models.
        #[command(subcommand)]
        subcommand: DemoSubcommands,
    },
    /// Manage the program settings file.
    Settings {
        /// The available subcommands for the settings file.
        #[command(subcommand)]
        subcommand: SettingsSubcommands,
    },
}

impl Commands {
    /// Execute the supplied CLI command
    fn execute(self) -> Result<()> {
        match self {
            Self::Run { model_dir, opts } => handle_run_command(&model_dir, &opts, None),
            Self::Validate { model_dir } => handle_validate_command(&model_dir, None),
            Self::Coordinate {
                status_file,
                scenario_root,
                output_root,
            } => handle_coordinate_command(
                &status_file,
                scenario_root.as_deref(),
                output_root.as_deref(),
                None,
            ),
            Self::Demo { subcommand } => subcommand.execute(),
            Self::Settings { subcommand } => subcommand.execute(),
        }
    }
}

/// Parse CLI arguments and start enopt
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Invoked as: `$ enopt --markdown-help`
    if cli.markdown_help {
        clap_markdown::print_help_markdown::<Cli>();
        return Ok(());
    }

    let Some(command) = cli.command else {
        let help_str = Cli::command().render_long_help().to_string();
        println!("{help_str}");
        return Ok(());
    };

    command.execute()
}

/// Use the given settings or else load them from the settings file
fn settings_or_load(settings: Option<Settings>) -> Result<Settings> {
    match settings {
        Some(settings) => Ok(settings),
        None => Settings::load().context("Failed to load settings."),
    }
}

/// Handle the `run` command.
pub fn handle_run_command(
    model_path: &Path,
    opts: &RunOpts,
    settings: Option<Settings>,
) -> Result<()> {
    let mut settings = settings_or_load(settings)?;

    // These settings can be overridden by command-line arguments
    settings.overwrite |= opts.overwrite;
    settings.write_lp_summary |= opts.write_lp_summary;

    let output_path = match &opts.output_dir {
        Some(path) => path.clone(),
        None => get_output_dir(model_path)?,
    };
    let overwrite =
        create_output_directory(&output_path, settings.overwrite).with_context(|| {
            format!(
                "Failed to create output directory: {}",
                output_path.display()
            )
        })?;

    log::init(Some(&settings.log_level), Some(&output_path))
        .context("Failed to initialise logging.")?;
    info!("Output folder: {}", output_path.display());

    // NB: We have to wait until the logger is initialised to display this warning
    if overwrite {
        warn!("Output folder was overwritten");
    }

    ensure!(
        run_scenario(model_path, &output_path, &settings),
        "Scenario run failed. See {} for details.",
        output_path.display()
    );

    Ok(())
}

/// Handle the `validate` command.
pub fn handle_validate_command(model_path: &Path, settings: Option<Settings>) -> Result<()> {
    let settings = settings_or_load(settings)?;

    // Initialise program logger (we won't save log files when running the validate command)
    log::init(Some(&settings.log_level), None).context("Failed to initialise logging.")?;

    let model = load_model(model_path).context("Failed to validate model.")?;
    let built = build_model(&model).context("Failed to build model.")?;
    info!(
        "Model validation successful: {} variables, {} constraints",
        built.lp.variables.len(),
        built.lp.rows.len()
    );

    Ok(())
}

/// Handle the `coordinate` command.
pub fn handle_coordinate_command(
    status_file: &Path,
    scenario_root: Option<&Path>,
    output_root: Option<&Path>,
    settings: Option<Settings>,
) -> Result<()> {
    let settings = settings_or_load(settings)?;
    log::init(Some(&settings.log_level), None).context("Failed to initialise logging.")?;

    let scenario_root = scenario_root
        .or_else(|| status_file.parent())
        .unwrap_or(Path::new("."));
    let output_root = output_root.unwrap_or(Path::new(OUTPUT_DIRECTORY_ROOT));

    let count = coordinate(status_file, scenario_root, output_root, &settings)?;
    info!("Ran {count} scenarios");

    Ok(())
}
