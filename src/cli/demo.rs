//! The bundled demo models and the CLI commands for interacting with them.
use super::{RunOpts, handle_run_command};
use crate::settings::Settings;
use anyhow::{Context, Result, bail, ensure};
use clap::Subcommand;
use include_dir::{Dir, DirEntry, include_dir};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// The directory containing the demo models.
const DEMOS_DIR: Dir = include_dir!("demos");

/// The available subcommands for managing demo models.
#[derive(Subcommand)]
pub enum DemoSubcommands {
    /// List available demos.
    List,
    /// Provide information about the specified demo.
    Info {
        /// The name of the demo.
        name: String,
    },
    /// Extract a demo model to a new directory.
    Extract {
        /// The name of the demo to extract.
        name: String,
        /// The destination folder for the demo.
        new_path: Option<PathBuf>,
    },
    /// Run a demo.
    Run {
        /// The name of the demo to run.
        name: String,
        /// Other run options
        #[command(flatten)]
        opts: RunOpts,
    },
}

impl DemoSubcommands {
    /// Execute the supplied demo subcommand
    pub fn execute(self) -> Result<()> {
        match self {
            Self::List => handle_demo_list_command(),
            Self::Info { name } => handle_demo_info_command(&name)?,
            Self::Extract { name, new_path } => {
                handle_demo_extract_command(&name, new_path.as_deref())?;
            }
            Self::Run { name, opts } => handle_demo_run_command(&name, &opts, None)?,
        }

        Ok(())
    }
}

/// Names of the bundled demos
pub fn demo_names() -> impl Iterator<Item = String> {
    DEMOS_DIR
        .dirs()
        .map(|dir| dir.path().display().to_string())
}

/// Handle the `demo list` command.
fn handle_demo_list_command() {
    for name in demo_names() {
        println!("{name}");
    }
}

/// Handle the `demo info` command.
fn handle_demo_info_command(name: &str) -> Result<()> {
    let path: PathBuf = [name, "README.txt"].iter().collect();
    let readme = DEMOS_DIR
        .get_file(path)
        .context("Demo not found.")?
        .contents_utf8()
        .context("README.txt is not UTF-8 encoded")?;

    println!("{readme}");

    Ok(())
}

/// Handle the `demo extract` command
fn handle_demo_extract_command(name: &str, dest: Option<&Path>) -> Result<()> {
    let dest = dest.unwrap_or(Path::new(name));
    extract_demo(name, dest)
}

/// Extract the specified demo to a new directory
pub fn extract_demo(name: &str, new_path: &Path) -> Result<()> {
    let sub_dir = DEMOS_DIR.get_dir(name).context("Demo not found.")?;

    ensure!(
        !new_path.exists(),
        "Destination directory {} already exists",
        new_path.display()
    );

    fs::create_dir(new_path)?;
    for entry in sub_dir.entries() {
        match entry {
            DirEntry::Dir(dir) => bail!(
                "Subdirectories in demos are not supported: {}",
                dir.path().display()
            ),
            DirEntry::File(file) => {
                let file_name = file
                    .path()
                    .file_name()
                    .context("Demo file without a name")?;
                fs::write(new_path.join(file_name), file.contents())?;
            }
        }
    }

    Ok(())
}

/// Handle the `demo run` command.
pub fn handle_demo_run_command(
    name: &str,
    opts: &RunOpts,
    settings: Option<Settings>,
) -> Result<()> {
    let temp_dir = TempDir::new().context("Failed to create temporary directory.")?;
    let model_path = temp_dir.path().join(name);
    extract_demo(name, &model_path)?;
    handle_run_command(&model_path, opts, settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_demo_names() {
        assert!(demo_names().any(|name| name == "single_node"));
    }

    #[test]
    fn test_extract_demo() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("single_node");
        extract_demo("single_node", &dest).unwrap();
        assert!(dest.join("model.toml").is_file());

        // Extracting again fails because the folder exists
        assert!(extract_demo("single_node", &dest).is_err());
    }

    #[test]
    fn test_extract_unknown_demo() {
        let dir = tempdir().unwrap();
        assert!(extract_demo("nonexistent", &dir.path().join("x")).is_err());
    }
}
