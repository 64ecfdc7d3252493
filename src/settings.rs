//! Code for loading program settings.
use crate::get_enopt_config_dir;
use crate::input::read_toml;
use crate::log::DEFAULT_LOG_LEVEL;
use anyhow::{Context, Result};
use documented::DocumentedFields;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::{Path, PathBuf};

const SETTINGS_FILE_NAME: &str = "settings.toml";

const DEFAULT_SETTINGS_FILE_HEADER: &str = "# Program settings for enopt
# Uncomment a line to change a setting from its default.
";

/// Default log level for program
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

/// Get the path to where the settings file will be read from
pub fn get_settings_file_path() -> PathBuf {
    let mut path = get_enopt_config_dir();
    path.push(SETTINGS_FILE_NAME);

    path
}

/// Program settings from config file
#[derive(Debug, DocumentedFields, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// The default program log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Whether to overwrite output folders by default
    #[serde(default)]
    pub overwrite: bool,
    /// Whether to write the number of variables and constraints of each family to lp_summary.csv
    #[serde(default)]
    pub write_lp_summary: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            overwrite: false,
            write_lp_summary: false,
        }
    }
}

impl Settings {
    /// Read the program settings file.
    ///
    /// If the file is not present, default values for settings will be used
    pub fn load() -> Result<Settings> {
        Self::load_from_path(&get_settings_file_path())
    }

    /// Read settings from the specified path, falling back to defaults if there is no file
    fn load_from_path(file_path: &Path) -> Result<Settings> {
        if !file_path.is_file() {
            return Ok(Settings::default());
        }

        read_toml(file_path)
    }

    /// The contents of the default settings file, with every setting commented out
    pub fn default_file_contents() -> Result<String> {
        let settings_raw =
            toml::to_string(&Settings::default()).context("Could not convert settings to TOML")?;

        // Comment out each line of the generated TOML, preceded by the field's docs
        let mut out = DEFAULT_SETTINGS_FILE_HEADER.to_string();
        for line in settings_raw.lines() {
            let Some(last) = line.find('=') else {
                continue;
            };

            let field = line[..last].trim();
            let docs = Settings::get_field_docs(field)
                .with_context(|| format!("Missing doc comment for setting {field}"))?;
            for doc_line in docs.lines() {
                write!(&mut out, "\n# # {}\n", doc_line.trim())?;
            }
            writeln!(&mut out, "# {}", line.trim())?;
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_settings_load_from_path_no_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join(SETTINGS_FILE_NAME); // NB: doesn't exist
        assert_eq!(
            Settings::load_from_path(&file_path).unwrap(),
            Settings::default()
        );
    }

    #[test]
    fn test_settings_load_from_path() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join(SETTINGS_FILE_NAME);

        {
            let mut file = File::create(&file_path).unwrap();
            writeln!(file, "log_level = \"warn\"").unwrap();
            writeln!(file, "write_lp_summary = true").unwrap();
        }

        assert_eq!(
            Settings::load_from_path(&file_path).unwrap(),
            Settings {
                log_level: "warn".to_string(),
                overwrite: false,
                write_lp_summary: true,
            }
        );
    }

    #[test]
    fn test_default_file_contents() {
        let contents = Settings::default_file_contents().unwrap();
        assert!(contents.contains("# log_level = \"info\""));
        assert!(contents.contains("# # Whether to overwrite output folders by default"));

        // Uncommenting every setting gives back the defaults
        let uncommented: String = contents
            .lines()
            .filter(|line| !line.starts_with("# #") && line.starts_with("# ") && line.contains('='))
            .map(|line| format!("{}\n", &line[2..]))
            .collect();
        let settings: Settings = toml::from_str(&uncommented).unwrap();
        assert_eq!(settings, Settings::default());
    }
}
