//! Code for writing information about a run and the program build to file
use anyhow::Result;
use chrono::prelude::*;
use platform_info::{PlatformInfo, PlatformInfoAPI, UNameAPI};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// The output file name for metadata
pub const METADATA_FILE_NAME: &str = "metadata.toml";

/// Information about the program build via `built` crate
mod built_info {
    // The file has been placed there by the build script.
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// The short git commit hash of the build, marked if the tree had local changes
fn git_hash() -> String {
    match (built_info::GIT_COMMIT_HASH_SHORT, built_info::GIT_DIRTY) {
        (None, _) => "unknown".into(),
        (Some(hash), Some(true)) => format!("{hash}-dirty"),
        (Some(hash), _) => hash.into(),
    }
}

#[derive(Serialize)]
struct Metadata<'a> {
    run: RunMetadata<'a>,
    program: ProgramMetadata,
    /// Absent when the platform cannot be queried
    platform: Option<PlatformMetadata>,
}

/// Information about the scenario run
#[derive(Serialize)]
struct RunMetadata<'a> {
    /// Path to the scenario input folder
    model_path: &'a Path,
    /// When the report was written
    datetime: String,
}

/// Information about the enopt build
#[derive(Serialize)]
struct ProgramMetadata {
    name: &'static str,
    version: &'static str,
    target: &'static str,
    is_debug: bool,
    rustc_version: &'static str,
    build_time_utc: &'static str,
    git_commit_hash: String,
}

impl ProgramMetadata {
    fn new() -> Self {
        Self {
            name: built_info::PKG_NAME,
            version: built_info::PKG_VERSION,
            target: built_info::TARGET,
            is_debug: built_info::DEBUG,
            rustc_version: built_info::RUSTC_VERSION,
            build_time_utc: built_info::BUILT_TIME_UTC,
            git_commit_hash: git_hash(),
        }
    }
}

/// The operating system the scenario was solved on, as reported by [`PlatformInfo`]
#[derive(Serialize)]
struct PlatformMetadata {
    sysname: String,
    nodename: String,
    release: String,
    version: String,
    machine: String,
    osname: String,
}

impl PlatformMetadata {
    fn query() -> Option<Self> {
        let info = PlatformInfo::new().ok()?;
        Some(Self {
            sysname: info.sysname().to_string_lossy().into(),
            nodename: info.nodename().to_string_lossy().into(),
            release: info.release().to_string_lossy().into(),
            version: info.version().to_string_lossy().into(),
            machine: info.machine().to_string_lossy().into(),
            osname: info.osname().to_string_lossy().into(),
        })
    }
}

/// Write metadata for the scenario at `model_path` into `output_dir` in TOML format
pub fn write_metadata(output_dir: &Path, model_path: &Path) -> Result<()> {
    let metadata = Metadata {
        run: RunMetadata {
            model_path,
            datetime: Local::now().to_rfc2822(),
        },
        program: ProgramMetadata::new(),
        platform: PlatformMetadata::query(),
    };
    fs::write(output_dir.join(METADATA_FILE_NAME), toml::to_string(&metadata)?)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_metadata() {
        let dir = tempdir().unwrap();
        write_metadata(dir.path(), Path::new("demos/single_node")).unwrap();

        let contents = fs::read_to_string(dir.path().join(METADATA_FILE_NAME)).unwrap();
        let value: toml::Table = toml::from_str(&contents).unwrap();
        assert_eq!(value["program"]["name"].as_str(), Some("enopt"));
        assert_eq!(
            value["run"]["model_path"].as_str(),
            Some("demos/single_node")
        );
    }
}
