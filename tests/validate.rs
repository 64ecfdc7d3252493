//! Integration tests for the `validate` command.
use enopt::cli::handle_validate_command;
use enopt::log::is_logger_initialised;
use enopt::settings::Settings;
use std::path::PathBuf;

/// Get the path to the demo model.
fn get_model_dir() -> PathBuf {
    PathBuf::from("demos/single_node")
}

/// An integration test for the `validate` command.
///
/// We also check that the logger is initialised after it is run.
#[test]
fn test_handle_validate_command() {
    unsafe { std::env::set_var("ENOPT_LOG_LEVEL", "off") };

    assert!(!is_logger_initialised());

    handle_validate_command(&get_model_dir(), Some(Settings::default())).unwrap();

    assert!(is_logger_initialised());

    // A second command cannot initialise logging again
    assert_eq!(
        handle_validate_command(&get_model_dir(), Some(Settings::default()))
            .unwrap_err()
            .to_string(),
        "Failed to initialise logging."
    );
}
