//! The `log` module provides initialisation and configuration of the application's logging system.
//!
//! Messages go to the terminal, coloured when it supports it, and optionally to log files in the
//! output folder. The level can be set with an environment variable.
use anyhow::{Result, bail};
use chrono::Local;
use fern::colors::{Color, ColoredLevelConfig};
use fern::{Dispatch, FormatCallback};
use log::{LevelFilter, Record};
use std::env;
use std::fmt::{Arguments, Display};
use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::OnceLock;

/// The level the logger was initialised with
static LOGGER_LEVEL: OnceLock<LevelFilter> = OnceLock::new();

/// The environment variable overriding the log level
const LOG_LEVEL_ENV_VAR: &str = "ENOPT_LOG_LEVEL";

/// The default log level for the program.
///
/// Used as a fallback if the user hasn't specified something else with the `ENOPT_LOG_LEVEL`
/// environment variable or the settings.toml file.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// The file name for the log file containing messages about the ordinary operation of enopt
const LOG_INFO_FILE_NAME: &str = "enopt_info.log";

/// The file name for the log file containing warnings and error messages
const LOG_ERROR_FILE_NAME: &str = "enopt_error.log";

/// Whether the program logger has been initialised
pub fn is_logger_initialised() -> bool {
    LOGGER_LEVEL.get().is_some()
}

/// Whether logging is switched off, either explicitly or by the environment variable.
///
/// Before the logger is initialised, only the environment variable is consulted.
pub fn log_level_is_off() -> bool {
    match LOGGER_LEVEL.get() {
        Some(level) => *level == LevelFilter::Off,
        None => env::var(LOG_LEVEL_ENV_VAR).is_ok_and(|level| level.eq_ignore_ascii_case("off")),
    }
}

/// Parse a log level name
fn parse_level(level: &str) -> Result<LevelFilter> {
    let level = match level.to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        unknown => bail!("Unknown log level: {unknown}"),
    };

    Ok(level)
}

/// Initialise the program logger using the `fern` logging library with colourised output.
///
/// The user can specify their preferred logging level via the `settings.toml` file (defaulting to
/// `info` if not present) or with the `ENOPT_LOG_LEVEL` environment variable. If both are
/// provided, the environment variable takes precedence.
///
/// Possible log level options are `off`, `error`, `warn`, `info`, `debug` and `trace`.
///
/// # Arguments
///
/// * `log_level_from_settings`: The log level specified in `settings.toml`
/// * `log_file_path`: The location to save log files (if Some, log files will be created)
pub fn init(log_level_from_settings: Option<&str>, log_file_path: Option<&Path>) -> Result<()> {
    if is_logger_initialised() {
        bail!("Logger already initialised");
    }

    let log_level = env::var(LOG_LEVEL_ENV_VAR).unwrap_or_else(|_| {
        log_level_from_settings
            .unwrap_or(DEFAULT_LOG_LEVEL)
            .to_string()
    });
    let log_level = parse_level(&log_level)?;

    let colours = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::Magenta);

    // Automatically apply colours only if the output is a terminal
    let use_colour_stdout = std::io::stdout().is_terminal();
    let use_colour_stderr = std::io::stderr().is_terminal();

    let mut dispatch = Dispatch::new()
        .chain(
            // Write non-error messages to stdout
            Dispatch::new()
                .filter(|metadata| metadata.level() > LevelFilter::Warn)
                .format(move |out, message, record| {
                    write_log_colour(out, message, record, use_colour_stdout, &colours);
                })
                .level(log_level)
                .chain(std::io::stdout()),
        )
        .chain(
            // Write warnings and errors to stderr
            Dispatch::new()
                .format(move |out, message, record| {
                    write_log_colour(out, message, record, use_colour_stderr, &colours);
                })
                .level(log_level.min(LevelFilter::Warn))
                .chain(std::io::stderr()),
        );

    if let Some(log_file_path) = log_file_path {
        let new_log_file = |file_name| {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(log_file_path.join(file_name))
        };

        dispatch = dispatch
            .chain(
                Dispatch::new()
                    .filter(|metadata| metadata.level() > LevelFilter::Warn)
                    .format(write_log_plain)
                    .level(log_level.max(LevelFilter::Info))
                    .chain(new_log_file(LOG_INFO_FILE_NAME)?),
            )
            .chain(
                Dispatch::new()
                    .format(write_log_plain)
                    .level(LevelFilter::Warn)
                    .chain(new_log_file(LOG_ERROR_FILE_NAME)?),
            );
    }

    dispatch.apply()?;
    if LOGGER_LEVEL.set(log_level).is_err() {
        bail!("Logger already initialised");
    }

    Ok(())
}

/// Write to the log in the format we want for enopt
fn write_log<T: Display>(out: FormatCallback, level: T, target: &str, message: &Arguments) {
    let timestamp = Local::now().format("%H:%M:%S");

    out.finish(format_args!("[{timestamp} {level} {target}] {message}"));
}

/// Write to the log with no colours
fn write_log_plain(out: FormatCallback, message: &Arguments, record: &Record) {
    write_log(out, record.level(), record.target(), message);
}

/// Write to the log with optional colours
fn write_log_colour(
    out: FormatCallback,
    message: &Arguments,
    record: &Record,
    use_colour: bool,
    colours: &ColoredLevelConfig,
) {
    if use_colour {
        write_log(out, colours.color(record.level()), record.target(), message);
    } else {
        write_log_plain(out, message, record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("off", LevelFilter::Off)]
    #[case("WARN", LevelFilter::Warn)]
    #[case("Info", LevelFilter::Info)]
    #[case("trace", LevelFilter::Trace)]
    fn test_parse_level(#[case] name: &str, #[case] expected: LevelFilter) {
        assert_eq!(parse_level(name).unwrap(), expected);
    }

    #[test]
    fn test_parse_level_unknown() {
        assert!(parse_level("loud").is_err());
    }
}
