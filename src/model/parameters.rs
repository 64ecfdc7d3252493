//! Read and validate model parameters from `model.toml`.
//!
//! This holds the global switches, scalar costs and calendar of a model, along with the settings
//! for post-processing (discounting offsets, LCOE iteration bounds and the unit conversion table).
use crate::input::{input_err_msg, is_sorted_and_unique, read_toml};
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use log::warn;
use serde::Deserialize;
use serde_string_enum::DeserializeLabeledStringEnum;
use std::path::Path;

const MODEL_PARAMETERS_FILE_NAME: &str = "model.toml";

macro_rules! define_param_default {
    ($name:ident, $type: ty, $value: expr) => {
        fn $name() -> $type {
            $value
        }
    };
}

define_param_default!(default_true, bool, true);
define_param_default!(default_one, u32, 1);
define_param_default!(default_years, Vec<u32>, vec![1]);
define_param_default!(default_days, Vec<u32>, vec![1]);
define_param_default!(default_hours, Vec<u32>, (1..=24).collect());
define_param_default!(default_sub_hours, Vec<u32>, vec![0]);
define_param_default!(default_scale_d_to, u32, 365);
define_param_default!(default_scale_h_to, u32, 24);
define_param_default!(default_electricity_fuel, String, "Electricity".to_string());
define_param_default!(default_zero_threshold, f64, 1e-6);
define_param_default!(default_lcoe_min_iterations, u32, 4);
define_param_default!(default_lcoe_max_iterations, u32, 20);
define_param_default!(default_capex_discount_offset, f64, 0.0);
define_param_default!(default_opex_discount_offset, f64, 1.0);

/// The solvers which can be used for the optimisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, DeserializeLabeledStringEnum)]
pub enum SolverName {
    /// The HiGHS solver
    #[default]
    #[string = "highs"]
    Highs,
}

/// Conversion of a fuel's base unit into the unit used for reporting prices and energy totals
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UnitConversion {
    /// The unit reported values are expressed in
    pub new_unit: String,
    /// Factor converting a quantity in the base unit into the new unit
    pub factor: f64,
}

impl UnitConversion {
    fn new(new_unit: &str, factor: f64) -> Self {
        Self {
            new_unit: new_unit.to_string(),
            factor,
        }
    }
}

/// The unit conversion table used when none is given in `model.toml`
pub fn default_unit_conversion() -> IndexMap<String, UnitConversion> {
    [
        ("kW", UnitConversion::new("MW", 1.0 / 1000.0)),
        ("kW_th", UnitConversion::new("MW_th", 1.0 / 1000.0)),
        ("kWh", UnitConversion::new("MWh", 1.0 / 1000.0)),
        ("kWh_th", UnitConversion::new("MWh_th", 1.0 / 1000.0)),
        ("kg", UnitConversion::new("t", 1.0 / 1000.0)),
        ("h", UnitConversion::new("d", 1.0 / 24.0)),
        ("d", UnitConversion::new("a", 1.0 / 365.0)),
        ("m3", UnitConversion::new("Ml", 1.0 / 1000.0)),
    ]
    .into_iter()
    .map(|(unit, conv)| (unit.to_string(), conv))
    .collect()
}

/// The `[calendar]` section of `model.toml`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CalendarParameters {
    /// Sampled years (1-based)
    #[serde(default = "default_years")]
    pub years: Vec<u32>,
    /// Sampled days
    #[serde(default = "default_days")]
    pub days: Vec<u32>,
    /// Sampled hours
    #[serde(default = "default_hours")]
    pub hours: Vec<u32>,
    /// Sub-hours of each hour
    #[serde(default = "default_sub_hours")]
    pub sub_hours: Vec<u32>,
    /// All years for which input data may be given (defaults to `years`)
    pub years_all: Option<Vec<u32>>,
    /// All days for which input data may be given (defaults to `days`)
    pub days_all: Option<Vec<u32>>,
    /// All hours for which input data may be given (defaults to `hours`)
    pub hours_all: Option<Vec<u32>>,
    /// Step between sampled years
    #[serde(default = "default_one")]
    pub delta_y: u32,
    /// Step between sampled days
    #[serde(default = "default_one")]
    pub delta_d: u32,
    /// Step between sampled hours
    #[serde(default = "default_one")]
    pub delta_h: u32,
    /// Step between sub-hours
    #[serde(default = "default_one")]
    pub delta_sh: u32,
    /// First year of the project
    #[serde(default = "default_one")]
    pub y_start: u32,
    /// Number of real years the sampled years represent
    #[serde(default = "default_one")]
    pub scale_y_to: u32,
    /// Number of real days per year the sampled days represent
    #[serde(default = "default_scale_d_to")]
    pub scale_d_to: u32,
    /// Number of real hours per day the sampled hours represent
    #[serde(default = "default_scale_h_to")]
    pub scale_h_to: u32,
}

impl Default for CalendarParameters {
    fn default() -> Self {
        Self {
            years: default_years(),
            days: default_days(),
            hours: default_hours(),
            sub_hours: default_sub_hours(),
            years_all: None,
            days_all: None,
            hours_all: None,
            delta_y: 1,
            delta_d: 1,
            delta_h: 1,
            delta_sh: 1,
            y_start: 1,
            scale_y_to: 1,
            scale_d_to: default_scale_d_to(),
            scale_h_to: default_scale_h_to(),
        }
    }
}

/// Model parameters as defined in the `model.toml` file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelParameters {
    /// The model calendar
    #[serde(default)]
    pub calendar: CalendarParameters,
    /// Whether slack variables are added to the fuel balances
    #[serde(default = "default_true")]
    pub slack_switch: bool,
    /// Whether capacity additions must be whole multiples of the unit capacity
    #[serde(default)]
    pub unit_cap_switch: bool,
    /// Whether firm capacity must cover the peak electricity demand
    #[serde(default = "default_true")]
    pub cap_switch: bool,
    /// Discount rate applied to all cost streams
    #[serde(default)]
    pub discount_rate: f64,
    /// Lump-sum investment subsidy (zero or negative)
    #[serde(default)]
    pub subsidy_capex: f64,
    /// Share of investment costs of subsidised technologies paid as subsidy (zero or negative)
    #[serde(default)]
    pub subsidy_share: f64,
    /// Project margin charged per unit of added (non-storage) capacity
    #[serde(default)]
    pub project_margin_spec: f64,
    /// Tax rate applied to operational costs
    #[serde(default)]
    pub taxes: f64,
    /// System investment costs as a share of the investment in hydrogen-system technologies
    #[serde(default)]
    pub capex_system_share: f64,
    /// System operational costs as a share of the system investment costs
    #[serde(default)]
    pub opex_system_share: f64,
    /// Name of the fuel representing electricity
    #[serde(default = "default_electricity_fuel")]
    pub electricity_fuel: String,
    /// Values below this are treated as zero when post-processing
    #[serde(default = "default_zero_threshold")]
    pub zero_threshold: f64,
    /// Minimum number of LCOE iterations
    #[serde(default = "default_lcoe_min_iterations")]
    pub lcoe_min_iterations: u32,
    /// Maximum number of LCOE iterations
    #[serde(default = "default_lcoe_max_iterations")]
    pub lcoe_max_iterations: u32,
    /// Offset (in years) at which investment costs are discounted
    #[serde(default = "default_capex_discount_offset")]
    pub capex_discount_offset: f64,
    /// Offset (in years) at which operational costs are discounted
    #[serde(default = "default_opex_discount_offset")]
    pub opex_discount_offset: f64,
    /// The solver to use
    #[serde(default)]
    pub solver: SolverName,
    /// Table of unit conversions, keyed by base unit
    #[serde(default = "default_unit_conversion")]
    pub unit_conversion: IndexMap<String, UnitConversion>,
}

impl Default for ModelParameters {
    fn default() -> Self {
        toml::from_str("").expect("Empty model parameters should deserialise with defaults")
    }
}

/// Check that a value is finite and not negative
fn check_non_negative(name: &str, value: f64) -> Result<()> {
    ensure!(
        value.is_finite() && value >= 0.0,
        "{name} must be a finite number greater than or equal to zero"
    );

    Ok(())
}

/// Check that a value is finite and not positive
fn check_non_positive(name: &str, value: f64) -> Result<()> {
    ensure!(
        value.is_finite() && value <= 0.0,
        "{name} must be a finite number less than or equal to zero"
    );

    Ok(())
}

/// Check that the sampled sets of the calendar are valid
fn check_calendar(calendar: &CalendarParameters) -> Result<()> {
    for (name, values) in [
        ("years", &calendar.years),
        ("days", &calendar.days),
        ("hours", &calendar.hours),
        ("sub_hours", &calendar.sub_hours),
    ] {
        ensure!(!values.is_empty(), "calendar.{name} is empty");
        ensure!(
            is_sorted_and_unique(values),
            "calendar.{name} must be composed of unique values in order"
        );
    }
    ensure!(
        calendar.years[0] >= 1,
        "calendar.years are 1-based and must start at 1 or later"
    );

    Ok(())
}

/// Check the LCOE iteration bounds
fn check_lcoe_iterations(min: u32, max: u32) -> Result<()> {
    ensure!(max > 0, "lcoe_max_iterations cannot be zero");
    ensure!(
        min <= max,
        "lcoe_min_iterations ({min}) cannot exceed lcoe_max_iterations ({max})"
    );

    Ok(())
}

impl ModelParameters {
    /// Read a model file from the specified directory.
    ///
    /// # Arguments
    ///
    /// * `model_dir` - Folder containing model configuration files
    ///
    /// # Returns
    ///
    /// The model file contents as a [`ModelParameters`] struct or an error if the file is invalid
    /// or missing
    pub fn from_path<P: AsRef<Path>>(model_dir: P) -> Result<ModelParameters> {
        let file_path = model_dir.as_ref().join(MODEL_PARAMETERS_FILE_NAME);
        let model_params: ModelParameters = read_toml(&file_path)?;

        model_params
            .validate()
            .with_context(|| input_err_msg(file_path))?;

        Ok(model_params)
    }

    /// Validate parameters after reading in file
    fn validate(&self) -> Result<()> {
        check_calendar(&self.calendar)?;
        check_non_negative("discount_rate", self.discount_rate)?;
        check_non_positive("subsidy_capex", self.subsidy_capex)?;
        check_non_positive("subsidy_share", self.subsidy_share)?;
        check_non_negative("project_margin_spec", self.project_margin_spec)?;
        check_non_negative("taxes", self.taxes)?;
        check_non_negative("capex_system_share", self.capex_system_share)?;
        check_non_negative("opex_system_share", self.opex_system_share)?;
        ensure!(
            self.zero_threshold > 0.0 && self.zero_threshold.is_finite(),
            "zero_threshold must be a finite number greater than zero"
        );
        check_lcoe_iterations(self.lcoe_min_iterations, self.lcoe_max_iterations)?;

        for (unit, conv) in &self.unit_conversion {
            ensure!(
                conv.factor.is_finite() && conv.factor > 0.0,
                "Conversion factor for unit {unit} must be a finite number greater than zero"
            );
        }

        if !self.slack_switch {
            warn!("Slack variables are disabled: unbalanced fuels will make the model infeasible");
        }

        Ok(())
    }

    /// Get the conversion for a base unit
    pub fn unit_conversion(&self, unit: &str) -> Result<&UnitConversion> {
        self.unit_conversion
            .get(unit)
            .with_context(|| format!("No unit conversion defined for unit {unit}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let params = ModelParameters::default();
        assert!(params.slack_switch);
        assert!(params.cap_switch);
        assert!(!params.unit_cap_switch);
        assert_eq!(params.calendar.hours.len(), 24);
        assert_eq!(params.calendar.scale_d_to, 365);
        assert_eq!(params.lcoe_min_iterations, 4);
        assert_eq!(params.lcoe_max_iterations, 20);
        assert_eq!(params.electricity_fuel, "Electricity");
        assert_eq!(params.unit_conversion["kWh"].new_unit, "MWh");
        assert_eq!(params.solver, SolverName::Highs);
    }

    #[test]
    fn test_model_params_from_path() {
        let dir = tempdir().unwrap();
        {
            let mut file = File::create(dir.path().join(MODEL_PARAMETERS_FILE_NAME)).unwrap();
            writeln!(
                file,
                "discount_rate = 0.05\ncap_switch = false\n\n[calendar]\nyears = [1, 2]\nscale_y_to = 20"
            )
            .unwrap();
        }

        let params = ModelParameters::from_path(dir.path()).unwrap();
        assert_eq!(params.discount_rate, 0.05);
        assert!(!params.cap_switch);
        assert_eq!(params.calendar.years, [1, 2]);
        assert_eq!(params.calendar.scale_y_to, 20);
    }

    #[test]
    fn test_model_params_from_path_missing_file() {
        let dir = tempdir().unwrap();
        assert!(ModelParameters::from_path(dir.path()).is_err());
    }

    #[rstest]
    #[case("subsidy_capex = 10.0")]
    #[case("subsidy_share = 0.5")]
    #[case("discount_rate = -0.1")]
    #[case("taxes = -1.0")]
    #[case("lcoe_min_iterations = 5\nlcoe_max_iterations = 2")]
    #[case("zero_threshold = 0.0")]
    #[case("[calendar]\nhours = [2, 1]")]
    #[case("[calendar]\nyears = [0]")]
    fn test_invalid_params(#[case] contents: &str) {
        let params: ModelParameters = toml::from_str(contents).unwrap();
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_unit_conversion_lookup() {
        let params = ModelParameters::default();
        assert_eq!(params.unit_conversion("kg").unwrap().factor, 1.0 / 1000.0);
        assert!(params.unit_conversion("furlong").is_err());
    }
}
