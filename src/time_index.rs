//! The sampled four-level calendar (year, day, hour, sub-hour) and the arithmetic for moving
//! between its steps.
//!
//! Each level has an "all" superset, against which input data are keyed, and a sampled subset,
//! which is what the model actually optimises over. Results for the sampled subset are scaled up to
//! the full horizon with the factors returned by [`TimeIndex::scale_y`] and friends.
use crate::model::CalendarParameters;
use anyhow::{Result, ensure};
use itertools::iproduct;
use serde::Serialize;

/// A single coordinate in the calendar
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, derive_more::Display,
)]
#[display("Y{year} D{day} H{hour} sH{sub_hour}")]
pub struct TimeStep {
    /// Year
    pub year: u32,
    /// Day of the year
    pub day: u32,
    /// Hour of the day
    pub hour: u32,
    /// Sub-hour of the hour
    pub sub_hour: u32,
}

impl TimeStep {
    /// Create a new [`TimeStep`]
    pub fn new(year: u32, day: u32, hour: u32, sub_hour: u32) -> Self {
        Self {
            year,
            day,
            hour,
            sub_hour,
        }
    }
}

/// Result of stepping backwards from a [`TimeStep`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PreviousStep {
    /// The previous step within the sampled calendar
    Step(TimeStep),
    /// The step lies before the first modelled year, so the start level of a storage applies
    BeforeStart,
}

/// The sampled calendar with its step sizes and scaling targets
#[derive(Debug, Clone, PartialEq)]
pub struct TimeIndex {
    /// Sampled years (sorted, unique)
    pub years: Vec<u32>,
    /// Sampled days (sorted, unique)
    pub days: Vec<u32>,
    /// Sampled hours (sorted, unique)
    pub hours: Vec<u32>,
    /// Sub-hours (sorted, unique)
    pub sub_hours: Vec<u32>,
    /// All years for which data may be supplied
    pub years_all: Vec<u32>,
    /// All days for which data may be supplied
    pub days_all: Vec<u32>,
    /// All hours for which data may be supplied
    pub hours_all: Vec<u32>,
    /// Step between consecutive years
    pub delta_y: u32,
    /// Step between consecutive days
    pub delta_d: u32,
    /// Step between consecutive hours
    pub delta_h: u32,
    /// Step between consecutive sub-hours
    pub delta_sh: u32,
    /// The first year of the project
    pub y_start: u32,
    /// Number of real years represented by the sampled years
    pub scale_y_to: u32,
    /// Number of real days in a year represented by the sampled days
    pub scale_d_to: u32,
    /// Number of real hours in a day represented by the sampled hours
    pub scale_h_to: u32,
}

/// Sort a set of calendar values, checking it is non-empty and has no duplicates
fn sorted_level(name: &str, values: &[u32]) -> Result<Vec<u32>> {
    ensure!(!values.is_empty(), "Calendar level '{name}' must not be empty");
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    ensure!(
        sorted.windows(2).all(|w| w[0] != w[1]),
        "Calendar level '{name}' contains duplicate entries"
    );
    Ok(sorted)
}

/// Number of entries in a calendar level as a float
#[allow(clippy::cast_precision_loss)]
fn level_len(values: &[u32]) -> f64 {
    values.len() as f64
}

/// Check that every sampled value is contained in the superset
fn check_subset(name: &str, sampled: &[u32], all: &[u32]) -> Result<()> {
    for value in sampled {
        ensure!(
            all.binary_search(value).is_ok(),
            "Sampled {name} {value} is not part of the full {name} set"
        );
    }
    Ok(())
}

impl TimeIndex {
    /// Build the calendar from the `[calendar]` section of `model.toml`
    pub fn new(params: &CalendarParameters) -> Result<Self> {
        let years = sorted_level("years", &params.years)?;
        let days = sorted_level("days", &params.days)?;
        let hours = sorted_level("hours", &params.hours)?;
        let sub_hours = sorted_level("sub_hours", &params.sub_hours)?;
        ensure!(years[0] >= 1, "Years are numbered from 1");

        // The supersets default to the sampled sets
        let years_all = sorted_level("years_all", params.years_all.as_deref().unwrap_or(&years))?;
        let days_all = sorted_level("days_all", params.days_all.as_deref().unwrap_or(&days))?;
        let hours_all = sorted_level("hours_all", params.hours_all.as_deref().unwrap_or(&hours))?;
        check_subset("year", &years, &years_all)?;
        check_subset("day", &days, &days_all)?;
        check_subset("hour", &hours, &hours_all)?;

        for (name, delta) in [
            ("delta_y", params.delta_y),
            ("delta_d", params.delta_d),
            ("delta_h", params.delta_h),
            ("delta_sh", params.delta_sh),
        ] {
            ensure!(delta > 0, "{name} must be greater than zero");
        }
        ensure!(
            params.scale_y_to as usize >= years.len(),
            "scale_y_to ({}) must be at least the number of sampled years ({})",
            params.scale_y_to,
            years.len()
        );
        ensure!(params.scale_d_to > 0, "scale_d_to must be greater than zero");
        ensure!(params.scale_h_to > 0, "scale_h_to must be greater than zero");

        Ok(Self {
            years,
            days,
            hours,
            sub_hours,
            years_all,
            days_all,
            hours_all,
            delta_y: params.delta_y,
            delta_d: params.delta_d,
            delta_h: params.delta_h,
            delta_sh: params.delta_sh,
            y_start: params.y_start,
            scale_y_to: params.scale_y_to,
            scale_d_to: params.scale_d_to,
            scale_h_to: params.scale_h_to,
        })
    }

    /// Real years represented by each sampled year
    pub fn scale_y(&self) -> f64 {
        f64::from(self.scale_y_to) / level_len(&self.years)
    }

    /// Whole real years represented by each sampled year (truncated)
    #[allow(clippy::cast_possible_truncation)]
    pub fn scale_y_int(&self) -> u32 {
        self.scale_y_to / self.years.len() as u32
    }

    /// Real days represented by each sampled day
    pub fn scale_d(&self) -> f64 {
        f64::from(self.scale_d_to) / level_len(&self.days)
    }

    /// Real hours represented by each sampled hour
    pub fn scale_h(&self) -> f64 {
        f64::from(self.scale_h_to) / level_len(&self.hours)
    }

    /// Length of one sub-hour step in hours
    pub fn delta_t(&self) -> f64 {
        1.0 / level_len(&self.sub_hours)
    }

    /// Factor converting a sum of power values over the steps of one year into annual energy
    pub fn annual_energy_factor(&self) -> f64 {
        self.delta_t() * self.scale_h() * self.scale_d()
    }

    /// The first sampled year
    pub fn first_year(&self) -> u32 {
        self.years[0]
    }

    /// The last sampled year
    pub fn last_year(&self) -> u32 {
        self.years[self.years.len() - 1]
    }

    /// The last sampled step of the calendar
    pub fn last_step(&self) -> TimeStep {
        TimeStep::new(
            self.last_year(),
            self.days[self.days.len() - 1],
            self.hours[self.hours.len() - 1],
            self.sub_hours[self.sub_hours.len() - 1],
        )
    }

    /// Number of steps in one sampled year
    pub fn steps_per_year(&self) -> usize {
        self.days.len() * self.hours.len() * self.sub_hours.len()
    }

    /// Iterate over every sampled step in chronological order
    pub fn steps(&self) -> impl Iterator<Item = TimeStep> + '_ {
        self.years
            .iter()
            .flat_map(move |&year| self.steps_in_year(year))
    }

    /// Iterate over the sampled steps of a single year
    pub fn steps_in_year(&self, year: u32) -> impl Iterator<Item = TimeStep> + '_ {
        iproduct!(&self.days, &self.hours, &self.sub_hours)
            .map(move |(&day, &hour, &sub_hour)| TimeStep::new(year, day, hour, sub_hour))
    }

    /// The sampled steps of a year at hourly resolution, with every sampled hour repeated
    /// `delta_h` times
    pub fn hourly_steps_in_year(&self, year: u32) -> impl Iterator<Item = TimeStep> + '_ {
        iproduct!(&self.days, &self.hours, 0..self.delta_h, &self.sub_hours)
            .map(move |(&day, &hour, _, &sub_hour)| TimeStep::new(year, day, hour, sub_hour))
    }

    /// Whether the step is part of the sampled calendar
    pub fn contains(&self, step: &TimeStep) -> bool {
        self.years.binary_search(&step.year).is_ok()
            && self.days.binary_search(&step.day).is_ok()
            && self.hours.binary_search(&step.hour).is_ok()
            && self.sub_hours.binary_search(&step.sub_hour).is_ok()
    }

    /// Step backwards by one sub-hour, wrapping at the sampled bounds.
    ///
    /// Wrapping below the first sub-hour moves to the last sub-hour of the previous hour, and so
    /// on up to the year level. Stepping before the start year (or the first sampled year) yields
    /// [`PreviousStep::BeforeStart`].
    ///
    /// # Returns
    ///
    /// An error if the resulting step is not part of the sampled calendar, which happens when the
    /// step sizes do not match the spacing of the sampled sets.
    pub fn step_back(&self, step: &TimeStep) -> Result<PreviousStep> {
        let mut sub_hour = i64::from(step.sub_hour) - i64::from(self.delta_sh);
        let mut hour = i64::from(step.hour);
        let mut day = i64::from(step.day);
        let mut year = i64::from(step.year);

        if sub_hour < i64::from(self.sub_hours[0]) {
            sub_hour = i64::from(self.sub_hours[self.sub_hours.len() - 1]);
            hour -= i64::from(self.delta_h);
            if hour < i64::from(self.hours[0]) {
                hour = i64::from(self.hours[self.hours.len() - 1]);
                day -= i64::from(self.delta_d);
                if day < i64::from(self.days[0]) {
                    day = i64::from(self.days[self.days.len() - 1]);
                    year -= i64::from(self.delta_y);
                }
            }
        }

        if year < i64::from(self.y_start) || year < i64::from(self.first_year()) {
            return Ok(PreviousStep::BeforeStart);
        }

        // All values are within the original u32 range at this point
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let previous = TimeStep::new(year as u32, day as u32, hour as u32, sub_hour as u32);
        ensure!(
            self.contains(&previous),
            "The step before {step} ({previous}) is not part of the sampled calendar; \
             check the calendar step sizes"
        );
        Ok(PreviousStep::Step(previous))
    }

    /// Step forward by one sub-hour for the rolling reserve look-ahead.
    ///
    /// Overflowing the last sampled year folds the year back to the smallest sampled *day* value,
    /// not to the first year. Callers look up data for the resulting coordinate with defaults, so
    /// the coordinate need not be part of the sampled calendar.
    pub fn roll_forward(&self, step: &TimeStep) -> TimeStep {
        let mut next = *step;
        next.sub_hour += self.delta_sh;
        if next.sub_hour > self.sub_hours[self.sub_hours.len() - 1] {
            next.sub_hour = self.sub_hours[0];
            next.hour += self.delta_h;
            if next.hour > self.hours[self.hours.len() - 1] {
                next.hour = self.hours[0];
                next.day += self.delta_d;
                if next.day > self.days[self.days.len() - 1] {
                    next.day = self.days[0];
                    next.year += self.delta_y;
                    if next.year > self.last_year() {
                        next.year = self.days[0];
                    }
                }
            }
        }

        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::calendar_params;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    fn index(years: Vec<u32>, days: Vec<u32>, hours: Vec<u32>, sub_hours: Vec<u32>) -> TimeIndex {
        let mut params = calendar_params();
        params.years = years;
        params.days = days;
        params.hours = hours;
        params.sub_hours = sub_hours;
        params.scale_y_to = 20;
        TimeIndex::new(&params).unwrap()
    }

    #[rstest]
    #[case(vec![1], 24, 365)]
    #[case(vec![1, 2, 3], 24, 365)]
    #[case(vec![1, 2, 3, 4, 5, 6, 7], 12, 7)]
    fn test_scaling_idempotence(#[case] days: Vec<u32>, #[case] n_hours: u32, #[case] d_to: u32) {
        let mut params = calendar_params();
        params.years = vec![1, 2, 3];
        params.scale_y_to = 20;
        params.days = days;
        params.hours = (1..=n_hours).collect();
        params.scale_d_to = d_to;
        let index = TimeIndex::new(&params).unwrap();

        assert_approx_eq!(f64, index.scale_y() * 3.0, 20.0, ulps = 2);
        assert_approx_eq!(
            f64,
            index.scale_d() * index.days.len() as f64,
            d_to as f64,
            ulps = 2
        );
        assert_approx_eq!(f64, index.scale_h() * n_hours as f64, 24.0, ulps = 2);
        assert_eq!(index.scale_y_int(), 6);
    }

    #[test]
    fn test_new_rejects_duplicates() {
        let mut params = calendar_params();
        params.hours = vec![1, 2, 2];
        assert!(TimeIndex::new(&params).is_err());
    }

    #[test]
    fn test_new_rejects_sample_outside_superset() {
        let mut params = calendar_params();
        params.days = vec![1, 5];
        params.days_all = Some(vec![1, 2, 3]);
        assert!(TimeIndex::new(&params).is_err());
    }

    #[test]
    fn test_steps_order() {
        let index = index(vec![1, 2], vec![1], vec![1, 2], vec![0]);
        let steps: Vec<_> = index.steps().collect();
        assert_eq!(
            steps,
            [
                TimeStep::new(1, 1, 1, 0),
                TimeStep::new(1, 1, 2, 0),
                TimeStep::new(2, 1, 1, 0),
                TimeStep::new(2, 1, 2, 0),
            ]
        );
    }

    #[rstest]
    #[case(TimeStep::new(1, 1, 2, 0), PreviousStep::Step(TimeStep::new(1, 1, 1, 0)))]
    #[case(TimeStep::new(1, 2, 1, 0), PreviousStep::Step(TimeStep::new(1, 1, 3, 0)))]
    #[case(TimeStep::new(2, 1, 1, 0), PreviousStep::Step(TimeStep::new(1, 2, 3, 0)))]
    #[case(TimeStep::new(1, 1, 1, 0), PreviousStep::BeforeStart)]
    fn test_step_back(#[case] step: TimeStep, #[case] expected: PreviousStep) {
        let index = index(vec![1, 2], vec![1, 2], vec![1, 2, 3], vec![0]);
        assert_eq!(index.step_back(&step).unwrap(), expected);
    }

    #[test]
    fn test_step_back_sub_hours() {
        let index = index(vec![1], vec![1], vec![1, 2], vec![0, 1, 2, 3]);
        assert_eq!(
            index.step_back(&TimeStep::new(1, 1, 2, 0)).unwrap(),
            PreviousStep::Step(TimeStep::new(1, 1, 1, 3))
        );
        assert_eq!(
            index.step_back(&TimeStep::new(1, 1, 2, 2)).unwrap(),
            PreviousStep::Step(TimeStep::new(1, 1, 2, 1))
        );
    }

    #[test]
    fn test_step_back_outside_sample() {
        // Days are sampled sparsely but the step size is one day
        let index = index(vec![1], vec![1, 8], vec![1], vec![0]);
        assert!(index.step_back(&TimeStep::new(1, 8, 1, 0)).is_err());
    }

    #[test]
    fn test_roll_forward_within_year() {
        let index = index(vec![1, 2], vec![1, 2], vec![1, 2], vec![0]);
        assert_eq!(
            index.roll_forward(&TimeStep::new(1, 1, 2, 0)),
            TimeStep::new(1, 2, 1, 0)
        );
        assert_eq!(
            index.roll_forward(&TimeStep::new(1, 2, 2, 0)),
            TimeStep::new(2, 1, 1, 0)
        );
    }

    #[test]
    fn test_roll_forward_past_last_year_folds_to_min_day() {
        // Days start at 5, so overflowing the last year gives year 5 (not the first year, 1)
        let index = index(vec![1, 2], vec![5, 6], vec![1, 2], vec![0]);
        assert_eq!(
            index.roll_forward(&TimeStep::new(2, 6, 2, 0)),
            TimeStep::new(5, 5, 1, 0)
        );
    }

    #[test]
    fn test_hourly_steps_repeat_sampled_hours() {
        let mut index = index(vec![1], vec![1], vec![1, 3], vec![0]);
        index.delta_h = 2;
        let steps: Vec<_> = index.hourly_steps_in_year(1).map(|step| step.hour).collect();
        assert_eq!(steps, [1, 1, 3, 3]);
    }
}
