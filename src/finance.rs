//! Discounting of annual cost and revenue streams to present values.
//!
//! Each sampled year stands for several real years. Investment-like streams are discounted once at
//! the real-time position of their sampled year, while operational streams are charged in every real
//! year the sampled year represents. Real years lost to integer truncation of the year scale are
//! charged at the last sampled year's value.
use crate::time_index::TimeIndex;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::hash::Hash;
use std::ops::{AddAssign, Mul};

/// How a cost stream is discounted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostKind {
    /// Charged once per sampled year, at the start of the period it represents
    Capex,
    /// Charged in every real year represented by a sampled year
    Opex,
}

/// A value which can be discounted: plain numbers, or linear expressions of decision variables
pub trait Discountable: Default + AddAssign + Mul<f64, Output = Self> {}
impl<T> Discountable for T where T: Default + AddAssign + Mul<f64, Output = Self> {}

/// Present-value weights for every sampled year
#[derive(Debug, Clone, PartialEq)]
pub struct Discounting {
    capex: HashMap<u32, f64>,
    opex: HashMap<u32, f64>,
}

impl Discounting {
    /// Precompute the discount weights of every sampled year.
    ///
    /// # Arguments
    ///
    /// * `time` - The sampled calendar
    /// * `rate` - Discount rate
    /// * `capex_offset` - Offset in years at which investment costs are charged
    /// * `opex_offset` - Offset in years at which operational costs are charged
    pub fn new(time: &TimeIndex, rate: f64, capex_offset: f64, opex_offset: f64) -> Self {
        let factor = 1.0 / (1.0 + rate);
        let scale_y = time.scale_y();
        let scale_y_int = time.scale_y_int();
        let last_year = time.last_year();

        #[allow(clippy::cast_possible_truncation)]
        let considered = time.years.len() as u32 * scale_y_int;
        let tail: f64 = (0..time.scale_y_to.saturating_sub(considered))
            .map(|i| {
                factor.powf(f64::from(time.scale_y_to) - f64::from(i) - (1.0 - opex_offset))
            })
            .sum();

        let mut capex = HashMap::new();
        let mut opex = HashMap::new();
        for &year in &time.years {
            let position = f64::from(year - 1);
            capex.insert(year, factor.powf(position * scale_y + capex_offset));

            let mut weight: f64 = (0..scale_y_int)
                .map(|y2| {
                    factor.powf(
                        f64::from(y2) + opex_offset + f64::from(year - 1) * f64::from(scale_y_int),
                    )
                })
                .sum();
            if year == last_year {
                weight += tail;
            }
            opex.insert(year, weight);
        }

        Self { capex, opex }
    }

    /// The present-value weight of one unit charged in a sampled year
    pub fn weight(&self, kind: CostKind, year: u32) -> f64 {
        let weights = match kind {
            CostKind::Capex => &self.capex,
            CostKind::Opex => &self.opex,
        };

        weights.get(&year).copied().unwrap_or(0.0)
    }

    /// Discount an annual stream over the given years.
    ///
    /// `value` supplies the stream's annual value for each year; any extra index dimensions of the
    /// stream are summed inside `value`.
    pub fn discount<T, I, F>(&self, kind: CostKind, years: I, mut value: F) -> T
    where
        T: Discountable,
        I: IntoIterator<Item = u32>,
        F: FnMut(u32) -> T,
    {
        let mut total = T::default();
        for year in years {
            total += value(year) * self.weight(kind, year);
        }

        total
    }

    /// Discount a stream with extra index dimensions, grouping the results.
    ///
    /// `group` maps each key of the stream to the key of its group and its year.
    pub fn discount_grouped<K, G, T, F>(
        &self,
        kind: CostKind,
        stream: &IndexMap<K, T>,
        mut group: F,
    ) -> IndexMap<G, T>
    where
        G: Eq + Hash,
        T: Discountable + Clone,
        F: FnMut(&K) -> (G, u32),
    {
        let mut totals: IndexMap<G, T> = IndexMap::new();
        for (key, value) in stream {
            let (group_key, year) = group(key);
            *totals.entry(group_key).or_default() += value.clone() * self.weight(kind, year);
        }

        totals
    }

    /// Discount a stream with extra index dimensions to a single present value
    pub fn discount_total<K, T, F>(&self, kind: CostKind, stream: &IndexMap<K, T>, year_of: F) -> T
    where
        T: Discountable + Clone,
        F: Fn(&K) -> u32,
    {
        self.discount_grouped(kind, stream, |key| ((), year_of(key)))
            .swap_remove(&())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CalendarParameters;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    fn time(years: Vec<u32>, scale_y_to: u32) -> TimeIndex {
        TimeIndex::new(&CalendarParameters {
            years,
            scale_y_to,
            ..CalendarParameters::default()
        })
        .unwrap()
    }

    #[test]
    fn test_zero_rate_counts_real_years() {
        let time = time(vec![1, 2], 5);
        let discounting = Discounting::new(&time, 0.0, 0.0, 1.0);

        // Capex is charged once per sampled year
        assert_approx_eq!(f64, discounting.weight(CostKind::Capex, 1), 1.0);
        assert_approx_eq!(f64, discounting.weight(CostKind::Capex, 2), 1.0);

        // Opex: two real years each, plus one truncated year charged at the last sampled year
        assert_approx_eq!(f64, discounting.weight(CostKind::Opex, 1), 2.0);
        assert_approx_eq!(f64, discounting.weight(CostKind::Opex, 2), 3.0);
    }

    #[test]
    fn test_capex_weights() {
        let time = time(vec![1, 2], 10);
        let discounting = Discounting::new(&time, 0.1, 0.0, 1.0);
        assert_approx_eq!(f64, discounting.weight(CostKind::Capex, 1), 1.0);
        assert_approx_eq!(
            f64,
            discounting.weight(CostKind::Capex, 2),
            1.1_f64.powi(-5),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_opex_weights_single_year() {
        let time = time(vec![1], 3);
        let discounting = Discounting::new(&time, 0.1, 0.0, 1.0);
        let expected = 1.1_f64.powi(-1) + 1.1_f64.powi(-2) + 1.1_f64.powi(-3);
        assert_approx_eq!(
            f64,
            discounting.weight(CostKind::Opex, 1),
            expected,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_opex_tail_years() {
        // Two sampled years standing for five real years: years 1-2, 3-4 and the truncated year 5
        let time = time(vec![1, 2], 5);
        let discounting = Discounting::new(&time, 0.1, 0.0, 1.0);
        let r = |exp: i32| 1.1_f64.powi(-exp);
        assert_approx_eq!(
            f64,
            discounting.weight(CostKind::Opex, 1),
            r(1) + r(2),
            epsilon = 1e-12
        );
        assert_approx_eq!(
            f64,
            discounting.weight(CostKind::Opex, 2),
            r(3) + r(4) + r(5),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_discount_generic_over_dimensions() {
        let time = time(vec![1, 2], 2);
        let discounting = Discounting::new(&time, 0.0, 0.0, 1.0);
        let costs: HashMap<(&str, u32), f64> =
            [(("a", 1), 1.0), (("a", 2), 2.0), (("b", 2), 4.0)].into();

        let total: f64 = discounting.discount(CostKind::Opex, time.years.clone(), |year| {
            ["a", "b"]
                .iter()
                .map(|id| costs.get(&(*id, year)).copied().unwrap_or(0.0))
                .sum()
        });
        assert_approx_eq!(f64, total, 7.0);

        // Unsampled years have no weight
        assert_eq!(discounting.weight(CostKind::Opex, 3), 0.0);
    }

    #[test]
    fn test_discount_grouped() {
        let time = time(vec![1, 2], 4);
        let discounting = Discounting::new(&time, 0.0, 0.0, 1.0);
        let stream: IndexMap<(&str, u32), f64> =
            [(("a", 1), 1.0), (("a", 2), 2.0), (("b", 2), 4.0)]
                .into_iter()
                .collect();

        let capex = discounting.discount_grouped(CostKind::Capex, &stream, |(id, year)| (*id, *year));
        assert_approx_eq!(f64, capex[&"a"], 3.0);
        assert_approx_eq!(f64, capex[&"b"], 4.0);

        // Each sampled year stands for two real years of operation
        let opex = discounting.discount_total(CostKind::Opex, &stream, |(_, year)| *year);
        assert_approx_eq!(f64, opex, 14.0);
    }

    #[rstest]
    #[case(CostKind::Capex)]
    #[case(CostKind::Opex)]
    fn test_discount_decreases_with_rate(#[case] kind: CostKind) {
        let time = time(vec![1, 3, 5], 20);
        let present_value = |rate: f64| -> f64 {
            Discounting::new(&time, rate, 0.0, 1.0).discount(kind, time.years.clone(), |_| 100.0)
        };

        let values: Vec<f64> = [0.0, 0.02, 0.05, 0.1, 0.2]
            .into_iter()
            .map(present_value)
            .collect();
        assert!(values.windows(2).all(|pair| pair[1] < pair[0]));
    }
}
