//! Descriptive statistics over a slice of a plant partition.
//!
//! Quantiles use the empirical (no interpolation) definition: with the
//! samples sorted ascending, quantile `p` is the element at index
//! `ceil(p * n) - 1`, clamped to `[0, n - 1]`. The median is quantile 0.5.
//!
//! Empty input yields `NaN` for every scalar, which serializes as JSON
//! `null`, together with `sampleSize: 0`.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::AppResult;
use crate::metrics;
use crate::models::{Measurement, PartitionName};
use crate::store::PartitionStore;

/// Multiplier applied to the IQR for the outlier fences.
pub const OUTLIER_FENCE: f64 = 1.5;

/// Summary of one numeric channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatistics {
    pub mean: f64,
    pub variance: f64,
    pub median: f64,
    pub standard_deviation: f64,
    pub skewness: f64,
    #[serde(flatten)]
    pub quantiles: QuantileSummary,
    pub sample_size: usize,
}

/// Quantiles, IQR fences and the values outside them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantileSummary {
    pub quantile25: f64,
    pub quantile75: f64,
    pub quantile90: f64,
    pub quantile95: f64,
    pub interquartile_range: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    /// Ascending
    pub outliers: Vec<f64>,
}

/// Statistics response for one plant and time range.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsReport {
    pub power_output: ChannelStatistics,
    pub solar_radiation: ChannelStatistics,
    pub correlation_power_solar: f64,
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance (divides by `n`).
pub fn variance(values: &[f64]) -> f64 {
    central_moment(values, 2)
}

pub fn standard_deviation(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Fisher-Pearson coefficient of skewness `m3 / m2^1.5`.
///
/// `NaN` when fewer than two samples or when all samples are equal.
pub fn skewness(values: &[f64]) -> f64 {
    let m2 = central_moment(values, 2);
    if values.len() < 2 || m2 == 0.0 {
        return f64::NAN;
    }
    central_moment(values, 3) / m2.powf(1.5)
}

fn central_moment(values: &[f64], order: i32) -> f64 {
    let mu = mean(values);
    if mu.is_nan() {
        return f64::NAN;
    }
    values.iter().map(|v| (v - mu).powi(order)).sum::<f64>() / values.len() as f64
}

/// Empirical quantile of an ascending slice.
pub fn empirical_quantile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let rank = (p * n as f64).ceil() as usize;
    let index = rank.saturating_sub(1).min(n - 1);
    sorted.get(index).copied().unwrap_or(f64::NAN)
}

/// Quantiles, IQR and outliers; the result does not depend on input order.
pub fn quantile_summary(values: &[f64]) -> QuantileSummary {
    let sorted = sorted_copy(values);

    let quantile25 = empirical_quantile(&sorted, 0.25);
    let quantile75 = empirical_quantile(&sorted, 0.75);
    let interquartile_range = quantile75 - quantile25;
    let lower_bound = quantile25 - OUTLIER_FENCE * interquartile_range;
    let upper_bound = quantile75 + OUTLIER_FENCE * interquartile_range;

    QuantileSummary {
        quantile25,
        quantile75,
        quantile90: empirical_quantile(&sorted, 0.90),
        quantile95: empirical_quantile(&sorted, 0.95),
        interquartile_range,
        lower_bound,
        upper_bound,
        outliers: sorted
            .iter()
            .copied()
            .filter(|v| *v < lower_bound || *v > upper_bound)
            .collect(),
    }
}

/// Pearson correlation coefficient of two equal-length series.
///
/// `NaN` when the lengths differ, the series are empty, or either is constant.
pub fn pearson_correlation(xs: &[f64], ys: &[f64]) -> f64 {
    if xs.len() != ys.len() || xs.is_empty() {
        return f64::NAN;
    }
    let (mx, my) = (mean(xs), mean(ys));

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let (dx, dy) = (x - mx, y - my);
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return f64::NAN;
    }
    (cov / (var_x * var_y).sqrt()).clamp(-1.0, 1.0)
}

pub fn channel_statistics(values: &[f64]) -> ChannelStatistics {
    let sorted = sorted_copy(values);
    ChannelStatistics {
        mean: mean(values),
        variance: variance(values),
        median: empirical_quantile(&sorted, 0.5),
        standard_deviation: standard_deviation(values),
        skewness: skewness(values),
        quantiles: quantile_summary(values),
        sample_size: values.len(),
    }
}

/// Summarize power output and solar radiation of a measurement slice.
pub fn summarize(measurements: &[Measurement]) -> StatisticsReport {
    let power: Vec<f64> = measurements.iter().map(|m| m.power_output).collect();
    let solar: Vec<f64> = measurements.iter().map(|m| m.solar_radiation).collect();

    StatisticsReport {
        power_output: channel_statistics(&power),
        solar_radiation: channel_statistics(&solar),
        correlation_power_solar: pearson_correlation(&power, &solar),
    }
}

/// Load `[start, end)` from a partition and summarize it.
#[instrument(skip(store, partition), fields(partition = %partition))]
pub async fn compute<S>(
    store: &S,
    partition: &PartitionName,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> AppResult<StatisticsReport>
where
    S: PartitionStore + ?Sized,
{
    let measurements = store.range(partition, start, end).await?;

    let started = Instant::now();
    let report = summarize(&measurements);
    metrics::record_statistics(started.elapsed().as_secs_f64(), measurements.len());

    debug!(samples = measurements.len(), "Statistics computed");
    Ok(report)
}

fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    #[test]
    fn test_worked_example() {
        let summary = quantile_summary(&[1.0, 2.0, 3.0, 4.0, 5.0, 100.0]);

        assert_eq!(summary.quantile25, 2.0);
        assert_eq!(summary.quantile75, 5.0);
        assert_eq!(summary.interquartile_range, 3.0);
        assert_eq!(summary.lower_bound, -2.5);
        assert_eq!(summary.upper_bound, 9.5);
        assert_eq!(summary.outliers, vec![100.0]);
    }

    #[test]
    fn test_quantiles_ignore_input_order() {
        let base = [7.5, -3.0, 12.0, 0.0, 44.0, 3.25, 9.0, 9.0, 1000.0, -250.0];
        let mut reversed = base;
        reversed.reverse();
        let mut rotated = base;
        rotated.rotate_left(3);

        let expected = quantile_summary(&base);
        assert_eq!(quantile_summary(&reversed), expected);
        assert_eq!(quantile_summary(&rotated), expected);
        assert_eq!(quantile_summary(&base), expected);
    }

    #[test]
    fn test_outliers_are_ascending() {
        let summary = quantile_summary(&[500.0, 10.0, 11.0, 12.0, 13.0, 14.0, -400.0, 900.0]);
        assert_eq!(summary.outliers, vec![-400.0, 500.0, 900.0]);
    }

    #[test]
    fn test_moments() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&values), 5.0);
        assert_eq!(variance(&values), 4.0);
        assert_eq!(standard_deviation(&values), 2.0);
        // m3 = 5.25, m2^1.5 = 8
        assert!((skewness(&values) - 0.65625).abs() < EPS);
    }

    #[test]
    fn test_symmetric_series_has_zero_skew() {
        assert!(skewness(&[1.0, 2.0, 3.0, 4.0, 5.0]).abs() < EPS);
    }

    #[test]
    fn test_correlation_extremes() {
        let xs = [1.0, 2.5, 3.0, 8.0, 13.0];
        let negated: Vec<f64> = xs.iter().map(|x| -x).collect();

        assert!((pearson_correlation(&xs, &xs) - 1.0).abs() < EPS);
        assert!((pearson_correlation(&xs, &negated) + 1.0).abs() < EPS);
    }

    #[test]
    fn test_correlation_undefined_cases() {
        assert!(pearson_correlation(&[], &[]).is_nan());
        assert!(pearson_correlation(&[1.0, 2.0], &[1.0]).is_nan());
        assert!(pearson_correlation(&[3.0, 3.0, 3.0], &[1.0, 2.0, 3.0]).is_nan());
    }

    #[test]
    fn test_empty_input_makes_no_claim() {
        let stats = channel_statistics(&[]);

        assert_eq!(stats.sample_size, 0);
        assert!(stats.mean.is_nan());
        assert!(stats.variance.is_nan());
        assert!(stats.median.is_nan());
        assert!(stats.quantiles.quantile95.is_nan());
        assert!(stats.quantiles.outliers.is_empty());
    }

    #[test]
    fn test_single_element() {
        let stats = channel_statistics(&[42.0]);

        assert_eq!(stats.mean, 42.0);
        assert_eq!(stats.median, 42.0);
        assert_eq!(stats.variance, 0.0);
        assert_eq!(stats.quantiles.quantile25, 42.0);
        assert_eq!(stats.quantiles.quantile95, 42.0);
        assert!(stats.skewness.is_nan());
        assert!(stats.quantiles.outliers.is_empty());
    }

    #[test]
    fn test_median_uses_empirical_rule() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(empirical_quantile(&sorted, 0.5), 2.0);
        assert_eq!(empirical_quantile(&[1.0, 2.0, 3.0], 0.5), 2.0);
    }

    #[test]
    fn test_report_serializes_nan_as_null() {
        let report = summarize(&[]);
        let json = serde_json::to_value(&report).unwrap();

        assert!(json["powerOutput"]["mean"].is_null());
        assert_eq!(json["powerOutput"]["sampleSize"], 0);
        assert!(json["solarRadiation"]["quantile25"].is_null());
        assert!(json["correlationPowerSolar"].is_null());
        assert_eq!(json["powerOutput"]["outliers"], serde_json::json!([]));
    }

    #[test]
    fn test_report_field_names() {
        let json = serde_json::to_value(summarize(&[])).unwrap();
        let channel = json["powerOutput"].as_object().unwrap();
        for key in [
            "mean",
            "variance",
            "median",
            "standardDeviation",
            "skewness",
            "quantile25",
            "quantile75",
            "quantile90",
            "quantile95",
            "interquartileRange",
            "lowerBound",
            "upperBound",
            "outliers",
            "sampleSize",
        ] {
            assert!(channel.contains_key(key), "missing {key}");
        }
    }
}
