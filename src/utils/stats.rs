//! Small numeric helpers shared by the metric collectors.


/// Arithmetic mean; `None` for an empty slice.
pub fn mean<T: Copy + Into<f64>>(values: &[T]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let sum: f64 = values.iter().map(|&v| v.into()).sum();
    Some(sum / values.len() as f64)
}

/// Mean and population standard deviation.
///
/// # Arguments
///
/// - `values`: Observations.
///
/// # Returns
///
/// (mean, sd), or `None` when there are no observations.
pub fn mean_and_sd(values: &[f64]) -> Option<(f64, f64)> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some((m, var.sqrt()))
}

/// Standard score of `value`; `None` when the spread is zero.
pub fn z_score(value: f64, mean: f64, sd: f64) -> Option<f64> {
    if sd > 0.0 {
        Some((value - mean) / sd)
    } else {
        None
    }
}

/// Phred-scaled quality of an error rate; `None` for a zero error rate.
pub fn phred_from_error_rate(errors: u64, total: u64) -> Option<f64> {
    if errors == 0 || total == 0 {
        return None;
    }
    Some(-10.0 * (errors as f64 / total as f64).log10())
}
