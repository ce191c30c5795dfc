/// Probabilities are kept inside (PROB_EPS, 1 - PROB_EPS) before any logit.
pub const PROB_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub accuracy: f64,
}

impl Metrics {
    fn empty() -> Self {
        Self {
            samples: 0,
            brier: 0.0,
            log_loss: 0.0,
            accuracy: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

pub fn clamp_prob(p: f64) -> f64 {
    if !p.is_finite() {
        return 0.5;
    }
    p.clamp(PROB_EPS, 1.0 - PROB_EPS)
}

pub fn logit(p: f64) -> f64 {
    let p = clamp_prob(p);
    (p / (1.0 - p)).ln()
}

pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Divides the logit by `temperature`; values below 0.1 are raised to 0.1.
pub fn temperature_scale(p: f64, temperature: f64) -> f64 {
    let t = if temperature.is_finite() {
        temperature.max(0.1)
    } else {
        1.0
    };
    sigmoid(logit(p) / t)
}

/// Zero-guarded ratio; `fallback` when the denominator vanishes.
pub fn safe_ratio(num: f64, den: f64, fallback: f64) -> f64 {
    if den.abs() < 1e-12 || !num.is_finite() || !den.is_finite() {
        fallback
    } else {
        num / den
    }
}

pub fn evaluate_probs(predictions: &[f64], outcomes: &[bool]) -> Metrics {
    if predictions.is_empty() || predictions.len() != outcomes.len() {
        return Metrics::empty();
    }

    let mut brier_sum = 0.0_f64;
    let mut log_loss_sum = 0.0_f64;
    let mut correct = 0usize;

    for (p, won) in predictions.iter().zip(outcomes) {
        let p = p.clamp(0.0, 1.0);
        let y = if *won { 1.0 } else { 0.0 };
        brier_sum += (p - y).powi(2);

        let actual_prob = if *won { p } else { 1.0 - p }.clamp(1e-12, 1.0);
        log_loss_sum += -actual_prob.ln();

        if (p >= 0.5) == *won {
            correct += 1;
        }
    }

    let n = predictions.len() as f64;
    Metrics {
        samples: predictions.len(),
        brier: brier_sum / n,
        log_loss: log_loss_sum / n,
        accuracy: correct as f64 / n,
    }
}

/// Grid search over temperatures 0.50..=2.50 minimizing log loss.
pub fn fit_temperature(predictions: &[f64], outcomes: &[bool]) -> (f64, Metrics) {
    if predictions.is_empty() || predictions.len() != outcomes.len() {
        return (1.0, Metrics::empty());
    }

    let mut best_t = 1.0;
    let mut best_metrics = evaluate_probs(predictions, outcomes);

    for step in 25..=125 {
        let t = step as f64 / 50.0;
        let scaled: Vec<f64> = predictions
            .iter()
            .map(|p| temperature_scale(*p, t))
            .collect();
        let metrics = evaluate_probs(&scaled, outcomes);
        if metrics.log_loss < best_metrics.log_loss {
            best_metrics = metrics;
            best_t = t;
        }
    }

    (best_t, best_metrics)
}

pub fn calibration_bins(predictions: &[f64], outcomes: &[bool], bins: usize) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let mut counts = vec![0usize; bins];
    let mut pred_sum = vec![0.0_f64; bins];
    let mut actual_sum = vec![0.0_f64; bins];

    for (p, won) in predictions.iter().zip(outcomes) {
        let p = p.clamp(0.0, 1.0);
        let idx = ((p * bins as f64).floor() as usize).min(bins - 1);
        counts[idx] += 1;
        pred_sum[idx] += p;
        if *won {
            actual_sum[idx] += 1.0;
        }
    }

    (0..bins)
        .map(|i| {
            let count = counts[i];
            let (avg_pred, actual_rate) = if count > 0 {
                (pred_sum[i] / count as f64, actual_sum[i] / count as f64)
            } else {
                (0.0, 0.0)
            };
            CalibrationBin {
                bucket_start: i as f64 / bins as f64,
                bucket_end: (i + 1) as f64 / bins as f64,
                count,
                avg_pred,
                actual_rate,
            }
        })
        .collect()
}

/// Expected calibration error over `bins` equal-width buckets.
pub fn expected_calibration_error(predictions: &[f64], outcomes: &[bool], bins: usize) -> f64 {
    let total = predictions.len().min(outcomes.len());
    if total == 0 {
        return 0.0;
    }
    calibration_bins(predictions, outcomes, bins)
        .iter()
        .filter(|b| b.count > 0)
        .map(|b| (b.count as f64 / total as f64) * (b.avg_pred - b.actual_rate).abs())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_predictions_have_zero_brier() {
        let m = evaluate_probs(&[1.0, 0.0, 1.0], &[true, false, true]);
        assert_eq!(m.samples, 3);
        assert!(m.brier < 1e-12);
        assert!((m.accuracy - 1.0).abs() < 1e-12);
    }

    #[test]
    fn logit_and_sigmoid_invert() {
        for p in [0.05, 0.3, 0.5, 0.77, 0.99] {
            assert!((sigmoid(logit(p)) - p).abs() < 1e-12);
        }
        assert!(logit(0.0).is_finite());
        assert!(logit(1.0).is_finite());
        assert_eq!(clamp_prob(f64::NAN), 0.5);
    }

    #[test]
    fn temperature_above_one_softens() {
        let p = temperature_scale(0.8, 2.0);
        assert!(p < 0.8 && p > 0.5);
        // Anything below 0.1 is treated as 0.1.
        assert!((temperature_scale(0.6, 0.0) - temperature_scale(0.6, 0.1)).abs() < 1e-12);
    }

    #[test]
    fn overconfident_predictions_fit_a_softening_temperature() {
        let preds = vec![0.95, 0.95, 0.95, 0.95, 0.05, 0.05, 0.05, 0.05];
        let outcomes = vec![true, true, true, false, false, false, false, true];
        let (t, metrics) = fit_temperature(&preds, &outcomes);
        assert!(t > 1.0);
        assert!(metrics.log_loss < evaluate_probs(&preds, &outcomes).log_loss);
    }
}
