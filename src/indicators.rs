//! Rolling/numeric helpers shared by the detectors
//!
//! Everything operates on plain f64 slices. Warmup positions are NaN, and
//! comparisons against NaN are false, so detector conditions silently skip
//! bars without enough history (the same behavior the rolling windows of
//! the reference charts exhibit).

/// Rolling mean over `window`, NaN until the window is full.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if window == 0 || n < window {
        return out;
    }
    let mut sum: f64 = values[..window].iter().sum();
    out[window - 1] = sum / window as f64;
    for i in window..n {
        sum += values[i] - values[i - window];
        out[i] = sum / window as f64;
    }
    out
}

/// Rolling sample standard deviation (ddof = 1) over `window`.
pub fn rolling_std(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if window < 2 || n < window {
        return out;
    }
    for i in (window - 1)..n {
        let slice = &values[i + 1 - window..=i];
        let mean = slice.iter().sum::<f64>() / window as f64;
        let var = slice.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>()
            / (window as f64 - 1.0);
        out[i] = var.sqrt();
    }
    out
}

pub fn rolling_max(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if window == 0 || n < window {
        return out;
    }
    for i in (window - 1)..n {
        out[i] = values[i + 1 - window..=i]
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
    }
    out
}

pub fn rolling_min(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if window == 0 || n < window {
        return out;
    }
    for i in (window - 1)..n {
        out[i] = values[i + 1 - window..=i]
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min);
    }
    out
}

/// Rolling max with `min_periods = 1` (partial windows allowed).
pub fn rolling_max_partial(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    for i in 0..n {
        let start = i.saturating_sub(window.saturating_sub(1));
        out[i] = values[start..=i]
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
    }
    out
}

pub fn rolling_min_partial(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    for i in 0..n {
        let start = i.saturating_sub(window.saturating_sub(1));
        out[i] = values[start..=i]
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min);
    }
    out
}

/// Simple moving average, full-window semantics.
pub fn sma(values: &[f64], window: usize) -> Vec<f64> {
    rolling_mean(values, window)
}

/// Exponential moving average with pandas `ewm(span=…, adjust=false)`
/// semantics; seeds on the first value.
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if n == 0 || span == 0 {
        return out;
    }
    let alpha = 2.0 / (span as f64 + 1.0);
    out[0] = values[0];
    for i in 1..n {
        out[i] = alpha * values[i] + (1.0 - alpha) * out[i - 1];
    }
    out
}

/// Weighted moving average with weights 1..=window, NaN until full.
pub fn wma(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if window == 0 || n < window {
        return out;
    }
    let weight_sum: f64 = (1..=window).map(|w| w as f64).sum();
    for i in (window - 1)..n {
        let mut acc = 0.0;
        for (w, v) in values[i + 1 - window..=i].iter().enumerate() {
            acc += v * (w + 1) as f64;
        }
        out[i] = acc / weight_sum;
    }
    out
}

/// Weighted moving average allowing partial warmup windows (weights are the
/// tail of 1..=window).
pub fn wma_partial(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    for i in 0..n {
        let len = (i + 1).min(window);
        let start = i + 1 - len;
        let mut acc = 0.0;
        let mut wsum = 0.0;
        for (j, v) in values[start..=i].iter().enumerate() {
            let w = (window - len + j + 1) as f64;
            acc += v * w;
            wsum += w;
        }
        out[i] = acc / wsum;
    }
    out
}

/// True range series; the first bar falls back to high-low.
pub fn true_range(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    let n = highs.len();
    let mut out = vec![0.0; n];
    for i in 0..n {
        let hl = highs[i] - lows[i];
        out[i] = if i == 0 {
            hl
        } else {
            let pc = closes[i - 1];
            hl.max((highs[i] - pc).abs()).max((lows[i] - pc).abs())
        };
    }
    out
}

/// ATR as a plain rolling mean of true range.
pub fn atr_sma(highs: &[f64], lows: &[f64], closes: &[f64], window: usize) -> Vec<f64> {
    rolling_mean(&true_range(highs, lows, closes), window)
}

/// Wilder-style ATR: SMA seed over the first window, then recursive
/// `atr += (tr - atr) / window`.
pub fn atr_wilder(highs: &[f64], lows: &[f64], closes: &[f64], window: usize) -> Vec<f64> {
    let tr = true_range(highs, lows, closes);
    let n = tr.len();
    let mut out = vec![f64::NAN; n];
    if window == 0 || n < window {
        return out;
    }
    let seed = tr[..window].iter().sum::<f64>() / window as f64;
    out[window - 1] = seed;
    let alpha = 1.0 / window as f64;
    for i in window..n {
        out[i] = out[i - 1] + alpha * (tr[i] - out[i - 1]);
    }
    out
}

/// Wilder ATR with EMA semantics from the first bar (no SMA seed window).
pub fn atr_rma(highs: &[f64], lows: &[f64], closes: &[f64], window: usize) -> Vec<f64> {
    let tr = true_range(highs, lows, closes);
    let n = tr.len();
    let mut out = vec![f64::NAN; n];
    if n == 0 || window == 0 {
        return out;
    }
    let alpha = 1.0 / window as f64;
    out[0] = tr[0];
    for i in 1..n {
        out[i] = alpha * tr[i] + (1.0 - alpha) * out[i - 1];
    }
    out
}

/// Percentile rank of the value at each position within its trailing
/// window: share of window values <= current, in percent. NaN in warmup.
pub fn percentile_rank(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if window == 0 || n < window {
        return out;
    }
    for i in (window - 1)..n {
        let current = values[i];
        let count = values[i + 1 - window..=i]
            .iter()
            .filter(|&&v| v <= current)
            .count();
        out[i] = count as f64 / window as f64 * 100.0;
    }
    out
}

/// Bars elapsed since the condition last held; 0 on hit bars and before the
/// first occurrence.
pub fn bars_since(condition: &[bool]) -> Vec<i64> {
    let mut out = vec![0i64; condition.len()];
    let mut last_true: Option<usize> = None;
    for (i, &c) in condition.iter().enumerate() {
        if c {
            last_true = Some(i);
            out[i] = 0;
        } else {
            out[i] = match last_true {
                Some(j) => (i - j) as i64,
                None => 0,
            };
        }
    }
    out
}

/// Theil–Sen estimator over equally spaced samples: median pairwise slope,
/// then median intercept. Returns NaN for fewer than two points.
pub fn theil_sen(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    if n < 2 {
        return (f64::NAN, f64::NAN);
    }
    let mut slopes = Vec::with_capacity(n * (n - 1) / 2);
    for j in 0..n - 1 {
        for k in j + 1..n {
            slopes.push((values[k] - values[j]) / (k - j) as f64);
        }
    }
    let slope = median(&mut slopes);
    let mut intercepts: Vec<f64> = values
        .iter()
        .enumerate()
        .map(|(j, v)| v - slope * j as f64)
        .collect();
    let intercept = median(&mut intercepts);
    (slope, intercept)
}

pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Swing pivots: value at `i` is the confirmed pivot from `lbr` bars back,
/// NaN otherwise. A pivot high needs `lbl` strictly lower highs on the left
/// and `lbr` on the right.
pub fn pivots(values: &[f64], lbl: usize, lbr: usize, high: bool) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if n == 0 {
        return out;
    }
    for center in (lbl + lbr)..n {
        let ref_index = center - lbr;
        if ref_index < lbl {
            continue;
        }
        let reference = values[ref_index];
        let mut is_pivot = true;
        for j in (ref_index - lbl)..=(ref_index + lbr) {
            if j == ref_index {
                continue;
            }
            let beats = if high {
                values[j] >= reference
            } else {
                values[j] <= reference
            };
            if beats {
                is_pivot = false;
                break;
            }
        }
        if is_pivot {
            // Confirmation arrives lbr bars after the pivot bar.
            out[ref_index + lbr] = reference;
        }
    }
    out
}

/// Forward-fill NaN gaps.
pub fn ffill(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    let mut last = f64::NAN;
    for v in out.iter_mut() {
        if v.is_nan() {
            *v = last;
        } else {
            last = *v;
        }
    }
    out
}

/// Kaufman-adaptive moving average variant used by the trend detector:
/// efficiency from the position of price inside its rolling hi/lo band.
pub fn ama(values: &[f64], period: usize, period_fast: usize, period_slow: usize) -> Vec<f64> {
    const EPSILON: f64 = 1e-10;
    let n = values.len();
    let mut out = vec![0.0; n];
    if n == 0 {
        return out;
    }
    let band = period + 1;
    let hh = rolling_max_partial(values, band);
    let ll = rolling_min_partial(values, band);
    let sc_fastest = 2.0 / (period_fast as f64 + 1.0);
    let sc_slowest = 2.0 / (period_slow as f64 + 1.0);

    for i in 0..period.min(n) {
        out[i] = values[i];
    }
    for i in period..n {
        let spread = hh[i] - ll[i];
        let mltp = if spread != 0.0 {
            (2.0 * values[i] - ll[i] - hh[i]).abs() / (spread + EPSILON)
        } else {
            0.0
        };
        let mut sc = (mltp * (sc_fastest - sc_slowest) + sc_slowest).powi(2);
        if !sc.is_finite() {
            sc = 0.0;
        }
        out[i] = out[i - 1] + sc * (values[i] - out[i - 1]);
    }
    out
}

/// Jurik-style three-stage smoother.
pub fn jurik_smooth(values: &[f64], smooth: usize, power: u32) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![0.0; n];
    if n == 0 {
        return out;
    }
    let beta = 0.45 * (smooth as f64 - 1.0) / (0.45 * (smooth as f64 - 1.0) + 2.0);
    let alpha = beta.powi(power as i32);

    let mut e0 = values[0];
    let mut e2 = 0.0;
    out[0] = values[0];
    for i in 1..n {
        e0 = (1.0 - alpha) * values[i] + alpha * e0;
        e2 = (e0 - out[i - 1]) * (1.0 - alpha).powi(2) + alpha.powi(2) * e2;
        out[i] = out[i - 1] + e2;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_mean_and_std() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        let mean = rolling_mean(&v, 3);
        assert!(mean[1].is_nan());
        assert_eq!(mean[2], 2.0);
        assert_eq!(mean[4], 4.0);

        let std = rolling_std(&v, 3);
        assert!((std[2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn wma_weights_recent_bars_heavier() {
        let v = [1.0, 2.0, 3.0];
        let w = wma(&v, 3);
        // (1*1 + 2*2 + 3*3) / 6
        assert!((w[2] - 14.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn theil_sen_recovers_a_line() {
        let v: Vec<f64> = (0..10).map(|i| 3.0 + 0.5 * i as f64).collect();
        let (slope, intercept) = theil_sen(&v);
        assert!((slope - 0.5).abs() < 1e-12);
        assert!((intercept - 3.0).abs() < 1e-12);
    }

    #[test]
    fn theil_sen_ignores_an_outlier() {
        let mut v: Vec<f64> = (0..11).map(|i| i as f64).collect();
        v[5] = 100.0;
        let (slope, _) = theil_sen(&v);
        assert!((slope - 1.0).abs() < 0.2);
    }

    #[test]
    fn bars_since_counts_from_last_hit() {
        let cond = [false, true, false, false, true, false];
        assert_eq!(bars_since(&cond), vec![0, 0, 1, 2, 0, 1]);
    }

    #[test]
    fn pivot_high_confirms_after_lbr_bars() {
        let v = [1.0, 2.0, 5.0, 2.0, 1.0, 3.0];
        let p = pivots(&v, 2, 2, true);
        // Pivot at index 2, confirmed at index 4.
        assert!(p[2].is_nan());
        assert_eq!(p[4], 5.0);
    }

    #[test]
    fn percentile_rank_counts_leq() {
        let v = [1.0, 2.0, 3.0, 2.5];
        let pr = percentile_rank(&v, 3);
        assert_eq!(pr[2], 100.0);
        assert!((pr[3] - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn true_range_first_bar_is_high_low() {
        let h = [10.0, 12.0];
        let l = [9.0, 10.5];
        let c = [9.5, 11.0];
        let tr = true_range(&h, &l, &c);
        assert_eq!(tr[0], 1.0);
        assert_eq!(tr[1], 2.5);
    }
}
