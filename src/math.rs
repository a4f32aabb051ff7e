use itertools::izip;

/// `num` evenly spaced values over the closed interval `[start, stop]`.
///
/// The last value is exactly `stop`, so grids built from configured
/// depth bounds hit the bounds without rounding drift.
pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            let mut out: Vec<f64> = (0..num).map(|i| start + i as f64 * step).collect();
            out[num - 1] = stop;
            out
        }
    }
}

/// Values `start, start + step, ...` strictly below `stop`.
pub fn arange(start: f64, stop: f64, step: f64) -> Vec<f64> {
    debug_assert!(step > 0.);
    let num = ((stop - start) / step).ceil();
    if !num.is_finite() || num <= 0. {
        return Vec::new();
    }
    (0..num as usize).map(|i| start + i as f64 * step).collect()
}

/// Piecewise linear interpolation of `(xp, fp)` at `x`.
///
/// `xp` must be ascending. Outside the table the end values are held
/// constant.
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    assert!(xp.len() == fp.len());
    assert!(!xp.is_empty());
    let last = xp.len() - 1;
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[last] {
        return fp[last];
    }
    let hi = xp.partition_point(|&v| v <= x);
    let lo = hi - 1;
    let span = xp[hi] - xp[lo];
    if span == 0. {
        return fp[lo];
    }
    let t = (x - xp[lo]) / span;
    fp[lo] + t * (fp[hi] - fp[lo])
}

/// Percentile `q` (in `[0, 100]`) with linear interpolation between
/// closest ranks. Returns `None` for an empty sample.
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(percentile_of_sorted(&sorted, q))
}

pub(crate) fn percentile_of_sorted(sorted: &[f64], q: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let rank = q / 100. * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

pub fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 50.)
}

/// Ordinary least squares slope of `y` on `x`.
pub(crate) fn ols_slope(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let (sxy, sxx) = izip!(x, y).fold((0f64, 0f64), |(sxy, sxx), (&x, &y)| {
        let dx = x - mean_x;
        (sxy + dx * (y - mean_y), sxx + dx * dx)
    });
    if sxx == 0. {
        return None;
    }
    Some(sxy / sxx)
}

/// Scale `values` in place so they sum to one. Returns the original sum.
pub(crate) fn normalize(values: &mut [f64]) -> f64 {
    let total: f64 = values.iter().sum();
    values.iter_mut().for_each(|v| *v /= total);
    total
}
