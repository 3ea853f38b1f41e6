//! Relaxation curve fitting
//!
//! Fits the exponential recovery/decay models to a measured relaxation
//! series and derives the relaxation time: T1 through bracketed
//! root-finding of the zero crossing, T2 through its closed form. The fit
//! itself never errors; underdetermined or non-converging input produces a
//! result whose numeric fields are NaN and whose curve is empty.

use nalgebra::{Matrix3, Vector3};

/// Minimum number of timing values for a determined fit
const MIN_POINTS: usize = 5;

/// Points in the dense fitted curve
const CURVE_POINTS: usize = 1000;

/// T1 correction factor applied to the zero-crossing time
const T1_ZERO_CROSSING_FACTOR: f64 = 1.44;

/// Fraction of the initial T2 amplitude defining the decay reference level
const T2_DECAY_LEVEL: f64 = 0.37;

/// Maximum Levenberg-Marquardt iterations
const MAX_ITERATIONS: usize = 200;

/// Which relaxation process a series measures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaxationKind {
    /// Longitudinal recovery, model `A - B*exp(-C*t)`
    T1,
    /// Transverse decay, model `A + B*exp(-C*t)`
    T2,
}

impl RelaxationKind {
    fn model(self, params: [f64; 3], t: f64) -> f64 {
        let [a, b, c] = params;
        match self {
            RelaxationKind::T1 => a - b * (-c * t).exp(),
            RelaxationKind::T2 => a + b * (-c * t).exp(),
        }
    }

    /// Partial derivatives of the model with respect to (A, B, C)
    fn jacobian_row(self, params: [f64; 3], t: f64) -> [f64; 3] {
        let [_, b, c] = params;
        let decay = (-c * t).exp();
        match self {
            RelaxationKind::T1 => [1.0, -decay, b * t * decay],
            RelaxationKind::T2 => [1.0, decay, -b * t * decay],
        }
    }
}

/// Ordered measurement series, one point per timing value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelaxationSeries {
    /// (timing_ms, signed_amplitude) pairs in acquisition order
    pub points: Vec<(f64, f64)>,
}

impl RelaxationSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, timing_ms: f64, amplitude: f64) {
        self.points.push((timing_ms, amplitude));
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Box bounds on the fitted (A, B, C) parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitBounds {
    pub lower: [f64; 3],
    pub upper: [f64; 3],
}

impl FitBounds {
    /// Instrument default bounds for a given series
    ///
    /// B's lower bound follows the first measured amplitude, pinning the
    /// fitted curve's initial value to the data.
    pub fn default_for(series: &RelaxationSeries) -> Self {
        let first = series.points.first().map_or(0.0, |&(_, y)| y);
        FitBounds {
            lower: [0.0, first, 0.0],
            upper: [10.0, 50_000.0, 0.5],
        }
    }

    fn clamp(&self, params: [f64; 3]) -> [f64; 3] {
        let mut out = params;
        for i in 0..3 {
            out[i] = out[i].clamp(self.lower[i], self.upper[i]);
        }
        out
    }
}

/// Result of fitting one relaxation series
///
/// A failed fit carries NaN in every numeric field and an empty curve.
/// A successful fit may still carry a NaN `relaxation_ms` when the fitted
/// parameters admit no zero crossing (T1) or no decay-level crossing (T2);
/// the parameters and goodness-of-fit remain usable in that case.
#[derive(Debug, Clone, PartialEq)]
pub struct RelaxationFit {
    pub kind: RelaxationKind,
    /// Fitted (A, B, C)
    pub params: [f64; 3],
    /// Derived relaxation time in ms
    pub relaxation_ms: f64,
    /// Coefficient of determination against the fitted model
    pub r_squared: f64,
    /// Dense model curve time axis in ms
    pub curve_t: Vec<f64>,
    /// Dense model curve amplitudes
    pub curve_y: Vec<f64>,
}

impl RelaxationFit {
    fn failure(kind: RelaxationKind) -> Self {
        RelaxationFit {
            kind,
            params: [f64::NAN; 3],
            relaxation_ms: f64::NAN,
            r_squared: f64::NAN,
            curve_t: Vec::new(),
            curve_y: Vec::new(),
        }
    }

    /// Whether the fit converged to usable parameters
    pub fn is_valid(&self) -> bool {
        self.params.iter().all(|p| p.is_finite())
    }
}

/// Fit a relaxation model to a measured series
///
/// Bounded Levenberg-Marquardt over (A, B, C). `bounds` defaults to
/// [`FitBounds::default_for`] when not supplied. Never errors; see
/// [`RelaxationFit`] for the failure encoding.
pub fn fit(
    kind: RelaxationKind,
    series: &RelaxationSeries,
    bounds: Option<FitBounds>,
) -> RelaxationFit {
    if series.len() < MIN_POINTS {
        return RelaxationFit::failure(kind);
    }
    if series.points.iter().any(|&(t, y)| !t.is_finite() || !y.is_finite()) {
        return RelaxationFit::failure(kind);
    }
    let bounds = bounds.unwrap_or_else(|| FitBounds::default_for(series));

    let params = match levenberg_marquardt(kind, series, &bounds) {
        Some(params) => params,
        None => return RelaxationFit::failure(kind),
    };

    let t_first = series.points[0].0;
    let t_last = series.points[series.len() - 1].0;
    let relaxation_ms = match kind {
        RelaxationKind::T1 => solve_t1(params, t_first, t_last),
        RelaxationKind::T2 => solve_t2(params),
    };

    let r_squared = r_squared(kind, series, params);

    let curve_t = linspace(0.0, 1.2 * t_last, CURVE_POINTS);
    let curve_y = curve_t.iter().map(|&t| kind.model(params, t)).collect();

    RelaxationFit {
        kind,
        params,
        relaxation_ms,
        r_squared,
        curve_t,
        curve_y,
    }
}

fn sum_squared_residuals(kind: RelaxationKind, series: &RelaxationSeries, params: [f64; 3]) -> f64 {
    series
        .points
        .iter()
        .map(|&(t, y)| {
            let r = y - kind.model(params, t);
            r * r
        })
        .sum()
}

fn initial_guess(kind: RelaxationKind, series: &RelaxationSeries, bounds: &FitBounds) -> [f64; 3] {
    let (_, y_first) = series.points[0];
    let (_, y_last) = series.points[series.len() - 1];
    let t_mid = series.points[series.len() / 2].0.max(f64::EPSILON);

    // Both models approach A as t grows; B is set from the t=0 intercept
    let a = y_last;
    let b = match kind {
        RelaxationKind::T1 => a - y_first,
        RelaxationKind::T2 => y_first - a,
    };
    bounds.clamp([a, b, 1.0 / t_mid])
}

fn levenberg_marquardt(
    kind: RelaxationKind,
    series: &RelaxationSeries,
    bounds: &FitBounds,
) -> Option<[f64; 3]> {
    let mut params = initial_guess(kind, series, bounds);
    let mut ssr = sum_squared_residuals(kind, series, params);
    let mut lambda = 1e-3;

    for _ in 0..MAX_ITERATIONS {
        let mut jtj = Matrix3::<f64>::zeros();
        let mut jtr = Vector3::<f64>::zeros();
        for &(t, y) in &series.points {
            let row = kind.jacobian_row(params, t);
            let residual = y - kind.model(params, t);
            for i in 0..3 {
                jtr[i] += row[i] * residual;
                for j in 0..3 {
                    jtj[(i, j)] += row[i] * row[j];
                }
            }
        }

        let mut damped = jtj;
        for i in 0..3 {
            damped[(i, i)] += lambda * jtj[(i, i)].max(1e-12);
        }

        let step = match damped.lu().solve(&jtr) {
            Some(step) => step,
            None => {
                lambda *= 10.0;
                if lambda > 1e12 {
                    return None;
                }
                continue;
            }
        };

        let candidate = bounds.clamp([params[0] + step[0], params[1] + step[1], params[2] + step[2]]);
        let candidate_ssr = sum_squared_residuals(kind, series, candidate);

        if candidate_ssr.is_finite() && candidate_ssr < ssr {
            let shrunk = (ssr - candidate_ssr) <= 1e-12 * (1.0 + ssr);
            params = candidate;
            ssr = candidate_ssr;
            lambda = (lambda / 10.0).max(1e-12);
            if shrunk {
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e12 {
                break;
            }
        }
    }

    if ssr.is_finite() && params.iter().all(|p| p.is_finite()) {
        Some(params)
    } else {
        None
    }
}

/// T1: scaled zero crossing of the recovery curve, bisected on the
/// measured timing interval
fn solve_t1(params: [f64; 3], t_first: f64, t_last: f64) -> f64 {
    let f = |t: f64| params[0] - params[1] * (-params[2] * t).exp();
    let (mut lo, mut hi) = (t_first, t_last);
    let (f_lo, f_hi) = (f(lo), f(hi));
    if f_lo == 0.0 {
        return T1_ZERO_CROSSING_FACTOR * lo;
    }
    if f_hi == 0.0 {
        return T1_ZERO_CROSSING_FACTOR * hi;
    }
    if f_lo * f_hi > 0.0 {
        return f64::NAN;
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        let f_mid = f(mid);
        if f_mid == 0.0 {
            return T1_ZERO_CROSSING_FACTOR * mid;
        }
        if f_lo * f_mid < 0.0 {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    T1_ZERO_CROSSING_FACTOR * 0.5 * (lo + hi)
}

/// T2: closed-form time at which the decay reaches 37% of its initial value
fn solve_t2(params: [f64; 3]) -> f64 {
    let [a, b, c] = params;
    if b == 0.0 || c <= 0.0 {
        return f64::NAN;
    }
    let arg = (T2_DECAY_LEVEL * (a + b) - a) / b;
    if arg <= 0.0 {
        return f64::NAN;
    }
    -arg.ln() / c
}

fn r_squared(kind: RelaxationKind, series: &RelaxationSeries, params: [f64; 3]) -> f64 {
    let n = series.len() as f64;
    let mean = series.points.iter().map(|&(_, y)| y).sum::<f64>() / n;
    let ss_tot: f64 = series.points.iter().map(|&(_, y)| (y - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return f64::NAN;
    }
    let ss_res = sum_squared_residuals(kind, series, params);
    1.0 - ss_res / ss_tot
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series_from_model(kind: RelaxationKind, params: [f64; 3], times: &[f64]) -> RelaxationSeries {
        let mut series = RelaxationSeries::new();
        for &t in times {
            series.push(t, kind.model(params, t));
        }
        series
    }

    const T1_TIMES: [f64; 10] = [1.0, 3.0, 6.0, 10.0, 15.0, 22.0, 30.0, 45.0, 70.0, 100.0];

    #[test]
    fn test_t1_parameter_recovery() {
        let truth = [5.0, 4.0, 0.1];
        let series = series_from_model(RelaxationKind::T1, truth, &T1_TIMES);
        let fit = fit(RelaxationKind::T1, &series, None);

        assert!(fit.is_valid());
        for (fitted, expected) in fit.params.iter().zip(&truth) {
            assert!(
                (fitted - expected).abs() < 0.05,
                "fitted {fitted} vs expected {expected}"
            );
        }
        assert!(fit.r_squared > 0.99);
    }

    #[test]
    fn test_t1_recovery_with_measurement_noise() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let truth = [5.0, 8.0, 0.05];
        let mut rng = StdRng::seed_from_u64(7);
        let mut series = RelaxationSeries::new();
        for &t in &T1_TIMES {
            let noise = rng.gen_range(-0.02..0.02);
            series.push(t, RelaxationKind::T1.model(truth, t) + noise);
        }
        let fit = fit(RelaxationKind::T1, &series, None);

        assert!(fit.is_valid());
        for (fitted, expected) in fit.params.iter().zip(&truth) {
            assert!(
                (fitted - expected).abs() < 0.2,
                "fitted {fitted} vs expected {expected}"
            );
        }
        assert!(fit.r_squared > 0.99);
    }

    #[test]
    fn test_t1_relaxation_time_from_zero_crossing() {
        // Inversion recovery: starts negative, crosses zero inside the
        // measured interval
        let truth = [5.0, 8.0, 0.05];
        let series = series_from_model(RelaxationKind::T1, truth, &T1_TIMES);
        let fit = fit(RelaxationKind::T1, &series, None);

        assert!(fit.is_valid());
        let crossing = (8.0f64 / 5.0).ln() / 0.05;
        assert!((fit.relaxation_ms - 1.44 * crossing).abs() < 0.1);
    }

    #[test]
    fn test_t1_without_crossing_keeps_parameters() {
        // A > B never crosses zero; the relaxation time alone is undefined
        let truth = [5.0, 4.0, 0.1];
        let series = series_from_model(RelaxationKind::T1, truth, &T1_TIMES);
        let fit = fit(RelaxationKind::T1, &series, None);

        assert!(fit.is_valid());
        assert!(fit.relaxation_ms.is_nan());
        assert!(fit.r_squared > 0.99);
    }

    #[test]
    fn test_t2_closed_form() {
        let truth = [0.5, 8.0, 0.05];
        let series = series_from_model(RelaxationKind::T2, truth, &T1_TIMES);
        let bounds = FitBounds {
            lower: [0.0, 0.0, 0.0],
            upper: [10.0, 50.0, 0.5],
        };
        let fit = fit(RelaxationKind::T2, &series, Some(bounds));

        assert!(fit.is_valid());
        assert!(fit.r_squared > 0.99);
        let expected = -((0.37 * 8.5 - 0.5) / 8.0f64).ln() / 0.05;
        assert!((fit.relaxation_ms - expected).abs() < 0.5);
    }

    #[test]
    fn test_too_few_points_is_failure() {
        let series = series_from_model(RelaxationKind::T1, [5.0, 8.0, 0.05], &[1.0, 5.0, 20.0, 50.0]);
        let fit = fit(RelaxationKind::T1, &series, None);

        assert!(!fit.is_valid());
        assert!(fit.params.iter().all(|p| p.is_nan()));
        assert!(fit.relaxation_ms.is_nan());
        assert!(fit.r_squared.is_nan());
        assert!(fit.curve_t.is_empty());
        assert!(fit.curve_y.is_empty());
    }

    #[test]
    fn test_non_finite_input_is_failure() {
        let mut series = series_from_model(RelaxationKind::T1, [5.0, 8.0, 0.05], &T1_TIMES);
        series.points[3].1 = f64::NAN;
        let fit = fit(RelaxationKind::T1, &series, None);
        assert!(!fit.is_valid());
    }

    #[test]
    fn test_curve_spans_1_2_times_last_value() {
        let series = series_from_model(RelaxationKind::T1, [5.0, 8.0, 0.05], &T1_TIMES);
        let fit = fit(RelaxationKind::T1, &series, None);

        assert_eq!(fit.curve_t.len(), 1000);
        assert_eq!(fit.curve_y.len(), 1000);
        assert_eq!(fit.curve_t[0], 0.0);
        assert!((fit.curve_t[999] - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_default_bounds_follow_first_amplitude() {
        let series = series_from_model(RelaxationKind::T1, [5.0, 4.0, 0.1], &T1_TIMES);
        let bounds = FitBounds::default_for(&series);
        assert_eq!(bounds.lower[0], 0.0);
        assert!((bounds.lower[1] - series.points[0].1).abs() < 1e-12);
        assert_eq!(bounds.upper, [10.0, 50_000.0, 0.5]);
    }

    #[test]
    fn test_fit_respects_bounds() {
        let truth = [5.0, 8.0, 0.05];
        let series = series_from_model(RelaxationKind::T1, truth, &T1_TIMES);
        let bounds = FitBounds {
            lower: [0.0, -10.0, 0.0],
            upper: [10.0, 50_000.0, 0.5],
        };
        let fit = fit(RelaxationKind::T1, &series, Some(bounds));
        assert!(fit.is_valid());
        for i in 0..3 {
            assert!(fit.params[i] >= bounds.lower[i] - 1e-12);
            assert!(fit.params[i] <= bounds.upper[i] + 1e-12);
        }
    }
}
