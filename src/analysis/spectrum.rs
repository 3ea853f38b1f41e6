//! Spectral analysis of raw readouts
//!
//! Turns one raw complex readout into time and frequency domain views and
//! the derived metrics every acquisition type shares: peak parameters,
//! full width at half maximum, signal-to-noise ratio, and the evaluability
//! gate that decides whether those metrics mean anything.

use num_complex::Complex;
use rustfft::FftPlanner;

/// Fixed acquisition rate of the receiver in samples per ms
const SAMPLES_PER_MS: f64 = 250.0;

/// Scale from the ADC's normalized +/-1 V range to millivolts
const ADC_TO_MILLIVOLTS: f32 = 2000.0;

/// Moving-average window for the smoothed time-domain traces
const SMOOTHING_WINDOW: usize = 50;

/// Samples excluded from the noise estimate at each spectrum edge
const EDGE_EXCLUSION: usize = 50;

/// Minimum time-domain dynamic range in mV for metrics to be defined
const EVALUABILITY_GATE_MV: f32 = 1.0;

/// Default half-max search window in samples
pub const DEFAULT_FWHM_WINDOW: usize = 1000;

/// Default width, relative to the FWHM, of the peak band excluded from the
/// noise estimate
pub const DEFAULT_SNR_WINDOW_FACTOR: f64 = 1.2;

/// Dominant-peak description of one spectrum
///
/// All fields are NaN sentinels when the record is not evaluable; check
/// [`PeakParameters::is_valid`] before using the numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakParameters {
    /// Height of the frequency-domain peak
    pub spectral_peak: f64,
    /// Index of the frequency-domain peak, `None` when not evaluable
    pub peak_index: Option<usize>,
    /// Height of the smoothed time-domain magnitude peak in mV
    pub time_domain_peak: f64,
    /// Absolute frequency of the peak in MHz
    pub center_frequency_mhz: f64,
}

impl PeakParameters {
    fn not_evaluable() -> Self {
        PeakParameters {
            spectral_peak: f64::NAN,
            peak_index: None,
            time_domain_peak: f64::NAN,
            center_frequency_mhz: f64::NAN,
        }
    }

    /// Whether the peak was actually located
    pub fn is_valid(&self) -> bool {
        self.peak_index.is_some()
    }
}

/// Full width at half maximum of the dominant peak
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fwhm {
    /// Width in spectrum samples
    pub samples: f64,
    /// Width in Hz
    pub hertz: f64,
    /// Width in parts per million of the peak frequency
    pub ppm: f64,
}

impl Fwhm {
    fn not_evaluable() -> Self {
        Fwhm {
            samples: f64::NAN,
            hertz: f64::NAN,
            ppm: f64::NAN,
        }
    }

    /// Whether both half-max crossings were found inside the window
    pub fn is_valid(&self) -> bool {
        !self.samples.is_nan()
    }
}

/// Immutable spectral record derived from one raw readout
///
/// Construction crops the readout to the acquisition window, scales it to
/// millivolts, and computes the time and frequency domain views once. The
/// metric methods never mutate the record and never panic; when the
/// evaluability gate fails they return NaN sentinels.
#[derive(Debug, Clone)]
pub struct SpectrumRecord {
    frequency_range_hz: f64,
    excitation_frequency_mhz: f64,
    t_axis: Vec<f64>,
    t_magnitude: Vec<f32>,
    t_real: Vec<f32>,
    t_imaginary: Vec<f32>,
    t_magnitude_smooth: Vec<f32>,
    t_real_smooth: Vec<f32>,
    f_axis: Vec<f64>,
    f_signal: Vec<Complex<f32>>,
    f_magnitude: Vec<f32>,
}

impl SpectrumRecord {
    /// Derive a record from a raw readout
    ///
    /// The readout is cropped to `sample_time_ms * 250` samples (or its own
    /// length, whichever is shorter) and scaled to millivolts before any
    /// view is computed.
    pub fn new(
        readout: &[Complex<f32>],
        sample_time_ms: f64,
        frequency_range_hz: f64,
        excitation_frequency_mhz: f64,
    ) -> Self {
        let crop = (sample_time_ms * SAMPLES_PER_MS) as usize;
        let n = crop.min(readout.len());

        let signal: Vec<Complex<f32>> = readout[..n]
            .iter()
            .map(|s| s * ADC_TO_MILLIVOLTS)
            .collect();

        let t_magnitude: Vec<f32> = signal.iter().map(|s| s.norm()).collect();
        let t_real: Vec<f32> = signal.iter().map(|s| s.re).collect();
        let t_imaginary: Vec<f32> = signal.iter().map(|s| s.im).collect();
        let t_magnitude_smooth = moving_average(&t_magnitude, SMOOTHING_WINDOW);
        let t_real_smooth = moving_average(&t_real, SMOOTHING_WINDOW);

        let f_signal = centered_fft(signal);
        let f_magnitude: Vec<f32> = f_signal.iter().map(|s| s.norm()).collect();

        SpectrumRecord {
            frequency_range_hz,
            excitation_frequency_mhz,
            t_axis: linspace(0.0, sample_time_ms, n),
            t_magnitude,
            t_real,
            t_imaginary,
            t_magnitude_smooth,
            t_real_smooth,
            f_axis: linspace(-frequency_range_hz / 2.0, frequency_range_hz / 2.0, n),
            f_signal,
            f_magnitude,
        }
    }

    /// Number of samples in the cropped record
    pub fn len(&self) -> usize {
        self.t_magnitude.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t_magnitude.is_empty()
    }

    /// Time axis in ms
    pub fn t_axis(&self) -> &[f64] {
        &self.t_axis
    }

    /// Time-domain magnitude in mV
    pub fn t_magnitude(&self) -> &[f32] {
        &self.t_magnitude
    }

    /// Time-domain real part in mV
    pub fn t_real(&self) -> &[f32] {
        &self.t_real
    }

    /// Time-domain imaginary part in mV
    pub fn t_imaginary(&self) -> &[f32] {
        &self.t_imaginary
    }

    /// 50-point moving average of the time-domain magnitude
    pub fn t_magnitude_smooth(&self) -> &[f32] {
        &self.t_magnitude_smooth
    }

    /// 50-point moving average of the time-domain real part
    pub fn t_real_smooth(&self) -> &[f32] {
        &self.t_real_smooth
    }

    /// Frequency axis in Hz, centered on zero offset
    pub fn f_axis(&self) -> &[f64] {
        &self.f_axis
    }

    /// Complex spectrum
    pub fn f_signal(&self) -> &[Complex<f32>] {
        &self.f_signal
    }

    /// Spectrum magnitude
    pub fn f_magnitude(&self) -> &[f32] {
        &self.f_magnitude
    }

    /// Whether the record carries enough dynamic range to evaluate
    ///
    /// Gate: `max(magnitude) - min(magnitude) > 1 mV`. Every metric method
    /// returns NaN sentinels when this is false.
    pub fn is_evaluable(&self) -> bool {
        match minmax(&self.t_magnitude) {
            Some((lo, hi)) => hi - lo > EVALUABILITY_GATE_MV,
            None => false,
        }
    }

    /// Locate the dominant peak in both domains
    pub fn peak_parameters(&self) -> PeakParameters {
        if !self.is_evaluable() {
            return PeakParameters::not_evaluable();
        }
        let (idx, &spectral_peak) = match argmax(&self.f_magnitude) {
            Some(found) => found,
            None => return PeakParameters::not_evaluable(),
        };
        let time_domain_peak = self
            .t_magnitude_smooth
            .iter()
            .cloned()
            .fold(f32::MIN, f32::max);

        let n = self.f_magnitude.len() as f64;
        let offset_hz = (idx as f64 - n / 2.0) * self.frequency_range_hz / n;
        PeakParameters {
            spectral_peak: f64::from(spectral_peak),
            peak_index: Some(idx),
            time_domain_peak: f64::from(time_domain_peak),
            center_frequency_mhz: self.excitation_frequency_mhz + offset_hz / 1e6,
        }
    }

    /// Time-domain peak with the sign of the early real-part minimum
    ///
    /// Inversion-recovery traces start negative; the sign of the smoothed
    /// real part's minimum over the first 50 samples restores the polarity
    /// the magnitude trace discards.
    pub fn signed_time_domain_peak(&self) -> f64 {
        let peak = self.peak_parameters();
        if !peak.is_valid() {
            return f64::NAN;
        }
        let lead = self.t_real_smooth.len().min(SMOOTHING_WINDOW);
        let early_min = self.t_real_smooth[..lead]
            .iter()
            .cloned()
            .fold(f32::MAX, f32::min);
        if early_min < 0.0 {
            -peak.time_domain_peak
        } else {
            peak.time_domain_peak
        }
    }

    /// Full width at half maximum of the dominant peak
    ///
    /// Scans from the peak outward on each side for the first sample at or
    /// below half the peak value, looking no further than `window / 2`
    /// samples away. A missing crossing on either side makes the whole
    /// result not evaluable.
    pub fn fwhm(&self, window: usize) -> Fwhm {
        let peak = self.peak_parameters();
        let idx = match peak.peak_index {
            Some(idx) => idx,
            None => return Fwhm::not_evaluable(),
        };
        let half = self.f_magnitude[idx] / 2.0;
        let half_window = window / 2;
        let n = self.f_magnitude.len();

        let floor = idx.saturating_sub(half_window);
        let left = (floor..idx)
            .rev()
            .find(|&i| self.f_magnitude[i] <= half);
        let ceil = (idx + half_window).min(n.saturating_sub(1));
        let right = (idx + 1..=ceil).find(|&i| self.f_magnitude[i] <= half);

        match (left, right) {
            (Some(left), Some(right)) => {
                let samples = (right - left) as f64;
                let hertz = samples * self.frequency_range_hz / n as f64;
                Fwhm {
                    samples,
                    hertz,
                    ppm: hertz / peak.center_frequency_mhz,
                }
            }
            _ => Fwhm::not_evaluable(),
        }
    }

    /// Signal-to-noise ratio of the dominant peak
    ///
    /// The noise floor is the spectrum minus its own 50-point moving
    /// average, taken outside a band of `fwhm * window_factor` samples
    /// around the peak and outside a 50-sample margin at each edge. Band
    /// indices saturate at the spectrum bounds.
    pub fn snr(&self, window_factor: f64) -> f64 {
        let peak = self.peak_parameters();
        let idx = match peak.peak_index {
            Some(idx) => idx,
            None => return f64::NAN,
        };
        let fwhm = self.fwhm(DEFAULT_FWHM_WINDOW);
        if !fwhm.is_valid() {
            return f64::NAN;
        }

        let n = self.f_magnitude.len();
        let exclusion = (fwhm.samples * window_factor).round() as usize;
        let band_lo = idx.saturating_sub(exclusion / 2);
        let band_hi = (idx + exclusion / 2).min(n);

        let baseline = moving_average(&self.f_magnitude, SMOOTHING_WINDOW);
        let noise: Vec<f64> = (EDGE_EXCLUSION..n.saturating_sub(EDGE_EXCLUSION))
            .filter(|&i| i < band_lo || i >= band_hi)
            .map(|i| f64::from(self.f_magnitude[i] - baseline[i]))
            .collect();
        if noise.is_empty() {
            return f64::NAN;
        }

        let mean = noise.iter().sum::<f64>() / noise.len() as f64;
        let variance = noise.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / noise.len() as f64;
        let stddev = variance.sqrt();
        if stddev == 0.0 {
            return f64::NAN;
        }
        peak.spectral_peak / stddev
    }
}

/// Moving average with zero padding, output aligned with the input
fn moving_average(data: &[f32], window: usize) -> Vec<f32> {
    let n = data.len();
    if n == 0 || window == 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(n);
    let reach = (window - 1) / 2;
    for i in 0..n {
        let hi = i + reach;
        let lo = hi as isize - (window as isize - 1);
        let lo = lo.max(0) as usize;
        let hi = hi.min(n - 1);
        let sum: f32 = data[lo..=hi].iter().sum();
        out.push(sum / window as f32);
    }
    out
}

/// Centered orthonormal FFT: shift, transform, scale by 1/sqrt(n), shift
fn centered_fft(mut signal: Vec<Complex<f32>>) -> Vec<Complex<f32>> {
    let n = signal.len();
    if n == 0 {
        return signal;
    }
    signal.rotate_right(n / 2);
    let fft = FftPlanner::new().plan_fft_forward(n);
    fft.process(&mut signal);
    let scale = 1.0 / (n as f32).sqrt();
    for value in &mut signal {
        *value *= scale;
    }
    signal.rotate_right(n / 2);
    signal
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

fn argmax(data: &[f32]) -> Option<(usize, &f32)> {
    data.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
}

fn minmax(data: &[f32]) -> Option<(f32, f32)> {
    data.iter().fold(None, |acc, &v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}
