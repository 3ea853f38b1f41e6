//! Repeated single-shot measurement loops for T1 and T2
//!
//! One relaxation measurement is a strictly sequential walk over a list
//! of sequence timing values. Each point uploads a re-parameterized pulse
//! sequence, waits out the recovery delay, averages a handful of
//! single-shot spectra, and keeps the sign-corrected time-domain peak.
//! The collected series then goes to the fit engine.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::acquire::orchestrator::{
    AcquisitionDriver, AcquisitionParams, CancelToken, InstrumentState,
};
use crate::analysis::relaxometry::{fit, FitBounds, RelaxationFit, RelaxationKind, RelaxationSeries};
use crate::error::{ConsoleError, Result};
use crate::io::Transport;

/// Produces the instruction byte stream for one sequence timing value
///
/// The loader that assembles pulse sequences lives outside this crate;
/// this seam is all the relaxometer needs from it.
pub trait SequenceProvider {
    /// Assemble the sequence with its timing parameter set to `timing_ms`
    fn sequence_bytes(&self, timing_ms: f64) -> Result<Vec<u8>>;
}

impl<F> SequenceProvider for F
where
    F: Fn(f64) -> Result<Vec<u8>>,
{
    fn sequence_bytes(&self, timing_ms: f64) -> Result<Vec<u8>> {
        self(timing_ms)
    }
}

/// Schedule for one relaxation measurement
#[derive(Debug, Clone, PartialEq)]
pub struct RelaxometryRun {
    /// Sequence timing values in milliseconds, in measurement order
    pub timings_ms: Vec<f64>,
    /// Delay between the sequence upload and the first shot, per point
    pub recovery_ms: u64,
    /// Single-shot acquisitions averaged into each point
    pub avg_per_point: usize,
    /// Fit bounds, or `None` for the defaults derived from the series
    pub bounds: Option<FitBounds>,
}

impl RelaxometryRun {
    pub fn new(timings_ms: Vec<f64>) -> Self {
        RelaxometryRun {
            timings_ms,
            recovery_ms: 1000,
            avg_per_point: 1,
            bounds: None,
        }
    }
}

/// Runs relaxation measurements over one acquisition driver
pub struct Relaxometer<T: Transport> {
    driver: AcquisitionDriver<T>,
}

impl<T: Transport> Relaxometer<T> {
    pub fn new(driver: AcquisitionDriver<T>) -> Self {
        Relaxometer { driver }
    }

    /// The wrapped driver
    pub fn driver(&self) -> &AcquisitionDriver<T> {
        &self.driver
    }

    /// Mutable access to the wrapped driver
    pub fn driver_mut(&mut self) -> &mut AcquisitionDriver<T> {
        &mut self.driver
    }

    /// Consume the relaxometer and return its driver
    pub fn into_driver(self) -> AcquisitionDriver<T> {
        self.driver
    }

    /// Measure one relaxation curve and fit it
    ///
    /// Walks `run.timings_ms` in order. Cancellation is honored between
    /// timing points; a cancelled run fits whatever points were collected,
    /// which the fit engine reports as invalid when fewer than five
    /// remain. Transport and protocol errors abort the run immediately.
    ///
    /// # Errors
    ///
    /// - [`ConsoleError::InvalidParameter`] - Zero averages per point
    /// - Any transport or protocol error from the underlying acquisitions
    pub fn measure(
        &mut self,
        kind: RelaxationKind,
        instrument: &InstrumentState,
        params: &AcquisitionParams,
        run: &RelaxometryRun,
        sequences: &dyn SequenceProvider,
        cancel: &CancelToken,
    ) -> Result<RelaxationFit> {
        if run.avg_per_point == 0 {
            return Err(ConsoleError::InvalidParameter(
                "avg_per_point must be at least 1".into(),
            ));
        }

        info!(
            ?kind,
            points = run.timings_ms.len(),
            avg_per_point = run.avg_per_point,
            "Starting relaxation measurement"
        );

        let mut series = RelaxationSeries::new();
        for &timing_ms in &run.timings_ms {
            if cancel.is_cancelled() {
                warn!(
                    collected = series.len(),
                    requested = run.timings_ms.len(),
                    "Relaxation measurement cancelled"
                );
                break;
            }

            let sequence = sequences.sequence_bytes(timing_ms)?;
            self.driver.upload_sequence(&sequence)?;
            thread::sleep(Duration::from_millis(run.recovery_ms));

            let mut sum = 0.0;
            for _ in 0..run.avg_per_point {
                let record = self.driver.acquire_spectrum(instrument, params)?;
                sum += record.signed_time_domain_peak();
            }
            let amplitude = sum / run.avg_per_point as f64;
            debug!(timing_ms, amplitude, "Relaxation point collected");
            series.push(timing_ms, amplitude);
        }

        Ok(fit(kind, &series, run.bounds))
    }
}
